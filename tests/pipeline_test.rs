//! End-to-end pipeline tests against a mock inference service

mod common;

use common::{inference_body, school_completion, seeded_db, test_config};
use vigil::error::Error;
use vigil::models::SubmissionStatus;
use vigil::pipeline::{DocumentInput, DocumentPipeline};
use vigil::storage::SubmissionStore;

#[tokio::test]
async fn test_document_run_stages_clean_submission() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/generate")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(inference_body(&school_completion()))
        .create_async()
        .await;

    let artifacts = tempfile::tempdir().unwrap();
    let config = test_config(&server.url(), artifacts.path());
    let db = seeded_db();
    let pipeline = DocumentPipeline::new(&config, &db).unwrap();

    let input = DocumentInput::new(
        "The campus perimeter fence is damaged in several places. \
         Visitors enter the school without signing in.",
        "Safe-Schools-Best-Practices.pdf",
    );
    let outcome = pipeline.run(input).await.unwrap();

    let submission = outcome.submission.expect("submission staged");
    assert_eq!(submission.status, SubmissionStatus::PendingReview);

    // 4 parsed records: the CVE hallucination is rejected, the two
    // "Unsecured Perimeter" duplicates merge.
    let stats = &outcome.stats;
    assert_eq!(stats.records_parsed, 4);
    assert_eq!(stats.rejected_out_of_domain, 1);
    assert_eq!(stats.merged_in_batch, 1);
    assert_eq!(stats.records_staged, 2);

    let staged = db.staged_vulnerabilities(submission.id).unwrap();
    assert_eq!(staged.len(), 2);

    // School-document classification: Education, never Government
    for vuln in &staged {
        assert_eq!(vuln.sector.as_deref(), Some("Education Facilities"));
    }

    // The merged perimeter record carries the unioned OFC list
    let perimeter = staged
        .iter()
        .find(|v| v.text.contains("Perimeter"))
        .expect("perimeter record staged");
    let ofcs = db.staged_ofcs(submission.id).unwrap();
    let links = db.staged_links(submission.id).unwrap();
    let perimeter_ofcs: Vec<_> = links
        .iter()
        .filter(|l| l.vulnerability_id == perimeter.id)
        .filter_map(|l| ofcs.iter().find(|o| o.id == l.ofc_id))
        .collect();
    assert_eq!(perimeter_ofcs.len(), 2);
}

#[tokio::test]
async fn test_unusable_completion_persists_artifact_and_errors() {
    let mut server = mockito::Server::new_async().await;
    let raw_output = "I could not find any structured findings in this document.";
    server
        .mock("POST", "/api/generate")
        .with_status(200)
        .with_body(inference_body(raw_output))
        .create_async()
        .await;

    let artifacts = tempfile::tempdir().unwrap();
    let config = test_config(&server.url(), artifacts.path());
    let db = seeded_db();
    let pipeline = DocumentPipeline::new(&config, &db).unwrap();

    let result = pipeline
        .run(DocumentInput::new("Some assessment text.", "broken.pdf"))
        .await;

    // The document is errored, not silently empty
    assert!(matches!(result, Err(Error::Parse(_))));

    // The raw output is recoverable verbatim from the artifact
    let artifact_path = artifacts.path().join("broken.pdf.parse_failure.txt");
    let persisted = std::fs::read_to_string(artifact_path).unwrap();
    assert_eq!(persisted, raw_output);
}

#[tokio::test]
async fn test_inference_failure_is_local_and_counted() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/generate")
        .with_status(503)
        .with_body("overloaded")
        .create_async()
        .await;

    let artifacts = tempfile::tempdir().unwrap();
    let config = test_config(&server.url(), artifacts.path());
    let db = seeded_db();
    let pipeline = DocumentPipeline::new(&config, &db).unwrap();

    let outcome = pipeline
        .run(DocumentInput::new("Assessment text.", "doc.pdf"))
        .await
        .unwrap();

    // Zero candidate records plus a logged failure count: distinct from a
    // document with nothing extractable
    assert!(outcome.submission.is_none());
    assert_eq!(outcome.stats.chunks_failed, 1);
    assert_eq!(outcome.stats.records_parsed, 0);
}

#[tokio::test]
async fn test_empty_document_is_an_explicit_error() {
    let server = mockito::Server::new_async().await;
    let artifacts = tempfile::tempdir().unwrap();
    let config = test_config(&server.url(), artifacts.path());
    let db = seeded_db();
    let pipeline = DocumentPipeline::new(&config, &db).unwrap();

    let result = pipeline
        .run(DocumentInput::new("   \n  ", "empty.pdf"))
        .await;
    assert!(matches!(result, Err(Error::Normalize(_))));
}

#[tokio::test]
async fn test_empty_but_valid_result_is_not_an_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/generate")
        .with_status(200)
        .with_body(inference_body("[]"))
        .create_async()
        .await;

    let artifacts = tempfile::tempdir().unwrap();
    let config = test_config(&server.url(), artifacts.path());
    let db = seeded_db();
    let pipeline = DocumentPipeline::new(&config, &db).unwrap();

    let outcome = pipeline
        .run(DocumentInput::new("Nothing of note here.", "quiet.pdf"))
        .await
        .unwrap();

    assert!(outcome.submission.is_none());
    assert_eq!(outcome.stats.chunks_failed, 0);
    assert_eq!(outcome.stats.parse_failures, 0);
}

#[tokio::test]
async fn test_fenced_output_with_trailing_comma_recovers() {
    let mut server = mockito::Server::new_async().await;
    let completion = "```json\n[{\"vulnerability\":\"Unlit rear parking lot\",\"ofc\":\"Install lighting\"},]\n```";
    server
        .mock("POST", "/api/generate")
        .with_status(200)
        .with_body(inference_body(completion))
        .create_async()
        .await;

    let artifacts = tempfile::tempdir().unwrap();
    let config = test_config(&server.url(), artifacts.path());
    let db = seeded_db();
    let pipeline = DocumentPipeline::new(&config, &db).unwrap();

    let outcome = pipeline
        .run(DocumentInput::new("The rear lot is unlit.", "site.pdf"))
        .await
        .unwrap();

    assert_eq!(outcome.stats.records_parsed, 1);
    assert_eq!(outcome.stats.records_staged, 1);
    assert!(outcome.artifact_paths.is_empty());
}
