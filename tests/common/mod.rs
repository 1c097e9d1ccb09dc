//! Shared fixtures for integration tests

use vigil::config::Config;
use vigil::storage::{Database, TaxonomyRepository};
use vigil::taxonomy::TaxonomyStore;

/// In-memory database with the taxonomy seeded
pub fn seeded_db() -> Database {
    let db = Database::in_memory().unwrap();
    db.seed(&TaxonomyStore::seeded()).unwrap();
    db
}

/// Config pointed at a mock inference endpoint and a temp artifact dir
#[allow(dead_code)]
pub fn test_config(endpoint: &str, artifact_dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.inference.endpoint = endpoint.to_string();
    config.inference.max_retries = 0;
    config.inference.timeout_secs = 10;
    config.database.artifact_dir = artifact_dir.to_path_buf();
    config
}

/// A well-formed model completion for a school assessment document
#[allow(dead_code)]
pub fn school_completion() -> String {
    serde_json::json!([
        {
            "vulnerability": "Lack of a formal visitor management policy",
            "ofcs": ["Adopt a visitor check-in procedure", "Issue visitor badges"],
            "confidence": "High",
            "impact": "Moderate"
        },
        {
            "vulnerability": "Unsecured Perimeter",
            "ofcs": ["Install fencing"],
            "confidence": "Medium",
            "impact": "High"
        },
        {
            "vulnerability": "Unsecured Perimeter",
            "ofcs": ["Install fencing", "Add gate alarms"],
            "confidence": "High",
            "impact": "High"
        },
        {
            "vulnerability": "CVE-2022-1234 exposes the camera NVR to remote exploitation",
            "ofcs": ["Patch the NVR firmware"],
            "confidence": "High",
            "impact": "High"
        }
    ])
    .to_string()
}

/// Wrap a completion in the inference service's response body
#[allow(dead_code)]
pub fn inference_body(completion: &str) -> String {
    serde_json::json!({ "response": completion, "done": true }).to_string()
}
