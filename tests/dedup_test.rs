//! Deduplication properties: key determinism and idempotence

use proptest::prelude::*;

use vigil::dedup::{comparison_text, DedupConfig, DedupEngine};
use vigil::models::{dedupe_key, CandidateRecord};

fn candidate(text: &str, ofcs: &[&str]) -> CandidateRecord {
    let mut record = CandidateRecord {
        text: text.to_string(),
        ofc_texts: ofcs.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    };
    record.compute_dedupe_key();
    record
}

#[test]
fn test_exact_duplicate_scenario() {
    let engine = DedupEngine::new(DedupConfig::default());
    let a = candidate("Unsecured Perimeter", &["Install fencing"]);
    let b = candidate("Unsecured Perimeter", &["Install fencing"]);
    assert_eq!(a.dedupe_key, b.dedupe_key);

    let outcome = engine.dedup(vec![a, b], &[]);
    assert_eq!(outcome.records.len(), 1);
    // The OFC union holds one deduplicated entry
    assert_eq!(outcome.records[0].ofc_texts, vec!["Install fencing"]);
}

#[test]
fn test_key_is_fixed_length_lowercase_hex() {
    let key = dedupe_key("Unsecured Perimeter", "Install fencing");
    assert_eq!(key.len(), 64);
    assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

proptest! {
    /// Records whose texts normalize identically must share a dedupe key
    #[test]
    fn prop_dedupe_key_invariant_under_formatting(
        words in prop::collection::vec("[a-z]{3,8}", 1..6),
        ofc in "[a-z]{3,8}( [a-z]{3,8}){0,3}",
    ) {
        let text = words.join(" ");
        // Same wording under different case, spacing, punctuation, and a
        // leading article
        let decorated = format!("The {}.", words.join("  ").to_uppercase());
        prop_assert_eq!(
            comparison_text(&text),
            comparison_text(&decorated)
        );
        prop_assert_eq!(dedupe_key(&text, &ofc), dedupe_key(&decorated, &ofc));
    }

    /// Distinct normalized content must not collide
    #[test]
    fn prop_distinct_content_distinct_keys(
        a in "[a-z]{4,12} [a-z]{4,12}",
        b in "[a-z]{4,12} [a-z]{4,12}",
    ) {
        prop_assume!(comparison_text(&a) != comparison_text(&b));
        prop_assert_ne!(dedupe_key(&a, ""), dedupe_key(&b, ""));
    }

    /// Deduplicating an already-deduplicated set is a no-op
    #[test]
    fn prop_dedup_idempotent(
        texts in prop::collection::vec("[a-z]{3,9}( [a-z]{3,9}){1,5}", 1..8),
    ) {
        let engine = DedupEngine::new(DedupConfig::default());
        let records: Vec<CandidateRecord> =
            texts.iter().map(|t| candidate(t, &["shared mitigation"])).collect();

        let once = engine.dedup(records, &[]);
        let once_keys: Vec<String> =
            once.records.iter().map(|r| r.dedupe_key.clone()).collect();
        let once_texts: Vec<String> =
            once.records.iter().map(|r| r.text.clone()).collect();

        let twice = engine.dedup(once.records.clone(), &[]);

        prop_assert_eq!(twice.merged_in_batch, 0);
        prop_assert_eq!(
            twice.records.iter().map(|r| r.dedupe_key.clone()).collect::<Vec<_>>(),
            once_keys
        );
        prop_assert_eq!(
            twice.records.iter().map(|r| r.text.clone()).collect::<Vec<_>>(),
            once_texts
        );
    }
}
