//! Prompt composition for the extraction model
//!
//! Builds one prompt per normalized chunk from three layers:
//! - the fixed extraction contract (output schema, domain-exclusion rules)
//! - document-bias additions matched by filename pattern
//! - bounded enrichment context harvested from past analyst decisions
//!
//! With no bias matches and no enrichment the output equals the base
//! prompt; the composer is fully functional with an empty configuration.

use serde::{Deserialize, Serialize};

use crate::models::HeuristicsState;

/// Maximum enrichment themes included in a prompt
pub const MAX_ENRICHMENT_THEMES: usize = 5;

/// Maximum enrichment example pairs included in a prompt
pub const MAX_ENRICHMENT_EXAMPLES: usize = 3;

// ============================================================================
// Bias Rules
// ============================================================================

/// One document-bias rule: additions applied when the filename matches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiasRule {
    /// Case-insensitive substring matched against the source filename
    pub pattern: String,

    /// Extra instructions appended to the prompt when the pattern matches
    pub prompt_additions: String,
}

impl BiasRule {
    pub fn matches(&self, filename: &str) -> bool {
        filename
            .to_lowercase()
            .contains(&self.pattern.to_lowercase())
    }
}

// ============================================================================
// Enrichment Context
// ============================================================================

/// Example vulnerability/OFC pair from a past accepted extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentExample {
    pub vulnerability: String,
    pub ofc: String,
}

/// Themes and examples harvested from recent learning events.
///
/// Produced by the learning side and only read here; the event log is the
/// sole channel between the two, so the composer has no dependency on the
/// feedback controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentContext {
    pub themes: Vec<String>,
    pub examples: Vec<EnrichmentExample>,
}

impl EnrichmentContext {
    pub fn is_empty(&self) -> bool {
        self.themes.is_empty() && self.examples.is_empty()
    }
}

// ============================================================================
// Composer
// ============================================================================

/// Composer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComposerConfig {
    /// Ordered document-bias table
    pub bias_rules: Vec<BiasRule>,

    /// Domain tag woven into the extraction contract
    pub domain: String,
}

/// Prompt composer
pub struct PromptComposer {
    config: ComposerConfig,
}

impl PromptComposer {
    pub fn new(config: ComposerConfig) -> Self {
        Self { config }
    }

    /// Compose the prompt for one chunk.
    ///
    /// Target record counts derive from the current confidence threshold: a
    /// higher threshold asks the model for fewer, stronger findings.
    pub fn compose(
        &self,
        chunk: &str,
        filename: &str,
        heuristics: &HeuristicsState,
        enrichment: &EnrichmentContext,
    ) -> String {
        let mut prompt = self.base_contract(heuristics);

        for rule in self.config.bias_rules.iter().filter(|r| r.matches(filename)) {
            prompt.push('\n');
            prompt.push_str(&rule.prompt_additions);
        }

        if !enrichment.is_empty() {
            prompt.push_str(&render_enrichment(enrichment));
        }

        prompt.push_str("\n\n## Document text:\n");
        prompt.push_str(chunk);
        prompt.push_str("\n\n## Extracted records (JSON array):");
        prompt
    }

    /// Fixed extraction contract shared by every prompt
    fn base_contract(&self, heuristics: &HeuristicsState) -> String {
        let domain = if self.config.domain.is_empty() {
            "physical security"
        } else {
            &self.config.domain
        };
        let target = target_record_count(heuristics.confidence_threshold);

        format!(
            r#"You extract structured security findings from assessment documents.

From the document text below, extract up to {target} vulnerability records as a JSON array.
Each record is an object with these fields:
- "vulnerability": the vulnerability statement, quoted or closely paraphrased from the text
- "ofcs": array of recommended mitigations (options for consideration) tied to it
- "confidence": "High", "Medium", or "Low"
- "impact": "High", "Moderate", or "Low"

## Rules:
1. Only report findings supported by the document text; never invent content
2. This is a {domain} corpus; exclude findings from other domains
3. A mitigation with no stated vulnerability may be reported with an empty "vulnerability" field
4. Output nothing but the JSON array"#
        )
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }
}

/// Derive the per-chunk target record count from the confidence threshold.
///
/// Bounded so prompt size stays predictable regardless of threshold drift.
pub fn target_record_count(confidence_threshold: f64) -> usize {
    let raw = (20.0 * (1.0 - confidence_threshold)).round() as i64;
    raw.clamp(4, 16) as usize
}

/// Render bounded enrichment themes and examples
fn render_enrichment(enrichment: &EnrichmentContext) -> String {
    let mut out = String::new();

    if !enrichment.themes.is_empty() {
        out.push_str("\n\n## Themes analysts accepted from similar documents:\n");
        for theme in enrichment.themes.iter().take(MAX_ENRICHMENT_THEMES) {
            out.push_str("- ");
            out.push_str(theme);
            out.push('\n');
        }
    }

    if !enrichment.examples.is_empty() {
        out.push_str("\n## Accepted extraction examples:\n");
        for example in enrichment.examples.iter().take(MAX_ENRICHMENT_EXAMPLES) {
            out.push_str(&format!(
                "- vulnerability: {} / ofc: {}\n",
                example.vulnerability, example.ofc
            ));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heuristics() -> HeuristicsState {
        HeuristicsState::default()
    }

    #[test]
    fn test_empty_configuration_yields_base_prompt() {
        let composer = PromptComposer::new(ComposerConfig::default());
        let prompt = composer.compose(
            "chunk text",
            "assessment.pdf",
            &heuristics(),
            &EnrichmentContext::default(),
        );

        let mut expected = composer.base_contract(&heuristics());
        expected.push_str("\n\n## Document text:\nchunk text\n\n## Extracted records (JSON array):");
        assert_eq!(prompt, expected);
    }

    #[test]
    fn test_bias_rule_matched_case_insensitively() {
        let composer = PromptComposer::new(ComposerConfig {
            bias_rules: vec![BiasRule {
                pattern: "school".to_string(),
                prompt_additions: "Focus on student safety findings.".to_string(),
            }],
            domain: String::new(),
        });

        let matched = composer.compose(
            "text",
            "Safe-SCHOOLS-Review.pdf",
            &heuristics(),
            &EnrichmentContext::default(),
        );
        assert!(matched.contains("Focus on student safety findings."));

        let unmatched = composer.compose(
            "text",
            "hospital-review.pdf",
            &heuristics(),
            &EnrichmentContext::default(),
        );
        assert!(!unmatched.contains("Focus on student safety findings."));
    }

    #[test]
    fn test_multiple_bias_rules_concatenate_in_order() {
        let composer = PromptComposer::new(ComposerConfig {
            bias_rules: vec![
                BiasRule {
                    pattern: "school".to_string(),
                    prompt_additions: "FIRST".to_string(),
                },
                BiasRule {
                    pattern: ".pdf".to_string(),
                    prompt_additions: "SECOND".to_string(),
                },
            ],
            domain: String::new(),
        });

        let prompt = composer.compose(
            "text",
            "school-review.pdf",
            &heuristics(),
            &EnrichmentContext::default(),
        );
        let first = prompt.find("FIRST").unwrap();
        let second = prompt.find("SECOND").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_enrichment_is_bounded() {
        let composer = PromptComposer::new(ComposerConfig::default());
        let enrichment = EnrichmentContext {
            themes: (0..20).map(|i| format!("theme-{i}")).collect(),
            examples: (0..20)
                .map(|i| EnrichmentExample {
                    vulnerability: format!("vuln-{i}"),
                    ofc: format!("ofc-{i}"),
                })
                .collect(),
        };

        let prompt = composer.compose("text", "doc.pdf", &heuristics(), &enrichment);
        assert!(prompt.contains("theme-0"));
        assert!(prompt.contains(&format!("theme-{}", MAX_ENRICHMENT_THEMES - 1)));
        assert!(!prompt.contains(&format!("theme-{MAX_ENRICHMENT_THEMES}")));
        assert!(!prompt.contains("vuln-10"));
    }

    #[test]
    fn test_target_count_tracks_threshold() {
        // Lower threshold asks for more records, and the count stays bounded
        assert!(target_record_count(0.3) > target_record_count(0.9));
        for t in [0.0, 0.25, 0.5, 0.75, 1.0] {
            let count = target_record_count(t);
            assert!((4..=16).contains(&count));
        }
    }
}
