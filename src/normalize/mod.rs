//! Text normalization for extracted document content
//!
//! This module converts raw text extracted from assessment documents into
//! clean, segmented pipeline input: control-character removal, whitespace
//! normalization, de-hyphenation across line breaks, boilerplate
//! header/footer stripping, and bounded chunking.
//!
//! Normalization is lossy only with respect to formatting, never wording;
//! an empty input is an explicit error, not a silently-empty success.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::models::DocumentFormat;
use crate::utils::error::NormalizeError;

// Pre-compiled regex patterns
static WHITESPACE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());

static MULTI_NEWLINE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

static HYPHEN_BREAK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z])-\n[ \t]*([a-z])").unwrap());

static PAGE_NUMBER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(page\s+)?\d+(\s+of\s+\d+)?\s*$").unwrap());

/// Minimum repetitions before a line is treated as a running header/footer
const BOILERPLATE_MIN_REPEATS: usize = 3;

/// Lines longer than this are body text even when repeated
const BOILERPLATE_MAX_LEN: usize = 80;

// ============================================================================
// Configuration
// ============================================================================

/// Normalizer configuration
#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// Character budget per chunk; documents within the budget stay whole
    pub chunk_char_budget: usize,

    /// Strip repeated header/footer lines and bare page numbers
    pub strip_boilerplate: bool,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            chunk_char_budget: 12_000,
            strip_boilerplate: true,
        }
    }
}

// ============================================================================
// Output
// ============================================================================

/// Normalized document ready for prompt composition
#[derive(Debug, Clone)]
pub struct NormalizedDocument {
    /// Full normalized text
    pub text: String,

    /// Ordered chunks bounded by the character budget; a document within
    /// the budget yields exactly one chunk
    pub chunks: Vec<String>,

    /// Source format tag, carried for downstream logging
    pub format: DocumentFormat,
}

// ============================================================================
// Normalizer
// ============================================================================

/// Text normalizer for raw extracted document content
pub struct TextNormalizer {
    config: NormalizerConfig,
}

impl TextNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    /// Normalize raw extracted text and split it into bounded chunks.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError::EmptyDocument`] when the input contains no
    /// content after trimming.
    pub fn normalize(
        &self,
        raw: &str,
        format: DocumentFormat,
    ) -> Result<NormalizedDocument, NormalizeError> {
        if raw.trim().is_empty() {
            return Err(NormalizeError::EmptyDocument);
        }

        let mut text = remove_control_chars(raw);
        text = dehyphenate(&text);
        if self.config.strip_boilerplate {
            text = strip_boilerplate_lines(&text);
        }
        text = collapse_whitespace(&text);
        text = trim_lines(&text);
        text = collapse_newlines(&text);
        let text = text.trim().to_string();

        if text.is_empty() {
            return Err(NormalizeError::EmptyDocument);
        }

        let chunks = chunk_text(&text, self.config.chunk_char_budget);

        Ok(NormalizedDocument {
            text,
            chunks,
            format,
        })
    }
}

// ============================================================================
// Normalization Steps
// ============================================================================

/// Remove control characters except newline and tab
pub fn remove_control_chars(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Join words hyphenated across a line break.
///
/// # Examples
///
/// ```
/// use vigil::normalize::dehyphenate;
///
/// assert_eq!(dehyphenate("secur-\nity officer"), "security officer");
/// ```
pub fn dehyphenate(text: &str) -> String {
    HYPHEN_BREAK_REGEX.replace_all(text, "$1$2").to_string()
}

/// Remove running headers/footers and bare page-number lines.
///
/// A line is boilerplate when it is short and repeats verbatim at least
/// three times across the document, or when it is nothing but a page
/// number. Body wording is never touched.
pub fn strip_boilerplate_lines(text: &str) -> String {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if !trimmed.is_empty() && trimmed.len() <= BOILERPLATE_MAX_LEN {
            *counts.entry(trimmed).or_insert(0) += 1;
        }
    }

    text.lines()
        .filter(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return true;
            }
            if PAGE_NUMBER_REGEX.is_match(trimmed) {
                return false;
            }
            counts.get(trimmed).copied().unwrap_or(0) < BOILERPLATE_MIN_REPEATS
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Normalize runs of spaces/tabs to a single space
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_REGEX.replace_all(text, " ").to_string()
}

/// Trim whitespace from each line, preserving line structure
pub fn trim_lines(text: &str) -> String {
    text.lines()
        .map(|line| line.trim())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapse 3+ consecutive newlines to a paragraph break
pub fn collapse_newlines(text: &str) -> String {
    MULTI_NEWLINE_REGEX.replace_all(text, "\n\n").to_string()
}

// ============================================================================
// Chunking
// ============================================================================

/// Split text into chunks bounded by a character budget.
///
/// Splits at paragraph boundaries, falling back to whitespace splits for a
/// single paragraph that exceeds the budget on its own. No content is
/// dropped: the chunks concatenate back to the input text modulo paragraph
/// separators.
pub fn chunk_text(text: &str, char_budget: usize) -> Vec<String> {
    if text.chars().count() <= char_budget {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n") {
        let pieces = if paragraph.chars().count() > char_budget {
            split_oversized(paragraph, char_budget)
        } else {
            vec![paragraph.to_string()]
        };

        for piece in pieces {
            let needed = piece.chars().count() + if current.is_empty() { 0 } else { 2 };
            if !current.is_empty() && current.chars().count() + needed > char_budget {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&piece);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Split one oversized paragraph at whitespace near the budget
fn split_oversized(paragraph: &str, char_budget: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for word in paragraph.split_whitespace() {
        if !current.is_empty() && current.chars().count() + word.chars().count() + 1 > char_budget {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_an_error() {
        let normalizer = TextNormalizer::new(NormalizerConfig::default());
        let result = normalizer.normalize("   \n\t  ", DocumentFormat::Txt);
        assert!(matches!(result, Err(NormalizeError::EmptyDocument)));
    }

    #[test]
    fn test_dehyphenate_across_line_break() {
        assert_eq!(dehyphenate("secur-\nity officer"), "security officer");
        assert_eq!(dehyphenate("perime-\n  ter"), "perimeter");
        // A hyphenated compound on one line is untouched
        assert_eq!(dehyphenate("well-known issue"), "well-known issue");
    }

    #[test]
    fn test_strip_repeated_header() {
        let text = "ACME Assessment Report\nFinding one.\n\nACME Assessment Report\nFinding two.\n\nACME Assessment Report\nFinding three.";
        let stripped = strip_boilerplate_lines(text);
        assert!(!stripped.contains("ACME Assessment Report"));
        assert!(stripped.contains("Finding one."));
        assert!(stripped.contains("Finding three."));
    }

    #[test]
    fn test_strip_page_numbers() {
        let text = "Finding one.\nPage 3 of 12\nFinding two.\n7";
        let stripped = strip_boilerplate_lines(text);
        assert!(!stripped.contains("Page 3 of 12"));
        assert!(!stripped.contains('7'));
        assert!(stripped.contains("Finding one."));
    }

    #[test]
    fn test_single_chunk_when_within_budget() {
        let normalizer = TextNormalizer::new(NormalizerConfig::default());
        let doc = normalizer
            .normalize("A short assessment finding.", DocumentFormat::Pdf)
            .unwrap();
        assert_eq!(doc.chunks.len(), 1);
        assert_eq!(doc.chunks[0], doc.text);
    }

    #[test]
    fn test_chunking_preserves_content() {
        let paragraphs: Vec<String> = (0..40)
            .map(|i| format!("Paragraph {i} describes a distinct security finding at the site."))
            .collect();
        let text = paragraphs.join("\n\n");
        let chunks = chunk_text(&text, 200);

        assert!(chunks.len() > 1);
        for p in &paragraphs {
            assert!(
                chunks.iter().any(|c| c.contains(p.as_str())),
                "paragraph lost: {p}"
            );
        }
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 200);
        }
    }

    #[test]
    fn test_oversized_paragraph_is_split() {
        let text = "word ".repeat(1000);
        let chunks = chunk_text(text.trim(), 100);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 100));
    }

    #[test]
    fn test_whitespace_normalization() {
        let normalizer = TextNormalizer::new(NormalizerConfig::default());
        let doc = normalizer
            .normalize("Gaps   in\t\tfencing\n\n\n\n\nNear the gate.", DocumentFormat::Docx)
            .unwrap();
        assert_eq!(doc.text, "Gaps in fencing\n\nNear the gate.");
    }

    #[test]
    fn test_control_chars_removed() {
        let clean = remove_control_chars("alpha\x00beta\x07\ngamma");
        assert_eq!(clean, "alphabeta\ngamma");
    }
}
