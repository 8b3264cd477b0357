//! Annotation decoder.
//!
//! Parses the annotator's delimited response and maps every flagged token
//! back to the offsets of the token it was issued for. Offsets always come
//! from the original [`TokenizedText`], never from the response.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tokenizer::{unescape, TokenizedText};

/// A span recovered from the annotator response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedToken {
    pub id: usize,
    pub error_type: Option<String>,
    pub suggestion: Option<String>,
    pub text: String,
}

/// A grammar error located in the normalized input text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrammarError {
    pub error_type: String,
    pub suggestion: String,
    pub text: String,
    /// Start character offset in the normalized text
    pub start: usize,
    /// End character offset (exclusive)
    pub end: usize,
}

/// How much of the delimiter protocol the decoder enforces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    /// Report whatever the annotator flagged, skipping only unknown ids
    Lenient,
    /// Also reject responses that break the structural invariants
    #[default]
    Strict,
}

/// Structural protocol violation found in strict mode
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Malformation {
    #[error("response contains no delimited tokens")]
    NoSpans,
    #[error("token id {0} appears more than once")]
    DuplicateId(usize),
    #[error("token id {found} follows id {previous}")]
    OutOfOrder { previous: usize, found: usize },
    #[error("whitespace token {0} was annotated")]
    AnnotatedWhitespace(usize),
}

fn span_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)\[START:(\d+)(?::ERROR:([^:\]]+):([^\]]+))?\]((?:\\.|[^\\\[])*)\[END\]")
            .expect("span pattern is valid")
    })
}

/// Extract every delimited span from the response, left to right.
///
/// Spans whose id does not fit in `usize` are skipped.
pub fn parse_annotations(response: &str) -> Vec<AnnotatedToken> {
    span_pattern()
        .captures_iter(response)
        .filter_map(|caps| {
            let id = caps.get(1)?.as_str().parse::<usize>().ok()?;
            Some(AnnotatedToken {
                id,
                error_type: caps.get(2).map(|m| m.as_str().trim().to_string()),
                suggestion: caps.get(3).map(|m| m.as_str().trim().to_string()),
                text: unescape(caps.get(4).map(|m| m.as_str()).unwrap_or_default()),
            })
        })
        .collect()
}

/// Decode an annotator response into grammar errors for `tokenized`
pub fn decode(
    tokenized: &TokenizedText,
    response: &str,
    mode: DecodeMode,
) -> Result<Vec<GrammarError>, Malformation> {
    let annotations = parse_annotations(response);

    let known: Vec<&AnnotatedToken> = annotations
        .iter()
        .filter(|ann| {
            let found = tokenized.get(ann.id).is_some();
            if !found {
                tracing::debug!(id = ann.id, "dropping annotation for unknown token id");
            }
            found
        })
        .collect();

    if mode == DecodeMode::Strict {
        validate(tokenized, &known)?;
    }

    let errors = known
        .into_iter()
        .filter_map(|ann| {
            let error_type = ann.error_type.clone()?;
            let token = tokenized.get(ann.id)?;
            Some(GrammarError {
                error_type,
                suggestion: ann.suggestion.clone().unwrap_or_default(),
                text: ann.text.clone(),
                start: token.start,
                end: token.end,
            })
        })
        .collect();

    Ok(errors)
}

fn validate(tokenized: &TokenizedText, spans: &[&AnnotatedToken]) -> Result<(), Malformation> {
    if spans.is_empty() && !tokenized.is_empty() {
        return Err(Malformation::NoSpans);
    }

    let mut seen = HashSet::new();
    let mut previous: Option<usize> = None;

    for ann in spans {
        if !seen.insert(ann.id) {
            return Err(Malformation::DuplicateId(ann.id));
        }
        if let Some(prev) = previous {
            if ann.id < prev {
                return Err(Malformation::OutOfOrder {
                    previous: prev,
                    found: ann.id,
                });
            }
        }
        previous = Some(ann.id);

        if ann.error_type.is_some() && tokenized.get(ann.id).is_some_and(|t| t.is_whitespace()) {
            return Err(Malformation::AnnotatedWhitespace(ann.id));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> TokenizedText {
        TokenizedText::new("This is a mistake")
    }

    #[test]
    fn test_parse_plain_and_annotated_spans() {
        let anns = parse_annotations("[START:1]Hi[END][START:2:ERROR:spelling:Hey]Helo[END]");

        assert_eq!(
            anns,
            vec![
                AnnotatedToken {
                    id: 1,
                    error_type: None,
                    suggestion: None,
                    text: "Hi".to_string(),
                },
                AnnotatedToken {
                    id: 2,
                    error_type: Some("spelling".to_string()),
                    suggestion: Some("Hey".to_string()),
                    text: "Helo".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_unannotated_echo_yields_no_errors() {
        let tokenized = sample();
        for mode in [DecodeMode::Lenient, DecodeMode::Strict] {
            let errors = decode(&tokenized, &tokenized.encode(), mode).unwrap();
            assert!(errors.is_empty());
        }
    }

    #[test]
    fn test_single_annotation_uses_original_offsets() {
        let tokenized = sample();
        let response = tokenized
            .encode()
            .replace("[START:5]", "[START:5:ERROR:grammar:should be 'an']");

        let errors = decode(&tokenized, &response, DecodeMode::Strict).unwrap();

        assert_eq!(
            errors,
            vec![GrammarError {
                error_type: "grammar".to_string(),
                suggestion: "should be 'an'".to_string(),
                text: "a".to_string(),
                start: 8,
                end: 9,
            }]
        );
    }

    #[test]
    fn test_offsets_ignore_response_drift() {
        let tokenized = sample();
        // the model collapsed the whitespace and rewrote the token text
        let response = "[START:1]This[END][START:3]is[END][START:5:ERROR:grammar:an]an[END]";

        let errors = decode(&tokenized, response, DecodeMode::Lenient).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!((errors[0].start, errors[0].end), (8, 9));
        assert_eq!(errors[0].text, "an");
    }

    #[test]
    fn test_unknown_id_is_dropped() {
        let tokenized = sample();
        let response = tokenized
            .encode()
            .replace("[START:5]", "[START:5:ERROR:grammar:should be 'an']")
            + "[START:42:ERROR:grammar:made up]ghost[END]";

        for mode in [DecodeMode::Lenient, DecodeMode::Strict] {
            let errors = decode(&tokenized, &response, mode).unwrap();
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].start, 8);
        }
    }

    #[test]
    fn test_oversized_id_is_dropped() {
        let tokenized = sample();
        let response = "[START:99999999999999999999999:ERROR:x:y]a[END][START:1:ERROR:case:this]This[END]";

        let errors = decode(&tokenized, response, DecodeMode::Lenient).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, "case");
    }

    #[test]
    fn test_lenient_passes_whitespace_annotation_through() {
        let tokenized = sample();
        let response = tokenized
            .encode()
            .replace("[START:2]", "[START:2:ERROR:spacing:remove]");

        let errors = decode(&tokenized, &response, DecodeMode::Lenient).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!((errors[0].start, errors[0].end), (4, 5));
    }

    #[test]
    fn test_strict_rejects_whitespace_annotation() {
        let tokenized = sample();
        let response = tokenized
            .encode()
            .replace("[START:2]", "[START:2:ERROR:spacing:remove]");

        assert_eq!(
            decode(&tokenized, &response, DecodeMode::Strict),
            Err(Malformation::AnnotatedWhitespace(2))
        );
    }

    #[test]
    fn test_strict_rejects_duplicate_ids() {
        let tokenized = sample();
        let response = "[START:1]This[END][START:1]This[END]";
        assert_eq!(
            decode(&tokenized, response, DecodeMode::Strict),
            Err(Malformation::DuplicateId(1))
        );
    }

    #[test]
    fn test_strict_rejects_out_of_order_ids() {
        let tokenized = sample();
        let response = "[START:3]is[END][START:1]This[END]";
        assert_eq!(
            decode(&tokenized, response, DecodeMode::Strict),
            Err(Malformation::OutOfOrder { previous: 3, found: 1 })
        );
        assert!(decode(&tokenized, response, DecodeMode::Lenient).is_ok());
    }

    #[test]
    fn test_strict_rejects_response_without_spans() {
        let tokenized = sample();
        assert_eq!(
            decode(&tokenized, "Sorry, I cannot help with that.", DecodeMode::Strict),
            Err(Malformation::NoSpans)
        );
        assert_eq!(
            decode(&tokenized, "Sorry, I cannot help with that.", DecodeMode::Lenient),
            Ok(vec![])
        );
    }

    #[test]
    fn test_escaped_delimiters_in_user_text() {
        let tokenized = TokenizedText::new("see [END] here");
        let response = tokenized
            .encode()
            .replace("[START:3]", "[START:3:ERROR:style:remove brackets]");

        let errors = decode(&tokenized, &response, DecodeMode::Strict).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].text, "[END]");
        assert_eq!((errors[0].start, errors[0].end), (4, 9));
    }

    #[test]
    fn test_multiline_whitespace_tokens_parse() {
        let tokenized = TokenizedText::new("one\n\ntwo");
        let anns = parse_annotations(&tokenized.encode());
        assert_eq!(anns.len(), 3);
        assert_eq!(anns[1].text, "\n\n");
    }

    #[test]
    fn test_serializes_camel_case() {
        let error = GrammarError {
            error_type: "grammar".to_string(),
            suggestion: "an".to_string(),
            text: "a".to_string(),
            start: 8,
            end: 9,
        };
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["errorType"], "grammar");
        assert_eq!(json["start"], 8);
    }
}
