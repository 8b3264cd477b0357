//! Highlight rendering and text statistics for the live view.

use unicode_segmentation::UnicodeSegmentation;

use crate::decoder::GrammarError;

/// Word and character counts of the text being edited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextStats {
    pub words: usize,
    /// Extended grapheme clusters
    pub chars: usize,
}

impl TextStats {
    pub fn of(text: &str) -> Self {
        Self {
            words: text.split_whitespace().count(),
            chars: text.graphemes(true).count(),
        }
    }
}

/// A piece of rendered text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Plain(String),
    Flagged {
        text: String,
        error_type: String,
        suggestion: String,
    },
}

/// Split `normalized` into plain and flagged segments.
///
/// Errors are applied in `start` order. An error that is empty, out of
/// bounds, or overlaps one already applied is dropped.
pub fn highlight(normalized: &str, errors: &[GrammarError]) -> Vec<Segment> {
    let mut sorted: Vec<&GrammarError> = errors.iter().collect();
    sorted.sort_by_key(|e| (e.start, e.end));

    // byte index of every char boundary, including the end
    let boundaries: Vec<usize> = normalized
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(normalized.len()))
        .collect();
    let char_len = boundaries.len() - 1;

    let mut segments = Vec::new();
    let mut cursor = 0;

    for error in sorted {
        if error.start >= error.end || error.end > char_len {
            tracing::warn!(start = error.start, end = error.end, "dropping out-of-range error");
            continue;
        }
        if error.start < cursor {
            tracing::warn!(start = error.start, end = error.end, "dropping overlapping error");
            continue;
        }

        if error.start > cursor {
            segments.push(Segment::Plain(
                normalized[boundaries[cursor]..boundaries[error.start]].to_string(),
            ));
        }
        segments.push(Segment::Flagged {
            text: normalized[boundaries[error.start]..boundaries[error.end]].to_string(),
            error_type: error.error_type.clone(),
            suggestion: error.suggestion.clone(),
        });
        cursor = error.end;
    }

    if cursor < char_len {
        segments.push(Segment::Plain(normalized[boundaries[cursor]..].to_string()));
    }

    segments
}

/// Render segments as HTML with the suggestion in a tooltip
pub fn to_html(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Plain(text) => out.push_str(&html_escape::encode_text(text)),
            Segment::Flagged {
                text,
                error_type,
                suggestion,
            } => {
                out.push_str("<span class=\"grammar-error\" data-error-type=\"");
                out.push_str(&html_escape::encode_double_quoted_attribute(error_type));
                out.push_str("\" title=\"");
                out.push_str(&html_escape::encode_double_quoted_attribute(suggestion));
                out.push_str("\">");
                out.push_str(&html_escape::encode_text(text));
                out.push_str("</span>");
            }
        }
    }
    out
}

/// Render segments for a terminal: flagged text in red, underlined, with
/// the suggestion dimmed after it
pub fn to_ansi(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Plain(text) => out.push_str(text),
            Segment::Flagged { text, suggestion, .. } => {
                out.push_str("\x1b[4;31m");
                out.push_str(text);
                out.push_str("\x1b[0m");
                if !suggestion.is_empty() {
                    out.push_str("\x1b[2m [");
                    out.push_str(suggestion);
                    out.push_str("]\x1b[0m");
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn error(start: usize, end: usize, suggestion: &str) -> GrammarError {
        GrammarError {
            error_type: "grammar".to_string(),
            suggestion: suggestion.to_string(),
            text: String::new(),
            start,
            end,
        }
    }

    fn flagged(text: &str, suggestion: &str) -> Segment {
        Segment::Flagged {
            text: text.to_string(),
            error_type: "grammar".to_string(),
            suggestion: suggestion.to_string(),
        }
    }

    #[test]
    fn test_stats() {
        assert_eq!(TextStats::of(""), TextStats { words: 0, chars: 0 });
        assert_eq!(TextStats::of("   "), TextStats { words: 0, chars: 3 });
        assert_eq!(TextStats::of(" This is  a test\n"), TextStats { words: 4, chars: 17 });
        // one grapheme made of two scalar values
        assert_eq!(TextStats::of("e\u{301}"), TextStats { words: 1, chars: 1 });
    }

    #[test]
    fn test_highlight_without_errors() {
        assert_eq!(highlight("plain text", &[]), vec![Segment::Plain("plain text".to_string())]);
        assert!(highlight("", &[]).is_empty());
    }

    #[test]
    fn test_highlight_sorts_errors() {
        let text = "Their is a apple";
        let errors = vec![error(9, 10, "an"), error(0, 5, "There")];

        assert_eq!(
            highlight(text, &errors),
            vec![
                flagged("Their", "There"),
                Segment::Plain(" is ".to_string()),
                flagged("a", "an"),
                Segment::Plain(" apple".to_string()),
            ]
        );
    }

    #[test]
    fn test_highlight_uses_char_offsets() {
        let text = "café au lait";
        assert_eq!(
            highlight(text, &[error(5, 7, "à")]),
            vec![
                Segment::Plain("café ".to_string()),
                flagged("au", "à"),
                Segment::Plain(" lait".to_string()),
            ]
        );
    }

    #[test]
    fn test_highlight_drops_overlap_and_out_of_range() {
        let text = "abcdef";
        let errors = vec![error(1, 4, "x"), error(2, 3, "y"), error(5, 9, "z"), error(4, 4, "w")];

        assert_eq!(
            highlight(text, &errors),
            vec![
                Segment::Plain("a".to_string()),
                flagged("bcd", "x"),
                Segment::Plain("ef".to_string()),
            ]
        );
    }

    #[test]
    fn test_to_html_escapes() {
        let segments = vec![
            Segment::Plain("1 < 2 ".to_string()),
            flagged("<b>", "say \"bold\""),
        ];
        assert_eq!(
            to_html(&segments),
            "1 &lt; 2 <span class=\"grammar-error\" data-error-type=\"grammar\" title=\"say &quot;bold&quot;\">&lt;b&gt;</span>"
        );
    }

    #[test]
    fn test_to_ansi() {
        let segments = vec![Segment::Plain("a ".to_string()), flagged("teh", "the")];
        assert_eq!(to_ansi(&segments), "a \x1b[4;31mteh\x1b[0m\x1b[2m [the]\x1b[0m");
    }
}
