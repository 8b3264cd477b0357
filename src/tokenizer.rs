//! Whitespace-run tokenizer and delimiter encoder.
//!
//! Text is normalized to NFC, split into maximal whitespace and
//! non-whitespace runs, and each run is wrapped as `[START:<id>]token[END]`
//! so the annotator can refer back to it by id.

use serde::Serialize;
use unicode_normalization::UnicodeNormalization;

/// Opening delimiter prefix; the token id and `]` follow.
pub const DELIMITER_START: &str = "[START:";
/// Closing delimiter.
pub const DELIMITER_END: &str = "[END]";

/// A single whitespace or non-whitespace run of the normalized text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    /// 1-based id, contiguous in scan order
    pub id: usize,
    /// Token text
    pub text: String,
    /// Start character offset in the normalized text
    pub start: usize,
    /// End character offset (exclusive)
    pub end: usize,
}

impl Token {
    pub fn is_whitespace(&self) -> bool {
        self.text.chars().all(char::is_whitespace)
    }
}

/// Normalized text together with the tokens that partition it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedText {
    normalized: String,
    tokens: Vec<Token>,
}

impl TokenizedText {
    /// Normalize `text` to NFC and split it into tokens
    pub fn new(text: &str) -> Self {
        let normalized: String = text.nfc().collect();
        let tokens = split_runs(&normalized);
        Self { normalized, tokens }
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Length of the normalized text in characters
    pub fn char_len(&self) -> usize {
        self.tokens.last().map(|t| t.end).unwrap_or(0)
    }

    /// Look up a token by id
    pub fn get(&self, id: usize) -> Option<&Token> {
        // ids are contiguous from 1, so the id doubles as an index
        id.checked_sub(1).and_then(|idx| self.tokens.get(idx))
    }

    /// Serialize every token with its id-tagged delimiters.
    ///
    /// Token text is escaped (`\` → `\\`, `[` → `\[`) so that user text
    /// resembling a delimiter cannot be confused with one.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.normalized.len() * 2);
        for token in &self.tokens {
            out.push_str(DELIMITER_START);
            out.push_str(&token.id.to_string());
            out.push(']');
            escape_into(&token.text, &mut out);
            out.push_str(DELIMITER_END);
        }
        out
    }
}

fn split_runs(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut current_ws = false;
    let mut cursor = 0;

    for c in text.chars() {
        let ws = c.is_whitespace();
        if !current.is_empty() && ws != current_ws {
            push_token(&mut tokens, std::mem::take(&mut current), &mut cursor);
        }
        current_ws = ws;
        current.push(c);
    }

    if !current.is_empty() {
        push_token(&mut tokens, current, &mut cursor);
    }

    tokens
}

fn push_token(tokens: &mut Vec<Token>, text: String, cursor: &mut usize) {
    let start = *cursor;
    let end = start + text.chars().count();
    tokens.push(Token {
        id: tokens.len() + 1,
        text,
        start,
        end,
    });
    *cursor = end;
}

fn escape_into(text: &str, out: &mut String) {
    for c in text.chars() {
        if c == '\\' || c == '[' {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Reverse the escaping applied by [`TokenizedText::encode`]
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) => out.push(next),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}
