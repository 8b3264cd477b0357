//! Grammar check orchestration: tokenize, annotate, decode.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::decoder::{self, DecodeMode, GrammarError};
use crate::error::CheckError;
use crate::llm::{Annotator, CancellationSignal};
use crate::tokenizer::TokenizedText;

/// Result of one grammar check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutcome {
    pub errors: Vec<GrammarError>,
    /// The NFC-normalized text the error offsets refer to
    pub normalized_text: String,
}

/// Grammar checker: tokenize, annotate remotely, decode
pub struct GrammarChecker {
    annotator: Arc<dyn Annotator>,
    mode: DecodeMode,
}

impl GrammarChecker {
    pub fn new(annotator: Arc<dyn Annotator>, mode: DecodeMode) -> Self {
        Self { annotator, mode }
    }

    /// Check text and return the errors found in its normalized form
    pub async fn check(
        &self,
        text: &str,
        cancel: Option<&CancellationSignal>,
    ) -> Result<CheckOutcome, CheckError> {
        let tokenized = TokenizedText::new(text);
        if tokenized.is_empty() {
            return Ok(CheckOutcome {
                errors: Vec::new(),
                normalized_text: String::new(),
            });
        }

        tracing::debug!(tokens = tokenized.tokens().len(), "sending text to annotator");

        let reply = self
            .annotator
            .annotate(&tokenized.encode(), cancel)
            .await
            .map_err(|e| {
                tracing::error!("grammar annotation failed: {}", e);
                CheckError::from(e)
            })?;

        let errors = decoder::decode(&tokenized, &reply, self.mode).map_err(|m| {
            tracing::warn!("rejecting annotator reply: {}", m);
            CheckError::MalformedResponse(m)
        })?;

        tracing::debug!(errors = errors.len(), "grammar check complete");

        Ok(CheckOutcome {
            errors,
            normalized_text: tokenized.normalized().to_string(),
        })
    }
}
