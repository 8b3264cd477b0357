//! Error taxonomy for grammar checks and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::decoder::Malformation;
use crate::llm::LlmError;

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("not authenticated")]
    AuthenticationRequired,
    #[error("invalid text input")]
    InvalidInput,
    #[error("grammar service failed: {0}")]
    RemoteService(#[source] LlmError),
    #[error("grammar service returned a malformed response: {0}")]
    MalformedResponse(#[from] Malformation),
    #[error("check was superseded")]
    Cancelled,
    /// The grammar server could not be reached or sent an unreadable body
    #[error("request to grammar server failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The grammar server answered with an unexpected status
    #[error("grammar server answered {status}: {body}")]
    Server { status: StatusCode, body: String },
}

impl From<LlmError> for CheckError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Cancelled => CheckError::Cancelled,
            other => CheckError::RemoteService(other),
        }
    }
}

impl CheckError {
    pub fn status(&self) -> StatusCode {
        match self {
            CheckError::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            CheckError::InvalidInput => StatusCode::BAD_REQUEST,
            CheckError::RemoteService(_) | CheckError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
            CheckError::MalformedResponse(_) | CheckError::Transport(_) | CheckError::Server { .. } => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    /// Short message suitable for showing to the user
    pub fn user_message(&self) -> &'static str {
        match self {
            CheckError::AuthenticationRequired => "Not authenticated",
            CheckError::InvalidInput => "Invalid text input",
            CheckError::RemoteService(_) | CheckError::Cancelled => "Error checking grammar",
            CheckError::MalformedResponse(_) => "Grammar service returned a malformed response",
            CheckError::Transport(_) => "Grammar server unreachable",
            CheckError::Server { .. } => "Error checking grammar",
        }
    }
}

impl IntoResponse for CheckError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(json!({ "success": false, "message": self.user_message() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(CheckError::AuthenticationRequired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(CheckError::InvalidInput.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            CheckError::RemoteService(LlmError::NotConfigured).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            CheckError::MalformedResponse(Malformation::NoSpans).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_server_error_message() {
        let err = CheckError::Server {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: "down".to_string(),
        };
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.user_message(), "Error checking grammar");
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_cancelled_llm_error_maps_to_cancelled() {
        assert!(matches!(CheckError::from(LlmError::Cancelled), CheckError::Cancelled));
        assert!(matches!(
            CheckError::from(LlmError::EmptyResponse("OpenAI")),
            CheckError::RemoteService(_)
        ));
    }
}
