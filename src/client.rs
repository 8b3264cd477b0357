//! HTTP client for a running `redline serve` instance.

use async_trait::async_trait;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;

use crate::checker::CheckOutcome;
use crate::decoder::GrammarError;
use crate::error::CheckError;
use crate::live::CheckBackend;
use crate::llm::{await_or_cancel, CancellationSignal};
use crate::session::SESSION_COOKIE;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GrammarReply {
    #[serde(default)]
    errors: Vec<GrammarError>,
    #[serde(default)]
    normalized_text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionReply {
    logged_in: bool,
    username: Option<String>,
}

/// Grammar checks over HTTP, authenticated with a session cookie
pub struct RemoteChecker {
    http: Client,
    base_url: String,
    cookie: RwLock<Option<String>>,
}

impl RemoteChecker {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Use a preconfigured HTTP client
    pub fn with_client(base_url: impl Into<String>, http: Client) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cookie: RwLock::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Log in and keep the session cookie for later requests
    pub async fn login(&self, username: &str, password: &str) -> Result<(), CheckError> {
        let response = self
            .http
            .post(self.url("/api/auth/login"))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED => return Err(CheckError::AuthenticationRequired),
            StatusCode::BAD_REQUEST => return Err(CheckError::InvalidInput),
            status => return Err(remote_status(status, response).await),
        }

        let cookie = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .find(|pair| pair.trim_start().starts_with(&format!("{SESSION_COOKIE}=")))
            .map(|pair| pair.trim().to_string());

        match cookie {
            Some(cookie) => {
                *self.cookie.write().await = Some(cookie);
                Ok(())
            }
            None => Err(CheckError::AuthenticationRequired),
        }
    }

    pub async fn logout(&self) -> Result<(), CheckError> {
        let cookie = self.cookie.write().await.take();
        let mut request = self.http.post(self.url("/api/auth/logout"));
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }
        request.send().await?;
        Ok(())
    }

    /// Username of the active session, if the server still recognises it
    pub async fn session(&self) -> Result<Option<String>, CheckError> {
        let mut request = self.http.get(self.url("/api/auth/session"));
        if let Some(cookie) = self.cookie.read().await.clone() {
            request = request.header(COOKIE, cookie);
        }
        let reply: SessionReply = request.send().await?.json().await?;
        Ok(reply.username.filter(|_| reply.logged_in))
    }

    async fn post_check(&self, text: &str) -> Result<CheckOutcome, CheckError> {
        let mut request = self.http.post(self.url("/api/grammar")).json(&json!({ "text": text }));
        if let Some(cookie) = self.cookie.read().await.clone() {
            request = request.header(COOKIE, cookie);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::OK => {
                let reply: GrammarReply = response.json().await?;
                Ok(CheckOutcome {
                    errors: reply.errors,
                    normalized_text: reply.normalized_text,
                })
            }
            StatusCode::UNAUTHORIZED => Err(CheckError::AuthenticationRequired),
            StatusCode::BAD_REQUEST => Err(CheckError::InvalidInput),
            status => Err(remote_status(status, response).await),
        }
    }
}

async fn remote_status(status: StatusCode, response: reqwest::Response) -> CheckError {
    let body = response.text().await.unwrap_or_default();
    CheckError::Server { status, body }
}

#[async_trait]
impl CheckBackend for RemoteChecker {
    async fn check(&self, text: &str, cancel: &CancellationSignal) -> Result<CheckOutcome, CheckError> {
        await_or_cancel(self.post_check(text), Some(cancel)).await?
    }
}
