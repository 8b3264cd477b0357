//! Configuration management for the redline server
//!
//! Handles loading and parsing of the `redline.toml` configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::decoder::DecodeMode;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// LLM provider settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Login and session settings
    #[serde(default)]
    pub auth: AuthConfig,

    /// Grammar checker settings
    #[serde(default)]
    pub checker: CheckerConfig,
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// LLM provider: "openai", "claude", or "none"
    #[serde(default = "default_provider")]
    pub provider: String,

    /// API key (can also be set via environment variable)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model name (e.g., "gpt-4o-mini", "claude-3-5-sonnet-20241022")
    #[serde(default)]
    pub model: Option<String>,

    /// API base URL (for custom endpoints)
    #[serde(default)]
    pub base_url: Option<String>,

    /// Maximum tokens for response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: f32,

    /// Request timeout; unset leaves the transport default
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: None,
            model: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest accepted request body
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_request_bytes: default_max_request_bytes(),
        }
    }
}

/// A username/password pair accepted at login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Accepted credentials
    #[serde(default = "default_users")]
    pub users: Vec<Credential>,

    /// Session lifetime in seconds
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Persist sessions to this file instead of keeping them in memory
    #[serde(default)]
    pub session_file: Option<PathBuf>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            users: default_users(),
            session_ttl_secs: default_session_ttl_secs(),
            session_file: None,
        }
    }
}

/// Grammar checker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckerConfig {
    /// Reject annotator replies that break the delimiter protocol
    #[serde(default = "default_true")]
    pub strict_decoding: bool,

    /// Quiet period after the last edit before a live check runs
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            strict_decoding: true,
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl CheckerConfig {
    pub fn decode_mode(&self) -> DecodeMode {
        if self.strict_decoding {
            DecodeMode::Strict
        } else {
            DecodeMode::Lenient
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_max_request_bytes() -> usize {
    1024 * 1024
}

fn default_users() -> Vec<Credential> {
    vec![Credential {
        username: "user".to_string(),
        password: "password".to_string(),
    }]
}

fn default_session_ttl_secs() -> u64 {
    60 * 60 * 24
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Get default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "redline").map(|dirs| dirs.config_dir().join("redline.toml"))
    }

    /// Load configuration from the working directory or the user config directory
    pub fn load_from_default() -> Self {
        let workspace_path = PathBuf::from("redline.toml");
        if workspace_path.exists() {
            match Self::load(&workspace_path) {
                Ok(config) => return config,
                Err(e) => tracing::warn!("ignoring {}: {:#}", workspace_path.display(), e),
            }
        }

        if let Some(default_path) = Self::default_path() {
            match Self::load(&default_path) {
                Ok(config) => return config,
                Err(e) => tracing::warn!("ignoring {}: {:#}", default_path.display(), e),
            }
        }

        Config::default()
    }

    /// Get the effective API key (from config or environment)
    pub fn get_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.llm.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }

        let from_env = match self.llm.provider.as_str() {
            "claude" => std::env::var("ANTHROPIC_API_KEY").ok(),
            "openai" => std::env::var("OPENAI_API_KEY").ok(),
            _ => None,
        };
        from_env.filter(|key| !key.is_empty())
    }

    /// Get the effective model name
    pub fn get_model(&self) -> String {
        self.llm
            .model
            .clone()
            .unwrap_or_else(|| match self.llm.provider.as_str() {
                "claude" => "claude-3-5-sonnet-20241022".to_string(),
                "openai" => "gpt-4o-mini".to_string(),
                _ => String::new(),
            })
    }

    /// Check if LLM integration is enabled
    pub fn is_llm_enabled(&self) -> bool {
        self.llm.provider != "none" && self.get_api_key().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.llm.provider, "openai");
        assert!(config.llm.api_key.is_none());
        assert_eq!(config.llm.max_tokens, 1000);
        assert_eq!(config.llm.temperature, 0.0);
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.auth.session_ttl_secs, 86_400);
        assert_eq!(config.auth.users.len(), 1);
        assert_eq!(config.auth.users[0].username, "user");
        assert!(config.checker.strict_decoding);
        assert_eq!(config.checker.debounce_ms, 500);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
[llm]
provider = "claude"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();

        assert_eq!(config.llm.provider, "claude");
        assert!(config.llm.api_key.is_none());
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.checker.strict_decoding);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[llm]
provider = "openai"
api_key = "sk-test-key"
model = "gpt-4o"
max_tokens = 2048
temperature = 0.2
timeout_secs = 30

[server]
host = "0.0.0.0"
port = 8080
max_request_bytes = 4096

[auth]
session_ttl_secs = 600
session_file = "/var/lib/redline/sessions.json"

[[auth.users]]
username = "alice"
password = "wonderland"

[checker]
strict_decoding = false
debounce_ms = 250
"#;
        let config: Config = toml::from_str(toml_str).unwrap();

        assert_eq!(config.llm.api_key, Some("sk-test-key".to_string()));
        assert_eq!(config.llm.model, Some("gpt-4o".to_string()));
        assert_eq!(config.llm.max_tokens, 2048);
        assert_eq!(config.llm.timeout_secs, Some(30));
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.max_request_bytes, 4096);
        assert_eq!(config.auth.session_ttl_secs, 600);
        assert_eq!(
            config.auth.users,
            vec![Credential {
                username: "alice".to_string(),
                password: "wonderland".to_string(),
            }]
        );
        assert_eq!(
            config.auth.session_file,
            Some(PathBuf::from("/var/lib/redline/sessions.json"))
        );
        assert_eq!(config.checker.decode_mode(), DecodeMode::Lenient);
        assert_eq!(config.checker.debounce_ms, 250);
    }

    #[test]
    fn test_get_model_defaults() {
        let mut config = Config::default();
        assert_eq!(config.get_model(), "gpt-4o-mini");

        config.llm.provider = "claude".to_string();
        assert_eq!(config.get_model(), "claude-3-5-sonnet-20241022");

        config.llm.model = Some("custom-model".to_string());
        assert_eq!(config.get_model(), "custom-model");
    }

    #[test]
    fn test_is_llm_enabled() {
        let mut config = Config::default();

        config.llm.provider = "none".to_string();
        config.llm.api_key = Some("test-key".to_string());
        assert!(!config.is_llm_enabled());

        config.llm.provider = "claude".to_string();
        assert!(config.is_llm_enabled());
    }

    #[test]
    fn test_load_nonexistent_file() {
        let path = PathBuf::from("/nonexistent/path/redline.toml");
        let config = Config::load(&path).unwrap();

        assert_eq!(config.llm.provider, "openai");
    }

    #[test]
    fn test_load_invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("redline.toml");
        std::fs::write(&path, "[llm\nprovider = ").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("redline.toml"));
    }

    #[test]
    fn test_serialize_config() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();

        assert!(toml_str.contains("[llm]"));
        assert!(toml_str.contains("[server]"));
        assert!(toml_str.contains("[checker]"));
    }
}
