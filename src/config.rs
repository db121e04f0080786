//! Service configuration.
//!
//! Knobs that belong to the deployment rather than to the instructor row
//! in storage: where to listen, where the database lives, the outbound
//! retry policy, and optional LLM review access.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub notify: NotifyConfig,
    pub llm: LlmConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_path: "classforge.db".to_string(),
            notify: NotifyConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

/// Webhook retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub max_attempts: u32,
    pub initial_backoff_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_secs: 1,
        }
    }
}

impl NotifyConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_secs(self.initial_backoff_secs)
    }
}

/// LLM review access. With no API URL the reviewer runs its deterministic
/// stub instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_key: None,
            model: "gpt-4o-mini".to_string(),
        }
    }
}
