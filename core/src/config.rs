//! Client configuration.
//!
//! Passed explicitly at construction time; nothing here is process-wide.
//! Connection reuse belongs to the `ureq::Agent` the config builds (or the
//! one the caller supplies to `UreqTransport::with_agent`).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const USER_AGENT_ENV: &str = "HTTPC_USER_AGENT";
pub const MAX_IDLE_CONNECTIONS_ENV: &str = "HTTPC_MAX_IDLE_CONNECTIONS";
pub const TIMEOUT_MS_ENV: &str = "HTTPC_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub user_agent: String,
    /// Idle keep-alive connections the agent may hold across requests.
    pub max_idle_connections: usize,
    /// Headers added to every request that does not set them itself.
    pub default_headers: Vec<(String, String)>,
    /// Upper bound on a whole exchange, in milliseconds. `None` waits forever.
    pub timeout_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("httpc/{}", env!("CARGO_PKG_VERSION")),
            max_idle_connections: 10,
            default_headers: Vec::new(),
            timeout_ms: None,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `HTTPC_USER_AGENT`,
    /// `HTTPC_MAX_IDLE_CONNECTIONS` and `HTTPC_TIMEOUT_MS` when set.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(agent) = lookup(USER_AGENT_ENV) {
            config.user_agent = agent;
        }
        if let Some(raw) = lookup(MAX_IDLE_CONNECTIONS_ENV) {
            match raw.trim().parse() {
                Ok(n) => config.max_idle_connections = n,
                Err(e) => warn!(value = %raw, error = %e, "ignoring {MAX_IDLE_CONNECTIONS_ENV}"),
            }
        }
        if let Some(raw) = lookup(TIMEOUT_MS_ENV) {
            match raw.trim().parse() {
                Ok(ms) => config.timeout_ms = Some(ms),
                Err(e) => warn!(value = %raw, error = %e, "ignoring {TIMEOUT_MS_ENV}"),
            }
        }
        config
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Build a ureq agent for this config. Status codes are never turned into
    /// errors; the caller gets the body of a 404 like any other.
    pub fn build_agent(&self, proxy: Option<ureq::Proxy>) -> ureq::Agent {
        ureq::Agent::config_builder()
            .http_status_as_error(false)
            .user_agent(self.user_agent.as_str())
            .max_idle_connections(self.max_idle_connections)
            .timeout_global(self.timeout())
            .proxy(proxy)
            .build()
            .new_agent()
    }
}
