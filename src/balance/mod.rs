//! Balance sources.
//!
//! Each phone number is checked against two external services, ADSL and Forge. A query
//! never fails outright: whatever happens on the wire is folded into a [`BalanceOutcome`].

mod http;
mod token;

pub use http::*;
pub use token::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Which external service a config or outcome belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    #[serde(rename = "ADSL", alias = "adsl")]
    Adsl,
    #[serde(rename = "Forge", alias = "forge")]
    Forge,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Adsl => f.write_str("ADSL"),
            SourceKind::Forge => f.write_str("Forge"),
        }
    }
}

/// Connection parameters for one external balance API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    pub kind: SourceKind,
    #[serde(default)]
    pub name: String,
    pub base_url: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl SourceConfig {
    /// Pick the first active config of the given kind.
    pub fn select(configs: &[SourceConfig], kind: SourceKind) -> Option<&SourceConfig> {
        configs.iter().find(|c| c.kind == kind && c.is_active)
    }
}

/// Normalized result of one call to one source for one number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub source: SourceKind,
}

impl BalanceOutcome {
    pub fn succeeded(
        source: SourceKind,
        balance: f64,
        result_code: String,
        result_desc: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            success: true,
            balance: Some(balance),
            result_code: Some(result_code),
            result_desc,
            error: None,
            timestamp,
            source,
        }
    }

    pub fn failed(
        source: SourceKind,
        error: impl Into<String>,
        result_code: Option<String>,
        result_desc: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            success: false,
            balance: None,
            result_code,
            result_desc,
            error: Some(error.into()),
            timestamp,
            source,
        }
    }
}

/// Transport-level failures of a balance request.
#[derive(Error, Debug)]
pub enum BalanceError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Anything that can answer a balance query for one number against one source.
#[async_trait::async_trait]
pub trait BalanceSource: Send + Sync {
    /// Query `number` against the source described by `config`.
    ///
    /// The source kind is taken from `config.kind`. Never errors; failures are reported
    /// through the returned outcome.
    async fn query_balance(&self, number: &str, config: &SourceConfig) -> BalanceOutcome;
}

#[cfg(test)]
pub mod testing {
    use super::{BalanceOutcome, BalanceSource, SourceConfig, SourceKind};
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    type Script = Box<dyn Fn(&str, SourceKind) -> Result<f64, String> + Send + Sync>;

    /// Balance source answering from a closure, optionally after a per-number delay.
    pub struct ScriptedSource {
        script: Script,
        delay: Duration,
        delays: HashMap<String, Duration>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        pub fn new(
            script: impl Fn(&str, SourceKind) -> Result<f64, String> + Send + Sync + 'static,
        ) -> Self {
            Self {
                script: Box::new(script),
                delay: Duration::ZERO,
                delays: HashMap::new(),
                calls: AtomicUsize::new(0),
            }
        }

        /// Every number answers with the same balance on both sources.
        pub fn always(balance: f64) -> Self {
            Self::new(move |_, _| Ok(balance))
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn with_delay_for(mut self, number: &str, delay: Duration) -> Self {
            self.delays.insert(number.to_string(), delay);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl BalanceSource for ScriptedSource {
        async fn query_balance(&self, number: &str, config: &SourceConfig) -> BalanceOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.delays.get(number).copied().unwrap_or(self.delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match (self.script)(number, config.kind) {
                Ok(balance) => {
                    BalanceOutcome::succeeded(config.kind, balance, "0".to_string(), None, Utc::now())
                }
                Err(desc) => BalanceOutcome::failed(
                    config.kind,
                    desc.clone(),
                    Some("5".to_string()),
                    Some(desc),
                    Utc::now(),
                ),
            }
        }
    }

    pub fn source_config(kind: SourceKind) -> SourceConfig {
        SourceConfig {
            kind,
            name: format!("{} main", kind),
            base_url: "http://balance.invalid/".to_string(),
            username: "alice".to_string(),
            password: "password".to_string(),
            is_active: true,
        }
    }
}
