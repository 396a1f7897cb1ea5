//! HTTP balance client for the ADSL and Forge APIs.

use super::{sign, BalanceError, BalanceOutcome, BalanceSource, SourceConfig, SourceKind};
use crate::clock::Clock;

use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Parsed body of a balance API response.
#[derive(Debug, Clone, PartialEq)]
struct BalanceReply {
    result_code: String,
    result_desc: Option<String>,
    remain_amount: Option<f64>,
}

impl BalanceReply {
    fn from_json(body: &Value) -> Result<Self, BalanceError> {
        let result_code = match body.get("resultCode") {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(BalanceError::InvalidResponse("missing resultCode".to_string())),
        };

        let result_desc = body
            .get("resultDesc")
            .and_then(Value::as_str)
            .map(str::to_string);

        let remain_amount = match body.get("remainAmount") {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        };

        Ok(Self {
            result_code,
            result_desc,
            remain_amount,
        })
    }

    /// Negative codes mean the remote side has not finished processing yet.
    fn is_pending(&self) -> bool {
        self.result_code.parse::<i64>().map(|c| c < 0).unwrap_or(false)
    }
}

/// Balance client that talks to the real APIs over HTTP.
///
/// One attempt per call, no retries. The next scheduled sweep is the retry.
pub struct HttpBalanceClient {
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    last_transaction_id: AtomicI64,
}

impl HttpBalanceClient {
    pub fn new(timeout: Duration, clock: Arc<dyn Clock>) -> Result<Self, BalanceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BalanceError::Network(e.to_string()))?;

        Ok(Self {
            client,
            clock,
            timeout,
            last_transaction_id: AtomicI64::new(0),
        })
    }

    /// Millisecond timestamp, bumped when needed so ids never repeat within this client.
    fn next_transaction_id(&self) -> String {
        let now = self.clock.now().timestamp_millis();
        let prev = self
            .last_transaction_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(prev + 1).to_string()
    }

    async fn send(
        &self,
        number: &str,
        config: &SourceConfig,
        transaction_id: &str,
    ) -> Result<BalanceReply, BalanceError> {
        let token = sign(transaction_id, number, &config.username, &config.password);

        let request = match config.kind {
            SourceKind::Adsl => self
                .client
                .post(format!("{}post", config.base_url))
                .query(&[
                    ("action", "query"),
                    ("userid", config.username.as_str()),
                    ("mobile", number),
                    ("transid", transaction_id),
                    ("token", token.as_str()),
                ]),
            SourceKind::Forge => self.client.get(&config.base_url).query(&[
                ("mobile", number),
                ("transid", transaction_id),
                ("token", token.as_str()),
                ("userid", config.username.as_str()),
                ("action", "query"),
            ]),
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                BalanceError::Timeout(self.timeout)
            } else {
                BalanceError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BalanceError::Status(status.as_u16()));
        }

        let body: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                BalanceError::Timeout(self.timeout)
            } else {
                BalanceError::InvalidResponse(e.to_string())
            }
        })?;

        BalanceReply::from_json(&body)
    }

    fn to_outcome(&self, kind: SourceKind, reply: BalanceReply) -> BalanceOutcome {
        let now = self.clock.now();

        if reply.result_code == "0" {
            return match reply.remain_amount {
                Some(balance) => BalanceOutcome::succeeded(
                    kind,
                    balance,
                    reply.result_code,
                    reply.result_desc,
                    now,
                ),
                None => BalanceOutcome::failed(
                    kind,
                    "response is missing remainAmount",
                    Some(reply.result_code),
                    reply.result_desc,
                    now,
                ),
            };
        }

        let error = if reply.is_pending() {
            "request is still being processed".to_string()
        } else {
            reply
                .result_desc
                .clone()
                .unwrap_or_else(|| format!("resultCode {}", reply.result_code))
        };

        BalanceOutcome::failed(kind, error, Some(reply.result_code), reply.result_desc, now)
    }
}

#[async_trait::async_trait]
impl BalanceSource for HttpBalanceClient {
    async fn query_balance(&self, number: &str, config: &SourceConfig) -> BalanceOutcome {
        let transaction_id = self.next_transaction_id();
        tracing::debug!(
            "Querying {} balance for {} (transid {})",
            config.kind,
            number,
            transaction_id
        );

        match self.send(number, config, &transaction_id).await {
            Ok(reply) => {
                let outcome = self.to_outcome(config.kind, reply);
                if !outcome.success {
                    tracing::warn!(
                        "{} query for {} failed: code={:?} {}",
                        config.kind,
                        number,
                        outcome.result_code,
                        outcome.error.as_deref().unwrap_or_default()
                    );
                }
                outcome
            }
            Err(e) => {
                tracing::warn!("{} query for {} failed: {}", config.kind, number, e);
                BalanceOutcome::failed(config.kind, e.to_string(), None, None, self.clock.now())
            }
        }
    }
}
