//! Fan-out of balance queries over all active numbers.

use crate::balance::{BalanceOutcome, BalanceSource, SourceConfig, SourceKind};
use crate::clock::Clock;
use crate::db::{new_id, NumberTarget, QueryBatch, QueryResult};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Configuration problems that stop a sweep before any request is sent.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("{0} API configuration not found")]
    MissingConfig(SourceKind),
    #[error("{0} API configuration '{1}' is inactive")]
    InactiveConfig(SourceKind, String),
    #[error("API configuration '{name}' is a {actual} source, expected {expected}")]
    WrongKind {
        name: String,
        expected: SourceKind,
        actual: SourceKind,
    },
    #[error("no active numbers to query")]
    NoActiveNumbers,
}

/// Runs both sources for every active number and joins the answers.
pub struct QueryOrchestrator {
    source: Arc<dyn BalanceSource>,
    clock: Arc<dyn Clock>,
    max_concurrency: usize,
}

impl QueryOrchestrator {
    pub fn new(source: Arc<dyn BalanceSource>, clock: Arc<dyn Clock>, max_concurrency: usize) -> Self {
        Self {
            source,
            clock,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Check the inputs of a sweep and return the active numbers in input order.
    pub fn validate(
        numbers: &[NumberTarget],
        adsl: Option<&SourceConfig>,
        forge: Option<&SourceConfig>,
    ) -> Result<Vec<String>, QueryError> {
        check_config(adsl, SourceKind::Adsl)?;
        check_config(forge, SourceKind::Forge)?;

        let active: Vec<String> = numbers
            .iter()
            .filter(|n| n.is_active)
            .map(|n| n.number.clone())
            .collect();

        if active.is_empty() {
            return Err(QueryError::NoActiveNumbers);
        }
        Ok(active)
    }

    /// Query every active number against both sources.
    ///
    /// Numbers run in parallel (bounded by `max_concurrency`), and each number's two sources
    /// run in parallel too. Results come back in input order. A failing or panicking number
    /// only affects its own result.
    pub async fn run_query(
        &self,
        numbers: &[NumberTarget],
        adsl: Option<&SourceConfig>,
        forge: Option<&SourceConfig>,
    ) -> Result<Vec<QueryResult>, QueryError> {
        let active = Self::validate(numbers, adsl, forge)?;
        // validate() guarantees both are present
        let (Some(adsl), Some(forge)) = (adsl, forge) else {
            return Err(QueryError::MissingConfig(SourceKind::Adsl));
        };

        tracing::info!("Querying balances for {} numbers", active.len());
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));

        let tasks = active.into_iter().map(|number| {
            let source = self.source.clone();
            let clock = self.clock.clone();
            let semaphore = semaphore.clone();
            let adsl = adsl.clone();
            let forge = forge.clone();
            let task_number = number.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let (adsl_outcome, forge_outcome) = tokio::join!(
                    source.query_balance(&task_number, &adsl),
                    source.query_balance(&task_number, &forge),
                );
                join_outcomes(&task_number, adsl_outcome, forge_outcome, clock.now())
            });

            let clock = self.clock.clone();
            async move {
                match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::error!("Balance query task for {} failed: {}", number, e);
                        QueryResult::failed(number, format!("query task failed: {}", e), clock.now())
                    }
                }
            }
        });

        let results = join_all(tasks).await;
        let ok = results.iter().filter(|r| r.success).count();
        tracing::info!("Balance query finished: {}/{} numbers succeeded", ok, results.len());
        Ok(results)
    }

    /// Wrap a sweep's results into a history batch stamped with the current time.
    pub fn to_batch(&self, results: Vec<QueryResult>) -> QueryBatch {
        QueryBatch {
            id: new_id(),
            timestamp: self.clock.now(),
            results,
        }
    }
}

fn check_config(config: Option<&SourceConfig>, expected: SourceKind) -> Result<(), QueryError> {
    let config = config.ok_or(QueryError::MissingConfig(expected))?;
    if config.kind != expected {
        return Err(QueryError::WrongKind {
            name: config.name.clone(),
            expected,
            actual: config.kind,
        });
    }
    if !config.is_active {
        return Err(QueryError::InactiveConfig(expected, config.name.clone()));
    }
    Ok(())
}

/// Combine the two per-source outcomes for one number.
///
/// Diagnostics come from the first failing source, or from ADSL when both succeeded.
pub fn join_outcomes(
    number: &str,
    adsl: BalanceOutcome,
    forge: BalanceOutcome,
    at: DateTime<Utc>,
) -> QueryResult {
    let adsl_balance = adsl.balance.filter(|_| adsl.success);
    let forge_balance = forge.balance.filter(|_| forge.success);

    let failures: Vec<String> = [&adsl, &forge]
        .into_iter()
        .filter(|o| !o.success)
        .map(|o| format!("{}: {}", o.source, o.error.as_deref().unwrap_or("query failed")))
        .collect();

    let diagnostic = if !adsl.success || forge.success {
        &adsl
    } else {
        &forge
    };

    QueryResult {
        number: number.to_string(),
        adsl_balance,
        forge_balance,
        result_code: diagnostic.result_code.clone(),
        result_desc: diagnostic.result_desc.clone(),
        error: (!failures.is_empty()).then(|| failures.join("; ")),
        success: adsl_balance.is_some() && forge_balance.is_some(),
        timestamp: at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::testing::{source_config, ScriptedSource};
    use crate::clock::SystemClock;
    use std::time::Duration;
    use tokio::time::Instant;

    fn orchestrator(source: Arc<ScriptedSource>, max_concurrency: usize) -> QueryOrchestrator {
        QueryOrchestrator::new(source, Arc::new(SystemClock), max_concurrency)
    }

    fn numbers(list: &[(&str, bool)]) -> Vec<NumberTarget> {
        list.iter().map(|(n, a)| NumberTarget::new(*n, *a)).collect()
    }

    #[tokio::test]
    async fn test_one_result_per_active_number_in_order() {
        let source = Arc::new(ScriptedSource::always(10.0));
        let orch = orchestrator(source.clone(), 8);
        let adsl = source_config(SourceKind::Adsl);
        let forge = source_config(SourceKind::Forge);

        let input = numbers(&[("111", true), ("222", false), ("333", true)]);
        let results = orch.run_query(&input, Some(&adsl), Some(&forge)).await.unwrap();

        let got: Vec<_> = results.iter().map(|r| r.number.as_str()).collect();
        assert_eq!(got, vec!["111", "333"]);
        assert_eq!(source.calls(), 4);
        assert!(results.iter().all(|r| r.success));
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_preserved_when_completion_order_differs() {
        let source = Arc::new(
            ScriptedSource::new(|n, _| Ok(n.parse::<f64>().unwrap()))
                .with_delay_for("1", Duration::from_secs(3))
                .with_delay_for("2", Duration::from_secs(2))
                .with_delay_for("3", Duration::from_secs(1)),
        );
        let orch = orchestrator(source, 8);
        let adsl = source_config(SourceKind::Adsl);
        let forge = source_config(SourceKind::Forge);

        let input = numbers(&[("1", true), ("2", true), ("3", true)]);
        let results = orch.run_query(&input, Some(&adsl), Some(&forge)).await.unwrap();

        let balances: Vec<_> = results.iter().map(|r| r.adsl_balance).collect();
        assert_eq!(balances, vec![Some(1.0), Some(2.0), Some(3.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sources_and_numbers_run_in_parallel() {
        let source = Arc::new(ScriptedSource::always(1.0).with_delay(Duration::from_secs(1)));
        let orch = orchestrator(source, 8);
        let adsl = source_config(SourceKind::Adsl);
        let forge = source_config(SourceKind::Forge);

        let start = Instant::now();
        let input = numbers(&[("1", true), ("2", true), ("3", true)]);
        orch.run_query(&input, Some(&adsl), Some(&forge)).await.unwrap();

        // Six one-second calls complete in about one second.
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_limit_bounds_parallel_numbers() {
        let source = Arc::new(ScriptedSource::always(1.0).with_delay(Duration::from_secs(1)));
        let orch = orchestrator(source, 1);
        let adsl = source_config(SourceKind::Adsl);
        let forge = source_config(SourceKind::Forge);

        let start = Instant::now();
        let input = numbers(&[("1", true), ("2", true), ("3", true)]);
        orch.run_query(&input, Some(&adsl), Some(&forge)).await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_config_errors_fail_fast() {
        let source = Arc::new(ScriptedSource::always(1.0));
        let orch = orchestrator(source.clone(), 8);
        let adsl = source_config(SourceKind::Adsl);
        let forge = source_config(SourceKind::Forge);
        let input = numbers(&[("1", true)]);

        let err = orch.run_query(&input, None, Some(&forge)).await.unwrap_err();
        assert_eq!(err, QueryError::MissingConfig(SourceKind::Adsl));

        let mut inactive = forge.clone();
        inactive.is_active = false;
        let err = orch.run_query(&input, Some(&adsl), Some(&inactive)).await.unwrap_err();
        assert!(matches!(err, QueryError::InactiveConfig(SourceKind::Forge, _)));

        let err = orch.run_query(&input, Some(&forge), Some(&adsl)).await.unwrap_err();
        assert!(matches!(err, QueryError::WrongKind { expected: SourceKind::Adsl, .. }));

        let idle = numbers(&[("1", false)]);
        let err = orch.run_query(&idle, Some(&adsl), Some(&forge)).await.unwrap_err();
        assert_eq!(err, QueryError::NoActiveNumbers);

        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_partial_failure_and_success_conjunction() {
        let source = Arc::new(ScriptedSource::new(|n, kind| match (n, kind) {
            ("2", SourceKind::Adsl) => Err("Invalid account".to_string()),
            ("3", _) => Err("down".to_string()),
            _ => Ok(50.0),
        }));
        let orch = orchestrator(source, 8);
        let adsl = source_config(SourceKind::Adsl);
        let forge = source_config(SourceKind::Forge);

        let input = numbers(&[("1", true), ("2", true), ("3", true)]);
        let results = orch.run_query(&input, Some(&adsl), Some(&forge)).await.unwrap();

        for r in &results {
            assert_eq!(r.success, r.adsl_balance.is_some() && r.forge_balance.is_some());
        }

        assert!(results[0].success);
        assert_eq!(results[0].error, None);

        assert!(!results[1].success);
        assert_eq!(results[1].adsl_balance, None);
        assert_eq!(results[1].forge_balance, Some(50.0));
        assert_eq!(results[1].result_code.as_deref(), Some("5"));
        assert_eq!(results[1].result_desc.as_deref(), Some("Invalid account"));
        assert_eq!(results[1].error.as_deref(), Some("ADSL: Invalid account"));

        assert_eq!(results[2].error.as_deref(), Some("ADSL: down; Forge: down"));
    }

    #[tokio::test]
    async fn test_panicking_number_does_not_abort_batch() {
        let source = Arc::new(ScriptedSource::new(|n, _| {
            if n == "666" {
                panic!("boom");
            }
            Ok(1.0)
        }));
        let orch = orchestrator(source, 8);
        let adsl = source_config(SourceKind::Adsl);
        let forge = source_config(SourceKind::Forge);

        let input = numbers(&[("1", true), ("666", true), ("2", true)]);
        let results = orch.run_query(&input, Some(&adsl), Some(&forge)).await.unwrap();

        assert_eq!(results.len(), 3);
        assert!(results[0].success && results[2].success);
        assert!(!results[1].success);
        assert_eq!(results[1].number, "666");
        assert!(results[1].error.as_deref().unwrap().contains("query task failed"));
    }

    #[test]
    fn test_to_batch_has_unique_ids() {
        let orch = orchestrator(Arc::new(ScriptedSource::always(1.0)), 8);
        let a = orch.to_batch(Vec::new());
        let b = orch.to_batch(Vec::new());
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 13);
    }
}
