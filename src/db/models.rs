//! Persisted and exchanged model types.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Random 13-character base-36 identifier for batches and reports.
pub fn new_id() -> String {
    let mut rng = rand::thread_rng();
    (0..13)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// A phone number eligible for querying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberTarget {
    pub number: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl NumberTarget {
    pub fn new(number: impl Into<String>, is_active: bool) -> Self {
        Self {
            number: number.into(),
            is_active,
        }
    }
}

/// Join of the ADSL and Forge outcomes for one number.
///
/// `success` is only set when both sources answered, so both balances are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adsl_balance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forge_balance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl QueryResult {
    /// A result for a number that could not be queried at all.
    pub fn failed(number: impl Into<String>, error: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            number: number.into(),
            adsl_balance: None,
            forge_balance: None,
            result_code: None,
            result_desc: None,
            error: Some(error.into()),
            success: false,
            timestamp: at,
        }
    }
}

/// One sweep over all active numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryBatch {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub results: Vec<QueryResult>,
}

/// Rolling window a report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportPeriod {
    #[default]
    Day,
    Week,
    Month,
}

impl ReportPeriod {
    pub fn days(self) -> i64 {
        match self {
            ReportPeriod::Day => 1,
            ReportPeriod::Week => 7,
            ReportPeriod::Month => 30,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::days(self.days())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_queries: usize,
    pub success_rate: String,
    pub number_count: usize,
    pub period_from: DateTime<Utc>,
    pub period_to: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberSummary {
    pub number: String,
    pub query_count: usize,
    pub success_rate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_adsl_balance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_forge_balance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_adsl_balance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_forge_balance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDetails {
    pub number_summaries: Vec<NumberSummary>,
}

/// A generated balance report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub title: String,
    pub timestamp: DateTime<Utc>,
    pub summary: ReportSummary,
    pub details: ReportDetails,
}
