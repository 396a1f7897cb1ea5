//! Report generation: rolls history batches up into per-number summaries.

use crate::clock::Clock;
use crate::db::{
    new_id, HistoryStore, NumberSummary, QueryBatch, Report, ReportDetails, ReportPeriod,
    ReportStore, ReportSummary,
};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// How many of the most recent batches a scheduled report covers.
pub const SCHEDULED_REPORT_BATCHES: usize = 24;

/// Build a report over the batches of `history` that fall inside `period` before `now`.
///
/// Returns `None` when no batch is inside the window.
pub fn generate(history: &[QueryBatch], period: ReportPeriod, now: DateTime<Utc>) -> Option<Report> {
    let cutoff = now - period.duration();
    let window: Vec<&QueryBatch> = history.iter().filter(|b| b.timestamp >= cutoff).collect();
    build_report(&window, period, now)
}

/// Build a report over exactly `batches`, in the order given.
pub fn build_report(batches: &[&QueryBatch], period: ReportPeriod, now: DateTime<Utc>) -> Option<Report> {
    let first = batches.first()?;
    let last = batches.last()?;

    let mut total = 0;
    let mut successes = 0;
    // Keyed lookup plus a Vec so numbers keep first-seen order.
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut stats: Vec<(&str, NumberStats)> = Vec::new();

    for batch in batches {
        for result in &batch.results {
            total += 1;
            if result.success {
                successes += 1;
            }

            let slot = *index.entry(result.number.as_str()).or_insert_with(|| {
                stats.push((result.number.as_str(), NumberStats::default()));
                stats.len() - 1
            });
            let entry = &mut stats[slot].1;
            entry.query_count += 1;
            if result.success {
                entry.success_count += 1;
            }
            if let Some(b) = result.adsl_balance {
                entry.adsl.push(b);
            }
            if let Some(b) = result.forge_balance {
                entry.forge.push(b);
            }
        }
    }

    let summary = ReportSummary {
        total_queries: total,
        success_rate: format_rate(successes, total),
        number_count: stats.len(),
        period_from: first.timestamp,
        period_to: last.timestamp,
    };

    let number_summaries = stats
        .into_iter()
        .map(|(number, s)| NumberSummary {
            number: number.to_string(),
            query_count: s.query_count,
            success_rate: format_rate(s.success_count, s.query_count),
            average_adsl_balance: rounded_mean(&s.adsl),
            average_forge_balance: rounded_mean(&s.forge),
            latest_adsl_balance: s.adsl.last().copied(),
            latest_forge_balance: s.forge.last().copied(),
        })
        .collect();

    Some(Report {
        id: new_id(),
        title: format!("Balance Report - {}", period_text(period, now)),
        timestamp: now,
        summary,
        details: ReportDetails { number_summaries },
    })
}

#[derive(Default)]
struct NumberStats {
    query_count: usize,
    success_count: usize,
    // Observed balances in batch order; the last one is the latest.
    adsl: Vec<f64>,
    forge: Vec<f64>,
}

/// `"66.7%"`, or `"0%"` when there is nothing to rate.
fn format_rate(hits: usize, total: usize) -> String {
    if total == 0 {
        return "0%".to_string();
    }
    format!("{:.1}%", hits as f64 * 100.0 / total as f64)
}

/// Mean rounded to the nearest integer, halves rounding up.
fn rounded_mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some((mean + 0.5).floor())
}

fn period_text(period: ReportPeriod, now: DateTime<Utc>) -> String {
    match period {
        ReportPeriod::Day => now.format("%b %-d, %Y").to_string(),
        ReportPeriod::Week => now.format("Week of %b %-d, %Y").to_string(),
        ReportPeriod::Month => now.format("Month of %B %Y").to_string(),
    }
}

/// Generates reports from the shared history and files them in the report store.
pub struct ReportGenerator {
    history: Arc<HistoryStore>,
    reports: Arc<ReportStore>,
    clock: Arc<dyn Clock>,
}

impl ReportGenerator {
    pub fn new(history: Arc<HistoryStore>, reports: Arc<ReportStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            history,
            reports,
            clock,
        }
    }

    /// On-demand report over `period`, stored when there is data.
    pub fn generate_and_store(&self, period: ReportPeriod) -> Option<Report> {
        let report = generate(&self.history.all(), period, self.clock.now())?;
        self.store(report)
    }

    /// Timer report over the latest batches, regardless of their age.
    pub fn generate_scheduled(&self) -> Option<Report> {
        let recent = self.history.recent(SCHEDULED_REPORT_BATCHES);
        let batches: Vec<&QueryBatch> = recent.iter().collect();
        let report = build_report(&batches, ReportPeriod::Day, self.clock.now())?;
        self.store(report)
    }

    fn store(&self, report: Report) -> Option<Report> {
        tracing::info!(
            "Generated report '{}' ({} queries, {} numbers)",
            report.title,
            report.summary.total_queries,
            report.summary.number_count
        );
        self.reports.append(report.clone());
        Some(report)
    }
}
