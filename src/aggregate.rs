use crate::error::AppError;
use crate::models::{UsageRecord, YearMonth};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

/// Inclusive calendar-date range. A record is in range only when it starts on
/// or after `start` and ends on or before `end`; records straddling a bound
/// are dropped, not clipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, AppError> {
        if start > end {
            return Err(AppError::Config(format!(
                "start date {start} is after end date {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Earliest start date to latest end date, or `None` with no records.
    pub fn spanning(records: &[UsageRecord]) -> Option<Self> {
        let start = records.iter().map(|r| r.bucket.start_date()).min()?;
        let end = records.iter().map(|r| r.bucket.end_date()).max()?;
        Some(Self {
            start,
            end: end.max(start),
        })
    }

    pub fn contains(&self, record: &UsageRecord) -> bool {
        record.bucket.start_date() >= self.start && record.bucket.end_date() <= self.end
    }

    pub fn filter(&self, records: &[UsageRecord]) -> Vec<UsageRecord> {
        records.iter().filter(|r| self.contains(r)).cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStats {
    pub total_cost: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_requests: u64,
    pub total_tokens: u64,
    /// `None` when the model consumed no tokens.
    pub cost_per_1k_tokens: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryStats {
    pub total_cost: f64,
    pub average_daily_cost: f64,
    pub max_daily_cost: f64,
    pub min_daily_cost: f64,
    pub days_with_usage: usize,
    pub total_days: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageTotals {
    pub total_cost: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub requests: u64,
    pub records: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DailyTokens {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Rollups over one working set of merged records.
#[derive(Debug, Clone, Copy)]
pub struct Aggregation<'a> {
    records: &'a [UsageRecord],
}

impl<'a> Aggregation<'a> {
    pub fn new(records: &'a [UsageRecord]) -> Self {
        Self { records }
    }

    pub fn total_cost(&self) -> f64 {
        self.records.iter().filter_map(UsageRecord::amount_value).sum()
    }

    /// Summed cost per start date. Every date with at least one record is
    /// present, even when none of its records carried a cost.
    pub fn daily_costs(&self) -> BTreeMap<NaiveDate, f64> {
        let mut out = BTreeMap::new();
        for r in self.records {
            *out.entry(r.bucket.start_date()).or_insert(0.0) += r.amount_value().unwrap_or(0.0);
        }
        out
    }

    pub fn monthly_costs(&self) -> BTreeMap<YearMonth, f64> {
        let mut out = BTreeMap::new();
        for r in self.records {
            *out.entry(YearMonth::of(r.bucket.start_date())).or_insert(0.0) +=
                r.amount_value().unwrap_or(0.0);
        }
        out
    }

    pub fn daily_tokens(&self) -> BTreeMap<NaiveDate, DailyTokens> {
        let mut out: BTreeMap<NaiveDate, DailyTokens> = BTreeMap::new();
        for r in self.records {
            let day = out.entry(r.bucket.start_date()).or_default();
            day.input_tokens = day.input_tokens.saturating_add(r.input_tokens().unwrap_or(0));
            day.output_tokens = day.output_tokens.saturating_add(r.output_tokens().unwrap_or(0));
        }
        out
    }

    pub fn daily_requests(&self) -> BTreeMap<NaiveDate, u64> {
        let mut out = BTreeMap::new();
        for r in self.records {
            let day = out.entry(r.bucket.start_date()).or_insert(0u64);
            *day = day.saturating_add(r.num_model_requests().unwrap_or(0));
        }
        out
    }

    /// Per-model rollup. Records without a model are left out.
    pub fn model_breakdown(&self) -> BTreeMap<String, ModelStats> {
        let mut sums: BTreeMap<&str, (f64, u64, u64, u64)> = BTreeMap::new();
        for r in self.records {
            let Some(model) = r.model() else {
                continue;
            };
            let entry = sums.entry(model).or_default();
            entry.0 += r.amount_value().unwrap_or(0.0);
            entry.1 = entry.1.saturating_add(r.input_tokens().unwrap_or(0));
            entry.2 = entry.2.saturating_add(r.output_tokens().unwrap_or(0));
            entry.3 = entry.3.saturating_add(r.num_model_requests().unwrap_or(0));
        }

        sums.into_iter()
            .map(|(model, (cost, input, output, requests))| {
                let total_tokens = input.saturating_add(output);
                let cost_per_1k_tokens =
                    (total_tokens > 0).then(|| cost / (total_tokens as f64 / 1000.0));
                (
                    model.to_string(),
                    ModelStats {
                        total_cost: cost,
                        total_input_tokens: input,
                        total_output_tokens: output,
                        total_requests: requests,
                        total_tokens,
                        cost_per_1k_tokens,
                    },
                )
            })
            .collect()
    }

    /// Each model's fraction of the summed per-model cost. Empty when that sum
    /// is zero.
    pub fn model_cost_share(&self) -> BTreeMap<String, f64> {
        let breakdown = self.model_breakdown();
        let total: f64 = breakdown.values().map(|s| s.total_cost).sum();
        if total <= 0.0 {
            return BTreeMap::new();
        }
        breakdown
            .into_iter()
            .map(|(model, stats)| (model, stats.total_cost / total))
            .collect()
    }

    /// Token and request sums saturate at `u64::MAX` rather than wrap.
    pub fn usage_totals(&self) -> UsageTotals {
        let sum = |count: fn(&UsageRecord) -> Option<u64>| {
            self.records
                .iter()
                .filter_map(count)
                .fold(0u64, u64::saturating_add)
        };
        UsageTotals {
            total_cost: self.total_cost(),
            input_tokens: sum(UsageRecord::input_tokens),
            output_tokens: sum(UsageRecord::output_tokens),
            requests: sum(UsageRecord::num_model_requests),
            records: self.records.len(),
        }
    }

    /// `total_days` counts dates that had any record, not the calendar span.
    pub fn summary_stats(&self) -> Result<SummaryStats, AppError> {
        let daily = self.daily_costs();
        if daily.is_empty() {
            return Err(AppError::EmptyDataset);
        }

        let total_days = daily.len();
        let sum: f64 = daily.values().sum();
        let max_daily_cost = daily.values().copied().fold(f64::NEG_INFINITY, f64::max);
        let min_daily_cost = daily.values().copied().fold(f64::INFINITY, f64::min);

        Ok(SummaryStats {
            total_cost: self.total_cost(),
            average_daily_cost: sum / total_days as f64,
            max_daily_cost,
            min_daily_cost,
            days_with_usage: daily.values().filter(|c| **c > 0.0).count(),
            total_days,
        })
    }

    /// Records with a cost amount and an input token count. A side that is
    /// present but left those cells empty does not count.
    pub fn complete_records(&self) -> impl Iterator<Item = &'a UsageRecord> {
        self.records
            .iter()
            .filter(|r| r.amount_value().is_some() && r.input_tokens().is_some())
    }
}
