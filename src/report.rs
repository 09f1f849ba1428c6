use crate::aggregate::{DateRange, ModelStats, SummaryStats, UsageTotals};
use crate::error::AppError;
use crate::estimator::{CostBreakdown, ScenarioEstimate};
use crate::models::YearMonth;
use crate::pricing::{PricingTable, MODEL_PRICING_LINK};
use crate::projection::Projection;
use chrono::NaiveDate;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

const RULE: &str = "==================================================";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

pub fn parse_format(input: &str) -> Result<OutputFormat, AppError> {
    if input.eq_ignore_ascii_case("text") {
        Ok(OutputFormat::Text)
    } else if input.eq_ignore_ascii_case("json") {
        Ok(OutputFormat::Json)
    } else {
        Err(AppError::Config(
            "Unsupported output format. Use text or json.".into(),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyRow {
    pub date: NaiveDate,
    pub cost: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub requests: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub range: DateRange,
    pub totals: UsageTotals,
    pub summary: SummaryStats,
    pub monthly: BTreeMap<YearMonth, f64>,
    pub daily: Vec<DailyRow>,
    pub models: BTreeMap<String, ModelStats>,
    pub model_cost_share: BTreeMap<String, f64>,
    pub projection: Projection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimateView {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_tokens: u64,
    #[serde(flatten)]
    pub breakdown: CostBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct PricingRow<'a> {
    model: &'a str,
    input_per_1m: f64,
    cache_per_1m: f64,
    output_per_1m: f64,
}

/// Renders `value` as pretty JSON, or with `text` otherwise.
pub fn render<T: Serialize>(
    format: OutputFormat,
    value: &T,
    text: impl FnOnce(&T) -> String,
) -> Result<String, AppError> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(value)?),
        OutputFormat::Text => Ok(text(value)),
    }
}

pub fn render_pricing(format: OutputFormat, table: &PricingTable) -> Result<String, AppError> {
    let rows: Vec<PricingRow<'_>> = table
        .models()
        .map(|(model, entry)| PricingRow {
            model,
            input_per_1m: entry.input_per_million(),
            cache_per_1m: entry.cache_per_million(),
            output_per_1m: entry.output_per_million(),
        })
        .collect();
    render(format, &rows, |rows| {
        let mut out = String::new();
        let _ = writeln!(out, "Prices in USD per 1M tokens ({MODEL_PRICING_LINK})");
        let mut table = new_table(&["model", "input", "cached", "output"]);
        for r in rows {
            table.add_row(vec![
                Cell::new(r.model),
                number(format!("{:.3}", r.input_per_1m)),
                number(format!("{:.3}", r.cache_per_1m)),
                number(format!("{:.3}", r.output_per_1m)),
            ]);
        }
        let _ = writeln!(out, "{table}");
        out
    })
}

pub fn render_estimate(format: OutputFormat, view: &EstimateView) -> Result<String, AppError> {
    render(format, view, |v| {
        let mut out = String::new();
        let _ = writeln!(out, "Model: {}", v.model);
        let _ = writeln!(
            out,
            "Input tokens: {} (${:.6})",
            group_thousands(v.input_tokens),
            v.breakdown.input_cost
        );
        let _ = writeln!(
            out,
            "Output tokens: {} (${:.6})",
            group_thousands(v.output_tokens),
            v.breakdown.output_cost
        );
        let _ = writeln!(
            out,
            "Cached tokens: {} (${:.6})",
            group_thousands(v.cache_tokens),
            v.breakdown.cache_cost
        );
        let _ = writeln!(
            out,
            "Estimated cost: ${} (exact {})",
            money(v.breakdown.total_cost),
            v.breakdown.total_cost
        );
        out
    })
}

pub fn render_scenario(format: OutputFormat, est: &ScenarioEstimate) -> Result<String, AppError> {
    render(format, est, |e| {
        let mut out = String::new();
        let _ = writeln!(out, "Model: {}", e.model);
        let _ = writeln!(out, "Total chats (max): {}", group_thousands(e.total_chats));
        let _ = writeln!(out, "Input tokens: {}", group_thousands(e.total_input_tokens));
        let _ = writeln!(out, "Output tokens: {}", group_thousands(e.total_output_tokens));
        let _ = writeln!(out, "Estimated cost: ${} USD", money(e.cost));
        let _ = writeln!(out, "Cost per chat: ${:.4}", e.cost_per_chat);
        let _ = writeln!(out, "Cost per user: ${:.4}", e.cost_per_user);
        out
    })
}

pub fn render_projection(format: OutputFormat, projection: &Projection) -> Result<String, AppError> {
    render(format, projection, |p| {
        let mut out = String::new();
        write_projection(&mut out, p);
        out
    })
}

fn write_projection(out: &mut String, p: &Projection) {
    let _ = writeln!(out, "Estimated Cost per Chat: ${:.5}", p.cost_per_chat);
    let _ = writeln!(
        out,
        "--- Estimated Daily Cost per Number of Users (assuming {} chats/user/day) ---",
        p.chats_per_user_per_day
    );
    for (users, cost) in &p.daily_cost_by_users {
        let _ = writeln!(out, "{users} users -> ${} per day", money(*cost));
    }
}

pub fn render_report(format: OutputFormat, report: &Report) -> Result<String, AppError> {
    render(format, report, report_text)
}

fn report_text(r: &Report) -> String {
    let mut out = String::new();
    let s = &r.summary;

    let _ = writeln!(out, "LLM API Usage Cost Analysis");
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(
        out,
        "Range: {} to {} ({} records)",
        r.range.start, r.range.end, r.totals.records
    );
    let _ = writeln!(out, "Total Cost: ${}", money(s.total_cost));
    let _ = writeln!(out, "Average Daily Cost: ${}", money(s.average_daily_cost));
    let _ = writeln!(out, "Maximum Daily Cost: ${}", money(s.max_daily_cost));
    let _ = writeln!(out, "Minimum Daily Cost: ${}", money(s.min_daily_cost));
    let _ = writeln!(
        out,
        "Days with API Usage: {} out of {} days",
        s.days_with_usage, s.total_days
    );
    let _ = writeln!(out, "Total Input Tokens: {}", group_thousands(r.totals.input_tokens));
    let _ = writeln!(out, "Total Output Tokens: {}", group_thousands(r.totals.output_tokens));
    let _ = writeln!(out, "Total Requests: {}", group_thousands(r.totals.requests));

    let _ = writeln!(out, "\nMonthly Costs");
    for (month, cost) in &r.monthly {
        let _ = writeln!(out, "  {month}  ${}", money(*cost));
    }

    let _ = writeln!(out, "\nDaily Costs");
    let _ = writeln!(out, "{}", daily_table(&r.daily));

    let _ = writeln!(out, "\nUsage by Model");
    if r.models.is_empty() {
        let _ = writeln!(out, "  (no per-model usage in range)");
    } else {
        let _ = writeln!(out, "{}", model_table(r));
    }

    let _ = writeln!(out);
    write_projection(&mut out, &r.projection);
    out
}

fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header.iter().map(|h| Cell::new(h)).collect::<Vec<_>>());
    table
}

fn number(text: String) -> Cell {
    Cell::new(text).set_alignment(CellAlignment::Right)
}

fn daily_table(daily: &[DailyRow]) -> Table {
    let mut table = new_table(&["date", "cost", "input", "output", "requests"]);
    for d in daily {
        table.add_row(vec![
            Cell::new(d.date),
            number(format!("${}", money(d.cost))),
            number(group_thousands(d.input_tokens)),
            number(group_thousands(d.output_tokens)),
            number(group_thousands(d.requests)),
        ]);
    }
    table
}

fn model_table(r: &Report) -> Table {
    let mut table = new_table(&["model", "cost", "input", "output", "requests", "$/1K", "share"]);
    for (model, m) in &r.models {
        let per_1k = m
            .cost_per_1k_tokens
            .map(|v| format!("{v:.4}"))
            .unwrap_or_else(|| "n/a".into());
        let share = r
            .model_cost_share
            .get(model)
            .map(|v| format!("{:.1}%", v * 100.0))
            .unwrap_or_else(|| "-".into());
        table.add_row(vec![
            Cell::new(model),
            number(format!("${}", money(m.total_cost))),
            number(group_thousands(m.total_input_tokens)),
            number(group_thousands(m.total_output_tokens)),
            number(group_thousands(m.total_requests)),
            number(per_1k),
            number(share),
        ]);
    }
    table
}

/// Two decimal places with thousands separators.
pub fn money(value: f64) -> String {
    let rounded = format!("{:.2}", value.abs());
    let (whole, frac) = rounded.split_once('.').unwrap_or((rounded.as_str(), "00"));
    let whole = whole.parse::<u64>().map(group_thousands).unwrap_or_else(|_| whole.to_string());
    let sign = if value < 0.0 && rounded != "0.00" { "-" } else { "" };
    format!("{sign}{whole}.{frac}")
}

pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
