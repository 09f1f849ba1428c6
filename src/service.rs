use crate::aggregate::{Aggregation, DateRange};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::estimator::CostEstimator;
use crate::ingest;
use crate::merge::merge;
use crate::models::UsageRecord;
use crate::pricing::PricingTable;
use crate::projection::ProjectionModel;
use crate::report::{DailyRow, Report};
use chrono::NaiveDate;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct MergeSummary {
    pub usage_files: usize,
    pub cost_files: usize,
    pub usage_rows: usize,
    pub cost_rows: usize,
    pub merged_rows: usize,
    pub output: PathBuf,
}

pub struct TallyService {
    cfg: AppConfig,
    pricing: Arc<PricingTable>,
}

impl TallyService {
    pub fn new(cfg: AppConfig) -> Result<Self, AppError> {
        let pricing = PricingTable::built_in().with_overrides(&cfg.pricing_overrides)?;
        debug!(
            models = pricing.model_count(),
            overrides = cfg.pricing_overrides.len(),
            "pricing table ready"
        );
        Ok(Self {
            cfg,
            pricing: Arc::new(pricing),
        })
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    pub fn estimator(&self) -> CostEstimator {
        CostEstimator::new(Arc::clone(&self.pricing))
    }

    pub fn projection_model(&self) -> Result<ProjectionModel, AppError> {
        ProjectionModel::new(self.cfg.projection.clone())
    }

    /// Default location of the merged artifact inside `dir`.
    pub fn merged_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.cfg.data.merged_file)
    }

    pub fn merge_directory(
        &self,
        dir: &Path,
        output: Option<&Path>,
    ) -> Result<MergeSummary, AppError> {
        let usage_files = ingest::discover(dir, &self.cfg.data.usage_prefix)?;
        let cost_files = ingest::discover(dir, &self.cfg.data.cost_prefix)?;

        if usage_files.is_empty() && cost_files.is_empty() {
            return Err(AppError::NoInput(format!(
                "no {}*.csv or {}*.csv files in {}",
                self.cfg.data.usage_prefix,
                self.cfg.data.cost_prefix,
                dir.display()
            )));
        }
        if usage_files.is_empty() {
            warn!(dir = %dir.display(), "no usage files found; merging cost rows only");
        }
        if cost_files.is_empty() {
            warn!(dir = %dir.display(), "no cost files found; merging usage rows only");
        }

        let usage = ingest::read_usage_rows(&usage_files)?;
        let cost = ingest::read_cost_rows(&cost_files)?;
        let merged = merge(&usage, &cost);

        let output = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.merged_path(dir));
        ingest::write_merged(&output, &merged)?;
        info!(
            usage_rows = usage.len(),
            cost_rows = cost.len(),
            merged_rows = merged.len(),
            output = %output.display(),
            "merge complete"
        );

        Ok(MergeSummary {
            usage_files: usage_files.len(),
            cost_files: cost_files.len(),
            usage_rows: usage.len(),
            cost_rows: cost.len(),
            merged_rows: merged.len(),
            output,
        })
    }

    /// Loads the merged artifact and narrows it to the requested dates. A
    /// missing bound falls back to the edge of the loaded data.
    fn load_range(
        &self,
        input: &Path,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<(DateRange, Vec<UsageRecord>), AppError> {
        let records = ingest::read_merged(input)?;
        let span = DateRange::spanning(&records).ok_or(AppError::EmptyDataset)?;
        let range = DateRange::new(from.unwrap_or(span.start), to.unwrap_or(span.end))?;
        let selected = range.filter(&records);
        debug!(
            loaded = records.len(),
            selected = selected.len(),
            start = %range.start,
            end = %range.end,
            "filtered merged records"
        );
        Ok((range, selected))
    }

    pub fn report(
        &self,
        input: &Path,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Report, AppError> {
        let (range, records) = self.load_range(input, from, to)?;
        let agg = Aggregation::new(&records);
        let summary = agg.summary_stats()?;

        let tokens = agg.daily_tokens();
        let requests = agg.daily_requests();
        let daily = agg
            .daily_costs()
            .into_iter()
            .map(|(date, cost)| {
                let t = tokens.get(&date).copied().unwrap_or_default();
                DailyRow {
                    date,
                    cost,
                    input_tokens: t.input_tokens,
                    output_tokens: t.output_tokens,
                    requests: requests.get(&date).copied().unwrap_or(0),
                }
            })
            .collect();

        let projection = self.projection_model()?.project_from_history(&summary);
        info!(records = records.len(), days = summary.total_days, "report built");

        Ok(Report {
            range,
            totals: agg.usage_totals(),
            summary,
            monthly: agg.monthly_costs(),
            daily,
            models: agg.model_breakdown(),
            model_cost_share: agg.model_cost_share(),
            projection,
        })
    }

    /// Writes the records that carry both a usage and a cost side.
    pub fn export<W: Write>(
        &self,
        input: &Path,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        writer: W,
    ) -> Result<usize, AppError> {
        let (_, records) = self.load_range(input, from, to)?;
        let complete: Vec<UsageRecord> = Aggregation::new(&records)
            .complete_records()
            .cloned()
            .collect();
        ingest::write_records(writer, &complete)?;
        info!(rows = complete.len(), "exported complete records");
        Ok(complete.len())
    }
}
