//! Column contract between the export files and the typed rows.
//!
//! A [`RawTable`] is a header plus string cells, exactly as read from a CSV
//! file. Decoding checks the expected columns up front and reports the first
//! missing column or malformed cell as a schema mismatch.
//!
//! Cell policy is the same on both sides: an empty cell in a value column is
//! absent (`None`), never zero. A malformed non-empty cell is an error.
//! Columns outside the typed contract ride along as extras.

use crate::error::AppError;
use crate::models::{
    extra_value, parse_iso_timestamp, BucketKey, CostCells, CostRow, CostSide, ExtraColumns,
    KeyCells, MergedRow, UsageCells, UsageRecord, UsageRow, UsageSide,
};
use chrono::{DateTime, TimeZone, Utc};

const KEY_COLUMNS: [&str; 4] = ["start_time", "end_time", "start_time_iso", "end_time_iso"];
const USAGE_COLUMNS: [&str; 5] = [
    "model",
    "input_tokens",
    "output_tokens",
    "input_cached_tokens",
    "num_model_requests",
];
const COST_COLUMNS: [&str; 3] = ["amount_value", "amount_currency", "line_item"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    pub source_name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

struct KeyColumns {
    start: usize,
    end: usize,
    start_iso: usize,
    end_iso: usize,
}

impl RawTable {
    pub fn new(
        source_name: impl Into<String>,
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            headers,
            rows,
        }
    }

    fn column(&self, name: &str) -> Result<usize, AppError> {
        self.optional_column(name).ok_or_else(|| {
            AppError::schema(&self.source_name, format!("missing required column '{name}'"))
        })
    }

    fn optional_column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim() == name)
    }

    fn key_columns(&self) -> Result<KeyColumns, AppError> {
        Ok(KeyColumns {
            start: self.column(KEY_COLUMNS[0])?,
            end: self.column(KEY_COLUMNS[1])?,
            start_iso: self.column(KEY_COLUMNS[2])?,
            end_iso: self.column(KEY_COLUMNS[3])?,
        })
    }

    fn cell<'a>(&self, row: &'a [String], idx: usize) -> Option<&'a str> {
        row.get(idx).map(|c| c.trim()).filter(|c| !c.is_empty())
    }

    fn bad_cell(&self, line: usize, idx: usize, detail: impl std::fmt::Display) -> AppError {
        AppError::schema(
            &self.source_name,
            format!("row {line}, column '{}': {detail}", self.headers[idx]),
        )
    }

    fn instant(
        &self,
        row: &[String],
        line: usize,
        epoch_idx: usize,
        iso_idx: usize,
    ) -> Result<DateTime<Utc>, AppError> {
        let from_epoch = match self.cell(row, epoch_idx) {
            Some(raw) => Some(parse_epoch(raw).ok_or_else(|| {
                self.bad_cell(line, epoch_idx, format!("'{raw}' is not epoch seconds"))
            })?),
            None => None,
        };
        let from_iso = match self.cell(row, iso_idx) {
            Some(raw) => Some(parse_iso_timestamp(raw).ok_or_else(|| {
                self.bad_cell(line, iso_idx, format!("'{raw}' is not a timestamp"))
            })?),
            None => None,
        };

        match (from_epoch, from_iso) {
            (Some(epoch), Some(iso)) if epoch != iso => Err(self.bad_cell(
                line,
                epoch_idx,
                format!(
                    "epoch {} disagrees with ISO form {}",
                    epoch.timestamp(),
                    iso.to_rfc3339()
                ),
            )),
            (Some(instant), _) | (None, Some(instant)) => Ok(instant),
            (None, None) => Err(self.bad_cell(line, epoch_idx, "no timestamp in either form")),
        }
    }

    fn bucket(
        &self,
        row: &[String],
        line: usize,
        cols: &KeyColumns,
    ) -> Result<BucketKey, AppError> {
        let start = self.instant(row, line, cols.start, cols.start_iso)?;
        let end = self.instant(row, line, cols.end, cols.end_iso)?;
        Ok(BucketKey::new(start, end))
    }

    fn count(&self, row: &[String], line: usize, idx: usize) -> Result<Option<u64>, AppError> {
        match self.cell(row, idx) {
            Some(raw) => parse_count(raw)
                .map(Some)
                .ok_or_else(|| self.bad_cell(line, idx, format!("'{raw}' is not a token count"))),
            None => Ok(None),
        }
    }

    fn optional_count(
        &self,
        row: &[String],
        line: usize,
        idx: Option<usize>,
    ) -> Result<Option<u64>, AppError> {
        match idx {
            Some(idx) => self.count(row, line, idx),
            None => Ok(None),
        }
    }

    fn amount(&self, row: &[String], line: usize, idx: usize) -> Result<Option<f64>, AppError> {
        match self.cell(row, idx) {
            Some(raw) => match raw.parse::<f64>() {
                Ok(v) if v.is_finite() && v >= 0.0 => Ok(Some(v)),
                _ => Err(self.bad_cell(line, idx, format!("'{raw}' is not a cost"))),
            },
            None => Ok(None),
        }
    }

    fn text(&self, row: &[String], idx: Option<usize>) -> Option<String> {
        idx.and_then(|i| self.cell(row, i)).map(str::to_string)
    }

    /// Positions of the columns that are neither keys nor in `typed`.
    fn extra_indices(&self, typed: &[&str]) -> Vec<usize> {
        self.headers
            .iter()
            .enumerate()
            .filter(|(_, h)| {
                let h = h.trim();
                !KEY_COLUMNS.contains(&h) && !typed.contains(&h)
            })
            .map(|(i, _)| i)
            .collect()
    }

    fn extras(&self, row: &[String], columns: &[(usize, String)]) -> ExtraColumns {
        columns
            .iter()
            .map(|(idx, name)| (name.clone(), self.cell(row, *idx).map(str::to_string)))
            .collect()
    }

    fn named(&self, indices: Vec<usize>) -> Vec<(usize, String)> {
        indices
            .into_iter()
            .map(|i| (i, self.headers[i].trim().to_string()))
            .collect()
    }

    /// Data rows are numbered from 2; line 1 is the header.
    fn numbered_rows(&self) -> impl Iterator<Item = (usize, &[String])> {
        self.rows.iter().enumerate().map(|(i, r)| (i + 2, r.as_slice()))
    }

    pub fn usage_rows(&self) -> Result<Vec<UsageRow>, AppError> {
        let keys = self.key_columns()?;
        let model = self.column("model")?;
        let input = self.column("input_tokens")?;
        let output = self.column("output_tokens")?;
        let requests = self.column("num_model_requests")?;
        let cached = self.optional_column("input_cached_tokens");
        let extra = self.named(self.extra_indices(&USAGE_COLUMNS));

        let mut out = Vec::with_capacity(self.rows.len());
        for (line, row) in self.numbered_rows() {
            out.push(UsageRow {
                bucket: self.bucket(row, line, &keys)?,
                usage: UsageSide {
                    model: self.text(row, Some(model)),
                    input_tokens: self.count(row, line, input)?,
                    output_tokens: self.count(row, line, output)?,
                    input_cached_tokens: self.optional_count(row, line, cached)?,
                    num_model_requests: self.count(row, line, requests)?,
                    extra: self.extras(row, &extra),
                },
            });
        }
        Ok(out)
    }

    /// An empty `amount_value` cell decodes to a cost side with no amount,
    /// the same way empty usage counts stay `None`.
    pub fn cost_rows(&self) -> Result<Vec<CostRow>, AppError> {
        let keys = self.key_columns()?;
        let amount = self.column("amount_value")?;
        let currency = self.optional_column("amount_currency");
        let line_item = self.optional_column("line_item");
        let extra = self.named(self.extra_indices(&COST_COLUMNS));

        let mut out = Vec::with_capacity(self.rows.len());
        for (line, row) in self.numbered_rows() {
            out.push(CostRow {
                bucket: self.bucket(row, line, &keys)?,
                cost: CostSide {
                    amount_value: self.amount(row, line, amount)?,
                    amount_currency: self.text(row, currency),
                    line_item: self.text(row, line_item),
                    extra: self.extras(row, &extra),
                },
            });
        }
        Ok(out)
    }

    /// Decodes a previously written merged artifact. Extra columns left of
    /// `amount_value` belong to the usage side and the rest to the cost side.
    /// A side is present when any of its columns holds a value.
    pub fn merged_records(&self) -> Result<Vec<UsageRecord>, AppError> {
        let keys = self.key_columns()?;
        let model = self.column("model")?;
        let input = self.column("input_tokens")?;
        let output = self.column("output_tokens")?;
        let requests = self.column("num_model_requests")?;
        let cached = self.optional_column("input_cached_tokens");
        let amount = self.column("amount_value")?;
        let currency = self.optional_column("amount_currency");
        let line_item = self.optional_column("line_item");

        let typed: Vec<&str> = USAGE_COLUMNS.iter().chain(&COST_COLUMNS).copied().collect();
        let (usage_idx, cost_idx): (Vec<usize>, Vec<usize>) =
            self.extra_indices(&typed).into_iter().partition(|&i| i < amount);
        let usage_extra: Vec<(usize, String)> = usage_idx
            .into_iter()
            .map(|i| (i, self.unsuffixed(i, "_x", "_y", &COST_COLUMNS)))
            .collect();
        let cost_extra: Vec<(usize, String)> = cost_idx
            .into_iter()
            .map(|i| (i, self.unsuffixed(i, "_y", "_x", &USAGE_COLUMNS)))
            .collect();

        let mut out = Vec::with_capacity(self.rows.len());
        for (line, row) in self.numbered_rows() {
            let usage = UsageSide {
                model: self.text(row, Some(model)),
                input_tokens: self.count(row, line, input)?,
                output_tokens: self.count(row, line, output)?,
                input_cached_tokens: self.optional_count(row, line, cached)?,
                num_model_requests: self.count(row, line, requests)?,
                extra: self.extras(row, &usage_extra),
            };
            let has_usage = usage.model.is_some()
                || usage.input_tokens.is_some()
                || usage.output_tokens.is_some()
                || usage.input_cached_tokens.is_some()
                || usage.num_model_requests.is_some()
                || usage.extra.iter().any(|(_, v)| v.is_some());

            let cost = CostSide {
                amount_value: self.amount(row, line, amount)?,
                amount_currency: self.text(row, currency),
                line_item: self.text(row, line_item),
                extra: self.extras(row, &cost_extra),
            };
            let has_cost = cost.amount_value.is_some()
                || cost.amount_currency.is_some()
                || cost.line_item.is_some()
                || cost.extra.iter().any(|(_, v)| v.is_some());

            out.push(UsageRecord {
                bucket: self.bucket(row, line, &keys)?,
                usage: has_usage.then_some(usage),
                cost: has_cost.then_some(cost),
            });
        }
        Ok(out)
    }

    /// Reverses the collision suffix given by [`MergedLayout`]: `own` is
    /// stripped only when the other side really had a column of that name.
    fn unsuffixed(&self, idx: usize, own: &str, other: &str, other_typed: &[&str]) -> String {
        let name = self.headers[idx].trim();
        if let Some(base) = name.strip_suffix(own) {
            let twin = format!("{base}{other}");
            if other_typed.contains(&base) || self.headers.iter().any(|h| h.trim() == twin) {
                return base.to_string();
            }
        }
        name.to_string()
    }
}

/// Column layout of the merged artifact for one set of records: the union of
/// both export schemas. Extra columns named alike on both sides get `_x`
/// (usage) and `_y` (cost) suffixes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedLayout {
    usage_extra: Vec<String>,
    cost_extra: Vec<String>,
}

impl MergedLayout {
    pub fn of(records: &[UsageRecord]) -> Self {
        let mut layout = Self::default();
        for record in records {
            if let Some(usage) = &record.usage {
                add_names(&mut layout.usage_extra, &usage.extra);
            }
            if let Some(cost) = &record.cost {
                add_names(&mut layout.cost_extra, &cost.extra);
            }
        }
        layout
    }

    pub fn headers(&self) -> Vec<String> {
        let mut headers: Vec<String> = KEY_COLUMNS.iter().map(|h| h.to_string()).collect();
        headers.extend(USAGE_COLUMNS.iter().map(|h| h.to_string()));
        for name in &self.usage_extra {
            let clash = self.cost_extra.contains(name) || COST_COLUMNS.contains(&name.as_str());
            headers.push(if clash { format!("{name}_x") } else { name.clone() });
        }
        headers.extend(COST_COLUMNS.iter().map(|h| h.to_string()));
        for name in &self.cost_extra {
            let clash = self.usage_extra.contains(name) || USAGE_COLUMNS.contains(&name.as_str());
            headers.push(if clash { format!("{name}_y") } else { name.clone() });
        }
        headers
    }

    pub fn row<'a>(&self, record: &'a UsageRecord) -> MergedRow<'a> {
        let usage = record.usage.as_ref();
        let cost = record.cost.as_ref();
        MergedRow {
            key: KeyCells::of(&record.bucket),
            usage: usage.map(UsageCells::from).unwrap_or_default(),
            usage_extra: self
                .usage_extra
                .iter()
                .map(|name| usage.and_then(|u| extra_value(&u.extra, name)))
                .collect(),
            cost: cost.map(CostCells::from).unwrap_or_default(),
            cost_extra: self
                .cost_extra
                .iter()
                .map(|name| cost.and_then(|c| extra_value(&c.extra, name)))
                .collect(),
        }
    }
}

fn add_names(names: &mut Vec<String>, extra: &ExtraColumns) {
    for (name, _) in extra {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
}

/// Epoch seconds; tolerates the `1735689600.0` form spreadsheet tools emit.
fn parse_epoch(raw: &str) -> Option<DateTime<Utc>> {
    let secs = match raw.parse::<i64>() {
        Ok(secs) => secs,
        Err(_) => {
            let f = raw.parse::<f64>().ok()?;
            if f.fract() != 0.0 || !f.is_finite() {
                return None;
            }
            f as i64
        }
    };
    Utc.timestamp_opt(secs, 0).single()
}

/// Whole non-negative counts that fit in a `u64`. `u64::MAX as f64` rounds up
/// to 2^64, so the float path is bounded exclusively.
fn parse_count(raw: &str) -> Option<u64> {
    if let Ok(v) = raw.parse::<u64>() {
        return Some(v);
    }
    let f = raw.parse::<f64>().ok()?;
    let in_range = f.is_finite() && f >= 0.0 && f < u64::MAX as f64;
    (in_range && f.fract() == 0.0).then_some(f as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    const USAGE_HEADER: [&str; 9] = [
        "start_time",
        "end_time",
        "start_time_iso",
        "end_time_iso",
        "model",
        "input_tokens",
        "output_tokens",
        "input_cached_tokens",
        "num_model_requests",
    ];

    fn usage_table(rows: &[&[&str]]) -> RawTable {
        RawTable::new(
            "completions_usage_1.csv",
            strings(&USAGE_HEADER),
            rows.iter().map(|r| strings(r)).collect(),
        )
    }

    fn cost_table(header: &[&str], rows: &[&[&str]]) -> RawTable {
        RawTable::new(
            "cost_1.csv",
            strings(header),
            rows.iter().map(|r| strings(r)).collect(),
        )
    }

    #[test]
    fn usage_rows_decode_typed_fields() {
        let table = usage_table(&[&[
            "1704067200",
            "1704153600",
            "2024-01-01T00:00:00+00:00",
            "2024-01-02T00:00:00+00:00",
            "gpt-4o-mini",
            "1200",
            "300",
            "",
            "4",
        ]]);
        let rows = table.usage_rows().expect("valid table");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bucket.start_time.timestamp(), 1_704_067_200);
        assert_eq!(
            rows[0].usage,
            UsageSide {
                model: Some("gpt-4o-mini".into()),
                input_tokens: Some(1200),
                output_tokens: Some(300),
                input_cached_tokens: None,
                num_model_requests: Some(4),
                extra: Vec::new(),
            }
        );
    }

    #[test]
    fn empty_usage_counts_stay_absent() {
        let table = usage_table(&[&[
            "1704067200",
            "1704153600",
            "",
            "",
            "gpt-4o",
            "",
            "0",
            "",
            "",
        ]]);
        let usage = &table.usage_rows().expect("valid table")[0].usage;
        assert_eq!(usage.input_tokens, None);
        assert_eq!(usage.output_tokens, Some(0));
        assert_eq!(usage.num_model_requests, None);
    }

    #[test]
    fn empty_amount_is_an_absent_cost() {
        let table = cost_table(
            &["start_time", "end_time", "start_time_iso", "end_time_iso", "amount_value"],
            &[&["0", "86400", "", "", ""], &["86400", "172800", "", "", "0"]],
        );
        let rows = table.cost_rows().expect("empty amount is allowed");
        assert_eq!(rows[0].cost.amount_value, None);
        assert_eq!(rows[1].cost.amount_value, Some(0.0));
    }

    #[test]
    fn extra_columns_are_kept_in_source_order() {
        let table = RawTable::new(
            "completions_usage_1.csv",
            strings(&[&USAGE_HEADER[..], &["project_id", "user_id"][..]].concat()),
            vec![strings(&["0", "86400", "", "", "gpt-4o", "1", "1", "", "1", "proj_a", ""])],
        );
        let usage = &table.usage_rows().expect("valid table")[0].usage;
        assert_eq!(
            usage.extra,
            vec![
                ("project_id".to_string(), Some("proj_a".to_string())),
                ("user_id".to_string(), None),
            ]
        );
    }

    #[test]
    fn missing_column_is_schema_mismatch() {
        let table = cost_table(
            &["start_time", "end_time", "start_time_iso", "end_time_iso"],
            &[],
        );
        let err = table.cost_rows().expect_err("no amount_value column");
        assert!(matches!(err, AppError::SchemaMismatch { .. }));
        assert!(err.to_string().contains("missing required column 'amount_value'"));
        assert!(err.to_string().contains("cost_1.csv"));
    }

    #[test]
    fn epoch_and_iso_must_agree() {
        let table = usage_table(&[&[
            "1704067200",
            "1704153600",
            "2024-01-05T00:00:00Z",
            "2024-01-02T00:00:00Z",
            "gpt-4o",
            "1",
            "1",
            "",
            "1",
        ]]);
        let err = table.usage_rows().expect_err("inconsistent key");
        assert!(err.to_string().contains("row 2, column 'start_time'"));
        assert!(err.to_string().contains("disagrees"));
    }

    #[test]
    fn iso_alone_is_enough_for_a_bucket() {
        let table = usage_table(&[&[
            "",
            "",
            "2024-01-01 00:00:00+00:00",
            "2024-01-02 00:00:00+00:00",
            "gpt-4o",
            "1",
            "1",
            "",
            "1",
        ]]);
        let rows = table.usage_rows().expect("iso-only row");
        assert_eq!(rows[0].bucket.end_time.timestamp(), 1_704_153_600);
    }

    #[test]
    fn malformed_count_names_row_and_column() {
        let table = usage_table(&[&[
            "1704067200",
            "1704153600",
            "",
            "",
            "gpt-4o",
            "lots",
            "1",
            "",
            "1",
        ]]);
        let err = table.usage_rows().expect_err("bad count");
        assert!(err.to_string().contains("row 2, column 'input_tokens'"));
    }

    #[test]
    fn cost_rows_reject_negative_amounts() {
        let table = cost_table(
            &["start_time", "end_time", "start_time_iso", "end_time_iso", "amount_value"],
            &[&["0", "86400", "", "", "-2"]],
        );
        assert!(table.cost_rows().is_err());
    }

    #[test]
    fn float_formatted_counts_are_accepted() {
        assert_eq!(parse_count("1200.0"), Some(1200));
        assert_eq!(parse_count("12.5"), None);
        assert_eq!(parse_epoch("1704067200.0").map(|t| t.timestamp()), Some(1_704_067_200));
    }

    #[test]
    fn counts_beyond_u64_are_rejected() {
        assert_eq!(parse_count("1e20"), None);
        assert_eq!(parse_count("18446744073709551616"), None);
        assert_eq!(parse_count("18446744073709551615"), Some(u64::MAX));

        let table = usage_table(&[&["0", "86400", "", "", "gpt-4o", "1e20", "1", "", "1"]]);
        let err = table.usage_rows().expect_err("count out of range");
        assert!(matches!(err, AppError::SchemaMismatch { .. }));
        assert!(err.to_string().contains("column 'input_tokens'"));
    }

    fn merged_sample() -> Vec<UsageRecord> {
        let usage = RawTable::new(
            "completions_usage_1.csv",
            strings(&[&USAGE_HEADER[..], &["project_id", "user_id"][..]].concat()),
            vec![strings(&["0", "86400", "", "", "gpt-4o", "10", "20", "5", "1", "proj_a", "u1"])],
        )
        .usage_rows()
        .expect("usage");
        let cost = cost_table(
            &[
                "start_time",
                "end_time",
                "start_time_iso",
                "end_time_iso",
                "amount_value",
                "organization_id",
                "project_id",
            ],
            &[&["86400", "172800", "", "", "0.5", "org_1", "proj_b"]],
        )
        .cost_rows()
        .expect("cost");
        vec![
            UsageRecord {
                bucket: usage[0].bucket,
                usage: Some(usage[0].usage.clone()),
                cost: None,
            },
            UsageRecord {
                bucket: cost[0].bucket,
                usage: None,
                cost: Some(cost[0].cost.clone()),
            },
        ]
    }

    #[test]
    fn layout_is_union_of_both_schemas_with_suffixed_clashes() {
        let layout = MergedLayout::of(&merged_sample());
        assert_eq!(
            layout.headers(),
            strings(&[
                "start_time",
                "end_time",
                "start_time_iso",
                "end_time_iso",
                "model",
                "input_tokens",
                "output_tokens",
                "input_cached_tokens",
                "num_model_requests",
                "project_id_x",
                "user_id",
                "amount_value",
                "amount_currency",
                "line_item",
                "organization_id",
                "project_id_y",
            ])
        );
    }

    #[test]
    fn layout_row_leaves_missing_side_empty() {
        let records = merged_sample();
        let layout = MergedLayout::of(&records);
        let row = layout.row(&records[1]);
        assert_eq!(row.usage, UsageCells::default());
        assert_eq!(row.usage_extra, vec![None, None]);
        assert_eq!(row.cost.amount_value, Some(0.5));
        assert_eq!(row.cost_extra, vec![Some("org_1"), Some("proj_b")]);
        assert_eq!(row.key.end_time, 172_800);
    }

    #[test]
    fn merged_records_assign_extras_to_their_side() {
        let records = merged_sample();
        let layout = MergedLayout::of(&records);
        let cell = |v: Option<String>| v.unwrap_or_default();
        let rows = records
            .iter()
            .map(|r| {
                let row = layout.row(r);
                let mut cells = vec![
                    row.key.start_time.to_string(),
                    row.key.end_time.to_string(),
                    row.key.start_time_iso,
                    row.key.end_time_iso,
                    cell(row.usage.model.map(str::to_string)),
                    cell(row.usage.input_tokens.map(|v| v.to_string())),
                    cell(row.usage.output_tokens.map(|v| v.to_string())),
                    cell(row.usage.input_cached_tokens.map(|v| v.to_string())),
                    cell(row.usage.num_model_requests.map(|v| v.to_string())),
                ];
                cells.extend(row.usage_extra.iter().map(|v| cell(v.map(str::to_string))));
                cells.push(cell(row.cost.amount_value.map(|v| v.to_string())));
                cells.push(cell(row.cost.amount_currency.map(str::to_string)));
                cells.push(cell(row.cost.line_item.map(str::to_string)));
                cells.extend(row.cost_extra.iter().map(|v| cell(v.map(str::to_string))));
                cells
            })
            .collect();

        let decoded = RawTable::new("merged_usage_cost.csv", layout.headers(), rows)
            .merged_records()
            .expect("decode merged");
        assert_eq!(decoded, records);
    }
}
