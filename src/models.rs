use chrono::{DateTime, Datelike, NaiveDate, SecondsFormat, Utc};
use serde::Serialize;
use std::fmt;

/// One reporting interval. The epoch instant is canonical; ISO strings are
/// derived from it for display and for the merged artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl BucketKey {
    pub fn new(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            end_time,
        }
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_time.date_naive()
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end_time.date_naive()
    }

    pub fn start_time_iso(&self) -> String {
        self.start_time.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    pub fn end_time_iso(&self) -> String {
        self.end_time.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// Export columns outside the typed contract, in source column order. An
/// empty cell stays in the list as `None` so the column itself survives.
pub type ExtraColumns = Vec<(String, Option<String>)>;

/// Usage half of a bucket. Empty count cells are `None`, never zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageSide {
    pub model: Option<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub input_cached_tokens: Option<u64>,
    pub num_model_requests: Option<u64>,
    pub extra: ExtraColumns,
}

/// Cost half of a bucket. An empty amount cell is `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostSide {
    pub amount_value: Option<f64>,
    pub amount_currency: Option<String>,
    pub line_item: Option<String>,
    pub extra: ExtraColumns,
}

/// A row of the completions usage export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRow {
    pub bucket: BucketKey,
    pub usage: UsageSide,
}

/// A row of the cost export.
#[derive(Debug, Clone, PartialEq)]
pub struct CostRow {
    pub bucket: BucketKey,
    pub cost: CostSide,
}

/// A merged row. A side that had no counterpart in its source table is
/// `None`, which is not the same thing as zero usage.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageRecord {
    pub bucket: BucketKey,
    pub usage: Option<UsageSide>,
    pub cost: Option<CostSide>,
}

impl UsageRecord {
    pub fn model(&self) -> Option<&str> {
        self.usage.as_ref().and_then(|u| u.model.as_deref())
    }

    pub fn amount_value(&self) -> Option<f64> {
        self.cost.as_ref().and_then(|c| c.amount_value)
    }

    pub fn input_tokens(&self) -> Option<u64> {
        self.usage.as_ref().and_then(|u| u.input_tokens)
    }

    pub fn output_tokens(&self) -> Option<u64> {
        self.usage.as_ref().and_then(|u| u.output_tokens)
    }

    pub fn num_model_requests(&self) -> Option<u64> {
        self.usage.as_ref().and_then(|u| u.num_model_requests)
    }
}

/// Join key cells of a merged artifact line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyCells {
    pub start_time: i64,
    pub end_time: i64,
    pub start_time_iso: String,
    pub end_time_iso: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageCells<'a> {
    pub model: Option<&'a str>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub input_cached_tokens: Option<u64>,
    pub num_model_requests: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CostCells<'a> {
    pub amount_value: Option<f64>,
    pub amount_currency: Option<&'a str>,
    pub line_item: Option<&'a str>,
}

/// One line of the merged artifact. Serialized positionally: keys, usage
/// cells, usage extras, cost cells, cost extras.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedRow<'a> {
    pub key: KeyCells,
    pub usage: UsageCells<'a>,
    pub usage_extra: Vec<Option<&'a str>>,
    pub cost: CostCells<'a>,
    pub cost_extra: Vec<Option<&'a str>>,
}

impl KeyCells {
    pub fn of(bucket: &BucketKey) -> Self {
        Self {
            start_time: bucket.start_time.timestamp(),
            end_time: bucket.end_time.timestamp(),
            start_time_iso: bucket.start_time_iso(),
            end_time_iso: bucket.end_time_iso(),
        }
    }
}

impl<'a> From<&'a UsageSide> for UsageCells<'a> {
    fn from(usage: &'a UsageSide) -> Self {
        Self {
            model: usage.model.as_deref(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            input_cached_tokens: usage.input_cached_tokens,
            num_model_requests: usage.num_model_requests,
        }
    }
}

impl<'a> From<&'a CostSide> for CostCells<'a> {
    fn from(cost: &'a CostSide) -> Self {
        Self {
            amount_value: cost.amount_value,
            amount_currency: cost.amount_currency.as_deref(),
            line_item: cost.line_item.as_deref(),
        }
    }
}

/// Value of the extra column `name`, or `None` when absent or empty.
pub fn extra_value<'a>(extra: &'a ExtraColumns, name: &str) -> Option<&'a str> {
    extra
        .iter()
        .find(|(column, _)| column == name)
        .and_then(|(_, value)| value.as_deref())
}

/// Calendar month used as the monthly rollup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl Serialize for YearMonth {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Accepts the ISO shapes that usage exports carry: RFC 3339, the
/// space-separated form with an offset, and naive timestamps taken as UTC.
pub fn parse_iso_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(parsed.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    #[test]
    fn parse_iso_timestamp_supports_export_shapes() {
        let expected = ts(1_704_067_200);
        assert_eq!(parse_iso_timestamp("2024-01-01T00:00:00Z"), Some(expected));
        assert_eq!(parse_iso_timestamp("2024-01-01T00:00:00+00:00"), Some(expected));
        assert_eq!(parse_iso_timestamp("2024-01-01 00:00:00+00:00"), Some(expected));
        assert_eq!(parse_iso_timestamp("2024-01-01 00:00:00"), Some(expected));
        assert_eq!(parse_iso_timestamp("2024-01-01T02:00:00+02:00"), Some(expected));
    }

    #[test]
    fn parse_iso_timestamp_rejects_garbage() {
        assert_eq!(parse_iso_timestamp("yesterday"), None);
        assert_eq!(parse_iso_timestamp(""), None);
    }

    #[test]
    fn bucket_key_derives_dates_and_iso() {
        let key = BucketKey::new(ts(1_704_067_200), ts(1_704_153_600));
        assert_eq!(key.start_date(), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(key.end_date(), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(key.start_time_iso(), "2024-01-01T00:00:00Z");
    }

    #[test]
    fn accessors_keep_absent_counts_absent() {
        let record = UsageRecord {
            bucket: BucketKey::new(ts(0), ts(86_400)),
            usage: Some(UsageSide {
                model: Some("gpt-4o".into()),
                input_tokens: Some(0),
                ..UsageSide::default()
            }),
            cost: Some(CostSide::default()),
        };
        assert_eq!(record.input_tokens(), Some(0));
        assert_eq!(record.output_tokens(), None);
        assert_eq!(record.num_model_requests(), None);
        assert_eq!(record.amount_value(), None);
    }

    #[test]
    fn key_cells_carry_epoch_and_iso() {
        let cells = KeyCells::of(&BucketKey::new(ts(0), ts(86_400)));
        assert_eq!(cells.end_time, 86_400);
        assert_eq!(cells.start_time_iso, "1970-01-01T00:00:00Z");
    }

    #[test]
    fn extra_value_skips_empty_cells() {
        let extra: ExtraColumns = vec![
            ("project_id".into(), Some("proj_a".into())),
            ("user_id".into(), None),
        ];
        assert_eq!(extra_value(&extra, "project_id"), Some("proj_a"));
        assert_eq!(extra_value(&extra, "user_id"), None);
        assert_eq!(extra_value(&extra, "api_key_id"), None);
    }

    #[test]
    fn year_month_formats_zero_padded() {
        let ym = YearMonth::of(NaiveDate::from_ymd_opt(2025, 3, 17).unwrap());
        assert_eq!(ym.to_string(), "2025-03");
    }
}
