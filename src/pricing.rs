use crate::config::{normalize_model_name, PricingOverride};
use crate::error::AppError;
use serde::Serialize;
use std::collections::BTreeMap;

pub const MODEL_PRICING_LINK: &str = "https://platform.openai.com/docs/pricing";

/// USD rates per one million tokens for each token class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PricingEntry {
    input_per_million: f64,
    cache_per_million: f64,
    output_per_million: f64,
}

impl PricingEntry {
    pub fn new(
        input_per_million: f64,
        cache_per_million: f64,
        output_per_million: f64,
    ) -> Result<Self, AppError> {
        for (label, rate) in [
            ("input", input_per_million),
            ("cache", cache_per_million),
            ("output", output_per_million),
        ] {
            if !rate.is_finite() || rate < 0.0 {
                return Err(AppError::Config(format!(
                    "{label} rate must be a non-negative number, got {rate}"
                )));
            }
        }
        Ok(Self {
            input_per_million,
            cache_per_million,
            output_per_million,
        })
    }

    pub fn input_per_million(&self) -> f64 {
        self.input_per_million
    }

    pub fn cache_per_million(&self) -> f64 {
        self.cache_per_million
    }

    pub fn output_per_million(&self) -> f64 {
        self.output_per_million
    }
}

/// Closed snapshot of model prices. Never mutated once built; adding a model
/// produces a new table.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingTable {
    entries: BTreeMap<String, PricingEntry>,
}

impl PricingTable {
    pub fn built_in() -> Self {
        let entries = BTreeMap::from([
            (
                "gpt-4o-mini".to_string(),
                PricingEntry {
                    input_per_million: 0.15,
                    cache_per_million: 0.075,
                    output_per_million: 0.60,
                },
            ),
            (
                "gpt-4o".to_string(),
                PricingEntry {
                    input_per_million: 2.50,
                    cache_per_million: 1.25,
                    output_per_million: 10.00,
                },
            ),
        ]);
        Self { entries }
    }

    pub fn lookup(&self, model: &str) -> Result<&PricingEntry, AppError> {
        self.entries
            .get(&normalize_model_name(model))
            .ok_or_else(|| AppError::UnknownModel(model.to_string()))
    }

    pub fn with_entry(&self, model: &str, entry: PricingEntry) -> Self {
        let mut entries = self.entries.clone();
        entries.insert(normalize_model_name(model), entry);
        Self { entries }
    }

    pub fn with_overrides(&self, overrides: &[PricingOverride]) -> Result<Self, AppError> {
        overrides.iter().try_fold(self.clone(), |table, ov| {
            let entry = PricingEntry::new(ov.input_per_1m, ov.cache_per_1m, ov.output_per_1m)
                .map_err(|e| AppError::Config(format!("pricing override '{}': {e}", ov.model)))?;
            Ok(table.with_entry(&ov.model, entry))
        })
    }

    pub fn models(&self) -> impl Iterator<Item = (&str, &PricingEntry)> {
        self.entries.iter().map(|(model, entry)| (model.as_str(), entry))
    }

    pub fn model_count(&self) -> usize {
        self.entries.len()
    }
}
