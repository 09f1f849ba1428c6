use crate::error::AppError;
use crate::projection::ProjectionSettings;
use config::{Config, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const SERVICE_NAME: &str = "llm-tally";
const QUALIFIER: &str = "io";
const ORGANIZATION: &str = "llm-tally";
const ENV_PREFIX: &str = "LLM_TALLY";

pub fn normalize_model_name(model: &str) -> String {
    model.trim().to_ascii_lowercase()
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, SERVICE_NAME)
}

fn app_home_dir() -> Result<PathBuf, AppError> {
    if let Ok(custom) = std::env::var("LLM_TALLY_HOME") {
        return Ok(PathBuf::from(custom));
    }

    if let Some(dirs) = project_dirs() {
        let candidate = dirs.data_local_dir().to_path_buf();
        if fs::create_dir_all(&candidate).is_ok() {
            return Ok(candidate);
        }
    }

    let cwd = std::env::current_dir()?;
    Ok(cwd.join(".llm-tally"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub pricing_overrides: Vec<PricingOverride>,
    pub projection: ProjectionSettings,
    pub data: DataSettings,
}

/// File naming for the usage exports and the merged artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub usage_prefix: String,
    pub cost_prefix: String,
    pub merged_file: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            usage_prefix: "completions_usage_".into(),
            cost_prefix: "cost_".into(),
            merged_file: "merged_usage_cost.csv".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingOverride {
    pub model: String,
    pub input_per_1m: f64,
    #[serde(default)]
    pub cache_per_1m: f64,
    pub output_per_1m: f64,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        self.projection.validate()?;
        for (name, value) in [
            ("data.usage_prefix", &self.data.usage_prefix),
            ("data.cost_prefix", &self.data.cost_prefix),
            ("data.merged_file", &self.data.merged_file),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::Config(format!("{name} must not be empty")));
            }
        }
        if self.data.usage_prefix == self.data.cost_prefix {
            return Err(AppError::Config(
                "data.usage_prefix and data.cost_prefix must differ".into(),
            ));
        }
        Ok(())
    }
}

pub fn config_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("config"))
}

pub fn data_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("data"))
}

pub fn config_path() -> Result<PathBuf, AppError> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn ensure_dirs() -> Result<(), AppError> {
    fs::create_dir_all(config_dir()?)?;
    fs::create_dir_all(data_dir()?)?;
    Ok(())
}

fn normalize_config(config: &mut AppConfig) -> bool {
    let mut changed = false;

    let mut overrides: Vec<PricingOverride> = Vec::new();
    for mut row in std::mem::take(&mut config.pricing_overrides) {
        let normalized = normalize_model_name(&row.model);
        if normalized != row.model {
            row.model = normalized;
            changed = true;
        }
        // Later entries win.
        if let Some(pos) = overrides.iter().position(|o| o.model == row.model) {
            overrides.remove(pos);
            changed = true;
        }
        overrides.push(row);
    }
    config.pricing_overrides = overrides;

    let before = config.projection.user_counts.clone();
    config.projection.user_counts.sort_unstable();
    config.projection.user_counts.dedup();
    if before != config.projection.user_counts {
        changed = true;
    }

    changed
}

fn load_from(path: &Path, env_prefix: &str) -> Result<AppConfig, AppError> {
    let raw = Config::builder()
        .add_source(File::from(path).format(FileFormat::Toml).required(false))
        .add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let mut parsed: AppConfig = raw.try_deserialize()?;
    if normalize_config(&mut parsed) {
        debug!(path = %path.display(), "normalized model names and user counts");
    }
    parsed.validate()?;
    Ok(parsed)
}

/// Reads `config.toml` with `LLM_TALLY_<SECTION>__<KEY>` environment
/// overrides on top. A missing file yields the defaults.
pub fn load_config() -> Result<AppConfig, AppError> {
    load_from(&config_path()?, ENV_PREFIX)
}

pub fn save_config(config: &AppConfig) -> Result<(), AppError> {
    ensure_dirs()?;
    let path = config_path()?;
    let raw = toml::to_string_pretty(config)?;
    fs::write(path, raw)?;
    Ok(())
}

pub fn ensure_initialized() -> Result<(), AppError> {
    ensure_dirs()?;
    let cfg_path = config_path()?;
    if !Path::new(&cfg_path).exists() {
        save_config(&AppConfig::default())?;
    }
    Ok(())
}
