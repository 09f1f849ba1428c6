use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unknown model '{0}': no pricing entry")]
    UnknownModel(String),

    #[error("no usage data in the selected range")]
    EmptyDataset,

    #[error("schema mismatch in {source_name}: {detail}")]
    SchemaMismatch { source_name: String, detail: String },

    #[error("no input found: {0}")]
    NoInput(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    ConfigSource(#[from] config::ConfigError),

    #[error(transparent)]
    Glob(#[from] glob::PatternError),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),
}

impl AppError {
    pub fn schema(source_name: impl Into<String>, detail: impl Into<String>) -> Self {
        AppError::SchemaMismatch {
            source_name: source_name.into(),
            detail: detail.into(),
        }
    }
}
