use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("cannot read configuration file {path}: {source}")]
    Unreadable { path: String, #[source] source: std::io::Error },
    #[error("malformed configuration document: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Failure taxonomy of a linking run. Every variant is fatal for the run.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("matcher failed: {0}")]
    Matcher(String),
    #[error("identifier reconciliation failed: {0}")]
    Reconciliation(String),
    #[error("persistence failed: {0}")]
    Persistence(String),
}

impl From<sqlx::Error> for LinkError {
    fn from(e: sqlx::Error) -> Self { LinkError::Persistence(e.to_string()) }
}

impl From<csv::Error> for LinkError {
    fn from(e: csv::Error) -> Self { LinkError::Persistence(format!("csv: {}", e)) }
}

impl From<std::io::Error> for LinkError {
    fn from(e: std::io::Error) -> Self { LinkError::Persistence(format!("io: {}", e)) }
}

pub type LinkResult<T> = Result<T, LinkError>;
