use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    #[serde(rename = "database_name")]
    pub database: String,
}

impl DatabaseConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() { return Err(ConfigError::MissingField("database_config.host")); }
        if self.username.trim().is_empty() { return Err(ConfigError::MissingField("database_config.username")); }
        if self.database.trim().is_empty() { return Err(ConfigError::MissingField("database_config.database_name")); }
        if self.port == 0 {
            return Err(ConfigError::InvalidValue { field: "database_config.port", reason: "out of range".into() });
        }
        Ok(())
    }
}

/// How the external matcher is reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatcherConfig {
    /// Spawn `command args...` with the dataset file arguments appended.
    Process { command: String, #[serde(default)] args: Vec<String> },
    /// Built-in one-to-one matcher on normalized key fields.
    ExactKey { key_fields: Vec<String> },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default)]
    pub training_file: Option<PathBuf>,
    #[serde(default)]
    pub settings_file: Option<PathBuf>,
}

/// Where dataset B of the comparison comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum SecondDataset {
    /// A second provider file; both outputs are materialized.
    File { path: PathBuf, provider_name: String },
    /// Synthesized from the provider tables already in the database.
    FromDatabase { jurisdiction: String },
}

/// Validated, immutable run configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub input_file_1: PathBuf,
    pub provider_1_name: String,
    pub second: SecondDataset,
    pub matcher: MatcherConfig,
    pub training: TrainingConfig,
}

/// Configuration document as written by users. Optional keys are resolved by [`RawConfig::into_app_config`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    pub database_config: DatabaseConfig,
    pub input_file_1: Option<String>,
    #[serde(default)]
    pub input_file_2: Option<String>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    pub provider_1_name: Option<String>,
    #[serde(default)]
    pub provider_2_name: Option<String>,
    pub matcher: Option<MatcherConfig>,
    #[serde(default)]
    pub training: TrainingConfig,
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn valid_provider_name(field: &'static str, name: &str) -> Result<(), ConfigError> {
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ConfigError::InvalidValue { field, reason: format!("{:?} may only contain [A-Za-z0-9_]", name) });
    }
    Ok(())
}

impl RawConfig {
    pub fn into_app_config(self) -> Result<AppConfig, ConfigError> {
        let input_file_1 = non_empty(self.input_file_1).ok_or(ConfigError::MissingField("input_file_1"))?;
        let provider_1_name = non_empty(self.provider_1_name).ok_or(ConfigError::MissingField("provider_1_name"))?;
        valid_provider_name("provider_1_name", &provider_1_name)?;
        let second = match non_empty(self.input_file_2) {
            Some(path) => {
                if !path.to_ascii_lowercase().ends_with(".csv") {
                    return Err(ConfigError::InvalidValue { field: "input_file_2", reason: format!("{} is not a .csv file", path) });
                }
                let provider_name = non_empty(self.provider_2_name).ok_or(ConfigError::MissingField("provider_2_name"))?;
                valid_provider_name("provider_2_name", &provider_name)?;
                if provider_name == provider_1_name {
                    return Err(ConfigError::InvalidValue { field: "provider_2_name", reason: "must differ from provider_1_name".into() });
                }
                SecondDataset::File { path: PathBuf::from(path), provider_name }
            }
            None => SecondDataset::FromDatabase {
                jurisdiction: non_empty(self.jurisdiction).ok_or(ConfigError::MissingField("jurisdiction"))?,
            },
        };
        let matcher = self.matcher.ok_or(ConfigError::MissingField("matcher"))?;
        let cfg = AppConfig {
            database: self.database_config,
            input_file_1: PathBuf::from(input_file_1),
            provider_1_name,
            second,
            matcher,
            training: self.training,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

impl AppConfig {
    pub fn from_json_str(s: &str) -> Result<AppConfig, ConfigError> {
        let raw: RawConfig = serde_json::from_str(s)?;
        raw.into_app_config()
    }

    pub fn load(path: &Path) -> Result<AppConfig, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Unreadable { path: path.display().to_string(), source })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        match &self.matcher {
            MatcherConfig::Process { command, .. } if command.trim().is_empty() => {
                return Err(ConfigError::MissingField("matcher.command"));
            }
            MatcherConfig::ExactKey { key_fields } if key_fields.is_empty() => {
                return Err(ConfigError::MissingField("matcher.key_fields"));
            }
            _ => {}
        }
        Ok(())
    }
}

/// Database-only configuration used by the query and bootstrap commands, which do not need
/// input files or a matcher.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseOnly {
    pub database_config: DatabaseConfig,
}

impl DatabaseOnly {
    pub fn load(path: &Path) -> Result<DatabaseConfig, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Unreadable { path: path.display().to_string(), source })?;
        let doc: DatabaseOnly = serde_json::from_str(&text)?;
        doc.database_config.validate()?;
        Ok(doc.database_config)
    }
}
