use clap::{Parser, Subcommand};
use crate::config::{AppConfig, DatabaseConfig, DatabaseOnly};
use crate::error::ConfigError;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "backbone_index", version, about = "Link provider company datasets to the backbone index", disable_help_subcommand = true)]
pub struct Cli {
    /// JSON configuration document
    #[arg(long, short = 'c', value_name = "FILE", env = "BI_CONFIG", global = true, default_value = "config.json")]
    pub config: PathBuf,
    /// Overrides database_config.password (env: DB_PASSWORD)
    #[arg(long = "db-password", env = "DB_PASSWORD", hide_env_values = true, global = true)]
    pub db_password: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Match the configured input files and commit the result
    Run,
    /// Write the comparison dataset for a jurisdiction to CSV
    Extract {
        #[arg(long)]
        jurisdiction: String,
        #[arg(long, value_name = "CSV")]
        out: PathBuf,
    },
    /// Print every provider row whose FIELD equals VALUE, grouped by provider, as JSON
    Search {
        #[arg(long)]
        field: String,
        #[arg(long)]
        value: String,
    },
    /// Create the backbone_index registry table if it does not exist
    InitRegistry,
}

impl Cli {
    pub fn to_app_config(&self) -> Result<AppConfig, ConfigError> {
        let mut cfg = AppConfig::load(&self.config)?;
        if let Some(pass) = &self.db_password {
            cfg.database.password = pass.clone();
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Only the database section, for commands that do not run the matcher.
    pub fn to_database_config(&self) -> Result<DatabaseConfig, ConfigError> {
        let mut db = DatabaseOnly::load(&self.config)?;
        if let Some(pass) = &self.db_password {
            db.password = pass.clone();
        }
        Ok(db)
    }
}
