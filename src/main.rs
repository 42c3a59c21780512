use anyhow::{Context, Result};
use backbone_index::cli::{Cli, Command};
use backbone_index::db::Gateway;
use backbone_index::extract::extract_for_jurisdiction;
use backbone_index::pipeline;
use clap::Parser;
use env_logger::Env;
use log::{error, info};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Command::Run => {
            let cfg = cli.to_app_config().with_context(|| format!("loading {}", cli.config.display()))?;
            info!(
                "Connecting to PostgreSQL at {}:{} / db {}",
                cfg.database.host, cfg.database.port, cfg.database.database
            );
            let summary = pipeline::run(&cfg).await.context("linking run failed")?;
            println!(
                "Registered {} new identifiers after {}; {} clusters reused known identifiers; tables: {}",
                summary.new_identifiers.len(),
                summary.last_known_id,
                summary.reused_identifiers,
                summary.tables.join(", ")
            );
        }
        Command::Extract { jurisdiction, out } => {
            let db = cli.to_database_config().with_context(|| format!("loading {}", cli.config.display()))?;
            let gw = Gateway::new(db);
            let ds = extract_for_jurisdiction(&gw, jurisdiction).await.context("extracting comparison dataset")?;
            ds.write_csv(out).with_context(|| format!("writing {}", out.display()))?;
            println!("Wrote {} rows to {}", ds.len(), out.display());
        }
        Command::Search { field, value } => {
            let db = cli.to_database_config().with_context(|| format!("loading {}", cli.config.display()))?;
            let gw = Gateway::new(db);
            let found = gw.search_by_field(field, value).await.context("search failed")?;
            println!("{}", serde_json::to_string_pretty(&found)?);
        }
        Command::InitRegistry => {
            let db = cli.to_database_config().with_context(|| format!("loading {}", cli.config.display()))?;
            let gw = Gateway::new(db);
            gw.ensure_registry().await.context("creating registry table")?;
            let last = gw.max_registry_id().await?;
            println!("Registry ready; last identifier {}", last);
        }
    }
    Ok(())
}
