//! One linking run: extract, match, reconcile, commit.

use crate::config::{AppConfig, SecondDataset};
use crate::dataset::Dataset;
use crate::db::Gateway;
use crate::error::{ConfigError, LinkResult};
use crate::matcher::{self, run_matcher_blocking, Matcher};
use crate::models::{ClusterId, CLUSTER_ID, LINK_SCORE};
use crate::persist::{commit_new_identifiers, materialize_provider_table, prepare_provider_table, SURROGATE_KEY};
use crate::reconcile::reconcile;
use crate::store::LinkStore;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub last_known_id: ClusterId,
    pub new_identifiers: BTreeSet<ClusterId>,
    /// Clusters of dataset A that kept an identifier already in the registry.
    pub reused_identifiers: usize,
    pub tables: Vec<String>,
}

/// Read a provider CSV. Annotation columns left over from an earlier run are dropped since
/// the matcher assigns them afresh.
pub fn load_provider_file(path: &Path, field: &'static str) -> LinkResult<Dataset> {
    let ds = Dataset::read_csv(path)
        .map_err(|e| ConfigError::InvalidValue { field, reason: format!("{}: {}", path.display(), e) })?;
    let keep: Vec<String> = ds
        .columns()
        .iter()
        .filter(|c| ![CLUSTER_ID, LINK_SCORE, SURROGATE_KEY].contains(&c.as_str()))
        .cloned()
        .collect();
    if keep.is_empty() {
        return Err(ConfigError::InvalidValue { field, reason: format!("{} has no data columns", path.display()) }.into());
    }
    log::info!("Loaded {} rows x {} columns from {}", ds.len(), keep.len(), path.display());
    if keep.len() == ds.columns().len() {
        return Ok(ds);
    }
    log::warn!("{}: dropping existing {}/{}/{} columns", path.display(), CLUSTER_ID, LINK_SCORE, SURROGATE_KEY);
    ds.project(&keep)
}

/// Run against PostgreSQL with the matcher named in `cfg`.
pub async fn run(cfg: &AppConfig) -> LinkResult<RunSummary> {
    let gw = Gateway::new(cfg.database.clone());
    gw.ensure_registry().await?;
    let m = matcher::from_config(&cfg.matcher, &cfg.training);
    run_with(&gw, cfg, m).await
}

pub async fn run_with<S: LinkStore + Sync>(store: &S, cfg: &AppConfig, m: Arc<dyn Matcher>) -> LinkResult<RunSummary> {
    let last_known_id = store.last_known_id().await?;
    log::info!("Last registered identifier: {}", last_known_id);
    let a = Arc::new(load_provider_file(&cfg.input_file_1, "input_file_1")?);

    let summary = match &cfg.second {
        SecondDataset::FromDatabase { jurisdiction } => {
            let b = Arc::new(store.comparison_dataset(jurisdiction).await?);
            let (ma, mb) = run_matcher_blocking(m, a, b.clone(), last_known_id.next()).await?;
            let reconciled = reconcile(ma, &mb, &b, last_known_id)?;
            let reused_identifiers = reconciled.found_matches;
            let plan = prepare_provider_table(&cfg.provider_1_name, &reconciled.dataset)?;
            let new_identifiers = commit_new_identifiers(store, &reconciled.dataset, None, last_known_id).await?;
            let table = materialize_provider_table(store, plan).await?;
            RunSummary { last_known_id, new_identifiers, reused_identifiers, tables: vec![table] }
        }
        SecondDataset::File { path, provider_name } => {
            let b = Arc::new(load_provider_file(path, "input_file_2")?);
            let (ma, mb) = run_matcher_blocking(m, a, b, last_known_id.next()).await?;
            let plans = [prepare_provider_table(&cfg.provider_1_name, &ma)?, prepare_provider_table(provider_name, &mb)?];
            let new_identifiers = commit_new_identifiers(store, &ma, Some(&mb), last_known_id).await?;
            let mut tables = Vec::with_capacity(plans.len());
            for plan in plans {
                tables.push(materialize_provider_table(store, plan).await?);
            }
            RunSummary { last_known_id, new_identifiers, reused_identifiers: 0, tables }
        }
    };
    log::info!(
        "Run complete: {} new identifiers, {} reused, tables {:?}",
        summary.new_identifiers.len(),
        summary.reused_identifiers,
        summary.tables
    );
    Ok(summary)
}
