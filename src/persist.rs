//! Commits the outcome of a run: new identifiers first, then the provider tables that
//! reference them. Table plans are prepared before anything is written, so a dataset that
//! cannot be stored never leaves identifiers behind in the registry.

use crate::dataset::{Dataset, MatchedDataset};
use crate::error::{LinkError, LinkResult};
use crate::metrics::StageTimer;
use crate::models::{ClusterId, ColumnType, Value, CLUSTER_ID, LINK_SCORE};
use crate::store::LinkStore;
use crate::db::provider_table_name;
use crate::db::schema::validate_ident;
use std::collections::BTreeSet;

/// Primary key column every provider table gets; datasets may not bring their own.
pub const SURROGATE_KEY: &str = "company_id";

/// Ids of `a` (and `b`) above `last_known_id`. They must form exactly
/// `last_known_id + 1 ..= last_known_id + n`.
pub fn new_identifiers(a: &MatchedDataset, b: Option<&MatchedDataset>, last_known_id: ClusterId) -> LinkResult<BTreeSet<ClusterId>> {
    let mut ids = a.distinct_ids();
    if let Some(b) = b {
        ids.extend(b.distinct_ids());
    }
    let fresh: BTreeSet<ClusterId> = ids.into_iter().filter(|id| *id > last_known_id).collect();
    if let (Some(lo), Some(hi)) = (fresh.first(), fresh.last()) {
        let expected_hi = last_known_id.get() + fresh.len() as i64;
        if lo.get() != last_known_id.get() + 1 || hi.get() != expected_hi {
            return Err(LinkError::Reconciliation(format!(
                "new identifiers {}..={} ({} distinct) are not the contiguous run {}..={}",
                lo, hi, fresh.len(), last_known_id.next(), expected_hi
            )));
        }
    }
    Ok(fresh)
}

/// Register the identifiers first seen in this run, all in one transaction.
pub async fn commit_new_identifiers<S: LinkStore>(
    store: &S,
    a: &MatchedDataset,
    b: Option<&MatchedDataset>,
    last_known_id: ClusterId,
) -> LinkResult<BTreeSet<ClusterId>> {
    let timer = StageTimer::start("commit");
    let fresh = new_identifiers(a, b, last_known_id)?;
    if fresh.is_empty() {
        log::info!("No new identifiers to register");
        return Ok(fresh);
    }
    let written = store.insert_identifiers(&fresh).await?;
    if written != fresh.len() as u64 {
        return Err(LinkError::Persistence(format!("registry accepted {} of {} identifiers", written, fresh.len())));
    }
    timer.finish(format!("{} identifiers registered after {}", fresh.len(), last_known_id));
    Ok(fresh)
}

fn has_leading_zero(s: &str) -> bool {
    s.len() > 1 && s.starts_with('0') && s.bytes().all(|b| b.is_ascii_digit())
}

/// SQL type for a column: integers stay BIGINT, any float widens to DOUBLE PRECISION,
/// anything else (or nothing but nulls) is VARCHAR. A digit string with a leading zero
/// forces VARCHAR so codes like `007` survive.
pub fn infer_column_type<'a>(values: impl IntoIterator<Item = &'a Value>) -> ColumnType {
    let mut seen = false;
    let mut all_int = true;
    for v in values {
        match v {
            Value::Null => continue,
            Value::Int(_) => {}
            Value::Float(f) => {
                if !f.is_finite() { return ColumnType::Varchar; }
                all_int = false;
            }
            Value::Text(s) => {
                let s = s.trim();
                if has_leading_zero(s) { return ColumnType::Varchar; }
                if s.parse::<i64>().is_err() {
                    match s.parse::<f64>() {
                        Ok(f) if f.is_finite() => all_int = false,
                        _ => return ColumnType::Varchar,
                    }
                }
            }
        }
        seen = true;
    }
    match (seen, all_int) {
        (false, _) => ColumnType::Varchar,
        (true, true) => ColumnType::BigInt,
        (true, false) => ColumnType::Double,
    }
}

/// Column names and types for `data` as it will be written.
pub fn plan_columns(data: &Dataset) -> LinkResult<Vec<(String, ColumnType)>> {
    if !data.has_column(CLUSTER_ID) {
        return Err(LinkError::SchemaMismatch(format!("dataset has no {} column", CLUSTER_ID)));
    }
    let mut out = Vec::with_capacity(data.columns().len());
    for name in data.columns() {
        if name.eq_ignore_ascii_case(SURROGATE_KEY) {
            return Err(LinkError::SchemaMismatch(format!("column {} is reserved for the table key", SURROGATE_KEY)));
        }
        validate_ident(name)?;
        let ty = match name.as_str() {
            CLUSTER_ID => ColumnType::BigInt,
            LINK_SCORE => ColumnType::Double,
            _ => infer_column_type(data.column_values(name).into_iter().flatten()),
        };
        out.push((name.clone(), ty));
    }
    Ok(out)
}

/// A provider table checked and typed, ready to be written.
#[derive(Debug, Clone)]
pub struct TablePlan {
    pub table: String,
    pub columns: Vec<(String, ColumnType)>,
    pub data: Dataset,
}

/// Name, validate and type `bi_<provider>` for the annotated dataset without touching storage.
pub fn prepare_provider_table(provider: &str, data: &MatchedDataset) -> LinkResult<TablePlan> {
    let table = provider_table_name(provider)?;
    let data = data.clone().into_dataset();
    let columns = plan_columns(&data)?;
    log::debug!("{} columns: {:?}", table, columns);
    Ok(TablePlan { table, columns, data })
}

/// Replace the planned table with its dataset. Returns the table name.
pub async fn materialize_provider_table<S: LinkStore>(store: &S, plan: TablePlan) -> LinkResult<String> {
    let timer = StageTimer::start("materialize");
    store.replace_provider_table(&plan.table, &plan.columns, &plan.data).await?;
    timer.finish(format!("{} rows into {}", plan.data.len(), plan.table));
    Ok(plan.table)
}
