//! Synthesizes the second comparison dataset from the provider tables already in the database.

use crate::dataset::Dataset;
use crate::db::Gateway;
use crate::error::{LinkError, LinkResult};
use crate::metrics::StageTimer;
use crate::models::{CLUSTER_ID, CLUSTER_ID_FROM_DB, JURISDICTION, LINK_SCORE, LINK_SCORE_FROM_DB};
use rand::Rng;
use tokio::task::JoinSet;

/// Rows one provider table contributed for a jurisdiction.
#[derive(Debug, Clone)]
pub struct ProviderExtract {
    pub table: String,
    pub rows: Dataset,
}

/// Columns present in every extract, in the order of the first one.
pub fn common_columns(extracts: &[ProviderExtract]) -> Vec<String> {
    let Some(first) = extracts.first() else { return Vec::new() };
    first
        .rows
        .columns()
        .iter()
        .filter(|c| extracts[1..].iter().all(|e| e.rows.has_column(c)))
        .cloned()
        .collect()
}

/// Pure half of the extractor: project to the common columns, concatenate, shuffle, keep one
/// row per existing cluster and rename the database annotations out of the matcher's way.
pub fn build_from_extracts<R: Rng + ?Sized>(extracts: Vec<ProviderExtract>, rng: &mut R) -> LinkResult<Dataset> {
    if extracts.is_empty() {
        return Err(LinkError::SchemaMismatch("no provider tables to extract from".into()));
    }
    let common = common_columns(&extracts);
    if common.is_empty() {
        let tables: Vec<&str> = extracts.iter().map(|e| e.table.as_str()).collect();
        return Err(LinkError::SchemaMismatch(format!("provider tables {:?} share no columns", tables)));
    }
    if !common.iter().any(|c| c == CLUSTER_ID) {
        return Err(LinkError::SchemaMismatch(format!("common columns {:?} do not include {}", common, CLUSTER_ID)));
    }
    let mut merged = Dataset::new(common.clone());
    for e in extracts {
        log::debug!("{} contributes {} rows", e.table, e.rows.len());
        merged.append(e.rows.project(&common)?)?;
    }
    let total = merged.len();
    merged.shuffle(rng);
    let dropped = merged.dedup_by_column(CLUSTER_ID)?;
    merged.rename_column(CLUSTER_ID, CLUSTER_ID_FROM_DB);
    merged.rename_column(LINK_SCORE, LINK_SCORE_FROM_DB);
    log::info!(
        "Comparison dataset: {} rows over {} common columns ({} of {} extracted rows dropped as same-cluster duplicates or without cluster)",
        merged.len(), common.len(), dropped, total
    );
    Ok(merged)
}

/// Query every table for `jurisdiction` concurrently, one connection per table. Results are
/// returned in the order of `tables`; tables without a jurisdiction column are skipped.
pub async fn fetch_extracts(gw: &Gateway, jurisdiction: &str, tables: &[String]) -> LinkResult<Vec<ProviderExtract>> {
    let mut set = JoinSet::new();
    for (i, table) in tables.iter().enumerate() {
        let gw = gw.clone();
        let table = table.clone();
        let value = jurisdiction.to_string();
        set.spawn(async move {
            let res = gw.select_where(&table, JURISDICTION, &value).await;
            (i, table, res)
        });
    }
    let mut found: Vec<(usize, ProviderExtract)> = Vec::with_capacity(tables.len());
    while let Some(joined) = set.join_next().await {
        let (i, table, res) = joined.map_err(|e| LinkError::Persistence(format!("extract task failed: {}", e)))?;
        match res? {
            Some(rows) => found.push((i, ProviderExtract { table, rows })),
            None => log::warn!("{} has no {} column; skipped", table, JURISDICTION),
        }
    }
    found.sort_by_key(|(i, _)| *i);
    Ok(found.into_iter().map(|(_, e)| e).collect())
}

pub async fn build_comparison_dataset(gw: &Gateway, jurisdiction: &str, tables: &[String]) -> LinkResult<Dataset> {
    let timer = StageTimer::start("extract");
    let extracts = fetch_extracts(gw, jurisdiction, tables).await?;
    let ds = {
        let mut rng = rand::thread_rng();
        build_from_extracts(extracts, &mut rng)?
    };
    timer.finish(format!("{} tables, jurisdiction {:?}, {} rows", tables.len(), jurisdiction, ds.len()));
    Ok(ds)
}

/// Discover the provider tables and build the comparison dataset for `jurisdiction`.
pub async fn extract_for_jurisdiction(gw: &Gateway, jurisdiction: &str) -> LinkResult<Dataset> {
    let tables = gw.provider_tables().await?;
    log::info!("Found {} provider tables: {:?}", tables.len(), tables);
    build_comparison_dataset(gw, jurisdiction, &tables).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Value;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn extract(table: &str, cols: &[&str], rows: Vec<Vec<Value>>) -> ProviderExtract {
        ProviderExtract {
            table: table.into(),
            rows: Dataset::from_rows(cols.iter().map(|s| s.to_string()).collect(), rows).unwrap(),
        }
    }
    fn t(s: &str) -> Value { Value::Text(s.into()) }

    #[test]
    fn projects_to_common_columns_and_renames() {
        let a = extract(
            "bi_a",
            &["legal_name", "jurisdiction", "cluster_id", "link_score", "phone"],
            vec![vec![t("Acme"), t("gb"), Value::Int(14), Value::Float(0.9), t("123")]],
        );
        let b = extract(
            "bi_b",
            &["cluster_id", "legal_name", "link_score", "jurisdiction"],
            vec![vec![Value::Int(55), t("Globex"), Value::Float(1.0), t("gb")]],
        );
        let ds = build_from_extracts(vec![a, b], &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(ds.columns(), &["legal_name", "jurisdiction", "cluster_id_from_db", "link_score_from_db"].map(String::from)[..]);
        assert_eq!(ds.len(), 2);
    }

    #[test]
    fn keeps_one_row_per_cluster() {
        let rows = vec![
            vec![t("Acme"), Value::Int(14)],
            vec![t("ACME Ltd"), Value::Int(14)],
            vec![t("Globex"), Value::Int(55)],
            vec![t("Orphan"), Value::Null],
        ];
        let ds = build_from_extracts(vec![extract("bi_a", &["legal_name", "cluster_id"], rows)], &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(ds.len(), 2);
        let mut ids: Vec<i64> = ds.column_values(CLUSTER_ID_FROM_DB).unwrap().filter_map(|v| v.as_i64()).collect();
        ids.sort();
        assert_eq!(ids, vec![14, 55]);
    }

    #[test]
    fn already_unique_input_keeps_its_cardinality() {
        let rows: Vec<Vec<Value>> = (0..50).map(|i| vec![t(&format!("c{}", i)), Value::Int(i)]).collect();
        let a = extract("bi_a", &["legal_name", "cluster_id"], rows[..25].to_vec());
        let b = extract("bi_b", &["legal_name", "cluster_id"], rows[25..].to_vec());
        let ds = build_from_extracts(vec![a, b], &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(ds.len(), 50);
    }

    #[test]
    fn disjoint_columns_are_a_schema_mismatch() {
        let a = extract("bi_a", &["x", "cluster_id"], vec![]);
        let b = extract("bi_b", &["y"], vec![]);
        assert!(matches!(build_from_extracts(vec![a, b], &mut StdRng::seed_from_u64(0)), Err(LinkError::SchemaMismatch(_))));
        assert!(matches!(build_from_extracts(vec![], &mut StdRng::seed_from_u64(0)), Err(LinkError::SchemaMismatch(_))));
    }

    #[test]
    fn missing_cluster_column_is_a_schema_mismatch() {
        let a = extract("bi_a", &["legal_name"], vec![vec![t("Acme")]]);
        assert!(matches!(build_from_extracts(vec![a], &mut StdRng::seed_from_u64(0)), Err(LinkError::SchemaMismatch(_))));
    }
}
