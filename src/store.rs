//! Storage seam of the pipeline. [`Gateway`] is the PostgreSQL implementation; tests plug in
//! an in-memory store with the same all-or-nothing behaviour.

use crate::dataset::Dataset;
use crate::db::Gateway;
use crate::error::LinkResult;
use crate::extract::extract_for_jurisdiction;
use crate::models::{ClusterId, ColumnType};
use std::collections::BTreeSet;
use std::future::Future;

pub trait LinkStore {
    /// Highest registered identifier, 0 for an empty registry.
    fn last_known_id(&self) -> impl Future<Output = LinkResult<ClusterId>> + Send;

    /// One representative row per known cluster among provider rows of `jurisdiction`.
    fn comparison_dataset(&self, jurisdiction: &str) -> impl Future<Output = LinkResult<Dataset>> + Send;

    /// Register all of `ids` or none of them. Returns the number of rows written.
    fn insert_identifiers(&self, ids: &BTreeSet<ClusterId>) -> impl Future<Output = LinkResult<u64>> + Send;

    /// Replace `table` with `data`. Must reject rows whose `cluster_id` is not registered,
    /// leaving any previous table in place.
    fn replace_provider_table(
        &self,
        table: &str,
        columns: &[(String, ColumnType)],
        data: &Dataset,
    ) -> impl Future<Output = LinkResult<()>> + Send;
}

impl LinkStore for Gateway {
    async fn last_known_id(&self) -> LinkResult<ClusterId> { self.max_registry_id().await }

    async fn comparison_dataset(&self, jurisdiction: &str) -> LinkResult<Dataset> {
        extract_for_jurisdiction(self, jurisdiction).await
    }

    async fn insert_identifiers(&self, ids: &BTreeSet<ClusterId>) -> LinkResult<u64> {
        let n = self.register_identifiers(ids).await?;
        log::info!("[DB] Registered {} new identifiers", n);
        Ok(n)
    }

    async fn replace_provider_table(&self, table: &str, columns: &[(String, ColumnType)], data: &Dataset) -> LinkResult<()> {
        self.rebuild_provider_table(table, columns, data).await?;
        log::info!("[DB] Materialized {} with {} rows", table, data.len());
        Ok(())
    }
}
