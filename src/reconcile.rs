//! Rewrites matcher-local cluster ids into the global identifier space.
//!
//! Only used when dataset B was synthesized from the database, so every B row carries the
//! `cluster_id_from_db` of the entity it represents. An A cluster that also contains a B row
//! is a known entity and takes that identifier; every other A cluster is new and receives the
//! next free identifier after `last_known_id`, without gaps.

use crate::dataset::{Dataset, MatchedDataset};
use crate::error::{LinkError, LinkResult};
use crate::models::{ClusterId, CLUSTER_ID_FROM_DB};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Final id of one A row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reassignment {
    pub matcher_id: ClusterId,
    pub final_id: ClusterId,
    /// True when `final_id` was already registered before this run.
    pub reused: bool,
}

#[derive(Debug, Clone)]
pub struct ReconciledAssignment {
    /// Dataset A sorted by matcher id, with final ids in place of the matcher's.
    pub dataset: MatchedDataset,
    /// One entry per row of `dataset`, same order.
    pub assignments: Vec<Reassignment>,
    /// Number of matcher clusters shared between A and B.
    pub found_matches: usize,
}

impl ReconciledAssignment {
    /// Identifiers this run allocates.
    pub fn new_ids(&self) -> BTreeSet<ClusterId> {
        self.assignments.iter().filter(|r| !r.reused).map(|r| r.final_id).collect()
    }

    pub fn reused_ids(&self) -> BTreeSet<ClusterId> {
        self.assignments.iter().filter(|r| r.reused).map(|r| r.final_id).collect()
    }
}

/// Reconcile the matcher's output for A against the database-sourced B.
///
/// `b` is the matcher's annotation of `original_b`, row for row.
pub fn reconcile(
    mut a: MatchedDataset,
    b: &MatchedDataset,
    original_b: &Dataset,
    last_known_id: ClusterId,
) -> LinkResult<ReconciledAssignment> {
    if b.len() != original_b.len() {
        return Err(LinkError::Reconciliation(format!(
            "matcher returned {} rows for B but {} were submitted", b.len(), original_b.len()
        )));
    }
    let db_idx = original_b.column_index(CLUSTER_ID_FROM_DB).ok_or_else(|| {
        LinkError::Reconciliation(format!("comparison dataset has no {} column", CLUSTER_ID_FROM_DB))
    })?;
    let db_ids: BTreeSet<i64> = original_b.rows().iter().filter_map(|r| r[db_idx].as_i64()).collect();

    a.sort_by_cluster_id();

    let mut first_b_row: HashMap<ClusterId, usize> = HashMap::new();
    for (pos, id) in b.cluster_ids.iter().enumerate() {
        first_b_row.entry(*id).or_insert(pos);
    }
    let a_ids = a.distinct_ids();
    let found: Vec<ClusterId> = a_ids.iter().copied().filter(|id| first_b_row.contains_key(id)).collect();
    let k = found.len();
    if k > db_ids.len() {
        return Err(LinkError::Reconciliation(format!(
            "{} clusters matched the database but only {} known identifiers were extracted", k, db_ids.len()
        )));
    }

    let mut mapping: BTreeMap<ClusterId, (ClusterId, bool)> = BTreeMap::new();
    for id in &found {
        let pos = first_b_row[id];
        let cell = &original_b.rows()[pos][db_idx];
        let known = cell.as_i64().map(ClusterId).ok_or_else(|| {
            LinkError::Reconciliation(format!("B row {} matched cluster {} but has {} {:?}", pos, id, CLUSTER_ID_FROM_DB, cell))
        })?;
        if known > last_known_id {
            return Err(LinkError::Reconciliation(format!(
                "B row {} carries {} {} above the last registered identifier {}", pos, CLUSTER_ID_FROM_DB, known, last_known_id
            )));
        }
        mapping.insert(*id, (known, true));
    }

    let mut next = last_known_id;
    let mut off_contract = 0usize;
    let unmatched: Vec<ClusterId> = a_ids.iter().copied().filter(|id| !mapping.contains_key(id)).collect();
    for id in &unmatched {
        next = next.next();
        if id.get() - k as i64 != next.get() {
            off_contract += 1;
        }
        mapping.insert(*id, (next, false));
    }
    if off_contract > 0 {
        log::warn!(
            "{} new clusters did not follow the matcher's id ordering; assigned densely from {}",
            off_contract,
            last_known_id.next()
        );
    }

    let assignments: Vec<Reassignment> = a
        .cluster_ids
        .iter()
        .map(|id| {
            let (final_id, reused) = mapping[id];
            Reassignment { matcher_id: *id, final_id, reused }
        })
        .collect();
    a.cluster_ids = assignments.iter().map(|r| r.final_id).collect();

    let out = ReconciledAssignment { dataset: a, assignments, found_matches: k };
    let new_ids = out.new_ids();
    let range = match (new_ids.first(), new_ids.last()) {
        (Some(lo), Some(hi)) => format!("{}..={}", lo, hi),
        _ => "(none)".to_string(),
    };
    log::info!(
        "Reconciled {} rows: {} clusters reuse known identifiers, {} new identifiers {}",
        out.dataset.len(), k, new_ids.len(), range
    );
    Ok(out)
}
