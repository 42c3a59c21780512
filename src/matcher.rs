//! Boundary to the external record-linkage routine.
//!
//! The matcher receives two datasets and the first cluster id it may hand out, and annotates
//! every row with a `cluster_id` and a `link_score`. Rows it considers the same entity share
//! an id. The contract relied upon downstream is that ids are handed out in discovery order
//! starting at `starting_id`: clusters pairing an A row with a B row first, singletons after.

use crate::config::{MatcherConfig, TrainingConfig};
use crate::dataset::{Dataset, MatchedDataset};
use crate::error::{LinkError, LinkResult};
use crate::metrics::StageTimer;
use crate::models::ClusterId;
use crate::normalize::{key_indices, row_key};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

pub trait Matcher: Send + Sync {
    fn name(&self) -> &str;

    /// Blocking call; annotate `a` and `b` with cluster ids starting at `starting_id`.
    fn run(&self, a: &Dataset, b: &Dataset, starting_id: ClusterId) -> LinkResult<(MatchedDataset, MatchedDataset)>;
}

pub fn from_config(cfg: &MatcherConfig, training: &TrainingConfig) -> Arc<dyn Matcher> {
    match cfg {
        MatcherConfig::Process { command, args } => Arc::new(ProcessMatcher {
            command: command.clone(),
            args: args.clone(),
            training: training.clone(),
        }),
        MatcherConfig::ExactKey { key_fields } => Arc::new(ExactKeyMatcher { key_fields: key_fields.clone() }),
    }
}

/// Check a matcher's output against its input before anything trusts it.
pub fn validate_output(a: &Dataset, b: &Dataset, out: &(MatchedDataset, MatchedDataset), starting_id: ClusterId) -> LinkResult<()> {
    for (label, input, result) in [("A", a, &out.0), ("B", b, &out.1)] {
        if result.len() != input.len() {
            return Err(LinkError::Matcher(format!(
                "dataset {}: {} rows in, {} rows out", label, input.len(), result.len()
            )));
        }
        if let Some(low) = result.cluster_ids.iter().find(|id| **id < starting_id) {
            return Err(LinkError::Matcher(format!(
                "dataset {}: cluster id {} below starting id {}", label, low, starting_id
            )));
        }
        if let Some(bad) = result.link_scores.iter().find(|s| !s.is_finite()) {
            return Err(LinkError::Matcher(format!("dataset {}: link score {} is not finite", label, bad)));
        }
    }
    Ok(())
}

pub fn run_matcher(m: &dyn Matcher, a: &Dataset, b: &Dataset, starting_id: ClusterId) -> LinkResult<(MatchedDataset, MatchedDataset)> {
    let timer = StageTimer::start("match");
    let out = m.run(a, b, starting_id)?;
    validate_output(a, b, &out, starting_id)?;
    let shared = out.0.distinct_ids().intersection(&out.1.distinct_ids()).count();
    timer.finish(format!("{} matched {} x {} rows, {} cross-dataset clusters", m.name(), a.len(), b.len(), shared));
    Ok(out)
}

/// [`run_matcher`] on the blocking pool, so the runtime keeps serving while the matcher works.
pub async fn run_matcher_blocking(
    m: Arc<dyn Matcher>,
    a: Arc<Dataset>,
    b: Arc<Dataset>,
    starting_id: ClusterId,
) -> LinkResult<(MatchedDataset, MatchedDataset)> {
    tokio::task::spawn_blocking(move || run_matcher(m.as_ref(), &a, &b, starting_id))
        .await
        .map_err(|e| LinkError::Matcher(format!("matcher task panicked or was cancelled: {}", e)))?
}

/// Runs an external program. It is called as
/// `command args... --input-a A.csv --input-b B.csv --output-a OA.csv --output-b OB.csv --starting-id N`
/// (plus `--training-file` / `--settings-file` when configured) and must write both output
/// files with the input rows, in input order, followed by `cluster_id` and `link_score`.
#[derive(Debug, Clone)]
pub struct ProcessMatcher {
    pub command: String,
    pub args: Vec<String>,
    pub training: TrainingConfig,
}

impl ProcessMatcher {
    fn read_annotations(input: &Dataset, path: &Path) -> LinkResult<MatchedDataset> {
        let out = Dataset::read_csv(path)
            .map_err(|e| LinkError::Matcher(format!("cannot read matcher output {}: {}", path.display(), e)))?;
        let annotated = MatchedDataset::from_annotated(out)?;
        if annotated.len() != input.len() {
            return Err(LinkError::Matcher(format!(
                "{}: {} rows in, {} rows out", path.display(), input.len(), annotated.len()
            )));
        }
        // The matcher's copy of the data may have been re-typed on the way through; only its
        // annotations are taken.
        MatchedDataset::new(input.clone(), annotated.cluster_ids, annotated.link_scores)
    }
}

impl Matcher for ProcessMatcher {
    fn name(&self) -> &str { &self.command }

    fn run(&self, a: &Dataset, b: &Dataset, starting_id: ClusterId) -> LinkResult<(MatchedDataset, MatchedDataset)> {
        let dir = tempfile::Builder::new()
            .prefix("backbone_matcher")
            .tempdir()
            .map_err(|e| LinkError::Matcher(format!("cannot create scratch directory: {}", e)))?;
        let path = |name: &str| -> PathBuf { dir.path().join(name) };
        let (in_a, in_b, out_a, out_b) = (path("input_a.csv"), path("input_b.csv"), path("output_a.csv"), path("output_b.csv"));
        for (ds, p) in [(a, &in_a), (b, &in_b)] {
            ds.write_csv(p).map_err(|e| LinkError::Matcher(format!("cannot write {}: {}", p.display(), e)))?;
        }

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .arg("--input-a").arg(&in_a)
            .arg("--input-b").arg(&in_b)
            .arg("--output-a").arg(&out_a)
            .arg("--output-b").arg(&out_b)
            .arg("--starting-id").arg(starting_id.to_string());
        if let Some(f) = &self.training.training_file { cmd.arg("--training-file").arg(f); }
        if let Some(f) = &self.training.settings_file { cmd.arg("--settings-file").arg(f); }

        log::info!("Running matcher {} (starting id {})", self.command, starting_id);
        let output = cmd
            .output()
            .map_err(|e| LinkError::Matcher(format!("cannot start {}: {}", self.command, e)))?;
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            log::debug!("[matcher] {}", line);
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(LinkError::Matcher(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            )));
        }
        Ok((Self::read_annotations(a, &out_a)?, Self::read_annotations(b, &out_b)?))
    }
}

/// One-to-one matcher on normalized key fields, for offline runs and tests. Rows whose keys
/// agree are paired in input order; ids go to pairs first, then unpaired A rows, then unpaired
/// B rows.
#[derive(Debug, Clone)]
pub struct ExactKeyMatcher {
    pub key_fields: Vec<String>,
}

impl Matcher for ExactKeyMatcher {
    fn name(&self) -> &str { "exact_key" }

    fn run(&self, a: &Dataset, b: &Dataset, starting_id: ClusterId) -> LinkResult<(MatchedDataset, MatchedDataset)> {
        let missing = || LinkError::Matcher(format!("key fields {:?} not present in both datasets", self.key_fields));
        let ka = key_indices(a, &self.key_fields).ok_or_else(missing)?;
        let kb = key_indices(b, &self.key_fields).ok_or_else(missing)?;

        let mut by_key: HashMap<String, VecDeque<usize>> = HashMap::new();
        for (j, row) in b.rows().iter().enumerate() {
            if let Some(k) = row_key(row, &kb) { by_key.entry(k).or_default().push_back(j); }
        }
        let mut pairs = Vec::new();
        for (i, row) in a.rows().iter().enumerate() {
            let Some(k) = row_key(row, &ka) else { continue };
            if let Some(j) = by_key.get_mut(&k).and_then(|q| q.pop_front()) {
                pairs.push((i, j));
            }
        }

        let mut ids_a: Vec<Option<ClusterId>> = vec![None; a.len()];
        let mut ids_b: Vec<Option<ClusterId>> = vec![None; b.len()];
        let mut scores_a = vec![0.0; a.len()];
        let mut scores_b = vec![0.0; b.len()];
        let mut next = starting_id;
        for &(i, j) in &pairs {
            ids_a[i] = Some(next);
            ids_b[j] = Some(next);
            scores_a[i] = 1.0;
            scores_b[j] = 1.0;
            next = next.next();
        }
        for slot in ids_a.iter_mut().chain(ids_b.iter_mut()).filter(|s| s.is_none()) {
            *slot = Some(next);
            next = next.next();
        }
        let unwrap_all = |ids: Vec<Option<ClusterId>>| ids.into_iter().flatten().collect::<Vec<_>>();
        Ok((
            MatchedDataset::new(a.clone(), unwrap_all(ids_a), scores_a)?,
            MatchedDataset::new(b.clone(), unwrap_all(ids_b), scores_b)?,
        ))
    }
}
