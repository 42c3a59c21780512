use backbone_index::config::{AppConfig, DatabaseConfig, MatcherConfig, SecondDataset, TrainingConfig};
use backbone_index::matcher::{ExactKeyMatcher, Matcher};
use backbone_index::models::ColumnType;
use backbone_index::persist::{materialize_provider_table, prepare_provider_table};
use backbone_index::pipeline::run_with;
use backbone_index::{ClusterId, Dataset, LinkError, LinkResult, LinkStore, MatchedDataset, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Registry and provider tables held in memory, with the same all-or-nothing and foreign key
/// behaviour as the PostgreSQL schema.
#[derive(Default)]
struct MemoryStore {
    registry: Mutex<BTreeSet<ClusterId>>,
    tables: Mutex<BTreeMap<String, (Vec<(String, ColumnType)>, Dataset)>>,
    comparison: Dataset,
}

impl MemoryStore {
    fn with_registry(ids: impl IntoIterator<Item = i64>) -> Self {
        let store = MemoryStore::default();
        store.registry.lock().unwrap().extend(ids.into_iter().map(ClusterId));
        store
    }
    fn registry(&self) -> BTreeSet<ClusterId> { self.registry.lock().unwrap().clone() }
    fn table(&self, name: &str) -> Option<(Vec<(String, ColumnType)>, Dataset)> { self.tables.lock().unwrap().get(name).cloned() }
}

impl LinkStore for MemoryStore {
    async fn last_known_id(&self) -> LinkResult<ClusterId> {
        Ok(self.registry.lock().unwrap().last().copied().unwrap_or(ClusterId(0)))
    }

    async fn comparison_dataset(&self, _jurisdiction: &str) -> LinkResult<Dataset> { Ok(self.comparison.clone()) }

    async fn insert_identifiers(&self, ids: &BTreeSet<ClusterId>) -> LinkResult<u64> {
        let mut reg = self.registry.lock().unwrap();
        if let Some(dup) = ids.iter().find(|id| reg.contains(id)) {
            return Err(LinkError::Persistence(format!("duplicate key {}", dup)));
        }
        reg.extend(ids.iter().copied());
        Ok(ids.len() as u64)
    }

    async fn replace_provider_table(&self, table: &str, columns: &[(String, ColumnType)], data: &Dataset) -> LinkResult<()> {
        let reg = self.registry.lock().unwrap();
        let idx = data.column_index("cluster_id").expect("cluster_id column");
        for row in data.rows() {
            if let Some(id) = row[idx].as_i64() {
                if !reg.contains(&ClusterId(id)) {
                    return Err(LinkError::Persistence(format!("{} violates {}_cluster_id_fkey: {}", table, table, id)));
                }
            }
        }
        self.tables.lock().unwrap().insert(table.to_string(), (columns.to_vec(), data.clone()));
        Ok(())
    }
}

fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
    let p = dir.join(name);
    std::fs::write(&p, body).unwrap();
    p
}

fn config(input_file_1: PathBuf, second: SecondDataset) -> AppConfig {
    AppConfig {
        database: DatabaseConfig { username: "bi".into(), password: String::new(), host: "localhost".into(), port: 5432, database: "backbone".into() },
        input_file_1,
        provider_1_name: "acme".into(),
        second,
        matcher: MatcherConfig::ExactKey { key_fields: vec!["legal_name".into()] },
        training: TrainingConfig::default(),
    }
}

fn by_name() -> Arc<dyn Matcher> { Arc::new(ExactKeyMatcher { key_fields: vec!["legal_name".into()] }) }

fn ids_of(ds: &Dataset) -> Vec<i64> { ds.column_values("cluster_id").unwrap().filter_map(Value::as_i64).collect() }

#[tokio::test]
async fn known_companies_keep_their_identifier() {
    let dir = tempfile::tempdir().unwrap();
    let a = write(dir.path(), "acme.csv", "legal_name,zip\nACME,007\nGlobex,042\nInitech,999\n");
    let mut store = MemoryStore::with_registry(1..=100);
    store.comparison = Dataset::from_rows(
        vec!["legal_name".into(), "cluster_id_from_db".into(), "link_score_from_db".into()],
        vec![
            vec![Value::Text("Acme".into()), Value::Int(14), Value::Float(1.0)],
            vec![Value::Text("Globex".into()), Value::Int(55), Value::Float(0.8)],
        ],
    )
    .unwrap();
    let cfg = config(a, SecondDataset::FromDatabase { jurisdiction: "gb".into() });

    let summary = run_with(&store, &cfg, by_name()).await.unwrap();
    assert_eq!(summary.last_known_id, ClusterId(100));
    assert_eq!(summary.new_identifiers, BTreeSet::from([ClusterId(101)]));
    assert_eq!(summary.reused_identifiers, 2);
    assert_eq!(summary.tables, vec!["bi_acme".to_string()]);
    assert_eq!(store.registry().len(), 101);

    let (columns, rows) = store.table("bi_acme").unwrap();
    assert_eq!(ids_of(&rows), vec![14, 55, 101]);
    assert_eq!(columns[1], ("zip".to_string(), ColumnType::Varchar));
    assert_eq!(rows.rows()[0][1], Value::Text("007".into()));
}

#[tokio::test]
async fn second_file_materializes_both_providers() {
    let dir = tempfile::tempdir().unwrap();
    let a = write(dir.path(), "acme.csv", "legal_name,employees\nAcme,10\nGlobex,20\n");
    let b = write(dir.path(), "globex.csv", "legal_name,employees\nACME,11\nUmbrella,5\n");
    let store = MemoryStore::default();
    let cfg = config(a, SecondDataset::File { path: b, provider_name: "globex".into() });

    let summary = run_with(&store, &cfg, by_name()).await.unwrap();
    assert_eq!(summary.new_identifiers, BTreeSet::from([ClusterId(1), ClusterId(2), ClusterId(3)]));
    assert_eq!(summary.tables, vec!["bi_acme".to_string(), "bi_globex".to_string()]);
    assert_eq!(ids_of(&store.table("bi_acme").unwrap().1), vec![1, 2]);
    assert_eq!(ids_of(&store.table("bi_globex").unwrap().1), vec![1, 3]);
    assert_eq!(store.table("bi_globex").unwrap().0[1], ("employees".to_string(), ColumnType::BigInt));

    // A second run allocates a fresh block and never collides with the first.
    let again = run_with(&store, &cfg, by_name()).await.unwrap();
    assert_eq!(again.last_known_id, ClusterId(3));
    assert_eq!(again.new_identifiers, BTreeSet::from([ClusterId(4), ClusterId(5), ClusterId(6)]));
    assert_eq!(store.registry().len(), 6);
}

struct FailingMatcher;
impl Matcher for FailingMatcher {
    fn name(&self) -> &str { "failing" }
    fn run(&self, _a: &Dataset, _b: &Dataset, _start: ClusterId) -> LinkResult<(MatchedDataset, MatchedDataset)> {
        Err(LinkError::Matcher("exit status 1".into()))
    }
}

/// Hands out ids below the starting id, which must never reach the registry.
struct StaleIdMatcher;
impl Matcher for StaleIdMatcher {
    fn name(&self) -> &str { "stale" }
    fn run(&self, a: &Dataset, b: &Dataset, _start: ClusterId) -> LinkResult<(MatchedDataset, MatchedDataset)> {
        let ma = MatchedDataset::new(a.clone(), vec![ClusterId(1); a.len()], vec![1.0; a.len()])?;
        let mb = MatchedDataset::new(b.clone(), vec![ClusterId(1); b.len()], vec![1.0; b.len()])?;
        Ok((ma, mb))
    }
}

#[tokio::test]
async fn matcher_failures_leave_the_store_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let a = write(dir.path(), "acme.csv", "legal_name\nAcme\n");
    let b = write(dir.path(), "globex.csv", "legal_name\nGlobex\n");
    let store = MemoryStore::with_registry(1..=5);
    let cfg = config(a, SecondDataset::File { path: b, provider_name: "globex".into() });

    let err = run_with(&store, &cfg, Arc::new(FailingMatcher)).await.unwrap_err();
    assert!(matches!(err, LinkError::Matcher(_)));
    let err = run_with(&store, &cfg, Arc::new(StaleIdMatcher)).await.unwrap_err();
    assert!(matches!(err, LinkError::Matcher(_)));

    assert_eq!(store.registry().len(), 5);
    assert!(store.tables.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unreadable_input_is_a_config_error() {
    let store = MemoryStore::default();
    let cfg = config(PathBuf::from("/nonexistent/acme.csv"), SecondDataset::FromDatabase { jurisdiction: "gb".into() });
    let err = run_with(&store, &cfg, by_name()).await.unwrap_err();
    assert!(matches!(err, LinkError::Config(_)));
}

#[tokio::test]
async fn rows_referencing_unregistered_identifiers_are_rejected() {
    let store = MemoryStore::with_registry([1, 2]);
    let data = Dataset::from_rows(vec!["legal_name".into()], vec![vec![Value::Text("Acme".into())]]).unwrap();
    let orphan = MatchedDataset::new(data, vec![ClusterId(7)], vec![1.0]).unwrap();
    let plan = prepare_provider_table("acme", &orphan).unwrap();
    let err = materialize_provider_table(&store, plan).await.unwrap_err();
    assert!(matches!(err, LinkError::Persistence(_)));
    assert!(store.table("bi_acme").is_none());
}

#[tokio::test]
async fn unstorable_headers_fail_before_any_identifier_is_registered() {
    let dir = tempfile::tempdir().unwrap();
    let a = write(dir.path(), "acme.csv", "legal_name,postal code\nAcme,SW1\nGlobex,EC2\n");
    let b = write(dir.path(), "globex.csv", "legal_name\nACME\nUmbrella\n");
    let store = MemoryStore::with_registry(1..=5);
    let cfg = config(a, SecondDataset::File { path: b, provider_name: "globex".into() });

    let err = run_with(&store, &cfg, by_name()).await.unwrap_err();
    assert!(matches!(err, LinkError::SchemaMismatch(_)));
    assert_eq!(store.registry().len(), 5);
    assert!(store.tables.lock().unwrap().is_empty());
}

#[tokio::test]
async fn overlong_provider_name_fails_before_any_identifier_is_registered() {
    let dir = tempfile::tempdir().unwrap();
    let a = write(dir.path(), "acme.csv", "legal_name\nAcme\n");
    let mut store = MemoryStore::with_registry(1..=5);
    store.comparison = Dataset::from_rows(
        vec!["legal_name".into(), "cluster_id_from_db".into()],
        vec![vec![Value::Text("Globex".into()), Value::Int(3)]],
    )
    .unwrap();
    let mut cfg = config(a, SecondDataset::FromDatabase { jurisdiction: "gb".into() });
    cfg.provider_1_name = "p".repeat(61);

    let err = run_with(&store, &cfg, by_name()).await.unwrap_err();
    assert!(matches!(err, LinkError::SchemaMismatch(_)));
    assert_eq!(store.registry().len(), 5);
    assert!(store.tables.lock().unwrap().is_empty());
}
