//! Row-major tabular data passed between the extractor, the matcher and the committer.

use crate::error::{LinkError, LinkResult};
use crate::models::{ClusterId, Value, CLUSTER_ID, LINK_SCORE};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::collections::{BTreeSet, HashSet};
use std::io::{Read, Write};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Dataset {
    pub fn new(columns: Vec<String>) -> Self { Self { columns, rows: Vec::new() } }

    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> LinkResult<Self> {
        let mut ds = Self::new(columns);
        for row in rows { ds.push_row(row)?; }
        Ok(ds)
    }

    pub fn columns(&self) -> &[String] { &self.columns }
    pub fn rows(&self) -> &[Vec<Value>] { &self.rows }
    pub fn len(&self) -> usize { self.rows.len() }
    pub fn is_empty(&self) -> bool { self.rows.is_empty() }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool { self.column_index(name).is_some() }

    pub fn push_row(&mut self, row: Vec<Value>) -> LinkResult<()> {
        if row.len() != self.columns.len() {
            return Err(LinkError::SchemaMismatch(format!(
                "row has {} values but dataset has {} columns", row.len(), self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// All values of one column, in row order.
    pub fn column_values<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a Value> + 'a> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |r| &r[idx]))
    }

    /// Restrict the dataset to `columns`, in the given order.
    pub fn project(&self, columns: &[String]) -> LinkResult<Dataset> {
        let idx: Vec<usize> = columns
            .iter()
            .map(|c| self.column_index(c).ok_or_else(|| LinkError::SchemaMismatch(format!("column {} not present", c))))
            .collect::<LinkResult<_>>()?;
        let rows = self.rows.iter().map(|r| idx.iter().map(|&i| r[i].clone()).collect()).collect();
        Ok(Dataset { columns: columns.to_vec(), rows })
    }

    pub fn rename_column(&mut self, from: &str, to: &str) {
        if let Some(i) = self.column_index(from) { self.columns[i] = to.to_string(); }
    }

    /// Append the rows of `other`; both datasets must have identical column lists.
    pub fn append(&mut self, other: Dataset) -> LinkResult<()> {
        if other.columns != self.columns {
            return Err(LinkError::SchemaMismatch(format!(
                "cannot concatenate datasets with columns {:?} and {:?}", self.columns, other.columns
            )));
        }
        self.rows.extend(other.rows);
        Ok(())
    }

    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) { self.rows.shuffle(rng); }

    /// Keep the first row for each distinct non-null value of `column`; rows with a null key are
    /// dropped. Returns the number of rows removed.
    pub fn dedup_by_column(&mut self, column: &str) -> LinkResult<usize> {
        let idx = self
            .column_index(column)
            .ok_or_else(|| LinkError::SchemaMismatch(format!("column {} not present", column)))?;
        let before = self.rows.len();
        let mut seen = HashSet::new();
        self.rows.retain(|r| match r[idx].as_key() {
            Some(k) => seen.insert(k),
            None => false,
        });
        Ok(before - self.rows.len())
    }

    pub fn read_csv(path: impl AsRef<Path>) -> Result<Dataset, csv::Error> {
        let rdr = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
        Self::from_csv(rdr)
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Dataset, csv::Error> {
        Self::from_csv(csv::ReaderBuilder::new().has_headers(true).from_reader(reader))
    }

    fn from_csv<R: Read>(mut rdr: csv::Reader<R>) -> Result<Dataset, csv::Error> {
        let columns: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let mut rows = Vec::new();
        for rec in rdr.records() {
            let rec = rec?;
            rows.push(rec.iter().map(Value::from_cell).collect());
        }
        Ok(Dataset { columns, rows })
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<(), csv::Error> {
        let w = csv::Writer::from_path(path)?;
        self.write_to(w)
    }

    pub fn to_csv_writer<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        self.write_to(csv::Writer::from_writer(writer))
    }

    fn write_to<W: Write>(&self, mut w: csv::Writer<W>) -> Result<(), csv::Error> {
        w.write_record(&self.columns)?;
        for row in &self.rows {
            w.write_record(row.iter().map(|v| v.to_string()))?;
        }
        w.flush()?;
        Ok(())
    }
}

/// Serialized as a list of records, keys in column order.
impl Serialize for Dataset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.rows.len()))?;
        for row in &self.rows {
            seq.serialize_element(&Record { columns: &self.columns, row })?;
        }
        seq.end()
    }
}

struct Record<'a> {
    columns: &'a [String],
    row: &'a [Value],
}

impl Serialize for Record<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (k, v) in self.columns.iter().zip(self.row) {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// A dataset annotated by the matcher: one cluster id and link score per row.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedDataset {
    pub data: Dataset,
    pub cluster_ids: Vec<ClusterId>,
    pub link_scores: Vec<f64>,
}

impl MatchedDataset {
    pub fn new(data: Dataset, cluster_ids: Vec<ClusterId>, link_scores: Vec<f64>) -> LinkResult<Self> {
        if cluster_ids.len() != data.len() || link_scores.len() != data.len() {
            return Err(LinkError::Matcher(format!(
                "annotation length mismatch: {} rows, {} cluster ids, {} scores",
                data.len(), cluster_ids.len(), link_scores.len()
            )));
        }
        Ok(Self { data, cluster_ids, link_scores })
    }

    /// Split the `cluster_id` and `link_score` columns out of a matcher output file.
    pub fn from_annotated(annotated: Dataset) -> LinkResult<Self> {
        let id_idx = annotated
            .column_index(CLUSTER_ID)
            .ok_or_else(|| LinkError::Matcher(format!("output lacks a {} column", CLUSTER_ID)))?;
        let score_idx = annotated
            .column_index(LINK_SCORE)
            .ok_or_else(|| LinkError::Matcher(format!("output lacks a {} column", LINK_SCORE)))?;
        let keep: Vec<String> = annotated
            .columns()
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != id_idx && *i != score_idx)
            .map(|(_, c)| c.clone())
            .collect();
        let mut cluster_ids = Vec::with_capacity(annotated.len());
        let mut link_scores = Vec::with_capacity(annotated.len());
        for (n, row) in annotated.rows().iter().enumerate() {
            let id = row[id_idx]
                .as_i64()
                .ok_or_else(|| LinkError::Matcher(format!("row {}: {} {:?} is not an integer", n, CLUSTER_ID, row[id_idx])))?;
            let score = match &row[score_idx] {
                Value::Null => 0.0,
                v => v
                    .as_f64()
                    .ok_or_else(|| LinkError::Matcher(format!("row {}: {} {:?} is not numeric", n, LINK_SCORE, v)))?,
            };
            cluster_ids.push(ClusterId(id));
            link_scores.push(score);
        }
        let data = annotated.project(&keep)?;
        Self::new(data, cluster_ids, link_scores)
    }

    pub fn len(&self) -> usize { self.data.len() }
    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    pub fn distinct_ids(&self) -> BTreeSet<ClusterId> { self.cluster_ids.iter().copied().collect() }

    /// Reorder rows by cluster id, ascending. Ties keep their relative order.
    pub fn sort_by_cluster_id(&mut self) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by_key(|&i| self.cluster_ids[i]);
        let rows = order.iter().map(|&i| self.data.rows[i].clone()).collect();
        self.data.rows = rows;
        self.cluster_ids = order.iter().map(|&i| self.cluster_ids[i]).collect();
        self.link_scores = order.iter().map(|&i| self.link_scores[i]).collect();
    }

    /// Dataset with `cluster_id` and `link_score` appended as the last two columns.
    pub fn into_dataset(self) -> Dataset {
        let mut columns = self.data.columns;
        columns.push(CLUSTER_ID.to_string());
        columns.push(LINK_SCORE.to_string());
        let rows = self
            .data
            .rows
            .into_iter()
            .zip(self.cluster_ids)
            .zip(self.link_scores)
            .map(|((mut r, id), score)| {
                r.push(Value::Int(id.get()));
                r.push(Value::Float(score));
                r
            })
            .collect();
        Dataset { columns, rows }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn cols(names: &[&str]) -> Vec<String> { names.iter().map(|s| s.to_string()).collect() }
    fn t(s: &str) -> Value { Value::Text(s.into()) }

    #[test]
    fn csv_reads_empty_cells_as_null() {
        let ds = Dataset::from_csv_reader("name,zip\nAcme,\nGlobex,0273\n".as_bytes()).unwrap();
        assert_eq!(ds.columns(), &cols(&["name", "zip"])[..]);
        assert_eq!(ds.rows()[0][1], Value::Null);
        assert_eq!(ds.rows()[1][1], t("0273"));
    }

    #[test]
    fn csv_write_keeps_leading_zeros() {
        let ds = Dataset::from_rows(cols(&["zip", "name"]), vec![vec![t("007"), t("x")], vec![Value::Null, t("y")]]).unwrap();
        let mut buf = Vec::new();
        ds.to_csv_writer(&mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "zip,name\n007,x\n,y\n");
    }

    #[test]
    fn project_reorders_and_rejects_unknown() {
        let ds = Dataset::from_rows(cols(&["a", "b", "c"]), vec![vec![t("1"), t("2"), t("3")]]).unwrap();
        let p = ds.project(&cols(&["c", "a"])).unwrap();
        assert_eq!(p.rows()[0], vec![t("3"), t("1")]);
        assert!(matches!(ds.project(&cols(&["z"])), Err(LinkError::SchemaMismatch(_))));
    }

    #[test]
    fn dedup_keeps_first_and_drops_null_keys() {
        let mut ds = Dataset::from_rows(
            cols(&["cluster_id", "name"]),
            vec![
                vec![Value::Int(1), t("a")],
                vec![Value::Int(2), t("b")],
                vec![Value::Int(1), t("c")],
                vec![Value::Null, t("d")],
            ],
        )
        .unwrap();
        assert_eq!(ds.dedup_by_column("cluster_id").unwrap(), 2);
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.rows()[0][1], t("a"));
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let rows = (0..20).map(|i| vec![Value::Int(i)]).collect();
        let mut ds = Dataset::from_rows(cols(&["n"]), rows).unwrap();
        ds.shuffle(&mut StdRng::seed_from_u64(7));
        let mut seen: Vec<i64> = ds.rows().iter().map(|r| r[0].as_i64().unwrap()).collect();
        seen.sort();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn annotated_roundtrip_through_matched_dataset() {
        let annotated = Dataset::from_csv_reader("name,cluster_id,link_score\nAcme,101,0.9\nGlobex,100,\n".as_bytes()).unwrap();
        let mut m = MatchedDataset::from_annotated(annotated).unwrap();
        assert_eq!(m.data.columns(), &cols(&["name"])[..]);
        assert_eq!(m.cluster_ids, vec![ClusterId(101), ClusterId(100)]);
        assert_eq!(m.link_scores, vec![0.9, 0.0]);
        m.sort_by_cluster_id();
        assert_eq!(m.data.rows()[0][0], t("Globex"));
        let back = m.into_dataset();
        assert_eq!(back.columns(), &cols(&["name", "cluster_id", "link_score"])[..]);
        assert_eq!(back.rows()[1][1], Value::Int(101));
    }

    #[test]
    fn serializes_as_records() {
        let ds = Dataset::from_rows(cols(&["name", "cluster_id"]), vec![vec![t("Acme"), Value::Int(14)], vec![t("Globex"), Value::Null]]).unwrap();
        let json = serde_json::to_string(&ds).unwrap();
        assert_eq!(json, r#"[{"name":"Acme","cluster_id":14},{"name":"Globex","cluster_id":null}]"#);
    }

    #[test]
    fn annotated_rejects_non_integer_ids() {
        let annotated = Dataset::from_csv_reader("name,cluster_id,link_score\nAcme,abc,0.9\n".as_bytes()).unwrap();
        assert!(matches!(MatchedDataset::from_annotated(annotated), Err(LinkError::Matcher(_))));
    }
}
