use super::connection::{release, Gateway};
use crate::dataset::Dataset;
use crate::error::{LinkError, LinkResult};
use crate::models::{ClusterId, ColumnType, Value, CLUSTER_ID, PROVIDER_TABLE_PREFIX, REGISTRY_KEY, REGISTRY_TABLE};
use sqlx::postgres::{PgConnection, PgRow, Postgres};
use sqlx::{Column, Connection, QueryBuilder, Row, TypeInfo, ValueRef};
use std::collections::{BTreeMap, BTreeSet};

/// PostgreSQL refuses more bind parameters than this in one statement.
const MAX_BINDS: usize = 65_535;
const MAX_ROWS_PER_INSERT: usize = 1_000;

pub(crate) fn validate_ident(name: &str) -> LinkResult<()> {
    let ok = !name.is_empty()
        && name.len() <= 63
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !ok {
        return Err(LinkError::SchemaMismatch(format!("Invalid identifier: {:?}", name)));
    }
    Ok(())
}

fn quoted(name: &str) -> LinkResult<String> {
    validate_ident(name)?;
    Ok(format!("\"{}\"", name))
}

pub fn provider_table_name(provider: &str) -> LinkResult<String> {
    let table = format!("{}{}", PROVIDER_TABLE_PREFIX, provider);
    validate_ident(&table)?;
    Ok(table)
}

/// Column of a live table as reported by `information_schema`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
    pub name: String,
    pub data_type: String,
}

/// SELECT list that only yields types [`decode_row`] understands: NUMERIC is widened to
/// DOUBLE PRECISION, anything exotic is rendered as text.
pub fn build_select_list(cols: &[TableColumn]) -> LinkResult<String> {
    let mut parts = Vec::with_capacity(cols.len());
    for c in cols {
        let q = quoted(&c.name)?;
        let expr = match c.data_type.as_str() {
            "smallint" | "integer" | "bigint" | "real" | "double precision" | "text" | "character varying"
            | "character" => q,
            "numeric" => format!("{q}::double precision AS {q}"),
            _ => format!("{q}::text AS {q}"),
        };
        parts.push(expr);
    }
    Ok(parts.join(", "))
}

pub fn build_create_provider_table(table: &str, columns: &[(String, ColumnType)]) -> LinkResult<String> {
    let mut sql = format!("CREATE TABLE {} (company_id SERIAL PRIMARY KEY", quoted(table)?);
    for (name, ty) in columns {
        sql.push_str(&format!(", {} {}", quoted(name)?, ty.sql()));
    }
    sql.push_str(&format!(
        ", CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) MATCH SIMPLE ON UPDATE NO ACTION ON DELETE NO ACTION)",
        quoted(&format!("{}_cluster_id_fkey", table))?,
        quoted(CLUSTER_ID)?,
        quoted(REGISTRY_TABLE)?,
        quoted(REGISTRY_KEY)?
    ));
    Ok(sql)
}

pub fn rows_per_insert(ncols: usize) -> usize { (MAX_BINDS / ncols.max(1)).clamp(1, MAX_ROWS_PER_INSERT) }

fn decode_row(row: &PgRow) -> LinkResult<Vec<Value>> {
    let mut out = Vec::with_capacity(row.columns().len());
    for (i, col) in row.columns().iter().enumerate() {
        if row.try_get_raw(i)?.is_null() {
            out.push(Value::Null);
            continue;
        }
        let v = match col.type_info().name() {
            "INT2" => Value::Int(row.try_get::<i16, _>(i)? as i64),
            "INT4" => Value::Int(row.try_get::<i32, _>(i)? as i64),
            "INT8" => Value::Int(row.try_get::<i64, _>(i)?),
            "FLOAT4" => Value::Float(row.try_get::<f32, _>(i)? as f64),
            "FLOAT8" => Value::Float(row.try_get::<f64, _>(i)?),
            _ => Value::Text(row.try_get::<String, _>(i)?),
        };
        out.push(v);
    }
    Ok(out)
}

pub async fn table_columns(conn: &mut PgConnection, table: &str) -> LinkResult<Vec<TableColumn>> {
    validate_ident(table)?;
    let rows = sqlx::query(
        r#"SELECT column_name::text AS column_name, data_type::text AS data_type
            FROM information_schema.columns
            WHERE table_schema = 'public' AND table_name = $1
            ORDER BY ordinal_position"#,
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter()
        .map(|r| Ok(TableColumn { name: r.try_get("column_name")?, data_type: r.try_get("data_type")? }))
        .collect()
}

pub async fn list_provider_tables(conn: &mut PgConnection) -> LinkResult<Vec<String>> {
    let rows = sqlx::query(
        "SELECT table_name::text AS table_name FROM information_schema.tables WHERE table_schema = 'public' ORDER BY table_name",
    )
    .fetch_all(&mut *conn)
    .await?;
    let mut names = Vec::new();
    for r in rows {
        let name: String = r.try_get("table_name")?;
        if name.starts_with(PROVIDER_TABLE_PREFIX) { names.push(name); }
    }
    Ok(names)
}

/// All rows of `table` whose `field`, compared as text, equals `value`. `None` when the table
/// has no such column.
pub async fn select_rows_where(conn: &mut PgConnection, table: &str, field: &str, value: &str) -> LinkResult<Option<Dataset>> {
    let cols = table_columns(conn, table).await?;
    if !cols.iter().any(|c| c.name == field) {
        return Ok(None);
    }
    let sql = format!(
        "SELECT {} FROM {} WHERE {}::text = $1",
        build_select_list(&cols)?,
        quoted(table)?,
        quoted(field)?
    );
    let rows = sqlx::query(&sql).bind(value).fetch_all(&mut *conn).await?;
    let mut ds = Dataset::new(cols.into_iter().map(|c| c.name).collect());
    for r in &rows {
        ds.push_row(decode_row(r)?)?;
    }
    Ok(Some(ds))
}

fn push_typed<'q>(b: &mut sqlx::query_builder::Separated<'_, 'q, Postgres, &'static str>, v: &Value, ty: ColumnType) {
    match ty {
        ColumnType::BigInt => { b.push_bind(v.as_i64()); }
        ColumnType::Double => { b.push_bind(v.as_f64()); }
        ColumnType::Varchar => { b.push_bind(v.as_key()); }
    }
}

impl Gateway {
    pub async fn ensure_registry(&self) -> LinkResult<()> {
        let mut conn = self.connect().await?;
        let sql = format!("CREATE TABLE IF NOT EXISTS {} ({} BIGINT PRIMARY KEY)", quoted(REGISTRY_TABLE)?, quoted(REGISTRY_KEY)?);
        let res = sqlx::query(&sql).execute(&mut conn).await;
        release(conn).await;
        res?;
        Ok(())
    }

    /// Highest identifier in the registry; 0 when it is empty.
    pub async fn max_registry_id(&self) -> LinkResult<ClusterId> {
        let mut conn = self.connect().await?;
        let sql = format!("SELECT MAX({})::BIGINT AS max_idx FROM {}", quoted(REGISTRY_KEY)?, quoted(REGISTRY_TABLE)?);
        let res = sqlx::query(&sql).fetch_one(&mut conn).await;
        release(conn).await;
        let max: Option<i64> = res?.try_get("max_idx")?;
        Ok(ClusterId(max.unwrap_or(0)))
    }

    pub async fn provider_tables(&self) -> LinkResult<Vec<String>> {
        let mut conn = self.connect().await?;
        let res = list_provider_tables(&mut conn).await;
        release(conn).await;
        res
    }

    pub async fn select_where(&self, table: &str, field: &str, value: &str) -> LinkResult<Option<Dataset>> {
        let mut conn = self.connect().await?;
        let res = select_rows_where(&mut conn, table, field, value).await;
        release(conn).await;
        res
    }

    /// Rows of every provider table whose `field`, compared as text, equals `value`, keyed by
    /// provider name. Tables without the field are skipped.
    pub async fn search_by_field(&self, field: &str, value: &str) -> LinkResult<BTreeMap<String, Dataset>> {
        validate_ident(field)?;
        let mut conn = self.connect().await?;
        let res = async {
            let mut out = BTreeMap::new();
            for table in list_provider_tables(&mut conn).await? {
                match select_rows_where(&mut conn, &table, field, value).await? {
                    Some(rows) => {
                        log::debug!("[DB] {} rows in {} where {} = {:?}", rows.len(), table, field, value);
                        let provider = table.strip_prefix(PROVIDER_TABLE_PREFIX).unwrap_or(&table).to_string();
                        out.insert(provider, rows);
                    }
                    None => log::debug!("[DB] {} has no column {}; skipped", table, field),
                }
            }
            Ok::<_, LinkError>(out)
        }
        .await;
        release(conn).await;
        res
    }

    /// Register `ids` in one transaction: either all rows land or none.
    pub async fn register_identifiers(&self, ids: &BTreeSet<ClusterId>) -> LinkResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let values: Vec<i64> = ids.iter().map(|c| c.get()).collect();
        let sql = format!(
            "INSERT INTO {} ({}) SELECT * FROM UNNEST($1::BIGINT[])",
            quoted(REGISTRY_TABLE)?,
            quoted(REGISTRY_KEY)?
        );
        let mut conn = self.connect().await?;
        let res = async {
            let mut tx = conn.begin().await?;
            let done = sqlx::query(&sql).bind(values).execute(&mut *tx).await?;
            tx.commit().await?;
            Ok::<u64, sqlx::Error>(done.rows_affected())
        }
        .await;
        release(conn).await;
        res.map_err(|e| LinkError::Persistence(format!("registering {} identifiers rolled back: {}", ids.len(), e)))
    }

    /// Drop, recreate and load `table` in one transaction. `columns` pairs every dataset column
    /// with its SQL type, in dataset order.
    pub async fn rebuild_provider_table(&self, table: &str, columns: &[(String, ColumnType)], data: &Dataset) -> LinkResult<()> {
        let drop_sql = format!("DROP TABLE IF EXISTS {}", quoted(table)?);
        let create_sql = build_create_provider_table(table, columns)?;
        let col_list = columns.iter().map(|(n, _)| quoted(n)).collect::<LinkResult<Vec<_>>>()?.join(", ");
        let insert_head = format!("INSERT INTO {} ({}) ", quoted(table)?, col_list);
        let types: Vec<ColumnType> = columns.iter().map(|(_, t)| *t).collect();
        let chunk = rows_per_insert(types.len());

        let mut conn = self.connect().await?;
        let res = async {
            let mut tx = conn.begin().await?;
            sqlx::query(&drop_sql).execute(&mut *tx).await?;
            sqlx::query(&create_sql).execute(&mut *tx).await?;
            for rows in data.rows().chunks(chunk) {
                let mut qb = QueryBuilder::<Postgres>::new(insert_head.as_str());
                qb.push_values(rows, |mut b, row| {
                    for (v, ty) in row.iter().zip(&types) {
                        push_typed(&mut b, v, *ty);
                    }
                });
                qb.build().execute(&mut *tx).await?;
            }
            tx.commit().await?;
            Ok::<(), sqlx::Error>(())
        }
        .await;
        release(conn).await;
        res.map_err(|e| LinkError::Persistence(format!("materializing {} rolled back: {}", table, e)))
    }
}
