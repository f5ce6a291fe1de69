use crate::adapter::{check_field_kinds, BackendAdapter, Capabilities, Extent};
use crate::duck;
use duckdb::types::Value as DuckValue;
use duckdb::{params, params_from_iter, Connection};
use parking_lot::Mutex;
use std::path::Path;
use tc_types::keys::validate_sql_identifier;
use tc_types::series::{TICKER_COLUMN, TS_COLUMN};
use tc_types::{
    BackendKind, Column, ColumnData, FieldKind, ResultExt, StoreError, StoreLocation, TickSeries,
    TimeRange,
};

/// Embedded DuckDB time-series database: one SQL table per logical table holding
/// `(ticker, ts_ns, <fields...>)`.
pub struct ColumnarStore {
    conn: Mutex<Connection>,
    label: String,
}

fn sql_type(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Float => "DOUBLE",
        FieldKind::Text => "VARCHAR",
    }
}

fn kind_of(data_type: &str) -> FieldKind {
    match data_type.to_ascii_uppercase().as_str() {
        "VARCHAR" | "TEXT" | "STRING" => FieldKind::Text,
        _ => FieldKind::Float,
    }
}

/// Field columns of `table` in ordinal order; empty when the table does not exist.
fn table_fields(conn: &Connection, table: &str) -> duckdb::Result<Vec<(String, FieldKind)>> {
    let mut q = conn.prepare(
        "SELECT column_name, data_type
           FROM information_schema.columns
          WHERE table_schema = 'main' AND table_name = ?
          ORDER BY ordinal_position",
    )?;
    let mut rows = q.query(params![table])?;
    let mut out = Vec::new();
    while let Some(r) = rows.next()? {
        let name: String = r.get(0)?;
        let ty: String = r.get(1)?;
        if name != TICKER_COLUMN && name != TS_COLUMN {
            out.push((name, kind_of(&ty)));
        }
    }
    Ok(out)
}

fn table_exists(conn: &Connection, table: &str) -> duckdb::Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = 'main' AND table_name = ?",
        params![table],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

/// Creates the table if needed and adds columns the incoming series introduces.
fn ensure_table(conn: &Connection, loc: &StoreLocation, series: &TickSeries) -> Result<(), StoreError> {
    let table = &loc.table;
    if !table_exists(conn, table).read_ctx(loc, "table_exists")? {
        conn.execute_batch(&format!(
            r#"CREATE TABLE "{table}" ("{TICKER_COLUMN}" VARCHAR NOT NULL, "{TS_COLUMN}" BIGINT NOT NULL)"#
        ))
        .write_ctx(loc, "create_table")?;
    }
    let stored = table_fields(conn, table).read_ctx(loc, "table_fields")?;
    check_field_kinds(loc, &stored, series)?;
    for col in series.columns() {
        validate_sql_identifier(&col.name)?;
        if stored.iter().any(|(n, _)| *n == col.name) {
            continue;
        }
        conn.execute_batch(&format!(
            r#"ALTER TABLE "{table}" ADD COLUMN "{}" {}"#,
            col.name,
            sql_type(col.data.kind())
        ))
        .write_ctx(loc, "add_column")?;
        tracing::debug!(location=%loc, column=%col.name, "added column");
    }
    Ok(())
}

fn cell(col: &Column, row: usize, stored: FieldKind) -> DuckValue {
    match (&col.data, stored) {
        (ColumnData::Float(v), FieldKind::Float) => v[row].map_or(DuckValue::Null, DuckValue::Double),
        (ColumnData::Float(v), FieldKind::Text) => {
            v[row].map_or(DuckValue::Null, |x| DuckValue::Text(x.to_string()))
        }
        (ColumnData::Text(v), _) => v[row].clone().map_or(DuckValue::Null, DuckValue::Text),
    }
}

fn insert_rows(conn: &Connection, loc: &StoreLocation, series: &TickSeries) -> Result<(), StoreError> {
    if series.is_empty() {
        return Ok(());
    }
    let stored = table_fields(conn, &loc.table).read_ctx(loc, "table_fields")?;
    let kinds: Vec<FieldKind> = series
        .columns()
        .iter()
        .map(|c| {
            stored
                .iter()
                .find(|(n, _)| *n == c.name)
                .map_or(c.data.kind(), |(_, k)| *k)
        })
        .collect();
    let mut names = vec![format!(r#""{TICKER_COLUMN}""#), format!(r#""{TS_COLUMN}""#)];
    names.extend(series.columns().iter().map(|c| format!(r#""{}""#, c.name)));
    let placeholders = vec!["?"; names.len()].join(", ");
    let sql = format!(
        r#"INSERT INTO "{}" ({}) VALUES ({placeholders})"#,
        loc.table,
        names.join(", ")
    );
    let mut stmt = conn.prepare(&sql).write_ctx(loc, "prepare_insert")?;
    for (row, ts) in series.timestamps().iter().enumerate() {
        let mut values = Vec::with_capacity(names.len());
        values.push(DuckValue::Text(loc.ticker.clone()));
        values.push(DuckValue::BigInt(*ts));
        for (col, kind) in series.columns().iter().zip(&kinds) {
            values.push(cell(col, row, *kind));
        }
        stmt.execute(params_from_iter(values)).write_ctx(loc, "insert")?;
    }
    Ok(())
}

impl ColumnarStore {
    /// `None` opens an in-memory database.
    pub fn open(db_file: Option<&Path>) -> Result<Self, StoreError> {
        let label = db_file.map_or_else(|| ":memory:".to_string(), |p| p.display().to_string());
        if let Some(parent) = db_file.and_then(Path::parent) {
            std::fs::create_dir_all(parent).write_ctx(&label, "open")?;
        }
        let conn = duck::connect(db_file).write_ctx(&label, "open")?;
        Ok(Self {
            conn: Mutex::new(conn),
            label,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl BackendAdapter for ColumnarStore {
    fn kind(&self) -> BackendKind {
        BackendKind::ColumnarDb
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_range_delete: true,
        }
    }

    fn drop_table(&self, table: &str) -> Result<(), StoreError> {
        validate_sql_identifier(table)?;
        let conn = self.conn.lock();
        conn.execute_batch(&format!(r#"DROP TABLE IF EXISTS "{table}""#))
            .write_ctx(table, "drop_table")?;
        tracing::info!(table, db=%self.label, "dropped table");
        Ok(())
    }

    fn replace_ticker(&self, loc: &StoreLocation, series: &TickSeries) -> Result<usize, StoreError> {
        validate_sql_identifier(&loc.table)?;
        let conn = self.conn.lock();
        ensure_table(&conn, loc, series)?;
        let tx = conn.unchecked_transaction().write_ctx(loc, "begin")?;
        tx.execute(
            &format!(r#"DELETE FROM "{}" WHERE "{TICKER_COLUMN}" = ?"#, loc.table),
            params![loc.ticker],
        )
        .write_ctx(loc, "delete_ticker")?;
        insert_rows(&tx, loc, series)?;
        tx.commit().write_ctx(loc, "commit")?;
        Ok(series.len())
    }

    fn append_rows(&self, loc: &StoreLocation, series: &TickSeries) -> Result<usize, StoreError> {
        validate_sql_identifier(&loc.table)?;
        let conn = self.conn.lock();
        ensure_table(&conn, loc, series)?;
        let tx = conn.unchecked_transaction().write_ctx(loc, "begin")?;
        insert_rows(&tx, loc, series)?;
        tx.commit().write_ctx(loc, "commit")?;
        Ok(series.len())
    }

    fn read_range(&self, loc: &StoreLocation, range: &TimeRange) -> Result<TickSeries, StoreError> {
        validate_sql_identifier(&loc.table)?;
        let conn = self.conn.lock();
        if !table_exists(&conn, &loc.table).read_ctx(loc, "table_exists")? {
            return Ok(TickSeries::empty());
        }
        let fields = table_fields(&conn, &loc.table).read_ctx(loc, "table_fields")?;
        let mut select = vec![format!(r#""{TS_COLUMN}""#)];
        select.extend(fields.iter().map(|(n, _)| format!(r#""{n}""#)));
        let sql = format!(
            r#"SELECT {} FROM "{}" WHERE "{TICKER_COLUMN}" = ? AND "{TS_COLUMN}" BETWEEN ? AND ? ORDER BY "{TS_COLUMN}""#,
            select.join(", "),
            loc.table
        );
        let mut stmt = conn.prepare(&sql).read_ctx(loc, "prepare_select")?;
        let mut rows = stmt
            .query(params![loc.ticker, range.start_ns(), range.finish_ns()])
            .read_ctx(loc, "select")?;

        let mut timestamps = Vec::new();
        let mut data: Vec<ColumnData> = fields.iter().map(|(_, k)| ColumnData::nulls(*k, 0)).collect();
        while let Some(r) = rows.next().read_ctx(loc, "select")? {
            timestamps.push(r.get::<_, i64>(0).read_ctx(loc, "decode")?);
            for (i, col) in data.iter_mut().enumerate() {
                match col {
                    ColumnData::Float(v) => v.push(r.get::<_, Option<f64>>(i + 1).read_ctx(loc, "decode")?),
                    ColumnData::Text(v) => v.push(r.get::<_, Option<String>>(i + 1).read_ctx(loc, "decode")?),
                }
            }
        }
        let columns = fields
            .into_iter()
            .zip(data)
            .map(|((name, _), d)| Column::new(name, d))
            .collect();
        TickSeries::new(timestamps, columns)
    }

    fn extent(&self, loc: &StoreLocation) -> Result<Option<Extent>, StoreError> {
        validate_sql_identifier(&loc.table)?;
        let conn = self.conn.lock();
        if !table_exists(&conn, &loc.table).read_ctx(loc, "table_exists")? {
            return Ok(None);
        }
        let row: (Option<i64>, Option<i64>, i64) = conn
            .query_row(
                &format!(
                    r#"SELECT MIN("{TS_COLUMN}"), MAX("{TS_COLUMN}"), COUNT(*) FROM "{}" WHERE "{TICKER_COLUMN}" = ?"#,
                    loc.table
                ),
                params![loc.ticker],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .read_ctx(loc, "extent")?;
        Ok(match row {
            (Some(min), Some(max), rows) => Some(Extent {
                min_ts_ns: min,
                max_ts_ns: max,
                rows: rows.max(0) as u64,
            }),
            _ => None,
        })
    }

    fn delete_range_native(&self, loc: &StoreLocation, range: &TimeRange) -> Result<usize, StoreError> {
        validate_sql_identifier(&loc.table)?;
        let conn = self.conn.lock();
        if !table_exists(&conn, &loc.table).read_ctx(loc, "table_exists")? {
            return Ok(0);
        }
        conn.execute(
            &format!(
                r#"DELETE FROM "{}" WHERE "{TICKER_COLUMN}" = ? AND "{TS_COLUMN}" BETWEEN ? AND ?"#,
                loc.table
            ),
            params![loc.ticker, range.start_ns(), range.finish_ns()],
        )
        .write_ctx(loc, "delete_range")
    }
}
