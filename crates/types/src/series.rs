//! Column-oriented tick series shared by readers, adapters and the loader.

use crate::error::StoreError;
use crate::time::TimeRange;
use serde::Serialize;
use strum_macros::{Display, EnumString};

/// Storage name of the timestamp column.
pub const TS_COLUMN: &str = "ts_ns";
/// Storage name of the ticker discriminator column in shared tables. Sources may carry
/// it; stores refuse it as a field.
pub const TICKER_COLUMN: &str = "ticker";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FieldKind {
    Float,
    Text,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Float(f64),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Float(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl ColumnData {
    pub fn nulls(kind: FieldKind, len: usize) -> Self {
        match kind {
            FieldKind::Float => ColumnData::Float(vec![None; len]),
            FieldKind::Text => ColumnData::Text(vec![None; len]),
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            ColumnData::Float(_) => FieldKind::Float,
            ColumnData::Text(_) => FieldKind::Text,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Float(v) => v.len(),
            ColumnData::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn value(&self, row: usize) -> Value {
        match self {
            ColumnData::Float(v) => match v.get(row).copied().flatten() {
                Some(x) => Value::Float(x),
                None => Value::Null,
            },
            ColumnData::Text(v) => match v.get(row).cloned().flatten() {
                Some(s) => Value::Text(s),
                None => Value::Null,
            },
        }
    }

    /// Floats are rendered with their shortest round-tripping spelling.
    pub fn into_text(self) -> Self {
        match self {
            ColumnData::Float(v) => {
                ColumnData::Text(v.into_iter().map(|x| x.map(|f| f.to_string())).collect())
            }
            text => text,
        }
    }

    fn take(&self, idx: &[usize]) -> Self {
        match self {
            ColumnData::Float(v) => ColumnData::Float(idx.iter().map(|&i| v[i]).collect()),
            ColumnData::Text(v) => ColumnData::Text(idx.iter().map(|&i| v[i].clone()).collect()),
        }
    }

    fn slice(&self, start: usize, end: usize) -> Self {
        match self {
            ColumnData::Float(v) => ColumnData::Float(v[start..end].to_vec()),
            ColumnData::Text(v) => ColumnData::Text(v[start..end].to_vec()),
        }
    }

    fn append(&mut self, other: ColumnData) {
        match (self, other) {
            (ColumnData::Float(a), ColumnData::Float(b)) => a.extend(b),
            (ColumnData::Text(a), ColumnData::Text(b)) => a.extend(b),
            (this, other) => {
                let mut promoted = std::mem::replace(this, ColumnData::Text(Vec::new())).into_text();
                promoted.append(other.into_text());
                *this = promoted;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn floats(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self::new(name, ColumnData::Float(values))
    }

    pub fn texts(name: impl Into<String>, values: Vec<Option<String>>) -> Self {
        Self::new(name, ColumnData::Text(values))
    }
}

/// A timestamp-indexed set of named field columns for a single ticker.
///
/// Timestamps are UTC nanoseconds. Duplicated instants are allowed until a caller
/// asks for [`TickSeries::dedupe_keep_last`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickSeries {
    timestamps: Vec<i64>,
    columns: Vec<Column>,
}

impl TickSeries {
    pub fn new(timestamps: Vec<i64>, columns: Vec<Column>) -> Result<Self, StoreError> {
        for (i, col) in columns.iter().enumerate() {
            if col.name.is_empty() || col.name == TS_COLUMN {
                return Err(StoreError::Schema(format!(
                    "column name '{}' is reserved or empty",
                    col.name
                )));
            }
            if col.data.len() != timestamps.len() {
                return Err(StoreError::Schema(format!(
                    "column '{}' has {} rows but the index has {}",
                    col.name,
                    col.data.len(),
                    timestamps.len()
                )));
            }
            if columns[..i].iter().any(|c| c.name == col.name) {
                return Err(StoreError::Schema(format!("duplicate column '{}'", col.name)));
            }
        }
        Ok(Self {
            timestamps,
            columns,
        })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Empty series carrying a schema, used when a store knows its columns but has no rows.
    pub fn empty_with_schema(fields: &[(String, FieldKind)]) -> Self {
        Self {
            timestamps: Vec::new(),
            columns: fields
                .iter()
                .map(|(name, kind)| Column::new(name.clone(), ColumnData::nulls(*kind, 0)))
                .collect(),
        }
    }

    pub fn from_floats(timestamps: Vec<i64>, fields: &[(&str, Vec<f64>)]) -> Result<Self, StoreError> {
        let columns = fields
            .iter()
            .map(|(name, values)| Column::floats(*name, values.iter().copied().map(Some).collect()))
            .collect();
        Self::new(timestamps, columns)
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn schema(&self) -> Vec<(String, FieldKind)> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.data.kind()))
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn floats(&self, name: &str) -> Option<&[Option<f64>]> {
        match &self.column(name)?.data {
            ColumnData::Float(v) => Some(v),
            ColumnData::Text(_) => None,
        }
    }

    pub fn texts(&self, name: &str) -> Option<&[Option<String>]> {
        match &self.column(name)?.data {
            ColumnData::Text(v) => Some(v),
            ColumnData::Float(_) => None,
        }
    }

    pub fn value(&self, name: &str, row: usize) -> Option<Value> {
        let col = self.column(name)?;
        (row < self.len()).then(|| col.data.value(row))
    }

    pub fn first_ts(&self) -> Option<i64> {
        self.timestamps.first().copied()
    }

    pub fn last_ts(&self) -> Option<i64> {
        self.timestamps.last().copied()
    }

    /// Min/max instant regardless of row order.
    pub fn extent(&self) -> Option<TimeRange> {
        let min = *self.timestamps.iter().min()?;
        let max = *self.timestamps.iter().max()?;
        TimeRange::from_ns(min, max).ok()
    }

    pub fn is_ascending(&self) -> bool {
        self.timestamps.windows(2).all(|w| w[0] <= w[1])
    }

    /// Stable sort by timestamp; rows sharing an instant keep their relative order.
    pub fn into_ascending(self) -> Self {
        if self.is_ascending() {
            return self;
        }
        let mut idx: Vec<usize> = (0..self.len()).collect();
        idx.sort_by_key(|&i| self.timestamps[i]);
        self.take(&idx)
    }

    pub fn reversed(&self) -> Self {
        let idx: Vec<usize> = (0..self.len()).rev().collect();
        self.take(&idx)
    }

    pub fn take(&self, idx: &[usize]) -> Self {
        Self {
            timestamps: idx.iter().map(|&i| self.timestamps[i]).collect(),
            columns: self
                .columns
                .iter()
                .map(|c| Column::new(c.name.clone(), c.data.take(idx)))
                .collect(),
        }
    }

    /// Rows `start..end`, clamped to the series length.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.len());
        let start = start.min(end);
        Self {
            timestamps: self.timestamps[start..end].to_vec(),
            columns: self
                .columns
                .iter()
                .map(|c| Column::new(c.name.clone(), c.data.slice(start, end)))
                .collect(),
        }
    }

    pub fn filter_rows(&self, mut keep: impl FnMut(usize, i64) -> bool) -> Self {
        let idx: Vec<usize> = self
            .timestamps
            .iter()
            .enumerate()
            .filter(|(i, ts)| keep(*i, **ts))
            .map(|(i, _)| i)
            .collect();
        if idx.len() == self.len() {
            return self.clone();
        }
        self.take(&idx)
    }

    pub fn within(&self, range: &TimeRange) -> Self {
        self.filter_rows(|_, ts| range.contains_ns(ts))
    }

    pub fn excluding(&self, range: &TimeRange) -> Self {
        self.filter_rows(|_, ts| !range.contains_ns(ts))
    }

    /// Row-wise concatenation over the union of all schemas.
    ///
    /// Columns keep first-seen order. A column missing from a part is null for that
    /// part's rows, and a column that is float in one part and text in another becomes text.
    pub fn concat(parts: Vec<TickSeries>) -> Result<Self, StoreError> {
        let parts: Vec<TickSeries> = parts.into_iter().filter(|p| !p.columns.is_empty() || !p.is_empty()).collect();
        if parts.len() == 1 {
            return Ok(parts.into_iter().next().unwrap_or_default());
        }
        let mut schema: Vec<(String, FieldKind)> = Vec::new();
        for part in &parts {
            for col in &part.columns {
                match schema.iter_mut().find(|(n, _)| *n == col.name) {
                    Some((_, kind)) => {
                        if *kind != col.data.kind() {
                            *kind = FieldKind::Text;
                        }
                    }
                    None => schema.push((col.name.clone(), col.data.kind())),
                }
            }
        }

        let total: usize = parts.iter().map(|p| p.len()).sum();
        let mut timestamps = Vec::with_capacity(total);
        let mut columns: Vec<Column> = schema
            .iter()
            .map(|(name, kind)| Column::new(name.clone(), ColumnData::nulls(*kind, 0)))
            .collect();

        for mut part in parts {
            let rows = part.len();
            timestamps.append(&mut part.timestamps);
            for (out, (_, kind)) in columns.iter_mut().zip(schema.iter()) {
                let data = match part.columns.iter().position(|c| c.name == out.name) {
                    Some(pos) => part.columns.swap_remove(pos).data,
                    None => ColumnData::nulls(*kind, rows),
                };
                let data = if *kind == FieldKind::Text {
                    data.into_text()
                } else {
                    data
                };
                out.data.append(data);
            }
        }
        Self::new(timestamps, columns)
    }

    /// Collapses runs of equal timestamps to their last row. Expects ascending input.
    pub fn dedupe_keep_last(self) -> Self {
        let n = self.len();
        if n < 2 {
            return self;
        }
        let idx: Vec<usize> = (0..n)
            .filter(|&i| i + 1 == n || self.timestamps[i] != self.timestamps[i + 1])
            .collect();
        if idx.len() == n {
            return self;
        }
        self.take(&idx)
    }

    /// Union of two series where an instant present in both keeps the incoming row.
    pub fn merge_prefer_incoming(existing: TickSeries, incoming: TickSeries) -> Result<Self, StoreError> {
        let merged = Self::concat(vec![existing, incoming])?;
        Ok(merged.into_ascending().dedupe_keep_last())
    }

    /// Splits into `parts` contiguous pieces; the first `len % parts` pieces get one extra row.
    pub fn split_chunks(&self, parts: usize) -> Vec<Self> {
        let parts = parts.max(1);
        let base = self.len() / parts;
        let extra = self.len() % parts;
        let mut out = Vec::with_capacity(parts);
        let mut start = 0;
        for i in 0..parts {
            let size = base + usize::from(i < extra);
            out.push(self.slice(start, start + size));
            start += size;
        }
        out
    }

    /// Contiguous pieces of at most `rows` rows each.
    pub fn chunks_of(&self, rows: usize) -> Vec<Self> {
        let rows = rows.max(1);
        (0..self.len())
            .step_by(rows)
            .map(|start| self.slice(start, start + rows))
            .collect()
    }

    /// Removes and returns the trailing rows that share the final timestamp.
    pub fn split_off_trailing_ties(&mut self) -> Self {
        let Some(last) = self.last_ts() else {
            return Self::empty_with_schema(&self.schema());
        };
        let cut = self
            .timestamps
            .iter()
            .rposition(|&ts| ts != last)
            .map_or(0, |i| i + 1);
        let tail = self.slice(cut, self.len());
        *self = self.slice(0, cut);
        tail
    }

    /// Adds a column, or replaces an existing one of the same name.
    pub fn with_column(mut self, column: Column) -> Result<Self, StoreError> {
        if column.data.len() != self.len() {
            return Err(StoreError::Schema(format!(
                "column '{}' has {} rows but the index has {}",
                column.name,
                column.data.len(),
                self.len()
            )));
        }
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => existing.data = column.data,
            None => self.columns.push(column),
        }
        Ok(self)
    }

    pub fn drop_column(&mut self, name: &str) -> Option<Column> {
        let pos = self.columns.iter().position(|c| c.name == name)?;
        Some(self.columns.remove(pos))
    }

    /// Splits the series into its timestamps and columns.
    pub fn into_parts(self) -> (Vec<i64>, Vec<Column>) {
        (self.timestamps, self.columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(ts: &[i64], mid: &[f64]) -> TickSeries {
        TickSeries::from_floats(ts.to_vec(), &[("mid", mid.to_vec())]).unwrap()
    }

    #[test]
    fn rejects_ragged_columns() {
        let err = TickSeries::new(vec![1, 2], vec![Column::floats("mid", vec![Some(1.0)])]);
        assert!(matches!(err, Err(StoreError::Schema(_))));
    }

    #[test]
    fn rejects_reserved_names() {
        let err = TickSeries::new(vec![1], vec![Column::floats("ts_ns", vec![Some(1.0)])]);
        assert!(matches!(err, Err(StoreError::Schema(_))));
    }

    #[test]
    fn stable_sort_keeps_tie_order() {
        let s = series(&[3, 1, 1, 2], &[30.0, 10.0, 11.0, 20.0]).into_ascending();
        assert_eq!(s.timestamps(), &[1, 1, 2, 3]);
        assert_eq!(
            s.floats("mid").unwrap(),
            &[Some(10.0), Some(11.0), Some(20.0), Some(30.0)]
        );
    }

    #[test]
    fn dedupe_keeps_last_of_each_instant() {
        let s = series(&[1, 1, 2, 3, 3], &[1.0, 1.5, 2.0, 3.0, 3.5]).dedupe_keep_last();
        assert_eq!(s.timestamps(), &[1, 2, 3]);
        assert_eq!(s.floats("mid").unwrap(), &[Some(1.5), Some(2.0), Some(3.5)]);
    }

    #[test]
    fn merge_prefers_incoming_on_shared_instants() {
        let old = series(&[1, 2, 3], &[1.0, 2.0, 3.0]);
        let new = series(&[3, 4], &[30.0, 40.0]);
        let merged = TickSeries::merge_prefer_incoming(old, new).unwrap();
        assert_eq!(merged.timestamps(), &[1, 2, 3, 4]);
        assert_eq!(merged.floats("mid").unwrap()[2], Some(30.0));
    }

    #[test]
    fn concat_unions_schemas_and_promotes_conflicts() {
        let a = TickSeries::new(
            vec![1],
            vec![
                Column::floats("mid", vec![Some(1.0)]),
                Column::floats("side", vec![Some(1.0)]),
            ],
        )
        .unwrap();
        let b = TickSeries::new(
            vec![2],
            vec![
                Column::texts("side", vec![Some("sell".into())]),
                Column::floats("bid", vec![Some(0.5)]),
            ],
        )
        .unwrap();
        let c = TickSeries::concat(vec![a, b]).unwrap();
        assert_eq!(c.len(), 2);
        assert_eq!(c.floats("mid").unwrap(), &[Some(1.0), None]);
        assert_eq!(
            c.texts("side").unwrap(),
            &[Some("1".to_string()), Some("sell".to_string())]
        );
        assert_eq!(c.floats("bid").unwrap(), &[None, Some(0.5)]);
    }

    #[test]
    fn split_chunks_follows_array_split() {
        let s = series(&[1, 2, 3, 4, 5, 6, 7], &[0.0; 7]);
        let sizes: Vec<usize> = s.split_chunks(3).iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![3, 2, 2]);
        let sizes: Vec<usize> = s.chunks_of(3).iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn trailing_ties_are_split_off() {
        let mut s = series(&[1, 2, 3, 3], &[1.0, 2.0, 3.0, 3.1]);
        let tail = s.split_off_trailing_ties();
        assert_eq!(s.timestamps(), &[1, 2]);
        assert_eq!(tail.timestamps(), &[3, 3]);

        let mut single = series(&[5, 5], &[1.0, 2.0]);
        let tail = single.split_off_trailing_ties();
        assert!(single.is_empty());
        assert_eq!(tail.len(), 2);
    }

    #[test]
    fn range_filters_are_inclusive() {
        let s = series(&[1, 2, 3, 4, 5], &[1.0, 2.0, 3.0, 4.0, 5.0]);
        let r = TimeRange::from_ns(2, 4).unwrap();
        assert_eq!(s.within(&r).timestamps(), &[2, 3, 4]);
        assert_eq!(s.excluding(&r).timestamps(), &[1, 5]);
    }
}
