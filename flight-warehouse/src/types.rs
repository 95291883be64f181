use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

// Matches the chunk size the loaders have always used against the yearly files
pub const DEFAULT_CHUNK_SIZE: usize = 50_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error("column {0} does not exist in batch")]
    UnknownColumn(String),
    #[error("column {0} already exists in batch")]
    DuplicateColumn(String),
    #[error("row has {got} values, batch schema has {expected} columns")]
    RowWidth { expected: usize, got: usize },
    #[error("column has {got} values, batch has {expected} rows")]
    ColumnLength { expected: usize, got: usize },
}

/// A single scalar cell.
///
/// Equality is structural, so `Null == Null` (which is what deduplication wants). Joins
/// must never treat nulls as matching, and check for them explicitly via
/// [`Value::is_null`] before comparing keys.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(NaiveDate),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    // Numeric view used by range lookups. Postgres money columns come back as text
    // like "$1,234.50", so strings are parsed after stripping currency formatting.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Str(s) => parse_money(s),
            _ => None,
        }
    }

    fn float_bits(f: f64) -> u64 {
        // -0.0 and 0.0 should be the same key
        if f == 0.0 {
            0.0f64.to_bits()
        } else {
            f.to_bits()
        }
    }
}

fn parse_money(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => match trimmed.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        },
    };
    let cleaned: String = body.chars().filter(|c| *c != '$' && *c != ',').collect();
    let parsed = cleaned.trim().parse::<f64>().ok()?;
    Some(if negative { -parsed } else { parsed })
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => Value::float_bits(*a) == Value::float_bits(*b),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => Value::float_bits(*f).hash(state),
            Value::Str(s) => s.hash(state),
            Value::Date(d) => d.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A borrowed view of one row, addressable by column name.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> Record<'a> {
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    pub fn values(&self) -> &'a [Value] {
        self.values
    }
}

/// An ordered set of rows sharing one schema. Rows are stored row-major, since every
/// stage of the loaders either filters whole rows or appends whole columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Batch {
    pub fn new(columns: Vec<String>) -> Result<Self, BatchError> {
        for (idx, column) in columns.iter().enumerate() {
            if columns[..idx].contains(column) {
                return Err(BatchError::DuplicateColumn(column.clone()));
            }
        }
        Ok(Self {
            columns,
            rows: Vec::new(),
        })
    }

    pub fn with_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, BatchError> {
        let mut batch = Self::new(columns)?;
        batch.rows.reserve(rows.len());
        for row in rows {
            batch.push_row(row)?;
        }
        Ok(batch)
    }

    // Convenience for tests and fixtures
    pub fn from_records<I, R, K, V>(columns: &[&str], records: I) -> Result<Self, BatchError>
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut batch = Self::new(columns.iter().map(|c| c.to_string()).collect())?;
        for record in records {
            let mut row = vec![Value::Null; columns.len()];
            for (key, value) in record {
                let idx = batch.column_index(key.as_ref())?;
                row[idx] = value.into();
            }
            batch.rows.push(row);
        }
        Ok(batch)
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), BatchError> {
        if row.len() != self.columns.len() {
            return Err(BatchError::RowWidth {
                expected: self.columns.len(),
                got: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn column_index(&self, column: &str) -> Result<usize, BatchError> {
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| BatchError::UnknownColumn(column.to_string()))
    }

    pub fn column_indices<S: AsRef<str>>(&self, columns: &[S]) -> Result<Vec<usize>, BatchError> {
        columns
            .iter()
            .map(|c| self.column_index(c.as_ref()))
            .collect()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    pub fn record(&self, idx: usize) -> Option<Record<'_>> {
        self.rows.get(idx).map(|values| Record {
            columns: &self.columns,
            values,
        })
    }

    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.rows.iter().map(|values| Record {
            columns: &self.columns,
            values,
        })
    }

    pub fn value(&self, row: usize, column: &str) -> Result<Option<&Value>, BatchError> {
        let idx = self.column_index(column)?;
        Ok(self.rows.get(row).map(|r| &r[idx]))
    }

    /// Iterates over one column's values, top to bottom.
    pub fn column_values(&self, column: &str) -> Result<impl Iterator<Item = &Value>, BatchError> {
        let idx = self.column_index(column)?;
        Ok(self.rows.iter().map(move |r| &r[idx]))
    }

    pub fn key_of<'a>(row: &'a [Value], indices: &[usize]) -> Vec<&'a Value> {
        indices.iter().map(|i| &row[*i]).collect()
    }

    /// Keeps only the named columns, in the given order.
    pub fn project<S: AsRef<str>>(&self, columns: &[S]) -> Result<Batch, BatchError> {
        let indices = self.column_indices(columns)?;
        let names = columns.iter().map(|c| c.as_ref().to_string()).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| indices.iter().map(|i| row[*i].clone()).collect())
            .collect();
        Batch::with_rows(names, rows)
    }

    pub fn append_column(&mut self, name: &str, values: Vec<Value>) -> Result<(), BatchError> {
        if self.has_column(name) {
            return Err(BatchError::DuplicateColumn(name.to_string()));
        }
        if values.len() != self.rows.len() {
            return Err(BatchError::ColumnLength {
                expected: self.rows.len(),
                got: values.len(),
            });
        }
        self.columns.push(name.to_string());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
        Ok(())
    }

    /// Adds a column computed from each row.
    pub fn derive_column<F>(&mut self, name: &str, mut f: F) -> Result<(), BatchError>
    where
        F: FnMut(Record<'_>) -> Value,
    {
        let values = self.records().map(&mut f).collect();
        self.append_column(name, values)
    }

    /// Rewrites a column's values in place.
    pub fn map_column<F>(&mut self, name: &str, mut f: F) -> Result<(), BatchError>
    where
        F: FnMut(&Value) -> Value,
    {
        let idx = self.column_index(name)?;
        for row in self.rows.iter_mut() {
            row[idx] = f(&row[idx]);
        }
        Ok(())
    }

    pub fn drop_columns<S: AsRef<str>>(&mut self, columns: &[S]) -> Result<(), BatchError> {
        let mut indices = self.column_indices(columns)?;
        indices.sort_unstable();
        indices.dedup();
        for idx in indices.into_iter().rev() {
            self.columns.remove(idx);
            for row in self.rows.iter_mut() {
                row.remove(idx);
            }
        }
        Ok(())
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<(), BatchError> {
        let idx = self.column_index(from)?;
        if from != to && self.has_column(to) {
            return Err(BatchError::DuplicateColumn(to.to_string()));
        }
        self.columns[idx] = to.to_string();
        Ok(())
    }

    /// Renames every listed column that is present, ignoring the rest.
    pub fn rename_columns(&mut self, mapping: &[(&str, &str)]) -> Result<(), BatchError> {
        for (from, to) in mapping {
            if self.has_column(from) {
                self.rename_column(from, to)?;
            }
        }
        Ok(())
    }

    /// Keeps the rows whose mask entry is true. The mask must cover every row.
    pub fn filter(self, mask: &[bool]) -> Result<Batch, BatchError> {
        if mask.len() != self.rows.len() {
            return Err(BatchError::ColumnLength {
                expected: self.rows.len(),
                got: mask.len(),
            });
        }
        let rows = self
            .rows
            .into_iter()
            .zip(mask)
            .filter_map(|(row, keep)| keep.then_some(row))
            .collect();
        Ok(Batch {
            columns: self.columns,
            rows,
        })
    }
}
