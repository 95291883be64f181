use std::{collections::HashMap, sync::Arc, time::Instant};

use tracing::{error, info, warn};

use crate::{
    error::LoadError,
    metrics_consts::{LOOKUP_INTEGRITY_FAILURES, LOOKUP_TIME, UNCLASSIFIED_INTERVAL_ROWS},
    store::{Query, Store},
    types::{Batch, BatchError, Value},
};

// Key handed out by interval lookups when no range contains the value
pub const UNKNOWN_KEY: i64 = 0;

/// How to swap a dimension's natural key for its surrogate key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub dimension_table: String,
    pub batch_join_fields: Vec<String>,
    pub dimension_join_fields: Vec<String>,
    pub key_field_name: String,
    // Replaces the default `SELECT key, join fields FROM table`. Its result must still
    // carry the key and dimension join columns.
    pub custom_query: Option<String>,
    pub drop_join_fields: bool,
}

impl Lookup {
    pub fn new(
        dimension_table: &str,
        batch_join_fields: &[&str],
        dimension_join_fields: &[&str],
        key_field_name: &str,
    ) -> Self {
        Self {
            dimension_table: dimension_table.to_string(),
            batch_join_fields: batch_join_fields.iter().map(|f| f.to_string()).collect(),
            dimension_join_fields: dimension_join_fields
                .iter()
                .map(|f| f.to_string())
                .collect(),
            key_field_name: key_field_name.to_string(),
            custom_query: None,
            drop_join_fields: true,
        }
    }

    pub fn with_custom_query(mut self, sql: &str) -> Self {
        self.custom_query = Some(sql.to_string());
        self
    }

    pub fn keep_join_fields(mut self) -> Self {
        self.drop_join_fields = false;
        self
    }

    fn query(&self) -> Query {
        match &self.custom_query {
            Some(sql) => Query::Sql(sql.clone()),
            None => {
                let mut columns = Vec::with_capacity(self.dimension_join_fields.len() + 1);
                columns.push(self.key_field_name.clone());
                columns.extend(self.dimension_join_fields.iter().cloned());
                Query::Projection {
                    table: self.dimension_table.clone(),
                    columns,
                }
            }
        }
    }
}

/// Which ends of a `[min, max]` range count as inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntervalClosed {
    #[default]
    Both,
    Left,
    Right,
    Neither,
}

impl IntervalClosed {
    fn closed_left(self) -> bool {
        matches!(self, IntervalClosed::Both | IntervalClosed::Left)
    }

    fn closed_right(self) -> bool {
        matches!(self, IntervalClosed::Both | IntervalClosed::Right)
    }

    pub fn contains(self, min: f64, max: f64, value: f64) -> bool {
        let above = if self.closed_left() {
            value >= min
        } else {
            value > min
        };
        let below = if self.closed_right() {
            value <= max
        } else {
            value < max
        };
        above && below
    }
}

/// Buckets one numeric field into a range dimension (price bands and the like).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalLookup {
    pub dimension_table: String,
    pub key_field_name: String,
    pub batch_field: String,
    pub min_field: String,
    pub max_field: String,
    pub closed: IntervalClosed,
    pub custom_query: Option<String>,
}

impl IntervalLookup {
    pub fn new(
        dimension_table: &str,
        key_field_name: &str,
        batch_field: &str,
        min_field: &str,
        max_field: &str,
    ) -> Self {
        Self {
            dimension_table: dimension_table.to_string(),
            key_field_name: key_field_name.to_string(),
            batch_field: batch_field.to_string(),
            min_field: min_field.to_string(),
            max_field: max_field.to_string(),
            closed: IntervalClosed::default(),
            custom_query: None,
        }
    }

    pub fn closed(mut self, closed: IntervalClosed) -> Self {
        self.closed = closed;
        self
    }

    pub fn with_custom_query(mut self, sql: &str) -> Self {
        self.custom_query = Some(sql.to_string());
        self
    }

    fn query(&self) -> Query {
        match &self.custom_query {
            Some(sql) => Query::Sql(sql.clone()),
            None => Query::projection(
                &self.dimension_table,
                &[&self.key_field_name, &self.min_field, &self.max_field],
            ),
        }
    }
}

struct Interval {
    min: f64,
    max: f64,
    key: Value,
}

pub struct SurrogateKeyResolver {
    store: Arc<dyn Store>,
}

impl SurrogateKeyResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Attaches `lookup.key_field_name` to every row of the batch.
    ///
    /// Every row has to match exactly one dimension row. If any row matches none (the
    /// dimension wasn't loaded, or the data is inconsistent) or several (the dimension
    /// has duplicate natural keys), the whole batch fails with
    /// [`LoadError::LookupIntegrity`] - a fact row must never be loaded without its key.
    pub async fn resolve(&self, batch: Batch, lookup: &Lookup) -> Result<Batch, LoadError> {
        let start = Instant::now();

        if lookup.batch_join_fields.len() != lookup.dimension_join_fields.len() {
            return Err(LoadError::KeyArity {
                left: lookup.batch_join_fields.len(),
                right: lookup.dimension_join_fields.len(),
            });
        }
        if batch.has_column(&lookup.key_field_name) {
            return Err(BatchError::DuplicateColumn(lookup.key_field_name.clone()).into());
        }
        let batch_indices = batch.column_indices(&lookup.batch_join_fields)?;

        let dimension = self.store.query(&lookup.query()).await?;
        let key_idx = dimension.column_index(&lookup.key_field_name)?;
        let dim_indices = dimension.column_indices(&lookup.dimension_join_fields)?;

        let mut index: HashMap<Vec<&Value>, Vec<usize>> = HashMap::with_capacity(dimension.len());
        for (row_idx, row) in dimension.rows().iter().enumerate() {
            let key = Batch::key_of(row, &dim_indices);
            if key.iter().any(|v| v.is_null()) {
                continue;
            }
            index.entry(key).or_default().push(row_idx);
        }

        let before = batch.len();
        let mut after = 0;
        let mut all_unique = true;
        let mut matched = Vec::with_capacity(before);
        for row in batch.rows() {
            let key = Batch::key_of(row, &batch_indices);
            let hits = if key.iter().any(|v| v.is_null()) {
                None
            } else {
                index.get(&key)
            };
            match hits {
                Some(hits) => {
                    after += hits.len();
                    all_unique &= hits.len() == 1;
                    matched.push(hits.first().copied());
                }
                None => {
                    all_unique = false;
                    matched.push(None);
                }
            }
        }

        if !all_unique || after != before {
            metrics::counter!(LOOKUP_INTEGRITY_FAILURES, "dimension" => lookup.dimension_table.clone())
                .increment(1);
            error!(
                "lookup against {} lost records. Before: {}, After: {}",
                lookup.dimension_table, before, after
            );
            return Err(LoadError::LookupIntegrity {
                dimension: lookup.dimension_table.clone(),
                before,
                after,
            });
        }

        let mut keys = Vec::with_capacity(before);
        for dim_row in matched.iter().flatten() {
            let key = &dimension.rows()[*dim_row][key_idx];
            if key.is_null() {
                return Err(LoadError::InvalidRecord {
                    stage: lookup.dimension_table.clone(),
                    message: format!("{} is null", lookup.key_field_name),
                });
            }
            keys.push(key.clone());
        }

        // Dimension-side columns, only carried over when the join fields are kept
        let mut carried = Vec::new();
        if !lookup.drop_join_fields {
            for (field, dim_idx) in lookup.dimension_join_fields.iter().zip(&dim_indices) {
                if batch.has_column(field) {
                    continue;
                }
                let values = matched
                    .iter()
                    .flatten()
                    .map(|r| dimension.rows()[*r][*dim_idx].clone())
                    .collect();
                carried.push((field.clone(), values));
            }
        }

        let mut batch = batch;
        batch.append_column(&lookup.key_field_name, keys)?;
        for (field, values) in carried {
            batch.append_column(&field, values)?;
        }
        if lookup.drop_join_fields {
            batch.drop_columns(&lookup.batch_join_fields)?;
        }

        let elapsed = start.elapsed();
        metrics::histogram!(LOOKUP_TIME, "dimension" => lookup.dimension_table.clone())
            .record(elapsed.as_secs_f64());
        info!(
            "lookup {} resolved {} rows in {:?}",
            lookup.dimension_table, before, elapsed
        );

        Ok(batch)
    }

    /// Attaches the key of the range containing `lookup.batch_field`. Values outside
    /// every range, nulls, and non-numeric values get [`UNKNOWN_KEY`] instead of failing.
    pub async fn resolve_interval(
        &self,
        batch: Batch,
        lookup: &IntervalLookup,
    ) -> Result<Batch, LoadError> {
        let start = Instant::now();

        if batch.has_column(&lookup.key_field_name) {
            return Err(BatchError::DuplicateColumn(lookup.key_field_name.clone()).into());
        }
        let value_idx = batch.column_index(&lookup.batch_field)?;

        let dimension = self.store.query(&lookup.query()).await?;
        let intervals = self.build_intervals(&dimension, lookup)?;

        let mut unclassified = 0u64;
        let keys: Vec<Value> = batch
            .rows()
            .iter()
            .map(|row| {
                let found = row[value_idx]
                    .as_f64()
                    .and_then(|v| find_interval(&intervals, lookup.closed, v));
                match found {
                    Some(interval) => interval.key.clone(),
                    None => {
                        unclassified += 1;
                        Value::Int(UNKNOWN_KEY)
                    }
                }
            })
            .collect();

        let mut batch = batch;
        batch.append_column(&lookup.key_field_name, keys)?;

        metrics::counter!(UNCLASSIFIED_INTERVAL_ROWS, "dimension" => lookup.dimension_table.clone())
            .increment(unclassified);
        info!(
            "interval lookup {} resolved {} rows ({} unclassified) in {:?}",
            lookup.dimension_table,
            batch.len(),
            unclassified,
            start.elapsed()
        );

        Ok(batch)
    }

    fn build_intervals(
        &self,
        dimension: &Batch,
        lookup: &IntervalLookup,
    ) -> Result<Vec<Interval>, LoadError> {
        let key_idx = dimension.column_index(&lookup.key_field_name)?;
        let min_idx = dimension.column_index(&lookup.min_field)?;
        let max_idx = dimension.column_index(&lookup.max_field)?;

        let mut intervals = Vec::with_capacity(dimension.len());
        for row in dimension.rows() {
            let (Some(min), Some(max)) = (row[min_idx].as_f64(), row[max_idx].as_f64()) else {
                warn!(
                    "skipping {} row with non-numeric bounds {} / {}",
                    lookup.dimension_table, row[min_idx], row[max_idx]
                );
                continue;
            };
            if min > max || min.is_nan() || max.is_nan() {
                return Err(LoadError::InvalidRecord {
                    stage: lookup.dimension_table.clone(),
                    message: format!("interval [{min}, {max}] is inverted"),
                });
            }
            intervals.push(Interval {
                min,
                max,
                key: row[key_idx].clone(),
            });
        }

        intervals.sort_by(|a, b| a.min.total_cmp(&b.min).then(a.max.total_cmp(&b.max)));

        // With ranges sorted by lower bound, any overlap shows up between neighbours
        for pair in intervals.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let touching_closed =
                b.min == a.max && lookup.closed.closed_left() && lookup.closed.closed_right();
            if b.min < a.max || touching_closed {
                return Err(LoadError::OverlappingIntervals {
                    dimension: lookup.dimension_table.clone(),
                    at: b.min,
                });
            }
        }

        Ok(intervals)
    }
}

fn find_interval(intervals: &[Interval], closed: IntervalClosed, value: f64) -> Option<&Interval> {
    if value.is_nan() {
        return None;
    }
    // The last range starting at or below the value, and the one before it (for a
    // value sitting on an open lower bound but a closed upper bound)
    let upto = intervals.partition_point(|iv| iv.min <= value);
    intervals[..upto]
        .iter()
        .rev()
        .take(2)
        .find(|iv| closed.contains(iv.min, iv.max, value))
}
