use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;

use super::{check_mapping, Query, Store};
use crate::{
    error::StoreError,
    types::{Batch, Value},
};

struct Relation {
    key_column: Option<String>,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    next_key: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendCall {
    pub relation: String,
    pub rows: usize,
}

/// A store that keeps every relation in memory. Surrogate keys are assigned from 1
/// upwards, the way a serial column would. Used by the test suite and for dry runs.
#[derive(Default)]
pub struct MemoryStore {
    relations: Mutex<HashMap<String, Relation>>,
    sql_results: Mutex<HashMap<String, Batch>>,
    appends: Mutex<Vec<AppendCall>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // If `key_column` is set, it's filled in on append and must not be written by callers
    pub fn create_relation(&self, name: &str, key_column: Option<&str>, columns: &[&str]) {
        let mut all_columns = Vec::with_capacity(columns.len() + 1);
        if let Some(key) = key_column {
            all_columns.push(key.to_string());
        }
        all_columns.extend(columns.iter().map(|c| c.to_string()));
        let relation = Relation {
            key_column: key_column.map(str::to_string),
            columns: all_columns,
            rows: Vec::new(),
            next_key: 1,
        };
        self.relations
            .lock()
            .expect("relations lock poisoned")
            .insert(name.to_string(), relation);
    }

    /// Registers the result to hand back for a custom SQL lookup.
    pub fn register_sql(&self, sql: &str, result: Batch) {
        self.sql_results
            .lock()
            .expect("sql results lock poisoned")
            .insert(sql.to_string(), result);
    }

    pub fn appends(&self) -> Vec<AppendCall> {
        self.appends.lock().expect("appends lock poisoned").clone()
    }

    /// A copy of the full relation, key column first.
    pub fn snapshot(&self, name: &str) -> Option<Batch> {
        let relations = self.relations.lock().expect("relations lock poisoned");
        let relation = relations.get(name)?;
        Batch::with_rows(relation.columns.clone(), relation.rows.clone()).ok()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn query(&self, query: &Query) -> Result<Batch, StoreError> {
        match query {
            Query::Projection { table, columns } => {
                let relations = self.relations.lock().expect("relations lock poisoned");
                let relation = relations
                    .get(table)
                    .ok_or_else(|| StoreError::UnknownRelation(table.clone()))?;
                let full = Batch::with_rows(relation.columns.clone(), relation.rows.clone())?;
                Ok(full.project(columns)?)
            }
            Query::Sql(sql) => self
                .sql_results
                .lock()
                .expect("sql results lock poisoned")
                .get(sql)
                .cloned()
                .ok_or_else(|| StoreError::UnsupportedQuery(sql.clone())),
        }
    }

    async fn append(
        &self,
        batch: &Batch,
        target_relation: &str,
        target_columns: &[&str],
        source_columns: &[&str],
    ) -> Result<u64, StoreError> {
        check_mapping(target_relation, target_columns, source_columns)?;
        let source_indices = batch.column_indices(source_columns)?;

        let mut relations = self.relations.lock().expect("relations lock poisoned");
        let relation = relations
            .get_mut(target_relation)
            .ok_or_else(|| StoreError::UnknownRelation(target_relation.to_string()))?;

        let target_indices = target_columns
            .iter()
            .map(|c| {
                relation
                    .columns
                    .iter()
                    .position(|rc| rc == c)
                    .ok_or_else(|| crate::types::BatchError::UnknownColumn(c.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let key_idx = relation
            .key_column
            .as_ref()
            .and_then(|k| relation.columns.iter().position(|c| c == k));

        // Build everything first, so a failure part way leaves the relation untouched
        let mut new_rows = Vec::with_capacity(batch.len());
        let mut next_key = relation.next_key;
        for row in batch.rows() {
            let mut stored = vec![Value::Null; relation.columns.len()];
            for (src, dst) in source_indices.iter().zip(&target_indices) {
                stored[*dst] = row[*src].clone();
            }
            if let Some(k) = key_idx {
                stored[k] = Value::Int(next_key);
                next_key += 1;
            }
            new_rows.push(stored);
        }

        let written = new_rows.len();
        relation.rows.extend(new_rows);
        relation.next_key = next_key;

        self.appends
            .lock()
            .expect("appends lock poisoned")
            .push(AppendCall {
                relation: target_relation.to_string(),
                rows: written,
            });

        Ok(written as u64)
    }
}
