use std::{collections::HashSet, sync::Arc};

use tracing::debug;

use crate::{
    error::LoadError,
    store::{Query, Store},
    types::{Batch, Value},
};

/// Finds the rows of a batch that aren't already in a relation, by natural key.
///
/// The relation is re-read on every call rather than cached, so that each batch is
/// checked against everything earlier batches of the same run appended. That's one
/// full projection read per batch, which is the price of never inserting the same key
/// twice from one run.
pub struct NewRecordDetector {
    store: Arc<dyn Store>,
    relation: String,
}

impl NewRecordDetector {
    pub fn new(store: Arc<dyn Store>, relation: &str) -> Self {
        Self {
            store,
            relation: relation.to_string(),
        }
    }

    pub async fn find_new(
        &self,
        batch: Batch,
        batch_key_fields: &[&str],
        relation_key_fields: &[&str],
    ) -> Result<Batch, LoadError> {
        if batch_key_fields.len() != relation_key_fields.len() {
            return Err(LoadError::KeyArity {
                left: batch_key_fields.len(),
                right: relation_key_fields.len(),
            });
        }
        let batch_indices = batch.column_indices(batch_key_fields)?;

        let snapshot = self
            .store
            .query(&Query::projection(&self.relation, relation_key_fields))
            .await?;

        // Rows with a null anywhere in the key can't match anything, so they're left
        // out of the set entirely
        let existing: HashSet<&[Value]> = snapshot
            .rows()
            .iter()
            .filter(|row| !row.iter().any(Value::is_null))
            .map(Vec::as_slice)
            .collect();

        let mask: Vec<bool> = batch
            .rows()
            .iter()
            .map(|row| {
                let key: Vec<Value> = batch_indices.iter().map(|i| row[*i].clone()).collect();
                key.iter().any(Value::is_null) || !existing.contains(key.as_slice())
            })
            .collect();

        let incoming = batch.len();
        let new = batch.filter(&mask)?;
        debug!(
            "{} of {} rows are new to {} ({} existing keys)",
            new.len(),
            incoming,
            self.relation,
            existing.len()
        );
        Ok(new)
    }
}
