use std::collections::HashSet;

use crate::types::{Batch, BatchError, Value};

/// Removes duplicate rows from a batch. With `key_fields`, rows count as duplicates when
/// they agree on those fields; without, when they agree on every field. The first
/// occurrence is kept and survivors stay in their original order.
pub fn dedupe(batch: Batch, key_fields: Option<&[&str]>) -> Result<Batch, BatchError> {
    let indices = match key_fields {
        Some(fields) => batch.column_indices(fields)?,
        None => (0..batch.columns().len()).collect(),
    };

    let mask: Vec<bool> = {
        let mut seen: HashSet<Vec<&Value>> = HashSet::with_capacity(batch.len());
        batch
            .rows()
            .iter()
            .map(|row| seen.insert(Batch::key_of(row, &indices)))
            .collect()
    };

    batch.filter(&mask)
}
