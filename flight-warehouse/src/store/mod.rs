use async_trait::async_trait;

use crate::{error::StoreError, types::Batch};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    // SELECT columns FROM table
    Projection { table: String, columns: Vec<String> },
    // An arbitrary statement, for lookups the plain projection can't express
    Sql(String),
}

impl Query {
    pub fn projection<S: AsRef<str>>(table: &str, columns: &[S]) -> Self {
        Query::Projection {
            table: table.to_string(),
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
        }
    }
}

/// The warehouse, as seen by the loaders: full-result reads, and column-mapped bulk
/// appends that either land completely or not at all.
#[async_trait]
pub trait Store: Send + Sync {
    async fn query(&self, query: &Query) -> Result<Batch, StoreError>;

    // `source_columns[i]` of the batch is written to `target_columns[i]` of the relation.
    // Returns the number of rows written.
    async fn append(
        &self,
        batch: &Batch,
        target_relation: &str,
        target_columns: &[&str],
        source_columns: &[&str],
    ) -> Result<u64, StoreError>;
}

pub(crate) fn check_mapping(
    table: &str,
    target_columns: &[&str],
    source_columns: &[&str],
) -> Result<(), StoreError> {
    if target_columns.len() != source_columns.len() || target_columns.is_empty() {
        return Err(StoreError::ColumnMapping {
            table: table.to_string(),
            count: target_columns.len(),
            source_count: source_columns.len(),
        });
    }
    Ok(())
}

// Quotes an identifier for interpolation into SQL. Relation names may be schema
// qualified, so each dotted part is quoted separately.
pub fn quote_ident(ident: &str) -> String {
    ident
        .split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}
