use thiserror::Error;

use crate::types::BatchError;

/// Errors about the warehouse itself - connection failures, bad statements, COPY
/// streams that could not be completed.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("pool creation failed with: {0}")]
    PoolCreation(sqlx::Error),
    #[error("{command} query failed with: {error}")]
    Query { command: String, error: sqlx::Error },
    #[error("COPY into {table} failed with: {error}")]
    Copy { table: String, error: sqlx::Error },
    #[error("could not encode rows for COPY into {table}: {error}")]
    Encode { table: String, error: csv::Error },
    #[error("{count} target columns but {source_count} source columns for {table}")]
    ColumnMapping {
        table: String,
        count: usize,
        source_count: usize,
    },
    #[error("column {column} has unsupported type {type_name}")]
    UnsupportedType { column: String, type_name: String },
    #[error("relation {0} does not exist")]
    UnknownRelation(String),
    #[error("query is not supported by this store: {0}")]
    UnsupportedQuery(String),
    #[error(transparent)]
    Batch(#[from] BatchError),
}

/// Everything that can stop a dimension or fact load. None of these are retried; the
/// run halts at the first one.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("source data unavailable: {0}")]
    SourceUnavailable(String),
    #[error("failed reading source {path}: {message}")]
    Source { path: String, message: String },
    #[error("{stage} produced an empty batch where records were expected")]
    EmptyBatch { stage: String },
    #[error("lost records looking up dimension {dimension}. Before: {before}, After: {after}")]
    LookupIntegrity {
        dimension: String,
        before: usize,
        after: usize,
    },
    #[error("{left} key fields cannot be matched against {right} key fields")]
    KeyArity { left: usize, right: usize },
    #[error("invalid record in {stage}: {message}")]
    InvalidRecord { stage: String, message: String },
    #[error("dimension {dimension} has overlapping intervals around {at}")]
    OverlappingIntervals { dimension: String, at: f64 },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Batch(#[from] BatchError),
}

/// A load failure, tagged with the run stage it happened in.
#[derive(Error, Debug)]
#[error("stage {stage} failed: {source}")]
pub struct RunError {
    pub stage: String,
    #[source]
    pub source: LoadError,
}

impl RunError {
    pub fn new(stage: impl Into<String>, source: LoadError) -> Self {
        Self {
            stage: stage.into(),
            source,
        }
    }
}

pub trait InStage<T> {
    fn in_stage(self, stage: &str) -> Result<T, RunError>;
}

impl<T, E: Into<LoadError>> InStage<T> for Result<T, E> {
    fn in_stage(self, stage: &str) -> Result<T, RunError> {
        self.map_err(|e| RunError::new(stage, e.into()))
    }
}
