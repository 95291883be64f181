use std::collections::VecDeque;

use async_trait::async_trait;

use crate::{error::LoadError, types::Batch};

pub mod file;

pub use file::CsvSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    // Kept verbatim, including empty strings
    Text,
    // Empty and "NA" cells become nulls
    Int,
    Float,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
}

impl ColumnSpec {
    pub fn text(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ColumnKind::Text,
        }
    }

    pub fn int(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ColumnKind::Int,
        }
    }

    pub fn float(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ColumnKind::Float,
        }
    }
}

/// An ordered, finite sequence of batches. Sources can't be rewound - to read the
/// same data again, open a new one over the same artifact.
#[async_trait]
pub trait ChunkedSource: Send {
    // Ok(None) once the source is exhausted
    async fn next_batch(&mut self) -> Result<Option<Batch>, LoadError>;
}

/// Hands out a fixed list of batches, in order.
pub struct VecSource {
    batches: VecDeque<Batch>,
}

impl VecSource {
    pub fn new(batches: Vec<Batch>) -> Self {
        Self {
            batches: batches.into(),
        }
    }
}

#[async_trait]
impl ChunkedSource for VecSource {
    async fn next_batch(&mut self) -> Result<Option<Batch>, LoadError> {
        Ok(self.batches.pop_front())
    }
}

/// Drains a source into a single batch. Only meant for small reference files.
pub async fn read_all(source: &mut dyn ChunkedSource) -> Result<Batch, LoadError> {
    let Some(mut all) = source.next_batch().await? else {
        return Ok(Batch::default());
    };
    while let Some(next) = source.next_batch().await? {
        if next.columns() != all.columns() {
            return Err(LoadError::InvalidRecord {
                stage: "read_all".to_string(),
                message: "source changed schema between batches".to_string(),
            });
        }
        for row in next.into_rows() {
            all.push_row(row)?;
        }
    }
    Ok(all)
}
