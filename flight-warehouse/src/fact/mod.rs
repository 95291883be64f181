use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::{
    dimension::TransformFn,
    error::LoadError,
    metrics_consts::{ROWS_APPENDED, ROWS_READ},
    resolve::{IntervalLookup, Lookup, SurrogateKeyResolver},
    source::ChunkedSource,
    store::Store,
};

pub mod flight_arrival;

/// A fact table load: which dimension keys to resolve, in order, and how to shape the
/// resolved rows before they're appended.
pub struct FactSpec {
    pub name: &'static str,
    pub table: &'static str,
    pub lookups: Vec<Lookup>,
    pub interval_lookups: Vec<IntervalLookup>,
    // Runs after every lookup
    pub transform: TransformFn,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FactStats {
    pub batches: u64,
    pub rows_read: u64,
    pub rows_appended: u64,
}

pub struct FactLoader {
    store: Arc<dyn Store>,
    resolver: SurrogateKeyResolver,
    spec: FactSpec,
}

impl FactLoader {
    pub fn new(store: Arc<dyn Store>, spec: FactSpec) -> Self {
        Self {
            resolver: SurrogateKeyResolver::new(store.clone()),
            store,
            spec,
        }
    }

    /// Loads every batch of the source. A batch is appended only once all of its keys
    /// resolved, so a lookup failure leaves nothing of that batch behind (earlier batches
    /// stay appended).
    pub async fn load(&self, source: &mut dyn ChunkedSource) -> Result<FactStats, LoadError> {
        let mut stats = FactStats::default();
        let name = self.spec.name;

        while let Some(batch) = source.next_batch().await? {
            if batch.is_empty() {
                return Err(LoadError::EmptyBatch {
                    stage: format!("{name} source"),
                });
            }
            stats.batches += 1;
            stats.rows_read += batch.len() as u64;
            metrics::counter!(ROWS_READ, "stage" => name).increment(batch.len() as u64);

            let mut batch = batch;
            for lookup in &self.spec.lookups {
                batch = self.resolver.resolve(batch, lookup).await?;
            }
            for lookup in &self.spec.interval_lookups {
                batch = self.resolver.resolve_interval(batch, lookup).await?;
            }

            let batch = (self.spec.transform)(batch)?;
            if batch.is_empty() {
                return Err(LoadError::EmptyBatch {
                    stage: format!("{name} transform"),
                });
            }

            let columns: Vec<&str> = batch.columns().iter().map(String::as_str).collect();
            let written = self
                .store
                .append(&batch, self.spec.table, &columns, &columns)
                .await?;
            stats.rows_appended += written;
            metrics::counter!(ROWS_APPENDED, "stage" => name).increment(written);
            debug!("{name}: batch {} appended {written} rows", stats.batches);
        }

        info!(
            "{name}: appended {} rows in {} batches",
            stats.rows_appended, stats.batches
        );
        Ok(stats)
    }
}
