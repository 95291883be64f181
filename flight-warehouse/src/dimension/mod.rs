use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::{
    dedupe::dedupe,
    detect::NewRecordDetector,
    error::LoadError,
    metrics_consts::{DUPLICATE_ROWS_DROPPED, EXISTING_ROWS_SKIPPED, ROWS_APPENDED, ROWS_READ},
    source::ChunkedSource,
    store::Store,
    types::Batch,
};

pub mod cancellation;
pub mod carrier;
pub mod date;
pub mod flight;
pub mod travel;

pub type TransformFn = Box<dyn Fn(Batch) -> Result<Batch, LoadError> + Send + Sync>;

pub fn identity() -> TransformFn {
    Box::new(Ok::<Batch, LoadError>)
}

/// Everything that makes one dimension load different from another.
pub struct DimensionSpec {
    pub name: &'static str,
    pub table: &'static str,
    // None dedupes on every field
    pub dedupe_fields: Option<&'static [&'static str]>,
    pub transform: TransformFn,
    // Natural key, as named in the transformed batch and in the relation
    pub batch_key_fields: &'static [&'static str],
    pub relation_key_fields: &'static [&'static str],
    // `source_columns[i]` is appended to `target_columns[i]`
    pub source_columns: &'static [&'static str],
    pub target_columns: &'static [&'static str],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Idle,
    Reading,
    Deduplicating,
    Transforming,
    DetectingNew,
    Appending,
    Done,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub batches: u64,
    pub rows_read: u64,
    pub rows_after_dedupe: u64,
    pub rows_new: u64,
    pub rows_appended: u64,
}

pub struct DimensionLoader {
    store: Arc<dyn Store>,
    spec: DimensionSpec,
    detector: NewRecordDetector,
    state: LoaderState,
}

impl DimensionLoader {
    pub fn new(store: Arc<dyn Store>, spec: DimensionSpec) -> Self {
        let detector = NewRecordDetector::new(store.clone(), spec.table);
        Self {
            store,
            spec,
            detector,
            state: LoaderState::Idle,
        }
    }

    // After a failed load, this is the step that failed
    pub fn state(&self) -> LoaderState {
        self.state
    }

    /// Drains the source, appending each batch's new records before reading the next.
    pub async fn load(&mut self, source: &mut dyn ChunkedSource) -> Result<LoadStats, LoadError> {
        let mut stats = LoadStats::default();
        let name = self.spec.name;

        loop {
            self.state = LoaderState::Reading;
            let Some(batch) = source.next_batch().await? else {
                break;
            };
            if batch.is_empty() {
                continue;
            }
            stats.batches += 1;
            stats.rows_read += batch.len() as u64;
            metrics::counter!(ROWS_READ, "stage" => name).increment(batch.len() as u64);

            self.state = LoaderState::Deduplicating;
            let read = batch.len();
            let batch = dedupe(batch, self.spec.dedupe_fields)?;
            stats.rows_after_dedupe += batch.len() as u64;
            metrics::counter!(DUPLICATE_ROWS_DROPPED, "stage" => name)
                .increment((read - batch.len()) as u64);

            self.state = LoaderState::Transforming;
            let batch = (self.spec.transform)(batch)?;
            if batch.is_empty() {
                return Err(LoadError::EmptyBatch {
                    stage: name.to_string(),
                });
            }

            self.state = LoaderState::DetectingNew;
            let candidates = batch.len();
            let new = self
                .detector
                .find_new(
                    batch,
                    self.spec.batch_key_fields,
                    self.spec.relation_key_fields,
                )
                .await?;
            metrics::counter!(EXISTING_ROWS_SKIPPED, "stage" => name)
                .increment((candidates - new.len()) as u64);
            if new.is_empty() {
                debug!("{name}: batch {} has no new records", stats.batches);
                self.state = LoaderState::Idle;
                continue;
            }
            stats.rows_new += new.len() as u64;

            self.state = LoaderState::Appending;
            let written = self
                .store
                .append(
                    &new,
                    self.spec.table,
                    self.spec.target_columns,
                    self.spec.source_columns,
                )
                .await?;
            stats.rows_appended += written;
            metrics::counter!(ROWS_APPENDED, "stage" => name).increment(written);
            debug!(
                "{name}: batch {} appended {written} of {read} rows",
                stats.batches
            );

            self.state = LoaderState::Idle;
        }

        self.state = LoaderState::Done;
        info!(
            "{name}: read {} rows in {} batches, appended {}",
            stats.rows_read, stats.batches, stats.rows_appended
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        source::VecSource,
        store::{memory::AppendCall, MemoryStore},
    };

    fn codes_spec(transform: TransformFn) -> DimensionSpec {
        DimensionSpec {
            name: "codes",
            table: "code_dimension",
            dedupe_fields: None,
            transform,
            batch_key_fields: &["code"],
            relation_key_fields: &["code"],
            source_columns: &["code"],
            target_columns: &["code"],
        }
    }

    fn codes(values: &[&str]) -> Batch {
        Batch::from_records(&["code"], values.iter().map(|c| vec![("code", *c)])).unwrap()
    }

    fn setup() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.create_relation("code_dimension", Some("sk_code"), &["code"]);
        store
    }

    #[tokio::test]
    async fn test_later_batches_see_earlier_appends() {
        let store = setup();
        let mut loader = DimensionLoader::new(store.clone(), codes_spec(identity()));
        let mut source = VecSource::new(vec![codes(&["A", "B"]), codes(&["B", "C"])]);

        let stats = loader.load(&mut source).await.unwrap();
        assert_eq!(loader.state(), LoaderState::Done);
        assert_eq!(stats.rows_read, 4);
        assert_eq!(stats.rows_appended, 3);
        assert_eq!(
            store.appends(),
            vec![
                AppendCall {
                    relation: "code_dimension".to_string(),
                    rows: 2
                },
                AppendCall {
                    relation: "code_dimension".to_string(),
                    rows: 1
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_rerun_appends_nothing() {
        let store = setup();
        for expected in [2, 0] {
            let mut loader = DimensionLoader::new(store.clone(), codes_spec(identity()));
            let mut source = VecSource::new(vec![codes(&["A", "B", "A"])]);
            let stats = loader.load(&mut source).await.unwrap();
            assert_eq!(stats.rows_appended, expected);
        }
        assert_eq!(store.appends().len(), 1);
        assert_eq!(store.snapshot("code_dimension").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_source_batches_are_skipped() {
        let store = setup();
        let mut loader = DimensionLoader::new(store.clone(), codes_spec(identity()));
        let mut source = VecSource::new(vec![codes(&[]), codes(&["A"]), codes(&[])]);

        let stats = loader.load(&mut source).await.unwrap();
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.rows_appended, 1);
    }

    #[tokio::test]
    async fn test_transform_emptying_batch_fails() {
        let store = setup();
        let drop_all: TransformFn = Box::new(|batch: Batch| {
            let mask = vec![false; batch.len()];
            Ok(batch.filter(&mask)?)
        });
        let mut loader = DimensionLoader::new(store.clone(), codes_spec(drop_all));
        let mut source = VecSource::new(vec![codes(&["A"])]);

        let res = loader.load(&mut source).await;
        assert!(matches!(res, Err(LoadError::EmptyBatch { stage }) if stage == "codes"));
        assert_eq!(loader.state(), LoaderState::Transforming);
        assert!(store.appends().is_empty());
    }

    #[tokio::test]
    async fn test_append_failure_stops_the_load() {
        // No relation created, so the first read of it fails
        let store = Arc::new(MemoryStore::new());
        let mut loader = DimensionLoader::new(store.clone(), codes_spec(identity()));
        let mut source = VecSource::new(vec![codes(&["A"]), codes(&["B"])]);

        assert!(matches!(
            loader.load(&mut source).await,
            Err(LoadError::Store(_))
        ));
        assert_eq!(loader.state(), LoaderState::DetectingNew);
        // The second batch is never read
        assert_eq!(source.next_batch().await.unwrap(), Some(codes(&["B"])));
    }
}
