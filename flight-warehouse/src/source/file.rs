use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use async_trait::async_trait;
use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;
use tracing::debug;

use super::{ChunkedSource, ColumnKind, ColumnSpec};
use crate::{
    error::LoadError,
    types::{Batch, Value},
};

// The dataset marks missing numbers with "NA"
const MISSING_MARKER: &str = "NA";

/// Reads a delimited file with a header row, returning only the requested columns,
/// typed per their spec. `.bz2` and `.gz` files are decompressed on the fly.
pub struct CsvSource {
    path: String,
    reader: csv::Reader<Box<dyn Read + Send>>,
    columns: Vec<ColumnSpec>,
    positions: Vec<usize>,
    chunk_size: Option<usize>,
    record: csv::StringRecord,
    line: u64,
    done: bool,
}

impl CsvSource {
    pub fn open(
        path: impl AsRef<Path>,
        columns: Vec<ColumnSpec>,
        chunk_size: Option<usize>,
    ) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let path_name = path.display().to_string();
        let file = File::open(path)
            .map_err(|e| LoadError::SourceUnavailable(format!("{path_name}: {e}")))?;

        let inner: Box<dyn Read + Send> = match path.extension().and_then(|e| e.to_str()) {
            Some("bz2") => Box::new(MultiBzDecoder::new(BufReader::new(file))),
            Some("gz") => Box::new(MultiGzDecoder::new(BufReader::new(file))),
            _ => Box::new(BufReader::new(file)),
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(inner);

        let headers = reader
            .headers()
            .map_err(|e| LoadError::SourceUnavailable(format!("{path_name}: {e}")))?
            .clone();

        let positions = columns
            .iter()
            .map(|spec| {
                headers
                    .iter()
                    .position(|h| h.trim() == spec.name)
                    .ok_or_else(|| {
                        LoadError::SourceUnavailable(format!(
                            "{path_name} has no column {}",
                            spec.name
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!("opened {} with columns {:?}", path_name, headers);

        Ok(Self {
            path: path_name,
            reader,
            columns,
            positions,
            // A zero-row chunk would end the source before anything is read
            chunk_size: chunk_size.filter(|n| *n > 0),
            record: csv::StringRecord::new(),
            line: 1,
            done: false,
        })
    }

    fn parse_cell(&self, spec: &ColumnSpec, raw: &str) -> Result<Value, LoadError> {
        let invalid = |what: &str| LoadError::Source {
            path: self.path.clone(),
            message: format!(
                "line {}: column {} has invalid {what} '{raw}'",
                self.line, spec.name
            ),
        };

        match spec.kind {
            ColumnKind::Text => Ok(Value::Str(raw.to_string())),
            ColumnKind::Int => {
                let trimmed = raw.trim();
                if trimmed.is_empty() || trimmed == MISSING_MARKER {
                    return Ok(Value::Null);
                }
                if let Ok(i) = trimmed.parse::<i64>() {
                    return Ok(Value::Int(i));
                }
                // Some exports write whole numbers as "12.0"
                match trimmed.parse::<f64>() {
                    Ok(f) if f.fract() == 0.0 && fits_i64(f) => Ok(Value::Int(f as i64)),
                    _ => Err(invalid("integer")),
                }
            }
            ColumnKind::Float => {
                let trimmed = raw.trim();
                if trimmed.is_empty() || trimmed == MISSING_MARKER {
                    return Ok(Value::Null);
                }
                trimmed
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| invalid("number"))
            }
        }
    }

    fn read_chunk(&mut self) -> Result<Option<Batch>, LoadError> {
        if self.done {
            return Ok(None);
        }

        let names = self.columns.iter().map(|c| c.name.clone()).collect();
        let mut batch = Batch::new(names)?;
        let limit = self.chunk_size.unwrap_or(usize::MAX);

        while batch.len() < limit {
            let more = self
                .reader
                .read_record(&mut self.record)
                .map_err(|e| LoadError::Source {
                    path: self.path.clone(),
                    message: e.to_string(),
                })?;
            if !more {
                self.done = true;
                break;
            }
            self.line += 1;

            let mut row = Vec::with_capacity(self.columns.len());
            for (spec, pos) in self.columns.iter().zip(&self.positions) {
                let raw = self.record.get(*pos).unwrap_or("");
                row.push(self.parse_cell(spec, raw)?);
            }
            batch.push_row(row)?;
        }

        if batch.is_empty() {
            return Ok(None);
        }
        Ok(Some(batch))
    }
}

// `as` saturates, so anything outside [-2^63, 2^63) has to be rejected first
fn fits_i64(f: f64) -> bool {
    f.is_finite() && f >= -(2f64.powi(63)) && f < 2f64.powi(63)
}

#[async_trait]
impl ChunkedSource for CsvSource {
    async fn next_batch(&mut self) -> Result<Option<Batch>, LoadError> {
        // Chunks are processed strictly one after another, so there's nothing to gain
        // from moving the (blocking) read off this task
        self.read_chunk()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, io::Write};
    use tempfile::TempDir;

    const YEAR_FILE: &str = "Year,Month,DayofMonth,FlightNum,TailNum,ArrDelay,CancellationCode\n\
        2008,1,3,335,N712SW,-14,\n\
        2008,1,3,3231,N772SW,2,\n\
        2008,1,4,448,N428WN,NA,A\n";

    fn specs() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::int("FlightNum"),
            ColumnSpec::text("TailNum"),
            ColumnSpec::float("ArrDelay"),
            ColumnSpec::text("CancellationCode"),
        ]
    }

    fn write_plain(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("2008.csv");
        fs::write(&path, YEAR_FILE).unwrap();
        path
    }

    #[tokio::test]
    async fn test_reads_in_chunks() {
        let dir = TempDir::new().unwrap();
        let path = write_plain(&dir);
        let mut source = CsvSource::open(&path, specs(), Some(2)).unwrap();

        let first = source.next_batch().await.unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(
            first.columns(),
            &["FlightNum", "TailNum", "ArrDelay", "CancellationCode"]
        );
        assert_eq!(
            first.rows()[0],
            vec![
                Value::Int(335),
                Value::from("N712SW"),
                Value::Float(-14.0),
                Value::from("")
            ]
        );

        let second = source.next_batch().await.unwrap().unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second.value(0, "ArrDelay").unwrap(), Some(&Value::Null));
        assert_eq!(
            second.value(0, "CancellationCode").unwrap(),
            Some(&Value::from("A"))
        );

        assert!(source.next_batch().await.unwrap().is_none());
        assert!(source.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_chunk_size_reads_everything() {
        let dir = TempDir::new().unwrap();
        let path = write_plain(&dir);
        let mut source = CsvSource::open(&path, specs(), None).unwrap();
        assert_eq!(source.next_batch().await.unwrap().unwrap().len(), 3);
        assert!(source.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reads_bz2() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("2008.csv.bz2");
        let file = fs::File::create(&path).unwrap();
        let mut encoder = bzip2::write::BzEncoder::new(file, bzip2::Compression::default());
        encoder.write_all(YEAR_FILE.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let mut source = CsvSource::open(&path, specs(), Some(10)).unwrap();
        let batch = source.next_batch().await.unwrap().unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.value(2, "TailNum").unwrap(), Some(&Value::from("N428WN")));
    }

    #[tokio::test]
    async fn test_reads_gzip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("2008.csv.gz");
        let file = fs::File::create(&path).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder.write_all(YEAR_FILE.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let mut source = CsvSource::open(&path, specs(), None).unwrap();
        assert_eq!(source.next_batch().await.unwrap().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_zero_chunk_size_reads_everything() {
        let dir = TempDir::new().unwrap();
        let path = write_plain(&dir);
        let mut source = CsvSource::open(&path, specs(), Some(0)).unwrap();
        assert_eq!(source.next_batch().await.unwrap().unwrap().len(), 3);
        assert!(source.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_whole_floats_read_as_integers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("floats.csv");
        fs::write(&path, "FlightNum\n12.0\n-3.0\n").unwrap();
        let mut source = CsvSource::open(&path, vec![ColumnSpec::int("FlightNum")], None).unwrap();
        let batch = source.next_batch().await.unwrap().unwrap();
        let values: Vec<_> = batch.column_values("FlightNum").unwrap().cloned().collect();
        assert_eq!(values, vec![Value::Int(12), Value::Int(-3)]);
    }

    #[tokio::test]
    async fn test_out_of_range_integer_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("huge.csv");
        fs::write(&path, "FlightNum\n1e20\n").unwrap();
        let mut source = CsvSource::open(&path, vec![ColumnSpec::int("FlightNum")], None).unwrap();
        let err = source.next_batch().await.unwrap_err();
        match err {
            LoadError::Source { message, .. } => assert!(message.contains("invalid integer")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_fits_i64() {
        assert!(fits_i64(-(2f64.powi(63))));
        assert!(fits_i64(9.0e18));
        assert!(!fits_i64(2f64.powi(63)));
        assert!(!fits_i64(1e20));
        assert!(!fits_i64(f64::NAN));
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let res = CsvSource::open("/definitely/not/here.csv", specs(), None);
        assert!(matches!(res, Err(LoadError::SourceUnavailable(_))));
    }

    #[test]
    fn test_missing_column_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = write_plain(&dir);
        let res = CsvSource::open(&path, vec![ColumnSpec::text("Origin")], None);
        assert!(matches!(res, Err(LoadError::SourceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_bad_integer_is_reported_with_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "FlightNum\n12\nabc\n").unwrap();
        let mut source = CsvSource::open(&path, vec![ColumnSpec::int("FlightNum")], None).unwrap();
        let err = source.next_batch().await.unwrap_err();
        match err {
            LoadError::Source { message, .. } => assert!(message.starts_with("line 3")),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
