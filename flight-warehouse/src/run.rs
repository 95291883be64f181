use std::{path::Path, sync::Arc, time::Instant};

use serde::Serialize;
use tracing::info;

use crate::{
    config::Config,
    dimension::{
        cancellation, carrier, date, flight,
        travel::{self, Airports},
        DimensionLoader, DimensionSpec, LoadStats,
    },
    error::{InStage, LoadError, RunError},
    fact::{flight_arrival, FactLoader, FactStats},
    metrics_consts::STAGE_TIME,
    raw::fetch_raw_data,
    source::{read_all, ColumnSpec, CsvSource},
    store::Store,
};

pub const RAW_DATA_STAGE: &str = "raw_data";
pub const FACT_STAGE: &str = "flight_arrival_fact";

#[derive(Debug, Clone, Serialize)]
pub struct DimensionSummary {
    pub stage: &'static str,
    #[serde(flatten)]
    pub stats: LoadStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub year: i32,
    pub dimensions: Vec<DimensionSummary>,
    pub fact: FactStats,
}

async fn load_dimension(
    store: Arc<dyn Store>,
    spec: DimensionSpec,
    path: &Path,
    columns: Vec<ColumnSpec>,
    chunk_size: Option<usize>,
) -> Result<LoadStats, LoadError> {
    let name = spec.name;
    let start = Instant::now();
    info!("loading {name} dimension from {}", path.display());

    let mut source = CsvSource::open(path, columns, chunk_size)?;
    let stats = DimensionLoader::new(store, spec).load(&mut source).await?;

    metrics::histogram!(STAGE_TIME, "stage" => name).record(start.elapsed().as_secs_f64());
    info!("loading {name} dimension... ok! ({:?})", start.elapsed());
    Ok(stats)
}

async fn load_airports(path: &Path) -> Result<Airports, LoadError> {
    let mut source = CsvSource::open(path, travel::airport_columns(), None)?;
    let airports = Airports::new(&read_all(&mut source).await?)?;
    info!("read {} airports from {}", airports.len(), path.display());
    Ok(airports)
}

/// Loads one year of the dataset: every dimension first, then the fact table. Stops at
/// the first failing stage.
pub async fn run(config: &Config, store: Arc<dyn Store>) -> Result<RunSummary, RunError> {
    let start = Instant::now();
    info!("**** loading data for {}", config.year);

    let year_file = fetch_raw_data(config).await.in_stage(RAW_DATA_STAGE)?;
    let chunk_size = config.chunk_size();

    let mut dimensions = Vec::new();
    let carriers_file = config.carriers_file();
    let stages = [
        (cancellation::spec(), &year_file, cancellation::source_columns()),
        (carrier::spec(), &carriers_file, carrier::source_columns()),
        (date::spec(), &year_file, date::source_columns()),
        (flight::spec(), &year_file, flight::source_columns()),
    ];
    for (spec, path, columns) in stages {
        let stage = spec.name;
        let stats = load_dimension(store.clone(), spec, path, columns, chunk_size)
            .await
            .in_stage(stage)?;
        dimensions.push(DimensionSummary { stage, stats });
    }

    let airports = load_airports(&config.airports_file())
        .await
        .in_stage("travel")?;
    let stats = load_dimension(
        store.clone(),
        travel::spec(airports),
        &year_file,
        travel::source_columns(),
        chunk_size,
    )
    .await
    .in_stage("travel")?;
    dimensions.push(DimensionSummary {
        stage: "travel",
        stats,
    });

    info!("loading fact...");
    let fact_start = Instant::now();
    let mut source = CsvSource::open(&year_file, flight_arrival::source_columns(), chunk_size)
        .in_stage(FACT_STAGE)?;
    let fact = FactLoader::new(store, flight_arrival::spec())
        .load(&mut source)
        .await
        .in_stage(FACT_STAGE)?;
    metrics::histogram!(STAGE_TIME, "stage" => FACT_STAGE)
        .record(fact_start.elapsed().as_secs_f64());

    let summary = RunSummary {
        year: config.year,
        dimensions,
        fact,
    };
    info!(
        "data loaded in {:?}: {}",
        start.elapsed(),
        serde_json::to_string(&summary).unwrap_or_default()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, fs, io::Write};

    use envconfig::Envconfig;
    use tempfile::TempDir;

    use super::*;
    use crate::{store::MemoryStore, types::Value};

    const HEADER: &str = "Year,Month,DayofMonth,DayOfWeek,DepTime,CRSDepTime,ArrTime,CRSArrTime,\
        UniqueCarrier,FlightNum,TailNum,ActualElapsedTime,CRSElapsedTime,AirTime,ArrDelay,\
        DepDelay,Origin,Dest,Distance,TaxiIn,TaxiOut,Cancelled,CancellationCode,Diverted,\
        CarrierDelay,WeatherDelay,NASDelay,SecurityDelay,LateAircraftDelay";

    const ROWS: &[&str] = &[
        "2008,1,3,4,2003,1955,2211,2225,WN,335,N712SW,128,150,116,-14,8,IAD,TPA,810,4,8,0,,0,NA,NA,NA,NA,NA",
        "2008,1,3,4,754,735,1002,1000,WN,3231,N772SW,128,145,113,2,19,IAD,TPA,810,5,10,0,,0,NA,NA,NA,NA,NA",
        "2008,1,4,5,NA,700,NA,830,WN,448,N428WN,NA,90,NA,NA,NA,TPA,IAD,810,NA,NA,1,A,0,NA,NA,NA,NA,NA",
    ];

    fn fact_columns() -> Vec<&'static str> {
        let mut columns = vec!["sk_flight", "sk_date", "sk_carrier", "sk_travel", "sk_cancel"];
        columns.extend([
            "actual_departure_time",
            "scheduled_departure_time",
            "arrival_time",
            "scheduled_arrival_time",
            "actual_elapsed_time",
            "estimated_elapsed_time",
            "air_time",
            "arrival_delay",
            "departure_delay",
            "taxi_in_time",
            "taxi_out_time",
            "diverted",
            "carrier_delay",
            "weather_delay",
            "nas_delay",
            "security_delay",
            "late_aircraft_delay",
        ]);
        columns
    }

    fn warehouse() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.create_relation(
            cancellation::TABLE,
            Some("sk_cancel"),
            &["is_cancelled", "cancellation_code", "reason"],
        );
        store.create_relation(carrier::TABLE, Some("sk_carrier"), &["code", "description"]);
        store.create_relation(
            date::TABLE,
            Some("sk_date"),
            &["year", "month", "day_of_month", "day_of_week", "full_date"],
        );
        store.create_relation(
            flight::TABLE,
            Some("sk_flight"),
            &["flight_number", "tail_number"],
        );
        store.create_relation(
            travel::TABLE,
            Some("sk_travel"),
            &[
                "distance",
                "origin_airport_iata",
                "origin_airport_name",
                "origin_city",
                "origin_state",
                "origin_country",
                "origin_latitude",
                "origin_longitude",
                "dest_airport_iata",
                "dest_airport_name",
                "dest_city",
                "dest_state",
                "dest_country",
                "dest_latitude",
                "dest_longitude",
            ],
        );
        store.create_relation(flight_arrival::TABLE, Some("sk_arrival"), &fact_columns());
        store
    }

    fn raw_dir(carriers: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        let file = fs::File::create(dir.path().join("2008.csv.bz2")).unwrap();
        let mut encoder = bzip2::write::BzEncoder::new(file, bzip2::Compression::default());
        writeln!(encoder, "{HEADER}").unwrap();
        for row in ROWS {
            writeln!(encoder, "{row}").unwrap();
        }
        encoder.finish().unwrap();

        fs::write(dir.path().join("carriers.csv"), carriers).unwrap();
        fs::write(
            dir.path().join("airports.csv"),
            "\"iata\",\"airport\",\"city\",\"state\",\"country\",\"lat\",\"long\"\n\
             \"IAD\",\"Washington Dulles International\",\"Chantilly\",\"VA\",\"USA\",38.94453194,-77.45580972\n\
             \"TPA\",\"Tampa International \",\"Tampa\",\"FL\",\"USA\",27.97547222,-82.53325\n",
        )
        .unwrap();
        dir
    }

    fn config(dir: &TempDir) -> Config {
        let env = HashMap::from([
            ("FL_ARR_YEAR".to_string(), "2008".to_string()),
            (
                "RAW_DATA_DIR".to_string(),
                dir.path().display().to_string(),
            ),
            ("CHUNK_SIZE".to_string(), "2".to_string()),
            ("DOWNLOAD_RAW_DATA".to_string(), "false".to_string()),
        ]);
        Config::init_from_hashmap(&env).unwrap()
    }

    const CARRIERS: &str = "Code,Description\n\"WN\",\"Southwest Airlines Co.\"\n";

    #[tokio::test]
    async fn test_full_run() {
        let dir = raw_dir(CARRIERS);
        let store = warehouse();

        let summary = run(&config(&dir), store.clone()).await.unwrap();

        let appended: Vec<_> = summary
            .dimensions
            .iter()
            .map(|d| (d.stage, d.stats.rows_appended))
            .collect();
        assert_eq!(
            appended,
            vec![
                ("cancellation", 2),
                ("carrier", 1),
                ("date", 2),
                ("flight", 3),
                ("travel", 2)
            ]
        );
        assert_eq!(summary.fact.rows_appended, 3);

        let facts = store.snapshot(flight_arrival::TABLE).unwrap();
        let cancelled = facts.record(2).unwrap();
        assert_eq!(cancelled.get("sk_cancel"), Some(&Value::Int(2)));
        assert_eq!(cancelled.get("sk_date"), Some(&Value::Int(2)));
        assert_eq!(cancelled.get("actual_departure_time"), Some(&Value::from("0:00")));
        assert_eq!(cancelled.get("scheduled_departure_time"), Some(&Value::from("7:00")));
        assert_eq!(cancelled.get("arrival_delay"), Some(&Value::Int(0)));
    }

    #[tokio::test]
    async fn test_rerun_adds_facts_but_no_dimension_rows() {
        let dir = raw_dir(CARRIERS);
        let store = warehouse();

        run(&config(&dir), store.clone()).await.unwrap();
        let summary = run(&config(&dir), store.clone()).await.unwrap();

        assert!(summary.dimensions.iter().all(|d| d.stats.rows_appended == 0));
        assert_eq!(summary.fact.rows_appended, 3);
        assert_eq!(store.snapshot(flight_arrival::TABLE).unwrap().len(), 6);
        assert_eq!(store.snapshot(date::TABLE).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_carrier_fails_fact_stage() {
        let dir = raw_dir("Code,Description\n\"AA\",\"American Airlines Inc.\"\n");
        let store = warehouse();

        let err = run(&config(&dir), store.clone()).await.unwrap_err();
        assert_eq!(err.stage, FACT_STAGE);
        assert!(matches!(
            err.source,
            LoadError::LookupIntegrity {
                before: 2,
                after: 0,
                ..
            }
        ));
        // Dimensions were loaded before the fact failed
        let flights = store.snapshot(flight::TABLE).unwrap();
        assert_eq!(flights.len(), 3);
        assert!(store.snapshot(flight_arrival::TABLE).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_raw_data_fails_first_stage() {
        let dir = TempDir::new().unwrap();
        let err = run(&config(&dir), warehouse()).await.unwrap_err();
        assert_eq!(err.stage, RAW_DATA_STAGE);
        assert!(matches!(err.source, LoadError::SourceUnavailable(_)));
    }

    #[test]
    fn test_summary_serializes_flat() {
        let summary = RunSummary {
            year: 2008,
            dimensions: vec![DimensionSummary {
                stage: "carrier",
                stats: LoadStats {
                    batches: 1,
                    rows_read: 2,
                    rows_after_dedupe: 2,
                    rows_new: 1,
                    rows_appended: 1,
                },
            }],
            fact: FactStats::default(),
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["dimensions"][0]["stage"], "carrier");
        assert_eq!(json["dimensions"][0]["rows_new"], 1);
        assert_eq!(json["fact"]["rows_appended"], 0);
    }
}
