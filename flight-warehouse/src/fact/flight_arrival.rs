use super::FactSpec;
use crate::{
    dimension::{cancellation, carrier, date, flight, travel},
    error::LoadError,
    resolve::Lookup,
    source::ColumnSpec,
    types::{Batch, Value},
};

pub const TABLE: &str = "flight_arrival_fact";

const RENAMES: &[(&str, &str)] = &[
    ("DepTime", "actual_departure_time"),
    ("CRSDepTime", "scheduled_departure_time"),
    ("ArrTime", "arrival_time"),
    ("CRSArrTime", "scheduled_arrival_time"),
    ("ActualElapsedTime", "actual_elapsed_time"),
    ("CRSElapsedTime", "estimated_elapsed_time"),
    ("AirTime", "air_time"),
    ("ArrDelay", "arrival_delay"),
    ("DepDelay", "departure_delay"),
    ("TaxiIn", "taxi_in_time"),
    ("TaxiOut", "taxi_out_time"),
    ("Diverted", "diverted"),
    ("CarrierDelay", "carrier_delay"),
    ("WeatherDelay", "weather_delay"),
    ("NASDelay", "nas_delay"),
    ("SecurityDelay", "security_delay"),
    ("LateAircraftDelay", "late_aircraft_delay"),
];

// HHMM integers in the source
const CLOCK_COLUMNS: &[&str] = &[
    "actual_departure_time",
    "scheduled_departure_time",
    "arrival_time",
    "scheduled_arrival_time",
];

pub fn source_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::int("Year"),
        ColumnSpec::int("Month"),
        ColumnSpec::int("DayofMonth"),
        ColumnSpec::int("DayOfWeek"),
        ColumnSpec::int("DepTime"),
        ColumnSpec::int("CRSDepTime"),
        ColumnSpec::int("ArrTime"),
        ColumnSpec::int("CRSArrTime"),
        ColumnSpec::text("UniqueCarrier"),
        ColumnSpec::int("FlightNum"),
        ColumnSpec::text("TailNum"),
        ColumnSpec::int("ActualElapsedTime"),
        ColumnSpec::int("CRSElapsedTime"),
        ColumnSpec::int("AirTime"),
        ColumnSpec::int("ArrDelay"),
        ColumnSpec::int("DepDelay"),
        ColumnSpec::text("Origin"),
        ColumnSpec::text("Dest"),
        ColumnSpec::int("Distance"),
        ColumnSpec::int("TaxiIn"),
        ColumnSpec::int("TaxiOut"),
        ColumnSpec::int("Cancelled"),
        ColumnSpec::text("CancellationCode"),
        ColumnSpec::int("Diverted"),
        ColumnSpec::int("CarrierDelay"),
        ColumnSpec::int("WeatherDelay"),
        ColumnSpec::int("NASDelay"),
        ColumnSpec::int("SecurityDelay"),
        ColumnSpec::int("LateAircraftDelay"),
    ]
}

pub fn lookups() -> Vec<Lookup> {
    vec![
        Lookup::new(
            flight::TABLE,
            &["FlightNum", "TailNum"],
            &["flight_number", "tail_number"],
            "sk_flight",
        ),
        Lookup::new(
            date::TABLE,
            &["Year", "Month", "DayofMonth", "DayOfWeek"],
            &["year", "month", "day_of_month", "day_of_week"],
            "sk_date",
        ),
        Lookup::new(carrier::TABLE, &["UniqueCarrier"], &["code"], "sk_carrier"),
        Lookup::new(
            travel::TABLE,
            &["Origin", "Dest"],
            &["origin_airport_iata", "dest_airport_iata"],
            "sk_travel",
        ),
        Lookup::new(
            cancellation::TABLE,
            &["Cancelled", "CancellationCode"],
            &["is_cancelled", "cancellation_code"],
            "sk_cancel",
        ),
    ]
}

// 5 -> "0:05", 1530 -> "15:30"
pub fn format_clock(hhmm: i64) -> String {
    format!("{}:{:02}", hhmm / 100, hhmm % 100)
}

fn fill_missing(value: &Value) -> Value {
    match value {
        Value::Null => Value::Int(0),
        Value::Float(f) => Value::Int(f.trunc() as i64),
        other => other.clone(),
    }
}

pub fn transform(mut batch: Batch) -> Result<Batch, LoadError> {
    batch.rename_columns(RENAMES)?;

    for (_, measure) in RENAMES {
        batch.map_column(measure, fill_missing)?;
    }

    for column in CLOCK_COLUMNS {
        let idx = batch.column_index(column)?;
        if let Some(bad) = batch
            .rows()
            .iter()
            .map(|row| &row[idx])
            .find(|v| v.as_i64().is_none())
        {
            return Err(LoadError::InvalidRecord {
                stage: "flight_arrival".to_string(),
                message: format!("{column} is not an HHMM time: {bad}"),
            });
        }
        batch.map_column(column, |v| match v.as_i64() {
            Some(hhmm) => Value::from(format_clock(hhmm)),
            None => v.clone(),
        })?;
    }

    batch.drop_columns(&["Distance"])?;
    Ok(batch)
}

pub fn spec() -> FactSpec {
    FactSpec {
        name: "flight_arrival",
        table: TABLE,
        lookups: lookups(),
        interval_lookups: vec![],
        transform: Box::new(transform),
    }
}
