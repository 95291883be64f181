use std::collections::HashMap;

use tracing::debug;

use super::DimensionSpec;
use crate::{
    error::LoadError,
    source::ColumnSpec,
    types::{Batch, Value},
};

pub const TABLE: &str = "travel_dimension";

const AIRPORT_FIELDS: &[&str] = &["iata", "airport", "city", "state", "country", "lat", "long"];
const KEY_COLUMNS: &[&str] = &["origin_airport_iata", "dest_airport_iata"];
const COLUMNS: &[&str] = &[
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
];

pub fn source_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::text("Origin"),
        ColumnSpec::text("Dest"),
        ColumnSpec::int("Distance"),
    ]
}

pub fn airport_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::text("iata"),
        ColumnSpec::text("airport"),
        ColumnSpec::text("city"),
        ColumnSpec::text("state"),
        ColumnSpec::text("country"),
        ColumnSpec::float("lat"),
        ColumnSpec::float("long"),
    ]
}

/// Airport attributes by IATA code, in airports.csv column order.
pub struct Airports {
    by_iata: HashMap<String, Vec<Value>>,
}

impl Airports {
    pub fn new(airports: &Batch) -> Result<Self, LoadError> {
        let indices = airports.column_indices(AIRPORT_FIELDS)?;
        let mut by_iata = HashMap::with_capacity(airports.len());
        for row in airports.rows() {
            let Some(iata) = row[indices[0]].as_str() else {
                continue;
            };
            // First entry for a code wins
            by_iata
                .entry(iata.to_string())
                .or_insert_with(|| indices.iter().map(|i| row[*i].clone()).collect());
        }
        Ok(Self { by_iata })
    }

    pub fn len(&self) -> usize {
        self.by_iata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_iata.is_empty()
    }

    /// Joins each route against the airports on both ends. Routes with an unknown origin
    /// or destination are dropped.
    pub fn transform(&self, batch: Batch) -> Result<Batch, LoadError> {
        let [origin, dest, distance] = [
            batch.column_index("Origin")?,
            batch.column_index("Dest")?,
            batch.column_index("Distance")?,
        ];

        let mut out = Batch::new(COLUMNS.iter().map(|c| c.to_string()).collect())?;
        let mut unmatched = 0;
        for row in batch.rows() {
            let origin_airport = row[origin].as_str().and_then(|o| self.by_iata.get(o));
            let dest_airport = row[dest].as_str().and_then(|d| self.by_iata.get(d));
            let (Some(origin_airport), Some(dest_airport)) = (origin_airport, dest_airport) else {
                unmatched += 1;
                continue;
            };

            let mut joined = Vec::with_capacity(COLUMNS.len());
            joined.push(row[distance].clone());
            joined.extend(origin_airport.iter().cloned());
            joined.extend(dest_airport.iter().cloned());
            out.push_row(joined)?;
        }

        if unmatched > 0 {
            debug!("travel: dropped {unmatched} routes with unknown airports");
        }
        Ok(out)
    }
}

pub fn spec(airports: Airports) -> DimensionSpec {
    DimensionSpec {
        name: "travel",
        table: TABLE,
        // One batch must not insert the same route twice with different distances
        dedupe_fields: Some(&["Origin", "Dest"]),
        transform: Box::new(move |batch: Batch| airports.transform(batch)),
        batch_key_fields: KEY_COLUMNS,
        relation_key_fields: KEY_COLUMNS,
        source_columns: COLUMNS,
        target_columns: COLUMNS,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{dimension::DimensionLoader, source::VecSource, store::MemoryStore};

    fn airports() -> Airports {
        let batch = Batch::from_records(
            AIRPORT_FIELDS,
            [
                ("JFK", "John F Kennedy Intl", "New York", "NY", 40.64, -73.77),
                ("LAX", "Los Angeles International", "Los Angeles", "CA", 33.94, -118.40),
                ("IAD", "Washington Dulles International", "Chantilly", "VA", 38.94, -77.45),
            ]
            .into_iter()
            .map(|(iata, name, city, state, lat, long)| {
                vec![
                    ("iata", Value::from(iata)),
                    ("airport", Value::from(name)),
                    ("city", Value::from(city)),
                    ("state", Value::from(state)),
                    ("country", Value::from("USA")),
                    ("lat", Value::from(lat)),
                    ("long", Value::from(long)),
                ]
            }),
        )
        .unwrap();
        Airports::new(&batch).unwrap()
    }

    fn routes(rows: &[(&str, &str, i64)]) -> Batch {
        Batch::from_records(
            &["Origin", "Dest", "Distance"],
            rows.iter().map(|(o, d, dist)| {
                vec![
                    ("Origin", Value::from(*o)),
                    ("Dest", Value::from(*d)),
                    ("Distance", Value::from(*dist)),
                ]
            }),
        )
        .unwrap()
    }

    #[test]
    fn test_joins_both_ends() {
        let airports = airports();
        assert_eq!(airports.len(), 3);
        let batch = airports
            .transform(routes(&[("JFK", "LAX", 2475), ("JFK", "XXX", 10)]))
            .unwrap();

        assert_eq!(batch.columns(), COLUMNS);
        assert_eq!(batch.len(), 1);
        let record = batch.record(0).unwrap();
        assert_eq!(record.get("distance"), Some(&Value::Int(2475)));
        assert_eq!(record.get("origin_city"), Some(&Value::from("New York")));
        assert_eq!(record.get("dest_airport_iata"), Some(&Value::from("LAX")));
        assert_eq!(record.get("dest_latitude"), Some(&Value::Float(33.94)));
    }

    #[tokio::test]
    async fn test_route_pairs_load_once() {
        let store = Arc::new(MemoryStore::new());
        store.create_relation(TABLE, Some("sk_travel"), COLUMNS);

        let mut source = VecSource::new(vec![
            routes(&[("JFK", "LAX", 2475), ("JFK", "LAX", 2474), ("IAD", "JFK", 228)]),
            routes(&[("LAX", "JFK", 2475), ("IAD", "JFK", 228)]),
        ]);
        let stats = DimensionLoader::new(store.clone(), spec(airports()))
            .load(&mut source)
            .await
            .unwrap();

        assert_eq!(stats.rows_appended, 3);
        let stored = store.snapshot(TABLE).unwrap();
        assert_eq!(stored.value(0, "distance").unwrap(), Some(&Value::Int(2475)));
        assert_eq!(
            stored.value(2, "origin_airport_iata").unwrap(),
            Some(&Value::from("LAX"))
        );
    }

    #[tokio::test]
    async fn test_batch_of_unknown_airports_fails() {
        let store = Arc::new(MemoryStore::new());
        store.create_relation(TABLE, Some("sk_travel"), COLUMNS);

        let mut source = VecSource::new(vec![routes(&[("XXX", "YYY", 1)])]);
        let res = DimensionLoader::new(store.clone(), spec(airports()))
            .load(&mut source)
            .await;
        assert!(matches!(res, Err(LoadError::EmptyBatch { .. })));
    }
}
