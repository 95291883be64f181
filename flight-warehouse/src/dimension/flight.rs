use super::{identity, DimensionSpec};
use crate::source::ColumnSpec;

pub const TABLE: &str = "flight_dimension";

const FIELDS: &[&str] = &["FlightNum", "TailNum"];
const COLUMNS: &[&str] = &["flight_number", "tail_number"];

pub fn source_columns() -> Vec<ColumnSpec> {
    vec![ColumnSpec::int("FlightNum"), ColumnSpec::text("TailNum")]
}

pub fn spec() -> DimensionSpec {
    DimensionSpec {
        name: "flight",
        table: TABLE,
        dedupe_fields: None,
        transform: identity(),
        batch_key_fields: FIELDS,
        relation_key_fields: COLUMNS,
        source_columns: FIELDS,
        target_columns: COLUMNS,
    }
}
