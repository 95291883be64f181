use super::{identity, DimensionSpec};
use crate::source::ColumnSpec;

pub const TABLE: &str = "carrier_dimension";

const FIELDS: &[&str] = &["Code", "Description"];
const COLUMNS: &[&str] = &["code", "description"];

// Read from carriers.csv rather than the year file
pub fn source_columns() -> Vec<ColumnSpec> {
    vec![ColumnSpec::text("Code"), ColumnSpec::text("Description")]
}

pub fn spec() -> DimensionSpec {
    DimensionSpec {
        name: "carrier",
        table: TABLE,
        dedupe_fields: None,
        transform: identity(),
        batch_key_fields: FIELDS,
        relation_key_fields: COLUMNS,
        source_columns: FIELDS,
        target_columns: COLUMNS,
    }
}
