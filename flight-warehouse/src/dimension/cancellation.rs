use super::DimensionSpec;
use crate::{
    error::LoadError,
    source::ColumnSpec,
    types::{Batch, Value},
};

pub const TABLE: &str = "cancel_dimension";

const FIELDS: &[&str] = &["Cancelled", "CancellationCode", "reason"];
const COLUMNS: &[&str] = &["is_cancelled", "cancellation_code", "reason"];

pub fn source_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::int("Cancelled"),
        // Not cancelled rows have an empty code, which has to stay "" to match on lookup
        ColumnSpec::text("CancellationCode"),
    ]
}

pub fn reason(code: &Value) -> &'static str {
    match code.as_str() {
        Some("A") => "Carrier",
        Some("B") => "Weather",
        Some("C") => "NAS",
        Some("D") => "Security",
        _ => "N/A",
    }
}

pub fn transform(mut batch: Batch) -> Result<Batch, LoadError> {
    let code_idx = batch.column_index("CancellationCode")?;
    batch.derive_column("reason", |record| {
        Value::from(reason(&record.values()[code_idx]))
    })?;
    Ok(batch)
}

pub fn spec() -> DimensionSpec {
    DimensionSpec {
        name: "cancellation",
        table: TABLE,
        dedupe_fields: None,
        transform: Box::new(transform),
        batch_key_fields: FIELDS,
        relation_key_fields: COLUMNS,
        source_columns: FIELDS,
        target_columns: COLUMNS,
    }
}
