use chrono::NaiveDate;

use super::DimensionSpec;
use crate::{
    error::LoadError,
    source::ColumnSpec,
    types::{Batch, Value},
};

pub const TABLE: &str = "date_dimension";

const KEY_FIELDS: &[&str] = &["Year", "Month", "DayofMonth", "DayOfWeek"];
const KEY_COLUMNS: &[&str] = &["year", "month", "day_of_month", "day_of_week"];
const FIELDS: &[&str] = &["Year", "Month", "DayofMonth", "DayOfWeek", "full_date"];
const COLUMNS: &[&str] = &["year", "month", "day_of_month", "day_of_week", "full_date"];

pub fn source_columns() -> Vec<ColumnSpec> {
    KEY_FIELDS.iter().map(|f| ColumnSpec::int(f)).collect()
}

fn full_date(year: &Value, month: &Value, day: &Value) -> Option<NaiveDate> {
    let year = i32::try_from(year.as_i64()?).ok()?;
    let month = u32::try_from(month.as_i64()?).ok()?;
    let day = u32::try_from(day.as_i64()?).ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Adds `full_date` built from the year, month and day columns.
pub fn transform(mut batch: Batch) -> Result<Batch, LoadError> {
    let [year, month, day] = [
        batch.column_index("Year")?,
        batch.column_index("Month")?,
        batch.column_index("DayofMonth")?,
    ];

    let dates = batch
        .rows()
        .iter()
        .map(|row| {
            full_date(&row[year], &row[month], &row[day])
                .map(Value::Date)
                .ok_or_else(|| LoadError::InvalidRecord {
                    stage: "date".to_string(),
                    message: format!(
                        "no such date: year {}, month {}, day {}",
                        row[year], row[month], row[day]
                    ),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    batch.append_column("full_date", dates)?;
    Ok(batch)
}

pub fn spec() -> DimensionSpec {
    DimensionSpec {
        name: "date",
        table: TABLE,
        dedupe_fields: Some(KEY_FIELDS),
        transform: Box::new(transform),
        batch_key_fields: KEY_FIELDS,
        relation_key_fields: KEY_COLUMNS,
        source_columns: FIELDS,
        target_columns: COLUMNS,
    }
}
