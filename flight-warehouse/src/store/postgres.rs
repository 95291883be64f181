use std::io;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use sqlx::{
    postgres::{types::PgMoney, PgColumn, PgPoolCopyExt, PgPoolOptions, PgRow},
    Column, Executor, PgPool, Row, Statement, TypeInfo,
};
use tracing::debug;

use super::{check_mapping, quote_ident, Query, Store};
use crate::{
    config::Config,
    error::StoreError,
    types::{Batch, Value},
};

// Rough guess at a CSV-encoded row, to size the COPY buffer up front
const ESTIMATED_RECORD_SIZE: usize = 128;

// COPY's CSV mode reads an unquoted empty field as NULL by default, which would turn
// empty strings into NULLs. Using an explicit marker keeps the two apart.
const NULL_MARKER: &str = "\\N";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &Config) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_pg_connections)
            .connect(&config.database_url)
            .await
            .map_err(StoreError::PoolCreation)?;
        Ok(Self::new(pool))
    }
}

fn query_error(command: &str, error: sqlx::Error) -> StoreError {
    StoreError::Query {
        command: command.to_string(),
        error,
    }
}

fn decode_cell(row: &PgRow, idx: usize, column: &PgColumn) -> Result<Value, StoreError> {
    let decode_err = |e| query_error("decode", e);
    let value = match column.type_info().name() {
        "INT2" => Value::from(
            row.try_get::<Option<i16>, _>(idx)
                .map_err(decode_err)?
                .map(i64::from),
        ),
        "INT4" => Value::from(
            row.try_get::<Option<i32>, _>(idx)
                .map_err(decode_err)?
                .map(i64::from),
        ),
        "INT8" => Value::from(row.try_get::<Option<i64>, _>(idx).map_err(decode_err)?),
        "FLOAT4" => Value::from(
            row.try_get::<Option<f32>, _>(idx)
                .map_err(decode_err)?
                .map(f64::from),
        ),
        "FLOAT8" => Value::from(row.try_get::<Option<f64>, _>(idx).map_err(decode_err)?),
        "BOOL" => Value::from(row.try_get::<Option<bool>, _>(idx).map_err(decode_err)?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" => {
            Value::from(row.try_get::<Option<String>, _>(idx).map_err(decode_err)?)
        }
        // Money comes back in cents; range lookups only need it as a number
        "MONEY" => Value::from(
            row.try_get::<Option<PgMoney>, _>(idx)
                .map_err(decode_err)?
                .map(|m| m.0 as f64 / 100.0),
        ),
        // Range bounds are compared as floats, so exact decimals are widened here
        "NUMERIC" => Value::from(
            row.try_get::<Option<Decimal>, _>(idx)
                .map_err(decode_err)?
                .and_then(|d| d.to_f64()),
        ),
        "DATE" => Value::from(
            row.try_get::<Option<NaiveDate>, _>(idx)
                .map_err(decode_err)?,
        ),
        other => {
            return Err(StoreError::UnsupportedType {
                column: column.name().to_string(),
                type_name: other.to_string(),
            })
        }
    };
    Ok(value)
}

fn encode_cell(value: &Value) -> String {
    match value {
        Value::Null => NULL_MARKER.to_string(),
        // Text is always quoted, so a literal \N stays text instead of reading back as NULL
        Value::Str(s) => format!("\"{}\"", s.replace('"', "\"\"")),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        other => other.to_string(),
    }
}

// Cells arrive already quoted by `encode_cell`, so the writer must not quote again
fn encode_rows(batch: &Batch, indices: &[usize]) -> Result<Vec<u8>, csv::Error> {
    // set up CSV in mem buffer for capturing the row data; try to
    // avoid too many buffer extension allocations as we fill it
    let buffer = Vec::with_capacity(batch.len() * ESTIMATED_RECORD_SIZE);
    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(b',')
        .has_headers(false)
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(buffer);

    for row in batch.rows() {
        csv_writer.write_record(indices.iter().map(|i| encode_cell(&row[*i])))?;
    }
    csv_writer.flush()?;
    csv_writer
        .into_inner()
        .map_err(|e| csv::Error::from(io::Error::new(e.error().kind(), e.error().to_string())))
}

fn render_query(query: &Query) -> String {
    match query {
        Query::Projection { table, columns } => {
            let columns: Vec<_> = columns.iter().map(|c| quote_ident(c)).collect();
            format!("SELECT {} FROM {}", columns.join(", "), quote_ident(table))
        }
        Query::Sql(sql) => sql.clone(),
    }
}

fn copy_statement(table: &str, columns: &[&str]) -> String {
    let columns: Vec<_> = columns.iter().map(|c| quote_ident(c)).collect();
    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT CSV, NULL '{}', ENCODING 'UTF8')",
        quote_ident(table),
        columns.join(", "),
        NULL_MARKER
    )
}

#[async_trait]
impl Store for PgStore {
    async fn query(&self, query: &Query) -> Result<Batch, StoreError> {
        let sql = render_query(query);

        // Preparing first gives us the column list even when no rows come back
        let statement = (&self.pool)
            .prepare(sql.as_str())
            .await
            .map_err(|e| query_error("prepare", e))?;
        let columns: Vec<PgColumn> = statement.columns().to_vec();
        let rows = statement
            .query()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error("select", e))?;

        let names = columns.iter().map(|c| c.name().to_string()).collect();
        let mut batch = Batch::new(names)?;
        for row in rows.iter() {
            let values = columns
                .iter()
                .enumerate()
                .map(|(idx, column)| decode_cell(row, idx, column))
                .collect::<Result<Vec<_>, _>>()?;
            batch.push_row(values)?;
        }

        debug!("fetched {} rows for: {}", batch.len(), sql);
        Ok(batch)
    }

    async fn append(
        &self,
        batch: &Batch,
        target_relation: &str,
        target_columns: &[&str],
        source_columns: &[&str],
    ) -> Result<u64, StoreError> {
        check_mapping(target_relation, target_columns, source_columns)?;
        let indices = batch.column_indices(source_columns)?;
        if batch.is_empty() {
            return Ok(0);
        }

        let payload = encode_rows(batch, &indices).map_err(|error| StoreError::Encode {
            table: target_relation.to_string(),
            error,
        })?;

        let copy_err = |error| StoreError::Copy {
            table: target_relation.to_string(),
            error,
        };

        // A single COPY statement is atomic - if anything fails before finish() returns,
        // none of the rows are visible.
        let statement = copy_statement(target_relation, target_columns);
        let mut stream = self.pool.copy_in_raw(&statement).await.map_err(copy_err)?;
        if let Err(e) = stream.send(payload.as_slice()).await {
            let _unused = stream
                .abort(format!("failed to send COPY IN record: {e}"))
                .await;
            return Err(copy_err(e));
        }
        let rows_affected = stream.finish().await.map_err(copy_err)?;

        debug!("copied {} rows into {}", rows_affected, target_relation);
        Ok(rows_affected)
    }
}
