use crate::DbError;
use core_types::{BindValue, CellValue, KeyFields, ReportRow};
use rust_decimal::Decimal;
use sqlx::postgres::{PgArguments, PgPool, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row, TypeInfo};
use std::collections::BTreeMap;

/// Read-only access to the warehouse tables for compiled report statements.
#[derive(Debug, Clone)]
pub struct WarehouseReader {
    pool: PgPool,
}

impl WarehouseReader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs a compiled statement and decodes each row.
    ///
    /// The first `key_columns` columns are the deal number and, for tranche reports, the
    /// tranche id. The cells that follow are named by position from `columns`, since
    /// Postgres truncates long aliases.
    pub async fn fetch_rows(
        &self,
        sql: &str,
        params: &[BindValue],
        key_columns: usize,
        columns: &[String],
    ) -> Result<Vec<ReportRow>, DbError> {
        let query = params.iter().fold(sqlx::query(sql), bind_value);
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| decode_row(row, key_columns, columns))
            .collect()
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &BindValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        BindValue::Int(v) => query.bind(*v),
        BindValue::IntArray(v) => query.bind(v.clone()),
        BindValue::TextArray(v) => query.bind(v.clone()),
    }
}

fn decode_row(row: &PgRow, key_columns: usize, columns: &[String]) -> Result<ReportRow, DbError> {
    let deal_number: i32 = row.try_get(0)?;
    let tranche_id: Option<String> = if key_columns > 1 {
        Some(row.try_get(1)?)
    } else {
        None
    };

    if row.len() != key_columns + columns.len() {
        return Err(DbError::InvalidRow(format!(
            "expected {} columns, got {}",
            key_columns + columns.len(),
            row.len()
        )));
    }
    let mut values = BTreeMap::new();
    for (offset, name) in columns.iter().enumerate() {
        values.insert(name.clone(), decode_cell(row, key_columns + offset)?);
    }

    Ok(ReportRow {
        key_fields: KeyFields {
            deal_number,
            tranche_id,
        },
        values,
    })
}

/// Decodes one cell by its Postgres type. NULL stays `None`.
fn decode_cell(row: &PgRow, index: usize) -> Result<Option<CellValue>, DbError> {
    let column = row.column(index);
    let cell = match column.type_info().name() {
        "NUMERIC" => row.try_get::<Option<Decimal>, _>(index)?.map(CellValue::Decimal),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(CellValue::Integer),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)?
            .map(|v| CellValue::Integer(i64::from(v))),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)?
            .map(|v| CellValue::Integer(i64::from(v))),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(CellValue::Float),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)?
            .map(|v| CellValue::Float(f64::from(v))),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
            row.try_get::<Option<String>, _>(index)?.map(CellValue::Text)
        }
        other => {
            return Err(DbError::UnsupportedColumnType {
                column: column.name().to_string(),
                type_name: other.to_string(),
            });
        }
    };
    Ok(cell)
}
