use crate::DbError;
use chrono::{DateTime, Utc};
use core_types::{CalculationDefinition, DerivedFormula, ReportTemplate, TrancheRef};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use sqlx::postgres::PgPool;
use uuid::Uuid;

/// The `DbRepository` provides a high-level, application-specific interface
/// to the definition store and execution journal. It encapsulates all SQL for them.
#[derive(Debug, Clone)]
pub struct DbRepository {
    pool: PgPool,
}

// This struct represents a row fetched from the calculations table.
#[derive(FromRow, Debug, Clone)]
struct CalculationRow {
    name: String,
    description: Option<String>,
    aggregation_function: String,
    source_model: String,
    source_field: String,
    weight_field: Option<String>,
    group_level: String,
    dependencies: JsonValue,
    derived: Option<JsonValue>,
}

impl TryFrom<CalculationRow> for CalculationDefinition {
    type Error = DbError;

    fn try_from(row: CalculationRow) -> Result<Self, Self::Error> {
        let invalid = |e: core_types::CoreError| {
            DbError::InvalidRow(format!("calculation '{}': {e}", row.name))
        };
        let dependencies: Vec<String> = serde_json::from_value(row.dependencies.clone())?;
        let derived: Option<DerivedFormula> = row
            .derived
            .clone()
            .map(serde_json::from_value)
            .transpose()?;

        Ok(CalculationDefinition {
            aggregation_function: row.aggregation_function.parse().map_err(invalid)?,
            source_model: row.source_model.parse().map_err(invalid)?,
            group_level: row.group_level.parse().map_err(invalid)?,
            name: row.name,
            description: row.description,
            source_field: row.source_field,
            weight_field: row.weight_field,
            dependencies,
            derived,
        })
    }
}

#[derive(FromRow, Debug, Clone)]
struct TemplateRow {
    name: String,
    description: Option<String>,
    aggregation_level: String,
    selected_deals: Vec<i32>,
    selected_tranches: JsonValue,
    selected_calculations: Vec<String>,
}

impl TryFrom<TemplateRow> for ReportTemplate {
    type Error = DbError;

    fn try_from(row: TemplateRow) -> Result<Self, Self::Error> {
        let aggregation_level = row
            .aggregation_level
            .parse()
            .map_err(|e| DbError::InvalidRow(format!("template '{}': {e}", row.name)))?;
        let selected_tranches: Vec<TrancheRef> = serde_json::from_value(row.selected_tranches)?;
        Ok(ReportTemplate {
            name: row.name,
            description: row.description,
            aggregation_level,
            selected_deals: row.selected_deals,
            selected_tranches,
            selected_calculations: row.selected_calculations,
        })
    }
}

/// One journaled report execution, successful or not.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub id: Uuid,
    pub template_name: Option<String>,
    pub cycle_code: i32,
    pub row_count: i32,
    pub execution_time_ms: i64,
    pub success: bool,
    pub error_message: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl ExecutionLogEntry {
    pub fn succeeded(
        template_name: Option<String>,
        cycle_code: i32,
        row_count: usize,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            template_name,
            cycle_code,
            row_count: i32::try_from(row_count).unwrap_or(i32::MAX),
            execution_time_ms: i64::try_from(execution_time_ms).unwrap_or(i64::MAX),
            success: true,
            error_message: None,
            executed_at: Utc::now(),
        }
    }

    pub fn failed(
        template_name: Option<String>,
        cycle_code: i32,
        execution_time_ms: u64,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            template_name,
            cycle_code,
            row_count: 0,
            execution_time_ms: i64::try_from(execution_time_ms).unwrap_or(i64::MAX),
            success: false,
            error_message: Some(error_message.into()),
            executed_at: Utc::now(),
        }
    }
}

impl DbRepository {
    /// Creates a new `DbRepository` with a shared database connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // --- Calculations ---

    /// Fetches every stored calculation, ordered by name.
    pub async fn load_calculations(&self) -> Result<Vec<CalculationDefinition>, DbError> {
        let rows = sqlx::query_as::<_, CalculationRow>(
            r#"
            SELECT name, description, aggregation_function, source_model, source_field,
                   weight_field, group_level, dependencies, derived
            FROM calculations
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CalculationDefinition::try_from).collect()
    }

    /// Inserts or replaces a calculation.
    /// Uses `ON CONFLICT DO UPDATE` so the same call serves create and update.
    pub async fn save_calculation(&self, definition: &CalculationDefinition) -> Result<(), DbError> {
        let dependencies = serde_json::to_value(&definition.dependencies)?;
        let derived = definition
            .derived
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO calculations (
                name, description, aggregation_function, source_model, source_field,
                weight_field, group_level, dependencies, derived, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW())
            ON CONFLICT (name) DO UPDATE SET
                description = EXCLUDED.description,
                aggregation_function = EXCLUDED.aggregation_function,
                source_model = EXCLUDED.source_model,
                source_field = EXCLUDED.source_field,
                weight_field = EXCLUDED.weight_field,
                group_level = EXCLUDED.group_level,
                dependencies = EXCLUDED.dependencies,
                derived = EXCLUDED.derived,
                updated_at = NOW()
            "#,
        )
        .bind(&definition.name)
        .bind(&definition.description)
        .bind(definition.aggregation_function.as_str())
        .bind(definition.source_model.as_str())
        .bind(&definition.source_field)
        .bind(&definition.weight_field)
        .bind(definition.group_level.as_str())
        .bind(dependencies)
        .bind(derived)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Deletes a calculation. Returns `DbError::NotFound` if no row matched.
    pub async fn delete_calculation(&self, name: &str) -> Result<(), DbError> {
        let result = sqlx::query("DELETE FROM calculations WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    // --- Report templates ---

    pub async fn list_templates(&self) -> Result<Vec<ReportTemplate>, DbError> {
        let rows = sqlx::query_as::<_, TemplateRow>(
            r#"
            SELECT name, description, aggregation_level, selected_deals,
                   selected_tranches, selected_calculations
            FROM report_templates
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ReportTemplate::try_from).collect()
    }

    pub async fn get_template(&self, name: &str) -> Result<ReportTemplate, DbError> {
        let row = sqlx::query_as::<_, TemplateRow>(
            r#"
            SELECT name, description, aggregation_level, selected_deals,
                   selected_tranches, selected_calculations
            FROM report_templates
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| if let sqlx::Error::RowNotFound = e { DbError::NotFound } else { e.into() })?;

        ReportTemplate::try_from(row)
    }

    /// Inserts or replaces a report template.
    pub async fn save_template(&self, template: &ReportTemplate) -> Result<(), DbError> {
        let selected_tranches = serde_json::to_value(&template.selected_tranches)?;

        sqlx::query(
            r#"
            INSERT INTO report_templates (
                name, description, aggregation_level, selected_deals,
                selected_tranches, selected_calculations, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            ON CONFLICT (name) DO UPDATE SET
                description = EXCLUDED.description,
                aggregation_level = EXCLUDED.aggregation_level,
                selected_deals = EXCLUDED.selected_deals,
                selected_tranches = EXCLUDED.selected_tranches,
                selected_calculations = EXCLUDED.selected_calculations,
                updated_at = NOW()
            "#,
        )
        .bind(&template.name)
        .bind(&template.description)
        .bind(template.aggregation_level.as_str())
        .bind(&template.selected_deals)
        .bind(selected_tranches)
        .bind(&template.selected_calculations)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete_template(&self, name: &str) -> Result<(), DbError> {
        let result = sqlx::query("DELETE FROM report_templates WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Names of stored templates that select `calculation`, used to refuse deleting a
    /// calculation a saved report still needs.
    pub async fn templates_using(&self, calculation: &str) -> Result<Vec<String>, DbError> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT name FROM report_templates WHERE $1 = ANY(selected_calculations) ORDER BY name",
        )
        .bind(calculation)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    // --- Execution journal ---

    pub async fn record_execution(&self, entry: &ExecutionLogEntry) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO report_execution_logs (
                id, template_name, cycle_code, row_count, execution_time_ms,
                success, error_message, executed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.template_name)
        .bind(entry.cycle_code)
        .bind(entry.row_count)
        .bind(entry.execution_time_ms)
        .bind(entry.success)
        .bind(&entry.error_message)
        .bind(entry.executed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The most recent executions of a template, newest first.
    pub async fn list_executions(
        &self,
        template_name: &str,
        limit: i64,
    ) -> Result<Vec<ExecutionLogEntry>, DbError> {
        let entries = sqlx::query_as::<_, ExecutionLogEntry>(
            r#"
            SELECT id, template_name, cycle_code, row_count, execution_time_ms,
                   success, error_message, executed_at
            FROM report_execution_logs
            WHERE template_name = $1
            ORDER BY executed_at DESC
            LIMIT $2
            "#,
        )
        .bind(template_name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}
