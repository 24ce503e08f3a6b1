use crate::{AppState, error::AppError};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use core_types::{CalculationDefinition, ReportResult, ReportTemplate};
use calculations::RegistryError;
use database::{DbError, ExecutionLogEntry};
use reporting::{ExecutionOptions, Preview, SampleFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub calculations: usize,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub names: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub order: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CycleRequest {
    pub cycle_code: i32,
    /// Overrides `execution.timeout_ms` for this request.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ExecutionsQuery {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    20
}

/// # GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        calculations: state.registry.len(),
    })
}

// --- Calculations ---

/// # GET /api/calculations
pub async fn list_calculations(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<CalculationDefinition>> {
    Json(state.registry.all())
}

/// # GET /api/calculations/:name
pub async fn get_calculation(
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<CalculationDefinition>, AppError> {
    state
        .registry
        .get(&name)
        .map(Json)
        .ok_or_else(|| AppError::Registry(RegistryError::UnknownCalculation(vec![name])))
}

/// # POST /api/calculations
/// The registry accepts the definition first; if it cannot be stored the registration is
/// undone. The name stays pending until the save settles, so nothing can come to depend
/// on it in between.
pub async fn create_calculation(
    State(state): State<Arc<AppState>>,
    Json(definition): Json<CalculationDefinition>,
) -> Result<(StatusCode, Json<CalculationDefinition>), AppError> {
    let _pending = state.pending.begin(&definition.name, &definition.dependencies)?;
    state.registry.register(definition.clone())?;
    if let Err(e) = state.db_repo.save_calculation(&definition).await {
        return Err(rolled_back(&definition.name, e, state.registry.delete(&definition.name)));
    }
    tracing::info!(calculation = %definition.name, "Calculation created.");
    Ok((StatusCode::CREATED, Json(definition)))
}

/// # PUT /api/calculations/:name
pub async fn update_calculation(
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(definition): Json<CalculationDefinition>,
) -> Result<Json<CalculationDefinition>, AppError> {
    let _pending = state.pending.begin(&name, &definition.dependencies)?;
    let previous = state.registry.update(&name, definition.clone())?;
    if let Err(e) = state.db_repo.save_calculation(&definition).await {
        return Err(rolled_back(&name, e, state.registry.update(&name, previous)));
    }
    Ok(Json(definition))
}

/// # DELETE /api/calculations/:name
pub async fn delete_calculation(
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, AppError> {
    let _pending = state.pending.begin(&name, &[])?;
    let dependents = state.registry.dependents_of(&name);
    if !dependents.is_empty() {
        return Err(RegistryError::Conflict { name, dependents }.into());
    }
    let templates = state.db_repo.templates_using(&name).await?;
    if !templates.is_empty() {
        return Err(AppError::Conflict {
            message: format!(
                "Calculation '{name}' is selected by templates: {}",
                templates.join(", ")
            ),
            names: vec![name],
        });
    }

    let removed = state.registry.delete(&name)?;
    if let Err(e) = state.db_repo.delete_calculation(&name).await {
        return Err(rolled_back(&name, e, state.registry.register(removed)));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// # POST /api/calculations/:name/preview
/// The body is an optional sample filter; omitted fields use the `[preview]` settings.
pub async fn preview_calculation(
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
    sample: Option<Json<SampleFilter>>,
) -> Result<Json<Preview>, AppError> {
    let sample = sample.map(|Json(s)| s).unwrap_or_default();
    let preview = state.service.preview_calculation(&name, &sample)?;
    Ok(Json(preview))
}

/// # POST /api/resolve
pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<ResolveResponse>, AppError> {
    let order = state.registry.resolve_names(&request.names)?;
    Ok(Json(ResolveResponse { order }))
}

// --- Report templates ---

/// # GET /api/templates
pub async fn list_templates(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ReportTemplate>>, AppError> {
    Ok(Json(state.db_repo.list_templates().await?))
}

/// # GET /api/templates/:name
pub async fn get_template(
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReportTemplate>, AppError> {
    Ok(Json(load_template(&state, &name).await?))
}

/// # POST /api/templates
/// Templates are validated against the registry before they are stored.
pub async fn save_template(
    State(state): State<Arc<AppState>>,
    Json(template): Json<ReportTemplate>,
) -> Result<(StatusCode, Json<ReportTemplate>), AppError> {
    if template.name.trim().is_empty() {
        return Err(AppError::BadRequest("template name must not be empty".to_string()));
    }
    state.service.validate_template(&template)?;
    state.db_repo.save_template(&template).await?;
    tracing::info!(template = %template.name, "Template saved.");
    Ok((StatusCode::CREATED, Json(template)))
}

/// # DELETE /api/templates/:name
pub async fn delete_template(
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, AppError> {
    state.db_repo.delete_template(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// # POST /api/templates/:name/preview
pub async fn preview_template(
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<CycleRequest>,
) -> Result<Json<Preview>, AppError> {
    let template = load_template(&state, &name).await?;
    Ok(Json(state.service.preview_template(&template, request.cycle_code)?))
}

/// # POST /api/templates/:name/execute
pub async fn execute_template(
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<CycleRequest>,
) -> Result<Json<ReportResult>, AppError> {
    let template = load_template(&state, &name).await?;
    let options = ExecutionOptions {
        timeout: request.timeout_ms.map(Duration::from_millis),
        cancel: None,
    };
    let result = state
        .service
        .execute_template(&template, request.cycle_code, options)
        .await?;
    Ok(Json(result))
}

/// # GET /api/templates/:name/executions
pub async fn list_executions(
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExecutionsQuery>,
) -> Result<Json<Vec<ExecutionLogEntry>>, AppError> {
    let entries = state
        .db_repo
        .list_executions(&name, query.limit.clamp(1, 500))
        .await?;
    Ok(Json(entries))
}

/// Turns a failed store write into the response error once its registry change has been
/// undone, or reports that the undo itself failed.
pub(crate) fn rolled_back<T>(
    name: &str,
    store_error: DbError,
    rollback: Result<T, RegistryError>,
) -> AppError {
    match rollback {
        Ok(_) => store_error.into(),
        Err(rollback_error) => {
            tracing::error!(
                calculation = %name,
                store_error = %store_error,
                rollback_error = %rollback_error,
                "Rollback failed; registry and database disagree."
            );
            let mut names = vec![name.to_string()];
            names.extend(
                rollback_error
                    .names()
                    .into_iter()
                    .filter(|other| other != name),
            );
            AppError::Inconsistent {
                message: format!(
                    "Calculation '{name}' was not saved ({store_error}) and the registry \
                     change could not be undone ({rollback_error})"
                ),
                names,
            }
        }
    }
}

async fn load_template(state: &AppState, name: &str) -> Result<ReportTemplate, AppError> {
    state.db_repo.get_template(name).await.map_err(|e| match e {
        database::DbError::NotFound => AppError::NotFound(format!("template '{name}'")),
        other => other.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use calculations::CalculationRegistry;
    use core_types::{AggregationFunction, GroupLevel, SourceModel};

    fn total_balance() -> CalculationDefinition {
        CalculationDefinition::new(
            "total_balance",
            AggregationFunction::Sum,
            SourceModel::TrancheBal,
            "tr_end_bal_amt",
            GroupLevel::Deal,
        )
    }

    #[test]
    fn undone_write_reports_the_store_error() {
        let registry = CalculationRegistry::new();
        registry.register(total_balance()).unwrap();

        let err = rolled_back(
            "total_balance",
            DbError::InvalidRow("connection reset".to_string()),
            registry.delete("total_balance"),
        );
        assert!(matches!(err, AppError::Database(_)));
        assert!(registry.get("total_balance").is_none());
    }

    #[test]
    fn failed_undo_is_logged_and_surfaced() {
        // A dependent registered while the save was in flight blocks the undo.
        let registry = CalculationRegistry::new();
        registry.register(total_balance()).unwrap();
        registry
            .register(
                CalculationDefinition::new(
                    "wavg_rate",
                    AggregationFunction::WeightedAvg,
                    SourceModel::TrancheBal,
                    "tr_pass_thru_rte",
                    GroupLevel::Deal,
                )
                .with_weight("tr_end_bal_amt")
                .with_dependencies(["total_balance"]),
            )
            .unwrap();

        let err = rolled_back(
            "total_balance",
            DbError::InvalidRow("connection reset".to_string()),
            registry.delete("total_balance"),
        );
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let message = err.to_string();
        assert!(message.contains("connection reset"));
        assert!(message.contains("still referenced by: wavg_rate"));
        match err {
            AppError::Inconsistent { names, .. } => {
                assert_eq!(names, vec!["total_balance", "wavg_rate"]);
            }
            other => panic!("expected an inconsistency, got {other:?}"),
        }
    }
}
