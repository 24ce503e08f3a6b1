use crate::error::ExecutionError;
use async_trait::async_trait;
use chrono::Utc;
use compiler::CompiledQuery;
use core_types::{BindValue, ReportResult, ReportRow};
use database::WarehouseReader;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Runs compiled statements against a data store.
///
/// The executor only sees this trait, so tests can run reports against rows held in
/// memory and the PostgreSQL reader stays in the database crate.
#[async_trait]
pub trait QueryRunner: Send + Sync {
    /// Returns one row per result row. Cells are named after `columns`, which follow the
    /// `key_columns` leading key columns of the statement.
    async fn run(
        &self,
        sql: &str,
        params: &[BindValue],
        key_columns: usize,
        columns: &[String],
    ) -> Result<Vec<ReportRow>, ExecutionError>;
}

#[async_trait]
impl QueryRunner for WarehouseReader {
    async fn run(
        &self,
        sql: &str,
        params: &[BindValue],
        key_columns: usize,
        columns: &[String],
    ) -> Result<Vec<ReportRow>, ExecutionError> {
        let rows = self.fetch_rows(sql, params, key_columns, columns).await?;
        Ok(rows)
    }
}

/// Per-call execution limits.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Overrides the executor's default deadline.
    pub timeout: Option<Duration>,
    /// Flipping the channel to `true` aborts the running query.
    pub cancel: Option<watch::Receiver<bool>>,
}

impl ExecutionOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel: None,
        }
    }
}

/// Where a result came from; copied onto the `ReportResult`.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext<'a> {
    pub template_name: Option<&'a str>,
    pub cycle_code: i32,
}

/// Runs compiled report statements and shapes their rows into a `ReportResult`.
#[derive(Clone)]
pub struct ReportExecutor {
    runner: Arc<dyn QueryRunner>,
    default_timeout: Duration,
}

impl ReportExecutor {
    pub fn new(runner: Arc<dyn QueryRunner>, default_timeout: Duration) -> Self {
        Self {
            runner,
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub async fn execute(
        &self,
        query: &CompiledQuery,
        context: ExecutionContext<'_>,
        options: ExecutionOptions,
    ) -> Result<ReportResult, ExecutionError> {
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let started = Instant::now();

        let run = self.runner.run(
            &query.sql,
            &query.params,
            query.key_column_count(),
            &query.columns,
        );
        let outcome = tokio::select! {
            biased;
            _ = cancelled(options.cancel) => Err(ExecutionError::Cancelled),
            result = tokio::time::timeout(timeout, run) => match result {
                Ok(rows) => rows,
                Err(_) => Err(ExecutionError::DeadlineExceeded {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }),
            },
        };
        let execution_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut rows = match outcome {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(
                    template = context.template_name.unwrap_or("-"),
                    cycle_code = context.cycle_code,
                    elapsed_ms = execution_time_ms,
                    error = %e,
                    "Report execution failed."
                );
                return Err(e);
            }
        };

        // A missing cell reads as null, so every row carries every column.
        for row in &mut rows {
            for column in &query.columns {
                row.values.entry(column.clone()).or_insert(None);
            }
        }

        tracing::info!(
            template = context.template_name.unwrap_or("-"),
            cycle_code = context.cycle_code,
            rows = rows.len(),
            elapsed_ms = execution_time_ms,
            "Report executed."
        );

        Ok(ReportResult {
            template_name: context.template_name.map(str::to_string),
            aggregation_level: query.aggregation_level,
            cycle_code: context.cycle_code,
            columns: query.columns.clone(),
            row_count: rows.len(),
            rows,
            execution_time_ms,
            generated_at: Utc::now(),
        })
    }
}

/// Resolves once the token reads `true`. Never resolves without a token, or after every
/// sender is gone.
async fn cancelled(cancel: Option<watch::Receiver<bool>>) {
    let Some(mut cancel) = cancel else {
        return std::future::pending().await;
    };
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}
