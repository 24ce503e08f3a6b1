use crate::error::ReportError;
use crate::executor::{ExecutionContext, ExecutionOptions, QueryRunner, ReportExecutor};
use calculations::CalculationRegistry;
use compiler::{CompiledQuery, LevelPolicy, ReportFilter, ReportQueryAssembler, validate_template};
use configuration::{Config, PreviewSettings};
use core_types::{AggregationLevel, ReportResult, ReportTemplate, TrancheRef};
use database::{DbRepository, ExecutionLogEntry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Filter used to preview a single calculation. Missing fields fall back to the
/// `[preview]` settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SampleFilter {
    #[serde(default)]
    pub deals: Option<Vec<i32>>,
    /// Applied to every sample deal.
    #[serde(default)]
    pub tranche_ids: Option<Vec<String>>,
    #[serde(default)]
    pub cycle_code: Option<i32>,
    /// Defaults to the calculation's own group level.
    #[serde(default)]
    pub aggregation_level: Option<AggregationLevel>,
}

impl SampleFilter {
    pub fn to_filter(&self, defaults: &PreviewSettings) -> ReportFilter {
        let deals = self
            .deals
            .clone()
            .unwrap_or_else(|| defaults.sample_deals.clone());
        let tranche_ids = self
            .tranche_ids
            .as_ref()
            .unwrap_or(&defaults.sample_tranche_ids);
        let tranches: Vec<TrancheRef> = deals
            .iter()
            .flat_map(|deal| tranche_ids.iter().map(|id| TrancheRef::new(*deal, id.clone())))
            .collect();
        ReportFilter::new(
            deals,
            tranches,
            self.cycle_code.unwrap_or(defaults.sample_cycle),
        )
    }
}

/// A compiled statement together with the filter it was compiled for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preview {
    pub filter: ReportFilter,
    #[serde(flatten)]
    pub query: CompiledQuery,
}

/// The entry point for previews and executions.
///
/// Preview and execution compile through the same path, so a preview shows exactly the
/// statement and parameters an execution with the same filter would run.
#[derive(Clone)]
pub struct ReportService {
    registry: Arc<CalculationRegistry>,
    executor: ReportExecutor,
    policy: LevelPolicy,
    preview: PreviewSettings,
    journal: Option<DbRepository>,
}

impl ReportService {
    pub fn new(
        registry: Arc<CalculationRegistry>,
        runner: Arc<dyn QueryRunner>,
        config: &Config,
    ) -> Self {
        Self {
            registry,
            executor: ReportExecutor::new(runner, config.execution.timeout()),
            policy: LevelPolicy::new(config.compiler.allow_deal_broadcast),
            preview: config.preview.clone(),
            journal: None,
        }
    }

    /// Journals every template execution to the database.
    pub fn with_journal(mut self, journal: DbRepository) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn registry(&self) -> &Arc<CalculationRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> LevelPolicy {
        self.policy
    }

    fn assembler(&self) -> ReportQueryAssembler<'_> {
        ReportQueryAssembler::new(&self.registry, self.policy)
    }

    /// Checks a template against the current registry. Returns the resolved join order.
    pub fn validate_template(&self, template: &ReportTemplate) -> Result<Vec<String>, ReportError> {
        Ok(validate_template(template, &self.registry, self.policy)?)
    }

    pub fn compile_template(
        &self,
        template: &ReportTemplate,
        cycle_code: i32,
    ) -> Result<CompiledQuery, ReportError> {
        Ok(self.assembler().assemble_template(template, cycle_code)?)
    }

    pub fn preview_template(
        &self,
        template: &ReportTemplate,
        cycle_code: i32,
    ) -> Result<Preview, ReportError> {
        let query = self.compile_template(template, cycle_code)?;
        let filter = ReportFilter::for_template(template, cycle_code);
        Ok(Preview { filter, query })
    }

    /// Compiles a one-column report for a single calculation over a sample filter.
    pub fn preview_calculation(
        &self,
        name: &str,
        sample: &SampleFilter,
    ) -> Result<Preview, ReportError> {
        let level = match sample.aggregation_level {
            Some(level) => level,
            None => {
                let definition = self.registry.get(name).ok_or_else(|| {
                    compiler::CompileError::from(calculations::RegistryError::UnknownCalculation(
                        vec![name.to_string()],
                    ))
                })?;
                definition.group_level
            }
        };
        let filter = sample.to_filter(&self.preview);
        let query = self.assembler().assemble(level, &filter, &[name])?;
        Ok(Preview { filter, query })
    }

    /// Compiles and runs a template for one cycle.
    pub async fn execute_template(
        &self,
        template: &ReportTemplate,
        cycle_code: i32,
        options: ExecutionOptions,
    ) -> Result<ReportResult, ReportError> {
        let started = Instant::now();
        let outcome = self.run_template(template, cycle_code, options).await;

        if let Some(journal) = &self.journal {
            let entry = match &outcome {
                Ok(result) => ExecutionLogEntry::succeeded(
                    Some(template.name.clone()),
                    cycle_code,
                    result.row_count,
                    result.execution_time_ms,
                ),
                Err(e) => ExecutionLogEntry::failed(
                    Some(template.name.clone()),
                    cycle_code,
                    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    e.to_string(),
                ),
            };
            // The journal is bookkeeping; a failed write must not fail the report.
            if let Err(e) = journal.record_execution(&entry).await {
                tracing::warn!(template = %template.name, error = %e, "Failed to journal report execution.");
            }
        }

        outcome
    }

    async fn run_template(
        &self,
        template: &ReportTemplate,
        cycle_code: i32,
        options: ExecutionOptions,
    ) -> Result<ReportResult, ReportError> {
        let query = self.compile_template(template, cycle_code)?;
        let context = ExecutionContext {
            template_name: Some(&template.name),
            cycle_code,
        };
        Ok(self.executor.execute(&query, context, options).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::tests::{MemoryRunner, deal_row};
    use compiler::CompileError;
    use core_types::{AggregationFunction, BindValue, CalculationDefinition, GroupLevel, SourceModel};

    fn registry() -> Arc<CalculationRegistry> {
        let registry = CalculationRegistry::new();
        registry
            .register(CalculationDefinition::new(
                "total_balance",
                AggregationFunction::Sum,
                SourceModel::TrancheBal,
                "tr_end_bal_amt",
                GroupLevel::Deal,
            ))
            .unwrap();
        registry
            .register(
                CalculationDefinition::new(
                    "wavg_rate",
                    AggregationFunction::WeightedAvg,
                    SourceModel::TrancheBal,
                    "tr_pass_thru_rte",
                    GroupLevel::Deal,
                )
                .with_weight("tr_end_bal_amt"),
            )
            .unwrap();
        registry
            .register(CalculationDefinition::new(
                "tranche_count",
                AggregationFunction::Count,
                SourceModel::Tranche,
                "tr_id",
                GroupLevel::Tranche,
            ))
            .unwrap();
        Arc::new(registry)
    }

    fn template() -> ReportTemplate {
        ReportTemplate {
            name: "monthly".to_string(),
            description: None,
            aggregation_level: GroupLevel::Deal,
            selected_deals: vec![101, 102],
            selected_tranches: Vec::new(),
            selected_calculations: vec!["total_balance".to_string(), "wavg_rate".to_string()],
        }
    }

    #[tokio::test]
    async fn preview_is_exactly_what_execution_runs() {
        let runner = Arc::new(MemoryRunner::new(vec![
            deal_row(101, Some(10)),
            deal_row(102, Some(20)),
        ]));
        let service = ReportService::new(registry(), runner.clone(), &Config::default());

        let preview = service.preview_template(&template(), 202404).unwrap();
        let result = service
            .execute_template(&template(), 202404, ExecutionOptions::default())
            .await
            .unwrap();

        assert_eq!(preview.filter, ReportFilter::for_template(&template(), 202404));
        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen[0].0, preview.query.sql);
        assert_eq!(seen[0].1, preview.query.params);
        assert_eq!(result.row_count, 2);
        assert_eq!(result.columns, vec!["total_balance", "wavg_rate"]);
    }

    #[test]
    fn calculation_preview_uses_sample_defaults_and_own_level() {
        let runner = Arc::new(MemoryRunner::new(Vec::new()));
        let service = ReportService::new(registry(), runner, &Config::default());

        let preview = service
            .preview_calculation("tranche_count", &SampleFilter::default())
            .unwrap();
        assert_eq!(preview.query.aggregation_level, GroupLevel::Tranche);
        assert_eq!(preview.filter.deals(), &[101, 102, 103]);
        assert_eq!(preview.filter.tranches().len(), 6);
        assert_eq!(preview.filter.cycle_code(), 202404);
        assert!(preview.query.sql.contains("COUNT(DISTINCT t.tr_id)"));
        assert_eq!(
            preview.query.params.last(),
            Some(&BindValue::Int(202404))
        );
    }

    #[test]
    fn calculation_preview_honours_overrides() {
        let runner = Arc::new(MemoryRunner::new(Vec::new()));
        let service = ReportService::new(registry(), runner, &Config::default());
        let sample = SampleFilter {
            deals: Some(vec![7]),
            tranche_ids: Some(Vec::new()),
            cycle_code: Some(202312),
            aggregation_level: None,
        };

        let preview = service.preview_calculation("total_balance", &sample).unwrap();
        assert_eq!(preview.query.aggregation_level, GroupLevel::Deal);
        assert!(preview.filter.tranches().is_empty());
        assert_eq!(
            preview.query.params,
            vec![
                BindValue::IntArray(vec![7]),
                BindValue::IntArray(vec![7]),
                BindValue::Int(202312),
            ]
        );
    }

    #[test]
    fn unknown_calculation_preview_names_it() {
        let runner = Arc::new(MemoryRunner::new(Vec::new()));
        let service = ReportService::new(registry(), runner, &Config::default());
        let err = service
            .preview_calculation("nope", &SampleFilter::default())
            .unwrap_err();
        assert!(matches!(err, ReportError::Compile(CompileError::Registry(_))));
        assert_eq!(err.names(), vec!["nope".to_string()]);
    }

    #[tokio::test]
    async fn level_mismatch_never_reaches_the_runner() {
        let runner = Arc::new(MemoryRunner::new(Vec::new()));
        let service = ReportService::new(registry(), runner.clone(), &Config::default());
        let template = ReportTemplate {
            selected_calculations: vec!["tranche_count".to_string()],
            ..template()
        };

        let err = service
            .execute_template(&template, 202404, ExecutionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::Compile(CompileError::LevelMismatch { .. })));
        assert!(runner.seen.lock().unwrap().is_empty());
    }
}
