use crate::error::CompileError;
use crate::filter::{Placeholders, ReportFilter, quote_ident};
use crate::formula::{FormulaCompiler, output_expression};
use calculations::CalculationRegistry;
use core_types::{AggregationLevel, BindValue, CalculationDefinition, GroupLevel, ReportTemplate};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Which calculation grains a report grain accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelPolicy {
    /// A deal-level calculation in a tranche-level report repeats the deal's value on each
    /// of its tranche rows.
    pub allow_deal_broadcast: bool,
}

impl Default for LevelPolicy {
    fn default() -> Self {
        Self {
            allow_deal_broadcast: true,
        }
    }
}

impl LevelPolicy {
    pub fn new(allow_deal_broadcast: bool) -> Self {
        Self { allow_deal_broadcast }
    }

    pub fn check(
        &self,
        definition: &CalculationDefinition,
        level: AggregationLevel,
    ) -> Result<(), CompileError> {
        let allowed = match (definition.group_level, level) {
            (GroupLevel::Deal, GroupLevel::Deal) | (GroupLevel::Tranche, GroupLevel::Tranche) => true,
            (GroupLevel::Deal, GroupLevel::Tranche) => self.allow_deal_broadcast,
            (GroupLevel::Tranche, GroupLevel::Deal) => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(CompileError::LevelMismatch {
                calculation: definition.name.clone(),
                group_level: definition.group_level,
                aggregation_level: level,
            })
        }
    }
}

/// A complete, parameterized report statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    pub sql: String,
    /// Values for `$1..$n`, in placeholder order.
    pub params: Vec<BindValue>,
    /// Requested calculation names, in request order. The statement selects the key columns
    /// first, then these.
    pub columns: Vec<String>,
    pub aggregation_level: AggregationLevel,
    /// Every joined calculation, dependencies included, in join order.
    pub resolved_order: Vec<String>,
}

impl CompiledQuery {
    /// Number of leading key columns in each result row.
    pub fn key_column_count(&self) -> usize {
        match self.aggregation_level {
            GroupLevel::Deal => 1,
            GroupLevel::Tranche => 2,
        }
    }
}

/// Turns a report request into one statement: a base row set LEFT JOINed with one
/// pre-aggregated subquery per calculation.
pub struct ReportQueryAssembler<'r> {
    registry: &'r CalculationRegistry,
    policy: LevelPolicy,
}

impl<'r> ReportQueryAssembler<'r> {
    pub fn new(registry: &'r CalculationRegistry, policy: LevelPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn assemble<S: AsRef<str>>(
        &self,
        level: AggregationLevel,
        filter: &ReportFilter,
        calculations: &[S],
    ) -> Result<CompiledQuery, CompileError> {
        let requested = check_request(filter, calculations)?;
        let resolved = self.registry.resolve(&requested)?;
        assemble_resolved(level, filter, &requested, &resolved, self.policy)
    }

    /// Compiles a saved template for one cycle.
    pub fn assemble_template(
        &self,
        template: &ReportTemplate,
        cycle_code: i32,
    ) -> Result<CompiledQuery, CompileError> {
        let filter = ReportFilter::for_template(template, cycle_code);
        self.assemble(template.aggregation_level, &filter, &template.selected_calculations)
    }
}

/// Runs every check `assemble_template` would, without producing SQL. Returns the
/// resolved join order.
pub fn validate_template(
    template: &ReportTemplate,
    registry: &CalculationRegistry,
    policy: LevelPolicy,
) -> Result<Vec<String>, CompileError> {
    let filter = ReportFilter::for_template(template, 0);
    let requested = check_request(&filter, &template.selected_calculations)?;
    let resolved = registry.resolve(&requested)?;
    for definition in &resolved {
        policy.check(definition, template.aggregation_level)?;
    }
    Ok(resolved.into_iter().map(|d| d.name).collect())
}

/// Assembles from an already-resolved closure. `resolved` must list dependencies before
/// their dependents.
pub fn assemble_resolved(
    level: AggregationLevel,
    filter: &ReportFilter,
    requested: &[String],
    resolved: &[CalculationDefinition],
    policy: LevelPolicy,
) -> Result<CompiledQuery, CompileError> {
    for definition in resolved {
        policy.check(definition, level)?;
    }

    let mut base_params = Placeholders::starting_at(1);
    let base = base_query(level, filter, &mut base_params);
    let mut params = base_params.into_values();

    let compiler = FormulaCompiler::new(filter);
    let mut joins = Vec::with_capacity(resolved.len());
    let mut outputs: BTreeMap<String, String> = BTreeMap::new();
    for (position, definition) in resolved.iter().enumerate() {
        let alias = format!("calc_{position}");
        let subquery =
            compiler.compile(definition, definition.group_level, &alias, params.len() + 1)?;
        let output = output_expression(definition, &alias, &outputs)?;
        outputs.insert(definition.name.clone(), output);
        joins.push(format!(
            "LEFT JOIN ({}) AS {} ON {}",
            subquery.sql,
            subquery.alias,
            subquery.join_condition()
        ));
        params.extend(subquery.params);
    }

    let keys = match level {
        GroupLevel::Deal => "base.dl_nbr",
        GroupLevel::Tranche => "base.dl_nbr, base.tr_id",
    };
    let mut select = vec![keys.to_string()];
    for name in requested {
        let expression = outputs.get(name).ok_or_else(|| {
            CompileError::invalid_names("requested calculation was not resolved", vec![name.clone()])
        })?;
        select.push(format!("{expression} AS {}", quote_ident(name)));
    }

    let sql = format!(
        "SELECT {select} FROM ({base}) AS base {joins} ORDER BY {keys}",
        select = select.join(", "),
        joins = joins.join(" "),
    );
    tracing::debug!(
        level = %level,
        subqueries = resolved.len(),
        params = params.len(),
        "Report query assembled."
    );

    Ok(CompiledQuery {
        sql,
        params,
        columns: requested.to_vec(),
        aggregation_level: level,
        resolved_order: resolved.iter().map(|d| d.name.clone()).collect(),
    })
}

fn check_request<S: AsRef<str>>(
    filter: &ReportFilter,
    calculations: &[S],
) -> Result<Vec<String>, CompileError> {
    if calculations.is_empty() {
        return Err(CompileError::invalid("at least one calculation must be selected"));
    }
    let mut seen = BTreeSet::new();
    let duplicates: BTreeSet<String> = calculations
        .iter()
        .map(|name| name.as_ref())
        .filter(|name| !seen.insert(*name))
        .map(str::to_string)
        .collect();
    if !duplicates.is_empty() {
        return Err(CompileError::invalid_names(
            "calculations selected more than once",
            duplicates.into_iter().collect(),
        ));
    }
    filter.validate()?;
    Ok(calculations.iter().map(|name| name.as_ref().to_string()).collect())
}

/// One row per selected deal, or per existing (deal, tranche) pair of the selection.
fn base_query(level: AggregationLevel, filter: &ReportFilter, params: &mut Placeholders) -> String {
    match level {
        GroupLevel::Deal => format!(
            "SELECT d.dl_nbr FROM deal d WHERE {}",
            filter.deal_predicate("d.dl_nbr", params)
        ),
        GroupLevel::Tranche => {
            let mut predicates = vec![filter.deal_predicate("t.dl_nbr", params)];
            if let Some(pairs) = filter.tranche_predicate("t.dl_nbr", "t.tr_id", params) {
                predicates.push(pairs);
            }
            format!(
                "SELECT DISTINCT t.dl_nbr, t.tr_id FROM tranche t WHERE {}",
                predicates.join(" AND ")
            )
        }
    }
}
