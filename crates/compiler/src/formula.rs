use crate::error::CompileError;
use crate::filter::{Placeholders, ReportFilter};
use calculations::RegistryError;
use core_types::{
    AggregationFunction, BindValue, CalculationDefinition, Column, DerivedFormula, DerivedOp,
    GroupLevel, Operand, SourceModel,
};
use std::collections::BTreeMap;

/// An aggregate over allow-listed columns. The only way a formula reaches SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Sum(Column),
    Avg(Column),
    Count { column: Column, distinct: bool },
    Min(Column),
    Max(Column),
    WeightedAvg { value: Column, weight: Column },
}

impl Aggregate {
    pub fn for_definition(definition: &CalculationDefinition) -> Result<Self, CompileError> {
        let column = |reference: &str| {
            definition.source_model.column(reference).map_err(|e| {
                CompileError::Registry(RegistryError::Validation {
                    name: definition.name.clone(),
                    reason: e.to_string(),
                })
            })
        };
        let source = column(&definition.source_field)?;

        Ok(match definition.aggregation_function {
            AggregationFunction::Sum => Aggregate::Sum(source),
            AggregationFunction::Avg => Aggregate::Avg(source),
            AggregationFunction::Count => Aggregate::Count {
                column: source,
                // `tranche` has one row per CUSIP; count each tranche once.
                distinct: definition.source_model == SourceModel::Tranche,
            },
            AggregationFunction::Min => Aggregate::Min(source),
            AggregationFunction::Max => Aggregate::Max(source),
            AggregationFunction::WeightedAvg => {
                let weight = definition.weight_field.as_deref().ok_or_else(|| {
                    CompileError::Registry(RegistryError::Validation {
                        name: definition.name.clone(),
                        reason: "WEIGHTED_AVG requires a weight_field".to_string(),
                    })
                })?;
                Aggregate::WeightedAvg {
                    value: source,
                    weight: column(weight)?,
                }
            }
        })
    }

    pub fn render(&self) -> String {
        match self {
            Aggregate::Sum(c) => format!("SUM({})", c.qualified()),
            Aggregate::Avg(c) => format!("AVG({})", c.qualified()),
            Aggregate::Count {
                column,
                distinct: true,
            } => format!("COUNT(DISTINCT {})", column.qualified()),
            Aggregate::Count {
                column,
                distinct: false,
            } => format!("COUNT({})", column.qualified()),
            Aggregate::Min(c) => format!("MIN({})", c.qualified()),
            Aggregate::Max(c) => format!("MAX({})", c.qualified()),
            Aggregate::WeightedAvg { value, weight } => {
                let (v, w) = (value.qualified(), weight.qualified());
                format!("SUM({v} * {w}) / NULLIF(SUM({w}), 0)")
            }
        }
    }
}

/// One pre-aggregated metric, computed independently of every other so joins cannot fan out.
#[derive(Debug, Clone, PartialEq)]
pub struct Subquery {
    pub calculation: String,
    pub alias: String,
    pub grouping: GroupLevel,
    pub sql: String,
    pub params: Vec<BindValue>,
}

impl Subquery {
    /// The join condition against the base row set aliased `base`.
    pub fn join_condition(&self) -> String {
        match self.grouping {
            GroupLevel::Deal => format!("{a}.dl_nbr = base.dl_nbr", a = self.alias),
            GroupLevel::Tranche => format!(
                "{a}.dl_nbr = base.dl_nbr AND {a}.tr_id = base.tr_id",
                a = self.alias
            ),
        }
    }
}

/// Compiles single calculations into filtered, grouped subqueries.
#[derive(Debug, Clone, Copy)]
pub struct FormulaCompiler<'f> {
    filter: &'f ReportFilter,
}

impl<'f> FormulaCompiler<'f> {
    pub fn new(filter: &'f ReportFilter) -> Self {
        Self { filter }
    }

    /// Compiles `definition` grouped by `grouping`, numbering its parameters from
    /// `first_placeholder`. The output depends only on the arguments.
    pub fn compile(
        &self,
        definition: &CalculationDefinition,
        grouping: GroupLevel,
        alias: &str,
        first_placeholder: usize,
    ) -> Result<Subquery, CompileError> {
        let aggregate = Aggregate::for_definition(definition)?;
        let mut params = Placeholders::starting_at(first_placeholder);
        let scope = self.scope(definition.source_model, grouping, &mut params);
        let sql = format!(
            "SELECT {keys}, {aggregate} AS value FROM {from} WHERE {predicates} GROUP BY {keys}",
            keys = scope.keys,
            aggregate = aggregate.render(),
            from = scope.from,
            predicates = scope.predicates.join(" AND "),
        );

        Ok(Subquery {
            calculation: definition.name.clone(),
            alias: alias.to_string(),
            grouping,
            sql,
            params: params.into_values(),
        })
    }

    /// Rows a subquery aggregates over, restricted to the filter.
    ///
    /// `tranchebal` holds one row per tranche and cycle, so it fixes the tranche grain for a
    /// cycle. `tranche` holds one row per CUSIP and is never joined to reach balances; it is
    /// only scanned when its own fields are aggregated.
    fn scope(&self, model: SourceModel, grouping: GroupLevel, params: &mut Placeholders) -> Scope {
        let filter = self.filter;
        match (model, grouping) {
            (SourceModel::TrancheBal, _) => {
                let mut predicates = vec![filter.deal_predicate("tb.dl_nbr", params)];
                predicates.extend(filter.tranche_predicate("tb.dl_nbr", "tb.tr_id", params));
                predicates.push(filter.cycle_predicate("tb.cycle_cde", params));
                Scope {
                    keys: grouping_keys(grouping, "tb.dl_nbr", "tb.tr_id"),
                    from: "tranchebal tb",
                    predicates,
                }
            }
            (SourceModel::Tranche, _) => {
                let mut predicates = vec![filter.deal_predicate("t.dl_nbr", params)];
                predicates.extend(filter.tranche_predicate("t.dl_nbr", "t.tr_id", params));
                predicates.push(format!(
                    "EXISTS (SELECT 1 FROM tranchebal tb \
                     WHERE tb.dl_nbr = t.dl_nbr AND tb.tr_id = t.tr_id AND {})",
                    filter.cycle_predicate("tb.cycle_cde", params)
                ));
                Scope {
                    keys: grouping_keys(grouping, "t.dl_nbr", "t.tr_id"),
                    from: "tranche t",
                    predicates,
                }
            }
            (SourceModel::Deal, GroupLevel::Deal) => {
                let deals = filter.deal_predicate("d.dl_nbr", params);
                let mut balances = vec!["tb.dl_nbr = d.dl_nbr".to_string()];
                balances.extend(filter.tranche_predicate("tb.dl_nbr", "tb.tr_id", params));
                balances.push(filter.cycle_predicate("tb.cycle_cde", params));
                Scope {
                    keys: "d.dl_nbr".to_string(),
                    from: "deal d",
                    predicates: vec![
                        deals,
                        format!(
                            "EXISTS (SELECT 1 FROM tranchebal tb WHERE {})",
                            balances.join(" AND ")
                        ),
                    ],
                }
            }
            (SourceModel::Deal, GroupLevel::Tranche) => {
                let mut predicates = vec![filter.deal_predicate("d.dl_nbr", params)];
                predicates.extend(filter.tranche_predicate("tb.dl_nbr", "tb.tr_id", params));
                predicates.push(filter.cycle_predicate("tb.cycle_cde", params));
                Scope {
                    keys: grouping_keys(grouping, "d.dl_nbr", "tb.tr_id"),
                    from: "deal d JOIN tranchebal tb ON tb.dl_nbr = d.dl_nbr",
                    predicates,
                }
            }
        }
    }
}

struct Scope {
    keys: String,
    from: &'static str,
    predicates: Vec<String>,
}

fn grouping_keys(grouping: GroupLevel, deal_column: &str, tranche_column: &str) -> String {
    match grouping {
        GroupLevel::Deal => deal_column.to_string(),
        GroupLevel::Tranche => format!("{deal_column}, {tranche_column}"),
    }
}

/// The expression selecting a calculation's final value from its joined subquery.
///
/// `outputs` holds the output expressions of calculations joined earlier; a derived
/// formula splices in the expression of each dependency it references.
pub fn output_expression(
    definition: &CalculationDefinition,
    alias: &str,
    outputs: &BTreeMap<String, String>,
) -> Result<String, CompileError> {
    let own = format!("{alias}.value");
    let Some(DerivedFormula { op, left, right }) = &definition.derived else {
        return Ok(own);
    };

    let operand = |operand: &Operand| match operand {
        Operand::Value => Ok(own.clone()),
        Operand::Calculation(name) => outputs.get(name).cloned().ok_or_else(|| {
            CompileError::Registry(RegistryError::Validation {
                name: definition.name.clone(),
                reason: format!("derived formula references '{name}' which is not joined before it"),
            })
        }),
    };
    let (l, r) = (operand(left)?, operand(right)?);

    Ok(match op {
        DerivedOp::Add => format!("({l} + {r})"),
        DerivedOp::Subtract => format!("({l} - {r})"),
        DerivedOp::Multiply => format!("({l} * {r})"),
        DerivedOp::Divide => format!("({l} / NULLIF({r}, 0))"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::TrancheRef;

    fn calc(
        name: &str,
        function: AggregationFunction,
        model: SourceModel,
        field: &str,
    ) -> CalculationDefinition {
        CalculationDefinition::new(name, function, model, field, GroupLevel::Deal)
    }

    #[test]
    fn default_aggregates_wrap_the_qualified_column() {
        let def = calc("total", AggregationFunction::Sum, SourceModel::TrancheBal, "tr_end_bal_amt");
        assert_eq!(Aggregate::for_definition(&def).unwrap().render(), "SUM(tb.tr_end_bal_amt)");

        let def = calc("latest", AggregationFunction::Max, SourceModel::TrancheBal, "TB.CYCLE_CDE");
        assert_eq!(Aggregate::for_definition(&def).unwrap().render(), "MAX(tb.cycle_cde)");
    }

    #[test]
    fn weighted_average_guards_against_zero_weight() {
        let def = calc(
            "wavg_rate",
            AggregationFunction::WeightedAvg,
            SourceModel::TrancheBal,
            "tb.tr_pass_thru_rte",
        )
        .with_weight("tb.tr_end_bal_amt");
        assert_eq!(
            Aggregate::for_definition(&def).unwrap().render(),
            "SUM(tb.tr_pass_thru_rte * tb.tr_end_bal_amt) / NULLIF(SUM(tb.tr_end_bal_amt), 0)"
        );
    }

    #[test]
    fn count_is_distinct_only_for_tranche_fields() {
        let tranches = calc("tranche_count", AggregationFunction::Count, SourceModel::Tranche, "tr_id");
        assert_eq!(
            Aggregate::for_definition(&tranches).unwrap().render(),
            "COUNT(DISTINCT t.tr_id)"
        );
        let rows = calc("rows", AggregationFunction::Count, SourceModel::TrancheBal, "tr_id");
        assert_eq!(Aggregate::for_definition(&rows).unwrap().render(), "COUNT(tb.tr_id)");
    }

    #[test]
    fn unlisted_fields_never_reach_sql() {
        let def = calc(
            "evil",
            AggregationFunction::Sum,
            SourceModel::TrancheBal,
            "tr_end_bal_amt); DROP TABLE deal; --",
        );
        assert!(matches!(
            Aggregate::for_definition(&def),
            Err(CompileError::Registry(RegistryError::Validation { .. }))
        ));
    }

    #[test]
    fn subquery_is_filtered_and_grouped_by_the_key() {
        let filter = ReportFilter::new([102, 101], [TrancheRef::new(101, "A")], 202404);
        let def = calc("total", AggregationFunction::Sum, SourceModel::TrancheBal, "tr_end_bal_amt");
        let sub = FormulaCompiler::new(&filter)
            .compile(&def, GroupLevel::Tranche, "calc_0", 2)
            .unwrap();

        assert_eq!(
            sub.sql,
            "SELECT tb.dl_nbr, tb.tr_id, SUM(tb.tr_end_bal_amt) AS value \
             FROM tranchebal tb \
             WHERE tb.dl_nbr = ANY($2) \
             AND (tb.dl_nbr, tb.tr_id) IN (SELECT * FROM UNNEST($3::int4[], $4::text[])) \
             AND tb.cycle_cde = $5 \
             GROUP BY tb.dl_nbr, tb.tr_id"
        );
        assert_eq!(sub.params.len(), 4);
        assert_eq!(sub.params[0], BindValue::IntArray(vec![101, 102]));
        assert_eq!(
            sub.join_condition(),
            "calc_0.dl_nbr = base.dl_nbr AND calc_0.tr_id = base.tr_id"
        );
    }

    #[test]
    fn balance_subqueries_never_touch_the_cusip_table() {
        let filter = ReportFilter::new([101, 102], [], 202404);
        let def = calc("total", AggregationFunction::Sum, SourceModel::TrancheBal, "tr_end_bal_amt");
        let sub = FormulaCompiler::new(&filter)
            .compile(&def, GroupLevel::Deal, "calc_0", 1)
            .unwrap();

        assert_eq!(
            sub.sql,
            "SELECT tb.dl_nbr, SUM(tb.tr_end_bal_amt) AS value FROM tranchebal tb \
             WHERE tb.dl_nbr = ANY($1) AND tb.cycle_cde = $2 GROUP BY tb.dl_nbr"
        );
        assert!(!sub.sql.contains("tranche t"));
    }

    #[test]
    fn tranche_fields_require_a_balance_row_through_a_semi_join() {
        let filter = ReportFilter::new([101], [TrancheRef::new(101, "A")], 202404);
        let def = calc("tranche_count", AggregationFunction::Count, SourceModel::Tranche, "tr_id");
        let sub = FormulaCompiler::new(&filter)
            .compile(&def, GroupLevel::Deal, "calc_0", 1)
            .unwrap();

        assert_eq!(
            sub.sql,
            "SELECT t.dl_nbr, COUNT(DISTINCT t.tr_id) AS value FROM tranche t \
             WHERE t.dl_nbr = ANY($1) \
             AND (t.dl_nbr, t.tr_id) IN (SELECT * FROM UNNEST($2::int4[], $3::text[])) \
             AND EXISTS (SELECT 1 FROM tranchebal tb \
             WHERE tb.dl_nbr = t.dl_nbr AND tb.tr_id = t.tr_id AND tb.cycle_cde = $4) \
             GROUP BY t.dl_nbr"
        );
        assert_eq!(sub.params.last(), Some(&BindValue::Int(202404)));
    }

    #[test]
    fn deal_fields_are_scoped_without_fanning_out() {
        let filter = ReportFilter::new([101], [], 202404);
        let def = calc("issuer", AggregationFunction::Max, SourceModel::Deal, "issr_cde");
        let compiler = FormulaCompiler::new(&filter);

        let by_deal = compiler.compile(&def, GroupLevel::Deal, "calc_0", 1).unwrap();
        assert_eq!(
            by_deal.sql,
            "SELECT d.dl_nbr, MAX(d.issr_cde) AS value FROM deal d \
             WHERE d.dl_nbr = ANY($1) \
             AND EXISTS (SELECT 1 FROM tranchebal tb WHERE tb.dl_nbr = d.dl_nbr AND tb.cycle_cde = $2) \
             GROUP BY d.dl_nbr"
        );

        let by_tranche = compiler.compile(&def, GroupLevel::Tranche, "calc_0", 1).unwrap();
        assert_eq!(
            by_tranche.sql,
            "SELECT d.dl_nbr, tb.tr_id, MAX(d.issr_cde) AS value \
             FROM deal d JOIN tranchebal tb ON tb.dl_nbr = d.dl_nbr \
             WHERE d.dl_nbr = ANY($1) AND tb.cycle_cde = $2 \
             GROUP BY d.dl_nbr, tb.tr_id"
        );
    }

    #[test]
    fn compilation_is_deterministic() {
        let filter = ReportFilter::new([101, 102], [], 202404);
        let def = calc("total", AggregationFunction::Avg, SourceModel::TrancheBal, "tr_accrl_days");
        let compiler = FormulaCompiler::new(&filter);
        assert_eq!(
            compiler.compile(&def, GroupLevel::Deal, "calc_3", 1).unwrap(),
            compiler.compile(&def, GroupLevel::Deal, "calc_3", 1).unwrap()
        );
    }

    #[test]
    fn derived_output_splices_dependency_expressions() {
        let share = calc("share", AggregationFunction::Sum, SourceModel::TrancheBal, "tr_end_bal_amt")
            .with_dependencies(["total"])
            .with_derived(DerivedFormula::new(
                DerivedOp::Divide,
                Operand::Value,
                Operand::Calculation("total".to_string()),
            ));
        let mut outputs = BTreeMap::new();
        outputs.insert("total".to_string(), "calc_0.value".to_string());

        assert_eq!(
            output_expression(&share, "calc_1", &outputs).unwrap(),
            "(calc_1.value / NULLIF(calc_0.value, 0))"
        );
        assert!(output_expression(&share, "calc_1", &BTreeMap::new()).is_err());
    }
}
