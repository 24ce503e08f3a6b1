use calculations::CalculationRegistry;
use compiler::{CompileError, LevelPolicy, ReportFilter, ReportQueryAssembler};
use core_types::{
    AggregationFunction, BindValue, CalculationDefinition, DerivedFormula, DerivedOp, GroupLevel,
    Operand, SourceModel, TrancheRef,
};

fn balance_registry() -> CalculationRegistry {
    let total_balance = CalculationDefinition::new(
        "total_balance",
        AggregationFunction::Sum,
        SourceModel::TrancheBal,
        "tb.tr_end_bal_amt",
        GroupLevel::Deal,
    );
    let wavg_rate = CalculationDefinition::new(
        "wavg_rate",
        AggregationFunction::WeightedAvg,
        SourceModel::TrancheBal,
        "tb.tr_pass_thru_rte",
        GroupLevel::Deal,
    )
    .with_weight("tb.tr_end_bal_amt");
    let tranche_share = CalculationDefinition::new(
        "tranche_share",
        AggregationFunction::Sum,
        SourceModel::TrancheBal,
        "tr_end_bal_amt",
        GroupLevel::Tranche,
    )
    .with_dependencies(["total_balance"])
    .with_derived(DerivedFormula::new(
        DerivedOp::Divide,
        Operand::Value,
        Operand::Calculation("total_balance".to_string()),
    ));

    CalculationRegistry::from_definitions(vec![tranche_share, wavg_rate, total_balance]).unwrap()
}

#[test]
fn balance_and_rate_report_for_two_deals() {
    let registry = balance_registry();
    let filter = ReportFilter::new([101, 102], [], 202404);
    let query = ReportQueryAssembler::new(&registry, LevelPolicy::default())
        .assemble(GroupLevel::Deal, &filter, &["total_balance", "wavg_rate"])
        .unwrap();

    assert_eq!(
        query.sql,
        "SELECT base.dl_nbr, calc_0.value AS \"total_balance\", calc_1.value AS \"wavg_rate\" \
         FROM (SELECT d.dl_nbr FROM deal d WHERE d.dl_nbr = ANY($1)) AS base \
         LEFT JOIN (SELECT tb.dl_nbr, SUM(tb.tr_end_bal_amt) AS value FROM tranchebal tb \
         WHERE tb.dl_nbr = ANY($2) AND tb.cycle_cde = $3 \
         GROUP BY tb.dl_nbr) AS calc_0 ON calc_0.dl_nbr = base.dl_nbr \
         LEFT JOIN (SELECT tb.dl_nbr, SUM(tb.tr_pass_thru_rte * tb.tr_end_bal_amt) / NULLIF(SUM(tb.tr_end_bal_amt), 0) AS value \
         FROM tranchebal tb \
         WHERE tb.dl_nbr = ANY($4) AND tb.cycle_cde = $5 \
         GROUP BY tb.dl_nbr) AS calc_1 ON calc_1.dl_nbr = base.dl_nbr \
         ORDER BY base.dl_nbr"
    );
    assert_eq!(
        query.params,
        vec![
            BindValue::IntArray(vec![101, 102]),
            BindValue::IntArray(vec![101, 102]),
            BindValue::Int(202404),
            BindValue::IntArray(vec![101, 102]),
            BindValue::Int(202404),
        ]
    );
    assert_eq!(query.columns, vec!["total_balance", "wavg_rate"]);
}

#[test]
fn set_equal_selections_compile_identically() {
    let registry = balance_registry();
    let assembler = ReportQueryAssembler::new(&registry, LevelPolicy::default());

    let a = assembler
        .assemble(
            GroupLevel::Tranche,
            &ReportFilter::new(
                [102, 101],
                [TrancheRef::new(102, "B"), TrancheRef::new(101, "A")],
                202404,
            ),
            &["tranche_share"],
        )
        .unwrap();
    let b = assembler
        .assemble(
            GroupLevel::Tranche,
            &ReportFilter::new(
                [101, 102, 101],
                [TrancheRef::new(101, "A"), TrancheRef::new(102, "B")],
                202404,
            ),
            &["tranche_share"],
        )
        .unwrap();
    assert_eq!(a, b);
}

#[test]
fn derived_calculation_joins_its_dependency_first() {
    let registry = balance_registry();
    let filter = ReportFilter::new([101], [TrancheRef::new(101, "A")], 202404);
    let query = ReportQueryAssembler::new(&registry, LevelPolicy::default())
        .assemble(GroupLevel::Tranche, &filter, &["tranche_share"])
        .unwrap();

    assert_eq!(query.resolved_order, vec!["total_balance", "tranche_share"]);
    assert_eq!(query.columns, vec!["tranche_share"]);
    assert!(query.sql.starts_with(
        "SELECT base.dl_nbr, base.tr_id, (calc_1.value / NULLIF(calc_0.value, 0)) AS \"tranche_share\" \
         FROM (SELECT DISTINCT t.dl_nbr, t.tr_id FROM tranche t \
         WHERE t.dl_nbr = ANY($1) \
         AND (t.dl_nbr, t.tr_id) IN (SELECT * FROM UNNEST($2::int4[], $3::text[]))) AS base"
    ));
    // Base: 3 params; each subquery: deals, tranche pairs (2), cycle.
    assert_eq!(query.params.len(), 3 + 4 + 4);
    assert!(query.sql.contains("$11"));
    assert!(!query.sql.contains("$12"));
}

#[test]
fn broadcast_can_be_disabled() {
    let registry = balance_registry();
    let filter = ReportFilter::new([101], [], 202404);
    let err = ReportQueryAssembler::new(&registry, LevelPolicy::new(false))
        .assemble(GroupLevel::Tranche, &filter, &["tranche_share"])
        .unwrap_err();
    // The dependency is what breaks the policy, not the requested calculation.
    assert_eq!(err.names(), vec!["total_balance".to_string()]);
}

#[test]
fn tranche_level_calculation_in_deal_report_is_rejected() {
    let registry = balance_registry();
    let filter = ReportFilter::new([101, 102, 103], [], 202404);
    let err = ReportQueryAssembler::new(&registry, LevelPolicy::default())
        .assemble(GroupLevel::Deal, &filter, &["total_balance", "tranche_share"])
        .unwrap_err();
    assert!(matches!(err, CompileError::LevelMismatch { ref calculation, .. } if calculation == "tranche_share"));
}
