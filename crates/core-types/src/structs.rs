use crate::enums::{AggregationFunction, AggregationLevel, GroupLevel, SourceModel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A named, reusable aggregate formula over one source model/field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub aggregation_function: AggregationFunction,
    pub source_model: SourceModel,
    pub source_field: String,
    /// Required iff `aggregation_function` is `WEIGHTED_AVG`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_field: Option<String>,
    pub group_level: GroupLevel,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Optional post-aggregation formula combining this calculation with its dependencies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived: Option<DerivedFormula>,
}

impl CalculationDefinition {
    /// Creates a plain aggregate with no weight, dependencies or derived formula.
    pub fn new(
        name: impl Into<String>,
        aggregation_function: AggregationFunction,
        source_model: SourceModel,
        source_field: impl Into<String>,
        group_level: GroupLevel,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            aggregation_function,
            source_model,
            source_field: source_field.into(),
            weight_field: None,
            group_level,
            dependencies: Vec::new(),
            derived: None,
        }
    }

    pub fn with_weight(mut self, weight_field: impl Into<String>) -> Self {
        self.weight_field = Some(weight_field.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_derived(mut self, derived: DerivedFormula) -> Self {
        self.derived = Some(derived);
        self
    }

    /// The declared dependencies as a set (duplicates collapse).
    pub fn dependency_set(&self) -> BTreeSet<&str> {
        self.dependencies.iter().map(String::as_str).collect()
    }
}

/// Arithmetic applied after aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivedOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

/// One side of a derived formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    /// The calculation's own aggregate.
    Value,
    /// The output column of a declared dependency.
    Calculation(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedFormula {
    pub op: DerivedOp,
    pub left: Operand,
    pub right: Operand,
}

impl DerivedFormula {
    pub fn new(op: DerivedOp, left: Operand, right: Operand) -> Self {
        Self { op, left, right }
    }

    /// Names of the calculations this formula reads.
    pub fn referenced_calculations(&self) -> impl Iterator<Item = &str> {
        [&self.left, &self.right]
            .into_iter()
            .filter_map(|operand| match operand {
                Operand::Calculation(name) => Some(name.as_str()),
                Operand::Value => None,
            })
    }
}

/// A tranche identified within its parent deal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrancheRef {
    pub deal_number: i32,
    pub tranche_id: String,
}

impl TrancheRef {
    pub fn new(deal_number: i32, tranche_id: impl Into<String>) -> Self {
        Self {
            deal_number,
            tranche_id: tranche_id.into(),
        }
    }
}

/// A saved selection of deals, tranches and calculations. The cycle code is supplied
/// only when the template is executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportTemplate {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub aggregation_level: AggregationLevel,
    pub selected_deals: Vec<i32>,
    /// Empty means every tranche of the selected deals.
    #[serde(default)]
    pub selected_tranches: Vec<TrancheRef>,
    /// Display order of the result columns.
    pub selected_calculations: Vec<String>,
}
