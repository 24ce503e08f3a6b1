use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The aggregate applied to a calculation's source field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregationFunction {
    Sum,
    Avg,
    Count,
    Min,
    Max,
    WeightedAvg,
}

impl AggregationFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationFunction::Sum => "SUM",
            AggregationFunction::Avg => "AVG",
            AggregationFunction::Count => "COUNT",
            AggregationFunction::Min => "MIN",
            AggregationFunction::Max => "MAX",
            AggregationFunction::WeightedAvg => "WEIGHTED_AVG",
        }
    }

    /// Whether the function is only meaningful over numeric columns.
    pub fn requires_numeric(&self) -> bool {
        matches!(
            self,
            AggregationFunction::Sum | AggregationFunction::Avg | AggregationFunction::WeightedAvg
        )
    }

    pub fn requires_weight(&self) -> bool {
        matches!(self, AggregationFunction::WeightedAvg)
    }
}

impl fmt::Display for AggregationFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationFunction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SUM" => Ok(AggregationFunction::Sum),
            "AVG" => Ok(AggregationFunction::Avg),
            "COUNT" => Ok(AggregationFunction::Count),
            "MIN" => Ok(AggregationFunction::Min),
            "MAX" => Ok(AggregationFunction::Max),
            "WEIGHTED_AVG" => Ok(AggregationFunction::WeightedAvg),
            _ => Err(CoreError::UnknownVariant {
                kind: "aggregation function",
                value: s.to_string(),
            }),
        }
    }
}

/// The warehouse table a calculation reads its fields from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceModel {
    Deal,
    Tranche,
    TrancheBal,
}

impl SourceModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceModel::Deal => "Deal",
            SourceModel::Tranche => "Tranche",
            SourceModel::TrancheBal => "TrancheBal",
        }
    }
}

impl fmt::Display for SourceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceModel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deal" => Ok(SourceModel::Deal),
            "tranche" => Ok(SourceModel::Tranche),
            "tranchebal" => Ok(SourceModel::TrancheBal),
            _ => Err(CoreError::UnknownVariant {
                kind: "source model",
                value: s.to_string(),
            }),
        }
    }
}

/// The entity grain of a calculation or of a report.
///
/// A calculation's `GroupLevel` is the finest grain it can be computed at; a report's
/// aggregation level decides whether it has one row per deal or per (deal, tranche) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupLevel {
    Deal,
    Tranche,
}

/// Reports and calculations share the same two grains.
pub type AggregationLevel = GroupLevel;

impl GroupLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupLevel::Deal => "deal",
            GroupLevel::Tranche => "tranche",
        }
    }
}

impl fmt::Display for GroupLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deal" => Ok(GroupLevel::Deal),
            "tranche" => Ok(GroupLevel::Tranche),
            _ => Err(CoreError::UnknownVariant {
                kind: "group level",
                value: s.to_string(),
            }),
        }
    }
}

/// The storage class of a warehouse column, used to reject e.g. `SUM` over text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Integer,
    Numeric,
    Float,
    Text,
}

impl FieldKind {
    pub fn is_numeric(&self) -> bool {
        !matches!(self, FieldKind::Text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregation_function_parses_case_insensitively() {
        assert_eq!("sum".parse::<AggregationFunction>().unwrap(), AggregationFunction::Sum);
        assert_eq!(
            "Weighted_Avg".parse::<AggregationFunction>().unwrap(),
            AggregationFunction::WeightedAvg
        );
        assert!("MEDIAN".parse::<AggregationFunction>().is_err());
    }

    #[test]
    fn serde_names_match_the_exchange_format() {
        let json = serde_json::to_string(&AggregationFunction::WeightedAvg).unwrap();
        assert_eq!(json, "\"WEIGHTED_AVG\"");
        let level: GroupLevel = serde_json::from_str("\"tranche\"").unwrap();
        assert_eq!(level, GroupLevel::Tranche);
        let model: SourceModel = serde_json::from_str("\"TrancheBal\"").unwrap();
        assert_eq!(model, SourceModel::TrancheBal);
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for level in [GroupLevel::Deal, GroupLevel::Tranche] {
            assert_eq!(level.to_string().parse::<GroupLevel>().unwrap(), level);
        }
        for model in [SourceModel::Deal, SourceModel::Tranche, SourceModel::TrancheBal] {
            assert_eq!(model.to_string().parse::<SourceModel>().unwrap(), model);
        }
    }
}
