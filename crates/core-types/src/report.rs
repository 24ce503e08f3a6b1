use crate::enums::AggregationLevel;
use crate::values::CellValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The identity columns of a report row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyFields {
    pub deal_number: i32,
    /// Only present for tranche-level reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tranche_id: Option<String>,
}

/// One row of a report: its key plus one value per requested calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub key_fields: KeyFields,
    /// `None` when no aggregate row matched the key.
    pub values: BTreeMap<String, Option<CellValue>>,
}

impl ReportRow {
    pub fn value(&self, column: &str) -> Option<&CellValue> {
        self.values.get(column).and_then(Option::as_ref)
    }
}

/// The immutable output of a report execution.
///
/// This is a pure value; persisting or exporting it is left to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_name: Option<String>,
    pub aggregation_level: AggregationLevel,
    pub cycle_code: i32,
    pub columns: Vec<String>,
    pub rows: Vec<ReportRow>,
    pub row_count: usize,
    pub execution_time_ms: u64,
    pub generated_at: DateTime<Utc>,
}
