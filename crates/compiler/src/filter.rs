use crate::error::CompileError;
use core_types::{BindValue, ReportTemplate, TrancheRef};
use serde::Serialize;
use std::collections::BTreeSet;

/// The deal/tranche/cycle selection every subquery is filtered by.
///
/// Selections are normalized on construction (sorted, de-duplicated), so two set-equal
/// selections compile to the same SQL and the same parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportFilter {
    deals: Vec<i32>,
    tranches: Vec<TrancheRef>,
    cycle_code: i32,
}

impl ReportFilter {
    pub fn new(
        deals: impl IntoIterator<Item = i32>,
        tranches: impl IntoIterator<Item = TrancheRef>,
        cycle_code: i32,
    ) -> Self {
        let deals: BTreeSet<i32> = deals.into_iter().collect();
        let tranches: BTreeSet<TrancheRef> = tranches.into_iter().collect();
        Self {
            deals: deals.into_iter().collect(),
            tranches: tranches.into_iter().collect(),
            cycle_code,
        }
    }

    /// The selection a saved template runs with for one cycle.
    pub fn for_template(template: &ReportTemplate, cycle_code: i32) -> Self {
        Self::new(
            template.selected_deals.iter().copied(),
            template.selected_tranches.iter().cloned(),
            cycle_code,
        )
    }

    pub fn deals(&self) -> &[i32] {
        &self.deals
    }

    /// Empty means every tranche of the selected deals.
    pub fn tranches(&self) -> &[TrancheRef] {
        &self.tranches
    }

    pub fn cycle_code(&self) -> i32 {
        self.cycle_code
    }

    /// A filter must select at least one deal, and every tranche must belong to one of them.
    pub fn validate(&self) -> Result<(), CompileError> {
        if self.deals.is_empty() {
            return Err(CompileError::invalid("at least one deal must be selected"));
        }
        let orphans: Vec<String> = self
            .tranches
            .iter()
            .filter(|tranche| self.deals.binary_search(&tranche.deal_number).is_err())
            .map(|tranche| format!("{}/{}", tranche.deal_number, tranche.tranche_id))
            .collect();
        if !orphans.is_empty() {
            return Err(CompileError::invalid(format!(
                "tranches outside the selected deals: {}",
                orphans.join(", ")
            )));
        }
        Ok(())
    }

    /// `<deal_column> = ANY($n)`
    pub(crate) fn deal_predicate(&self, deal_column: &str, params: &mut Placeholders) -> String {
        let deals = params.push(BindValue::IntArray(self.deals.clone()));
        format!("{deal_column} = ANY({deals})")
    }

    /// Restricts `(deal, tranche)` pairs to the selected tranches; `None` when every tranche
    /// is selected.
    pub(crate) fn tranche_predicate(
        &self,
        deal_column: &str,
        tranche_column: &str,
        params: &mut Placeholders,
    ) -> Option<String> {
        if self.tranches.is_empty() {
            return None;
        }
        let deals = params.push(BindValue::IntArray(
            self.tranches.iter().map(|t| t.deal_number).collect(),
        ));
        let ids = params.push(BindValue::TextArray(
            self.tranches.iter().map(|t| t.tranche_id.clone()).collect(),
        ));
        Some(format!(
            "({deal_column}, {tranche_column}) IN (SELECT * FROM UNNEST({deals}::int4[], {ids}::text[]))"
        ))
    }

    pub(crate) fn cycle_predicate(&self, cycle_column: &str, params: &mut Placeholders) -> String {
        let cycle = params.push(BindValue::Int(self.cycle_code));
        format!("{cycle_column} = {cycle}")
    }
}

/// Hands out consecutive `$n` placeholders and records the value bound to each.
#[derive(Debug)]
pub(crate) struct Placeholders {
    first: usize,
    values: Vec<BindValue>,
}

impl Placeholders {
    pub(crate) fn starting_at(first: usize) -> Self {
        Self {
            first,
            values: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, value: BindValue) -> String {
        let placeholder = format!("${}", self.first + self.values.len());
        self.values.push(value);
        placeholder
    }

    pub(crate) fn into_values(self) -> Vec<BindValue> {
        self.values
    }
}

/// Quotes an identifier for use as a column alias.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
