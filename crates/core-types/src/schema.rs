//! The static description of the warehouse tables a calculation may read.
//!
//! Only identifiers listed here are ever written into generated SQL. A field reference coming
//! from a user (e.g. `tb.tr_end_bal_amt`) is resolved against this allow-list and replaced by
//! the `'static` identifier it matches, so untrusted text never reaches the query string.

use crate::enums::{FieldKind, SourceModel};
use crate::error::CoreError;

const DEAL_FIELDS: &[(&str, FieldKind)] = &[
    ("dl_nbr", FieldKind::Integer),
    ("issr_cde", FieldKind::Text),
    ("cdi_file_nme", FieldKind::Text),
    ("cdb_cdi_file_nme", FieldKind::Text),
];

const TRANCHE_FIELDS: &[(&str, FieldKind)] = &[
    ("dl_nbr", FieldKind::Integer),
    ("tr_id", FieldKind::Text),
    ("tr_cusip_id", FieldKind::Text),
];

const TRANCHE_BAL_FIELDS: &[(&str, FieldKind)] = &[
    ("dl_nbr", FieldKind::Integer),
    ("tr_id", FieldKind::Text),
    ("cycle_cde", FieldKind::Integer),
    ("tr_end_bal_amt", FieldKind::Numeric),
    ("tr_prin_rel_ls_amt", FieldKind::Numeric),
    ("tr_pass_thru_rte", FieldKind::Float),
    ("tr_accrl_days", FieldKind::Integer),
    ("tr_int_dstrb_amt", FieldKind::Numeric),
    ("tr_prin_dstrb_amt", FieldKind::Numeric),
    ("tr_int_accrl_amt", FieldKind::Numeric),
    ("tr_int_shtfl_amt", FieldKind::Numeric),
];

/// A column of a warehouse table, validated against the allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub model: SourceModel,
    pub name: &'static str,
    pub kind: FieldKind,
}

impl Column {
    /// The alias-qualified identifier, e.g. `tb.tr_end_bal_amt`.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.model.alias(), self.name)
    }
}

impl SourceModel {
    /// The warehouse table backing this model.
    pub fn table(&self) -> &'static str {
        match self {
            SourceModel::Deal => "deal",
            SourceModel::Tranche => "tranche",
            SourceModel::TrancheBal => "tranchebal",
        }
    }

    /// The alias used for the table in every generated statement.
    pub fn alias(&self) -> &'static str {
        match self {
            SourceModel::Deal => "d",
            SourceModel::Tranche => "t",
            SourceModel::TrancheBal => "tb",
        }
    }

    pub fn fields(&self) -> &'static [(&'static str, FieldKind)] {
        match self {
            SourceModel::Deal => DEAL_FIELDS,
            SourceModel::Tranche => TRANCHE_FIELDS,
            SourceModel::TrancheBal => TRANCHE_BAL_FIELDS,
        }
    }

    /// Resolves a user-supplied field reference to an allow-listed column.
    ///
    /// Accepts either a bare name (`tr_end_bal_amt`) or one qualified with this model's
    /// alias (`tb.tr_end_bal_amt`). Matching is case-insensitive.
    pub fn column(&self, reference: &str) -> Result<Column, CoreError> {
        let unknown = || CoreError::UnknownField {
            model: *self,
            field: reference.to_string(),
        };

        let trimmed = reference.trim();
        let bare = match trimmed.split_once('.') {
            Some((alias, field)) if alias.eq_ignore_ascii_case(self.alias()) => field,
            Some(_) => return Err(unknown()),
            None => trimmed,
        };

        self.fields()
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(bare))
            .map(|(name, kind)| Column {
                model: *self,
                name,
                kind: *kind,
            })
            .ok_or_else(unknown)
    }
}
