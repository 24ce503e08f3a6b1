pub mod enums;
pub mod error;
pub mod report;
pub mod schema;
pub mod structs;
pub mod values;

// Re-export the core types to provide a clean public API.
pub use enums::{AggregationFunction, AggregationLevel, FieldKind, GroupLevel, SourceModel};
pub use error::CoreError;
pub use report::{KeyFields, ReportResult, ReportRow};
pub use schema::Column;
pub use structs::{
    CalculationDefinition, DerivedFormula, DerivedOp, Operand, ReportTemplate, TrancheRef,
};
pub use values::{BindValue, CellValue};
