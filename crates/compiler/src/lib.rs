//! Compiles report requests into a single parameterized PostgreSQL statement.
//!
//! Each calculation becomes its own filtered, grouped subquery (see [`formula`]). The
//! [`assembler`] LEFT JOINs those subqueries onto a base row set of deals or
//! (deal, tranche) pairs, in dependency order, so no join can multiply another metric's
//! rows and every selected entity keeps its row even when it has no data.

pub mod assembler;
pub mod error;
pub mod filter;
pub mod formula;

pub use assembler::{
    CompiledQuery, LevelPolicy, ReportQueryAssembler, assemble_resolved, validate_template,
};
pub use error::CompileError;
pub use filter::ReportFilter;
pub use formula::{Aggregate, FormulaCompiler, Subquery, output_expression};
