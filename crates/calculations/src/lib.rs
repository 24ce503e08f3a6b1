//! The calculation library: validated definitions, their dependency graph, and the
//! thread-safe registry every compile and preview reads from.

pub mod error;
pub mod registry;
pub mod resolver;
pub mod validate;

pub use error::RegistryError;
pub use registry::CalculationRegistry;
pub use resolver::DependencyResolver;
pub use validate::validate_definition;
