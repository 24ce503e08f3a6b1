use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Calculation '{name}' is invalid: {reason}")]
    Validation { name: String, reason: String },

    #[error("Calculation '{0}' already exists")]
    AlreadyExists(String),

    #[error("Calculation '{name}' is still referenced by: {}", dependents.join(", "))]
    Conflict { name: String, dependents: Vec<String> },

    #[error("Unknown calculation(s): {}", .0.join(", "))]
    UnknownCalculation(Vec<String>),

    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

impl RegistryError {
    pub(crate) fn validation(name: &str, reason: impl Into<String>) -> Self {
        RegistryError::Validation {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// The calculation names the error is about.
    pub fn names(&self) -> Vec<String> {
        match self {
            RegistryError::Validation { name, .. } | RegistryError::AlreadyExists(name) => {
                vec![name.clone()]
            }
            RegistryError::Conflict { name, dependents } => {
                let mut names = vec![name.clone()];
                names.extend(dependents.iter().cloned());
                names
            }
            RegistryError::UnknownCalculation(names) => names.clone(),
            RegistryError::Cycle(path) => {
                let mut names = path.clone();
                names.sort();
                names.dedup();
                names
            }
        }
    }
}
