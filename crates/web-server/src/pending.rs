use crate::error::AppError;
use parking_lot::Mutex;
use std::collections::BTreeSet;

/// Calculations whose registry change has not reached the database yet.
///
/// While a name is pending, nothing may depend on it or write it again, so undoing a
/// failed save can never be blocked by a registration that raced in behind it.
#[derive(Debug, Default)]
pub struct PendingWrites {
    names: Mutex<BTreeSet<String>>,
}

/// Releases its name when dropped.
#[derive(Debug)]
pub struct PendingWrite<'a> {
    owner: &'a PendingWrites,
    name: String,
}

impl PendingWrites {
    /// Claims `name` for a write that also installs `dependencies`.
    pub fn begin<'a>(
        &'a self,
        name: &str,
        dependencies: &[String],
    ) -> Result<PendingWrite<'a>, AppError> {
        let mut names = self.names.lock();
        if names.contains(name) {
            return Err(AppError::Conflict {
                message: format!("Calculation '{name}' is already being saved"),
                names: vec![name.to_string()],
            });
        }
        let unsaved: Vec<String> = dependencies
            .iter()
            .filter(|dependency| names.contains(dependency.as_str()))
            .cloned()
            .collect();
        if !unsaved.is_empty() {
            return Err(AppError::Conflict {
                message: format!(
                    "Calculation '{name}' depends on calculations that are still being saved: {}",
                    unsaved.join(", ")
                ),
                names: unsaved,
            });
        }

        names.insert(name.to_string());
        Ok(PendingWrite {
            owner: self,
            name: name.to_string(),
        })
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.names.lock().contains(name)
    }
}

impl Drop for PendingWrite<'_> {
    fn drop(&mut self) {
        self.owner.names.lock().remove(&self.name);
    }
}
