use crate::error::RegistryError;
use crate::resolver::DependencyResolver;
use crate::validate::validate_definition;
use core_types::CalculationDefinition;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

/// The authoritative, in-memory store of calculation definitions.
///
/// Every mutation validates the definition and re-checks the dependency graph before it
/// becomes visible, so readers never observe a cyclic or dangling graph. Reads take a
/// shared lock and return owned snapshots.
#[derive(Debug, Default)]
pub struct CalculationRegistry {
    definitions: RwLock<BTreeMap<String, CalculationDefinition>>,
}

impl CalculationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from a batch of definitions, e.g. rows loaded from the database.
    ///
    /// Definitions may arrive in any order; the graph is validated as a whole.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = CalculationDefinition>,
    ) -> Result<Self, RegistryError> {
        let mut map = BTreeMap::new();
        for definition in definitions {
            let name = definition.name.clone();
            if map.insert(name.clone(), definition).is_some() {
                return Err(RegistryError::AlreadyExists(name));
            }
        }
        for definition in map.values() {
            validate_definition(definition, &map)?;
        }
        let names: Vec<&str> = map.keys().map(String::as_str).collect();
        DependencyResolver::new(&map).resolve(&names)?;

        tracing::info!(count = map.len(), "Calculation registry loaded.");
        Ok(Self {
            definitions: RwLock::new(map),
        })
    }

    /// Adds a new calculation. Registering an existing name is an error; use `update`.
    pub fn register(&self, definition: CalculationDefinition) -> Result<(), RegistryError> {
        let mut definitions = self.definitions.write();
        if definitions.contains_key(&definition.name) {
            return Err(RegistryError::AlreadyExists(definition.name));
        }
        validate_definition(&definition, &definitions)?;

        let name = definition.name.clone();
        definitions.insert(name.clone(), definition);
        let checked = DependencyResolver::new(&definitions).resolve(&[name.as_str()]);
        if let Err(e) = checked {
            definitions.remove(&name);
            return Err(e);
        }

        tracing::info!(calculation = %name, "Calculation registered.");
        Ok(())
    }

    /// Replaces an existing calculation and returns the previous definition.
    ///
    /// If the new dependencies would close a cycle through one of the calculation's
    /// dependents, the previous definition is restored and the cycle is reported.
    pub fn update(
        &self,
        name: &str,
        definition: CalculationDefinition,
    ) -> Result<CalculationDefinition, RegistryError> {
        if definition.name != name {
            return Err(RegistryError::validation(
                name,
                format!("cannot rename '{name}' to '{}'", definition.name),
            ));
        }

        let mut definitions = self.definitions.write();
        if !definitions.contains_key(name) {
            return Err(RegistryError::UnknownCalculation(vec![name.to_string()]));
        }
        validate_definition(&definition, &definitions)?;

        let Some(previous) = definitions.insert(name.to_string(), definition) else {
            return Err(RegistryError::UnknownCalculation(vec![name.to_string()]));
        };
        let checked = DependencyResolver::new(&definitions).resolve(&[name]);
        if let Err(e) = checked {
            definitions.insert(name.to_string(), previous);
            return Err(e);
        }

        tracing::info!(calculation = %name, "Calculation updated.");
        Ok(previous)
    }

    /// Removes a calculation that no other calculation depends on.
    pub fn delete(&self, name: &str) -> Result<CalculationDefinition, RegistryError> {
        let mut definitions = self.definitions.write();
        if !definitions.contains_key(name) {
            return Err(RegistryError::UnknownCalculation(vec![name.to_string()]));
        }
        let dependents = dependents_in(&definitions, name);
        if !dependents.is_empty() {
            return Err(RegistryError::Conflict {
                name: name.to_string(),
                dependents,
            });
        }

        let removed = definitions
            .remove(name)
            .ok_or_else(|| RegistryError::UnknownCalculation(vec![name.to_string()]))?;
        tracing::info!(calculation = %name, "Calculation deleted.");
        Ok(removed)
    }

    pub fn get(&self, name: &str) -> Option<CalculationDefinition> {
        self.definitions.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.read().contains_key(name)
    }

    /// All definitions, sorted by name.
    pub fn all(&self) -> Vec<CalculationDefinition> {
        self.definitions.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.read().is_empty()
    }

    /// Names of the calculations that directly depend on `name`, sorted.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        dependents_in(&self.definitions.read(), name)
    }

    /// Names of the closure of `names` in dependency order.
    pub fn resolve_names<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<String>, RegistryError> {
        let definitions = self.definitions.read();
        let order = DependencyResolver::new(&definitions).resolve(names)?;
        Ok(order)
    }

    /// The closure of `names` as definitions in dependency order.
    ///
    /// Order and definitions are taken under one read lock, so a concurrent update cannot
    /// produce a mixed snapshot.
    pub fn resolve<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<Vec<CalculationDefinition>, RegistryError> {
        let definitions = self.definitions.read();
        let order = DependencyResolver::new(&definitions).resolve(names)?;
        order
            .iter()
            .map(|name| {
                definitions
                    .get(name)
                    .cloned()
                    .ok_or_else(|| RegistryError::UnknownCalculation(vec![name.clone()]))
            })
            .collect()
    }
}

fn dependents_in(definitions: &BTreeMap<String, CalculationDefinition>, name: &str) -> Vec<String> {
    definitions
        .values()
        .filter(|definition| definition.dependency_set().contains(name))
        .map(|definition| definition.name.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
