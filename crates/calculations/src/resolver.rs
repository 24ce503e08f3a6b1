use crate::error::RegistryError;
use core_types::CalculationDefinition;
use std::collections::{BTreeMap, BTreeSet};

/// Orders calculations so that every dependency precedes its dependents.
///
/// The resolver works over a borrowed view of the definitions, so the registry can run it
/// under a single read lock and hand out a consistent snapshot.
pub struct DependencyResolver<'a> {
    definitions: &'a BTreeMap<String, CalculationDefinition>,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(definitions: &'a BTreeMap<String, CalculationDefinition>) -> Self {
        Self { definitions }
    }

    /// The transitive closure of `names` under `dependencies`.
    pub fn closure<S: AsRef<str>>(&self, names: &[S]) -> Result<BTreeSet<&'a str>, RegistryError> {
        let mut visited: BTreeSet<&'a str> = BTreeSet::new();
        let mut unknown: BTreeSet<String> = BTreeSet::new();
        let mut stack: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();

        while let Some(name) = stack.pop() {
            let Some((key, definition)) = self.definitions.get_key_value(&name) else {
                unknown.insert(name);
                continue;
            };
            if !visited.insert(key.as_str()) {
                continue;
            }
            for dependency in definition.dependency_set() {
                if !visited.contains(dependency) {
                    stack.push(dependency.to_string());
                }
            }
        }

        if !unknown.is_empty() {
            return Err(RegistryError::UnknownCalculation(unknown.into_iter().collect()));
        }
        Ok(visited)
    }

    /// Resolves `names` to their closure in dependency order.
    ///
    /// Calculations that become ready at the same time are emitted in lexical order, so the
    /// generated SQL is stable across runs.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<String>, RegistryError> {
        let closure = self.closure(names)?;

        let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for &name in &closure {
            let dependencies = self.dependencies_of(name);
            pending.insert(name, dependencies.len());
            for dependency in dependencies {
                dependents.entry(dependency).or_default().push(name);
            }
        }

        let mut ready: BTreeSet<&str> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut order = Vec::with_capacity(closure.len());

        while let Some(name) = ready.pop_first() {
            order.push(name.to_string());
            for &dependent in dependents.get(name).map(Vec::as_slice).unwrap_or_default() {
                if let Some(count) = pending.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if order.len() < closure.len() {
            let remaining: BTreeSet<&str> = pending
                .into_iter()
                .filter(|(_, count)| *count > 0)
                .map(|(name, _)| name)
                .collect();
            let cycle = self
                .find_cycle(&remaining)
                .unwrap_or_else(|| remaining.iter().map(|n| n.to_string()).collect());
            return Err(RegistryError::Cycle(cycle));
        }

        Ok(order)
    }

    /// Finds one cycle among `nodes`, returned as a closed path such as `[a, b, a]`.
    pub fn find_cycle(&self, nodes: &BTreeSet<&str>) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            InProgress,
            Done,
        }

        let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();

        for &start in nodes {
            if marks.contains_key(start) {
                continue;
            }
            // Iterative DFS; each frame holds a node and the index of its next dependency.
            let mut path: Vec<(&str, usize)> = vec![(start, 0)];
            marks.insert(start, Mark::InProgress);

            while let Some(frame) = path.last_mut() {
                let (node, index) = *frame;
                frame.1 += 1;
                let dependencies = self.dependencies_of(node);
                let Some(&dependency) = dependencies.get(index) else {
                    marks.insert(node, Mark::Done);
                    path.pop();
                    continue;
                };
                if !nodes.contains(dependency) {
                    continue;
                }
                match marks.get(dependency) {
                    Some(Mark::InProgress) => {
                        let begin = path.iter().position(|(n, _)| *n == dependency)?;
                        let mut cycle: Vec<String> =
                            path[begin..].iter().map(|(n, _)| n.to_string()).collect();
                        cycle.push(dependency.to_string());
                        return Some(cycle);
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(dependency, Mark::InProgress);
                        path.push((dependency, 0));
                    }
                }
            }
        }
        None
    }

    fn dependencies_of(&self, name: &str) -> Vec<&'a str> {
        self.definitions
            .get(name)
            .map(|definition| {
                definition
                    .dependencies
                    .iter()
                    .map(String::as_str)
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            })
            .unwrap_or_default()
    }
}
