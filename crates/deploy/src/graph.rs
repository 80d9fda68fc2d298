//! Dependency ordering of deployment units.
//!
//! A unit depends on another when one of its `store` inputs reads the other's
//! output key. Keys no unit produces are expected to be in the config store
//! already and add no edge.

use std::collections::{BTreeSet, HashMap};

use crate::{error::DeployError, unit::DeploymentUnit};

/// Order `units` so producers come before consumers.
///
/// Stable: among units that are ready at the same time, declaration order wins.
/// Fails on duplicate unit names, duplicate output keys and cycles.
pub fn topological_order(units: &[DeploymentUnit]) -> Result<Vec<&DeploymentUnit>, DeployError> {
    let mut names = HashMap::new();
    let mut producers = HashMap::new();
    for (index, unit) in units.iter().enumerate() {
        if names.insert(unit.name.as_str(), index).is_some() {
            return Err(DeployError::Graph(format!(
                "unit `{}` is declared more than once",
                unit.name
            )));
        }
        if let Some(other) = producers.insert(unit.output_key.as_str(), index) {
            return Err(DeployError::Graph(format!(
                "units `{}` and `{}` both record `{}`",
                units[other].name, unit.name, unit.output_key
            )));
        }
    }

    let mut dependents = vec![Vec::new(); units.len()];
    let mut in_degree = vec![0usize; units.len()];
    for (index, unit) in units.iter().enumerate() {
        let mut seen = BTreeSet::new();
        for key in unit.store_dependencies() {
            let Some(&producer) = producers.get(key.as_str()) else {
                continue;
            };
            if producer == index {
                return Err(DeployError::Graph(format!(
                    "unit `{}` reads its own output key `{}`",
                    unit.name, key
                )));
            }
            if seen.insert(producer) {
                dependents[producer].push(index);
                in_degree[index] += 1;
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..units.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(units.len());
    while let Some(index) = ready.pop_first() {
        order.push(&units[index]);
        for &dependent in &dependents[index] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() != units.len() {
        let stuck: Vec<&str> = units
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] > 0)
            .map(|(_, unit)| unit.name.as_str())
            .collect();
        return Err(DeployError::Graph(format!(
            "dependency cycle between units: {}",
            stuck.join(", ")
        )));
    }

    Ok(order)
}
