//! Dependency resolution over required foreign keys.
//!
//! Only required (NOT NULL) foreign keys constrain the load order. Nullable
//! references may point anywhere, including back at their own entity; the
//! applier defers them instead.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;

use crate::catalog::Catalog;
use crate::error::LoadError;

/// A total order in which entities may be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOrder {
    entities: Vec<String>,
    positions: HashMap<String, usize>,
}

impl LoadOrder {
    pub fn entities(&self) -> &[String] {
        &self.entities
    }

    pub fn position(&self, entity: &str) -> Option<usize> {
        self.positions.get(entity).copied()
    }

    /// True when `entity` is loaded strictly before `other`.
    pub fn loads_before(&self, entity: &str, other: &str) -> bool {
        match (self.position(entity), self.position(other)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }
}

/// Computes the load order with Kahn's algorithm, picking ready entities in
/// ascending name order.
pub fn resolve(catalog: &Catalog) -> Result<LoadOrder, LoadError> {
    // entity -> entities it requires
    let mut requires: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    // entity -> entities that require it
    let mut required_by: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

    for entity in catalog.iter() {
        requires.entry(entity.name.as_str()).or_default();
        for fk in &entity.foreign_keys {
            if catalog.get(&fk.referenced_entity).is_none() {
                return Err(LoadError::UnknownEntity(fk.referenced_entity.clone()));
            }
        }
        for fk in entity.required_foreign_keys() {
            requires
                .entry(entity.name.as_str())
                .or_default()
                .insert(fk.referenced_entity.as_str());
            required_by
                .entry(fk.referenced_entity.as_str())
                .or_default()
                .insert(entity.name.as_str());
        }
    }

    let mut in_degree: BTreeMap<&str, usize> =
        requires.iter().map(|(name, deps)| (*name, deps.len())).collect();
    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();

    let mut entities = Vec::with_capacity(in_degree.len());
    while let Some(name) = ready.pop_first() {
        entities.push(name.to_string());
        for &dependent in required_by.get(name).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if entities.len() < requires.len() {
        let placed: BTreeSet<&str> = entities.iter().map(String::as_str).collect();
        let remaining: BTreeMap<&str, BTreeSet<&str>> = requires
            .iter()
            .filter(|(name, _)| !placed.contains(*name))
            .map(|(name, deps)| {
                let deps = deps.iter().filter(|d| !placed.contains(*d)).copied().collect();
                (*name, deps)
            })
            .collect();
        return Err(LoadError::CyclicDependency {
            entities: cycle_members(&remaining),
        });
    }

    let positions = entities
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), i))
        .collect();
    Ok(LoadOrder {
        entities,
        positions,
    })
}

/// Entities that sit on a cycle: members of strongly connected components
/// with more than one node, or with a self-edge. Entities that merely depend
/// on a cycle are left out.
fn cycle_members(graph: &BTreeMap<&str, BTreeSet<&str>>) -> Vec<String> {
    let mut dependencies: DiGraphMap<&str, ()> = DiGraphMap::new();
    for (&entity, requires) in graph {
        dependencies.add_node(entity);
        for &target in requires {
            dependencies.add_edge(entity, target, ());
        }
    }

    let mut members = BTreeSet::new();
    for component in tarjan_scc(&dependencies) {
        let on_cycle = match component.as_slice() {
            [single] => dependencies.contains_edge(*single, *single),
            _ => true,
        };
        if on_cycle {
            members.extend(component);
        }
    }

    members.into_iter().map(str::to_string).collect()
}
