//! Batch validation: ids, dependency references and cycles.
//!
//! Runs before anything executes. A batch that fails here has no side effects.

use crate::error::{Result, SpecrunError};
use std::collections::{HashMap, HashSet, VecDeque};

/// Validate a dependency graph given as `(id, depends_on)` pairs.
///
/// Returns a topological order of indices on success. Fails with
/// `InvalidBatch` on duplicate ids, unknown or self dependencies, and with
/// `CyclicDependency` naming the items on a cycle.
pub fn topological_order<'a, I>(nodes: I) -> Result<Vec<usize>>
where
    I: IntoIterator<Item = (&'a str, &'a [String])>,
{
    let nodes: Vec<(&str, &[String])> = nodes.into_iter().collect();

    let mut index: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
    for (idx, (id, _)) in nodes.iter().enumerate() {
        if id.trim().is_empty() {
            return Err(SpecrunError::InvalidBatch("work item id cannot be empty".to_string()));
        }
        if index.insert(*id, idx).is_some() {
            return Err(SpecrunError::InvalidBatch(format!(
                "duplicate work item id '{}'",
                id
            )));
        }
    }

    // dependents[d] = items that wait on d
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut in_degree: Vec<usize> = vec![0; nodes.len()];
    for (idx, (id, deps)) in nodes.iter().enumerate() {
        let mut seen = HashSet::new();
        for dep in deps.iter() {
            if dep == id {
                return Err(SpecrunError::CyclicDependency(vec![id.to_string()]));
            }
            let &dep_idx = index.get(dep.as_str()).ok_or_else(|| {
                SpecrunError::InvalidBatch(format!(
                    "work item '{}' depends on unknown item '{}'",
                    id, dep
                ))
            })?;
            if seen.insert(dep_idx) {
                dependents[dep_idx].push(idx);
                in_degree[idx] += 1;
            }
        }
    }

    let mut ready: VecDeque<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(idx) = ready.pop_front() {
        order.push(idx);
        for &next in &dependents[idx] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push_back(next);
            }
        }
    }

    if order.len() == nodes.len() {
        return Ok(order);
    }

    let leftover: HashSet<usize> = (0..nodes.len()).filter(|&i| in_degree[i] > 0).collect();
    let on_cycle = cycle_members(&leftover, &dependents);
    let names: Vec<String> = (0..nodes.len())
        .filter(|i| on_cycle.contains(i))
        .map(|i| nodes[i].0.to_string())
        .collect();
    Err(SpecrunError::CyclicDependency(names))
}

/// Trim Kahn's leftovers to nodes that sit on a cycle.
///
/// Leftovers also include items merely downstream of a cycle; repeatedly
/// dropping nodes with no leftover dependents removes those.
fn cycle_members(leftover: &HashSet<usize>, dependents: &[Vec<usize>]) -> HashSet<usize> {
    let mut remaining = leftover.clone();
    loop {
        let sinks: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&n| !dependents[n].iter().any(|d| remaining.contains(d)))
            .collect();
        if sinks.is_empty() {
            return remaining;
        }
        for n in sinks {
            remaining.remove(&n);
        }
    }
}
