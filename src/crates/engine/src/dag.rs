//! Workflow graph validation and readiness
//!
//! `validate` checks reference integrity before cycle detection (a DFS
//! with an explicit recursion stack) and parses every node config against
//! its kind. `runnable` answers "which nodes may start now" given the
//! completed set. Both are O(V+E) and mutate nothing.

use crate::error::{EngineError, Result};
use crate::model::{NodeConfig, Workflow};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Validate a workflow definition.
///
/// Checks, in order: node-id uniqueness, dangling dependency references,
/// cycles, and per-kind config shape. The first cycle back-edge observed
/// names the node already on the recursion stack.
pub fn validate(workflow: &Workflow) -> Result<()> {
    let mut seen = HashSet::new();
    for node in &workflow.nodes {
        if !seen.insert(node.id.as_str()) {
            return Err(EngineError::Validation(format!(
                "Duplicate node id '{}'",
                node.id
            )));
        }
    }

    let dependencies = workflow.dependency_map();

    // Missing references are reported before cycle detection.
    for node in &workflow.nodes {
        if let Some(deps) = dependencies.get(&node.id) {
            for dep in deps {
                if !seen.contains(dep.as_str()) {
                    return Err(EngineError::DanglingDependency {
                        node: node.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
    }

    detect_cycles(workflow, &dependencies)?;

    for node in &workflow.nodes {
        NodeConfig::parse(node)?;
    }

    Ok(())
}

fn detect_cycles(
    workflow: &Workflow,
    dependencies: &HashMap<String, BTreeSet<String>>,
) -> Result<()> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: HashSet<&str> = HashSet::new();

    for node in &workflow.nodes {
        if !visited.contains(node.id.as_str()) {
            visit(node.id.as_str(), dependencies, &mut visited, &mut stack)?;
        }
    }
    Ok(())
}

fn visit<'a>(
    node: &'a str,
    dependencies: &'a HashMap<String, BTreeSet<String>>,
    visited: &mut HashSet<&'a str>,
    stack: &mut HashSet<&'a str>,
) -> Result<()> {
    visited.insert(node);
    stack.insert(node);

    if let Some(deps) = dependencies.get(node) {
        for dep in deps {
            if stack.contains(dep.as_str()) {
                // Back edge: `dep` is an ancestor of `node`.
                return Err(EngineError::CyclicGraph(dep.clone()));
            }
            if !visited.contains(dep.as_str()) {
                visit(dep.as_str(), dependencies, visited, stack)?;
            }
        }
    }

    stack.remove(node);
    Ok(())
}

/// Nodes not yet completed whose every dependency is completed.
///
/// Order is unspecified; callers must not rely on it.
pub fn runnable(workflow: &Workflow, completed: &HashSet<String>) -> Vec<String> {
    let dependencies = workflow.dependency_map();
    runnable_with(workflow, &dependencies, completed)
}

/// [`runnable`] against a precomputed dependency map (the scheduler builds
/// the map once per run)
pub fn runnable_with(
    workflow: &Workflow,
    dependencies: &HashMap<String, BTreeSet<String>>,
    completed: &HashSet<String>,
) -> Vec<String> {
    workflow
        .nodes
        .iter()
        .filter(|node| !completed.contains(&node.id))
        .filter(|node| {
            dependencies
                .get(&node.id)
                .map(|deps| deps.iter().all(|dep| completed.contains(dep)))
                .unwrap_or(true)
        })
        .map(|node| node.id.clone())
        .collect()
}
