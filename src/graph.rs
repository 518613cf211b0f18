//! Derivation dependency graph and cycle detection (spec §4.2).
//!
//! The scope pass already records each derived/alias binding's direct
//! reactive references (`Binding::deps`); this pass turns that into a
//! graph restricted to derived→derived edges and walks it depth-first to
//! find cycles, matching the teacher's `Visit`-based collector style
//! (`scope.rs::ScopeAwareCollector`) generalized to a small explicit graph
//! instead of an ad hoc allowlist check.

use crate::diagnostics::{error_code, CompileError};
use crate::scope::{BindingKind, ScopeId, ScopeTree};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct DerivationGraph {
    /// derived/alias name -> set of derived/alias names it reads directly.
    edges: HashMap<String, HashSet<String>>,
}

impl DerivationGraph {
    pub fn edges_of(&self, name: &str) -> impl Iterator<Item = &String> {
        self.edges.get(name).into_iter().flatten()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &String> {
        self.edges.keys()
    }
}

fn is_derivation(kind: BindingKind) -> bool {
    matches!(
        kind,
        BindingKind::Derived | BindingKind::DerivedMemo | BindingKind::DerivedGetter | BindingKind::Alias
    )
}

/// Builds the graph by walking every scope once and keeping only the edges
/// between two derivation-class bindings (state/prop/store deps are leaves,
/// not graph nodes, per spec §3 "Derivation graph... nodes = derived
/// bindings").
pub fn build_graph(tree: &ScopeTree, file: &str) -> Result<DerivationGraph, CompileError> {
    let mut graph = DerivationGraph::default();
    for scope_id in 0..tree.len() {
        let scope = tree.get(scope_id);
        for binding in scope.bindings.values() {
            if !is_derivation(binding.kind) {
                continue;
            }
            let mut direct_derived_deps = HashSet::new();
            for dep_name in &binding.deps {
                if let Some(dep_binding) = tree.resolve(binding.owner_scope, dep_name) {
                    if is_derivation(dep_binding.kind) {
                        direct_derived_deps.insert(dep_name.clone());
                    }
                }
            }
            graph.edges.insert(binding.name.clone(), direct_derived_deps);
        }
    }
    find_cycle(&graph, file)?;
    Ok(graph)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Visiting,
    Done,
}

fn find_cycle(graph: &DerivationGraph, file: &str) -> Result<(), CompileError> {
    let mut state: HashMap<&str, VisitState> = HashMap::new();
    let mut stack: Vec<&str> = Vec::new();

    for start in graph.nodes() {
        if state.contains_key(start.as_str()) {
            continue;
        }
        if let Some(cycle) = dfs(graph, start, &mut state, &mut stack) {
            let path = cycle.join(" -> ");
            return Err(CompileError::new(
                error_code::DERIVATION_CYCLE,
                format!("cyclic derivation: {}", path),
                file,
                1,
                1,
            ));
        }
    }
    Ok(())
}

fn dfs<'a>(
    graph: &'a DerivationGraph,
    node: &'a str,
    state: &mut HashMap<&'a str, VisitState>,
    stack: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    state.insert(node, VisitState::Visiting);
    stack.push(node);

    for next in graph.edges_of(node) {
        match state.get(next.as_str()) {
            Some(VisitState::Visiting) => {
                let start = stack.iter().position(|n| *n == next.as_str()).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(next.clone());
                return Some(cycle);
            }
            Some(VisitState::Done) => continue,
            None => {
                if let Some(cycle) = dfs(graph, next.as_str(), state, stack) {
                    return Some(cycle);
                }
            }
        }
    }

    stack.pop();
    state.insert(node, VisitState::Done);
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_from(pairs: &[(&str, &[&str])]) -> DerivationGraph {
        let mut g = DerivationGraph::default();
        for (name, deps) in pairs {
            g.edges.insert(name.to_string(), deps.iter().map(|s| s.to_string()).collect());
        }
        g
    }

    #[test]
    fn acyclic_graph_passes() {
        let g = graph_from(&[("b", &["a"]), ("a", &[])]);
        assert!(find_cycle(&g, "test.tsx").is_ok());
    }

    #[test]
    fn direct_cycle_detected() {
        let g = graph_from(&[("a", &["b"]), ("b", &["a"])]);
        let err = find_cycle(&g, "test.tsx").unwrap_err();
        assert!(err.message.contains("a -> b -> a") || err.message.contains("b -> a -> b"));
    }
}
