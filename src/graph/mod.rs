//! Dependency graph construction and ordering.
//!
//! Builds a directed graph over resource identifiers from the model's
//! reference edges, detects cycles, and produces a deterministic
//! topological order (lexicographic tie-break) that planning relies on.

use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use crate::error::{ModelError, Result, StratusError};
use crate::model::ResourceModel;

/// A directed acyclic dependency graph over resource identifiers.
///
/// An edge A -> B means "B must converge before A" (A depends on B).
#[derive(Debug)]
pub struct DependencyGraph {
    /// Dependencies per resource: the resources it points at.
    dependencies: BTreeMap<String, BTreeSet<String>>,
    /// Reverse edges: the resources that depend on a given resource.
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Builds the graph from the model's reference edges.
    ///
    /// # Errors
    ///
    /// Fails with `CyclicDependency`, naming the cycle's resource
    /// identifiers, when the reference relation contains a cycle. This
    /// is fatal and not retried.
    pub fn build(model: &ResourceModel) -> Result<Self> {
        let mut dependencies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut dependents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for decl in model.resources() {
            let deps: BTreeSet<String> = model
                .dependencies_of(&decl.id)
                .into_iter()
                .map(str::to_string)
                .collect();

            for dep in &deps {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .insert(decl.id.clone());
            }
            dependencies.insert(decl.id.clone(), deps);
            dependents.entry(decl.id.clone()).or_default();
        }

        let graph = Self {
            dependencies,
            dependents,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Builds a graph from explicit edges, used when ordering deletions
    /// from recorded state rather than from a live model.
    ///
    /// # Errors
    ///
    /// Fails with `CyclicDependency` when the edges contain a cycle.
    pub fn from_edges(edges: &BTreeMap<String, BTreeSet<String>>) -> Result<Self> {
        let mut dependencies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut dependents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for (id, deps) in edges {
            // Edges to resources outside the set are dropped; deletions only
            // order among the records being removed.
            let deps: BTreeSet<String> = deps
                .iter()
                .filter(|d| edges.contains_key(*d))
                .cloned()
                .collect();
            for dep in &deps {
                dependents.entry(dep.clone()).or_default().insert(id.clone());
            }
            dependencies.insert(id.clone(), deps);
            dependents.entry(id.clone()).or_default();
        }

        let graph = Self {
            dependencies,
            dependents,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Returns the dependencies of a resource.
    #[must_use]
    pub fn dependencies_of(&self, id: &str) -> Option<&BTreeSet<String>> {
        self.dependencies.get(id)
    }

    /// Returns the resources that depend on the given resource.
    #[must_use]
    pub fn dependents_of(&self, id: &str) -> Option<&BTreeSet<String>> {
        self.dependents.get(id)
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Produces a topological order: every resource appears after all of
    /// its dependencies. Ties are broken lexicographically by identifier
    /// so plans are deterministic across runs with identical input.
    #[must_use]
    pub fn topological_order(&self) -> Vec<String> {
        let mut remaining: BTreeMap<&str, usize> = self
            .dependencies
            .iter()
            .map(|(id, deps)| (id.as_str(), deps.len()))
            .collect();

        // Min-heap via Reverse for lexicographically-smallest-first.
        let mut ready: BinaryHeap<std::cmp::Reverse<&str>> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| std::cmp::Reverse(*id))
            .collect();

        let mut order = Vec::with_capacity(remaining.len());

        while let Some(std::cmp::Reverse(id)) = ready.pop() {
            order.push(id.to_string());

            if let Some(deps) = self.dependents.get(id) {
                for dependent in deps {
                    if let Some(count) = remaining.get_mut(dependent.as_str()) {
                        *count -= 1;
                        if *count == 0 {
                            ready.push(std::cmp::Reverse(dependent.as_str()));
                        }
                    }
                }
            }
        }

        // Construction already rejected cycles, so every node is emitted.
        order
    }

    /// Produces the reverse of the topological order, used to sequence
    /// deletions (a resource is deleted only after everything depending
    /// on it is gone).
    #[must_use]
    pub fn reverse_topological_order(&self) -> Vec<String> {
        let mut order = self.topological_order();
        order.reverse();
        order
    }

    /// Depth-first cycle detection with recursion-stack tracking.
    fn check_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks: BTreeMap<&str, Mark> = self
            .dependencies
            .keys()
            .map(|id| (id.as_str(), Mark::Unvisited))
            .collect();

        // Iterative DFS; the explicit stack mirrors the recursion stack so
        // a back edge can be reported as the actual cycle path.
        for start in self.dependencies.keys() {
            if marks[start.as_str()] != Mark::Unvisited {
                continue;
            }

            let mut stack: Vec<(&str, Vec<&str>)> = vec![(
                start.as_str(),
                self.sorted_deps(start),
            )];
            marks.insert(start.as_str(), Mark::InProgress);

            while let Some(top) = stack.last_mut() {
                let node = top.0;
                if let Some(next) = top.1.pop() {
                    match marks[next] {
                        Mark::Unvisited => {
                            marks.insert(next, Mark::InProgress);
                            let next_deps = self.sorted_deps(next);
                            stack.push((next, next_deps));
                        }
                        Mark::InProgress => {
                            let mut cycle: Vec<&str> = stack
                                .iter()
                                .map(|(n, _)| *n)
                                .skip_while(|n| *n != next)
                                .collect();
                            cycle.push(next);
                            return Err(StratusError::Model(ModelError::CyclicDependency {
                                cycle: cycle.join(" -> "),
                            }));
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks.insert(node, Mark::Done);
                    stack.pop();
                }
            }
        }

        Ok(())
    }

    /// Dependencies of a node in reverse order, so popping yields them
    /// lexicographically and cycle reports are deterministic.
    fn sorted_deps(&self, id: &str) -> Vec<&str> {
        self.dependencies
            .get(id)
            .map(|deps| deps.iter().rev().map(String::as_str).collect())
            .unwrap_or_default()
    }
}
