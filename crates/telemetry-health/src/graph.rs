//! Dependency DAG over health probes: cycle-rejecting edges, topological
//! evaluation order, dependency-aware checks, and blast-radius queries.

use crate::probe::{HealthCheckResult, HealthProbeBoxed, HealthStatus};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("node '{0}' already exists")]
    AlreadyExists(String),
    #[error("node '{0}' not found")]
    NotFound(String),
    #[error("adding dependency '{dependent}' -> '{dependency}' would create a cycle")]
    WouldCreateCycle { dependent: String, dependency: String },
}

struct Node {
    probe: Arc<dyn HealthProbeBoxed>,
    dependencies: HashSet<String>,
    dependents: HashSet<String>,
    last_result: Option<HealthCheckResult>,
    last_check: Option<SystemTime>,
}

/// A dependency DAG of named health probes.
///
/// An edge `add_dependency(dependent, dependency)` means "`dependent`
/// depends on `dependency`" — `dependency` must be healthy (or degraded)
/// before `dependent`'s own probe is worth running. Stored as a plain
/// adjacency map guarded by one `RwLock`: structural mutation (add/remove
/// node or edge) takes the write lock; evaluation takes the read lock plus
/// per-probe execution that doesn't touch the map at all.
pub struct DependencyGraph {
    nodes: RwLock<std::collections::HashMap<String, Node>>,
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(std::collections::HashMap::new()),
        }
    }

    /// Registers a probe under `name`. Rejects a duplicate name.
    pub fn add_node(&self, name: impl Into<String>, probe: Arc<dyn HealthProbeBoxed>) -> Result<(), GraphError> {
        let name = name.into();
        let mut nodes = self.nodes.write().unwrap();
        if nodes.contains_key(&name) {
            return Err(GraphError::AlreadyExists(name));
        }
        nodes.insert(
            name,
            Node {
                probe,
                dependencies: HashSet::new(),
                dependents: HashSet::new(),
                last_result: None,
                last_check: None,
            },
        );
        Ok(())
    }

    pub fn remove_node(&self, name: &str) -> Result<(), GraphError> {
        let mut nodes = self.nodes.write().unwrap();
        let node = nodes.remove(name).ok_or_else(|| GraphError::NotFound(name.to_string()))?;
        for dep in &node.dependencies {
            if let Some(n) = nodes.get_mut(dep) {
                n.dependents.remove(name);
            }
        }
        for dependent in &node.dependents {
            if let Some(n) = nodes.get_mut(dependent) {
                n.dependencies.remove(name);
            }
        }
        Ok(())
    }

    /// Adds a `dependent -> dependency` edge, rejecting it if both endpoints
    /// don't already exist or if it would close a cycle.
    pub fn add_dependency(&self, dependent: &str, dependency: &str) -> Result<(), GraphError> {
        let mut nodes = self.nodes.write().unwrap();
        if !nodes.contains_key(dependent) {
            return Err(GraphError::NotFound(dependent.to_string()));
        }
        if !nodes.contains_key(dependency) {
            return Err(GraphError::NotFound(dependency.to_string()));
        }

        if reachable(&nodes, dependency, dependent) {
            return Err(GraphError::WouldCreateCycle {
                dependent: dependent.to_string(),
                dependency: dependency.to_string(),
            });
        }

        nodes.get_mut(dependent).unwrap().dependencies.insert(dependency.to_string());
        nodes.get_mut(dependency).unwrap().dependents.insert(dependent.to_string());
        Ok(())
    }

    pub fn remove_dependency(&self, dependent: &str, dependency: &str) -> Result<(), GraphError> {
        let mut nodes = self.nodes.write().unwrap();
        if !nodes.contains_key(dependent) {
            return Err(GraphError::NotFound(dependent.to_string()));
        }
        if !nodes.contains_key(dependency) {
            return Err(GraphError::NotFound(dependency.to_string()));
        }
        nodes.get_mut(dependent).unwrap().dependencies.remove(dependency);
        nodes.get_mut(dependency).unwrap().dependents.remove(dependent);
        Ok(())
    }

    /// Would adding `dependent -> dependency` create a cycle? Read-only,
    /// used by callers that want to check before committing.
    #[must_use]
    pub fn would_create_cycle(&self, dependent: &str, dependency: &str) -> bool {
        let nodes = self.nodes.read().unwrap();
        reachable(&nodes, dependency, dependent)
    }

    pub fn dependencies_of(&self, name: &str) -> Result<Vec<String>, GraphError> {
        let nodes = self.nodes.read().unwrap();
        let node = nodes.get(name).ok_or_else(|| GraphError::NotFound(name.to_string()))?;
        Ok(node.dependencies.iter().cloned().collect())
    }

    pub fn dependents_of(&self, name: &str) -> Result<Vec<String>, GraphError> {
        let nodes = self.nodes.read().unwrap();
        let node = nodes.get(name).ok_or_else(|| GraphError::NotFound(name.to_string()))?;
        Ok(node.dependents.iter().cloned().collect())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.read().unwrap().contains_key(name)
    }

    pub fn node_names(&self) -> Vec<String> {
        self.nodes.read().unwrap().keys().cloned().collect()
    }

    /// Kahn's algorithm: leaves (no dependencies) first, then nodes whose
    /// dependencies have all already drained. The graph is acyclic by
    /// construction (every [`DependencyGraph::add_dependency`] call that
    /// would close a cycle is rejected), so this always drains every node.
    #[must_use]
    pub fn topological_sort(&self) -> Vec<String> {
        let nodes = self.nodes.read().unwrap();
        let mut in_degree: std::collections::HashMap<&str, usize> = nodes
            .iter()
            .map(|(name, node)| (name.as_str(), node.dependencies.len()))
            .collect();

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&name, _)| name)
            .collect();
        // Deterministic order among same-degree nodes makes the output
        // reproducible for tests and reports.
        let mut ordered_queue: Vec<&str> = queue.drain(..).collect();
        ordered_queue.sort_unstable();
        let mut queue: VecDeque<&str> = ordered_queue.into();

        let mut order = Vec::with_capacity(nodes.len());
        while let Some(name) = queue.pop_front() {
            order.push(name.to_string());
            let mut newly_ready: Vec<&str> = Vec::new();
            for dependent in &nodes[name].dependents {
                let degree = in_degree.get_mut(dependent.as_str()).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    newly_ready.push(dependent.as_str());
                }
            }
            newly_ready.sort_unstable();
            queue.extend(newly_ready);
        }

        order
    }

    /// Evaluates `name`'s probe, applying its configured timeout. Dependency
    /// order is the caller's responsibility; this runs one node only.
    pub async fn check(&self, name: &str) -> Result<HealthCheckResult, GraphError> {
        let probe = {
            let nodes = self.nodes.read().unwrap();
            let node = nodes.get(name).ok_or_else(|| GraphError::NotFound(name.to_string()))?;
            Arc::clone(&node.probe)
        };

        let timeout = probe.timeout();
        let started = SystemTime::now();
        let result = match tokio::time::timeout(timeout, probe.check_boxed()).await {
            Ok(mut result) => {
                let elapsed = started.elapsed().unwrap_or(Duration::ZERO);
                result.duration = elapsed;
                result
            }
            Err(_) => HealthCheckResult::timeout(timeout),
        };

        let mut nodes = self.nodes.write().unwrap();
        if let Some(node) = nodes.get_mut(name) {
            node.last_result = Some(result.clone());
            node.last_check = Some(SystemTime::now());
        }
        Ok(result)
    }

    /// Evaluates `name`'s dependencies first (recursively); if any is
    /// non-operational, `name` is reported unhealthy *without* invoking its
    /// own probe — a failing dependency makes the dependent's own status
    /// moot.
    pub async fn check_with_dependencies(&self, name: &str) -> Result<HealthCheckResult, GraphError> {
        let dependencies = self.dependencies_of(name)?;

        for dep in &dependencies {
            let dep_result = Box::pin(self.check_with_dependencies(dep)).await?;
            if !dep_result.status.is_operational() {
                let result = HealthCheckResult::unhealthy(format!(
                    "dependency '{dep}' is {:?}",
                    dep_result.status
                ));
                let mut nodes = self.nodes.write().unwrap();
                if let Some(node) = nodes.get_mut(name) {
                    node.last_result = Some(result.clone());
                    node.last_check = Some(SystemTime::now());
                }
                return Ok(result);
            }
        }

        self.check(name).await
    }

    pub fn last_result(&self, name: &str) -> Result<Option<HealthCheckResult>, GraphError> {
        let nodes = self.nodes.read().unwrap();
        let node = nodes.get(name).ok_or_else(|| GraphError::NotFound(name.to_string()))?;
        Ok(node.last_result.clone())
    }

    pub fn last_check_time(&self, name: &str) -> Result<Option<SystemTime>, GraphError> {
        let nodes = self.nodes.read().unwrap();
        let node = nodes.get(name).ok_or_else(|| GraphError::NotFound(name.to_string()))?;
        Ok(node.last_check)
    }

    /// Blast radius: the transitive closure of `name`'s dependents — every
    /// node that would be reported unhealthy, directly or indirectly, if
    /// `name` failed.
    pub fn get_failure_impact(&self, name: &str) -> Vec<String> {
        let nodes = self.nodes.read().unwrap();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        if let Some(node) = nodes.get(name) {
            queue.extend(node.dependents.iter().cloned());
        }

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(node) = nodes.get(&current) {
                queue.extend(node.dependents.iter().cloned());
            }
        }

        let mut impact: Vec<String> = visited.into_iter().collect();
        impact.sort_unstable();
        impact
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().unwrap().len()
    }

    pub fn is_critical(&self, name: &str) -> Result<bool, GraphError> {
        let nodes = self.nodes.read().unwrap();
        let node = nodes.get(name).ok_or_else(|| GraphError::NotFound(name.to_string()))?;
        Ok(node.probe.is_critical())
    }
}

/// DFS reachability: can `from` reach `to` by following dependency edges?
fn reachable(
    nodes: &std::collections::HashMap<String, Node>,
    from: &str,
    to: &str,
) -> bool {
    if from == to {
        return true;
    }
    let mut visited = HashSet::new();
    let mut stack = vec![from.to_string()];
    while let Some(current) = stack.pop() {
        if current == to {
            return true;
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        if let Some(node) = nodes.get(&current) {
            stack.extend(node.dependencies.iter().cloned());
        }
    }
    false
}
