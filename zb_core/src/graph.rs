use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::dependency::{DepContext, Dependency};
use crate::ops::OpError;

/// One interned target: the dependency plus its graph edges.
#[derive(Debug)]
pub struct Node {
    pub dep: Dependency,
    /// Targets that require this one.
    pub required_by: BTreeSet<usize>,
    /// Targets this one requires, deduplicated.
    pub deps: Vec<usize>,
}

/// The dependency graph. Targets are interned by (name, kind); interning
/// an existing identity unions the required-by sets.
#[derive(Debug, Default)]
pub struct TargetGraph {
    nodes: Vec<Node>,
    index: HashMap<(String, &'static str), usize>,
    expanded: HashSet<usize>,
}

impl TargetGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: usize) -> &Node {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn into_nodes(self) -> Vec<Node> {
        self.nodes
    }

    /// Return the canonical target for `dep`, recording that `required_by`
    /// depends on it.
    pub fn intern(&mut self, dep: Dependency, required_by: Option<usize>) -> usize {
        let key = (dep.name(), dep.kind());

        let id = match self.index.get(&key) {
            Some(&id) => id,
            None => {
                let id = self.nodes.len();
                self.nodes.push(Node {
                    dep,
                    required_by: BTreeSet::new(),
                    deps: Vec::new(),
                });
                self.index.insert(key, id);
                id
            }
        };

        if let Some(parent) = required_by {
            if self.nodes[id].required_by.insert(parent) && !self.nodes[parent].deps.contains(&id)
            {
                self.nodes[parent].deps.push(id);
            }
        }

        id
    }

    /// Seed the graph with roots and worklist-expand their transitive
    /// dependencies, interning every node and recording required-by edges
    /// back to the requester. A node already expanded by an earlier batch
    /// is not expanded again.
    pub fn add_roots(&mut self, dc: &DepContext, roots: Vec<Dependency>) -> Result<(), OpError> {
        let mut queue = VecDeque::new();

        for root in roots {
            queue.push_back(self.intern(root, None));
        }

        while let Some(id) = queue.pop_front() {
            if !self.expanded.insert(id) {
                continue;
            }

            let deps = self.nodes[id].dep.dependencies(dc)?;
            for dep in deps {
                let child = self.intern(dep, Some(id));
                queue.push_back(child);
            }
        }

        Ok(())
    }

    /// Every target in dependency-respecting order: dependencies before
    /// dependents, ties broken by name then kind. A cyclic graph still
    /// yields every target exactly once, though the order can then violate
    /// dependency ordering.
    pub fn topological_sort(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.nodes.len()).collect();
        order.sort_by(|&a, &b| self.identity(a).cmp(&self.identity(b)));

        let mut seen = vec![false; self.nodes.len()];
        let mut sorted = Vec::with_capacity(self.nodes.len());

        for &id in &order {
            if !seen[id] {
                self.dfs(id, &mut seen, &mut sorted);
            }
        }

        sorted.reverse();
        sorted
    }

    fn identity(&self, id: usize) -> (String, &'static str) {
        (self.nodes[id].dep.name(), self.nodes[id].dep.kind())
    }

    // postorder over required-by edges; reversed afterwards this puts
    // every dependency before its dependents
    fn dfs(&self, id: usize, seen: &mut [bool], sorted: &mut Vec<usize>) {
        seen[id] = true;

        let mut next: Vec<usize> = self.nodes[id].required_by.iter().copied().collect();
        next.sort_by(|&a, &b| self.identity(a).cmp(&self.identity(b)));

        for n in next {
            if !seen[n] {
                self.dfs(n, seen, sorted);
            }
        }

        sorted.push(id);
    }
}
