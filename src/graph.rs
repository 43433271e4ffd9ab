// src/graph.rs
//
// Dependency Graph: two id-keyed adjacency maps (parents, children) —
// deliberately not a pointer/index-based graph structure, so edges
// survive job removal and serialize trivially. Owns cycle rejection and
// the readiness rule (a job is ready once every parent has reached a
// terminal *success* status).

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::job::ErrorKind;

#[derive(Default)]
pub struct DependencyGraph {
    parents: HashMap<Uuid, HashSet<Uuid>>,
    children: HashMap<Uuid, HashSet<Uuid>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id` with its declared parent set. Rejects unknown
    /// parents and any edge that would close a cycle; on rejection the
    /// graph is left exactly as it was (no partial insert).
    pub fn submit(&mut self, id: Uuid, depends_on: &HashSet<Uuid>) -> Result<(), ErrorKind> {
        for parent in depends_on {
            if !self.parents.contains_key(parent) && !self.children.contains_key(parent) {
                return Err(ErrorKind::UnknownParent);
            }
        }

        // Adding the edge parent -> id closes a cycle exactly when `id`
        // can already reach that parent through its existing children —
        // i.e. the new edge would complete a path back to itself. A
        // brand-new `id` has no children yet, so this is only reachable
        // via a resubmission that adds further parents to an id already
        // in the graph.
        for parent in depends_on {
            if self.reaches(id, *parent) {
                return Err(ErrorKind::CycleDetected);
            }
        }

        self.parents.entry(id).or_default().extend(depends_on.iter().copied());
        self.children.entry(id).or_default();
        for parent in depends_on {
            self.children.entry(*parent).or_default().insert(id);
        }
        Ok(())
    }

    /// DFS: can `start` reach `target` by following child edges?
    fn reaches(&self, start: Uuid, target: Uuid) -> bool {
        let mut stack = vec![start];
        let mut seen = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == target {
                return true;
            }
            if !seen.insert(node) {
                continue;
            }
            if let Some(kids) = self.children.get(&node) {
                stack.extend(kids.iter().copied());
            }
        }
        false
    }

    pub fn parents_of(&self, id: Uuid) -> Vec<Uuid> {
        self.parents.get(&id).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    pub fn children_of(&self, id: Uuid) -> Vec<Uuid> {
        self.children.get(&id).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    pub fn has_parents(&self, id: Uuid) -> bool {
        self.parents.get(&id).map(|s| !s.is_empty()).unwrap_or(false)
    }

    pub fn remove(&mut self, id: Uuid) {
        if let Some(parents) = self.parents.remove(&id) {
            for p in parents {
                if let Some(kids) = self.children.get_mut(&p) {
                    kids.remove(&id);
                }
            }
        }
        if let Some(kids) = self.children.remove(&id) {
            for k in kids {
                if let Some(parents) = self.parents.get_mut(&k) {
                    parents.remove(&id);
                }
            }
        }
    }
}
