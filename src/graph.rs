//! Forward and reverse dependency graphs
//!
//! Nodes are library (or executable) file names. The forward graph maps each node to the flattened
//! set of its transitive dependencies; the reverse graph maps each node to the nodes depending on it.

use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::{BTreeMap, BTreeSet};

/// One dependency of a node in the forward graph
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum Entry {
    /// Dependency found under the search root, identified by its file name
    Resolved(String),
    /// Declared dependency for which no file was found
    Missing(String),
}

impl Entry {
    pub fn name(&self) -> &str {
        match self {
            Entry::Resolved(n) | Entry::Missing(n) => n,
        }
    }

    pub fn resolved(&self) -> Option<&str> {
        match self {
            Entry::Resolved(n) => Some(n),
            Entry::Missing(_) => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Entry::Missing(_))
    }
}

impl std::fmt::Display for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entry::Resolved(n) => write!(f, "{}", n),
            Entry::Missing(n) => write!(f, "{} (missing)", n),
        }
    }
}

/// Frozen forward graph: every analyzed file and its flattened, deduplicated dependencies
///
/// Built by [`crate::runner::GraphBuilder::finish`] or loaded from a snapshot; never modified after.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardGraph {
    nodes: BTreeMap<String, BTreeSet<Entry>>,
}

impl ForwardGraph {
    pub(crate) fn from_nodes(nodes: BTreeMap<String, BTreeSet<Entry>>) -> Self {
        Self { nodes }
    }

    pub fn get(&self, name: &str) -> Option<&BTreeSet<Entry>> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn names(&self) -> btree_map::Keys<'_, String, BTreeSet<Entry>> {
        self.nodes.keys()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, BTreeSet<Entry>> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl FromIterator<(String, BTreeSet<Entry>)> for ForwardGraph {
    fn from_iter<I: IntoIterator<Item = (String, BTreeSet<Entry>)>>(iter: I) -> Self {
        Self {
            nodes: iter.into_iter().collect(),
        }
    }
}

/// For each node, the set of nodes whose forward entry contains it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReverseGraph {
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl ReverseGraph {
    /// Invert the forward graph in a single pass over all of its entries
    ///
    /// Exactly the forward nodes get a (possibly empty) dependents set; missing entries are ignored.
    pub fn from_forward(forward: &ForwardGraph) -> Self {
        let mut dependents: BTreeMap<String, BTreeSet<String>> = forward
            .names()
            .map(|n| (n.clone(), BTreeSet::new()))
            .collect();

        for (dependent, entries) in forward.iter() {
            for dependency in entries.iter().filter_map(Entry::resolved) {
                // files that were found but could not be analyzed are not nodes
                if let Some(d) = dependents.get_mut(dependency) {
                    d.insert(dependent.clone());
                }
            }
        }

        Self { dependents }
    }

    pub fn get(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.dependents.get(name)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, BTreeSet<String>> {
        self.dependents.iter()
    }

    pub fn len(&self) -> usize {
        self.dependents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependents.is_empty()
    }
}
