//! Read-only questions over a frozen pair of forward / reverse graphs

use crate::common::GraphError;
use crate::graph::{Entry, ForwardGraph, ReverseGraph};
use crate::locate::{is_symlink, Locator};
use regex::Regex;
use serde::Serialize;
use std::path::PathBuf;

/// Library nobody depends on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnusedLibrary {
    pub name: String,
    /// None if the file cannot be found under the root (e.g. graph loaded from another tree)
    pub path: Option<PathBuf>,
}

/// Declared dependency that could not be found
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingDependency {
    pub owner: String,
    pub dependency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub name: String,
    pub path: Option<PathBuf>,
    /// the file found under this name is a symbolic link
    pub is_link: bool,
    pub dependencies: Vec<Entry>,
    pub dependents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependent {
    pub name: String,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Consumers {
    pub name: String,
    pub path: Option<PathBuf>,
    pub dependents: Vec<Dependent>,
}

pub struct GraphQueries<'a> {
    forward: &'a ForwardGraph,
    reverse: &'a ReverseGraph,
    locator: &'a Locator,
    shared_object_re: Regex,
}

impl<'a> GraphQueries<'a> {
    pub fn new(
        forward: &'a ForwardGraph,
        reverse: &'a ReverseGraph,
        locator: &'a Locator,
    ) -> Result<Self, GraphError> {
        Ok(Self {
            forward,
            reverse,
            locator,
            shared_object_re: Regex::new(r"^.+\.so(\..+)?$")?,
        })
    }

    /// Shared objects (`*.so`, `*.so.<version>`) without any dependent
    pub fn unused(&self) -> Result<Vec<UnusedLibrary>, GraphError> {
        self.reverse
            .iter()
            .filter(|(name, dependents)| {
                dependents.is_empty() && self.shared_object_re.is_match(name)
            })
            .map(|(name, _)| {
                Ok(UnusedLibrary {
                    name: name.clone(),
                    path: self.locator.resolve(name, false)?,
                })
            })
            .collect()
    }

    /// Every (owner, dependency) pair where the dependency was not found
    pub fn missing(&self) -> Vec<MissingDependency> {
        self.forward
            .iter()
            .flat_map(|(owner, entries)| {
                entries
                    .iter()
                    .filter(|e| e.is_missing())
                    .map(move |e| MissingDependency {
                        owner: owner.clone(),
                        dependency: e.name().to_owned(),
                    })
            })
            .collect()
    }

    /// Libraries whose name contains `substring`, with their dependencies and dependents
    pub fn search(&self, substring: &str) -> Result<Vec<SearchHit>, GraphError> {
        let pattern = glob::Pattern::new(&format!("*{}*", glob::Pattern::escape(substring)))?;

        let mut hits = Vec::new();
        for (name, entries) in self.forward.iter() {
            if !pattern.matches(name) {
                continue;
            }
            let is_link = self
                .locator
                .resolve(name, true)?
                .map(is_symlink)
                .unwrap_or(false);
            hits.push(SearchHit {
                name: name.clone(),
                path: self.locator.resolve(name, false)?,
                is_link,
                dependencies: entries.iter().cloned().collect(),
                dependents: self.dependents_of(name),
            });
        }
        Ok(hits)
    }

    /// The binaries and libraries that need the library `name`
    pub fn consumers_of(&self, name: &str) -> Result<Consumers, GraphError> {
        if !self.forward.contains(name) {
            return Err(GraphError::NotInGraph(name.to_owned()));
        }

        let dependents = self
            .dependents_of(name)
            .into_iter()
            .map(|d| {
                let path = self.locator.resolve(&d, false)?;
                Ok(Dependent { name: d, path })
            })
            .collect::<Result<Vec<_>, GraphError>>()?;

        Ok(Consumers {
            name: name.to_owned(),
            path: self.locator.resolve(name, false)?,
            dependents,
        })
    }

    fn dependents_of(&self, name: &str) -> Vec<String> {
        self.reverse
            .get(name)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }
}
