//! Experimental: version-agnostic symlinks for versioned shared objects
//!
//! For `libfoo.so.1.2.3` the names `libfoo.so`, `libfoo.so.1` and `libfoo.so.1.2` are expected to be
//! symlinks next to the library. Missing ones, or regular files occupying those names, are
//! proposed for (re)creation; nothing is written without an explicit confirmation.

use crate::common::GraphError;
use crate::graph::ForwardGraph;
use crate::locate::Locator;
use fs_err as fs;
use regex::Regex;
use serde::Serialize;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

/// A symlink that could be created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkProposal {
    /// versioned library the link points to
    pub library: String,
    /// full path of the link to create
    pub link: PathBuf,
    /// link content, relative to the directory of the link
    pub target: String,
    /// a file that is not a symlink currently sits at `link`
    pub replaces_existing: bool,
}

/// Decides whether a proposed link gets created
pub trait Confirm {
    fn confirm(&mut self, proposal: &LinkProposal) -> bool;
}

/// Asks on a terminal (or any reader / writer pair); only the answer `y` accepts
pub struct PromptConfirm<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> PromptConfirm<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> Confirm for PromptConfirm<R, W> {
    fn confirm(&mut self, proposal: &LinkProposal) -> bool {
        let question = if proposal.replaces_existing {
            "exists, do you want to replace it with the symlink?"
        } else {
            "does not exist, do you want to create the symlink?"
        };
        let _ = writeln!(
            self.output,
            "{} -> {} ?\n{} {} [y/N]",
            proposal.link.display(),
            proposal.target,
            proposal.link.display(),
            question
        );
        let _ = self.output.flush();

        let mut answer = String::new();
        match self.input.read_line(&mut answer) {
            Ok(_) => answer.trim() == "y",
            Err(_) => false,
        }
    }
}

/// Outcome of a reconciliation pass
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub created: Vec<PathBuf>,
    pub declined: Vec<PathBuf>,
    pub already_linked: Vec<PathBuf>,
    /// a directory sits where the link should go
    pub blocked: Vec<PathBuf>,
    /// libraries of the graph that are not present under the root
    pub unlocated: Vec<String>,
}

pub struct LinkReconciler<'a> {
    forward: &'a ForwardGraph,
    locator: &'a Locator,
    versioned_re: Regex,
}

impl<'a> LinkReconciler<'a> {
    pub fn new(forward: &'a ForwardGraph, locator: &'a Locator) -> Result<Self, GraphError> {
        Ok(Self {
            forward,
            locator,
            versioned_re: Regex::new(r"^(.+?\.so)\.(.+)$")?,
        })
    }

    /// Names a versioned library should also be reachable by, shortest first
    ///
    /// `libfoo.so.1.2` gives `libfoo.so` and `libfoo.so.1`; unversioned names give nothing.
    pub fn unversioned_names(&self, library: &str) -> Vec<String> {
        let caps = match self.versioned_re.captures(library) {
            Some(c) => c,
            None => return Vec::new(),
        };
        let (base, version) = match (caps.get(1), caps.get(2)) {
            (Some(b), Some(v)) => (b.as_str(), v.as_str()),
            _ => return Vec::new(),
        };

        let mut names = Vec::new();
        let mut name = base.to_owned();
        for component in version.split('.') {
            names.push(name.clone());
            name.push('.');
            name.push_str(component);
        }
        names
    }

    /// Walk every versioned library of the graph, asking `confirm` before creating each link
    pub fn run<C: Confirm>(&self, confirm: &mut C) -> Result<ReconcileReport, GraphError> {
        let mut report = ReconcileReport::default();

        for library in self.forward.names() {
            let candidates = self.unversioned_names(library);
            if candidates.is_empty() {
                continue;
            }

            let found = match self.locator.resolve(library, true)? {
                Some(p) => p,
                None => {
                    log::warn!("{} is in the graph but not under {}", library, self.locator.root().display());
                    report.unlocated.push(library.clone());
                    continue;
                }
            };
            let dir = found.parent().unwrap_or_else(|| self.locator.root());

            for candidate in candidates {
                let link = dir.join(&candidate);
                log::debug!("Trying {}", link.display());

                let replaces_existing = match fs::symlink_metadata(&link) {
                    Ok(m) if m.file_type().is_symlink() => {
                        log::debug!("{} link exists", link.display());
                        report.already_linked.push(link);
                        continue;
                    }
                    Ok(m) if m.is_dir() => {
                        log::warn!("{} is a directory, not linking", link.display());
                        report.blocked.push(link);
                        continue;
                    }
                    Ok(_) => true,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                    Err(e) => return Err(e.into()),
                };

                let proposal = LinkProposal {
                    library: library.clone(),
                    link,
                    target: library.clone(),
                    replaces_existing,
                };
                if confirm.confirm(&proposal) {
                    create_link(&proposal)?;
                    log::info!("created {} -> {}", proposal.link.display(), proposal.target);
                    report.created.push(proposal.link);
                } else {
                    report.declined.push(proposal.link);
                }
            }
        }

        Ok(report)
    }
}

#[cfg(unix)]
fn create_link(proposal: &LinkProposal) -> Result<(), GraphError> {
    if proposal.replaces_existing {
        fs::remove_file(&proposal.link)?;
    }
    fs::os::unix::fs::symlink(Path::new(&proposal.target), &proposal.link)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_link(proposal: &LinkProposal) -> Result<(), GraphError> {
    Err(GraphError::IOError(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("cannot create {}: symlinks are only supported on unix", proposal.link.display()),
    )))
}
