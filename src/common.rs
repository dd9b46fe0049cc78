use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error("Directory walk error")]
    WalkError(#[from] walkdir::Error),

    #[error("ELF file parse error")]
    ElfError(#[from] goblin::error::Error),

    #[error("{0:?} is not an ELF file")]
    NotElf(PathBuf),

    #[error("Dependency tool failed on {path:?}: {reason}")]
    ToolError { path: PathBuf, reason: String },

    #[error("Snapshot error: {0}")]
    SnapshotError(String),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid dependency pattern")]
    RegexError(#[from] regex::Error),

    #[error("Invalid search pattern")]
    PatternError(#[from] glob::PatternError),

    #[error("{0} is not part of the dependency graph")]
    NotInGraph(String),
}

impl GraphError {
    pub(crate) fn tool<P: AsRef<Path>>(path: P, reason: impl Into<String>) -> Self {
        Self::ToolError {
            path: path.as_ref().to_owned(),
            reason: reason.into(),
        }
    }
}

/// Basename of a path as an owned string, the identity of a graph node
pub fn file_name_string<P: AsRef<Path>>(p: P) -> Option<String> {
    p.as_ref()
        .file_name()
        .and_then(|s| s.to_str())
        .map(|s| s.to_owned())
}

pub fn path_to_string<P: AsRef<Path>>(p: P) -> String {
    p.as_ref()
        .to_str()
        .map(|s| s.to_owned())
        .unwrap_or_else(|| format!("{:?}", p.as_ref()))
}

/// Human readable form of an optional lookup result
pub fn display_lookup(p: Option<&PathBuf>) -> String {
    p.map(path_to_string)
        .unwrap_or_else(|| "not found".to_owned())
}
