//! Data structures that must be filled with the input and the parameters for a tree scan

use crate::common::GraphError;
use crate::reader::{DependencyReader, ElfReader, Readelf};
use fs_err as fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default bound on a single `readelf` invocation
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// How the declared dependencies of a binary are extracted
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReaderKind {
    /// Run `readelf -d` and parse its textual output
    Readelf,
    /// Parse the ELF dynamic section in-process
    Elf,
}

#[derive(Clone, Debug)]
pub struct ScanTarget {
    /// Directory whose files are analyzed and where dependencies are looked up
    pub root: PathBuf,
}

#[derive(Clone, Debug)]
pub struct ScanParameters {
    /// Dependency extraction backend
    pub reader: ReaderKind,
    /// Number of files whose dependencies are read concurrently before the graph is built
    pub jobs: usize,
    /// Upper bound for each external tool invocation
    pub tool_timeout: Duration,
}

/// Everything needed to run a scan: what to scan and how
#[derive(Clone, Debug)]
pub struct ScanQuery {
    pub target: ScanTarget,
    pub parameters: ScanParameters,
}

impl ScanQuery {
    /// Scan the given root with sensible defaults: `readelf`, sequential, 30 s timeout
    pub fn from_root<P: AsRef<Path>>(root: P) -> Result<Self, GraphError> {
        let root = root.as_ref();
        if !fs::metadata(root)?.is_dir() {
            return Err(GraphError::IOError(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            )));
        }
        Ok(Self {
            target: ScanTarget {
                root: root.to_owned(),
            },
            parameters: ScanParameters {
                reader: ReaderKind::Readelf,
                jobs: 1,
                tool_timeout: DEFAULT_TOOL_TIMEOUT,
            },
        })
    }

    /// Instantiate the dependency reader selected by the parameters
    pub fn reader(&self) -> Result<Box<dyn DependencyReader>, GraphError> {
        Ok(match self.parameters.reader {
            ReaderKind::Readelf => Box::new(Readelf::new(self.parameters.tool_timeout)?),
            ReaderKind::Elf => Box::new(ElfReader),
        })
    }
}
