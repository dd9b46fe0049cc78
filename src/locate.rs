//! Lookup of libraries by file name within the scanned tree

use crate::common::{file_name_string, GraphError};
use fs_err as fs;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Canonical traversal of a tree: within each directory, entries that are not directories come
/// first, then subdirectories; both groups ordered by file name. Symlinks are not followed.
pub(crate) fn walk<P: AsRef<Path>>(root: P) -> WalkDir {
    WalkDir::new(root).min_depth(1).sort_by(|a, b| {
        a.file_type()
            .is_dir()
            .cmp(&b.file_type().is_dir())
            .then_with(|| a.file_name().cmp(b.file_name()))
    })
}

pub fn is_symlink<P: AsRef<Path>>(p: P) -> bool {
    fs::symlink_metadata(p.as_ref())
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// Resolves library names to files under a root directory
///
/// Names are matched exactly against basenames; when several files share a basename the first one
/// in the canonical traversal order wins. The tree is scanned once, on the first lookup.
pub struct Locator {
    root: PathBuf,
    index: RefCell<Option<HashMap<String, PathBuf>>>,
}

impl Locator {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_owned(),
            index: RefCell::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find the file called `name`
    ///
    /// If the match is a symlink and `follow_link_target` is false, the result is the link target,
    /// joined to the directory of the link (a single hop, the target is not required to exist).
    /// If `follow_link_target` is true the link itself is returned.
    pub fn resolve(
        &self,
        name: &str,
        follow_link_target: bool,
    ) -> Result<Option<PathBuf>, GraphError> {
        let found = match self.lookup(name)? {
            Some(p) => p,
            None => return Ok(None),
        };

        if !follow_link_target && is_symlink(&found) {
            let target = fs::read_link(&found)?;
            let link_dir = found.parent().unwrap_or(&self.root);
            log::trace!("{} -> {}", found.display(), target.display());
            return Ok(Some(link_dir.join(target)));
        }

        Ok(Some(found))
    }

    fn lookup(&self, name: &str) -> Result<Option<PathBuf>, GraphError> {
        if self.index.borrow().is_none() {
            let index = self.scan()?;
            *self.index.borrow_mut() = Some(index);
        }
        Ok(self
            .index
            .borrow()
            .as_ref()
            .and_then(|idx| idx.get(name).cloned()))
    }

    fn scan(&self) -> Result<HashMap<String, PathBuf>, GraphError> {
        log::debug!("indexing {}", self.root.display());
        // a missing root is an error, unreadable subdirectories are not
        fs::metadata(&self.root)?;

        let mut index = HashMap::new();
        for entry in walk(&self.root) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    log::debug!("skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                continue;
            }
            if let Some(name) = file_name_string(entry.path()) {
                index.entry(name).or_insert_with(|| entry.into_path());
            }
        }
        Ok(index)
    }
}
