use crate::common::{file_name_string, GraphError};
use crate::graph::{Entry, ForwardGraph};
use crate::locate::{walk, Locator};
use crate::reader::DependencyReader;
use crate::scan::ScanQuery;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    /// claimed, dependencies still being collected
    InFlight,
    Done,
}

#[derive(Debug)]
struct Node {
    state: NodeState,
    entries: BTreeSet<Entry>,
}

/// Resolves the dependencies of binaries recursively, memoizing every analyzed file by name
///
/// A name that is already known (finished or still in flight) is never analyzed again, which also
/// breaks dependency cycles. Call [`GraphBuilder::finish`] to freeze the result.
pub struct GraphBuilder<'a> {
    locator: &'a Locator,
    reader: &'a dyn DependencyReader,
    // dependencies read ahead of time, None when the reader failed
    prefetched: HashMap<PathBuf, Option<Vec<String>>>,
    nodes: HashMap<String, Node>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(locator: &'a Locator, reader: &'a dyn DependencyReader) -> Self {
        Self {
            locator,
            reader,
            prefetched: HashMap::new(),
            nodes: HashMap::new(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Analyze the binary at `path` and return its flattened dependency entries
    ///
    /// Returns an empty list if the file name is already part of the graph, or if the file
    /// declares no dependencies that can be read (in which case it is not added to the graph).
    /// `parent` is the binary that required this one, if any.
    pub fn analyze(&mut self, path: &Path, parent: Option<&Path>) -> Vec<Entry> {
        let name = match file_name_string(path) {
            Some(n) => n,
            None => return Vec::new(),
        };

        if let Some(node) = self.nodes.get(&name) {
            if node.state == NodeState::InFlight {
                log::debug!(
                    "dependency cycle: {} reached again from {}",
                    name,
                    parent.map(|p| p.display().to_string()).unwrap_or_default()
                );
            }
            return Vec::new();
        }

        self.nodes.insert(
            name.clone(),
            Node {
                state: NodeState::InFlight,
                entries: BTreeSet::new(),
            },
        );

        let needed = match self.read_needed(path) {
            Some(needed) => needed,
            None => {
                self.nodes.remove(&name);
                return Vec::new();
            }
        };

        match parent {
            Some(parent) => log::trace!(
                "{} (needed by {}): {:?}",
                path.display(),
                parent.display(),
                needed
            ),
            None => log::trace!("{}: {:?}", path.display(), needed),
        }

        for dependency in needed {
            if let Some(known) = self.nodes.get(&dependency) {
                // already analyzed, or in flight (then its entries are partial)
                let mut entries: Vec<Entry> = Vec::with_capacity(known.entries.len() + 1);
                entries.push(Entry::Resolved(dependency.clone()));
                entries.extend(known.entries.iter().cloned());
                self.add_entries(&name, entries);
                continue;
            }

            match self.locator.resolve(&dependency, false) {
                Ok(Some(found)) => {
                    let found_name = file_name_string(&found).unwrap_or_else(|| dependency.clone());
                    self.add_entries(&name, Some(Entry::Resolved(found_name)));
                    let sub_entries = self.analyze(&found, Some(path));
                    self.add_entries(&name, sub_entries);
                }
                Ok(None) => self.add_entries(&name, Some(Entry::Missing(dependency))),
                Err(e) => {
                    log::warn!("lookup of {} failed: {}", dependency, e);
                    self.add_entries(&name, Some(Entry::Missing(dependency)));
                }
            }
        }

        match self.nodes.get_mut(&name) {
            Some(node) => {
                node.state = NodeState::Done;
                node.entries.iter().cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Freeze the graph; no more files can be analyzed afterwards
    pub fn finish(self) -> ForwardGraph {
        debug_assert!(self.nodes.values().all(|n| n.state == NodeState::Done));
        ForwardGraph::from_nodes(
            self.nodes
                .into_iter()
                .map(|(name, node)| (name, node.entries))
                .collect(),
        )
    }

    fn add_entries<I: IntoIterator<Item = Entry>>(&mut self, name: &str, entries: I) {
        if let Some(node) = self.nodes.get_mut(name) {
            node.entries.extend(entries);
        }
    }

    fn read_needed(&mut self, path: &Path) -> Option<Vec<String>> {
        if let Some(prefetched) = self.prefetched.remove(path) {
            return prefetched;
        }
        read_or_log(self.reader, path)
    }
}

fn read_or_log(reader: &dyn DependencyReader, path: &Path) -> Option<Vec<String>> {
    match reader.read_needed(path) {
        Ok(needed) => Some(needed),
        Err(e) => {
            log::debug!("no dependency information for {}: {}", path.display(), e);
            None
        }
    }
}

/// Read the dependencies of many files on `jobs` worker threads
///
/// Only the reading happens concurrently, the graph itself is built afterwards on a single thread.
fn prefetch(
    reader: &dyn DependencyReader,
    files: &[PathBuf],
    jobs: usize,
) -> HashMap<PathBuf, Option<Vec<String>>> {
    let (job_tx, job_rx) = crossbeam_channel::unbounded::<&Path>();
    let (result_tx, result_rx) = crossbeam_channel::unbounded();
    for f in files {
        let _ = job_tx.send(f.as_path());
    }
    drop(job_tx);

    let scoped = crossbeam::scope(|s| {
        for _ in 0..jobs {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            s.spawn(move |_| {
                for path in job_rx.iter() {
                    let _ = result_tx.send((path.to_owned(), read_or_log(reader, path)));
                }
            });
        }
    });
    drop(result_tx);
    if scoped.is_err() {
        log::warn!("a dependency reader thread panicked, affected files will be read again");
    }

    result_rx.iter().collect()
}

/// Builds the forward graph of every regular file beneath the root of a scan query
pub struct Runner<'a> {
    query: &'a ScanQuery,
    reader: &'a dyn DependencyReader,
    locator: Locator,
}

impl<'a> Runner<'a> {
    pub fn new(query: &'a ScanQuery, reader: &'a dyn DependencyReader) -> Self {
        Self {
            query,
            reader,
            locator: Locator::new(&query.target.root),
        }
    }

    /// Analyze every regular file under the root; symlinks are not used as starting points
    ///
    /// `progress` is called with (processed, total) after each file.
    pub fn run<F: FnMut(usize, usize)>(&self, mut progress: F) -> Result<ForwardGraph, GraphError> {
        let root = &self.query.target.root;
        log::info!("scanning {}", root.display());

        let mut files = Vec::new();
        for entry in walk(root) {
            match entry {
                Ok(e) if e.file_type().is_dir() => {}
                Ok(e) => files.push((e.path().to_owned(), e.file_type())),
                Err(e) => {
                    // the root itself must be readable
                    if e.depth() == 0 {
                        return Err(e.into());
                    }
                    log::debug!("skipping unreadable entry: {}", e);
                }
            }
        }
        let total = files.len();

        let mut builder = GraphBuilder::new(&self.locator, self.reader);

        let jobs = self.query.parameters.jobs;
        if jobs > 1 {
            let regular: Vec<PathBuf> = files
                .iter()
                .filter(|(_, t)| t.is_file())
                .map(|(p, _)| p.clone())
                .collect();
            log::info!(
                "reading dependencies of {} files on {} threads",
                regular.len(),
                jobs
            );
            builder.prefetched = prefetch(self.reader, &regular, jobs);
        }

        for (i, (path, file_type)) in files.iter().enumerate() {
            if file_type.is_symlink() {
                log::trace!("link {} skipped", path.display());
            } else if file_type.is_file() {
                builder.analyze(path, None);
            } else {
                log::debug!("Skipping {}", path.display());
            }
            progress(i + 1, total);
        }

        let graph = builder.finish();
        log::info!("{} files analyzed, {} in the graph", total, graph.len());
        Ok(graph)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::graph::ReverseGraph;
    use fs_err as fs;

    /// Reads dependencies from a table keyed by file name; unknown names are "not ELF"
    pub(crate) struct ScriptedReader(pub HashMap<String, Vec<String>>);

    impl ScriptedReader {
        pub(crate) fn new(table: &[(&str, &[&str])]) -> Self {
            Self(
                table
                    .iter()
                    .map(|(n, deps)| (n.to_string(), deps.iter().map(|d| d.to_string()).collect()))
                    .collect(),
            )
        }
    }

    impl DependencyReader for ScriptedReader {
        fn read_needed(&self, path: &Path) -> Result<Vec<String>, GraphError> {
            if !path.exists() {
                return Err(GraphError::tool(path, "no such file"));
            }
            let name = file_name_string(path).unwrap_or_default();
            self.0
                .get(&name)
                .cloned()
                .ok_or_else(|| GraphError::tool(path, "not an ELF file"))
        }
    }

    pub(crate) fn touch(p: &Path) -> Result<(), GraphError> {
        if let Some(parent) = p.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(p, b"\x7fELF")?;
        Ok(())
    }

    pub(crate) fn build(
        root: &Path,
        reader: &ScriptedReader,
        jobs: usize,
    ) -> Result<ForwardGraph, GraphError> {
        let mut query = ScanQuery::from_root(root)?;
        query.parameters.jobs = jobs;
        Runner::new(&query, reader).run(|_, _| {})
    }

    fn r(n: &str) -> Entry {
        Entry::Resolved(n.to_owned())
    }

    fn m(n: &str) -> Entry {
        Entry::Missing(n.to_owned())
    }

    fn entries(g: &ForwardGraph, name: &str) -> Vec<Entry> {
        g.get(name).map(|e| e.iter().cloned().collect()).unwrap_or_default()
    }

    /// app -> libA.so -> libB.so, libC.so unused
    pub(crate) fn scenario(root: &Path) -> Result<ScriptedReader, GraphError> {
        for f in ["bin/app", "lib/libA.so", "lib/libB.so", "lib/libC.so"] {
            touch(&root.join(f))?;
        }
        Ok(ScriptedReader::new(&[
            ("app", &["libA.so"]),
            ("libA.so", &["libB.so"]),
            ("libB.so", &[]),
            ("libC.so", &[]),
        ]))
    }

    #[test]
    fn build_scenario() -> Result<(), GraphError> {
        let dir = tempfile::tempdir()?;
        let reader = scenario(dir.path())?;
        let g = build(dir.path(), &reader, 1)?;

        assert_eq!(g.len(), 4);
        assert_eq!(entries(&g, "app"), vec![r("libA.so"), r("libB.so")]);
        assert_eq!(entries(&g, "libA.so"), vec![r("libB.so")]);
        assert!(entries(&g, "libB.so").is_empty());
        assert!(entries(&g, "libC.so").is_empty());
        Ok(())
    }

    #[test]
    fn missing_dependency() -> Result<(), GraphError> {
        let dir = tempfile::tempdir()?;
        touch(&dir.path().join("app"))?;
        touch(&dir.path().join("tool"))?;
        let reader = ScriptedReader::new(&[
            ("app", &["libMissing.so", "libMissing.so"]),
            ("tool", &["libMissing.so"]),
        ]);
        let g = build(dir.path(), &reader, 1)?;

        assert_eq!(entries(&g, "app"), vec![m("libMissing.so")]);
        assert_eq!(entries(&g, "tool"), vec![m("libMissing.so")]);
        assert!(!g.contains("libMissing.so"));
        let reverse = ReverseGraph::from_forward(&g);
        assert!(reverse.iter().all(|(_, deps)| !deps.contains("libMissing.so")));
        Ok(())
    }

    #[test]
    fn cycle_terminates() -> Result<(), GraphError> {
        let dir = tempfile::tempdir()?;
        touch(&dir.path().join("libA.so"))?;
        touch(&dir.path().join("libB.so"))?;
        let reader = ScriptedReader::new(&[("libA.so", &["libB.so"]), ("libB.so", &["libA.so"])]);
        let g = build(dir.path(), &reader, 1)?;

        assert!(g.contains("libA.so"));
        assert!(g.contains("libB.so"));
        assert!(entries(&g, "libA.so").contains(&r("libB.so")));
        assert!(entries(&g, "libB.so").contains(&r("libA.so")));
        Ok(())
    }

    #[test]
    fn entries_are_deduplicated() -> Result<(), GraphError> {
        let dir = tempfile::tempdir()?;
        for f in ["app", "libA.so", "libB.so", "libC.so"] {
            touch(&dir.path().join(f))?;
        }
        let reader = ScriptedReader::new(&[
            ("app", &["libA.so", "libB.so", "libC.so", "libA.so"]),
            ("libA.so", &["libC.so"]),
            ("libB.so", &["libC.so"]),
            ("libC.so", &[]),
        ]);
        let g = build(dir.path(), &reader, 1)?;
        assert_eq!(
            entries(&g, "app"),
            vec![r("libA.so"), r("libB.so"), r("libC.so")]
        );
        Ok(())
    }

    #[test]
    fn non_elf_files_are_not_nodes() -> Result<(), GraphError> {
        let dir = tempfile::tempdir()?;
        touch(&dir.path().join("README"))?;
        touch(&dir.path().join("app"))?;
        // libc.so is a linker script: found, but without dependency information
        touch(&dir.path().join("libc.so"))?;
        let reader = ScriptedReader::new(&[("app", &["libc.so"])]);
        let g = build(dir.path(), &reader, 1)?;

        assert_eq!(g.len(), 1);
        assert_eq!(entries(&g, "app"), vec![r("libc.so")]);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_resolved_not_analyzed() -> Result<(), GraphError> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        touch(&root.join("bin/app"))?;
        touch(&root.join("lib/libfoo.so.1.2"))?;
        std::os::unix::fs::symlink("libfoo.so.1.2", root.join("lib/libfoo.so.1"))?;
        let reader = ScriptedReader::new(&[
            ("app", &["libfoo.so.1"]),
            ("libfoo.so.1.2", &[]),
            ("libfoo.so.1", &["never-read"]),
        ]);
        let g = build(root, &reader, 1)?;

        assert_eq!(entries(&g, "app"), vec![r("libfoo.so.1.2")]);
        assert!(g.contains("libfoo.so.1.2"));
        assert!(!g.contains("libfoo.so.1"));
        Ok(())
    }

    #[test]
    fn parallel_read_gives_same_graph() -> Result<(), GraphError> {
        let dir = tempfile::tempdir()?;
        let reader = scenario(dir.path())?;
        touch(&dir.path().join("bin/tool"))?;
        let mut table = reader.0;
        table.insert(
            "tool".to_owned(),
            vec!["libC.so".to_owned(), "libX.so".to_owned()],
        );
        let reader = ScriptedReader(table);

        let sequential = build(dir.path(), &reader, 1)?;
        let parallel = build(dir.path(), &reader, 4)?;
        assert_eq!(sequential, parallel);
        Ok(())
    }

    #[test]
    fn progress_reports_every_file() -> Result<(), GraphError> {
        let dir = tempfile::tempdir()?;
        let reader = scenario(dir.path())?;
        touch(&dir.path().join("notes.txt"))?;
        let query = ScanQuery::from_root(dir.path())?;

        let mut seen = Vec::new();
        Runner::new(&query, &reader).run(|done, total| seen.push((done, total)))?;
        assert_eq!(seen, (1..=5).map(|i| (i, 5)).collect::<Vec<_>>());
        Ok(())
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn scan_real_binary() -> Result<(), GraphError> {
        use crate::reader::ElfReader;

        let dir = tempfile::tempdir()?;
        let app = dir.path().join("bin/app");
        fs::create_dir_all(dir.path().join("bin"))?;
        fs::copy(std::env::current_exe()?, &app)?;
        fs::write(dir.path().join("README"), "not a binary")?;

        let query = ScanQuery::from_root(dir.path())?;
        let g = Runner::new(&query, &ElfReader).run(|_, _| {})?;

        assert_eq!(g.names().collect::<Vec<_>>(), vec!["app"]);
        let app_entries = entries(&g, "app");
        assert!(app_entries.contains(&m("libc.so.6")), "{:?}", app_entries);
        // nothing else is in the tree, so every dependency is missing
        assert!(app_entries.iter().all(Entry::is_missing));
        Ok(())
    }

    #[test]
    fn builder_memoizes() -> Result<(), GraphError> {
        let dir = tempfile::tempdir()?;
        let reader = scenario(dir.path())?;
        let locator = Locator::new(dir.path());
        let mut builder = GraphBuilder::new(&locator, &reader);

        let first = builder.analyze(&dir.path().join("bin/app"), None);
        assert_eq!(first, vec![r("libA.so"), r("libB.so")]);
        assert!(builder.contains("libA.so"));
        // known names are not analyzed again
        assert!(builder
            .analyze(&dir.path().join("lib/libA.so"), None)
            .is_empty());
        let g = builder.finish();
        assert_eq!(g.len(), 3);
        Ok(())
    }
}
