//! Versioned JSON snapshot of a forward graph, to query a tree without scanning it again

use crate::common::GraphError;
use crate::graph::{Entry, ForwardGraph};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const FORMAT: &str = "ldtree-graph";
const VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    format: String,
    version: u32,
    libraries: Vec<LibraryRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LibraryRecord {
    name: String,
    entries: Vec<Entry>,
}

pub fn to_writer<W: Write>(graph: &ForwardGraph, writer: W) -> Result<(), GraphError> {
    let snapshot = Snapshot {
        format: FORMAT.to_owned(),
        version: VERSION,
        libraries: graph
            .iter()
            .map(|(name, entries)| LibraryRecord {
                name: name.clone(),
                entries: entries.iter().cloned().collect(),
            })
            .collect(),
    };
    serde_json::to_writer_pretty(writer, &snapshot)?;
    Ok(())
}

pub fn from_str(content: &str) -> Result<ForwardGraph, GraphError> {
    let snapshot: Snapshot = serde_json::from_str(content)?;
    from_snapshot(snapshot)
}

/// Where [`save`] writes the snapshot before moving it to `path`
pub fn partial_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let mut partial = path.as_ref().as_os_str().to_owned();
    partial.push(".partial");
    PathBuf::from(partial)
}

/// Write the graph to a snapshot file, replacing it if present
///
/// The snapshot is written to [`partial_path`] first and renamed into place, so a failed save
/// never leaves a truncated snapshot behind; the partial file is removed on failure.
pub fn save<P: AsRef<Path>>(graph: &ForwardGraph, path: P) -> Result<(), GraphError> {
    let path = path.as_ref();
    let partial = partial_path(path);

    let written = write_file(graph, &partial).and_then(|_| {
        fs::rename(&partial, path)?;
        Ok(())
    });
    if written.is_err() {
        let _ = fs::remove_file(&partial);
    }
    written
}

fn write_file(graph: &ForwardGraph, path: &Path) -> Result<(), GraphError> {
    let mut writer = BufWriter::new(fs::File::create(path)?);
    to_writer(graph, &mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Read a graph written by [`save`]
pub fn load<P: AsRef<Path>>(path: P) -> Result<ForwardGraph, GraphError> {
    let reader = BufReader::new(fs::File::open(path.as_ref())?);
    let snapshot: Snapshot = serde_json::from_reader(reader)?;
    from_snapshot(snapshot)
}

fn from_snapshot(snapshot: Snapshot) -> Result<ForwardGraph, GraphError> {
    if snapshot.format != FORMAT {
        return Err(GraphError::SnapshotError(format!(
            "not a dependency graph snapshot (format {:?})",
            snapshot.format
        )));
    }
    if snapshot.version != VERSION {
        return Err(GraphError::SnapshotError(format!(
            "unsupported snapshot version {} (expected {})",
            snapshot.version, VERSION
        )));
    }

    let mut graph = std::collections::BTreeMap::new();
    for record in snapshot.libraries {
        let entries: BTreeSet<Entry> = record.entries.into_iter().collect();
        if graph.insert(record.name.clone(), entries).is_some() {
            return Err(GraphError::SnapshotError(format!(
                "library {} appears twice",
                record.name
            )));
        }
    }
    Ok(ForwardGraph::from_nodes(graph))
}
