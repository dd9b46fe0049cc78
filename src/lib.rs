extern crate thiserror;

pub mod common;
pub mod graph;
pub mod links;
pub mod locate;
pub mod persist;
pub mod queries;
pub mod reader;
pub mod runner;
pub mod scan;

pub use common::{display_lookup, path_to_string, GraphError};
pub use graph::{Entry, ForwardGraph, ReverseGraph};
pub use locate::Locator;
pub use queries::GraphQueries;
pub use scan::{ReaderKind, ScanQuery};

/// Scan the root of `query` and build its forward dependency graph
///
/// `progress` is called with (processed, total) after each file of the tree.
pub fn build_graph<F: FnMut(usize, usize)>(
    query: &ScanQuery,
    progress: F,
) -> Result<ForwardGraph, GraphError> {
    let reader = query.reader()?;
    let runner = runner::Runner::new(query, reader.as_ref());
    runner.run(progress)
}
