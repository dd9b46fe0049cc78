//! Extraction of the declared runtime dependencies (DT_NEEDED) of a binary

use crate::common::GraphError;
use fs_err as fs;
use regex::Regex;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

/// Anything able to list the shared libraries a binary declares as needed
///
/// An error means the file contributes no graph data (not an ELF file, unreadable, tool failure)
pub trait DependencyReader: Send + Sync {
    fn read_needed(&self, path: &Path) -> Result<Vec<String>, GraphError>;
}

/// Runs `readelf -d` on the file and parses the NEEDED lines of its output
pub struct Readelf {
    program: PathBuf,
    timeout: Duration,
    needed_re: Regex,
}

impl Readelf {
    pub fn new(timeout: Duration) -> Result<Self, GraphError> {
        Self::with_program("readelf", timeout)
    }

    /// Use a specific `readelf` executable (e.g. a cross toolchain one)
    pub fn with_program<P: AsRef<Path>>(program: P, timeout: Duration) -> Result<Self, GraphError> {
        Ok(Self {
            program: program.as_ref().to_owned(),
            timeout,
            needed_re: Regex::new(r"\(NEEDED\)\s+[A-Za-z\s]+: \[(.+)\]")?,
        })
    }

    /// Names of the needed libraries, one per matching line, in order of appearance
    pub fn parse_output(&self, output: &str) -> Vec<String> {
        self.needed_re
            .captures_iter(output)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_owned())
            .collect()
    }

    fn run(&self, path: &Path) -> Result<String, GraphError> {
        let mut child = Command::new(&self.program)
            .arg("-d")
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                GraphError::tool(path, format!("could not run {:?}: {}", self.program, e))
            })?;

        // drain both pipes on their own threads, so that a chatty child never blocks on a full pipe
        let (tx, rx) = crossbeam_channel::bounded(2);
        if let Some(stdout) = child.stdout.take() {
            drain(stdout, Stream::Out, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            drain(stderr, Stream::Err, tx.clone());
        }
        drop(tx);

        let deadline = Instant::now() + self.timeout;
        let mut stdout = String::new();
        let mut stderr = String::new();
        loop {
            match rx.recv_deadline(deadline) {
                Ok((Stream::Out, s)) => stdout = s,
                Ok((Stream::Err, s)) => stderr = s,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    return Err(self.kill_timed_out(&mut child, path));
                }
            }
        }

        // the pipes may be closed while the child keeps running
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                return Err(self.kill_timed_out(&mut child, path));
            }
            std::thread::sleep(EXIT_POLL_INTERVAL);
        };
        if !status.success() {
            return Err(GraphError::tool(
                path,
                format!("{} ({})", stderr.trim(), status),
            ));
        }
        Ok(stdout)
    }

    fn kill_timed_out(&self, child: &mut Child, path: &Path) -> GraphError {
        let _ = child.kill();
        let _ = child.wait();
        GraphError::tool(path, format!("timed out after {:?}", self.timeout))
    }
}

impl DependencyReader for Readelf {
    fn read_needed(&self, path: &Path) -> Result<Vec<String>, GraphError> {
        let output = self.run(path)?;
        Ok(self.parse_output(&output))
    }
}

#[derive(Clone, Copy)]
enum Stream {
    Out,
    Err,
}

fn drain<R: Read + Send + 'static>(
    mut reader: R,
    stream: Stream,
    tx: crossbeam_channel::Sender<(Stream, String)>,
) {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        let _ = tx.send((stream, String::from_utf8_lossy(&buf).into_owned()));
    });
}

/// Reads the dynamic section in-process, no external tool needed
///
/// Only files starting with the ELF magic are loaded; anything else is rejected after 4 bytes.
pub struct ElfReader;

impl DependencyReader for ElfReader {
    fn read_needed(&self, path: &Path) -> Result<Vec<String>, GraphError> {
        let mut magic = Vec::with_capacity(ELF_MAGIC.len());
        fs::File::open(path)?
            .take(ELF_MAGIC.len() as u64)
            .read_to_end(&mut magic)?;
        if magic != ELF_MAGIC {
            return Err(GraphError::NotElf(path.to_owned()));
        }

        let content = fs::read(path)?;
        let elf = goblin::elf::Elf::parse(&content)?;
        Ok(elf.libraries.iter().map(|l| l.to_string()).collect())
    }
}
