extern crate ldtree;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::{ArgAction, ArgGroup, CommandFactory, Parser, ValueEnum};
use fs_err as fs;
use indicatif::{ProgressBar, ProgressStyle};
use ldtree::links::{LinkReconciler, PromptConfirm};
use ldtree::scan::DEFAULT_TOOL_TIMEOUT;
use ldtree::{
    display_lookup, path_to_string, persist, ForwardGraph, GraphError, GraphQueries, Locator,
    ReaderKind, ReverseGraph, ScanQuery,
};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ReaderArg {
    /// run `readelf -d` on every file
    Readelf,
    /// parse ELF files in-process
    Elf,
}

impl From<ReaderArg> for ReaderKind {
    fn from(r: ReaderArg) -> Self {
        match r {
            ReaderArg::Readelf => ReaderKind::Readelf,
            ReaderArg::Elf => ReaderKind::Elf,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "ldtree", version, about = "Shared library dependency graph of a directory tree")]
#[command(group(
    ArgGroup::new("mode").args(["unused", "missing", "search", "consumers", "links"])
))]
struct Cli {
    /// Directory to scan, and where libraries are looked up
    #[arg(short = 'd', long = "dir", value_name = "DIR", default_value = ".")]
    dir: PathBuf,

    /// Load the graph from a snapshot instead of scanning
    #[arg(short = 'i', long = "input", value_name = "SNAPSHOT")]
    input: Option<PathBuf>,

    /// Scan, save the graph to a snapshot and exit
    #[arg(
        short = 'p',
        long = "persist",
        value_name = "SNAPSHOT",
        conflicts_with_all = ["input", "mode"]
    )]
    persist: Option<PathBuf>,

    /// Also write the results, one per line, to this file
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<PathBuf>,

    /// Verbosity level (repeat for more)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// How the dependencies of a binary are read
    #[arg(long, value_enum, default_value_t = ReaderArg::Readelf)]
    reader: ReaderArg,

    /// Number of files whose dependencies are read concurrently
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    jobs: u16,

    /// Timeout for a single readelf invocation
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_TOOL_TIMEOUT.as_secs(),
          value_parser = clap::value_parser!(u64).range(1..))]
    tool_timeout: u64,

    /// Print the results as JSON
    #[arg(long)]
    json: bool,

    /// Print the shared libraries nobody depends on
    #[arg(short = 'n', long = "unused")]
    unused: bool,

    /// Print the dependencies that could not be found
    #[arg(short = 'm', long = "missing")]
    missing: bool,

    /// Print the libraries whose name contains SUBSTRING
    #[arg(short = 's', long = "search", value_name = "SUBSTRING")]
    search: Option<String>,

    /// Print the binaries that need LIBRARY
    #[arg(short = 'c', long = "consumers", value_name = "LIBRARY")]
    consumers: Option<String>,

    /// Create the missing unversioned symlinks of versioned libraries (experimental, asks first)
    #[arg(short = 'l', long = "links")]
    links: bool,
}

enum Mode {
    Unused,
    Missing,
    Search(String),
    Consumers(String),
    Links,
}

impl Cli {
    fn mode(&self) -> Option<Mode> {
        if self.unused {
            Some(Mode::Unused)
        } else if self.missing {
            Some(Mode::Missing)
        } else if let Some(s) = &self.search {
            Some(Mode::Search(s.clone()))
        } else if let Some(c) = &self.consumers {
            Some(Mode::Consumers(c.clone()))
        } else if self.links {
            Some(Mode::Links)
        } else {
            None
        }
    }
}

/// Optional copy of the list results, one line each
struct ListOutput {
    file: Option<BufWriter<fs::File>>,
}

impl ListOutput {
    fn open(path: Option<&PathBuf>) -> anyhow::Result<Self> {
        let file = match path {
            Some(p) => Some(BufWriter::new(
                fs::File::create(p).context(format!("couldn't create {}", p.display()))?,
            )),
            None => None,
        };
        Ok(Self { file })
    }

    fn line(&mut self, s: &str) -> anyhow::Result<()> {
        if let Some(f) = &mut self.file {
            writeln!(f, "{}", s).context("couldn't write the output file")?;
        }
        Ok(())
    }

    fn finish(self) -> anyhow::Result<()> {
        if let Some(mut f) = self.file {
            f.flush().context("couldn't write the output file")?;
        }
        Ok(())
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn scan(cli: &Cli) -> anyhow::Result<ForwardGraph> {
    let mut query = ScanQuery::from_root(&cli.dir)
        .context(format!("cannot scan {}", cli.dir.display()))?;
    query.parameters.reader = cli.reader.into();
    query.parameters.jobs = cli.jobs as usize;
    query.parameters.tool_timeout = Duration::from_secs(cli.tool_timeout);

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} files")
            .context("invalid progress bar template")?
            .progress_chars("#>-"),
    );
    let graph = ldtree::build_graph(&query, |done, total| {
        bar.set_length(total as u64);
        bar.set_position(done as u64);
    })?;
    bar.finish_and_clear();
    Ok(graph)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let js = serde_json::to_string_pretty(value).context("Error serializing")?;
    println!("{}", js);
    Ok(())
}

fn run_mode(
    cli: &Cli,
    mode: Mode,
    forward: &ForwardGraph,
    out: &mut ListOutput,
) -> anyhow::Result<()> {
    let reverse = ReverseGraph::from_forward(forward);
    let locator = Locator::new(&cli.dir);
    let queries = GraphQueries::new(forward, &reverse, &locator)?;

    match mode {
        Mode::Unused => {
            let unused = queries.unused()?;
            if cli.json {
                print_json(&unused)?;
            } else {
                println!("Shared libraries nobody uses:");
            }
            for u in &unused {
                let line = match &u.path {
                    Some(p) => path_to_string(p),
                    None => format!("{} not found!", u.name),
                };
                if !cli.json {
                    println!("{}", line);
                }
                out.line(&line)?;
            }
        }
        Mode::Missing => {
            let missing = queries.missing();
            if cli.json {
                print_json(&missing)?;
            }
            for m in &missing {
                let line = format!("{} {}", m.owner, m.dependency);
                if !cli.json {
                    println!("{}", line);
                }
                out.line(&line)?;
            }
        }
        Mode::Search(substring) => {
            let hits = queries.search(&substring)?;
            if cli.json {
                print_json(&hits)?;
            }
            for h in &hits {
                let location = display_lookup(h.path.as_ref());
                if !cli.json {
                    println!("{}", "#".repeat(67));
                    println!(
                        "{} {}",
                        location,
                        if h.is_link { "is a link" } else { "is not a link" }
                    );
                    println!("{} is used by: {}", h.name, h.dependents.join(", "));
                    let uses: Vec<String> = h.dependencies.iter().map(|e| e.to_string()).collect();
                    println!("{} uses: {}", h.name, uses.join(", "));
                }
                out.line(&h.path.as_ref().map(path_to_string).unwrap_or_else(|| h.name.clone()))?;
            }
        }
        Mode::Consumers(name) => match queries.consumers_of(&name) {
            Ok(consumers) => {
                if cli.json {
                    print_json(&consumers)?;
                } else {
                    println!(
                        "Binaries using {}:",
                        display_lookup(consumers.path.as_ref())
                    );
                }
                for d in &consumers.dependents {
                    let line = d.path.as_ref().map(path_to_string).unwrap_or_else(|| d.name.clone());
                    if !cli.json {
                        println!("   {}", line);
                    }
                    out.line(&line)?;
                }
            }
            Err(GraphError::NotInGraph(_)) => {
                if cli.json {
                    println!("null");
                } else {
                    println!("{} not found", name);
                }
            }
            Err(e) => return Err(e.into()),
        },
        Mode::Links => {
            let stdin = std::io::stdin();
            let mut confirm = PromptConfirm::new(stdin.lock(), std::io::stdout());
            let report = LinkReconciler::new(forward, &locator)?.run(&mut confirm)?;
            if cli.json {
                print_json(&report)?;
            } else {
                println!(
                    "{} links created, {} declined, {} already present",
                    report.created.len(),
                    report.declined.len(),
                    report.already_linked.len()
                );
                for name in &report.unlocated {
                    println!("{} not found!", name);
                }
            }
            for link in &report.created {
                out.line(&path_to_string(link))?;
            }
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mode = cli.mode();
    if mode.is_none() && cli.persist.is_none() {
        Cli::command()
            .error(
                ErrorKind::MissingRequiredArgument,
                "one of --unused, --missing, --search, --consumers, --links or --persist is required",
            )
            .exit();
    }

    init_logging(cli.verbose);

    let pending_snapshot = cli.persist.as_ref().map(persist::partial_path);
    ctrlc::set_handler(move || {
        if let Some(partial) = &pending_snapshot {
            let _ = fs::remove_file(partial);
        }
        eprintln!("Interrupted, nothing saved.");
        std::process::exit(130);
    })
    .context("cannot install the interrupt handler")?;

    let forward = match &cli.input {
        Some(snapshot) => persist::load(snapshot)
            .context(format!("cannot load snapshot {}", snapshot.display()))?,
        None => scan(&cli)?,
    };

    if let Some(snapshot) = &cli.persist {
        persist::save(&forward, snapshot)
            .context(format!("cannot save snapshot {}", snapshot.display()))?;
        log::info!("{} libraries saved to {}", forward.len(), snapshot.display());
        return Ok(());
    }

    let mut out = ListOutput::open(cli.output.as_ref())?;
    if let Some(mode) = mode {
        run_mode(&cli, mode, &forward, &mut out)?;
    }
    out.finish()
}
