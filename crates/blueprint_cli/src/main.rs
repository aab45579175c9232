//! Blueprint CLI
//!
//! Load, run, step and resave blueprint graphs from the shell.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{Context as _, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use blueprint_runtime::{Bp, ContextMonitor, EngineConfig, EventMonitor, NodeRegistry, PinExRegistry};
use blueprint_types::{IdType, NodeType, StepResult};

const DEFAULT_CONFIG: &str = "blueprint.toml";

/// Blueprint graph runner
#[derive(Parser, Debug)]
#[command(name = "blueprint")]
#[command(about = "Run and inspect blueprint graphs", long_about = None)]
struct Args {
    /// Engine config file (defaults to ./blueprint.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory to load node plugins from (overrides the config)
    #[arg(long, global = true)]
    plugins: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a graph from its entry point
    Run {
        /// Graph document
        file: PathBuf,

        /// Node to start from (defaults to the first entry point)
        #[arg(long)]
        entry: Option<IdType>,

        /// Execute on the background stepping thread
        #[arg(long, conflicts_with = "step")]
        threaded: bool,

        /// Step node by node, printing every execution event as JSON
        #[arg(long)]
        step: bool,
    },

    /// List the nodes of a graph
    Inspect {
        /// Graph document
        file: PathBuf,
    },

    /// Load a graph and write it back out
    Resave {
        /// Graph document to read
        input: PathBuf,
        /// Where to write the result
        output: PathBuf,
    },

    /// List the registered node types
    Types,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    Blocking,
    Threaded,
    Step,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    let json = config.log.json;
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter)))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .init();

    let registry = build_registry(&config, args.plugins.as_deref())?;
    let bp = Bp::from_config(&config, Arc::new(registry), Arc::new(PinExRegistry::new()));

    match args.command {
        Command::Run {
            file,
            entry,
            threaded,
            step,
        } => {
            let mode = match (threaded, step) {
                (_, true) => RunMode::Step,
                (true, false) => RunMode::Threaded,
                (false, false) => RunMode::Blocking,
            };
            let result = run_graph(&bp, &file, entry, mode)?;
            let steps = bp.context().step_count();
            if result == StepResult::Error {
                bail!("execution of {} failed after {} steps", file.display(), steps);
            }
            info!(steps, result = ?result, "finished");
        }
        Command::Inspect { file } => {
            load_graph(&bp, &file)?;
            print!("{}", describe(&bp));
        }
        Command::Resave { input, output } => {
            load_graph(&bp, &input)?;
            bp.save_file(&output)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            info!(input = %input.display(), output = %output.display(), "graph resaved");
        }
        Command::Types => {
            print!("{}", describe_types(bp.registry()));
        }
    }
    Ok(())
}

/// Explicit config file, else `./blueprint.toml` when present, else defaults
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let path = match path {
        Some(path) => path,
        None if Path::new(DEFAULT_CONFIG).exists() => Path::new(DEFAULT_CONFIG),
        None => return Ok(EngineConfig::default()),
    };
    EngineConfig::load(path).with_context(|| format!("Failed to load config {}", path.display()))
}

/// Built-in node types plus every plugin in the configured directory
fn build_registry(config: &EngineConfig, plugins: Option<&Path>) -> Result<NodeRegistry> {
    let mut registry = NodeRegistry::with_builtins();
    if let Some(dir) = plugins.or(config.plugins.directory.as_deref()) {
        let loaded = registry
            .load_plugins_from_dir(dir)
            .with_context(|| format!("Failed to load plugins from {}", dir.display()))?;
        info!(loaded, dir = %dir.display(), "plugins loaded");
    }
    Ok(registry)
}

fn load_graph(bp: &Bp, file: &Path) -> Result<()> {
    bp.load_file(file)
        .with_context(|| format!("Failed to load {}", file.display()))
}

fn run_graph(bp: &Bp, file: &Path, entry: Option<IdType>, mode: RunMode) -> Result<StepResult> {
    load_graph(bp, file)?;
    let entry = match entry {
        Some(id) => id,
        None => bp
            .find_entry_point()
            .with_context(|| format!("{} has no entry point node", file.display()))?,
    };

    let result = match mode {
        RunMode::Blocking => bp.run(entry),
        RunMode::Threaded => {
            if bp.execute(entry) != StepResult::Error {
                while bp.context().is_executing() {
                    // Nobody is attached to step past break points
                    if bp.context().is_paused() {
                        info!(node_id = bp.context().current_node(), "break point reached; continuing");
                        bp.context().take_pause_event();
                        bp.resume();
                    }
                    thread::sleep(std::time::Duration::from_millis(5));
                }
            }
            bp.stop();
            bp.context().last_result()
        }
        RunMode::Step => {
            let monitor = Arc::new(EventMonitor::new());
            monitor.events.subscribe(|event| match serde_json::to_string(event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!(error = %e, "failed to encode event"),
            });
            let monitor: Arc<dyn ContextMonitor> = monitor;
            bp.context().set_monitor(Some(monitor));

            let mut result = bp.start(entry);
            while !result.is_terminal() {
                result = bp.context().step();
            }
            bp.context().set_monitor(None);
            result
        }
    };
    Ok(result)
}

/// One line per node: id, type, name, pin counts and group
fn describe(bp: &Bp) -> String {
    bp.with_graph(|graph| {
        let mut out = String::new();
        let _ = writeln!(out, "{} nodes, {} pins", graph.node_count(), graph.pins.len());
        for node in graph.nodes() {
            let base = node.base();
            let info = node.type_info();
            let _ = write!(
                out,
                "{:>6}  {:<16} {:<20} in={} out={}",
                base.id,
                info.name,
                base.name,
                base.inputs().len(),
                base.outputs().len()
            );
            if base.group_id != 0 {
                let _ = write!(out, " group={}", base.group_id);
            }
            if info.node_type == NodeType::Dummy {
                let _ = write!(out, " (unresolved type {:#010x})", info.id);
            }
            out.push('\n');
        }
        out
    })
}

fn describe_types(registry: &NodeRegistry) -> String {
    let mut out = String::new();
    for catalog in registry.catalogs() {
        let _ = writeln!(out, "{}", catalog);
        for info in registry.nodes_in_catalog(&catalog) {
            let _ = writeln!(out, "  {:<20} {:#010x}", info.name, info.id);
        }
    }
    out
}
