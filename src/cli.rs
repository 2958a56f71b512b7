//! Command-line surface: option parsing, configuration-file merging, logger
//! setup, and exit-code mapping.

use crate::config::file::FileSettings;
use crate::config::types::{InputRouting, SolverConfig};
use crate::logger::RaceLog;
use crate::signals;
use crate::supervisor::{Outcome, Supervisor};
use anyhow::{bail, Result};
use clap::Parser;
use log::{info, LevelFilter};
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_CONFIG: &str = "./portsolv.cfg";

const CONFIG_FILE_HELP: &str = "\
CONFIGURATION FILE FORMAT
-------------------------------------------------------------------------------
#This is a comment
solver = z3
#Command line options passed to the z3 solver
z3.opts = -smt2 -v:0

solver = mathsat
mathsat.opts = -input=smt2 -verbosity=0
#Deliver the input file to mathsat on standard input
mathsat.input-on-stdin = on

#Timeout in seconds
timeout = 60.0
#Switch off diagnostics on standard error
verbose = off
-------------------------------------------------------------------------------

Each solver is declared on its own line. Per-solver options are space
separated; quotes are interpreted literally, so a single argument cannot
contain a space. By default the input file is passed to a solver as its last
command line argument; `<solver>.input-on-stdin = on` delivers it on the
solver's standard input instead. The solver name is also the executable
name, so it should be resolvable through PATH.";

/// Race several SMT-LIBv2 solvers in parallel and report the first usable
/// answer.
#[derive(Parser)]
#[command(
    name = "portsolv",
    version,
    about = "Invoke several SMT-LIBv2 solvers simultaneously, each as a separate process,\n\
             and relay the answer of the first one to report sat or unsat.",
    after_help = CONFIG_FILE_HELP
)]
struct Cli {
    /// SMT-LIBv2 (.smt2) input file handed to every solver
    input: PathBuf,

    /// Solver to race; repeat the option to add more solvers
    #[arg(short, long = "solver", value_name = "NAME")]
    solver: Vec<String>,

    /// Wall-clock budget in seconds; 0 disables the timeout
    #[arg(short, long, value_name = "SECONDS")]
    timeout: Option<f64>,

    /// Path to the configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print race diagnostics to standard error
    #[arg(long, value_name = "BOOL")]
    verbose: Option<bool>,

    /// Append per-solver results to this file; an empty path disables
    /// logging mode
    #[arg(long = "logging-path", value_name = "PATH")]
    logging_path: Option<PathBuf>,
}

pub fn run() -> Result<()> {
    // Nothing exists yet that a SIGINT would need to tear down; keep the
    // shutdown signals out until the race loop can handle them.
    signals::block_shutdown_signals()?;

    let cli = Cli::parse();

    if !cli.input.is_file() {
        bail!(
            "input SMT-LIBv2 file ({}) does not exist or is not a regular file",
            cli.input.display()
        );
    }

    let (config_path, settings) = match &cli.config {
        Some(path) => {
            if !path.is_file() {
                bail!("configuration file {} does not exist", path.display());
            }
            (Some(path.clone()), FileSettings::load(path)?)
        }
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG);
            if default.is_file() {
                (Some(default.clone()), FileSettings::load(&default)?)
            } else {
                (None, FileSettings::default())
            }
        }
    };

    // Command-line values win over configuration-file values.
    let timeout = cli.timeout.or(settings.timeout).unwrap_or(0.0);
    let verbose = cli.verbose.or(settings.verbose).unwrap_or(true);

    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var_os("RUST_LOG").is_none() {
        builder.filter_level(if verbose {
            LevelFilter::Info
        } else {
            LevelFilter::Warn
        });
    }
    builder.init();

    if let Some(path) = &config_path {
        info!("parsed configuration file {}", path.display());
    }

    if !timeout.is_finite() || timeout < 0.0 {
        bail!("timeout must be a non-negative number of seconds");
    }

    let mut solvers = cli.solver.clone();
    solvers.extend(settings.solvers.iter().cloned());
    if solvers.is_empty() {
        bail!("no solvers specified; use --solver or a configuration file");
    }

    let log = match cli
        .logging_path
        .as_ref()
        .filter(|path| !path.as_os_str().is_empty())
    {
        Some(path) => {
            info!("using logging mode, log file is {}", path.display());
            Some(RaceLog::open(path)?)
        }
        None => None,
    };

    let mut supervisor = Supervisor::new(timeout, log);
    let input = Arc::new(cli.input.clone());
    for name in &solvers {
        let routing = if settings.input_on_stdin(name) {
            InputRouting::Stdin
        } else {
            InputRouting::Argument
        };
        supervisor.add(SolverConfig::new(
            name,
            settings.solver_options(name),
            routing,
            Arc::clone(&input),
        ))?;
    }

    // The supervisor can now be torn down; let shutdown signals through to
    // the race loop.
    signals::install_handlers()?;

    match supervisor.invoke()? {
        Outcome::Decided { verdict, winner } => {
            info!("solver {winner} answered {verdict}");
            Ok(())
        }
        Outcome::Exhausted | Outcome::TimedOut => std::process::exit(1),
    }
}
