/// Core types and error taxonomy for the portsolv dispatcher
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// How the input file reaches a solver process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputRouting {
    /// Appended as the last argv token (the default).
    Argument,
    /// Opened read-only and duplicated over the child's standard input.
    Stdin,
}

/// Immutable description of one solver invocation.
///
/// The name doubles as `argv[0]` and is resolved through the executable
/// search path, so a bare name like `z3` works when the solver is installed.
#[derive(Clone, Debug)]
pub struct SolverConfig {
    pub name: String,
    pub args: Vec<String>,
    pub routing: InputRouting,
    pub input: Arc<PathBuf>,
}

impl SolverConfig {
    pub fn new(name: &str, cmd_options: &str, routing: InputRouting, input: Arc<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            args: split_options(cmd_options),
            routing,
            input,
        }
    }
}

/// Split a solver option string into argv tokens.
///
/// Consecutive whitespace collapses. Quote characters are ordinary token
/// bytes, so a single argument cannot contain a space.
pub fn split_options(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// Error taxonomy for the dispatcher.
#[derive(Error, Debug)]
pub enum PortfolioError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Setup error: {0}")]
    Setup(String),

    #[error("Spawn error: {0}")]
    Spawn(String),

    #[error("Wait error: {0}")]
    Wait(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Log error: {0}")]
    Log(String),
}

impl From<nix::errno::Errno> for PortfolioError {
    fn from(err: nix::errno::Errno) -> Self {
        PortfolioError::Io(std::io::Error::from_raw_os_error(err as i32))
    }
}

/// Result type alias for dispatcher operations.
pub type Result<T> = std::result::Result<T, PortfolioError>;
