//! Line-based configuration file parsing.
//!
//! The format is deliberately small: `key = value` pairs, one per line, with
//! `#` comments. `solver` may repeat; `<solver>.opts` and
//! `<solver>.input-on-stdin` attach per-solver settings. Unknown keys are
//! ignored so configurations can carry settings for other tools.

use crate::config::types::{PortfolioError, Result};
use std::collections::HashMap;
use std::path::Path;

/// Settings collected from one configuration file.
#[derive(Debug, Default)]
pub struct FileSettings {
    pub solvers: Vec<String>,
    pub timeout: Option<f64>,
    pub verbose: Option<bool>,
    opts: HashMap<String, String>,
    stdin_flags: HashMap<String, bool>,
}

impl FileSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PortfolioError::Config(format!(
                "could not read configuration file {}: {e}",
                path.display()
            ))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut settings = FileSettings::default();

        for (number, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| {
                PortfolioError::Config(format!("malformed line {} in configuration file", number + 1))
            })?;
            let key = key.trim();
            let value = value.trim();

            match key {
                "solver" => settings.solvers.push(value.to_string()),
                "timeout" => {
                    let seconds: f64 = value.parse().map_err(|_| {
                        PortfolioError::Config(format!("invalid timeout value \"{value}\""))
                    })?;
                    settings.timeout = Some(seconds);
                }
                "verbose" => {
                    settings.verbose = Some(parse_bool(value).ok_or_else(|| {
                        PortfolioError::Config(format!("invalid verbose value \"{value}\""))
                    })?);
                }
                _ => {
                    if let Some(solver) = key.strip_suffix(".opts") {
                        settings.opts.insert(solver.to_string(), value.to_string());
                    } else if let Some(solver) = key.strip_suffix(".input-on-stdin") {
                        let flag = parse_bool(value).ok_or_else(|| {
                            PortfolioError::Config(format!(
                                "invalid input-on-stdin value \"{value}\" for solver {solver}"
                            ))
                        })?;
                        settings.stdin_flags.insert(solver.to_string(), flag);
                    }
                    // Anything else is somebody else's key.
                }
            }
        }

        Ok(settings)
    }

    /// Option string for a solver; empty when the file has none.
    pub fn solver_options(&self, name: &str) -> &str {
        self.opts.get(name).map(String::as_str).unwrap_or("")
    }

    /// Whether the input file should be delivered on the solver's stdin.
    /// Defaults to false: the input path becomes the last argv token.
    pub fn input_on_stdin(&self, name: &str) -> bool {
        self.stdin_flags.get(name).copied().unwrap_or(false)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Some(true),
        "off" | "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# comment
solver = z3
z3.opts = -smt2 -v:0

solver = mathsat
mathsat.opts = -input=smt2 -verbosity=0
mathsat.input-on-stdin = on

timeout = 60.0
verbose = off
";

    #[test]
    fn parses_the_documented_example() {
        let settings = FileSettings::parse(SAMPLE).unwrap();
        assert_eq!(settings.solvers, vec!["z3", "mathsat"]);
        assert_eq!(settings.timeout, Some(60.0));
        assert_eq!(settings.verbose, Some(false));
        assert_eq!(settings.solver_options("z3"), "-smt2 -v:0");
        assert_eq!(settings.solver_options("mathsat"), "-input=smt2 -verbosity=0");
        assert!(settings.input_on_stdin("mathsat"));
        assert!(!settings.input_on_stdin("z3"));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let settings = FileSettings::parse("other-tool = whatever\nsolver = cvc5\n").unwrap();
        assert_eq!(settings.solvers, vec!["cvc5"]);
    }

    #[test]
    fn missing_per_solver_settings_have_defaults() {
        let settings = FileSettings::parse("solver = z3\n").unwrap();
        assert_eq!(settings.solver_options("z3"), "");
        assert!(!settings.input_on_stdin("z3"));
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert!(FileSettings::parse("solver z3\n").is_err());
        assert!(FileSettings::parse("timeout = soon\n").is_err());
        assert!(FileSettings::parse("verbose = maybe\n").is_err());
        assert!(FileSettings::parse("z3.input-on-stdin = maybe\n").is_err());
    }

    #[test]
    fn boolean_spellings() {
        for yes in ["on", "true", "yes", "1", "ON", "True"] {
            assert_eq!(parse_bool(yes), Some(true));
        }
        for no in ["off", "false", "no", "0"] {
            assert_eq!(parse_bool(no), Some(false));
        }
        assert_eq!(parse_bool("2"), None);
    }
}
