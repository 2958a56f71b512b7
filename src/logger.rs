//! Append-only race log.
//!
//! One line per event, with elapsed times in fixed-point seconds at
//! nanosecond precision. Opening the log is fatal when it fails; individual
//! write failures only warn, so a full disk cannot abort a race.

use crate::clock;
use crate::config::types::{PortfolioError, Result};
use crate::solver::Verdict;
use log::warn;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

pub struct RaceLog {
    file: File,
}

impl RaceLog {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .map_err(|e| {
                PortfolioError::Log(format!("could not open log file {}: {e}", path.display()))
            })?;
        let mut log = Self { file };
        log.write_line("#Start");
        Ok(log)
    }

    fn write_line(&mut self, line: &str) {
        if let Err(e) = writeln!(self.file, "{line}") {
            warn!("race log write failed: {e}");
        }
    }

    /// Solver inventory: a leading count, then the names comma-terminated.
    pub fn inventory<'a, I>(&mut self, names: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let names: Vec<&str> = names.into_iter().collect();
        let mut line = format!("# {} solvers.", names.len());
        for name in names {
            line.push_str(name);
            line.push(',');
        }
        self.write_line(&line);
    }

    pub fn header(&mut self) {
        self.write_line("# [Solver name ] [ time (seconds)] [answer]");
    }

    pub fn answer(&mut self, name: &str, elapsed: Duration, verdict: Verdict) {
        self.write_line(&format!(
            "{name} {} {verdict}",
            clock::fixed_seconds(elapsed)
        ));
    }

    pub fn winner(&mut self, name: &str) {
        self.write_line(&format!("#First solver to finish  {name}"));
    }

    pub fn timeout(&mut self, name: &str, elapsed: Duration) {
        self.write_line(&format!("{name} {} timeout", clock::fixed_seconds(elapsed)));
    }
}

impl Drop for RaceLog {
    fn drop(&mut self) {
        let _ = writeln!(self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_path(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("portsolv-log-{tag}-{}", std::process::id()))
    }

    #[test]
    fn log_lines_follow_the_documented_format() {
        let path = scratch_path("format");
        let _ = fs::remove_file(&path);
        {
            let mut log = RaceLog::open(&path).unwrap();
            log.inventory(["z3", "mathsat"]);
            log.header();
            log.answer("z3", Duration::new(0, 1_500_000), Verdict::Unknown);
            log.winner("mathsat");
            log.answer("mathsat", Duration::new(1, 250_000_000), Verdict::Unsat);
            log.timeout("z3", Duration::new(60, 0));
        }
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "#Start");
        assert_eq!(lines[1], "# 2 solvers.z3,mathsat,");
        assert_eq!(lines[2], "# [Solver name ] [ time (seconds)] [answer]");
        assert_eq!(lines[3], "z3 0.001500000 unknown");
        assert_eq!(lines[4], "#First solver to finish  mathsat");
        assert_eq!(lines[5], "mathsat 1.250000000 unsat");
        assert_eq!(lines[6], "z3 60.000000000 timeout");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn reopening_appends() {
        let path = scratch_path("append");
        let _ = fs::remove_file(&path);
        {
            let mut log = RaceLog::open(&path).unwrap();
            log.winner("z3");
        }
        {
            let mut log = RaceLog::open(&path).unwrap();
            log.winner("mathsat");
        }
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("#Start").count(), 2);
        assert!(text.contains("#First solver to finish  z3"));
        assert!(text.contains("#First solver to finish  mathsat"));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn open_failure_is_fatal() {
        let result = RaceLog::open(Path::new("/nonexistent-dir/portsolv.log"));
        assert!(matches!(result, Err(PortfolioError::Log(_))));
    }
}
