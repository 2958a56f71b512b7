//! Race orchestration across solver child processes.
//!
//! The supervisor is single threaded; concurrency comes from the solver
//! processes themselves. It waits for readability on the capture pipes
//! rather than for child exits, because a solver prints its answer before
//! exiting and the answer is the interesting event.

pub mod gate;

use crate::clock;
use crate::config::types::{PortfolioError, Result, SolverConfig};
use crate::logger::RaceLog;
use crate::signals;
use crate::solver::{SolverHandle, Verdict};
use gate::StartGate;
use log::{error, info, warn};
use nix::errno::Errno;
use nix::sys::select::{pselect, FdSet};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

/// Final outcome of one race.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A solver produced a usable verdict; its output went to stdout.
    Decided { verdict: Verdict, winner: String },
    /// Every solver was retired without a usable verdict.
    Exhausted,
    /// The wall-clock budget ran out first.
    TimedOut,
}

pub struct Supervisor {
    solvers: Vec<SolverHandle>,
    pid_map: HashMap<i32, usize>,
    fd_map: HashMap<RawFd, usize>,
    original_budget: Option<Duration>,
    remaining: Option<Duration>,
    log: Option<RaceLog>,
    gate: Option<StartGate>,
    torn_down: bool,
}

impl Supervisor {
    /// `timeout_seconds <= 0` disables the budget. A log sink switches the
    /// race into logging mode; without one the race stops at the first
    /// usable verdict.
    pub fn new(timeout_seconds: f64, log: Option<RaceLog>) -> Self {
        let original_budget =
            (timeout_seconds > 0.0).then(|| Duration::from_secs_f64(timeout_seconds));
        if let Some(budget) = original_budget {
            info!("using timeout of {:.3} second(s)", budget.as_secs_f64());
        }
        if log.is_some() {
            info!("using logging mode");
        } else {
            info!("using performance mode");
        }

        Self {
            solvers: Vec::new(),
            pid_map: HashMap::new(),
            fd_map: HashMap::new(),
            original_budget,
            remaining: None,
            log,
            gate: None,
            torn_down: false,
        }
    }

    /// Register a solver. The handle and its capture pipe are created
    /// eagerly so the read descriptor is known before anything is spawned.
    pub fn add(&mut self, config: SolverConfig) -> Result<()> {
        let handle = SolverHandle::new(config)?;
        let index = self.solvers.len();
        if self.fd_map.insert(handle.read_fd(), index).is_some() {
            return Err(PortfolioError::Setup(format!(
                "duplicate read descriptor {} for solver {}",
                handle.read_fd(),
                handle.name()
            )));
        }
        info!("added solver \"{}\"", handle.name());
        self.solvers.push(handle);
        Ok(())
    }

    pub fn solver_count(&self) -> usize {
        self.solvers.len()
    }

    /// Spawn every solver, race them, and tear everything down. The winner's
    /// output goes to standard output in both modes.
    pub fn invoke(&mut self) -> Result<Outcome> {
        if self.solvers.is_empty() {
            return Err(PortfolioError::Config(
                "there are no solvers to invoke".to_string(),
            ));
        }

        if let Some(log) = &mut self.log {
            log.inventory(self.solvers.iter().map(|s| s.name()));
            log.header();
        }

        let result = match self.spawn_all() {
            Ok(start) => self.race(start),
            Err(e) => Err(e),
        };
        self.teardown();
        result
    }

    /// Fork all solvers in insertion order, then open the start gate so
    /// they leave it together.
    fn spawn_all(&mut self) -> Result<Instant> {
        self.gate = StartGate::new();
        if self.gate.is_none() {
            warn!("start gate unavailable; solvers start as they are forked");
        }

        for index in 0..self.solvers.len() {
            let pid = self.solvers[index].spawn(self.gate.as_ref())?;
            self.pid_map.insert(pid.as_raw(), index);
        }
        if let Some(gate) = &self.gate {
            gate.release(self.solvers.len());
        }

        let start = clock::now();
        self.remaining = self.original_budget;
        Ok(start)
    }

    fn race(&mut self, start: Instant) -> Result<Outcome> {
        let mut usable = self.solvers.len();
        let mut winner: Option<(Verdict, usize)> = None;
        let sigmask = signals::race_sigmask();

        while usable > 0 {
            let mut read_set = FdSet::new();
            for fd in self.fd_map.keys() {
                read_set.insert(*fd);
            }
            let deadline = self.remaining.map(clock::to_timespec);

            let ready = match pselect(
                None,
                Some(&mut read_set),
                None,
                None,
                deadline.as_ref(),
                Some(&sigmask),
            ) {
                Ok(count) => count,
                Err(Errno::EINTR) => {
                    if let Some(sig) = signals::pending() {
                        warn!("received signal {sig}, trying to cleanly exit");
                        self.teardown();
                        signals::reraise(sig);
                    }
                    return Err(PortfolioError::Wait(
                        "unexpected signal while waiting for solver output".to_string(),
                    ));
                }
                Err(e) => {
                    return Err(PortfolioError::Wait(format!(
                        "waiting for solver output: {e}"
                    )))
                }
            };

            if ready == 0 {
                error!("timeout expired");
                let elapsed = clock::since(clock::now(), start);
                if let Some(log) = &mut self.log {
                    for handle in &self.solvers {
                        if self.fd_map.contains_key(&handle.read_fd()) {
                            log.timeout(handle.name(), elapsed);
                        }
                    }
                }
                return Ok(Outcome::TimedOut);
            }

            // Simultaneously-ready solvers are serviced in insertion order.
            let index = (0..self.solvers.len())
                .find(|i| {
                    let fd = self.solvers[*i].read_fd();
                    self.fd_map.contains_key(&fd) && read_set.contains(fd)
                })
                .ok_or_else(|| {
                    PortfolioError::Wait(
                        "ready descriptor does not belong to any racing solver".to_string(),
                    )
                })?;

            // Retired before the next wait so a handle is serviced once.
            let fd = self.solvers[index].read_fd();
            self.fd_map.remove(&fd);

            let name = self.solvers[index].name().to_string();
            info!("solver {name} returned, checking result");
            let verdict = self.solvers[index].classify()?;
            let elapsed = clock::since(clock::now(), start);
            self.adjust_remaining(elapsed);
            usable -= 1;

            match verdict {
                Verdict::Sat | Verdict::Unsat => {
                    info!("result: {verdict}");
                    let first = winner.is_none();
                    if first {
                        winner = Some((verdict, index));
                    }
                    if let Some(log) = &mut self.log {
                        if first {
                            log.winner(&name);
                        }
                        log.answer(&name, elapsed, verdict);
                    }
                    if first {
                        if self.log.is_none() {
                            for (i, handle) in self.solvers.iter_mut().enumerate() {
                                if i != index {
                                    handle.terminate();
                                }
                            }
                            self.emit_winner(index)?;
                            return Ok(Outcome::Decided {
                                verdict,
                                winner: name,
                            });
                        }
                        // Logging mode: print the answer now and keep racing
                        // so every solver's outcome reaches the log.
                        self.emit_winner(index)?;
                    }
                }
                Verdict::Unknown => {
                    info!("result: unknown, trying another solver");
                    if let Some(log) = &mut self.log {
                        log.answer(&name, elapsed, verdict);
                    }
                }
                Verdict::Error => {
                    warn!("solver {name} failed, trying another solver");
                    if let Some(log) = &mut self.log {
                        log.answer(&name, elapsed, verdict);
                    }
                }
            }
        }

        match winner {
            Some((verdict, index)) => Ok(Outcome::Decided {
                verdict,
                winner: self.solvers[index].name().to_string(),
            }),
            None => {
                error!("ran out of usable solvers");
                Ok(Outcome::Exhausted)
            }
        }
    }

    /// Budget left is `original - elapsed`, floored at zero so a chain of
    /// unusable verdicts cannot stretch the race past the original budget.
    fn adjust_remaining(&mut self, elapsed: Duration) {
        if let Some(original) = self.original_budget {
            let remaining = original.saturating_sub(elapsed);
            info!("remaining time: {:.3} second(s)", remaining.as_secs_f64());
            self.remaining = Some(remaining);
        }
    }

    fn emit_winner(&mut self, index: usize) -> Result<()> {
        let mut stdout = io::stdout().lock();
        self.solvers[index].relay_remaining(&mut stdout)
    }

    /// Terminate everything still alive, reap every child, release pipes,
    /// gate, and log. Idempotent; also runs on drop.
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        for handle in &mut self.solvers {
            handle.terminate();
        }
        let spawned: Vec<usize> = self.pid_map.values().copied().collect();
        for index in spawned {
            self.solvers[index].reap();
        }
        self.pid_map.clear();

        for handle in &mut self.solvers {
            handle.close_read();
        }
        self.fd_map.clear();

        self.gate = None;
        self.log = None;
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.teardown();
    }
}
