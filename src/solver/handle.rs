//! One child solver process and its capture pipe.

use crate::config::types::{InputRouting, PortfolioError, Result, SolverConfig};
use crate::signals;
use crate::solver::verdict::{self, Verdict, CAPTURE_LEN};
use crate::supervisor::gate::StartGate;
use log::{info, warn};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{kill, Signal};
use nix::sys::stat::Mode;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{self, close, dup2, execvp, fork, pipe2, ForkResult, Pid};
use std::ffi::CString;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;

/// Supervisor-side record for one solver child.
///
/// Owns the parent-side read end of the capture pipe and the child's pid.
/// The handle is spawned exactly once, classified at most once (the verdict
/// is cached), and reaped exactly once.
pub struct SolverHandle {
    config: SolverConfig,
    argv: Vec<CString>,
    read_fd: RawFd,
    write_fd: Option<RawFd>,
    pid: Option<Pid>,
    buffer: [u8; CAPTURE_LEN],
    captured: usize,
    verdict: Option<Verdict>,
    terminated: bool,
    reaped: bool,
}

impl SolverHandle {
    /// Allocate the capture pipe and compose the child's argv.
    ///
    /// Both pipe ends are close-on-exec so that no sibling solver inherits
    /// them past its exec; the child's `dup2` onto stdout clears the flag on
    /// the one descriptor that must survive.
    pub fn new(config: SolverConfig) -> Result<Self> {
        let argv = build_argv(&config)?;

        if log::log_enabled!(log::Level::Info) {
            info!(
                "found {} argument(s) for solver {}",
                argv.len(),
                config.name
            );
            for (index, arg) in argv.iter().enumerate() {
                info!("[{}] = {:?}", index, arg);
            }
            if config.routing == InputRouting::Stdin {
                info!(
                    "input file ({}) will be passed to solver {} on standard input",
                    config.input.display(),
                    config.name
                );
            }
        }

        let (read_fd, write_fd) = pipe2(OFlag::O_CLOEXEC)
            .map_err(|e| PortfolioError::Setup(format!("pipe for solver {}: {e}", config.name)))?;

        Ok(Self {
            config,
            argv,
            read_fd,
            write_fd: Some(write_fd),
            pid: None,
            buffer: [0; CAPTURE_LEN],
            captured: 0,
            verdict: None,
            terminated: false,
            reaped: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Parent-side read end of the capture pipe; stable for the handle's
    /// lifetime (negative once drained or torn down).
    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    pub fn verdict(&self) -> Option<Verdict> {
        self.verdict
    }

    /// Fork the solver child. The child redirects its stdout into the
    /// capture pipe, optionally redirects the input file over its stdin,
    /// waits on the start gate, and execs. The parent records the pid and
    /// closes its copy of the write end so that the child's exit is
    /// observable as EOF.
    pub fn spawn(&mut self, gate: Option<&StartGate>) -> Result<Pid> {
        if self.pid.is_some() {
            return Err(PortfolioError::Spawn(format!(
                "solver {} was already spawned",
                self.config.name
            )));
        }

        match unsafe { fork() } {
            Err(e) => Err(PortfolioError::Spawn(format!(
                "fork for solver {}: {e}",
                self.config.name
            ))),
            Ok(ForkResult::Child) => self.child_exec(gate),
            Ok(ForkResult::Parent { child }) => {
                self.pid = Some(child);
                if let Some(fd) = self.write_fd.take() {
                    let _ = close(fd);
                }
                Ok(child)
            }
        }
    }

    /// Child-side tail of `spawn`. Never returns.
    fn child_exec(&self, gate: Option<&StartGate>) -> ! {
        // The inherited recording handler and the shutdown mask both survive
        // into the child (the mask even across exec). Default dispositions
        // must come back before the mask lifts, so a SIGTERM arriving while
        // the child still waits at the gate terminates it instead of being
        // recorded and ignored.
        signals::default_shutdown_signals();
        signals::unblock_shutdown_signals();

        if let Some(gate) = gate {
            gate.wait();
        }

        let Some(write_fd) = self.write_fd else {
            let _ = writeln!(
                std::io::stderr(),
                "capture pipe missing for solver {}",
                self.config.name
            );
            std::process::exit(127);
        };
        if dup2(write_fd, libc::STDOUT_FILENO).is_err() {
            let _ = writeln!(
                std::io::stderr(),
                "could not redirect stdout of solver {}",
                self.config.name
            );
            std::process::exit(127);
        }

        if self.config.routing == InputRouting::Stdin {
            let input_fd = match nix::fcntl::open(
                self.config.input.as_path(),
                OFlag::O_RDONLY | OFlag::O_CLOEXEC,
                Mode::empty(),
            ) {
                Ok(fd) => fd,
                Err(e) => {
                    let _ = writeln!(
                        std::io::stderr(),
                        "could not open input file {}: {e}",
                        self.config.input.display()
                    );
                    std::process::exit(127);
                }
            };
            if dup2(input_fd, libc::STDIN_FILENO).is_err() {
                let _ = writeln!(
                    std::io::stderr(),
                    "could not redirect stdin of solver {}",
                    self.config.name
                );
                std::process::exit(127);
            }
        }

        let result = execvp(&self.argv[0], &self.argv);
        let _ = writeln!(
            std::io::stderr(),
            "failed to execute solver {}: {}",
            self.config.name,
            result.unwrap_err()
        );
        std::process::exit(127);
    }

    /// One bounded read from the capture pipe, then cached prefix
    /// classification. EOF before any bytes (a crashed child) yields
    /// `Verdict::Error`.
    pub fn classify(&mut self) -> Result<Verdict> {
        if let Some(verdict) = self.verdict {
            return Ok(verdict);
        }

        self.captured = loop {
            match unistd::read(self.read_fd, &mut self.buffer) {
                Ok(count) => break count,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        };

        let verdict = verdict::classify(&self.buffer[..self.captured]);
        self.verdict = Some(verdict);
        Ok(verdict)
    }

    /// Copy the captured bytes and then the remainder of the pipe, byte
    /// exact, into the sink until EOF. Closes the read end afterwards.
    pub fn relay_remaining<W: Write>(&mut self, sink: &mut W) -> Result<()> {
        if self.verdict.is_none() {
            warn!(
                "output of solver {} requested before classification",
                self.config.name
            );
            return Ok(());
        }

        sink.write_all(&self.buffer[..self.captured])?;

        let mut chunk = [0u8; 4096];
        loop {
            match unistd::read(self.read_fd, &mut chunk) {
                Ok(0) => break,
                Ok(count) => sink.write_all(&chunk[..count])?,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        sink.flush()?;

        self.close_read();
        Ok(())
    }

    /// Ask the child to exit, at most once. Already-gone children are not
    /// an error.
    pub fn terminate(&mut self) {
        if self.terminated || self.reaped {
            return;
        }
        self.terminated = true;
        let Some(pid) = self.pid else { return };
        info!(
            "sending SIGTERM to solver {} (pid {})",
            self.config.name, pid
        );
        match kill(pid, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => warn!(
                "could not terminate solver {} (pid {}): {e}",
                self.config.name, pid
            ),
        }
    }

    /// Collect the child's exit status. Idempotent.
    pub fn reap(&mut self) {
        if self.reaped {
            return;
        }
        let Some(pid) = self.pid else {
            self.reaped = true;
            return;
        };

        info!("reaping child pid {} ({})", pid, self.config.name);
        loop {
            match waitpid(pid, None) {
                Ok(WaitStatus::Exited(_, _)) | Ok(WaitStatus::Signaled(_, _, _)) => break,
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => break,
                Err(e) => {
                    warn!("waitpid for solver {}: {e}", self.config.name);
                    break;
                }
            }
        }
        self.reaped = true;
    }

    pub(crate) fn close_read(&mut self) {
        if self.read_fd >= 0 {
            let _ = close(self.read_fd);
            self.read_fd = -1;
        }
    }
}

impl Drop for SolverHandle {
    fn drop(&mut self) {
        if !self.reaped {
            self.terminate();
        }
        if let Some(fd) = self.write_fd.take() {
            let _ = close(fd);
        }
        self.close_read();
    }
}

/// NUL-terminated argv: solver name, option tokens, then the input path
/// when it travels as the last argument.
fn build_argv(config: &SolverConfig) -> Result<Vec<CString>> {
    let mut tokens: Vec<&[u8]> = Vec::with_capacity(config.args.len() + 2);
    tokens.push(config.name.as_bytes());
    for arg in &config.args {
        tokens.push(arg.as_bytes());
    }
    if config.routing == InputRouting::Argument {
        tokens.push(config.input.as_os_str().as_bytes());
    }

    tokens
        .into_iter()
        .map(|token| {
            CString::new(token).map_err(|_| {
                PortfolioError::Setup(format!(
                    "argument for solver {} contains a NUL byte",
                    config.name
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn config(routing: InputRouting) -> SolverConfig {
        SolverConfig::new(
            "z3",
            "-smt2 -v:0",
            routing,
            Arc::new(PathBuf::from("/tmp/query.smt2")),
        )
    }

    #[test]
    fn argv_appends_input_for_argument_routing() {
        let argv = build_argv(&config(InputRouting::Argument)).unwrap();
        let tokens: Vec<&str> = argv.iter().map(|c| c.to_str().unwrap()).collect();
        assert_eq!(tokens, vec!["z3", "-smt2", "-v:0", "/tmp/query.smt2"]);
    }

    #[test]
    fn argv_omits_input_for_stdin_routing() {
        let argv = build_argv(&config(InputRouting::Stdin)).unwrap();
        let tokens: Vec<&str> = argv.iter().map(|c| c.to_str().unwrap()).collect();
        assert_eq!(tokens, vec!["z3", "-smt2", "-v:0"]);
    }

    #[test]
    fn nul_bytes_are_rejected() {
        let bad = SolverConfig {
            name: "z3".to_string(),
            args: vec!["-flag\0value".to_string()],
            routing: InputRouting::Stdin,
            input: Arc::new(PathBuf::from("/tmp/query.smt2")),
        };
        assert!(matches!(
            build_argv(&bad),
            Err(PortfolioError::Setup(_))
        ));
    }

    #[test]
    fn new_handle_holds_one_live_read_descriptor() {
        let handle = SolverHandle::new(config(InputRouting::Argument)).unwrap();
        assert!(handle.read_fd() >= 0);
        assert!(handle.verdict().is_none());
    }
}
