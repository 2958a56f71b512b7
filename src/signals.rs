//! Signal-driven shutdown plumbing.
//!
//! The shutdown signals stay blocked for the lifetime of the process and are
//! unblocked only inside the race loop's `pselect`, so delivery can happen
//! at exactly one suspension point. The handler records the signal number
//! into an atomic; every other step of teardown runs in the main loop.

use crate::config::types::{PortfolioError, Result};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use std::sync::atomic::{AtomicI32, Ordering};

const SHUTDOWN_SIGNALS: [Signal; 3] = [Signal::SIGTERM, Signal::SIGQUIT, Signal::SIGINT];

static SIGNAL_RECEIVED: AtomicI32 = AtomicI32::new(0);

// Async-signal-safe: a single atomic store and nothing else.
extern "C" fn record_signal(signal: libc::c_int) {
    SIGNAL_RECEIVED.store(signal, Ordering::SeqCst);
}

fn shutdown_set() -> SigSet {
    let mut set = SigSet::empty();
    for sig in SHUTDOWN_SIGNALS {
        set.add(sig);
    }
    set
}

/// Block the shutdown signals. Called before any resource is created, so an
/// early interrupt cannot land while there is nothing to tear down.
pub fn block_shutdown_signals() -> Result<()> {
    signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(&shutdown_set()), None)
        .map_err(|e| PortfolioError::Setup(format!("could not block shutdown signals: {e}")))
}

/// Lift the shutdown mask. Used by solver children between fork and exec;
/// the mask is inherited across exec and would otherwise shield the solver
/// from the supervisor's SIGTERM.
pub fn unblock_shutdown_signals() {
    let _ = signal::sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&shutdown_set()), None);
}

/// Restore the default disposition for each shutdown signal.
///
/// Solver children must call this between fork and exec, before lifting the
/// mask: the inherited recording handler catches a SIGTERM and resumes, so a
/// child still waiting at the start gate would be unkillable until its exec
/// resets the disposition.
pub fn default_shutdown_signals() {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for sig in SHUTDOWN_SIGNALS {
        unsafe {
            let _ = signal::sigaction(sig, &default);
        }
    }
}

/// Install the recording handler for each shutdown signal.
///
/// No SA_RESTART: the race loop must observe EINTR from its wait.
pub fn install_handlers() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(record_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for sig in SHUTDOWN_SIGNALS {
        unsafe {
            signal::sigaction(sig, &action).map_err(|e| {
                PortfolioError::Setup(format!("could not install handler for {sig}: {e}"))
            })?;
        }
    }
    Ok(())
}

/// Mask to pass to the race loop's wait: everything unblocked, so a
/// shutdown signal can interrupt it.
pub fn race_sigmask() -> SigSet {
    SigSet::empty()
}

/// Shutdown signal recorded by the handler, if any.
pub fn pending() -> Option<i32> {
    match SIGNAL_RECEIVED.load(Ordering::SeqCst) {
        0 => None,
        sig => Some(sig),
    }
}

/// Restore default dispositions and deliver `raw` to ourselves so the
/// process exits with the conventional status for that signal.
pub fn reraise(raw: i32) -> ! {
    default_shutdown_signals();
    unblock_shutdown_signals();

    if let Ok(sig) = Signal::try_from(raw) {
        let _ = signal::raise(sig);
    }
    // Only reached if the raise itself failed.
    std::process::exit(128 + raw);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handlers_install_cleanly() {
        assert!(install_handlers().is_ok());
    }

    // One test owns the shared atomic so concurrent tests cannot race it.
    #[test]
    fn recorded_signal_becomes_pending() {
        assert_eq!(pending(), None);
        record_signal(libc::SIGTERM);
        assert_eq!(pending(), Some(libc::SIGTERM));
        SIGNAL_RECEIVED.store(0, Ordering::SeqCst);
    }
}
