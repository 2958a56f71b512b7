//! Fair-start barrier for the solver race.
//!
//! An unnamed process-shared counting semaphore, initialized to zero, in a
//! page of anonymous shared memory. Every child waits on it between fork
//! and exec; once all forks are done the parent posts it once per child, so
//! the solvers leave the gate together instead of the first fork enjoying a
//! head start. Kernel scheduling still decides the actual order.

use log::warn;
use std::ptr;

pub struct StartGate {
    sem: *mut libc::sem_t,
}

impl StartGate {
    /// `None` when the shared page or the semaphore cannot be created; the
    /// race then runs without a barrier, which is a fairness degradation
    /// and not a functional change.
    pub fn new() -> Option<Self> {
        let size = std::mem::size_of::<libc::sem_t>();
        let page = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if page == libc::MAP_FAILED {
            warn!("could not map shared memory for the start gate");
            return None;
        }

        let sem = page as *mut libc::sem_t;
        // Second argument nonzero: shared between processes, not threads.
        if unsafe { libc::sem_init(sem, 1, 0) } != 0 {
            warn!("could not initialize the start gate semaphore");
            unsafe {
                libc::munmap(page, size);
            }
            return None;
        }

        Some(Self { sem })
    }

    /// Block until the parent opens the gate. Called in the child.
    pub fn wait(&self) {
        loop {
            if unsafe { libc::sem_wait(self.sem) } == 0 {
                return;
            }
            if std::io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
                // A broken gate must not strand the solver.
                return;
            }
        }
    }

    /// Open the gate for `count` waiting children.
    pub fn release(&self, count: usize) {
        for _ in 0..count {
            unsafe {
                libc::sem_post(self.sem);
            }
        }
    }
}

impl Drop for StartGate {
    fn drop(&mut self) {
        unsafe {
            libc::sem_destroy(self.sem);
            libc::munmap(
                self.sem as *mut libc::c_void,
                std::mem::size_of::<libc::sem_t>(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_gate_does_not_block() {
        let gate = StartGate::new().expect("start gate");
        gate.release(2);
        gate.wait();
        gate.wait();
    }
}
