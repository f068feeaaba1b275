//! Forking and reaping of worker and executor processes.

use std::fmt;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{ForkResult, Pid};

use crate::error::{KettleError, Result};

/// Exit code of a child whose body panicked.
pub const PANIC_EXIT_CODE: i32 = 101;

pub enum Forked {
    Child,
    Parent(Pid),
}

/// Fork the current process.
///
/// Callers must be single-threaded; the child must finish with [`run_child`].
pub fn fork() -> Result<Forked> {
    // Safety: kettle never starts threads, so the child inherits a consistent
    // address space and only runs its body before `_exit`.
    match unsafe { nix::unistd::fork() }? {
        ForkResult::Child => Ok(Forked::Child),
        ForkResult::Parent { child } => Ok(Forked::Parent(child)),
    }
}

/// Run a forked child's body and terminate without returning to the caller.
///
/// Panics become [`PANIC_EXIT_CODE`]. `_exit` skips the parent's atexit
/// handlers and destructors, which belong to the parent.
pub fn run_child<F: FnOnce() -> i32>(body: F) -> ! {
    let code = panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or(PANIC_EXIT_CODE);
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
    // Safety: `_exit` is async-signal-safe and always sound to call.
    unsafe { libc::_exit(code) }
}

/// How a reaped child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    Exited(i32),
    Signaled(Signal),
}

impl ChildExit {
    pub fn success(&self) -> bool {
        matches!(self, ChildExit::Exited(0))
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildExit::Exited(code) => write!(f, "exit status {}", code),
            ChildExit::Signaled(signal) => write!(f, "killed by {}", signal),
        }
    }
}

/// Block until `pid` terminates and reap it.
pub fn wait_for(pid: Pid) -> Result<ChildExit> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(ChildExit::Exited(code)),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(ChildExit::Signaled(signal)),
            Ok(_) | Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => {
                return Err(KettleError::Process {
                    reason: format!("process {} was already reaped", pid),
                })
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// SIGKILL `pid` and reap it.
pub fn kill_and_reap(pid: Pid) -> Result<ChildExit> {
    match signal::kill(pid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => return Err(e.into()),
    }
    wait_for(pid)
}

/// True if `pid` is no longer our unreaped child.
pub fn is_reaped(pid: Pid) -> bool {
    matches!(waitpid(pid, Some(WaitPidFlag::WNOHANG)), Err(Errno::ECHILD))
}
