//! Signal dispositions for the three process roles.
//!
//! Ctrl-C reaches the whole foreground process group. The supervisor and the
//! worker survive it; only a running executor reacts, by stopping its run
//! and reporting what finished.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::console::PROMPT;
use crate::error::Result;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn note_interrupt(_: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

extern "C" fn swallow(_: libc::c_int) {}

extern "C" fn redraw_prompt(_: libc::c_int) {
    let bytes = PROMPT.as_bytes();
    // Safety: write(2) is async-signal-safe.
    unsafe {
        libc::write(libc::STDOUT_FILENO, bytes.as_ptr().cast(), bytes.len());
    }
}

fn install(signal: Signal, handler: SigHandler) -> Result<()> {
    let action = SigAction::new(handler, SaFlags::SA_RESTART, SigSet::empty());
    // Safety: every handler installed here only touches an atomic or calls write(2).
    unsafe { sigaction(signal, &action) }?;
    Ok(())
}

/// Supervisor while spawning a worker or waiting for its environment.
pub fn suppress_interrupts() -> Result<()> {
    install(Signal::SIGINT, SigHandler::SigIgn)
}

/// Supervisor at the prompt. A no-op handler (rather than ignoring) so that
/// processes forked later start with default dispositions after exec.
pub fn catch_interrupts() -> Result<()> {
    install(Signal::SIGINT, SigHandler::Handler(swallow))
}

/// Stop on Ctrl-Z as usual and redraw the prompt on resume.
pub fn install_console_handlers() -> Result<()> {
    install(Signal::SIGTSTP, SigHandler::SigDfl)?;
    install(Signal::SIGCONT, SigHandler::Handler(redraw_prompt))
}

/// Worker: an interrupt is for the executor, never for the worker.
pub fn ignore_interrupts() -> Result<()> {
    install(Signal::SIGINT, SigHandler::SigIgn)
}

/// Executor: record interrupts for [`interrupted`] to report.
pub fn flag_interrupts() -> Result<()> {
    INTERRUPTED.store(false, Ordering::SeqCst);
    install(Signal::SIGINT, SigHandler::Handler(note_interrupt))
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Back to default dispositions, e.g. in a freshly forked child.
pub fn restore_defaults() -> Result<()> {
    for signal in [Signal::SIGINT, Signal::SIGTSTP, Signal::SIGCONT] {
        install(signal, SigHandler::SigDfl)?;
    }
    Ok(())
}
