//! Interrupt handling and the foreground process group cell.
//!
//! The interrupt handler cannot be passed context, so the id of the
//! foreground process group lives in a process-wide atomic cell: written
//! by the executor around each foreground pipeline, read by the handler.
//! Zero means "no foreground pipeline".

use anyhow::{Context, Result};
use nix::sys::signal::{kill, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

static FOREGROUND_PGID: AtomicI32 = AtomicI32::new(0);
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Install the shell's signal dispositions: forward `SIGINT` to the
/// foreground group and ignore `SIGTSTP`. `SA_RESTART` keeps the REPL's
/// blocking reads and waits going after an interrupt returns.
pub fn install() -> Result<()> {
    let forward = SigAction::new(
        SigHandler::Handler(handle_sigint),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe { sigaction(Signal::SIGINT, &forward) }.context("installing SIGINT handler")?;

    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    unsafe { sigaction(Signal::SIGTSTP, &ignore) }.context("ignoring SIGTSTP")?;

    Ok(())
}

/// Async-signal-safe: touches the two atomics and the `kill` syscall,
/// nothing else. Sending to `-pgid` reaches the whole group.
extern "C" fn handle_sigint(_sig: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
    let pgid = FOREGROUND_PGID.load(Ordering::SeqCst);
    if pgid > 0 {
        let _ = kill(Pid::from_raw(-pgid), Signal::SIGINT);
    }
}

/// Designate `pgid` as the foreground group for interrupt forwarding.
pub fn set_foreground(pgid: Pid) {
    FOREGROUND_PGID.store(pgid.as_raw(), Ordering::SeqCst);
}

/// Record that no foreground pipeline is running.
pub fn clear_foreground() {
    FOREGROUND_PGID.store(0, Ordering::SeqCst);
}

/// Clear and return the "was interrupted" flag.
pub fn take_interrupt() -> bool {
    INTERRUPTED.swap(false, Ordering::SeqCst)
}

/// Current value of the foreground cell, for tests.
#[cfg(test)]
pub(crate) fn foreground_pgid() -> i32 {
    FOREGROUND_PGID.load(Ordering::SeqCst)
}
