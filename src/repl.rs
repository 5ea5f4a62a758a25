//! The interactive read-eval-print loop.

use crate::executor::{self, ExitCode};
use crate::parser;
use crate::signal;
use anyhow::{Context, Result};
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

/// Prompt shown before each command line.
const PROMPT: &str = "shell> ";

/// Longest accepted command line, in bytes.
pub const MAX_LINE_LEN: usize = 4096;

/// Run the interactive loop until end-of-input or the `exit` built-in.
///
/// Returns the exit status of the last executed pipeline, or 0 if none
/// ran; the binary exits with that status.
pub fn run() -> Result<ExitCode> {
    signal::install()?;
    let mut editor = DefaultEditor::new().context("initializing line editor")?;
    let mut last_status: ExitCode = 0;

    loop {
        signal::take_interrupt();
        reap_background();

        let line = match editor.readline(PROMPT) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => {
                println!();
                break;
            }
            Err(err) => {
                // Unrecoverable terminal error; leave cleanly.
                warn!("terminal read failed: {err}");
                break;
            }
        };

        let line = line.trim_end_matches('\n');
        if line.is_empty() {
            continue;
        }
        if line.len() > MAX_LINE_LEN {
            eprintln!(
                "pipeshell: line too long ({} bytes, limit {MAX_LINE_LEN})",
                line.len()
            );
            continue;
        }
        let _ = editor.add_history_entry(line);

        if line == "exit" {
            break;
        }

        let pipeline = match parser::parse_line(line) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                eprintln!("pipeshell: {err}");
                continue;
            }
        };
        if pipeline.is_empty() {
            continue;
        }
        debug!("pipeline = {pipeline:?}");

        last_status = match executor::run_pipeline(&pipeline) {
            Ok(status) => status,
            Err(err) => {
                eprintln!("pipeshell: {err:#}");
                1
            }
        };
    }

    Ok(last_status)
}

/// Opportunistically reap finished background children so long sessions do
/// not accumulate zombies. Statuses are discarded: background jobs are
/// untracked after launch. Foreground children never reach this point,
/// they are reaped synchronously by the executor.
fn reap_background() {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(status) => debug!("reaped background child: {status:?}"),
            Err(Errno::ECHILD) => break,
            Err(err) => {
                warn!("waitpid: {err}");
                break;
            }
        }
    }
}
