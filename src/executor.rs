//! Turns a parsed pipeline into a tree of child processes.
//!
//! For a pipeline of N commands the executor creates N-1 anonymous pipes,
//! forks one child per command, wires each child's standard descriptors to
//! the neighbouring pipes and any file redirections, and reaps every child
//! of a foreground run. Pipe ends are owned descriptors: closing is
//! dropping, and by the time the last child is forked the parent holds no
//! pipe ends at all, so end-of-file propagates as soon as each writer
//! exits.

use crate::external;
use crate::parser::{Command, Pipeline};
use crate::signal;
use anyhow::{bail, Context, Result};
use log::{debug, warn};
use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{close, dup2, execv, fork, pipe, setpgid, ForkResult, Pid};
use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStringExt;

/// Conventional process exit code type used by this crate.
///
/// 0 indicates success. A command terminated by a signal reports
/// 128 plus the signal number, following shell convention.
pub type ExitCode = i32;

/// Reported by a child whose program could not be found or executed.
const EXIT_NOT_FOUND: ExitCode = 127;
/// Reported by a child whose descriptor wiring or redirection open failed.
const EXIT_SETUP_FAILED: ExitCode = 1;

/// One pipe, with each end individually closable.
struct PipePair {
    read: Option<OwnedFd>,
    write: Option<OwnedFd>,
}

/// Everything a child needs after `fork`, prepared up front so that the
/// child's happy path performs no allocation between `fork` and `execv`.
struct PreparedCommand {
    /// Name as typed, for diagnostics.
    name: String,
    /// Resolved program path; `None` when PATH lookup failed, in which
    /// case the child reports command-not-found itself so the pipeline's
    /// wiring and the other children's lifecycle stay intact.
    program: Option<CString>,
    argv: Vec<CString>,
    input_file: Option<CString>,
    output_file: Option<CString>,
    append_output: bool,
}

fn prepare(command: &Command) -> Result<PreparedCommand> {
    if command.argv.is_empty() {
        bail!("empty command");
    }

    let argv = command
        .argv
        .iter()
        .map(|arg| CString::new(arg.as_bytes()))
        .collect::<Result<Vec<_>, _>>()
        .context("argument contains an interior NUL byte")?;

    let program = external::resolve_program(&command.argv[0])
        .map(|path| CString::new(path.into_os_string().into_vec()))
        .transpose()
        .context("program path contains an interior NUL byte")?;

    let input_file = command
        .input_file
        .as_deref()
        .map(CString::new)
        .transpose()
        .context("input path contains an interior NUL byte")?;
    let output_file = command
        .output_file
        .as_deref()
        .map(CString::new)
        .transpose()
        .context("output path contains an interior NUL byte")?;

    Ok(PreparedCommand {
        name: command.argv[0].clone(),
        program,
        argv,
        input_file,
        output_file,
        append_output: command.append_output,
    })
}

/// Execute a pipeline and return the shell's next "last status".
///
/// An empty pipeline returns 0 without doing anything. A background
/// pipeline prints the launch notice and returns 0 immediately; its
/// children are not tracked further. A foreground pipeline blocks until
/// every child has been reaped and returns the status of the last command
/// alone: its exit code if it exited normally, 128 plus the signal number
/// if it was terminated by a signal.
pub fn run_pipeline(pipeline: &Pipeline) -> Result<ExitCode> {
    if pipeline.commands.is_empty() {
        return Ok(0);
    }

    let prepared = pipeline
        .commands
        .iter()
        .map(prepare)
        .collect::<Result<Vec<_>>>()?;
    let count = prepared.len();
    let background = pipeline.commands[count - 1].background;

    let mut pipes = Vec::with_capacity(count.saturating_sub(1));
    for _ in 1..count {
        let (read, write) = pipe().context("creating pipe")?;
        pipes.push(PipePair {
            read: Some(read),
            write: Some(write),
        });
    }

    let mut pids: Vec<Pid> = Vec::with_capacity(count);
    for (index, command) in prepared.iter().enumerate() {
        let stdin_pipe: Option<RawFd> = if index > 0 {
            pipes[index - 1].read.as_ref().map(AsRawFd::as_raw_fd)
        } else {
            None
        };
        let stdout_pipe: Option<RawFd> = if index + 1 < count {
            pipes[index].write.as_ref().map(AsRawFd::as_raw_fd)
        } else {
            None
        };

        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                exec_child(command, stdin_pipe, stdout_pipe, &pipes);
            }
            Ok(ForkResult::Parent { child }) => {
                debug!("forked `{}` as pid {child}", command.name);
                if index == 0 && !background {
                    // The child also calls setpgid on itself; whichever
                    // side runs first wins and the other is a no-op.
                    let _ = setpgid(child, child);
                    signal::set_foreground(child);
                }
                if index > 0 {
                    pipes[index - 1].read.take();
                }
                if index + 1 < count {
                    pipes[index].write.take();
                }
                pids.push(child);
            }
            Err(err) => {
                // Launched children terminate naturally once their pipe
                // ends close; they still must be reaped here.
                drop(pipes);
                for pid in &pids {
                    let _ = waitpid(*pid, None);
                }
                signal::clear_foreground();
                bail!("fork failed: {err}");
            }
        }
    }
    debug_assert!(pipes
        .iter()
        .all(|pair| pair.read.is_none() && pair.write.is_none()));

    if background {
        println!("[{}]", pids[count - 1]);
        return Ok(0);
    }

    let mut status = 0;
    for (index, pid) in pids.iter().enumerate() {
        let last = index == count - 1;
        match waitpid(*pid, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                if last {
                    status = code;
                }
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                if last {
                    status = 128 + sig as i32;
                }
            }
            Ok(other) => warn!("unexpected wait status for pid {pid}: {other:?}"),
            Err(Errno::ECHILD) => {}
            Err(err) => warn!("waitpid {pid}: {err}"),
        }
    }
    signal::clear_foreground();
    Ok(status)
}

/// Runs in the forked child; never returns to the caller's code.
///
/// Order matters: the process group first so a racing interrupt reaches
/// the child, then pipe wiring, then file redirections (which override the
/// pipe ends), then the exec. The child leaves with `_exit` so the
/// parent's buffered state is never flushed twice.
fn exec_child(
    command: &PreparedCommand,
    stdin_pipe: Option<RawFd>,
    stdout_pipe: Option<RawFd>,
    pipes: &[PipePair],
) -> ! {
    // Every pipeline leads its own process group, background included.
    let _ = setpgid(Pid::from_raw(0), Pid::from_raw(0));

    if let Some(fd) = stdin_pipe {
        if dup2(fd, libc::STDIN_FILENO).is_err() {
            eprintln!("pipeshell: failed to wire standard input");
            unsafe { libc::_exit(EXIT_SETUP_FAILED) };
        }
    }
    if let Some(fd) = stdout_pipe {
        if dup2(fd, libc::STDOUT_FILENO).is_err() {
            eprintln!("pipeshell: failed to wire standard output");
            unsafe { libc::_exit(EXIT_SETUP_FAILED) };
        }
    }

    // Close every inherited pipe end, including the two just duplicated.
    for pair in pipes {
        if let Some(fd) = pair.read.as_ref() {
            let _ = close(fd.as_raw_fd());
        }
        if let Some(fd) = pair.write.as_ref() {
            let _ = close(fd.as_raw_fd());
        }
    }

    if let Some(path) = &command.input_file {
        match open(path.as_c_str(), OFlag::O_RDONLY, Mode::empty()) {
            Ok(fd) => {
                if dup2(fd.as_raw_fd(), libc::STDIN_FILENO).is_err() {
                    eprintln!("pipeshell: failed to wire standard input");
                    unsafe { libc::_exit(EXIT_SETUP_FAILED) };
                }
                let _ = close(fd.as_raw_fd());
            }
            Err(err) => {
                eprintln!("pipeshell: {}: {err}", path.to_string_lossy());
                unsafe { libc::_exit(EXIT_SETUP_FAILED) };
            }
        }
    }

    if let Some(path) = &command.output_file {
        let mut flags = OFlag::O_WRONLY | OFlag::O_CREAT;
        flags |= if command.append_output {
            OFlag::O_APPEND
        } else {
            OFlag::O_TRUNC
        };
        match open(path.as_c_str(), flags, Mode::from_bits_truncate(0o644)) {
            Ok(fd) => {
                if dup2(fd.as_raw_fd(), libc::STDOUT_FILENO).is_err() {
                    eprintln!("pipeshell: failed to wire standard output");
                    unsafe { libc::_exit(EXIT_SETUP_FAILED) };
                }
                let _ = close(fd.as_raw_fd());
            }
            Err(err) => {
                eprintln!("pipeshell: {}: {err}", path.to_string_lossy());
                unsafe { libc::_exit(EXIT_SETUP_FAILED) };
            }
        }
    }

    match &command.program {
        Some(program) => {
            let _ = execv(program, &command.argv);
            eprintln!("pipeshell: {}: cannot execute", command.name);
            unsafe { libc::_exit(EXIT_NOT_FOUND) };
        }
        None => {
            eprintln!("pipeshell: {}: command not found", command.name);
            unsafe { libc::_exit(EXIT_NOT_FOUND) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_line;
    use crate::signal::test_support;
    use nix::sys::signal::{raise, Signal};
    use std::fs;
    use std::path::PathBuf;
    use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

    fn run(line: &str) -> ExitCode {
        let _guard = test_support::serial();
        let pipeline = parse_line(line).unwrap();
        run_pipeline(&pipeline).unwrap()
    }

    fn make_unique_temp_dir(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "pipeshell_exec_{}_{}_{}",
            tag,
            std::process::id(),
            nanos
        ));
        fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn empty_pipeline_is_a_no_op() {
        assert_eq!(run_pipeline(&Pipeline::default()).unwrap(), 0);
    }

    #[test]
    #[cfg(unix)]
    fn exit_code_of_single_command() {
        assert_eq!(run("sh -c 'exit 0'"), 0);
        assert_eq!(run("sh -c 'exit 7'"), 7);
    }

    #[test]
    #[cfg(unix)]
    fn signal_termination_is_128_plus_signo() {
        // SIGTERM is 15.
        assert_eq!(run("sh -c 'kill -TERM $$'"), 143);
    }

    #[test]
    #[cfg(unix)]
    fn unknown_program_reports_127() {
        assert_eq!(run("surely_not_a_real_program_314159"), 127);
    }

    #[test]
    #[cfg(unix)]
    fn status_comes_from_the_last_command_only() {
        assert_eq!(run("sh -c 'exit 3' | sh -c 'exit 0'"), 0);
        assert_eq!(run("sh -c 'exit 0' | sh -c 'exit 5'"), 5);
        assert_eq!(run("echo hi | surely_not_a_real_program_314159"), 127);
    }

    #[test]
    #[cfg(unix)]
    fn failed_early_command_does_not_wedge_the_pipeline() {
        // The missing program's children exit 127; the last stage sees
        // immediate end-of-file and the pipeline still completes.
        assert_eq!(run("surely_not_a_real_program_314159 | cat"), 0);
    }

    #[test]
    #[cfg(unix)]
    fn pipe_carries_bytes_to_redirected_output() {
        let dir = make_unique_temp_dir("pipe");
        let out = dir.join("out.txt");
        let line = format!("echo hello | cat > {}", out.display());
        assert_eq!(run(&line), 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "hello\n");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    #[cfg(unix)]
    fn output_redirection_truncates_and_appends() {
        let dir = make_unique_temp_dir("redir");
        let log = dir.join("log.txt");

        assert_eq!(run(&format!("echo one > {}", log.display())), 0);
        assert_eq!(run(&format!("echo two >> {}", log.display())), 0);
        assert_eq!(fs::read_to_string(&log).unwrap(), "one\ntwo\n");

        assert_eq!(run(&format!("echo three > {}", log.display())), 0);
        assert_eq!(fs::read_to_string(&log).unwrap(), "three\n");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    #[cfg(unix)]
    fn created_files_have_mode_0644() {
        use std::os::unix::fs::PermissionsExt;
        let dir = make_unique_temp_dir("mode");
        let out = dir.join("out.txt");
        assert_eq!(run(&format!("echo x > {}", out.display())), 0);
        let mode = fs::metadata(&out).unwrap().permissions().mode() & 0o777;
        // The umask may clear bits but never adds any.
        assert_eq!(mode & !0o644, 0);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    #[cfg(unix)]
    fn input_redirection_feeds_the_command() {
        let dir = make_unique_temp_dir("input");
        let src = dir.join("in.txt");
        let dst = dir.join("out.txt");
        fs::write(&src, "payload\n").unwrap();
        let line = format!("cat < {} > {}", src.display(), dst.display());
        assert_eq!(run(&line), 0);
        assert_eq!(fs::read_to_string(&dst).unwrap(), "payload\n");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    #[cfg(unix)]
    fn missing_input_file_fails_the_child() {
        let dir = make_unique_temp_dir("missing");
        let line = format!("cat < {}", dir.join("absent.txt").display());
        assert_eq!(run(&line), 1);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    #[cfg(unix)]
    fn file_redirection_overrides_pipe_wiring() {
        let dir = make_unique_temp_dir("override");
        let src = dir.join("in.txt");
        let dst = dir.join("out.txt");
        fs::write(&src, "from-file\n").unwrap();
        // The second stage reads the file, not the pipe.
        let line = format!("echo from-pipe | cat < {} > {}", src.display(), dst.display());
        assert_eq!(run(&line), 0);
        assert_eq!(fs::read_to_string(&dst).unwrap(), "from-file\n");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    #[cfg(unix)]
    fn background_pipeline_returns_immediately() {
        let started = Instant::now();
        assert_eq!(run("sleep 2 &"), 0);
        assert!(started.elapsed().as_secs() < 2);
    }

    #[test]
    #[cfg(unix)]
    fn foreground_cell_is_clear_after_a_run() {
        let _guard = test_support::serial();
        let pipeline = parse_line("sh -c 'exit 0'").unwrap();
        assert_eq!(run_pipeline(&pipeline).unwrap(), 0);
        assert_eq!(crate::signal::foreground_pgid(), 0);
    }

    #[test]
    #[cfg(unix)]
    fn interrupt_mid_pipeline_forwards_to_the_group() {
        let _guard = test_support::serial();
        crate::signal::install().unwrap();

        let worker = std::thread::spawn(|| {
            let pipeline = parse_line("sleep 5").unwrap();
            run_pipeline(&pipeline).unwrap()
        });

        // Wait for the executor to publish the foreground group.
        let deadline = Instant::now() + Duration::from_secs(5);
        while crate::signal::foreground_pgid() == 0 {
            assert!(
                Instant::now() < deadline,
                "pipeline never published a foreground group"
            );
            std::thread::sleep(Duration::from_millis(10));
        }
        // Let the child reach its execv so the default SIGINT disposition
        // is back in place before the interrupt lands.
        std::thread::sleep(Duration::from_millis(100));

        // Delivered to this process; the installed handler forwards it to
        // the foreground group, where it kills the sleeper.
        raise(Signal::SIGINT).unwrap();

        let status = worker.join().unwrap();
        assert_eq!(status, 128 + Signal::SIGINT as i32);
    }
}
