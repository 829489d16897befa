use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::raw::c_char;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd};
use std::ptr::null;

use libc::{
    c_int, close, dup2, execvp, fcntl, fork, pid_t, pipe, setpgid, waitpid, FD_CLOEXEC, F_SETFD,
    STDIN_FILENO, STDOUT_FILENO, WNOHANG,
};
use thiserror::Error;
use tracing::{debug, trace};

use crate::builtins::{Builtin, Streams};
use crate::config::Settings;
use crate::parser::{Command, Redirections};
use crate::sig;
use crate::sys::{self, describe, errno};

const EXIT_FAILURE: c_int = 1;
const EXIT_CANNOT_EXECUTE: c_int = 126;
const EXIT_NOT_FOUND: c_int = 127;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("fork failed: {0}")]
    Fork(#[source] io::Error),
    #[error("cannot create status pipe: {0}")]
    Pipe(#[source] io::Error),
    #[error("waitpid for {pid} failed: {source}")]
    Wait { pid: pid_t, source: io::Error },
    #[error("{0}: argument contains a NUL byte")]
    NulByte(String),
}

impl ExecutionError {
    /// Whether the shell can still launch further commands after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ExecutionError::NulByte(_))
    }

    fn last_os_error(make: fn(io::Error) -> ExecutionError) -> ExecutionError {
        make(io::Error::last_os_error())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitStatus {
    Exited(c_int),
    Signaled(c_int),
}

impl ExitStatus {
    fn from_raw(status: c_int) -> ExitStatus {
        if libc::WIFSIGNALED(status) {
            ExitStatus::Signaled(libc::WTERMSIG(status))
        } else {
            ExitStatus::Exited(libc::WEXITSTATUS(status))
        }
    }

    pub(crate) fn success(self) -> bool {
        self == ExitStatus::Exited(0)
    }
}

/// Step of the child's setup that failed before the command itself ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Input,
    Output,
    Exec,
}

impl Stage {
    fn from_byte(byte: u8) -> Option<Stage> {
        match byte {
            0 => Some(Stage::Input),
            1 => Some(Stage::Output),
            2 => Some(Stage::Exec),
            _ => None,
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Stage::Input => 0,
            Stage::Output => 1,
            Stage::Exec => 2,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// A child-safe builtin ran to completion in the child.
    Builtin(ExitStatus),
    /// An external program was exec'd and has terminated.
    External(ExitStatus),
    /// The child terminated before running the command.
    FailedToStart {
        stage: Stage,
        error_num: c_int,
        status: ExitStatus,
    },
    Background(pid_t),
}

/// What the child turns into once its streams are set up.
enum Program<'a> {
    Builtin(&'a Builtin),
    External {
        file: CString,
        // keeps the strings `pointers` refers to alive
        _argv: Vec<CString>,
        pointers: Vec<*const c_char>,
    },
}

impl<'a> Program<'a> {
    fn prepare(
        command: &Command,
        builtin: Option<&'a Builtin>,
    ) -> Result<Program<'a>, ExecutionError> {
        if let Some(builtin) = builtin {
            return Ok(Program::Builtin(builtin));
        }

        let argv = command
            .argv
            .iter()
            .map(|arg| CString::new(arg.as_bytes()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ExecutionError::NulByte(command.name().to_string()))?;
        let mut pointers: Vec<*const c_char> = argv.iter().map(|arg| arg.as_ptr()).collect();
        pointers.push(null());

        Ok(Program::External {
            file: argv[0].clone(),
            _argv: argv,
            pointers,
        })
    }
}

pub(crate) fn open_output(path: &str, append: bool) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).mode(0o644);
    if append {
        options.append(true);
    } else {
        options.truncate(true);
    }
    options.open(path)
}

fn set_cloexec(fd: c_int) -> Result<(), ExecutionError> {
    match unsafe { fcntl(fd, F_SETFD, FD_CLOEXEC) } {
        -1 => Err(ExecutionError::last_os_error(ExecutionError::Pipe)),
        _ => Ok(()),
    }
}

/// Pipe the child reports setup failures through. Both ends are close-on-exec,
/// so a successful exec shows up as end-of-file in the parent.
fn status_pipe() -> Result<(File, File), ExecutionError> {
    let mut filedes: [c_int; 2] = [-1, -1];

    if unsafe { pipe(filedes.as_mut_ptr()) } == -1 {
        return Err(ExecutionError::last_os_error(ExecutionError::Pipe));
    }
    let reader = unsafe { File::from_raw_fd(filedes[0]) };
    let writer = unsafe { File::from_raw_fd(filedes[1]) };
    set_cloexec(reader.as_raw_fd())?;
    set_cloexec(writer.as_raw_fd())?;

    Ok((reader, writer))
}

fn read_status(mut reader: File) -> Result<Option<(Stage, c_int)>, ExecutionError> {
    let mut report = Vec::with_capacity(5);
    reader
        .read_to_end(&mut report)
        .map_err(ExecutionError::Pipe)?;

    if report.len() < 5 {
        return Ok(None);
    }
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&report[1..5]);
    let error_num = c_int::from_ne_bytes(bytes);

    Ok(Stage::from_byte(report[0]).map(|stage| (stage, error_num)))
}

/// Forks and runs `command` in the child, either as the given child-safe
/// builtin or as an external program.
///
/// Redirections are applied in the child only; the shell's own standard
/// streams are never touched. Foreground commands are waited for, background
/// commands return their pid right away.
pub(crate) fn launch(
    command: &Command,
    builtin: Option<&Builtin>,
    settings: &Settings,
) -> Result<Outcome, ExecutionError> {
    let program = Program::prepare(command, builtin)?;
    let (reader, writer) = status_pipe()?;
    let streams_before = sys::standard_streams();

    // anything still buffered would otherwise be written twice
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();

    let pid = unsafe { fork() };
    match pid {
        -1 => Err(ExecutionError::last_os_error(ExecutionError::Fork)),
        0 => {
            drop(reader);
            run_child(command, &program, writer, settings)
        }
        _ => {
            drop(writer);
            if command.background {
                own_process_group(pid);
            }
            debug!(
                pid,
                command = command.name(),
                background = command.background,
                "forked"
            );

            let failure = read_status(reader)?;
            debug_assert_eq!(streams_before, sys::standard_streams());

            match failure {
                Some((stage, error_num)) => Ok(Outcome::FailedToStart {
                    stage,
                    error_num,
                    status: wait_foreground(pid)?,
                }),
                None if command.background => Ok(Outcome::Background(pid)),
                None => {
                    let status = wait_foreground(pid)?;
                    Ok(match program {
                        Program::Builtin(_) => Outcome::Builtin(status),
                        Program::External { .. } => Outcome::External(status),
                    })
                }
            }
        }
    }
}

/// Moves `pid` (0 for the calling process) into a new process group led by
/// itself. Both sides of the fork call this, so the group exists before either
/// the parent moves on or the child execs.
fn own_process_group(pid: pid_t) {
    if unsafe { setpgid(pid, 0) } == -1 {
        debug!(pid, error = %io::Error::last_os_error(), "setpgid failed");
    }
}

fn exit_child(code: c_int) -> ! {
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
    unsafe { libc::_exit(code) }
}

fn report_failure(mut writer: File, stage: Stage, error_num: c_int) {
    let mut report = [0u8; 5];
    report[0] = stage.to_byte();
    report[1..].copy_from_slice(&error_num.to_ne_bytes());
    let _ = writer.write_all(&report);
}

/// Makes `target` refer to `file` and closes the original descriptor.
fn redirect(file: File, target: c_int) -> io::Result<()> {
    let fd = file.into_raw_fd();
    if fd == target {
        // std opens files close-on-exec; keep this one across exec
        return match unsafe { fcntl(fd, F_SETFD, 0) } {
            -1 => Err(io::Error::last_os_error()),
            _ => Ok(()),
        };
    }

    let result = match unsafe { dup2(fd, target) } {
        -1 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    };
    unsafe { close(fd) };
    result
}

fn apply_redirections(redirections: &Redirections) -> Result<(), (Stage, String, io::Error)> {
    if let Some(path) = &redirections.input {
        File::open(path)
            .and_then(|file| redirect(file, STDIN_FILENO))
            .map_err(|error| (Stage::Input, path.clone(), error))?;
    }
    if let Some(path) = &redirections.output {
        open_output(path, redirections.append)
            .and_then(|file| redirect(file, STDOUT_FILENO))
            .map_err(|error| (Stage::Output, path.clone(), error))?;
    }
    Ok(())
}

/// Body of the forked child. Never returns into shell logic.
fn run_child(command: &Command, program: &Program<'_>, writer: File, settings: &Settings) -> ! {
    // leave the shell's group before SIGINT can reach a background child
    if command.background {
        own_process_group(0);
    }
    if let Err(error) = sig::restore_default(libc::SIGINT) {
        debug!(%error, "cannot restore SIGINT disposition");
    }

    if let Err((stage, path, error)) = apply_redirections(&command.redirections) {
        eprintln!("msh: {}: {}", path, error);
        report_failure(writer, stage, error.raw_os_error().unwrap_or(0));
        exit_child(EXIT_FAILURE);
    }

    match program {
        Program::Builtin(builtin) => {
            // the builtin has started; let the parent stop waiting on the pipe
            drop(writer);

            let stdin = io::stdin();
            let mut input = stdin.lock();
            let stdout = io::stdout();
            let mut output = stdout.lock();
            let mut streams = Streams {
                input: &mut input,
                output: &mut output,
                color: settings.color && sys::is_terminal(STDOUT_FILENO),
            };

            let code = match builtin.run(&command.argv, &mut streams) {
                Ok(_) => 0,
                Err(error) => {
                    eprintln!("msh: {}", error);
                    EXIT_FAILURE
                }
            };
            let _ = output.flush();
            exit_child(code)
        }
        Program::External { file, pointers, .. } => {
            unsafe { execvp(file.as_ptr(), pointers.as_ptr()) };

            let error_num = errno();
            let code = if error_num == libc::ENOENT {
                eprintln!("msh: {}: command not found", command.name());
                EXIT_NOT_FOUND
            } else {
                eprintln!("msh: {}: {}", command.name(), describe(error_num));
                EXIT_CANNOT_EXECUTE
            };
            report_failure(writer, Stage::Exec, error_num);
            exit_child(code)
        }
    }
}

/// Blocks until `pid` terminates. Other children are left alone.
pub(crate) fn wait_foreground(pid: pid_t) -> Result<ExitStatus, ExecutionError> {
    let mut status: c_int = 0;

    loop {
        if unsafe { waitpid(pid, &mut status, 0) } != -1 {
            break;
        }
        let source = io::Error::last_os_error();
        if source.kind() != io::ErrorKind::Interrupted {
            return Err(ExecutionError::Wait { pid, source });
        }
        trace!(pid, "waitpid interrupted, retrying");
    }

    let status = ExitStatus::from_raw(status);
    debug!(pid, ?status, "foreground child terminated");
    Ok(status)
}

/// Non-blocking check on a background child.
pub(crate) fn try_wait(pid: pid_t) -> Result<Option<ExitStatus>, ExecutionError> {
    let mut status: c_int = 0;

    match unsafe { waitpid(pid, &mut status, WNOHANG) } {
        -1 => Err(ExecutionError::Wait {
            pid,
            source: io::Error::last_os_error(),
        }),
        0 => Ok(None),
        _ => Ok(Some(ExitStatus::from_raw(status))),
    }
}
