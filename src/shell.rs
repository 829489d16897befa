use std::env;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use thiserror::Error;
use tracing::{debug, error};

use crate::builtins::{self, Builtin, BuiltinError, Capability, Flow, Streams};
use crate::config::Settings;
use crate::execution::{self, ExecutionError, ExitStatus, Outcome};
use crate::jobs::JobTable;
use crate::parser::{self, Command, ParseError};
use crate::sys;

const MAGENTA: &str = "\x1b[0;35m";
const RESET: &str = "\x1b[0m";

/// Errors that end the shell.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("line editor: {0}")]
    Editor(#[from] ReadlineError),
    #[error("cannot read batch file {}: {}", .path.display(), .source)]
    Batch { path: PathBuf, source: io::Error },
}

/// Errors that only fail the current command.
#[derive(Debug, Error)]
enum CommandError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("{path}: {source}")]
    Redirect { path: String, source: io::Error },
    #[error(transparent)]
    Builtin(#[from] BuiltinError),
}

pub struct Shell {
    settings: Settings,
    jobs: JobTable,
}

impl Shell {
    pub fn new(settings: Settings) -> Self {
        Shell {
            settings,
            jobs: JobTable::default(),
        }
    }

    /// Parses and runs one line. Only a failure to spawn is returned as an
    /// error; everything else is reported and the shell carries on.
    pub(crate) fn execute_line(&mut self, line: &str) -> Result<Flow, ShellError> {
        let command = match parser::parse(line) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(Flow::Continue),
            Err(err) => {
                report(&CommandError::from(err));
                return Ok(Flow::Continue);
            }
        };
        debug!(?command, "parsed");

        match builtins::lookup(command.name()) {
            Some(builtin) if builtin.capability == Capability::ParentOnly => {
                Ok(self.run_in_parent(builtin, &command))
            }
            builtin => match execution::launch(&command, builtin, &self.settings) {
                Ok(outcome) => {
                    self.record(&command, outcome);
                    Ok(Flow::Continue)
                }
                Err(err) if err.is_fatal() => {
                    error!(%err, "cannot launch commands any more");
                    Err(err.into())
                }
                Err(err) => {
                    eprintln!("msh: {}", err);
                    Ok(Flow::Continue)
                }
            },
        }
    }

    fn run_in_parent(&mut self, builtin: &Builtin, command: &Command) -> Flow {
        if command.background {
            debug!(
                name = builtin.name,
                "background marker ignored for parent-only builtin"
            );
        }
        match self.try_run_in_parent(builtin, command) {
            Ok(flow) => flow,
            Err(err) => {
                report(&err);
                Flow::Continue
            }
        }
    }

    /// Redirections are honoured by handing the builtin the opened files; the
    /// shell's own standard streams stay where they are.
    fn try_run_in_parent(
        &mut self,
        builtin: &Builtin,
        command: &Command,
    ) -> Result<Flow, CommandError> {
        let redirections = &command.redirections;
        let redirect_error = |path: &String| {
            let path = path.clone();
            move |source: io::Error| CommandError::Redirect { path, source }
        };

        let mut input: Box<dyn BufRead> = match &redirections.input {
            Some(path) => {
                let file = File::open(path).map_err(redirect_error(path))?;
                Box::new(BufReader::new(file))
            }
            None => Box::new(io::stdin().lock()),
        };
        let mut output: Box<dyn Write> = match &redirections.output {
            Some(path) => {
                let file = execution::open_output(path, redirections.append)
                    .map_err(redirect_error(path))?;
                Box::new(file)
            }
            None => Box::new(io::stdout()),
        };
        let color = redirections.output.is_none()
            && self.settings.color
            && sys::is_terminal(libc::STDOUT_FILENO);

        let flow = builtin.run(
            &command.argv,
            &mut Streams {
                input: &mut input,
                output: &mut output,
                color,
            },
        )?;
        output.flush().map_err(BuiltinError::from)?;
        Ok(flow)
    }

    fn record(&mut self, command: &Command, outcome: Outcome) {
        match outcome {
            Outcome::Background(pid) => {
                println!("[{}]", pid);
                self.jobs.add(pid, command.argv.join(" "));
            }
            Outcome::Builtin(status) | Outcome::External(status) => {
                debug!(
                    command = command.name(),
                    ?status,
                    success = status.success(),
                    "command finished"
                );
                if let ExitStatus::Signaled(signal) = status {
                    eprintln!(
                        "msh: {}: terminated by signal {}",
                        command.name(),
                        signal
                    );
                }
            }
            Outcome::FailedToStart {
                stage,
                error_num,
                status,
            } => {
                // the child has already printed its own diagnostic
                debug!(
                    command = command.name(),
                    ?stage,
                    error_num,
                    ?status,
                    "command failed to start"
                );
            }
        }
    }

    /// Prints a line for every background job that has finished since the
    /// last call.
    pub fn report_finished_jobs(&mut self) {
        for (job, status) in self.jobs.reap() {
            let state = match status {
                ExitStatus::Exited(0) => "Done".to_string(),
                ExitStatus::Exited(code) => format!("Exit {}", code),
                ExitStatus::Signaled(signal) => format!("Killed by signal {}", signal),
            };
            println!("[{}] {}\t{}", job.pid, state, job.command);
        }
    }

    pub fn run_interactive(&mut self) -> Result<(), ShellError> {
        let mut editor = DefaultEditor::new()?;

        println!("Now Running");
        if self.settings.color && sys::is_terminal(libc::STDOUT_FILENO) {
            println!("{}My Shell{}\n", MAGENTA, RESET);
        } else {
            println!("My Shell\n");
        }

        loop {
            self.report_finished_jobs();

            match editor.readline(&prompt()) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        let _ = editor.add_history_entry(line.as_str());
                    }
                    if self.execute_line(&line)? == Flow::Quit {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(err) => return Err(err.into()),
            }
        }

        self.leave();
        Ok(())
    }

    pub fn run_batch(&mut self, path: &Path) -> Result<(), ShellError> {
        let script = fs::read_to_string(path).map_err(|source| ShellError::Batch {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), lines = script.lines().count(), "running batch file");

        for line in script.lines() {
            self.report_finished_jobs();
            if self.execute_line(line)? == Flow::Quit {
                break;
            }
        }

        self.leave();
        Ok(())
    }

    fn leave(&mut self) {
        self.report_finished_jobs();
        debug!(
            running = self.jobs.len(),
            "leaving background jobs to the system"
        );
    }
}

fn prompt() -> String {
    match env::current_dir() {
        Ok(cwd) => format!("MS {} $~ ", cwd.display()),
        Err(_) => "MS $~ ".to_string(),
    }
}

fn report(err: &CommandError) {
    eprintln!("msh: {}", err);
}
