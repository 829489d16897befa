use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use thiserror::Error;

const CYAN: &str = "\x1b[0;36m";
const RESET: &str = "\x1b[0m";
const CLEAR_SCREEN: &str = "\x1b[1;1H\x1b[2J";

#[derive(Debug, Error)]
pub enum BuiltinError {
    #[error("cd: {}: {}", .path.display(), .source)]
    ChangeDir { path: PathBuf, source: io::Error },
    #[error("cd: HOME not set")]
    NoHome,
    #[error("dir: {}: {}", .path.display(), .source)]
    ReadDir { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Where a built-in is allowed to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Capability {
    /// Only touches its own streams, so it may run in a forked child.
    ChildSafe,
    /// Changes state of the shell process itself.
    ParentOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Quit,
}

pub(crate) struct Streams<'a> {
    pub(crate) input: &'a mut dyn BufRead,
    pub(crate) output: &'a mut dyn Write,
    pub(crate) color: bool,
}

pub(crate) type Handler = fn(&[String], &mut Streams<'_>) -> Result<Flow, BuiltinError>;

pub(crate) struct Builtin {
    pub(crate) name: &'static str,
    pub(crate) capability: Capability,
    pub(crate) handler: Handler,
    usage: &'static str,
    summary: &'static str,
}

impl Builtin {
    pub(crate) fn run(
        &self,
        args: &[String],
        streams: &mut Streams<'_>,
    ) -> Result<Flow, BuiltinError> {
        (self.handler)(args, streams)
    }
}

static BUILTINS: [Builtin; 9] = [
    Builtin {
        name: "cd",
        capability: Capability::ParentOnly,
        handler: change_dir,
        usage: "cd [directory]",
        summary: "Change the current directory, $HOME when no directory is given.",
    },
    Builtin {
        name: "clr",
        capability: Capability::ChildSafe,
        handler: clear,
        usage: "clr",
        summary: "Clear the terminal screen.",
    },
    Builtin {
        name: "clear",
        capability: Capability::ChildSafe,
        handler: clear,
        usage: "clear",
        summary: "Same as clr.",
    },
    Builtin {
        name: "dir",
        capability: Capability::ChildSafe,
        handler: list_dir,
        usage: "dir [directory]",
        summary: "List the contents of a directory, the current one by default.",
    },
    Builtin {
        name: "echo",
        capability: Capability::ChildSafe,
        handler: echo,
        usage: "echo [text]",
        summary: "Display the given text.",
    },
    Builtin {
        name: "environ",
        capability: Capability::ParentOnly,
        handler: environ,
        usage: "environ",
        summary: "Display all environment variables.",
    },
    Builtin {
        name: "help",
        capability: Capability::ChildSafe,
        handler: help,
        usage: "help",
        summary: "Display this help information.",
    },
    Builtin {
        name: "pause",
        capability: Capability::ParentOnly,
        handler: pause,
        usage: "pause",
        summary: "Pause the shell until Enter is pressed.",
    },
    Builtin {
        name: "quit",
        capability: Capability::ParentOnly,
        handler: quit,
        usage: "quit",
        summary: "Exit the shell.",
    },
];

pub(crate) fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|builtin| builtin.name == name)
}

fn change_dir(args: &[String], _streams: &mut Streams<'_>) -> Result<Flow, BuiltinError> {
    let target = match args.get(1) {
        Some(dir) => PathBuf::from(dir),
        None => env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or(BuiltinError::NoHome)?,
    };

    env::set_current_dir(&target).map_err(|source| BuiltinError::ChangeDir {
        path: target.clone(),
        source,
    })?;
    env::set_var("PWD", env::current_dir()?);

    Ok(Flow::Continue)
}

fn clear(_args: &[String], streams: &mut Streams<'_>) -> Result<Flow, BuiltinError> {
    streams.output.write_all(CLEAR_SCREEN.as_bytes())?;
    streams.output.flush()?;
    Ok(Flow::Continue)
}

fn list_dir(args: &[String], streams: &mut Streams<'_>) -> Result<Flow, BuiltinError> {
    let path = PathBuf::from(args.get(1).map(String::as_str).unwrap_or("."));
    let read_dir_error = |source: io::Error| BuiltinError::ReadDir {
        path: path.clone(),
        source,
    };

    let mut names = Vec::new();
    for entry in fs::read_dir(&path).map_err(read_dir_error)? {
        let entry = entry.map_err(read_dir_error)?;
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false) {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();

    for name in names {
        writeln!(streams.output, "{}", name)?;
    }
    Ok(Flow::Continue)
}

fn echo(args: &[String], streams: &mut Streams<'_>) -> Result<Flow, BuiltinError> {
    let text = args[1..].join(" ");
    if streams.color {
        writeln!(streams.output, "{}{}{}", CYAN, text, RESET)?;
    } else {
        writeln!(streams.output, "{}", text)?;
    }
    Ok(Flow::Continue)
}

fn environ(_args: &[String], streams: &mut Streams<'_>) -> Result<Flow, BuiltinError> {
    for (key, value) in env::vars_os() {
        writeln!(
            streams.output,
            "{}={}",
            key.to_string_lossy(),
            value.to_string_lossy()
        )?;
    }
    writeln!(streams.output)?;
    Ok(Flow::Continue)
}

fn help(_args: &[String], streams: &mut Streams<'_>) -> Result<Flow, BuiltinError> {
    writeln!(streams.output, "\nMy Shell Help Manual")?;
    writeln!(streams.output, "--------------------")?;
    for builtin in BUILTINS.iter() {
        writeln!(streams.output, "{:<17}: {}", builtin.usage, builtin.summary)?;
    }
    writeln!(streams.output)?;
    writeln!(
        streams.output,
        "Any other name runs an external program found in $PATH."
    )?;
    writeln!(
        streams.output,
        "`< file` reads input from file, `> file` writes output to file, `>> file` appends."
    )?;
    writeln!(
        streams.output,
        "A trailing `&` runs the command in the background.\n"
    )?;
    Ok(Flow::Continue)
}

fn pause(_args: &[String], streams: &mut Streams<'_>) -> Result<Flow, BuiltinError> {
    writeln!(streams.output, "Pausing, press enter to continue\n")?;
    streams.output.flush()?;
    streams.input.read_line(&mut String::new())?;
    Ok(Flow::Continue)
}

fn quit(_args: &[String], _streams: &mut Streams<'_>) -> Result<Flow, BuiltinError> {
    Ok(Flow::Quit)
}
