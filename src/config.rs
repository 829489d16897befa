use std::env;
use std::path::PathBuf;

use clap::Parser;

/// Environment variable holding the log filter, checked before `RUST_LOG`.
pub const LOG_ENV: &str = "MSH_LOG";

/// A small command shell with redirection and background commands.
#[derive(Debug, Parser)]
#[command(name = "msh-rs", version)]
pub struct Cli {
    /// Run the commands in this file, one per line, instead of prompting.
    pub batch_file: Option<PathBuf>,

    /// Never emit ANSI color sequences (also set by NO_COLOR).
    #[arg(long)]
    pub no_color: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Color is still only used when standard output is a terminal.
    pub color: bool,
}

impl Cli {
    pub fn settings(&self) -> Settings {
        Settings {
            color: !self.no_color && env::var_os("NO_COLOR").is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use std::path::PathBuf;

    use super::Cli;

    #[test]
    fn test_parse_arguments() -> Result<(), clap::Error> {
        let cli = Cli::try_parse_from(["msh-rs"])?;
        assert_eq!(cli.batch_file, None);
        assert!(!cli.no_color);

        let cli = Cli::try_parse_from(["msh-rs", "--no-color", "script.txt"])?;
        assert_eq!(cli.batch_file, Some(PathBuf::from("script.txt")));
        assert!(!cli.settings().color);

        assert!(Cli::try_parse_from(["msh-rs", "a", "b"]).is_err());
        Ok(())
    }
}
