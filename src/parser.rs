// https://github.com/Geal/nom/blob/master/doc/choosing_a_combinator.md

use nom::{
    bytes::complete::{is_not, take_while, take_while1},
    multi::separated_list0,
    sequence::delimited,
    IResult,
};
use thiserror::Error;

const SEPARATORS: &str = " \t\n";
const BACKGROUND: &str = "&";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("syntax error: missing file name after `{0}`")]
    MissingFileName(&'static str),
    #[error("syntax error: missing command")]
    MissingCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Input,
    Output,
    Append,
}

impl Operator {
    fn from_token(token: &str) -> Option<Operator> {
        match token {
            "<" => Some(Operator::Input),
            ">" => Some(Operator::Output),
            ">>" => Some(Operator::Append),
            _ => None,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Operator::Input => "<",
            Operator::Output => ">",
            Operator::Append => ">>",
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Redirections {
    pub(crate) input: Option<String>,
    pub(crate) output: Option<String>,
    pub(crate) append: bool,
}

/// A command line with the background marker and redirections taken out.
///
/// `argv` is never empty; `argv[0]` is the command name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Command {
    pub(crate) argv: Vec<String>,
    pub(crate) background: bool,
    pub(crate) redirections: Redirections,
}

impl Command {
    pub(crate) fn name(&self) -> &str {
        &self.argv[0]
    }
}

fn is_separator(chr: char) -> bool {
    SEPARATORS.contains(chr)
}

fn tokens(input: &str) -> IResult<&str, Vec<&str>> {
    delimited(
        take_while(is_separator),
        separated_list0(take_while1(is_separator), is_not(SEPARATORS)),
        take_while(is_separator),
    )(input)
}

pub(crate) fn tokenize(line: &str) -> Vec<String> {
    match tokens(line) {
        Ok((_, tokens)) => tokens.into_iter().map(String::from).collect(),
        // every character is either a separator or part of a token
        Err(_) => Vec::new(),
    }
}

/// Removes the first `&` token. Returns whether one was found.
pub(crate) fn extract_background(tokens: &mut Vec<String>) -> bool {
    match tokens.iter().position(|token| token == BACKGROUND) {
        Some(index) => {
            tokens.remove(index);
            true
        }
        None => false,
    }
}

/// Removes every `<`, `>` and `>>` together with the file name following it.
///
/// A later output operator overrides an earlier one.
pub(crate) fn extract_redirections(tokens: &mut Vec<String>) -> Result<Redirections, ParseError> {
    let mut redirections = Redirections::default();
    let mut index = 0;

    while index < tokens.len() {
        let operator = match Operator::from_token(&tokens[index]) {
            Some(operator) => operator,
            None => {
                index += 1;
                continue;
            }
        };

        let file = match tokens.get(index + 1) {
            Some(file) if Operator::from_token(file).is_none() => file.clone(),
            _ => return Err(ParseError::MissingFileName(operator.symbol())),
        };
        tokens.drain(index..index + 2);

        match operator {
            Operator::Input => redirections.input = Some(file),
            Operator::Output | Operator::Append => {
                redirections.output = Some(file);
                redirections.append = operator == Operator::Append;
            }
        }
    }

    Ok(redirections)
}

/// Parses one input line. Blank lines yield `None`.
pub(crate) fn parse(line: &str) -> Result<Option<Command>, ParseError> {
    let mut argv = tokenize(line);
    if argv.is_empty() {
        return Ok(None);
    }

    let background = extract_background(&mut argv);
    let redirections = extract_redirections(&mut argv)?;
    if argv.is_empty() {
        return Err(ParseError::MissingCommand);
    }

    Ok(Some(Command {
        argv,
        background,
        redirections,
    }))
}

#[cfg(test)]
mod tests {
    use super::{ParseError, Redirections};

    fn owned(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|token| token.to_string()).collect()
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(super::tokenize("ls -l /tmp"), owned(&["ls", "-l", "/tmp"]));
        assert_eq!(
            super::tokenize("  \techo\t a  b \n"),
            owned(&["echo", "a", "b"])
        );
        assert_eq!(super::tokenize("echo a&b"), owned(&["echo", "a&b"]));
        assert!(super::tokenize("").is_empty());
        assert!(super::tokenize(" \t \n").is_empty());
    }

    #[test]
    fn test_extract_background() {
        let mut tokens = owned(&["sleep", "10", "&"]);
        assert!(super::extract_background(&mut tokens));
        assert_eq!(tokens, owned(&["sleep", "10"]));

        let mut tokens = owned(&["sleep", "&", "10"]);
        assert!(super::extract_background(&mut tokens));
        assert_eq!(tokens, owned(&["sleep", "10"]));

        let mut tokens = owned(&["echo", "a&", "&b"]);
        assert!(!super::extract_background(&mut tokens));
        assert_eq!(tokens, owned(&["echo", "a&", "&b"]));
    }

    #[test]
    fn test_extract_redirections() {
        let mut tokens = owned(&["sort", "<", "in.txt", ">", "out.txt", "-r"]);
        assert_eq!(
            super::extract_redirections(&mut tokens),
            Ok(Redirections {
                input: Some("in.txt".into()),
                output: Some("out.txt".into()),
                append: false,
            })
        );
        assert_eq!(tokens, owned(&["sort", "-r"]));

        let mut tokens = owned(&["echo", "hi", ">>", "log"]);
        assert_eq!(
            super::extract_redirections(&mut tokens),
            Ok(Redirections {
                input: None,
                output: Some("log".into()),
                append: true,
            })
        );
        assert_eq!(tokens, owned(&["echo", "hi"]));
    }

    #[test]
    fn test_last_output_redirection_wins() {
        let mut tokens = owned(&["echo", "x", ">", "a", ">>", "b"]);
        let redirections = super::extract_redirections(&mut tokens).unwrap();
        assert_eq!(redirections.output.as_deref(), Some("b"));
        assert!(redirections.append);

        let mut tokens = owned(&["echo", "x", ">>", "b", ">", "a"]);
        let redirections = super::extract_redirections(&mut tokens).unwrap();
        assert_eq!(redirections.output.as_deref(), Some("a"));
        assert!(!redirections.append);
        assert_eq!(tokens, owned(&["echo", "x"]));
    }

    #[test]
    fn test_dangling_operator() {
        assert_eq!(
            super::extract_redirections(&mut owned(&["echo", "hi", ">"])),
            Err(ParseError::MissingFileName(">"))
        );
        assert_eq!(
            super::extract_redirections(&mut owned(&["cat", "<", ">>", "x"])),
            Err(ParseError::MissingFileName("<"))
        );
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(super::parse("   "), Ok(None));

        let command = super::parse("sort < in > out &").unwrap().unwrap();
        assert_eq!(command.name(), "sort");
        assert_eq!(command.argv, owned(&["sort"]));
        assert!(command.background);
        assert_eq!(command.redirections.input.as_deref(), Some("in"));
        assert_eq!(command.redirections.output.as_deref(), Some("out"));

        assert_eq!(super::parse("> out"), Err(ParseError::MissingCommand));
        assert_eq!(super::parse("&"), Err(ParseError::MissingCommand));
        assert_eq!(
            super::parse("echo hi >> &"),
            Err(ParseError::MissingFileName(">>"))
        );
    }
}
