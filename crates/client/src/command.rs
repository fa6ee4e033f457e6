//! Interactive command parsing.

use std::str::FromStr;

/// A command typed at the client prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Upload(String),
    Download(String),
    List,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("wrong operation {0:?}, please try again")]
    UnknownOperation(String),

    #[error("{0} needs a file name")]
    MissingFileName(&'static str),
}

impl FromStr for Command {
    type Err = CommandError;

    /// Parses `<op> [file name]`. The file name is the rest of the line, so
    /// it may contain spaces.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (op, arg) = match line.split_once(char::is_whitespace) {
            Some((op, rest)) => (op, rest.trim()),
            None => (line, ""),
        };
        match op {
            "" => Err(CommandError::Empty),
            "upload" | "up" => file_arg(arg, "upload").map(Self::Upload),
            "download" | "down" => file_arg(arg, "download").map(Self::Download),
            "list" | "ls" => Ok(Self::List),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(CommandError::UnknownOperation(other.to_string())),
        }
    }
}

fn file_arg(arg: &str, op: &'static str) -> Result<String, CommandError> {
    if arg.is_empty() {
        Err(CommandError::MissingFileName(op))
    } else {
        Ok(arg.to_string())
    }
}
