//! Slash commands understood by a session.

use std::fmt::{self, Display};

use steward_core::OutputMode;

/// A parsed slash command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// `/help`
    Help,
    /// `/clear`
    Clear,
    /// `/config`
    Config,
    /// `/thread [id]`
    Thread(Option<String>),
    /// `/history`
    History,
    /// `/stream [on|off]`
    Stream(Option<OutputMode>),
    /// `/exit`
    Exit,
}

/// Why a line could not be parsed as a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// The command name is not known.
    Unknown(String),
    /// The command does not accept these arguments.
    InvalidArgument {
        /// The command name.
        command: &'static str,
        /// What was wrong.
        reason: String,
    },
}

impl Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Unknown(name) => {
                write!(f, "unknown command `/{name}`, type /help for the list")
            }
            ParseError::InvalidArgument { command, reason } => {
                write!(f, "/{command}: {reason}")
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Lines starting with this are commands.
pub const COMMAND_PREFIX: char = '/';

/// The help text listing every command.
pub const HELP: &str = "\
/help            show this help
/clear           clear the screen
/config          show the model, sampling options, tools and session state
/thread [id]     show the current thread, or switch to another one
/history         show the last messages of the current thread
/stream [on|off] show or change whether steps are printed as they happen
/exit            quit";

impl Command {
    /// Parses `line`. Returns `None` if the line is not a command.
    pub fn parse(line: &str) -> Option<Result<Self, ParseError>> {
        let line = line.trim().strip_prefix(COMMAND_PREFIX)?;
        let mut words = line.split_whitespace();
        let name = words.next().unwrap_or_default();
        let args: Vec<_> = words.collect();

        let command = match name.to_ascii_lowercase().as_str() {
            "help" | "h" | "?" => no_args("help", &args).map(|_| Command::Help),
            "clear" => no_args("clear", &args).map(|_| Command::Clear),
            "config" => no_args("config", &args).map(|_| Command::Config),
            "history" => no_args("history", &args).map(|_| Command::History),
            "exit" | "quit" | "q" => no_args("exit", &args).map(|_| Command::Exit),
            "thread" => match args[..] {
                [] => Ok(Command::Thread(None)),
                [id] => Ok(Command::Thread(Some(id.to_owned()))),
                _ => Err(ParseError::InvalidArgument {
                    command: "thread",
                    reason: "thread ids cannot contain spaces".to_owned(),
                }),
            },
            "stream" => match args[..] {
                [] => Ok(Command::Stream(None)),
                [mode] => mode
                    .parse()
                    .map(|mode| Command::Stream(Some(mode)))
                    .map_err(|reason| ParseError::InvalidArgument {
                        command: "stream",
                        reason,
                    }),
                _ => Err(ParseError::InvalidArgument {
                    command: "stream",
                    reason: "expected `on` or `off`".to_owned(),
                }),
            },
            _ => Err(ParseError::Unknown(name.to_owned())),
        };
        Some(command)
    }
}

fn no_args(command: &'static str, args: &[&str]) -> Result<(), ParseError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(ParseError::InvalidArgument {
            command,
            reason: "takes no arguments".to_owned(),
        })
    }
}
