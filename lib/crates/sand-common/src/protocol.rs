//! Line-oriented command protocol spoken between the manager and a host daemon.
//!
//! Every exchange is newline-terminated ASCII. The manager sends one
//! instruction word per connection and the daemon answers with exactly one
//! reply line, except during the streaming sub-protocol where it acknowledges
//! every unit.

use std::fmt;

use thiserror::Error;

/// Default TCP port the daemon command server listens on.
pub const DEFAULT_COMMAND_PORT: u16 = 3141;

/// Keyword introducing the command line that follows a `TEST` instruction.
pub const COMMAND_KEYWORD: &str = "COMMAND";

/// Errors raised while parsing protocol lines.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("bad instruction {0}")]
    BadInstruction(String),

    #[error("missing command after COMMAND")]
    EmptyCommand,

    #[error("cannot split command line: {0}")]
    Unparseable(String),
}

/// First line of a manager session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Deploy,
    Configure,
    Start,
    Stop,
    Test,
    /// Anything else; keeps the trimmed text for the error reply.
    Unknown(String),
}

impl Instruction {
    /// Parse a received line. Surrounding whitespace is ignored, the keyword
    /// itself must match exactly.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "DEPLOY" => Self::Deploy,
            "CONFIGURE" => Self::Configure,
            "START" => Self::Start,
            "STOP" => Self::Stop,
            "TEST" => Self::Test,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// The keyword as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Deploy => "DEPLOY",
            Self::Configure => "CONFIGURE",
            Self::Start => "START",
            Self::Stop => "STOP",
            Self::Test => "TEST",
            Self::Unknown(text) => text,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Error(String),
    /// Exit code of a `TEST` command.
    ExitCode(i32),
}

impl Reply {
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    #[must_use]
    pub fn unknown_command(text: &str) -> Self {
        Self::Error(format!("unknown command '{text}'"))
    }

    /// Render the reply including its trailing newline.
    #[must_use]
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }

    /// Parse a reply line received by a client.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line == "OK" {
            return Some(Self::Ok);
        }
        if let Some(message) = line.strip_prefix("ERROR ") {
            return Some(Self::Error(message.to_string()));
        }
        line.parse().ok().map(Self::ExitCode)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("OK"),
            Self::Error(message) => write!(f, "ERROR {message}"),
            Self::ExitCode(code) => write!(f, "{code}"),
        }
    }
}

/// The `COMMAND <shell-words>` line following a `TEST` instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRequest {
    /// Command line as received, without the keyword.
    pub command_line: String,
    /// Shell-split argument vector; never empty.
    pub argv: Vec<String>,
}

impl TestRequest {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        let (instr, rest) = line.split_once(' ').unwrap_or((line, ""));
        if instr != COMMAND_KEYWORD {
            return Err(ProtocolError::BadInstruction(instr.to_string()));
        }
        let argv =
            shell_words::split(rest).map_err(|e| ProtocolError::Unparseable(e.to_string()))?;
        if argv.is_empty() {
            return Err(ProtocolError::EmptyCommand);
        }
        Ok(Self {
            command_line: rest.trim().to_string(),
            argv,
        })
    }

    /// Program to execute.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    /// Arguments after the program.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }
}
