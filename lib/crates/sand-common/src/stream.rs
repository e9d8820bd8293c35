//! Framing of the DEPLOY / CONFIGURE streaming sub-protocol.
//!
//! Each logical unit starts with one header line:
//!
//! ```text
//! DIRECTORY <relative path>
//! FILE <name> <length>        followed by exactly <length> raw bytes
//! COMPLETE
//! ```
//!
//! The receiver acknowledges every unit with `OK`, `COMPLETE` included.

use std::path::{Component, Path, PathBuf};

use crate::protocol::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamHeader {
    /// Create a directory and move the destination cursor into it.
    Directory(PathBuf),
    /// Raw file content of `length` bytes follows the header line.
    File { name: PathBuf, length: u64 },
    /// Sender is done.
    Complete,
}

impl StreamHeader {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        let mut words = line.split_whitespace();
        let keyword = words.next().unwrap_or_default();
        let header = match keyword {
            "DIRECTORY" => {
                let path = words.next().ok_or_else(|| bad(line))?;
                Self::Directory(relative_path(path)?)
            }
            "FILE" => {
                let name = words.next().ok_or_else(|| bad(line))?;
                let length = words
                    .next()
                    .and_then(|len| len.parse().ok())
                    .ok_or_else(|| bad(line))?;
                Self::File {
                    name: relative_path(name)?,
                    length,
                }
            }
            "COMPLETE" => Self::Complete,
            _ => return Err(bad(line)),
        };
        if words.next().is_some() {
            return Err(bad(line));
        }
        Ok(header)
    }

    /// Render the header line including its trailing newline.
    #[must_use]
    pub fn to_line(&self) -> String {
        match self {
            Self::Directory(path) => format!("DIRECTORY {}\n", path.display()),
            Self::File { name, length } => format!("FILE {} {length}\n", name.display()),
            Self::Complete => "COMPLETE\n".to_string(),
        }
    }
}

fn bad(line: &str) -> ProtocolError {
    ProtocolError::BadInstruction(line.to_string())
}

/// Only plain relative paths may travel on the wire; anything that could
/// escape the destination root is refused.
fn relative_path(raw: &str) -> Result<PathBuf, ProtocolError> {
    let path = Path::new(raw);
    let plain = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !plain || path.as_os_str().is_empty() {
        return Err(ProtocolError::BadInstruction(raw.to_string()));
    }
    Ok(path.to_path_buf())
}
