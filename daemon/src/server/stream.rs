//! Receiving side of the DEPLOY / CONFIGURE content stream.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use sand_common::{Reply, StreamHeader};

use crate::domain::SessionError;
use crate::server::session::Session;

/// Files that must hold a well-formed XML document.
const XML_EXTENSIONS: [&str; 2] = ["xml", "conf"];

/// Writes the units of one stream below `root`.
pub struct DeployReceiver<'a> {
    root: &'a Path,
    cursor: PathBuf,
}

impl<'a> DeployReceiver<'a> {
    #[must_use]
    pub fn new(root: &'a Path) -> Self {
        Self {
            root,
            cursor: root.to_path_buf(),
        }
    }

    /// Receive units until `COMPLETE`, acknowledging each with `OK`.
    ///
    /// On failure a single `ERROR` line is sent (unless the peer is gone) and
    /// the error is returned. Units already written stay on disk.
    ///
    /// # Errors
    ///
    /// The first unit failure.
    pub async fn receive<S>(&mut self, session: &mut Session<S>) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        loop {
            match self.receive_unit(session).await {
                Ok(done) => {
                    session.send(&Reply::Ok).await?;
                    if done {
                        info!(root = %self.root.display(), "content stream complete");
                        return Ok(());
                    }
                }
                Err(e) => {
                    if let Some(reply) = failure_reply(&e) {
                        session.send(&reply).await?;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Handle one unit; `Ok(true)` on `COMPLETE`.
    async fn receive_unit<S>(&mut self, session: &mut Session<S>) -> Result<bool, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let line = session.read_line().await?;
        match StreamHeader::parse(&line)? {
            StreamHeader::Directory(path) => {
                let dir = self.root.join(path);
                tokio::fs::create_dir_all(&dir).await?;
                debug!(dir = %dir.display(), "directory ready");
                self.cursor = dir;
                Ok(false)
            }
            StreamHeader::File { name, length } => {
                let content = session.read_bytes(length).await?;
                let target = self.cursor.join(name);
                if is_xml(&target) {
                    check_xml(&target, &content)?;
                }
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&target, &content).await?;
                debug!(file = %target.display(), length, "file written");
                Ok(false)
            }
            StreamHeader::Complete => Ok(true),
        }
    }
}

fn is_xml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| XML_EXTENSIONS.contains(&ext))
}

fn check_xml(path: &Path, content: &[u8]) -> Result<(), SessionError> {
    let invalid = |reason: String| SessionError::Xml {
        file: path.file_name().map(PathBuf::from).unwrap_or_default(),
        reason,
    };
    let text = std::str::from_utf8(content).map_err(|e| invalid(e.to_string()))?;
    roxmltree::Document::parse(text).map_err(|e| invalid(e.to_string()))?;
    Ok(())
}

/// The line answered for a failed unit; `None` when nobody is listening.
fn failure_reply(err: &SessionError) -> Option<Reply> {
    match err {
        SessionError::PeerClosed | SessionError::Shutdown => None,
        SessionError::Timeout(_) => Some(Reply::error("timeout when reading flow")),
        SessionError::Protocol(_) => Some(Reply::error("bad instruction")),
        SessionError::Xml { .. } => Some(Reply::error(err.to_string())),
        SessionError::Io(_) => Some(Reply::error("cannot create directory or file")),
    }
}
