//! Line-oriented I/O on one manager connection.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sand_common::{ProtocolError, Reply};

use crate::domain::SessionError;

/// Largest file accepted in one `FILE` unit.
pub const MAX_UNIT_LEN: u64 = 64 * 1024 * 1024;

/// Longest command or header line, newline included.
pub const MAX_LINE_LEN: u64 = 4096;

pub struct Session<S> {
    stream: BufReader<S>,
    read_timeout: Duration,
    cancel: CancellationToken,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Session<S> {
    #[must_use]
    pub fn new(stream: S, read_timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(stream),
            read_timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Abandon pending reads with `Shutdown` once `cancel` fires.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Read one line, trimmed. Bytes that are not UTF-8 are replaced, so
    /// garbage still reaches the dispatcher as an unknown command.
    ///
    /// # Errors
    ///
    /// `Timeout` when nothing arrives in time, `PeerClosed` on end of stream
    /// or an empty line, a bad instruction when the line exceeds
    /// [`MAX_LINE_LEN`], `Shutdown` when the daemon stops meanwhile.
    pub async fn read_line(&mut self) -> Result<String, SessionError> {
        let mut raw = Vec::new();
        let read = guarded(
            &self.cancel,
            self.read_timeout,
            (&mut self.stream).take(MAX_LINE_LEN).read_until(b'\n', &mut raw),
        )
        .await?;
        if read == 0 {
            return Err(SessionError::PeerClosed);
        }
        if raw.last() != Some(&b'\n') && raw.len() as u64 == MAX_LINE_LEN {
            return Err(ProtocolError::BadInstruction(format!(
                "line longer than {MAX_LINE_LEN} bytes"
            ))
            .into());
        }
        let line = String::from_utf8_lossy(&raw);
        let line = line.trim();
        if line.is_empty() {
            return Err(SessionError::PeerClosed);
        }
        debug!(line, "received");
        Ok(line.to_string())
    }

    /// Read exactly `len` raw bytes.
    ///
    /// # Errors
    ///
    /// `Timeout` when the bytes do not arrive in time, `PeerClosed` when the
    /// stream ends early, a bad instruction when `len` is unreasonably large.
    pub async fn read_bytes(&mut self, len: u64) -> Result<Vec<u8>, SessionError> {
        if len > MAX_UNIT_LEN {
            return Err(ProtocolError::BadInstruction(format!("length {len}")).into());
        }
        let mut buf = vec![0; usize::try_from(len).unwrap_or_default()];
        let read = guarded(
            &self.cancel,
            self.read_timeout,
            self.stream.read_exact(&mut buf),
        )
        .await;
        match read {
            Err(SessionError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(SessionError::PeerClosed)
            }
            Err(e) => Err(e),
            Ok(_) => {
                debug!(len, "received raw content");
                Ok(buf)
            }
        }
    }

    /// Write one reply line.
    ///
    /// # Errors
    ///
    /// Fails when the peer is gone.
    pub async fn send(&mut self, reply: &Reply) -> Result<(), SessionError> {
        let writer = self.stream.get_mut();
        writer.write_all(reply.to_line().as_bytes()).await?;
        writer.flush().await?;
        debug!(reply = %reply, "sent");
        Ok(())
    }
}

/// Run `io` unless the read timeout or shutdown comes first.
async fn guarded<T>(
    cancel: &CancellationToken,
    limit: Duration,
    io: impl Future<Output = std::io::Result<T>>,
) -> Result<T, SessionError> {
    tokio::select! {
        () = cancel.cancelled() => Err(SessionError::Shutdown),
        read = timeout(limit, io) => {
            read.map_err(|_| SessionError::Timeout(limit))?.map_err(Into::into)
        }
    }
}
