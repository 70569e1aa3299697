//! Message channel between the UI process and a renderer process.
//!
//! Messages are newline-delimited JSON over a byte pipe (the renderer
//! child's stdin/stdout). Delivery is FIFO per pipe. A peer that has gone
//! away shows up as [`ChannelError::BrokenChannel`] on either side.

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::types::errors::ChannelError;

/// Result of a readiness callback: keep the source registered or drop it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watch {
    Continue,
    /// The callback already cleaned up after its source.
    Stop,
}

impl Watch {
    pub fn keep_watching(self) -> bool {
        matches!(self, Watch::Continue)
    }
}

impl From<bool> for Watch {
    fn from(keep: bool) -> Self {
        if keep {
            Watch::Continue
        } else {
            Watch::Stop
        }
    }
}

/// Encode one message as a single line, trailing newline included.
pub fn encode<T: Serialize>(message: &T) -> Result<String, ChannelError> {
    let mut line =
        serde_json::to_string(message).map_err(|e| ChannelError::Encode(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// Decode one line (with or without its newline).
pub fn decode<T: DeserializeOwned>(line: &str) -> Result<T, ChannelError> {
    serde_json::from_str(line.trim_end()).map_err(|e| ChannelError::Decode(e.to_string()))
}

/// Receiving end of a channel.
pub struct MessageReader<R> {
    inner: R,
    line: String,
}

impl<R: AsyncBufRead + Unpin> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line: String::new(),
        }
    }

    /// Wait for the next message.
    ///
    /// Returns `Ok(None)` once the peer has closed its end cleanly. Blank
    /// lines are skipped.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ChannelError> {
        loop {
            self.line.clear();
            let read = self.inner.read_line(&mut self.line).await?;
            if read == 0 {
                return Ok(None);
            }
            if self.line.trim().is_empty() {
                continue;
            }
            return decode(&self.line).map(Some);
        }
    }

    /// Like [`recv`](Self::recv), but logs and skips undecodable lines and
    /// folds end-of-stream into `BrokenChannel`.
    pub async fn recv_lenient<T: DeserializeOwned>(&mut self) -> Result<T, ChannelError> {
        loop {
            match self.recv().await {
                Ok(Some(message)) => return Ok(message),
                Ok(None) => return Err(ChannelError::BrokenChannel),
                Err(ChannelError::Decode(msg)) => {
                    warn!("Dropping undecodable message: {}", msg);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Sending end of a channel.
pub struct MessageWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write one message and flush it.
    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), ChannelError> {
        let line = encode(message)?;
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.flush().await?;
        debug!("sent {} bytes", line.len());
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
