//! Single-instance rendezvous.
//!
//! A Unix datagram socket in the profile directory. A new invocation first
//! tries to hand its URIs to the running instance as a JSON datagram
//! `["new-tab", [uri, ...]]`; when nobody is listening the stale socket file
//! is removed and the new process binds it instead.

use std::fs;
use std::io::{self, ErrorKind};
use std::os::unix::net::UnixDatagram as StdDatagram;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tokio::net::UnixDatagram;

const MAX_DATAGRAM: usize = 64 * 1024;
const NEW_TAB: &str = "new-tab";

/// Result of claiming the rendezvous.
pub enum Rendezvous {
    /// Another instance accepted the URIs.
    Forwarded,
    /// This process is now the running instance.
    Bound(InstanceSocket),
}

pub struct InstanceSocket {
    path: PathBuf,
    socket: UnixDatagram,
}

/// Encode a `new-tab` request.
pub fn encode_request(uris: &[String]) -> Vec<u8> {
    serde_json::to_vec(&(NEW_TAB, uris)).unwrap_or_default()
}

/// Decode a datagram; anything but a well-formed `new-tab` request is `None`.
pub fn parse_request(bytes: &[u8]) -> Option<Vec<String>> {
    let (signal, uris): (String, Vec<String>) = serde_json::from_slice(bytes).ok()?;
    (signal == NEW_TAB).then_some(uris)
}

impl InstanceSocket {
    /// Forward `uris` to a running instance, or become it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(path: &Path, uris: &[String]) -> io::Result<Rendezvous> {
        if path.exists() {
            let client = StdDatagram::unbound()?;
            match client.send_to(&encode_request(uris), path) {
                Ok(_) => {
                    info!("Handed {} uris to the running instance", uris.len());
                    return Ok(Rendezvous::Forwarded);
                }
                Err(e) if matches!(e.kind(), ErrorKind::ConnectionRefused | ErrorKind::NotFound) => {
                    warn!("Removing stale socket {}", path.display());
                    fs::remove_file(path)?;
                }
                Err(e) => return Err(e),
            }
        }

        let socket = UnixDatagram::bind(path)?;
        info!("Listening on {}", path.display());
        Ok(Rendezvous::Bound(InstanceSocket {
            path: path.to_path_buf(),
            socket,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the next datagram. Malformed ones yield `Ok(None)`.
    pub async fn recv(&self) -> io::Result<Option<Vec<String>>> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let len = self.socket.recv(&mut buf).await?;
        let request = parse_request(&buf[..len]);
        if request.is_none() {
            debug!("Ignoring malformed datagram ({} bytes)", len);
        }
        Ok(request)
    }

    /// Stop listening and remove the socket file.
    pub fn close(self) {
        drop(self.socket);
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Can't remove {}: {}", self.path.display(), e);
            }
        }
    }
}
