//! Unix Domain Socket transport
//!
//! Newline-delimited JSON frames `{"origin", "target", "data"}`. The socket is
//! local IPC, so the origin a peer declares in its frames is taken as given.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Message, Port, TransportError};
use crate::origin::{Origin, TargetOrigin};

/// Maximum frame size (64KB)
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Get the default socket path for the hub
pub fn get_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("crosshub")
        .join("hub.sock")
}

/// Bind the hub socket at `socket_path`
///
/// A socket file left behind by an earlier hub is replaced.
pub fn create_listener_at(socket_path: &Path) -> Result<UnixListener, TransportError> {
    if let Some(dir) = socket_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    if remove_socket_file(socket_path)? {
        debug!(?socket_path, "create_listener_at: replaced leftover socket");
    }

    let listener = UnixListener::bind(socket_path)?;
    debug!(?socket_path, "create_listener_at: listening");
    Ok(listener)
}

/// Remove the socket file on shutdown
pub fn cleanup_socket(socket_path: &Path) {
    match remove_socket_file(socket_path) {
        Ok(removed) => debug!(?socket_path, removed, "cleanup_socket: done"),
        Err(e) => warn!(?socket_path, error = %e, "cleanup_socket: could not remove socket file"),
    }
}

/// Returns whether a file was there to remove
fn remove_socket_file(socket_path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(socket_path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    origin: Origin,
    target: TargetOrigin,
    data: String,
}

/// One end of a socket connection
pub struct SocketPort {
    origin: Origin,
    reader: BufReader<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
}

impl SocketPort {
    /// Connect to a hub socket, sending as `origin`
    pub async fn connect(socket_path: &Path, origin: Origin) -> Result<Self, TransportError> {
        debug!(?socket_path, %origin, "SocketPort::connect: called");
        let stream = UnixStream::connect(socket_path).await?;
        Ok(Self::from_stream(stream, origin))
    }

    /// Wrap an accepted or connected stream
    pub fn from_stream(stream: UnixStream, origin: Origin) -> Self {
        let (read, write) = stream.into_split();
        Self {
            origin,
            reader: BufReader::new(read),
            writer: Mutex::new(write),
        }
    }
}

#[async_trait]
impl Port for SocketPort {
    fn origin(&self) -> &Origin {
        &self.origin
    }

    async fn send(&self, data: String, target: &TargetOrigin) -> Result<(), TransportError> {
        let frame = Frame {
            origin: self.origin.clone(),
            target: target.clone(),
            data,
        };
        let json = serde_json::to_string(&frame).map_err(|e| TransportError::Frame(e.to_string()))?;
        if json.len() > MAX_FRAME_SIZE {
            return Err(TransportError::Frame(format!("Frame too large: {} bytes", json.len())));
        }

        let mut writer = self.writer.lock().await;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Message> {
        loop {
            let line = match read_frame(&mut self.reader).await {
                Ok(FrameRead::Line(line)) => line,
                Ok(FrameRead::Oversized) => {
                    warn!(limit = MAX_FRAME_SIZE, "SocketPort::recv: dropping oversized frame");
                    continue;
                }
                Ok(FrameRead::Eof) => return None,
                Err(e) => {
                    debug!(error = %e, "SocketPort::recv: read failed, closing");
                    return None;
                }
            };

            let frame: Frame = match serde_json::from_slice(line.trim_ascii()) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(error = %e, "SocketPort::recv: dropping unparsable frame");
                    continue;
                }
            };

            if !frame.target.accepts(&self.origin) {
                debug!(target = %frame.target, origin = %self.origin, "SocketPort::recv: dropping frame for other origin");
                continue;
            }

            return Some(Message::new(frame.origin, frame.data));
        }
    }
}

enum FrameRead {
    Line(Vec<u8>),
    Oversized,
    Eof,
}

/// Read one newline-terminated frame without buffering more than the cap
///
/// An oversized frame is consumed up to its newline in cap-sized chunks and
/// reported as [`FrameRead::Oversized`].
async fn read_frame(reader: &mut BufReader<OwnedReadHalf>) -> std::io::Result<FrameRead> {
    let limit = MAX_FRAME_SIZE as u64 + 1;
    let mut buf = Vec::new();
    if (&mut *reader).take(limit).read_until(b'\n', &mut buf).await? == 0 {
        return Ok(FrameRead::Eof);
    }
    if buf.ends_with(b"\n") || buf.len() <= MAX_FRAME_SIZE {
        return Ok(FrameRead::Line(buf));
    }

    loop {
        buf.clear();
        let read = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;
        if read == 0 || buf.ends_with(b"\n") {
            return Ok(FrameRead::Oversized);
        }
    }
}
