use std::path::PathBuf;

use socket2::{Domain, SockAddr, Socket, Type};

use wirecall_core::constants::DEFAULT_MAX_MESSAGE_SIZE;
use wirecall_core::error::{ErrorKind, Result};
use wirecall_wire::frame::HEADER_SIZE;

use crate::framing;
use crate::link::ListenKind;

/// Configuration of a client-side connection.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Which server endpoint to talk to.
    pub kind: ListenKind,
    /// The server's socket path.
    pub server_path: PathBuf,
    /// Local path a datagram client binds to so the server can reply and
    /// track subscriptions. Ignored for stream connections.
    pub bind_path: Option<PathBuf>,
    /// Frame cap, matching the server's.
    pub max_message_size: usize,
}

impl ClientConfig {
    /// Stream connection to `server_path`.
    pub fn stream(server_path: impl Into<PathBuf>) -> Self {
        Self {
            kind: ListenKind::Stream,
            server_path: server_path.into(),
            bind_path: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Datagram connection to `server_path`, bound locally at `bind_path`.
    pub fn datagram(server_path: impl Into<PathBuf>, bind_path: impl Into<PathBuf>) -> Self {
        Self {
            kind: ListenKind::Datagram,
            server_path: server_path.into(),
            bind_path: Some(bind_path.into()),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// A connected client endpoint, stream or datagram.
///
/// Sends complete frames with the same pre-send validation the server link
/// applies, and receives with the same two-phase stream framing.
pub struct ClientConnection {
    socket: Socket,
    config: ClientConfig,
}

impl ClientConnection {
    /// Connects (stream) or binds-and-connects (datagram) per the config.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let server = SockAddr::unix(&config.server_path)?;
        let socket = match config.kind {
            ListenKind::Stream => {
                let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
                socket.connect(&server)?;
                socket
            }
            ListenKind::Datagram => {
                let socket = Socket::new(Domain::UNIX, Type::DGRAM, None)?;
                if let Some(path) = &config.bind_path {
                    let _ = std::fs::remove_file(path);
                    socket.bind(&SockAddr::unix(path)?)?;
                }
                socket.connect(&server)?;
                socket
            }
        };
        Ok(Self { socket, config })
    }

    /// Sends one complete frame.
    pub fn send(&self, frame: &[u8]) -> Result<()> {
        framing::send_frame(&self.socket, None, frame, self.config.max_message_size, true)
    }

    /// Receives one frame into `buf`, returning its length.
    ///
    /// With `blocking` unset, an empty socket reports `NoData` instead of
    /// waiting.
    pub fn recv(&self, buf: &mut [u8], blocking: bool) -> Result<usize> {
        match self.config.kind {
            ListenKind::Stream => framing::recv_stream_frame(
                &self.socket,
                buf,
                self.config.max_message_size,
                blocking,
            ),
            ListenKind::Datagram => {
                let flags = if blocking { 0 } else { libc::MSG_DONTWAIT };
                let got = framing::recv_with(&self.socket, buf, flags).map_err(ErrorKind::from)?;
                if got < HEADER_SIZE {
                    return Err(ErrorKind::NoData);
                }
                Ok(got)
            }
        }
    }

    /// The local bind path of a datagram client, if any.
    pub fn bind_path(&self) -> Option<&std::path::Path> {
        self.config.bind_path.as_deref()
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        if let Some(path) = &self.config.bind_path {
            let _ = std::fs::remove_file(path);
        }
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection").field("config", &self.config).finish()
    }
}
