use std::collections::HashMap;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use socket2::{Domain, SockAddr, Socket, Type};
use tracing::warn;

use wirecall_core::constants::DEFAULT_MAX_MESSAGE_SIZE;
use wirecall_core::error::{ErrorKind, Result};
use wirecall_wire::frame::{FrameHeader, HEADER_SIZE};

use crate::framing;
use crate::handle::ConnHandle;
use crate::link::{ClientSocket, Endpoint, Link, ListenKind, RecvInfo};

/// Filesystem configuration of a [`SocketLink`].
///
/// Either endpoint may be omitted; a server requires at least one.
#[derive(Clone, Debug)]
pub struct LinkConfig {
    /// Path the stream listener binds to.
    pub stream_path: Option<PathBuf>,
    /// Path the datagram socket binds to.
    pub dgram_path: Option<PathBuf>,
    /// Frame cap enforced on both directions.
    pub max_message_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            stream_path: None,
            dgram_path: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

#[derive(Debug, Default)]
struct DgramPeers {
    by_path: HashMap<PathBuf, ConnHandle>,
    next: i32,
}

/// Unix-socket link: a stream listener plus a datagram socket.
///
/// Datagram peers have no connection of their own; the link keys them by
/// their bound socket path and hands out synthetic handles from a reserved
/// range, so the client table and the link only ever reference each other
/// through handle values.
pub struct SocketLink {
    config: LinkConfig,
    listener: Option<Socket>,
    dgram: Option<Socket>,
    peers: Mutex<DgramPeers>,
}

impl SocketLink {
    /// Creates an unbound link; call [`Link::listen`] per endpoint kind.
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            listener: None,
            dgram: None,
            peers: Mutex::new(DgramPeers { by_path: HashMap::new(), next: 0 }),
        }
    }

    fn bind_at(path: &Path, kind: Type) -> Result<Socket> {
        // A stale socket file from a previous run would fail the bind.
        let _ = std::fs::remove_file(path);
        let socket = Socket::new(Domain::UNIX, kind, None)?;
        socket.bind(&SockAddr::unix(path)?)?;
        Ok(socket)
    }

    fn dgram_socket(&self) -> Result<&Socket> {
        self.dgram.as_ref().ok_or(ErrorKind::Unsupported)
    }

    fn lookup_peer(&self, path: &Path) -> ConnHandle {
        let peers = self.peers.lock().expect("peer map poisoned");
        peers.by_path.get(path).copied().unwrap_or(ConnHandle::INVALID)
    }
}

impl Link for SocketLink {
    fn listen(&mut self, kind: ListenKind) -> Result<ConnHandle> {
        match kind {
            ListenKind::Stream => {
                let path = self.config.stream_path.clone().ok_or(ErrorKind::Unsupported)?;
                let socket = Self::bind_at(&path, Type::STREAM)?;
                socket.listen(64)?;
                // Non-blocking so the accept loop can drain the backlog;
                // accepted connections themselves stay blocking.
                socket.set_nonblocking(true)?;
                let handle = ConnHandle(socket.as_raw_fd());
                self.listener = Some(socket);
                Ok(handle)
            }
            ListenKind::Datagram => {
                let path = self.config.dgram_path.clone().ok_or(ErrorKind::Unsupported)?;
                let socket = Self::bind_at(&path, Type::DGRAM)?;
                let handle = ConnHandle(socket.as_raw_fd());
                self.dgram = Some(socket);
                Ok(handle)
            }
        }
    }

    fn accept(&self) -> Result<ClientSocket> {
        let listener = self.listener.as_ref().ok_or(ErrorKind::Unsupported)?;
        let (socket, _addr) = listener.accept()?;
        let handle = ConnHandle(socket.as_raw_fd());
        Ok(ClientSocket { handle, endpoint: Endpoint::Stream(Arc::new(socket)) })
    }

    fn recv_packet(&self, buf: &mut [u8]) -> Result<RecvInfo> {
        let socket = self.dgram_socket()?;
        loop {
            let (got, addr) =
                framing::recv_from_with(socket, buf, libc::MSG_DONTWAIT).map_err(ErrorKind::from)?;
            if got < HEADER_SIZE {
                // Packets are atomic; a runt is treated as nothing pending.
                return Err(ErrorKind::NoData);
            }
            let header = FrameHeader::decode(&buf[..HEADER_SIZE])?;
            if header.validate_length(self.config.max_message_size).is_err()
                || header.length as usize != got
            {
                warn!("dropping malformed datagram of {} bytes from {:?}", got, addr.as_pathname());
                continue;
            }
            let reply = addr.as_pathname().map(Path::to_path_buf);
            let client = reply.as_deref().map_or(ConnHandle::INVALID, |p| self.lookup_peer(p));
            return Ok(RecvInfo { len: got, client, reply });
        }
    }

    fn recv_client(&self, endpoint: &Endpoint, buf: &mut [u8]) -> Result<usize> {
        match endpoint {
            Endpoint::Stream(socket) => {
                framing::recv_stream_frame(socket, buf, self.config.max_message_size, false)
            }
            Endpoint::Datagram { .. } => Err(ErrorKind::Unsupported),
        }
    }

    fn send_client(&self, endpoint: &Endpoint, frame: &[u8], blocking: bool) -> Result<()> {
        match endpoint {
            Endpoint::Stream(socket) => {
                framing::send_frame(socket, None, frame, self.config.max_message_size, blocking)
            }
            Endpoint::Datagram { peer } => {
                let addr = SockAddr::unix(peer)?;
                framing::send_frame(
                    self.dgram_socket()?,
                    Some(&addr),
                    frame,
                    self.config.max_message_size,
                    blocking,
                )
            }
        }
    }

    fn respond(&self, reply: &Path, frame: &[u8]) -> Result<()> {
        let addr = SockAddr::unix(reply)?;
        framing::send_frame(self.dgram_socket()?, Some(&addr), frame, self.config.max_message_size, true)
    }

    fn create_client(&self, reply: &Path) -> Result<ClientSocket> {
        let mut peers = self.peers.lock().expect("peer map poisoned");
        if let Some(&existing) = peers.by_path.get(reply) {
            return Ok(ClientSocket {
                handle: existing,
                endpoint: Endpoint::Datagram { peer: reply.to_path_buf() },
            });
        }
        let handle = ConnHandle(ConnHandle::first_synthetic().0 - peers.next);
        peers.next += 1;
        peers.by_path.insert(reply.to_path_buf(), handle);
        Ok(ClientSocket { handle, endpoint: Endpoint::Datagram { peer: reply.to_path_buf() } })
    }

    fn destroy_client(&self, _client_handle: ConnHandle, endpoint: &Endpoint) {
        match endpoint {
            Endpoint::Stream(socket) => {
                let _ = socket.shutdown(std::net::Shutdown::Both);
            }
            Endpoint::Datagram { peer } => {
                let mut peers = self.peers.lock().expect("peer map poisoned");
                peers.by_path.remove(peer);
            }
        }
    }

    fn max_message_size(&self) -> usize {
        self.config.max_message_size
    }
}

impl Drop for SocketLink {
    fn drop(&mut self) {
        if let Some(path) = &self.config.stream_path {
            let _ = std::fs::remove_file(path);
        }
        if let Some(path) = &self.config.dgram_path {
            let _ = std::fs::remove_file(path);
        }
    }
}

impl std::fmt::Debug for SocketLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketLink")
            .field("config", &self.config)
            .field("stream", &self.listener.is_some())
            .field("dgram", &self.dgram.is_some())
            .finish()
    }
}
