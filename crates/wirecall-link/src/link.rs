use std::path::{Path, PathBuf};
use std::sync::Arc;

use socket2::Socket;

use wirecall_core::error::Result;

use crate::handle::ConnHandle;

/// The two endpoint kinds a link may provide.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenKind {
    /// Connection-per-client stream endpoint.
    Stream,
    /// Shared datagram endpoint.
    Datagram,
}

/// Link-private transport state of one client.
///
/// Cheap to clone so send paths can operate outside the client-table lock:
/// stream endpoints share their socket, datagram endpoints are just the peer
/// address.
#[derive(Clone, Debug)]
pub enum Endpoint {
    /// An accepted stream connection.
    Stream(Arc<Socket>),
    /// An addressable datagram peer.
    Datagram {
        /// The peer's bound socket path, used for replies.
        peer: PathBuf,
    },
}

/// A freshly produced client: its handle plus transport state.
#[derive(Debug)]
pub struct ClientSocket {
    /// Connection handle keying the client table.
    pub handle: ConnHandle,
    /// Transport state stored in the client record.
    pub endpoint: Endpoint,
}

/// Origin metadata of one received datagram.
#[derive(Debug)]
pub struct RecvInfo {
    /// Frame length landed in the buffer.
    pub len: usize,
    /// Known handle of the sending peer, or [`ConnHandle::INVALID`] on
    /// first contact.
    pub client: ConnHandle,
    /// Reply address, absent for unnamed peers.
    pub reply: Option<PathBuf>,
}

/// Transport capability consumed by the server core.
///
/// Implementations expose up to two listening endpoints; `listen` reports
/// `Unsupported` for a kind the link cannot provide, and at least one kind
/// must succeed for a server to start.
pub trait Link: Send + Sync {
    /// Brings up the endpoint of the given kind and returns its handle.
    fn listen(&mut self, kind: ListenKind) -> Result<ConnHandle>;

    /// Accepts one pending stream connection.
    fn accept(&self) -> Result<ClientSocket>;

    /// Receives one datagram frame into `buf`. Atomic: a full frame or
    /// `NoData`. Short datagrams (below the header size) are `NoData`.
    fn recv_packet(&self, buf: &mut [u8]) -> Result<RecvInfo>;

    /// Receives one stream frame from a client into `buf`: exactly the
    /// header first, then exactly the declared remainder with wait-all
    /// semantics. A partial frame is fatal for the connection.
    fn recv_client(&self, endpoint: &Endpoint, buf: &mut [u8]) -> Result<usize>;

    /// Sends a complete frame to a client as one gathered write: header plus
    /// descriptor table first, then each inline buffer payload. Validates
    /// the size cap and rejects shared-memory parameters before writing.
    fn send_client(&self, endpoint: &Endpoint, frame: &[u8], blocking: bool) -> Result<()>;

    /// Sends a reply by datagram address when no client record exists.
    fn respond(&self, reply: &Path, frame: &[u8]) -> Result<()>;

    /// Synthesizes a client record for a datagram peer first seen through a
    /// subscribe control message.
    fn create_client(&self, reply: &Path) -> Result<ClientSocket>;

    /// Releases the transport state of one client.
    fn destroy_client(&self, client_handle: ConnHandle, endpoint: &Endpoint);

    /// The configured frame cap, enforced on both directions.
    fn max_message_size(&self) -> usize;
}
