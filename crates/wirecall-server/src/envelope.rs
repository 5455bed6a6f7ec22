use std::path::{Path, PathBuf};

use wirecall_core::arena::ArenaSlot;
use wirecall_core::error::Result;
use wirecall_link::ConnHandle;
use wirecall_wire::frame::{self, HEADER_SIZE};
use wirecall_wire::{MessageBuilder, MessageReader};

use crate::server::ServerHandle;

/// A received frame plus its origin metadata and payload cursor.
///
/// The envelope borrows the buffer the frame landed in (the static receive
/// buffer or an arena slot); it never copies the frame.
#[derive(Debug)]
pub struct Envelope<'a> {
    /// Handle of the originating client; [`ConnHandle::INVALID`] for a
    /// datagram peer without a record yet.
    pub client: ConnHandle,
    /// Datagram reply address of the sender, when one exists.
    pub reply: Option<&'a Path>,
    /// Cursor used by handlers to walk the payload; past the header once a
    /// handler sees the envelope.
    pub index: usize,
    frame: &'a [u8],
}

impl<'a> Envelope<'a> {
    pub(crate) fn new(client: ConnHandle, reply: Option<&'a Path>, frame: &'a [u8]) -> Self {
        Self { client, reply, index: HEADER_SIZE, frame }
    }

    /// The complete frame bytes.
    pub fn frame(&self) -> &'a [u8] {
        self.frame
    }

    /// Message id of the inbound frame, echoed on responses.
    pub fn message_id(&self) -> u32 {
        frame::message_id_of(self.frame)
    }

    /// Protocol id of the inbound frame.
    pub fn protocol(&self) -> u8 {
        self.frame[8]
    }

    /// Action id of the inbound frame.
    pub fn action(&self) -> u8 {
        self.frame[9]
    }

    /// A parameter reader positioned at the first parameter.
    pub fn reader(&self) -> Result<MessageReader<'a>> {
        MessageReader::new(self.frame)
    }
}

/// A queued message owned by the worker pool: the envelope data in owning
/// form, backed by its arena slot.
///
/// Ownership is linear: the receive path hands the message to the queue, a
/// worker consumes it, and dropping it returns the slot to the arena, always
/// after the handler has run.
pub(crate) struct QueuedMessage {
    pub client: ConnHandle,
    pub reply: Option<PathBuf>,
    pub slot: ArenaSlot,
    pub len: usize,
}

impl QueuedMessage {
    pub fn frame(&self) -> &[u8] {
        &self.slot.as_slice()[..self.len]
    }
}

/// Handler context: the envelope under dispatch plus the outgoing buffer.
///
/// In single-threaded mode the outgoing buffer is the server's persistent
/// send buffer; in multi-threaded mode it is the invoking worker's
/// scratchpad, distinct from the inbound slot so a handler can read its
/// request while composing the response.
pub struct Exchange<'a> {
    pub(crate) server: &'a ServerHandle,
    pub(crate) envelope: &'a Envelope<'a>,
    pub(crate) out: &'a mut Vec<u8>,
}

impl<'a> Exchange<'a> {
    /// The server handle, for events, broadcasts, or registration.
    pub fn server(&self) -> &ServerHandle {
        self.server
    }

    /// The envelope under dispatch.
    pub fn envelope(&self) -> &Envelope<'a> {
        self.envelope
    }

    /// A parameter reader over the inbound frame.
    pub fn reader(&self) -> Result<MessageReader<'a>> {
        self.envelope.reader()
    }

    /// Composes a response with the declared parameter counts and sends it
    /// back to the requester, echoing its message id.
    pub fn respond<F>(&mut self, param_in: u8, param_out: u8, fill: F) -> Result<()>
    where
        F: FnOnce(&mut MessageBuilder<'_>) -> Result<()>,
    {
        let mut builder = MessageBuilder::new(
            self.out,
            self.envelope.message_id(),
            self.envelope.protocol(),
            self.envelope.action(),
            param_in,
            param_out,
        );
        fill(&mut builder)?;
        let len = builder.finish()?;
        self.server.respond(self.envelope, &mut self.out[..len])
    }
}
