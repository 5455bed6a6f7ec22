//! The built-in control protocol: subscription management and error events.
//!
//! Protocol id 0 is reserved for control and registered for the server's
//! whole lifetime. Clients subscribe to protocols to receive broadcasts;
//! unknown-action dispatches are answered with an error event carrying the
//! failed message id.

use tracing::warn;

use wirecall_core::constants::CONTROL_PROTOCOL_ID;
use wirecall_core::error::Result;
use wirecall_wire::{MessageBuilder, MessageReader};

use crate::envelope::Envelope;
use crate::registry::Protocol;
use crate::server::ServerHandle;

/// Control action: set a subscription bit (one scalar: protocol id).
pub const CONTROL_SUBSCRIBE: u8 = 0;
/// Control action: clear a subscription bit (one scalar: protocol id).
pub const CONTROL_UNSUBSCRIBE: u8 = 1;
/// Control event: a dispatch failed (two scalars: message id, error code).
pub const CONTROL_ERROR_EVENT: u8 = 2;

/// Wire error code for an unknown protocol/action, errno-style.
pub const ERROR_NOT_FOUND: u32 = 2;

/// Builds the control protocol with its two inbound actions.
pub(crate) fn control_protocol() -> Protocol {
    Protocol::new(CONTROL_PROTOCOL_ID)
        .action(CONTROL_SUBSCRIBE, |exchange| {
            let protocol = exchange.reader()?.next_scalar()? as u8;
            exchange.server().subscribe_client(exchange.envelope(), protocol)
        })
        .action(CONTROL_UNSUBSCRIBE, |exchange| {
            let protocol = exchange.reader()?.next_scalar()? as u8;
            exchange.server().unsubscribe_client(exchange.envelope(), protocol)
        })
}

/// Sends the `{message id, error code}` event back to the sender of
/// `envelope`, when the sender is addressable at all.
pub(crate) fn send_error_event(
    server: &ServerHandle,
    envelope: &Envelope<'_>,
    failed_id: u32,
    code: u32,
    out: &mut Vec<u8>,
) {
    let result = (|| -> Result<()> {
        let mut builder =
            MessageBuilder::new(out, 0, CONTROL_PROTOCOL_ID, CONTROL_ERROR_EVENT, 2, 0);
        builder.scalar(failed_id)?;
        builder.scalar(code)?;
        let len = builder.finish()?;
        server.respond_raw(envelope, &out[..len])
    })();
    if let Err(err) = result {
        warn!("failed to deliver error event for message {}: {}", failed_id, err);
    }
}

/// Builds a `subscribe(protocol)` frame into `buf`; used by clients.
pub fn subscribe_frame(buf: &mut Vec<u8>, message_id: u32, protocol: u8) -> Result<usize> {
    let mut builder =
        MessageBuilder::new(buf, message_id, CONTROL_PROTOCOL_ID, CONTROL_SUBSCRIBE, 1, 0);
    builder.scalar(protocol as u32)?;
    builder.finish()
}

/// Builds an `unsubscribe(protocol)` frame into `buf`; used by clients.
pub fn unsubscribe_frame(buf: &mut Vec<u8>, message_id: u32, protocol: u8) -> Result<usize> {
    let mut builder =
        MessageBuilder::new(buf, message_id, CONTROL_PROTOCOL_ID, CONTROL_UNSUBSCRIBE, 1, 0);
    builder.scalar(protocol as u32)?;
    builder.finish()
}

/// Parses a control error event, returning `(failed message id, code)`, or
/// `None` when the frame is not a control error event.
pub fn parse_error_event(frame: &[u8]) -> Option<(u32, u32)> {
    let mut reader = MessageReader::new(frame).ok()?;
    let header = *reader.header();
    if header.protocol != CONTROL_PROTOCOL_ID || header.action != CONTROL_ERROR_EVENT {
        return None;
    }
    let failed_id = reader.next_scalar().ok()?;
    let code = reader.next_scalar().ok()?;
    Some((failed_id, code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_frame_carries_protocol_scalar() {
        let mut buf = Vec::new();
        let len = subscribe_frame(&mut buf, 3, 42).unwrap();
        let mut reader = MessageReader::new(&buf[..len]).unwrap();
        assert_eq!(reader.header().protocol, CONTROL_PROTOCOL_ID);
        assert_eq!(reader.header().action, CONTROL_SUBSCRIBE);
        assert_eq!(reader.next_scalar().unwrap(), 42);
    }

    #[test]
    fn error_event_roundtrip() {
        let mut buf = Vec::new();
        let mut builder =
            MessageBuilder::new(&mut buf, 0, CONTROL_PROTOCOL_ID, CONTROL_ERROR_EVENT, 2, 0);
        builder.scalar(17).unwrap();
        builder.scalar(ERROR_NOT_FOUND).unwrap();
        let len = builder.finish().unwrap();

        assert_eq!(parse_error_event(&buf[..len]), Some((17, ERROR_NOT_FOUND)));
    }

    #[test]
    fn other_frames_are_not_error_events() {
        let mut buf = Vec::new();
        let len = subscribe_frame(&mut buf, 1, 5).unwrap();
        assert_eq!(parse_error_event(&buf[..len]), None);
    }
}
