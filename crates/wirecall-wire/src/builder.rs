use byteorder::{ByteOrder, LittleEndian};

use wirecall_core::error::{ErrorKind, Result};

use crate::frame::{Descriptor, FrameHeader, DESCRIPTOR_SIZE, HEADER_SIZE};

/// Composes a frame into a caller-provided buffer.
///
/// The caller declares the parameter counts up front; the builder lays down
/// the header and a zeroed descriptor table, then each `scalar`/`buffer`
/// call fills the next descriptor in declaration order. `finish` patches the
/// total length and hands back the frame size.
///
/// The builder does not enforce the message-size cap; the link performs that
/// check before anything touches the socket.
pub struct MessageBuilder<'a> {
    buf: &'a mut Vec<u8>,
    declared: usize,
    written: usize,
}

impl<'a> MessageBuilder<'a> {
    /// Starts a frame in `buf`, clearing any previous content.
    pub fn new(
        buf: &'a mut Vec<u8>,
        message_id: u32,
        protocol: u8,
        action: u8,
        param_in: u8,
        param_out: u8,
    ) -> Self {
        let header = FrameHeader {
            message_id,
            length: 0,
            protocol,
            action,
            param_in,
            param_out,
        };
        buf.clear();
        buf.extend_from_slice(&header.encode());
        let declared = header.param_count();
        buf.resize(HEADER_SIZE + declared * DESCRIPTOR_SIZE, 0);
        Self { buf, declared, written: 0 }
    }

    /// Appends an inline scalar parameter.
    pub fn scalar(&mut self, value: u32) -> Result<&mut Self> {
        self.put(Descriptor::scalar(value))
    }

    /// Appends a buffer parameter; payload bytes land after the table.
    pub fn buffer(&mut self, bytes: &[u8]) -> Result<&mut Self> {
        let offset = self.buf.len() as u32;
        self.buf.extend_from_slice(bytes);
        self.put(Descriptor::buffer(bytes.len() as u32, offset))
    }

    fn put(&mut self, descriptor: Descriptor) -> Result<&mut Self> {
        if self.written == self.declared {
            return Err(ErrorKind::InvalidArgument("more parameters than declared"));
        }
        let at = HEADER_SIZE + self.written * DESCRIPTOR_SIZE;
        descriptor.encode(&mut self.buf[at..at + DESCRIPTOR_SIZE]);
        self.written += 1;
        Ok(self)
    }

    /// Seals the frame: every declared parameter must have been written.
    /// Returns the total frame length.
    pub fn finish(self) -> Result<usize> {
        if self.written != self.declared {
            return Err(ErrorKind::InvalidArgument("declared parameter missing"));
        }
        let length = self.buf.len();
        LittleEndian::write_u32(&mut self.buf[4..8], length as u32);
        Ok(length)
    }
}
