use std::io::Cursor;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};

use wirecall_core::error::{ErrorKind, Result};

/// Fixed frame header size in bytes.
pub const HEADER_SIZE: usize = 12;
/// Size of one parameter descriptor in bytes.
pub const DESCRIPTOR_SIZE: usize = 12;

/// Kind tag of a parameter descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    /// Value carried inline in the descriptor.
    Scalar,
    /// Value carried as payload bytes; descriptor holds (length, offset).
    Buffer,
    /// Shared-memory handle. Never accepted by this implementation.
    Shm,
}

impl TryFrom<u8> for ParamKind {
    type Error = ErrorKind;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ParamKind::Scalar),
            1 => Ok(ParamKind::Buffer),
            2 => Ok(ParamKind::Shm),
            _ => Err(ErrorKind::BrokenFrame),
        }
    }
}

impl ParamKind {
    fn as_u8(self) -> u8 {
        match self {
            ParamKind::Scalar => 0,
            ParamKind::Buffer => 1,
            ParamKind::Shm => 2,
        }
    }
}

/// One entry of the descriptor table following the header.
///
/// For `Scalar` the inline value sits in `value` and `extra` is zero. For
/// `Buffer`, `value` is the payload length and `extra` the payload offset
/// from the start of the frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Descriptor {
    /// Parameter kind tag.
    pub kind: ParamKind,
    /// Inline value or payload length.
    pub value: u32,
    /// Payload offset for `Buffer`, zero otherwise.
    pub extra: u32,
}

impl Descriptor {
    /// Builds a scalar descriptor.
    pub fn scalar(value: u32) -> Self {
        Self { kind: ParamKind::Scalar, value, extra: 0 }
    }

    /// Builds a buffer descriptor pointing at `length` bytes at `offset`.
    pub fn buffer(length: u32, offset: u32) -> Self {
        Self { kind: ParamKind::Buffer, value: length, extra: offset }
    }

    /// Encodes the descriptor into `out` (exactly [`DESCRIPTOR_SIZE`] bytes).
    pub fn encode(&self, out: &mut [u8]) {
        out[0] = self.kind.as_u8();
        out[1] = 0;
        out[2] = 0;
        out[3] = 0;
        LittleEndian::write_u32(&mut out[4..8], self.value);
        LittleEndian::write_u32(&mut out[8..12], self.extra);
    }

    /// Decodes one descriptor from `data`.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < DESCRIPTOR_SIZE {
            return Err(ErrorKind::BrokenFrame);
        }
        let kind = ParamKind::try_from(data[0])?;
        let value = LittleEndian::read_u32(&data[4..8]);
        let extra = LittleEndian::read_u32(&data[8..12]);
        Ok(Self { kind, value, extra })
    }
}

/// The fixed frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Sender-unique message id; zero for server-originated events.
    pub message_id: u32,
    /// Total frame length, header and descriptors included.
    pub length: u32,
    /// Protocol id naming the handler family.
    pub protocol: u8,
    /// Action id within the protocol.
    pub action: u8,
    /// Number of inbound parameters.
    pub param_in: u8,
    /// Number of outbound parameters.
    pub param_out: u8,
}

impl FrameHeader {
    /// Encodes the header into its 12-byte wire form.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        LittleEndian::write_u32(&mut out[0..4], self.message_id);
        LittleEndian::write_u32(&mut out[4..8], self.length);
        out[8] = self.protocol;
        out[9] = self.action;
        out[10] = self.param_in;
        out[11] = self.param_out;
        out
    }

    /// Decodes a header from the first [`HEADER_SIZE`] bytes of `data`.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(ErrorKind::BrokenFrame);
        }
        let mut cursor = Cursor::new(data);
        let message_id = cursor.read_u32::<LittleEndian>().map_err(ErrorKind::from)?;
        let length = cursor.read_u32::<LittleEndian>().map_err(ErrorKind::from)?;
        Ok(Self {
            message_id,
            length,
            protocol: data[8],
            action: data[9],
            param_in: data[10],
            param_out: data[11],
        })
    }

    /// Total number of declared parameters.
    pub fn param_count(&self) -> usize {
        self.param_in as usize + self.param_out as usize
    }

    /// Bytes covered by header plus descriptor table.
    pub fn table_span(&self) -> usize {
        HEADER_SIZE + self.param_count() * DESCRIPTOR_SIZE
    }

    /// Checks the declared length against the structural minimum and the
    /// configured cap. Violations drop the frame.
    pub fn validate_length(&self, max_message_size: usize) -> Result<()> {
        let length = self.length as usize;
        if length < self.table_span() {
            return Err(ErrorKind::BrokenFrame);
        }
        if length > max_message_size {
            return Err(ErrorKind::TooLarge { length, max: max_message_size });
        }
        Ok(())
    }
}

/// Reads the message id of an encoded frame.
pub fn message_id_of(frame: &[u8]) -> u32 {
    LittleEndian::read_u32(&frame[0..4])
}

/// Stamps the message id of an encoded frame in place. Used by the respond
/// path to echo the request id.
pub fn set_message_id(frame: &mut [u8], id: u32) {
    LittleEndian::write_u32(&mut frame[0..4], id);
}

/// Reads the declared total length of an encoded frame.
pub fn frame_length_of(frame: &[u8]) -> usize {
    LittleEndian::read_u32(&frame[4..8]) as usize
}

/// Reads the protocol id of an encoded frame.
pub fn protocol_of(frame: &[u8]) -> u8 {
    frame[8]
}
