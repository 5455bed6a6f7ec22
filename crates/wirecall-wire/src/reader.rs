use wirecall_core::error::{ErrorKind, Result};

use crate::frame::{Descriptor, FrameHeader, ParamKind, DESCRIPTOR_SIZE, HEADER_SIZE};

/// Walks the parameters of a received frame in declaration order.
///
/// Construction validates the structural envelope: the buffer must hold the
/// declared length, and the declared length must cover the descriptor table.
/// Buffer parameters are bounds-checked against the frame before a slice is
/// handed out. Shared-memory parameters are rejected on read.
pub struct MessageReader<'a> {
    frame: &'a [u8],
    header: FrameHeader,
    next_param: usize,
}

impl<'a> MessageReader<'a> {
    /// Parses the header of `frame` and positions the cursor at the first
    /// parameter.
    pub fn new(frame: &'a [u8]) -> Result<Self> {
        let header = FrameHeader::decode(frame)?;
        let length = header.length as usize;
        if length < header.table_span() || frame.len() < length {
            return Err(ErrorKind::BrokenFrame);
        }
        Ok(Self { frame, header, next_param: 0 })
    }

    /// The decoded frame header.
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// Decodes descriptor `index` without advancing the cursor.
    pub fn descriptor(&self, index: usize) -> Result<Descriptor> {
        if index >= self.header.param_count() {
            return Err(ErrorKind::InvalidArgument("parameter index out of range"));
        }
        let at = HEADER_SIZE + index * DESCRIPTOR_SIZE;
        Descriptor::decode(&self.frame[at..at + DESCRIPTOR_SIZE])
    }

    fn take(&mut self) -> Result<Descriptor> {
        let descriptor = self.descriptor(self.next_param)?;
        self.next_param += 1;
        Ok(descriptor)
    }

    /// Reads the next parameter as an inline scalar.
    pub fn next_scalar(&mut self) -> Result<u32> {
        let descriptor = self.take()?;
        match descriptor.kind {
            ParamKind::Scalar => Ok(descriptor.value),
            ParamKind::Buffer => Err(ErrorKind::InvalidArgument("expected scalar parameter")),
            ParamKind::Shm => Err(ErrorKind::Unsupported),
        }
    }

    /// Reads the next parameter as a payload slice.
    pub fn next_buffer(&mut self) -> Result<&'a [u8]> {
        let descriptor = self.take()?;
        match descriptor.kind {
            ParamKind::Buffer => {
                let offset = descriptor.extra as usize;
                let len = descriptor.value as usize;
                let end = offset.checked_add(len).ok_or(ErrorKind::BrokenFrame)?;
                if offset < self.header.table_span() || end > self.header.length as usize {
                    return Err(ErrorKind::BrokenFrame);
                }
                Ok(&self.frame[offset..end])
            }
            ParamKind::Scalar => Err(ErrorKind::InvalidArgument("expected buffer parameter")),
            ParamKind::Shm => Err(ErrorKind::Unsupported),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MessageBuilder;
    use crate::frame;

    fn sample_frame() -> Vec<u8> {
        let mut buf = Vec::new();
        let mut builder = MessageBuilder::new(&mut buf, 9, 2, 4, 2, 0);
        builder.scalar(11).unwrap();
        builder.buffer(b"abc").unwrap();
        builder.finish().unwrap();
        buf
    }

    #[test]
    fn cursor_walks_in_order() {
        let buf = sample_frame();
        let mut reader = MessageReader::new(&buf).unwrap();
        assert_eq!(reader.next_scalar().unwrap(), 11);
        assert_eq!(reader.next_buffer().unwrap(), b"abc");
        assert!(reader.next_scalar().is_err());
    }

    #[test]
    fn truncated_frame_is_broken() {
        let buf = sample_frame();
        assert!(matches!(
            MessageReader::new(&buf[..buf.len() - 1]),
            Err(ErrorKind::BrokenFrame)
        ));
    }

    #[test]
    fn buffer_offset_outside_frame_is_broken() {
        let mut buf = sample_frame();
        // Corrupt the second descriptor's offset to point past the frame.
        let at = HEADER_SIZE + DESCRIPTOR_SIZE;
        Descriptor::buffer(3, frame::frame_length_of(&buf) as u32)
            .encode(&mut buf[at..at + DESCRIPTOR_SIZE]);
        let mut reader = MessageReader::new(&buf).unwrap();
        reader.next_scalar().unwrap();
        assert!(matches!(reader.next_buffer(), Err(ErrorKind::BrokenFrame)));
    }

    #[test]
    fn buffer_offset_inside_table_is_broken() {
        let mut buf = sample_frame();
        let at = HEADER_SIZE + DESCRIPTOR_SIZE;
        Descriptor::buffer(3, 0).encode(&mut buf[at..at + DESCRIPTOR_SIZE]);
        let mut reader = MessageReader::new(&buf).unwrap();
        reader.next_scalar().unwrap();
        assert!(matches!(reader.next_buffer(), Err(ErrorKind::BrokenFrame)));
    }

    #[test]
    fn shm_parameter_is_unsupported() {
        let mut buf = sample_frame();
        buf[HEADER_SIZE] = 2; // retag the first descriptor as SHM
        let mut reader = MessageReader::new(&buf).unwrap();
        assert!(matches!(reader.next_scalar(), Err(ErrorKind::Unsupported)));
    }

    #[test]
    fn kind_mismatch_is_reported() {
        let buf = sample_frame();
        let mut reader = MessageReader::new(&buf).unwrap();
        assert!(reader.next_buffer().is_err());
    }
}
