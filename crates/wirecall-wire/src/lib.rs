#![warn(missing_docs)]

//! wirecall-wire: frame layout and serialization.
//!
//! A frame is the on-wire unit: a fixed 12-byte header, a table of parameter
//! descriptors, then buffer payload bytes. All multi-byte integers are
//! little-endian. [`MessageBuilder`] composes frames into a caller-provided
//! buffer; [`MessageReader`] walks a received frame parameter by parameter.

/// Frame header and parameter descriptor layout.
pub mod frame;
/// Frame composition into an outgoing buffer.
pub mod builder;
/// Cursor-based frame consumption.
pub mod reader;

pub use builder::MessageBuilder;
pub use frame::{Descriptor, FrameHeader, ParamKind, DESCRIPTOR_SIZE, HEADER_SIZE};
pub use reader::MessageReader;
