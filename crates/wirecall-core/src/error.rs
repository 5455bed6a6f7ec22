use std::{fmt, io};

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Errors that the framework can surface to callers.
#[derive(Debug)]
pub enum ErrorKind {
    /// The server (or default-server slot) was initialized twice.
    AlreadyInitialized,
    /// A caller passed a null-equivalent or otherwise invalid argument.
    InvalidArgument(&'static str),
    /// An allocation could not be satisfied.
    OutOfMemory,
    /// The requested transport or parameter kind is not supported.
    Unsupported,
    /// A frame exceeds the configured maximum message size.
    TooLarge {
        /// Declared frame length.
        length: usize,
        /// Configured cap.
        max: usize,
    },
    /// A short read or write left a frame incomplete; the connection is dead.
    BrokenFrame,
    /// No message is pending on a non-blocking drain.
    NoData,
    /// Unknown client handle, protocol, or action.
    NotFound,
    /// An underlying transport error.
    Io(io::Error),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::AlreadyInitialized => write!(f, "Server is already initialized"),
            ErrorKind::InvalidArgument(what) => write!(f, "Invalid argument: {}", what),
            ErrorKind::OutOfMemory => write!(f, "Out of memory"),
            ErrorKind::Unsupported => write!(f, "Operation not supported by this link"),
            ErrorKind::TooLarge { length, max } => {
                write!(f, "Frame of {} bytes exceeds the {} byte cap", length, max)
            }
            ErrorKind::BrokenFrame => write!(f, "Frame was cut short on the wire"),
            ErrorKind::NoData => write!(f, "No message pending"),
            ErrorKind::NotFound => write!(f, "Unknown client, protocol, or action"),
            ErrorKind::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for ErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ErrorKind::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => ErrorKind::NoData,
            io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => ErrorKind::BrokenFrame,
            _ => ErrorKind::Io(err),
        }
    }
}

impl ErrorKind {
    /// True when the error only means "try again later".
    pub fn is_no_data(&self) -> bool {
        matches!(self, ErrorKind::NoData)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block_maps_to_no_data() {
        let err: ErrorKind = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert!(err.is_no_data());
    }

    #[test]
    fn broken_pipe_maps_to_broken_frame() {
        let err: ErrorKind = io::Error::from(io::ErrorKind::BrokenPipe).into();
        assert!(matches!(err, ErrorKind::BrokenFrame));
    }

    #[test]
    fn display_mentions_sizes_for_too_large() {
        let msg = ErrorKind::TooLarge { length: 5000, max: 4096 }.to_string();
        assert!(msg.contains("5000"));
        assert!(msg.contains("4096"));
    }
}
