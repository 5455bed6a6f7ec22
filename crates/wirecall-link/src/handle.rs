use std::fmt;
use std::os::fd::RawFd;

/// Opaque connection handle.
///
/// Stream clients carry their socket descriptor; datagram peers get a
/// synthetic id from a reserved range. Everything that crosses the boundary
/// between the link and the client table is keyed by this integer, never by
/// pointer-like references.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnHandle(
    /// Raw descriptor, or a synthetic id for datagram peers.
    pub RawFd,
);

impl ConnHandle {
    /// The not-a-connection sentinel.
    pub const INVALID: ConnHandle = ConnHandle(-1);

    /// True for any handle other than [`ConnHandle::INVALID`].
    pub fn is_valid(&self) -> bool {
        self.0 >= 0 || self.0 <= Self::first_synthetic().0
    }

    /// Start of the synthetic range handed to datagram peers.
    pub(crate) fn first_synthetic() -> ConnHandle {
        ConnHandle(i32::MIN / 2)
    }
}

impl fmt::Display for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_is_not_valid() {
        assert!(!ConnHandle::INVALID.is_valid());
        assert!(ConnHandle(3).is_valid());
        assert!(ConnHandle::first_synthetic().is_valid());
    }
}
