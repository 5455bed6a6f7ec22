#![warn(missing_docs)]

//! wirecall-link: readiness reactor and Unix-socket transport.
//!
//! The [`Reactor`] wraps a `mio` poll instance into the two-event model the
//! server consumes (`IN`, `DISCONNECT`). The [`Link`] trait is the transport
//! seam: [`SocketLink`] implements it over a local stream listener and a
//! datagram socket, either of which may be absent. [`ClientConnection`] is
//! the matching client-side endpoint used by demos and tests.

/// Connection handle newtype.
pub mod handle;
/// Readiness wrapper over the OS poller.
pub mod reactor;
/// The transport capability trait and its record types.
pub mod link;
/// Unix-socket server link.
pub mod socket;
/// Client-side connection.
pub mod client;

mod framing;

pub use client::{ClientConfig, ClientConnection};
pub use handle::ConnHandle;
pub use link::{ClientSocket, Endpoint, Link, ListenKind, RecvInfo};
pub use reactor::{EventSet, IoEvent, Reactor, ReactorNotifier};
pub use socket::{LinkConfig, SocketLink};
