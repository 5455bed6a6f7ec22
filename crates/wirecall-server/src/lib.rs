#![warn(missing_docs)]

//! wirecall-server: the dispatch core.
//!
//! One reactor thread performs all readiness waits and socket I/O; handlers
//! run either inline on that thread (single-threaded mode) or on a fixed
//! pool of workers fed from an arena-backed queue (multi-threaded mode).
//!
//! In multi-threaded mode, frames from the same connection are enqueued in
//! arrival order but MAY be handled concurrently: per-client handler
//! serialization is deliberately not promised. Handlers that need ordering
//! must provide it themselves.

/// Client table and subscription bitmaps.
mod clients;
/// The built-in control protocol (subscribe/unsubscribe, error events).
pub mod control;
/// Envelope, queued message, and handler exchange types.
mod envelope;
/// Protocol/action handler registry.
mod registry;
/// The server core: reactor loop, dispatch, lifecycle.
mod server;
/// Worker pool for multi-threaded dispatch.
mod workers;

pub use envelope::{Envelope, Exchange};
pub use registry::{ActionHandler, Protocol};
pub use server::{
    clear_default, default_handle, set_default, ConnCallback, Server, ServerConfig, ServerHandle,
};
