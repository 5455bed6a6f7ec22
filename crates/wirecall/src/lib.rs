#![warn(missing_docs)]

//! Wirecall: a small public API facade for the workspace.
//!
//! This crate provides a clean, stable surface that re-exports the most
//! commonly used types to build local RPC services:
//!
//! - Server and handles (`Server`, `ServerConfig`, `ServerHandle`)
//! - Protocol registration (`Protocol`, `Exchange`)
//! - Frame composition and consumption (`MessageBuilder`, `MessageReader`)
//! - Link configuration and the client side (`LinkConfig`, `ClientConnection`)
//!
//! Example
//! ```ignore
//! use wirecall::{Protocol, Server, ServerConfig, LinkConfig};
//!
//! let config = ServerConfig {
//!     link: LinkConfig {
//!         stream_path: Some("/tmp/demo.sock".into()),
//!         ..LinkConfig::default()
//!     },
//!     ..ServerConfig::default()
//! };
//! let mut server = Server::new(config).unwrap();
//! server.handle().register_protocol(
//!     Protocol::new(7).action(3, |exchange| {
//!         exchange.respond(0, 0, |_reply| Ok(()))
//!     }),
//! ).unwrap();
//! server.run().unwrap();
//! ```

// Core config and errors
pub use wirecall_core::config::Config;
pub use wirecall_core::constants;
pub use wirecall_core::error::{ErrorKind, Result};
// Wire: frames in and out
pub use wirecall_wire::{FrameHeader, MessageBuilder, MessageReader, HEADER_SIZE};
// Link: transport configuration, handles, client side
pub use wirecall_link::{
    ClientConfig, ClientConnection, ConnHandle, LinkConfig, ListenKind, Reactor,
};
// Server: dispatch core and control protocol helpers
pub use wirecall_server::{
    control, Envelope, Exchange, Protocol, Server, ServerConfig, ServerHandle,
};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        ClientConfig, ClientConnection, ConnHandle, ErrorKind, Exchange, LinkConfig,
        MessageBuilder, MessageReader, Protocol, Result, Server, ServerConfig, ServerHandle,
    };
}
