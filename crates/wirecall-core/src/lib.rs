#![warn(missing_docs)]

//! wirecall-core: foundational types and utilities.
//!
//! This crate provides the minimal set of core utilities shared across all
//! layers:
//! - Configuration types
//! - Error handling
//! - Protocol constants
//! - Memory utilities (message arena)
//!
//! Transport and dispatch logic lives in the specialized crates:
//! - `wirecall-wire`: frame layout, message builder and reader
//! - `wirecall-link`: reactor and Unix-socket link
//! - `wirecall-server`: client table, registry, worker pool, dispatch

/// Protocol constants shared across layers.
pub mod constants {
    /// Protocol id reserved for the built-in control protocol.
    pub const CONTROL_PROTOCOL_ID: u8 = 0;
    /// Sentinel protocol id meaning "all protocols" in subscription updates.
    pub const PROTOCOL_ALL: u8 = 0xFF;
    /// Default cap on a single frame, header included.
    pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4096;
    /// Bytes reserved per arena slot for envelope context ahead of the frame.
    pub const ENVELOPE_RESERVE: usize = 512;
    /// Arena slots provisioned per configured worker.
    pub const SLOTS_PER_WORKER: usize = 32;
    /// Size of the per-client subscription bitmap in bytes (256 protocol bits).
    pub const SUBSCRIPTION_BYTES: usize = 32;
}

/// Configuration options for the server runtime.
pub mod config;
/// Error types and results.
pub mod error;
/// Slot arena backing messages in flight.
pub mod arena;
