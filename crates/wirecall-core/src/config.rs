use std::default::Default;

use crate::constants::{DEFAULT_MAX_MESSAGE_SIZE, ENVELOPE_RESERVE, SLOTS_PER_WORKER};

/// Configuration options to tune the server runtime.
#[derive(Clone, Debug)]
pub struct Config {
    /// Max total frame size in bytes, header included. Larger frames are
    /// rejected before send and torn down on receive.
    pub max_message_size: usize,
    /// Number of dispatcher workers. A value above 1 enables the worker pool
    /// and the message arena; 1 (or 0) dispatches inline on the reactor
    /// thread using a pair of persistent buffers.
    pub server_workers: usize,
}

impl Config {
    /// Size of one message slot: the frame cap plus reserved context bytes.
    pub fn slot_size(&self) -> usize {
        self.max_message_size + ENVELOPE_RESERVE
    }

    /// Number of arena slots provisioned for the configured worker count.
    pub fn arena_capacity(&self) -> usize {
        self.server_workers.max(1) * SLOTS_PER_WORKER
    }

    /// Whether the worker pool (and arena) are in play.
    pub fn is_threaded(&self) -> bool {
        self.server_workers > 1
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            server_workers: 1,
        }
    }
}
