use std::collections::HashMap;
use std::sync::Arc;

use wirecall_core::constants::CONTROL_PROTOCOL_ID;
use wirecall_core::error::{ErrorKind, Result};

use crate::envelope::Exchange;

/// A registered action handler.
///
/// Handlers run on the reactor thread in single-threaded mode and on worker
/// threads otherwise; in the latter case handlers for the same connection
/// MAY execute concurrently. Dispatch order follows enqueue order, but no
/// per-client serialization is promised.
pub type ActionHandler = Arc<dyn Fn(&mut Exchange<'_>) -> Result<()> + Send + Sync>;

/// A protocol: an id plus its action handlers.
pub struct Protocol {
    id: u8,
    actions: HashMap<u8, ActionHandler>,
}

impl Protocol {
    /// Creates an empty protocol with the given id.
    pub fn new(id: u8) -> Self {
        Self { id, actions: HashMap::new() }
    }

    /// Adds a handler for `action`, replacing any previous one.
    pub fn action<F>(mut self, action: u8, handler: F) -> Self
    where
        F: Fn(&mut Exchange<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.actions.insert(action, Arc::new(handler));
        self
    }

    /// The protocol id.
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Number of registered actions.
    pub fn action_count(&self) -> usize {
        self.actions.len()
    }
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protocol")
            .field("id", &self.id)
            .field("actions", &self.actions.len())
            .finish()
    }
}

/// Mapping from protocol id to protocol. All access serializes on the server-wide
/// state lock; lookups clone the handler `Arc` so invocation happens outside
/// the lock.
#[derive(Debug, Default)]
pub(crate) struct ProtocolRegistry {
    map: HashMap<u8, Protocol>,
}

impl ProtocolRegistry {
    pub fn register(&mut self, protocol: Protocol) {
        self.map.insert(protocol.id, protocol);
    }

    pub fn unregister(&mut self, id: u8) -> Result<()> {
        if id == CONTROL_PROTOCOL_ID {
            // The control protocol must stay registered for the server's
            // lifetime.
            return Err(ErrorKind::InvalidArgument("control protocol cannot be removed"));
        }
        self.map.remove(&id);
        Ok(())
    }

    pub fn lookup(&self, protocol: u8, action: u8) -> Option<ActionHandler> {
        self.map.get(&protocol).and_then(|p| p.actions.get(&action)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Protocol {
        Protocol::new(9).action(1, |_exchange| Ok(()))
    }

    #[test]
    fn lookup_finds_registered_action() {
        let mut registry = ProtocolRegistry::default();
        registry.register(noop());
        assert!(registry.lookup(9, 1).is_some());
        assert!(registry.lookup(9, 2).is_none());
        assert!(registry.lookup(8, 1).is_none());
    }

    #[test]
    fn unregister_removes_protocol() {
        let mut registry = ProtocolRegistry::default();
        registry.register(noop());
        registry.unregister(9).unwrap();
        assert!(registry.lookup(9, 1).is_none());
    }

    #[test]
    fn control_protocol_is_not_removable() {
        let mut registry = ProtocolRegistry::default();
        registry.register(crate::control::control_protocol());
        assert!(registry.unregister(CONTROL_PROTOCOL_ID).is_err());
        assert!(registry.lookup(CONTROL_PROTOCOL_ID, crate::control::CONTROL_SUBSCRIBE).is_some());
    }

    #[test]
    fn registering_same_id_replaces() {
        let mut registry = ProtocolRegistry::default();
        registry.register(noop());
        registry.register(Protocol::new(9).action(2, |_exchange| Ok(())));
        assert!(registry.lookup(9, 1).is_none());
        assert!(registry.lookup(9, 2).is_some());
    }
}
