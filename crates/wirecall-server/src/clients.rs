use std::collections::HashMap;

use tracing::warn;

use wirecall_core::constants::{PROTOCOL_ALL, SUBSCRIPTION_BYTES};
use wirecall_link::{ConnHandle, Endpoint};

/// Per-client subscription bitmap: one bit per protocol id.
///
/// Protocol `0xFF` is the "all protocols" sentinel: subscribing to it sets
/// every bit, unsubscribing from it clears every bit.
#[derive(Clone, Debug)]
pub(crate) struct Subscriptions([u8; SUBSCRIPTION_BYTES]);

impl Subscriptions {
    pub fn new() -> Self {
        Self([0; SUBSCRIPTION_BYTES])
    }

    pub fn subscribe(&mut self, protocol: u8) {
        if protocol == PROTOCOL_ALL {
            self.0 = [0xFF; SUBSCRIPTION_BYTES];
            return;
        }
        self.0[protocol as usize / 8] |= 1u8 << (protocol % 8);
    }

    pub fn unsubscribe(&mut self, protocol: u8) {
        if protocol == PROTOCOL_ALL {
            self.0 = [0; SUBSCRIPTION_BYTES];
            return;
        }
        self.0[protocol as usize / 8] &= !(1u8 << (protocol % 8));
    }

    pub fn contains(&self, protocol: u8) -> bool {
        self.0[protocol as usize / 8] & (1u8 << (protocol % 8)) != 0
    }
}

/// One connected (or subscribed) client.
#[derive(Debug)]
pub(crate) struct ClientRecord {
    pub handle: ConnHandle,
    pub endpoint: Endpoint,
    pub subscriptions: Subscriptions,
}

impl ClientRecord {
    pub fn new(handle: ConnHandle, endpoint: Endpoint) -> Self {
        Self { handle, endpoint, subscriptions: Subscriptions::new() }
    }
}

/// The client table, keyed uniquely by connection handle.
#[derive(Debug, Default)]
pub(crate) struct ClientTable {
    map: HashMap<ConnHandle, ClientRecord>,
}

impl ClientTable {
    pub fn insert(&mut self, record: ClientRecord) {
        if let Some(stale) = self.map.insert(record.handle, record) {
            // A handle can only reappear if teardown never ran for it.
            warn!("client table replaced a stale record for {}", stale.handle);
        }
    }

    pub fn get(&self, handle: ConnHandle) -> Option<&ClientRecord> {
        self.map.get(&handle)
    }

    pub fn get_mut(&mut self, handle: ConnHandle) -> Option<&mut ClientRecord> {
        self.map.get_mut(&handle)
    }

    pub fn remove(&mut self, handle: ConnHandle) -> Option<ClientRecord> {
        self.map.remove(&handle)
    }

    pub fn drain(&mut self) -> Vec<ClientRecord> {
        self.map.drain().map(|(_, record)| record).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientRecord> {
        self.map.values()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn dgram_record(handle: i32) -> ClientRecord {
        ClientRecord::new(
            ConnHandle(handle),
            Endpoint::Datagram { peer: PathBuf::from(format!("/tmp/peer-{}", handle)) },
        )
    }

    #[test]
    fn subscription_bits_are_independent() {
        let mut subs = Subscriptions::new();
        subs.subscribe(5);
        subs.subscribe(200);
        assert!(subs.contains(5));
        assert!(subs.contains(200));
        assert!(!subs.contains(6));

        subs.unsubscribe(5);
        assert!(!subs.contains(5));
        assert!(subs.contains(200));
    }

    #[test]
    fn sentinel_sets_and_clears_all() {
        let mut subs = Subscriptions::new();
        subs.subscribe(PROTOCOL_ALL);
        for protocol in 0..=254u8 {
            assert!(subs.contains(protocol));
        }

        subs.unsubscribe(PROTOCOL_ALL);
        for protocol in 0..=254u8 {
            assert!(!subs.contains(protocol));
        }
    }

    #[test]
    fn table_is_keyed_uniquely_by_handle() {
        let mut table = ClientTable::default();
        table.insert(dgram_record(1));
        table.insert(dgram_record(2));
        table.insert(dgram_record(1));
        assert_eq!(table.len(), 2);
        assert!(table.get(ConnHandle(1)).is_some());

        let removed = table.remove(ConnHandle(1)).unwrap();
        assert_eq!(removed.handle, ConnHandle(1));
        assert!(table.get(ConnHandle(1)).is_none());
        assert_eq!(table.len(), 1);
    }
}
