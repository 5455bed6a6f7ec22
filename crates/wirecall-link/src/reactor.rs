use std::sync::Arc;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};

use wirecall_core::error::Result;

use crate::handle::ConnHandle;

const WAKER_TOKEN: Token = Token(usize::MAX);
const DEFAULT_EVENT_CAPACITY: usize = 32;

/// Bit set of readiness events delivered per handle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventSet(u32);

impl EventSet {
    /// Data is ready to be read.
    pub const IN: EventSet = EventSet(0x1);
    /// The peer closed its end.
    pub const DISCONNECT: EventSet = EventSet(0x2);

    /// Union of two sets.
    pub fn with(self, other: EventSet) -> EventSet {
        EventSet(self.0 | other.0)
    }

    /// True when the readable bit is set.
    pub fn is_readable(&self) -> bool {
        self.0 & Self::IN.0 != 0
    }

    /// True when the disconnect bit is set.
    pub fn is_disconnect(&self) -> bool {
        self.0 & Self::DISCONNECT.0 != 0
    }

    /// True when no bit is set.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// One readiness notification.
#[derive(Clone, Copy, Debug)]
pub struct IoEvent {
    /// The handle the event fired for.
    pub handle: ConnHandle,
    /// The readiness bits.
    pub events: EventSet,
}

/// Wakes a blocked [`Reactor::wait`] from another thread.
///
/// Used by the shutdown path: clearing the running flag alone would leave the
/// reactor parked until the next I/O event.
#[derive(Clone)]
pub struct ReactorNotifier {
    waker: Arc<Waker>,
}

impl ReactorNotifier {
    /// Interrupts the current (or next) `wait`.
    pub fn wake(&self) -> Result<()> {
        self.waker.wake()?;
        Ok(())
    }
}

impl std::fmt::Debug for ReactorNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorNotifier").finish()
    }
}

/// Thin wrapper over the OS readiness primitive.
///
/// Handles are registered read-only; the two event kinds surfaced are `IN`
/// and `DISCONNECT`. Membership is only ever changed from the thread driving
/// [`Reactor::wait`].
pub struct Reactor {
    poll: Poll,
    events: Events,
    notifier: ReactorNotifier,
}

impl Reactor {
    /// Creates a reactor with the default event capacity.
    pub fn new() -> Result<Self> {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Creates a reactor draining up to `capacity` events per wait.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        Ok(Self {
            poll,
            events: Events::with_capacity(capacity),
            notifier: ReactorNotifier { waker: Arc::new(waker) },
        })
    }

    /// Registers a handle for readable/disconnect readiness.
    pub fn add(&self, handle: ConnHandle) -> Result<()> {
        self.poll.registry().register(
            &mut SourceFd(&handle.0),
            Token(handle.0 as usize),
            Interest::READABLE,
        )?;
        Ok(())
    }

    /// Deregisters a handle. The descriptor must still be open.
    pub fn remove(&self, handle: ConnHandle) -> Result<()> {
        self.poll.registry().deregister(&mut SourceFd(&handle.0))?;
        Ok(())
    }

    /// A cloneable handle for waking `wait` from other threads.
    pub fn notifier(&self) -> ReactorNotifier {
        self.notifier.clone()
    }

    /// Blocks until at least one event arrives or the reactor is woken.
    ///
    /// Events are appended to `out`; the count may be zero after a wake.
    pub fn wait(&mut self, out: &mut Vec<IoEvent>) -> Result<usize> {
        out.clear();
        self.poll.poll(&mut self.events, None)?;
        for event in self.events.iter() {
            if event.token() == WAKER_TOKEN {
                continue;
            }
            let mut set = EventSet::default();
            if event.is_readable() {
                set = set.with(EventSet::IN);
            }
            if event.is_read_closed() || event.is_error() {
                set = set.with(EventSet::DISCONNECT);
            }
            if set.is_empty() {
                continue;
            }
            out.push(IoEvent { handle: ConnHandle(event.token().0 as i32), events: set });
        }
        Ok(out.len())
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor").finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::os::fd::AsRawFd;

    use super::*;

    #[test]
    fn readable_end_reports_in() {
        let (mut tx, rx) = std::os::unix::net::UnixStream::pair().unwrap();
        rx.set_nonblocking(true).unwrap();

        let mut reactor = Reactor::new().unwrap();
        let handle = ConnHandle(rx.as_raw_fd());
        reactor.add(handle).unwrap();

        tx.write_all(b"ping").unwrap();

        let mut events = Vec::new();
        let count = reactor.wait(&mut events).unwrap();
        assert_eq!(count, 1);
        assert_eq!(events[0].handle, handle);
        assert!(events[0].events.is_readable());
    }

    #[test]
    fn closed_peer_reports_disconnect() {
        let (tx, rx) = std::os::unix::net::UnixStream::pair().unwrap();
        rx.set_nonblocking(true).unwrap();

        let mut reactor = Reactor::new().unwrap();
        let handle = ConnHandle(rx.as_raw_fd());
        reactor.add(handle).unwrap();

        drop(tx);

        let mut events = Vec::new();
        reactor.wait(&mut events).unwrap();
        assert!(events.iter().any(|e| e.handle == handle && e.events.is_disconnect()));
    }

    #[test]
    fn notifier_interrupts_wait() {
        let mut reactor = Reactor::new().unwrap();
        let notifier = reactor.notifier();

        let waker_thread = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            notifier.wake().unwrap();
        });

        let mut events = Vec::new();
        let count = reactor.wait(&mut events).unwrap();
        assert_eq!(count, 0);
        waker_thread.join().unwrap();
    }
}
