use std::sync::{Arc, Condvar, Mutex};

/// Fixed-population slot allocator backing messages in flight.
///
/// The arena owns `capacity` buffers of `slot_size` bytes, all allocated up
/// front. `allocate` hands out a slot as a move-only [`ArenaSlot`]; dropping
/// the slot is the one and only way it returns to the free list, so a slot
/// in flight is referenced by exactly one owner at a time.
///
/// All free-list operations serialize on a single mutex. The arena does not
/// compact or grow.
#[derive(Clone)]
pub struct Arena {
    inner: Arc<ArenaInner>,
}

struct ArenaInner {
    slot_size: usize,
    capacity: usize,
    free: Mutex<Vec<Vec<u8>>>,
    released: Condvar,
}

impl Arena {
    /// Creates an arena of `capacity` slots, each `slot_size` bytes.
    pub fn new(capacity: usize, slot_size: usize) -> Self {
        let free = (0..capacity).map(|_| vec![0u8; slot_size]).collect();
        Self {
            inner: Arc::new(ArenaInner {
                slot_size,
                capacity,
                free: Mutex::new(free),
                released: Condvar::new(),
            }),
        }
    }

    /// Takes a slot, waiting until one is released if the arena is drained.
    ///
    /// The wait applies backpressure to the receive path: no message enters
    /// the process until a slot exists to hold it.
    pub fn allocate(&self) -> ArenaSlot {
        let mut free = self.inner.free.lock().expect("arena lock poisoned");
        loop {
            if let Some(buf) = free.pop() {
                return ArenaSlot { buf, owner: Arc::clone(&self.inner) };
            }
            free = self.inner.released.wait(free).expect("arena lock poisoned");
        }
    }

    /// Takes a slot if one is free right now.
    pub fn try_allocate(&self) -> Option<ArenaSlot> {
        let mut free = self.inner.free.lock().expect("arena lock poisoned");
        free.pop().map(|buf| ArenaSlot { buf, owner: Arc::clone(&self.inner) })
    }

    /// Number of slots currently on the free list.
    pub fn available(&self) -> usize {
        self.inner.free.lock().expect("arena lock poisoned").len()
    }

    /// Total slot population.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Size of each slot in bytes.
    pub fn slot_size(&self) -> usize {
        self.inner.slot_size
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("slot_size", &self.inner.slot_size)
            .field("capacity", &self.inner.capacity)
            .field("available", &self.available())
            .finish()
    }
}

/// A message slot checked out of an [`Arena`].
///
/// The slot is a linear handle: it cannot be cloned, and dropping it returns
/// the buffer to the arena exactly once.
pub struct ArenaSlot {
    buf: Vec<u8>,
    owner: Arc<ArenaInner>,
}

impl ArenaSlot {
    /// The slot contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Mutable view used by the receive path to land a frame.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Slot length (always the arena's slot size).
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Always false; slots have a fixed non-zero size.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Drop for ArenaSlot {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        let mut free = self.owner.free.lock().expect("arena lock poisoned");
        free.push(buf);
        self.owner.released.notify_one();
    }
}

impl std::fmt::Debug for ArenaSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArenaSlot").field("len", &self.buf.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_drop_balance() {
        let arena = Arena::new(4, 128);
        assert_eq!(arena.available(), 4);

        let a = arena.allocate();
        let b = arena.allocate();
        assert_eq!(a.len(), 128);
        assert_eq!(arena.available(), 2);

        drop(a);
        drop(b);
        assert_eq!(arena.available(), 4);
    }

    #[test]
    fn try_allocate_reports_exhaustion() {
        let arena = Arena::new(2, 64);
        let _a = arena.allocate();
        let _b = arena.allocate();
        assert!(arena.try_allocate().is_none());
    }

    #[test]
    fn allocate_blocks_until_release() {
        let arena = Arena::new(1, 64);
        let held = arena.allocate();

        let contended = arena.clone();
        let waiter = std::thread::spawn(move || {
            let slot = contended.allocate();
            slot.len()
        });

        // Give the waiter time to park on the condvar, then release.
        std::thread::sleep(std::time::Duration::from_millis(20));
        drop(held);

        assert_eq!(waiter.join().unwrap(), 64);
        assert_eq!(arena.available(), 1);
    }

    #[test]
    fn slots_free_exactly_once_across_threads() {
        let arena = Arena::new(8, 32);
        let mut handles = Vec::new();
        for _ in 0..4 {
            let arena = arena.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    let mut slot = arena.allocate();
                    slot.as_mut_slice()[0] = 0xAB;
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(arena.available(), 8);
    }
}
