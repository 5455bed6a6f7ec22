use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, error};

use crate::envelope::QueuedMessage;
use crate::server::ServerShared;

/// Fixed pool of dispatcher threads behind a bounded FIFO queue.
///
/// Workers pop queued messages, invoke the handler, and drop the message;
/// the drop is what returns its arena slot, always after handler completion.
/// Each worker owns a scratchpad used as the outgoing response buffer, so a
/// handler can read from its inbound slot while composing a reply.
///
/// Messages are popped in enqueue order, but nothing serializes handlers of
/// the same connection: two frames from one client MAY run concurrently on
/// different workers. Handler authors must not assume per-client ordering.
pub(crate) struct WorkerPool {
    queue: Option<Sender<QueuedMessage>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `count` workers with `scratch_size`-byte response buffers.
    pub fn start(
        count: usize,
        scratch_size: usize,
        queue_depth: usize,
        shared: Arc<ServerShared>,
    ) -> Self {
        let (queue, feed) = bounded::<QueuedMessage>(queue_depth);
        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let feed: Receiver<QueuedMessage> = feed.clone();
            let shared = Arc::clone(&shared);
            let worker = thread::Builder::new()
                .name(format!("wirecall-worker-{}", index))
                .spawn(move || {
                    let mut scratch = Vec::with_capacity(scratch_size);
                    while let Ok(message) = feed.recv() {
                        ServerShared::dispatch_frame(
                            &shared,
                            message.client,
                            message.reply.as_deref(),
                            message.frame(),
                            &mut scratch,
                        );
                        // message drops here, freeing its arena slot
                    }
                    debug!("worker {} draining out", index);
                })
                .expect("failed to spawn dispatch worker");
            workers.push(worker);
        }
        Self { queue: Some(queue), workers }
    }

    /// Enqueues a message, blocking while the queue is full.
    pub fn dispatch(&self, message: QueuedMessage) {
        if let Some(queue) = &self.queue {
            if queue.send(message).is_err() {
                // Shutdown raced us; the dropped message frees its slot.
                error!("dispatch after worker pool shutdown, message dropped");
            }
        }
    }

    /// Signals the workers and waits for them to finish the queue.
    pub fn shutdown(&mut self) {
        self.queue.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("dispatch worker panicked during shutdown");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").field("workers", &self.workers.len()).finish()
    }
}
