use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, warn};

use wirecall_core::arena::Arena;
use wirecall_core::config::Config;
use wirecall_core::constants::{CONTROL_PROTOCOL_ID, PROTOCOL_ALL};
use wirecall_core::error::{ErrorKind, Result};
use wirecall_link::{
    ConnHandle, Endpoint, IoEvent, Link, LinkConfig, ListenKind, Reactor, ReactorNotifier,
    SocketLink,
};
use wirecall_wire::frame;

use crate::clients::{ClientRecord, ClientTable};
use crate::control;
use crate::envelope::{Envelope, Exchange, QueuedMessage};
use crate::registry::{Protocol, ProtocolRegistry};
use crate::workers::WorkerPool;

/// Connection lifecycle callback.
pub type ConnCallback = Arc<dyn Fn(ConnHandle) + Send + Sync>;

/// Server construction options.
pub struct ServerConfig {
    /// Socket paths and frame cap for the default Unix-socket link.
    pub link: LinkConfig,
    /// Dispatcher workers; above 1 enables the worker pool and arena.
    pub server_workers: usize,
    /// Invoked after a client is admitted to the table.
    pub on_connect: Option<ConnCallback>,
    /// Invoked when a client is torn down (disconnect or unsubscribe-all).
    pub on_disconnect: Option<ConnCallback>,
    /// Externally built reactor, for callers that tune its event capacity.
    pub reactor: Option<Reactor>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            server_workers: 1,
            on_connect: None,
            on_disconnect: None,
            reactor: None,
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("link", &self.link)
            .field("server_workers", &self.server_workers)
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .finish()
    }
}

pub(crate) struct ServerState {
    pub clients: ClientTable,
    pub registry: ProtocolRegistry,
}

/// State shared between the reactor thread, the workers, and user handles.
pub(crate) struct ServerShared {
    pub link: Box<dyn Link>,
    /// The single server-wide lock guarding the client table and registry.
    pub state: Mutex<ServerState>,
    pub on_connect: Option<ConnCallback>,
    pub on_disconnect: Option<ConnCallback>,
    pub config: Config,
    pub running: AtomicBool,
    pub notifier: ReactorNotifier,
}

impl ServerShared {
    fn lock(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().expect("server state poisoned")
    }

    /// Dispatches one received frame: handler lookup under the state lock,
    /// invocation outside it. An unknown `(protocol, action)` pair is
    /// answered with a control error event to the sender and never surfaced
    /// locally; a failing handler is logged and the loop moves on.
    pub(crate) fn dispatch_frame(
        shared: &Arc<ServerShared>,
        client: ConnHandle,
        reply: Option<&Path>,
        frame: &[u8],
        out: &mut Vec<u8>,
    ) {
        let envelope = Envelope::new(client, reply, frame);
        let message_id = envelope.message_id();
        let (protocol, action) = (envelope.protocol(), envelope.action());

        let handler = shared.lock().registry.lookup(protocol, action);

        let server = ServerHandle { shared: Arc::clone(shared) };
        match handler {
            Some(handler) => {
                let mut exchange = Exchange { server: &server, envelope: &envelope, out };
                if let Err(err) = handler(&mut exchange) {
                    warn!(
                        "handler ({}, {}) failed for message {}: {}",
                        protocol, action, message_id, err
                    );
                }
            }
            None => {
                warn!("no handler registered for ({}, {})", protocol, action);
                control::send_error_event(
                    &server,
                    &envelope,
                    message_id,
                    control::ERROR_NOT_FOUND,
                    out,
                );
            }
        }
    }
}

/// Cloneable handle to a running server.
///
/// Safe to use from handlers, worker threads, and application threads alike.
#[derive(Clone)]
pub struct ServerHandle {
    pub(crate) shared: Arc<ServerShared>,
}

impl ServerHandle {
    /// Registers a protocol's handlers. Id 0 is reserved for control.
    pub fn register_protocol(&self, protocol: Protocol) -> Result<()> {
        if protocol.id() == CONTROL_PROTOCOL_ID {
            return Err(ErrorKind::InvalidArgument("protocol id 0 is reserved"));
        }
        self.shared.lock().registry.register(protocol);
        Ok(())
    }

    /// Removes a protocol; inflight lookups already hold their handler.
    pub fn unregister_protocol(&self, id: u8) -> Result<()> {
        self.shared.lock().registry.unregister(id)
    }

    /// Sends a response to the originator of `envelope`, echoing its
    /// message id.
    pub fn respond(&self, envelope: &Envelope<'_>, frame: &mut [u8]) -> Result<()> {
        frame::set_message_id(frame, envelope.message_id());
        self.respond_raw(envelope, frame)
    }

    /// Routes an already-stamped frame back to the sender: through its
    /// client record when one exists, by datagram address otherwise.
    pub(crate) fn respond_raw(&self, envelope: &Envelope<'_>, frame: &[u8]) -> Result<()> {
        let endpoint = self.shared.lock().clients.get(envelope.client).map(|r| r.endpoint.clone());
        match endpoint {
            Some(endpoint) => self.shared.link.send_client(&endpoint, frame, true),
            None => match envelope.reply {
                Some(path) => self.shared.link.respond(path, frame),
                None => Err(ErrorKind::NotFound),
            },
        }
    }

    /// Sends an unsolicited event to one client, subscription or not.
    /// Events carry message id 0.
    pub fn send_event(&self, client: ConnHandle, frame: &mut [u8], blocking: bool) -> Result<()> {
        frame::set_message_id(frame, 0);
        let endpoint = self
            .shared
            .lock()
            .clients
            .get(client)
            .map(|r| r.endpoint.clone())
            .ok_or(ErrorKind::NotFound)?;
        self.shared.link.send_client(&endpoint, frame, blocking)
    }

    /// Sends an event to every client subscribed to the frame's protocol,
    /// in table iteration order. A failing client is logged and skipped;
    /// the broadcast continues.
    pub fn broadcast(&self, frame: &mut [u8], blocking: bool) -> Result<()> {
        frame::set_message_id(frame, 0);
        let protocol = frame::protocol_of(frame);
        let targets: Vec<(ConnHandle, Endpoint)> = {
            let state = self.shared.lock();
            state
                .clients
                .iter()
                .filter(|record| record.subscriptions.contains(protocol))
                .map(|record| (record.handle, record.endpoint.clone()))
                .collect()
        };
        for (handle, endpoint) in targets {
            if let Err(err) = self.shared.link.send_client(&endpoint, frame, blocking) {
                warn!("broadcast to {} failed: {}", handle, err);
            }
        }
        Ok(())
    }

    /// Asks the reactor loop to exit; teardown runs on the loop thread.
    pub fn shutdown(&self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            if let Err(err) = self.shared.notifier.wake() {
                warn!("failed to wake reactor for shutdown: {}", err);
            }
        }
    }

    /// Whether the loop is still meant to run.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Number of clients currently in the table.
    pub fn client_count(&self) -> usize {
        self.shared.lock().clients.len()
    }

    /// The frame cap this server enforces on both directions.
    pub fn max_message_size(&self) -> usize {
        self.shared.config.max_message_size
    }

    pub(crate) fn subscribe_client(&self, envelope: &Envelope<'_>, protocol: u8) -> Result<()> {
        let mut connected = None;
        {
            let mut state = self.shared.lock();
            if let Some(record) = state.clients.get_mut(envelope.client) {
                record.subscriptions.subscribe(protocol);
            } else {
                // First contact from a datagram peer: synthesize its record.
                let reply = envelope.reply.ok_or(ErrorKind::Unsupported)?;
                let created = self.shared.link.create_client(reply)?;
                let mut record = ClientRecord::new(created.handle, created.endpoint);
                record.subscriptions.subscribe(protocol);
                connected = Some(created.handle);
                state.clients.insert(record);
            }
        }
        if let (Some(handle), Some(callback)) = (connected, &self.shared.on_connect) {
            callback(handle);
        }
        Ok(())
    }

    pub(crate) fn unsubscribe_client(&self, envelope: &Envelope<'_>, protocol: u8) -> Result<()> {
        {
            let mut state = self.shared.lock();
            match state.clients.get_mut(envelope.client) {
                Some(record) => record.subscriptions.unsubscribe(protocol),
                None => return Ok(()),
            }
        }
        if protocol == PROTOCOL_ALL {
            self.destroy_client(envelope.client);
        }
        Ok(())
    }

    /// Removes a client and releases its transport state. `on_disconnect`
    /// fires exactly once, only when a record actually existed.
    pub(crate) fn destroy_client(&self, handle: ConnHandle) {
        let record = self.shared.lock().clients.remove(handle);
        if let Some(record) = record {
            if let Some(callback) = &self.shared.on_disconnect {
                callback(handle);
            }
            self.shared.link.destroy_client(handle, &record.endpoint);
        }
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle").finish()
    }
}

enum DispatchMode {
    /// Inline invocation on the reactor thread, with the two persistent
    /// buffers.
    Inline { recv_buf: Vec<u8>, send_buf: Vec<u8> },
    /// Arena-backed handoff to the worker pool.
    Pooled { arena: Arena, pool: WorkerPool },
}

/// The server: reactor loop, dispatch, and lifecycle.
///
/// Constructed as a value; `run` drives the loop until [`ServerHandle::shutdown`]
/// and then tears everything down. Teardown is idempotent.
pub struct Server {
    shared: Arc<ServerShared>,
    reactor: Reactor,
    listen_handle: ConnHandle,
    dgram_handle: ConnHandle,
    mode: DispatchMode,
    events: Vec<IoEvent>,
    down: bool,
}

impl Server {
    /// Builds a server over the default Unix-socket link.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let link = SocketLink::new(config.link.clone());
        Self::with_link(Box::new(link), config)
    }

    /// Builds a server over a custom link implementation.
    pub fn with_link(mut link: Box<dyn Link>, mut config: ServerConfig) -> Result<Self> {
        let core = Config {
            max_message_size: link.max_message_size(),
            server_workers: config.server_workers,
        };
        let reactor = match config.reactor.take() {
            Some(reactor) => reactor,
            None => Reactor::new()?,
        };

        // Either endpoint kind may be unsupported, but not both.
        let listen_handle = match link.listen(ListenKind::Stream) {
            Ok(handle) => {
                reactor.add(handle)?;
                handle
            }
            Err(ErrorKind::Unsupported) => ConnHandle::INVALID,
            Err(err) => return Err(err),
        };
        let dgram_handle = match link.listen(ListenKind::Datagram) {
            Ok(handle) => {
                reactor.add(handle)?;
                handle
            }
            Err(ErrorKind::Unsupported) => ConnHandle::INVALID,
            Err(err) => return Err(err),
        };
        if listen_handle == ConnHandle::INVALID && dgram_handle == ConnHandle::INVALID {
            error!("link provides neither stream nor datagram endpoint");
            return Err(ErrorKind::Unsupported);
        }

        let mut registry = ProtocolRegistry::default();
        registry.register(control::control_protocol());

        let shared = Arc::new(ServerShared {
            link,
            state: Mutex::new(ServerState { clients: ClientTable::default(), registry }),
            on_connect: config.on_connect.take(),
            on_disconnect: config.on_disconnect.take(),
            config: core.clone(),
            running: AtomicBool::new(true),
            notifier: reactor.notifier(),
        });

        let mode = if core.is_threaded() {
            let arena = Arena::new(core.arena_capacity(), core.slot_size());
            let pool = WorkerPool::start(
                core.server_workers,
                core.slot_size(),
                core.arena_capacity(),
                Arc::clone(&shared),
            );
            DispatchMode::Pooled { arena, pool }
        } else {
            DispatchMode::Inline {
                recv_buf: vec![0u8; core.slot_size()],
                send_buf: Vec::with_capacity(core.slot_size()),
            }
        };

        info!(
            "server up: stream={} dgram={} workers={}",
            listen_handle, dgram_handle, core.server_workers
        );
        Ok(Self {
            shared,
            reactor,
            listen_handle,
            dgram_handle,
            mode,
            events: Vec::new(),
            down: false,
        })
    }

    /// A cloneable handle for handlers and application threads.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle { shared: Arc::clone(&self.shared) }
    }

    /// The stream listener handle, if that endpoint is up.
    pub fn listen_handle(&self) -> ConnHandle {
        self.listen_handle
    }

    /// The datagram endpoint handle, if it is up.
    pub fn dgram_handle(&self) -> ConnHandle {
        self.dgram_handle
    }

    /// Free arena slots; `None` in single-threaded mode.
    pub fn arena_available(&self) -> Option<usize> {
        match &self.mode {
            DispatchMode::Pooled { arena, .. } => Some(arena.available()),
            DispatchMode::Inline { .. } => None,
        }
    }

    /// Drives the reactor loop until shutdown, then tears down.
    pub fn run(&mut self) -> Result<()> {
        debug!("server loop started [{}, {}]", self.listen_handle, self.dgram_handle);
        while self.shared.running.load(Ordering::Acquire) {
            let count = match self.reactor.wait(&mut self.events) {
                Ok(count) => count,
                Err(ErrorKind::Io(err)) if err.kind() == std::io::ErrorKind::Interrupted => {
                    continue;
                }
                Err(err) => {
                    self.teardown();
                    return Err(err);
                }
            };
            for index in 0..count {
                let event = self.events[index];
                self.handle_event(event);
            }
        }
        self.teardown();
        Ok(())
    }

    fn handle_event(&mut self, event: IoEvent) {
        if event.handle == self.listen_handle {
            self.handle_accept();
        } else if event.handle == self.dgram_handle {
            self.drain_dgram();
        } else {
            self.handle_client_event(event);
        }
    }

    fn handle_accept(&mut self) {
        loop {
            let client = match self.shared.link.accept() {
                Ok(client) => client,
                Err(ErrorKind::NoData) => break,
                Err(err) => {
                    // Transient failure; the next readiness event retries.
                    error!("failed to accept client: {}", err);
                    break;
                }
            };
            let handle = client.handle;
            self.shared.lock().clients.insert(ClientRecord::new(handle, client.endpoint));
            if let Err(err) = self.reactor.add(handle) {
                error!("failed to watch {}: {}", handle, err);
                self.handle().destroy_client(handle);
                continue;
            }
            if let Some(callback) = &self.shared.on_connect {
                callback(handle);
            }
        }
    }

    fn drain_dgram(&mut self) {
        match &mut self.mode {
            DispatchMode::Inline { recv_buf, send_buf } => loop {
                let info = match self.shared.link.recv_packet(recv_buf) {
                    Ok(info) => info,
                    Err(ErrorKind::NoData) => break,
                    Err(err) => {
                        error!("recv_packet failed: {}", err);
                        break;
                    }
                };
                ServerShared::dispatch_frame(
                    &self.shared,
                    info.client,
                    info.reply.as_deref(),
                    &recv_buf[..info.len],
                    send_buf,
                );
            },
            DispatchMode::Pooled { arena, pool } => loop {
                let mut slot = arena.allocate();
                let info = match self.shared.link.recv_packet(slot.as_mut_slice()) {
                    Ok(info) => info,
                    Err(ErrorKind::NoData) => break,
                    Err(err) => {
                        error!("recv_packet failed: {}", err);
                        break;
                    }
                };
                pool.dispatch(QueuedMessage {
                    client: info.client,
                    reply: info.reply,
                    slot,
                    len: info.len,
                });
            },
        }
    }

    fn handle_client_event(&mut self, event: IoEvent) {
        if event.events.is_disconnect() {
            if let Err(err) = self.reactor.remove(event.handle) {
                warn!("failed to unwatch {}: {}", event.handle, err);
            }
            self.handle().destroy_client(event.handle);
            return;
        }

        let endpoint = self.shared.lock().clients.get(event.handle).map(|r| r.endpoint.clone());
        let Some(endpoint) = endpoint else {
            debug!("readiness for unknown client {}", event.handle);
            return;
        };

        let mut broken = false;
        match &mut self.mode {
            DispatchMode::Inline { recv_buf, send_buf } => loop {
                match self.shared.link.recv_client(&endpoint, recv_buf) {
                    Ok(len) => ServerShared::dispatch_frame(
                        &self.shared,
                        event.handle,
                        None,
                        &recv_buf[..len],
                        send_buf,
                    ),
                    Err(ErrorKind::NoData) => break,
                    Err(err) => {
                        error!("recv_client {} failed: {}", event.handle, err);
                        broken = true;
                        break;
                    }
                }
            },
            DispatchMode::Pooled { arena, pool } => loop {
                let mut slot = arena.allocate();
                match self.shared.link.recv_client(&endpoint, slot.as_mut_slice()) {
                    Ok(len) => pool.dispatch(QueuedMessage {
                        client: event.handle,
                        reply: None,
                        slot,
                        len,
                    }),
                    Err(ErrorKind::NoData) => break,
                    Err(err) => {
                        error!("recv_client {} failed: {}", event.handle, err);
                        broken = true;
                        break;
                    }
                }
            },
        }
        if broken {
            // A partial frame poisons the stream; the connection goes down.
            let _ = self.reactor.remove(event.handle);
            self.handle().destroy_client(event.handle);
        }
    }

    fn teardown(&mut self) {
        if self.down {
            return;
        }
        self.down = true;
        self.shared.running.store(false, Ordering::Release);

        // Disconnect callbacks do not fire for shutdown teardown.
        let records = self.shared.lock().clients.drain();
        for record in records {
            self.shared.link.destroy_client(record.handle, &record.endpoint);
        }

        if let DispatchMode::Pooled { pool, .. } = &mut self.mode {
            pool.shutdown();
        }
        info!("server torn down");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("listen", &self.listen_handle)
            .field("dgram", &self.dgram_handle)
            .field("down", &self.down)
            .finish()
    }
}

static DEFAULT_SERVER: Mutex<Option<ServerHandle>> = Mutex::new(None);

/// Installs the process-wide default server handle.
///
/// A second install without [`clear_default`] fails `AlreadyInitialized`.
pub fn set_default(handle: ServerHandle) -> Result<()> {
    let mut slot = DEFAULT_SERVER.lock().expect("default server slot poisoned");
    if slot.is_some() {
        return Err(ErrorKind::AlreadyInitialized);
    }
    *slot = Some(handle);
    Ok(())
}

/// The process-wide default server handle, when one is installed.
pub fn default_handle() -> Option<ServerHandle> {
    DEFAULT_SERVER.lock().expect("default server slot poisoned").clone()
}

/// Removes and returns the default server handle.
pub fn clear_default() -> Option<ServerHandle> {
    DEFAULT_SERVER.lock().expect("default server slot poisoned").take()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_requires_at_least_one_endpoint() {
        let config = ServerConfig::default();
        assert!(matches!(Server::new(config), Err(ErrorKind::Unsupported)));
    }

    #[test]
    fn default_server_slot_rejects_double_install() {
        let path = std::env::temp_dir()
            .join(format!("wirecall-default-{}.sock", std::process::id()));
        let config = ServerConfig {
            link: LinkConfig { dgram_path: Some(path), ..LinkConfig::default() },
            ..ServerConfig::default()
        };
        let server = Server::new(config).unwrap();

        clear_default();
        set_default(server.handle()).unwrap();
        assert!(matches!(set_default(server.handle()), Err(ErrorKind::AlreadyInitialized)));
        assert!(default_handle().is_some());
        clear_default();
        assert!(default_handle().is_none());
    }
}
