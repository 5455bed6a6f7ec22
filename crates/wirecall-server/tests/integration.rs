//! Integration tests for the wirecall server core.
//!
//! These drive a real server over Unix sockets in a temp directory: stream
//! and datagram clients, dispatch, subscriptions, broadcast, and the
//! worker-pool path.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use wirecall_core::error::ErrorKind;
use wirecall_link::{ClientConfig, ClientConnection, ConnHandle, LinkConfig};
use wirecall_server::{control, Protocol, Server, ServerConfig, ServerHandle};
use wirecall_wire::{MessageBuilder, MessageReader};

fn unique_path(tag: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("wirecall-it-{}-{}-{}.sock", std::process::id(), tag, n))
}

fn stream_config(path: &PathBuf) -> ServerConfig {
    ServerConfig {
        link: LinkConfig { stream_path: Some(path.clone()), ..LinkConfig::default() },
        ..ServerConfig::default()
    }
}

fn dgram_config(path: &PathBuf) -> ServerConfig {
    ServerConfig {
        link: LinkConfig { dgram_path: Some(path.clone()), ..LinkConfig::default() },
        ..ServerConfig::default()
    }
}

/// Protocol 7, action 3: a header-only acknowledgement.
fn ack_protocol() -> Protocol {
    Protocol::new(7).action(3, |exchange| exchange.respond(0, 0, |_reply| Ok(())))
}

fn request_frame(message_id: u32, protocol: u8, action: u8) -> Vec<u8> {
    let mut frame = Vec::new();
    MessageBuilder::new(&mut frame, message_id, protocol, action, 0, 0).finish().unwrap();
    frame
}

struct RunningServer {
    handle: ServerHandle,
    thread: Option<thread::JoinHandle<Server>>,
}

impl RunningServer {
    fn start(server: Server) -> Self {
        let handle = server.handle();
        let mut server = server;
        let thread = thread::spawn(move || {
            server.run().expect("server loop failed");
            server
        });
        Self { handle, thread: Some(thread) }
    }

    fn stop(mut self) -> Server {
        self.handle.shutdown();
        self.thread.take().unwrap().join().unwrap()
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.handle.shutdown();
            let _ = thread.join();
        }
    }
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("timed out waiting for {}", what);
}

#[test]
fn stream_request_gets_matching_response() {
    let path = unique_path("s1");
    let server = Server::new(stream_config(&path)).unwrap();
    server.handle().register_protocol(ack_protocol()).unwrap();
    let running = RunningServer::start(server);

    let client = ClientConnection::connect(ClientConfig::stream(&path)).unwrap();
    client.send(&request_frame(1, 7, 3)).unwrap();

    let mut buf = vec![0u8; 4096];
    let len = client.recv(&mut buf, true).unwrap();
    let reader = MessageReader::new(&buf[..len]).unwrap();
    assert_eq!(reader.header().message_id, 1);
    assert_eq!(reader.header().protocol, 7);
    assert_eq!(reader.header().action, 3);

    running.stop();
}

#[test]
fn unknown_action_reports_error_event_to_sender() {
    let path = unique_path("s2");
    let server = Server::new(stream_config(&path)).unwrap();
    server.handle().register_protocol(ack_protocol()).unwrap();
    let running = RunningServer::start(server);

    let client = ClientConnection::connect(ClientConfig::stream(&path)).unwrap();
    client.send(&request_frame(33, 9, 1)).unwrap();

    let mut buf = vec![0u8; 4096];
    let len = client.recv(&mut buf, true).unwrap();
    let event = control::parse_error_event(&buf[..len]).expect("expected a control error event");
    assert_eq!(event, (33, control::ERROR_NOT_FOUND));

    running.stop();
}

#[test]
fn broadcast_reaches_subscribers_and_nobody_else() {
    let server_path = unique_path("s3");
    let server = Server::new(dgram_config(&server_path)).unwrap();
    let running = RunningServer::start(server);

    let make_client = |tag: &str| {
        ClientConnection::connect(ClientConfig::datagram(&server_path, unique_path(tag))).unwrap()
    };
    let first = make_client("s3-a");
    let second = make_client("s3-b");
    let other = make_client("s3-c");

    let mut frame = Vec::new();
    let len = control::subscribe_frame(&mut frame, 1, 5).unwrap();
    first.send(&frame[..len]).unwrap();
    second.send(&frame[..len]).unwrap();
    let len = control::subscribe_frame(&mut frame, 1, 6).unwrap();
    other.send(&frame[..len]).unwrap();

    let handle = running.handle.clone();
    wait_until("all three subscriptions", || handle.client_count() == 3);

    // An event on protocol 5: both subscribers see it, the third does not.
    let mut event = Vec::new();
    let mut builder = MessageBuilder::new(&mut event, 0, 5, 1, 1, 0);
    builder.buffer(b"tick").unwrap();
    let len = builder.finish().unwrap();
    handle.broadcast(&mut event[..len], true).unwrap();

    let mut buf = vec![0u8; 4096];
    for client in [&first, &second] {
        let got = client.recv(&mut buf, true).unwrap();
        let mut reader = MessageReader::new(&buf[..got]).unwrap();
        assert_eq!(reader.header().protocol, 5);
        assert_eq!(reader.header().message_id, 0);
        assert_eq!(reader.next_buffer().unwrap(), b"tick");
    }

    thread::sleep(Duration::from_millis(50));
    assert!(matches!(other.recv(&mut buf, false), Err(ErrorKind::NoData)));

    running.stop();
}

#[test]
fn unsubscribe_all_destroys_the_client() {
    let server_path = unique_path("s4");
    let connected: Arc<Mutex<Vec<ConnHandle>>> = Arc::new(Mutex::new(Vec::new()));
    let disconnects = Arc::new(AtomicUsize::new(0));

    let mut config = dgram_config(&server_path);
    let connected_in = Arc::clone(&connected);
    config.on_connect = Some(Arc::new(move |handle| {
        connected_in.lock().unwrap().push(handle);
    }));
    let disconnects_in = Arc::clone(&disconnects);
    config.on_disconnect = Some(Arc::new(move |_handle| {
        disconnects_in.fetch_add(1, Ordering::SeqCst);
    }));

    let server = Server::new(config).unwrap();
    let running = RunningServer::start(server);

    let client = ClientConnection::connect(ClientConfig::datagram(
        &server_path,
        unique_path("s4-cli"),
    ))
    .unwrap();

    let mut frame = Vec::new();
    let len = control::subscribe_frame(&mut frame, 1, 5).unwrap();
    client.send(&frame[..len]).unwrap();

    let handle = running.handle.clone();
    wait_until("subscription", || handle.client_count() == 1);
    let client_handle = connected.lock().unwrap()[0];

    let len = control::unsubscribe_frame(&mut frame, 2, 0xFF).unwrap();
    client.send(&frame[..len]).unwrap();
    wait_until("client teardown", || handle.client_count() == 0);

    assert_eq!(disconnects.load(Ordering::SeqCst), 1);

    // The record is gone; events to the stale handle fail.
    let mut event = request_frame(0, 5, 1);
    assert!(matches!(
        handle.send_event(client_handle, &mut event, true),
        Err(ErrorKind::NotFound)
    ));

    running.stop();
}

#[test]
fn datagram_request_is_answered_by_address() {
    // A datagram peer without any client record still gets its response,
    // routed by reply address.
    let server_path = unique_path("dgram-rr");
    let server = Server::new(dgram_config(&server_path)).unwrap();
    server.handle().register_protocol(ack_protocol()).unwrap();
    let running = RunningServer::start(server);

    let client = ClientConnection::connect(ClientConfig::datagram(
        &server_path,
        unique_path("dgram-rr-cli"),
    ))
    .unwrap();
    client.send(&request_frame(5, 7, 3)).unwrap();

    let mut buf = vec![0u8; 4096];
    let len = client.recv(&mut buf, true).unwrap();
    let reader = MessageReader::new(&buf[..len]).unwrap();
    assert_eq!(reader.header().message_id, 5);

    running.stop();
}

#[test]
fn broken_frame_tears_down_only_that_connection() {
    let path = unique_path("b4");
    let disconnects = Arc::new(AtomicUsize::new(0));

    let mut config = stream_config(&path);
    let disconnects_in = Arc::clone(&disconnects);
    config.on_disconnect = Some(Arc::new(move |_handle| {
        disconnects_in.fetch_add(1, Ordering::SeqCst);
    }));
    let server = Server::new(config).unwrap();
    server.handle().register_protocol(ack_protocol()).unwrap();
    let running = RunningServer::start(server);

    // A well-behaved client stays connected throughout.
    let good = ClientConnection::connect(ClientConfig::stream(&path)).unwrap();

    // The bad client declares 64 bytes but hangs up after the header.
    {
        use std::io::Write;
        use std::os::unix::net::UnixStream;

        let mut header = request_frame(9, 7, 3);
        header[4..8].copy_from_slice(&64u32.to_le_bytes());
        let mut raw = UnixStream::connect(&path).unwrap();
        raw.write_all(&header).unwrap();
        drop(raw);
    }

    let handle = running.handle.clone();
    wait_until("bad clients torn down", || handle.client_count() == 1);
    assert!(disconnects.load(Ordering::SeqCst) >= 1);

    // The surviving connection still dispatches fine.
    good.send(&request_frame(10, 7, 3)).unwrap();
    let mut buf = vec![0u8; 4096];
    let len = good.recv(&mut buf, true).unwrap();
    assert_eq!(MessageReader::new(&buf[..len]).unwrap().header().message_id, 10);

    running.stop();
}

#[test]
fn oversized_frame_is_rejected_before_send() {
    let path = unique_path("s6");
    let server = Server::new(ServerConfig {
        link: LinkConfig {
            stream_path: Some(path.clone()),
            max_message_size: 256,
            ..LinkConfig::default()
        },
        ..ServerConfig::default()
    })
    .unwrap();
    let running = RunningServer::start(server);

    let mut client_config = ClientConfig::stream(&path);
    client_config.max_message_size = 256;
    let client = ClientConnection::connect(client_config).unwrap();

    let mut frame = Vec::new();
    let mut builder = MessageBuilder::new(&mut frame, 1, 7, 3, 1, 0);
    builder.buffer(&[0u8; 300]).unwrap();
    let len = builder.finish().unwrap();
    assert!(matches!(
        client.send(&frame[..len]),
        Err(ErrorKind::TooLarge { .. })
    ));

    // Nothing was written: the server never sees a frame, the connection
    // stays usable for a conforming request.
    client.send(&request_frame(2, 0, control::CONTROL_SUBSCRIBE)).unwrap();

    running.stop();
}

#[test]
fn worker_pool_dispatches_every_frame_exactly_once() {
    let path = unique_path("s5");
    let invocations = Arc::new(AtomicUsize::new(0));

    let server = Server::new(ServerConfig {
        link: LinkConfig { stream_path: Some(path.clone()), ..LinkConfig::default() },
        server_workers: 4,
        ..ServerConfig::default()
    })
    .unwrap();

    let invocations_in = Arc::clone(&invocations);
    server
        .handle()
        .register_protocol(Protocol::new(7).action(3, move |exchange| {
            invocations_in.fetch_add(1, Ordering::SeqCst);
            exchange.respond(0, 0, |_reply| Ok(()))
        }))
        .unwrap();
    let running = RunningServer::start(server);

    const CLIENTS: usize = 8;
    const FRAMES: u32 = 25;

    let mut client_threads = Vec::new();
    for _ in 0..CLIENTS {
        let path = path.clone();
        client_threads.push(thread::spawn(move || {
            let client = ClientConnection::connect(ClientConfig::stream(&path)).unwrap();
            for id in 1..=FRAMES {
                client.send(&request_frame(id, 7, 3)).unwrap();
            }
            // Responses may arrive in any order; per-client handler
            // ordering is not promised in multi-threaded mode.
            let mut buf = vec![0u8; 4096];
            let mut seen = std::collections::HashSet::new();
            for _ in 0..FRAMES {
                let len = client.recv(&mut buf, true).unwrap();
                seen.insert(MessageReader::new(&buf[..len]).unwrap().header().message_id);
            }
            assert_eq!(seen.len(), FRAMES as usize);
        }));
    }
    for thread in client_threads {
        thread.join().unwrap();
    }

    assert_eq!(invocations.load(Ordering::SeqCst), CLIENTS * FRAMES as usize);

    // At quiescence every arena slot is back on the free list.
    let server = running.stop();
    assert_eq!(server.arena_available(), Some(4 * 32));
}

#[test]
fn stream_disconnect_fires_callback_exactly_once() {
    let path = unique_path("p2");
    let disconnects = Arc::new(AtomicUsize::new(0));

    let mut config = stream_config(&path);
    let disconnects_in = Arc::clone(&disconnects);
    config.on_disconnect = Some(Arc::new(move |_handle| {
        disconnects_in.fetch_add(1, Ordering::SeqCst);
    }));
    let server = Server::new(config).unwrap();
    let running = RunningServer::start(server);

    let client = ClientConnection::connect(ClientConfig::stream(&path)).unwrap();
    let handle = running.handle.clone();
    wait_until("client admitted", || handle.client_count() == 1);

    drop(client);
    wait_until("client torn down", || handle.client_count() == 0);

    thread::sleep(Duration::from_millis(50));
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);

    running.stop();
}

#[test]
fn events_to_one_client_do_not_require_subscription() {
    let path = unique_path("event");
    let connected: Arc<Mutex<Vec<ConnHandle>>> = Arc::new(Mutex::new(Vec::new()));

    let mut config = stream_config(&path);
    let connected_in = Arc::clone(&connected);
    config.on_connect = Some(Arc::new(move |handle| {
        connected_in.lock().unwrap().push(handle);
    }));
    let server = Server::new(config).unwrap();
    let running = RunningServer::start(server);

    let client = ClientConnection::connect(ClientConfig::stream(&path)).unwrap();
    let handle = running.handle.clone();
    wait_until("client admitted", || handle.client_count() == 1);
    let target = connected.lock().unwrap()[0];

    let mut event = request_frame(99, 11, 4);
    handle.send_event(target, &mut event, true).unwrap();

    let mut buf = vec![0u8; 4096];
    let len = client.recv(&mut buf, true).unwrap();
    let reader = MessageReader::new(&buf[..len]).unwrap();
    // Server-originated events always carry id 0.
    assert_eq!(reader.header().message_id, 0);
    assert_eq!(reader.header().protocol, 11);

    running.stop();
}
