//! Echo server over a local stream socket.
//!
//! Run:
//! - cargo run -p wirecall --example server
//! - cargo run -p wirecall --example server -- /tmp/wirecall-demo.sock

use std::env;
use std::sync::Arc;

use wirecall::{LinkConfig, Protocol, Server, ServerConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = env::args().nth(1).unwrap_or_else(|| "/tmp/wirecall-demo.sock".into());

    let config = ServerConfig {
        link: LinkConfig { stream_path: Some(path.clone().into()), ..LinkConfig::default() },
        on_connect: Some(Arc::new(|handle| println!("[connect] {}", handle))),
        on_disconnect: Some(Arc::new(|handle| println!("[disconnect] {}", handle))),
        ..ServerConfig::default()
    };

    let mut server = Server::new(config)?;
    println!("wirecall echo server listening on {}", path);

    // Protocol 7, action 3: echo the single buffer parameter back.
    server.handle().register_protocol(Protocol::new(7).action(3, |exchange| {
        let payload = exchange.reader()?.next_buffer()?;
        let text = String::from_utf8_lossy(payload);
        println!(
            "[request] id={} from={} payload=\"{}\"",
            exchange.envelope().message_id(),
            exchange.envelope().client,
            text
        );
        exchange.respond(1, 0, |reply| {
            reply.buffer(payload)?;
            Ok(())
        })
    }))?;

    server.run()?;
    Ok(())
}
