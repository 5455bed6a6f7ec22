//! Echo client for the server example.
//!
//! Run:
//! - cargo run -p wirecall --example client
//! - cargo run -p wirecall --example client -- /tmp/wirecall-demo.sock "hello"

use std::env;

use wirecall::{ClientConfig, ClientConnection, MessageBuilder, MessageReader};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = env::args().skip(1);
    let path = args.next().unwrap_or_else(|| "/tmp/wirecall-demo.sock".into());
    let text = args.next().unwrap_or_else(|| "hello over the wire".into());

    let client = ClientConnection::connect(ClientConfig::stream(&path))?;

    let mut frame = Vec::new();
    let mut builder = MessageBuilder::new(&mut frame, 1, 7, 3, 1, 0);
    builder.buffer(text.as_bytes())?;
    let len = builder.finish()?;
    client.send(&frame[..len])?;

    let mut buf = vec![0u8; 4096];
    let got = client.recv(&mut buf, true)?;
    let mut reader = MessageReader::new(&buf[..got])?;
    let message_id = reader.header().message_id;
    println!(
        "response id={} payload=\"{}\"",
        message_id,
        String::from_utf8_lossy(reader.next_buffer()?)
    );
    Ok(())
}
