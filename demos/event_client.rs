//! Event subscriber printing what it receives
//!
//! Run with: cargo run --example event_client [SERVER_ADDR] [CHANNEL_ID]
//!
//! Examples:
//!   cargo run --example event_client                       # 127.0.0.1:50051, channel 1
//!   cargo run --example event_client 10.0.0.5:50051 cam-2
//!
//! Press Ctrl-C to cancel the subscription.

use std::net::SocketAddr;
use std::time::Duration;

use fovcast::client::{EventClient, MessageHandler};
use fovcast::message::Event;
use fovcast::protocol::Status;
use fovcast::session::SessionId;
use fovcast::signal::InterruptAdapter;
use fovcast::ClientConfig;

struct PrintHandler {
    received: u64,
}

impl MessageHandler<Event> for PrintHandler {
    fn on_message(&mut self, event: Event) {
        self.received += 1;
        println!(
            "[{}] fov={} sdu={} ts={} coord={} image={}x{} ({} bytes) objects={}",
            self.received,
            event.fov_id,
            event.sdu_id,
            event.timestamp,
            event.coordinate,
            event.image.width,
            event.image.height,
            event.image.len(),
            event.objects.len(),
        );
        for object in &event.objects {
            println!(
                "    {} ({:.2}) at {},{} {}x{}",
                object.label, object.score, object.x, object.y, object.w, object.h
            );
        }
    }

    fn on_stream_end(&mut self, session: SessionId, status: &Status) {
        println!("Session {} ended: {}", session, status);
    }

    fn on_closed(&mut self) {
        println!("Received {} events", self.received);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    let target: SocketAddr = match args.get(1) {
        Some(addr) => addr.replace("localhost", "127.0.0.1").parse()?,
        None => ClientConfig::default().target,
    };
    let channel_id = args.get(2).cloned().unwrap_or_else(|| "1".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fovcast=info".parse()?)
                .add_directive("event_client=debug".parse()?),
        )
        .init();

    let interrupt = InterruptAdapter::install()?;
    let client = EventClient::new(ClientConfig::new(target), PrintHandler { received: 0 })?;
    interrupt.register(client.cancel_handle());

    println!("Connecting to {}...", target);
    if let Err(e) = client.wait_for_ready(Duration::from_secs(10)) {
        eprintln!("Server not reachable: {}", e);
        std::process::exit(1);
    }

    client.subscribe(channel_id.as_str())?;
    println!("Subscribed to channel {}", channel_id);

    client.join();
    Ok(())
}
