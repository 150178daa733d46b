//! Transformer: detection events in, notifications out
//!
//! Run with: cargo run --example transformer [UPSTREAM_ADDR] [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example transformer                                   # 127.0.0.1:50051 -> 0.0.0.0:50052
//!   cargo run --example transformer 10.0.0.5:50051 0.0.0.0:6000
//!
//! Start `event_server` first; subscribe to the notifications on BIND_ADDR.

use std::net::SocketAddr;
use std::time::Duration;

use fovcast::client::ClientConfig;
use fovcast::message::Event;
use fovcast::pipeline::{derive_notify, EventTransformer, PassthroughCropper};
use fovcast::protocol::constants::DEFAULT_NOTIFY_PORT;
use fovcast::server::NotifyServer;
use fovcast::signal::InterruptAdapter;
use fovcast::{QueueConfig, ServerConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    let upstream: SocketAddr = match args.get(1) {
        Some(addr) => addr.replace("localhost", "127.0.0.1").parse()?,
        None => ClientConfig::default().target,
    };
    let bind_addr: SocketAddr = match args.get(2) {
        Some(addr) => addr.replace("localhost", "127.0.0.1").parse()?,
        None => SocketAddr::from(([0, 0, 0, 0], DEFAULT_NOTIFY_PORT)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fovcast=info".parse()?)
                .add_directive("transformer=debug".parse()?),
        )
        .init();

    let interrupt = InterruptAdapter::install()?;

    let server = NotifyServer::start(ServerConfig::with_addr(bind_addr))?;
    println!("Notifications on {}", server.local_addr());

    let transformer = EventTransformer::new(
        ClientConfig::new(upstream),
        QueueConfig::default(),
        Event::payload_size,
        server,
    )?;
    interrupt.register(transformer.client().cancel_handle());

    if let Err(e) = transformer.client().wait_for_ready(Duration::from_secs(10)) {
        eprintln!("Upstream {} not reachable: {}", upstream, e);
        std::process::exit(1);
    }
    transformer.subscribe("1")?;

    let stop = interrupt.stop_flag();
    let cropper = PassthroughCropper;
    let stats = transformer.run(|event| derive_notify(&event, &cropper), &stop);

    println!(
        "Done: received={} forwarded={} skipped={}",
        stats.received, stats.forwarded, stats.skipped
    );
    Ok(())
}
