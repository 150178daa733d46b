//! Event server publishing synthetic detections
//!
//! Run with: cargo run --example event_server [BIND_ADDR] [INTERVAL_MS]
//!
//! Examples:
//!   cargo run --example event_server                    # binds to 0.0.0.0:50051
//!   cargo run --example event_server localhost          # binds to 127.0.0.1:50051
//!   cargo run --example event_server 127.0.0.1:6000 50  # one event every 50 ms
//!
//! Subscribe with the `event_client` demo.

use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fovcast::message::{DetectedObject, Event, Image};
use fovcast::protocol::constants::DEFAULT_EVENT_PORT;
use fovcast::server::EventServer;
use fovcast::ServerConfig;

const LABELS: [&str; 4] = ["person", "car", "truck", "bicycle"];

fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_EVENT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn synthetic_event(sdu_id: u64) -> Event {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let offset = (sdu_id % 20) as i32 * 10;

    Event {
        fov_id: format!("fov-{}", sdu_id % 4),
        sdu_id,
        timestamp,
        coordinate: format!("{};{:.1}", (sdu_id * 15) % 360, 12.5),
        // Stand-in for an encoded frame
        image: Image::new(640, 480, vec![(sdu_id % 256) as u8; 32 * 1024]),
        objects: vec![DetectedObject {
            x: 100 + offset,
            y: 80 + offset,
            w: 64,
            h: 48,
            metric: 1.0,
            centroid_x: 132.0 + offset as f32,
            centroid_y: 104.0 + offset as f32,
            label: LABELS[(sdu_id % LABELS.len() as u64) as usize].to_string(),
            score: if sdu_id % 5 == 0 { 0.005 } else { 0.9 },
        }],
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    let bind_addr = match args.get(1) {
        Some(addr_str) => match parse_bind_addr(addr_str) {
            Ok(addr) => addr,
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        None => ServerConfig::default().bind_addr,
    };
    let interval = Duration::from_millis(
        args.get(2).and_then(|s| s.parse().ok()).unwrap_or(200),
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fovcast=debug".parse()?)
                .add_directive("event_server=debug".parse()?),
        )
        .init();

    let server = EventServer::start(ServerConfig::with_addr(bind_addr))?;
    println!("Publishing events on {} every {:?}", server.local_addr(), interval);

    let mut ticker = tokio::time::interval(interval);
    let mut sdu_id = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sdu_id += 1;
                let reached = server.push(synthetic_event(sdu_id));
                tracing::debug!(sdu_id, subscribers = reached, "Event published");

                if sdu_id % 50 == 0 {
                    let stats = server.stats();
                    println!(
                        "Stats: subscribers={} published={} sent={} bytes={} dropped={}",
                        stats.active_sessions,
                        stats.messages_published,
                        stats.messages_sent,
                        stats.bytes_sent,
                        stats.messages_dropped,
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    // Joins the event loop thread; blocking is fine at this point
    tokio::task::block_in_place(|| server.shutdown());
    Ok(())
}
