//! Loopback tests driving real servers and subscribers

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use fovcast::client::{
    handler_fn, ClientConfig, EventClient, MessageHandler, NotifyClient, QueueSink,
};
use fovcast::message::{DetectedObject, Event, Image, Notify};
use fovcast::pipeline::{derive_notify, EventTransformer, PassthroughCropper};
use fovcast::protocol::constants::DEFAULT_MAX_MESSAGE_SIZE;
use fovcast::protocol::{Frame, FrameDecoder, Preamble, Status, StatusCode, SubscribeRequest};
use fovcast::server::{EventServer, NotifyServer};
use fovcast::session::SessionId;
use fovcast::{BoundedEventQueue, Error, Message, QueueConfig, ServerConfig, WakeStrategy};

const TIMEOUT: Duration = Duration::from_secs(5);

fn local_config() -> ServerConfig {
    ServerConfig::with_addr("127.0.0.1:0".parse().unwrap())
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn event(sdu_id: u64) -> Event {
    Event {
        fov_id: "cam".into(),
        sdu_id,
        image: Image::new(4, 4, vec![sdu_id as u8; 16]),
        ..Default::default()
    }
}

/// Subscriber forwarding sdu ids and stream statuses to the test thread
fn collecting_client(addr: SocketAddr) -> (EventClient, mpsc::Receiver<u64>) {
    let (tx, rx) = mpsc::channel();
    let client = EventClient::new(
        ClientConfig::new(addr),
        handler_fn(move |event: Event| {
            let _ = tx.send(event.sdu_id);
        }),
    )
    .unwrap();
    (client, rx)
}

struct StatusRecorder {
    statuses: mpsc::Sender<(SessionId, Status)>,
}

impl<M> MessageHandler<M> for StatusRecorder {
    fn on_message(&mut self, _message: M) {}

    fn on_stream_end(&mut self, session: SessionId, status: &Status) {
        let _ = self.statuses.send((session, status.clone()));
    }
}

fn receive_n(rx: &mpsc::Receiver<u64>, n: usize) -> Vec<u64> {
    (0..n).filter_map(|_| rx.recv_timeout(TIMEOUT).ok()).collect()
}

fn raw_connect(addr: SocketAddr) -> TcpStream {
    let raw = TcpStream::connect(addr).unwrap();
    raw.set_read_timeout(Some(TIMEOUT)).unwrap();
    raw
}

fn send_frame(raw: &mut TcpStream, frame: Frame) {
    let mut buf = BytesMut::new();
    frame.encode(&mut buf, DEFAULT_MAX_MESSAGE_SIZE).unwrap();
    raw.write_all(&buf).unwrap();
}

/// Preamble plus subscribe request, as a well-behaved client sends them
fn send_subscribe(raw: &mut TcpStream) {
    raw.write_all(&Preamble::current().encode()).unwrap();
    send_frame(raw, Frame::Subscribe(SubscribeRequest::new(Event::SERVICE, "1")));
}

/// Read until the server closes and return its final status
fn read_finish(raw: &mut TcpStream) -> Status {
    let mut reply = Vec::new();
    raw.read_to_end(&mut reply).unwrap();
    let mut buf = BytesMut::from(&reply[..]);
    let decoder = FrameDecoder::new(DEFAULT_MAX_MESSAGE_SIZE);
    loop {
        match decoder.decode(&mut buf).unwrap() {
            Some(Frame::Finish(status)) => return status,
            Some(_) => continue,
            None => panic!("stream ended without a finish frame"),
        }
    }
}

/// Run `f` on a helper thread; `false` if it did not return in time
fn completes_in_time(f: impl FnOnce() + Send + 'static) -> bool {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        f();
        let _ = tx.send(());
    });
    rx.recv_timeout(TIMEOUT).is_ok()
}

#[test]
fn test_fanout_reaches_live_subscribers_in_order() {
    let server = EventServer::start(local_config()).unwrap();
    let addr = server.local_addr();

    let (a, rx_a) = collecting_client(addr);
    let (b, rx_b) = collecting_client(addr);
    let (gone, rx_gone) = collecting_client(addr);
    a.subscribe("1").unwrap();
    b.subscribe("1").unwrap();
    gone.subscribe("1").unwrap();
    assert!(wait_until(|| server.subscriber_count() == 3));

    // Leaves before anything is published
    gone.cancel_all();
    assert!(wait_until(|| server.subscriber_count() == 2));

    for id in 1..=3 {
        server.push(event(id));
    }

    assert_eq!(receive_n(&rx_a, 3), vec![1, 2, 3]);
    assert_eq!(receive_n(&rx_b, 3), vec![1, 2, 3]);
    assert!(rx_gone.recv_timeout(Duration::from_millis(200)).is_err());

    // Write completions may be processed just after the bytes arrive
    assert!(wait_until(|| server.stats().messages_sent == 6));
    let stats = server.stats();
    assert_eq!(stats.messages_published, 3);
    assert_eq!(stats.total_sessions, 3);
    assert_eq!(stats.active_sessions, 2);
}

#[test]
fn test_alarm_wake_strategy_delivers() {
    let server = EventServer::start(local_config().wake_strategy(WakeStrategy::Alarm)).unwrap();
    let (client, rx) = collecting_client(server.local_addr());
    client.subscribe("1").unwrap();
    assert!(wait_until(|| server.subscriber_count() == 1));

    for id in 1..=5 {
        server.push(event(id));
    }

    assert_eq!(receive_n(&rx, 5), vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_server_shutdown_ends_streams() {
    let server = EventServer::start(local_config()).unwrap();
    let (tx, rx) = mpsc::channel();
    let client = EventClient::new(
        ClientConfig::new(server.local_addr()),
        StatusRecorder { statuses: tx },
    )
    .unwrap();

    let session = client.subscribe("1").unwrap();
    assert!(wait_until(|| server.subscriber_count() == 1));

    server.shutdown();

    let (ended, status) = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(ended, session);
    assert_eq!(status.code, StatusCode::Unavailable);
    assert!(wait_until(|| client.is_finished()));
    assert_eq!(client.active_sessions(), 0);
}

#[test]
fn test_wrong_service_is_rejected() {
    let server = NotifyServer::start(local_config()).unwrap();
    let (tx, rx) = mpsc::channel();
    let client = EventClient::new(
        ClientConfig::new(server.local_addr()),
        StatusRecorder { statuses: tx },
    )
    .unwrap();

    client.subscribe("1").unwrap();

    let (_, status) = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(status.code, StatusCode::Unimplemented);
    assert_eq!(server.subscriber_count(), 0);
}

#[test]
fn test_failed_handshake_leaves_registry_unchanged() {
    let server = EventServer::start(local_config()).unwrap();
    let addr = server.local_addr();

    let (member, rx) = collecting_client(addr);
    member.subscribe("1").unwrap();
    assert!(wait_until(|| server.subscriber_count() == 1));

    let mut raw = raw_connect(addr);
    raw.write_all(b"HTTP/").unwrap();
    assert_eq!(read_finish(&mut raw).code, StatusCode::InvalidArgument);

    assert_eq!(server.subscriber_count(), 1);

    // The listener still accepts and the existing member still receives
    let (late, rx_late) = collecting_client(addr);
    late.subscribe("1").unwrap();
    assert!(wait_until(|| server.subscriber_count() == 2));

    server.push(event(9));
    assert_eq!(receive_n(&rx, 1), vec![9]);
    assert_eq!(receive_n(&rx_late, 1), vec![9]);
}

#[test]
fn test_cancel_all_finishes_every_session() {
    let server = EventServer::start(local_config()).unwrap();
    let (client, _rx) = collecting_client(server.local_addr());

    for channel in ["a", "b", "c"] {
        client.subscribe(channel).unwrap();
    }
    assert!(wait_until(|| server.subscriber_count() == 3));
    assert_eq!(client.active_sessions(), 3);

    client.cancel_all();

    assert!(wait_until(|| client.is_finished()));
    assert_eq!(client.active_sessions(), 0);
    assert!(wait_until(|| server.subscriber_count() == 0));
    assert!(matches!(client.subscribe("d"), Err(Error::Shutdown)));
    client.join();
}

#[test]
fn test_one_session_ending_leaves_others_streaming() {
    let server = EventServer::start(local_config()).unwrap();
    let (stays, rx) = collecting_client(server.local_addr());
    let (leaves, _rx_leaves) = collecting_client(server.local_addr());
    stays.subscribe("1").unwrap();
    leaves.subscribe("1").unwrap();
    assert!(wait_until(|| server.subscriber_count() == 2));

    drop(leaves);
    assert!(wait_until(|| server.subscriber_count() == 1));

    server.push(event(1));
    server.push(event(2));
    assert_eq!(receive_n(&rx, 2), vec![1, 2]);
}

#[test]
fn test_wait_for_ready() {
    let server = EventServer::start(local_config()).unwrap();
    let (client, _rx) = collecting_client(server.local_addr());
    client.wait_for_ready(TIMEOUT).unwrap();

    let unused = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let (unreachable, _rx) = collecting_client(unused);
    assert!(matches!(
        unreachable.wait_for_ready(TIMEOUT),
        Err(Error::ConnectFailed(_))
    ));
}

#[test]
fn test_transformer_republishes_notifications() {
    let events = EventServer::start(local_config()).unwrap();
    let notifications = NotifyServer::start(local_config()).unwrap();
    let notify_addr = notifications.local_addr();

    let transformer = EventTransformer::new(
        ClientConfig::new(events.local_addr()),
        QueueConfig::default(),
        Event::payload_size,
        notifications,
    )
    .unwrap();
    transformer.subscribe("1").unwrap();

    let (tx, rx) = mpsc::channel();
    let downstream = NotifyClient::new(
        ClientConfig::new(notify_addr),
        handler_fn(move |notify: Notify| {
            let _ = tx.send(notify);
        }),
    )
    .unwrap();
    downstream.subscribe("1").unwrap();

    assert!(wait_until(|| events.subscriber_count() == 1));
    assert!(wait_until(|| transformer.server().subscriber_count() == 1));

    let stop = AtomicBool::new(false);
    let stats = std::thread::scope(|scope| {
        let worker = scope.spawn(|| {
            let cropper = PassthroughCropper;
            transformer.run(|event| derive_notify(&event, &cropper), &stop)
        });

        let mut car = event(1);
        car.objects.push(DetectedObject {
            w: 10,
            h: 10,
            label: "car".into(),
            score: 0.9,
            ..Default::default()
        });
        let mut unsure = event(3);
        unsure.objects.push(DetectedObject {
            label: "truck".into(),
            score: 0.001,
            ..Default::default()
        });

        events.push(car);
        events.push(event(2));
        events.push(unsure);

        let first = rx.recv_timeout(TIMEOUT).unwrap();
        let second = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!((first.sdu_id, first.category.as_str()), (1, "car"));
        assert_eq!((second.sdu_id, second.category.as_str()), (3, "Unknown"));

        stop.store(true, Ordering::Relaxed);
        worker.join().unwrap()
    });

    assert_eq!(stats.received, 3);
    assert_eq!(stats.forwarded, 2);
    assert_eq!(stats.skipped, 1);
}

#[test]
fn test_frame_after_subscribe_ends_session() {
    let server = EventServer::start(local_config()).unwrap();
    let mut raw = raw_connect(server.local_addr());
    send_subscribe(&mut raw);
    assert!(wait_until(|| server.subscriber_count() == 1));

    send_frame(&mut raw, Frame::Message(bytes::Bytes::from_static(b"noise")));

    let status = read_finish(&mut raw);
    assert_eq!(status.code, StatusCode::InvalidArgument);
    assert_eq!(status.message, "unexpected Message frame");
    assert!(wait_until(|| server.subscriber_count() == 0));
}

#[test]
fn test_connection_limit_rejects_extra_subscriber() {
    let server = EventServer::start(local_config().max_connections(1)).unwrap();
    let (member, rx) = collecting_client(server.local_addr());
    member.subscribe("1").unwrap();
    assert!(wait_until(|| server.subscriber_count() == 1));

    let (tx, statuses) = mpsc::channel();
    let extra = EventClient::new(
        ClientConfig::new(server.local_addr()),
        StatusRecorder { statuses: tx },
    )
    .unwrap();
    extra.subscribe("1").unwrap();

    let (_, status) = statuses.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(status.code, StatusCode::ResourceExhausted);
    assert_eq!(server.subscriber_count(), 1);
    assert_eq!(server.stats().rejected_connections, 1);

    server.push(event(4));
    assert_eq!(receive_n(&rx, 1), vec![4]);
}

#[test]
fn test_connection_limit_holds_across_open_handshakes() {
    let server = EventServer::start(local_config().max_connections(1)).unwrap();
    let addr = server.local_addr();

    // Both connections are accepted while nobody is registered yet
    let mut first = raw_connect(addr);
    let mut second = raw_connect(addr);
    std::thread::sleep(Duration::from_millis(50));

    send_subscribe(&mut first);
    assert!(wait_until(|| server.subscriber_count() == 1));
    send_subscribe(&mut second);

    assert_eq!(read_finish(&mut second).code, StatusCode::ResourceExhausted);
    assert_eq!(server.subscriber_count(), 1);
    assert_eq!(server.stats().total_sessions, 1);
}

#[test]
fn test_full_mailbox_drops_oldest() {
    let server = EventServer::start(local_config().mailbox_capacity(2)).unwrap();

    // Subscribes and then never reads, so writes stall once socket buffers fill
    let mut stalled = raw_connect(server.local_addr());
    send_subscribe(&mut stalled);
    assert!(wait_until(|| server.subscriber_count() == 1));

    for id in 1..=64 {
        let mut large = event(id);
        large.image = Image::new(1024, 1024, vec![0u8; 1024 * 1024]);
        server.push(large);
    }

    let stats = server.stats();
    assert_eq!(stats.messages_published, 64);
    assert!(stats.messages_dropped > 0);
    assert!(stats.messages_dropped <= 62);

    // Drops stay counted after the session is gone
    drop(stalled);
    assert!(wait_until(|| server.subscriber_count() == 0));
    assert!(server.stats().messages_dropped >= stats.messages_dropped);
}

#[test]
fn test_server_shutdown_with_stalled_subscriber() {
    let server = EventServer::start(local_config()).unwrap();
    let mut stalled = raw_connect(server.local_addr());
    send_subscribe(&mut stalled);
    assert!(wait_until(|| server.subscriber_count() == 1));

    for id in 1..=16 {
        let mut large = event(id);
        large.image = Image::new(1024, 1024, vec![0u8; 1024 * 1024]);
        server.push(large);
    }

    // The finish write cannot land; shutdown still returns
    assert!(completes_in_time(move || server.shutdown()));
    drop(stalled);
}

#[test]
fn test_dropping_transformer_with_stalled_consumer() {
    let events = EventServer::start(local_config()).unwrap();
    let notifications = NotifyServer::start(local_config()).unwrap();

    let transformer = EventTransformer::new(
        ClientConfig::new(events.local_addr()),
        QueueConfig::new(1024 * 1024, 2),
        Event::payload_size,
        notifications,
    )
    .unwrap();
    transformer.subscribe("1").unwrap();
    assert!(wait_until(|| events.subscriber_count() == 1));

    // Consumer gone before anything arrives
    let stop = AtomicBool::new(true);
    let stats = transformer.run(|event| derive_notify(&event, &PassthroughCropper), &stop);
    assert_eq!(stats.received, 0);

    for id in 1..=5 {
        events.push(event(id));
    }
    assert!(wait_until(|| transformer.queue().len() == 2));

    assert!(completes_in_time(move || drop(transformer)));
}

#[test]
fn test_cancel_all_releases_queue_sink() {
    let server = EventServer::start(local_config()).unwrap();
    let queue = std::sync::Arc::new(BoundedEventQueue::new(1024 * 1024, 1, Event::payload_size));
    let client = EventClient::new(
        ClientConfig::new(server.local_addr()),
        QueueSink::new(std::sync::Arc::clone(&queue)),
    )
    .unwrap();
    client.subscribe("1").unwrap();
    assert!(wait_until(|| server.subscriber_count() == 1));

    for id in 1..=3 {
        server.push(event(id));
    }
    assert!(wait_until(|| queue.len() == 1));

    // Nobody pops; the loop is parked inside the sink
    client.cancel_all();
    assert!(wait_until(|| client.is_finished()));
    assert!(queue.is_closed());
    assert_eq!(queue.pop().map(|e| e.sdu_id), Some(1));
    assert!(completes_in_time(move || drop(client)));
}
