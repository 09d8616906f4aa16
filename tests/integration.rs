//! End-to-end tests against a simulated LwM2M server
//!
//! The engine is driven with explicit instants so timing assertions are
//! exact. The last test runs the async client over real UDP sockets.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType};
use lwm2m_client::coap_types::ResponseCode;
use lwm2m_client::transport::{Datagram, Transport, TransportParams, decode_uint};
use lwm2m_client::{Client, ClientConfig, Engine, Path, Reading, RegistrationState, ResourceModel};

fn server() -> SocketAddr {
    "127.0.0.1:5683".parse().unwrap()
}

fn config() -> ClientConfig {
    let mut config = ClientConfig::for_server("coap://127.0.0.1:5683", "dev-01");
    config.lifetime_seconds = 3600;
    config
}

fn engine() -> Engine {
    let config = config();
    let model = ResourceModel::from_config(&config)
        .unwrap()
        .with_sensor_objects()
        .unwrap();
    let transport = Transport::with_seed(TransportParams::from_config(&config), 0x100, 7);
    Engine::with_transport(&config, model, server(), transport).unwrap()
}

fn options(packet: &Packet, option: CoapOption) -> Vec<String> {
    packet
        .get_option(option)
        .map(|values| {
            values
                .iter()
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .collect()
        })
        .unwrap_or_default()
}

fn observe_seq(packet: &Packet) -> Option<u32> {
    packet
        .get_option(CoapOption::Observe)
        .and_then(|values| values.front().and_then(|v| decode_uint(v)))
}

/// Piggybacked reply to a confirmable client request
fn ack(request: &Datagram, code: ResponseCode, location: &[&str]) -> Vec<u8> {
    let request = Packet::from_bytes(&request.bytes).unwrap();
    let (class, detail) = code.to_code_pair();
    let mut packet = Packet::new();
    packet.header.set_type(MessageType::Acknowledgement);
    packet.header.message_id = request.header.message_id;
    packet.header.code = MessageClass::from((class << 5) | detail);
    packet.set_token(request.get_token().to_vec());
    for segment in location {
        packet.add_option(CoapOption::LocationPath, segment.as_bytes().to_vec());
    }
    packet.to_bytes().unwrap()
}

/// Confirmable server request
fn request(method: RequestType, path: &str, mid: u16, token: &[u8]) -> Packet {
    let mut packet = Packet::new();
    packet.header.set_type(MessageType::Confirmable);
    packet.header.message_id = mid;
    packet.header.code = MessageClass::Request(method);
    packet.set_token(token.to_vec());
    for segment in path.trim_start_matches('/').split('/') {
        packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
    }
    packet
}

/// Poll through deadlines until a datagram is produced or `limit` passes
fn advance_until_sent(engine: &mut Engine, from: Instant, limit: Duration) -> (Instant, Vec<Datagram>) {
    let mut at = from;
    while let Some(deadline) = engine.next_deadline() {
        if deadline > from + limit {
            break;
        }
        at = deadline;
        engine.poll(at);
        let sent = engine.drain_outbox();
        if !sent.is_empty() {
            return (at, sent);
        }
    }
    (at, Vec::new())
}

fn register(engine: &mut Engine, now: Instant) {
    engine.start(now);
    let sent = engine.drain_outbox();
    assert_eq!(sent.len(), 1);
    engine.handle_datagram(now, server(), &ack(&sent[0], ResponseCode::Created, &["rd", "5a"]));
    assert_eq!(engine.registration_state(), RegistrationState::Registered);
}

#[test]
fn test_full_session() {
    let t0 = Instant::now();
    let mut engine = engine();

    // Register
    engine.start(t0);
    let sent = engine.drain_outbox();
    let packet = Packet::from_bytes(&sent[0].bytes).unwrap();
    assert_eq!(packet.header.code, MessageClass::Request(RequestType::Post));
    assert_eq!(packet.header.get_type(), MessageType::Confirmable);
    assert_eq!(options(&packet, CoapOption::UriPath), vec!["rd"]);
    let query = options(&packet, CoapOption::UriQuery);
    assert!(query.contains(&"ep=dev-01".to_string()));
    assert!(query.contains(&"lt=3600".to_string()));
    assert!(query.contains(&"lwm2m=1.0".to_string()));
    assert!(query.contains(&"b=U".to_string()));
    let links = String::from_utf8(packet.payload.clone()).unwrap();
    assert!(links.contains("</3/0>"));
    assert!(links.contains("</3303/0>"));
    assert!(!links.contains("</0/0>"));

    engine.handle_datagram(t0, server(), &ack(&sent[0], ResponseCode::Created, &["rd", "5a"]));
    assert_eq!(engine.registration_state(), RegistrationState::Registered);

    // Lease renewal at half the lifetime
    let (at, sent) = advance_until_sent(&mut engine, t0, Duration::from_secs(3600));
    assert_eq!(at - t0, Duration::from_secs(1800));
    let update = Packet::from_bytes(&sent[0].bytes).unwrap();
    assert_eq!(options(&update, CoapOption::UriPath), vec!["rd", "5a"]);
    assert!(update.payload.is_empty());
    engine.handle_datagram(at, server(), &ack(&sent[0], ResponseCode::Changed, &[]));
    assert_eq!(engine.registration_state(), RegistrationState::Registered);

    // Minimum notification period of 10 s on the battery level
    let mut attributes = request(RequestType::Put, "/3/0/9", 0x0F, &[0xAA]);
    attributes.add_option(CoapOption::UriQuery, b"pmin=10".to_vec());
    engine.handle_datagram(at, server(), &attributes.to_bytes().unwrap());
    let reply = Packet::from_bytes(&engine.drain_outbox()[0].bytes).unwrap();
    assert_eq!(reply.header.code, MessageClass::from((2 << 5) | 4));

    // Observe the battery level
    let mut observe = request(RequestType::Get, "/3/0/9", 0x10, &[0xAB]);
    observe.add_option(CoapOption::Observe, Vec::new());
    engine.handle_datagram(at, server(), &observe.to_bytes().unwrap());
    let sent = engine.drain_outbox();
    assert_eq!(sent.len(), 1);
    let reply = Packet::from_bytes(&sent[0].bytes).unwrap();
    assert_eq!(reply.header.get_type(), MessageType::Acknowledgement);
    assert_eq!(reply.header.code, MessageClass::from((2 << 5) | 5));
    assert_eq!(observe_seq(&reply), Some(0));
    assert_eq!(reply.payload, b"100");

    // A new reading once pmin has elapsed produces exactly one notification
    let reading = Reading::new(Path::resource(3, 0, 9), 87i64);
    let at = at + Duration::from_secs(10);
    engine.push_reading(reading.clone(), at).unwrap();
    let sent = engine.drain_outbox();
    assert_eq!(sent.len(), 1);
    let notification = Packet::from_bytes(&sent[0].bytes).unwrap();
    assert_eq!(notification.header.get_type(), MessageType::NonConfirmable);
    assert_eq!(notification.get_token(), &[0xAB]);
    assert_eq!(observe_seq(&notification), Some(1));
    assert_eq!(notification.payload, b"87");

    // Unchanged value within pmin is suppressed
    engine.push_reading(reading.clone(), at + Duration::from_secs(2)).unwrap();
    assert!(engine.drain_outbox().is_empty());

    // Unchanged value after pmin is sent again
    let at = at + Duration::from_secs(15);
    engine.push_reading(reading, at).unwrap();
    let sent = engine.drain_outbox();
    assert_eq!(sent.len(), 1);
    let notification = Packet::from_bytes(&sent[0].bytes).unwrap();
    assert_eq!(observe_seq(&notification), Some(2));
    assert_eq!(notification.payload, b"87");

    // Deregister; the server never answers
    engine.shutdown(at);
    let sent = engine.drain_outbox();
    let delete = Packet::from_bytes(&sent[0].bytes).unwrap();
    assert_eq!(delete.header.code, MessageClass::Request(RequestType::Delete));
    assert_eq!(options(&delete, CoapOption::UriPath), vec!["rd", "5a"]);

    let mut end = at;
    while !engine.is_finished() {
        end = engine.next_deadline().unwrap();
        engine.poll(end);
    }
    assert_eq!(end - at, Duration::from_secs(62));
    assert!(engine.is_finished());
    assert_eq!(engine.registration_state(), RegistrationState::Unregistered);
}

#[test]
fn test_register_retransmission_and_backoff() {
    let t0 = Instant::now();
    let mut engine = engine();
    engine.start(t0);
    let first = engine.drain_outbox();
    let mid = Packet::from_bytes(&first[0].bytes).unwrap().header.message_id;

    let mut sends = vec![Duration::ZERO];
    let mut at = t0;
    loop {
        let (next, sent) = advance_until_sent(&mut engine, at, Duration::from_secs(120));
        assert!(!sent.is_empty());
        at = next;
        let packet = Packet::from_bytes(&sent[0].bytes).unwrap();
        if packet.header.message_id != mid {
            break;
        }
        sends.push(at - t0);
    }

    // Four retransmissions with doubling timeouts
    let expected: Vec<Duration> = [0, 2, 6, 14, 30]
        .iter()
        .map(|s| Duration::from_secs(*s))
        .collect();
    assert_eq!(sends, expected);
    // Timeout at 62 s, then the first registration retry 5 s later
    assert_eq!(at - t0, Duration::from_secs(67));
    assert_eq!(engine.registration_state(), RegistrationState::Registering);
}

#[test]
fn test_duplicate_request_answered_from_cache() {
    let now = Instant::now();
    let mut engine = engine();
    register(&mut engine, now);

    let mut write = request(RequestType::Put, "/3/0/9", 0x22, &[1, 2]);
    write.payload = b"55".to_vec();
    write.add_option(CoapOption::ContentFormat, vec![]);
    let bytes = write.to_bytes().unwrap();

    engine.handle_datagram(now, server(), &bytes);
    let first = engine.drain_outbox();
    engine.handle_datagram(now + Duration::from_secs(3), server(), &bytes);
    let second = engine.drain_outbox();

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(first[0].bytes, second[0].bytes);
    // Battery level is read-only over the network
    let reply = Packet::from_bytes(&first[0].bytes).unwrap();
    assert_eq!(reply.header.code, MessageClass::from((4 << 5) | 5));
}

#[test]
fn test_discover_and_senml_read() {
    let now = Instant::now();
    let mut engine = engine();
    register(&mut engine, now);

    let mut discover = request(RequestType::Get, "/3303/0", 0x30, &[3]);
    discover.add_option(CoapOption::Accept, vec![40]);
    engine.handle_datagram(now, server(), &discover.to_bytes().unwrap());
    let reply = Packet::from_bytes(&engine.drain_outbox()[0].bytes).unwrap();
    let body = String::from_utf8(reply.payload).unwrap();
    assert!(body.contains("</3303/0/5700>"));

    let mut read = request(RequestType::Get, "/3303/0/5700", 0x31, &[4]);
    read.add_option(CoapOption::Accept, vec![110]);
    engine.handle_datagram(now, server(), &read.to_bytes().unwrap());
    let reply = Packet::from_bytes(&engine.drain_outbox()[0].bytes).unwrap();
    let json: serde_json::Value = serde_json::from_slice(&reply.payload).unwrap();
    assert_eq!(json[0]["bn"], "/3303/0/5700");
    assert_eq!(json[0]["v"], 22.0);
}

#[tokio::test]
async fn test_client_over_udp() {
    let server = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut config = config();
    config.server_uri = format!("coap://{}", server.local_addr().unwrap());
    config.shutdown_grace_ms = 2000;
    let model = ResourceModel::from_config(&config).unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let client = Client::connect(&config, model, shutdown_rx).await.unwrap();
    let producer = client.producer();
    let task = tokio::spawn(client.run());

    let mut buf = [0u8; 2048];
    let (len, peer) = server.recv_from(&mut buf).await.unwrap();
    let datagram = Datagram {
        peer,
        bytes: buf[..len].to_vec(),
    };
    server
        .send_to(&ack(&datagram, ResponseCode::Created, &["rd", "9"]), peer)
        .await
        .unwrap();

    let mut observe = request(RequestType::Get, "/3/0/9", 0x40, &[0xCD]);
    observe.add_option(CoapOption::Observe, Vec::new());
    server
        .send_to(&observe.to_bytes().unwrap(), peer)
        .await
        .unwrap();
    let (len, _) = server.recv_from(&mut buf).await.unwrap();
    let reply = Packet::from_bytes(&buf[..len]).unwrap();
    assert_eq!(observe_seq(&reply), Some(0));

    assert!(producer.push_reading(3, 0, 9, 42i64, None));
    let (len, _) = server.recv_from(&mut buf).await.unwrap();
    let notification = Packet::from_bytes(&buf[..len]).unwrap();
    assert_eq!(notification.payload, b"42");
    assert_eq!(observe_seq(&notification), Some(1));

    shutdown_tx.send(true).unwrap();
    let (len, _) = server.recv_from(&mut buf).await.unwrap();
    let deregister = Packet::from_bytes(&buf[..len]).unwrap();
    assert_eq!(deregister.header.code, MessageClass::Request(RequestType::Delete));
    let datagram = Datagram {
        peer,
        bytes: buf[..len].to_vec(),
    };
    server
        .send_to(&ack(&datagram, ResponseCode::Deleted, &[]), peer)
        .await
        .unwrap();

    let state = task.await.unwrap().unwrap();
    assert_eq!(state, RegistrationState::Unregistered);
}
