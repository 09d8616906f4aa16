//! CoAP message layer
//!
//! The transport is sans-IO: it never touches a socket or a clock. Callers
//! feed it inbound datagrams together with the current time and drain the
//! datagrams it wants sent. Framing is done with `coap-lite`.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType};
use tracing::{debug, trace, warn};

use crate::coap_types::{ContentFormat, Method, Request, Response, ResponseCode};
use crate::config::ClientConfig;
use crate::error::{Lwm2mError, Result};

/// Upper bound on one-way network latency (RFC 7252 MAX_LATENCY)
const MAX_LATENCY: Duration = Duration::from_secs(100);

/// Datagram socket the client runs over
///
/// Implemented for plain UDP; a DTLS session can implement it to secure the
/// same engine.
pub trait DatagramTransport {
    fn send_to(
        &self,
        buf: &[u8],
        peer: SocketAddr,
    ) -> impl Future<Output = io::Result<usize>> + Send;

    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl DatagramTransport for tokio::net::UdpSocket {
    fn send_to(
        &self,
        buf: &[u8],
        peer: SocketAddr,
    ) -> impl Future<Output = io::Result<usize>> + Send {
        tokio::net::UdpSocket::send_to(self, buf, peer)
    }

    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send {
        tokio::net::UdpSocket::recv_from(self, buf)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        tokio::net::UdpSocket::local_addr(self)
    }
}

/// Retransmission parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportParams {
    /// Initial retransmission timeout, doubled after every retransmission
    pub ack_timeout: Duration,
    /// Retransmissions before the exchange fails
    pub max_retransmit: u8,
}

impl Default for TransportParams {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(2),
            max_retransmit: 4,
        }
    }
}

impl TransportParams {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            ack_timeout: config.ack_timeout(),
            max_retransmit: config.max_retransmit,
        }
    }

    /// ACK_TIMEOUT * (2^MAX_RETRANSMIT - 1): how long a peer may keep
    /// retransmitting one message
    pub fn max_transmit_span(&self) -> Duration {
        self.ack_timeout * (2u32.saturating_pow(u32::from(self.max_retransmit)) - 1)
    }

    /// How long a separate response is awaited after an empty ACK
    pub fn exchange_lifetime(&self) -> Duration {
        self.max_transmit_span() + 2 * MAX_LATENCY + self.ack_timeout
    }
}

/// Handle of an outgoing request; the value of its 8-byte token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExchangeId(pub u64);

impl std::fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A datagram the transport wants sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub peer: SocketAddr,
    pub bytes: Vec<u8>,
}

/// A request received from a peer
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub peer: SocketAddr,
    pub message_id: u16,
    pub token: Vec<u8>,
    pub confirmable: bool,
    pub request: Request,
}

/// Something the layers above need to act on
#[derive(Debug)]
pub enum TransportEvent {
    /// New (non-duplicate) request
    Request(InboundRequest),
    /// Response completing one of our exchanges
    Response {
        exchange: ExchangeId,
        response: Response,
    },
    /// Exchange ended without a usable response
    Failed {
        exchange: ExchangeId,
        error: Lwm2mError,
    },
    /// Peer answered a notification with RST
    NotificationReset { peer: SocketAddr, token: Vec<u8> },
}

#[derive(Debug)]
struct PendingExchange {
    message_id: u16,
    peer: SocketAddr,
    bytes: Vec<u8>,
    retransmits: u8,
    timeout: Duration,
    deadline: Instant,
    /// Empty ACK received; a separate response is still expected
    acknowledged: bool,
}

#[derive(Debug)]
struct SeenMessage {
    expires: Instant,
    /// Reply sent for the message, repeated for duplicates
    reply: Option<Vec<u8>>,
}

#[derive(Debug)]
struct SentNotification {
    token: Vec<u8>,
    expires: Instant,
}

/// Message-ID and token allocation, retransmission and deduplication
#[derive(Debug)]
pub struct Transport {
    params: TransportParams,
    next_message_id: u16,
    next_token: u64,
    pending: HashMap<u64, PendingExchange>,
    seen: HashMap<(u16, SocketAddr), SeenMessage>,
    notifications: HashMap<(u16, SocketAddr), SentNotification>,
    outbox: Vec<Datagram>,
}

impl Transport {
    /// Create a transport with randomly seeded message-ID and token counters
    pub fn new(params: TransportParams) -> Self {
        Self::with_seed(params, rand::random(), rand::random())
    }

    /// Create a transport with fixed counter seeds
    pub fn with_seed(params: TransportParams, message_id: u16, token: u64) -> Self {
        Self {
            params,
            next_message_id: message_id,
            next_token: token,
            pending: HashMap::new(),
            seen: HashMap::new(),
            notifications: HashMap::new(),
            outbox: Vec::new(),
        }
    }

    pub fn params(&self) -> &TransportParams {
        &self.params
    }

    fn allocate_message_id(&mut self) -> u16 {
        let id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);
        id
    }

    fn allocate_token(&mut self) -> u64 {
        let token = self.next_token;
        self.next_token = self.next_token.wrapping_add(1);
        token
    }

    /// Send a confirmable request; the outcome arrives as a
    /// [`TransportEvent::Response`] or [`TransportEvent::Failed`]
    pub fn send_request(
        &mut self,
        now: Instant,
        peer: SocketAddr,
        request: &Request,
    ) -> Result<ExchangeId> {
        let message_id = self.allocate_message_id();
        let token = self.allocate_token();

        let mut packet = Packet::new();
        packet.header.set_type(MessageType::Confirmable);
        packet.header.message_id = message_id;
        packet.header.code = MessageClass::Request(request_type(request.method));
        packet.set_token(token.to_be_bytes().to_vec());
        for segment in &request.path {
            packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
        }
        for query in &request.query {
            packet.add_option(CoapOption::UriQuery, query.as_bytes().to_vec());
        }
        if let Some(format) = request.content_format {
            packet.add_option(CoapOption::ContentFormat, encode_uint(u32::from(format)));
        }
        if let Some(accept) = request.accept {
            packet.add_option(CoapOption::Accept, encode_uint(u32::from(accept)));
        }
        if let Some(observe) = request.observe {
            packet.add_option(CoapOption::Observe, encode_uint(observe));
        }
        packet.payload = request.payload.clone();
        let bytes = to_bytes(&packet)?;

        debug!(
            method = %request.method,
            path = %request.path_string(),
            mid = message_id,
            exchange = %ExchangeId(token),
            "sending request"
        );
        self.outbox.push(Datagram {
            peer,
            bytes: bytes.clone(),
        });
        self.pending.insert(
            token,
            PendingExchange {
                message_id,
                peer,
                bytes,
                retransmits: 0,
                timeout: self.params.ack_timeout,
                deadline: now + self.params.ack_timeout,
                acknowledged: false,
            },
        );
        Ok(ExchangeId(token))
    }

    /// Answer an inbound request, piggy-backed on the ACK when it was
    /// confirmable
    pub fn respond(&mut self, inbound: &InboundRequest, response: &Response) -> Result<()> {
        let (kind, message_id) = if inbound.confirmable {
            (MessageType::Acknowledgement, inbound.message_id)
        } else {
            (MessageType::NonConfirmable, self.allocate_message_id())
        };
        let packet = response_packet(kind, message_id, &inbound.token, response);
        let bytes = to_bytes(&packet)?;

        trace!(peer = %inbound.peer, code = %response.code, len = bytes.len(), "response");
        if let Some(seen) = self.seen.get_mut(&(inbound.message_id, inbound.peer)) {
            seen.reply = Some(bytes.clone());
        }
        self.outbox.push(Datagram {
            peer: inbound.peer,
            bytes,
        });
        Ok(())
    }

    /// Send a non-confirmable notification for an observation
    pub fn send_notification(
        &mut self,
        now: Instant,
        peer: SocketAddr,
        token: &[u8],
        response: &Response,
    ) -> Result<()> {
        let message_id = self.allocate_message_id();
        let packet = response_packet(MessageType::NonConfirmable, message_id, token, response);
        let bytes = to_bytes(&packet)?;

        self.notifications.insert(
            (message_id, peer),
            SentNotification {
                token: token.to_vec(),
                expires: now + self.params.exchange_lifetime(),
            },
        );
        self.outbox.push(Datagram { peer, bytes });
        Ok(())
    }

    /// Process one inbound datagram
    pub fn handle_datagram(
        &mut self,
        now: Instant,
        peer: SocketAddr,
        bytes: &[u8],
    ) -> Option<TransportEvent> {
        let packet = match Packet::from_bytes(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(%peer, error = ?e, "dropping malformed datagram");
                return None;
            }
        };

        match packet.header.code {
            MessageClass::Empty => self.handle_empty(now, peer, &packet),
            MessageClass::Request(_) => self.handle_request(now, peer, packet),
            MessageClass::Response(_) => self.handle_response(now, peer, packet),
            _ => None,
        }
    }

    fn handle_empty(&mut self, now: Instant, peer: SocketAddr, packet: &Packet) -> Option<TransportEvent> {
        let message_id = packet.header.message_id;
        match packet.header.get_type() {
            MessageType::Acknowledgement => {
                let lifetime = self.params.exchange_lifetime();
                if let Some(pending) = self
                    .pending
                    .values_mut()
                    .find(|p| p.message_id == message_id && p.peer == peer)
                {
                    trace!(mid = message_id, "empty ACK, awaiting separate response");
                    pending.acknowledged = true;
                    pending.deadline = now + lifetime;
                }
                None
            }
            MessageType::Reset => {
                let token = self
                    .pending
                    .iter()
                    .find(|(_, p)| p.message_id == message_id && p.peer == peer)
                    .map(|(token, _)| *token);
                if let Some(token) = token {
                    self.pending.remove(&token);
                    debug!(exchange = %ExchangeId(token), "exchange reset by peer");
                    return Some(TransportEvent::Failed {
                        exchange: ExchangeId(token),
                        error: Lwm2mError::TransportReset,
                    });
                }
                self.notifications
                    .remove(&(message_id, peer))
                    .map(|sent| TransportEvent::NotificationReset {
                        peer,
                        token: sent.token,
                    })
            }
            MessageType::Confirmable => {
                // CoAP ping
                self.push_empty(peer, MessageType::Reset, message_id);
                None
            }
            MessageType::NonConfirmable => None,
        }
    }

    fn handle_request(&mut self, now: Instant, peer: SocketAddr, packet: Packet) -> Option<TransportEvent> {
        let message_id = packet.header.message_id;
        let confirmable = packet.header.get_type() == MessageType::Confirmable;

        if let Some(seen) = self.seen.get(&(message_id, peer)) {
            if seen.expires > now {
                debug!(%peer, mid = message_id, "duplicate request");
                match seen.reply.clone() {
                    Some(bytes) => self.outbox.push(Datagram { peer, bytes }),
                    None if confirmable => {
                        self.push_empty(peer, MessageType::Acknowledgement, message_id)
                    }
                    None => {}
                }
                return None;
            }
        }
        self.seen.insert(
            (message_id, peer),
            SeenMessage {
                expires: now + self.params.max_transmit_span(),
                reply: None,
            },
        );

        let method = match packet.header.code {
            MessageClass::Request(RequestType::Get) => Some(Method::Get),
            MessageClass::Request(RequestType::Post) => Some(Method::Post),
            MessageClass::Request(RequestType::Put) => Some(Method::Put),
            MessageClass::Request(RequestType::Delete) => Some(Method::Delete),
            _ => None,
        };

        let mut inbound = InboundRequest {
            peer,
            message_id,
            token: packet.get_token().to_vec(),
            confirmable,
            request: Request::new(method.unwrap_or(Method::Get), ""),
        };

        let Some(method) = method else {
            let response = Response::error(ResponseCode::MethodNotAllowed, "unsupported method");
            if let Err(e) = self.respond(&inbound, &response) {
                warn!(error = %e, "failed to answer unsupported method");
            }
            return None;
        };

        inbound.request = Request {
            method,
            path: string_options(&packet, CoapOption::UriPath),
            query: string_options(&packet, CoapOption::UriQuery),
            payload: packet.payload.clone(),
            content_format: uint_option(&packet, CoapOption::ContentFormat)
                .and_then(|v| u16::try_from(v).ok()),
            accept: uint_option(&packet, CoapOption::Accept).and_then(|v| u16::try_from(v).ok()),
            observe: uint_option(&packet, CoapOption::Observe),
        };
        trace!(%peer, mid = message_id, method = %method, path = %inbound.request.path_string(), "inbound request");
        Some(TransportEvent::Request(inbound))
    }

    fn handle_response(&mut self, now: Instant, peer: SocketAddr, packet: Packet) -> Option<TransportEvent> {
        let message_id = packet.header.message_id;
        let kind = packet.header.get_type();

        // Separate responses arrive as CON and must be acknowledged
        if kind == MessageType::Confirmable {
            let duplicate = self
                .seen
                .get(&(message_id, peer))
                .is_some_and(|seen| seen.expires > now);
            self.push_empty(peer, MessageType::Acknowledgement, message_id);
            if duplicate {
                return None;
            }
            self.seen.insert(
                (message_id, peer),
                SeenMessage {
                    expires: now + self.params.max_transmit_span(),
                    reply: None,
                },
            );
        }

        let token = <[u8; 8]>::try_from(packet.get_token())
            .ok()
            .map(u64::from_be_bytes)
            .filter(|token| self.pending.get(token).is_some_and(|p| p.peer == peer));
        let Some(token) = token else {
            debug!(%peer, mid = message_id, "response for unknown exchange");
            if kind == MessageType::NonConfirmable {
                self.push_empty(peer, MessageType::Reset, message_id);
            }
            return None;
        };
        self.pending.remove(&token);
        let exchange = ExchangeId(token);

        let code: u8 = packet.header.code.into();
        let (class, detail) = (code >> 5, code & 0x1f);
        let Some(code) = ResponseCode::from_code_pair(class, detail) else {
            return Some(TransportEvent::Failed {
                exchange,
                error: Lwm2mError::ProtocolReject(format!("{}.{:02}", class, detail)),
            });
        };

        let response = Response {
            code,
            payload: packet.payload.clone(),
            content_format: uint_option(&packet, CoapOption::ContentFormat)
                .and_then(|v| u16::try_from(v).ok())
                .and_then(ContentFormat::from_u16),
            observe: uint_option(&packet, CoapOption::Observe),
            location_path: string_options(&packet, CoapOption::LocationPath),
        };
        debug!(%exchange, code = %response.code, "exchange complete");
        Some(TransportEvent::Response { exchange, response })
    }

    /// Retransmit or fail exchanges whose deadline has passed
    pub fn poll(&mut self, now: Instant) -> Vec<TransportEvent> {
        self.seen.retain(|_, seen| seen.expires > now);
        self.notifications.retain(|_, sent| sent.expires > now);

        let mut due: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(token, _)| *token)
            .collect();
        due.sort_unstable();

        let mut events = Vec::new();
        for token in due {
            let Some(pending) = self.pending.get_mut(&token) else {
                continue;
            };
            if !pending.acknowledged && pending.retransmits < self.params.max_retransmit {
                pending.retransmits += 1;
                pending.timeout *= 2;
                pending.deadline = now + pending.timeout;
                debug!(
                    exchange = %ExchangeId(token),
                    attempt = pending.retransmits,
                    "retransmitting"
                );
                let datagram = Datagram {
                    peer: pending.peer,
                    bytes: pending.bytes.clone(),
                };
                self.outbox.push(datagram);
                continue;
            }

            if let Some(pending) = self.pending.remove(&token) {
                warn!(exchange = %ExchangeId(token), "exchange timed out");
                events.push(TransportEvent::Failed {
                    exchange: ExchangeId(token),
                    error: Lwm2mError::TransportTimeout {
                        attempts: pending.retransmits.saturating_add(1),
                    },
                });
            }
        }
        events
    }

    /// Earliest retransmission or exchange deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Forget an exchange without reporting it
    pub fn cancel(&mut self, exchange: ExchangeId) {
        self.pending.remove(&exchange.0);
    }

    /// Number of exchanges awaiting a response
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Take the datagrams queued for sending
    pub fn drain_outbox(&mut self) -> Vec<Datagram> {
        std::mem::take(&mut self.outbox)
    }

    fn push_empty(&mut self, peer: SocketAddr, kind: MessageType, message_id: u16) {
        let mut packet = Packet::new();
        packet.header.set_type(kind);
        packet.header.message_id = message_id;
        packet.header.code = MessageClass::Empty;
        match packet.to_bytes() {
            Ok(bytes) => self.outbox.push(Datagram { peer, bytes }),
            Err(e) => warn!(error = ?e, "failed to encode empty message"),
        }
    }
}

fn request_type(method: Method) -> RequestType {
    match method {
        Method::Get => RequestType::Get,
        Method::Post => RequestType::Post,
        Method::Put => RequestType::Put,
        Method::Delete => RequestType::Delete,
    }
}

fn response_packet(kind: MessageType, message_id: u16, token: &[u8], response: &Response) -> Packet {
    let (class, detail) = response.code.to_code_pair();
    let mut packet = Packet::new();
    packet.header.set_type(kind);
    packet.header.message_id = message_id;
    packet.header.code = MessageClass::from((class << 5) | detail);
    packet.set_token(token.to_vec());
    if let Some(observe) = response.observe {
        packet.add_option(CoapOption::Observe, encode_uint(observe));
    }
    for segment in &response.location_path {
        packet.add_option(CoapOption::LocationPath, segment.as_bytes().to_vec());
    }
    if let Some(format) = response.content_format {
        packet.add_option(
            CoapOption::ContentFormat,
            encode_uint(u32::from(format.as_u16())),
        );
    }
    packet.payload = response.payload.clone();
    packet
}

fn to_bytes(packet: &Packet) -> Result<Vec<u8>> {
    packet
        .to_bytes()
        .map_err(|e| Lwm2mError::Encode(format!("CoAP framing: {:?}", e)))
}

/// Minimal big-endian encoding of a CoAP uint option
pub fn encode_uint(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

/// Decode a CoAP uint option of up to four bytes
pub fn decode_uint(bytes: &[u8]) -> Option<u32> {
    if bytes.len() > 4 {
        return None;
    }
    Some(bytes.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}

fn uint_option(packet: &Packet, option: CoapOption) -> Option<u32> {
    packet
        .get_option(option)
        .and_then(|values| values.front())
        .and_then(|bytes| decode_uint(bytes))
}

fn string_options(packet: &Packet, option: CoapOption) -> Vec<String> {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> SocketAddr {
        "127.0.0.1:5683".parse().unwrap()
    }

    fn transport() -> Transport {
        Transport::with_seed(TransportParams::default(), 100, 0xabcd)
    }

    fn ack_for(request: &[u8], code: MessageClass) -> Vec<u8> {
        let request = Packet::from_bytes(request).unwrap();
        let mut packet = Packet::new();
        packet.header.set_type(MessageType::Acknowledgement);
        packet.header.message_id = request.header.message_id;
        packet.header.code = code;
        if code != MessageClass::Empty {
            packet.set_token(request.get_token().to_vec());
        }
        packet.to_bytes().unwrap()
    }

    fn inbound_get(message_id: u16) -> Vec<u8> {
        let mut packet = Packet::new();
        packet.header.set_type(MessageType::Confirmable);
        packet.header.message_id = message_id;
        packet.header.code = MessageClass::Request(RequestType::Get);
        packet.set_token(vec![0x42]);
        packet.add_option(CoapOption::UriPath, b"3".to_vec());
        packet.add_option(CoapOption::UriPath, b"0".to_vec());
        packet.add_option(CoapOption::UriPath, b"9".to_vec());
        packet.add_option(CoapOption::Observe, Vec::new());
        packet.to_bytes().unwrap()
    }

    #[test]
    fn test_uint_options() {
        assert_eq!(encode_uint(0), Vec::<u8>::new());
        assert_eq!(encode_uint(11542), vec![0x2d, 0x16]);
        assert_eq!(decode_uint(&[0x2d, 0x16]), Some(11542));
        assert_eq!(decode_uint(&[]), Some(0));
    }

    #[test]
    fn test_max_transmit_span() {
        let params = TransportParams::default();
        assert_eq!(params.max_transmit_span(), Duration::from_secs(30));
    }

    #[test]
    fn test_request_framing() {
        let mut transport = transport();
        let request = Request::new(Method::Post, "/rd").with_query("ep=dev-01");
        let exchange = transport
            .send_request(Instant::now(), server(), &request)
            .unwrap();
        assert_eq!(exchange, ExchangeId(0xabcd));

        let sent = transport.drain_outbox();
        let packet = Packet::from_bytes(&sent[0].bytes).unwrap();
        assert_eq!(packet.header.get_type(), MessageType::Confirmable);
        assert_eq!(packet.header.message_id, 100);
        assert_eq!(packet.get_token(), 0xabcdu64.to_be_bytes());
        assert_eq!(string_options(&packet, CoapOption::UriPath), vec!["rd"]);
        assert_eq!(string_options(&packet, CoapOption::UriQuery), vec!["ep=dev-01"]);
    }

    #[test]
    fn test_retransmits_then_times_out() {
        let mut transport = transport();
        let start = Instant::now();
        let exchange = transport
            .send_request(start, server(), &Request::new(Method::Post, "/rd"))
            .unwrap();
        assert_eq!(transport.drain_outbox().len(), 1);

        let mut now = start;
        let mut retransmissions = 0;
        let mut events = Vec::new();
        while let Some(deadline) = transport.next_deadline() {
            now = deadline;
            events.extend(transport.poll(now));
            retransmissions += transport.drain_outbox().len();
        }

        assert_eq!(retransmissions, 4);
        // 2 + 4 + 8 + 16 + 32 seconds
        assert_eq!(now - start, Duration::from_secs(62));
        assert!(matches!(
            events.as_slice(),
            [TransportEvent::Failed {
                exchange: e,
                error: Lwm2mError::TransportTimeout { attempts: 5 },
            }] if *e == exchange
        ));
    }

    #[test]
    fn test_piggybacked_response() {
        let mut transport = transport();
        let now = Instant::now();
        let exchange = transport
            .send_request(now, server(), &Request::new(Method::Post, "/rd"))
            .unwrap();
        let sent = transport.drain_outbox().remove(0);

        let mut reply = Packet::from_bytes(&ack_for(
            &sent.bytes,
            MessageClass::from((2 << 5) | 1),
        ))
        .unwrap();
        reply.add_option(CoapOption::LocationPath, b"rd".to_vec());
        reply.add_option(CoapOption::LocationPath, b"5a3f".to_vec());

        let event = transport.handle_datagram(now, server(), &reply.to_bytes().unwrap());
        let Some(TransportEvent::Response { exchange: e, response }) = event else {
            panic!("expected response");
        };
        assert_eq!(e, exchange);
        assert_eq!(response.code, ResponseCode::Created);
        assert_eq!(response.location_path, vec!["rd", "5a3f"]);
        assert_eq!(transport.pending_count(), 0);
    }

    #[test]
    fn test_empty_ack_stops_retransmission() {
        let mut transport = transport();
        let start = Instant::now();
        transport
            .send_request(start, server(), &Request::new(Method::Post, "/rd"))
            .unwrap();
        let sent = transport.drain_outbox().remove(0);

        let ack = ack_for(&sent.bytes, MessageClass::Empty);
        assert!(transport.handle_datagram(start, server(), &ack).is_none());

        assert!(transport.poll(start + Duration::from_secs(10)).is_empty());
        assert!(transport.drain_outbox().is_empty());
        assert_eq!(
            transport.next_deadline(),
            Some(start + transport.params().exchange_lifetime())
        );
    }

    #[test]
    fn test_duplicate_request_gets_cached_reply() {
        let mut transport = transport();
        let now = Instant::now();
        let peer = server();

        let Some(TransportEvent::Request(inbound)) =
            transport.handle_datagram(now, peer, &inbound_get(7))
        else {
            panic!("expected request");
        };
        assert_eq!(inbound.request.path, vec!["3", "0", "9"]);
        assert_eq!(inbound.request.observe, Some(0));

        let response = Response::content(b"87".to_vec(), ContentFormat::TextPlain);
        transport.respond(&inbound, &response).unwrap();
        let first = transport.drain_outbox();

        assert!(transport.handle_datagram(now, peer, &inbound_get(7)).is_none());
        let repeated = transport.drain_outbox();
        assert_eq!(first, repeated);

        let ack = Packet::from_bytes(&repeated[0].bytes).unwrap();
        assert_eq!(ack.header.get_type(), MessageType::Acknowledgement);
        assert_eq!(ack.header.message_id, 7);
    }

    #[test]
    fn test_duplicate_window_expires() {
        let mut transport = transport();
        let now = Instant::now();
        assert!(transport.handle_datagram(now, server(), &inbound_get(7)).is_some());

        let later = now + transport.params().max_transmit_span() + Duration::from_millis(1);
        transport.poll(later);
        assert!(transport.handle_datagram(later, server(), &inbound_get(7)).is_some());
    }

    #[test]
    fn test_reset_cancels_notification() {
        let mut transport = transport();
        let now = Instant::now();
        let response = Response {
            observe: Some(1),
            ..Response::content(b"87".to_vec(), ContentFormat::TextPlain)
        };
        transport
            .send_notification(now, server(), &[0x42], &response)
            .unwrap();
        let sent = transport.drain_outbox().remove(0);
        let packet = Packet::from_bytes(&sent.bytes).unwrap();
        assert_eq!(packet.header.get_type(), MessageType::NonConfirmable);

        let mut reset = Packet::new();
        reset.header.set_type(MessageType::Reset);
        reset.header.message_id = packet.header.message_id;
        let event = transport.handle_datagram(now, server(), &reset.to_bytes().unwrap());
        assert!(matches!(
            event,
            Some(TransportEvent::NotificationReset { token, .. }) if token == vec![0x42]
        ));
    }

    #[test]
    fn test_unknown_method_is_rejected() {
        let mut transport = transport();
        let mut packet = Packet::new();
        packet.header.set_type(MessageType::Confirmable);
        packet.header.message_id = 9;
        packet.header.code = MessageClass::Request(RequestType::Fetch);

        let event = transport.handle_datagram(Instant::now(), server(), &packet.to_bytes().unwrap());
        assert!(event.is_none());
        let sent = transport.drain_outbox();
        let reply = Packet::from_bytes(&sent[0].bytes).unwrap();
        assert_eq!(u8::from(reply.header.code), (4 << 5) | 5);
    }
}
