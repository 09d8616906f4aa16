//! Protocol engine
//!
//! Owns every piece of client state: the transport, the request handler
//! (resource model and observations) and the registration state machine.
//! The engine is sans-IO and single-threaded; [`crate::client::Client`]
//! feeds it datagrams, readings and the passage of time.

use std::net::SocketAddr;
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use crate::coap_types::Response;
use crate::config::ClientConfig;
use crate::error::{Lwm2mError, Result};
use crate::handler::{Origin, RequestHandler, encode_payload};
use crate::model::ResourceModel;
use crate::observe::Notification;
use crate::path::Path;
use crate::producer::Reading;
use crate::registration::{Action, Registration, RegistrationState};
use crate::schema::object_id;
use crate::transport::{Datagram, ExchangeId, Transport, TransportEvent, TransportParams};
use crate::value::Value;

/// Server resources acted on by the engine
const SERVER_LIFETIME: u16 = 1;
const SERVER_UPDATE_TRIGGER: u16 = 8;
const DEVICE_REBOOT: u16 = 4;
const DEVICE_FACTORY_RESET: u16 = 5;
const LOCATION_TIMESTAMP: u16 = 5;

#[derive(Debug)]
pub struct Engine {
    server: SocketAddr,
    transport: Transport,
    handler: RequestHandler,
    registration: Registration,
    /// Exchange carrying the in-flight registration request
    registration_exchange: Option<ExchangeId>,
    shutting_down: bool,
}

impl Engine {
    /// Create an engine for `server`; the mandatory objects must exist
    pub fn new(config: &ClientConfig, model: ResourceModel, server: SocketAddr) -> Result<Self> {
        Self::with_transport(
            config,
            model,
            server,
            Transport::new(TransportParams::from_config(config)),
        )
    }

    /// Create an engine around an existing transport
    pub fn with_transport(
        config: &ClientConfig,
        model: ResourceModel,
        server: SocketAddr,
        transport: Transport,
    ) -> Result<Self> {
        model.check_mandatory()?;
        Ok(Self {
            server,
            transport,
            handler: RequestHandler::new(model),
            registration: Registration::new(config),
            registration_exchange: None,
            shutting_down: false,
        })
    }

    pub fn model(&self) -> &ResourceModel {
        self.handler.model()
    }

    pub fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    pub fn registration_state(&self) -> RegistrationState {
        self.registration.state()
    }

    /// Registration failed for good
    pub fn fatal_error(&self) -> Option<Lwm2mError> {
        (self.registration.state() == RegistrationState::Error).then(|| {
            Lwm2mError::Registration(
                self.registration
                    .error()
                    .unwrap_or("registration failed")
                    .to_string(),
            )
        })
    }

    /// Shutdown requested and the deregistration exchange has ended
    pub fn is_finished(&self) -> bool {
        self.shutting_down && self.registration_exchange.is_none()
    }

    /// Send the initial Register request
    pub fn start(&mut self, now: Instant) {
        info!(server = %self.server, "starting registration");
        let links = self.handler.model().links();
        let actions = self.registration.start(&links);
        self.apply(actions, now);
    }

    /// Process one inbound datagram
    pub fn handle_datagram(&mut self, now: Instant, peer: SocketAddr, bytes: &[u8]) {
        if let Some(event) = self.transport.handle_datagram(now, peer, bytes) {
            self.handle_event(event, now);
        }
        self.drive_registration(now);
    }

    /// Apply a producer reading; observers are notified before this returns
    pub fn push_reading(&mut self, reading: Reading, now: Instant) -> Result<()> {
        let path = reading.path();
        trace!(%path, value = %reading.value, "reading");
        self.handler
            .model_mut()
            .set_internal(&path, reading.value)?;

        if let Some(timestamp) = reading.timestamp {
            if reading.object_id == object_id::LOCATION {
                let stamp = Path::resource(reading.object_id, reading.instance_id, LOCATION_TIMESTAMP);
                if let Err(e) = self.handler.model_mut().set_internal(&stamp, Value::Time(timestamp)) {
                    debug!(error = %e, "location timestamp not stored");
                }
            }
        }

        self.after_model_change(now);
        Ok(())
    }

    /// Local write of a resource, bypassing the operation mode
    pub fn set_value(&mut self, path: &Path, value: Value, now: Instant) -> Result<()> {
        self.handler.model_mut().set_internal(path, value)?;
        self.after_model_change(now);
        Ok(())
    }

    /// Handle expired timers
    pub fn poll(&mut self, now: Instant) {
        for event in self.transport.poll(now) {
            self.handle_event(event, now);
        }
        self.drive_registration(now);

        let (model, observations) = self.handler.split_mut();
        let notifications = observations.poll(model, now);
        self.send_notifications(notifications, now);
    }

    /// Earliest instant [`Engine::poll`] must run
    pub fn next_deadline(&self) -> Option<Instant> {
        let registration = if self.shutting_down {
            None
        } else {
            self.registration.next_deadline()
        };
        [
            self.transport.next_deadline(),
            registration,
            self.handler
                .observations()
                .next_deadline(self.handler.model()),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Take the datagrams to put on the wire
    pub fn drain_outbox(&mut self) -> Vec<Datagram> {
        self.transport.drain_outbox()
    }

    /// Stop serving and deregister; other pending exchanges are abandoned
    pub fn shutdown(&mut self, now: Instant) {
        if self.shutting_down {
            return;
        }
        info!("shutting down");
        self.shutting_down = true;
        if let Some(exchange) = self.registration_exchange.take() {
            self.transport.cancel(exchange);
        }
        self.handler.observations_mut().clear();
        let actions = self.registration.deregister();
        self.apply(actions, now);
    }

    fn handle_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Request(inbound) => {
                let origin = Origin {
                    peer: inbound.peer,
                    token: &inbound.token,
                };
                let response = self.handler.handle(&inbound.request, origin, now);
                debug!(
                    method = %inbound.request.method,
                    path = %inbound.request.path_string(),
                    code = %response.code,
                    "handled request"
                );
                if let Err(e) = self.transport.respond(&inbound, &response) {
                    warn!(error = %e, "failed to send response");
                }
                self.after_model_change(now);
            }
            TransportEvent::Response { exchange, response } => {
                if self.registration_exchange != Some(exchange) {
                    debug!(%exchange, "response for abandoned exchange");
                    return;
                }
                self.registration_exchange = None;
                let links = self.handler.model().links();
                let actions = self.registration.on_response(&response, &links, now);
                self.apply(actions, now);
            }
            TransportEvent::Failed { exchange, error } => {
                if self.registration_exchange != Some(exchange) {
                    return;
                }
                self.registration_exchange = None;
                let links = self.handler.model().links();
                let actions = self.registration.on_failure(&error, &links, now);
                self.apply(actions, now);
            }
            TransportEvent::NotificationReset { peer, token } => {
                if self.handler.observations_mut().stop(peer, &token).is_ok() {
                    debug!(%peer, "observation cancelled by reset");
                }
            }
        }
    }

    /// Report journaled model changes to observers and registration
    fn after_model_change(&mut self, now: Instant) {
        let model = self.handler.model_mut();
        let changes = model.take_changes();
        let executions = model.take_executions();
        let objects_changed = model.take_objects_changed();

        for path in &changes {
            if path.object == object_id::SERVER && path.resource == Some(SERVER_LIFETIME) {
                if let Ok(Value::Integer(lifetime)) = self.handler.model().get(path) {
                    match u32::try_from(lifetime) {
                        Ok(lifetime) => self.registration.set_lifetime(lifetime),
                        Err(_) => warn!(lifetime, "ignoring out-of-range lifetime"),
                    }
                }
            }
        }

        for path in &executions {
            match (path.object, path.resource) {
                (object_id::SERVER, Some(SERVER_UPDATE_TRIGGER)) => {
                    info!("registration update triggered by server");
                    self.registration.request_update(false);
                }
                (object_id::DEVICE, Some(DEVICE_REBOOT)) => info!("reboot requested"),
                (object_id::DEVICE, Some(DEVICE_FACTORY_RESET)) => info!("factory reset requested"),
                _ => debug!(%path, "executed"),
            }
        }

        if objects_changed {
            self.registration.request_update(true);
        }

        if !changes.is_empty() {
            let (model, observations) = self.handler.split_mut();
            let notifications = observations.notify_changed(&changes, model, now);
            self.send_notifications(notifications, now);
        }
        self.drive_registration(now);
    }

    fn drive_registration(&mut self, now: Instant) {
        if self.shutting_down || self.registration_exchange.is_some() {
            return;
        }
        let links = self.handler.model().links();
        let actions = self.registration.poll(&links, now);
        self.apply(actions, now);
    }

    fn apply(&mut self, actions: Vec<Action>, now: Instant) {
        for action in actions {
            match action {
                Action::Send(request) => {
                    match self.transport.send_request(now, self.server, &request) {
                        Ok(exchange) => self.registration_exchange = Some(exchange),
                        Err(error) => {
                            warn!(%error, "registration request not sent");
                            let links = self.handler.model().links();
                            let follow_up = self.registration.on_failure(&error, &links, now);
                            self.apply(follow_up, now);
                        }
                    }
                }
                Action::ClearObservations => self.handler.observations_mut().clear(),
            }
        }
    }

    fn send_notifications(&mut self, notifications: Vec<Notification>, now: Instant) {
        for notification in notifications {
            let payload = match encode_payload(&notification.path, &notification.content, notification.format) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(path = %notification.path, error = %e, "notification not encoded");
                    continue;
                }
            };
            let response = Response {
                observe: Some(notification.sequence),
                ..Response::content(payload, notification.format)
            };
            debug!(path = %notification.path, seq = notification.sequence, "notify");
            if let Err(e) =
                self.transport
                    .send_notification(now, notification.peer, &notification.token, &response)
            {
                warn!(error = %e, "notification not sent");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coap_types::ResponseCode;
    use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType};
    use std::time::Duration;

    fn server() -> SocketAddr {
        "127.0.0.1:5683".parse().unwrap()
    }

    fn engine() -> Engine {
        let mut config = ClientConfig::for_server("coap://127.0.0.1:5683", "dev-01");
        config.lifetime_seconds = 3600;
        let model = ResourceModel::from_config(&config).unwrap();
        let transport = Transport::with_seed(TransportParams::from_config(&config), 1, 1);
        Engine::with_transport(&config, model, server(), transport).unwrap()
    }

    fn reply(request: &Datagram, code: ResponseCode, location: &[&str]) -> Vec<u8> {
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

    fn registered(now: Instant) -> Engine {
        let mut engine = engine();
        engine.start(now);
        let register = engine.drain_outbox().remove(0);
        engine.handle_datagram(now, server(), &reply(&register, ResponseCode::Created, &["rd", "1"]));
        assert_eq!(engine.registration_state(), RegistrationState::Registered);
        engine
    }

    #[test]
    fn test_missing_mandatory_object() {
        let config = ClientConfig::for_server("coap://127.0.0.1:5683", "dev-01");
        let err = Engine::new(&config, ResourceModel::new(), server()).unwrap_err();
        assert!(matches!(err, Lwm2mError::MissingMandatoryObject(_)));
    }

    #[test]
    fn test_register_reject_is_fatal() {
        let now = Instant::now();
        let mut engine = engine();
        engine.start(now);
        let register = engine.drain_outbox().remove(0);
        engine.handle_datagram(now, server(), &reply(&register, ResponseCode::BadRequest, &[]));
        assert!(matches!(engine.fatal_error(), Some(Lwm2mError::Registration(_))));
    }

    #[test]
    fn test_update_trigger_execute() {
        let now = Instant::now();
        let mut engine = registered(now);

        let mut execute = Packet::new();
        execute.header.set_type(MessageType::Confirmable);
        execute.header.message_id = 500;
        execute.header.code = MessageClass::Request(RequestType::Post);
        execute.set_token(vec![9]);
        for segment in ["1", "0", "8"] {
            execute.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
        }
        engine.handle_datagram(now, server(), &execute.to_bytes().unwrap());

        let sent = engine.drain_outbox();
        assert_eq!(sent.len(), 2);
        let update = Packet::from_bytes(&sent[1].bytes).unwrap();
        assert_eq!(update.header.code, MessageClass::Request(RequestType::Post));
        assert_eq!(engine.registration_state(), RegistrationState::Updating);
    }

    #[test]
    fn test_lifetime_write_updates_registration() {
        let now = Instant::now();
        let mut engine = registered(now);
        engine
            .set_value(&Path::resource(1, 0, 1), Value::Integer(120), now)
            .unwrap();
        let update = engine.drain_outbox().remove(0);
        let packet = Packet::from_bytes(&update.bytes).unwrap();
        let query: Vec<Vec<u8>> = packet
            .get_option(CoapOption::UriQuery)
            .unwrap()
            .iter()
            .cloned()
            .collect();
        assert_eq!(query, vec![b"lt=120".to_vec()]);
    }

    #[test]
    fn test_shutdown_deregisters_once() {
        let now = Instant::now();
        let mut engine = registered(now);
        engine.shutdown(now);
        let sent = engine.drain_outbox();
        assert_eq!(sent.len(), 1);
        assert_eq!(engine.registration_state(), RegistrationState::Deregistering);
        assert!(!engine.is_finished());

        // No reply: the exchange times out and still ends unregistered
        let mut at = now;
        while let Some(deadline) = engine.next_deadline() {
            at = deadline;
            engine.poll(at);
        }
        assert!(at - now >= Duration::from_secs(62));
        assert!(engine.is_finished());
        assert_eq!(engine.registration_state(), RegistrationState::Unregistered);
    }
}
