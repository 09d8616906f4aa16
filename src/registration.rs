//! Registration state machine
//!
//! Drives Register, Update and De-register against one LwM2M server. The
//! machine is sans-IO: it hands out requests as [`Action::Send`] and is told
//! the outcome of the exchange through [`Registration::on_response`] or
//! [`Registration::on_failure`]. At most one registration exchange is in
//! flight; triggers that arrive meanwhile are coalesced.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::coap_types::{Request, Response, ResponseCode};
use crate::config::ClientConfig;
use crate::error::Lwm2mError;
use crate::path::Path;
use crate::request_builder::RequestBuilder;

/// Upper bound on the re-registration backoff once the client was registered
const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered,
    Updating,
    Deregistering,
    /// Terminal failure
    Error,
}

impl std::fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Work the engine must carry out for the state machine
#[derive(Debug, Clone)]
pub enum Action {
    /// Send a registration interface request
    Send(Request),
    /// The server forgot this client; drop its observations
    ClearObservations,
}

#[derive(Debug)]
pub struct Registration {
    state: RegistrationState,
    builder: RequestBuilder,
    /// Location-Path returned by a successful Register
    location: Option<Vec<String>>,
    lifetime: Duration,
    /// Last successful Register or Update
    renewed_at: Option<Instant>,
    /// Failed Register attempts since the last success
    attempts: u32,
    max_attempts: u32,
    retry_base: Duration,
    retry_at: Option<Instant>,
    /// Registered at least once; later losses are retried without bound
    ever_registered: bool,
    update_requested: bool,
    links_changed: bool,
    lifetime_changed: bool,
    error: Option<String>,
}

impl Registration {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            state: RegistrationState::Unregistered,
            builder: RequestBuilder::new(
                &config.endpoint_name,
                config.lifetime_seconds,
                &config.binding_mode,
            ),
            location: None,
            lifetime: Duration::from_secs(u64::from(config.lifetime_seconds)),
            renewed_at: None,
            attempts: 0,
            max_attempts: config.registration_attempts,
            retry_base: config.registration_retry(),
            retry_at: None,
            ever_registered: false,
            update_requested: false,
            links_changed: false,
            lifetime_changed: false,
            error: None,
        }
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    pub fn is_registered(&self) -> bool {
        matches!(
            self.state,
            RegistrationState::Registered | RegistrationState::Updating
        )
    }

    /// Registration exchange awaiting its outcome
    pub fn in_flight(&self) -> bool {
        matches!(
            self.state,
            RegistrationState::Registering
                | RegistrationState::Updating
                | RegistrationState::Deregistering
        )
    }

    pub fn location(&self) -> Option<&[String]> {
        self.location.as_deref()
    }

    /// Reason for entering [`RegistrationState::Error`]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Instant the registration lease runs out
    pub fn expiry(&self) -> Option<Instant> {
        self.renewed_at.map(|at| at + self.lifetime)
    }

    /// Safety margin before expiry at which the lease is renewed
    pub fn renewal_margin(&self) -> Duration {
        self.lifetime / 2
    }

    /// Instant the next Update is due
    pub fn renewal_due(&self) -> Option<Instant> {
        self.renewed_at
            .map(|at| at + (self.lifetime - self.renewal_margin()))
    }

    /// Begin registering
    pub fn start(&mut self, links: &[Path]) -> Vec<Action> {
        if self.state != RegistrationState::Unregistered {
            return Vec::new();
        }
        self.retry_at = None;
        self.register(links)
    }

    /// Ask for an Update; `links_changed` adds the object links to it
    pub fn request_update(&mut self, links_changed: bool) {
        self.update_requested = true;
        self.links_changed |= links_changed;
    }

    /// Change the registration lifetime; announced with the next Update
    pub fn set_lifetime(&mut self, seconds: u32) {
        if seconds == self.builder.lifetime() || seconds == 0 {
            return;
        }
        self.builder.set_lifetime(seconds);
        self.lifetime = Duration::from_secs(u64::from(seconds));
        self.lifetime_changed = true;
        self.update_requested = true;
    }

    /// Timers and coalesced triggers
    pub fn poll(&mut self, links: &[Path], now: Instant) -> Vec<Action> {
        match self.state {
            RegistrationState::Unregistered
                if self.retry_at.is_some_and(|at| at <= now) =>
            {
                self.retry_at = None;
                self.register(links)
            }
            RegistrationState::Registered => {
                let renewal = self.renewal_due().is_some_and(|due| due <= now);
                if renewal || self.update_requested {
                    self.update(links)
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }

    /// Begin De-registration; without a location there is nothing to do
    pub fn deregister(&mut self) -> Vec<Action> {
        let Some(location) = self.location.clone() else {
            self.enter(RegistrationState::Unregistered);
            return Vec::new();
        };
        self.enter(RegistrationState::Deregistering);
        vec![Action::Send(self.builder.build_deregister(&location))]
    }

    /// Outcome of the in-flight exchange: a response from the server
    pub fn on_response(&mut self, response: &Response, links: &[Path], now: Instant) -> Vec<Action> {
        match self.state {
            RegistrationState::Registering if response.code == ResponseCode::Created => {
                match RequestBuilder::parse_location(response) {
                    Ok(location) => {
                        info!(location = %location.join("/"), "registered");
                        self.location = Some(location);
                        self.renewed_at = Some(now);
                        self.attempts = 0;
                        self.ever_registered = true;
                        self.links_changed = false;
                        self.lifetime_changed = false;
                        self.update_requested = false;
                        self.enter(RegistrationState::Registered);
                    }
                    Err(e) => self.fail(e.to_string()),
                }
                Vec::new()
            }
            RegistrationState::Registering => {
                self.fail(format!("register rejected with {}", response.code));
                Vec::new()
            }
            RegistrationState::Updating if response.code.is_success() => {
                debug!("registration updated");
                self.renewed_at = Some(now);
                self.enter(RegistrationState::Registered);
                Vec::new()
            }
            RegistrationState::Updating if response.code == ResponseCode::NotFound => {
                warn!("server lost the registration, registering again");
                self.location = None;
                self.renewed_at = None;
                self.enter(RegistrationState::Unregistered);
                let mut actions = vec![Action::ClearObservations];
                actions.extend(self.register(links));
                actions
            }
            RegistrationState::Updating => {
                self.fail(format!("update rejected with {}", response.code));
                Vec::new()
            }
            RegistrationState::Deregistering => {
                if !response.code.is_success() {
                    warn!(code = %response.code, "deregistration rejected");
                }
                self.finish_deregistration();
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    /// Outcome of the in-flight exchange: no usable response
    pub fn on_failure(&mut self, error: &Lwm2mError, links: &[Path], now: Instant) -> Vec<Action> {
        let transient = matches!(
            error,
            Lwm2mError::TransportTimeout { .. } | Lwm2mError::TransportReset
        );
        match self.state {
            RegistrationState::Registering if transient => {
                self.attempts += 1;
                if !self.ever_registered && self.attempts >= self.max_attempts {
                    self.fail(format!(
                        "no registration after {} attempts: {}",
                        self.attempts, error
                    ));
                    return Vec::new();
                }
                let delay = self.backoff();
                warn!(attempt = self.attempts, ?delay, error = %error, "register failed, retrying");
                self.retry_at = Some(now + delay);
                self.enter(RegistrationState::Unregistered);
                Vec::new()
            }
            RegistrationState::Updating if transient => {
                warn!(error = %error, "update failed, registration lease considered lost");
                self.location = None;
                self.renewed_at = None;
                self.enter(RegistrationState::Unregistered);
                let mut actions = vec![Action::ClearObservations];
                actions.extend(self.register(links));
                actions
            }
            RegistrationState::Registering | RegistrationState::Updating => {
                self.fail(error.to_string());
                Vec::new()
            }
            RegistrationState::Deregistering => {
                warn!(error = %error, "deregistration failed");
                self.finish_deregistration();
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    /// Earliest instant `poll` has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            RegistrationState::Unregistered => self.retry_at,
            RegistrationState::Registered if self.update_requested => self.renewed_at,
            RegistrationState::Registered => self.renewal_due(),
            _ => None,
        }
    }

    fn register(&mut self, links: &[Path]) -> Vec<Action> {
        info!(attempt = self.attempts + 1, "registering");
        self.enter(RegistrationState::Registering);
        vec![Action::Send(self.builder.build_register(links))]
    }

    fn update(&mut self, links: &[Path]) -> Vec<Action> {
        let Some(location) = self.location.clone() else {
            return Vec::new();
        };
        let request = self.builder.build_update(
            &location,
            self.links_changed.then_some(links),
            self.lifetime_changed,
        );
        self.update_requested = false;
        self.links_changed = false;
        self.lifetime_changed = false;
        self.enter(RegistrationState::Updating);
        vec![Action::Send(request)]
    }

    fn backoff(&self) -> Duration {
        let exponent = self.attempts.saturating_sub(1).min(16);
        self.retry_base
            .saturating_mul(2u32.pow(exponent))
            .min(MAX_RETRY_DELAY.max(self.retry_base))
    }

    fn finish_deregistration(&mut self) {
        info!("deregistered");
        self.location = None;
        self.renewed_at = None;
        self.enter(RegistrationState::Unregistered);
    }

    fn fail(&mut self, reason: String) {
        warn!(%reason, "registration failed");
        self.error = Some(reason);
        self.enter(RegistrationState::Error);
    }

    fn enter(&mut self, state: RegistrationState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "registration state");
            self.state = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coap_types::Method;

    fn config() -> ClientConfig {
        let mut config = ClientConfig::for_server("coap://127.0.0.1", "dev-01");
        config.lifetime_seconds = 3600;
        config
    }

    fn links() -> Vec<Path> {
        vec![Path::instance(1, 0), Path::instance(3, 0)]
    }

    fn created() -> Response {
        Response {
            location_path: vec!["rd".into(), "5a3f".into()],
            ..Response::new(ResponseCode::Created)
        }
    }

    fn sent(actions: &[Action]) -> Vec<&Request> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    fn registered(now: Instant) -> Registration {
        let mut reg = Registration::new(&config());
        reg.start(&links());
        reg.on_response(&created(), &links(), now);
        reg
    }

    fn timeout() -> Lwm2mError {
        Lwm2mError::TransportTimeout { attempts: 5 }
    }

    #[test]
    fn test_register_success() {
        let now = Instant::now();
        let mut reg = Registration::new(&config());
        let actions = reg.start(&links());
        assert_eq!(sent(&actions)[0].path, vec!["rd"]);
        assert_eq!(reg.state(), RegistrationState::Registering);
        assert!(reg.in_flight());

        reg.on_response(&created(), &links(), now);
        assert_eq!(reg.state(), RegistrationState::Registered);
        assert_eq!(reg.location().unwrap(), ["rd", "5a3f"]);
        assert_eq!(reg.expiry(), Some(now + Duration::from_secs(3600)));
    }

    #[test]
    fn test_update_at_lifetime_minus_margin() {
        let now = Instant::now();
        let mut reg = registered(now);
        assert_eq!(reg.next_deadline(), Some(now + Duration::from_secs(1800)));

        assert!(reg.poll(&links(), now + Duration::from_secs(1799)).is_empty());
        let actions = reg.poll(&links(), now + Duration::from_secs(1800));
        let requests = sent(&actions);
        assert_eq!(requests[0].path_string(), "/rd/5a3f");
        assert!(requests[0].payload.is_empty());
        assert_eq!(reg.state(), RegistrationState::Updating);

        // No second update while one is in flight
        reg.request_update(true);
        assert!(reg.poll(&links(), now + Duration::from_secs(1801)).is_empty());

        let later = now + Duration::from_secs(1802);
        reg.on_response(&Response::changed(), &links(), later);
        assert_eq!(reg.expiry(), Some(later + Duration::from_secs(3600)));

        // Coalesced trigger goes out after completion, with links
        let actions = reg.poll(&links(), later);
        assert_eq!(sent(&actions)[0].payload, b"</1/0>,</3/0>");
    }

    #[test]
    fn test_register_timeout_retries_with_backoff() {
        let now = Instant::now();
        let mut reg = Registration::new(&config());
        reg.start(&links());

        let mut at = now;
        let mut delays = Vec::new();
        for _ in 0..4 {
            reg.on_failure(&timeout(), &links(), at);
            assert_eq!(reg.state(), RegistrationState::Unregistered);
            let retry = reg.next_deadline().unwrap();
            delays.push(retry - at);
            at = retry;
            assert_eq!(sent(&reg.poll(&links(), at)).len(), 1);
        }
        assert_eq!(
            delays,
            [5, 10, 20, 40].map(Duration::from_secs).to_vec()
        );

        reg.on_failure(&timeout(), &links(), at);
        assert_eq!(reg.state(), RegistrationState::Error);
        assert!(reg.error().unwrap().contains("5 attempts"));
    }

    #[test]
    fn test_register_reject_is_fatal() {
        let now = Instant::now();
        let mut reg = Registration::new(&config());
        reg.start(&links());
        reg.on_response(&Response::new(ResponseCode::Forbidden), &links(), now);
        assert_eq!(reg.state(), RegistrationState::Error);
    }

    #[test]
    fn test_update_not_found_reregisters() {
        let now = Instant::now();
        let mut reg = registered(now);
        reg.request_update(false);
        reg.poll(&links(), now);

        let actions = reg.on_response(&Response::new(ResponseCode::NotFound), &links(), now);
        assert!(matches!(actions[0], Action::ClearObservations));
        assert_eq!(sent(&actions)[0].path, vec!["rd"]);
        assert_eq!(reg.state(), RegistrationState::Registering);
    }

    #[test]
    fn test_update_timeout_loses_lease_and_retries_unbounded() {
        let now = Instant::now();
        let mut reg = registered(now);
        reg.request_update(false);
        reg.poll(&links(), now);

        let actions = reg.on_failure(&timeout(), &links(), now);
        assert!(matches!(actions[0], Action::ClearObservations));
        assert_eq!(reg.state(), RegistrationState::Registering);
        assert!(reg.location().is_none());

        for _ in 0..10 {
            reg.on_failure(&timeout(), &links(), now);
            assert_eq!(reg.state(), RegistrationState::Unregistered);
            let retry = reg.next_deadline().unwrap();
            reg.poll(&links(), retry);
        }
        assert_eq!(reg.state(), RegistrationState::Registering);
    }

    #[test]
    fn test_deregister_always_ends_unregistered() {
        let now = Instant::now();
        let mut reg = registered(now);
        let actions = reg.deregister();
        assert_eq!(sent(&actions)[0].method, Method::Delete);
        assert_eq!(reg.state(), RegistrationState::Deregistering);

        reg.on_failure(&timeout(), &links(), now);
        assert_eq!(reg.state(), RegistrationState::Unregistered);
        assert!(reg.location().is_none());
    }

    #[test]
    fn test_lifetime_change_triggers_update() {
        let now = Instant::now();
        let mut reg = registered(now);
        reg.set_lifetime(600);
        let actions = reg.poll(&links(), now);
        assert_eq!(sent(&actions)[0].query, vec!["lt=600"]);
    }
}
