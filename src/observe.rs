//! Observation manager
//!
//! Tracks observations started by the server and decides when a
//! notification is due. Notification pacing follows the `pmin`/`pmax`
//! attributes of the observed path, falling back to the Default Minimum and
//! Maximum Period resources of the Server object.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::coap_types::{ContentFormat, QueryParams};
use crate::error::{Lwm2mError, Result};
use crate::model::{Content, ResourceModel};
use crate::path::Path;
use crate::schema::object_id;
use crate::value::Value;

/// Observe sequence numbers are carried in a 3-byte option
pub const SEQUENCE_MODULUS: u32 = 1 << 24;

/// Server resource IDs holding the default notification periods
const DEFAULT_MIN_PERIOD: u16 = 2;
const DEFAULT_MAX_PERIOD: u16 = 3;

/// One active observation
#[derive(Debug, Clone)]
pub struct Observation {
    pub token: Vec<u8>,
    pub path: Path,
    pub peer: SocketAddr,
    /// Content format of the initial response, reused for notifications
    pub format: ContentFormat,
    /// Sequence number of the last message sent
    pub sequence: u32,
    last_content: Content,
    last_sent: Instant,
    /// Content changed while `pmin` had not yet elapsed
    pending: bool,
}

/// A notification that must be sent now
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub peer: SocketAddr,
    pub token: Vec<u8>,
    pub path: Path,
    pub format: ContentFormat,
    pub sequence: u32,
    pub content: Content,
}

/// Effective pacing of one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pacing {
    pmin: Duration,
    pmax: Option<Duration>,
}

/// Active observations and Write-Attributes state
#[derive(Debug, Default)]
pub struct ObservationManager {
    observations: Vec<Observation>,
    attributes: BTreeMap<Path, QueryParams>,
}

impl ObservationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start observing `path`; `initial` is the content returned in the
    /// response that carries sequence number 0
    pub fn start(
        &mut self,
        path: Path,
        token: Vec<u8>,
        peer: SocketAddr,
        format: ContentFormat,
        initial: Content,
        now: Instant,
    ) -> Result<&Observation> {
        if self.find(peer, &token).is_some() {
            return Err(Lwm2mError::AlreadyObserving);
        }
        debug!(%path, %peer, "observation started");
        self.observations.push(Observation {
            token,
            path,
            peer,
            format,
            sequence: 0,
            last_content: initial,
            last_sent: now,
            pending: false,
        });
        self.observations
            .last()
            .ok_or(Lwm2mError::ObservationNotFound)
    }

    /// Stop the observation identified by its token
    pub fn stop(&mut self, peer: SocketAddr, token: &[u8]) -> Result<Observation> {
        let index = self
            .find(peer, token)
            .ok_or(Lwm2mError::ObservationNotFound)?;
        let observation = self.observations.remove(index);
        debug!(path = %observation.path, "observation stopped");
        Ok(observation)
    }

    /// Stop every observation of exactly `path`, returning how many ended
    pub fn stop_path(&mut self, path: &Path) -> usize {
        let before = self.observations.len();
        self.observations.retain(|o| o.path != *path);
        before - self.observations.len()
    }

    /// Drop all observations (registration lost)
    pub fn clear(&mut self) {
        if !self.observations.is_empty() {
            debug!(count = self.observations.len(), "clearing observations");
        }
        self.observations.clear();
    }

    pub fn is_observing(&self, peer: SocketAddr, token: &[u8]) -> bool {
        self.find(peer, token).is_some()
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Apply Write-Attributes to `path`; attributes not given keep their value
    pub fn set_attributes(&mut self, path: Path, params: QueryParams) {
        let entry = self.attributes.entry(path).or_default();
        if params.pmin.is_some() {
            entry.pmin = params.pmin;
        }
        if params.pmax.is_some() {
            entry.pmax = params.pmax;
        }
    }

    /// Attributes written directly on `path`
    pub fn attributes(&self, path: &Path) -> QueryParams {
        self.attributes.get(path).copied().unwrap_or_default()
    }

    /// Report resources written since the last call
    pub fn notify_changed(
        &mut self,
        changed: &[Path],
        model: &ResourceModel,
        now: Instant,
    ) -> Vec<Notification> {
        let mut out = Vec::new();
        let mut dropped = Vec::new();

        for index in 0..self.observations.len() {
            let path = self.observations[index].path;
            let affected = changed
                .iter()
                .any(|c| path.contains(c) || c.contains(&path));
            if !affected {
                continue;
            }

            let pacing = self.pacing(&path, model);
            let observation = &mut self.observations[index];
            let content = match model.read(&path) {
                Ok(content) => content,
                Err(e) => {
                    debug!(%path, error = %e, "observed path no longer readable");
                    dropped.push(index);
                    continue;
                }
            };
            if now.duration_since(observation.last_sent) >= pacing.pmin {
                out.push(emit(observation, content, now));
            } else if content != observation.last_content {
                observation.pending = true;
            }
        }

        for index in dropped.into_iter().rev() {
            self.observations.remove(index);
        }
        out
    }

    /// Notifications whose `pmin` deferral or `pmax` keep-alive is due
    pub fn poll(&mut self, model: &ResourceModel, now: Instant) -> Vec<Notification> {
        let mut out = Vec::new();
        let mut dropped = Vec::new();

        for index in 0..self.observations.len() {
            let path = self.observations[index].path;
            let pacing = self.pacing(&path, model);
            let observation = &mut self.observations[index];
            let since = now.duration_since(observation.last_sent);

            let deferred_due = observation.pending && since >= pacing.pmin;
            let keep_alive_due = pacing.pmax.is_some_and(|pmax| since >= pmax);
            if !deferred_due && !keep_alive_due {
                continue;
            }

            let content = match model.read(&path) {
                Ok(content) => content,
                Err(e) => {
                    debug!(%path, error = %e, "observed path no longer readable");
                    dropped.push(index);
                    continue;
                }
            };
            out.push(emit(observation, content, now));
        }

        for index in dropped.into_iter().rev() {
            self.observations.remove(index);
        }
        out
    }

    /// Earliest instant at which `poll` has work to do
    pub fn next_deadline(&self, model: &ResourceModel) -> Option<Instant> {
        self.observations
            .iter()
            .filter_map(|o| {
                let pacing = self.pacing(&o.path, model);
                let deferred = o.pending.then(|| o.last_sent + pacing.pmin);
                let keep_alive = pacing.pmax.map(|pmax| o.last_sent + pmax);
                match (deferred, keep_alive) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                }
            })
            .min()
    }

    fn find(&self, peer: SocketAddr, token: &[u8]) -> Option<usize> {
        self.observations
            .iter()
            .position(|o| o.peer == peer && o.token == token)
    }

    /// Attributes of the nearest path level that sets them, then server defaults
    fn pacing(&self, path: &Path, model: &ResourceModel) -> Pacing {
        let mut pmin = None;
        let mut pmax = None;
        let mut level = Some(*path);
        while let Some(current) = level {
            let params = self.attributes(&current);
            pmin = pmin.or(params.pmin);
            pmax = pmax.or(params.pmax);
            level = parent(&current);
        }

        let server_default = |resource: u16| {
            let instance = model.instance_ids(object_id::SERVER).first().copied()?;
            match model.get(&Path::resource(object_id::SERVER, instance, resource)) {
                Ok(Value::Integer(seconds)) => u32::try_from(seconds).ok(),
                _ => None,
            }
        };
        let pmin = pmin.or_else(|| server_default(DEFAULT_MIN_PERIOD)).unwrap_or(0);
        let pmax = pmax
            .or_else(|| server_default(DEFAULT_MAX_PERIOD))
            .filter(|pmax| *pmax > 0 && *pmax >= pmin);

        Pacing {
            pmin: Duration::from_secs(u64::from(pmin)),
            pmax: pmax.map(|s| Duration::from_secs(u64::from(s))),
        }
    }
}

fn parent(path: &Path) -> Option<Path> {
    match (path.instance, path.resource, path.resource_instance) {
        (_, _, Some(_)) => Some(path.without_resource_instance()),
        (Some(instance), Some(_), None) => Some(Path::instance(path.object, instance)),
        (Some(_), None, None) => Some(Path::object(path.object)),
        _ => None,
    }
}

fn emit(observation: &mut Observation, content: Content, now: Instant) -> Notification {
    observation.sequence = (observation.sequence + 1) % SEQUENCE_MODULUS;
    observation.last_content = content.clone();
    observation.last_sent = now;
    observation.pending = false;
    Notification {
        peer: observation.peer,
        token: observation.token.clone(),
        path: observation.path,
        format: observation.format,
        sequence: observation.sequence,
        content,
    }
}
