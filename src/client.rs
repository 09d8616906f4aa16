//! Async client driver
//!
//! Runs the [`Engine`] on one tokio task, selecting over inbound datagrams,
//! producer readings, the shutdown signal and the engine's next deadline.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::engine::Engine;
use crate::error::{Lwm2mError, Result};
use crate::model::ResourceModel;
use crate::producer::{ProducerHandle, Reading};
use crate::registration::RegistrationState;
use crate::transport::DatagramTransport;

/// Receive buffer size; covers the largest UDP payload
const MAX_DATAGRAM: usize = 64 * 1024;

/// Wait used when the engine has no deadline
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// LwM2M client bound to one server over a datagram socket
#[derive(Debug)]
pub struct Client<S = UdpSocket> {
    engine: Engine,
    socket: S,
    readings: mpsc::UnboundedReceiver<Reading>,
    producer: ProducerHandle,
    shutdown: watch::Receiver<bool>,
    shutdown_grace: Duration,
}

impl Client<UdpSocket> {
    /// Resolve the server, bind a UDP socket and build the engine
    pub async fn connect(
        config: &ClientConfig,
        model: ResourceModel,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let (host, port) = config
            .server_host_port()
            .map_err(|e| Lwm2mError::Registration(e.to_string()))?;
        let server = tokio::net::lookup_host((host.as_str(), port))
            .await?
            .next()
            .ok_or_else(|| Lwm2mError::Registration(format!("cannot resolve {}", host)))?;

        let local: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, config.local_port).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, config.local_port).into()
        };
        let socket = UdpSocket::bind(local).await?;
        info!(local = %socket.local_addr()?, %server, "socket bound");

        let engine = Engine::new(config, model, server)?;
        Ok(Self::new(engine, socket, shutdown, config.shutdown_grace()))
    }
}

impl<S: DatagramTransport> Client<S> {
    pub fn new(
        engine: Engine,
        socket: S,
        shutdown: watch::Receiver<bool>,
        shutdown_grace: Duration,
    ) -> Self {
        let (producer, readings) = ProducerHandle::channel();
        Self {
            engine,
            socket,
            readings,
            producer,
            shutdown,
            shutdown_grace,
        }
    }

    /// Handle for pushing readings from any thread
    pub fn producer(&self) -> ProducerHandle {
        self.producer.clone()
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Register and serve until shutdown
    ///
    /// Fails when registration ends in [`RegistrationState::Error`]. After
    /// the shutdown signal one deregistration exchange is given the grace
    /// period to finish.
    pub async fn run(mut self) -> Result<RegistrationState> {
        self.engine.start(Instant::now());
        self.flush().await;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut grace_deadline: Option<Instant> = None;
        let mut shutdown_open = true;

        loop {
            if let Some(error) = self.engine.fatal_error() {
                return Err(error);
            }
            if self.engine.is_finished() {
                return Ok(self.engine.registration_state());
            }

            let now = Instant::now();
            let wake = [self.engine.next_deadline(), grace_deadline]
                .into_iter()
                .flatten()
                .min()
                .unwrap_or(now + IDLE_WAIT);

            tokio::select! {
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => {
                        self.engine.handle_datagram(Instant::now(), peer, &buf[..len]);
                    }
                    Err(e) => warn!(error = %e, "receive failed"),
                },
                Some(reading) = self.readings.recv() => {
                    if let Err(e) = self.engine.push_reading(reading, Instant::now()) {
                        warn!(error = %e, "reading rejected");
                    }
                }
                changed = self.shutdown.changed(), if shutdown_open && grace_deadline.is_none() => {
                    match changed {
                        Ok(()) if *self.shutdown.borrow() => {
                            let now = Instant::now();
                            self.engine.shutdown(now);
                            grace_deadline = Some(now + self.shutdown_grace);
                        }
                        Ok(()) => {}
                        Err(_) => {
                            warn!("shutdown signal dropped, running until the process exits");
                            shutdown_open = false;
                        }
                    }
                }
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(wake)) => {
                    let now = Instant::now();
                    if grace_deadline.is_some_and(|grace| now >= grace) {
                        warn!("deregistration did not finish within the shutdown grace period");
                        return Ok(self.engine.registration_state());
                    }
                    self.engine.poll(now);
                }
            }

            self.flush().await;
        }
    }

    async fn flush(&mut self) {
        for datagram in self.engine.drain_outbox() {
            debug!(peer = %datagram.peer, len = datagram.bytes.len(), "send");
            if let Err(e) = self.socket.send_to(&datagram.bytes, datagram.peer).await {
                warn!(peer = %datagram.peer, error = %e, "send failed");
            }
        }
    }
}
