//! lwm2m-client - LwM2M 1.0 device-management client over CoAP
//!
//! This library exposes a device's resource tree (Security, Server, Device,
//! Connectivity Monitoring, Location and IPSO sensor objects) to an LwM2M
//! server. It registers with the server, keeps the registration alive,
//! answers Read/Write/Execute/Discover/Write-Attributes requests in TLV,
//! SenML JSON/CBOR or plain text, and pushes Observe notifications when
//! producers report new readings.
//!
//! # Example
//!
//! ```no_run
//! use lwm2m_client::{Client, ClientConfig, ResourceModel};
//! use tokio::sync::watch;
//!
//! # async fn run() -> lwm2m_client::Result<()> {
//! let config = ClientConfig::for_server("coap://127.0.0.1:5683", "dev-01");
//! let model = ResourceModel::from_config(&config)?.with_sensor_objects()?;
//!
//! let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//! let client = Client::connect(&config, model, shutdown_rx).await?;
//!
//! // Readings may be pushed from any task or thread
//! let producer = client.producer();
//! producer.push_reading(3, 0, 9, 87i64, None);
//!
//! client.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod coap_types;
pub mod config;
pub mod engine;
mod error;
pub mod handler;
pub mod link;
pub mod model;
pub mod observe;
pub mod path;
pub mod producer;
pub mod registration;
pub mod request_builder;
pub mod schema;
pub mod senml;
pub mod tlv;
pub mod transport;
pub mod value;

pub use client::Client;
pub use config::ClientConfig;
pub use engine::Engine;
pub use error::{ConfigError, Lwm2mError, Result};
pub use handler::RequestHandler;
pub use model::ResourceModel;
pub use path::Path;
pub use producer::{ProducerHandle, Reading};
pub use registration::RegistrationState;
pub use request_builder::RequestBuilder;
pub use value::Value;
