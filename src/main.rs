//! LwM2M client binary.
//!
//! # Usage
//!
//! ```bash
//! lwm2m-client --config client.json
//! lwm2m-client --config client.json --log-level debug --sample-interval 10
//! ```

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use lwm2m_client::schema::{ipso, object_id};
use lwm2m_client::{Client, ClientConfig, ProducerHandle, ResourceModel};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// LwM2M device-management client
#[derive(Parser, Debug)]
#[command(name = "lwm2m-client")]
#[command(about = "LwM2M client exposing simulated device and sensor objects over CoAP")]
#[command(version)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Seconds between simulated sensor readings
    #[arg(long, default_value = "30")]
    sample_interval: u64,

    /// Do not run the sensor simulation
    #[arg(long)]
    no_simulation: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = match ClientConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}: {}", args.config, e);
            return ExitCode::FAILURE;
        }
    };

    match run(config, &args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ClientConfig, args: &Args) -> lwm2m_client::Result<()> {
    tracing::info!(
        endpoint = %config.endpoint_name,
        server = %config.server_uri,
        lifetime = config.lifetime_seconds,
        "LwM2M client starting"
    );

    let model = ResourceModel::from_config(&config)?.with_sensor_objects()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let client = Client::connect(&config, model, shutdown_rx).await?;

    if !args.no_simulation {
        let producer = client.producer();
        let interval = Duration::from_secs(args.sample_interval.max(1));
        tokio::spawn(simulate_sensors(producer, interval));
    }

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for Ctrl+C");
            // Keep the sender alive so the client is not told to stop
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, deregistering");
        if shutdown_tx.send(true).is_err() {
            tracing::warn!("client already stopped, nothing to deregister");
        }
    });

    let state = client.run().await?;
    tracing::info!(%state, "client stopped");
    Ok(())
}

/// Periodic battery drain and temperature/humidity drift
async fn simulate_sensors(producer: ProducerHandle, interval: Duration) {
    let mut rng = StdRng::from_entropy();
    let mut battery = 100.0f64;
    let temperature = Sensor::new(object_id::TEMPERATURE, 22.0, 0.5, (-40.0, 85.0));
    let humidity = Sensor::new(object_id::HUMIDITY, 45.0, 2.0, (20.0, 90.0));

    let mut ticker = tokio::time::interval(interval);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let now = lwm2m_client::value::unix_time_now();

        battery = (battery - rng.gen_range(0.0..0.1)).max(20.0);
        let mut alive = producer.push_reading(object_id::DEVICE, 0, 9, battery as i64, Some(now));

        for sensor in [&temperature, &humidity] {
            alive &= sensor.sample(&mut rng, &producer, now);
        }

        if !alive {
            tracing::debug!("client stopped, ending sensor simulation");
            return;
        }
    }
}

/// Simulated IPSO sensor; Min/Max Measured Value are tracked by the model
struct Sensor {
    object: u16,
    base: f64,
    noise: f64,
    clamp: (f64, f64),
}

impl Sensor {
    fn new(object: u16, base: f64, noise: f64, clamp: (f64, f64)) -> Self {
        Self {
            object,
            base,
            noise,
            clamp,
        }
    }

    fn sample(&self, rng: &mut StdRng, producer: &ProducerHandle, now: i64) -> bool {
        let raw = self.base + rng.gen_range(-self.noise..=self.noise);
        let value = (raw.clamp(self.clamp.0, self.clamp.1) * 10.0).round() / 10.0;
        producer.push_reading(self.object, 0, ipso::SENSOR_VALUE, value, Some(now))
    }
}
