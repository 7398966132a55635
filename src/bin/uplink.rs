//! hermes-uplink: vehicle-side relay process
//!
//! Overlays live telemetry text onto captured frames and publishes the
//! encoded stream plus rate-limited telemetry samples over the relay.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tracing::{error, info};

use hermes::capture::IngestQueue;
use hermes::pipeline::{run_stream, OfflineFallback, OverlayCompositor};
use hermes::relay::{MqttRelay, RelayPublisher};
use hermes::telemetry::{sampler, TelemetryInbox, TelemetrySampler};
use hermes::utils::ShutdownFlag;
use hermes::vehicle::{self, FlightPlan, SimVehicle};
use hermes::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("hermes=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("hermes uplink launching...");

    let config = Config::load()?;
    hermes::CONFIG.store(Arc::new(config.clone()));

    // Relay session; an unreachable broker is fatal here and only here.
    let (relay, mut listener) = MqttRelay::connect(&config.relay, "hermes-uplink")?;
    let relay = Arc::new(relay);
    let publisher: Arc<dyn RelayPublisher> = Arc::clone(&relay) as Arc<dyn RelayPublisher>;

    // Telemetry text flows back to the compositor through the inbox.
    let inbox = Arc::new(TelemetryInbox::new(config.telemetry.inbox_capacity));
    {
        let inbox = Arc::clone(&inbox);
        listener.subscribe(
            &config.relay.telemetry_channel,
            Box::new(move |payload| {
                inbox.push(String::from_utf8_lossy(payload).into_owned());
            }),
        )?;
    }

    let shutdown = Arc::new(ShutdownFlag::new());
    let completion = Arc::new(AtomicBool::new(false));
    let queue = IngestQueue::new();
    let (event_tx, event_rx) = flume::unbounded();

    // Synthetic vehicle driver task
    let vehicle = SimVehicle::new(FlightPlan::default());
    let driver = tokio::spawn(vehicle::drive(
        Arc::clone(&vehicle),
        queue.clone(),
        event_tx,
        Arc::clone(&completion),
        Arc::clone(&shutdown),
        config.stream.clone(),
    ));

    // Sampler loop thread
    let sampler_handle = {
        let relay_cfg = config.relay.clone();
        let publisher = Arc::clone(&publisher);
        let shutdown = Arc::clone(&shutdown);
        let mut sampler = TelemetrySampler::new(config.telemetry.sampling_interval_secs);
        std::thread::spawn(move || {
            sampler::run(
                &event_rx,
                vehicle.as_ref(),
                publisher.as_ref(),
                &relay_cfg,
                &mut sampler,
                &shutdown,
            )
        })
    };

    // Relay listener thread (drives the broker session)
    let listener_handle = {
        let shutdown = Arc::clone(&shutdown);
        std::thread::spawn(move || listener.run(&shutdown))
    };

    // Compositor + offline fallback supervisor thread
    let stream_handle = {
        let mut compositor = OverlayCompositor::new(
            queue.clone(),
            Arc::clone(&inbox),
            Arc::clone(&publisher),
            config.relay.frame_channel.clone(),
            Duration::from_millis(config.ingest.poll_timeout_ms),
        );
        let mut fallback = OfflineFallback::new(
            Arc::clone(&publisher),
            config.relay.frame_channel.clone(),
            Duration::from_secs(config.fallback.cadence_secs),
            Arc::clone(&completion),
            config.stream.width,
            config.stream.height,
        )?;
        let inbox = Arc::clone(&inbox);
        let shutdown = Arc::clone(&shutdown);
        std::thread::spawn(move || run_stream(&mut compositor, &mut fallback, &inbox, &shutdown))
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    shutdown.set();

    // Disconnect wakes the listener so every loop can observe the flag.
    relay.disconnect()?;
    if driver.await.is_err() {
        error!("flight driver task panicked");
    }
    for handle in [sampler_handle, listener_handle, stream_handle] {
        if handle.join().is_err() {
            error!("worker thread panicked");
        }
    }

    info!("hermes uplink shut down");
    Ok(())
}
