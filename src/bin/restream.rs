//! hermes-restream: pull-based media endpoint over the relayed stream
//!
//! Subscribes to the frame channel, keeps only the newest frame, and serves
//! it through an RTSP endpoint that pulls on demand.

use std::sync::Arc;

use color_eyre::Result;
use tracing::info;

use hermes::relay::MqttRelay;
use hermes::restream::{rtsp::RtspRestream, PullFrameSource};
use hermes::utils::ShutdownFlag;
use hermes::Config;

fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("hermes=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("hermes restream launching...");

    let config = Config::load()?;
    hermes::CONFIG.store(Arc::new(config.clone()));

    let source = Arc::new(PullFrameSource::new(
        config.stream.width,
        config.stream.height,
        config.stream.fps,
    ));

    // Relay session; an unreachable broker is fatal here and only here.
    let (relay, mut listener) = MqttRelay::connect(&config.relay, "hermes-restream")?;
    {
        let source = Arc::clone(&source);
        listener.subscribe(
            &config.relay.frame_channel,
            Box::new(move |payload| source.ingest(payload)),
        )?;
    }

    let shutdown = Arc::new(ShutdownFlag::new());
    let listener_handle = {
        let shutdown = Arc::clone(&shutdown);
        std::thread::spawn(move || listener.run(&shutdown))
    };

    // Serves until the process is terminated.
    let endpoint = RtspRestream::new(&config.output, &config.stream, Arc::clone(&source))?;
    endpoint.run()?;

    shutdown.set();
    relay.disconnect()?;
    listener_handle.join().ok();
    Ok(())
}
