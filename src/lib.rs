pub mod capture;
pub mod pipeline;
pub mod relay;
pub mod restream;
pub mod telemetry;
pub mod utils;
pub mod vehicle;

use arc_swap::ArcSwap;
use color_eyre::Result;
use serde::{Deserialize, Serialize};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub stream: StreamConfig,
    pub ingest: IngestConfig,
    pub telemetry: TelemetryConfig,
    pub fallback: FallbackConfig,
    pub relay: RelayConfig,
    pub output: OutputConfig,
}

/// Stream geometry, negotiated once at startup and advertised to consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Dequeue poll window; bounds how fast the compositor observes shutdown
    pub poll_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Minimum spacing between telemetry publications, in seconds
    pub sampling_interval_secs: f64,
    pub inbox_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Placeholder publish cadence once the stream goes offline
    pub cadence_secs: u64,
}

/// MQTT broker endpoint and channel names
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub keepalive_secs: u64,
    pub connect_attempts: u32,
    pub frame_channel: String,
    pub telemetry_channel: String,
    pub camera_channel: String,
}

/// RTSP endpoint exposed by hermes-restream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub address: String,
    pub port: u16,
    pub path: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 100,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            sampling_interval_secs: 1.0,
            inbox_capacity: 50,
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self { cadence_secs: 5 }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 1883,
            keepalive_secs: 60,
            connect_attempts: 5,
            frame_channel: "stream/frames".into(),
            telemetry_channel: "stream/telemetry".into(),
            camera_channel: "stream/camera".into(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".into(),
            port: 31415,
            path: "/stream".into(),
        }
    }
}

impl Config {
    /// Load configuration from an optional `hermes.toml` plus environment
    /// overrides (e.g. `HERMES_RELAY__HOST`).
    pub fn load() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name("hermes").required(false))
            .add_source(config::Environment::with_prefix("HERMES").separator("__"))
            .build()?
            .try_deserialize::<Config>()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        use color_eyre::eyre::eyre;

        if self.telemetry.sampling_interval_secs <= 0.0 {
            return Err(eyre!("telemetry.sampling_interval_secs must be > 0"));
        }
        if self.stream.fps == 0 {
            return Err(eyre!("stream.fps must be > 0"));
        }
        if self.stream.width == 0 || self.stream.height == 0 {
            return Err(eyre!("stream geometry must be non-zero"));
        }
        Ok(())
    }
}
