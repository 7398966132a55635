pub mod inbox;
pub mod sampler;

pub use inbox::TelemetryInbox;
pub use sampler::TelemetrySampler;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Geographic position, degrees and meters
#[derive(Debug, Clone, Copy)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// Attitude angles in radians
#[derive(Debug, Clone, Copy, Default)]
pub struct Attitude {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

/// Velocity components in m/s
#[derive(Debug, Clone, Copy, Default)]
pub struct Speed {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Camera subsystem state; `None` at the source until the camera reports.
#[derive(Debug, Clone, Default)]
pub struct CameraInfo {
    pub zoom: String,
    pub active: bool,
}

/// Latest full vehicle state, re-read on every event notification.
///
/// Any single event may be only partially populated, so the sampler never
/// trusts the event payload - it pulls the whole snapshot instead.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    pub position: Option<Position>,
    pub attitude: Option<Attitude>,
    pub speed: Option<Speed>,
    pub camera: Option<CameraInfo>,
}

/// Boundary to the vehicle driver's state registers.
pub trait StateSource: Send + Sync {
    fn snapshot(&self) -> StateSnapshot;
}

/// Event notification markers forwarded by the vehicle adapter.
///
/// The variant only records which register changed; the sampler re-reads
/// the full snapshot regardless, so handlers stay payload-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryEvent {
    FlyingState,
    Position,
    Attitude,
    Altitude,
    Speed,
    Camera,
}

/// One publication on the telemetry channel. Field order is the wire order.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySample {
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    #[serde(rename = "speedX")]
    pub speed_x: f64,
    #[serde(rename = "speedY")]
    pub speed_y: f64,
    #[serde(rename = "speedZ")]
    pub speed_z: f64,
    pub camera_status: bool,
}

/// Companion publication on the camera channel, timestamp first.
#[derive(Debug, Clone, Serialize)]
pub struct CameraSnapshot {
    pub time: DateTime<Utc>,
    pub zoom: String,
    pub active: bool,
}
