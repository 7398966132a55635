//! Rate-limited telemetry sampling and publication

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use crate::relay::RelayPublisher;
use crate::telemetry::{
    CameraSnapshot, StateSnapshot, StateSource, TelemetryEvent, TelemetrySample,
};
use crate::utils::{round4, ShutdownFlag};
use crate::RelayConfig;

/// Great-circle distance between two lat/long points, in meters.
pub fn haversine_m(lat0: f64, long0: f64, lat: f64, long: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;

    let d_lat = lat.to_radians() - lat0.to_radians();
    let d_long = long.to_radians() - long0.to_radians();
    let root = (d_lat / 2.0).sin().powi(2)
        + lat0.to_radians().cos() * lat.to_radians().cos() * (d_long / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * root.sqrt().asin() * 1000.0
}

/// The pair of messages produced by one accepted sample.
#[derive(Debug, Clone)]
pub struct Publication {
    pub sample: TelemetrySample,
    pub camera: CameraSnapshot,
    /// Great-circle distance from the first observed position, meters.
    pub distance_m: f64,
}

/// Gates telemetry publication to at most one sample per interval.
///
/// `register` is pure with respect to the publication clock: the last-publish
/// timestamp only advances through `commit`, which callers invoke after the
/// messages were actually handed to the relay.
pub struct TelemetrySampler {
    interval_ms: i64,
    origin: Option<(f64, f64)>,
    last_publish: Option<DateTime<Utc>>,
}

impl TelemetrySampler {
    pub fn new(sampling_interval_secs: f64) -> Self {
        Self {
            interval_ms: (sampling_interval_secs * 1000.0) as i64,
            origin: None,
            last_publish: None,
        }
    }

    /// Evaluate one event notification against the latest full state.
    ///
    /// Returns the messages to publish, or `None` when the sample is
    /// suppressed: same wall-clock second as the last publication, interval
    /// not yet elapsed, or no position registered so far.
    pub fn register(&mut self, now: DateTime<Utc>, state: &StateSnapshot) -> Option<Publication> {
        if let Some(last) = self.last_publish {
            // Coalesce samples landing in the same wall-clock second.
            if now.timestamp() == last.timestamp() {
                return None;
            }
            if (now - last).num_milliseconds() < self.interval_ms {
                return None;
            }
        }

        let Some(position) = state.position else {
            trace!("no position registered yet, skipping sample");
            return None;
        };
        let attitude = state.attitude.unwrap_or_default();
        let speed = state.speed.unwrap_or_default();
        // The camera register may not have been initialized by the driver.
        let camera = state.camera.clone().unwrap_or_default();

        let origin = *self
            .origin
            .get_or_insert((position.latitude, position.longitude));
        let distance_m = haversine_m(origin.0, origin.1, position.latitude, position.longitude);

        let sample = TelemetrySample {
            time: now,
            latitude: position.latitude,
            longitude: position.longitude,
            altitude: position.altitude,
            roll: round4(attitude.roll),
            pitch: round4(attitude.pitch),
            yaw: round4(attitude.yaw),
            speed_x: round4(speed.x),
            speed_y: round4(speed.y),
            speed_z: round4(speed.z),
            camera_status: camera.active,
        };
        let camera = CameraSnapshot {
            time: now,
            zoom: camera.zoom,
            active: camera.active,
        };

        Some(Publication {
            sample,
            camera,
            distance_m,
        })
    }

    /// Advance the publication clock after a successful publish.
    pub fn commit(&mut self, published_at: DateTime<Utc>) {
        self.last_publish = Some(published_at);
    }
}

/// Sampler event loop: drains the adapter's event channel until shutdown.
pub fn run(
    events: &flume::Receiver<TelemetryEvent>,
    source: &dyn StateSource,
    relay: &dyn RelayPublisher,
    cfg: &RelayConfig,
    sampler: &mut TelemetrySampler,
    shutdown: &ShutdownFlag,
) {
    while !shutdown.is_set() {
        let event = match events.recv_timeout(Duration::from_millis(250)) {
            Ok(event) => event,
            Err(flume::RecvTimeoutError::Timeout) => continue,
            Err(flume::RecvTimeoutError::Disconnected) => break,
        };

        let now = Utc::now();
        let Some(publication) = sampler.register(now, &source.snapshot()) else {
            continue;
        };
        trace!(?event, "publishing telemetry sample");

        match publish(relay, cfg, &publication) {
            Ok(()) => {
                sampler.commit(now);
                debug!(distance_m = publication.distance_m, "telemetry published");
            }
            Err(err) => warn!("failed to publish telemetry: {err}"),
        }
    }
    debug!("sampler loop exiting");
}

fn publish(
    relay: &dyn RelayPublisher,
    cfg: &RelayConfig,
    publication: &Publication,
) -> color_eyre::Result<()> {
    let sample = serde_json::to_vec(&publication.sample)?;
    let camera = serde_json::to_vec(&publication.camera)?;
    relay.publish(&cfg.telemetry_channel, &sample)?;
    relay.publish(&cfg.camera_channel, &camera)?;
    Ok(())
}
