//! Synthetic vehicle adapter standing in for the flight hardware
//!
//! Translates what the real driver would deliver through callbacks into the
//! pipeline's own terms: frames into the ingest queue, event markers onto
//! the telemetry channel, state into the `StateSource` registers, and the
//! completion flag once the scripted flight ends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info};

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::capture::IngestQueue;
use crate::telemetry::{
    Attitude, CameraInfo, Position, Speed, StateSnapshot, StateSource, TelemetryEvent,
};
use crate::utils::ShutdownFlag;
use crate::StreamConfig;

/// Meters of northbound travel per degree of latitude.
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Scripted flight profile.
#[derive(Debug, Clone)]
pub struct FlightPlan {
    /// Launch coordinates, degrees.
    pub origin: (f64, f64),
    pub cruise_speed_mps: f64,
    pub cruise_altitude_m: f64,
    pub duration: Duration,
    /// The camera register stays unset for this long after launch.
    pub camera_warmup: Duration,
}

impl Default for FlightPlan {
    fn default() -> Self {
        Self {
            origin: (38.7223, -9.1393),
            cruise_speed_mps: 4.0,
            cruise_altitude_m: 25.0,
            duration: Duration::from_secs(60),
            camera_warmup: Duration::from_secs(2),
        }
    }
}

/// Simulated vehicle state registers.
pub struct SimVehicle {
    state: Mutex<StateSnapshot>,
    plan: FlightPlan,
}

impl StateSource for SimVehicle {
    fn snapshot(&self) -> StateSnapshot {
        self.state.lock().unwrap().clone()
    }
}

impl SimVehicle {
    pub fn new(plan: FlightPlan) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(StateSnapshot::default()),
            plan,
        })
    }

    /// Advance the flight script to `elapsed` and refresh every register.
    pub fn advance(&self, elapsed: Duration) {
        let t = elapsed.as_secs_f64();
        let total = self.plan.duration.as_secs_f64();

        // Straight northbound track with a 5 s climb and descent ramp.
        let travelled = self.plan.cruise_speed_mps * t;
        let climb = (t / 5.0).min(1.0);
        let descent = ((total - t) / 5.0).clamp(0.0, 1.0);

        let position = Position {
            latitude: self.plan.origin.0 + travelled / METERS_PER_DEGREE,
            longitude: self.plan.origin.1,
            altitude: self.plan.cruise_altitude_m * climb.min(descent),
        };
        let attitude = Attitude {
            roll: 0.02 * (t * 1.3).sin(),
            pitch: -0.05 * climb + 0.05 * (1.0 - descent),
            yaw: 0.0,
        };
        let speed = Speed {
            x: self.plan.cruise_speed_mps * climb.min(descent),
            y: 0.0,
            z: 0.0,
        };
        let camera = (elapsed >= self.plan.camera_warmup).then(|| CameraInfo {
            zoom: "1.0".to_string(),
            active: true,
        });

        *self.state.lock().unwrap() = StateSnapshot {
            position: Some(position),
            attitude: Some(attitude),
            speed: Some(speed),
            camera,
        };
    }

    pub fn plan(&self) -> &FlightPlan {
        &self.plan
    }
}

/// Build one synthetic RGB24 frame: a slowly drifting gradient so relayed
/// output is visibly live.
fn test_frame(sequence: u64, width: u32, height: u32) -> Frame {
    let mut rgb = vec![0u8; (width * height * 3) as usize];
    let drift = (sequence * 2) as u32;
    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 3) as usize;
            rgb[idx] = ((x + drift) % 256) as u8;
            rgb[idx + 1] = (y % 256) as u8;
            rgb[idx + 2] = ((x + y + drift) % 256) as u8;
        }
    }
    Frame {
        data: Bytes::from(rgb),
        meta: Arc::new(FrameMetadata {
            sequence,
            width,
            height,
            stride: width,
            format: PixelFormat::Rgb24,
        }),
        timestamp: Instant::now(),
    }
}

/// Drive the scripted flight: frames at the stream rate, event markers at
/// sub-second cadence, completion flag at the end of the plan.
pub async fn drive(
    vehicle: Arc<SimVehicle>,
    queue: IngestQueue,
    events: flume::Sender<TelemetryEvent>,
    completion: Arc<AtomicBool>,
    shutdown: Arc<ShutdownFlag>,
    stream: StreamConfig,
) {
    const EVENT_CYCLE: [TelemetryEvent; 6] = [
        TelemetryEvent::FlyingState,
        TelemetryEvent::Position,
        TelemetryEvent::Attitude,
        TelemetryEvent::Altitude,
        TelemetryEvent::Speed,
        TelemetryEvent::Camera,
    ];

    info!("running pre-defined flight route...");
    let started = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_secs(1) / stream.fps);
    let mut sequence = 0u64;
    let mut last_format = PixelFormat::Rgb24;

    loop {
        ticker.tick().await;
        if shutdown.is_set() {
            debug!("flight driver stopping on shutdown");
            break;
        }
        let elapsed = started.elapsed();
        if elapsed >= vehicle.plan().duration {
            completion.store(true, Ordering::SeqCst);
            info!("flight routine complete");
            break;
        }

        vehicle.advance(elapsed);

        let frame = test_frame(sequence, stream.width, stream.height);
        // A format discontinuity from the driver voids the queued backlog.
        if frame.meta.format != last_format {
            queue.flush();
            last_format = frame.meta.format;
        }
        queue.enqueue(frame);

        // Roughly one event burst per three frames, like the real driver's
        // independent register notifications.
        if sequence % 3 == 0 {
            let event = EVENT_CYCLE[(sequence / 3) as usize % EVENT_CYCLE.len()];
            let _ = events.send(event);
        }
        sequence += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_empty_before_first_advance() {
        let vehicle = SimVehicle::new(FlightPlan::default());
        let snapshot = vehicle.snapshot();
        assert!(snapshot.position.is_none());
        assert!(snapshot.camera.is_none());
    }

    #[test]
    fn camera_register_appears_after_warmup() {
        let vehicle = SimVehicle::new(FlightPlan::default());
        vehicle.advance(Duration::from_secs(1));
        assert!(vehicle.snapshot().camera.is_none());
        vehicle.advance(Duration::from_secs(3));
        assert!(vehicle.snapshot().camera.is_some());
    }

    #[test]
    fn track_moves_north_of_origin() {
        let vehicle = SimVehicle::new(FlightPlan::default());
        vehicle.advance(Duration::from_secs(10));
        let early = vehicle.snapshot().position.unwrap();
        vehicle.advance(Duration::from_secs(30));
        let later = vehicle.snapshot().position.unwrap();
        assert!(later.latitude > early.latitude);
        assert_eq!(later.longitude, early.longitude);
    }

    #[tokio::test]
    async fn drive_runs_the_flight_to_completion() {
        let plan = FlightPlan {
            duration: Duration::from_millis(100),
            camera_warmup: Duration::from_millis(10),
            ..FlightPlan::default()
        };
        let vehicle = SimVehicle::new(plan);
        let queue = IngestQueue::new();
        let (event_tx, event_rx) = flume::unbounded();
        let completion = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(ShutdownFlag::new());
        let stream = StreamConfig {
            width: 32,
            height: 24,
            fps: 50,
        };

        drive(
            Arc::clone(&vehicle),
            queue.clone(),
            event_tx,
            Arc::clone(&completion),
            shutdown,
            stream,
        )
        .await;

        assert!(completion.load(Ordering::SeqCst));
        assert!(!queue.is_empty());
        assert!(event_rx.len() > 0);
    }
}
