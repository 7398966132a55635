//! Offline fallback: placeholder output once the flight completes

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use color_eyre::Result;
use tracing::{info, warn};

use crate::pipeline::{overlay, OverlayCompositor};
use crate::relay::RelayPublisher;
use crate::telemetry::TelemetryInbox;
use crate::utils::ShutdownFlag;

/// Output source of the stream pipeline. Live until the completion signal
/// fires; Offline is terminal for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Live,
    Offline,
}

/// One-way switch from live compositing to a fixed placeholder image.
pub struct OfflineFallback {
    relay: Arc<dyn RelayPublisher>,
    frame_channel: String,
    cadence: Duration,
    completion: Arc<AtomicBool>,
    placeholder: Bytes,
    state: StreamState,
}

impl OfflineFallback {
    pub fn new(
        relay: Arc<dyn RelayPublisher>,
        frame_channel: String,
        cadence: Duration,
        completion: Arc<AtomicBool>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        // Pre-encode the placeholder once; it never changes.
        let rgb = overlay::placeholder_rgb(width, height);
        let placeholder = Bytes::from(overlay::encode_jpeg(&rgb, width, height)?);
        Ok(Self {
            relay,
            frame_channel,
            cadence,
            completion,
            placeholder,
            state: StreamState::Live,
        })
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    /// Has the externally owned completion signal fired?
    pub fn completion_signalled(&self) -> bool {
        self.completion.load(Ordering::SeqCst)
    }

    /// Transition Live -> Offline. Fires at most once; stale telemetry text
    /// is discarded here so it cannot replay onto the placeholder image.
    pub fn enter_offline(&mut self, inbox: &TelemetryInbox) {
        if self.state == StreamState::Offline {
            return;
        }
        self.state = StreamState::Offline;
        let cleared = inbox.clear();
        info!("flight image offline, switching to placeholder output ({cleared} stale messages dropped)");
    }

    /// Publish the placeholder frame; failures are absorbed locally.
    pub fn emit_placeholder(&self) {
        if let Err(err) = self.relay.publish(&self.frame_channel, &self.placeholder) {
            warn!("placeholder publish failed: {err}");
        }
    }

    pub fn placeholder(&self) -> &Bytes {
        &self.placeholder
    }
}

/// Stream supervisor loop: live compositing until the completion signal,
/// then placeholder output on the fallback cadence, until shutdown.
///
/// Shutdown observation latency is bounded by the compositor's poll window
/// while live and by the fallback cadence while offline.
pub fn run_stream(
    compositor: &mut OverlayCompositor,
    fallback: &mut OfflineFallback,
    inbox: &TelemetryInbox,
    shutdown: &ShutdownFlag,
) {
    while !shutdown.is_set() {
        if fallback.state() == StreamState::Live && !fallback.completion_signalled() {
            compositor.process_next();
        } else {
            fallback.enter_offline(inbox);
            fallback.emit_placeholder();
            std::thread::sleep(fallback.cadence());
        }
    }
    info!("stream supervisor exiting ({:?})", fallback.state());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
    use crate::capture::IngestQueue;
    use crate::relay::testing::CollectingRelay;
    use std::time::Instant;

    const W: u32 = 64;
    const H: u32 = 48;

    fn live_frame(sequence: u64) -> Frame {
        Frame {
            data: Bytes::from(vec![200u8; (W * H * 3) as usize]),
            meta: Arc::new(FrameMetadata {
                sequence,
                width: W,
                height: H,
                stride: W,
                format: PixelFormat::Rgb24,
            }),
            timestamp: Instant::now(),
        }
    }

    fn fallback(
        relay: &Arc<CollectingRelay>,
        completion: &Arc<AtomicBool>,
    ) -> OfflineFallback {
        OfflineFallback::new(
            Arc::clone(relay) as Arc<dyn RelayPublisher>,
            "stream/frames".into(),
            Duration::from_millis(5),
            Arc::clone(completion),
            W,
            H,
        )
        .unwrap()
    }

    #[test]
    fn transition_is_one_way_and_clears_inbox_once() {
        let relay = Arc::new(CollectingRelay::default());
        let completion = Arc::new(AtomicBool::new(true));
        let mut fallback = fallback(&relay, &completion);
        let inbox = TelemetryInbox::new(8);
        inbox.push("stale".into());

        assert_eq!(fallback.state(), StreamState::Live);
        fallback.enter_offline(&inbox);
        assert_eq!(fallback.state(), StreamState::Offline);
        assert!(inbox.is_empty());

        // Text arriving after the transition is not cleared again.
        inbox.push("late".into());
        fallback.enter_offline(&inbox);
        assert_eq!(inbox.len(), 1);
    }

    #[test]
    fn offline_never_emits_live_frames_again() {
        let queue = IngestQueue::new();
        let inbox = Arc::new(TelemetryInbox::new(8));
        let relay = Arc::new(CollectingRelay::default());
        let completion = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(ShutdownFlag::new());

        let mut compositor = OverlayCompositor::new(
            queue.clone(),
            Arc::clone(&inbox),
            Arc::clone(&relay) as Arc<dyn RelayPublisher>,
            "stream/frames".into(),
            Duration::from_millis(5),
        );
        let mut fb = fallback(&relay, &completion);
        let placeholder = fb.placeholder().clone();

        // Live frames keep arriving even though the flight is complete.
        for seq in 0..4 {
            queue.enqueue(live_frame(seq));
        }

        let worker = {
            let shutdown = Arc::clone(&shutdown);
            let inbox = Arc::clone(&inbox);
            std::thread::spawn(move || run_stream(&mut compositor, &mut fb, &inbox, &shutdown))
        };
        std::thread::sleep(Duration::from_millis(40));
        shutdown.set();
        worker.join().unwrap();

        let published = relay.take();
        assert!(!published.is_empty());
        for (channel, payload) in &published {
            assert_eq!(channel, "stream/frames");
            assert_eq!(payload.as_slice(), placeholder.as_ref());
        }
        // The ignored live frames were never consumed by the stream.
        assert_eq!(queue.len(), 4);
    }
}
