//! Overlay compositor: frames in, annotated JPEG out on the frame channel

use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::{trace, warn};

use crate::capture::{Frame, IngestQueue, PixelFormat};
use crate::pipeline::overlay;
use crate::relay::RelayPublisher;
use crate::telemetry::TelemetryInbox;

/// Overlay text shown until the first telemetry message arrives.
pub const WAITING_TEXT: &str = "waiting telemetry data...";

/// Dequeues live frames, stamps the latest telemetry text onto them and
/// publishes the encoded result on the frame channel.
///
/// The inbox is only peeked, never waited on: when it is empty the last
/// known text is reused, so the compositor can never stall behind the
/// telemetry path.
pub struct OverlayCompositor {
    queue: IngestQueue,
    inbox: Arc<TelemetryInbox>,
    relay: Arc<dyn RelayPublisher>,
    frame_channel: String,
    poll_timeout: Duration,
    last_text: String,
}

impl OverlayCompositor {
    pub fn new(
        queue: IngestQueue,
        inbox: Arc<TelemetryInbox>,
        relay: Arc<dyn RelayPublisher>,
        frame_channel: String,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            inbox,
            relay,
            frame_channel,
            poll_timeout,
            last_text: WAITING_TEXT.to_string(),
        }
    }

    /// One poll iteration: returns `false` when the poll window elapsed
    /// without a frame (the caller's chance to observe shutdown).
    ///
    /// The dequeued frame is released when this function returns, whatever
    /// path it took - encode and publish failures included.
    pub fn process_next(&mut self) -> bool {
        let Some(frame) = self.queue.dequeue(self.poll_timeout) else {
            return false;
        };

        if let Some(text) = self.inbox.pop() {
            self.last_text = text;
        }

        if let Err(err) = self.compose(&frame) {
            warn!(sequence = frame.meta.sequence, "frame dropped: {err}");
        }
        true
    }

    fn compose(&self, frame: &Frame) -> Result<()> {
        let meta = &frame.meta;
        let expected = (meta.width * meta.height * 3) as usize;
        if meta.format != PixelFormat::Rgb24 || frame.data.len() != expected {
            return Err(eyre!(
                "unexpected frame layout: {:?} {}x{} ({} bytes)",
                meta.format,
                meta.width,
                meta.height,
                frame.data.len()
            ));
        }

        let mut rgb = frame.data.to_vec();
        overlay::draw_text(
            &mut rgb,
            meta.width,
            meta.height,
            &self.last_text,
            overlay::TEXT_ORIGIN,
            1,
            [0, 0, 0],
        );
        let jpeg = overlay::encode_jpeg(&rgb, meta.width, meta.height)?;
        self.relay.publish(&self.frame_channel, &jpeg)?;
        trace!(sequence = meta.sequence, "frame published");
        Ok(())
    }

    pub fn last_text(&self) -> &str {
        &self.last_text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::FrameMetadata;
    use crate::relay::testing::CollectingRelay;
    use bytes::Bytes;
    use std::time::Instant;

    const W: u32 = 64;
    const H: u32 = 48;

    fn rgb_frame(sequence: u64) -> Frame {
        Frame {
            data: Bytes::from(vec![128u8; (W * H * 3) as usize]),
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

    fn compositor(
        queue: &IngestQueue,
        inbox: &Arc<TelemetryInbox>,
        relay: &Arc<CollectingRelay>,
    ) -> OverlayCompositor {
        OverlayCompositor::new(
            queue.clone(),
            Arc::clone(inbox),
            Arc::clone(relay) as Arc<dyn RelayPublisher>,
            "stream/frames".into(),
            Duration::from_millis(10),
        )
    }

    #[test]
    fn publishes_jpeg_for_each_frame() {
        let queue = IngestQueue::new();
        let inbox = Arc::new(TelemetryInbox::new(8));
        let relay = Arc::new(CollectingRelay::default());
        let mut compositor = compositor(&queue, &inbox, &relay);

        queue.enqueue(rgb_frame(1));
        assert!(compositor.process_next());

        let published = relay.take();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "stream/frames");
        assert_eq!(&published[0].1[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn empty_poll_window_is_not_an_error() {
        let queue = IngestQueue::new();
        let inbox = Arc::new(TelemetryInbox::new(8));
        let relay = Arc::new(CollectingRelay::default());
        let mut compositor = compositor(&queue, &inbox, &relay);

        assert!(!compositor.process_next());
        assert!(relay.take().is_empty());
    }

    #[test]
    fn caches_last_text_when_inbox_runs_dry() {
        let queue = IngestQueue::new();
        let inbox = Arc::new(TelemetryInbox::new(8));
        let relay = Arc::new(CollectingRelay::default());
        let mut compositor = compositor(&queue, &inbox, &relay);

        assert_eq!(compositor.last_text(), WAITING_TEXT);

        inbox.push("alt: 12.5m".into());
        queue.enqueue(rgb_frame(1));
        assert!(compositor.process_next());
        assert_eq!(compositor.last_text(), "alt: 12.5m");

        // Inbox now empty: the cached text survives the next frame.
        queue.enqueue(rgb_frame(2));
        assert!(compositor.process_next());
        assert_eq!(compositor.last_text(), "alt: 12.5m");
        assert_eq!(relay.take().len(), 2);
    }

    #[test]
    fn malformed_frame_is_absorbed_and_released() {
        let queue = IngestQueue::new();
        let inbox = Arc::new(TelemetryInbox::new(8));
        let relay = Arc::new(CollectingRelay::default());
        let mut compositor = compositor(&queue, &inbox, &relay);

        let bad = Frame {
            data: Bytes::from(vec![0u8; 10]),
            meta: Arc::new(FrameMetadata {
                sequence: 7,
                width: W,
                height: H,
                stride: W,
                format: PixelFormat::Rgb24,
            }),
            timestamp: Instant::now(),
        };
        let meta = Arc::clone(&bad.meta);
        queue.enqueue(bad);

        // Handled (dequeued), nothing published, buffer released.
        assert!(compositor.process_next());
        assert!(relay.take().is_empty());
        assert_eq!(Arc::strong_count(&meta), 1);
    }
}
