//! Pull-driven frame supplier fed by the relay subscription

use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use color_eyre::{eyre::eyre, Result};
use tracing::warn;

use crate::pipeline::overlay;

/// One frame handed to the media sink, stamped for presentation.
pub struct PulledFrame {
    pub data: Arc<Vec<u8>>,
    pub pts: Duration,
    pub dts: Duration,
    pub duration: Duration,
}

/// Single-slot, last-value-wins cache between the relay callback and the
/// media server's pull context.
///
/// Incoming messages overwrite the slot (never queue), so pulls duplicate
/// the cached frame when they outpace publishes and frames are dropped
/// when publishes outpace pulls. Presentation timestamps are derived from
/// the pull counter alone and therefore strictly monotonic regardless of
/// arrival jitter.
pub struct PullFrameSource {
    latest: ArcSwapOption<Vec<u8>>,
    placeholder: Arc<Vec<u8>>,
    sequence: Mutex<u64>,
    frame_duration: Duration,
    width: u32,
    height: u32,
}

impl PullFrameSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            latest: ArcSwapOption::empty(),
            placeholder: Arc::new(overlay::placeholder_rgb(width, height)),
            sequence: Mutex::new(0),
            frame_duration: Duration::from_secs(1) / fps,
            width,
            height,
        }
    }

    /// Relay subscription callback: decode and swap in the newest frame.
    ///
    /// Malformed or wrong-geometry payloads are discarded with a warning;
    /// the last good frame stays in the slot.
    pub fn ingest(&self, payload: &[u8]) {
        match self.decode_rgb(payload) {
            Ok(rgb) => self.latest.store(Some(Arc::new(rgb))),
            Err(err) => warn!("malformed relayed frame discarded: {err}"),
        }
    }

    /// Serve one pull request: the cached frame, or the placeholder while
    /// nothing has arrived yet, stamped at `sequence x frame_duration`.
    pub fn pull(&self) -> PulledFrame {
        let data = self
            .latest
            .load_full()
            .unwrap_or_else(|| Arc::clone(&self.placeholder));

        let mut sequence = self.sequence.lock().unwrap();
        let pts = Duration::from_nanos(
            (self.frame_duration.as_nanos() as u64).saturating_mul(*sequence),
        );
        *sequence += 1;

        PulledFrame {
            data,
            pts,
            dts: pts,
            duration: self.frame_duration,
        }
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    pub fn has_live_frame(&self) -> bool {
        self.latest.load().is_some()
    }

    fn decode_rgb(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = jpeg_decoder::Decoder::new(payload);
        let pixels = decoder.decode()?;
        let info = decoder
            .info()
            .ok_or_else(|| eyre!("decoded image carries no header info"))?;
        if u32::from(info.width) != self.width || u32::from(info.height) != self.height {
            return Err(eyre!(
                "geometry mismatch: got {}x{}, stream is {}x{}",
                info.width,
                info.height,
                self.width,
                self.height
            ));
        }
        if info.pixel_format != jpeg_decoder::PixelFormat::RGB24 {
            return Err(eyre!("unsupported pixel format {:?}", info.pixel_format));
        }
        Ok(pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: u32 = 64;
    const H: u32 = 48;
    const FPS: u32 = 30;

    fn live_jpeg(shade: u8) -> Vec<u8> {
        let rgb = vec![shade; (W * H * 3) as usize];
        overlay::encode_jpeg(&rgb, W, H).unwrap()
    }

    #[test]
    fn placeholder_served_until_first_message() {
        let source = PullFrameSource::new(W, H, FPS);
        assert!(!source.has_live_frame());

        let pulled = source.pull();
        assert!(Arc::ptr_eq(&pulled.data, &source.placeholder));
    }

    #[test]
    fn cached_frame_duplicated_until_overwritten() {
        let source = PullFrameSource::new(W, H, FPS);
        source.ingest(&live_jpeg(100));
        assert!(source.has_live_frame());

        let first = source.pull();
        let second = source.pull();
        assert!(Arc::ptr_eq(&first.data, &second.data));

        source.ingest(&live_jpeg(200));
        let third = source.pull();
        assert!(!Arc::ptr_eq(&second.data, &third.data));
    }

    #[test]
    fn timestamps_increase_by_exactly_one_frame_duration() {
        let source = PullFrameSource::new(W, H, FPS);
        let step = source.frame_duration();
        for n in 0..10u64 {
            let pulled = source.pull();
            assert_eq!(pulled.pts, Duration::from_nanos(step.as_nanos() as u64 * n));
            assert_eq!(pulled.dts, pulled.pts);
            assert_eq!(pulled.duration, step);
        }
    }

    #[test]
    fn malformed_payload_keeps_last_good_frame() {
        let source = PullFrameSource::new(W, H, FPS);
        source.ingest(&live_jpeg(100));
        let before = source.pull();

        source.ingest(b"definitely not a jpeg");
        let after = source.pull();
        assert!(Arc::ptr_eq(&before.data, &after.data));
    }

    #[test]
    fn wrong_geometry_rejected() {
        let source = PullFrameSource::new(W, H, FPS);
        let rgb = vec![10u8; (32 * 32 * 3) as usize];
        let small = overlay::encode_jpeg(&rgb, 32, 32).unwrap();

        source.ingest(&small);
        assert!(!source.has_live_frame());
    }
}
