pub mod source;

#[cfg(feature = "restream")]
pub mod rtsp;

pub use source::{PullFrameSource, PulledFrame};
