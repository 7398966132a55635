pub mod compositor;
pub mod offline;
pub mod overlay;

pub use compositor::OverlayCompositor;
pub use offline::{run_stream, OfflineFallback, StreamState};
