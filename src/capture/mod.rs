pub mod frame;
pub mod queue;

pub use frame::Frame;
pub use frame::PixelFormat;
pub use queue::IngestQueue;
