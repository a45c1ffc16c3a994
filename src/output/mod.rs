//! Annotated frame output: overlays, the frame sink, and the output video.

pub mod overlay;
pub mod sink;
pub mod video;

pub use overlay::{Overlay, TrackLabel};
pub use sink::FrameSink;
pub use video::VideoWriter;
