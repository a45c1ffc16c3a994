//! Frame ingestion.
//!
//! - `file`: local video files (FFmpeg, feature: video-ffmpeg) and the
//!   `stub://` synthetic source
//! - `reader`: the producer thread feeding the bounded frame queue
//!
//! The reader owns the source for its whole life and releases it before
//! sending the end-of-stream sentinel.

pub mod file;
#[cfg(feature = "video-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod reader;

pub use file::{video_key, video_stem, FileSource, VideoInfo};
pub use reader::{spawn_reader, ReaderHandle, ReaderStats};
