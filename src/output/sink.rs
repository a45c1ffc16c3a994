use image::RgbImage;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use super::video::VideoWriter;
use crate::detect::panic_message;

/// Receives every annotated, processed frame.
///
/// The callback runs on the pipeline thread. A panic inside it is caught
/// and logged; the next frame is delivered as usual.
pub struct FrameSink<'a> {
    callback: Option<Box<dyn FnMut(&RgbImage) + 'a>>,
    video: Option<VideoWriter>,
    delivered: u64,
    callback_panics: u64,
}

impl<'a> FrameSink<'a> {
    pub fn new() -> Self {
        Self {
            callback: None,
            video: None,
            delivered: 0,
            callback_panics: 0,
        }
    }

    pub fn with_callback(mut self, callback: impl FnMut(&RgbImage) + 'a) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn with_video(mut self, video: VideoWriter) -> Self {
        self.video = Some(video);
        self
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn callback_panics(&self) -> u64 {
        self.callback_panics
    }

    pub fn deliver(&mut self, image: &RgbImage) {
        self.delivered += 1;
        if let Some(callback) = self.callback.as_mut() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(image))) {
                self.callback_panics += 1;
                log::error!(
                    "frame callback panicked on frame {}: {}",
                    self.delivered,
                    panic_message(payload.as_ref())
                );
            }
        }
        if let Some(video) = self.video.as_mut() {
            if let Err(e) = video.write_frame(image) {
                log::error!("dropping output video: {:#}", e);
                self.video = None;
            }
        }
    }

    /// Closes the output video and returns where it ended up.
    pub fn finish(self) -> Option<PathBuf> {
        self.video.and_then(VideoWriter::finish)
    }
}

impl Default for FrameSink<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_panics_are_contained() {
        let mut seen = Vec::new();
        {
            let mut sink = FrameSink::new().with_callback(|image: &RgbImage| {
                if image.width() == 2 {
                    panic!("viewer crashed");
                }
                seen.push(image.width());
            });
            sink.deliver(&RgbImage::new(1, 1));
            sink.deliver(&RgbImage::new(2, 2));
            sink.deliver(&RgbImage::new(3, 3));
            assert_eq!(sink.delivered(), 3);
            assert_eq!(sink.callback_panics(), 1);
            assert!(sink.finish().is_none());
        }
        assert_eq!(seen, vec![1, 3]);
    }
}
