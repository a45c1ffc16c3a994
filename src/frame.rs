//! Decoded frames as they travel from the reader thread to the main loop.

use image::RgbImage;
use std::sync::Arc;

/// One decoded RGB frame.
///
/// `index` is 1-based decode order. Pixels are shared so perception adapters
/// and OCR workers can read the frame without copying it.
#[derive(Clone, Debug)]
pub struct Frame {
    pub index: u64,
    pub image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self {
            index,
            image: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Message carried by the bounded frame queue.
#[derive(Debug)]
pub enum FrameMessage {
    Frame(Frame),
    /// End of stream. Always the last message a reader sends.
    End,
}
