use anyhow::{anyhow, Result};

use crate::detect::backend::{PlateReader, PlateRequest};
use crate::detect::result::PlateRead;

/// Returns the same text for every crop. Useful for single-vehicle clips.
#[derive(Debug, Clone)]
pub struct FixedPlateReader {
    read: PlateRead,
}

impl FixedPlateReader {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            read: PlateRead::new(text, confidence),
        }
    }
}

impl PlateReader for FixedPlateReader {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn read(&self, request: &PlateRequest) -> Result<PlateRead> {
        if request.crop.width() == 0 || request.crop.height() == 0 {
            return Err(anyhow!("empty crop for track {}", request.track_id));
        }
        Ok(self.read.clone())
    }
}

/// No OCR available: every read is `unknown`.
#[derive(Debug, Clone, Default)]
pub struct NullPlateReader;

impl PlateReader for NullPlateReader {
    fn name(&self) -> &'static str {
        "none"
    }

    fn read(&self, _request: &PlateRequest) -> Result<PlateRead> {
        Ok(PlateRead::unknown())
    }
}
