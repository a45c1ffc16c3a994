use anyhow::Result;
use image::RgbImage;

use crate::detect::result::{Detection, LightState, PlateRead};
use crate::frame::Frame;

/// Vehicle detector adapter.
///
/// Boxes are returned in original frame pixels. Implementations that run on a
/// resized copy must scale boxes back before returning.
pub trait VehicleDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Traffic-light classifier adapter. One raw reading per frame.
pub trait LightClassifier: Send {
    fn name(&self) -> &'static str;

    fn classify(&mut self, frame: &Frame) -> Result<LightState>;
}

/// Input for one plate read.
#[derive(Clone, Debug)]
pub struct PlateRequest {
    pub frame_index: u64,
    pub track_id: u64,
    /// Vehicle crop, already clamped to the frame.
    pub crop: RgbImage,
}

/// Plate-region detector + OCR adapter.
///
/// Shared by the OCR worker pool, so reads take `&self`.
pub trait PlateReader: Send + Sync {
    fn name(&self) -> &'static str;

    fn read(&self, request: &PlateRequest) -> Result<PlateRead>;
}
