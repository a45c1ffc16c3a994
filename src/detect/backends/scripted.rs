//! Scripted perception for tests and demos.
//!
//! A script is a JSON document keyed by frame index:
//!
//! ```json
//! {
//!   "vehicles": { "3": [{ "label": "car", "bbox": [100, 400, 180, 460] }] },
//!   "lights": [{ "from": 1, "to": 30, "state": "red" }],
//!   "plates": [{ "track_id": 1, "text": "30A12345", "confidence": 0.9 }]
//! }
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::detect::backend::{LightClassifier, PlateReader, PlateRequest, VehicleDetector};
use crate::detect::result::{Detection, LightState, PlateRead};
use crate::frame::Frame;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub vehicles: HashMap<u64, Vec<Detection>>,
    #[serde(default)]
    pub lights: Vec<LightSpan>,
    #[serde(default)]
    pub plates: Vec<PlateSpan>,
}

/// Light state held over an inclusive frame range.
#[derive(Debug, Clone, Deserialize)]
pub struct LightSpan {
    pub from: u64,
    pub to: u64,
    pub state: LightState,
}

/// Plate read returned for a track, optionally limited to a frame range.
#[derive(Debug, Clone, Deserialize)]
pub struct PlateSpan {
    pub track_id: u64,
    pub text: String,
    #[serde(default = "default_plate_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub from: Option<u64>,
    #[serde(default)]
    pub to: Option<u64>,
}

fn default_plate_confidence() -> f32 {
    0.9
}

impl Script {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read script {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid script {}", path.display()))
    }
}

/// Returns the scripted detections for each frame index; nothing otherwise.
#[derive(Debug, Clone, Default)]
pub struct ScriptedVehicles {
    frames: HashMap<u64, Vec<Detection>>,
}

impl ScriptedVehicles {
    pub fn new(frames: HashMap<u64, Vec<Detection>>) -> Self {
        Self { frames }
    }

    pub fn with_frame(mut self, index: u64, detections: Vec<Detection>) -> Self {
        self.frames.insert(index, detections);
        self
    }
}

impl VehicleDetector for ScriptedVehicles {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        Ok(self.frames.get(&frame.index).cloned().unwrap_or_default())
    }
}

/// Light readings from spans; later spans win where they overlap.
#[derive(Debug, Clone)]
pub struct ScriptedLight {
    spans: Vec<LightSpan>,
    default_state: LightState,
}

impl ScriptedLight {
    pub fn new(default_state: LightState) -> Self {
        Self {
            spans: Vec::new(),
            default_state,
        }
    }

    pub fn from_spans(spans: Vec<LightSpan>) -> Self {
        Self {
            spans,
            default_state: LightState::Unknown,
        }
    }

    pub fn with_span(mut self, from: u64, to: u64, state: LightState) -> Self {
        self.spans.push(LightSpan { from, to, state });
        self
    }

    fn state_at(&self, index: u64) -> LightState {
        self.spans
            .iter()
            .rev()
            .find(|span| span.from <= index && index <= span.to)
            .map(|span| span.state)
            .unwrap_or(self.default_state)
    }
}

impl LightClassifier for ScriptedLight {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn classify(&mut self, frame: &Frame) -> Result<LightState> {
        Ok(self.state_at(frame.index))
    }
}

/// Plate reads per track id; tracks without a span read as `unknown`.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPlates {
    spans: Vec<PlateSpan>,
}

impl ScriptedPlates {
    pub fn new(spans: Vec<PlateSpan>) -> Self {
        Self { spans }
    }

    pub fn with_read(mut self, track_id: u64, text: &str, confidence: f32) -> Self {
        self.spans.push(PlateSpan {
            track_id,
            text: text.to_string(),
            confidence,
            from: None,
            to: None,
        });
        self
    }
}

impl PlateReader for ScriptedPlates {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn read(&self, request: &PlateRequest) -> Result<PlateRead> {
        let hit = self.spans.iter().rev().find(|span| {
            span.track_id == request.track_id
                && span.from.map_or(true, |from| from <= request.frame_index)
                && span.to.map_or(true, |to| request.frame_index <= to)
        });
        Ok(hit
            .map(|span| PlateRead::new(span.text.clone(), span.confidence))
            .unwrap_or_else(PlateRead::unknown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BBox;
    use image::RgbImage;

    fn frame(index: u64) -> Frame {
        Frame::new(index, RgbImage::new(4, 4))
    }

    #[test]
    fn script_parses_all_sections() {
        let script: Script = serde_json::from_str(
            r#"{
                "vehicles": { "2": [{ "label": "car", "bbox": [0, 0, 10, 10] }] },
                "lights": [{ "from": 1, "to": 5, "state": "red" }],
                "plates": [{ "track_id": 1, "text": "30A12345" }]
            }"#,
        )
        .unwrap();

        let mut vehicles = ScriptedVehicles::new(script.vehicles);
        assert!(vehicles.detect(&frame(1)).unwrap().is_empty());
        assert_eq!(
            vehicles.detect(&frame(2)).unwrap()[0].bbox,
            BBox::new(0, 0, 10, 10)
        );

        let mut light = ScriptedLight::from_spans(script.lights);
        assert_eq!(light.classify(&frame(5)).unwrap(), LightState::Red);
        assert_eq!(light.classify(&frame(6)).unwrap(), LightState::Unknown);

        let plates = ScriptedPlates::new(script.plates);
        let request = PlateRequest {
            frame_index: 9,
            track_id: 1,
            crop: RgbImage::new(2, 2),
        };
        assert_eq!(plates.read(&request).unwrap().text, "30A12345");
    }

    #[test]
    fn later_light_spans_override() {
        let mut light = ScriptedLight::new(LightState::Green).with_span(10, 20, LightState::Red);
        assert_eq!(light.classify(&frame(9)).unwrap(), LightState::Green);
        assert_eq!(light.classify(&frame(15)).unwrap(), LightState::Red);
    }
}
