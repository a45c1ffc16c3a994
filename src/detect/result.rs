use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Axis-aligned box in original frame pixels, `(x1, y1)` top-left and
/// `(x2, y2)` bottom-right.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.x1 + self.x2) as f32 / 2.0,
            (self.y1 + self.y2) as f32 / 2.0,
        )
    }

    /// Clamps the box to a `width` x `height` frame. `None` when nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<BBox> {
        let w = width as i32;
        let h = height as i32;
        let clamped = BBox {
            x1: self.x1.clamp(0, w),
            y1: self.y1.clamp(0, h),
            x2: self.x2.clamp(0, w),
            y2: self.y2.clamp(0, h),
        };
        (clamped.width() > 0 && clamped.height() > 0).then_some(clamped)
    }
}

impl From<[i32; 4]> for BBox {
    fn from(v: [i32; 4]) -> Self {
        BBox::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [i32; 4] {
    fn from(b: BBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One vehicle observation from the vehicle detector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Vehicle category, e.g. `car` or `motorcycle`.
    pub label: String,
    pub bbox: BBox,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

impl Detection {
    pub fn new(label: impl Into<String>, bbox: BBox, confidence: f32) -> Self {
        Self {
            label: label.into(),
            bbox,
            confidence,
        }
    }
}

/// Traffic signal state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightState {
    Red,
    Yellow,
    Green,
    #[default]
    Unknown,
}

impl LightState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LightState::Red => "red",
            LightState::Yellow => "yellow",
            LightState::Green => "green",
            LightState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for LightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LightState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "red" => Ok(LightState::Red),
            "yellow" => Ok(LightState::Yellow),
            "green" => Ok(LightState::Green),
            "unknown" => Ok(LightState::Unknown),
            other => Err(anyhow!("unknown light state '{}'", other)),
        }
    }
}

/// Sentinel plate text for a missing or failed read.
pub const UNKNOWN_PLATE: &str = "unknown";

/// One plate read: raw OCR text and its confidence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlateRead {
    pub text: String,
    pub confidence: f32,
}

impl PlateRead {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }

    /// The `unknown`/0.0 read substituted for failures and timeouts.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_PLATE, 0.0)
    }

    /// True when this read carries no usable text.
    pub fn is_unknown(&self) -> bool {
        let text = self.text.trim();
        text.is_empty() || text.eq_ignore_ascii_case(UNKNOWN_PLATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_clamps_and_rejects_empty() {
        let b = BBox::new(-10, 20, 50, 500);
        assert_eq!(b.clamp_to(40, 100), Some(BBox::new(0, 20, 40, 100)));
        assert_eq!(BBox::new(200, 0, 300, 10).clamp_to(100, 100), None);
    }

    #[test]
    fn detection_parses_array_bbox() {
        let det: Detection =
            serde_json::from_str(r#"{"label":"car","bbox":[1,2,30,40]}"#).unwrap();
        assert_eq!(det.bbox, BBox::new(1, 2, 30, 40));
        assert_eq!(det.confidence, 1.0);
    }

    #[test]
    fn unknown_plate_reads() {
        assert!(PlateRead::unknown().is_unknown());
        assert!(PlateRead::new("  ", 0.7).is_unknown());
        assert!(!PlateRead::new("30A12345", 0.7).is_unknown());
    }
}
