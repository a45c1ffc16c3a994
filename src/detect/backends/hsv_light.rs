use anyhow::Result;
use image::{Rgb, RgbImage};

use crate::detect::backend::LightClassifier;
use crate::detect::result::LightState;
use crate::frame::Frame;

/// Minimum pixel count for a color to count as lit.
const MIN_LIT_PIXELS: u32 = 100;

/// Inclusive HSV range using 8-bit conventions (H in 0..=180, S/V in 0..=255).
#[derive(Clone, Copy, Debug)]
struct HsvRange {
    lo: [u8; 3],
    hi: [u8; 3],
}

impl HsvRange {
    const fn new(lo: [u8; 3], hi: [u8; 3]) -> Self {
        Self { lo, hi }
    }

    fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|i| self.lo[i] <= hsv[i] && hsv[i] <= self.hi[i])
    }
}

const RED_LOW: HsvRange = HsvRange::new([0, 80, 150], [10, 255, 255]);
const RED_HIGH: HsvRange = HsvRange::new([160, 80, 150], [180, 255, 255]);
const YELLOW: HsvRange = HsvRange::new([15, 100, 150], [35, 255, 255]);
const GREEN: HsvRange = HsvRange::new([40, 80, 120], [85, 255, 255]);

/// Color-threshold light classifier.
///
/// Looks at the top-right corner of the frame (25% of the width, 30% of the
/// height), where the signal head sits in the supported camera layout, and
/// counts pixels in the red, yellow and green HSV bands. The band with the
/// most pixels wins; fewer than 100 pixels reads as `unknown`.
#[derive(Debug, Default)]
pub struct HsvLightClassifier;

impl HsvLightClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify_image(&self, image: &RgbImage) -> LightState {
        let (w, h) = image.dimensions();
        let x0 = (w as f32 * 0.75) as u32;
        let y1 = (h as f32 * 0.3) as u32;

        let (mut red, mut yellow, mut green) = (0u32, 0u32, 0u32);
        for y in 0..y1 {
            for x in x0..w {
                let hsv = rgb_to_hsv(image.get_pixel(x, y));
                if RED_LOW.contains(hsv) || RED_HIGH.contains(hsv) {
                    red += 1;
                }
                if YELLOW.contains(hsv) {
                    yellow += 1;
                }
                if GREEN.contains(hsv) {
                    green += 1;
                }
            }
        }

        let mut best = (LightState::Unknown, 0u32);
        for (state, count) in [
            (LightState::Red, red),
            (LightState::Yellow, yellow),
            (LightState::Green, green),
        ] {
            if count > best.1 {
                best = (state, count);
            }
        }
        if best.1 < MIN_LIT_PIXELS {
            LightState::Unknown
        } else {
            best.0
        }
    }
}

impl LightClassifier for HsvLightClassifier {
    fn name(&self) -> &'static str {
        "hsv"
    }

    fn classify(&mut self, frame: &Frame) -> Result<LightState> {
        Ok(self.classify_image(&frame.image))
    }
}

/// RGB to 8-bit HSV (hue halved into 0..=180).
fn rgb_to_hsv(pixel: &Rgb<u8>) -> [u8; 3] {
    let [r, g, b] = pixel.0.map(f32::from);
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = v - min;
    let s = if v > 0.0 { diff / v * 255.0 } else { 0.0 };
    let mut hue = if diff == 0.0 {
        0.0
    } else if v == r {
        60.0 * (g - b) / diff
    } else if v == g {
        120.0 + 60.0 * (b - r) / diff
    } else {
        240.0 + 60.0 * (r - g) / diff
    };
    if hue < 0.0 {
        hue += 360.0;
    }
    [
        (hue / 2.0).round() as u8,
        s.round() as u8,
        v.round() as u8,
    ]
}
