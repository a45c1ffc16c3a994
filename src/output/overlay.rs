//! Frame annotation: zone, stop line, vehicle boxes and the light banner.
//!
//! Shapes are always drawn. Text needs a font; without `font_path` labels
//! are skipped.

use ab_glyph::{FontArc, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut,
};
use imageproc::rect::Rect;
use std::path::Path;

use crate::detect::{BBox, LightState};
use crate::zones::ZoneConfig;

const RED: Rgb<u8> = Rgb([255, 0, 0]);
const GREEN: Rgb<u8> = Rgb([0, 200, 0]);
const YELLOW: Rgb<u8> = Rgb([255, 220, 0]);
const GRAY: Rgb<u8> = Rgb([128, 128, 128]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const ZONE: Rgb<u8> = Rgb([255, 200, 0]);

const LABEL_SCALE: f32 = 18.0;
const BANNER_SCALE: f32 = 24.0;
const BANNER_WIDTH: u32 = 180;
const BANNER_HEIGHT: u32 = 32;

/// Vehicle box as drawn on one frame.
#[derive(Clone, Debug)]
pub struct TrackLabel {
    pub bbox: BBox,
    /// `"<label> | <plate>"`
    pub text: String,
    pub violated: bool,
}

#[derive(Clone, Default)]
pub struct Overlay {
    font: Option<FontArc>,
}

impl Overlay {
    pub fn load(font_path: Option<&Path>) -> Result<Self> {
        let Some(path) = font_path else {
            return Ok(Self::default());
        };
        let bytes =
            std::fs::read(path).with_context(|| format!("read font {}", path.display()))?;
        let font = FontArc::try_from_vec(bytes)
            .with_context(|| format!("parse font {}", path.display()))?;
        Ok(Self { font: Some(font) })
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Annotates a processed frame in place.
    pub fn draw_frame(
        &self,
        image: &mut RgbImage,
        zones: &ZoneConfig,
        tracks: &[TrackLabel],
        light: LightState,
    ) {
        draw_polygon(image, &zones.roi, ZONE);
        draw_stop_line(image, zones.stop_line_y, light);
        for track in tracks {
            let color = if track.violated { RED } else { GREEN };
            self.draw_box(image, track.bbox, color, &track.text);
        }
        self.draw_banner(image, light);
    }

    /// Context image marking: red outline and a `VIOLATION` label.
    pub fn draw_violation(&self, image: &mut RgbImage, bbox: BBox) {
        self.draw_box(image, bbox, RED, "VIOLATION");
    }

    fn draw_box(&self, image: &mut RgbImage, bbox: BBox, color: Rgb<u8>, text: &str) {
        let Some(b) = bbox.clamp_to(image.width(), image.height()) else {
            return;
        };
        for t in 0..2 {
            let w = b.width() - 2 * t;
            let h = b.height() - 2 * t;
            if w <= 0 || h <= 0 {
                break;
            }
            draw_hollow_rect_mut(
                image,
                Rect::at(b.x1 + t, b.y1 + t).of_size(w as u32, h as u32),
                color,
            );
        }
        if let Some(font) = &self.font {
            let y = (b.y1 - LABEL_SCALE as i32 - 4).max(0);
            draw_text_mut(image, color, b.x1, y, PxScale::from(LABEL_SCALE), font, text);
        }
    }

    fn draw_banner(&self, image: &mut RgbImage, light: LightState) {
        let w = BANNER_WIDTH.min(image.width());
        let h = BANNER_HEIGHT.min(image.height());
        if w == 0 || h == 0 {
            return;
        }
        draw_filled_rect_mut(image, Rect::at(0, 0).of_size(w, h), light_color(light));
        if let Some(font) = &self.font {
            let text = format!("LIGHT: {}", light.as_str().to_uppercase());
            draw_text_mut(image, WHITE, 6, 4, PxScale::from(BANNER_SCALE), font, &text);
        }
    }
}

fn light_color(light: LightState) -> Rgb<u8> {
    match light {
        LightState::Red => RED,
        LightState::Yellow => YELLOW,
        LightState::Green => GREEN,
        LightState::Unknown => GRAY,
    }
}

fn draw_polygon(image: &mut RgbImage, points: &[[i32; 2]], color: Rgb<u8>) {
    if points.len() < 2 {
        return;
    }
    for (i, a) in points.iter().enumerate() {
        let b = points[(i + 1) % points.len()];
        draw_line_segment_mut(
            image,
            (a[0] as f32, a[1] as f32),
            (b[0] as f32, b[1] as f32),
            color,
        );
    }
}

fn draw_stop_line(image: &mut RgbImage, y: i32, light: LightState) {
    let color = if light == LightState::Red { RED } else { WHITE };
    let right = image.width() as f32;
    for dy in 0..3 {
        let line_y = (y + dy) as f32;
        draw_line_segment_mut(image, (0.0, line_y), (right, line_y), color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zones() -> ZoneConfig {
        ZoneConfig::default_for(200, 200)
    }

    #[test]
    fn violated_tracks_are_boxed_red() {
        let overlay = Overlay::default();
        let mut image = RgbImage::new(200, 200);
        let tracks = vec![
            TrackLabel {
                bbox: BBox::new(40, 120, 80, 160),
                text: "car | 30A-12345".to_string(),
                violated: true,
            },
            TrackLabel {
                bbox: BBox::new(120, 120, 160, 160),
                text: "car | unknown".to_string(),
                violated: false,
            },
        ];
        overlay.draw_frame(&mut image, &zones(), &tracks, LightState::Red);

        assert_eq!(*image.get_pixel(40, 140), RED);
        assert_eq!(*image.get_pixel(120, 140), GREEN);
        assert_eq!(*image.get_pixel(100, 100), RED); // stop line under red
        assert_eq!(*image.get_pixel(5, 5), RED); // banner
    }

    #[test]
    fn banner_follows_light_state() {
        let overlay = Overlay::default();
        let mut image = RgbImage::new(200, 200);
        overlay.draw_frame(&mut image, &zones(), &[], LightState::Unknown);
        assert_eq!(*image.get_pixel(5, 5), GRAY);
        assert_eq!(*image.get_pixel(100, 100), WHITE);
    }

    #[test]
    fn boxes_outside_the_frame_are_ignored() {
        let overlay = Overlay::default();
        let mut image = RgbImage::new(50, 50);
        overlay.draw_violation(&mut image, BBox::new(60, 60, 90, 90));
        assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn missing_font_is_an_error() {
        assert!(Overlay::load(Some(Path::new("/no/such/font.ttf"))).is_err());
        assert!(!Overlay::load(None).unwrap().has_font());
    }
}
