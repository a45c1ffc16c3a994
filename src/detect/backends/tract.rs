#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::{PlateReader, PlateRequest, VehicleDetector};
use crate::detect::result::{BBox, Detection, PlateRead};
use crate::frame::Frame;

/// COCO class ids kept by the detector, with their labels.
const VEHICLE_CLASSES: [(usize, &str); 2] = [(2, "car"), (3, "motorcycle")];
const NMS_IOU: f32 = 0.45;

/// Class order of the plate character model.
pub const PLATE_ALPHABET: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// A YOLO (v8-style head) ONNX model with a fixed input size.
struct YoloModel {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
}

/// One above-threshold anchor, in source image pixels.
struct Candidate {
    class: usize,
    score: f32,
    bbox: BBox,
}

impl YoloModel {
    fn load(model_path: &Path, width: u32, height: u32) -> Result<Self> {
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        Ok(Self {
            model,
            width,
            height,
        })
    }

    /// Runs the model on `image` and keeps, per anchor, the best class in
    /// `classes` scoring at least `threshold`. Boxes are scaled back to
    /// `image` pixels.
    fn candidates(
        &self,
        image: &RgbImage,
        classes: &[usize],
        threshold: f32,
    ) -> Result<Vec<Candidate>> {
        let resized = imageops::resize(image, self.width, self.height, FilterType::Triangle);
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        )
        .into_tensor();
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;

        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("unexpected output rank")?;
        let shape = view.shape().to_vec();
        // [1, 4 + classes, anchors] or its transpose.
        let channels_first = shape[1] < shape[2];
        let (channels, anchors) = if channels_first {
            (shape[1], shape[2])
        } else {
            (shape[2], shape[1])
        };
        let at = |c: usize, a: usize| {
            if channels_first {
                view[[0, c, a]]
            } else {
                view[[0, a, c]]
            }
        };

        let sx = image.width() as f32 / self.width as f32;
        let sy = image.height() as f32 / self.height as f32;
        let mut out = Vec::new();
        for a in 0..anchors {
            let mut best: Option<(usize, f32)> = None;
            for &class in classes {
                if 4 + class >= channels {
                    continue;
                }
                let score = at(4 + class, a);
                if score >= threshold && best.map_or(true, |(_, s)| score > s) {
                    best = Some((class, score));
                }
            }
            let Some((class, score)) = best else {
                continue;
            };
            let (cx, cy, w, h) = (at(0, a), at(1, a), at(2, a), at(3, a));
            out.push(Candidate {
                class,
                score,
                bbox: BBox::new(
                    ((cx - w / 2.0) * sx) as i32,
                    ((cy - h / 2.0) * sy) as i32,
                    ((cx + w / 2.0) * sx) as i32,
                    ((cy + h / 2.0) * sy) as i32,
                ),
            });
        }
        Ok(out)
    }
}

/// YOLO vehicle detector on tract.
///
/// Frames are resized to the model input (640 wide by default) and boxes are
/// scaled back to original frame pixels. Only cars and motorcycles are kept.
pub struct YoloVehicleDetector {
    model: YoloModel,
    confidence_threshold: f32,
}

impl YoloVehicleDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        Ok(Self {
            model: YoloModel::load(model_path.as_ref(), width, height)?,
            confidence_threshold: 0.4,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }
}

impl VehicleDetector for YoloVehicleDetector {
    fn name(&self) -> &'static str {
        "tract-yolo"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let classes: Vec<usize> = VEHICLE_CLASSES.iter().map(|(id, _)| *id).collect();
        let candidates =
            self.model
                .candidates(frame.image.as_ref(), &classes, self.confidence_threshold)?;
        let detections = candidates
            .into_iter()
            .filter_map(|c| {
                let label = VEHICLE_CLASSES
                    .iter()
                    .find(|(id, _)| *id == c.class)
                    .map(|(_, label)| *label)?;
                Some(Detection::new(label, c.bbox, c.score))
            })
            .collect();
        Ok(non_max_suppression(detections, NMS_IOU))
    }
}

/// Character-detection plate OCR on tract.
///
/// The model detects single characters in the vehicle crop; class `i` is the
/// `i`-th character of the alphabet. Characters are read row by row, left to
/// right, and the read confidence is their mean score.
pub struct YoloPlateReader {
    model: YoloModel,
    alphabet: Vec<char>,
    confidence_threshold: f32,
}

impl YoloPlateReader {
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        Ok(Self {
            model: YoloModel::load(model_path.as_ref(), width, height)?,
            alphabet: PLATE_ALPHABET.chars().collect(),
            confidence_threshold: 0.25,
        })
    }

    pub fn with_alphabet(mut self, alphabet: &str) -> Self {
        self.alphabet = alphabet.chars().collect();
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }
}

impl PlateReader for YoloPlateReader {
    fn name(&self) -> &'static str {
        "tract-plate"
    }

    fn read(&self, request: &PlateRequest) -> Result<PlateRead> {
        let classes: Vec<usize> = (0..self.alphabet.len()).collect();
        let candidates =
            self.model
                .candidates(&request.crop, &classes, self.confidence_threshold)?;
        let glyphs = candidates
            .into_iter()
            .filter_map(|c| {
                let ch = *self.alphabet.get(c.class)?;
                Some(Detection::new(ch.to_string(), c.bbox, c.score))
            })
            .collect();
        Ok(match assemble_plate(non_max_suppression(glyphs, NMS_IOU)) {
            Some((text, confidence)) => PlateRead::new(text, confidence),
            None => PlateRead::unknown(),
        })
    }
}

/// Orders character boxes into rows (top to bottom) and columns (left to
/// right). A box starts a new row when its center lies more than half a
/// character height below the current row's first box.
fn assemble_plate(mut glyphs: Vec<Detection>) -> Option<(String, f32)> {
    if glyphs.is_empty() {
        return None;
    }
    let center_y = |d: &Detection| (d.bbox.y1 + d.bbox.y2) as f32 / 2.0;
    let mean_height =
        glyphs.iter().map(|d| d.bbox.height() as f32).sum::<f32>() / glyphs.len() as f32;
    glyphs.sort_by(|a, b| center_y(a).total_cmp(&center_y(b)));

    let mut rows: Vec<Vec<Detection>> = Vec::new();
    for glyph in glyphs {
        match rows.last_mut() {
            Some(row) if center_y(&glyph) - center_y(&row[0]) <= mean_height / 2.0 => {
                row.push(glyph)
            }
            _ => rows.push(vec![glyph]),
        }
    }

    let mut text = String::new();
    let mut total = 0.0;
    let mut count = 0;
    for mut row in rows {
        row.sort_by_key(|d| d.bbox.x1);
        for glyph in row {
            text.push_str(&glyph.label);
            total += glyph.confidence;
            count += 1;
        }
    }
    Some((text, total / count as f32))
}

fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        if kept
            .iter()
            .all(|k| iou(&k.bbox, &candidate.bbox) <= iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &BBox, b: &BBox) -> f32 {
    let ix = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0) as f32;
    let iy = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0) as f32;
    let inter = ix * iy;
    let union = (a.width() * a.height() + b.width() * b.height()) as f32 - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}
