//! Backend selection from `kind[:argument]` strings (CLI and config).
//!
//! | adapter  | specs |
//! |----------|-------|
//! | vehicles | `scripted:<script.json>`, `tract:<model.onnx>`, `none` |
//! | light    | `hsv`, `scripted:<script.json>`, `fixed:<state>` |
//! | plates   | `scripted:<script.json>`, `fixed:<TEXT>`, `tract:<model.onnx>`, `none` |

use anyhow::{anyhow, Result};
use std::sync::Arc;

use super::backend::{LightClassifier, PlateReader, VehicleDetector};
use super::backends::{
    FixedPlateReader, HsvLightClassifier, NullPlateReader, Script, ScriptedLight, ScriptedPlates,
    ScriptedVehicles,
};
use super::result::LightState;

#[cfg(feature = "backend-tract")]
const YOLO_INPUT_SIZE: u32 = 640;

fn split_spec(spec: &str) -> (&str, Option<&str>) {
    match spec.split_once(':') {
        Some((kind, arg)) => (kind.trim(), Some(arg.trim())),
        None => (spec.trim(), None),
    }
}

fn require_arg<'a>(spec: &str, arg: Option<&'a str>) -> Result<&'a str> {
    arg.filter(|a| !a.is_empty())
        .ok_or_else(|| anyhow!("backend spec '{}' requires an argument", spec))
}

pub fn vehicles_from_spec(spec: &str) -> Result<Box<dyn VehicleDetector>> {
    let (kind, arg) = split_spec(spec);
    match kind {
        "none" => Ok(Box::new(ScriptedVehicles::default())),
        "scripted" => {
            let script = Script::load(require_arg(spec, arg)?)?;
            Ok(Box::new(ScriptedVehicles::new(script.vehicles)))
        }
        #[cfg(feature = "backend-tract")]
        "tract" => {
            let model = require_arg(spec, arg)?;
            let mut detector =
                super::backends::YoloVehicleDetector::new(model, YOLO_INPUT_SIZE, YOLO_INPUT_SIZE)?;
            detector.warm_up()?;
            Ok(Box::new(detector))
        }
        #[cfg(not(feature = "backend-tract"))]
        "tract" => Err(anyhow!(
            "vehicle backend 'tract' requires the backend-tract feature"
        )),
        other => Err(anyhow!("unknown vehicle backend '{}'", other)),
    }
}

pub fn light_from_spec(spec: &str) -> Result<Box<dyn LightClassifier>> {
    let (kind, arg) = split_spec(spec);
    match kind {
        "hsv" => Ok(Box::new(HsvLightClassifier::new())),
        "scripted" => {
            let script = Script::load(require_arg(spec, arg)?)?;
            Ok(Box::new(ScriptedLight::from_spans(script.lights)))
        }
        "fixed" => {
            let state: LightState = require_arg(spec, arg)?.parse()?;
            Ok(Box::new(ScriptedLight::new(state)))
        }
        other => Err(anyhow!("unknown light backend '{}'", other)),
    }
}

pub fn plates_from_spec(spec: &str) -> Result<Arc<dyn PlateReader>> {
    let (kind, arg) = split_spec(spec);
    match kind {
        "none" => Ok(Arc::new(NullPlateReader)),
        "fixed" => Ok(Arc::new(FixedPlateReader::new(
            require_arg(spec, arg)?,
            1.0,
        ))),
        "scripted" => {
            let script = Script::load(require_arg(spec, arg)?)?;
            Ok(Arc::new(ScriptedPlates::new(script.plates)))
        }
        #[cfg(feature = "backend-tract")]
        "tract" => {
            let model = require_arg(spec, arg)?;
            Ok(Arc::new(super::backends::YoloPlateReader::new(
                model,
                YOLO_INPUT_SIZE,
                YOLO_INPUT_SIZE,
            )?))
        }
        #[cfg(not(feature = "backend-tract"))]
        "tract" => Err(anyhow!(
            "plate backend 'tract' requires the backend-tract feature"
        )),
        other => Err(anyhow!("unknown plate backend '{}'", other)),
    }
}
