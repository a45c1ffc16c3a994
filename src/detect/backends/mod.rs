pub mod hsv_light;
pub mod plate;
pub mod scripted;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use hsv_light::HsvLightClassifier;
pub use plate::{FixedPlateReader, NullPlateReader};
pub use scripted::{Script, ScriptedLight, ScriptedPlates, ScriptedVehicles};

#[cfg(feature = "backend-tract")]
pub use tract::{YoloPlateReader, YoloVehicleDetector, PLATE_ALPHABET};
