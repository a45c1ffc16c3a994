mod backend;
pub mod backends;
mod guard;
mod registry;
mod result;

pub use backend::{LightClassifier, PlateReader, PlateRequest, VehicleDetector};
pub use guard::AdapterGuard;
pub(crate) use guard::panic_message;
pub use registry::{light_from_spec, plates_from_spec, vehicles_from_spec};
pub use result::{BBox, Detection, LightState, PlateRead, UNKNOWN_PLATE};
