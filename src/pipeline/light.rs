use crate::detect::LightState;

/// Debounces raw per-frame light readings.
///
/// A reading is reported once it has been seen `threshold` times in a row.
/// Until then the previously reported state persists; before anything has
/// stabilized the reported state is `unknown`.
#[derive(Debug, Clone)]
pub struct LightStabilizer {
    last_raw: Option<LightState>,
    stable_count: u32,
    reported: LightState,
    threshold: u32,
}

impl LightStabilizer {
    pub fn new(threshold: u32) -> Self {
        Self {
            last_raw: None,
            stable_count: 0,
            reported: LightState::Unknown,
            threshold: threshold.max(1),
        }
    }

    /// Feeds one raw reading and returns the debounced state.
    pub fn update(&mut self, raw: LightState) -> LightState {
        if self.last_raw == Some(raw) {
            self.stable_count += 1;
        } else {
            self.stable_count = 0;
        }
        self.last_raw = Some(raw);
        if self.stable_count + 1 >= self.threshold {
            self.reported = raw;
        }
        self.reported
    }

    pub fn reported(&self) -> LightState {
        self.reported
    }
}
