// src/control/law.rs - Proportional Peltier current law

/// Expected thermocouple signal at the 20 °C calibration point (type K, mV).
pub const REFERENCE_SIGNAL_MV: f64 = 0.798;

/// Hardware safety bound on the Peltier current (A).
pub const CURRENT_LIMIT: f64 = 6.4;

/// Observed signal relative to the reference signal.
pub fn accuracy_ratio(observed_mv: f64, reference_mv: f64) -> f64 {
    observed_mv / reference_mv
}

/// Clamp `current` into `[-limit, limit]`.
///
/// NaN maps to 0.0 A: an undefined command switches the heat pump off rather
/// than escaping the bound.
pub fn clamp_current(current: f64, limit: f64) -> f64 {
    if current.is_nan() {
        return 0.0;
    }
    current.clamp(-limit, limit)
}

/// Scale the previous current by the accuracy ratio and saturate at ±6.4 A.
pub fn compute_next_current(previous: f64, observed_mv: f64, reference_mv: f64) -> f64 {
    clamp_current(previous * accuracy_ratio(observed_mv, reference_mv), CURRENT_LIMIT)
}

/// The same law with a configurable reference and bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProportionalLaw {
    pub reference_signal_mv: f64,
    pub current_limit: f64,
}

impl Default for ProportionalLaw {
    fn default() -> Self {
        Self {
            reference_signal_mv: REFERENCE_SIGNAL_MV,
            current_limit: CURRENT_LIMIT,
        }
    }
}

impl ProportionalLaw {
    pub fn new(reference_signal_mv: f64, current_limit: f64) -> Self {
        Self { reference_signal_mv, current_limit }
    }

    pub fn ratio(&self, observed_mv: f64) -> f64 {
        accuracy_ratio(observed_mv, self.reference_signal_mv)
    }

    /// Accuracy as a percentage of the reference signal.
    pub fn accuracy_percent(&self, observed_mv: f64) -> f64 {
        self.ratio(observed_mv) * 100.0
    }

    pub fn next_current(&self, previous: f64, observed_mv: f64) -> f64 {
        self.clamp(previous * self.ratio(observed_mv))
    }

    pub fn clamp(&self, current: f64) -> f64 {
        clamp_current(current, self.current_limit)
    }
}
