// src/state/param_info.rs
//
// Value ranges for controls and sequence steps.

use std::fmt;

/// Numeric range of a control or a sequence step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueRange {
    /// Minimum value
    pub min: f64,

    /// Maximum value
    pub max: f64,

    /// Step size for discrete values (0 = continuous)
    pub step: f64,
}

impl ValueRange {
    /// On/off step toggles.
    pub const TOGGLE: ValueRange = ValueRange {
        min: 0.0,
        max: 1.0,
        step: 1.0,
    };

    /// Continuous normalized range used by sliders.
    pub const UNIT: ValueRange = ValueRange {
        min: 0.0,
        max: 1.0,
        step: 0.0,
    };

    pub fn continuous(min: f64, max: f64) -> Self {
        Self { min, max, step: 0.0 }
    }

    pub fn stepped(min: f64, max: f64, step: f64) -> Self {
        Self { min, max, step }
    }

    pub fn is_discrete(&self) -> bool {
        self.step > 0.0
    }

    /// Clamp a value into the range, snapping discrete ranges to their grid.
    ///
    /// Non-finite input yields the minimum.
    #[inline]
    pub fn clamp(&self, value: f64) -> f64 {
        if !value.is_finite() {
            return self.min;
        }
        let value = if self.is_discrete() {
            self.min + ((value - self.min) / self.step).round() * self.step
        } else {
            value
        };
        value.clamp(self.min, self.max)
    }

    /// Normalize a value to 0..1 range.
    #[inline]
    pub fn normalize(&self, value: f64) -> f64 {
        if self.max == self.min {
            return 0.0;
        }
        ((value - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }

    /// Denormalize a 0..1 value to the range.
    #[inline]
    pub fn denormalize(&self, normalized: f64) -> f64 {
        self.clamp(self.min + normalized * (self.max - self.min))
    }

    /// The "other" end of the range, used by toggles.
    #[inline]
    pub fn flip(&self, value: f64) -> f64 {
        if value > self.min { self.min } else { self.max }
    }

    /// Format a value for display in a number box.
    pub fn format(&self, value: f64) -> String {
        let precision = if self.is_discrete() { 0 } else { 2 };
        format!("{:.prec$}", value, prec = precision)
    }
}

impl Default for ValueRange {
    fn default() -> Self {
        Self::UNIT
    }
}

impl fmt::Display for ValueRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.format(self.min), self.format(self.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stepped_clamp() {
        let range = ValueRange::stepped(0.0, 8.0, 1.0);
        assert_eq!(range.clamp(15.0), 8.0);
        assert_eq!(range.clamp(-3.0), 0.0);
        assert_eq!(range.clamp(2.6), 3.0);
        assert_eq!(range.clamp(f64::NAN), 0.0);
    }

    #[test]
    fn test_flip() {
        assert_eq!(ValueRange::TOGGLE.flip(0.0), 1.0);
        assert_eq!(ValueRange::TOGGLE.flip(1.0), 0.0);
    }

    #[test]
    fn test_normalize_round_trip() {
        let range = ValueRange::continuous(20.0, 220.0);
        assert_eq!(range.normalize(120.0), 0.5);
        assert_eq!(range.denormalize(0.5), 120.0);
    }
}
