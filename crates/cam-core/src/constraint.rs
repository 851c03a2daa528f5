//! Constraint model and validation rules.
//!
//! Every constraint carries a scope (whether it can change when other
//! committed parameters change), a severity (whether violations must be
//! rejected or merely flagged) and an empty-set flag meaning no value
//! currently satisfies it.
//!
//! Floating-point comparisons are tolerance-aware throughout: increments and
//! collection membership use a relative epsilon so values computed by the
//! caller from the constraint bounds themselves always validate.

use crate::values::{Modulation, ParameterValue, Pulse, Roi};
use serde::{Deserialize, Serialize};

/// Relative tolerance for float comparisons against constraint data.
const FLOAT_TOLERANCE: f64 = 1e-9;

fn approx_eq(a: f64, b: f64) -> bool {
    let scale = 1.0_f64.max(a.abs()).max(b.abs());
    (a - b).abs() <= FLOAT_TOLERANCE * scale
}

/// Whether a constraint is fixed for the camera model or may change based on
/// other committed parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintScope {
    /// Fixed for the camera model.
    Independent,
    /// May change when other committed parameters change.
    Dependent,
}

/// Whether violating values are rejected or accepted-but-flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintSeverity {
    /// Violating values must be rejected.
    Error,
    /// Violating values are accepted but should be surfaced to the caller.
    Warning,
}

/// Which view of a parameter's constraint to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintCategory {
    /// All values the hardware could ever accept.
    Capable,
    /// Values mandatory given the current committed state.
    Required,
    /// Values suggested for best results.
    Recommended,
}

/// Numeric range with increment, excluded values and outlying values.
///
/// Exclusion takes precedence over range membership: a boundary value that is
/// also listed as excluded fails validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeConstraint {
    pub scope: ConstraintScope,
    pub severity: ConstraintSeverity,
    pub empty_set: bool,
    pub minimum: f64,
    pub maximum: f64,
    /// Step from `minimum`; 0 means continuous.
    pub increment: f64,
    /// Values inside the range that are rejected.
    pub excluded_values: Vec<f64>,
    /// Values inside the range that pass validation but are discouraged.
    pub outlying_values: Vec<f64>,
}

impl RangeConstraint {
    /// Continuous independent error-severity range.
    pub fn new(minimum: f64, maximum: f64) -> RangeConstraint {
        RangeConstraint {
            scope: ConstraintScope::Independent,
            severity: ConstraintSeverity::Error,
            empty_set: false,
            minimum,
            maximum,
            increment: 0.0,
            excluded_values: Vec::new(),
            outlying_values: Vec::new(),
        }
    }

    /// Builder: set the increment.
    pub fn with_increment(mut self, increment: f64) -> RangeConstraint {
        self.increment = increment;
        self
    }

    /// Builder: mark the constraint dependent on other committed parameters.
    pub fn dependent(mut self) -> RangeConstraint {
        self.scope = ConstraintScope::Dependent;
        self
    }

    /// Builder: set the excluded-value set.
    pub fn with_excluded(mut self, excluded: Vec<f64>) -> RangeConstraint {
        self.excluded_values = excluded;
        self
    }

    /// Builder: set the outlying-value set.
    pub fn with_outlying(mut self, outlying: Vec<f64>) -> RangeConstraint {
        self.outlying_values = outlying;
        self
    }

    /// True when `value` satisfies the range, increment and exclusion rules.
    pub fn validate(&self, value: f64) -> bool {
        if self.empty_set {
            return false;
        }
        // Exclusion wins even for boundary values.
        if self.excluded_values.iter().any(|e| approx_eq(*e, value)) {
            return false;
        }
        let scale = 1.0_f64.max(value.abs());
        if value < self.minimum - FLOAT_TOLERANCE * scale
            || value > self.maximum + FLOAT_TOLERANCE * scale
        {
            return false;
        }
        if self.increment > 0.0 {
            let steps = ((value - self.minimum) / self.increment).round();
            let nearest = self.minimum + steps * self.increment;
            if !approx_eq(nearest, value) {
                return false;
            }
        }
        true
    }

    /// True when `value` is in the outlying set (valid but discouraged).
    pub fn is_outlying(&self, value: f64) -> bool {
        self.outlying_values.iter().any(|o| approx_eq(*o, value))
    }
}

/// Ordered set of permitted discrete values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConstraint {
    pub scope: ConstraintScope,
    pub severity: ConstraintSeverity,
    pub empty_set: bool,
    /// Permitted values, in presentation order.
    pub values: Vec<f64>,
}

impl CollectionConstraint {
    /// Independent error-severity collection.
    pub fn new(values: Vec<f64>) -> CollectionConstraint {
        CollectionConstraint {
            scope: ConstraintScope::Independent,
            severity: ConstraintSeverity::Error,
            empty_set: false,
            values,
        }
    }

    /// Builder: mark the constraint dependent on other committed parameters.
    pub fn dependent(mut self) -> CollectionConstraint {
        self.scope = ConstraintScope::Dependent;
        self
    }

    /// True when `value` matches one permitted element.
    ///
    /// Exact for integer-valued collections; tolerance-aware for floats
    /// (integer members are whole numbers, so the tolerance is harmless).
    pub fn validate(&self, value: f64) -> bool {
        !self.empty_set && self.values.iter().any(|v| approx_eq(*v, value))
    }
}

/// Rule mask for region-of-interest constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoisRules(u32);

impl RoisRules {
    /// No rules.
    pub const NONE: RoisRules = RoisRules(0x00);
    /// x and width must be multiples of the horizontal binning factor.
    pub const X_BINNING_ALIGNMENT: RoisRules = RoisRules(0x01);
    /// y and height must be multiples of the vertical binning factor.
    pub const Y_BINNING_ALIGNMENT: RoisRules = RoisRules(0x02);
    /// Regions must mirror around the sensor's vertical center line.
    pub const HORIZONTAL_SYMMETRY: RoisRules = RoisRules(0x04);
    /// Regions must mirror around the sensor's horizontal center line.
    pub const VERTICAL_SYMMETRY: RoisRules = RoisRules(0x08);
    /// Binning factors must match across symmetric regions.
    pub const SYMMETRY_BOUNDS_BINNING: RoisRules = RoisRules(0x10);

    /// True when every rule in `other` is present in `self`.
    pub const fn contains(self, other: RoisRules) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for RoisRules {
    type Output = RoisRules;
    fn bitor(self, rhs: RoisRules) -> RoisRules {
        RoisRules(self.0 | rhs.0)
    }
}

/// Region-of-interest rules: per-field sub-ranges, binning limit sets and a
/// rule mask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoisConstraint {
    pub scope: ConstraintScope,
    pub severity: ConstraintSeverity,
    pub empty_set: bool,
    pub rules: RoisRules,
    pub x_constraint: RangeConstraint,
    pub width_constraint: RangeConstraint,
    /// Permitted horizontal binning factors.
    pub x_binning_limits: Vec<i32>,
    pub y_constraint: RangeConstraint,
    pub height_constraint: RangeConstraint,
    /// Permitted vertical binning factors.
    pub y_binning_limits: Vec<i32>,
    pub maximum_roi_count: usize,
}

impl RoisConstraint {
    /// Validate a region list against all sub-ranges and rules.
    pub fn validate(&self, regions: &[Roi]) -> bool {
        if self.empty_set || regions.is_empty() || regions.len() > self.maximum_roi_count {
            return false;
        }
        // Active area extents come from the width/height sub-ranges.
        let active_width = self.width_constraint.maximum as i32;
        let active_height = self.height_constraint.maximum as i32;
        let first = regions[0];
        for roi in regions {
            if roi.width <= 0 || roi.height <= 0 || roi.x_binning <= 0 || roi.y_binning <= 0 {
                return false;
            }
            if !self.x_constraint.validate(f64::from(roi.x))
                || !self.width_constraint.validate(f64::from(roi.width))
                || !self.y_constraint.validate(f64::from(roi.y))
                || !self.height_constraint.validate(f64::from(roi.height))
            {
                return false;
            }
            if roi.x + roi.width > active_width || roi.y + roi.height > active_height {
                return false;
            }
            if !self.x_binning_limits.contains(&roi.x_binning)
                || !self.y_binning_limits.contains(&roi.y_binning)
            {
                return false;
            }
            if self.rules.contains(RoisRules::X_BINNING_ALIGNMENT)
                && (roi.x % roi.x_binning != 0 || roi.width % roi.x_binning != 0)
            {
                return false;
            }
            if self.rules.contains(RoisRules::Y_BINNING_ALIGNMENT)
                && (roi.y % roi.y_binning != 0 || roi.height % roi.y_binning != 0)
            {
                return false;
            }
            // Symmetry: the region must mirror onto itself around the sensor
            // center within the active area.
            if self.rules.contains(RoisRules::HORIZONTAL_SYMMETRY)
                && roi.x != active_width - roi.x - roi.width
            {
                return false;
            }
            if self.rules.contains(RoisRules::VERTICAL_SYMMETRY)
                && roi.y != active_height - roi.y - roi.height
            {
                return false;
            }
            if self.rules.contains(RoisRules::SYMMETRY_BOUNDS_BINNING)
                && (roi.x_binning != first.x_binning || roi.y_binning != first.y_binning)
            {
                return false;
            }
        }
        true
    }
}

/// Pulse rules: delay/width sub-ranges plus an overall duration window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseConstraint {
    pub scope: ConstraintScope,
    pub severity: ConstraintSeverity,
    pub empty_set: bool,
    pub delay_constraint: RangeConstraint,
    pub width_constraint: RangeConstraint,
    /// Minimum delay + width, in the pulse's native unit.
    pub minimum_duration: f64,
    /// Maximum delay + width, in the pulse's native unit.
    pub maximum_duration: f64,
}

impl PulseConstraint {
    /// Validate delay, width and the combined duration window.
    pub fn validate(&self, pulse: &Pulse) -> bool {
        if self.empty_set {
            return false;
        }
        if !self.delay_constraint.validate(pulse.delay)
            || !self.width_constraint.validate(pulse.width)
        {
            return false;
        }
        let duration = pulse.duration();
        let scale = 1.0_f64.max(duration.abs());
        duration >= self.minimum_duration - FLOAT_TOLERANCE * scale
            && duration <= self.maximum_duration + FLOAT_TOLERANCE * scale
    }
}

/// Modulation sequence rules: a length cap plus per-field sub-ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModulationsConstraint {
    pub scope: ConstraintScope,
    pub severity: ConstraintSeverity,
    pub empty_set: bool,
    pub maximum_modulation_count: usize,
    pub duration_constraint: RangeConstraint,
    pub frequency_constraint: RangeConstraint,
    pub phase_constraint: RangeConstraint,
    pub output_signal_frequency_constraint: RangeConstraint,
}

impl ModulationsConstraint {
    /// Validate sequence length and every entry's four fields.
    pub fn validate(&self, sequence: &[Modulation]) -> bool {
        if self.empty_set || sequence.is_empty() || sequence.len() > self.maximum_modulation_count {
            return false;
        }
        sequence.iter().all(|m| {
            self.duration_constraint.validate(m.duration)
                && self.frequency_constraint.validate(m.frequency)
                && self.phase_constraint.validate(m.phase)
                && self
                    .output_signal_frequency_constraint
                    .validate(m.output_signal_frequency)
        })
    }
}

/// Polymorphic constraint, one variant per constraint kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constraint {
    /// No constraint; every well-typed value validates.
    None,
    Range(RangeConstraint),
    Collection(CollectionConstraint),
    Rois(RoisConstraint),
    Pulse(PulseConstraint),
    Modulations(ModulationsConstraint),
}

impl Constraint {
    /// Constraint scope; `None` constraints are independent.
    pub fn scope(&self) -> ConstraintScope {
        match self {
            Constraint::None => ConstraintScope::Independent,
            Constraint::Range(c) => c.scope,
            Constraint::Collection(c) => c.scope,
            Constraint::Rois(c) => c.scope,
            Constraint::Pulse(c) => c.scope,
            Constraint::Modulations(c) => c.scope,
        }
    }

    /// Constraint severity; `None` constraints report `Error`.
    pub fn severity(&self) -> ConstraintSeverity {
        match self {
            Constraint::None => ConstraintSeverity::Error,
            Constraint::Range(c) => c.severity,
            Constraint::Collection(c) => c.severity,
            Constraint::Rois(c) => c.severity,
            Constraint::Pulse(c) => c.severity,
            Constraint::Modulations(c) => c.severity,
        }
    }

    /// True when no value currently satisfies the constraint.
    pub fn is_empty_set(&self) -> bool {
        match self {
            Constraint::None => false,
            Constraint::Range(c) => c.empty_set,
            Constraint::Collection(c) => c.empty_set,
            Constraint::Rois(c) => c.empty_set,
            Constraint::Pulse(c) => c.empty_set,
            Constraint::Modulations(c) => c.empty_set,
        }
    }

    /// Validate a candidate value. A value whose shape does not match the
    /// constraint kind fails.
    pub fn validate(&self, value: &ParameterValue) -> bool {
        match (self, value) {
            (Constraint::None, _) => true,
            (Constraint::Range(c), ParameterValue::Integer(v)) => c.validate(f64::from(*v)),
            (Constraint::Range(c), ParameterValue::LargeInteger(v)) => c.validate(*v as f64),
            (Constraint::Range(c), ParameterValue::FloatingPoint(v)) => c.validate(*v),
            (Constraint::Collection(c), ParameterValue::Integer(v)) => c.validate(f64::from(*v)),
            (Constraint::Collection(c), ParameterValue::LargeInteger(v)) => c.validate(*v as f64),
            (Constraint::Collection(c), ParameterValue::FloatingPoint(v)) => c.validate(*v),
            (Constraint::Rois(c), ParameterValue::Rois(regions)) => c.validate(regions),
            (Constraint::Pulse(c), ParameterValue::Pulse(pulse)) => c.validate(pulse),
            (Constraint::Modulations(c), ParameterValue::Modulations(seq)) => c.validate(seq),
            _ => false,
        }
    }

    /// True when the value validates but sits in a range's outlying set.
    pub fn is_outlying(&self, value: &ParameterValue) -> bool {
        match (self, value) {
            (Constraint::Range(c), ParameterValue::Integer(v)) => c.is_outlying(f64::from(*v)),
            (Constraint::Range(c), ParameterValue::LargeInteger(v)) => c.is_outlying(*v as f64),
            (Constraint::Range(c), ParameterValue::FloatingPoint(v)) => c.is_outlying(*v),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(min: f64, max: f64) -> RangeConstraint {
        RangeConstraint::new(min, max)
    }

    #[test]
    fn range_endpoints_validate() {
        let c = range(0.0, 100.0);
        assert!(c.validate(0.0));
        assert!(c.validate(100.0));
        assert!(!c.validate(-0.001));
        assert!(!c.validate(100.001));
    }

    #[test]
    fn range_increment_uses_tolerance() {
        let c = range(0.1, 60000.0).with_increment(0.1);
        // 0.1 * 3 is not exactly 0.3 in binary; must still validate.
        assert!(c.validate(0.1 + 0.1 + 0.1));
        assert!(c.validate(59999.9));
        assert!(!c.validate(0.15));
    }

    #[test]
    fn exclusion_beats_range_membership() {
        // Boundary value listed as excluded: exclusion takes precedence.
        let c = range(0.0, 10.0).with_excluded(vec![10.0, 5.0]);
        assert!(!c.validate(10.0));
        assert!(!c.validate(5.0));
        assert!(c.validate(4.0));
    }

    #[test]
    fn outlying_values_pass_but_are_flagged() {
        let c = range(0.0, 10.0).with_outlying(vec![10.0]);
        assert!(c.validate(10.0));
        assert!(c.is_outlying(10.0));
        assert!(!c.is_outlying(9.0));
    }

    #[test]
    fn empty_set_rejects_everything() {
        let mut c = range(0.0, 10.0);
        c.empty_set = true;
        assert!(!c.validate(5.0));

        let mut col = CollectionConstraint::new(vec![1.0, 2.0]);
        col.empty_set = true;
        assert!(!col.validate(1.0));
    }

    #[test]
    fn collection_matches_with_tolerance() {
        let c = CollectionConstraint::new(vec![5.0, 10.0, 20.0]);
        assert!(c.validate(10.0));
        assert!(c.validate(10.0 + 1e-12));
        assert!(!c.validate(11.0));
    }

    fn rois_constraint(rules: RoisRules) -> RoisConstraint {
        RoisConstraint {
            scope: ConstraintScope::Independent,
            severity: ConstraintSeverity::Error,
            empty_set: false,
            rules,
            x_constraint: range(0.0, 2047.0),
            width_constraint: range(1.0, 2048.0),
            x_binning_limits: vec![1, 2, 4],
            y_constraint: range(0.0, 2047.0),
            height_constraint: range(1.0, 2048.0),
            y_binning_limits: vec![1, 2, 4],
            maximum_roi_count: 4,
        }
    }

    #[test]
    fn rois_basic_bounds() {
        let c = rois_constraint(RoisRules::NONE);
        assert!(c.validate(&[Roi::full(2048, 2048)]));
        // Region extending past the active area fails.
        assert!(!c.validate(&[Roi {
            x: 1024,
            width: 2048,
            x_binning: 1,
            y: 0,
            height: 2048,
            y_binning: 1,
        }]));
        // Binning outside the limit set fails.
        assert!(!c.validate(&[Roi {
            x: 0,
            width: 2048,
            x_binning: 3,
            y: 0,
            height: 2048,
            y_binning: 1,
        }]));
    }

    #[test]
    fn rois_count_cap() {
        let c = rois_constraint(RoisRules::NONE);
        let region = Roi {
            x: 0,
            width: 64,
            x_binning: 1,
            y: 0,
            height: 64,
            y_binning: 1,
        };
        assert!(c.validate(&vec![region; 4]));
        assert!(!c.validate(&vec![region; 5]));
    }

    #[test]
    fn rois_binning_alignment() {
        let c = rois_constraint(RoisRules::X_BINNING_ALIGNMENT | RoisRules::Y_BINNING_ALIGNMENT);
        assert!(c.validate(&[Roi {
            x: 4,
            width: 128,
            x_binning: 4,
            y: 8,
            height: 256,
            y_binning: 2,
        }]));
        // x=3 is not a multiple of the 4x binning factor.
        assert!(!c.validate(&[Roi {
            x: 3,
            width: 128,
            x_binning: 4,
            y: 0,
            height: 256,
            y_binning: 2,
        }]));
    }

    #[test]
    fn rois_symmetry_mirrors_around_center() {
        let c = rois_constraint(RoisRules::HORIZONTAL_SYMMETRY | RoisRules::VERTICAL_SYMMETRY);
        // Centered 1024x1024 region: x = 2048 - x - width holds at x=512.
        assert!(c.validate(&[Roi {
            x: 512,
            width: 1024,
            x_binning: 1,
            y: 512,
            height: 1024,
            y_binning: 1,
        }]));
        assert!(!c.validate(&[Roi {
            x: 0,
            width: 1024,
            x_binning: 1,
            y: 512,
            height: 1024,
            y_binning: 1,
        }]));
    }

    #[test]
    fn rois_symmetry_bounds_binning() {
        let c = rois_constraint(RoisRules::SYMMETRY_BOUNDS_BINNING);
        let a = Roi {
            x: 0,
            width: 64,
            x_binning: 2,
            y: 0,
            height: 64,
            y_binning: 2,
        };
        let mut b = a;
        b.y = 128;
        assert!(c.validate(&[a, b]));
        b.x_binning = 4;
        assert!(!c.validate(&[a, b]));
    }

    #[test]
    fn pulse_duration_window() {
        let c = PulseConstraint {
            scope: ConstraintScope::Dependent,
            severity: ConstraintSeverity::Error,
            empty_set: false,
            delay_constraint: range(0.0, 1000.0),
            width_constraint: range(0.01, 1000.0),
            minimum_duration: 0.02,
            maximum_duration: 1000.0,
        };
        assert!(c.validate(&Pulse {
            delay: 10.0,
            width: 5.0
        }));
        // Fields individually valid but combined duration over the cap.
        assert!(!c.validate(&Pulse {
            delay: 600.0,
            width: 600.0
        }));
        assert!(!c.validate(&Pulse {
            delay: 0.0,
            width: 0.005
        }));
    }

    #[test]
    fn modulations_length_and_fields() {
        let c = ModulationsConstraint {
            scope: ConstraintScope::Independent,
            severity: ConstraintSeverity::Error,
            empty_set: false,
            maximum_modulation_count: 2,
            duration_constraint: range(0.1, 1000.0),
            frequency_constraint: range(0.001, 200.0),
            phase_constraint: range(0.0, 360.0),
            output_signal_frequency_constraint: range(0.001, 200.0),
        };
        let entry = Modulation {
            duration: 1.0,
            frequency: 100.0,
            phase: 90.0,
            output_signal_frequency: 100.0,
        };
        assert!(c.validate(&[entry]));
        assert!(c.validate(&[entry, entry]));
        assert!(!c.validate(&[entry, entry, entry]));
        let mut bad = entry;
        bad.phase = 400.0;
        assert!(!c.validate(&[bad]));
    }

    #[test]
    fn constraint_rejects_mismatched_shapes() {
        let c = Constraint::Range(range(0.0, 10.0));
        assert!(c.validate(&ParameterValue::FloatingPoint(5.0)));
        assert!(!c.validate(&ParameterValue::Rois(vec![Roi::full(8, 8)])));
    }
}
