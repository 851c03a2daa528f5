//! Tagged parameter values and their variable-length sub-records.
//!
//! Variable-length results are owned `Vec`s with ordinary ownership transfer;
//! the manual destroy/free pairing of the original driver interface does not
//! exist here.

use crate::error::{CamError, CamResult};
use crate::parameter::{Param, ValueType};
use serde::{Deserialize, Serialize};

/// A rectangular sensor sub-area with independent binning factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    /// Left edge in unbinned pixels.
    pub x: i32,
    /// Width in unbinned pixels.
    pub width: i32,
    /// Horizontal binning factor.
    pub x_binning: i32,
    /// Top edge in unbinned pixels.
    pub y: i32,
    /// Height in unbinned pixels.
    pub height: i32,
    /// Vertical binning factor.
    pub y_binning: i32,
}

impl Roi {
    /// Full-sensor region with no binning.
    pub const fn full(width: i32, height: i32) -> Roi {
        Roi {
            x: 0,
            width,
            x_binning: 1,
            y: 0,
            height,
            y_binning: 1,
        }
    }

    /// Pixels per row after binning.
    pub const fn binned_width(&self) -> i32 {
        self.width / self.x_binning
    }

    /// Rows after binning.
    pub const fn binned_height(&self) -> i32 {
        self.height / self.y_binning
    }
}

/// A gate pulse: delay from trigger, then width, both in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pulse {
    /// Delay from the trigger edge, in microseconds.
    pub delay: f64,
    /// Pulse width, in microseconds.
    pub width: f64,
}

impl Pulse {
    /// Total duration (delay + width) in microseconds.
    pub fn duration(&self) -> f64 {
        self.delay + self.width
    }
}

/// One entry of a gate modulation sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Modulation {
    /// Entry duration in milliseconds.
    pub duration: f64,
    /// Modulation frequency in MHz.
    pub frequency: f64,
    /// Phase offset in degrees.
    pub phase: f64,
    /// Output signal frequency in MHz.
    pub output_signal_frequency: f64,
}

/// Tagged union over all parameter value shapes.
///
/// Booleans and enumerations ride in [`ParameterValue::Integer`]; the
/// parameter's [`ValueType`] tag distinguishes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    /// 32-bit integer, boolean (0/1) or enumeration.
    Integer(i32),
    /// 64-bit integer.
    LargeInteger(i64),
    /// 64-bit float.
    FloatingPoint(f64),
    /// Ordered region list.
    Rois(Vec<Roi>),
    /// A single pulse.
    Pulse(Pulse),
    /// Ordered modulation sequence.
    Modulations(Vec<Modulation>),
}

impl ParameterValue {
    /// Whether this value's shape matches the given parameter's value type.
    pub fn matches(&self, ty: ValueType) -> bool {
        matches!(
            (self, ty),
            (
                ParameterValue::Integer(_),
                ValueType::Integer | ValueType::Boolean | ValueType::Enumeration
            ) | (ParameterValue::LargeInteger(_), ValueType::LargeInteger)
                | (ParameterValue::FloatingPoint(_), ValueType::FloatingPoint)
                | (ParameterValue::Rois(_), ValueType::Rois)
                | (ParameterValue::Pulse(_), ValueType::Pulse)
                | (ParameterValue::Modulations(_), ValueType::Modulations)
        )
    }

    /// Extract an integer, or report a type mismatch against `parameter`.
    pub fn as_i32(&self, parameter: Param) -> CamResult<i32> {
        match self {
            ParameterValue::Integer(v) => Ok(*v),
            _ => Err(type_mismatch(parameter, ValueType::Integer)),
        }
    }

    /// Extract a 64-bit integer, or report a type mismatch.
    pub fn as_i64(&self, parameter: Param) -> CamResult<i64> {
        match self {
            ParameterValue::LargeInteger(v) => Ok(*v),
            _ => Err(type_mismatch(parameter, ValueType::LargeInteger)),
        }
    }

    /// Extract a float, or report a type mismatch.
    pub fn as_f64(&self, parameter: Param) -> CamResult<f64> {
        match self {
            ParameterValue::FloatingPoint(v) => Ok(*v),
            _ => Err(type_mismatch(parameter, ValueType::FloatingPoint)),
        }
    }

    /// Extract a boolean, or report a type mismatch.
    pub fn as_bool(&self, parameter: Param) -> CamResult<bool> {
        match self {
            ParameterValue::Integer(v) => Ok(*v != 0),
            _ => Err(type_mismatch(parameter, ValueType::Boolean)),
        }
    }

    /// Extract the region list, or report a type mismatch.
    pub fn as_rois(&self, parameter: Param) -> CamResult<&[Roi]> {
        match self {
            ParameterValue::Rois(v) => Ok(v),
            _ => Err(type_mismatch(parameter, ValueType::Rois)),
        }
    }

    /// Extract the pulse, or report a type mismatch.
    pub fn as_pulse(&self, parameter: Param) -> CamResult<Pulse> {
        match self {
            ParameterValue::Pulse(v) => Ok(*v),
            _ => Err(type_mismatch(parameter, ValueType::Pulse)),
        }
    }

    /// Extract the modulation sequence, or report a type mismatch.
    pub fn as_modulations(&self, parameter: Param) -> CamResult<&[Modulation]> {
        match self {
            ParameterValue::Modulations(v) => Ok(v),
            _ => Err(type_mismatch(parameter, ValueType::Modulations)),
        }
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        ParameterValue::Integer(i32::from(v))
    }
}

fn type_mismatch(parameter: Param, requested: ValueType) -> CamError {
    CamError::ParameterTypeMismatch {
        parameter,
        requested,
        actual: parameter.value_type(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roi_binned_dimensions() {
        let roi = Roi {
            x: 0,
            width: 2048,
            x_binning: 2,
            y: 0,
            height: 2048,
            y_binning: 4,
        };
        assert_eq!(roi.binned_width(), 1024);
        assert_eq!(roi.binned_height(), 512);
    }

    #[test]
    fn mismatched_accessor_is_a_type_error() {
        let value = ParameterValue::FloatingPoint(10.0);
        let err = value.as_i64(Param::ExposureTime).unwrap_err();
        assert!(matches!(err, CamError::ParameterTypeMismatch { .. }));
    }

    #[test]
    fn boolean_rides_in_integer() {
        let value = ParameterValue::from(true);
        assert_eq!(value.as_bool(Param::EnableIntensifier), Ok(true));
        assert!(value.matches(ValueType::Boolean));
        assert!(!value.matches(ValueType::FloatingPoint));
    }
}
