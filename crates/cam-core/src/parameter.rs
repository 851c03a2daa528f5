//! Parameter identity and typing.
//!
//! Each camera parameter is a variant of [`Param`]. Its semantic value type
//! and constraint kind are fixed at definition time and answered in O(1) by
//! `const fn` match tables — the original driver encodes these as bit fields
//! inside a dense integer identifier; here they are an explicit enum pair.
//!
//! The tag determines which typed accessors and constraint queries are legal
//! for a parameter. Calling a mismatched accessor is a
//! [`CamError::ParameterTypeMismatch`], not a value error.

use crate::error::{CamError, CamResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic value type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    /// 32-bit signed integer.
    Integer,
    /// 64-bit signed integer.
    LargeInteger,
    /// 64-bit float.
    FloatingPoint,
    /// Boolean carried as an integer (0 or 1).
    Boolean,
    /// Discrete enumeration carried as an integer.
    Enumeration,
    /// Ordered list of regions of interest.
    Rois,
    /// A single delay/width pulse.
    Pulse,
    /// Ordered list of modulation entries.
    Modulations,
}

/// Kind of constraint attached to a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// No constraint; typically derived read-only parameters.
    None,
    /// Continuous or stepped numeric range.
    Range,
    /// Discrete collection of permitted values.
    Collection,
    /// Region-of-interest rules.
    Rois,
    /// Pulse delay/width/duration rules.
    Pulse,
    /// Modulation sequence rules.
    Modulations,
}

/// How a parameter may be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    /// Never writable by the caller.
    ReadOnly,
    /// Writable; changing it may invalidate other parameters.
    ReadWrite,
    /// Writable; changing it can never invalidate other parameters.
    ReadWriteTrivial,
}

/// Statically defined camera parameters.
///
/// The set is closed: per-camera absence is reported at runtime as
/// [`CamError::ParameterDoesNotExist`], while a name that matches no variant
/// at all is [`CamError::UnknownParameter`] (see [`Param::from_name`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Param {
    // Exposure & readout
    /// Exposure time in milliseconds. Online-settable.
    ExposureTime,
    /// Number of readouts an acquisition targets (0 = until stopped).
    ReadoutCount,
    /// Regions of the sensor to read out.
    Rois,

    // Triggering
    /// Trigger origin (internal timer or external input).
    TriggerSource,
    /// Threshold voltage for the external trigger input. Online-settable.
    TriggerThreshold,

    // Analog chain
    /// ADC pixel clock in MHz.
    AdcSpeed,
    /// Analog gain applied before digitization.
    AdcAnalogGain,

    // Thermal
    /// Sensor cooling set point in degrees C.
    SensorTemperatureSetPoint,
    /// Current sensor temperature in degrees C.
    SensorTemperatureReading,

    // Intensifier & gating
    /// Enables the image intensifier stage.
    EnableIntensifier,
    /// Micro-channel plate gain; relevant only with the intensifier enabled.
    IntensifierGain,
    /// Repetitive gate pulse; relevant only with the intensifier enabled.
    GatingPulse,

    // Modulation
    /// Enables gate modulation.
    EnableModulation,
    /// Modulation sequence; relevant only with modulation enabled.
    ModulationSequence,

    // Derived geometry & timing (read-only, recomputed on commit)
    /// Bytes in one frame as committed.
    FrameSize,
    /// Bytes between successive frames in a readout.
    FrameStride,
    /// Bytes between successive readouts in the acquisition buffer.
    ReadoutStride,
    /// Time to expose and read one frame, in milliseconds.
    ReadoutTimeCalculation,
    /// Predicted readout delivery rate in readouts per second.
    OnlineReadoutRateCalculation,

    // Static sensor info (read-only)
    /// Active sensor width in pixels.
    SensorActiveWidth,
    /// Active sensor height in pixels.
    SensorActiveHeight,
    /// ADC bit depth.
    PixelBitDepth,
}

impl Param {
    /// All statically defined parameters, in canonical order.
    pub const ALL: &'static [Param] = &[
        Param::ExposureTime,
        Param::ReadoutCount,
        Param::Rois,
        Param::TriggerSource,
        Param::TriggerThreshold,
        Param::AdcSpeed,
        Param::AdcAnalogGain,
        Param::SensorTemperatureSetPoint,
        Param::SensorTemperatureReading,
        Param::EnableIntensifier,
        Param::IntensifierGain,
        Param::GatingPulse,
        Param::EnableModulation,
        Param::ModulationSequence,
        Param::FrameSize,
        Param::FrameStride,
        Param::ReadoutStride,
        Param::ReadoutTimeCalculation,
        Param::OnlineReadoutRateCalculation,
        Param::SensorActiveWidth,
        Param::SensorActiveHeight,
        Param::PixelBitDepth,
    ];

    /// Semantic value type of this parameter. O(1), no lookup.
    pub const fn value_type(self) -> ValueType {
        match self {
            Param::ExposureTime
            | Param::TriggerThreshold
            | Param::AdcSpeed
            | Param::SensorTemperatureSetPoint
            | Param::SensorTemperatureReading
            | Param::ReadoutTimeCalculation
            | Param::OnlineReadoutRateCalculation => ValueType::FloatingPoint,
            Param::ReadoutCount => ValueType::LargeInteger,
            Param::Rois => ValueType::Rois,
            Param::TriggerSource | Param::AdcAnalogGain => ValueType::Enumeration,
            Param::EnableIntensifier | Param::EnableModulation => ValueType::Boolean,
            Param::IntensifierGain
            | Param::FrameSize
            | Param::FrameStride
            | Param::ReadoutStride
            | Param::SensorActiveWidth
            | Param::SensorActiveHeight
            | Param::PixelBitDepth => ValueType::Integer,
            Param::GatingPulse => ValueType::Pulse,
            Param::ModulationSequence => ValueType::Modulations,
        }
    }

    /// Constraint kind of this parameter. O(1), no lookup.
    pub const fn constraint_kind(self) -> ConstraintKind {
        match self {
            Param::ExposureTime
            | Param::ReadoutCount
            | Param::TriggerThreshold
            | Param::SensorTemperatureSetPoint
            | Param::IntensifierGain => ConstraintKind::Range,
            Param::Rois => ConstraintKind::Rois,
            Param::TriggerSource
            | Param::AdcSpeed
            | Param::AdcAnalogGain
            | Param::EnableIntensifier
            | Param::EnableModulation => ConstraintKind::Collection,
            Param::GatingPulse => ConstraintKind::Pulse,
            Param::ModulationSequence => ConstraintKind::Modulations,
            Param::SensorTemperatureReading
            | Param::FrameSize
            | Param::FrameStride
            | Param::ReadoutStride
            | Param::ReadoutTimeCalculation
            | Param::OnlineReadoutRateCalculation
            | Param::SensorActiveWidth
            | Param::SensorActiveHeight
            | Param::PixelBitDepth => ConstraintKind::None,
        }
    }

    /// Stable string name, matching the `Debug` form.
    pub const fn name(self) -> &'static str {
        match self {
            Param::ExposureTime => "ExposureTime",
            Param::ReadoutCount => "ReadoutCount",
            Param::Rois => "Rois",
            Param::TriggerSource => "TriggerSource",
            Param::TriggerThreshold => "TriggerThreshold",
            Param::AdcSpeed => "AdcSpeed",
            Param::AdcAnalogGain => "AdcAnalogGain",
            Param::SensorTemperatureSetPoint => "SensorTemperatureSetPoint",
            Param::SensorTemperatureReading => "SensorTemperatureReading",
            Param::EnableIntensifier => "EnableIntensifier",
            Param::IntensifierGain => "IntensifierGain",
            Param::GatingPulse => "GatingPulse",
            Param::EnableModulation => "EnableModulation",
            Param::ModulationSequence => "ModulationSequence",
            Param::FrameSize => "FrameSize",
            Param::FrameStride => "FrameStride",
            Param::ReadoutStride => "ReadoutStride",
            Param::ReadoutTimeCalculation => "ReadoutTimeCalculation",
            Param::OnlineReadoutRateCalculation => "OnlineReadoutRateCalculation",
            Param::SensorActiveWidth => "SensorActiveWidth",
            Param::SensorActiveHeight => "SensorActiveHeight",
            Param::PixelBitDepth => "PixelBitDepth",
        }
    }

    /// Resolve a string identifier to a parameter.
    pub fn from_name(name: &str) -> CamResult<Param> {
        Param::ALL
            .iter()
            .copied()
            .find(|p| p.name() == name)
            .ok_or_else(|| CamError::UnknownParameter(name.to_string()))
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Trigger origin choices for [`Param::TriggerSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerSource {
    /// Frames are timed by the internal exposure clock.
    Internal = 1,
    /// Frames are started by the external trigger input.
    External = 2,
}

impl TriggerSource {
    /// Integer encoding used in [`ParameterValue::Integer`].
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Decode from the integer encoding.
    pub const fn from_i32(value: i32) -> Option<TriggerSource> {
        match value {
            1 => Some(TriggerSource::Internal),
            2 => Some(TriggerSource::External),
            _ => None,
        }
    }
}

/// Analog gain choices for [`Param::AdcAnalogGain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdcAnalogGain {
    /// Lowest gain, largest full well.
    Low = 1,
    /// Balanced gain.
    Medium = 2,
    /// Highest gain, lowest read noise.
    High = 3,
}

impl AdcAnalogGain {
    /// Integer encoding used in [`ParameterValue::Integer`].
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Decode from the integer encoding.
    pub const fn from_i32(value: i32) -> Option<AdcAnalogGain> {
        match value {
            1 => Some(AdcAnalogGain::Low),
            2 => Some(AdcAnalogGain::Medium),
            3 => Some(AdcAnalogGain::High),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_is_static() {
        assert_eq!(Param::ExposureTime.value_type(), ValueType::FloatingPoint);
        assert_eq!(Param::ExposureTime.constraint_kind(), ConstraintKind::Range);
        assert_eq!(Param::Rois.value_type(), ValueType::Rois);
        assert_eq!(Param::Rois.constraint_kind(), ConstraintKind::Rois);
        assert_eq!(Param::FrameStride.constraint_kind(), ConstraintKind::None);
    }

    #[test]
    fn every_parameter_round_trips_by_name() {
        for p in Param::ALL {
            assert_eq!(Param::from_name(p.name()), Ok(*p));
        }
    }

    #[test]
    fn unknown_name_is_an_identity_error() {
        let err = Param::from_name("NotAParameter").unwrap_err();
        assert!(matches!(err, CamError::UnknownParameter(_)));
    }
}
