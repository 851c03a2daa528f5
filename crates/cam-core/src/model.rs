//! Static camera capability tables.
//!
//! A [`CameraModel`] is what the transport reports for an opened device: the
//! sensor geometry, timing constants, and one [`ParamSpec`] per parameter the
//! model supports. Parameter records in the control layer are created from
//! this table when a camera is opened and destroyed when it is closed.

use crate::constraint::Constraint;
use crate::parameter::{AccessMode, Param};
use crate::values::ParameterValue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a connected (or discoverable) camera.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CameraId {
    /// Model name, e.g. "SiL-2048B".
    pub model: String,
    /// Serial number string.
    pub serial_number: String,
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.model, self.serial_number)
    }
}

/// Per-parameter entry of a model's capability table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub param: Param,
    /// Factory default value.
    pub default: ParameterValue,
    pub access: AccessMode,
    /// Whether the value may be changed while acquisition is running.
    pub online: bool,
    /// Whether the parameter is meaningful under the factory defaults.
    pub initially_relevant: bool,
    /// All values the hardware could ever accept.
    pub capable: Constraint,
}

impl ParamSpec {
    /// Read-write spec with no online path, relevant by default.
    pub fn new(param: Param, default: ParameterValue, capable: Constraint) -> ParamSpec {
        ParamSpec {
            param,
            default,
            access: AccessMode::ReadWrite,
            online: false,
            initially_relevant: true,
            capable,
        }
    }

    /// Builder: mark read-only.
    pub fn read_only(mut self) -> ParamSpec {
        self.access = AccessMode::ReadOnly;
        self
    }

    /// Builder: mark trivially writable (cannot invalidate other parameters).
    pub fn trivial(mut self) -> ParamSpec {
        self.access = AccessMode::ReadWriteTrivial;
        self
    }

    /// Builder: allow the online-set path.
    pub fn online(mut self) -> ParamSpec {
        self.online = true;
        self
    }

    /// Builder: start out irrelevant until a gate parameter enables it.
    pub fn initially_irrelevant(mut self) -> ParamSpec {
        self.initially_relevant = false;
        self
    }
}

/// Static description of one camera model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    pub id: CameraId,
    /// Active sensor width in pixels.
    pub sensor_width: i32,
    /// Active sensor height in pixels.
    pub sensor_height: i32,
    /// ADC bit depth.
    pub bit_depth: i32,
    /// Time to shift one binned row out of the sensor, in microseconds.
    pub row_readout_us: f64,
    /// Capability table, in canonical parameter order.
    pub params: Vec<ParamSpec>,
}

impl CameraModel {
    /// Look up the capability entry for a parameter, if this model has it.
    pub fn spec(&self, param: Param) -> Option<&ParamSpec> {
        self.params.iter().find(|s| s.param == param)
    }

    /// Bytes per pixel as committed by the ADC bit depth.
    pub fn bytes_per_pixel(&self) -> i32 {
        (self.bit_depth + 7) / 8
    }
}
