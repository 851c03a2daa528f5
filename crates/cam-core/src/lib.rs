//! Core types and traits for the camera control layer.
//!
//! This crate holds the leaf pieces that the control layer in `cam-control`
//! is built from:
//! - Parameter identity and typing ([`parameter`])
//! - Tagged parameter values ([`values`])
//! - The constraint model and validation rules ([`constraint`])
//! - The static per-model capability table ([`model`])
//! - The transport seam to the driver/firmware layer ([`transport`])
//! - The error taxonomy ([`error`])
//!
//! Nothing in here performs device I/O. The [`transport::Transport`] trait is
//! the only boundary to hardware; `cam-control` ships a simulated
//! implementation for tests and demos.

pub mod constraint;
pub mod error;
pub mod model;
pub mod parameter;
pub mod transport;
pub mod values;

pub use constraint::{
    CollectionConstraint, Constraint, ConstraintCategory, ConstraintScope, ConstraintSeverity,
    ModulationsConstraint, PulseConstraint, RangeConstraint, RoisConstraint, RoisRules,
};
pub use error::{CamError, CamResult};
pub use model::{CameraId, CameraModel, ParamSpec};
pub use parameter::{AccessMode, ConstraintKind, Param, ValueType};
pub use transport::{CommittedConfig, DeviceRef, Transport, TransportEvent};
pub use values::{Modulation, ParameterValue, Pulse, Roi};
