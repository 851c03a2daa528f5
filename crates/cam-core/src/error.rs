//! Error types for the camera control layer.
//!
//! A single `thiserror` enum covers the whole taxonomy:
//!
//! - **Identity errors** — unknown parameter names, mismatched typed accessors
//! - **Access errors** — read-only violations, irrelevant parameters
//! - **Validation errors** — values that fail their constraint
//! - **State errors** — commit required, acquisition already/not running
//! - **Transport errors** — device disconnected, communication failure
//!
//! Validation and access errors are always recoverable locally (correct the
//! value and retry). State and transport errors surface to the caller with
//! enough context to decide whether a retry makes sense.

use crate::parameter::{Param, ValueType};
use thiserror::Error;

/// Convenience alias for results using the camera error type.
pub type CamResult<T> = std::result::Result<T, CamError>;

/// Primary error type for the camera control layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CamError {
    // =========================================================================
    // Identity errors
    // =========================================================================
    /// A string identifier did not name any statically defined parameter.
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    /// A typed accessor was called on a parameter of a different value type.
    ///
    /// This is a type error, not a value error: the parameter's value type is
    /// fixed at definition time.
    #[error("parameter {parameter} has value type {actual:?}, not {requested:?}")]
    ParameterTypeMismatch {
        parameter: Param,
        requested: ValueType,
        actual: ValueType,
    },

    /// The parameter is statically defined but not present on this camera.
    #[error("parameter {0} does not exist for this camera")]
    ParameterDoesNotExist(Param),

    // =========================================================================
    // Access errors
    // =========================================================================
    /// Attempted to set a read-only parameter.
    #[error("parameter {0} is read-only")]
    ParameterValueIsReadOnly(Param),

    /// The parameter is not meaningful under the current committed
    /// configuration (its relevance flag is false).
    #[error("parameter {0} is irrelevant under the current configuration")]
    ParameterValueIsIrrelevant(Param),

    /// Attempted the online-set path on a parameter that is not
    /// online-settable.
    #[error("parameter {0} cannot be set while acquisition is running")]
    ParameterIsNotOnlineable(Param),

    // =========================================================================
    // Validation errors
    // =========================================================================
    /// A candidate value failed the parameter's constraint.
    #[error("invalid value for parameter {0}")]
    InvalidParameterValue(Param),

    /// One or more pending values failed Required validation during commit.
    /// No pending value was applied.
    #[error("commit rejected; {} parameter(s) failed validation", .0.len())]
    InvalidParameterValues(Vec<Param>),

    /// Required/Recommended constraints were queried on a parameter whose
    /// constraint never depends on other committed parameters.
    #[error("constraint category is not applicable to parameter {0}")]
    InvalidConstraintCategory(Param),

    // =========================================================================
    // State errors
    // =========================================================================
    /// Acquisition was started with uncommitted parameter changes pending.
    #[error("parameters must be committed before starting acquisition")]
    ParametersNotCommitted,

    /// Acquisition is already running on this camera.
    #[error("acquisition is already in progress")]
    AcquisitionInProgress,

    /// A control call required a running acquisition.
    #[error("acquisition is not in progress")]
    AcquisitionNotInProgress,

    /// The requested readout count was zero or negative.
    #[error("invalid readout count {0}")]
    InvalidReadoutCount(i64),

    /// A wait or acquire call elapsed a full timeout window with no data.
    #[error("timed out waiting for acquisition data")]
    TimeOutOccurred,

    /// The camera handle has been closed.
    #[error("camera is closed")]
    CameraClosed,

    // =========================================================================
    // Transport errors
    // =========================================================================
    /// The identifier did not match any camera known to the transport.
    #[error("invalid camera id '{0}'")]
    InvalidCameraId(String),

    /// The device disconnected. Fatal to the current acquisition session but
    /// not to the handle; a re-commit is required before restart.
    #[error("camera disconnected")]
    CameraDisconnected,

    /// Communication with the driver/firmware layer failed.
    #[error("transport error: {0}")]
    Transport(String),
}
