//! Commit protocol and derived-parameter recomputation.
//!
//! Commit is all-or-nothing: every staged value is re-validated against its
//! required constraint as evaluated over the *candidate* committed state
//! (committed values with the whole pending group applied). A failed commit
//! changes nothing and leaves the staged values in place so the caller can
//! correct them.
//!
//! The protocol is split in two so the device push can be awaited without
//! holding the store lock: [`ParameterStore::validate_pending`] builds the
//! candidate snapshot, and [`ParameterStore::install`] swaps it in after the
//! transport has accepted it.

use crate::components::store::{ParameterStore, Snapshot};
use cam_core::error::{CamError, CamResult};
use cam_core::model::CameraModel;
use cam_core::parameter::Param;
use cam_core::transport::CommittedConfig;
use cam_core::values::ParameterValue;
use std::sync::Arc;
use tracing::debug;

/// Validated candidate state, ready to push to the device and install.
pub struct PreparedCommit {
    /// Snapshot that becomes committed once installed.
    pub snapshot: Arc<Snapshot>,
    /// Staged parameters promoted by this commit.
    pub staged: Vec<Param>,
}

impl ParameterStore {
    /// Whether there are no staged values outstanding (and at least one
    /// commit has succeeded since the camera was opened).
    pub fn are_parameters_committed(&self) -> bool {
        let inner = self.inner.read();
        inner.committed_once && inner.pending.is_empty()
    }

    /// Validate the whole pending group and build the candidate snapshot.
    ///
    /// Fails with [`CamError::InvalidParameterValues`] listing every staged
    /// parameter whose value does not satisfy its required constraint under
    /// the candidate state; pending is left untouched on failure.
    pub fn validate_pending(&self) -> CamResult<PreparedCommit> {
        let inner = self.inner.read();

        let mut candidate: CommittedConfig = inner.committed.values.clone();
        for (param, value) in &inner.pending {
            candidate.insert(*param, value.clone());
        }

        let mut failed: Vec<Param> = Vec::new();
        for (param, value) in &inner.pending {
            if !self.validates_now(*param, value, &candidate) {
                failed.push(*param);
            }
        }
        if !failed.is_empty() {
            debug!(failed = ?failed, "commit validation failed");
            return Err(CamError::InvalidParameterValues(failed));
        }

        let staged: Vec<Param> = inner.pending.keys().copied().collect();
        drop(inner);

        self.recompute_derived(&mut candidate);
        let relevance = self.recompute_relevance(&candidate);
        Ok(PreparedCommit {
            snapshot: Arc::new(Snapshot {
                values: candidate,
                relevance,
            }),
            staged,
        })
    }

    /// Swap in a validated snapshot and clear the staged values it covered.
    ///
    /// Values staged after validation stay pending for the next commit.
    pub fn install(&self, prepared: PreparedCommit) {
        let mut inner = self.inner.write();
        inner.committed = prepared.snapshot;
        for param in &prepared.staged {
            inner.pending.remove(param);
        }
        inner.committed_once = true;
    }

    /// Online path: write straight into committed state, bypassing staging.
    ///
    /// Only parameters flagged online-settable qualify, and the value is
    /// still validated before it lands. Derived parameters are recomputed
    /// under the new value.
    pub fn set_online(&self, param: Param, value: ParameterValue) -> CamResult<()> {
        let spec = self.require_spec(param)?;
        if !spec.online {
            return Err(CamError::ParameterIsNotOnlineable(param));
        }
        if !value.matches(param.value_type()) {
            return Err(CamError::ParameterTypeMismatch {
                parameter: param,
                requested: crate::components::store::value_shape(&value),
                actual: param.value_type(),
            });
        }
        if !self.is_relevant(param)? {
            return Err(CamError::ParameterValueIsIrrelevant(param));
        }

        let mut inner = self.inner.write();
        if !self.validates_now(param, &value, &inner.committed.values) {
            return Err(CamError::InvalidParameterValue(param));
        }
        let mut values = inner.committed.values.clone();
        values.insert(param, value);
        self.recompute_derived(&mut values);
        let relevance = self.recompute_relevance(&values);
        inner.committed = Arc::new(Snapshot { values, relevance });
        Ok(())
    }

    /// Online shorthand for float parameters.
    pub fn set_online_f64(&self, param: Param, value: f64) -> CamResult<()> {
        self.set_online(param, ParameterValue::FloatingPoint(value))
    }

    /// Recompute the read-only derived parameters from the writable ones.
    pub(crate) fn recompute_derived(&self, values: &mut CommittedConfig) {
        recompute_derived(&self.model, values);
    }
}

/// Derived read-only parameters as a function of the committed writable ones.
///
/// Frame geometry comes from the region list and the pixel depth; readout
/// timing adds the row shift time for every binned row to the exposure.
pub(crate) fn recompute_derived(model: &CameraModel, values: &mut CommittedConfig) {
    let Some(rois) = values
        .get(&Param::Rois)
        .and_then(|v| v.as_rois(Param::Rois).ok().map(<[_]>::to_vec))
    else {
        return;
    };

    let bytes_per_pixel = model.bytes_per_pixel() as i64;
    let mut frame_pixels: i64 = 0;
    let mut binned_rows: i64 = 0;
    for roi in &rois {
        frame_pixels += i64::from(roi.binned_width()) * i64::from(roi.binned_height());
        binned_rows += i64::from(roi.binned_height());
    }
    let frame_size = frame_pixels * bytes_per_pixel;

    // One frame per readout; stride and frame size coincide on this model
    // family (no per-frame metadata blocks).
    values.insert(Param::FrameSize, ParameterValue::Integer(frame_size as i32));
    values.insert(
        Param::FrameStride,
        ParameterValue::Integer(frame_size as i32),
    );
    values.insert(
        Param::ReadoutStride,
        ParameterValue::Integer(frame_size as i32),
    );

    let exposure_ms = values
        .get(&Param::ExposureTime)
        .and_then(|v| v.as_f64(Param::ExposureTime).ok())
        .unwrap_or(0.0);
    let readout_ms = exposure_ms + binned_rows as f64 * model.row_readout_us / 1000.0;
    values.insert(
        Param::ReadoutTimeCalculation,
        ParameterValue::FloatingPoint(readout_ms),
    );
    let rate_hz = if readout_ms > 0.0 {
        1000.0 / readout_ms
    } else {
        0.0
    };
    values.insert(
        Param::OnlineReadoutRateCalculation,
        ParameterValue::FloatingPoint(rate_hz),
    );
}
