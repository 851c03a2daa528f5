//! Per-camera parameter store.
//!
//! Records are created from the model's capability table when the camera is
//! opened. Committed state lives in an immutable [`Snapshot`] behind an `Arc`
//! that is swapped wholesale on commit, so reads never contend with a commit
//! in progress. Pending (staged) values live beside it and are only ever
//! promoted through the commit protocol or the narrow online path.
//!
//! Relevance and dependent constraints are functions of *committed* values
//! only; staged values never influence them.

use cam_core::constraint::{Constraint, ConstraintCategory, ConstraintScope, ConstraintSeverity};
use cam_core::error::{CamError, CamResult};
use cam_core::model::CameraModel;
use cam_core::parameter::{AccessMode, Param, TriggerSource};
use cam_core::transport::CommittedConfig;
use cam_core::values::{Modulation, ParameterValue, Pulse, Roi};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Immutable committed view of a camera's parameters.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Committed value per parameter.
    pub values: CommittedConfig,
    /// Relevance per parameter under these committed values.
    pub relevance: BTreeMap<Param, bool>,
}

pub(crate) struct StoreInner {
    pub(crate) committed: Arc<Snapshot>,
    pub(crate) pending: BTreeMap<Param, ParameterValue>,
    /// False until the first successful commit; acquisition is refused
    /// before that even though the defaults are readable.
    pub(crate) committed_once: bool,
}

/// Per-camera parameter records plus staged edits.
pub struct ParameterStore {
    pub(crate) model: CameraModel,
    pub(crate) inner: RwLock<StoreInner>,
}

impl ParameterStore {
    /// Build records from a model's capability table. The factory defaults
    /// become the readable committed values, but the store does not count as
    /// committed until the first [`commit`](Self::commit) succeeds.
    pub fn new(model: CameraModel) -> ParameterStore {
        let mut values: CommittedConfig = BTreeMap::new();
        for spec in &model.params {
            values.insert(spec.param, spec.default.clone());
        }
        let store = ParameterStore {
            inner: RwLock::new(StoreInner {
                committed: Arc::new(Snapshot {
                    values: BTreeMap::new(),
                    relevance: BTreeMap::new(),
                }),
                pending: BTreeMap::new(),
                committed_once: false,
            }),
            model,
        };
        store.recompute_derived(&mut values);
        let relevance = store.recompute_relevance(&values);
        store.inner.write().committed = Arc::new(Snapshot { values, relevance });
        store
    }

    /// The model this store was built from.
    pub fn model(&self) -> &CameraModel {
        &self.model
    }

    /// Cheap clone of the committed snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.read().committed.clone()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Whether the parameter is meaningful under the committed configuration.
    pub fn is_relevant(&self, param: Param) -> CamResult<bool> {
        self.require_spec(param)?;
        Ok(*self.snapshot().relevance.get(&param).unwrap_or(&false))
    }

    /// Access mode of the parameter.
    pub fn access(&self, param: Param) -> CamResult<AccessMode> {
        Ok(self.require_spec(param)?.access)
    }

    /// Whether the parameter supports the online-set path.
    pub fn is_online_settable(&self, param: Param) -> CamResult<bool> {
        Ok(self.require_spec(param)?.online)
    }

    /// Factory default value.
    pub fn default_value(&self, param: Param) -> CamResult<ParameterValue> {
        Ok(self.require_spec(param)?.default.clone())
    }

    /// Current value: the staged value if one is pending, else the committed
    /// value.
    pub fn value(&self, param: Param) -> CamResult<ParameterValue> {
        self.require_spec(param)?;
        let inner = self.inner.read();
        if let Some(pending) = inner.pending.get(&param) {
            return Ok(pending.clone());
        }
        inner
            .committed
            .values
            .get(&param)
            .cloned()
            .ok_or(CamError::ParameterDoesNotExist(param))
    }

    /// Parameters relevant under the current committed configuration, in the
    /// model's canonical order.
    pub fn defined_parameters(&self) -> Vec<Param> {
        let snapshot = self.snapshot();
        self.model
            .params
            .iter()
            .map(|s| s.param)
            .filter(|p| *snapshot.relevance.get(p).unwrap_or(&false))
            .collect()
    }

    /// Constraint for a parameter under the requested category.
    ///
    /// Required/Recommended are only meaningful for parameters whose capable
    /// constraint is `Dependent`-scoped; anything else fails with
    /// [`CamError::InvalidConstraintCategory`].
    pub fn constraint(&self, param: Param, category: ConstraintCategory) -> CamResult<Constraint> {
        let spec = self.require_spec(param)?;
        match category {
            ConstraintCategory::Capable => Ok(spec.capable.clone()),
            ConstraintCategory::Required | ConstraintCategory::Recommended => {
                if spec.capable.scope() != ConstraintScope::Dependent {
                    return Err(CamError::InvalidConstraintCategory(param));
                }
                let snapshot = self.snapshot();
                let required = self.required_constraint(param, &snapshot.values);
                if category == ConstraintCategory::Required {
                    Ok(required)
                } else {
                    Ok(recommended_from_required(required))
                }
            }
        }
    }

    // =========================================================================
    // Staging
    // =========================================================================

    /// Stage a pending value after validating it against the capable and
    /// required constraints. Committed state is untouched until commit.
    pub fn set_value(&self, param: Param, value: ParameterValue) -> CamResult<()> {
        self.check_settable(param, &value)?;
        let snapshot = self.snapshot();
        if !self.validates_now(param, &value, &snapshot.values) {
            return Err(CamError::InvalidParameterValue(param));
        }
        self.inner.write().pending.insert(param, value);
        Ok(())
    }

    /// Pure predicate form of [`set_value`](Self::set_value): no mutation, and
    /// an invalid value yields `false` rather than an error. Identity errors
    /// (absent parameter, wrong value shape) still error.
    pub fn can_set_value(&self, param: Param, value: &ParameterValue) -> CamResult<bool> {
        let spec = self.require_spec(param)?;
        if !value.matches(param.value_type()) {
            return Err(CamError::ParameterTypeMismatch {
                parameter: param,
                requested: value_shape(value),
                actual: param.value_type(),
            });
        }
        if spec.access == AccessMode::ReadOnly {
            return Ok(false);
        }
        let snapshot = self.snapshot();
        if !snapshot.relevance.get(&param).unwrap_or(&false) {
            return Ok(false);
        }
        Ok(self.validates_now(param, value, &snapshot.values))
    }

    fn check_settable(&self, param: Param, value: &ParameterValue) -> CamResult<()> {
        let spec = self.require_spec(param)?;
        if !value.matches(param.value_type()) {
            return Err(CamError::ParameterTypeMismatch {
                parameter: param,
                requested: value_shape(value),
                actual: param.value_type(),
            });
        }
        if spec.access == AccessMode::ReadOnly {
            return Err(CamError::ParameterValueIsReadOnly(param));
        }
        if !self.is_relevant(param)? {
            return Err(CamError::ParameterValueIsIrrelevant(param));
        }
        Ok(())
    }

    /// Capable plus Required validation against the given committed values.
    pub(crate) fn validates_now(
        &self,
        param: Param,
        value: &ParameterValue,
        committed: &CommittedConfig,
    ) -> bool {
        let Some(spec) = self.model.spec(param) else {
            return false;
        };
        let capable_ok =
            spec.capable.validate(value) || spec.capable.severity() == ConstraintSeverity::Warning;
        if !capable_ok {
            return false;
        }
        let required = self.required_constraint(param, committed);
        required.validate(value) || required.severity() == ConstraintSeverity::Warning
    }

    // =========================================================================
    // Typed accessors
    // =========================================================================

    /// Get a float-typed parameter.
    pub fn get_f64(&self, param: Param) -> CamResult<f64> {
        self.value(param)?.as_f64(param)
    }

    /// Stage a float-typed parameter.
    pub fn set_f64(&self, param: Param, value: f64) -> CamResult<()> {
        self.typed_set(param, ParameterValue::FloatingPoint(value))
    }

    /// Predicate form of [`set_f64`](Self::set_f64).
    pub fn can_set_f64(&self, param: Param, value: f64) -> CamResult<bool> {
        self.typed_can_set(param, ParameterValue::FloatingPoint(value))
    }

    /// Get a 32-bit integer or enumeration parameter.
    pub fn get_i32(&self, param: Param) -> CamResult<i32> {
        self.value(param)?.as_i32(param)
    }

    /// Stage a 32-bit integer or enumeration parameter.
    pub fn set_i32(&self, param: Param, value: i32) -> CamResult<()> {
        self.typed_set(param, ParameterValue::Integer(value))
    }

    /// Predicate form of [`set_i32`](Self::set_i32).
    pub fn can_set_i32(&self, param: Param, value: i32) -> CamResult<bool> {
        self.typed_can_set(param, ParameterValue::Integer(value))
    }

    /// Get a 64-bit integer parameter.
    pub fn get_i64(&self, param: Param) -> CamResult<i64> {
        self.value(param)?.as_i64(param)
    }

    /// Stage a 64-bit integer parameter.
    pub fn set_i64(&self, param: Param, value: i64) -> CamResult<()> {
        self.typed_set(param, ParameterValue::LargeInteger(value))
    }

    /// Predicate form of [`set_i64`](Self::set_i64).
    pub fn can_set_i64(&self, param: Param, value: i64) -> CamResult<bool> {
        self.typed_can_set(param, ParameterValue::LargeInteger(value))
    }

    /// Get a boolean parameter.
    pub fn get_bool(&self, param: Param) -> CamResult<bool> {
        self.value(param)?.as_bool(param)
    }

    /// Stage a boolean parameter.
    pub fn set_bool(&self, param: Param, value: bool) -> CamResult<()> {
        self.typed_set(param, ParameterValue::from(value))
    }

    /// Get the region list.
    pub fn get_rois(&self, param: Param) -> CamResult<Vec<Roi>> {
        Ok(self.value(param)?.as_rois(param)?.to_vec())
    }

    /// Stage a region list.
    pub fn set_rois(&self, param: Param, regions: Vec<Roi>) -> CamResult<()> {
        self.typed_set(param, ParameterValue::Rois(regions))
    }

    /// Get a pulse parameter.
    pub fn get_pulse(&self, param: Param) -> CamResult<Pulse> {
        self.value(param)?.as_pulse(param)
    }

    /// Stage a pulse parameter.
    pub fn set_pulse(&self, param: Param, pulse: Pulse) -> CamResult<()> {
        self.typed_set(param, ParameterValue::Pulse(pulse))
    }

    /// Get a modulation sequence.
    pub fn get_modulations(&self, param: Param) -> CamResult<Vec<Modulation>> {
        Ok(self.value(param)?.as_modulations(param)?.to_vec())
    }

    /// Stage a modulation sequence.
    pub fn set_modulations(&self, param: Param, sequence: Vec<Modulation>) -> CamResult<()> {
        self.typed_set(param, ParameterValue::Modulations(sequence))
    }

    fn typed_set(&self, param: Param, value: ParameterValue) -> CamResult<()> {
        if !value.matches(param.value_type()) {
            return Err(CamError::ParameterTypeMismatch {
                parameter: param,
                requested: value_shape(&value),
                actual: param.value_type(),
            });
        }
        self.set_value(param, value)
    }

    fn typed_can_set(&self, param: Param, value: ParameterValue) -> CamResult<bool> {
        if !value.matches(param.value_type()) {
            return Err(CamError::ParameterTypeMismatch {
                parameter: param,
                requested: value_shape(&value),
                actual: param.value_type(),
            });
        }
        self.can_set_value(param, &value)
    }

    // =========================================================================
    // Dependent rules
    // =========================================================================

    /// Relevance of each parameter under the given committed values.
    pub(crate) fn recompute_relevance(&self, values: &CommittedConfig) -> BTreeMap<Param, bool> {
        let intensifier_on = values
            .get(&Param::EnableIntensifier)
            .and_then(|v| v.as_bool(Param::EnableIntensifier).ok())
            .unwrap_or(false);
        let modulation_on = values
            .get(&Param::EnableModulation)
            .and_then(|v| v.as_bool(Param::EnableModulation).ok())
            .unwrap_or(false);
        let external_trigger = values
            .get(&Param::TriggerSource)
            .and_then(|v| v.as_i32(Param::TriggerSource).ok())
            .and_then(TriggerSource::from_i32)
            == Some(TriggerSource::External);

        self.model
            .params
            .iter()
            .map(|spec| {
                let relevant = match spec.param {
                    Param::IntensifierGain | Param::GatingPulse => intensifier_on,
                    Param::ModulationSequence => modulation_on,
                    Param::TriggerThreshold => external_trigger,
                    _ => spec.initially_relevant,
                };
                (spec.param, relevant)
            })
            .collect()
    }

    /// Required constraint under the given committed values. Falls back to
    /// the capable constraint when no dependent rule narrows it.
    pub(crate) fn required_constraint(
        &self,
        param: Param,
        committed: &CommittedConfig,
    ) -> Constraint {
        let Some(spec) = self.model.spec(param) else {
            return Constraint::None;
        };
        match (param, &spec.capable) {
            // The gate pulse must fit inside the committed exposure window.
            (Param::GatingPulse, Constraint::Pulse(capable)) => {
                let exposure_ms = committed
                    .get(&Param::ExposureTime)
                    .and_then(|v| v.as_f64(Param::ExposureTime).ok())
                    .unwrap_or(0.0);
                let window_us = exposure_ms * 1000.0;
                let mut required = capable.clone();
                required.scope = ConstraintScope::Dependent;
                required.maximum_duration = required.maximum_duration.min(window_us);
                required.empty_set =
                    capable.empty_set || required.maximum_duration < required.minimum_duration;
                Constraint::Pulse(required)
            }
            // Gain means nothing while the intensifier stage is off.
            (Param::IntensifierGain, Constraint::Range(capable)) => {
                let on = committed
                    .get(&Param::EnableIntensifier)
                    .and_then(|v| v.as_bool(Param::EnableIntensifier).ok())
                    .unwrap_or(false);
                let mut required = capable.clone();
                required.empty_set = capable.empty_set || !on;
                Constraint::Range(required)
            }
            // The sequence is only constrained while modulation is enabled.
            (Param::ModulationSequence, Constraint::Modulations(capable)) => {
                let on = committed
                    .get(&Param::EnableModulation)
                    .and_then(|v| v.as_bool(Param::EnableModulation).ok())
                    .unwrap_or(false);
                let mut required = capable.clone();
                required.empty_set = capable.empty_set || !on;
                Constraint::Modulations(required)
            }
            // The threshold only applies with the external trigger selected.
            (Param::TriggerThreshold, Constraint::Range(capable)) => {
                let external = committed
                    .get(&Param::TriggerSource)
                    .and_then(|v| v.as_i32(Param::TriggerSource).ok())
                    .and_then(TriggerSource::from_i32)
                    == Some(TriggerSource::External);
                let mut required = capable.clone();
                required.empty_set = capable.empty_set || !external;
                Constraint::Range(required)
            }
            _ => spec.capable.clone(),
        }
    }

    pub(crate) fn require_spec(&self, param: Param) -> CamResult<&cam_core::model::ParamSpec> {
        self.model
            .spec(param)
            .ok_or(CamError::ParameterDoesNotExist(param))
    }
}

/// Recommended = Required with a range's outlying values excluded.
fn recommended_from_required(required: Constraint) -> Constraint {
    match required {
        Constraint::Range(mut range) => {
            let outlying = std::mem::take(&mut range.outlying_values);
            range.excluded_values.extend(outlying);
            Constraint::Range(range)
        }
        other => other,
    }
}

pub(crate) fn value_shape(value: &ParameterValue) -> cam_core::parameter::ValueType {
    use cam_core::parameter::ValueType;
    match value {
        ParameterValue::Integer(_) => ValueType::Integer,
        ParameterValue::LargeInteger(_) => ValueType::LargeInteger,
        ParameterValue::FloatingPoint(_) => ValueType::FloatingPoint,
        ParameterValue::Rois(_) => ValueType::Rois,
        ParameterValue::Pulse(_) => ValueType::Pulse,
        ParameterValue::Modulations(_) => ValueType::Modulations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::sim_model;
    use cam_core::constraint::RangeConstraint;
    use cam_core::model::CameraId;

    fn store() -> ParameterStore {
        ParameterStore::new(sim_model(CameraId {
            model: "SiL-2048B".to_string(),
            serial_number: "test".to_string(),
        }))
    }

    #[test]
    fn defaults_are_readable_before_any_commit() {
        let store = store();
        assert_eq!(store.get_f64(Param::ExposureTime).unwrap(), 100.0);
        // Derived geometry is computed from the default full-frame region.
        assert_eq!(store.get_i32(Param::FrameSize).unwrap(), 2048 * 2048 * 2);
        assert!(!store.are_parameters_committed());
    }

    #[test]
    fn reads_prefer_the_staged_value() {
        let store = store();
        store.set_f64(Param::ExposureTime, 10.0).unwrap();
        assert_eq!(store.get_f64(Param::ExposureTime).unwrap(), 10.0);
        // Committed snapshot is untouched until install.
        let snapshot = store.snapshot();
        assert_eq!(
            snapshot.values.get(&Param::ExposureTime),
            Some(&ParameterValue::FloatingPoint(100.0))
        );
    }

    #[test]
    fn can_set_is_false_for_irrelevant_parameters() {
        let store = store();
        assert!(!store.can_set_i32(Param::IntensifierGain, 10).unwrap());
        assert!(matches!(
            store.set_i32(Param::IntensifierGain, 10),
            Err(CamError::ParameterValueIsIrrelevant(Param::IntensifierGain))
        ));
    }

    #[test]
    fn defined_parameters_exclude_gated_dependents() {
        let store = store();
        let defined = store.defined_parameters();
        assert!(defined.contains(&Param::ExposureTime));
        assert!(!defined.contains(&Param::IntensifierGain));
        assert!(!defined.contains(&Param::TriggerThreshold));
    }

    #[test]
    fn recommended_moves_outlying_into_excluded() {
        let required = Constraint::Range(
            RangeConstraint::new(0.0, 10.0)
                .dependent()
                .with_outlying(vec![10.0]),
        );
        let recommended = recommended_from_required(required);
        let Constraint::Range(range) = recommended else {
            panic!("expected range");
        };
        assert!(range.outlying_values.is_empty());
        assert!(!range.validate(10.0));
        assert!(range.validate(9.0));
    }

    #[test]
    fn intensifier_gain_required_is_empty_while_gate_is_off() {
        let store = store();
        let committed = store.snapshot().values.clone();
        let required = store.required_constraint(Param::IntensifierGain, &committed);
        assert!(required.is_empty_set());
    }
}
