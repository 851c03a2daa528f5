//! Simulated transport for development and tests.
//!
//! [`SimTransport`] implements the full [`Transport`] seam against an
//! in-memory device: it reports a fixed 2048x2048 16-bit model, accepts
//! configuration pushes, and delivers synthetic readouts. By default readouts
//! are generated on a timer paced by the committed readout time; tests that
//! need exact control construct it with [`SimTransport::manual`] and inject
//! readouts and disconnects by hand.

use async_trait::async_trait;
use bytes::Bytes;
use cam_core::constraint::{
    CollectionConstraint, Constraint, ConstraintScope, ConstraintSeverity, ModulationsConstraint,
    PulseConstraint, RangeConstraint, RoisConstraint, RoisRules,
};
use cam_core::error::{CamError, CamResult};
use cam_core::model::{CameraId, CameraModel, ParamSpec};
use cam_core::parameter::Param;
use cam_core::transport::{CommittedConfig, DeviceRef, Transport, TransportEvent};
use cam_core::values::{Modulation, ParameterValue, Pulse, Roi};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

const SENSOR_WIDTH: i32 = 2048;
const SENSOR_HEIGHT: i32 = 2048;
const BIT_DEPTH: i32 = 16;
const ROW_READOUT_US: f64 = 10.0;

/// Capability table of the simulated model.
pub fn sim_model(id: CameraId) -> CameraModel {
    let full_sensor = vec![Roi::full(SENSOR_WIDTH, SENSOR_HEIGHT)];
    let on_off = || Constraint::Collection(CollectionConstraint::new(vec![0.0, 1.0]));

    let params = vec![
        ParamSpec::new(
            Param::ExposureTime,
            ParameterValue::FloatingPoint(100.0),
            Constraint::Range(RangeConstraint::new(0.0, 10_000.0)),
        )
        .online(),
        ParamSpec::new(
            Param::ReadoutCount,
            ParameterValue::LargeInteger(1),
            Constraint::Range(RangeConstraint::new(1.0, 1_000_000.0).with_increment(1.0)),
        ),
        ParamSpec::new(
            Param::Rois,
            ParameterValue::Rois(full_sensor),
            Constraint::Rois(RoisConstraint {
                scope: ConstraintScope::Independent,
                severity: ConstraintSeverity::Error,
                empty_set: false,
                rules: RoisRules::X_BINNING_ALIGNMENT | RoisRules::Y_BINNING_ALIGNMENT,
                x_constraint: RangeConstraint::new(0.0, f64::from(SENSOR_WIDTH - 1)),
                width_constraint: RangeConstraint::new(1.0, f64::from(SENSOR_WIDTH)),
                x_binning_limits: vec![1, 2, 4],
                y_constraint: RangeConstraint::new(0.0, f64::from(SENSOR_HEIGHT - 1)),
                height_constraint: RangeConstraint::new(1.0, f64::from(SENSOR_HEIGHT)),
                y_binning_limits: vec![1, 2, 4],
                maximum_roi_count: 4,
            }),
        ),
        ParamSpec::new(
            Param::TriggerSource,
            ParameterValue::Integer(1),
            Constraint::Collection(CollectionConstraint::new(vec![1.0, 2.0])),
        ),
        ParamSpec::new(
            Param::TriggerThreshold,
            ParameterValue::FloatingPoint(2.5),
            Constraint::Range(RangeConstraint::new(-10.0, 10.0).dependent()),
        )
        .initially_irrelevant(),
        ParamSpec::new(
            Param::AdcSpeed,
            ParameterValue::FloatingPoint(10.0),
            Constraint::Collection(CollectionConstraint::new(vec![20.0, 10.0, 5.0])),
        ),
        ParamSpec::new(
            Param::AdcAnalogGain,
            ParameterValue::Integer(2),
            Constraint::Collection(CollectionConstraint::new(vec![1.0, 2.0, 3.0])),
        )
        .trivial(),
        ParamSpec::new(
            Param::SensorTemperatureSetPoint,
            ParameterValue::FloatingPoint(-70.0),
            // Running the sensor warm is permitted but discouraged.
            Constraint::Range(RangeConstraint::new(-100.0, 25.0).with_outlying(vec![25.0])),
        ),
        ParamSpec::new(
            Param::SensorTemperatureReading,
            ParameterValue::FloatingPoint(-70.0),
            Constraint::None,
        )
        .read_only(),
        ParamSpec::new(
            Param::EnableIntensifier,
            ParameterValue::Integer(0),
            on_off(),
        ),
        ParamSpec::new(
            Param::IntensifierGain,
            ParameterValue::Integer(1),
            Constraint::Range(RangeConstraint::new(1.0, 100.0).with_increment(1.0).dependent()),
        )
        .initially_irrelevant(),
        ParamSpec::new(
            Param::GatingPulse,
            ParameterValue::Pulse(Pulse {
                delay: 0.0,
                width: 1.0,
            }),
            Constraint::Pulse(PulseConstraint {
                scope: ConstraintScope::Dependent,
                severity: ConstraintSeverity::Error,
                empty_set: false,
                delay_constraint: RangeConstraint::new(0.0, 1_000_000.0),
                width_constraint: RangeConstraint::new(0.01, 1_000_000.0),
                minimum_duration: 0.02,
                maximum_duration: 1_000_000.0,
            }),
        )
        .initially_irrelevant(),
        ParamSpec::new(Param::EnableModulation, ParameterValue::Integer(0), on_off()),
        ParamSpec::new(
            Param::ModulationSequence,
            ParameterValue::Modulations(vec![Modulation {
                duration: 1.0,
                frequency: 1.0,
                phase: 0.0,
                output_signal_frequency: 1.0,
            }]),
            Constraint::Modulations(ModulationsConstraint {
                scope: ConstraintScope::Dependent,
                severity: ConstraintSeverity::Error,
                empty_set: false,
                maximum_modulation_count: 16,
                duration_constraint: RangeConstraint::new(0.01, 10_000.0),
                frequency_constraint: RangeConstraint::new(0.001, 200.0),
                phase_constraint: RangeConstraint::new(0.0, 360.0),
                output_signal_frequency_constraint: RangeConstraint::new(0.001, 200.0),
            }),
        )
        .initially_irrelevant(),
        ParamSpec::new(Param::FrameSize, ParameterValue::Integer(0), Constraint::None).read_only(),
        ParamSpec::new(
            Param::FrameStride,
            ParameterValue::Integer(0),
            Constraint::None,
        )
        .read_only(),
        ParamSpec::new(
            Param::ReadoutStride,
            ParameterValue::Integer(0),
            Constraint::None,
        )
        .read_only(),
        ParamSpec::new(
            Param::ReadoutTimeCalculation,
            ParameterValue::FloatingPoint(0.0),
            Constraint::None,
        )
        .read_only(),
        ParamSpec::new(
            Param::OnlineReadoutRateCalculation,
            ParameterValue::FloatingPoint(0.0),
            Constraint::None,
        )
        .read_only(),
        ParamSpec::new(
            Param::SensorActiveWidth,
            ParameterValue::Integer(SENSOR_WIDTH),
            Constraint::None,
        )
        .read_only(),
        ParamSpec::new(
            Param::SensorActiveHeight,
            ParameterValue::Integer(SENSOR_HEIGHT),
            Constraint::None,
        )
        .read_only(),
        ParamSpec::new(
            Param::PixelBitDepth,
            ParameterValue::Integer(BIT_DEPTH),
            Constraint::None,
        )
        .read_only(),
    ];

    CameraModel {
        id,
        sensor_width: SENSOR_WIDTH,
        sensor_height: SENSOR_HEIGHT,
        bit_depth: BIT_DEPTH,
        row_readout_us: ROW_READOUT_US,
        params,
    }
}

struct SimDevice {
    id: CameraId,
    events: Option<mpsc::Sender<TransportEvent>>,
    delivery: Option<JoinHandle<()>>,
    /// Inter-readout period derived from the last committed configuration.
    frame_period: Duration,
}

struct SimInner {
    next_ref: u64,
    devices: HashMap<u64, SimDevice>,
}

/// In-memory transport backing one or more simulated cameras.
pub struct SimTransport {
    cameras: Vec<CameraId>,
    auto_frames: bool,
    inner: Mutex<SimInner>,
}

impl SimTransport {
    /// Transport that generates readouts on a timer once delivery starts.
    pub fn new() -> SimTransport {
        SimTransport::with_auto_frames(true)
    }

    /// Transport that only delivers what the test injects.
    pub fn manual() -> SimTransport {
        SimTransport::with_auto_frames(false)
    }

    fn with_auto_frames(auto_frames: bool) -> SimTransport {
        SimTransport {
            cameras: vec![CameraId {
                model: "SiL-2048B".to_string(),
                serial_number: "08675309".to_string(),
            }],
            auto_frames,
            inner: Mutex::new(SimInner {
                next_ref: 1,
                devices: HashMap::new(),
            }),
        }
    }

    fn event_sender(&self, device: DeviceRef) -> CamResult<mpsc::Sender<TransportEvent>> {
        let inner = self.inner.lock();
        let dev = inner
            .devices
            .get(&device.0)
            .ok_or(CamError::CameraClosed)?;
        dev.events.clone().ok_or(CamError::CameraClosed)
    }

    /// Device handles currently open, in opening order.
    pub fn open_devices(&self) -> Vec<DeviceRef> {
        let inner = self.inner.lock();
        let mut refs: Vec<u64> = inner.devices.keys().copied().collect();
        refs.sort_unstable();
        refs.into_iter().map(DeviceRef).collect()
    }

    /// Deliver one readout as if the sensor produced it.
    pub async fn inject_readout(&self, device: DeviceRef, data: Bytes) -> CamResult<()> {
        let tx = self.event_sender(device)?;
        tx.send(TransportEvent::Readout(data))
            .await
            .map_err(|_| CamError::CameraDisconnected)
    }

    /// Simulate the device dropping off the bus.
    pub async fn inject_disconnect(&self, device: DeviceRef) -> CamResult<()> {
        let tx = self.event_sender(device)?;
        tx.send(TransportEvent::Disconnected)
            .await
            .map_err(|_| CamError::CameraDisconnected)
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        SimTransport::new()
    }
}

/// Synthetic readout payload: a session frame counter followed by a ramp.
fn synth_readout(frame: u64, stride: usize) -> Bytes {
    let mut data = vec![0u8; stride];
    let counter = frame.to_le_bytes();
    let n = counter.len().min(stride);
    data[..n].copy_from_slice(&counter[..n]);
    for (i, byte) in data.iter_mut().enumerate().skip(n) {
        *byte = (frame as usize + i) as u8;
    }
    Bytes::from(data)
}

#[async_trait]
impl Transport for SimTransport {
    async fn available_cameras(&self) -> Vec<CameraId> {
        self.cameras.clone()
    }

    async fn open_device(&self, id: &CameraId) -> CamResult<DeviceRef> {
        if !self.cameras.contains(id) {
            return Err(CamError::InvalidCameraId(id.to_string()));
        }
        let mut inner = self.inner.lock();
        let device = DeviceRef(inner.next_ref);
        inner.next_ref += 1;
        inner.devices.insert(
            device.0,
            SimDevice {
                id: id.clone(),
                events: None,
                delivery: None,
                frame_period: Duration::from_millis(100),
            },
        );
        debug!(%id, device = device.0, "sim device opened");
        Ok(device)
    }

    async fn close_device(&self, device: DeviceRef) -> CamResult<()> {
        let mut inner = self.inner.lock();
        if let Some(dev) = inner.devices.remove(&device.0) {
            if let Some(task) = dev.delivery {
                task.abort();
            }
            debug!(id = %dev.id, device = device.0, "sim device closed");
        }
        Ok(())
    }

    async fn query_capabilities(&self, device: DeviceRef) -> CamResult<CameraModel> {
        let inner = self.inner.lock();
        let dev = inner
            .devices
            .get(&device.0)
            .ok_or(CamError::CameraClosed)?;
        Ok(sim_model(dev.id.clone()))
    }

    async fn push_committed_config(
        &self,
        device: DeviceRef,
        config: &CommittedConfig,
    ) -> CamResult<()> {
        let readout_ms = config
            .get(&Param::ReadoutTimeCalculation)
            .and_then(|v| v.as_f64(Param::ReadoutTimeCalculation).ok())
            .unwrap_or(100.0);
        let mut inner = self.inner.lock();
        let dev = inner
            .devices
            .get_mut(&device.0)
            .ok_or(CamError::CameraClosed)?;
        dev.frame_period = Duration::from_secs_f64((readout_ms / 1000.0).max(0.001));
        debug!(device = device.0, readout_ms, "sim config committed");
        Ok(())
    }

    async fn push_online_update(
        &self,
        device: DeviceRef,
        param: Param,
        value: ParameterValue,
    ) -> CamResult<()> {
        let inner = self.inner.lock();
        if !inner.devices.contains_key(&device.0) {
            return Err(CamError::CameraClosed);
        }
        debug!(device = device.0, %param, ?value, "sim online update");
        Ok(())
    }

    async fn subscribe_events(
        &self,
        device: DeviceRef,
    ) -> CamResult<mpsc::Receiver<TransportEvent>> {
        let (tx, rx) = mpsc::channel(64);
        let mut inner = self.inner.lock();
        let dev = inner
            .devices
            .get_mut(&device.0)
            .ok_or(CamError::CameraClosed)?;
        dev.events = Some(tx);
        Ok(rx)
    }

    async fn start_delivery(&self, device: DeviceRef, readout_stride: usize) -> CamResult<()> {
        let mut inner = self.inner.lock();
        let dev = inner
            .devices
            .get_mut(&device.0)
            .ok_or(CamError::CameraClosed)?;
        if let Some(task) = dev.delivery.take() {
            task.abort();
        }
        if !self.auto_frames {
            return Ok(());
        }
        let events = dev.events.clone().ok_or(CamError::CameraClosed)?;
        let period = dev.frame_period;
        dev.delivery = Some(tokio::spawn(async move {
            let mut frame: u64 = 0;
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let readout = synth_readout(frame, readout_stride);
                if events.send(TransportEvent::Readout(readout)).await.is_err() {
                    break;
                }
                frame += 1;
            }
        }));
        Ok(())
    }

    async fn stop_delivery(&self, device: DeviceRef) -> CamResult<()> {
        let mut inner = self.inner.lock();
        if let Some(dev) = inner.devices.get_mut(&device.0) {
            if let Some(task) = dev.delivery.take() {
                task.abort();
            }
        }
        Ok(())
    }
}
