//! Camera control layer for scientific imaging sensors.
//!
//! The control layer sits between an application and the driver/firmware
//! boundary (the [`Transport`] seam from `cam-core`). It owns the parameter
//! store, the all-or-nothing commit protocol, and the acquisition engine with
//! its buffered readout delivery.
//!
//! Typical flow:
//!
//! ```no_run
//! use cam_control::{CameraLibrary, sim::SimTransport};
//! use cam_core::Param;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> cam_core::CamResult<()> {
//! let library = CameraLibrary::new(Arc::new(SimTransport::new()));
//! let id = library.available_cameras().await.remove(0);
//! let camera = library.open(&id).await?;
//!
//! camera.set_f64(Param::ExposureTime, 10.0)?;
//! camera.commit().await?;
//! camera.start_acquisition().await?;
//! let (data, status) = camera
//!     .wait_for_acquisition_update(Some(Duration::from_secs(1)))
//!     .await?;
//! camera.stop_acquisition().await?;
//! # let _ = (data, status);
//! # Ok(())
//! # }
//! ```
//!
//! Parameter reads and staging are synchronous (the store never touches the
//! device); commit, acquisition control and the online path are async because
//! they cross the transport.

pub mod components;
pub mod sim;

pub use components::acquisition::{
    AcquisitionStatus, AvailableData, ErrorsMask, DEFAULT_BUFFER_READOUTS,
};
pub use components::readout_ring::Readout;
pub use components::store::Snapshot;

use components::acquisition::AcquisitionEngine;
use components::store::ParameterStore;
use cam_core::constraint::{Constraint, ConstraintCategory};
use cam_core::error::{CamError, CamResult};
use cam_core::model::{CameraId, CameraModel};
use cam_core::parameter::{AccessMode, Param};
use cam_core::transport::{DeviceRef, Transport, TransportEvent};
use cam_core::values::{Modulation, ParameterValue, Pulse, Roi};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Entry point: camera discovery and session creation over one transport.
pub struct CameraLibrary {
    transport: Arc<dyn Transport>,
}

impl CameraLibrary {
    pub fn new(transport: Arc<dyn Transport>) -> CameraLibrary {
        CameraLibrary { transport }
    }

    /// Cameras currently reachable through the transport.
    pub async fn available_cameras(&self) -> Vec<CameraId> {
        self.transport.available_cameras().await
    }

    /// Open a camera session: create the device handle, fetch its capability
    /// table, build parameter records from the factory defaults and start the
    /// event pump.
    pub async fn open(&self, id: &CameraId) -> CamResult<Camera> {
        let device = self.transport.open_device(id).await?;
        let model = match self.transport.query_capabilities(device).await {
            Ok(model) => model,
            Err(e) => {
                let _ = self.transport.close_device(device).await;
                return Err(e);
            }
        };
        let mut events = self.transport.subscribe_events(device).await?;

        let store = Arc::new(ParameterStore::new(model));
        let engine = Arc::new(AcquisitionEngine::new());

        let pump_engine = engine.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::Readout(data) => pump_engine.push_readout(data),
                    TransportEvent::Disconnected => {
                        warn!("device disconnected");
                        pump_engine.force_disconnect();
                    }
                }
            }
        });

        info!(%id, "camera opened");
        Ok(Camera {
            id: id.clone(),
            device,
            transport: self.transport.clone(),
            store,
            engine,
            commit_lock: tokio::sync::Mutex::new(()),
            pump: parking_lot::Mutex::new(Some(pump)),
            closed: AtomicBool::new(false),
        })
    }
}

/// One open camera session.
///
/// All parameter staging happens locally; nothing reaches the device until
/// [`commit`](Camera::commit) (or the narrow online path) pushes it.
pub struct Camera {
    id: CameraId,
    device: DeviceRef,
    transport: Arc<dyn Transport>,
    store: Arc<ParameterStore>,
    engine: Arc<AcquisitionEngine>,
    /// Serializes commits so two callers cannot interleave validate/install.
    commit_lock: tokio::sync::Mutex<()>,
    pump: parking_lot::Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Camera {
    pub fn id(&self) -> &CameraId {
        &self.id
    }

    pub fn model(&self) -> &CameraModel {
        self.store.model()
    }

    fn ensure_open(&self) -> CamResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CamError::CameraClosed);
        }
        Ok(())
    }

    // =========================================================================
    // Parameter queries and staging (local, synchronous)
    // =========================================================================

    /// Parameters relevant under the committed configuration.
    pub fn defined_parameters(&self) -> Vec<Param> {
        self.store.defined_parameters()
    }

    pub fn is_relevant(&self, param: Param) -> CamResult<bool> {
        self.ensure_open()?;
        self.store.is_relevant(param)
    }

    pub fn access(&self, param: Param) -> CamResult<AccessMode> {
        self.ensure_open()?;
        self.store.access(param)
    }

    pub fn default_value(&self, param: Param) -> CamResult<ParameterValue> {
        self.ensure_open()?;
        self.store.default_value(param)
    }

    /// Constraint under the requested category (Capable, Required or
    /// Recommended).
    pub fn constraint(&self, param: Param, category: ConstraintCategory) -> CamResult<Constraint> {
        self.ensure_open()?;
        self.store.constraint(param, category)
    }

    pub fn get_f64(&self, param: Param) -> CamResult<f64> {
        self.ensure_open()?;
        self.store.get_f64(param)
    }

    pub fn set_f64(&self, param: Param, value: f64) -> CamResult<()> {
        self.ensure_open()?;
        self.store.set_f64(param, value)
    }

    pub fn can_set_f64(&self, param: Param, value: f64) -> CamResult<bool> {
        self.ensure_open()?;
        self.store.can_set_f64(param, value)
    }

    pub fn get_i32(&self, param: Param) -> CamResult<i32> {
        self.ensure_open()?;
        self.store.get_i32(param)
    }

    pub fn set_i32(&self, param: Param, value: i32) -> CamResult<()> {
        self.ensure_open()?;
        self.store.set_i32(param, value)
    }

    pub fn can_set_i32(&self, param: Param, value: i32) -> CamResult<bool> {
        self.ensure_open()?;
        self.store.can_set_i32(param, value)
    }

    pub fn get_i64(&self, param: Param) -> CamResult<i64> {
        self.ensure_open()?;
        self.store.get_i64(param)
    }

    pub fn set_i64(&self, param: Param, value: i64) -> CamResult<()> {
        self.ensure_open()?;
        self.store.set_i64(param, value)
    }

    pub fn can_set_i64(&self, param: Param, value: i64) -> CamResult<bool> {
        self.ensure_open()?;
        self.store.can_set_i64(param, value)
    }

    pub fn get_bool(&self, param: Param) -> CamResult<bool> {
        self.ensure_open()?;
        self.store.get_bool(param)
    }

    pub fn set_bool(&self, param: Param, value: bool) -> CamResult<()> {
        self.ensure_open()?;
        self.store.set_bool(param, value)
    }

    pub fn get_rois(&self, param: Param) -> CamResult<Vec<Roi>> {
        self.ensure_open()?;
        self.store.get_rois(param)
    }

    pub fn set_rois(&self, param: Param, regions: Vec<Roi>) -> CamResult<()> {
        self.ensure_open()?;
        self.store.set_rois(param, regions)
    }

    pub fn get_pulse(&self, param: Param) -> CamResult<Pulse> {
        self.ensure_open()?;
        self.store.get_pulse(param)
    }

    pub fn set_pulse(&self, param: Param, pulse: Pulse) -> CamResult<()> {
        self.ensure_open()?;
        self.store.set_pulse(param, pulse)
    }

    pub fn get_modulations(&self, param: Param) -> CamResult<Vec<Modulation>> {
        self.ensure_open()?;
        self.store.get_modulations(param)
    }

    pub fn set_modulations(&self, param: Param, sequence: Vec<Modulation>) -> CamResult<()> {
        self.ensure_open()?;
        self.store.set_modulations(param, sequence)
    }

    // =========================================================================
    // Commit protocol
    // =========================================================================

    /// Whether no staged values are outstanding. False until the first
    /// successful commit after open.
    pub fn are_parameters_committed(&self) -> bool {
        self.store.are_parameters_committed()
    }

    /// Validate the whole staged group against the candidate committed state,
    /// push it to the device, and promote it atomically.
    ///
    /// All-or-nothing: a validation failure lists every offending parameter
    /// in [`CamError::InvalidParameterValues`] and leaves both committed and
    /// staged state untouched. Committing with nothing staged succeeds.
    pub async fn commit(&self) -> CamResult<()> {
        self.ensure_open()?;
        let _guard = self.commit_lock.lock().await;
        let prepared = self.store.validate_pending()?;
        self.transport
            .push_committed_config(self.device, &prepared.snapshot.values)
            .await?;
        let staged = prepared.staged.len();
        self.store.install(prepared);
        info!(camera = %self.id, staged, "parameters committed");
        Ok(())
    }

    /// Push one online-capable parameter straight into committed state, with
    /// validation but without the staging round trip. Usable mid-acquisition.
    pub async fn set_online_f64(&self, param: Param, value: f64) -> CamResult<()> {
        self.ensure_open()?;
        // Serialized with commit: a config push in flight must not rebuild
        // the snapshot from pre-update values and drop this write.
        let _guard = self.commit_lock.lock().await;
        self.store.set_online_f64(param, value)?;
        self.transport
            .push_online_update(self.device, param, ParameterValue::FloatingPoint(value))
            .await
    }

    // =========================================================================
    // Acquisition
    // =========================================================================

    pub fn is_acquisition_running(&self) -> bool {
        self.engine.is_running()
    }

    pub fn acquisition_status(&self) -> AcquisitionStatus {
        self.engine.status()
    }

    /// Resize the readout ring used by the next acquisition.
    pub fn set_readout_buffer_slots(&self, slots: usize) {
        self.engine.set_buffer_readouts(slots);
    }

    /// Readouts still resident in the ring, including consumed ones. This is
    /// how partial data stays reachable after a timed-out acquire.
    pub fn buffered_readouts(&self) -> Vec<Readout> {
        self.engine.resident_readouts()
    }

    /// Begin asynchronous acquisition under the committed configuration.
    ///
    /// Refused while uncommitted changes exist or a run is already active.
    pub async fn start_acquisition(&self) -> CamResult<()> {
        self.ensure_open()?;
        if !self.store.are_parameters_committed() {
            return Err(CamError::ParametersNotCommitted);
        }
        let stride = self.store.get_i32(Param::ReadoutStride)? as usize;
        self.engine.start(stride)?;
        if let Err(e) = self.transport.start_delivery(self.device, stride).await {
            let _ = self.engine.stop();
            return Err(e);
        }
        info!(camera = %self.id, stride, "acquisition started");
        Ok(())
    }

    /// End the current run. Buffered readouts stay readable until the next
    /// start.
    pub async fn stop_acquisition(&self) -> CamResult<()> {
        self.ensure_open()?;
        self.engine.stop()?;
        self.transport.stop_delivery(self.device).await?;
        info!(camera = %self.id, "acquisition stopped");
        Ok(())
    }

    /// Block until new readouts arrive, the run ends, or the timeout lapses.
    ///
    /// `None` waits indefinitely; `Some(Duration::ZERO)` polls. A stopped run
    /// yields an empty `Ok` carrying the final status.
    pub async fn wait_for_acquisition_update(
        &self,
        timeout: Option<Duration>,
    ) -> CamResult<(AvailableData, AcquisitionStatus)> {
        self.ensure_open()?;
        self.engine.wait_for_update(timeout).await
    }

    /// Synchronous convenience capture: start, gather at least
    /// `readout_count` readouts, stop.
    ///
    /// `timeout` bounds each individual wait; a full window with no data
    /// fails with [`CamError::TimeOutOccurred`] (already-buffered readouts
    /// stay reachable via [`buffered_readouts`](Camera::buffered_readouts)).
    /// If the run ends early (disconnect), the partial data is returned with
    /// the errors mask raised.
    pub async fn acquire(
        &self,
        readout_count: i64,
        timeout: Option<Duration>,
    ) -> CamResult<(AvailableData, ErrorsMask)> {
        self.ensure_open()?;
        if readout_count <= 0 {
            return Err(CamError::InvalidReadoutCount(readout_count));
        }
        self.start_acquisition().await?;

        let mut collected = AvailableData::default();
        let mut errors = ErrorsMask::NONE;
        let outcome = loop {
            match self.wait_for_acquisition_update(timeout).await {
                Ok((data, status)) => {
                    errors.insert(status.errors);
                    if collected.readouts.is_empty() {
                        collected.initial_readout = data.initial_readout;
                    }
                    collected.readouts.extend(data.readouts);
                    if collected.readouts.len() as i64 >= readout_count {
                        break Ok(());
                    }
                    if !status.running {
                        // Run ended underneath us; hand back what arrived.
                        break Ok(());
                    }
                }
                Err(e) => break Err(e),
            }
        };

        // Idle here just means a disconnect already ended the run.
        let _ = self.engine.stop();
        // The capture itself succeeded or failed on its own terms; a refused
        // delivery stop must not discard the readouts already collected.
        if let Err(e) = self.transport.stop_delivery(self.device).await {
            warn!(camera = %self.id, error = %e, "failed to stop delivery after capture");
        }

        outcome?;
        Ok((collected, errors))
    }

    // =========================================================================
    // Session teardown
    // =========================================================================

    /// Close the session: stop any run, stop the event pump and release the
    /// device. Idempotent.
    pub async fn close(&self) -> CamResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _ = self.engine.stop();
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        let _ = self.transport.stop_delivery(self.device).await;
        self.transport.close_device(self.device).await?;
        info!(camera = %self.id, "camera closed");
        Ok(())
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        if !self.closed.load(Ordering::Acquire) {
            warn!(camera = %self.id, "camera dropped without close(); device session leaked");
        }
    }
}
