//! Integration tests for the camera control layer, driven end to end through
//! the simulated transport.

use async_trait::async_trait;
use cam_control::{Camera, CameraLibrary, ErrorsMask};
use cam_control::sim::SimTransport;
use cam_core::constraint::{Constraint, ConstraintCategory};
use cam_core::transport::{CommittedConfig, DeviceRef, Transport, TransportEvent};
use cam_core::{CamError, CamResult, CameraId, CameraModel, Param, ParameterValue, Pulse, Roi};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const FULL_FRAME_BYTES: i32 = 2048 * 2048 * 2;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Transport wrapper that misbehaves on demand: a slow committed-config push
/// and/or a delivery stop the device refuses.
struct FaultyTransport {
    inner: Arc<SimTransport>,
    commit_delay: Duration,
    fail_stop_delivery: bool,
}

#[async_trait]
impl Transport for FaultyTransport {
    async fn available_cameras(&self) -> Vec<CameraId> {
        self.inner.available_cameras().await
    }

    async fn open_device(&self, id: &CameraId) -> CamResult<DeviceRef> {
        self.inner.open_device(id).await
    }

    async fn close_device(&self, device: DeviceRef) -> CamResult<()> {
        self.inner.close_device(device).await
    }

    async fn query_capabilities(&self, device: DeviceRef) -> CamResult<CameraModel> {
        self.inner.query_capabilities(device).await
    }

    async fn push_committed_config(
        &self,
        device: DeviceRef,
        config: &CommittedConfig,
    ) -> CamResult<()> {
        tokio::time::sleep(self.commit_delay).await;
        self.inner.push_committed_config(device, config).await
    }

    async fn push_online_update(
        &self,
        device: DeviceRef,
        param: Param,
        value: ParameterValue,
    ) -> CamResult<()> {
        self.inner.push_online_update(device, param, value).await
    }

    async fn subscribe_events(
        &self,
        device: DeviceRef,
    ) -> CamResult<mpsc::Receiver<TransportEvent>> {
        self.inner.subscribe_events(device).await
    }

    async fn start_delivery(&self, device: DeviceRef, readout_stride: usize) -> CamResult<()> {
        self.inner.start_delivery(device, readout_stride).await
    }

    async fn stop_delivery(&self, device: DeviceRef) -> CamResult<()> {
        if self.fail_stop_delivery {
            return Err(CamError::Transport("delivery stop refused".to_string()));
        }
        self.inner.stop_delivery(device).await
    }
}

async fn open_manual() -> (Arc<SimTransport>, Camera, DeviceRef) {
    let transport = Arc::new(SimTransport::manual());
    let library = CameraLibrary::new(transport.clone());
    let id = library.available_cameras().await.remove(0);
    let camera = library.open(&id).await.unwrap();
    let device = transport.open_devices().remove(0);
    (transport, camera, device)
}

fn payload(byte: u8) -> bytes::Bytes {
    bytes::Bytes::from(vec![byte; 16])
}

// =============================================================================
// Parameters and constraints
// =============================================================================

#[tokio::test]
async fn range_endpoints_are_settable_and_beyond_is_not() {
    let (_t, camera, _d) = open_manual().await;

    assert!(camera.can_set_f64(Param::ExposureTime, 0.0).unwrap());
    assert!(camera.can_set_f64(Param::ExposureTime, 10_000.0).unwrap());
    assert!(!camera.can_set_f64(Param::ExposureTime, 10_000.1).unwrap());
    assert!(!camera.can_set_f64(Param::ExposureTime, -0.1).unwrap());

    // Integer range with increment 1: one past the maximum fails.
    assert!(camera.can_set_i64(Param::ReadoutCount, 1).unwrap());
    assert!(camera.can_set_i64(Param::ReadoutCount, 1_000_000).unwrap());
    assert!(!camera.can_set_i64(Param::ReadoutCount, 1_000_001).unwrap());
    assert!(!camera.can_set_i64(Param::ReadoutCount, 0).unwrap());
}

#[tokio::test]
async fn set_stages_without_touching_committed_state() {
    let (_t, camera, _d) = open_manual().await;
    camera.commit().await.unwrap();

    camera.set_f64(Param::ExposureTime, 42.0).unwrap();
    // Reads see the staged value; committed state is untouched.
    assert_eq!(camera.get_f64(Param::ExposureTime).unwrap(), 42.0);
    assert!(!camera.are_parameters_committed());

    camera.commit().await.unwrap();
    assert!(camera.are_parameters_committed());
    assert_eq!(camera.get_f64(Param::ExposureTime).unwrap(), 42.0);
}

#[tokio::test]
async fn invalid_set_is_rejected_eagerly() {
    let (_t, camera, _d) = open_manual().await;
    let err = camera.set_f64(Param::ExposureTime, -5.0).unwrap_err();
    assert_eq!(err, CamError::InvalidParameterValue(Param::ExposureTime));

    // Collection membership.
    let err = camera.set_f64(Param::AdcSpeed, 7.5).unwrap_err();
    assert_eq!(err, CamError::InvalidParameterValue(Param::AdcSpeed));
}

#[tokio::test]
async fn read_only_parameters_refuse_writes() {
    let (_t, camera, _d) = open_manual().await;
    let err = camera.set_i32(Param::FrameSize, 1).unwrap_err();
    assert_eq!(err, CamError::ParameterValueIsReadOnly(Param::FrameSize));
}

#[tokio::test]
async fn mistyped_access_is_an_identity_error() {
    let (_t, camera, _d) = open_manual().await;
    // ReadoutCount is a large integer; a float accessor is a caller bug, not
    // a value problem, so even can_set errors.
    assert!(matches!(
        camera.can_set_f64(Param::ReadoutCount, 1.0),
        Err(CamError::ParameterTypeMismatch { .. })
    ));
    assert!(matches!(
        camera.get_f64(Param::ReadoutCount),
        Err(CamError::ParameterTypeMismatch { .. })
    ));
}

#[tokio::test]
async fn required_category_is_refused_for_independent_constraints() {
    let (_t, camera, _d) = open_manual().await;
    assert!(matches!(
        camera.constraint(Param::ExposureTime, ConstraintCategory::Required),
        Err(CamError::InvalidConstraintCategory(Param::ExposureTime))
    ));
    // Capable always answers.
    assert!(matches!(
        camera.constraint(Param::ExposureTime, ConstraintCategory::Capable),
        Ok(Constraint::Range(_))
    ));
}

#[tokio::test]
async fn gating_pulse_required_window_tracks_committed_exposure() {
    let (_t, camera, _d) = open_manual().await;
    camera.set_bool(Param::EnableIntensifier, true).unwrap();
    camera.set_f64(Param::ExposureTime, 10.0).unwrap();
    camera.commit().await.unwrap();

    let constraint = camera
        .constraint(Param::GatingPulse, ConstraintCategory::Required)
        .unwrap();
    let Constraint::Pulse(pulse) = constraint else {
        panic!("expected pulse constraint");
    };
    // 10 ms of exposure caps the pulse window at 10_000 us.
    assert_eq!(pulse.maximum_duration, 10_000.0);

    assert!(camera
        .set_pulse(
            Param::GatingPulse,
            Pulse {
                delay: 0.0,
                width: 5_000.0
            }
        )
        .is_ok());
    let err = camera
        .set_pulse(
            Param::GatingPulse,
            Pulse {
                delay: 0.0,
                width: 50_000.0
            }
        )
        .unwrap_err();
    assert_eq!(err, CamError::InvalidParameterValue(Param::GatingPulse));
}

// =============================================================================
// Relevance
// =============================================================================

#[tokio::test]
async fn relevance_follows_committed_gate_parameters() {
    let (_t, camera, _d) = open_manual().await;
    camera.commit().await.unwrap();

    assert!(!camera.is_relevant(Param::IntensifierGain).unwrap());
    let err = camera.set_i32(Param::IntensifierGain, 10).unwrap_err();
    assert_eq!(
        err,
        CamError::ParameterValueIsIrrelevant(Param::IntensifierGain)
    );
    assert!(!camera
        .defined_parameters()
        .contains(&Param::IntensifierGain));

    // Staging the gate alone changes nothing until commit.
    camera.set_bool(Param::EnableIntensifier, true).unwrap();
    assert!(!camera.is_relevant(Param::IntensifierGain).unwrap());

    camera.commit().await.unwrap();
    assert!(camera.is_relevant(Param::IntensifierGain).unwrap());
    camera.set_i32(Param::IntensifierGain, 10).unwrap();
    camera.commit().await.unwrap();

    // Turning the gate back off makes the dependents irrelevant again.
    camera.set_bool(Param::EnableIntensifier, false).unwrap();
    camera.commit().await.unwrap();
    assert!(!camera.is_relevant(Param::IntensifierGain).unwrap());
}

// =============================================================================
// Commit protocol
// =============================================================================

#[tokio::test]
async fn commit_is_all_or_nothing_and_names_the_offenders() {
    let (_t, camera, _d) = open_manual().await;
    camera.set_bool(Param::EnableIntensifier, true).unwrap();
    camera.commit().await.unwrap();

    // Valid against today's committed exposure (100 ms window)...
    camera
        .set_pulse(
            Param::GatingPulse,
            Pulse {
                delay: 0.0,
                width: 50_000.0,
            },
        )
        .unwrap();
    // ...but the group also shrinks the exposure to 10 ms.
    camera.set_f64(Param::ExposureTime, 10.0).unwrap();

    let err = camera.commit().await.unwrap_err();
    assert_eq!(err, CamError::InvalidParameterValues(vec![Param::GatingPulse]));

    // Nothing moved: committed exposure is still the default, and the staged
    // group is intact for correction.
    assert!(!camera.are_parameters_committed());
    assert_eq!(camera.get_f64(Param::ExposureTime).unwrap(), 10.0);

    camera
        .set_pulse(
            Param::GatingPulse,
            Pulse {
                delay: 0.0,
                width: 5_000.0,
            },
        )
        .unwrap();
    camera.commit().await.unwrap();
    assert!(camera.are_parameters_committed());
}

#[tokio::test]
async fn commit_with_nothing_staged_is_trivial() {
    let (_t, camera, _d) = open_manual().await;
    camera.commit().await.unwrap();
    camera.commit().await.unwrap();
    assert!(camera.are_parameters_committed());
}

#[tokio::test]
async fn derived_parameters_recompute_on_commit() {
    let (_t, camera, _d) = open_manual().await;
    camera.set_f64(Param::ExposureTime, 10.0).unwrap();
    camera.commit().await.unwrap();

    assert_eq!(camera.get_i32(Param::FrameSize).unwrap(), FULL_FRAME_BYTES);
    assert_eq!(
        camera.get_i32(Param::ReadoutStride).unwrap(),
        FULL_FRAME_BYTES
    );
    // 10 ms exposure + 2048 rows at 10 us each.
    let readout_ms = camera.get_f64(Param::ReadoutTimeCalculation).unwrap();
    assert!((readout_ms - 30.48).abs() < 1e-9);
    let rate = camera.get_f64(Param::OnlineReadoutRateCalculation).unwrap();
    assert!((rate - 1000.0 / 30.48).abs() < 1e-9);

    // A binned sub-region shrinks the frame accordingly.
    camera
        .set_rois(
            Param::Rois,
            vec![Roi {
                x: 0,
                width: 512,
                x_binning: 2,
                y: 0,
                height: 512,
                y_binning: 2,
            }],
        )
        .unwrap();
    camera.commit().await.unwrap();
    assert_eq!(camera.get_i32(Param::FrameSize).unwrap(), 256 * 256 * 2);
}

// =============================================================================
// Acquisition lifecycle
// =============================================================================

#[tokio::test]
async fn start_requires_a_committed_configuration() {
    let (_t, camera, _d) = open_manual().await;

    let err = camera.start_acquisition().await.unwrap_err();
    assert_eq!(err, CamError::ParametersNotCommitted);

    camera.commit().await.unwrap();
    camera.start_acquisition().await.unwrap();
    assert!(camera.is_acquisition_running());

    let err = camera.start_acquisition().await.unwrap_err();
    assert_eq!(err, CamError::AcquisitionInProgress);

    camera.stop_acquisition().await.unwrap();
    let err = camera.stop_acquisition().await.unwrap_err();
    assert_eq!(err, CamError::AcquisitionNotInProgress);
}

#[tokio::test]
async fn wait_after_stop_reports_stopped_without_error() {
    let (_t, camera, _d) = open_manual().await;
    camera.commit().await.unwrap();
    camera.start_acquisition().await.unwrap();
    camera.stop_acquisition().await.unwrap();

    let (data, status) = camera
        .wait_for_acquisition_update(Some(Duration::ZERO))
        .await
        .unwrap();
    assert!(data.is_empty());
    assert!(!status.running);
    assert!(status.errors.is_empty());
}

#[tokio::test]
async fn injected_readouts_flow_through_wait() {
    let (transport, camera, device) = open_manual().await;
    camera.set_f64(Param::ExposureTime, 10.0).unwrap();
    camera.commit().await.unwrap();
    camera.start_acquisition().await.unwrap();
    assert!(camera.is_acquisition_running());

    transport.inject_readout(device, payload(1)).await.unwrap();
    transport.inject_readout(device, payload(2)).await.unwrap();
    transport.inject_readout(device, payload(3)).await.unwrap();
    // Let the event pump drain all three before observing.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (data, status) = camera
        .wait_for_acquisition_update(Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert!(status.running);
    assert!(status.errors.is_empty());
    assert_eq!(data.readout_count(), 3);
    assert_eq!(data.initial_readout, 0);
    assert_eq!(data.readouts[2].data, payload(3));

    camera.stop_acquisition().await.unwrap();
    assert!(!camera.is_acquisition_running());
}

#[tokio::test]
async fn overrunning_a_small_buffer_raises_data_lost() {
    let (transport, camera, device) = open_manual().await;
    camera.set_readout_buffer_slots(2);
    camera.commit().await.unwrap();
    camera.start_acquisition().await.unwrap();

    for i in 0..3 {
        transport.inject_readout(device, payload(i)).await.unwrap();
    }
    // Let the event pump drain all three before observing.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (data, status) = camera
        .wait_for_acquisition_update(Some(Duration::ZERO))
        .await
        .unwrap();
    assert!(status.errors.contains(ErrorsMask::DATA_LOST));
    assert_eq!(data.readout_count(), 2);
    // The oldest readout was overwritten; delivery resumes at index 1.
    assert_eq!(data.initial_readout, 1);

    camera.stop_acquisition().await.unwrap();
}

#[tokio::test]
async fn disconnect_stops_the_run_and_raises_connection_lost() {
    let (transport, camera, device) = open_manual().await;
    camera.commit().await.unwrap();
    camera.start_acquisition().await.unwrap();

    transport.inject_disconnect(device).await.unwrap();

    let (data, status) = camera
        .wait_for_acquisition_update(Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert!(data.is_empty());
    assert!(!status.running);
    assert!(status.errors.contains(ErrorsMask::CONNECTION_LOST));
    assert!(!camera.is_acquisition_running());
}

#[tokio::test]
async fn timed_out_acquire_leaves_partial_data_reachable() {
    let (transport, camera, device) = open_manual().await;
    camera.commit().await.unwrap();

    let injector = {
        let transport = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = transport.inject_readout(device, payload(1)).await;
            let _ = transport.inject_readout(device, payload(2)).await;
        })
    };

    // Two readouts arrive, then nothing for a full window.
    let err = camera
        .acquire(5, Some(Duration::from_millis(200)))
        .await
        .unwrap_err();
    assert_eq!(err, CamError::TimeOutOccurred);
    injector.await.unwrap();

    let resident = camera.buffered_readouts();
    assert_eq!(resident.len(), 2);
    assert_eq!(resident[0].data, payload(1));
}

#[tokio::test]
async fn invalid_readout_count_is_refused() {
    let (_t, camera, _d) = open_manual().await;
    camera.commit().await.unwrap();
    let err = camera.acquire(0, Some(Duration::from_millis(10))).await.unwrap_err();
    assert_eq!(err, CamError::InvalidReadoutCount(0));
}

// =============================================================================
// Online path
// =============================================================================

#[tokio::test]
async fn online_set_lands_in_committed_state_mid_run() {
    let (_t, camera, _d) = open_manual().await;
    camera.set_f64(Param::ExposureTime, 10.0).unwrap();
    camera.commit().await.unwrap();
    camera.start_acquisition().await.unwrap();

    camera
        .set_online_f64(Param::ExposureTime, 20.0)
        .await
        .unwrap();
    assert_eq!(camera.get_f64(Param::ExposureTime).unwrap(), 20.0);
    // No staging happened; the camera is still fully committed.
    assert!(camera.are_parameters_committed());
    // Derived timing follows the online change.
    let readout_ms = camera.get_f64(Param::ReadoutTimeCalculation).unwrap();
    assert!((readout_ms - 40.48).abs() < 1e-9);

    camera.stop_acquisition().await.unwrap();
}

#[tokio::test]
async fn online_set_is_refused_for_offline_parameters() {
    let (_t, camera, _d) = open_manual().await;
    camera.commit().await.unwrap();
    let err = camera
        .set_online_f64(Param::SensorTemperatureSetPoint, -60.0)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        CamError::ParameterIsNotOnlineable(Param::SensorTemperatureSetPoint)
    );
}

#[tokio::test]
async fn online_update_survives_a_concurrent_commit() {
    init_tracing();
    let sim = Arc::new(SimTransport::manual());
    let transport = Arc::new(FaultyTransport {
        inner: sim,
        commit_delay: Duration::from_millis(100),
        fail_stop_delivery: false,
    });
    let library = CameraLibrary::new(transport);
    let id = library.available_cameras().await.remove(0);
    let camera = Arc::new(library.open(&id).await.unwrap());
    camera.commit().await.unwrap();

    // Commit parks inside the transport push with ExposureTime = 10 staged...
    camera.set_f64(Param::ExposureTime, 10.0).unwrap();
    let committer = {
        let camera = camera.clone();
        tokio::spawn(async move { camera.commit().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // ...and an online update lands mid-commit. It must not be clobbered
    // when the commit installs its candidate snapshot.
    camera
        .set_online_f64(Param::ExposureTime, 20.0)
        .await
        .unwrap();
    committer.await.unwrap().unwrap();

    assert_eq!(camera.get_f64(Param::ExposureTime).unwrap(), 20.0);
    assert!(camera.are_parameters_committed());
}

#[tokio::test]
async fn acquire_keeps_collected_data_when_delivery_stop_is_refused() {
    init_tracing();
    let sim = Arc::new(SimTransport::manual());
    let transport = Arc::new(FaultyTransport {
        inner: sim.clone(),
        commit_delay: Duration::ZERO,
        fail_stop_delivery: true,
    });
    let library = CameraLibrary::new(transport);
    let id = library.available_cameras().await.remove(0);
    let camera = Arc::new(library.open(&id).await.unwrap());
    camera.commit().await.unwrap();
    let device = sim.open_devices().remove(0);

    let worker = {
        let camera = camera.clone();
        tokio::spawn(async move { camera.acquire(2, Some(Duration::from_secs(1))).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    sim.inject_readout(device, payload(1)).await.unwrap();
    sim.inject_readout(device, payload(2)).await.unwrap();

    // The device refusing the delivery stop must not discard the capture.
    let (data, errors) = worker.await.unwrap().unwrap();
    assert_eq!(data.readout_count(), 2);
    assert!(errors.is_empty());
}

// =============================================================================
// Session lifecycle
// =============================================================================

#[tokio::test]
async fn open_unknown_camera_fails() {
    let transport = Arc::new(SimTransport::manual());
    let library = CameraLibrary::new(transport);
    let bogus = cam_core::CameraId {
        model: "NoSuchCam".to_string(),
        serial_number: "0".to_string(),
    };
    assert!(matches!(
        library.open(&bogus).await,
        Err(CamError::InvalidCameraId(_))
    ));
}

#[tokio::test]
async fn closed_camera_refuses_further_operations() {
    let (_t, camera, _d) = open_manual().await;
    camera.close().await.unwrap();
    // Idempotent.
    camera.close().await.unwrap();

    assert_eq!(
        camera.get_f64(Param::ExposureTime).unwrap_err(),
        CamError::CameraClosed
    );
    assert_eq!(camera.commit().await.unwrap_err(), CamError::CameraClosed);
}

// =============================================================================
// End to end against the self-clocking transport
// =============================================================================

#[tokio::test]
async fn end_to_end_capture_with_generated_frames() {
    init_tracing();
    let transport = Arc::new(SimTransport::new());
    let library = CameraLibrary::new(transport);
    let id = library.available_cameras().await.remove(0);
    let camera = library.open(&id).await.unwrap();

    // Small binned region keeps the synthetic frames cheap.
    camera.set_f64(Param::ExposureTime, 5.0).unwrap();
    camera
        .set_rois(
            Param::Rois,
            vec![Roi {
                x: 0,
                width: 128,
                x_binning: 2,
                y: 0,
                height: 128,
                y_binning: 2,
            }],
        )
        .unwrap();
    camera.commit().await.unwrap();
    assert_eq!(camera.get_i32(Param::ReadoutStride).unwrap(), 64 * 64 * 2);

    let (data, errors) = camera
        .acquire(3, Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert!(data.readout_count() >= 3);
    assert!(errors.is_empty());
    assert_eq!(data.readouts[0].data.len(), 64 * 64 * 2);
    assert!(!camera.is_acquisition_running());

    camera.close().await.unwrap();
}
