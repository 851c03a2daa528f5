//! Seam to the external driver/firmware layer.
//!
//! The control layer never talks to hardware directly; everything flows
//! through the [`Transport`] trait. Readouts arrive asynchronously on the
//! event channel returned by [`Transport::subscribe_events`].

use crate::error::CamResult;
use crate::model::{CameraId, CameraModel};
use crate::parameter::Param;
use crate::values::ParameterValue;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// Opaque reference to an open device within a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceRef(pub u64);

/// Committed configuration pushed to the device on a successful commit.
pub type CommittedConfig = BTreeMap<Param, ParameterValue>;

/// Asynchronous event from the driver/firmware layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// One readout's worth of sensor data.
    Readout(Bytes),
    /// The device disconnected; fatal to the current acquisition session.
    Disconnected,
}

/// Driver/firmware boundary the control layer is built against.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Enumerate cameras currently reachable through this transport.
    async fn available_cameras(&self) -> Vec<CameraId>;

    /// Open a device session.
    async fn open_device(&self, id: &CameraId) -> CamResult<DeviceRef>;

    /// Close a device session. Idempotent.
    async fn close_device(&self, device: DeviceRef) -> CamResult<()>;

    /// Fetch the static capability table for an open device.
    async fn query_capabilities(&self, device: DeviceRef) -> CamResult<CameraModel>;

    /// Push a full committed configuration to the device.
    async fn push_committed_config(
        &self,
        device: DeviceRef,
        config: &CommittedConfig,
    ) -> CamResult<()>;

    /// Push a single online parameter change while acquisition runs.
    async fn push_online_update(
        &self,
        device: DeviceRef,
        param: Param,
        value: ParameterValue,
    ) -> CamResult<()>;

    /// Subscribe to readout delivery and disconnect notifications.
    async fn subscribe_events(&self, device: DeviceRef)
        -> CamResult<mpsc::Receiver<TransportEvent>>;

    /// Tell the device to begin delivering readouts of `readout_stride` bytes.
    async fn start_delivery(&self, device: DeviceRef, readout_stride: usize) -> CamResult<()>;

    /// Tell the device to stop delivering readouts. Idempotent.
    async fn stop_delivery(&self, device: DeviceRef) -> CamResult<()>;
}
