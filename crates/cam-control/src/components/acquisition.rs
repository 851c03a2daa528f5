//! Acquisition engine: run state, readout buffering and waiter wakeup.
//!
//! The engine owns the readout ring and a watch channel whose value ticks on
//! every state change. Waiters subscribe to the channel *before* inspecting
//! the ring, so a readout that lands between the check and the await still
//! wakes them; no update is ever missed.

use crate::components::readout_ring::{Readout, ReadoutRing};
use cam_core::error::{CamError, CamResult};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default number of readout slots in the ring.
pub const DEFAULT_BUFFER_READOUTS: usize = 8;

/// Sticky per-run error flags, cleared when the next run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorsMask(u32);

impl ErrorsMask {
    pub const NONE: ErrorsMask = ErrorsMask(0);
    /// An unread readout was overwritten before the caller consumed it.
    pub const DATA_LOST: ErrorsMask = ErrorsMask(0x1);
    /// The device disconnected mid-run; fatal to the session.
    pub const CONNECTION_LOST: ErrorsMask = ErrorsMask(0x2);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: ErrorsMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ErrorsMask) {
        self.0 |= other.0;
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for ErrorsMask {
    type Output = ErrorsMask;
    fn bitor(self, rhs: ErrorsMask) -> ErrorsMask {
        ErrorsMask(self.0 | rhs.0)
    }
}

/// Snapshot of the engine's run state returned alongside every wait.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionStatus {
    pub running: bool,
    pub errors: ErrorsMask,
    /// Measured instantaneous readout rate in readouts per second.
    pub readout_rate: f64,
}

/// Readouts handed back by a wait, oldest first.
#[derive(Debug, Clone, Default)]
pub struct AvailableData {
    /// Session-monotonic index of the first readout in `readouts`.
    pub initial_readout: u64,
    pub readouts: Vec<Readout>,
}

impl AvailableData {
    pub fn readout_count(&self) -> usize {
        self.readouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readouts.is_empty()
    }
}

struct AcqState {
    running: bool,
    ring: Option<ReadoutRing>,
    errors: ErrorsMask,
    slot_count: usize,
    readout_rate: f64,
    last_arrival: Option<Instant>,
}

impl AcqState {
    fn status(&self) -> AcquisitionStatus {
        AcquisitionStatus {
            running: self.running,
            errors: self.errors,
            readout_rate: self.readout_rate,
        }
    }
}

/// Run-state machine for one camera.
pub struct AcquisitionEngine {
    state: Mutex<AcqState>,
    update_tx: watch::Sender<u64>,
}

impl AcquisitionEngine {
    pub fn new() -> AcquisitionEngine {
        let (update_tx, _) = watch::channel(0u64);
        AcquisitionEngine {
            state: Mutex::new(AcqState {
                running: false,
                ring: None,
                errors: ErrorsMask::NONE,
                slot_count: DEFAULT_BUFFER_READOUTS,
                readout_rate: 0.0,
                last_arrival: None,
            }),
            update_tx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn status(&self) -> AcquisitionStatus {
        self.state.lock().status()
    }

    /// Resize the ring used by the *next* run; the current run is unaffected.
    pub fn set_buffer_readouts(&self, slots: usize) {
        self.state.lock().slot_count = slots.max(1);
    }

    /// Readouts still resident in the ring, consumed or not. This is how
    /// partial data stays reachable after a timed-out or failed run.
    pub fn resident_readouts(&self) -> Vec<Readout> {
        self.state
            .lock()
            .ring
            .as_ref()
            .map(ReadoutRing::resident)
            .unwrap_or_default()
    }

    /// Begin a run: fresh ring, errors cleared, rate reset.
    pub fn start(&self, readout_stride: usize) -> CamResult<()> {
        let mut st = self.state.lock();
        if st.running {
            return Err(CamError::AcquisitionInProgress);
        }
        st.ring = Some(ReadoutRing::new(st.slot_count, readout_stride));
        st.errors = ErrorsMask::NONE;
        st.readout_rate = 0.0;
        st.last_arrival = None;
        st.running = true;
        drop(st);
        self.tick();
        Ok(())
    }

    /// End the run. Buffered readouts stay readable until the next start.
    pub fn stop(&self) -> CamResult<()> {
        let mut st = self.state.lock();
        if !st.running {
            return Err(CamError::AcquisitionNotInProgress);
        }
        st.running = false;
        drop(st);
        self.tick();
        Ok(())
    }

    /// Record a disconnect: raise the sticky flag and force the run down.
    pub fn force_disconnect(&self) {
        let mut st = self.state.lock();
        st.errors.insert(ErrorsMask::CONNECTION_LOST);
        st.running = false;
        drop(st);
        self.tick();
    }

    /// Ingest one transport readout. Ignored while no run is active.
    pub fn push_readout(&self, data: bytes::Bytes) {
        let mut st = self.state.lock();
        if !st.running {
            debug!("dropping readout delivered while stopped");
            return;
        }
        let now = Instant::now();
        if let Some(prev) = st.last_arrival {
            let dt = now.saturating_duration_since(prev).as_secs_f64();
            if dt > 0.0 {
                st.readout_rate = 1.0 / dt;
            }
        }
        st.last_arrival = Some(now);
        if let Some(ring) = st.ring.as_mut() {
            if ring.push(data) {
                warn!("readout overwritten before being consumed");
                st.errors.insert(ErrorsMask::DATA_LOST);
            }
        }
        drop(st);
        self.tick();
    }

    /// Block until new readouts arrive, the run ends, or the timeout lapses.
    ///
    /// `None` waits indefinitely; `Some(Duration::ZERO)` polls. Returns
    /// [`CamError::TimeOutOccurred`] only when the run is still active and no
    /// data arrived within the window; a stopped run yields an empty `Ok` so
    /// callers can observe the final status.
    pub async fn wait_for_update(
        &self,
        timeout: Option<Duration>,
    ) -> CamResult<(AvailableData, AcquisitionStatus)> {
        let mut rx = self.update_tx.subscribe();
        let deadline = timeout.map(|d| Instant::now() + d);

        loop {
            // Check state after subscribing so an update racing this check
            // still registers as a change on `rx`.
            {
                let mut st = self.state.lock();
                if let Some(ring) = st.ring.as_mut() {
                    if ring.unread_count() > 0 {
                        let (initial_readout, readouts) = ring.take_unread();
                        let status = st.status();
                        return Ok((
                            AvailableData {
                                initial_readout,
                                readouts,
                            },
                            status,
                        ));
                    }
                }
                if !st.running {
                    return Ok((AvailableData::default(), st.status()));
                }
            }

            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(CamError::TimeOutOccurred);
                    }
                    if tokio::time::timeout_at(deadline, rx.changed())
                        .await
                        .is_err()
                    {
                        // Window lapsed; one final check before erroring so a
                        // readout that raced the timer is not dropped.
                        let mut st = self.state.lock();
                        if let Some(ring) = st.ring.as_mut() {
                            if ring.unread_count() > 0 {
                                let (initial_readout, readouts) = ring.take_unread();
                                let status = st.status();
                                return Ok((
                                    AvailableData {
                                        initial_readout,
                                        readouts,
                                    },
                                    status,
                                ));
                            }
                        }
                        if !st.running {
                            return Ok((AvailableData::default(), st.status()));
                        }
                        return Err(CamError::TimeOutOccurred);
                    }
                }
                None => {
                    if rx.changed().await.is_err() {
                        // Sender gone means the engine itself was dropped.
                        return Err(CamError::CameraClosed);
                    }
                }
            }
        }
    }

    fn tick(&self) {
        // send_modify notifies even with no live receivers.
        self.update_tx.send_modify(|gen| *gen += 1);
    }
}

impl Default for AcquisitionEngine {
    fn default() -> Self {
        AcquisitionEngine::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc;

    fn payload() -> Bytes {
        Bytes::from_static(&[0u8; 8])
    }

    #[test]
    fn start_twice_is_refused() {
        let engine = AcquisitionEngine::new();
        engine.start(8).unwrap();
        assert!(matches!(
            engine.start(8),
            Err(CamError::AcquisitionInProgress)
        ));
    }

    #[test]
    fn stop_while_idle_is_refused() {
        let engine = AcquisitionEngine::new();
        assert!(matches!(
            engine.stop(),
            Err(CamError::AcquisitionNotInProgress)
        ));
    }

    #[test]
    fn readouts_before_start_are_dropped() {
        let engine = AcquisitionEngine::new();
        engine.push_readout(payload());
        engine.start(8).unwrap();
        assert!(engine.resident_readouts().is_empty());
    }

    #[test]
    fn restart_clears_errors_and_buffer() {
        let engine = AcquisitionEngine::new();
        engine.set_buffer_readouts(2);
        engine.start(8).unwrap();
        for _ in 0..3 {
            engine.push_readout(payload());
        }
        assert!(engine.status().errors.contains(ErrorsMask::DATA_LOST));
        engine.stop().unwrap();

        engine.start(8).unwrap();
        assert!(engine.status().errors.is_empty());
        assert!(engine.resident_readouts().is_empty());
    }

    #[tokio::test]
    async fn wait_returns_pushed_readouts() {
        let engine = AcquisitionEngine::new();
        engine.start(8).unwrap();
        engine.push_readout(payload());
        engine.push_readout(payload());

        let (data, status) = engine.wait_for_update(Some(Duration::ZERO)).await.unwrap();
        assert_eq!(data.readout_count(), 2);
        assert_eq!(data.initial_readout, 0);
        assert!(status.running);
    }

    #[tokio::test]
    async fn zero_timeout_poll_times_out_while_running() {
        let engine = AcquisitionEngine::new();
        engine.start(8).unwrap();
        let err = engine
            .wait_for_update(Some(Duration::ZERO))
            .await
            .unwrap_err();
        assert_eq!(err, CamError::TimeOutOccurred);
    }

    #[tokio::test]
    async fn wait_after_stop_reports_not_running_without_error() {
        let engine = AcquisitionEngine::new();
        engine.start(8).unwrap();
        engine.stop().unwrap();
        let (data, status) = engine.wait_for_update(Some(Duration::ZERO)).await.unwrap();
        assert!(data.is_empty());
        assert!(!status.running);
    }

    #[tokio::test]
    async fn waiter_wakes_on_readout_arrival() {
        let engine = Arc::new(AcquisitionEngine::new());
        engine.start(8).unwrap();

        let waiter = {
            let engine = engine.clone();
            tokio::spawn(
                async move { engine.wait_for_update(Some(Duration::from_secs(5))).await },
            )
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.push_readout(payload());

        let (data, _) = waiter.await.unwrap().unwrap();
        assert_eq!(data.readout_count(), 1);
    }

    #[tokio::test]
    async fn waiter_wakes_on_stop() {
        let engine = Arc::new(AcquisitionEngine::new());
        engine.start(8).unwrap();

        let waiter = {
            let engine = engine.clone();
            tokio::spawn(
                async move { engine.wait_for_update(Some(Duration::from_secs(5))).await },
            )
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.stop().unwrap();

        let (data, status) = waiter.await.unwrap().unwrap();
        assert!(data.is_empty());
        assert!(!status.running);
    }

    #[tokio::test]
    async fn disconnect_raises_sticky_flag_and_stops() {
        let engine = AcquisitionEngine::new();
        engine.start(8).unwrap();
        engine.force_disconnect();

        let (_, status) = engine.wait_for_update(Some(Duration::ZERO)).await.unwrap();
        assert!(!status.running);
        assert!(status.errors.contains(ErrorsMask::CONNECTION_LOST));
    }
}
