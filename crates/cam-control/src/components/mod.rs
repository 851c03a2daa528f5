//! Internal components of the camera control layer.
//!
//! Each component owns one concern: parameter records and staging
//! ([`store`]), the commit protocol ([`commit`]), run state and waiter
//! wakeup ([`acquisition`]), and readout buffering ([`readout_ring`]).

pub mod acquisition;
pub mod commit;
pub mod readout_ring;
pub mod store;
