//! # wlansim-mac
//!
//! Slot-level IEEE 802.11 CSMA/CA medium access.
//!
//! - [`Station`]: per-node queue, backoff counter, contention window and
//!   statistics, with its state as an explicit [`StationState`]
//! - [`StationRegistry`]: stations in registration order, indexed by id
//! - [`StrategySelector`]: ranked contention-window policies
//! - [`MediumArbiter`]: the per-slot empty / success / collision / freeze
//!   decision, including the hidden-terminal test
//!
//! The arbiter never allocates ids or owns sources; the runner drives it one
//! slot at a time after the stations have collected their arrivals.

pub mod arbiter;
pub mod config;
pub mod registry;
pub mod station;
pub mod strategy;

pub use arbiter::{ChannelState, MediumArbiter, SlotOutcome};
pub use config::{AccessCategoryParams, MacConfig, ACCESS_CATEGORIES};
pub use registry::StationRegistry;
pub use station::{LoadedPacket, MacCounters, NodeParams, Station, StationState};
pub use strategy::{BackoffPolicy, Candidate, StrategySelector};
