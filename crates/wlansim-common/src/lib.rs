//! # wlansim-common
//!
//! Common types shared by every wlansim crate.
//!
//! This crate provides core simulation primitives including:
//! - Slot time representation ([`Slot`])
//! - Station and source identifiers ([`NodeId`], [`SourceId`])
//! - Planar geometry ([`Position`])
//! - Packets handed from traffic sources to stations ([`Packet`])
//! - Simulation context carrying the seeded RNG ([`SimContext`])
//! - Metric definitions ([`metric_defs`])

pub mod metric_defs;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Scope of an identifier referenced by a failed registry operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identifier {
    /// A station.
    Node(NodeId),
    /// A traffic source attached to a station.
    Source {
        /// Owning station.
        node: NodeId,
        /// Source id, unique per station.
        source: SourceId,
    },
    /// A strategy selector candidate.
    Strategy(u32),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Node(node) => write!(f, "node {}", node),
            Identifier::Source { node, source } => write!(f, "source {} of node {}", source, node),
            Identifier::Strategy(id) => write!(f, "strategy {}", id),
        }
    }
}

/// Simulation errors.
///
/// All variants are recoverable: the operation that raised them leaves the
/// registry untouched.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// An id that already exists at that scope was added again.
    #[error("Duplicate identifier: {0}")]
    DuplicateIdentifier(Identifier),

    /// An id that does not exist was referenced.
    #[error("Unknown identifier: {0}")]
    UnknownIdentifier(Identifier),

    /// A traffic source names a distribution that is not supported.
    #[error("Invalid distribution specifier: {0}")]
    InvalidDistributionSpecifier(String),
}

// ============================================================================
// Identifiers
// ============================================================================

/// Externally assigned station id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Create a new node ID.
    pub fn new(id: u32) -> Self {
        NodeId(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Traffic source id, unique within one station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceId(pub u32);

impl SourceId {
    /// Create a new source ID.
    pub fn new(id: u32) -> Self {
        SourceId(id)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Time Types
// ============================================================================

/// Simulated time as a count of MAC slots since simulation start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Slot(u64);

impl Slot {
    /// Slot zero.
    pub const ZERO: Slot = Slot(0);

    /// Create from a slot index.
    pub fn new(index: u64) -> Self {
        Slot(index)
    }

    /// Get the slot index.
    pub fn index(&self) -> u64 {
        self.0
    }

    /// Slots elapsed since `earlier`, zero if `earlier` is in the future.
    pub fn since(&self, earlier: Slot) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl std::ops::Add<u64> for Slot {
    type Output = Slot;

    fn add(self, rhs: u64) -> Self::Output {
        Slot(self.0.saturating_add(rhs))
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

const NANOS_PER_MILLI: u64 = 1_000_000;
const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Convert a duration in milliseconds into whole slots (truncating).
pub fn millis_to_slots(ms: f64, slot_ns: u64) -> u64 {
    if ms <= 0.0 || slot_ns == 0 {
        return 0;
    }
    (ms * NANOS_PER_MILLI as f64 / slot_ns as f64) as u64
}

/// Convert a slot count into seconds.
pub fn slots_to_secs(slots: u64, slot_ns: u64) -> f64 {
    slots as f64 * slot_ns as f64 / NANOS_PER_SEC
}

// ============================================================================
// Geometry
// ============================================================================

/// Planar station position in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate in meters.
    pub x: f64,
    /// Y coordinate in meters.
    pub y: f64,
}

impl Position {
    /// Create a new position.
    pub fn new(x: f64, y: f64) -> Self {
        Position { x, y }
    }

    /// Euclidean distance to another position in meters.
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

// ============================================================================
// Packets
// ============================================================================

/// A MAC service data unit waiting in a station queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Payload length in bits.
    pub length_bits: u64,
    /// Slot in which the source generated the packet.
    pub generated_at: Slot,
}

impl Packet {
    /// Create a new packet.
    pub fn new(length_bits: u64, generated_at: Slot) -> Self {
        Packet {
            length_bits,
            generated_at,
        }
    }
}

// ============================================================================
// Simulation Context
// ============================================================================

/// Simulation context passed to sources and the medium arbiter.
///
/// Every stochastic draw in a run goes through [`SimContext::rng`], so a run
/// is fully determined by its seed and scenario.
pub struct SimContext {
    slot: Slot,
    slot_ns: u64,
    rng: ChaCha8Rng,
}

impl SimContext {
    /// Create a new simulation context.
    pub fn new(seed: u64, slot_ns: u64) -> Self {
        SimContext {
            slot: Slot::ZERO,
            slot_ns,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Get the current slot.
    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// Set the current slot (used by the simulation loop).
    pub fn set_slot(&mut self, slot: Slot) {
        self.slot = slot;
    }

    /// Slot length in nanoseconds.
    pub fn slot_ns(&self) -> u64 {
        self.slot_ns
    }

    /// Replace the slot length (used when the PHY mode changes).
    pub fn set_slot_ns(&mut self, slot_ns: u64) {
        self.slot_ns = slot_ns;
    }

    /// Get mutable access to the random number generator.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// Convert milliseconds into slots of this context.
    pub fn millis_to_slots(&self, ms: f64) -> u64 {
        millis_to_slots(ms, self.slot_ns)
    }

    /// Current simulated time in seconds.
    pub fn time_secs(&self) -> f64 {
        slots_to_secs(self.slot.index(), self.slot_ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_slot_conversions() {
        // 20 us slots: 1 ms is 50 slots
        assert_eq!(millis_to_slots(1.0, 20_000), 50);
        assert_eq!(millis_to_slots(8.0, 9_000), 888);
        assert_eq!(millis_to_slots(-3.0, 9_000), 0);
        assert!((slots_to_secs(50_000, 20_000) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_slot_arithmetic() {
        let a = Slot::new(100);
        let b = Slot::new(40);
        assert_eq!(a.since(b), 60);
        assert_eq!(b.since(a), 0);
        assert_eq!((b + 5).index(), 45);
    }

    #[test]
    fn test_position_distance() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(3.0, 4.0);
        assert!((a.distance_to(&b) - 5.0).abs() < 1e-12);
        assert_eq!(a.distance_to(&a), 0.0);
    }

    #[test]
    fn test_context_is_deterministic() {
        let mut c1 = SimContext::new(7, 20_000);
        let mut c2 = SimContext::new(7, 20_000);
        let a: Vec<u32> = (0..16).map(|_| c1.rng().gen()).collect();
        let b: Vec<u32> = (0..16).map(|_| c2.rng().gen()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_identifier_display() {
        let err = SimError::DuplicateIdentifier(Identifier::Source {
            node: NodeId(3),
            source: SourceId(5),
        });
        assert_eq!(err.to_string(), "Duplicate identifier: source 5 of node 3");
        let err = SimError::UnknownIdentifier(Identifier::Node(NodeId(9)));
        assert_eq!(err.to_string(), "Unknown identifier: node 9");
    }
}
