//! Per-station MAC state: queue, backoff, contention window and counters.

use crate::strategy::BackoffPolicy;
use rand::Rng;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, trace};
use wlansim_common::{metric_defs, Identifier, NodeId, Packet, Position, SimContext, SimError, Slot, SourceId};
use wlansim_phy::AccessTiming;
use wlansim_traffic::Source;

// ============================================================================
// Parameters
// ============================================================================

/// Registration parameters of a station.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeParams {
    /// Externally assigned, unique id.
    pub id: NodeId,
    /// Data rate in bits per second.
    pub rate_bps: u64,
    /// Carrier-sense radius in meters.
    pub coverage_m: f64,
    /// Location in the plane.
    pub position: Position,
    /// 802.11e access category (0-3).
    pub access_category: u8,
}

impl NodeParams {
    /// Create parameters for a best-effort station.
    pub fn new(id: NodeId, rate_bps: u64, coverage_m: f64, position: Position) -> Self {
        NodeParams {
            id,
            rate_bps,
            coverage_m,
            position,
            access_category: 0,
        }
    }

    /// Set the access category.
    pub fn with_access_category(mut self, access_category: u8) -> Self {
        self.access_category = access_category;
        self
    }
}

// ============================================================================
// State
// ============================================================================

/// Position of a station in the contention state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StationState {
    /// Counting down backoff or without a packet.
    Idle,
    /// Backoff expired with a packet loaded; wants the medium.
    Requesting,
    /// Occupying the medium. `successful` is false once the frame was hit.
    Transmitting {
        /// Whether the frame will be delivered when the medium frees up.
        successful: bool,
    },
    /// Marked as a participant of the collision being resolved this slot.
    Colliding,
}

/// Head-of-line packet handed to the transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadedPacket {
    /// Payload length in bits.
    pub length_bits: u64,
    /// Slot in which the packet was generated.
    pub generated_at: Slot,
    /// Slot in which the packet reached the transmitter.
    pub loaded_at: Slot,
}

/// Statistics accumulated by a station.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MacCounters {
    /// Payload bits delivered.
    pub successful_bits: u64,
    /// Packets delivered.
    pub successful_transmissions: u64,
    /// Collisions taken part in.
    pub collisions: u64,
    /// Slots from loading to delivery, summed over delivered packets.
    pub transmission_duration: u64,
    /// Slots from generation to loading, summed over delivered packets.
    pub queuing_delay: u64,
    /// Slots from generation to delivery, summed over delivered packets.
    pub total_delay: u64,
    /// Sum of squared total delays, in slots squared.
    pub delay_squared: f64,
    /// Queue length summed over every slot.
    pub queue_length_sum: u64,
}

impl MacCounters {
    /// Add another set of counters into this one.
    pub fn absorb(&mut self, other: &MacCounters) {
        self.successful_bits += other.successful_bits;
        self.successful_transmissions += other.successful_transmissions;
        self.collisions += other.collisions;
        self.transmission_duration += other.transmission_duration;
        self.queuing_delay += other.queuing_delay;
        self.total_delay += other.total_delay;
        self.delay_squared += other.delay_squared;
        self.queue_length_sum += other.queue_length_sum;
    }
}

// ============================================================================
// Station
// ============================================================================

/// A contending station with its sources, queue and counters.
pub struct Station {
    params: NodeParams,
    timing: AccessTiming,
    state: StationState,
    contention_window: u32,
    backoff: u64,
    loaded: Option<LoadedPacket>,
    queue: VecDeque<Packet>,
    last_success: Slot,
    sources: Vec<Box<dyn Source>>,
    interval: MacCounters,
    lifetime: MacCounters,
    labels: Vec<(&'static str, String)>,
}

impl fmt::Debug for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Station")
            .field("id", &self.params.id)
            .field("state", &self.state)
            .field("contention_window", &self.contention_window)
            .field("backoff", &self.backoff)
            .field("queue", &self.queue.len())
            .field("sources", &self.sources.len())
            .finish()
    }
}

impl Station {
    /// Create an idle station with an empty queue.
    pub fn new(params: NodeParams, timing: AccessTiming) -> Self {
        let labels = vec![("node", params.id.to_string())];
        Station {
            params,
            timing,
            state: StationState::Idle,
            contention_window: timing.cw_min,
            backoff: 0,
            loaded: None,
            queue: VecDeque::new(),
            last_success: Slot::ZERO,
            sources: Vec::new(),
            interval: MacCounters::default(),
            lifetime: MacCounters::default(),
            labels,
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn id(&self) -> NodeId {
        self.params.id
    }

    pub fn params(&self) -> &NodeParams {
        &self.params
    }

    pub fn timing(&self) -> &AccessTiming {
        &self.timing
    }

    pub fn state(&self) -> StationState {
        self.state
    }

    pub fn contention_window(&self) -> u32 {
        self.contention_window
    }

    pub fn backoff(&self) -> u64 {
        self.backoff
    }

    pub fn loaded(&self) -> Option<&LoadedPacket> {
        self.loaded.as_ref()
    }

    /// Packets waiting, including the one loaded into the transmitter.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Counters of the current interval.
    pub fn interval_counters(&self) -> &MacCounters {
        &self.interval
    }

    /// Counters of all completed intervals.
    pub fn lifetime_counters(&self) -> &MacCounters {
        &self.lifetime
    }

    /// Whether the station occupies the medium (transmitting or colliding).
    pub fn is_transmitting(&self) -> bool {
        matches!(self.state, StationState::Transmitting { .. } | StationState::Colliding)
    }

    pub fn is_requesting(&self) -> bool {
        self.state == StationState::Requesting
    }

    /// Distance to another position in meters.
    pub fn distance_to(&self, position: &Position) -> f64 {
        self.params.position.distance_to(position)
    }

    // ------------------------------------------------------------------------
    // Geometry
    // ------------------------------------------------------------------------

    pub fn set_coverage(&mut self, coverage_m: f64) {
        self.params.coverage_m = coverage_m;
    }

    pub fn set_position(&mut self, position: Position) {
        self.params.position = position;
    }

    // ------------------------------------------------------------------------
    // Sources
    // ------------------------------------------------------------------------

    /// Attach a traffic source. Source ids are unique per station.
    pub fn append_source(&mut self, source: Box<dyn Source>) -> Result<(), SimError> {
        let source_id = source.id();
        if self.sources.iter().any(|s| s.id() == source_id) {
            return Err(SimError::DuplicateIdentifier(Identifier::Source {
                node: self.params.id,
                source: source_id,
            }));
        }
        self.sources.push(source);
        Ok(())
    }

    /// Detach a source; returns whether it was attached.
    pub fn remove_source(&mut self, source_id: SourceId) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.id() != source_id);
        self.sources.len() != before
    }

    pub fn remove_all_sources(&mut self) {
        self.sources.clear();
    }

    pub fn source_ids(&self) -> Vec<SourceId> {
        self.sources.iter().map(|s| s.id()).collect()
    }

    /// Advance every source one slot and queue whatever is due.
    pub fn collect_arrivals(&mut self, ctx: &mut SimContext) {
        for source in self.sources.iter_mut() {
            source.synchronize(ctx);
            let packets = source.poll_packets(ctx);
            self.queue.extend(packets);
        }
    }

    /// Queue a packet directly.
    pub fn enqueue(&mut self, packet: Packet) {
        self.queue.push_back(packet);
    }

    // ------------------------------------------------------------------------
    // Slot bookkeeping
    // ------------------------------------------------------------------------

    /// Hand the head-of-line packet to an empty transmitter.
    ///
    /// The window resets to the category minimum. A station idle for longer
    /// than its AIFS may transmit at once; otherwise it draws a fresh backoff.
    pub fn load_next_packet(&mut self, ctx: &mut SimContext) {
        if self.loaded.is_some() {
            return;
        }
        let Some(head) = self.queue.front().copied() else {
            return;
        };
        let now = ctx.slot();

        self.contention_window = self.timing.cw_min;
        if now.since(self.last_success) > self.timing.aifs_slots {
            self.backoff = 0;
        } else {
            self.draw_backoff(ctx.rng());
        }
        self.interval.queuing_delay += now.since(head.generated_at);
        self.loaded = Some(LoadedPacket {
            length_bits: head.length_bits,
            generated_at: head.generated_at,
            loaded_at: now,
        });
        trace!("Node[{}]: loaded {} bits, backoff {}", self.params.id, head.length_bits, self.backoff);
    }

    /// Add the current queue length to the interval sum.
    pub fn record_queue_length(&mut self) {
        self.interval.queue_length_sum += self.queue.len() as u64;
    }

    /// Count down one idle slot.
    pub fn decrement_backoff(&mut self) {
        self.backoff = self.backoff.saturating_sub(1);
    }

    /// Enter `Requesting` when backoff has expired with a packet loaded.
    pub fn update_request(&mut self) -> bool {
        if !self.is_transmitting() && self.loaded.is_some() && self.backoff == 0 {
            self.state = StationState::Requesting;
        }
        self.is_requesting()
    }

    #[cfg(test)]
    pub(crate) fn force_backoff(&mut self, backoff: u64) {
        self.backoff = backoff;
    }

    fn draw_backoff<R: Rng>(&mut self, rng: &mut R) {
        self.backoff = rng.gen_range(0..=u64::from(self.contention_window));
    }

    // ------------------------------------------------------------------------
    // Arbiter transitions
    // ------------------------------------------------------------------------

    /// Sole requester takes the medium.
    pub(crate) fn start_transmission(&mut self) {
        self.state = StationState::Transmitting { successful: true };
    }

    pub(crate) fn mark_colliding(&mut self) {
        self.state = StationState::Colliding;
    }

    /// Recompute the window of a collider and redraw its backoff.
    ///
    /// Without a policy the window is kept as is (only capped).
    pub(crate) fn back_off_after_collision<R: Rng>(&mut self, policy: Option<BackoffPolicy>, rng: &mut R) {
        let cw_max = self.timing.cw_max;
        self.contention_window = match policy {
            Some(policy) => policy.next_window(self.contention_window, self.timing.cw_min, cw_max, rng),
            None => self.contention_window.min(cw_max),
        };
        self.draw_backoff(rng);
        self.count_collision();
    }

    /// A transmitting station whose frame was hit by a hidden collider.
    pub(crate) fn stepped_on<R: Rng>(&mut self, rng: &mut R) {
        self.contention_window = self.contention_window.saturating_mul(2).min(self.timing.cw_max);
        self.draw_backoff(rng);
        self.count_collision();
        self.state = StationState::Transmitting { successful: false };
    }

    /// Colliders occupy the medium until the collision has elapsed.
    pub(crate) fn finish_collision(&mut self) {
        if self.state == StationState::Colliding {
            self.state = StationState::Transmitting { successful: false };
        }
    }

    fn count_collision(&mut self) {
        self.interval.collisions += 1;
        metrics::counter!(metric_defs::MAC_COLLISIONS.name, &self.labels).increment(1);
        metrics::histogram!(metric_defs::MAC_CONTENTION_WINDOW.name, &self.labels)
            .record(self.contention_window as f64);
        debug!(
            "Node[{}]: collision, cw {}, backoff {}",
            self.params.id, self.contention_window, self.backoff
        );
    }

    /// The medium became free: leave the transmitting state, delivering the
    /// loaded packet if the exchange succeeded.
    pub(crate) fn end_transmission(&mut self, now: Slot) {
        let delivered = match self.state {
            StationState::Transmitting { successful } => successful,
            StationState::Colliding => false,
            _ => return,
        };
        self.state = StationState::Idle;
        if !delivered {
            return;
        }
        let Some(packet) = self.loaded.take() else {
            return;
        };
        self.queue.pop_front();

        let total_delay = now.since(packet.generated_at);
        let counters = &mut self.interval;
        counters.successful_transmissions += 1;
        counters.successful_bits += packet.length_bits;
        counters.transmission_duration += now.since(packet.loaded_at) + 1;
        counters.total_delay += total_delay;
        counters.delay_squared += (total_delay as f64) * (total_delay as f64);
        self.last_success = now;

        metrics::counter!(metric_defs::MAC_TX_SUCCESS.name, &self.labels).increment(1);
        metrics::counter!(metric_defs::MAC_TX_BITS.name, &self.labels).increment(packet.length_bits);
        metrics::histogram!(metric_defs::MAC_TOTAL_DELAY.name, &self.labels).record(total_delay as f64);
        trace!("Node[{}]: delivered {} bits after {} slots", self.params.id, packet.length_bits, total_delay);
    }

    // ------------------------------------------------------------------------
    // Intervals
    // ------------------------------------------------------------------------

    /// Start a new statistics interval.
    pub fn reset_interval(&mut self) {
        self.interval = MacCounters::default();
    }

    /// Fold the interval counters into the lifetime counters.
    pub fn close_interval(&mut self) {
        self.lifetime.absorb(&self.interval);
        metrics::gauge!(metric_defs::QUEUE_LENGTH.name, &self.labels).set(self.queue.len() as f64);
    }
}
