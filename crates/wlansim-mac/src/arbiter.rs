//! Per-slot arbitration of the shared medium.
//!
//! Every slot the arbiter decides between an empty slot, a successful
//! transmission, a collision, or a frozen slot while an exchange is still on
//! the air. Stations outside every transmitter's coverage keep counting down,
//! and may collide with the ongoing exchange when their backoff expires.

use crate::config::MacConfig;
use crate::station::{Station, StationState};
use crate::strategy::BackoffPolicy;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, trace};
use wlansim_common::{metric_defs, NodeId, Position, SimContext, Slot};
use wlansim_phy::{ofdm_exchange_probability, DurationModel, FrameExchange, Modulation, PhyMode, Protection};

/// Shared state of the single medium.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelState {
    /// An exchange or collision occupies the medium.
    pub transmission_in_progress: bool,
    /// Slots left until the medium frees up.
    pub remaining_slots: u64,
    /// The exchange on the air is RTS/CTS protected.
    pub rts_in_use: bool,
}

/// What happened in one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOutcome {
    /// Nobody requested and the medium was free.
    Empty,
    /// The sole requester took the medium.
    Success(NodeId),
    /// Requesters collided with each other or with the exchange on the air.
    Collision {
        /// Stations that newly joined the collision.
        colliders: usize,
    },
    /// The medium stayed occupied.
    Frozen,
}

/// Resolves medium access slot by slot.
#[derive(Debug, Clone)]
pub struct MediumArbiter {
    durations: DurationModel,
    rts_threshold: u64,
    cts_to_self: bool,
    mixed_legacy_nodes: usize,
    channel: ChannelState,
}

// ============================================================================
// Hidden-terminal geometry
// ============================================================================

/// Distance from every station to its nearest transmitting station.
///
/// `None` when nothing is on the air.
fn nearest_transmitter(stations: &[Station]) -> Vec<Option<f64>> {
    let transmitters: Vec<Position> = stations
        .iter()
        .filter(|s| s.is_transmitting())
        .map(|s| s.params().position)
        .collect();
    stations
        .iter()
        .map(|s| {
            transmitters
                .iter()
                .map(|p| s.distance_to(p))
                .min_by(|a, b| a.total_cmp(b))
        })
        .collect()
}

/// Out of carrier-sense range of every transmitter.
fn is_hidden(station: &Station, nearest: Option<f64>) -> bool {
    matches!(nearest, Some(d) if d > station.params().coverage_m)
}

/// Hears at least one transmitter.
fn in_line_of_sight(station: &Station, nearest: Option<f64>) -> bool {
    matches!(nearest, Some(d) if d <= station.params().coverage_m)
}

/// Candidate governing the length of a collision.
#[derive(Clone, Copy)]
struct Governing {
    airtime: f64,
    exchange: FrameExchange,
}

impl Governing {
    fn keep_longer(slot: &mut Option<Governing>, candidate: Governing) {
        if slot.map_or(true, |g| candidate.airtime > g.airtime) {
            *slot = Some(candidate);
        }
    }
}

impl MediumArbiter {
    /// Create an arbiter for a MAC configuration.
    pub fn new(config: &MacConfig) -> Self {
        MediumArbiter {
            durations: DurationModel::new(config.profile()),
            rts_threshold: config.rts_threshold,
            cts_to_self: config.cts_to_self,
            mixed_legacy_nodes: config.mixed_legacy_nodes,
            channel: ChannelState::default(),
        }
    }

    pub fn channel(&self) -> &ChannelState {
        &self.channel
    }

    pub fn durations(&self) -> &DurationModel {
        &self.durations
    }

    /// Free the medium (used when the topology is rebuilt).
    pub fn reset(&mut self) {
        self.channel = ChannelState::default();
    }

    /// Frame exchange a station would start with its loaded packet.
    pub fn exchange_for(&self, station: &Station) -> Option<FrameExchange> {
        let packet = station.loaded()?;
        Some(FrameExchange {
            payload_bits: packet.length_bits,
            rate_bps: station.params().rate_bps,
            aifs_ns: station.timing().aifs_ns,
            protection: Protection::select(packet.length_bits, self.rts_threshold, self.cts_to_self),
        })
    }

    /// Resolve one slot.
    ///
    /// `policy` recomputes the contention window of new colliders; `None`
    /// keeps their window.
    pub fn step(&mut self, stations: &mut [Station], policy: Option<BackoffPolicy>, ctx: &mut SimContext) -> SlotOutcome {
        let mut requesters = 0usize;
        let mut requester = None;
        for (i, station) in stations.iter_mut().enumerate() {
            if station.update_request() {
                requesters += 1;
                requester = Some(i);
            }
        }

        if self.channel.transmission_in_progress {
            if self.channel.rts_in_use {
                self.freeze(stations, ctx.slot());
                return SlotOutcome::Frozen;
            }

            let nearest = nearest_transmitter(stations);
            let hidden_request = stations
                .iter()
                .zip(&nearest)
                .any(|(s, &d)| s.is_requesting() && is_hidden(s, d));
            if hidden_request {
                let colliders = self.collision(stations, policy, ctx);
                return SlotOutcome::Collision { colliders };
            }

            for (station, &d) in stations.iter_mut().zip(&nearest) {
                if is_hidden(station, d) && !station.is_requesting() && !station.is_transmitting() && station.backoff() > 0 {
                    station.decrement_backoff();
                }
            }
            self.freeze(stations, ctx.slot());
            return SlotOutcome::Frozen;
        }

        let outcome = match (requesters, requester) {
            (0, _) | (_, None) => {
                self.empty_slot(stations);
                return SlotOutcome::Empty;
            }
            (1, Some(index)) => {
                let id = stations[index].id();
                self.successful_transmission(stations, index, ctx);
                SlotOutcome::Success(id)
            }
            _ => SlotOutcome::Collision {
                colliders: self.collision(stations, policy, ctx),
            },
        };

        let nearest = nearest_transmitter(stations);
        for (station, &d) in stations.iter_mut().zip(&nearest) {
            if is_hidden(station, d) && !station.is_transmitting() && station.backoff() > 0 {
                station.decrement_backoff();
            }
        }
        outcome
    }

    fn empty_slot(&mut self, stations: &mut [Station]) {
        for station in stations.iter_mut() {
            station.decrement_backoff();
        }
        self.channel.rts_in_use = false;
        metrics::counter!(metric_defs::CHANNEL_EMPTY_SLOTS.name).increment(1);
    }

    fn modulation<R: Rng>(&self, stations: usize, rng: &mut R) -> Modulation {
        match self.durations.profile().mode {
            PhyMode::Mixed => {
                let p = ofdm_exchange_probability(stations, self.mixed_legacy_nodes);
                if rng.gen::<f64>() < p {
                    Modulation::Ofdm
                } else {
                    Modulation::Dsss
                }
            }
            mode => mode.base_modulation(),
        }
    }

    fn successful_transmission(&mut self, stations: &mut [Station], index: usize, ctx: &mut SimContext) {
        let modulation = self.modulation(stations.len(), ctx.rng());
        let station = &mut stations[index];
        let Some(exchange) = self.exchange_for(station) else {
            return;
        };
        station.start_transmission();

        let duration = self.durations.success_slots(&exchange, modulation);
        self.channel.transmission_in_progress = true;
        self.channel.remaining_slots = duration;
        self.channel.rts_in_use = exchange.protection == Protection::RtsCts;
        trace!(
            "Node[{}]: transmitting {} bits for {} slots ({:?}, {:?})",
            station.id(),
            exchange.payload_bits,
            duration,
            exchange.protection,
            modulation
        );

        self.freeze(stations, ctx.slot());
    }

    /// Mark colliders, back them off and occupy the medium for the collision.
    ///
    /// Returns the number of new colliders.
    fn collision(&mut self, stations: &mut [Station], policy: Option<BackoffPolicy>, ctx: &mut SimContext) -> usize {
        let nearest = nearest_transmitter(stations);
        let mut colliders = 0usize;
        let mut basic: Option<Governing> = None;
        let mut longest: Option<Governing> = None;

        for (i, &d) in nearest.iter().enumerate() {
            let station = &stations[i];
            if !station.is_requesting() || in_line_of_sight(station, d) {
                continue;
            }
            let Some(exchange) = self.exchange_for(station) else {
                continue;
            };
            let candidate = Governing {
                airtime: exchange.payload_bits as f64 / exchange.rate_bps.max(1) as f64,
                exchange,
            };
            if exchange.protection == Protection::Basic {
                Governing::keep_longer(&mut basic, candidate);
            }
            Governing::keep_longer(&mut longest, candidate);
            stations[i].mark_colliding();
            colliders += 1;
        }

        let rng = ctx.rng();
        for station in stations.iter_mut() {
            if station.state() == StationState::Colliding {
                station.back_off_after_collision(policy, rng);
            } else if station.is_transmitting() {
                station.stepped_on(rng);
            }
        }
        for station in stations.iter_mut() {
            station.finish_collision();
        }

        if let Some(governing) = basic.or(longest) {
            let modulation = self.durations.profile().mode.base_modulation();
            let duration = self.durations.collision_slots(&governing.exchange, modulation);
            let remaining = if self.channel.transmission_in_progress {
                self.channel.remaining_slots.max(duration)
            } else {
                duration
            };
            debug!(
                "Collision of {} station(s) at slot {}: {} slots (governed by {} bits, {:?})",
                colliders,
                ctx.slot(),
                remaining,
                governing.exchange.payload_bits,
                governing.exchange.protection
            );
            self.channel.remaining_slots = remaining;
        }
        self.channel.transmission_in_progress = true;
        metrics::counter!(metric_defs::CHANNEL_COLLISION_EVENTS.name).increment(1);

        self.freeze(stations, ctx.slot());
        colliders
    }

    /// Count down the exchange on the air; release the medium when it ends.
    fn freeze(&mut self, stations: &mut [Station], now: Slot) {
        metrics::counter!(metric_defs::CHANNEL_BUSY_SLOTS.name).increment(1);
        self.channel.remaining_slots = self.channel.remaining_slots.saturating_sub(1);
        if self.channel.remaining_slots > 0 {
            return;
        }
        self.channel.transmission_in_progress = false;
        self.channel.rts_in_use = false;
        for station in stations.iter_mut() {
            station.end_transmission(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::NodeParams;
    use wlansim_common::Packet;

    const RATE: u64 = 11_000_000;

    fn station(config: &MacConfig, id: u32, x: f64, coverage: f64) -> Station {
        let params = NodeParams::new(NodeId(id), RATE, coverage, Position::new(x, 0.0));
        Station::new(params, config.access_timing(0))
    }

    /// Load a packet generated at slot 0 and set the backoff.
    fn load(station: &mut Station, ctx: &mut SimContext, bits: u64, backoff: u64) {
        station.enqueue(Packet::new(bits, Slot::ZERO));
        station.load_next_packet(ctx);
        station.force_backoff(backoff);
    }

    fn context() -> SimContext {
        let mut ctx = SimContext::new(42, 20_000);
        ctx.set_slot(Slot::new(10));
        ctx
    }

    fn run_until_free(arbiter: &mut MediumArbiter, stations: &mut [Station], ctx: &mut SimContext) {
        while arbiter.channel().transmission_in_progress {
            ctx.set_slot(ctx.slot() + 1);
            for s in stations.iter_mut() {
                s.force_backoff(s.backoff().max(1_000));
            }
            arbiter.step(stations, Some(BackoffPolicy::StandardDcf), ctx);
        }
    }

    #[test]
    fn test_empty_slot_counts_down() {
        let config = MacConfig::default();
        let mut arbiter = MediumArbiter::new(&config);
        let mut ctx = context();
        let mut stations = vec![station(&config, 1, 0.0, 100.0), station(&config, 2, 0.0, 100.0)];
        load(&mut stations[0], &mut ctx, 8000, 5);

        let outcome = arbiter.step(&mut stations, Some(BackoffPolicy::StandardDcf), &mut ctx);
        assert_eq!(outcome, SlotOutcome::Empty);
        assert_eq!(stations[0].backoff(), 4);
        assert_eq!(stations[1].backoff(), 0);
        assert_eq!(*arbiter.channel(), ChannelState::default());
        assert_eq!(stations[0].interval_counters().collisions, 0);
    }

    #[test]
    fn test_single_requester_transmits() {
        let config = MacConfig::default();
        let mut arbiter = MediumArbiter::new(&config);
        let mut ctx = context();
        let mut stations = vec![station(&config, 1, 0.0, 100.0), station(&config, 2, 5.0, 100.0)];
        load(&mut stations[0], &mut ctx, 8000, 0);
        load(&mut stations[1], &mut ctx, 8000, 3);

        let exchange = arbiter.exchange_for(&stations[0]).expect("loaded");
        assert_eq!(exchange.protection, Protection::Basic);
        let duration = arbiter.durations().success_slots(&exchange, Modulation::Dsss);

        let outcome = arbiter.step(&mut stations, Some(BackoffPolicy::StandardDcf), &mut ctx);
        assert_eq!(outcome, SlotOutcome::Success(NodeId(1)));
        assert_eq!(stations[0].state(), StationState::Transmitting { successful: true });
        assert_eq!(stations[1].backoff(), 3);
        assert!(arbiter.channel().transmission_in_progress);
        assert_eq!(arbiter.channel().remaining_slots, duration - 1);

        // Station 2 hears the exchange and stays frozen until it ends
        for _ in 1..duration {
            ctx.set_slot(ctx.slot() + 1);
            assert_eq!(arbiter.step(&mut stations, Some(BackoffPolicy::StandardDcf), &mut ctx), SlotOutcome::Frozen);
            assert_eq!(stations[1].backoff(), 3);
        }
        assert!(!arbiter.channel().transmission_in_progress);
        assert_eq!(stations[0].state(), StationState::Idle);
        assert!(stations[0].loaded().is_none());
        let counters = stations[0].interval_counters();
        assert_eq!(counters.successful_transmissions, 1);
        assert_eq!(counters.successful_bits, 8000);
        assert_eq!(counters.transmission_duration, duration);
    }

    #[test]
    fn test_simultaneous_requesters_collide() {
        let config = MacConfig::default();
        let mut arbiter = MediumArbiter::new(&config);
        let mut ctx = context();
        let mut stations = vec![station(&config, 1, 0.0, 100.0), station(&config, 2, 0.0, 100.0)];
        load(&mut stations[0], &mut ctx, 8000, 0);
        load(&mut stations[1], &mut ctx, 12_000, 0);

        let larger = arbiter.exchange_for(&stations[1]).expect("loaded");
        let duration = arbiter.durations().collision_slots(&larger, Modulation::Dsss);

        let outcome = arbiter.step(&mut stations, Some(BackoffPolicy::StandardDcf), &mut ctx);
        assert_eq!(outcome, SlotOutcome::Collision { colliders: 2 });
        assert_eq!(arbiter.channel().remaining_slots, duration - 1);
        assert!(!arbiter.channel().rts_in_use);
        for s in &stations {
            assert_eq!(s.state(), StationState::Transmitting { successful: false });
            assert_eq!(s.interval_counters().collisions, 1);
            assert_eq!(s.contention_window(), 62);
            assert!(s.backoff() <= 62);
        }

        run_until_free(&mut arbiter, &mut stations, &mut ctx);
        for s in &stations {
            assert_eq!(s.state(), StationState::Idle);
            assert!(s.loaded().is_some());
            assert_eq!(s.interval_counters().successful_transmissions, 0);
        }
    }

    #[test]
    fn test_basic_collider_governs_duration() {
        let config = MacConfig {
            rts_threshold: 1_000,
            ..MacConfig::default()
        };
        let mut arbiter = MediumArbiter::new(&config);
        let mut ctx = context();
        let mut stations = vec![station(&config, 1, 0.0, 100.0), station(&config, 2, 0.0, 100.0)];
        load(&mut stations[0], &mut ctx, 800, 0);
        load(&mut stations[1], &mut ctx, 12_000, 0);

        let basic = arbiter.exchange_for(&stations[0]).expect("loaded");
        assert_eq!(basic.protection, Protection::Basic);
        let duration = arbiter.durations().collision_slots(&basic, Modulation::Dsss);

        arbiter.step(&mut stations, Some(BackoffPolicy::StandardDcf), &mut ctx);
        assert_eq!(arbiter.channel().remaining_slots, duration - 1);
    }

    #[test]
    fn test_rts_exchange_freezes_hidden_stations() {
        let config = MacConfig {
            rts_threshold: 1_000,
            ..MacConfig::default()
        };
        let mut arbiter = MediumArbiter::new(&config);
        let mut ctx = context();
        let mut stations = vec![station(&config, 1, 0.0, 10.0), station(&config, 2, 100.0, 10.0)];
        load(&mut stations[0], &mut ctx, 8000, 0);
        load(&mut stations[1], &mut ctx, 8000, 5);

        assert_eq!(
            arbiter.step(&mut stations, Some(BackoffPolicy::StandardDcf), &mut ctx),
            SlotOutcome::Success(NodeId(1))
        );
        assert!(arbiter.channel().rts_in_use);
        // Hidden from the new transmitter in its first slot
        assert_eq!(stations[1].backoff(), 4);

        ctx.set_slot(ctx.slot() + 1);
        assert_eq!(arbiter.step(&mut stations, Some(BackoffPolicy::StandardDcf), &mut ctx), SlotOutcome::Frozen);
        assert_eq!(stations[1].backoff(), 4);
    }

    #[test]
    fn test_hidden_terminal_steps_on_ongoing_exchange() {
        let config = MacConfig::default();
        let mut arbiter = MediumArbiter::new(&config);
        let mut ctx = context();
        let mut stations = vec![station(&config, 1, 0.0, 10.0), station(&config, 2, 100.0, 10.0)];
        load(&mut stations[0], &mut ctx, 8000, 0);
        load(&mut stations[1], &mut ctx, 100, 2);

        // Slot 1: station 1 starts, hidden station 2 keeps counting
        arbiter.step(&mut stations, Some(BackoffPolicy::StandardDcf), &mut ctx);
        assert_eq!(stations[1].backoff(), 1);
        // Slot 2: station 2 reaches zero
        ctx.set_slot(ctx.slot() + 1);
        assert_eq!(arbiter.step(&mut stations, Some(BackoffPolicy::StandardDcf), &mut ctx), SlotOutcome::Frozen);
        assert_eq!(stations[1].backoff(), 0);

        // Slot 3: station 2 requests and collides with the exchange on the air
        ctx.set_slot(ctx.slot() + 1);
        let before = arbiter.channel().remaining_slots;
        let outcome = arbiter.step(&mut stations, Some(BackoffPolicy::StandardDcf), &mut ctx);
        assert_eq!(outcome, SlotOutcome::Collision { colliders: 1 });
        // The short collision cannot cut the longer exchange
        assert_eq!(arbiter.channel().remaining_slots, before - 1);

        assert_eq!(stations[0].state(), StationState::Transmitting { successful: false });
        assert_eq!(stations[1].state(), StationState::Transmitting { successful: false });
        for s in &stations {
            assert_eq!(s.interval_counters().collisions, 1);
            assert_eq!(s.contention_window(), 62);
        }

        run_until_free(&mut arbiter, &mut stations, &mut ctx);
        assert_eq!(stations[0].interval_counters().successful_transmissions, 0);
        assert!(stations[0].loaded().is_some());
    }

    #[test]
    fn test_out_of_range_station_skips_collision() {
        let config = MacConfig::default();
        let mut arbiter = MediumArbiter::new(&config);
        let mut ctx = context();
        let mut stations = vec![
            station(&config, 1, 0.0, 10.0),
            station(&config, 2, 50.0, 10.0),
            station(&config, 3, 25.0, 10.0),
        ];
        stations[2].set_position(Position::new(25.0, 55.0));
        load(&mut stations[0], &mut ctx, 8000, 0);
        load(&mut stations[1], &mut ctx, 8000, 0);
        load(&mut stations[2], &mut ctx, 8000, 3);

        // Both requests land in the same slot, so they collide despite the distance
        let outcome = arbiter.step(&mut stations, Some(BackoffPolicy::StandardDcf), &mut ctx);
        assert_eq!(outcome, SlotOutcome::Collision { colliders: 2 });
        assert_eq!(stations[2].state(), StationState::Idle);
        assert_eq!(stations[2].interval_counters().collisions, 0);
        assert_eq!(stations[2].backoff(), 2);
    }

    #[test]
    fn test_consecutive_collisions_double_window() {
        let config = MacConfig::default();
        let mut arbiter = MediumArbiter::new(&config);
        let mut ctx = context();
        let mut stations = vec![station(&config, 1, 0.0, 100.0), station(&config, 2, 0.0, 100.0)];
        load(&mut stations[0], &mut ctx, 1000, 0);
        load(&mut stations[1], &mut ctx, 1000, 0);

        for n in 1..=7u32 {
            for s in stations.iter_mut() {
                s.force_backoff(0);
            }
            let outcome = arbiter.step(&mut stations, Some(BackoffPolicy::StandardDcf), &mut ctx);
            assert_eq!(outcome, SlotOutcome::Collision { colliders: 2 });
            let expected = (31u32 << n).min(1023);
            for s in &stations {
                assert_eq!(s.contention_window(), expected);
                assert_eq!(s.interval_counters().collisions, u64::from(n));
            }
            run_until_free(&mut arbiter, &mut stations, &mut ctx);
        }
    }

    #[test]
    fn test_window_stays_in_bounds() {
        let config = MacConfig::default();
        let mut ctx = context();
        for policy in BackoffPolicy::BUILTIN {
            let mut arbiter = MediumArbiter::new(&config);
            let mut stations: Vec<Station> = (0..6).map(|i| station(&config, i, 0.0, 100.0)).collect();
            for slot in 0..20_000u64 {
                ctx.set_slot(Slot::new(10 + slot));
                for s in stations.iter_mut() {
                    if s.queue_len() < 2 {
                        s.enqueue(Packet::new(4000, ctx.slot()));
                    }
                    s.load_next_packet(&mut ctx);
                }
                arbiter.step(&mut stations, Some(policy), &mut ctx);
                for s in &stations {
                    let cw = s.contention_window();
                    assert!(cw >= 1 && cw <= s.timing().cw_max, "{} {}", policy, cw);
                    if policy == BackoffPolicy::StandardDcf {
                        assert!(cw >= s.timing().cw_min);
                    }
                }
            }
        }
    }
}
