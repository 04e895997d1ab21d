//! # wlansim-runner library
//!
//! Library interface for the wlansim slot engine.
//!
//! [`Simulator`] owns the station registry, the medium arbiter, the strategy
//! selector and the single seeded random generator. Callers drive it one
//! statistics interval at a time with [`Simulator::simulate`] and read the
//! interval-scoped figures through the reporting getters in between; topology
//! and traffic may only change between intervals.
//!
//! [`Simulator::run_with_progress`] chains intervals over the whole scenario
//! duration, writes the statistics files of [`report`], and optionally lets
//! the strategy selector adapt the backoff policy after every interval.

pub mod metrics_export;
pub mod report;

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, trace};
use wlansim_common::{slots_to_secs, Identifier, NodeId, Position, SimContext, SimError, Slot, SourceId};
use wlansim_mac::{
    MacConfig, MacCounters, MediumArbiter, NodeParams, SlotOutcome, Station, StationRegistry, StrategySelector,
};
use wlansim_model::{BuiltSimulation, SimulationSettings, DEFAULT_DURATION_MS, DEFAULT_INTERVAL_MS};
use wlansim_traffic::Source;

pub use report::{ReportWriter, Statistic};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during simulation.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Model error.
    #[error("Model error: {0}")]
    Model(#[from] wlansim_model::ModelError),

    /// Simulation error.
    #[error("Simulation error: {0}")]
    Simulation(#[from] SimError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Format a duration with fixed width (e.g., " 1h23m45s").
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    format!("{:2}h{:02}m{:02}s", hours, minutes, seconds)
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Derived performance figures of one station, or of the whole cell.
///
/// Every ratio whose denominator is zero (no delivered packet, an empty
/// interval) is reported as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NodeStatistics {
    /// Delivered payload in bits per second.
    pub throughput_bps: f64,
    /// Delivered packets per second.
    pub throughput_pps: f64,
    /// Fraction of the station's rate spent on delivered payload.
    pub utilization: f64,
    /// Mean slots from loading to delivery, in milliseconds.
    pub media_access_delay_ms: f64,
    /// Mean slots from generation to loading, in milliseconds.
    pub queuing_delay_ms: f64,
    /// Media access plus queuing delay.
    pub total_delay_ms: f64,
    /// Standard deviation of the per-packet total delay, in milliseconds.
    pub jitter_ms: f64,
    /// Mean queue length per slot.
    pub mean_queue_length: f64,
    /// Collisions per delivered packet.
    pub retransmission_attempts: f64,
}

impl NodeStatistics {
    /// Compute figures from counters gathered over `slots` slots.
    pub fn from_counters(counters: &MacCounters, slots: u64, slot_ns: u64, rate_bps: u64) -> Self {
        let seconds = slots_to_secs(slots, slot_ns);
        let bits = counters.successful_bits as f64;
        let utilization = ratio(bits, seconds * rate_bps as f64);
        NodeStatistics {
            throughput_bps: ratio(bits, seconds),
            throughput_pps: ratio(counters.successful_transmissions as f64, seconds),
            utilization,
            mean_queue_length: ratio(counters.queue_length_sum as f64, slots as f64),
            ..Self::delays(counters, slot_ns)
        }
    }

    /// Figures for the whole cell.
    ///
    /// Rates and queue lengths are sums over the stations; delays, jitter
    /// and retransmissions are means over every delivered packet.
    pub fn system<'a, I>(per_node: I, totals: &MacCounters, slot_ns: u64) -> Self
    where
        I: IntoIterator<Item = &'a NodeStatistics>,
    {
        let mut system = Self::delays(totals, slot_ns);
        for node in per_node {
            system.throughput_bps += node.throughput_bps;
            system.throughput_pps += node.throughput_pps;
            system.utilization += node.utilization;
            system.mean_queue_length += node.mean_queue_length;
        }
        system
    }

    fn delays(counters: &MacCounters, slot_ns: u64) -> Self {
        let slot_ms = slot_ns as f64 / 1_000_000.0;
        let successes = counters.successful_transmissions as f64;
        let media_access_delay_ms = ratio(counters.transmission_duration as f64, successes) * slot_ms;
        let queuing_delay_ms = ratio(counters.queuing_delay as f64, successes) * slot_ms;
        let mean = ratio(counters.total_delay as f64, successes);
        let mean_square = ratio(counters.delay_squared, successes);
        NodeStatistics {
            media_access_delay_ms,
            queuing_delay_ms,
            total_delay_ms: media_access_delay_ms + queuing_delay_ms,
            jitter_ms: (mean_square - mean * mean).max(0.0).sqrt() * slot_ms,
            retransmission_attempts: ratio(counters.collisions as f64, successes),
            ..NodeStatistics::default()
        }
    }
}

/// Per-node totals and figures over the whole run.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStats {
    /// Station id.
    pub id: NodeId,
    /// Packets delivered.
    pub successful_transmissions: u64,
    /// Payload bits delivered.
    pub successful_bits: u64,
    /// Collisions taken part in.
    pub collisions: u64,
    /// Packets still queued at the end of the run.
    pub queued: usize,
    /// Final contention window.
    pub contention_window: u32,
    /// Derived figures.
    pub statistics: NodeStatistics,
}

/// Slot outcomes counted by the simulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    /// Slots where the medium was free and nobody requested.
    pub empty_slots: u64,
    /// Slots where a sole requester took the medium.
    pub success_slots: u64,
    /// Slots where a collision started or extended.
    pub collision_slots: u64,
    /// Slots where the medium stayed occupied.
    pub frozen_slots: u64,
}

impl ChannelStats {
    fn record(&mut self, outcome: SlotOutcome) {
        match outcome {
            SlotOutcome::Empty => self.empty_slots += 1,
            SlotOutcome::Success(_) => self.success_slots += 1,
            SlotOutcome::Collision { .. } => self.collision_slots += 1,
            SlotOutcome::Frozen => self.frozen_slots += 1,
        }
    }
}

/// Mean values over every simulated slot.
#[derive(Debug, Clone, Serialize)]
pub struct LifetimeSummary {
    /// Slots simulated so far.
    pub slots: u64,
    /// Per-station figures, in registration order.
    pub nodes: Vec<NodeStats>,
    /// Figures for the whole cell.
    pub system: NodeStatistics,
}

/// Statistics collected during a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationStats {
    /// Seed of the random generator.
    pub seed: u64,
    /// Statistics intervals simulated.
    pub intervals: u64,
    /// Slots simulated.
    pub slots: u64,
    /// Simulated time in seconds.
    pub simulated_time_s: f64,
    /// Wall clock time in milliseconds.
    pub wall_time_ms: u64,
    /// Slot outcomes.
    pub channel: ChannelStats,
    /// Policy current at the end of the run.
    pub strategy: Option<String>,
    /// Per-station lifetime figures.
    pub nodes: Vec<NodeStats>,
    /// Lifetime figures of the whole cell.
    pub system: NodeStatistics,
}

// ============================================================================
// Progress Reporting
// ============================================================================

/// Progress information passed to the progress callback during a run.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Current simulated time in seconds.
    pub sim_time_s: f64,
    /// Scenario duration in seconds.
    pub target_time_s: f64,
    /// Elapsed wall clock time since start.
    pub wall_elapsed: Duration,
    /// Intervals simulated so far.
    pub intervals: u64,
    /// Simulation time multiplier (how many times faster than real-time).
    pub time_multiplier: f64,
    /// Estimated time remaining based on current pace.
    pub estimated_remaining: Duration,
    /// Progress as a percentage (0.0 to 100.0).
    pub progress_percent: f64,
}

// ============================================================================
// Simulator
// ============================================================================

/// Slot-level CSMA/CA simulator.
pub struct Simulator {
    mac: MacConfig,
    arbiter: MediumArbiter,
    stations: StationRegistry,
    selector: StrategySelector,
    context: SimContext,
    seed: u64,
    duration_ms: u64,
    interval_ms: u64,
    adaptive: bool,
    /// Length of the last interval in slots.
    interval_slots: u64,
    /// Slots simulated over every interval.
    total_slots: u64,
    intervals: u64,
    channel: ChannelStats,
}

impl Simulator {
    /// Create an empty simulator with the built-in policies.
    pub fn new(mac: MacConfig, seed: u64) -> Self {
        let context = SimContext::new(seed, mac.profile().slot_ns);
        Simulator {
            arbiter: MediumArbiter::new(&mac),
            mac,
            stations: StationRegistry::new(),
            selector: StrategySelector::with_builtin_policies(),
            context,
            seed,
            duration_ms: DEFAULT_DURATION_MS as u64,
            interval_ms: DEFAULT_INTERVAL_MS as u64,
            adaptive: false,
            interval_slots: 0,
            total_slots: 0,
            intervals: 0,
            channel: ChannelStats::default(),
        }
    }

    /// Create a simulator from a built scenario.
    pub fn from_built(simulation: BuiltSimulation, seed: u64) -> Self {
        let mut simulator = Self::new(simulation.mac, seed);
        simulator.stations = simulation.stations;
        simulator.selector = simulation.selector;
        simulator
    }

    /// Apply the run schedule of a scenario.
    pub fn configure(&mut self, settings: &SimulationSettings) {
        self.duration_ms = settings.duration_ms.round().max(1.0) as u64;
        self.interval_ms = settings.interval_ms.round().max(1.0) as u64;
        self.adaptive = settings.adaptive;
    }

    /// Set the scenario duration.
    pub fn set_duration_ms(&mut self, duration_ms: u64) {
        self.duration_ms = duration_ms.max(1);
    }

    /// Set the statistics interval.
    pub fn set_interval_ms(&mut self, interval_ms: u64) {
        self.interval_ms = interval_ms.max(1);
    }

    /// Enable or disable per-interval policy adaptation.
    pub fn set_adaptive(&mut self, adaptive: bool) {
        self.adaptive = adaptive;
    }

    pub fn mac(&self) -> &MacConfig {
        &self.mac
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn arbiter(&self) -> &MediumArbiter {
        &self.arbiter
    }

    pub fn channel_stats(&self) -> &ChannelStats {
        &self.channel
    }

    pub fn selector(&self) -> &StrategySelector {
        &self.selector
    }

    pub fn selector_mut(&mut self) -> &mut StrategySelector {
        &mut self.selector
    }

    /// Slot length in nanoseconds.
    pub fn slot_ns(&self) -> u64 {
        self.context.slot_ns()
    }

    // ------------------------------------------------------------------------
    // Node and source management
    // ------------------------------------------------------------------------

    /// Register a station.
    ///
    /// An out-of-range access category is treated as best effort.
    pub fn add_node(&mut self, mut params: NodeParams) -> Result<(), SimError> {
        if self.stations.contains(params.id) {
            return Err(SimError::DuplicateIdentifier(Identifier::Node(params.id)));
        }
        params.access_category = MacConfig::normalize_access_category(params.access_category);
        let timing = self.mac.access_timing(params.access_category);
        debug!(
            "Node[{}]: added, rate {} bps, cw [{}, {}], aifs {} slots",
            params.id, params.rate_bps, timing.cw_min, timing.cw_max, timing.aifs_slots
        );
        self.stations.insert(Station::new(params, timing))
    }

    /// Remove a station with its sources and statistics.
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), SimError> {
        self.stations.remove(id)?;
        debug!("Node[{}]: removed", id);
        Ok(())
    }

    /// Remove every station and free the medium.
    pub fn remove_all_nodes(&mut self) {
        self.stations.clear();
        self.arbiter.reset();
    }

    /// Move a station or change its coverage; `None` keeps a field.
    pub fn change_node_params(
        &mut self,
        id: NodeId,
        coverage_m: Option<f64>,
        x: Option<f64>,
        y: Option<f64>,
    ) -> Result<(), SimError> {
        let station = self.stations.get_mut(id)?;
        if let Some(coverage_m) = coverage_m {
            station.set_coverage(coverage_m);
        }
        if x.is_some() || y.is_some() {
            let current = station.params().position;
            station.set_position(Position::new(x.unwrap_or(current.x), y.unwrap_or(current.y)));
        }
        Ok(())
    }

    /// Attach a traffic source to a station.
    pub fn append_source(&mut self, node: NodeId, source: Box<dyn Source>) -> Result<(), SimError> {
        self.stations.get_mut(node)?.append_source(source)
    }

    /// Detach a traffic source; `Ok(false)` when the station has no such source.
    pub fn remove_source(&mut self, node: NodeId, source: SourceId) -> Result<bool, SimError> {
        Ok(self.stations.get_mut(node)?.remove_source(source))
    }

    /// Detach every traffic source of a station.
    pub fn remove_all_sources(&mut self, node: NodeId) -> Result<(), SimError> {
        self.stations.get_mut(node)?.remove_all_sources();
        Ok(())
    }

    /// Station ids in registration order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.stations.ids()
    }

    pub fn node_count(&self) -> usize {
        self.stations.len()
    }

    /// Look up a station.
    pub fn node(&self, id: NodeId) -> Result<&Station, SimError> {
        self.stations.get(id)
    }

    // ------------------------------------------------------------------------
    // Simulation
    // ------------------------------------------------------------------------

    /// Simulate the interval `[start_ms, end_ms]` of simulated time.
    ///
    /// Intervals are inclusive and chain as `simulate(1, 1000)`,
    /// `simulate(1001, 2000)`, ... Interval statistics are reset first and
    /// folded into the lifetime statistics at the end.
    pub fn simulate(&mut self, start_ms: u64, end_ms: u64) {
        for station in self.stations.iter_mut() {
            station.reset_interval();
        }
        let first = self.context.millis_to_slots(start_ms.saturating_sub(1) as f64) + 1;
        let last = self.context.millis_to_slots(end_ms as f64);
        self.interval_slots = self
            .context
            .millis_to_slots((end_ms + 1).saturating_sub(start_ms) as f64);

        for index in first..=last {
            self.step(Slot::new(index));
        }

        for station in self.stations.iter_mut() {
            station.close_interval();
        }
        self.total_slots += self.interval_slots;
        self.intervals += 1;
    }

    fn step(&mut self, slot: Slot) {
        self.context.set_slot(slot);
        for station in self.stations.iter_mut() {
            station.collect_arrivals(&mut self.context);
            station.load_next_packet(&mut self.context);
            station.record_queue_length();
        }
        let policy = self.selector.current_policy();
        let outcome = self
            .arbiter
            .step(self.stations.stations_mut(), policy, &mut self.context);
        trace!("Slot {}: {:?}", slot, outcome);
        self.channel.record(outcome);
    }

    /// Score the current policy on the last interval and pick the next one.
    pub fn adapt_strategy(&mut self) -> Result<Option<u32>, SimError> {
        if let Some(current) = self.selector.current() {
            let successes = i64::try_from(self.system_successes()).unwrap_or(i64::MAX);
            let collisions = i64::try_from(self.system_collisions()).unwrap_or(i64::MAX);
            self.selector.reward(current, successes)?;
            self.selector.penalise(current, collisions)?;
        }
        Ok(self.selector.select_strategy(self.context.rng()))
    }

    /// Run the configured duration interval by interval.
    pub fn run(&mut self, report: Option<&mut ReportWriter>) -> Result<SimulationStats, RunnerError> {
        self.run_with_progress(None, report, |_, _, _| {})
    }

    /// Run the configured duration with an optional stop flag and a progress callback.
    ///
    /// The callback is invoked about every five seconds of wall time and once
    /// more at the end with `is_final` set.
    pub fn run_with_progress<F>(
        &mut self,
        stop_flag: Option<Arc<AtomicBool>>,
        mut report: Option<&mut ReportWriter>,
        mut on_progress: F,
    ) -> Result<SimulationStats, RunnerError>
    where
        F: FnMut(&Self, ProgressInfo, bool), // bool = is_final
    {
        let start_time = Instant::now();
        let progress_interval = Duration::from_secs(5);
        let mut last_progress = Instant::now();
        let mut last_progress_sim_time = self.current_time_s();

        if let Some(report) = report.as_deref_mut() {
            report.write_headers(self)?;
        }

        let mut start_ms = 1;
        while start_ms <= self.duration_ms {
            if let Some(ref flag) = stop_flag {
                if flag.load(Ordering::Relaxed) {
                    break;
                }
            }

            let end_ms = (start_ms + self.interval_ms - 1).min(self.duration_ms);
            self.simulate(start_ms, end_ms);
            let system = self.system_statistics();
            info!(
                "t={:.3}s: {:.0} bps, {} successes, {} collisions, delay {:.3} ms",
                self.current_time_s(),
                system.throughput_bps,
                self.system_successes(),
                self.system_collisions(),
                system.total_delay_ms
            );
            if let Some(report) = report.as_deref_mut() {
                report.write_interval(self)?;
            }
            if self.adaptive {
                self.adapt_strategy()?;
            }
            start_ms = end_ms + 1;

            if last_progress.elapsed() >= progress_interval {
                let sim_time = self.current_time_s();
                let wall_delta = last_progress.elapsed().as_secs_f64();
                let time_multiplier = ratio(sim_time - last_progress_sim_time, wall_delta);
                let remaining_sim = self.duration_ms as f64 / 1000.0 - sim_time;
                let estimated_remaining = if time_multiplier > 0.0 {
                    Duration::from_secs_f64((remaining_sim / time_multiplier).max(0.0))
                } else {
                    Duration::ZERO
                };
                let progress = self.progress_info(start_time.elapsed(), time_multiplier, estimated_remaining);
                on_progress(self, progress, false);
                last_progress = Instant::now();
                last_progress_sim_time = sim_time;
            }
        }

        if let Some(report) = report.as_deref_mut() {
            report.write_mean_values(self)?;
        }

        let wall_elapsed = start_time.elapsed();
        let time_multiplier = ratio(self.current_time_s(), wall_elapsed.as_secs_f64());
        let progress = self.progress_info(wall_elapsed, time_multiplier, Duration::ZERO);
        on_progress(self, progress, true);

        let mut stats = self.stats();
        stats.wall_time_ms = wall_elapsed.as_millis() as u64;
        Ok(stats)
    }

    fn progress_info(&self, wall_elapsed: Duration, time_multiplier: f64, estimated_remaining: Duration) -> ProgressInfo {
        ProgressInfo {
            sim_time_s: self.current_time_s(),
            target_time_s: self.duration_ms as f64 / 1000.0,
            wall_elapsed,
            intervals: self.intervals,
            time_multiplier,
            estimated_remaining,
            progress_percent: self.progress_percent(),
        }
    }

    /// Summary of the run so far.
    pub fn stats(&self) -> SimulationStats {
        let summary = self.lifetime_summary();
        SimulationStats {
            seed: self.seed,
            intervals: self.intervals,
            slots: summary.slots,
            simulated_time_s: self.current_time_s(),
            wall_time_ms: 0,
            channel: self.channel,
            strategy: self
                .selector
                .current()
                .and_then(|id| self.selector.candidates().iter().find(|c| c.id == id))
                .map(|c| c.name.clone()),
            nodes: summary.nodes,
            system: summary.system,
        }
    }

    // ------------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------------

    /// Share of the scenario duration simulated so far, capped at 100.
    pub fn progress_percent(&self) -> f64 {
        let duration_s = self.duration_ms as f64 / 1000.0;
        (ratio(self.current_time_s(), duration_s) * 100.0).min(100.0)
    }

    /// Simulated time of the current slot in seconds.
    pub fn current_time_s(&self) -> f64 {
        self.context.time_secs()
    }

    /// Interval figures of one station.
    pub fn node_statistics(&self, id: NodeId) -> Result<NodeStatistics, SimError> {
        let station = self.stations.get(id)?;
        Ok(self.interval_statistics(station))
    }

    /// Interval figures of the whole cell.
    pub fn system_statistics(&self) -> NodeStatistics {
        let per_node: Vec<NodeStatistics> = self.stations.iter().map(|s| self.interval_statistics(s)).collect();
        let mut totals = MacCounters::default();
        for station in self.stations.iter() {
            totals.absorb(station.interval_counters());
        }
        NodeStatistics::system(&per_node, &totals, self.slot_ns())
    }

    fn interval_statistics(&self, station: &Station) -> NodeStatistics {
        NodeStatistics::from_counters(
            station.interval_counters(),
            self.interval_slots,
            self.slot_ns(),
            station.params().rate_bps,
        )
    }

    /// Collisions of every station in the last interval.
    pub fn system_collisions(&self) -> u64 {
        self.stations.iter().map(|s| s.interval_counters().collisions).sum()
    }

    /// Packets delivered by every station in the last interval.
    pub fn system_successes(&self) -> u64 {
        self.stations
            .iter()
            .map(|s| s.interval_counters().successful_transmissions)
            .sum()
    }

    /// Figures over every slot simulated so far.
    pub fn lifetime_summary(&self) -> LifetimeSummary {
        let slot_ns = self.slot_ns();
        let mut totals = MacCounters::default();
        let nodes: Vec<NodeStats> = self
            .stations
            .iter()
            .map(|station| {
                let counters = station.lifetime_counters();
                totals.absorb(counters);
                NodeStats {
                    id: station.id(),
                    successful_transmissions: counters.successful_transmissions,
                    successful_bits: counters.successful_bits,
                    collisions: counters.collisions,
                    queued: station.queue_len(),
                    contention_window: station.contention_window(),
                    statistics: NodeStatistics::from_counters(
                        counters,
                        self.total_slots,
                        slot_ns,
                        station.params().rate_bps,
                    ),
                }
            })
            .collect();
        let system = NodeStatistics::system(nodes.iter().map(|n| &n.statistics), &totals, slot_ns);
        LifetimeSummary {
            slots: self.total_slots,
            nodes,
            system,
        }
    }

    pub fn throughput_bps(&self, node: NodeId) -> Result<f64, SimError> {
        Ok(self.node_statistics(node)?.throughput_bps)
    }

    pub fn throughput_pps(&self, node: NodeId) -> Result<f64, SimError> {
        Ok(self.node_statistics(node)?.throughput_pps)
    }

    pub fn utilization(&self, node: NodeId) -> Result<f64, SimError> {
        Ok(self.node_statistics(node)?.utilization)
    }

    pub fn media_access_delay_ms(&self, node: NodeId) -> Result<f64, SimError> {
        Ok(self.node_statistics(node)?.media_access_delay_ms)
    }

    pub fn queuing_delay_ms(&self, node: NodeId) -> Result<f64, SimError> {
        Ok(self.node_statistics(node)?.queuing_delay_ms)
    }

    pub fn total_delay_ms(&self, node: NodeId) -> Result<f64, SimError> {
        Ok(self.node_statistics(node)?.total_delay_ms)
    }

    pub fn jitter_ms(&self, node: NodeId) -> Result<f64, SimError> {
        Ok(self.node_statistics(node)?.jitter_ms)
    }

    pub fn mean_queue_length(&self, node: NodeId) -> Result<f64, SimError> {
        Ok(self.node_statistics(node)?.mean_queue_length)
    }

    pub fn retransmission_attempts(&self, node: NodeId) -> Result<f64, SimError> {
        Ok(self.node_statistics(node)?.retransmission_attempts)
    }

    pub fn system_throughput_bps(&self) -> f64 {
        self.system_statistics().throughput_bps
    }

    pub fn system_throughput_pps(&self) -> f64 {
        self.system_statistics().throughput_pps
    }

    pub fn system_utilization(&self) -> f64 {
        self.system_statistics().utilization
    }

    pub fn system_media_access_delay_ms(&self) -> f64 {
        self.system_statistics().media_access_delay_ms
    }

    pub fn system_queuing_delay_ms(&self) -> f64 {
        self.system_statistics().queuing_delay_ms
    }

    pub fn system_total_delay_ms(&self) -> f64 {
        self.system_statistics().total_delay_ms
    }

    pub fn system_jitter_ms(&self) -> f64 {
        self.system_statistics().jitter_ms
    }

    pub fn system_mean_queue_length(&self) -> f64 {
        self.system_statistics().mean_queue_length
    }

    pub fn system_retransmission_attempts(&self) -> f64 {
        self.system_statistics().retransmission_attempts
    }
}

/// Create a simulator from a built scenario and its settings.
pub fn create_simulator(simulation: BuiltSimulation, settings: &SimulationSettings) -> Simulator {
    let mut simulator = Simulator::from_built(simulation, settings.seed);
    simulator.configure(settings);
    simulator
}

// Re-export key types for convenience
pub use wlansim_model::{build_simulation, load_model, load_model_from_str, load_models};

#[cfg(test)]
mod tests {
    use super::*;
    use wlansim_phy::PhyMode;
    use wlansim_traffic::{Distribution, GenericSource};

    fn mac_b() -> MacConfig {
        MacConfig {
            phy: PhyMode::B,
            ..MacConfig::default()
        }
    }

    fn saturating_source(id: u32) -> Box<dyn Source> {
        Box::new(
            GenericSource::new(SourceId(id), Distribution::Constant, 0.1, Distribution::Constant, 8000.0).unwrap(),
        )
    }

    fn params(id: u32, x: f64) -> NodeParams {
        NodeParams::new(NodeId(id), 11_000_000, 100.0, Position::new(x, 0.0))
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(3723)), " 1h02m03s");
        assert_eq!(format_duration(Duration::ZERO), " 0h00m00s");
    }

    #[test]
    fn test_statistics_zero_successes() {
        let counters = MacCounters {
            collisions: 4,
            queue_length_sum: 100,
            ..MacCounters::default()
        };
        let stats = NodeStatistics::from_counters(&counters, 50, 20_000, 11_000_000);
        assert_eq!(stats.throughput_bps, 0.0);
        assert_eq!(stats.media_access_delay_ms, 0.0);
        assert_eq!(stats.jitter_ms, 0.0);
        assert_eq!(stats.retransmission_attempts, 0.0);
        assert!((stats.mean_queue_length - 2.0).abs() < 1e-12);

        let empty = NodeStatistics::from_counters(&MacCounters::default(), 0, 20_000, 11_000_000);
        assert_eq!(empty, NodeStatistics::default());
    }

    #[test]
    fn test_statistics_formulas() {
        // 50 000 slots of 20 us: one second
        let counters = MacCounters {
            successful_bits: 80_000,
            successful_transmissions: 10,
            collisions: 5,
            transmission_duration: 500,
            queuing_delay: 100,
            total_delay: 600,
            delay_squared: 10.0 * 60.0 * 60.0,
            queue_length_sum: 25_000,
        };
        let stats = NodeStatistics::from_counters(&counters, 50_000, 20_000, 1_000_000);
        assert!((stats.throughput_bps - 80_000.0).abs() < 1e-6);
        assert!((stats.throughput_pps - 10.0).abs() < 1e-9);
        assert!((stats.utilization - 0.08).abs() < 1e-9);
        assert!((stats.media_access_delay_ms - 1.0).abs() < 1e-9);
        assert!((stats.queuing_delay_ms - 0.2).abs() < 1e-9);
        assert!((stats.total_delay_ms - 1.2).abs() < 1e-9);
        // every packet saw the same delay
        assert!(stats.jitter_ms.abs() < 1e-9);
        assert!((stats.mean_queue_length - 0.5).abs() < 1e-12);
        assert!((stats.retransmission_attempts - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_add_remove_node_errors() {
        let mut sim = Simulator::new(mac_b(), 1);
        sim.add_node(params(1, 0.0)).unwrap();
        assert_eq!(
            sim.add_node(params(1, 5.0)),
            Err(SimError::DuplicateIdentifier(Identifier::Node(NodeId(1))))
        );
        assert_eq!(
            sim.remove_node(NodeId(2)),
            Err(SimError::UnknownIdentifier(Identifier::Node(NodeId(2))))
        );
        assert!(sim.node_statistics(NodeId(2)).is_err());
        assert_eq!(sim.node_count(), 1);
    }

    #[test]
    fn test_source_management() {
        let mut sim = Simulator::new(mac_b(), 1);
        sim.add_node(params(1, 0.0)).unwrap();
        sim.append_source(NodeId(1), saturating_source(1)).unwrap();
        assert!(matches!(
            sim.append_source(NodeId(1), saturating_source(1)),
            Err(SimError::DuplicateIdentifier(_))
        ));
        assert!(matches!(
            sim.append_source(NodeId(9), saturating_source(1)),
            Err(SimError::UnknownIdentifier(_))
        ));
        assert_eq!(sim.remove_source(NodeId(1), SourceId(7)), Ok(false));
        assert_eq!(sim.remove_source(NodeId(1), SourceId(1)), Ok(true));
        assert!(sim.remove_source(NodeId(9), SourceId(1)).is_err());
        sim.remove_all_sources(NodeId(1)).unwrap();
        assert!(sim.node(NodeId(1)).unwrap().source_ids().is_empty());
    }

    #[test]
    fn test_change_node_params_keeps_unset_fields() {
        let mut sim = Simulator::new(mac_b(), 1);
        sim.add_node(params(1, 3.0)).unwrap();
        sim.change_node_params(NodeId(1), Some(40.0), None, Some(7.0)).unwrap();
        let node = sim.node(NodeId(1)).unwrap().params();
        assert_eq!(node.coverage_m, 40.0);
        assert_eq!(node.position, Position::new(3.0, 7.0));
        assert!(sim.change_node_params(NodeId(2), None, None, None).is_err());
    }

    #[test]
    fn test_out_of_range_access_category_is_best_effort() {
        let mut sim = Simulator::new(mac_b(), 1);
        sim.add_node(params(1, 0.0).with_access_category(7)).unwrap();
        assert_eq!(sim.node(NodeId(1)).unwrap().params().access_category, 0);
    }

    #[test]
    fn test_simulate_interval_slots() {
        let mut sim = Simulator::new(mac_b(), 1);
        sim.add_node(params(1, 0.0)).unwrap();
        sim.simulate(1, 1000);
        // 20 us slots
        assert_eq!(sim.interval_slots, 50_000);
        assert_eq!(sim.context.slot().index(), 50_000);
        sim.simulate(1001, 2000);
        assert_eq!(sim.context.slot().index(), 100_000);
        assert!((sim.current_time_s() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_idle_cell_reports_nothing() {
        let mut sim = Simulator::new(mac_b(), 1);
        sim.add_node(params(1, 0.0)).unwrap();
        sim.simulate(1, 100);
        assert_eq!(sim.system_statistics(), NodeStatistics::default());
        assert_eq!(sim.channel_stats().empty_slots, 5_000);
    }

    #[test]
    fn test_system_throughput_is_sum_of_nodes() {
        let mut sim = Simulator::new(mac_b(), 11);
        for id in 1..=3 {
            sim.add_node(params(id, id as f64)).unwrap();
            sim.append_source(NodeId(id), saturating_source(1)).unwrap();
        }
        sim.simulate(1, 500);
        let sum: f64 = sim
            .node_ids()
            .into_iter()
            .map(|id| sim.throughput_bps(id).unwrap())
            .sum();
        assert!(sum > 0.0);
        assert!((sim.system_throughput_bps() - sum).abs() < 1e-6);
        let successes: u64 = sim
            .node_ids()
            .into_iter()
            .map(|id| sim.node(id).unwrap().interval_counters().successful_transmissions)
            .sum();
        assert_eq!(sim.system_successes(), successes);
    }

    #[test]
    fn test_progress_percent_capped() {
        let mut sim = Simulator::new(mac_b(), 1);
        sim.set_duration_ms(100);
        sim.simulate(1, 50);
        assert!((sim.progress_percent() - 50.0).abs() < 1e-9);
        sim.simulate(51, 300);
        assert_eq!(sim.progress_percent(), 100.0);
    }

    #[test]
    fn test_adaptive_run_selects_candidates() {
        let mut sim = Simulator::new(mac_b(), 5);
        sim.set_duration_ms(400);
        sim.set_interval_ms(100);
        sim.set_adaptive(true);
        for id in 1..=2 {
            sim.add_node(params(id, 0.0)).unwrap();
            sim.append_source(NodeId(id), saturating_source(1)).unwrap();
        }
        let stats = sim.run(None).unwrap();
        assert_eq!(stats.intervals, 4);
        let used: u64 = sim.selector().candidates().iter().map(|c| c.usage).sum();
        assert_eq!(used, 4);
        assert!(stats.strategy.is_some());
    }

    #[test]
    fn test_run_stops_on_flag() {
        let mut sim = Simulator::new(mac_b(), 1);
        sim.set_duration_ms(1000);
        sim.set_interval_ms(100);
        let stop = Arc::new(AtomicBool::new(true));
        let mut finals = 0;
        let stats = sim
            .run_with_progress(Some(stop), None, |_, progress, is_final| {
                if is_final {
                    finals += 1;
                    assert_eq!(progress.intervals, 0);
                }
            })
            .unwrap();
        assert_eq!(finals, 1);
        assert_eq!(stats.slots, 0);
    }
}
