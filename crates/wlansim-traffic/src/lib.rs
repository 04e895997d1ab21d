//! # wlansim-traffic
//!
//! Traffic sources that feed packets into wlansim stations.
//!
//! This crate provides:
//!
//! - [`Source`] - the interface the simulation loop polls once per slot.
//! - [`Distribution`] and [`RandomVariable`] - truncated statistical samplers
//!   selected by a one-letter code (`c`, `u`, `e`, `l`, `p`).
//! - [`Session`] - a schedule of [`VirtualPacket`]s released as their slot comes due.
//! - Four source models: [`GenericSource`], [`FtpSource`], [`HttpSource`] and
//!   [`VideoSource`].

pub mod ftp;
pub mod generic;
pub mod http;
pub mod video;

pub use ftp::FtpSource;
pub use generic::GenericSource;
pub use http::HttpSource;
pub use video::VideoSource;

use rand::Rng;
use rand_distr::{Distribution as _, Exp, LogNormal, Pareto};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use wlansim_common::{Packet, SimContext, SimError, Slot, SourceId};

// ============================================================================
// Source Interface
// ============================================================================

/// A packet generator attached to one station.
///
/// The simulation loop calls [`Source::synchronize`] and then
/// [`Source::poll_packets`] exactly once per slot, before the medium arbiter
/// runs for that slot.
pub trait Source: Send {
    /// Source id, unique within its station.
    fn id(&self) -> SourceId;

    /// Short name of the traffic model.
    fn kind(&self) -> &'static str;

    /// Advance internal scheduling state to the context's current slot.
    fn synchronize(&mut self, ctx: &mut SimContext);

    /// Take every packet that is ready as of the current slot.
    fn poll_packets(&mut self, ctx: &mut SimContext) -> Vec<Packet>;
}

// ============================================================================
// Distributions
// ============================================================================

/// Shape parameter used for Pareto draws.
pub const PARETO_SHAPE: f64 = 1.2;

/// Draws rejected outside the truncation bounds before clamping.
const MAX_TRUNCATION_ATTEMPTS: usize = 64;

/// Statistical distribution of a traffic parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distribution {
    /// Always the mean.
    Constant,
    /// Uniform on `[0, 2 * mean]`, so draws keep the configured mean.
    Uniform,
    /// Exponential with the given mean.
    Exponential,
    /// Lognormal with the given mean and standard deviation.
    LogNormal,
    /// Pareto with shape [`PARETO_SHAPE`] and the given mean.
    Pareto,
}

impl Distribution {
    /// Parse a one-letter distribution code.
    pub fn from_code(code: char) -> Result<Self, SimError> {
        match code {
            'c' => Ok(Distribution::Constant),
            'u' => Ok(Distribution::Uniform),
            'e' => Ok(Distribution::Exponential),
            'l' => Ok(Distribution::LogNormal),
            'p' => Ok(Distribution::Pareto),
            other => Err(SimError::InvalidDistributionSpecifier(other.to_string())),
        }
    }

    /// One-letter code of this distribution.
    pub fn code(&self) -> char {
        match self {
            Distribution::Constant => 'c',
            Distribution::Uniform => 'u',
            Distribution::Exponential => 'e',
            Distribution::LogNormal => 'l',
            Distribution::Pareto => 'p',
        }
    }
}

impl FromStr for Distribution {
    type Err = SimError;

    /// Accepts a one-letter code or the full lowercase name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "constant" => Ok(Distribution::Constant),
            "uniform" => Ok(Distribution::Uniform),
            "exponential" => Ok(Distribution::Exponential),
            "lognormal" => Ok(Distribution::LogNormal),
            "pareto" => Ok(Distribution::Pareto),
            _ => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(code), None) => Distribution::from_code(code),
                    _ => Err(SimError::InvalidDistributionSpecifier(s.to_string())),
                }
            }
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A distribution with its parameters and truncation bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RandomVariable {
    /// Distribution family.
    pub distribution: Distribution,
    /// Mean value.
    pub mean: f64,
    /// Standard deviation (lognormal only).
    pub std_dev: f64,
    /// Lower truncation bound.
    pub min: f64,
    /// Upper truncation bound.
    pub max: f64,
}

impl RandomVariable {
    /// Unbounded variable (truncated only at zero).
    pub fn new(distribution: Distribution, mean: f64) -> Self {
        RandomVariable {
            distribution,
            mean,
            std_dev: 0.0,
            min: 0.0,
            max: f64::INFINITY,
        }
    }

    /// Set the standard deviation.
    pub fn with_std_dev(mut self, std_dev: f64) -> Self {
        self.std_dev = std_dev;
        self
    }

    /// Set truncation bounds.
    pub fn truncated(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max.max(min);
        self
    }

    fn draw<R: Rng>(&self, rng: &mut R) -> f64 {
        let mean = self.mean;
        match self.distribution {
            Distribution::Constant => mean,
            Distribution::Uniform => rng.gen_range(0.0..=2.0 * mean.max(0.0)),
            Distribution::Exponential => Exp::new(1.0 / mean)
                .map(|d| d.sample(rng))
                .unwrap_or(mean),
            Distribution::LogNormal => {
                if mean <= 0.0 {
                    return mean;
                }
                let variance = (1.0 + (self.std_dev * self.std_dev) / (mean * mean)).ln();
                let mu = mean.ln() - variance / 2.0;
                LogNormal::new(mu, variance.sqrt())
                    .map(|d| d.sample(rng))
                    .unwrap_or(mean)
            }
            Distribution::Pareto => {
                let scale = mean * (PARETO_SHAPE - 1.0) / PARETO_SHAPE;
                Pareto::new(scale, PARETO_SHAPE)
                    .map(|d| d.sample(rng))
                    .unwrap_or(mean)
            }
        }
    }

    /// Draw one value within `[min, max]`.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        for _ in 0..MAX_TRUNCATION_ATTEMPTS {
            let value = self.draw(rng);
            if value >= self.min && value <= self.max {
                return value;
            }
        }
        self.draw(rng).clamp(self.min, self.max)
    }
}

// ============================================================================
// Sessions
// ============================================================================

/// A packet scheduled by a source but not yet handed to its station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualPacket {
    /// Slot at which the packet is released.
    pub send_at: Slot,
    /// Packet length in bits.
    pub length_bits: u64,
}

/// Pending virtual packets of one source, in release order.
#[derive(Debug, Default, Clone)]
pub struct Session {
    pending: VecDeque<VirtualPacket>,
}

impl Session {
    /// Create an empty session.
    pub fn new() -> Self {
        Session {
            pending: VecDeque::new(),
        }
    }

    /// Schedule a packet, keeping the session ordered by release slot.
    pub fn schedule(&mut self, send_at: Slot, length_bits: u64) {
        let packet = VirtualPacket { send_at, length_bits };
        let pos = self.pending.partition_point(|p| p.send_at <= send_at);
        self.pending.insert(pos, packet);
    }

    /// Schedule an object split into packets of `packet_bits`.
    pub fn schedule_object(&mut self, send_at: Slot, object_bits: u64, packet_bits: u64) -> usize {
        let sizes = split_into_packets(object_bits, packet_bits);
        let count = sizes.len();
        for size in sizes {
            self.schedule(send_at, size);
        }
        count
    }

    /// Remove and materialize every packet due at or before `now`.
    pub fn release_due(&mut self, now: Slot) -> Vec<Packet> {
        let mut released = Vec::new();
        while let Some(front) = self.pending.front() {
            if front.send_at > now {
                break;
            }
            if let Some(vp) = self.pending.pop_front() {
                released.push(Packet::new(vp.length_bits, vp.send_at));
            }
        }
        released
    }

    /// Number of packets still pending.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Split an object into full packets plus a trailing partial one.
pub fn split_into_packets(object_bits: u64, packet_bits: u64) -> Vec<u64> {
    if object_bits == 0 {
        return Vec::new();
    }
    let packet_bits = packet_bits.max(1);
    let full = object_bits / packet_bits;
    let rest = object_bits % packet_bits;
    let mut sizes = vec![packet_bits; full as usize];
    if rest > 0 {
        sizes.push(rest);
    }
    sizes
}

/// Convert a sampled millisecond delay into slots, at least one.
pub(crate) fn delay_slots(ctx: &SimContext, ms: f64) -> u64 {
    ctx.millis_to_slots(ms).max(1)
}

/// Round a sampled bit count to a usable packet length.
pub(crate) fn to_bits(value: f64) -> u64 {
    value.round().max(1.0) as u64
}
