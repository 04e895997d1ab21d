//! Generic source with independent inter-arrival and length distributions.

use crate::{delay_slots, to_bits, Distribution, RandomVariable, Source};
use tracing::trace;
use wlansim_common::{Packet, SimContext, SimError, Slot, SourceId};

/// Emits single packets with configurable inter-arrival time and length.
///
/// Only constant, uniform and exponential distributions are accepted.
#[derive(Debug, Clone)]
pub struct GenericSource {
    id: SourceId,
    inter_arrival_ms: RandomVariable,
    length_bits: RandomVariable,
    next_arrival: Option<Slot>,
}

fn check_supported(distribution: Distribution) -> Result<Distribution, SimError> {
    match distribution {
        Distribution::Constant | Distribution::Uniform | Distribution::Exponential => Ok(distribution),
        other => Err(SimError::InvalidDistributionSpecifier(other.code().to_string())),
    }
}

impl GenericSource {
    /// Create a generic source.
    ///
    /// `inter_arrival_ms` is the mean time between packets in milliseconds and
    /// `length_bits` the mean packet length.
    pub fn new(
        id: SourceId,
        inter_arrival: Distribution,
        inter_arrival_ms: f64,
        length: Distribution,
        length_bits: f64,
    ) -> Result<Self, SimError> {
        let inter_arrival = check_supported(inter_arrival)?;
        let length = check_supported(length)?;
        Ok(GenericSource {
            id,
            inter_arrival_ms: RandomVariable::new(inter_arrival, inter_arrival_ms),
            length_bits: RandomVariable::new(length, length_bits),
            next_arrival: None,
        })
    }

    fn schedule_next(&mut self, after: Slot, ctx: &mut SimContext) -> Slot {
        let ms = self.inter_arrival_ms.sample(ctx.rng());
        let next = after + delay_slots(ctx, ms);
        self.next_arrival = Some(next);
        next
    }
}

impl Source for GenericSource {
    fn id(&self) -> SourceId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "generic"
    }

    fn synchronize(&mut self, ctx: &mut SimContext) {
        if self.next_arrival.is_none() {
            let now = ctx.slot();
            self.schedule_next(now, ctx);
        }
    }

    fn poll_packets(&mut self, ctx: &mut SimContext) -> Vec<Packet> {
        let now = ctx.slot();
        let mut packets = Vec::new();
        while let Some(due) = self.next_arrival {
            if due > now {
                break;
            }
            let bits = to_bits(self.length_bits.sample(ctx.rng()));
            packets.push(Packet::new(bits, due));
            self.schedule_next(due, ctx);
        }
        if !packets.is_empty() {
            trace!("Source[{}]: {} generic packet(s) at slot {}", self.id, packets.len(), now);
        }
        packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_generic_source() {
        // 20 us slots: 1 ms inter-arrival is 50 slots
        let mut ctx = SimContext::new(1, 20_000);
        let mut source = GenericSource::new(
            SourceId(1),
            Distribution::Constant,
            1.0,
            Distribution::Constant,
            8000.0,
        )
        .expect("supported distributions");

        let mut arrivals = Vec::new();
        for slot in 0..=200 {
            ctx.set_slot(Slot::new(slot));
            source.synchronize(&mut ctx);
            for packet in source.poll_packets(&mut ctx) {
                assert_eq!(packet.length_bits, 8000);
                arrivals.push(packet.generated_at.index());
            }
        }
        assert_eq!(arrivals, vec![50, 100, 150, 200]);
    }

    #[test]
    fn test_generic_rejects_heavy_tailed_distributions() {
        let err = GenericSource::new(SourceId(1), Distribution::Pareto, 1.0, Distribution::Constant, 8000.0)
            .unwrap_err();
        assert_eq!(err, SimError::InvalidDistributionSpecifier("p".to_string()));
        assert!(GenericSource::new(SourceId(1), Distribution::Constant, 1.0, Distribution::LogNormal, 8000.0).is_err());
    }

    #[test]
    fn test_exponential_rate() {
        let mut ctx = SimContext::new(3, 20_000);
        let mut source = GenericSource::new(
            SourceId(2),
            Distribution::Exponential,
            2.0,
            Distribution::Exponential,
            4000.0,
        )
        .expect("supported distributions");

        let mut count = 0usize;
        // 10 seconds of 20 us slots
        for slot in 0..500_000u64 {
            ctx.set_slot(Slot::new(slot));
            source.synchronize(&mut ctx);
            count += source.poll_packets(&mut ctx).len();
        }
        // Mean 2 ms -> about 5000 packets
        assert!((4700..5300).contains(&count), "count {}", count);
    }
}
