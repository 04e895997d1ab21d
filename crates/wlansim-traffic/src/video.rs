//! Video source: fixed frame rate, bursts of Pareto-sized packets per frame.

use crate::{to_bits, Distribution, RandomVariable, Session, Source};
use tracing::trace;
use wlansim_common::{Packet, SimContext, Slot, SourceId};

/// Streaming video traffic.
///
/// Every frame period a new session of `packets_per_frame` virtual packets is
/// scheduled; packet sizes and intra-frame gaps are Pareto distributed and
/// truncated at their maxima.
#[derive(Debug, Clone)]
pub struct VideoSource {
    id: SourceId,
    frame_rate: u32,
    packets_per_frame: u32,
    packet_size: RandomVariable,
    packet_gap_ms: RandomVariable,
    next_frame: Option<Slot>,
    session: Session,
}

impl VideoSource {
    /// Create a video source.
    pub fn new(
        id: SourceId,
        frame_rate: u32,
        packets_per_frame: u32,
        packet_size_bits: f64,
        packet_size_max_bits: f64,
        packet_gap_ms: f64,
        packet_gap_max_ms: f64,
    ) -> Self {
        VideoSource {
            id,
            frame_rate: frame_rate.max(1),
            packets_per_frame,
            packet_size: RandomVariable::new(Distribution::Pareto, packet_size_bits)
                .truncated(1.0, packet_size_max_bits),
            packet_gap_ms: RandomVariable::new(Distribution::Pareto, packet_gap_ms)
                .truncated(0.0, packet_gap_max_ms),
            next_frame: None,
            session: Session::new(),
        }
    }

    fn frame_period_slots(&self, ctx: &SimContext) -> u64 {
        ctx.millis_to_slots(1000.0 / self.frame_rate as f64).max(1)
    }
}

impl Source for VideoSource {
    fn id(&self) -> SourceId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "video"
    }

    fn synchronize(&mut self, ctx: &mut SimContext) {
        let now = ctx.slot();
        let due = *self.next_frame.get_or_insert(now);
        if due > now {
            return;
        }

        let mut at = now;
        for _ in 0..self.packets_per_frame {
            let bits = to_bits(self.packet_size.sample(ctx.rng()));
            self.session.schedule(at, bits);
            let gap_ms = self.packet_gap_ms.sample(ctx.rng());
            at = at + ctx.millis_to_slots(gap_ms);
        }
        self.next_frame = Some(now + self.frame_period_slots(ctx));
        trace!("Source[{}]: video frame of {} packets at slot {}", self.id, self.packets_per_frame, now);
    }

    fn poll_packets(&mut self, ctx: &mut SimContext) -> Vec<Packet> {
        self.session.release_due(ctx.slot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_frames_per_second() {
        // 9 us slots, 25 fps, 8 packets per frame
        let mut ctx = SimContext::new(13, 9_000);
        let mut source = VideoSource::new(SourceId(3), 25, 8, 4000.0, 20_000.0, 1.0, 5.0);
        let one_second = ctx.millis_to_slots(1000.0);

        let mut packets = Vec::new();
        for slot in 0..one_second {
            ctx.set_slot(Slot::new(slot));
            source.synchronize(&mut ctx);
            packets.extend(source.poll_packets(&mut ctx));
        }
        // Frame period is 4444 slots, so frames start at 0, 4444, ... 111_100
        assert!(packets.len() >= 25 * 8 && packets.len() <= 26 * 8, "{}", packets.len());
        assert!(packets.iter().all(|p| p.length_bits <= 20_000));
    }

    #[test]
    fn test_video_packets_stay_in_order() {
        let mut ctx = SimContext::new(2, 20_000);
        let mut source = VideoSource::new(SourceId(1), 30, 4, 1000.0, 3000.0, 2.0, 4.0);
        let mut last = 0u64;
        for slot in 0..20_000 {
            ctx.set_slot(Slot::new(slot));
            source.synchronize(&mut ctx);
            for packet in source.poll_packets(&mut ctx) {
                assert!(packet.generated_at.index() >= last);
                last = packet.generated_at.index();
            }
        }
    }
}
