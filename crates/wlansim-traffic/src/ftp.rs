//! FTP source: whole files released at once, separated by reading times.

use crate::{delay_slots, to_bits, Distribution, RandomVariable, Session, Source};
use tracing::debug;
use wlansim_common::{Packet, SimContext, Slot, SourceId};

/// File transfer traffic.
///
/// File sizes are lognormal, truncated at `file_size_max_bits`. Every file is
/// split into `packet_bits` packets released in the same slot; the next file
/// follows after an exponentially distributed reading time.
#[derive(Debug, Clone)]
pub struct FtpSource {
    id: SourceId,
    packet_bits: u64,
    file_size: RandomVariable,
    reading_time_ms: RandomVariable,
    next_file: Option<Slot>,
    session: Session,
    files_started: u64,
}

impl FtpSource {
    /// Create an FTP source.
    pub fn new(
        id: SourceId,
        packet_bits: u64,
        file_size_mean_bits: f64,
        file_size_std_dev_bits: f64,
        file_size_max_bits: f64,
        reading_time_ms: f64,
    ) -> Self {
        FtpSource {
            id,
            packet_bits: packet_bits.max(1),
            file_size: RandomVariable::new(Distribution::LogNormal, file_size_mean_bits)
                .with_std_dev(file_size_std_dev_bits)
                .truncated(1.0, file_size_max_bits),
            reading_time_ms: RandomVariable::new(Distribution::Exponential, reading_time_ms),
            next_file: None,
            session: Session::new(),
            files_started: 0,
        }
    }

    /// Number of files started so far.
    pub fn files_started(&self) -> u64 {
        self.files_started
    }
}

impl Source for FtpSource {
    fn id(&self) -> SourceId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "ftp"
    }

    fn synchronize(&mut self, ctx: &mut SimContext) {
        let now = ctx.slot();
        let due = *self.next_file.get_or_insert(now);
        if due > now {
            return;
        }

        let file_bits = to_bits(self.file_size.sample(ctx.rng()));
        let packets = self.session.schedule_object(now, file_bits, self.packet_bits);
        self.files_started += 1;

        let reading_ms = self.reading_time_ms.sample(ctx.rng());
        let next = now + delay_slots(ctx, reading_ms);
        self.next_file = Some(next);

        debug!(
            "Source[{}]: FTP file of {} bits in {} packets, next file at slot {}",
            self.id, file_bits, packets, next
        );
    }

    fn poll_packets(&mut self, ctx: &mut SimContext) -> Vec<Packet> {
        self.session.release_due(ctx.slot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ftp_file_is_split_into_packets() {
        let mut ctx = SimContext::new(11, 20_000);
        // Zero spread and a large cap: every file is 20_500 bits
        let mut source = FtpSource::new(SourceId(4), 8000, 20_500.0, 0.0, 1e9, 1000.0);

        source.synchronize(&mut ctx);
        let packets = source.poll_packets(&mut ctx);
        let sizes: Vec<u64> = packets.iter().map(|p| p.length_bits).collect();
        assert_eq!(sizes, vec![8000, 8000, 4500]);
        assert!(packets.iter().all(|p| p.generated_at == Slot::ZERO));
        assert_eq!(source.files_started(), 1);

        // No new file in the next slot
        ctx.set_slot(Slot::new(1));
        source.synchronize(&mut ctx);
        assert!(source.poll_packets(&mut ctx).is_empty());
    }

    #[test]
    fn test_ftp_file_size_respects_max() {
        let mut ctx = SimContext::new(5, 20_000);
        let mut source = FtpSource::new(SourceId(1), 1000, 1e6, 3e5, 1.2e6, 1.0);
        for slot in 0..2_000 {
            ctx.set_slot(Slot::new(slot));
            source.synchronize(&mut ctx);
            let total: u64 = source.poll_packets(&mut ctx).iter().map(|p| p.length_bits).sum();
            assert!(total <= 1_200_000);
        }
        assert!(source.files_started() > 1);
    }
}
