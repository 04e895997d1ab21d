//! HTTP source: pages made of a main object and embedded objects.

use crate::{delay_slots, to_bits, Distribution, RandomVariable, Session, Source};
use tracing::debug;
use wlansim_common::{Packet, SimContext, Slot, SourceId};

/// Parameters of an [`HttpSource`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HttpConfig {
    /// Packet size in bits.
    pub packet_bits: u64,
    /// Main object size: mean, standard deviation, min, max (bits).
    pub main_object: (f64, f64, f64, f64),
    /// Embedded object size: mean, standard deviation, min, max (bits).
    pub embedded_object: (f64, f64, f64, f64),
    /// Embedded objects per page: mean and max.
    pub embedded_count: (f64, f64),
    /// Mean reading time between pages (ms).
    pub reading_time_ms: f64,
    /// Mean parsing time between main and embedded objects (ms).
    pub parsing_time_ms: f64,
}

/// Web browsing traffic.
#[derive(Debug, Clone)]
pub struct HttpSource {
    id: SourceId,
    packet_bits: u64,
    main_object: RandomVariable,
    embedded_object: RandomVariable,
    embedded_count: RandomVariable,
    reading_time_ms: RandomVariable,
    parsing_time_ms: RandomVariable,
    next_page: Option<Slot>,
    session: Session,
}

fn lognormal((mean, std_dev, min, max): (f64, f64, f64, f64)) -> RandomVariable {
    RandomVariable::new(Distribution::LogNormal, mean)
        .with_std_dev(std_dev)
        .truncated(min.max(1.0), max)
}

impl HttpSource {
    /// Create an HTTP source.
    pub fn new(id: SourceId, config: HttpConfig) -> Self {
        let (count_mean, count_max) = config.embedded_count;
        HttpSource {
            id,
            packet_bits: config.packet_bits.max(1),
            main_object: lognormal(config.main_object),
            embedded_object: lognormal(config.embedded_object),
            embedded_count: RandomVariable::new(Distribution::Pareto, count_mean).truncated(0.0, count_max),
            reading_time_ms: RandomVariable::new(Distribution::Exponential, config.reading_time_ms),
            parsing_time_ms: RandomVariable::new(Distribution::Exponential, config.parsing_time_ms),
            next_page: None,
            session: Session::new(),
        }
    }
}

impl Source for HttpSource {
    fn id(&self) -> SourceId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "http"
    }

    fn synchronize(&mut self, ctx: &mut SimContext) {
        let now = ctx.slot();
        let due = *self.next_page.get_or_insert(now);
        if due > now {
            return;
        }

        let main_bits = to_bits(self.main_object.sample(ctx.rng()));
        let mut packets = self.session.schedule_object(now, main_bits, self.packet_bits);

        let parsing_ms = self.parsing_time_ms.sample(ctx.rng());
        let embedded_at = now + delay_slots(ctx, parsing_ms);
        let embedded = self.embedded_count.sample(ctx.rng()).round() as u64;
        for _ in 0..embedded {
            let bits = to_bits(self.embedded_object.sample(ctx.rng()));
            packets += self.session.schedule_object(embedded_at, bits, self.packet_bits);
        }

        let reading_ms = self.reading_time_ms.sample(ctx.rng());
        let next = embedded_at + delay_slots(ctx, reading_ms);
        self.next_page = Some(next);

        debug!(
            "Source[{}]: HTTP page with {} embedded objects in {} packets, next page at slot {}",
            self.id, embedded, packets, next
        );
    }

    fn poll_packets(&mut self, ctx: &mut SimContext) -> Vec<Packet> {
        self.session.release_due(ctx.slot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HttpConfig {
        HttpConfig {
            packet_bits: 12_000,
            main_object: (80_000.0, 20_000.0, 800.0, 16_000_000.0),
            embedded_object: (60_000.0, 20_000.0, 400.0, 16_000_000.0),
            embedded_count: (5.0, 50.0),
            reading_time_ms: 3_000.0,
            parsing_time_ms: 100.0,
        }
    }

    #[test]
    fn test_http_main_object_released_first() {
        let mut ctx = SimContext::new(21, 20_000);
        let mut source = HttpSource::new(SourceId(2), config());

        source.synchronize(&mut ctx);
        let main = source.poll_packets(&mut ctx);
        assert!(!main.is_empty());
        assert!(main.iter().all(|p| p.generated_at == Slot::ZERO && p.length_bits <= 12_000));

        // Embedded objects come after the parsing delay, before the next page
        let mut later = 0usize;
        for slot in 1..50_000 {
            ctx.set_slot(Slot::new(slot));
            source.synchronize(&mut ctx);
            let packets = source.poll_packets(&mut ctx);
            assert!(packets.iter().all(|p| p.generated_at.index() >= 1));
            later += packets.len();
        }
        assert!(later > 0);
    }

    #[test]
    fn test_http_embedded_count_is_bounded() {
        let mut ctx = SimContext::new(8, 20_000);
        let mut cfg = config();
        cfg.embedded_count = (5.0, 0.0);
        let mut source = HttpSource::new(SourceId(2), cfg);
        source.synchronize(&mut ctx);
        // Only main-object packets are ever scheduled
        let total: usize = (0..10_000u64)
            .map(|slot| {
                ctx.set_slot(Slot::new(slot));
                source.poll_packets(&mut ctx).len()
            })
            .sum();
        assert!(total > 0 && total <= 1 + 16_000_000 / 12_000);
    }
}
