//! Metric names emitted by the simulator through the `metrics` facade.
//!
//! Per-station metrics carry a `node` label; strategy metrics carry a
//! `strategy` label.

use std::fmt;

/// Kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonic counter.
    Counter,
    /// Point-in-time value.
    Gauge,
    /// Distribution of samples.
    Histogram,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::Histogram => write!(f, "histogram"),
        }
    }
}

/// Static description of one metric.
#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    /// Full metric name.
    pub name: &'static str,
    /// Metric kind.
    pub kind: MetricKind,
    /// Unit, if any.
    pub unit: Option<&'static str>,
    /// Human readable description.
    pub description: &'static str,
    /// Labels attached to the metric.
    pub labels: &'static [&'static str],
}

impl MetricDef {
    /// Unit as a display string (empty when unitless).
    pub fn unit_str(&self) -> &'static str {
        self.unit.unwrap_or("")
    }
}

pub const CHANNEL_EMPTY_SLOTS: MetricDef = MetricDef {
    name: "wlansim.channel.empty_slots",
    kind: MetricKind::Counter,
    unit: Some("slots"),
    description: "Slots with no transmission in progress and no requester",
    labels: &[],
};

pub const CHANNEL_BUSY_SLOTS: MetricDef = MetricDef {
    name: "wlansim.channel.busy_slots",
    kind: MetricKind::Counter,
    unit: Some("slots"),
    description: "Slots during which the medium was frozen by a transmission or collision",
    labels: &[],
};

pub const CHANNEL_COLLISION_EVENTS: MetricDef = MetricDef {
    name: "wlansim.channel.collision_events",
    kind: MetricKind::Counter,
    unit: None,
    description: "Collision resolutions, including hidden-terminal collisions",
    labels: &[],
};

pub const MAC_TX_SUCCESS: MetricDef = MetricDef {
    name: "wlansim.mac.tx_success",
    kind: MetricKind::Counter,
    unit: Some("packets"),
    description: "Packets delivered without collision",
    labels: &["node"],
};

pub const MAC_TX_BITS: MetricDef = MetricDef {
    name: "wlansim.mac.tx_bits",
    kind: MetricKind::Counter,
    unit: Some("bits"),
    description: "Payload bits delivered without collision",
    labels: &["node"],
};

pub const MAC_COLLISIONS: MetricDef = MetricDef {
    name: "wlansim.mac.collisions",
    kind: MetricKind::Counter,
    unit: None,
    description: "Collisions a station took part in",
    labels: &["node"],
};

pub const MAC_TOTAL_DELAY: MetricDef = MetricDef {
    name: "wlansim.mac.total_delay_slots",
    kind: MetricKind::Histogram,
    unit: Some("slots"),
    description: "Generation-to-delivery delay of each delivered packet",
    labels: &["node"],
};

pub const MAC_CONTENTION_WINDOW: MetricDef = MetricDef {
    name: "wlansim.mac.contention_window",
    kind: MetricKind::Histogram,
    unit: Some("slots"),
    description: "Contention window chosen after a collision",
    labels: &["node"],
};

pub const QUEUE_LENGTH: MetricDef = MetricDef {
    name: "wlansim.queue.length",
    kind: MetricKind::Gauge,
    unit: Some("packets"),
    description: "Station queue length at the end of the last interval",
    labels: &["node"],
};

pub const STRATEGY_SELECTED: MetricDef = MetricDef {
    name: "wlansim.strategy.selected",
    kind: MetricKind::Counter,
    unit: None,
    description: "Times a contention-window strategy was selected",
    labels: &["strategy"],
};

/// Every metric the simulator emits.
pub const ALL: &[MetricDef] = &[
    CHANNEL_EMPTY_SLOTS,
    CHANNEL_BUSY_SLOTS,
    CHANNEL_COLLISION_EVENTS,
    MAC_TX_SUCCESS,
    MAC_TX_BITS,
    MAC_COLLISIONS,
    MAC_TOTAL_DELAY,
    MAC_CONTENTION_WINDOW,
    QUEUE_LENGTH,
    STRATEGY_SELECTED,
];

/// Register descriptions for all metrics with the installed recorder.
pub fn describe_metrics() {
    for def in ALL {
        match def.kind {
            MetricKind::Counter => metrics::describe_counter!(def.name, def.description),
            MetricKind::Gauge => metrics::describe_gauge!(def.name, def.description),
            MetricKind::Histogram => metrics::describe_histogram!(def.name, def.description),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_unique() {
        let mut names: Vec<&str> = ALL.iter().map(|d| d.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ALL.len());
    }

    #[test]
    fn test_metric_names_prefixed() {
        for def in ALL {
            assert!(def.name.starts_with("wlansim."), "{} lacks prefix", def.name);
        }
    }
}
