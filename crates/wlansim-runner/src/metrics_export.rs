//! Metrics export for simulation results.
//!
//! [`InMemoryRecorder`] is installed as the global `metrics` recorder for a
//! run. It keeps every counter, gauge and histogram the engine emits, and a
//! [`MetricsSnapshot`] taken at the end aggregates them by metric name with a
//! breakdown per label value (`node`, `strategy`). Snapshots export as JSON
//! or in the Prometheus text format.

use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Labels that get their own breakdown in a snapshot.
pub const BREAKDOWN_LABELS: [&str; 2] = ["node", "strategy"];

// ============================================================================
// Metrics Snapshot Types
// ============================================================================

/// Metric values of one label value (one node, one strategy).
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct LabelMetrics {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub counters: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub gauges: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub histograms: BTreeMap<String, HistogramSummary>,
}

/// Collected metric data for export.
#[derive(Debug, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Timestamp when metrics were collected.
    pub timestamp: String,
    /// Counters summed over every label set.
    pub counters: BTreeMap<String, u64>,
    /// Gauges summed over every label set.
    pub gauges: BTreeMap<String, f64>,
    /// Histograms over the samples of every label set.
    pub histograms: BTreeMap<String, HistogramSummary>,
    /// Breakdown label -> label value -> metrics.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub breakdowns: BTreeMap<String, BTreeMap<String, LabelMetrics>>,
}

/// Summary statistics for a histogram metric.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

// ============================================================================
// Export Functions
// ============================================================================

/// Export metrics as JSON.
pub fn export_json<W: Write>(snapshot: &MetricsSnapshot, writer: &mut W) -> std::io::Result<()> {
    serde_json::to_writer_pretty(&mut *writer, snapshot)?;
    writeln!(writer)?;
    Ok(())
}

fn prometheus_name(name: &str) -> String {
    name.replace('.', "_")
}

/// Export metrics in Prometheus text exposition format.
pub fn export_prometheus<W: Write>(snapshot: &MetricsSnapshot, writer: &mut W) -> std::io::Result<()> {
    for (name, value) in &snapshot.counters {
        let prom_name = prometheus_name(name);
        writeln!(writer, "# TYPE {} counter", prom_name)?;
        writeln!(writer, "{} {}", prom_name, value)?;
        for (label, values) in &snapshot.breakdowns {
            for (label_value, metrics) in values {
                if let Some(v) = metrics.counters.get(name) {
                    writeln!(writer, "{}{{{}=\"{}\"}} {}", prom_name, label, label_value, v)?;
                }
            }
        }
    }

    for (name, value) in &snapshot.gauges {
        let prom_name = prometheus_name(name);
        writeln!(writer, "# TYPE {} gauge", prom_name)?;
        writeln!(writer, "{} {}", prom_name, value)?;
        for (label, values) in &snapshot.breakdowns {
            for (label_value, metrics) in values {
                if let Some(v) = metrics.gauges.get(name) {
                    writeln!(writer, "{}{{{}=\"{}\"}} {}", prom_name, label, label_value, v)?;
                }
            }
        }
    }

    for (name, summary) in &snapshot.histograms {
        let prom_name = prometheus_name(name);
        writeln!(writer, "# TYPE {} summary", prom_name)?;
        write_summary(writer, &prom_name, "", summary)?;
        for (label, values) in &snapshot.breakdowns {
            for (label_value, metrics) in values {
                if let Some(s) = metrics.histograms.get(name) {
                    let selector = format!("{}=\"{}\"", label, label_value);
                    write_summary(writer, &prom_name, &selector, s)?;
                }
            }
        }
    }

    Ok(())
}

fn write_summary<W: Write>(
    writer: &mut W,
    name: &str,
    selector: &str,
    summary: &HistogramSummary,
) -> std::io::Result<()> {
    let braces = |extra: &str| -> String {
        match (selector.is_empty(), extra.is_empty()) {
            (true, true) => String::new(),
            (true, false) => format!("{{{}}}", extra),
            (false, true) => format!("{{{}}}", selector),
            (false, false) => format!("{{{},{}}}", selector, extra),
        }
    };
    writeln!(writer, "{}_count{} {}", name, braces(""), summary.count)?;
    writeln!(writer, "{}_sum{} {}", name, braces(""), summary.sum)?;
    for (quantile, value) in [("0.5", summary.p50), ("0.9", summary.p90), ("0.99", summary.p99)] {
        writeln!(writer, "{}{} {}", name, braces(&format!("quantile=\"{}\"", quantile)), value)?;
    }
    Ok(())
}

// ============================================================================
// In-Memory Storage
// ============================================================================

#[derive(Debug, Default)]
struct CounterState {
    value: AtomicU64,
}

impl CounterState {
    fn increment(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge stored as the bits of an f64.
#[derive(Debug, Default)]
struct GaugeState {
    value: AtomicU64,
}

impl GaugeState {
    fn set(&self, value: f64) {
        self.value.store(value.to_bits(), Ordering::Relaxed);
    }

    fn add(&self, delta: f64) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + delta).to_bits())
            });
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed))
    }
}

/// Samples kept per histogram for percentiles.
const HISTOGRAM_RESERVOIR_SIZE: usize = 10_000;

#[derive(Debug)]
struct HistogramInner {
    reservoir: Vec<f64>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    /// xorshift64 state for reservoir replacement.
    rng: u64,
}

/// Histogram samples under reservoir sampling (Algorithm R).
///
/// Count, sum, min and max cover every sample; percentiles come from the
/// reservoir.
#[derive(Debug)]
struct HistogramState {
    inner: Mutex<HistogramInner>,
}

impl Default for HistogramState {
    fn default() -> Self {
        HistogramState {
            inner: Mutex::new(HistogramInner {
                reservoir: Vec::new(),
                count: 0,
                sum: 0.0,
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
                rng: 0x2545_F491_4F6C_DD1D,
            }),
        }
    }
}

impl HistogramState {
    fn record(&self, value: f64) {
        let mut inner = self.inner.lock();
        inner.count += 1;
        inner.sum += value;
        inner.min = inner.min.min(value);
        inner.max = inner.max.max(value);

        if inner.reservoir.len() < HISTOGRAM_RESERVOIR_SIZE {
            inner.reservoir.push(value);
            return;
        }
        let mut x = inner.rng;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        inner.rng = x;
        let j = (x % inner.count) as usize;
        if j < HISTOGRAM_RESERVOIR_SIZE {
            inner.reservoir[j] = value;
        }
    }

    fn samples(&self) -> Vec<f64> {
        self.inner.lock().reservoir.clone()
    }

    fn summary(&self) -> HistogramSummary {
        let inner = self.inner.lock();
        if inner.count == 0 {
            return HistogramSummary::default();
        }
        HistogramSummary {
            count: inner.count,
            sum: inner.sum,
            min: inner.min,
            max: inner.max,
            mean: inner.sum / inner.count as f64,
            ..percentiles(&inner.reservoir)
        }
    }

    fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.reservoir.clear();
        inner.count = 0;
        inner.sum = 0.0;
        inner.min = f64::INFINITY;
        inner.max = f64::NEG_INFINITY;
    }
}

/// Percentile fields of a summary from raw samples.
fn percentiles(samples: &[f64]) -> HistogramSummary {
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let at = |p: f64| -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }
        let idx = (p * (sorted.len() - 1) as f64).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    };
    HistogramSummary {
        p50: at(0.5),
        p90: at(0.9),
        p99: at(0.99),
        ..HistogramSummary::default()
    }
}

/// Summary of a merged sample set.
fn summarize(samples: &[f64]) -> HistogramSummary {
    if samples.is_empty() {
        return HistogramSummary::default();
    }
    let sum: f64 = samples.iter().sum();
    HistogramSummary {
        count: samples.len() as u64,
        sum,
        min: samples.iter().copied().fold(f64::INFINITY, f64::min),
        max: samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        mean: sum / samples.len() as f64,
        ..percentiles(samples)
    }
}

/// Name and labels of a registered key.
#[derive(Debug, Clone)]
struct KeyInfo {
    name: String,
    labels: Vec<(String, String)>,
}

impl KeyInfo {
    fn from_key(key: &Key) -> Self {
        KeyInfo {
            name: key.name().to_string(),
            labels: key
                .labels()
                .map(|l| (l.key().to_string(), l.value().to_string()))
                .collect(),
        }
    }

    /// Unique string for a name plus label set.
    fn id(&self) -> String {
        if self.labels.is_empty() {
            return self.name.clone();
        }
        let labels: Vec<String> = self.labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        format!("{}|{}", self.name, labels.join(","))
    }

    fn breakdowns(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels
            .iter()
            .filter(|(k, _)| BREAKDOWN_LABELS.contains(&k.as_str()))
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Registered metric handles of one kind, keyed by [`KeyInfo::id`].
struct Registry<T> {
    entries: RwLock<BTreeMap<String, (KeyInfo, Arc<T>)>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Registry {
            entries: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<T: Default> Registry<T> {
    fn get_or_create(&self, key: &Key) -> Arc<T> {
        let info = KeyInfo::from_key(key);
        let id = info.id();
        if let Some((_, state)) = self.entries.read().get(&id) {
            return state.clone();
        }
        self.entries
            .write()
            .entry(id)
            .or_insert_with(|| (info, Arc::new(T::default())))
            .1
            .clone()
    }
}

#[derive(Default)]
struct RecorderState {
    counters: Registry<CounterState>,
    gauges: Registry<GaugeState>,
    histograms: Registry<HistogramState>,
}

impl RecorderState {
    fn snapshot(&self) -> MetricsSnapshot {
        let mut counters: BTreeMap<String, u64> = BTreeMap::new();
        let mut gauges: BTreeMap<String, f64> = BTreeMap::new();
        let mut samples: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut breakdowns: BTreeMap<String, BTreeMap<String, LabelMetrics>> = BTreeMap::new();

        for (info, counter) in self.counters.entries.read().values() {
            let value = counter.get();
            *counters.entry(info.name.clone()).or_insert(0) += value;
            for (label, label_value) in info.breakdowns() {
                let slot = breakdowns
                    .entry(label.to_string())
                    .or_default()
                    .entry(label_value.to_string())
                    .or_default();
                *slot.counters.entry(info.name.clone()).or_insert(0) += value;
            }
        }

        for (info, gauge) in self.gauges.entries.read().values() {
            let value = gauge.get();
            *gauges.entry(info.name.clone()).or_insert(0.0) += value;
            for (label, label_value) in info.breakdowns() {
                let slot = breakdowns
                    .entry(label.to_string())
                    .or_default()
                    .entry(label_value.to_string())
                    .or_default();
                *slot.gauges.entry(info.name.clone()).or_insert(0.0) += value;
            }
        }

        for (info, histogram) in self.histograms.entries.read().values() {
            samples
                .entry(info.name.clone())
                .or_default()
                .extend(histogram.samples());
            for (label, label_value) in info.breakdowns() {
                breakdowns
                    .entry(label.to_string())
                    .or_default()
                    .entry(label_value.to_string())
                    .or_default()
                    .histograms
                    .insert(info.name.clone(), histogram.summary());
            }
        }

        MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            counters,
            gauges,
            histograms: samples
                .into_iter()
                .map(|(name, samples)| (name, summarize(&samples)))
                .collect(),
            breakdowns,
        }
    }

    fn clear(&self) {
        for (_, counter) in self.counters.entries.read().values() {
            counter.value.store(0, Ordering::Relaxed);
        }
        for (_, gauge) in self.gauges.entries.read().values() {
            gauge.set(0.0);
        }
        for (_, histogram) in self.histograms.entries.read().values() {
            histogram.clear();
        }
    }
}

// ============================================================================
// In-Memory Recorder
// ============================================================================

/// A `metrics` recorder that keeps every value in memory.
///
/// Clones share the same storage, so one clone can be installed globally
/// while another takes the snapshot.
#[derive(Clone, Default)]
pub struct InMemoryRecorder {
    state: Arc<RecorderState>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a snapshot of all current metric values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.state.snapshot()
    }

    /// Reset every value, keeping the registered keys.
    pub fn clear(&self) {
        self.state.clear();
    }
}

struct InMemoryCounter(Arc<CounterState>);

impl metrics::CounterFn for InMemoryCounter {
    fn increment(&self, value: u64) {
        self.0.increment(value);
    }

    fn absolute(&self, value: u64) {
        self.0.value.fetch_max(value, Ordering::Relaxed);
    }
}

struct InMemoryGauge(Arc<GaugeState>);

impl metrics::GaugeFn for InMemoryGauge {
    fn increment(&self, value: f64) {
        self.0.add(value);
    }

    fn decrement(&self, value: f64) {
        self.0.add(-value);
    }

    fn set(&self, value: f64) {
        self.0.set(value);
    }
}

struct InMemoryHistogram(Arc<HistogramState>);

impl metrics::HistogramFn for InMemoryHistogram {
    fn record(&self, value: f64) {
        self.0.record(value);
    }
}

impl Recorder for InMemoryRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(Arc::new(InMemoryCounter(self.state.counters.get_or_create(key))))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(Arc::new(InMemoryGauge(self.state.gauges.get_or_create(key))))
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(Arc::new(InMemoryHistogram(self.state.histograms.get_or_create(key))))
    }
}
