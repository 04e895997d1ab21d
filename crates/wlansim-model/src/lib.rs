//! # wlansim-model
//!
//! YAML scenario loading and simulation building for wlansim.
//!
//! This crate provides:
//! - The YAML schema for scenarios (`simulation:` settings and `nodes:`)
//! - Model loading from files and strings, merging several files in order
//! - Building stations, their traffic sources and the strategy selector
//!
//! ## Example
//!
//! ```yaml
//! simulation:
//!   seed: 7
//!   duration_ms: 2000
//!   phy: g
//! nodes:
//!   - id: 1
//!     rate: 54000000
//!     coverage: 100
//!     sources:
//!       - type: generic
//!         id: 1
//!         inter_arrival: e
//!         inter_arrival_ms: 2.0
//!         length: c
//!         length_bits: 8000
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};
use wlansim_common::{Identifier, NodeId, Position, SimError, SourceId};
use wlansim_mac::{
    AccessCategoryParams, BackoffPolicy, MacConfig, NodeParams, Station, StationRegistry, StrategySelector,
    ACCESS_CATEGORIES,
};
use wlansim_phy::PhyMode;
use wlansim_traffic::{http::HttpConfig, Distribution, FtpSource, GenericSource, HttpSource, Source, VideoSource};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during model operations.
#[derive(Debug, Error)]
pub enum ModelError {
    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Node not found.
    #[error("Node not found: {0}")]
    NodeNotFound(u32),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Duplicate node id within one file.
    #[error("Duplicate node id: {0}")]
    DuplicateNode(u32),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Registry or traffic error while populating the simulation.
    #[error("Simulation error: {0}")]
    Simulation(#[from] SimError),
}

// ============================================================================
// Public Model API
// ============================================================================

/// Default scenario length.
pub const DEFAULT_DURATION_MS: f64 = 10_000.0;
/// Default statistics interval.
pub const DEFAULT_INTERVAL_MS: f64 = 1_000.0;
/// Coverage used when a node does not give one.
pub const DEFAULT_COVERAGE_M: f64 = 100.0;

/// A contention-window strategy as listed in a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyModel {
    /// Display name.
    pub name: String,
    /// Stable id (1-4 name the built-in policies).
    pub id: u32,
    /// Initial rank.
    #[serde(default)]
    pub rank: i64,
}

/// Resolved `simulation:` settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationSettings {
    /// Seed of the single random generator.
    pub seed: u64,
    /// Total simulated time.
    pub duration_ms: f64,
    /// Length of one statistics interval.
    pub interval_ms: f64,
    /// MAC configuration.
    pub mac: MacConfig,
    /// Strategy candidates; empty means the built-in policies.
    pub strategies: Vec<StrategyModel>,
    /// Score and reselect the policy after every interval.
    pub adaptive: bool,
    /// Statistic codes to write; empty means all.
    pub results: Vec<String>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        SimulationSettings {
            seed: 0,
            duration_ms: DEFAULT_DURATION_MS,
            interval_ms: DEFAULT_INTERVAL_MS,
            mac: MacConfig::default(),
            strategies: Vec::new(),
            adaptive: false,
            results: Vec::new(),
        }
    }
}

/// A traffic source attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum SourceModel {
    /// Independent inter-arrival and length distributions.
    Generic {
        id: u32,
        /// Distribution letter (`c`, `u` or `e`).
        inter_arrival: String,
        inter_arrival_ms: f64,
        /// Distribution letter (`c`, `u` or `e`).
        length: String,
        length_bits: f64,
    },
    /// Whole files separated by reading times.
    Ftp {
        id: u32,
        packet_bits: u64,
        file_size_mean_bits: f64,
        #[serde(default)]
        file_size_std_dev_bits: f64,
        file_size_max_bits: f64,
        reading_time_ms: f64,
    },
    /// Web pages with embedded objects.
    Http {
        id: u32,
        packet_bits: u64,
        main_object_mean_bits: f64,
        #[serde(default)]
        main_object_std_dev_bits: f64,
        #[serde(default)]
        main_object_min_bits: f64,
        main_object_max_bits: f64,
        embedded_object_mean_bits: f64,
        #[serde(default)]
        embedded_object_std_dev_bits: f64,
        #[serde(default)]
        embedded_object_min_bits: f64,
        embedded_object_max_bits: f64,
        embedded_count_mean: f64,
        embedded_count_max: f64,
        reading_time_ms: f64,
        parsing_time_ms: f64,
    },
    /// Streaming video frames.
    Video {
        id: u32,
        frame_rate: u32,
        packets_per_frame: u32,
        packet_size_bits: f64,
        packet_size_max_bits: f64,
        packet_gap_ms: f64,
        packet_gap_max_ms: f64,
    },
}

impl SourceModel {
    /// Source id.
    pub fn id(&self) -> u32 {
        match self {
            SourceModel::Generic { id, .. }
            | SourceModel::Ftp { id, .. }
            | SourceModel::Http { id, .. }
            | SourceModel::Video { id, .. } => *id,
        }
    }

    /// Instantiate the source.
    pub fn build(&self) -> Result<Box<dyn Source>, SimError> {
        let source: Box<dyn Source> = match self {
            SourceModel::Generic {
                id,
                inter_arrival,
                inter_arrival_ms,
                length,
                length_bits,
            } => Box::new(GenericSource::new(
                SourceId(*id),
                Distribution::from_str(inter_arrival)?,
                *inter_arrival_ms,
                Distribution::from_str(length)?,
                *length_bits,
            )?),
            SourceModel::Ftp {
                id,
                packet_bits,
                file_size_mean_bits,
                file_size_std_dev_bits,
                file_size_max_bits,
                reading_time_ms,
            } => Box::new(FtpSource::new(
                SourceId(*id),
                *packet_bits,
                *file_size_mean_bits,
                *file_size_std_dev_bits,
                *file_size_max_bits,
                *reading_time_ms,
            )),
            SourceModel::Http {
                id,
                packet_bits,
                main_object_mean_bits,
                main_object_std_dev_bits,
                main_object_min_bits,
                main_object_max_bits,
                embedded_object_mean_bits,
                embedded_object_std_dev_bits,
                embedded_object_min_bits,
                embedded_object_max_bits,
                embedded_count_mean,
                embedded_count_max,
                reading_time_ms,
                parsing_time_ms,
            } => Box::new(HttpSource::new(
                SourceId(*id),
                HttpConfig {
                    packet_bits: *packet_bits,
                    main_object: (
                        *main_object_mean_bits,
                        *main_object_std_dev_bits,
                        *main_object_min_bits,
                        *main_object_max_bits,
                    ),
                    embedded_object: (
                        *embedded_object_mean_bits,
                        *embedded_object_std_dev_bits,
                        *embedded_object_min_bits,
                        *embedded_object_max_bits,
                    ),
                    embedded_count: (*embedded_count_mean, *embedded_count_max),
                    reading_time_ms: *reading_time_ms,
                    parsing_time_ms: *parsing_time_ms,
                },
            )),
            SourceModel::Video {
                id,
                frame_rate,
                packets_per_frame,
                packet_size_bits,
                packet_size_max_bits,
                packet_gap_ms,
                packet_gap_max_ms,
            } => Box::new(VideoSource::new(
                SourceId(*id),
                *frame_rate,
                *packets_per_frame,
                *packet_size_bits,
                *packet_size_max_bits,
                *packet_gap_ms,
                *packet_gap_max_ms,
            )),
        };
        Ok(source)
    }
}

/// A station in the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeModel {
    /// Node id.
    pub id: u32,
    /// Data rate in bits per second.
    pub rate_bps: u64,
    /// Coverage radius in meters.
    pub coverage_m: f64,
    /// X coordinate in meters.
    pub x: f64,
    /// Y coordinate in meters.
    pub y: f64,
    /// Access category.
    pub access_category: u8,
    /// Traffic sources.
    pub sources: Vec<SourceModel>,
}

impl NodeModel {
    /// Registration parameters of this node.
    pub fn params(&self) -> NodeParams {
        NodeParams::new(
            NodeId(self.id),
            self.rate_bps,
            self.coverage_m,
            Position::new(self.x, self.y),
        )
        .with_access_category(self.access_category)
    }
}

/// A loaded, merged scenario.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Model {
    simulation: SimulationSettings,
    nodes: Vec<NodeModel>,
}

impl Model {
    /// Simulation-wide settings.
    pub fn simulation(&self) -> &SimulationSettings {
        &self.simulation
    }

    /// Mutable settings, for command-line overrides.
    pub fn simulation_mut(&mut self) -> &mut SimulationSettings {
        &mut self.simulation
    }

    /// Nodes in definition order.
    pub fn nodes(&self) -> &[NodeModel] {
        &self.nodes
    }

    /// Find a node by id.
    pub fn find_node(&self, id: u32) -> Option<&NodeModel> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

// ============================================================================
// YAML Schema Types (Internal)
// ============================================================================

/// Root scenario structure (YAML schema).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModelYaml {
    #[serde(default)]
    simulation: Option<SimulationYaml>,
    #[serde(default)]
    nodes: Vec<NodeYaml>,
}

/// `simulation:` section; every field overrides earlier files when present.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SimulationYaml {
    seed: Option<u64>,
    duration_ms: Option<f64>,
    interval_ms: Option<f64>,
    phy: Option<PhyMode>,
    mixed_legacy_nodes: Option<usize>,
    rts_threshold: Option<u64>,
    cts_to_self: Option<bool>,
    access_categories: Option<Vec<AccessCategoryParams>>,
    strategies: Option<Vec<StrategyModel>>,
    adaptive: Option<bool>,
    results: Option<Vec<String>>,
}

/// Node entry; fields left out keep the value of an earlier file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct NodeYaml {
    id: u32,
    #[serde(default)]
    remove: bool,
    rate: Option<u64>,
    coverage: Option<f64>,
    x: Option<f64>,
    y: Option<f64>,
    ac: Option<u8>,
    sources: Option<Vec<SourceModel>>,
}

impl SimulationYaml {
    fn apply(self, settings: &mut SimulationSettings) -> Result<(), ModelError> {
        if let Some(seed) = self.seed {
            settings.seed = seed;
        }
        if let Some(duration_ms) = self.duration_ms {
            settings.duration_ms = duration_ms;
        }
        if let Some(interval_ms) = self.interval_ms {
            settings.interval_ms = interval_ms;
        }
        if let Some(phy) = self.phy {
            settings.mac.phy = phy;
        }
        if let Some(legacy) = self.mixed_legacy_nodes {
            settings.mac.mixed_legacy_nodes = legacy;
        }
        if let Some(threshold) = self.rts_threshold {
            settings.mac.rts_threshold = threshold;
        }
        if let Some(cts_to_self) = self.cts_to_self {
            settings.mac.cts_to_self = cts_to_self;
        }
        if let Some(categories) = self.access_categories {
            if categories.len() > ACCESS_CATEGORIES {
                return Err(ModelError::InvalidConfig(format!(
                    "{} access categories given, at most {} exist",
                    categories.len(),
                    ACCESS_CATEGORIES
                )));
            }
            for (ac, params) in categories.into_iter().enumerate() {
                settings.mac.access_categories[ac] = params;
            }
        }
        if let Some(strategies) = self.strategies {
            settings.strategies = strategies;
        }
        if let Some(adaptive) = self.adaptive {
            settings.adaptive = adaptive;
        }
        if let Some(results) = self.results {
            settings.results = results;
        }
        Ok(())
    }
}

impl NodeYaml {
    fn into_node(self) -> Result<NodeModel, ModelError> {
        let rate_bps = self
            .rate
            .ok_or_else(|| ModelError::InvalidConfig(format!("node {} has no rate", self.id)))?;
        Ok(NodeModel {
            id: self.id,
            rate_bps,
            coverage_m: self.coverage.unwrap_or(DEFAULT_COVERAGE_M),
            x: self.x.unwrap_or(0.0),
            y: self.y.unwrap_or(0.0),
            access_category: self.ac.unwrap_or(0),
            sources: self.sources.unwrap_or_default(),
        })
    }

    fn apply(self, node: &mut NodeModel) {
        if let Some(rate) = self.rate {
            node.rate_bps = rate;
        }
        if let Some(coverage) = self.coverage {
            node.coverage_m = coverage;
        }
        if let Some(x) = self.x {
            node.x = x;
        }
        if let Some(y) = self.y {
            node.y = y;
        }
        if let Some(ac) = self.ac {
            node.access_category = ac;
        }
        if let Some(sources) = self.sources {
            node.sources = sources;
        }
    }
}

// ============================================================================
// Model Loading
// ============================================================================

/// Load a scenario from a file.
pub fn load_model(path: &Path) -> Result<Model, ModelError> {
    load_models(&[path])
}

/// Parse a scenario from a YAML string.
pub fn load_model_from_str(yaml_str: &str) -> Result<Model, ModelError> {
    load_models_from_str(&[yaml_str])
}

/// Load and merge several scenario files.
///
/// Later files override earlier ones:
/// - `simulation` fields present in a later file replace earlier values
/// - A node with an existing id takes the later file's fields
/// - `remove: true` deletes a node that must already exist
pub fn load_models(paths: &[&Path]) -> Result<Model, ModelError> {
    if paths.is_empty() {
        return Err(ModelError::InvalidConfig("No model files provided".to_string()));
    }

    let yaml_strings = paths
        .iter()
        .map(std::fs::read_to_string)
        .collect::<Result<Vec<String>, std::io::Error>>()?;
    let yaml_strs: Vec<&str> = yaml_strings.iter().map(|s| s.as_str()).collect();

    load_models_from_str(&yaml_strs)
}

/// Load and merge several scenarios from YAML strings.
///
/// The merged model is validated once all strings are applied.
pub fn load_models_from_str(yaml_strs: &[&str]) -> Result<Model, ModelError> {
    if yaml_strs.is_empty() {
        return Err(ModelError::InvalidConfig("No model strings provided".to_string()));
    }

    let mut model = Model::default();
    for yaml_str in yaml_strs {
        let yaml: ModelYaml = serde_yaml::from_str(yaml_str)?;
        if let Some(simulation) = yaml.simulation {
            simulation.apply(&mut model.simulation)?;
        }

        let mut seen = Vec::with_capacity(yaml.nodes.len());
        for node in yaml.nodes {
            if seen.contains(&node.id) {
                return Err(ModelError::DuplicateNode(node.id));
            }
            seen.push(node.id);

            let existing = model.nodes.iter().position(|n| n.id == node.id);
            match (node.remove, existing) {
                (true, Some(index)) => {
                    model.nodes.remove(index);
                }
                (true, None) => return Err(ModelError::NodeNotFound(node.id)),
                (false, Some(index)) => node.apply(&mut model.nodes[index]),
                (false, None) => model.nodes.push(node.into_node()?),
            }
        }
    }

    validate(&model)?;
    debug!("Loaded model with {} node(s)", model.nodes.len());
    Ok(model)
}

fn validate(model: &Model) -> Result<(), ModelError> {
    let sim = &model.simulation;
    if sim.duration_ms.is_nan() || sim.duration_ms <= 0.0 {
        return Err(ModelError::InvalidConfig(format!("duration_ms must be positive, got {}", sim.duration_ms)));
    }
    if sim.interval_ms.is_nan() || sim.interval_ms <= 0.0 {
        return Err(ModelError::InvalidConfig(format!("interval_ms must be positive, got {}", sim.interval_ms)));
    }
    sim.mac.validate().map_err(ModelError::InvalidConfig)?;
    if sim.mac.mixed_legacy_nodes > 0 && sim.mac.phy != PhyMode::Mixed {
        warn!("mixed_legacy_nodes is only used with the mixed PHY");
    }

    for node in &model.nodes {
        if node.rate_bps == 0 {
            return Err(ModelError::InvalidConfig(format!("node {} has a zero rate", node.id)));
        }
        if node.coverage_m.is_nan() || node.coverage_m < 0.0 {
            return Err(ModelError::InvalidConfig(format!("node {} has a negative coverage", node.id)));
        }
        let mut source_ids = Vec::with_capacity(node.sources.len());
        for source in &node.sources {
            if source_ids.contains(&source.id()) {
                return Err(SimError::DuplicateIdentifier(Identifier::Source {
                    node: NodeId(node.id),
                    source: SourceId(source.id()),
                })
                .into());
            }
            source_ids.push(source.id());
            // Distribution letters are checked here so bad files fail at load time
            source.build()?;
        }
    }
    Ok(())
}

// ============================================================================
// Simulation Building
// ============================================================================

/// Stations and selector built from a model.
#[derive(Debug)]
pub struct BuiltSimulation {
    /// MAC configuration.
    pub mac: MacConfig,
    /// Stations with their sources attached, in model order.
    pub stations: StationRegistry,
    /// Strategy candidates with the starting policy current.
    pub selector: StrategySelector,
}

/// Build the strategy selector of a scenario.
pub fn build_selector(strategies: &[StrategyModel]) -> Result<StrategySelector, ModelError> {
    if strategies.is_empty() {
        return Ok(StrategySelector::with_builtin_policies());
    }
    let mut selector = StrategySelector::new();
    for strategy in strategies {
        if BackoffPolicy::from_id(strategy.id).is_none() {
            warn!(
                "Strategy {} ({}) has no built-in policy; colliders keep their window under it",
                strategy.name, strategy.id
            );
        }
        selector.add_candidate(strategy.name.clone(), strategy.id, strategy.rank)?;
    }
    selector.set_current(strategies[0].id)?;
    Ok(selector)
}

/// Build stations, sources and the strategy selector from a model.
pub fn build_simulation(model: &Model) -> Result<BuiltSimulation, ModelError> {
    let mac = model.simulation.mac.clone();
    let mut stations = StationRegistry::new();
    for node in &model.nodes {
        let params = node.params();
        let timing = mac.access_timing(params.access_category);
        let mut station = Station::new(params, timing);
        for source in &node.sources {
            station.append_source(source.build()?)?;
        }
        stations.insert(station)?;
    }
    let selector = build_selector(&model.simulation.strategies)?;

    Ok(BuiltSimulation {
        mac,
        stations,
        selector,
    })
}
