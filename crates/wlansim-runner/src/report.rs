//! Tab-separated statistics files.
//!
//! One file per selected [`Statistic`], with a row per statistics interval:
//! the simulated time, one column per station and a final system column.
//! `Mean_Values.txt` holds the lifetime figures once the run is over.

use crate::{NodeStatistics, RunnerError, Simulator};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// File holding the lifetime figures.
pub const MEAN_VALUES_FILE: &str = "Mean_Values.txt";

/// A reported statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Statistic {
    ThroughputBits,
    ThroughputPackets,
    Utilization,
    MediaAccessDelay,
    QueuingDelay,
    TotalDelay,
    Jitter,
    QueueLength,
    RetransmissionAttempts,
}

impl Statistic {
    /// Every statistic in file order.
    pub const ALL: [Statistic; 9] = [
        Statistic::ThroughputBits,
        Statistic::ThroughputPackets,
        Statistic::Utilization,
        Statistic::MediaAccessDelay,
        Statistic::QueuingDelay,
        Statistic::TotalDelay,
        Statistic::Jitter,
        Statistic::QueueLength,
        Statistic::RetransmissionAttempts,
    ];

    /// Two-letter selection code.
    pub fn code(&self) -> &'static str {
        match self {
            Statistic::ThroughputBits => "tb",
            Statistic::ThroughputPackets => "tp",
            Statistic::Utilization => "ut",
            Statistic::MediaAccessDelay => "md",
            Statistic::QueuingDelay => "qd",
            Statistic::TotalDelay => "td",
            Statistic::Jitter => "dj",
            Statistic::QueueLength => "ql",
            Statistic::RetransmissionAttempts => "ra",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Statistic::ThroughputBits => "Throughput_bits.txt",
            Statistic::ThroughputPackets => "Throughput_packets.txt",
            Statistic::Utilization => "Utilization.txt",
            Statistic::MediaAccessDelay => "Media_Access_Delay.txt",
            Statistic::QueuingDelay => "Queuing_Delay.txt",
            Statistic::TotalDelay => "Total_Delay.txt",
            Statistic::Jitter => "Jitter.txt",
            Statistic::QueueLength => "Queue_Length.txt",
            Statistic::RetransmissionAttempts => "Retransmission_Attempts.txt",
        }
    }

    /// Title with unit, written above the column headers.
    pub fn title(&self) -> &'static str {
        match self {
            Statistic::ThroughputBits => "Throughput (bits/s)",
            Statistic::ThroughputPackets => "Throughput (packets/s)",
            Statistic::Utilization => "Utilization",
            Statistic::MediaAccessDelay => "Media Access Delay (ms)",
            Statistic::QueuingDelay => "Queuing Delay (ms)",
            Statistic::TotalDelay => "Total Packet Delay (ms)",
            Statistic::Jitter => "Delay Jitter (ms)",
            Statistic::QueueLength => "Queue Length (packets)",
            Statistic::RetransmissionAttempts => "Retransmission Attempts",
        }
    }

    /// Pick this statistic out of a set of figures.
    pub fn value(&self, stats: &NodeStatistics) -> f64 {
        match self {
            Statistic::ThroughputBits => stats.throughput_bps,
            Statistic::ThroughputPackets => stats.throughput_pps,
            Statistic::Utilization => stats.utilization,
            Statistic::MediaAccessDelay => stats.media_access_delay_ms,
            Statistic::QueuingDelay => stats.queuing_delay_ms,
            Statistic::TotalDelay => stats.total_delay_ms,
            Statistic::Jitter => stats.jitter_ms,
            Statistic::QueueLength => stats.mean_queue_length,
            Statistic::RetransmissionAttempts => stats.retransmission_attempts,
        }
    }

    /// Parse a selection of codes; an empty selection means every statistic.
    pub fn parse_selection<S: AsRef<str>>(codes: &[S]) -> Result<Vec<Statistic>, RunnerError> {
        if codes.is_empty() {
            return Ok(Statistic::ALL.to_vec());
        }
        let mut selected = Vec::new();
        for code in codes {
            let statistic: Statistic = code.as_ref().parse()?;
            if !selected.contains(&statistic) {
                selected.push(statistic);
            }
        }
        Ok(selected)
    }
}

impl FromStr for Statistic {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        Statistic::ALL
            .into_iter()
            .find(|stat| stat.code() == code)
            .ok_or_else(|| RunnerError::ConfigError(format!("Unknown statistic code '{}'", code)))
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Writes the per-interval statistics files of a run.
pub struct ReportWriter {
    dir: PathBuf,
    files: Vec<(Statistic, BufWriter<File>)>,
}

impl ReportWriter {
    /// Create the results directory and one file per selected statistic.
    pub fn create(dir: &Path, statistics: &[Statistic]) -> Result<Self, RunnerError> {
        fs::create_dir_all(dir)?;
        let mut files = Vec::with_capacity(statistics.len());
        for statistic in statistics {
            let path = dir.join(statistic.file_name());
            debug!("Writing {} to {}", statistic.title(), path.display());
            files.push((*statistic, BufWriter::new(File::create(path)?)));
        }
        Ok(ReportWriter {
            dir: dir.to_path_buf(),
            files,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn statistics(&self) -> Vec<Statistic> {
        self.files.iter().map(|(statistic, _)| *statistic).collect()
    }

    /// Write the title and column headers of every file.
    pub fn write_headers(&mut self, simulator: &Simulator) -> Result<(), RunnerError> {
        let columns = node_columns(simulator);
        for (statistic, out) in &mut self.files {
            writeln!(out, "# {}", statistic.title())?;
            writeln!(out, "Time (s)\t{}System", columns)?;
        }
        self.flush()
    }

    /// Append the figures of the interval just simulated.
    pub fn write_interval(&mut self, simulator: &Simulator) -> Result<(), RunnerError> {
        let time_s = simulator.current_time_s();
        let per_node = simulator
            .node_ids()
            .into_iter()
            .map(|id| simulator.node_statistics(id))
            .collect::<Result<Vec<_>, _>>()?;
        let system = simulator.system_statistics();

        for (statistic, out) in &mut self.files {
            write!(out, "{:.3}", time_s)?;
            for stats in &per_node {
                write!(out, "\t{:.6}", statistic.value(stats))?;
            }
            writeln!(out, "\t{:.6}", statistic.value(&system))?;
        }
        self.flush()
    }

    /// Write the lifetime figures of every station and the cell.
    pub fn write_mean_values(&mut self, simulator: &Simulator) -> Result<(), RunnerError> {
        let mut out = BufWriter::new(File::create(self.dir.join(MEAN_VALUES_FILE))?);
        let summary = simulator.lifetime_summary();

        writeln!(out, "# Mean values over {:.3} s", simulator.current_time_s())?;
        write!(out, "Node")?;
        for statistic in Statistic::ALL {
            write!(out, "\t{}", statistic.title())?;
        }
        writeln!(out)?;
        for node in &summary.nodes {
            write_row(&mut out, &node.id.to_string(), &node.statistics)?;
        }
        write_row(&mut out, "System", &summary.system)?;
        out.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), RunnerError> {
        for (_, out) in &mut self.files {
            out.flush()?;
        }
        Ok(())
    }
}

fn node_columns(simulator: &Simulator) -> String {
    simulator
        .node_ids()
        .iter()
        .map(|id| format!("Node {}\t", id))
        .collect()
}

fn write_row<W: Write>(out: &mut W, label: &str, stats: &NodeStatistics) -> std::io::Result<()> {
    write!(out, "{}", label)?;
    for statistic in Statistic::ALL {
        write!(out, "\t{:.6}", statistic.value(stats))?;
    }
    writeln!(out)
}
