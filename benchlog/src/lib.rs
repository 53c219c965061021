// This library handles a tree of benchmark experiment results.  It finds experiments, reads the
// experiment records, parses the telemetry files collected on every node (sar output, power meter
// streams, Spark driver and event logs), and merges and aggregates them.
//
// All timestamps are naive wall-clock times of the cluster, with no subsecond precision.  sar and
// the Spark driver log print local time, and the experiment record stores local time; only the
// power meter prints epoch seconds, which are converted according to a `TimeZoneOpt`.

mod dates;
mod eventlog;
mod logtree;
mod powerfile;
mod sarfile;
mod setup;
mod sparklog;
mod stats;
mod summary;
mod tasks;
mod timeline;

use chrono::NaiveDateTime;

pub type Timestamp = NaiveDateTime;

// Date and time parsing for the various log formats, and conversion of epoch times.

pub use dates::{
    from_unix_seconds, now, parse_log_time, parse_record_time, parse_sar_date, parse_utc_offset,
    DayRoller, TimeZoneOpt,
};

// The experiment record, `setup_details.txt`.

pub use setup::{read_setup, ExperimentSetup, JobInput, JobKind, SETUP_FILE_NAME};

// Find experiment directories within a results tree, and filter them.

pub use logtree::{find_experiments, Experiment, ExperimentFilter};

// Parse the four kinds of sar files into typed samples.

pub use sarfile::{
    parse_cpu_file, parse_diskio_file, parse_memory_file, parse_network_file, CpuSample,
    DiskSample, MemSample, NetSample,
};

// Parse the power meter stream.

pub use powerfile::{parse_power_file, PowerLog, PowerSample};

// Parse the Spark driver log for task events, stage boundaries and the observed job span.

pub use sparklog::{find_application_id, parse_spark_log, SparkLog, StageId, StageTimes, TaskEvent};

// Parse the Spark JSON event log for per-task metrics.

pub use eventlog::{locate_event_log, parse_event_log, EventLog, TaskInfo};

// Merge all telemetry of an experiment onto one timeline, and correlate power with resource use.

pub use timeline::{
    collect_readings, correlate, load_or_build_correlation, write_readings, PowerEntry,
    TimelineOptions,
};

// Per-node and per-experiment aggregates within the job window.

pub use summary::{summarize_experiment, ExperimentMetrics, NodeMetrics};

// Per-stage task statistics from the event log.

pub use tasks::{task_stats, NodeTaskStats, StageTaskStats};

// Simple statistics.

pub use stats::{cdf_curve, kmeans_1d, mean, std_dev};

// Names of the files collected for every experiment.

pub const CPU_FILE_NAME: &str = "cpu.sar";
pub const MEMORY_FILE_NAME: &str = "memory.sar";
pub const NETWORK_FILE_NAME: &str = "network.sar";
pub const DISKIO_FILE_NAME: &str = "diskio.sar";
pub const POWER_FILE_NAME: &str = "power_readings.txt";
pub const SPARK_LOG_FILE_NAME: &str = "spark.log";
pub const EVENT_LOG_FILE_NAME: &str = "spark-detailed.log";

/// The metrics that can appear on the merged timeline.  The names are the column labels used in
/// readings files and on the command line.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    CpuUser,
    CpuSystem,
    CpuTotal,
    MemUsage,
    NetIn,
    NetOut,
    NetTotal,
    DiskReads,
    DiskWrites,
    DiskTotal,
    DiskBlocksRead,
    DiskBlocksWritten,
    DiskBlocksTotal,
    DiskMBRead,
    DiskMBWritten,
    DiskMBTotal,
    PowerWatts,
    SparkStage,
    SparkTasks,
}

impl Metric {
    pub const ALL: [Metric; 19] = [
        Metric::CpuUser,
        Metric::CpuSystem,
        Metric::CpuTotal,
        Metric::MemUsage,
        Metric::NetIn,
        Metric::NetOut,
        Metric::NetTotal,
        Metric::DiskReads,
        Metric::DiskWrites,
        Metric::DiskTotal,
        Metric::DiskBlocksRead,
        Metric::DiskBlocksWritten,
        Metric::DiskBlocksTotal,
        Metric::DiskMBRead,
        Metric::DiskMBWritten,
        Metric::DiskMBTotal,
        Metric::PowerWatts,
        Metric::SparkStage,
        Metric::SparkTasks,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::CpuUser => "cpu_user_usage",
            Metric::CpuSystem => "cpu_system_usage",
            Metric::CpuTotal => "cpu_total_usage",
            Metric::MemUsage => "mem_usage_percent",
            Metric::NetIn => "net_in_Mbps",
            Metric::NetOut => "net_out_Mbps",
            Metric::NetTotal => "net_total_Mbps",
            Metric::DiskReads => "disk_reads_ps",
            Metric::DiskWrites => "disk_writes_ps",
            Metric::DiskTotal => "disk_total_ps",
            Metric::DiskBlocksRead => "disk_breads_ps",
            Metric::DiskBlocksWritten => "disk_bwrites_ps",
            Metric::DiskBlocksTotal => "disk_btotal_ps",
            Metric::DiskMBRead => "disk_MBreads_ps",
            Metric::DiskMBWritten => "disk_MBwrites_ps",
            Metric::DiskMBTotal => "disk_MBtotal_ps",
            Metric::PowerWatts => "power_watts",
            Metric::SparkStage => "spark_stage",
            Metric::SparkTasks => "spark_tasks",
        }
    }

    pub fn from_name(name: &str) -> Option<Metric> {
        Metric::ALL.iter().find(|m| m.name() == name).copied()
    }
}

/// One sample on the merged timeline.

#[derive(Clone, Debug, PartialEq)]
pub struct Reading {
    pub timestamp: Timestamp,

    /// Short host name, as it appears in the experiment record.
    pub node: String,

    pub metric: Metric,
    pub value: f64,
}

impl Reading {
    pub fn new(timestamp: Timestamp, node: &str, metric: Metric, value: f64) -> Reading {
        Reading {
            timestamp,
            node: node.to_string(),
            metric,
            value,
        }
    }
}

/// sar reports disk throughput in 512-byte blocks.

pub fn blocks_to_mb(blocks: f64) -> f64 {
    blocks * 512.0 / (1024.0 * 1024.0)
}

/// sar reports network throughput in kB/s; the timeline carries Mbps.

pub fn kbps_to_mbps(kbps: f64) -> f64 {
    kbps * 8.0 / 1000.0
}

/// Host names in logs are often fully qualified while the experiment record uses the first label.

pub fn short_hostname(host: &str) -> &str {
    host.split('.').next().unwrap_or(host)
}

#[test]
fn test_metric_names() {
    for m in Metric::ALL {
        assert!(Metric::from_name(m.name()) == Some(m));
    }
    assert!(Metric::from_name("net_in_Mbps") == Some(Metric::NetIn));
    assert!(Metric::from_name("disk_MBtotal_ps") == Some(Metric::DiskMBTotal));
    assert!(Metric::from_name("gpu_pct").is_none());
}

#[test]
fn test_units() {
    assert!(blocks_to_mb(2048.0) == 1.0);
    assert!(kbps_to_mbps(125.0) == 1.0);
    assert!(short_hostname("b09-40.cluster.example.org") == "b09-40");
    assert!(short_hostname("b09-40") == "b09-40");
}
