// Merge the telemetry of one experiment onto a single timeline.
//
// For every node in the experiment record the four sar files are read from `<exp>/<node>/`, then
// the power meter stream and the Spark driver log are read from the driver node's directory if
// they exist.  Spark task readings are padded with a zero task count for every node at the
// earliest and latest time seen in any file, so that all nodes cover the same time range.
//
// The timeline is also the basis for the power correlation table: one row per second and
// power-metered node, with the resource readings taken at that second.  Building it for a long
// experiment is slow, so it is cached as JSON in the experiment directory.

use crate::dates::{self, TimeZoneOpt};
use crate::powerfile;
use crate::sarfile;
use crate::setup::ExperimentSetup;
use crate::sparklog;
use crate::{blocks_to_mb, kbps_to_mbps, Metric, Reading, Timestamp};
use crate::{
    CPU_FILE_NAME, DISKIO_FILE_NAME, MEMORY_FILE_NAME, NETWORK_FILE_NAME, POWER_FILE_NAME,
    SPARK_LOG_FILE_NAME,
};
use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

pub const CORRELATION_FILE_NAME: &str = "power_vs_resource_usage_entries";

pub const DEFAULT_INTERFACE: &str = "enp59s0";

/// How to read the telemetry: which network interface carries the job's traffic on each node, and
/// the time zone of the power meter's epoch times.

#[derive(Clone, Debug)]
pub struct TimelineOptions {
    pub interface: String,
    pub node_interfaces: HashMap<String, String>,
    pub tz: TimeZoneOpt,
}

impl Default for TimelineOptions {
    fn default() -> TimelineOptions {
        TimelineOptions {
            interface: DEFAULT_INTERFACE.to_string(),
            node_interfaces: HashMap::new(),
            tz: TimeZoneOpt::Local,
        }
    }
}

impl TimelineOptions {
    pub fn interface_for(&self, node: &str) -> &str {
        self.node_interfaces
            .get(node)
            .map(|s| s.as_str())
            .unwrap_or(&self.interface)
    }
}

fn cpu_readings(node: &str, xs: &[sarfile::CpuSample], out: &mut Vec<Reading>) {
    for s in xs {
        out.push(Reading::new(s.timestamp, node, Metric::CpuUser, s.user));
        out.push(Reading::new(s.timestamp, node, Metric::CpuSystem, s.system));
        out.push(Reading::new(s.timestamp, node, Metric::CpuTotal, s.total()));
    }
}

fn memory_readings(node: &str, xs: &[sarfile::MemSample], out: &mut Vec<Reading>) {
    for s in xs {
        out.push(Reading::new(s.timestamp, node, Metric::MemUsage, s.used_pct));
    }
}

fn network_readings(node: &str, xs: &[sarfile::NetSample], out: &mut Vec<Reading>) {
    for s in xs {
        out.push(Reading::new(s.timestamp, node, Metric::NetIn, kbps_to_mbps(s.rx_kbps)));
        out.push(Reading::new(s.timestamp, node, Metric::NetOut, kbps_to_mbps(s.tx_kbps)));
        out.push(Reading::new(
            s.timestamp,
            node,
            Metric::NetTotal,
            kbps_to_mbps(s.rx_kbps + s.tx_kbps),
        ));
    }
}

fn disk_readings(node: &str, xs: &[sarfile::DiskSample], out: &mut Vec<Reading>) {
    for s in xs {
        let t = s.timestamp;
        out.push(Reading::new(t, node, Metric::DiskReads, s.rtps));
        out.push(Reading::new(t, node, Metric::DiskWrites, s.wtps));
        out.push(Reading::new(t, node, Metric::DiskTotal, s.rtps + s.wtps));
        out.push(Reading::new(t, node, Metric::DiskBlocksRead, s.bread));
        out.push(Reading::new(t, node, Metric::DiskBlocksWritten, s.bwrtn));
        out.push(Reading::new(t, node, Metric::DiskBlocksTotal, s.bread + s.bwrtn));
        out.push(Reading::new(t, node, Metric::DiskMBRead, blocks_to_mb(s.bread)));
        out.push(Reading::new(t, node, Metric::DiskMBWritten, blocks_to_mb(s.bwrtn)));
        out.push(Reading::new(
            t,
            node,
            Metric::DiskMBTotal,
            blocks_to_mb(s.bread + s.bwrtn),
        ));
    }
}

/// All readings of the experiment in `dir`, sorted by time (stable, so readings for the same
/// instant stay in file order).

pub fn collect_readings(
    dir: &Path,
    setup: &ExperimentSetup,
    opts: &TimelineOptions,
) -> Result<Vec<Reading>> {
    let mut readings = vec![];
    for node in &setup.nodes {
        let node_dir = dir.join(node);
        cpu_readings(node, &sarfile::parse_cpu_file(&node_dir.join(CPU_FILE_NAME))?, &mut readings);
        network_readings(
            node,
            &sarfile::parse_network_file(
                &node_dir.join(NETWORK_FILE_NAME),
                opts.interface_for(node),
            )?,
            &mut readings,
        );
        memory_readings(
            node,
            &sarfile::parse_memory_file(&node_dir.join(MEMORY_FILE_NAME))?,
            &mut readings,
        );
        disk_readings(
            node,
            &sarfile::parse_diskio_file(&node_dir.join(DISKIO_FILE_NAME))?,
            &mut readings,
        );
    }

    let driver_dir = dir.join(&setup.driver_node);
    let power_path = driver_dir.join(POWER_FILE_NAME);
    if power_path.exists() {
        let power = powerfile::parse_power_file(&power_path, &setup.power_meter_nodes, opts.tz)?;
        log::debug!("{}: {} power samples", setup.experiment_id, power.count());
        readings.extend(power.readings());
    }

    let spark_path = driver_dir.join(SPARK_LOG_FILE_NAME);
    if spark_path.exists() {
        let spark = sparklog::parse_spark_log(&spark_path)?;
        readings.extend(spark.task_readings(&setup.nodes));
        let min_t = readings.iter().map(|r| r.timestamp).min();
        let max_t = readings.iter().map(|r| r.timestamp).max();
        if let (Some(min_t), Some(max_t)) = (min_t, max_t) {
            for node in &setup.nodes {
                readings.push(Reading::new(min_t, node, Metric::SparkTasks, 0.0));
                readings.push(Reading::new(max_t, node, Metric::SparkTasks, 0.0));
            }
        }
    }

    readings.sort_by_key(|r| r.timestamp);
    Ok(readings)
}

/// Write readings as CSV with a header: timestamp,node,metric,value.

pub fn write_readings(output: &mut dyn std::io::Write, readings: &[Reading]) -> Result<()> {
    let mut w = csv::Writer::from_writer(output);
    w.write_record(["timestamp", "node", "metric", "value"])?;
    for r in readings {
        w.write_record([
            r.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            r.node.clone(),
            r.metric.name().to_string(),
            format!("{}", r.value),
        ])?;
    }
    w.flush()?;
    Ok(())
}

mod record_time {
    use crate::Timestamp;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &Timestamp, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%Y-%m-%d %H:%M:%S").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Timestamp, D::Error> {
        let s = String::deserialize(d)?;
        Timestamp::parse_from_str(&s, "%Y-%m-%d %H:%M:%S").map_err(serde::de::Error::custom)
    }
}

/// Power and resource use of one node during one second.  Network throughput is in kB/s, disk
/// throughput in blocks/s.  Fields are None when there was no reading for that second.

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PowerEntry {
    #[serde(with = "record_time")]
    pub timestamp: Timestamp,
    pub node_name: String,
    pub power_watts: Option<f64>,
    pub cpu_total_usage: Option<f64>,
    pub mem_usage_percent: Option<f64>,
    #[serde(rename = "net_in_KBps")]
    pub net_in_kbps: Option<f64>,
    #[serde(rename = "net_out_KBps")]
    pub net_out_kbps: Option<f64>,
    #[serde(rename = "net_total_KBps")]
    pub net_total_kbps: Option<f64>,
    pub disk_breads_ps: Option<f64>,
    pub disk_bwrites_ps: Option<f64>,
    pub disk_btotal_ps: Option<f64>,
}

impl PowerEntry {
    fn empty(timestamp: Timestamp, node: &str) -> PowerEntry {
        PowerEntry {
            timestamp,
            node_name: node.to_string(),
            power_watts: None,
            cpu_total_usage: None,
            mem_usage_percent: None,
            net_in_kbps: None,
            net_out_kbps: None,
            net_total_kbps: None,
            disk_breads_ps: None,
            disk_bwrites_ps: None,
            disk_btotal_ps: None,
        }
    }

    /// True if every field has a value.

    pub fn is_complete(&self) -> bool {
        self.power_watts.is_some()
            && self.cpu_total_usage.is_some()
            && self.mem_usage_percent.is_some()
            && self.net_in_kbps.is_some()
            && self.net_out_kbps.is_some()
            && self.net_total_kbps.is_some()
            && self.disk_breads_ps.is_some()
            && self.disk_bwrites_ps.is_some()
            && self.disk_btotal_ps.is_some()
    }
}

fn mbps_to_kbps(mbps: f64) -> f64 {
    mbps * 1000.0 / 8.0
}

/// One entry per second from the earliest reading up to (not including) the latest, for each of
/// `nodes`.

pub fn correlate(readings: &[Reading], nodes: &[String]) -> Vec<PowerEntry> {
    let (Some(min_t), Some(max_t)) = (
        readings.iter().map(|r| r.timestamp).min(),
        readings.iter().map(|r| r.timestamp).max(),
    ) else {
        return vec![];
    };

    let mut at: HashMap<(Timestamp, &str), Vec<&Reading>> = HashMap::new();
    for r in readings {
        at.entry((r.timestamp, r.node.as_str())).or_default().push(r);
    }

    let mut entries = vec![];
    let mut t = min_t;
    while t < max_t {
        for node in nodes {
            let mut e = PowerEntry::empty(t, node);
            if let Some(rs) = at.get(&(t, node.as_str())) {
                for r in rs {
                    let v = Some(r.value);
                    match r.metric {
                        Metric::PowerWatts => e.power_watts = v,
                        Metric::CpuTotal => e.cpu_total_usage = v,
                        Metric::MemUsage => e.mem_usage_percent = v,
                        Metric::NetIn => e.net_in_kbps = Some(mbps_to_kbps(r.value)),
                        Metric::NetOut => e.net_out_kbps = Some(mbps_to_kbps(r.value)),
                        Metric::NetTotal => e.net_total_kbps = Some(mbps_to_kbps(r.value)),
                        Metric::DiskBlocksRead => e.disk_breads_ps = v,
                        Metric::DiskBlocksWritten => e.disk_bwrites_ps = v,
                        Metric::DiskBlocksTotal => e.disk_btotal_ps = v,
                        _ => {}
                    }
                }
            }
            entries.push(e);
        }
        t += Duration::seconds(1);
    }
    entries
}

/// The correlation table for the experiment in `dir`, from the cache if present, otherwise built
/// and cached.  The nodes are the power-metered nodes, or all nodes if none are metered.

pub fn load_or_build_correlation(
    dir: &Path,
    setup: &ExperimentSetup,
    opts: &TimelineOptions,
) -> Result<Vec<PowerEntry>> {
    let cache = dir.join(CORRELATION_FILE_NAME);
    if cache.exists() {
        let text =
            fs::read_to_string(&cache).with_context(|| format!("Reading {}", cache.display()))?;
        return serde_json::from_str(&text).with_context(|| format!("Parsing {}", cache.display()));
    }

    let readings = collect_readings(dir, setup, opts)?;
    let nodes = if setup.power_meter_nodes.is_empty() {
        &setup.nodes
    } else {
        &setup.power_meter_nodes
    };
    let entries = correlate(&readings, nodes);

    let file = fs::File::create(&cache).with_context(|| format!("Creating {}", cache.display()))?;
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(BufWriter::new(file), formatter);
    entries.serialize(&mut ser)?;
    ser.into_inner().flush()?;
    log::info!("Cached {} correlation entries in {}", entries.len(), cache.display());
    Ok(entries)
}

#[cfg(test)]
fn test_options() -> TimelineOptions {
    TimelineOptions {
        tz: TimeZoneOpt::Fixed(dates::parse_utc_offset("+02:00").unwrap()),
        ..TimelineOptions::default()
    }
}

#[cfg(test)]
fn ts(s: &str) -> Timestamp {
    dates::parse_record_time(s).unwrap()
}

#[test]
fn test_collect_readings() {
    let dir = Path::new("../bench_test_data/results/Exp-2019-07-10-13-56-23");
    let setup = crate::setup::read_setup(dir).unwrap();
    let readings = collect_readings(dir, &setup, &test_options()).unwrap();

    // b09-40: 12 cpu (x3), 12 net (x3), 12 mem, 12 disk (x9); b09-42: the same without disk;
    // power: 14 samples x 2 meters; spark: 8 task events x 2; padding: 2 x 2.
    let expected = (36 + 36 + 12 + 108) + (36 + 36 + 12) + 28 + 16 + 4;
    assert!(readings.len() == expected);

    assert!(readings.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(readings[0].timestamp == ts("2019-07-10 13:56:58"));
    assert!(readings[readings.len() - 1].timestamp == ts("2019-07-10 13:57:11"));

    let pads = readings
        .iter()
        .filter(|r| r.metric == Metric::SparkTasks && r.value == 0.0)
        .filter(|r| r.timestamp == ts("2019-07-10 13:56:58") || r.timestamp == ts("2019-07-10 13:57:11"))
        .count();
    assert!(pads == 4);

    let net = readings
        .iter()
        .find(|r| r.node == "b09-42" && r.metric == Metric::NetIn)
        .unwrap();
    assert!(net.value == kbps_to_mbps(300.0));
    let disk = readings
        .iter()
        .find(|r| r.node == "b09-40" && r.metric == Metric::DiskMBRead)
        .unwrap();
    assert!(disk.value == blocks_to_mb(1000.0));
}

#[test]
fn test_collect_giraph_readings() {
    // No power file and no Spark log in this experiment, and eth0 on b09-42.
    let dir = Path::new("../bench_test_data/results/Exp-2019-07-11-09-00-00");
    let setup = crate::setup::read_setup(dir).unwrap();
    let mut opts = test_options();
    opts.node_interfaces.insert("b09-42".to_string(), "eth0".to_string());
    let readings = collect_readings(dir, &setup, &opts).unwrap();
    assert!(readings.iter().all(|r| r.metric != Metric::PowerWatts));
    assert!(readings.iter().all(|r| r.metric != Metric::SparkTasks));
    assert!(readings
        .iter()
        .any(|r| r.node == "b09-42" && r.metric == Metric::NetOut));
}

#[test]
fn test_write_readings() {
    let rs = vec![
        Reading::new(ts("2019-07-10 13:57:01"), "b09-40", Metric::PowerWatts, 100.5),
        Reading::new(ts("2019-07-10 13:57:02"), "b09-42", Metric::NetIn, 0.8),
    ];
    let mut out = Vec::new();
    write_readings(&mut out, &rs).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(
        text == "timestamp,node,metric,value\n\
                 2019-07-10 13:57:01,b09-40,power_watts,100.5\n\
                 2019-07-10 13:57:02,b09-42,net_in_Mbps,0.8\n"
    );
}

#[test]
fn test_correlate() {
    let rs = vec![
        Reading::new(ts("2019-07-10 13:57:00"), "b09-40", Metric::PowerWatts, 100.0),
        Reading::new(ts("2019-07-10 13:57:00"), "b09-40", Metric::CpuTotal, 6.3),
        Reading::new(ts("2019-07-10 13:57:00"), "b09-40", Metric::NetIn, 0.8),
        Reading::new(ts("2019-07-10 13:57:01"), "b09-42", Metric::PowerWatts, 50.0),
        Reading::new(ts("2019-07-10 13:57:03"), "b09-42", Metric::PowerWatts, 50.0),
    ];
    let nodes = vec!["b09-40".to_string(), "b09-42".to_string()];
    let es = correlate(&rs, &nodes);
    // Three seconds (the last is excluded) times two nodes.
    assert!(es.len() == 6);
    assert!(es[0].node_name == "b09-40");
    assert!(es[0].power_watts == Some(100.0));
    assert!(es[0].cpu_total_usage == Some(6.3));
    assert!((es[0].net_in_kbps.unwrap() - 100.0).abs() < 1e-9);
    assert!(es[0].mem_usage_percent.is_none());
    assert!(!es[0].is_complete());
    assert!(es[3].node_name == "b09-42" && es[3].power_watts == Some(50.0));
    assert!(es[5].timestamp == ts("2019-07-10 13:57:02"));
    assert!(correlate(&[], &nodes).is_empty());
}

#[test]
fn test_correlation_cache() {
    let src = Path::new("../bench_test_data/results/Exp-2019-07-10-13-56-23");
    let scratch = std::env::temp_dir().join(format!("benchlog-corr-{}", std::process::id()));
    let dir = scratch.join("Exp-2019-07-10-13-56-23");
    for sub in ["", "b09-40", "b09-42"] {
        let from = src.join(sub);
        let to = dir.join(sub);
        fs::create_dir_all(&to).unwrap();
        for entry in fs::read_dir(&from).unwrap() {
            let p = entry.unwrap().path();
            if p.is_file() {
                fs::copy(&p, to.join(p.file_name().unwrap())).unwrap();
            }
        }
    }
    let setup = crate::setup::read_setup(&dir).unwrap();
    let built = load_or_build_correlation(&dir, &setup, &test_options()).unwrap();
    assert!(dir.join(CORRELATION_FILE_NAME).exists());
    // 13:56:58 up to 13:57:11, two metered nodes.
    assert!(built.len() == 26);
    let complete = built
        .iter()
        .filter(|e| e.node_name == "b09-40" && e.is_complete())
        .count();
    // b09-40 has every kind of reading from 13:56:59 through 13:57:10.
    assert!(complete == 12);
    let cached = load_or_build_correlation(&dir, &setup, &test_options()).unwrap();
    assert!(cached.len() == built.len());
    assert!(cached[5].timestamp == built[5].timestamp);
    assert!(cached[5].power_watts == built[5].power_watts);
    fs::remove_dir_all(&scratch).unwrap();
}
