// Per-node and per-experiment aggregates over the job window.
//
// The job window is taken from the experiment record, or, if the record lacks the job start or end
// time, from the first and last timestamped line of the Spark driver log.  Only samples strictly
// inside the window are counted.  All sums are over 1Hz samples, so a sum of rates is a total:
// kB/s sums to kB, blocks/s to blocks, and watts to joules.
//
// Stage boundaries come from the driver log.  Network totals are also split by the stage in
// progress at the time of the sample (`None` between stages); power is split by stage over the
// samples strictly inside each stage.

use crate::eventlog;
use crate::powerfile;
use crate::sarfile;
use crate::setup::ExperimentSetup;
use crate::sparklog::{self, StageId, StageTimes};
use crate::timeline::TimelineOptions;
use crate::Timestamp;
use crate::{
    DISKIO_FILE_NAME, EVENT_LOG_FILE_NAME, NETWORK_FILE_NAME, POWER_FILE_NAME,
    SPARK_LOG_FILE_NAME,
};
use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Slack, in samples, allowed between the number of power samples and the job duration.

const POWER_SAMPLE_SLACK: i64 = 10;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeMetrics {
    pub node: String,

    /// None if the node is not on a power meter or there is no power file.
    pub energy_joules: Option<f64>,
    pub stage_energy_joules: BTreeMap<StageId, f64>,

    /// 512-byte blocks.
    pub disk_blocks_read: f64,
    pub disk_blocks_written: f64,

    pub net_in_kb: f64,
    pub net_out_kb: f64,
    pub stage_net_in_kb: BTreeMap<Option<StageId>, f64>,
    pub stage_net_out_kb: BTreeMap<Option<StageId>, f64>,

    /// Transmit rate in kB/s for every sample in the window.
    pub net_out_series: Vec<(Timestamp, f64)>,
}

#[derive(Clone, Debug)]
pub struct ExperimentMetrics {
    pub setup: ExperimentSetup,
    pub job_start: Timestamp,
    pub job_end: Timestamp,
    pub stages: StageTimes,

    /// The experiment's nodes in record order, followed by any metered node not in the list.
    pub nodes: Vec<NodeMetrics>,

    /// Job run time from the Spark event log, if there is one.
    pub precise_total_secs: Option<f64>,
}

impl ExperimentMetrics {
    pub fn id(&self) -> &str {
        &self.setup.experiment_id
    }

    pub fn duration_secs(&self) -> i64 {
        (self.job_end - self.job_start).num_seconds()
    }

    pub fn node(&self, name: &str) -> Option<&NodeMetrics> {
        self.nodes.iter().find(|n| n.node == name)
    }

    pub fn total_energy_joules(&self) -> f64 {
        self.nodes.iter().filter_map(|n| n.energy_joules).sum()
    }

    pub fn total_energy_wh(&self) -> f64 {
        self.total_energy_joules() / 3600.0
    }

    pub fn total_net_in_kb(&self) -> f64 {
        self.nodes.iter().map(|n| n.net_in_kb).sum()
    }

    pub fn total_net_out_kb(&self) -> f64 {
        self.nodes.iter().map(|n| n.net_out_kb).sum()
    }

    pub fn total_disk_blocks_read(&self) -> f64 {
        self.nodes.iter().map(|n| n.disk_blocks_read).sum()
    }

    pub fn total_disk_blocks_written(&self) -> f64 {
        self.nodes.iter().map(|n| n.disk_blocks_written).sum()
    }
}

/// Compute the metrics for the experiment in `dir`.  It is an error if no job window can be
/// determined, or if the power file has too few samples to cover the job.

pub fn summarize_experiment(
    dir: &Path,
    setup: &ExperimentSetup,
    opts: &TimelineOptions,
) -> Result<ExperimentMetrics> {
    let driver_dir = dir.join(&setup.driver_node);

    let spark_path = driver_dir.join(SPARK_LOG_FILE_NAME);
    let spark = if spark_path.exists() {
        Some(sparklog::parse_spark_log(&spark_path)?)
    } else {
        None
    };
    let stages = spark.as_ref().map(|s| s.stages.clone()).unwrap_or_default();

    let (job_start, job_end) = if let Some(w) = setup.job_window() {
        w
    } else if let Some(w) = spark.as_ref().and_then(|s| s.span) {
        log::debug!("{}: job window taken from the driver log", setup.experiment_id);
        w
    } else {
        bail!("{}: no job start and end time", setup.experiment_id)
    };
    let inside = |t: Timestamp| job_start < t && t < job_end;

    let mut nodes = vec![];
    for node in &setup.nodes {
        let node_dir = dir.join(node);
        let mut m = NodeMetrics {
            node: node.clone(),
            ..Default::default()
        };

        for s in sarfile::parse_diskio_file(&node_dir.join(DISKIO_FILE_NAME))? {
            if inside(s.timestamp) {
                m.disk_blocks_read += s.bread;
                m.disk_blocks_written += s.bwrtn;
            }
        }

        let interface = opts.interface_for(node);
        for s in sarfile::parse_network_file(&node_dir.join(NETWORK_FILE_NAME), interface)? {
            if !inside(s.timestamp) {
                continue;
            }
            m.net_in_kb += s.rx_kbps;
            m.net_out_kb += s.tx_kbps;
            let stage = stages.stage_at(s.timestamp);
            *m.stage_net_in_kb.entry(stage).or_insert(0.0) += s.rx_kbps;
            *m.stage_net_out_kb.entry(stage).or_insert(0.0) += s.tx_kbps;
            m.net_out_series.push((s.timestamp, s.tx_kbps));
        }
        nodes.push(m);
    }

    let power_path = driver_dir.join(POWER_FILE_NAME);
    if power_path.exists() {
        let power = powerfile::parse_power_file(&power_path, &setup.power_meter_nodes, opts.tz)?;
        check_power_count(&setup.experiment_id, power.count(), job_start, job_end)?;
        for meter_node in &setup.power_meter_nodes {
            let idx = match nodes.iter().position(|n| &n.node == meter_node) {
                Some(i) => i,
                None => {
                    nodes.push(NodeMetrics {
                        node: meter_node.clone(),
                        ..Default::default()
                    });
                    nodes.len() - 1
                }
            };
            let m = &mut nodes[idx];
            m.energy_joules = Some(power.energy_between(meter_node, job_start, job_end));
            for (stage, a, b) in stages.iter() {
                m.stage_energy_joules
                    .insert(stage, power.energy_between(meter_node, a, b));
            }
        }
    }

    let event_path = driver_dir.join(EVENT_LOG_FILE_NAME);
    let precise_total_secs = if event_path.exists() {
        eventlog::parse_event_log(&event_path)?.precise_total_secs()
    } else {
        None
    };

    Ok(ExperimentMetrics {
        setup: setup.clone(),
        job_start,
        job_end,
        stages,
        nodes,
        precise_total_secs,
    })
}

/// The meter samples at 1Hz; if there are clearly fewer samples than seconds in the job, the meter
/// dropped out and the energy figures would be wrong.

pub(crate) fn check_power_count(
    experiment_id: &str,
    count: usize,
    job_start: Timestamp,
    job_end: Timestamp,
) -> Result<()> {
    let secs = (job_end - job_start).num_seconds();
    if (count as i64) + POWER_SAMPLE_SLACK < secs {
        bail!(
            "{experiment_id}: {count} power readings do not cover a job of {secs} seconds"
        )
    }
    Ok(())
}

#[cfg(test)]
fn test_options() -> TimelineOptions {
    TimelineOptions {
        tz: crate::dates::TimeZoneOpt::Fixed(crate::dates::parse_utc_offset("+02:00").unwrap()),
        ..TimelineOptions::default()
    }
}

#[cfg(test)]
fn ts(s: &str) -> Timestamp {
    crate::dates::parse_record_time(s).unwrap()
}

#[test]
fn test_summarize_spark_experiment() {
    let dir = Path::new("../bench_test_data/results/Exp-2019-07-10-13-56-23");
    let setup = crate::setup::read_setup(dir).unwrap();
    let m = summarize_experiment(dir, &setup, &test_options()).unwrap();

    assert!(m.id() == "Exp-2019-07-10-13-56-23");
    assert!(m.duration_secs() == 10);
    assert!(m.stages.len() == 2);
    assert!(m.precise_total_secs == Some(9.5));
    assert!(m.nodes.len() == 2);

    let a = m.node("b09-40").unwrap();
    assert!(a.net_in_kb == 900.0);
    assert!(a.net_out_kb == 1800.0);
    assert!(a.disk_blocks_read == 9000.0);
    assert!(a.disk_blocks_written == 18000.0);
    assert!(a.energy_joules == Some(900.0));
    assert!(a.net_out_series.len() == 9);
    assert!(a.net_out_series[0] == (ts("2019-07-10 13:57:01"), 200.0));

    let s0 = Some(StageId::new(0, 0));
    let s1 = Some(StageId::new(1, 0));
    assert!(a.stage_net_in_kb.get(&s0) == Some(&400.0));
    assert!(a.stage_net_in_kb.get(&s1) == Some(&500.0));
    assert!(a.stage_net_out_kb.get(&s1) == Some(&1000.0));
    assert!(a.stage_net_in_kb.get(&None).is_none());
    assert!(a.stage_energy_joules.get(&StageId::new(0, 0)) == Some(&200.0));
    assert!(a.stage_energy_joules.get(&StageId::new(1, 0)) == Some(&300.0));

    let b = m.node("b09-42").unwrap();
    assert!(b.net_in_kb == 2700.0);
    assert!(b.net_out_kb == 900.0);
    assert!(b.disk_blocks_read == 0.0);
    assert!(b.energy_joules == Some(450.0));

    assert!(m.total_energy_joules() == 1350.0);
    assert!(m.total_energy_wh() == 0.375);
    assert!(m.total_net_in_kb() == 3600.0);
    assert!(m.total_net_out_kb() == 2700.0);
    assert!(m.total_disk_blocks_read() == 9000.0);
}

#[test]
fn test_summarize_giraph_experiment() {
    let dir = Path::new("../bench_test_data/results/Exp-2019-07-11-09-00-00");
    let setup = crate::setup::read_setup(dir).unwrap();
    let m = summarize_experiment(dir, &setup, &test_options()).unwrap();
    assert!(m.duration_secs() == 4);
    assert!(m.stages.is_empty());
    assert!(m.precise_total_secs.is_none());
    assert!(m.total_energy_joules() == 0.0);
    // 09:00:01 .. 09:00:03 on enp59s0 for b09-40; b09-42 has only eth0 traffic.
    let a = m.node("b09-40").unwrap();
    assert!(a.net_in_kb == 30.0);
    assert!(a.stage_net_in_kb.get(&None) == Some(&30.0));
    assert!(m.node("b09-42").unwrap().net_in_kb == 0.0);
}

#[test]
fn test_job_window_from_driver_log() {
    let dir = Path::new("../bench_test_data/results/Exp-2019-07-10-13-56-23");
    let mut setup = crate::setup::read_setup(dir).unwrap();
    setup.job_end = None;
    let m = summarize_experiment(dir, &setup, &test_options()).unwrap();
    assert!(m.job_start == ts("2019-07-10 13:56:58"));
    assert!(m.job_end == ts("2019-07-10 13:57:10"));
    // 13:56:59 is now inside the window.
    assert!(m.node("b09-40").unwrap().net_in_kb == 1000.0);
}

#[test]
fn test_check_power_count() {
    let a = ts("2019-07-10 13:00:00");
    let b = ts("2019-07-10 13:01:00");
    assert!(check_power_count("x", 50, a, b).is_ok());
    assert!(check_power_count("x", 49, a, b).is_err());
    assert!(check_power_count("x", 0, a, a).is_ok());
}
