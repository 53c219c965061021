// Scanner for the Spark driver log, `spark.log` in the driver node's directory.
//
// Every log4j line starts with a timestamp, and the first and last of these delimit the job as
// observed by the driver.  The lines of interest are the TaskSetManager's task lines, which come in
// a few layouts depending on the Spark version:
//
//   19/07/10 13:57:01 INFO TaskSetManager: Starting task 0.0 in stage 0.0 (TID 0, b09-40, executor 1, partition 0, NODE_LOCAL, 7915 bytes)
//   21/03/02 13:57:01 INFO TaskSetManager: Starting task 0.0 in stage 0.0 (TID 0) (b09-40, executor 1, partition 0, NODE_LOCAL, 7915 bytes)
//   19/07/10 13:57:03 INFO TaskSetManager: Finished task 0.0 in stage 0.0 (TID 0) in 2000 ms on b09-40 (executor 1) (1/2)
//
// Any line with a stage `S.A`, a host and an executor is a task event: "Starting task" lines start
// a task on the host, all others (Finished, Lost, Killed) end one.  The first and last task event
// of each stage delimit that stage.

use crate::dates;
use crate::{short_hostname, Metric, Reading, Timestamp};
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;

/// Stage number and attempt number, printed as "S.A".

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StageId {
    pub stage: u32,
    pub attempt: u32,
}

impl StageId {
    pub fn new(stage: u32, attempt: u32) -> StageId {
        StageId { stage, attempt }
    }

    /// The stage as a number, for plotting on a timeline.

    pub fn as_f64(&self) -> f64 {
        format!("{}.{}", self.stage, self.attempt)
            .parse()
            .unwrap_or(self.stage as f64)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.stage, self.attempt)
    }
}

/// Start and end time of each stage, ordered by stage.

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StageTimes {
    stages: BTreeMap<StageId, (Timestamp, Timestamp)>,
}

impl StageTimes {
    pub fn new() -> StageTimes {
        StageTimes::default()
    }

    /// Extend the interval of `stage` to cover `t`.

    pub fn note(&mut self, stage: StageId, t: Timestamp) {
        let e = self.stages.entry(stage).or_insert((t, t));
        if t < e.0 {
            e.0 = t;
        }
        if t > e.1 {
            e.1 = t;
        }
    }

    pub fn get(&self, stage: StageId) -> Option<(Timestamp, Timestamp)> {
        self.stages.get(&stage).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StageId, Timestamp, Timestamp)> + '_ {
        self.stages.iter().map(|(s, (a, b))| (*s, *a, *b))
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The stage whose interval (inclusive at both ends) contains `t`.  If stages overlap, the
    /// lowest stage wins.

    pub fn stage_at(&self, t: Timestamp) -> Option<StageId> {
        self.stages
            .iter()
            .find(|(_, (a, b))| *a <= t && t <= *b)
            .map(|(s, _)| *s)
    }

    /// Stage durations in seconds.

    pub fn durations(&self) -> Vec<(StageId, i64)> {
        self.iter().map(|(s, a, b)| (s, (b - a).num_seconds())).collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaskEvent {
    pub timestamp: Timestamp,
    pub stage: StageId,

    /// Short host name.
    pub node: String,
    pub executor: String,
    pub starting: bool,
}

#[derive(Debug, Default)]
pub struct SparkLog {
    /// First and last timestamped line.
    pub span: Option<(Timestamp, Timestamp)>,
    pub stages: StageTimes,
    pub events: Vec<TaskEvent>,
}

impl SparkLog {
    /// `spark_stage` and `spark_tasks` readings for every task event on one of `nodes`.  The task
    /// count of a node is the number of tasks started minus the number ended so far.

    pub fn task_readings(&self, nodes: &[String]) -> Vec<Reading> {
        let mut counters: HashMap<&str, i64> = nodes.iter().map(|n| (n.as_str(), 0)).collect();
        let mut readings = vec![];
        for ev in &self.events {
            let Some(count) = counters.get_mut(ev.node.as_str()) else {
                continue;
            };
            if ev.starting {
                *count += 1;
            } else {
                *count -= 1;
            }
            readings.push(Reading::new(
                ev.timestamp,
                &ev.node,
                Metric::SparkStage,
                ev.stage.as_f64(),
            ));
            readings.push(Reading::new(
                ev.timestamp,
                &ev.node,
                Metric::SparkTasks,
                *count as f64,
            ));
        }
        readings
    }
}

const TIMESTAMP_PATTERN: &str = r"^([0-9]+[/-][0-9]+[/-][0-9]+ [0-9]+:[0-9]+:[0-9]+) ";

pub fn parse_spark_log(path: &Path) -> Result<SparkLog> {
    let text = fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    parse_spark_text(&text)
}

fn parse_spark_text(text: &str) -> Result<SparkLog> {
    let generic_re = Regex::new(TIMESTAMP_PATTERN)?;
    let stage_re = Regex::new(r"stage ([0-9]+)\.([0-9]+)")?;
    let host_re = Regex::new(r"(?:, | on |\()([^\s,()]+),? \(?executor ([0-9A-Za-z_-]+)")?;

    let mut log = SparkLog::default();
    for line in text.lines() {
        let Some(caps) = generic_re.captures(line) else {
            continue;
        };
        let Some(timestamp) = dates::parse_log_time(&caps[1]) else {
            continue;
        };
        log.span = match log.span {
            None => Some((timestamp, timestamp)),
            Some((a, b)) => Some((a.min(timestamp), b.max(timestamp))),
        };

        let Some(stage_caps) = stage_re.captures(line) else {
            continue;
        };
        let stage_end = stage_caps.get(0).map(|m| m.end()).unwrap_or(0);
        let Some(host_caps) = host_re.captures(&line[stage_end..]) else {
            continue;
        };
        let (Ok(stage), Ok(attempt)) = (stage_caps[1].parse::<u32>(), stage_caps[2].parse::<u32>())
        else {
            continue;
        };
        let stage = StageId::new(stage, attempt);
        log.stages.note(stage, timestamp);
        log.events.push(TaskEvent {
            timestamp,
            stage,
            node: short_hostname(&host_caps[1]).to_string(),
            executor: host_caps[2].to_string(),
            starting: line.contains("Starting task"),
        });
    }
    Ok(log)
}

/// The YARN application id mentioned in the driver log, if any.

pub fn find_application_id(path: &Path) -> Result<Option<String>> {
    let text = fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let re = Regex::new(r"(application_[0-9]+_[0-9]+)")?;
    Ok(re.captures(&text).map(|c| c[1].to_string()))
}

#[cfg(test)]
fn ts(s: &str) -> Timestamp {
    dates::parse_record_time(s).unwrap()
}

#[test]
fn test_parse_spark_log() {
    let log = parse_spark_log(Path::new(
        "../bench_test_data/results/Exp-2019-07-10-13-56-23/b09-40/spark.log",
    ))
    .unwrap();
    assert!(log.span == Some((ts("2019-07-10 13:56:58"), ts("2019-07-10 13:57:10"))));
    assert!(log.events.len() == 10);
    assert!(log.stages.len() == 2);
    assert!(
        log.stages.get(StageId::new(0, 0))
            == Some((ts("2019-07-10 13:57:01"), ts("2019-07-10 13:57:04")))
    );
    assert!(
        log.stages.get(StageId::new(1, 0))
            == Some((ts("2019-07-10 13:57:05"), ts("2019-07-10 13:57:09")))
    );

    // Both the old and the new "Starting task" layouts, and the FQDN is shortened.
    let e = &log.events[0];
    assert!(e.node == "b09-40" && e.executor == "1" && e.starting);
    let e = log
        .events
        .iter()
        .find(|e| e.starting && e.stage == StageId::new(1, 0) && e.node == "b09-40")
        .unwrap();
    assert!(e.timestamp == ts("2019-07-10 13:57:06"));
    assert!(log.events.iter().filter(|e| e.starting).count() == 5);
}

#[test]
fn test_task_readings() {
    let log = parse_spark_log(Path::new(
        "../bench_test_data/results/Exp-2019-07-10-13-56-23/b09-40/spark.log",
    ))
    .unwrap();
    let nodes = vec!["b09-40".to_string(), "b09-42".to_string()];
    let readings = log.task_readings(&nodes);
    // The task on b09-44 is not part of the experiment.
    assert!(readings.len() == 16);
    let tasks = readings
        .iter()
        .filter(|r| r.metric == Metric::SparkTasks && r.node == "b09-42")
        .map(|r| r.value)
        .collect::<Vec<f64>>();
    assert!(tasks == vec![1.0, 0.0, 1.0, 0.0]);
    let stages = readings
        .iter()
        .filter(|r| r.metric == Metric::SparkStage && r.node == "b09-42")
        .map(|r| r.value)
        .collect::<Vec<f64>>();
    assert!(stages == vec![0.0, 0.0, 1.0, 1.0]);
}

#[test]
fn test_stage_at() {
    let mut st = StageTimes::new();
    st.note(StageId::new(0, 0), ts("2019-07-10 13:57:01"));
    st.note(StageId::new(0, 0), ts("2019-07-10 13:57:04"));
    st.note(StageId::new(1, 0), ts("2019-07-10 13:57:04"));
    st.note(StageId::new(1, 0), ts("2019-07-10 13:57:09"));
    assert!(st.stage_at(ts("2019-07-10 13:57:00")).is_none());
    assert!(st.stage_at(ts("2019-07-10 13:57:01")) == Some(StageId::new(0, 0)));
    assert!(st.stage_at(ts("2019-07-10 13:57:04")) == Some(StageId::new(0, 0)));
    assert!(st.stage_at(ts("2019-07-10 13:57:09")) == Some(StageId::new(1, 0)));
    assert!(st.stage_at(ts("2019-07-10 13:57:10")).is_none());
    assert!(st.durations() == vec![(StageId::new(0, 0), 3), (StageId::new(1, 0), 5)]);
    assert!(StageId::new(2, 1).to_string() == "2.1");
    assert!(StageId::new(2, 1).as_f64() == 2.1);
}

#[test]
fn test_task_line_variants() {
    let text = "\
2019-07-10 13:57:01 INFO TaskSetManager: Starting task 3.0 in stage 2.1 (TID 7) (b09-42.cluster.local, executor 4, partition 3, PROCESS_LOCAL, 7660 bytes)
2019-07-10 13:57:02 WARN TaskSetManager: Lost task 3.0 in stage 2.1 (TID 7, b09-42.cluster.local, executor 4): java.io.IOException
2019-07-10 13:57:02 INFO DAGScheduler: ShuffleMapStage 2 (map at Sort.scala:40) finished in 1.0 s
2019-07-10 13:57:03 INFO BlockManagerInfo: Added broadcast_1_piece0 in memory on b09-42:41234 (size: 4.0 KB)
not a log line
";
    let log = parse_spark_text(text).unwrap();
    assert!(log.events.len() == 2);
    assert!(log.events[0].node == "b09-42" && log.events[0].executor == "4");
    assert!(log.events[0].starting && !log.events[1].starting);
    assert!(log.events[1].stage == StageId::new(2, 1));
    assert!(log.span == Some((ts("2019-07-10 13:57:01"), ts("2019-07-10 13:57:03"))));
}

#[test]
fn test_find_application_id() {
    let id = find_application_id(Path::new(
        "../bench_test_data/results/Exp-2019-07-10-13-56-23/b09-40/spark.log",
    ))
    .unwrap();
    assert!(id.as_deref() == Some("application_1562759000000_0042"));
}
