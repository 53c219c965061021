// Reader for the Spark event log, one JSON object per line, as written by Spark's
// EventLoggingListener.  Only three kinds of events are used:
//
//   SparkListenerTaskEnd   - stage, task info (host, times) and task metrics
//   SparkListenerJobStart  - "Submission Time", ms since epoch
//   SparkListenerJobEnd    - "Completion Time", ms since epoch
//
// When the application runs several jobs only the last one is timed.  Other events, and lines that
// do not decode, are skipped.  Missing metrics default to zero, which
// is what Spark itself does for tasks that failed before reporting them.
//
// The event log is copied into the driver's results directory as `spark-detailed.log` after the
// run.  If that did not happen, the log can be recovered from the archive of event logs kept under
// the results root, by the application id found in the driver log.

use crate::short_hostname;
use crate::sparklog;
use crate::{EVENT_LOG_FILE_NAME, SPARK_LOG_FILE_NAME};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

pub const EVENT_LOG_ARCHIVE_DIR: &str = "SparkLogsArchive";

/// One completed task.  Times are in seconds except for the launch and finish times, which are
/// milliseconds since the epoch.

#[derive(Clone, Debug, PartialEq)]
pub struct TaskInfo {
    pub stage_id: u32,
    pub task_id: u64,
    pub executor_id: String,

    /// Short host name.
    pub node: String,
    pub success: bool,
    pub launch_ms: u64,
    pub finish_ms: u64,
    pub cpu_time_secs: f64,
    pub gc_time_secs: f64,
    pub run_time_secs: f64,
    pub shuffle_time_secs: f64,
    pub shuffle_mbytes: f64,
}

#[derive(Debug, Default)]
pub struct EventLog {
    pub tasks: Vec<TaskInfo>,

    /// Submission of the last job in the log, ms since epoch.
    pub job_submitted_ms: Option<u64>,

    /// Completion of the last job in the log, ms since epoch.
    pub job_completed_ms: Option<u64>,
}

impl EventLog {
    /// Run time of the last job as recorded by Spark, in seconds.

    pub fn precise_total_secs(&self) -> Option<f64> {
        match (self.job_submitted_ms, self.job_completed_ms) {
            (Some(s), Some(e)) if e >= s => Some((e - s) as f64 / 1000.0),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "Event")]
enum Event {
    SparkListenerTaskEnd {
        #[serde(rename = "Stage ID")]
        stage_id: u32,
        #[serde(rename = "Task Info")]
        task_info: RawTaskInfo,
        #[serde(rename = "Task Metrics", default)]
        task_metrics: Option<RawTaskMetrics>,
    },
    SparkListenerJobStart {
        #[serde(rename = "Submission Time")]
        submission_time: Option<u64>,
    },
    SparkListenerJobEnd {
        #[serde(rename = "Completion Time")]
        completion_time: Option<u64>,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct RawTaskInfo {
    #[serde(rename = "Task ID")]
    task_id: u64,
    #[serde(rename = "Executor ID")]
    executor_id: String,
    #[serde(rename = "Host")]
    host: String,
    #[serde(rename = "Failed", default)]
    failed: bool,
    #[serde(rename = "Launch Time")]
    launch_time: u64,
    #[serde(rename = "Finish Time", default)]
    finish_time: u64,
}

#[derive(Deserialize, Default)]
struct RawTaskMetrics {
    #[serde(rename = "Executor CPU Time", default)]
    executor_cpu_time_ns: u64,
    #[serde(rename = "JVM GC Time", default)]
    jvm_gc_time_ms: u64,
    #[serde(rename = "Executor Run Time", default)]
    executor_run_time_ms: u64,
    #[serde(rename = "Shuffle Read Metrics", default)]
    shuffle_read: RawShuffleRead,
}

#[derive(Deserialize, Default)]
struct RawShuffleRead {
    #[serde(rename = "Fetch Wait Time", default)]
    fetch_wait_time_ms: u64,
    #[serde(rename = "Remote Bytes Read", default)]
    remote_bytes_read: u64,
    #[serde(rename = "Local Bytes Read", default)]
    local_bytes_read: u64,
}

/// Parse an event log.  I/O errors are propagated, undecodable lines are dropped.

pub fn parse_event_log(path: &Path) -> Result<EventLog> {
    let file = fs::File::open(path).with_context(|| format!("Opening {}", path.display()))?;
    let mut log = EventLog::default();
    for line in BufReader::new(file).lines() {
        let line = line?;
        // Cheap filter; the event logs are dominated by block updates and executor metrics.
        if !line.contains("SparkListenerTaskEnd") && !line.contains("SparkListenerJob") {
            continue;
        }
        match serde_json::from_str::<Event>(&line) {
            Ok(Event::SparkListenerTaskEnd {
                stage_id,
                task_info,
                task_metrics,
            }) => {
                let m = task_metrics.unwrap_or_default();
                log.tasks.push(TaskInfo {
                    stage_id,
                    task_id: task_info.task_id,
                    executor_id: task_info.executor_id,
                    node: short_hostname(&task_info.host).to_string(),
                    success: !task_info.failed,
                    launch_ms: task_info.launch_time,
                    finish_ms: task_info.finish_time.max(task_info.launch_time),
                    cpu_time_secs: m.executor_cpu_time_ns as f64 / 1e9,
                    gc_time_secs: m.jvm_gc_time_ms as f64 / 1000.0,
                    run_time_secs: m.executor_run_time_ms as f64 / 1000.0,
                    shuffle_time_secs: m.shuffle_read.fetch_wait_time_ms as f64 / 1000.0,
                    shuffle_mbytes: (m.shuffle_read.remote_bytes_read + m.shuffle_read.local_bytes_read)
                        as f64
                        / (1024.0 * 1024.0),
                });
            }
            Ok(Event::SparkListenerJobStart {
                submission_time: Some(t),
            }) => {
                log.job_submitted_ms = Some(t);
            }
            Ok(Event::SparkListenerJobEnd {
                completion_time: Some(t),
            }) => {
                log.job_completed_ms = Some(t);
            }
            Ok(_) | Err(_) => {}
        }
    }
    Ok(log)
}

/// Find the event log for an experiment.  If it is not in `driver_dir`, look for it in the archive
/// under `results_root` by the application id in the driver log, and copy it into `driver_dir`.
/// Returns None if there is no event log to be found.

pub fn locate_event_log(results_root: &Path, driver_dir: &Path) -> Result<Option<PathBuf>> {
    let target = driver_dir.join(EVENT_LOG_FILE_NAME);
    if target.exists() {
        return Ok(Some(target));
    }
    let driver_log = driver_dir.join(SPARK_LOG_FILE_NAME);
    if !driver_log.exists() {
        return Ok(None);
    }
    let Some(app_id) = sparklog::find_application_id(&driver_log)? else {
        return Ok(None);
    };
    let archived = results_root.join(EVENT_LOG_ARCHIVE_DIR).join(&app_id);
    if !archived.exists() {
        return Ok(None);
    }
    log::info!("Copying event log {} into {}", app_id, driver_dir.display());
    fs::copy(&archived, &target).with_context(|| format!("Copying {}", archived.display()))?;
    Ok(Some(target))
}

#[test]
fn test_parse_event_log() {
    let log = parse_event_log(Path::new(
        "../bench_test_data/results/Exp-2019-07-10-13-56-23/b09-40/spark-detailed.log",
    ))
    .unwrap();
    assert!(log.tasks.len() == 5);
    assert!(log.precise_total_secs() == Some(9.5));

    let t = &log.tasks[0];
    assert!(t.stage_id == 0);
    assert!(t.task_id == 0);
    assert!(t.executor_id == "1");
    assert!(t.node == "b09-40");
    assert!(t.success);
    assert!(t.launch_ms == 1562759821000);
    assert!(t.finish_ms == 1562759823000);
    assert!(t.cpu_time_secs == 1.5);
    assert!(t.gc_time_secs == 0.0);
    assert!(t.run_time_secs == 2.0);

    // A failed task without metrics.
    let t = log.tasks.iter().find(|t| !t.success).unwrap();
    assert!(t.node == "b09-44");
    assert!(t.cpu_time_secs == 0.0);
    assert!(t.shuffle_mbytes == 0.0);

    let t = log.tasks.iter().find(|t| t.task_id == 3).unwrap();
    assert!(t.stage_id == 1);
    assert!(t.gc_time_secs == 0.5);
    assert!(t.shuffle_time_secs == 0.25);
    assert!(t.shuffle_mbytes == 3.0);
}

#[test]
fn test_locate_event_log() {
    let root = Path::new("../bench_test_data/results");
    let present = root.join("Exp-2019-07-10-13-56-23").join("b09-40");
    assert!(locate_event_log(root, &present).unwrap() == Some(present.join(EVENT_LOG_FILE_NAME)));

    // Recover from the archive into a scratch copy of a driver directory.
    let scratch = std::env::temp_dir().join(format!("benchlog-events-{}", std::process::id()));
    let driver = scratch.join("b09-40");
    fs::create_dir_all(&driver).unwrap();
    fs::copy(present.join(SPARK_LOG_FILE_NAME), driver.join(SPARK_LOG_FILE_NAME)).unwrap();
    fs::create_dir_all(scratch.join(EVENT_LOG_ARCHIVE_DIR)).unwrap();
    assert!(locate_event_log(&scratch, &driver).unwrap().is_none());
    fs::copy(
        present.join(EVENT_LOG_FILE_NAME),
        scratch
            .join(EVENT_LOG_ARCHIVE_DIR)
            .join("application_1562759000000_0042"),
    )
    .unwrap();
    let found = locate_event_log(&scratch, &driver).unwrap().unwrap();
    assert!(found == driver.join(EVENT_LOG_FILE_NAME));
    assert!(parse_event_log(&found).unwrap().tasks.len() == 5);
    fs::remove_dir_all(&scratch).unwrap();
}

#[test]
fn test_last_job_is_timed() {
    let path = std::env::temp_dir().join(format!("benchlog-jobs-{}.log", std::process::id()));
    fs::write(
        &path,
        r#"{"Event": "SparkListenerJobStart", "Job ID": 0, "Submission Time": 1000}
{"Event": "SparkListenerJobEnd", "Job ID": 0, "Completion Time": 3000}
{"Event": "SparkListenerJobStart", "Job ID": 1, "Submission Time": 5000}
{"Event": "SparkListenerJobEnd", "Job ID": 1, "Completion Time": 15000}
"#,
    )
    .unwrap();
    let log = parse_event_log(&path).unwrap();
    fs::remove_file(&path).unwrap();
    assert!(log.tasks.is_empty());
    assert!(log.job_submitted_ms == Some(5000));
    assert!(log.precise_total_secs() == Some(10.0));
}
