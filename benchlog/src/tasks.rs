// Per-stage task statistics from the Spark event log.
//
// For every stage, the time from the first task launch to the last task finish, the mean and
// spread of per-task CPU, GC and shuffle wait times, and per node:
//
//  - the number of tasks, and of "tail" tasks launched less than five seconds before the stage
//    finished
//  - the sums of run time, GC time and shuffle wait, the CPU time per task, and the shuffle data read
//  - the number of tasks that spent any time in GC, and the GC runs: GC-affected tasks are
//    clustered by their launch offset into the stage, one cluster per 80 affected tasks, and each
//    cluster is reported as (center offset, mean GC time of its tasks).  JVM collections stop all
//    tasks on an executor at once, so the clusters approximate individual collections.

use crate::eventlog::{EventLog, TaskInfo};
use crate::stats;
use itertools::Itertools;

const TAIL_TASK_SECS: f64 = 5.0;
const GC_TASKS_PER_RUN: f64 = 80.0;

#[derive(Clone, Debug, PartialEq)]
pub struct NodeTaskStats {
    pub node: String,
    pub tasks: usize,
    pub tail_tasks: usize,
    pub run_time_secs: f64,
    pub cpu_time_per_task: f64,
    pub gc_time_secs: f64,
    pub gc_tasks: usize,

    /// (seconds from stage start, mean GC seconds), ordered by start.
    pub gc_runs: Vec<(f64, f64)>,
    pub shuffle_wait_secs: f64,
    pub shuffle_read_gb: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StageTaskStats {
    pub stage_id: u32,
    pub total_secs: f64,
    pub cpu_mean: f64,
    pub cpu_std: f64,
    pub gc_mean: f64,
    pub gc_std: f64,
    pub shuffle_mean: f64,
    pub shuffle_std: f64,

    /// Ordered by node name.
    pub nodes: Vec<NodeTaskStats>,
}

/// Statistics for every stage in the log, ordered by stage.

pub fn task_stats(log: &EventLog) -> Vec<StageTaskStats> {
    let by_stage = log
        .tasks
        .iter()
        .sorted_by_key(|t| (t.stage_id, t.launch_ms))
        .group_by(|t| t.stage_id);

    let mut result = vec![];
    for (stage_id, tasks) in &by_stage {
        let tasks = tasks.collect::<Vec<&TaskInfo>>();
        result.push(stage_stats(stage_id, &tasks));
    }
    result
}

// `tasks` is non-empty and sorted by launch time.

fn stage_stats(stage_id: u32, tasks: &[&TaskInfo]) -> StageTaskStats {
    let base_ms = tasks.iter().map(|t| t.launch_ms).min().unwrap_or(0);
    let finish_ms = tasks.iter().map(|t| t.finish_ms).max().unwrap_or(base_ms);

    let cpu = tasks.iter().map(|t| t.cpu_time_secs).collect::<Vec<f64>>();
    let gc = tasks.iter().map(|t| t.gc_time_secs).collect::<Vec<f64>>();
    let shuffle = tasks.iter().map(|t| t.shuffle_time_secs).collect::<Vec<f64>>();

    let nodes = tasks
        .iter()
        .map(|t| t.node.as_str())
        .sorted()
        .dedup()
        .map(|node| {
            let mine = tasks
                .iter()
                .filter(|t| t.node == node)
                .copied()
                .collect::<Vec<&TaskInfo>>();
            node_stats(node, &mine, base_ms, finish_ms)
        })
        .collect::<Vec<NodeTaskStats>>();

    StageTaskStats {
        stage_id,
        total_secs: (finish_ms - base_ms) as f64 / 1000.0,
        cpu_mean: stats::mean(&cpu),
        cpu_std: stats::std_dev(&cpu),
        gc_mean: stats::mean(&gc),
        gc_std: stats::std_dev(&gc),
        shuffle_mean: stats::mean(&shuffle),
        shuffle_std: stats::std_dev(&shuffle),
        nodes,
    }
}

fn node_stats(node: &str, tasks: &[&TaskInfo], base_ms: u64, finish_ms: u64) -> NodeTaskStats {
    let tail_tasks = tasks
        .iter()
        .filter(|t| (finish_ms.saturating_sub(t.launch_ms)) as f64 / 1000.0 < TAIL_TASK_SECS)
        .count();
    let gc_affected = tasks
        .iter()
        .filter(|t| t.gc_time_secs > 0.0)
        .copied()
        .collect::<Vec<&TaskInfo>>();

    let offsets = gc_affected
        .iter()
        .map(|t| (t.launch_ms - base_ms) as f64 / 1000.0)
        .collect::<Vec<f64>>();
    let k = (gc_affected.len() as f64 / GC_TASKS_PER_RUN).round() as usize;
    let (centers, labels) = stats::kmeans_1d(&offsets, k);
    let mut gc_runs = centers
        .iter()
        .enumerate()
        .filter_map(|(i, c)| {
            let durations = gc_affected
                .iter()
                .zip(labels.iter())
                .filter(|(_, l)| **l == i)
                .map(|(t, _)| t.gc_time_secs)
                .collect::<Vec<f64>>();
            if durations.is_empty() {
                None
            } else {
                Some((c.trunc(), stats::mean(&durations)))
            }
        })
        .collect::<Vec<(f64, f64)>>();
    gc_runs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let n = tasks.len();
    NodeTaskStats {
        node: node.to_string(),
        tasks: n,
        tail_tasks,
        run_time_secs: tasks.iter().map(|t| t.run_time_secs).sum(),
        cpu_time_per_task: tasks.iter().map(|t| t.cpu_time_secs).sum::<f64>() / n.max(1) as f64,
        gc_time_secs: tasks.iter().map(|t| t.gc_time_secs).sum(),
        gc_tasks: gc_affected.len(),
        gc_runs,
        shuffle_wait_secs: tasks.iter().map(|t| t.shuffle_time_secs).sum(),
        shuffle_read_gb: tasks.iter().map(|t| t.shuffle_mbytes).sum::<f64>() / 1024.0,
    }
}

#[cfg(test)]
fn task(stage_id: u32, node: &str, launch_ms: u64, finish_ms: u64, gc: f64) -> TaskInfo {
    TaskInfo {
        stage_id,
        task_id: launch_ms,
        executor_id: "1".to_string(),
        node: node.to_string(),
        success: true,
        launch_ms,
        finish_ms,
        cpu_time_secs: 1.0,
        gc_time_secs: gc,
        run_time_secs: 2.0,
        shuffle_time_secs: 0.0,
        shuffle_mbytes: 512.0,
    }
}

#[test]
fn test_task_stats_from_log() {
    let log = crate::eventlog::parse_event_log(std::path::Path::new(
        "../bench_test_data/results/Exp-2019-07-10-13-56-23/b09-40/spark-detailed.log",
    ))
    .unwrap();
    let st = task_stats(&log);
    assert!(st.len() == 2);

    let s0 = &st[0];
    assert!(s0.stage_id == 0);
    assert!(s0.total_secs == 3.0);
    assert!(s0.nodes.len() == 3);
    assert!(s0.nodes[0].node == "b09-40");
    assert!(s0.nodes[2].node == "b09-44");
    // Stage 0 finishes 3s after the first launch, so every task is a tail task.
    assert!(s0.nodes.iter().all(|n| n.tail_tasks == n.tasks));
    assert!(s0.cpu_mean == (1.5 + 2.5 + 0.0) / 3.0);
    assert!(s0.gc_mean == 0.1 / 3.0);

    let s1 = &st[1];
    assert!(s1.stage_id == 1);
    assert!(s1.total_secs == 4.0);
    assert!(s1.nodes.len() == 2);
    let b42 = &s1.nodes[1];
    assert!(b42.node == "b09-42");
    assert!(b42.tasks == 1);
    assert!(b42.run_time_secs == 4.0);
    assert!(b42.cpu_time_per_task == 3.0);
    assert!(b42.gc_time_secs == 0.5);
    assert!(b42.gc_tasks == 1);
    // One affected task rounds to zero GC runs.
    assert!(b42.gc_runs.is_empty());
    assert!(b42.shuffle_wait_secs == 0.25);
    assert!(b42.shuffle_read_gb == 3.0 / 1024.0);
    assert!(s1.shuffle_mean == (0.25 + 0.1) / 2.0);
}

#[test]
fn test_gc_runs() {
    // 120 GC-affected tasks in two bursts, 40 of them in the first, rounds to 2 runs.
    let mut log = EventLog::default();
    for i in 0..40 {
        log.tasks.push(task(1, "b09-40", 1_000_000 + i, 1_010_000, 1.0));
    }
    for i in 0..80 {
        log.tasks.push(task(1, "b09-40", 1_020_000 + i, 1_030_000, 3.0));
    }
    log.tasks.push(task(1, "b09-40", 1_029_000, 1_030_000, 0.0));
    let st = task_stats(&log);
    let n = &st[0].nodes[0];
    assert!(n.tasks == 121);
    assert!(n.gc_tasks == 120);
    assert!(n.tail_tasks == 1);
    assert!(n.gc_runs.len() == 2);
    assert!(n.gc_runs[0] == (0.0, 1.0));
    assert!(n.gc_runs[1] == (20.0, 3.0));
    assert!(n.shuffle_read_gb == 121.0 * 512.0 / 1024.0);
}
