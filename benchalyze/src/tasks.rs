// Print Spark task statistics for one experiment from its event log.  If the event log has not
// been copied into the driver's directory it is recovered from the archive under the results root.

use crate::format;
use crate::{Source, TasksArgs};
use anyhow::{bail, Result};
use benchlog::{Experiment, NodeTaskStats, StageTaskStats};
use std::collections::HashMap;
use std::io;

type Ctx = bool;

pub fn print_task_stats(
    output: &mut dyn io::Write,
    source: &Source,
    experiment: &Experiment,
    args: &TasksArgs,
) -> Result<()> {
    let driver_dir = experiment.dir.join(&experiment.setup.driver_node);
    let Some(path) = benchlog::locate_event_log(&source.root, &driver_dir)? else {
        bail!("{}: no Spark event log", experiment.setup.experiment_id)
    };
    let log = benchlog::parse_event_log(&path)?;
    if args.meta_args.verbose {
        eprintln!("Number of tasks: {}", log.tasks.len());
    }
    let stats = benchlog::task_stats(&log);
    if args.per_node {
        print_node_stats(output, &stats, &args.print_args.fmt)
    } else {
        print_stage_stats(output, &stats, &args.print_args.fmt)
    }
}

type Datum<'a> = &'a StageTaskStats;

fn print_stage_stats(
    output: &mut dyn io::Write,
    stats: &[StageTaskStats],
    fmt: &Option<String>,
) -> Result<()> {
    let mut formatters: HashMap<String, &dyn Fn(Datum, Ctx) -> String> = HashMap::new();
    formatters.insert("stage".to_string(), &format_stage_id);
    formatters.insert("total".to_string(), &format_total);
    formatters.insert("cpu-mean".to_string(), &format_cpu_mean);
    formatters.insert("cpu-std".to_string(), &format_cpu_std);
    formatters.insert("gc-mean".to_string(), &format_gc_mean);
    formatters.insert("gc-std".to_string(), &format_gc_std);
    formatters.insert("shuffle-mean".to_string(), &format_shuffle_mean);
    formatters.insert("shuffle-std".to_string(), &format_shuffle_std);

    let aliases = HashMap::new();
    let spec = fmt
        .as_deref()
        .unwrap_or("stage,total,cpu-mean,cpu-std,gc-mean,gc-std,shuffle-mean,shuffle-std");
    let (fields, others) = format::parse_fields(spec, &formatters, &aliases);
    let opts = format::standard_options(&others);
    format::format_data(output, &fields, &formatters, &opts, stats, false)
}

fn format_stage_id(s: Datum, _: Ctx) -> String {
    format!("{}", s.stage_id)
}

fn format_total(s: Datum, _: Ctx) -> String {
    secs(s.total_secs)
}

fn format_cpu_mean(s: Datum, _: Ctx) -> String {
    secs(s.cpu_mean)
}

fn format_cpu_std(s: Datum, _: Ctx) -> String {
    secs(s.cpu_std)
}

fn format_gc_mean(s: Datum, _: Ctx) -> String {
    secs(s.gc_mean)
}

fn format_gc_std(s: Datum, _: Ctx) -> String {
    secs(s.gc_std)
}

fn format_shuffle_mean(s: Datum, _: Ctx) -> String {
    secs(s.shuffle_mean)
}

fn format_shuffle_std(s: Datum, _: Ctx) -> String {
    secs(s.shuffle_std)
}

type NodeRow<'a> = (u32, &'a NodeTaskStats);

fn print_node_stats(
    output: &mut dyn io::Write,
    stats: &[StageTaskStats],
    fmt: &Option<String>,
) -> Result<()> {
    let mut formatters: HashMap<String, &dyn Fn(&NodeRow<'_>, Ctx) -> String> = HashMap::new();
    formatters.insert("stage".to_string(), &format_stage);
    formatters.insert("node".to_string(), &format_node);
    formatters.insert("tasks".to_string(), &format_tasks);
    formatters.insert("tail".to_string(), &format_tail);
    formatters.insert("runtime".to_string(), &format_runtime);
    formatters.insert("cpu-per-task".to_string(), &format_cpu_per_task);
    formatters.insert("gc".to_string(), &format_gc);
    formatters.insert("gc-tasks".to_string(), &format_gc_tasks);
    formatters.insert("gc-runs".to_string(), &format_gc_runs);
    formatters.insert("shuffle-wait".to_string(), &format_shuffle_wait);
    formatters.insert("shuffle-gb".to_string(), &format_shuffle_gb);

    let aliases = HashMap::new();
    let spec = fmt.as_deref().unwrap_or(
        "stage,node,tasks,tail,runtime,cpu-per-task,gc,gc-tasks,gc-runs,shuffle-wait,shuffle-gb",
    );
    let (fields, others) = format::parse_fields(spec, &formatters, &aliases);
    let opts = format::standard_options(&others);
    let rows = stats
        .iter()
        .flat_map(|s| s.nodes.iter().map(move |n| (s.stage_id, n)))
        .collect::<Vec<NodeRow>>();
    format::format_data(output, &fields, &formatters, &opts, &rows, false)
}

fn secs(x: f64) -> String {
    format!("{:.2}", x)
}

fn format_stage(x: &NodeRow<'_>, _: Ctx) -> String {
    format!("{}", x.0)
}

fn format_node(x: &NodeRow<'_>, _: Ctx) -> String {
    x.1.node.clone()
}

fn format_tasks(x: &NodeRow<'_>, _: Ctx) -> String {
    format!("{}", x.1.tasks)
}

fn format_tail(x: &NodeRow<'_>, _: Ctx) -> String {
    format!("{}", x.1.tail_tasks)
}

fn format_runtime(x: &NodeRow<'_>, _: Ctx) -> String {
    secs(x.1.run_time_secs)
}

fn format_cpu_per_task(x: &NodeRow<'_>, _: Ctx) -> String {
    secs(x.1.cpu_time_per_task)
}

fn format_gc(x: &NodeRow<'_>, _: Ctx) -> String {
    secs(x.1.gc_time_secs)
}

fn format_gc_tasks(x: &NodeRow<'_>, _: Ctx) -> String {
    format!("{}", x.1.gc_tasks)
}

// Each run is shown as its offset from the first launch in the stage and its mean GC time.
fn format_gc_runs(x: &NodeRow<'_>, _: Ctx) -> String {
    if x.1.gc_runs.is_empty() {
        return "-".to_string();
    }
    x.1.gc_runs
        .iter()
        .map(|(offset, gc)| format!("{:.1}:{:.2}", offset, gc))
        .collect::<Vec<String>>()
        .join(" ")
}

fn format_shuffle_wait(x: &NodeRow<'_>, _: Ctx) -> String {
    secs(x.1.shuffle_wait_secs)
}

fn format_shuffle_gb(x: &NodeRow<'_>, _: Ctx) -> String {
    format!("{:.4}", x.1.shuffle_read_gb)
}

#[cfg(test)]
fn test_args(per_node: bool, fmt: &str) -> TasksArgs {
    TasksArgs {
        source_args: Default::default(),
        per_node,
        print_args: crate::PrintArgs {
            fmt: Some(fmt.to_string()),
        },
        meta_args: Default::default(),
        experiment: "Exp-2019-07-10-13-56-23".to_string(),
    }
}

#[test]
fn test_stage_stats() {
    let source = crate::test_source();
    let e = source.experiment("Exp-2019-07-10-13-56-23").unwrap();
    let mut out = Vec::new();
    let args = test_args(false, "csv,stage,total,cpu-mean");
    print_task_stats(&mut out, &source, &e, &args).unwrap();
    assert!(String::from_utf8(out).unwrap() == "0,3.00,1.33\n1,4.00,2.00\n");
}

#[test]
fn test_node_stats() {
    let source = crate::test_source();
    let e = source.experiment("Exp-2019-07-10-13-56-23").unwrap();
    let mut out = Vec::new();
    let args = test_args(true, "csv,stage,node,tasks,runtime,gc,gc-tasks,gc-runs,shuffle-wait");
    print_task_stats(&mut out, &source, &e, &args).unwrap();
    let text = String::from_utf8(out).unwrap();
    let lines = text.lines().collect::<Vec<&str>>();
    assert!(lines.len() == 5);
    assert!(lines[0].starts_with("0,b09-40,"));
    assert!(lines[2].starts_with("0,b09-44,"));
    assert!(lines[4] == "1,b09-42,1,4.00,0.50,1,-,0.25");
}

#[test]
fn test_no_event_log() {
    // The Giraph experiment has neither an event log nor a driver log.
    let source = crate::test_source();
    let e = source.experiment("Exp-2019-07-11-09-00-00").unwrap();
    let mut out = Vec::new();
    assert!(print_task_stats(&mut out, &source, &e, &test_args(false, "")).is_err());
}
