// List the selected experiments, one per line, newest first.

use crate::format;
use crate::PrintArgs;
use anyhow::Result;
use benchlog::{Experiment, JobKind};
use std::collections::HashMap;
use std::io;

type Datum<'a> = &'a Experiment;
type Ctx = bool;

const DEFAULT_FIELDS: &str = "id,start,duration,group,input,link,desc";

pub fn print_experiments(
    output: &mut dyn io::Write,
    experiments: &[Experiment],
    print_args: &PrintArgs,
) -> Result<()> {
    let mut formatters: HashMap<String, &dyn Fn(Datum, Ctx) -> String> = HashMap::new();
    formatters.insert("id".to_string(), &format_id);
    formatters.insert("start".to_string(), &format_start);
    formatters.insert("job-start".to_string(), &format_job_start);
    formatters.insert("job-end".to_string(), &format_job_end);
    formatters.insert("duration".to_string(), &format_duration);
    formatters.insert("kind".to_string(), &format_kind);
    formatters.insert("group".to_string(), &format_group);
    formatters.insert("desc".to_string(), &format_desc);
    formatters.insert("input".to_string(), &format_input);
    formatters.insert("link".to_string(), &format_link);
    formatters.insert("nodes".to_string(), &format_nodes);
    formatters.insert("driver".to_string(), &format_driver);
    formatters.insert("class".to_string(), &format_class);

    let mut aliases: HashMap<String, Vec<String>> = HashMap::new();
    aliases.insert(
        "all".to_string(),
        [
            "id", "start", "job-start", "job-end", "duration", "kind", "group", "desc", "input",
            "link", "nodes", "driver", "class",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    );

    let spec = print_args.fmt.as_deref().unwrap_or(DEFAULT_FIELDS);
    let (fields, others) = format::parse_fields(spec, &formatters, &aliases);
    let opts = format::standard_options(&others);
    format::format_data(output, &fields, &formatters, &opts, experiments, false)
}

fn format_id(e: Datum, _: Ctx) -> String {
    e.setup.experiment_id.clone()
}

fn format_start(e: Datum, _: Ctx) -> String {
    e.setup.experiment_start.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn format_job_start(e: Datum, _: Ctx) -> String {
    match e.setup.job_start {
        Some(t) => t.format("%H:%M:%S").to_string(),
        None => "-".to_string(),
    }
}

fn format_job_end(e: Datum, _: Ctx) -> String {
    match e.setup.job_end {
        Some(t) => t.format("%H:%M:%S").to_string(),
        None => "-".to_string(),
    }
}

fn format_duration(e: Datum, _: Ctx) -> String {
    match e.setup.job_window() {
        Some((a, b)) => format!("{}", (b - a).num_seconds()),
        None => "-".to_string(),
    }
}

fn format_kind(e: Datum, _: Ctx) -> String {
    match e.setup.kind {
        JobKind::Spark => "spark".to_string(),
        JobKind::Giraph => "giraph".to_string(),
    }
}

fn format_group(e: Datum, _: Ctx) -> String {
    e.setup.group.clone()
}

fn format_desc(e: Datum, _: Ctx) -> String {
    e.setup.group_desc.clone()
}

fn format_input(e: Datum, _: Ctx) -> String {
    e.setup.input_label()
}

fn format_link(e: Datum, _: Ctx) -> String {
    format!("{}", e.setup.link_bandwidth_mbps)
}

fn format_nodes(e: Datum, _: Ctx) -> String {
    e.setup.nodes.join(",")
}

fn format_driver(e: Datum, _: Ctx) -> String {
    e.setup.driver_node.clone()
}

fn format_class(e: Datum, _: Ctx) -> String {
    e.setup.class_name.clone().unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
fn test_experiments() -> Vec<Experiment> {
    let root = std::path::Path::new("../bench_test_data/results");
    let from = benchlog::parse_record_time("2019-01-01 00:00:00").unwrap();
    let to = benchlog::parse_record_time("2020-01-01 00:00:00").unwrap();
    benchlog::find_experiments(root, from, to).unwrap()
}

#[test]
fn test_list_default() {
    let mut out = Vec::new();
    print_experiments(&mut out, &test_experiments(), &PrintArgs::default()).unwrap();
    let text = String::from_utf8(out).unwrap();
    let lines = text.lines().collect::<Vec<&str>>();
    assert!(lines.len() == 3);
    assert!(lines[0].starts_with("id "));
    assert!(lines[1].starts_with("Exp-2019-07-11-09-00-00  2019-07-11 09:00:00  4 "));
    assert!(lines[1].contains("giraph-1"));
    assert!(lines[1].contains("twitter.txt"));
    assert!(lines[2].starts_with("Exp-2019-07-10-13-56-23  2019-07-10 13:56:23  10"));
    assert!(lines[2].ends_with("Sort, 1Gbps links"));
}

#[test]
fn test_list_csv() {
    let mut out = Vec::new();
    let args = PrintArgs {
        fmt: Some("csv,id,kind,input,link,driver,class,job-end".to_string()),
    };
    print_experiments(&mut out, &test_experiments(), &args).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(
        text == "Exp-2019-07-11-09-00-00,giraph,twitter.txt,200,b09-42,PageRankComputation,09:00:04\n\
                 Exp-2019-07-10-13-56-23,spark,100,1000,b09-40,SortDataset,13:57:10\n"
    );
}
