// Print the job-window aggregates of the selected experiments, one row per experiment or, with
// --per-node, one row per node of every experiment.
//
// Energy is in watt-hours, disk traffic in MB and network traffic in GB (of 1024^3 bytes).

use crate::format;
use crate::PrintArgs;
use anyhow::Result;
use benchlog::{blocks_to_mb, ExperimentMetrics, NodeMetrics};
use std::collections::HashMap;
use std::io;

const DEFAULT_EXPERIMENT_FIELDS: &str =
    "id,duration,precise,stages,energy,disk-read,disk-write,net-in,net-out";
const DEFAULT_NODE_FIELDS: &str = "id,node,energy,disk-read,disk-write,net-in,net-out";

pub fn kb_to_gb(kb: f64) -> f64 {
    kb / (1024.0 * 1024.0)
}

pub fn print_metrics(
    output: &mut dyn io::Write,
    results: &[ExperimentMetrics],
    per_node: bool,
    print_args: &PrintArgs,
) -> Result<()> {
    if per_node {
        print_node_metrics(output, results, print_args)
    } else {
        print_experiment_metrics(output, results, print_args)
    }
}

type Datum<'a> = &'a ExperimentMetrics;
type Ctx = bool;

fn print_experiment_metrics(
    output: &mut dyn io::Write,
    results: &[ExperimentMetrics],
    print_args: &PrintArgs,
) -> Result<()> {
    let mut formatters: HashMap<String, &dyn Fn(Datum, Ctx) -> String> = HashMap::new();
    formatters.insert("id".to_string(), &format_id);
    formatters.insert("duration".to_string(), &format_duration);
    formatters.insert("precise".to_string(), &format_precise);
    formatters.insert("stages".to_string(), &format_stages);
    formatters.insert("energy".to_string(), &format_energy);
    formatters.insert("disk-read".to_string(), &format_disk_read);
    formatters.insert("disk-write".to_string(), &format_disk_write);
    formatters.insert("net-in".to_string(), &format_net_in);
    formatters.insert("net-out".to_string(), &format_net_out);

    let aliases = HashMap::new();
    let spec = print_args.fmt.as_deref().unwrap_or(DEFAULT_EXPERIMENT_FIELDS);
    let (fields, others) = format::parse_fields(spec, &formatters, &aliases);
    let opts = format::standard_options(&others);
    format::format_data(output, &fields, &formatters, &opts, results, false)
}

fn format_id(m: Datum, _: Ctx) -> String {
    m.id().to_string()
}

fn format_duration(m: Datum, _: Ctx) -> String {
    format!("{}", m.duration_secs())
}

fn format_precise(m: Datum, _: Ctx) -> String {
    match m.precise_total_secs {
        Some(s) => format!("{:.3}", s),
        None => "-".to_string(),
    }
}

fn format_stages(m: Datum, _: Ctx) -> String {
    if m.stages.is_empty() {
        return "-".to_string();
    }
    m.stages
        .durations()
        .iter()
        .map(|(s, d)| format!("{s}:{d}"))
        .collect::<Vec<String>>()
        .join(" ")
}

fn format_energy(m: Datum, _: Ctx) -> String {
    format!("{:.3}", m.total_energy_wh())
}

fn format_disk_read(m: Datum, _: Ctx) -> String {
    format!("{:.2}", blocks_to_mb(m.total_disk_blocks_read()))
}

fn format_disk_write(m: Datum, _: Ctx) -> String {
    format!("{:.2}", blocks_to_mb(m.total_disk_blocks_written()))
}

fn format_net_in(m: Datum, _: Ctx) -> String {
    format!("{:.3}", kb_to_gb(m.total_net_in_kb()))
}

fn format_net_out(m: Datum, _: Ctx) -> String {
    format!("{:.3}", kb_to_gb(m.total_net_out_kb()))
}

type NodeRow<'a> = (&'a ExperimentMetrics, &'a NodeMetrics);

fn print_node_metrics(
    output: &mut dyn io::Write,
    results: &[ExperimentMetrics],
    print_args: &PrintArgs,
) -> Result<()> {
    let mut formatters: HashMap<String, &dyn Fn(&NodeRow<'_>, Ctx) -> String> = HashMap::new();
    formatters.insert("id".to_string(), &format_node_id);
    formatters.insert("node".to_string(), &format_node_name);
    formatters.insert("energy".to_string(), &format_node_energy);
    formatters.insert("disk-read".to_string(), &format_node_disk_read);
    formatters.insert("disk-write".to_string(), &format_node_disk_write);
    formatters.insert("net-in".to_string(), &format_node_net_in);
    formatters.insert("net-out".to_string(), &format_node_net_out);

    let aliases = HashMap::new();
    let spec = print_args.fmt.as_deref().unwrap_or(DEFAULT_NODE_FIELDS);
    let (fields, others) = format::parse_fields(spec, &formatters, &aliases);
    let opts = format::standard_options(&others);
    let rows = results
        .iter()
        .flat_map(|m| m.nodes.iter().map(move |n| (m, n)))
        .collect::<Vec<NodeRow>>();
    format::format_data(output, &fields, &formatters, &opts, &rows, false)
}

fn format_node_id(x: &NodeRow<'_>, _: Ctx) -> String {
    x.0.id().to_string()
}

fn format_node_name(x: &NodeRow<'_>, _: Ctx) -> String {
    x.1.node.clone()
}

fn format_node_energy(x: &NodeRow<'_>, _: Ctx) -> String {
    match x.1.energy_joules {
        Some(j) => format!("{:.3}", j / 3600.0),
        None => "-".to_string(),
    }
}

fn format_node_disk_read(x: &NodeRow<'_>, _: Ctx) -> String {
    format!("{:.2}", blocks_to_mb(x.1.disk_blocks_read))
}

fn format_node_disk_write(x: &NodeRow<'_>, _: Ctx) -> String {
    format!("{:.2}", blocks_to_mb(x.1.disk_blocks_written))
}

fn format_node_net_in(x: &NodeRow<'_>, _: Ctx) -> String {
    format!("{:.3}", kb_to_gb(x.1.net_in_kb))
}

fn format_node_net_out(x: &NodeRow<'_>, _: Ctx) -> String {
    format!("{:.3}", kb_to_gb(x.1.net_out_kb))
}

#[cfg(test)]
fn test_results() -> Vec<ExperimentMetrics> {
    let source = crate::test_source();
    let all = source
        .select(&Default::default(), &Default::default())
        .unwrap();
    source.summarize(&all)
}

#[test]
fn test_experiment_metrics() {
    let args = PrintArgs {
        fmt: Some("csv,header".to_string() + "," + DEFAULT_EXPERIMENT_FIELDS),
    };
    let mut out = Vec::new();
    print_metrics(&mut out, &test_results(), false, &args).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(
        text == "id,duration,precise,stages,energy,disk-read,disk-write,net-in,net-out\n\
                 Exp-2019-07-11-09-00-00,4,-,-,0.000,0.00,0.00,0.000,0.000\n\
                 Exp-2019-07-10-13-56-23,10,9.500,0.0:3 1.0:4,0.375,4.39,8.79,0.003,0.003\n"
    );
}

#[test]
fn test_node_metrics() {
    let args = PrintArgs {
        fmt: Some("csv,id,node,energy,disk-read".to_string()),
    };
    let mut out = Vec::new();
    print_metrics(&mut out, &test_results(), true, &args).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(
        text == "Exp-2019-07-11-09-00-00,b09-40,-,0.00\n\
                 Exp-2019-07-11-09-00-00,b09-42,-,0.00\n\
                 Exp-2019-07-10-13-56-23,b09-40,0.250,4.39\n\
                 Exp-2019-07-10-13-56-23,b09-42,0.125,0.00\n"
    );
}
