// Print power next to resource use, second by second, for one node of an experiment.
//
// The table is built from the merged timeline on first use and cached in the experiment directory;
// later runs read the cache.  Only seconds where every reading is present are printed unless
// --incomplete is given.

use crate::format;
use crate::{CorrelateArgs, Source};
use anyhow::{bail, Result};
use benchlog::{Experiment, PowerEntry};
use std::collections::HashMap;
use std::io;

type Datum<'a> = &'a PowerEntry;
type Ctx = bool;

const DEFAULT_FIELDS: &str =
    "time,power,cpu,mem,net-in,net-out,net-total,disk-bread,disk-bwrite,disk-btotal";

pub fn print_correlation(
    output: &mut dyn io::Write,
    source: &Source,
    experiment: &Experiment,
    args: &CorrelateArgs,
) -> Result<()> {
    let setup = &experiment.setup;
    let node = match args.node {
        Some(ref n) => n.clone(),
        None => match setup.power_meter_nodes.first().or(setup.nodes.first()) {
            Some(n) => n.clone(),
            None => bail!("{}: no nodes", setup.experiment_id),
        },
    };

    let entries = benchlog::load_or_build_correlation(&experiment.dir, setup, &source.opts)?;
    if !entries.iter().any(|e| e.node_name == node) {
        bail!("{}: no entries for node {node}", setup.experiment_id);
    }
    let selected = entries
        .into_iter()
        .filter(|e| e.node_name == node && (args.incomplete || e.is_complete()))
        .collect::<Vec<PowerEntry>>();
    if args.meta_args.verbose {
        eprintln!("Number of entries for {node}: {}", selected.len());
    }

    let mut formatters: HashMap<String, &dyn Fn(Datum, Ctx) -> String> = HashMap::new();
    formatters.insert("time".to_string(), &format_time);
    formatters.insert("node".to_string(), &format_node);
    formatters.insert("power".to_string(), &format_power);
    formatters.insert("cpu".to_string(), &format_cpu);
    formatters.insert("mem".to_string(), &format_mem);
    formatters.insert("net-in".to_string(), &format_net_in);
    formatters.insert("net-out".to_string(), &format_net_out);
    formatters.insert("net-total".to_string(), &format_net_total);
    formatters.insert("disk-bread".to_string(), &format_disk_bread);
    formatters.insert("disk-bwrite".to_string(), &format_disk_bwrite);
    formatters.insert("disk-btotal".to_string(), &format_disk_btotal);

    let aliases = HashMap::new();
    let spec = args.print_args.fmt.as_deref().unwrap_or(DEFAULT_FIELDS);
    let (fields, others) = format::parse_fields(spec, &formatters, &aliases);
    let opts = format::standard_options(&others);
    format::format_data(output, &fields, &formatters, &opts, &selected, false)
}

fn opt(x: Option<f64>) -> String {
    match x {
        Some(v) => format!("{:.2}", v),
        None => "-".to_string(),
    }
}

fn format_time(e: Datum, _: Ctx) -> String {
    e.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn format_node(e: Datum, _: Ctx) -> String {
    e.node_name.clone()
}

fn format_power(e: Datum, _: Ctx) -> String {
    opt(e.power_watts)
}

fn format_cpu(e: Datum, _: Ctx) -> String {
    opt(e.cpu_total_usage)
}

fn format_mem(e: Datum, _: Ctx) -> String {
    opt(e.mem_usage_percent)
}

fn format_net_in(e: Datum, _: Ctx) -> String {
    opt(e.net_in_kbps)
}

fn format_net_out(e: Datum, _: Ctx) -> String {
    opt(e.net_out_kbps)
}

fn format_net_total(e: Datum, _: Ctx) -> String {
    opt(e.net_total_kbps)
}

fn format_disk_bread(e: Datum, _: Ctx) -> String {
    opt(e.disk_breads_ps)
}

fn format_disk_bwrite(e: Datum, _: Ctx) -> String {
    opt(e.disk_bwrites_ps)
}

fn format_disk_btotal(e: Datum, _: Ctx) -> String {
    opt(e.disk_btotal_ps)
}

// Copy the Spark experiment into a scratch results root so the cache is not written into the test
// data.
#[cfg(test)]
fn scratch_source(tag: &str) -> (std::path::PathBuf, Source) {
    use std::fs;
    let id = "Exp-2019-07-10-13-56-23";
    let src = std::path::Path::new("../bench_test_data/results").join(id);
    let root = std::env::temp_dir().join(format!("benchalyze-{tag}-{}", std::process::id()));
    let dir = root.join(id);
    for sub in ["", "b09-40", "b09-42"] {
        fs::create_dir_all(dir.join(sub)).unwrap();
        for entry in fs::read_dir(src.join(sub)).unwrap() {
            let p = entry.unwrap().path();
            if p.is_file() {
                fs::copy(&p, dir.join(sub).join(p.file_name().unwrap())).unwrap();
            }
        }
    }
    let args = crate::SourceArgs {
        data_path: Some(root.to_str().unwrap().to_string()),
        config_file: None,
        interface: None,
        utc_offset: Some(benchlog::parse_utc_offset("+02:00").unwrap()),
    };
    let source = Source::open(&args, &Default::default()).unwrap();
    (root, source)
}

#[cfg(test)]
fn test_args(node: Option<&str>, incomplete: bool, fmt: &str) -> CorrelateArgs {
    CorrelateArgs {
        source_args: Default::default(),
        node: node.map(|s| s.to_string()),
        incomplete,
        print_args: crate::PrintArgs {
            fmt: Some(fmt.to_string()),
        },
        meta_args: Default::default(),
        experiment: "Exp-2019-07-10-13-56-23".to_string(),
    }
}

#[test]
fn test_print_correlation() {
    let (root, source) = scratch_source("corr");
    let e = source.experiment("Exp-2019-07-10-13-56-23").unwrap();

    // b09-40 is the first metered node and has every reading from 13:56:59 through 13:57:10.
    let mut out = Vec::new();
    let args = test_args(None, false, "csv,time,node,power,net-out");
    print_correlation(&mut out, &source, &e, &args).unwrap();
    let text = String::from_utf8(out).unwrap();
    let lines = text.lines().collect::<Vec<&str>>();
    assert!(lines.len() == 12);
    assert!(lines[0].starts_with("2019-07-10 13:56:59,b09-40,100.00,"));
    assert!(e.dir.join("power_vs_resource_usage_entries").exists());

    // b09-42 has no disk readings, so no row is complete.  The second run reads the cache.
    let mut out = Vec::new();
    let args = test_args(Some("b09-42"), false, "csv,time");
    print_correlation(&mut out, &source, &e, &args).unwrap();
    assert!(out.is_empty());
    let mut out = Vec::new();
    let args = test_args(Some("b09-42"), true, "csv,time,disk-bread");
    print_correlation(&mut out, &source, &e, &args).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.lines().count() == 13);
    assert!(text.lines().all(|l| l.ends_with(",-")));

    let args = test_args(Some("b09-44"), true, "");
    assert!(print_correlation(&mut Vec::new(), &source, &e, &args).is_err());
    std::fs::remove_dir_all(&root).unwrap();
}
