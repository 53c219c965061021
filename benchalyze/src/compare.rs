// Compare one value across experiments.  Experiments are grouped by input (input size or graph
// file), or by experiment group with --by-group, then by job class, then by link rate, and the
// value's count, mean and standard deviation are printed for each group.

use crate::format;
use crate::metrics::kb_to_gb;
use crate::{CompareArgs, CompareValue};
use anyhow::Result;
use benchlog::{blocks_to_mb, mean, std_dev, ExperimentMetrics};
use itertools::Itertools;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::io;

#[derive(Clone, Debug, PartialEq)]
pub struct CompareRow {
    pub key: String,
    pub class: String,
    pub link_mbps: f64,
    pub values: Vec<f64>,
}

/// The value for one experiment, or None if it is not defined (the node is not part of the
/// experiment, or is not on a power meter).

fn value_of(m: &ExperimentMetrics, value: CompareValue, node: Option<&str>) -> Option<f64> {
    if value == CompareValue::Duration {
        return Some(m.duration_secs() as f64);
    }
    match node {
        Some(name) => {
            let n = m.node(name)?;
            match value {
                CompareValue::Energy => n.energy_joules.map(|j| j / 3600.0),
                CompareValue::DiskRead => Some(blocks_to_mb(n.disk_blocks_read)),
                CompareValue::DiskWrite => Some(blocks_to_mb(n.disk_blocks_written)),
                CompareValue::NetIn => Some(kb_to_gb(n.net_in_kb)),
                CompareValue::NetOut => Some(kb_to_gb(n.net_out_kb)),
                CompareValue::Duration => None,
            }
        }
        None => match value {
            CompareValue::Energy => Some(m.total_energy_wh()),
            CompareValue::DiskRead => Some(blocks_to_mb(m.total_disk_blocks_read())),
            CompareValue::DiskWrite => Some(blocks_to_mb(m.total_disk_blocks_written())),
            CompareValue::NetIn => Some(kb_to_gb(m.total_net_in_kb())),
            CompareValue::NetOut => Some(kb_to_gb(m.total_net_out_kb())),
            CompareValue::Duration => None,
        },
    }
}

pub fn compare(
    results: &[ExperimentMetrics],
    value: CompareValue,
    by_group: bool,
    node: Option<&str>,
) -> Vec<CompareRow> {
    let keyed = results
        .iter()
        .filter_map(|m| {
            let Some(v) = value_of(m, value, node) else {
                log::warn!("{}: no {:?} value, skipping", m.id(), value);
                return None;
            };
            let (key, size) = if by_group {
                (m.setup.group.clone(), None)
            } else {
                (m.setup.input_label(), m.setup.input_size_gb())
            };
            let class = m.setup.class_name.clone().unwrap_or_default();
            Some((key, size, class, m.setup.link_bandwidth_mbps, v))
        })
        .sorted_by(|a, b| {
            cmp_inputs((&a.0, a.1), (&b.0, b.1))
                .then_with(|| a.2.cmp(&b.2))
                .then_with(|| a.3.partial_cmp(&b.3).unwrap_or(Ordering::Equal))
        })
        .collect::<Vec<(String, Option<f64>, String, f64, f64)>>();

    let mut rows = vec![];
    for ((key, class, link_mbps), group) in &keyed
        .into_iter()
        .group_by(|(key, _, class, link, _)| (key.clone(), class.clone(), *link))
    {
        rows.push(CompareRow {
            key,
            class,
            link_mbps,
            values: group.map(|(_, _, _, _, v)| v).collect(),
        });
    }
    rows
}

// Input sizes in numeric order, then the labels of everything without a size.

fn cmp_inputs(a: (&String, Option<f64>), b: (&String, Option<f64>)) -> Ordering {
    match (a.1, b.1) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.0.cmp(b.0),
    }
}

type Datum<'a> = &'a CompareRow;
type Ctx = bool;

pub fn print_comparison(
    output: &mut dyn io::Write,
    results: &[ExperimentMetrics],
    args: &CompareArgs,
) -> Result<()> {
    let rows = compare(results, args.value, args.by_group, args.node.as_deref());

    let mut formatters: HashMap<String, &dyn Fn(Datum, Ctx) -> String> = HashMap::new();
    formatters.insert("key".to_string(), &format_key);
    formatters.insert("class".to_string(), &format_class);
    formatters.insert("link".to_string(), &format_link);
    formatters.insert("n".to_string(), &format_n);
    formatters.insert("mean".to_string(), &format_mean);
    formatters.insert("std".to_string(), &format_std);

    let aliases = HashMap::new();
    let spec = args.print_args.fmt.as_deref().unwrap_or("key,class,link,n,mean,std");
    let (fields, others) = format::parse_fields(spec, &formatters, &aliases);
    let opts = format::standard_options(&others);
    format::format_data(output, &fields, &formatters, &opts, &rows, false)
}

fn format_key(r: Datum, _: Ctx) -> String {
    r.key.clone()
}

fn format_class(r: Datum, _: Ctx) -> String {
    if r.class.is_empty() {
        "-".to_string()
    } else {
        r.class.clone()
    }
}

fn format_link(r: Datum, _: Ctx) -> String {
    format!("{}", r.link_mbps)
}

fn format_n(r: Datum, _: Ctx) -> String {
    format!("{}", r.values.len())
}

fn format_mean(r: Datum, _: Ctx) -> String {
    format!("{:.3}", mean(&r.values))
}

fn format_std(r: Datum, _: Ctx) -> String {
    format!("{:.3}", std_dev(&r.values))
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
fn test_compare_grouping() {
    let mut results = test_results();
    // A second run of the Sort experiment that took longer.
    let mut rerun = results[1].clone();
    rerun.setup.experiment_id = "Exp-2019-07-10-15-00-00".to_string();
    rerun.job_end += chrono::Duration::seconds(10);
    results.push(rerun);

    let rows = compare(&results, CompareValue::Duration, false, None);
    assert!(rows.len() == 2);
    assert!(rows[0].key == "100");
    assert!(rows[0].class == "SortDataset");
    assert!(rows[0].link_mbps == 1000.0);
    assert!(rows[0].values == vec![10.0, 20.0]);
    assert!(rows[1].key == "twitter.txt");
    assert!(rows[1].values == vec![4.0]);

    let rows = compare(&results, CompareValue::Energy, true, None);
    assert!(rows.len() == 2);
    assert!(rows[0].key == "7");
    assert!(rows[0].values == vec![0.375, 0.375]);
    assert!(rows[1].key == "giraph-1");
}

#[test]
fn test_compare_input_sizes() {
    let mut results = test_results();
    // Larger inputs sort after smaller ones even when their labels do not.
    for (gb, id) in [(1000.0, "Exp-2019-07-10-15-00-00"), (200.0, "Exp-2019-07-10-16-00-00")] {
        let mut m = results[1].clone();
        m.setup.experiment_id = id.to_string();
        m.setup.input = benchlog::JobInput::SizeGb(gb);
        results.push(m);
    }
    let rows = compare(&results, CompareValue::Duration, false, None);
    let keys = rows.iter().map(|r| r.key.as_str()).collect::<Vec<&str>>();
    assert!(keys == vec!["100", "200", "1000", "twitter.txt"]);
}

#[test]
fn test_compare_node() {
    let results = test_results();
    // The Giraph experiment has no power readings for b09-40, so only one experiment remains.
    let rows = compare(&results, CompareValue::Energy, false, Some("b09-40"));
    assert!(rows.len() == 1);
    assert!(rows[0].values == vec![0.25]);
    let rows = compare(&results, CompareValue::NetIn, false, Some("b09-44"));
    assert!(rows.is_empty());
}

#[test]
fn test_print_comparison() {
    let results = test_results();
    let args = CompareArgs {
        source_args: Default::default(),
        select_args: Default::default(),
        value: CompareValue::Duration,
        by_group: false,
        node: None,
        print_args: crate::PrintArgs {
            fmt: Some("csv,header,key,link,n,mean,std".to_string()),
        },
        meta_args: Default::default(),
    };
    let mut out = Vec::new();
    print_comparison(&mut out, &results, &args).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(
        text == "key,link,n,mean,std\n\
                 100,1000,1,10.000,0.000\n\
                 twitter.txt,200,1,4.000,0.000\n"
    );
}
