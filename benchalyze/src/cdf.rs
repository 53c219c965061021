// The distribution of per-second network send throughput within one Spark stage, per experiment.
//
// The samples are the transmit rates of the nodes (or the one node selected) strictly inside the
// stage, in Mbps.  Experiments without that stage, and the SortNoDisk variant of the sort job
// which does not shuffle through the network in the same way, are skipped.

use crate::format;
use crate::CdfArgs;
use anyhow::Result;
use benchlog::{cdf_curve, ExperimentMetrics, StageId};
use std::collections::HashMap;
use std::io;

const SKIPPED_CLASS: &str = "SortNoDisk";

#[derive(Clone, Debug, PartialEq)]
pub struct CdfPoint {
    pub id: String,
    pub mbps: f64,
    pub fraction: f64,
}

fn kb_to_mbits(kb: f64) -> f64 {
    kb * 8.0 / 1024.0
}

/// The send throughput samples of `m` inside `stage`, or None if the experiment does not have the
/// stage.

pub fn stage_throughput(
    m: &ExperimentMetrics,
    stage: StageId,
    node: Option<&str>,
) -> Option<Vec<f64>> {
    let (a, b) = m.stages.get(stage)?;
    let mut values = vec![];
    for n in &m.nodes {
        if node.map(|name| name != n.node).unwrap_or(false) {
            continue;
        }
        for (t, kbps) in &n.net_out_series {
            if a < *t && *t < b {
                values.push(kb_to_mbits(*kbps));
            }
        }
    }
    Some(values)
}

pub fn cdf_points(results: &[ExperimentMetrics], args: &CdfArgs) -> Vec<CdfPoint> {
    let stage = StageId::new(args.stage, 0);
    let mut points = vec![];
    for m in results {
        if m.setup.class_name.as_deref() == Some(SKIPPED_CLASS) {
            log::debug!("{}: skipping {}", m.id(), SKIPPED_CLASS);
            continue;
        }
        let Some(values) = stage_throughput(m, stage, args.node.as_deref()) else {
            log::warn!("{}: no stage {}", m.id(), stage);
            continue;
        };
        for (mbps, fraction) in cdf_curve(&values, args.bins) {
            points.push(CdfPoint {
                id: m.id().to_string(),
                mbps,
                fraction,
            });
        }
    }
    points
}

type Datum<'a> = &'a CdfPoint;
type Ctx = bool;

pub fn print_cdfs(
    output: &mut dyn io::Write,
    results: &[ExperimentMetrics],
    args: &CdfArgs,
) -> Result<()> {
    let points = cdf_points(results, args);

    let mut formatters: HashMap<String, &dyn Fn(Datum, Ctx) -> String> = HashMap::new();
    formatters.insert("id".to_string(), &format_id);
    formatters.insert("mbps".to_string(), &format_mbps);
    formatters.insert("fraction".to_string(), &format_fraction);

    let aliases = HashMap::new();
    let spec = args.print_args.fmt.as_deref().unwrap_or("id,mbps,fraction");
    let (fields, others) = format::parse_fields(spec, &formatters, &aliases);
    let opts = format::standard_options(&others);
    format::format_data(output, &fields, &formatters, &opts, &points, false)
}

fn format_id(p: Datum, _: Ctx) -> String {
    p.id.clone()
}

fn format_mbps(p: Datum, _: Ctx) -> String {
    format!("{:.4}", p.mbps)
}

fn format_fraction(p: Datum, _: Ctx) -> String {
    format!("{:.4}", p.fraction)
}

#[cfg(test)]
fn test_args(bins: usize, node: Option<&str>) -> CdfArgs {
    CdfArgs {
        source_args: Default::default(),
        select_args: Default::default(),
        stage: 1,
        bins,
        node: node.map(|s| s.to_string()),
        print_args: Default::default(),
        meta_args: Default::default(),
    }
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
fn test_cdf_points() {
    let results = test_results();
    // Stage 1.0 runs 13:57:05 - 13:57:09; three samples per node fall strictly inside.
    let points = cdf_points(&results, &test_args(2, None));
    assert!(points.len() == 2);
    assert!(points.iter().all(|p| p.id == "Exp-2019-07-10-13-56-23"));
    assert!(points[0].mbps == 1.171875 && points[0].fraction == 0.5);
    assert!(points[1].mbps == 1.5625 && points[1].fraction == 1.0);

    let points = cdf_points(&results, &test_args(2, Some("b09-42")));
    assert!(points.len() == 1);
    assert!(points[0].mbps == 0.78125 && points[0].fraction == 1.0);
}

#[test]
fn test_cdf_skips() {
    let mut results = test_results();
    results[1].setup.class_name = Some(SKIPPED_CLASS.to_string());
    assert!(cdf_points(&results, &test_args(10, None)).is_empty());

    let mut args = test_args(10, None);
    args.stage = 7;
    assert!(cdf_points(&test_results(), &args).is_empty());
}

#[test]
fn test_print_cdfs() {
    let mut out = Vec::new();
    let mut args = test_args(2, None);
    args.print_args.fmt = Some("csv,mbps,fraction".to_string());
    print_cdfs(&mut out, &test_results(), &args).unwrap();
    assert!(String::from_utf8(out).unwrap() == "1.1719,0.5000\n1.5625,1.0000\n");
}
