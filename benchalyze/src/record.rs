// Create the directory for a new experiment under the results root and write its record.  The
// directory is named after the experiment start time; collecting the telemetry into it is up to
// the benchmark scripts.

use crate::{KindArg, RecordArgs};
use anyhow::{bail, Result};
use benchlog::{ExperimentSetup, JobInput, JobKind};
use std::path::{Path, PathBuf};

pub fn make_setup(args: &RecordArgs) -> Result<ExperimentSetup> {
    if args.nodes.is_empty() {
        bail!("At least one node is required");
    }
    let (kind, input) = match (args.kind, args.input_size, &args.graph_file) {
        (KindArg::Spark, Some(gb), None) => (JobKind::Spark, JobInput::SizeGb(gb)),
        (KindArg::Giraph, None, Some(f)) => (JobKind::Giraph, JobInput::GraphFile(f.clone())),
        (KindArg::Spark, _, _) => bail!("A Spark experiment needs --input-size only"),
        (KindArg::Giraph, _, _) => bail!("A Giraph experiment needs --graph-file only"),
    };
    let driver = match args.driver {
        Some(ref d) => d.clone(),
        None => args.nodes[0].clone(),
    };
    if !args.nodes.contains(&driver) {
        bail!("The driver node {driver} is not one of the nodes");
    }
    if let (Some(a), Some(b)) = (args.job_start, args.job_end) {
        if b < a {
            bail!("The job ends before it starts");
        }
    }

    let start = args.start.unwrap_or_else(benchlog::now);
    let mut setup = ExperimentSetup::new(
        kind,
        start,
        args.nodes.clone(),
        &driver,
        input,
        args.link_rate,
        &args.group,
    );
    setup.power_meter_nodes = args.power_meters.clone();
    if let Some(ref d) = args.description {
        setup.group_desc = d.clone();
    }
    setup.class_name = args.class_name.clone();
    setup.job_start = args.job_start;
    setup.job_end = args.job_end;
    setup.comments = args.comments.clone();
    Ok(setup)
}

/// Write the record into a new experiment directory below `root` and return the directory.

pub fn write_record(root: &Path, args: &RecordArgs) -> Result<PathBuf> {
    let setup = make_setup(args)?;
    let dir = root.join(&setup.experiment_id);
    if dir.exists() {
        bail!("{} already exists", dir.display());
    }
    setup.write_to(&dir)?;
    log::info!("Created {}", dir.display());
    Ok(dir)
}

#[cfg(test)]
fn test_args() -> RecordArgs {
    RecordArgs {
        data_path: None,
        kind: KindArg::Spark,
        nodes: vec!["b09-40".to_string(), "b09-42".to_string()],
        driver: None,
        power_meters: vec!["b09-40".to_string(), "b09-42".to_string()],
        input_size: Some(100.0),
        graph_file: None,
        link_rate: 1000.0,
        group: "7".to_string(),
        description: Some("Sort, 1Gbps links".to_string()),
        class_name: Some("SortDataset".to_string()),
        start: Some(benchlog::parse_record_time("2019-07-12 10:00:00").unwrap()),
        job_start: Some(benchlog::parse_record_time("2019-07-12 10:00:30").unwrap()),
        job_end: Some(benchlog::parse_record_time("2019-07-12 10:05:30").unwrap()),
        comments: None,
        meta_args: Default::default(),
    }
}

#[test]
fn test_write_record() {
    let root = std::env::temp_dir().join(format!("benchalyze-record-{}", std::process::id()));
    let dir = write_record(&root, &test_args()).unwrap();
    assert!(dir.ends_with("Exp-2019-07-12-10-00-00"));

    let setup = benchlog::read_setup(&dir).unwrap();
    assert!(setup.kind == JobKind::Spark);
    assert!(setup.driver_node == "b09-40");
    assert!(setup.input_size_gb() == Some(100.0));
    assert!(setup.power_meter_nodes.len() == 2);
    assert!(setup.group == "7");
    assert!(setup.class_name.as_deref() == Some("SortDataset"));
    assert!(setup.job_window().map(|(a, b)| (b - a).num_seconds()) == Some(300));

    // The new experiment is found like any other.
    let from = benchlog::parse_record_time("2019-07-12 00:00:00").unwrap();
    let to = benchlog::parse_record_time("2019-07-13 00:00:00").unwrap();
    assert!(benchlog::find_experiments(&root, from, to).unwrap().len() == 1);

    // A second record with the same start time is refused.
    assert!(write_record(&root, &test_args()).is_err());
    std::fs::remove_dir_all(&root).unwrap();
}

#[test]
fn test_bad_records() {
    let mut args = test_args();
    args.kind = KindArg::Giraph;
    assert!(make_setup(&args).is_err());
    args.input_size = None;
    args.graph_file = Some("twitter.txt".to_string());
    assert!(make_setup(&args).unwrap().input_label() == "twitter.txt");

    let mut args = test_args();
    args.driver = Some("b09-44".to_string());
    assert!(make_setup(&args).is_err());

    let mut args = test_args();
    args.job_end = Some(benchlog::parse_record_time("2019-07-12 10:00:00").unwrap());
    assert!(make_setup(&args).is_err());
}
