// Print the merged telemetry timeline of one experiment as CSV, optionally restricted to some
// nodes and metrics.  With --save, the complete timeline is also written to `readings.csv` in the
// experiment directory.

use crate::{ReadingsArgs, Source};
use anyhow::{bail, Context, Result};
use benchlog::{Experiment, Metric, Reading};
use std::fs::File;
use std::io::{self, BufWriter, Write};

pub const READINGS_FILE_NAME: &str = "readings.csv";

pub fn print_readings(
    output: &mut dyn io::Write,
    source: &Source,
    experiment: &Experiment,
    args: &ReadingsArgs,
) -> Result<()> {
    let mut metrics = vec![];
    for name in &args.metric {
        let Some(m) = Metric::from_name(name) else {
            bail!("Unknown metric {name}")
        };
        metrics.push(m);
    }

    let readings = benchlog::collect_readings(&experiment.dir, &experiment.setup, &source.opts)?;
    if args.meta_args.verbose {
        eprintln!("Number of readings: {}", readings.len());
    }

    if args.save {
        let path = experiment.dir.join(READINGS_FILE_NAME);
        let file = File::create(&path).with_context(|| format!("Creating {}", path.display()))?;
        let mut w = BufWriter::new(file);
        benchlog::write_readings(&mut w, &readings)?;
        w.flush()?;
        log::info!("Saved {} readings in {}", readings.len(), path.display());
    }

    let selected = readings
        .into_iter()
        .filter(|r| args.node.is_empty() || args.node.contains(&r.node))
        .filter(|r| metrics.is_empty() || metrics.contains(&r.metric))
        .collect::<Vec<Reading>>();
    benchlog::write_readings(output, &selected)
}

#[cfg(test)]
fn test_args(experiment: &str) -> ReadingsArgs {
    ReadingsArgs {
        source_args: Default::default(),
        node: vec![],
        metric: vec![],
        save: false,
        meta_args: Default::default(),
        experiment: experiment.to_string(),
    }
}

#[test]
fn test_print_readings_filtered() {
    let source = crate::test_source();
    let e = source.experiment("Exp-2019-07-10-13-56-23").unwrap();
    let mut args = test_args("Exp-2019-07-10-13-56-23");
    args.node = vec!["b09-42".to_string()];
    args.metric = vec!["power_watts".to_string()];
    let mut out = Vec::new();
    print_readings(&mut out, &source, &e, &args).unwrap();
    let text = String::from_utf8(out).unwrap();
    let lines = text.lines().collect::<Vec<&str>>();
    // Header and one line per power sample.
    assert!(lines.len() == 15);
    assert!(lines[0] == "timestamp,node,metric,value");
    assert!(lines[1..].iter().all(|l| l.contains(",b09-42,power_watts,50")));
}

#[test]
fn test_print_readings_bad_metric() {
    let source = crate::test_source();
    let e = source.experiment("Exp-2019-07-10-13-56-23").unwrap();
    let mut args = test_args("Exp-2019-07-10-13-56-23");
    args.metric = vec!["gpu_pct".to_string()];
    let mut out = Vec::new();
    assert!(print_readings(&mut out, &source, &e, &args).is_err());
}
