// Enumerate experiments in a results tree.
//
// Every experiment lives in its own directory directly below the results root, named
// `Exp-YYYY-MM-DD-HH-MM-SS` after its start time, with the experiment record inside it.  Other
// directories (the event log archive, plot directories, scratch space) are ignored.
//
// The time range is applied to the start time in the record, not to the directory's file times,
// since results trees are routinely copied between machines.

use crate::setup::{self, ExperimentSetup};
use crate::Timestamp;
use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

pub const EXPERIMENT_DIR_PREFIX: &str = "Exp-";

#[derive(Clone, Debug)]
pub struct Experiment {
    pub dir: PathBuf,
    pub setup: ExperimentSetup,
}

/// Find the experiments below `root` that started strictly inside (`from`, `to`), newest first.
///
/// This returns an error if `root` is not a directory or cannot be read.  Experiment directories
/// whose record is missing or cannot be parsed are reported as warnings and skipped.

pub fn find_experiments(root: &Path, from: Timestamp, to: Timestamp) -> Result<Vec<Experiment>> {
    if !root.is_dir() {
        bail!("No viable results directory: {}", root.display());
    }

    let mut experiments = vec![];
    for entry in root.read_dir()? {
        let Ok(entry) = entry else {
            // Bad directory entries are ignored
            continue;
        };
        let dir = entry.path();
        let is_experiment = dir
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(EXPERIMENT_DIR_PREFIX))
            .unwrap_or(false);
        if !is_experiment || !dir.is_dir() {
            continue;
        }
        match setup::read_setup(&dir) {
            Ok(setup) => {
                if from < setup.experiment_start && setup.experiment_start < to {
                    experiments.push(Experiment { dir, setup });
                }
            }
            Err(e) => {
                log::warn!("Skipping {}: {:#}", dir.display(), e);
            }
        }
    }
    experiments.sort_by(|a, b| {
        b.setup
            .experiment_start
            .cmp(&a.setup.experiment_start)
            .then_with(|| a.setup.experiment_id.cmp(&b.setup.experiment_id))
    });
    Ok(experiments)
}

/// Selection of experiments by identity and parameters.  An empty list matches everything.

#[derive(Clone, Debug, Default)]
pub struct ExperimentFilter {
    /// Experiment ids or experiment group names.
    pub ids: Vec<String>,
    pub input_sizes: Vec<f64>,
    pub link_rates: Vec<f64>,
}

impl ExperimentFilter {
    pub fn matches(&self, s: &ExperimentSetup) -> bool {
        if !self.ids.is_empty() && !self.ids.iter().any(|x| *x == s.experiment_id || *x == s.group)
        {
            return false;
        }
        if !self.input_sizes.is_empty() {
            match s.input_size_gb() {
                Some(size) if self.input_sizes.contains(&size) => {}
                _ => return false,
            }
        }
        if !self.link_rates.is_empty() && !self.link_rates.contains(&s.link_bandwidth_mbps) {
            return false;
        }
        true
    }

    pub fn apply(&self, experiments: Vec<Experiment>) -> Vec<Experiment> {
        experiments
            .into_iter()
            .filter(|e| self.matches(&e.setup))
            .collect()
    }
}

#[cfg(test)]
fn ts(s: &str) -> Timestamp {
    crate::dates::parse_record_time(s).unwrap()
}

#[test]
fn test_find_experiments() {
    let root = Path::new("../bench_test_data/results");
    let all = find_experiments(root, ts("2019-01-01 00:00:00"), ts("2020-01-01 00:00:00")).unwrap();
    assert!(all.len() == 2);
    assert!(all[0].setup.experiment_id == "Exp-2019-07-11-09-00-00");
    assert!(all[1].setup.experiment_id == "Exp-2019-07-10-13-56-23");
    assert!(all[1].dir.ends_with("Exp-2019-07-10-13-56-23"));

    // The range is exclusive at both ends.
    let end = ts("2019-07-11 09:00:00");
    let some = find_experiments(root, ts("2019-07-10 13:56:23"), end).unwrap();
    assert!(some.is_empty());
    let some = find_experiments(root, ts("2019-07-10 13:56:22"), end).unwrap();
    assert!(some.len() == 1);

    let nowhere = Path::new("../bench_test_data/nowhere");
    assert!(find_experiments(nowhere, ts("2019-01-01 00:00:00"), end).is_err());
}

#[test]
fn test_skip_bad_record() {
    let scratch = std::env::temp_dir().join(format!("benchlog-tree-{}", std::process::id()));
    let bad = scratch.join("Exp-2019-07-12-00-00-00");
    std::fs::create_dir_all(&bad).unwrap();
    std::fs::write(bad.join(setup::SETUP_FILE_NAME), "{ not json").unwrap();
    std::fs::create_dir_all(scratch.join("Exp-2019-07-13-00-00-00")).unwrap();
    let found =
        find_experiments(&scratch, ts("2019-01-01 00:00:00"), ts("2020-01-01 00:00:00")).unwrap();
    assert!(found.is_empty());
    std::fs::remove_dir_all(&scratch).unwrap();
}

#[test]
fn test_experiment_filter() {
    let root = Path::new("../bench_test_data/results");
    let all = find_experiments(root, ts("2019-01-01 00:00:00"), ts("2020-01-01 00:00:00")).unwrap();

    assert!(ExperimentFilter::default().apply(all.clone()).len() == 2);

    let by_group = ExperimentFilter {
        ids: vec!["7".to_string()],
        ..Default::default()
    };
    let xs = by_group.apply(all.clone());
    assert!(xs.len() == 1 && xs[0].setup.experiment_id == "Exp-2019-07-10-13-56-23");

    let by_id = ExperimentFilter {
        ids: vec!["Exp-2019-07-11-09-00-00".to_string()],
        ..Default::default()
    };
    assert!(by_id.apply(all.clone()).len() == 1);

    // Giraph experiments have no input size, so a size filter excludes them.
    let by_size = ExperimentFilter {
        input_sizes: vec![100.0],
        ..Default::default()
    };
    assert!(by_size.apply(all.clone()).len() == 1);

    let by_rate = ExperimentFilter {
        link_rates: vec![200.0, 500.0],
        ..Default::default()
    };
    let xs = by_rate.apply(all);
    assert!(xs.len() == 1 && xs[0].setup.experiment_id == "Exp-2019-07-11-09-00-00");
}
