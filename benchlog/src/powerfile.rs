// Parser for the power meter stream, `power_readings.txt` in the driver node's directory.
//
// Every line is a CSV record of the form
//
//   <epoch seconds>,<watts>,<watts>,...
//
// eg `1541731089.0383,112.50,95.172,98.975,97.549`, with one watt column per meter.  Column i
// belongs to the i'th node in the experiment record's PowerMeterNodesInOrder.  The meter samples
// at about 1Hz, so the sum of the samples in an interval is the energy in joules.
//
// Records with a bad timestamp, too few columns, or non-numeric readings are dropped.  The number
// of accepted records is kept so that the caller can check it against the job duration.

use crate::dates::{self, TimeZoneOpt};
use crate::{Metric, Reading, Timestamp};
use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Clone, Debug, PartialEq)]
pub struct PowerSample {
    /// Truncated to the second.
    pub timestamp: Timestamp,

    /// One value per meter, in the order of `PowerLog::nodes`.
    pub watts: Vec<f64>,
}

#[derive(Debug, Default)]
pub struct PowerLog {
    /// Host names of the meter columns.  Empty if the columns are anonymous.
    pub nodes: Vec<String>,
    pub samples: Vec<PowerSample>,
}

impl PowerLog {
    /// The number of accepted lines.

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn first(&self) -> Option<Timestamp> {
        self.samples.iter().map(|s| s.timestamp).min()
    }

    pub fn last(&self) -> Option<Timestamp> {
        self.samples.iter().map(|s| s.timestamp).max()
    }

    /// `power_watts` readings for the named meter columns.

    pub fn readings(&self) -> Vec<Reading> {
        let mut readings = vec![];
        for s in &self.samples {
            for (node, w) in self.nodes.iter().zip(s.watts.iter()) {
                readings.push(Reading::new(s.timestamp, node, Metric::PowerWatts, *w));
            }
        }
        readings
    }

    /// All meter columns summed per second.  Samples that land in the same second are added.

    pub fn total_by_time(&self) -> BTreeMap<Timestamp, f64> {
        let mut totals = BTreeMap::new();
        for s in &self.samples {
            *totals.entry(s.timestamp).or_insert(0.0) += s.watts.iter().sum::<f64>();
        }
        totals
    }

    /// Energy in joules of the meter column for `node` over samples strictly inside (from, to).

    pub fn energy_between(&self, node: &str, from: Timestamp, to: Timestamp) -> f64 {
        let Some(col) = self.nodes.iter().position(|n| n == node) else {
            return 0.0;
        };
        self.samples
            .iter()
            .filter(|s| from < s.timestamp && s.timestamp < to)
            .map(|s| s.watts[col])
            .sum()
    }
}

/// Parse a power meter file.  With a non-empty `nodes`, each record must have a reading for every
/// node and extra columns are ignored; with an empty `nodes`, all columns of each record are
/// kept.  I/O errors are propagated, bad records are dropped.

pub fn parse_power_file(path: &Path, nodes: &[String], tz: TimeZoneOpt) -> Result<PowerLog> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut log = PowerLog {
        nodes: nodes.to_vec(),
        samples: vec![],
    };
    for record in reader.records() {
        let record = match record {
            Err(e) => {
                if e.is_io_error() {
                    return Err(e.into());
                }
                // Otherwise drop the record
                continue;
            }
            Ok(r) => r,
        };
        if record.len() < 2 || (!nodes.is_empty() && record.len() < nodes.len() + 1) {
            continue;
        }
        let Some(timestamp) = record[0]
            .parse::<f64>()
            .ok()
            .and_then(|secs| dates::from_unix_seconds(secs, tz))
        else {
            continue;
        };
        let ncols = if nodes.is_empty() {
            record.len() - 1
        } else {
            nodes.len()
        };
        let watts = (1..=ncols)
            .map(|i| record[i].parse::<f64>().ok())
            .collect::<Option<Vec<f64>>>();
        if let Some(watts) = watts {
            log.samples.push(PowerSample { timestamp, watts });
        }
    }
    Ok(log)
}

#[cfg(test)]
fn test_tz() -> TimeZoneOpt {
    TimeZoneOpt::Fixed(dates::parse_utc_offset("+02:00").unwrap())
}

#[test]
fn test_parse_power_file() {
    let nodes = vec!["b09-40".to_string(), "b09-42".to_string()];
    let log = parse_power_file(
        Path::new("../bench_test_data/results/Exp-2019-07-10-13-56-23/b09-40/power_readings.txt"),
        &nodes,
        test_tz(),
    )
    .unwrap();
    // Two of the sixteen lines are malformed.
    assert!(log.count() == 14);
    assert!(log.first() == Some(dates::parse_record_time("2019-07-10 13:56:58").unwrap()));
    assert!(log.last() == Some(dates::parse_record_time("2019-07-10 13:57:11").unwrap()));
    assert!(log.samples[0].watts == vec![100.0, 50.0]);

    let readings = log.readings();
    assert!(readings.len() == 28);
    assert!(readings[1].node == "b09-42");
    assert!(readings[1].metric == Metric::PowerWatts);
    assert!(readings[1].value == 50.0);

    let from = dates::parse_record_time("2019-07-10 13:57:00").unwrap();
    let to = dates::parse_record_time("2019-07-10 13:57:10").unwrap();
    assert!(log.energy_between("b09-40", from, to) == 900.0);
    assert!(log.energy_between("b09-42", from, to) == 450.0);
    assert!(log.energy_between("b09-44", from, to) == 0.0);

    let totals = log.total_by_time();
    assert!(totals.len() == 14);
    assert!(totals.values().all(|w| *w == 150.0));
}

#[test]
fn test_anonymous_columns() {
    let log = parse_power_file(
        Path::new("../bench_test_data/v1/power_1545983908_1000.txt"),
        &[],
        test_tz(),
    )
    .unwrap();
    assert!(log.count() == 8);
    assert!(log.samples.iter().all(|s| s.watts.len() == 4));
    assert!(log.readings().is_empty());
}

#[test]
fn test_missing_power_file() {
    assert!(parse_power_file(Path::new("../bench_test_data/none.txt"), &[], test_tz()).is_err());
}
