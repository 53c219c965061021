// Job times and energy for runs recorded before experiments had their own directories.  Each run
// left a Spark driver log and a power meter file side by side:
//
//   spark_<tag>_<run id>_<link mbps>[suffix].log
//   power_<run id>_<link mbps>.txt
//
// The job span is the span of timestamped lines in the driver log.  The meter columns are not
// named, so the energy of a run is the sum of all columns over every power sample before the end
// of the job.
//
// Runs are printed in order of job start, and runs more than two hours apart are separated by a
// line of dashes since they belong to different sessions.

use crate::format;
use crate::{tz_option, EnergyArgs};
use anyhow::{bail, Context, Result};
use benchlog::{TimeZoneOpt, Timestamp};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

const SESSION_GAP_SECS: i64 = 2 * 60 * 60;
const POWER_SAMPLE_SLACK: i64 = 10;

#[derive(Clone, Debug, PartialEq)]
pub struct EnergyRun {
    pub run_id: String,
    pub link_mbps: String,
    pub job_start: Timestamp,
    pub job_end: Timestamp,
    pub power_count: usize,

    /// Seconds from the first to the last power sample, zero if there are none.
    pub power_span_secs: i64,
    pub energy_wh: f64,
}

impl EnergyRun {
    pub fn duration_secs(&self) -> i64 {
        (self.job_end - self.job_start).num_seconds()
    }
}

/// The (run id, link rate) of a file name `<prefix>_..._<run id>_<mbps>[suffix].<ext>`.

fn run_key(name: &str, prefix: &str, ext: &str) -> Option<(String, String)> {
    let stem = name.strip_prefix(prefix)?.strip_suffix(ext)?;
    let parts = stem.split('_').collect::<Vec<&str>>();
    if parts.len() < 2 {
        return None;
    }
    let id = parts[parts.len() - 2];
    let mbps = parts[parts.len() - 1]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>();
    if id.is_empty() || mbps.is_empty() {
        return None;
    }
    Some((id.to_string(), mbps))
}

/// Pairs of (spark log, power file) in `dir`, matched by run id and link rate.  Unmatched files
/// are reported and ignored.

pub fn find_run_files(dir: &Path) -> Result<Vec<(PathBuf, PathBuf)>> {
    let mut logs = HashMap::new();
    let mut powers = HashMap::new();
    for entry in dir
        .read_dir()
        .with_context(|| format!("Reading directory {}", dir.display()))?
    {
        let Ok(entry) = entry else {
            continue;
        };
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(key) = run_key(name, "spark_", ".log") {
            logs.insert(key, path.clone());
        } else if let Some(key) = run_key(name, "power_", ".txt") {
            powers.insert(key, path.clone());
        }
    }
    let mut pairs = vec![];
    for (key, log) in logs {
        match powers.remove(&key) {
            Some(power) => pairs.push((log, power)),
            None => log::warn!("No power file for {}", log.display()),
        }
    }
    for power in powers.values() {
        log::warn!("No Spark log for {}", power.display());
    }
    pairs.sort();
    Ok(pairs)
}

pub fn analyze_run(spark_log: &Path, power_file: &Path, tz: TimeZoneOpt) -> Result<EnergyRun> {
    let name = spark_log
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let (run_id, link_mbps) = run_key(name, "spark_", ".log")
        .unwrap_or_else(|| (name.to_string(), "-".to_string()));

    let spark = benchlog::parse_spark_log(spark_log)?;
    let Some((job_start, job_end)) = spark.span else {
        bail!("No timestamped lines in {}", spark_log.display())
    };

    let power = benchlog::parse_power_file(power_file, &[], tz)?;
    let joules = power
        .samples
        .iter()
        .filter(|s| s.timestamp < job_end)
        .map(|s| s.watts.iter().sum::<f64>())
        .sum::<f64>();
    let power_span_secs = match (power.first(), power.last()) {
        (Some(a), Some(b)) => (b - a).num_seconds(),
        _ => 0,
    };

    let run = EnergyRun {
        run_id,
        link_mbps,
        job_start,
        job_end,
        power_count: power.count(),
        power_span_secs,
        energy_wh: joules / 3600.0,
    };
    if (run.power_count as i64) + POWER_SAMPLE_SLACK < run.duration_secs() {
        log::warn!(
            "{}: only {} power readings for a job of {} seconds",
            run.run_id,
            run.power_count,
            run.duration_secs()
        );
    }
    Ok(run)
}

/// Split runs sorted by start time into sessions at gaps of more than two hours.

pub fn sessions(runs: &[EnergyRun]) -> Vec<&[EnergyRun]> {
    let mut result = vec![];
    let mut first = 0;
    for i in 1..runs.len() {
        if (runs[i].job_start - runs[i - 1].job_start).num_seconds() > SESSION_GAP_SECS {
            result.push(&runs[first..i]);
            first = i;
        }
    }
    if first < runs.len() {
        result.push(&runs[first..]);
    }
    result
}

type Datum<'a> = &'a EnergyRun;
type Ctx = bool;

pub fn print_energy(output: &mut dyn io::Write, args: &EnergyArgs) -> Result<()> {
    let tz = tz_option(args.utc_offset);
    let pairs = match (&args.dir, &args.spark_log, &args.power_file) {
        (Some(dir), None, None) => find_run_files(Path::new(dir))?,
        (None, Some(log), Some(power)) => vec![(PathBuf::from(log), PathBuf::from(power))],
        _ => bail!("Either --dir, or both --spark-log and --power-file, are required"),
    };
    if args.meta_args.verbose {
        eprintln!("Number of runs: {}", pairs.len());
    }

    let mut runs = vec![];
    for (log, power) in &pairs {
        match analyze_run(log, power, tz) {
            Ok(run) => runs.push(run),
            Err(msg) => log::warn!("Skipping {}: {:#}", log.display(), msg),
        }
    }
    runs.sort_by_key(|r| r.job_start);

    let mut formatters: HashMap<String, &dyn Fn(Datum, Ctx) -> String> = HashMap::new();
    formatters.insert("run".to_string(), &format_run);
    formatters.insert("link".to_string(), &format_link);
    formatters.insert("start".to_string(), &format_start);
    formatters.insert("end".to_string(), &format_end);
    formatters.insert("duration".to_string(), &format_duration);
    formatters.insert("power-span".to_string(), &format_power_span);
    formatters.insert("readings".to_string(), &format_readings);
    formatters.insert("energy".to_string(), &format_energy);

    let aliases = HashMap::new();
    let spec = args
        .print_args
        .fmt
        .as_deref()
        .unwrap_or("run,link,start,end,duration,power-span,energy");
    let (fields, others) = format::parse_fields(spec, &formatters, &aliases);
    let opts = format::standard_options(&others);
    for (i, session) in sessions(&runs).into_iter().enumerate() {
        let mut session_opts = opts;
        if i > 0 {
            session_opts.header = false;
            if !opts.csv {
                writeln!(output, "--------")?;
            }
        }
        format::format_data(output, &fields, &formatters, &session_opts, session, false)?;
    }
    Ok(())
}

fn format_run(r: Datum, _: Ctx) -> String {
    r.run_id.clone()
}

fn format_link(r: Datum, _: Ctx) -> String {
    r.link_mbps.clone()
}

fn format_start(r: Datum, _: Ctx) -> String {
    r.job_start.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn format_end(r: Datum, _: Ctx) -> String {
    r.job_end.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn format_duration(r: Datum, _: Ctx) -> String {
    format!("{}", r.duration_secs())
}

fn format_power_span(r: Datum, _: Ctx) -> String {
    format!("{}", r.power_span_secs)
}

fn format_readings(r: Datum, _: Ctx) -> String {
    format!("{}", r.power_count)
}

fn format_energy(r: Datum, _: Ctx) -> String {
    format!("{:.3}", r.energy_wh)
}

#[cfg(test)]
fn test_tz() -> TimeZoneOpt {
    TimeZoneOpt::Fixed(benchlog::parse_utc_offset("+02:00").unwrap())
}

#[test]
fn test_run_key() {
    assert!(
        run_key("spark_128gb_1545983908_1000.log", "spark_", ".log")
            == Some(("1545983908".to_string(), "1000".to_string()))
    );
    assert!(
        run_key("spark_128gb_1545983908_1000-retry.log", "spark_", ".log")
            == Some(("1545983908".to_string(), "1000".to_string()))
    );
    assert!(
        run_key("power_1545983908_1000.txt", "power_", ".txt")
            == Some(("1545983908".to_string(), "1000".to_string()))
    );
    assert!(run_key("power_1545983908.txt", "power_", ".txt").is_none());
    assert!(run_key("notes.txt", "power_", ".txt").is_none());
}

#[test]
fn test_analyze_run() {
    let dir = Path::new("../bench_test_data/v1");
    let pairs = find_run_files(dir).unwrap();
    assert!(pairs.len() == 1);
    let run = analyze_run(&pairs[0].0, &pairs[0].1, test_tz()).unwrap();
    assert!(run.run_id == "1545983908");
    assert!(run.link_mbps == "1000");
    assert!(run.job_start == benchlog::parse_record_time("2018-12-28 09:58:30").unwrap());
    assert!(run.duration_secs() == 5);
    // The line with a missing reading is dropped.
    assert!(run.power_count == 8);
    assert!(run.power_span_secs == 7);
    // Four meters at 90W for the five samples before 09:58:35.
    assert!(run.energy_wh == 0.5);
}

#[test]
fn test_sessions() {
    let t0 = benchlog::parse_record_time("2018-12-28 09:00:00").unwrap();
    let run = |mins: i64| EnergyRun {
        run_id: format!("{mins}"),
        link_mbps: "1000".to_string(),
        job_start: t0 + chrono::Duration::minutes(mins),
        job_end: t0 + chrono::Duration::minutes(mins + 5),
        power_count: 300,
        power_span_secs: 300,
        energy_wh: 1.0,
    };
    let runs = vec![run(0), run(30), run(160), run(300), run(420)];
    let ss = sessions(&runs);
    assert!(ss.len() == 3);
    assert!(ss[0].len() == 2);
    assert!(ss[1].len() == 1 && ss[1][0].run_id == "160");
    assert!(ss[2].len() == 2);
    assert!(sessions(&[]).is_empty());
}

#[test]
fn test_print_energy() {
    let args = EnergyArgs {
        dir: Some("../bench_test_data/v1".to_string()),
        spark_log: None,
        power_file: None,
        utc_offset: Some(benchlog::parse_utc_offset("+02:00").unwrap()),
        print_args: crate::PrintArgs {
            fmt: Some("csv,run,link,duration,power-span,readings,energy".to_string()),
        },
        meta_args: Default::default(),
    };
    let mut out = Vec::new();
    print_energy(&mut out, &args).unwrap();
    assert!(String::from_utf8(out).unwrap() == "1545983908,1000,5,7,8,0.500\n");

    let bad = EnergyArgs {
        dir: None,
        spark_log: Some("../bench_test_data/v1/spark_128gb_1545983908_1000.log".to_string()),
        power_file: None,
        utc_offset: None,
        print_args: Default::default(),
        meta_args: Default::default(),
    };
    assert!(print_energy(&mut Vec::new(), &bad).is_err());
}
