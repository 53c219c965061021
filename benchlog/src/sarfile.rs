// Parser for the text output of sar (sysstat), as collected with `sar -u`, `sar -r`, `sar -n DEV`
// and `sar -b` during an experiment.
//
// The first line carries the date.  After that, every line starting with a clock is either a
// column header or a sample row, eg for `sar -n DEV`:
//
//   06:38:08 PM     IFACE   rxpck/s   txpck/s    rxkB/s    txkB/s   rxcmp/s   txcmp/s  rxmcst/s
//   06:38:09 PM        lo     12.00     12.00      2.13      2.13      0.00      0.00      0.00
//   06:38:09 PM   enp59s0    190.00    180.00     12.55     60.12      0.00      0.00      0.00
//
// The set and order of columns differ between sysstat versions (newer versions add %ifutil to the
// network report, kbavail to the memory report and dtps to the I/O report, and may print a
// 24-hour clock), so sample rows are decoded by the names in the most recent header rather than by
// position.  A header is a clocked line whose last token is not a number.
//
// "Average:" summary lines, blank lines, and LINUX RESTART markers are skipped.  Sample rows that
// do not match their header, or whose values do not parse, are dropped.

use crate::dates::{self, DayRoller};
use crate::Timestamp;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, PartialEq)]
pub struct CpuSample {
    pub timestamp: Timestamp,

    /// Percentages of all cores.
    pub user: f64,
    pub system: f64,
}

impl CpuSample {
    pub fn total(&self) -> f64 {
        self.user + self.system
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MemSample {
    pub timestamp: Timestamp,
    pub used_pct: f64,
}

/// Throughput of one interface, kB/s.

#[derive(Clone, Debug, PartialEq)]
pub struct NetSample {
    pub timestamp: Timestamp,
    pub rx_kbps: f64,
    pub tx_kbps: f64,
}

/// Transfers per second, and 512-byte blocks per second.

#[derive(Clone, Debug, PartialEq)]
pub struct DiskSample {
    pub timestamp: Timestamp,
    pub rtps: f64,
    pub wtps: f64,
    pub bread: f64,
    pub bwrtn: f64,
}

struct SarRow<'a> {
    timestamp: Timestamp,
    header: &'a [String],
    values: Vec<&'a str>,
}

impl<'a> SarRow<'a> {
    fn get(&self, column: &str) -> Option<&'a str> {
        self.header
            .iter()
            .position(|h| h == column)
            .map(|i| self.values[i])
    }

    fn number(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(|s| s.parse::<f64>().ok())
    }
}

// Run `f` over every sample row of the text.  It is an error for the date banner to be missing.

fn scan_sar<F>(text: &str, mut f: F) -> Result<()>
where
    F: FnMut(&SarRow),
{
    let mut lines = text.lines();
    let Some(first) = lines.next() else {
        bail!("Empty sar file")
    };
    let mut roller = DayRoller::new(dates::parse_sar_date(first)?);
    let mut header: Vec<String> = vec![];
    for line in lines {
        if line.contains("LINUX RESTART") {
            continue;
        }
        let tokens = line.split_whitespace().collect::<Vec<&str>>();
        let Some((clock, n)) = dates::parse_clock(&tokens) else {
            continue;
        };
        let rest = &tokens[n..];
        let Some(last) = rest.last() else {
            continue;
        };
        let timestamp = roller.stamp(clock);
        if last.parse::<f64>().is_err() {
            header = rest.iter().map(|s| s.to_string()).collect();
            continue;
        }
        if header.len() != rest.len() {
            continue;
        }
        f(&SarRow {
            timestamp,
            header: &header,
            values: rest.to_vec(),
        });
    }
    Ok(())
}

fn read_sar_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))
}

/// Samples for the "all" CPU row of `sar -u` output.

pub fn parse_cpu_file(path: &Path) -> Result<Vec<CpuSample>> {
    parse_cpu_text(&read_sar_text(path)?).with_context(|| format!("Parsing {}", path.display()))
}

fn parse_cpu_text(text: &str) -> Result<Vec<CpuSample>> {
    let mut samples = vec![];
    scan_sar(text, |row| {
        if row.get("CPU") != Some("all") {
            return;
        }
        if let (Some(user), Some(system)) = (row.number("%user"), row.number("%system")) {
            samples.push(CpuSample {
                timestamp: row.timestamp,
                user,
                system,
            });
        }
    })?;
    Ok(samples)
}

/// Memory use from `sar -r` output.

pub fn parse_memory_file(path: &Path) -> Result<Vec<MemSample>> {
    parse_memory_text(&read_sar_text(path)?)
        .with_context(|| format!("Parsing {}", path.display()))
}

fn parse_memory_text(text: &str) -> Result<Vec<MemSample>> {
    let mut samples = vec![];
    scan_sar(text, |row| {
        if let Some(used_pct) = row.number("%memused") {
            samples.push(MemSample {
                timestamp: row.timestamp,
                used_pct,
            });
        }
    })?;
    Ok(samples)
}

/// Throughput of `interface` from `sar -n DEV` output.  Other interfaces are ignored.

pub fn parse_network_file(path: &Path, interface: &str) -> Result<Vec<NetSample>> {
    parse_network_text(&read_sar_text(path)?, interface)
        .with_context(|| format!("Parsing {}", path.display()))
}

fn parse_network_text(text: &str, interface: &str) -> Result<Vec<NetSample>> {
    let mut samples = vec![];
    scan_sar(text, |row| {
        if row.get("IFACE") != Some(interface) {
            return;
        }
        if let (Some(rx_kbps), Some(tx_kbps)) = (row.number("rxkB/s"), row.number("txkB/s")) {
            samples.push(NetSample {
                timestamp: row.timestamp,
                rx_kbps,
                tx_kbps,
            });
        }
    })?;
    Ok(samples)
}

/// I/O rates from `sar -b` output.  The file is optional: if it does not exist the result is
/// empty.

pub fn parse_diskio_file(path: &Path) -> Result<Vec<DiskSample>> {
    if !path.exists() {
        return Ok(vec![]);
    }
    parse_diskio_text(&read_sar_text(path)?)
        .with_context(|| format!("Parsing {}", path.display()))
}

fn parse_diskio_text(text: &str) -> Result<Vec<DiskSample>> {
    let mut samples = vec![];
    scan_sar(text, |row| {
        if let (Some(rtps), Some(wtps), Some(bread), Some(bwrtn)) = (
            row.number("rtps"),
            row.number("wtps"),
            row.number("bread/s"),
            row.number("bwrtn/s"),
        ) {
            samples.push(DiskSample {
                timestamp: row.timestamp,
                rtps,
                wtps,
                bread,
                bwrtn,
            });
        }
    })?;
    Ok(samples)
}

#[cfg(test)]
fn ts(s: &str) -> Timestamp {
    dates::parse_record_time(s).unwrap()
}

#[test]
fn test_parse_cpu_file() {
    let xs = parse_cpu_file(Path::new(
        "../bench_test_data/results/Exp-2019-07-10-13-56-23/b09-40/cpu.sar",
    ))
    .unwrap();
    assert!(xs.len() == 12);
    assert!(xs[0].timestamp == ts("2019-07-10 13:56:59"));
    assert!(xs[0].user == 3.78);
    assert!(xs[0].system == 2.52);
    assert!(xs[11].timestamp == ts("2019-07-10 13:57:10"));
}

#[test]
fn test_cpu_rows_and_noise() {
    let text = "Linux 4.15.0-54-generic (b09-40) \t07/10/2019 \t_x86_64_\t(32 CPU)

06:38:08 PM     CPU     %user     %nice   %system   %iowait    %steal     %idle
06:38:09 PM     all      3.78      0.00      2.52      0.50      0.00     93.20
06:38:09 PM       0     10.00      0.00      5.00      0.00      0.00     85.00
06:38:10 PM     all      bogus     0.00      2.52      0.50      0.00     93.20
06:38:11 PM     all      1.00      0.00
07:00:00 PM       LINUX RESTART      (32 CPU)
07:00:01 PM     all      9.00      0.00      1.00      0.00      0.00     90.00
07:00:01 PM     CPU     %user     %nice   %system   %iowait    %steal     %idle
07:00:02 PM     all      4.00      0.00      1.00      0.00      0.00     95.00
Average:        all      3.78      0.00      2.52      0.50      0.00     93.20
";
    let xs = parse_cpu_text(text).unwrap();
    assert!(xs.len() == 3);
    assert!(xs[0].timestamp == ts("2019-07-10 18:38:09"));
    assert!(xs[0].total() == 3.78 + 2.52);
    // The restart marker does not replace the header.
    assert!(xs[1].timestamp == ts("2019-07-10 19:00:01"));
    assert!(xs[1].user == 9.0);
    assert!(xs[2].timestamp == ts("2019-07-10 19:00:02"));
    assert!(xs[2].user == 4.0);
}

#[test]
fn test_cpu_24h_and_midnight() {
    let text = "Linux 5.4.0-88-generic (b09-42) \t2021-03-02 \t_x86_64_\t(32 CPU)

23:59:59     CPU     %user     %nice   %system   %iowait    %steal     %idle
00:00:00     all      1.00      0.00      2.00      0.00      0.00     97.00
00:00:01     all      1.50      0.00      2.50      0.00      0.00     96.00
";
    let xs = parse_cpu_text(text).unwrap();
    assert!(xs.len() == 2);
    assert!(xs[0].timestamp == ts("2021-03-03 00:00:00"));
    assert!(xs[1].timestamp == ts("2021-03-03 00:00:01"));
    assert!(xs[1].system == 2.5);
}

#[test]
fn test_missing_banner() {
    assert!(parse_cpu_text("").is_err());
    assert!(parse_cpu_text("06:38:09 PM     all      3.78\n").is_err());
    assert!(parse_cpu_file(Path::new("../bench_test_data/no-such-file.sar")).is_err());
}

#[test]
fn test_parse_network_file() {
    let path = Path::new("../bench_test_data/results/Exp-2019-07-10-13-56-23/b09-40/network.sar");
    let xs = parse_network_file(path, "enp59s0").unwrap();
    assert!(xs.len() == 12);
    assert!(xs[1].timestamp == ts("2019-07-10 13:57:00"));
    assert!(xs[1].rx_kbps == 100.0);
    assert!(xs[1].tx_kbps == 200.0);
    assert!(parse_network_file(path, "eth0").unwrap().is_empty());
}

#[test]
fn test_network_column_layouts() {
    // Newer sysstat adds %ifutil; the columns of interest are found by name.
    let text = "Linux 5.4.0-88-generic (b09-42) \t03/02/21 \t_x86_64_\t(32 CPU)

13:00:00        IFACE   rxpck/s   txpck/s    rxkB/s    txkB/s   rxcmp/s   txcmp/s  rxmcst/s   %ifutil
13:00:01      enp59s0     10.00     20.00    125.00    250.00      0.00      0.00      0.00      0.30
13:00:01           lo      1.00      1.00      9.00      9.00      0.00      0.00      0.00      0.00
";
    let xs = parse_network_text(text, "enp59s0").unwrap();
    assert!(xs.len() == 1);
    assert!(xs[0].timestamp == ts("2021-03-02 13:00:01"));
    assert!(xs[0].rx_kbps == 125.0);
    assert!(xs[0].tx_kbps == 250.0);
}

#[test]
fn test_parse_memory_file() {
    let xs = parse_memory_file(Path::new(
        "../bench_test_data/results/Exp-2019-07-10-13-56-23/b09-42/memory.sar",
    ))
    .unwrap();
    assert!(xs.len() == 12);
    assert!(xs[0].used_pct == 50.5);

    let text = "Linux 5.4.0 (b09-42) \t2021-03-02 \t_x86_64_\t(32 CPU)
13:00:00    kbmemfree   kbavail kbmemused  %memused kbbuffers  kbcached  kbcommit   %commit  kbactive   kbinact   kbdirty
13:00:01       779700  15647244  15647244     95.25     65368   7407236  15733700     47.40   9560972   5486404      1292
";
    let xs = parse_memory_text(text).unwrap();
    assert!(xs.len() == 1);
    assert!(xs[0].used_pct == 95.25);
}

#[test]
fn test_parse_diskio_file() {
    let xs = parse_diskio_file(Path::new(
        "../bench_test_data/results/Exp-2019-07-10-13-56-23/b09-40/diskio.sar",
    ))
    .unwrap();
    assert!(xs.len() == 12);
    assert!(xs[1].rtps == 2.0);
    assert!(xs[1].wtps == 1.0);
    assert!(xs[1].bread == 1000.0);
    assert!(xs[1].bwrtn == 2000.0);

    let xs = parse_diskio_file(Path::new("../bench_test_data/no-such-file.sar")).unwrap();
    assert!(xs.is_empty());

    let text = "Linux 5.4.0 (b09-42) \t2021-03-02 \t_x86_64_\t(32 CPU)
13:00:00          tps      rtps      wtps      dtps   bread/s   bwrtn/s   bdscd/s
13:00:01        21.00     21.00      0.00      0.00   2416.00      0.00      0.00
";
    let xs = parse_diskio_text(text).unwrap();
    assert!(xs.len() == 1);
    assert!(xs[0].bread == 2416.0);
}
