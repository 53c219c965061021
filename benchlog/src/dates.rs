// Time parsing for the formats that appear in experiment results.
//
//  Source               Example                                   Meaning
//  -------------------  ----------------------------------------  ------------------------------
//  sar banner           Linux 4.15.0 (b09-40)  07/10/2019  _x86_  date of the first sample
//  sar sample           06:38:09 PM, or 18:38:09                  local clock, no date
//  experiment record    2019-07-10 13:56:23                       local time
//  Spark driver log     19/07/10 13:57:01, or 2019-07-10 13:57:01 local time
//  power meter          1562759821.0383                           epoch seconds
//
// sar prints the date only once, so samples that run past midnight have to be advanced a day by
// the reader, see DayRoller.

use crate::Timestamp;
use anyhow::{bail, Context, Result};
use chrono::{Duration, FixedOffset, Local, NaiveDate, NaiveTime, TimeZone, Timelike};
use regex::Regex;

/// The time zone in which epoch times are rendered as wall-clock times.  `Local` is the time zone
/// of the machine running the analysis, which is right only if it matches the cluster's.

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimeZoneOpt {
    Local,
    Fixed(FixedOffset),
}

impl Default for TimeZoneOpt {
    fn default() -> TimeZoneOpt {
        TimeZoneOpt::Local
    }
}

/// Current local wall-clock time, truncated to the second.

pub fn now() -> Timestamp {
    let t = Local::now().naive_local();
    t.with_nanosecond(0).unwrap_or(t)
}

/// Extract the date from the first line of a sar file.  The date is the last date-like token that is
/// followed by whitespace.  Older sysstat prints MM/DD/YYYY, newer prints YYYY-MM-DD or MM/DD/YY
/// depending on the locale.

pub fn parse_sar_date(first_line: &str) -> Result<NaiveDate> {
    let re = Regex::new(r"^Linux.+\s+([0-9]+[/-][0-9]+[/-][0-9]+)\s+")?;
    let Some(caps) = re.captures(first_line) else {
        bail!("No date in sar header line")
    };
    let s = &caps[1];
    let fmt = if s.contains('-') {
        "%Y-%m-%d"
    } else if s.rsplit('/').next().map(|y| y.len()) == Some(4) {
        "%m/%d/%Y"
    } else {
        "%m/%d/%y"
    };
    NaiveDate::parse_from_str(s, fmt).with_context(|| format!("Bad date in sar header: {s}"))
}

/// Parse a sample clock at the start of a sar line.  Returns the time and the number of
/// whitespace-separated tokens it occupied (two for a 12-hour clock, one otherwise).

pub fn parse_clock(tokens: &[&str]) -> Option<(NaiveTime, usize)> {
    let first = tokens.first()?;
    if !first.contains(':') {
        return None;
    }
    if let Some(ampm) = tokens.get(1) {
        if *ampm == "AM" || *ampm == "PM" {
            let s = format!("{first} {ampm}");
            return NaiveTime::parse_from_str(&s, "%I:%M:%S %p")
                .ok()
                .map(|t| (t, 2));
        }
    }
    NaiveTime::parse_from_str(first, "%H:%M:%S")
        .ok()
        .map(|t| (t, 1))
}

/// Attach dates to a sequence of clock readings, advancing the date by one day whenever the hour
/// goes backwards.

#[derive(Debug)]
pub struct DayRoller {
    date: NaiveDate,
    last_hour: Option<u32>,
}

impl DayRoller {
    pub fn new(date: NaiveDate) -> DayRoller {
        DayRoller {
            date,
            last_hour: None,
        }
    }

    pub fn stamp(&mut self, t: NaiveTime) -> Timestamp {
        if let Some(h) = self.last_hour {
            if h > t.hour() {
                self.date += Duration::days(1);
            }
        }
        self.last_hour = Some(t.hour());
        self.date.and_time(t)
    }
}

/// Times in the experiment record.

pub fn parse_record_time(s: &str) -> Result<Timestamp> {
    Timestamp::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .with_context(|| format!("Bad time in experiment record: {s}"))
}

/// Timestamps at the start of Spark log4j lines.  Spark's default layout uses a two-digit year.

pub fn parse_log_time(s: &str) -> Option<Timestamp> {
    Timestamp::parse_from_str(s, "%y/%m/%d %H:%M:%S")
        .or_else(|_| Timestamp::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

/// Convert epoch seconds to wall-clock time, dropping the fraction.

pub fn from_unix_seconds(secs: f64, tz: TimeZoneOpt) -> Option<Timestamp> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    let s = secs.trunc() as i64;
    match tz {
        TimeZoneOpt::Local => Local.timestamp_opt(s, 0).single().map(|t| t.naive_local()),
        TimeZoneOpt::Fixed(offset) => offset.timestamp_opt(s, 0).single().map(|t| t.naive_local()),
    }
}

/// Parse a UTC offset of the form +HH:MM, -HH:MM, +HHMM, or Z.

pub fn parse_utc_offset(s: &str) -> Result<FixedOffset> {
    if s == "Z" || s == "z" {
        return FixedOffset::east_opt(0).context("Bad offset");
    }
    let (sign, rest) = if let Some(r) = s.strip_prefix('+') {
        (1, r)
    } else if let Some(r) = s.strip_prefix('-') {
        (-1, r)
    } else {
        bail!("UTC offset must start with + or -")
    };
    let digits = rest.replace(':', "");
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        bail!("UTC offset must be +HH:MM or -HH:MM")
    }
    let hours: i32 = digits[0..2].parse()?;
    let minutes: i32 = digits[2..4].parse()?;
    if hours > 23 || minutes > 59 {
        bail!("UTC offset out of range")
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).context("UTC offset out of range")
}

#[test]
fn test_parse_sar_date() {
    let d = parse_sar_date("Linux 4.15.0-54-generic (b09-40) \t07/10/2019 \t_x86_64_\t(32 CPU)")
        .unwrap();
    assert!(d == NaiveDate::from_ymd_opt(2019, 7, 10).unwrap());
    let d = parse_sar_date("Linux 5.4.0-88-generic (b09-42) \t2021-03-02 \t_x86_64_\t(32 CPU)")
        .unwrap();
    assert!(d == NaiveDate::from_ymd_opt(2021, 3, 2).unwrap());
    let d = parse_sar_date("Linux 3.10.0 (ccied21)   11/08/18   _x86_64_  (8 CPU)").unwrap();
    assert!(d == NaiveDate::from_ymd_opt(2018, 11, 8).unwrap());
    assert!(parse_sar_date("06:38:09 PM     all      3.78").is_err());
    assert!(parse_sar_date("Linux 4.15.0 (b09-40) 13/45/2019 _x86_64_").is_err());
}

#[test]
fn test_parse_clock() {
    let (t, n) = parse_clock(&["06:38:09", "PM", "all", "3.78"]).unwrap();
    assert!(t == NaiveTime::from_hms_opt(18, 38, 9).unwrap());
    assert!(n == 2);
    let (t, n) = parse_clock(&["12:00:01", "AM", "all"]).unwrap();
    assert!(t == NaiveTime::from_hms_opt(0, 0, 1).unwrap());
    assert!(n == 2);
    let (t, n) = parse_clock(&["18:38:09", "all", "3.78"]).unwrap();
    assert!(t == NaiveTime::from_hms_opt(18, 38, 9).unwrap());
    assert!(n == 1);
    assert!(parse_clock(&["Average:", "all"]).is_none());
    assert!(parse_clock(&[]).is_none());
}

#[test]
fn test_day_roller() {
    let mut r = DayRoller::new(NaiveDate::from_ymd_opt(2019, 7, 10).unwrap());
    let a = r.stamp(NaiveTime::from_hms_opt(23, 59, 58).unwrap());
    let b = r.stamp(NaiveTime::from_hms_opt(23, 59, 59).unwrap());
    let c = r.stamp(NaiveTime::from_hms_opt(0, 0, 0).unwrap());
    let d = r.stamp(NaiveTime::from_hms_opt(0, 0, 1).unwrap());
    assert!(a.date() == NaiveDate::from_ymd_opt(2019, 7, 10).unwrap());
    assert!(b.date() == a.date());
    assert!(c.date() == NaiveDate::from_ymd_opt(2019, 7, 11).unwrap());
    assert!(d.date() == c.date());
    assert!((c - b).num_seconds() == 1);
}

#[test]
fn test_parse_log_time() {
    let a = parse_log_time("19/07/10 13:57:01").unwrap();
    let b = parse_log_time("2019-07-10 13:57:01").unwrap();
    assert!(a == b);
    assert!(parse_log_time("13:57:01").is_none());
    assert!(parse_record_time("2019-07-10 13:57:01").unwrap() == a);
    assert!(parse_record_time("2019-07-10T13:57:01").is_err());
}

#[test]
fn test_epoch_times() {
    let tz = TimeZoneOpt::Fixed(parse_utc_offset("+02:00").unwrap());
    let t = from_unix_seconds(1562759821.9383, tz).unwrap();
    assert!(t == parse_record_time("2019-07-10 13:57:01").unwrap());
    let utc = TimeZoneOpt::Fixed(parse_utc_offset("Z").unwrap());
    let t = from_unix_seconds(1562759821.0, utc).unwrap();
    assert!(t == parse_record_time("2019-07-10 11:57:01").unwrap());
    assert!(from_unix_seconds(f64::NAN, utc).is_none());
    assert!(parse_utc_offset("-0530").unwrap().local_minus_utc() == -(5 * 3600 + 30 * 60));
    assert!(parse_utc_offset("02:00").is_err());
    assert!(parse_utc_offset("+25:00").is_err());
}
