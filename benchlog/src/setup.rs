// Read and write the experiment record, `setup_details.txt` in each experiment directory.
//
// The record is a single JSON object written once when the job has finished.  Spark and Giraph
// experiments use different keys for the same concepts:
//
//   Spark                  Giraph                 Meaning
//   ---------------------  ---------------------  ----------------------------------------------
//   AllSparkNodes          HdfsNodes              array of short host names, required
//   SparkDriverNode        GiraphDriverNode       host holding the power and driver logs, required
//   SparkJobStartTime      GiraphJobStartTime     "YYYY-MM-DD HH:MM:SS", optional
//   SparkJobEndTime        GiraphJobEndTime       "YYYY-MM-DD HH:MM:SS", optional
//   InputSizeGb            InputGraphFile         number / string, required
//   ScalaClassName         GiraphClassName        string, optional
//
// and share these:
//
//   PowerMeterNodesInOrder - array of host names, one per power meter column, default empty
//   LinkBandwidthMbps      - number or numeric string, required
//   ExperimentStartTime    - "YYYY-MM-DD HH:MM:SS", required
//   ExperimentGroup        - any scalar, required; stringified
//   ExperimentGroupDesc    - string, default "No description"
//   ExperimentId           - string, optional; the directory name is authoritative
//   InputHdfsCached, PlotFriendlyName, RecordSizeBytes, FinalPartitionCount, HdfsMasterNode,
//   PaddingInSecs, Comments - optional
//
// Old records spell RecordSizeBytes as "RecordSizeByes"; both are accepted on input.
//
// As in the system config reader, the generic JSON parser is used with explicit decoding of the
// fields, since the records are written by scripts that have changed over time.

use crate::dates;
use crate::Timestamp;
use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

pub const SETUP_FILE_NAME: &str = "setup_details.txt";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobKind {
    Spark,
    Giraph,
}

#[derive(Clone, Debug, PartialEq)]
pub enum JobInput {
    SizeGb(f64),
    GraphFile(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExperimentSetup {
    pub kind: JobKind,
    pub experiment_id: String,
    pub nodes: Vec<String>,
    pub driver_node: String,
    pub power_meter_nodes: Vec<String>,
    pub input: JobInput,
    pub link_bandwidth_mbps: f64,
    pub experiment_start: Timestamp,
    pub job_start: Option<Timestamp>,
    pub job_end: Option<Timestamp>,
    pub group: String,
    pub group_desc: String,
    pub class_name: Option<String>,
    pub input_hdfs_cached: Option<bool>,
    pub plot_friendly_name: Option<String>,
    pub record_size_bytes: Option<u64>,
    pub final_partition_count: Option<u64>,
    pub hdfs_master_node: Option<String>,
    pub padding_secs: Option<u64>,
    pub comments: Option<String>,
}

impl ExperimentSetup {
    /// A fresh record with the required fields; everything else is absent.

    pub fn new(
        kind: JobKind,
        experiment_start: Timestamp,
        nodes: Vec<String>,
        driver_node: &str,
        input: JobInput,
        link_bandwidth_mbps: f64,
        group: &str,
    ) -> ExperimentSetup {
        ExperimentSetup {
            kind,
            experiment_id: experiment_start.format("Exp-%Y-%m-%d-%H-%M-%S").to_string(),
            nodes,
            driver_node: driver_node.to_string(),
            power_meter_nodes: vec![],
            input,
            link_bandwidth_mbps,
            experiment_start,
            job_start: None,
            job_end: None,
            group: group.to_string(),
            group_desc: "No description".to_string(),
            class_name: None,
            input_hdfs_cached: None,
            plot_friendly_name: None,
            record_size_bytes: None,
            final_partition_count: None,
            hdfs_master_node: None,
            padding_secs: None,
            comments: None,
        }
    }

    pub fn input_size_gb(&self) -> Option<f64> {
        match self.input {
            JobInput::SizeGb(gb) => Some(gb),
            JobInput::GraphFile(_) => None,
        }
    }

    /// A printable name for the input, used for grouping experiments.

    pub fn input_label(&self) -> String {
        match self.input {
            JobInput::SizeGb(gb) => format!("{gb}"),
            JobInput::GraphFile(ref f) => f.clone(),
        }
    }

    /// The job window from the record, if both ends are present.

    pub fn job_window(&self) -> Option<(Timestamp, Timestamp)> {
        match (self.job_start, self.job_end) {
            (Some(s), Some(e)) => Some((s, e)),
            _ => None,
        }
    }

    /// Parse a record from JSON text.  The experiment id is taken from "ExperimentId" and is empty
    /// if that is absent.

    pub fn parse(text: &str) -> Result<ExperimentSetup> {
        let v: Value = serde_json::from_str(text)?;
        let Value::Object(fields) = v else {
            bail!("Expected an object value")
        };

        let kind = if fields.contains_key("AllSparkNodes") {
            JobKind::Spark
        } else if fields.contains_key("HdfsNodes") {
            JobKind::Giraph
        } else {
            bail!("Record has neither 'AllSparkNodes' nor 'HdfsNodes'")
        };
        let k = keys(kind);

        let nodes = grab_strings(&fields, k.nodes)?;
        let driver_node = grab_string(&fields, k.driver)?;
        let input = match kind {
            JobKind::Spark => JobInput::SizeGb(grab_f64(&fields, "InputSizeGb")?),
            JobKind::Giraph => JobInput::GraphFile(grab_string(&fields, "InputGraphFile")?),
        };
        let power_meter_nodes = if fields.contains_key("PowerMeterNodesInOrder") {
            grab_strings(&fields, "PowerMeterNodesInOrder")?
        } else {
            vec![]
        };
        let group = match fields.get("ExperimentGroup") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => bail!("Field 'ExperimentGroup' must be present and have a scalar value"),
        };

        Ok(ExperimentSetup {
            kind,
            experiment_id: opt_string(&fields, "ExperimentId")?.unwrap_or_default(),
            nodes,
            driver_node,
            power_meter_nodes,
            input,
            link_bandwidth_mbps: grab_f64(&fields, "LinkBandwidthMbps")?,
            experiment_start: dates::parse_record_time(&grab_string(
                &fields,
                "ExperimentStartTime",
            )?)?,
            job_start: opt_time(&fields, k.job_start)?,
            job_end: opt_time(&fields, k.job_end)?,
            group,
            group_desc: opt_string(&fields, "ExperimentGroupDesc")?
                .unwrap_or_else(|| "No description".to_string()),
            class_name: opt_string(&fields, k.class_name)?,
            input_hdfs_cached: match fields.get("InputHdfsCached") {
                None | Some(Value::Null) => None,
                Some(Value::Bool(b)) => Some(*b),
                Some(_) => bail!("Field 'InputHdfsCached' must have a boolean value"),
            },
            plot_friendly_name: opt_string(&fields, "PlotFriendlyName")?,
            record_size_bytes: match opt_u64(&fields, "RecordSizeBytes")? {
                Some(n) => Some(n),
                None => opt_u64(&fields, "RecordSizeByes")?,
            },
            final_partition_count: opt_u64(&fields, "FinalPartitionCount")?,
            hdfs_master_node: opt_string(&fields, "HdfsMasterNode")?,
            padding_secs: opt_u64(&fields, "PaddingInSecs")?,
            comments: opt_string(&fields, "Comments")?,
        })
    }

    /// The record as a JSON object.  serde_json's map keeps keys sorted.

    pub fn to_json(&self) -> Value {
        let k = keys(self.kind);
        let mut m = Map::new();
        let strings =
            |v: &[String]| Value::Array(v.iter().map(|s| Value::from(s.as_str())).collect());
        m.insert(k.nodes.to_string(), strings(&self.nodes));
        m.insert(k.driver.to_string(), Value::from(self.driver_node.as_str()));
        m.insert(
            "PowerMeterNodesInOrder".to_string(),
            strings(&self.power_meter_nodes),
        );
        match self.input {
            JobInput::SizeGb(gb) => m.insert("InputSizeGb".to_string(), Value::from(gb)),
            JobInput::GraphFile(ref f) => {
                m.insert("InputGraphFile".to_string(), Value::from(f.as_str()))
            }
        };
        m.insert(
            "LinkBandwidthMbps".to_string(),
            Value::from(self.link_bandwidth_mbps),
        );
        m.insert(
            "ExperimentStartTime".to_string(),
            Value::from(self.experiment_start.format(TIME_FORMAT).to_string()),
        );
        if let Some(t) = self.job_start {
            m.insert(
                k.job_start.to_string(),
                Value::from(t.format(TIME_FORMAT).to_string()),
            );
        }
        if let Some(t) = self.job_end {
            m.insert(
                k.job_end.to_string(),
                Value::from(t.format(TIME_FORMAT).to_string()),
            );
        }
        m.insert("ExperimentGroup".to_string(), Value::from(self.group.as_str()));
        m.insert(
            "ExperimentGroupDesc".to_string(),
            Value::from(self.group_desc.as_str()),
        );
        if !self.experiment_id.is_empty() {
            m.insert(
                "ExperimentId".to_string(),
                Value::from(self.experiment_id.as_str()),
            );
        }
        let mut opt = |name: &str, v: Option<Value>| {
            if let Some(v) = v {
                m.insert(name.to_string(), v);
            }
        };
        opt(k.class_name, self.class_name.as_deref().map(Value::from));
        opt("InputHdfsCached", self.input_hdfs_cached.map(Value::from));
        opt(
            "PlotFriendlyName",
            self.plot_friendly_name.as_deref().map(Value::from),
        );
        opt("RecordSizeBytes", self.record_size_bytes.map(Value::from));
        opt(
            "FinalPartitionCount",
            self.final_partition_count.map(Value::from),
        );
        opt(
            "HdfsMasterNode",
            self.hdfs_master_node.as_deref().map(Value::from),
        );
        opt("PaddingInSecs", self.padding_secs.map(Value::from));
        opt("Comments", self.comments.as_deref().map(Value::from));
        Value::Object(m)
    }

    /// Write the record into `dir`, creating the directory if necessary.  Keys are sorted and
    /// indented four spaces.

    pub fn write_to(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.to_json().serialize(&mut ser)?;
        buf.push(b'\n');
        let path = dir.join(SETUP_FILE_NAME);
        fs::write(&path, buf).with_context(|| format!("Writing {}", path.display()))?;
        Ok(())
    }
}

/// Read the record in an experiment directory.  The experiment id is the name of the directory.

pub fn read_setup(dir: &Path) -> Result<ExperimentSetup> {
    let path = dir.join(SETUP_FILE_NAME);
    let text = fs::read_to_string(&path).with_context(|| format!("Reading {}", path.display()))?;
    let mut setup =
        ExperimentSetup::parse(&text).with_context(|| format!("Parsing {}", path.display()))?;
    if let Some(name) = dir.file_name().and_then(|n| n.to_str()) {
        setup.experiment_id = name.to_string();
    }
    Ok(setup)
}

struct Keys {
    nodes: &'static str,
    driver: &'static str,
    job_start: &'static str,
    job_end: &'static str,
    class_name: &'static str,
}

fn keys(kind: JobKind) -> Keys {
    match kind {
        JobKind::Spark => Keys {
            nodes: "AllSparkNodes",
            driver: "SparkDriverNode",
            job_start: "SparkJobStartTime",
            job_end: "SparkJobEndTime",
            class_name: "ScalaClassName",
        },
        JobKind::Giraph => Keys {
            nodes: "HdfsNodes",
            driver: "GiraphDriverNode",
            job_start: "GiraphJobStartTime",
            job_end: "GiraphJobEndTime",
            class_name: "GiraphClassName",
        },
    }
}

fn grab_string(fields: &Map<String, Value>, name: &str) -> Result<String> {
    if let Some(Value::String(s)) = fields.get(name) {
        Ok(s.clone())
    } else {
        bail!("Field '{name}' must be present and have a string value")
    }
}

fn opt_string(fields: &Map<String, Value>, name: &str) -> Result<Option<String>> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => bail!("Field '{name}' must have a string value"),
    }
}

fn grab_strings(fields: &Map<String, Value>, name: &str) -> Result<Vec<String>> {
    if let Some(Value::Array(xs)) = fields.get(name) {
        let mut result = vec![];
        for x in xs {
            if let Value::String(s) = x {
                result.push(s.clone());
            } else {
                bail!("Field '{name}' must be an array of strings")
            }
        }
        Ok(result)
    } else {
        bail!("Field '{name}' must be present and have an array value")
    }
}

// Numbers are sometimes recorded as strings.

fn grab_f64(fields: &Map<String, Value>, name: &str) -> Result<f64> {
    match fields.get(name) {
        Some(Value::Number(n)) => n
            .as_f64()
            .with_context(|| format!("Field '{name}' is out of range")),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .with_context(|| format!("Field '{name}' must have a numeric value")),
        _ => bail!("Field '{name}' must be present and have a numeric value"),
    }
}

fn opt_u64(fields: &Map<String, Value>, name: &str) -> Result<Option<u64>> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            if let Some(k) = n.as_u64() {
                Ok(Some(k))
            } else {
                bail!("Field '{name}' must have unsigned integer value")
            }
        }
        Some(Value::String(s)) => Ok(Some(
            s.trim()
                .parse::<u64>()
                .with_context(|| format!("Field '{name}' must have unsigned integer value"))?,
        )),
        Some(_) => bail!("Field '{name}' must have unsigned integer value"),
    }
}

fn opt_time(fields: &Map<String, Value>, name: &str) -> Result<Option<Timestamp>> {
    match opt_string(fields, name)? {
        Some(s) => Ok(Some(dates::parse_record_time(&s)?)),
        None => Ok(None),
    }
}

#[test]
fn test_read_spark_setup() {
    let dir = Path::new("../bench_test_data/results/Exp-2019-07-10-13-56-23");
    let s = read_setup(dir).unwrap();
    assert!(s.kind == JobKind::Spark);
    assert!(s.experiment_id == "Exp-2019-07-10-13-56-23");
    assert!(s.nodes == vec!["b09-40".to_string(), "b09-42".to_string()]);
    assert!(s.driver_node == "b09-40");
    assert!(s.power_meter_nodes == vec!["b09-40".to_string(), "b09-42".to_string()]);
    assert!(s.input == JobInput::SizeGb(100.0));
    assert!(s.link_bandwidth_mbps == 1000.0);
    assert!(s.job_start == Some(dates::parse_record_time("2019-07-10 13:57:00").unwrap()));
    assert!(s.job_end == Some(dates::parse_record_time("2019-07-10 13:57:10").unwrap()));
    assert!(s.group == "7");
    assert!(s.group_desc == "Sort, 1Gbps links");
    assert!(s.class_name.as_deref() == Some("SortDataset"));
    assert!(s.record_size_bytes == Some(100));
}

#[test]
fn test_read_giraph_setup() {
    let dir = Path::new("../bench_test_data/results/Exp-2019-07-11-09-00-00");
    let s = read_setup(dir).unwrap();
    assert!(s.kind == JobKind::Giraph);
    assert!(s.nodes == vec!["b09-40".to_string(), "b09-42".to_string()]);
    assert!(s.driver_node == "b09-42");
    assert!(s.input == JobInput::GraphFile("twitter.txt".to_string()));
    assert!(s.input_label() == "twitter.txt");
    assert!(s.link_bandwidth_mbps == 200.0);
    assert!(s.group_desc == "No description");
    assert!(s.power_meter_nodes.is_empty());
    assert!(s.class_name.as_deref() == Some("PageRankComputation"));
}

#[test]
fn test_setup_errors() {
    assert!(ExperimentSetup::parse("[]").is_err());
    assert!(ExperimentSetup::parse(r#"{"ExperimentGroup": 1}"#).is_err());
    let missing_driver = r#"{"AllSparkNodes": ["a"], "InputSizeGb": 1, "LinkBandwidthMbps": 10,
                             "ExperimentStartTime": "2019-07-10 13:56:23", "ExperimentGroup": 1}"#;
    assert!(ExperimentSetup::parse(missing_driver).is_err());
    let bad_time = r#"{"AllSparkNodes": ["a"], "SparkDriverNode": "a", "InputSizeGb": 1,
                       "LinkBandwidthMbps": "10", "ExperimentStartTime": "yesterday",
                       "ExperimentGroup": 1}"#;
    assert!(ExperimentSetup::parse(bad_time).is_err());
}

#[test]
fn test_write_setup() {
    let start = dates::parse_record_time("2020-01-02 03:04:05").unwrap();
    let mut s = ExperimentSetup::new(
        JobKind::Spark,
        start,
        vec!["b09-40".to_string()],
        "b09-40",
        JobInput::SizeGb(10.0),
        500.0,
        "3",
    );
    s.job_start = Some(start);
    s.record_size_bytes = Some(100);
    assert!(s.experiment_id == "Exp-2020-01-02-03-04-05");

    let dir = std::env::temp_dir().join(format!("benchlog-setup-{}", std::process::id()));
    s.write_to(&dir).unwrap();
    let text = fs::read_to_string(dir.join(SETUP_FILE_NAME)).unwrap();
    assert!(text.starts_with("{\n    \"AllSparkNodes\": ["));
    assert!(text.find("\"ExperimentGroup\"").unwrap() < text.find("\"InputSizeGb\"").unwrap());
    assert!(!text.contains("SparkJobEndTime"));

    let t = ExperimentSetup::parse(&text).unwrap();
    assert!(t == s);
    fs::remove_dir_all(&dir).unwrap();
}
