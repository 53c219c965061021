// `benchalyze` -- Analyze telemetry from cluster benchmark experiments
//
// Run with --help for brief help.
//
// Every experiment is a directory `Exp-YYYY-MM-DD-HH-MM-SS` below the results root, holding the
// experiment record and one directory per node with the telemetry collected on that node.  The
// commands select experiments from the root, either by name or by time range and parameters, hand
// them to `benchlog` for parsing and aggregation, and print the results.
//
// Quirks
//
// The --from and --to values select experiments by the start time in the experiment record, not
// by the time stamps of the telemetry.  An experiment that started before --from is excluded even
// if its job ran inside the range.
//
// Power meter times are epoch seconds, while every other file has local wall-clock times of the
// cluster.  By default the epoch times are converted using the time zone of the machine running
// benchalyze; use --utc-offset when analyzing results elsewhere.

mod cdf;
mod compare;
mod configs;
mod correlate;
mod energy;
mod format;
mod list;
mod metrics;
mod network;
mod readings;
mod record;
mod tasks;

use anyhow::{bail, Result};
use benchlog::{
    Experiment, ExperimentFilter, ExperimentMetrics, TimeZoneOpt, TimelineOptions, Timestamp,
};
use chrono::{FixedOffset, NaiveDate};
use clap::{Args, Parser, Subcommand, ValueEnum};
use env_logger::Env;
use std::collections::HashMap;
use std::env;
use std::io;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::process;
use std::str::FromStr;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List experiments
    List(ListArgs),

    /// Print the merged telemetry timeline of one experiment
    Readings(ReadingsArgs),

    /// Print energy, disk and network totals within the job window of experiments
    Metrics(MetricsArgs),

    /// Print network usage by Spark stage for one experiment
    Network(NetworkArgs),

    /// Compare a metric across experiments grouped by input and link rate
    Compare(CompareArgs),

    /// Print the distribution of network send throughput within a Spark stage
    Cdf(CdfArgs),

    /// Print Spark task statistics for one experiment
    Tasks(TasksArgs),

    /// Print power next to resource use, second by second, for one experiment
    Correlate(CorrelateArgs),

    /// Print job times and energy for runs recorded as loose Spark log and power file pairs
    Energy(EnergyArgs),

    /// Create an experiment directory holding a new experiment record
    Record(RecordArgs),
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    source_args: SourceArgs,

    #[command(flatten)]
    select_args: SelectArgs,

    #[command(flatten)]
    print_args: PrintArgs,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct ReadingsArgs {
    #[command(flatten)]
    source_args: SourceArgs,

    /// Print readings for this node (repeatable) [default: all]
    #[arg(long)]
    node: Vec<String>,

    /// Print readings of this metric, eg net_out_Mbps (repeatable) [default: all]
    #[arg(long)]
    metric: Vec<String>,

    /// Also save the readings as `readings.csv` in the experiment directory
    #[arg(long, default_value_t = false)]
    save: bool,

    #[command(flatten)]
    meta_args: MetaArgs,

    /// Experiment id, ie the name of the experiment directory
    experiment: String,
}

#[derive(Args, Debug)]
pub struct MetricsArgs {
    #[command(flatten)]
    source_args: SourceArgs,

    #[command(flatten)]
    select_args: SelectArgs,

    /// Print a row for every node instead of one row per experiment
    #[arg(long, default_value_t = false)]
    per_node: bool,

    #[command(flatten)]
    print_args: PrintArgs,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct NetworkArgs {
    #[command(flatten)]
    source_args: SourceArgs,

    #[command(flatten)]
    meta_args: MetaArgs,

    /// Experiment id, ie the name of the experiment directory
    experiment: String,
}

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
pub enum CompareValue {
    /// Energy, watt-hours
    Energy,
    /// Disk data read, MB
    DiskRead,
    /// Disk data written, MB
    DiskWrite,
    /// Network data received, GB
    NetIn,
    /// Network data sent, GB
    NetOut,
    /// Job duration, seconds
    Duration,
}

#[derive(Args, Debug)]
pub struct CompareArgs {
    #[command(flatten)]
    source_args: SourceArgs,

    #[command(flatten)]
    select_args: SelectArgs,

    /// The value to compare
    #[arg(long, value_enum, default_value_t = CompareValue::Energy)]
    value: CompareValue,

    /// Group by experiment group rather than by input
    #[arg(long, default_value_t = false)]
    by_group: bool,

    /// Compare the value for this node only [default: all nodes]
    #[arg(long)]
    node: Option<String>,

    #[command(flatten)]
    print_args: PrintArgs,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct CdfArgs {
    #[command(flatten)]
    source_args: SourceArgs,

    #[command(flatten)]
    select_args: SelectArgs,

    /// The Spark stage to consider, attempt 0
    #[arg(long, default_value_t = 1)]
    stage: u32,

    /// Number of histogram bins
    #[arg(long, default_value_t = 100)]
    bins: usize,

    /// Consider this node only [default: all nodes]
    #[arg(long)]
    node: Option<String>,

    #[command(flatten)]
    print_args: PrintArgs,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct TasksArgs {
    #[command(flatten)]
    source_args: SourceArgs,

    /// Print a row for every node in every stage instead of one row per stage
    #[arg(long, default_value_t = false)]
    per_node: bool,

    #[command(flatten)]
    print_args: PrintArgs,

    #[command(flatten)]
    meta_args: MetaArgs,

    /// Experiment id, ie the name of the experiment directory
    experiment: String,
}

#[derive(Args, Debug)]
pub struct CorrelateArgs {
    #[command(flatten)]
    source_args: SourceArgs,

    /// Print rows for this node [default: the first power-metered node]
    #[arg(long)]
    node: Option<String>,

    /// Print rows where some reading is missing, too
    #[arg(long, default_value_t = false)]
    incomplete: bool,

    #[command(flatten)]
    print_args: PrintArgs,

    #[command(flatten)]
    meta_args: MetaArgs,

    /// Experiment id, ie the name of the experiment directory
    experiment: String,
}

#[derive(Args, Debug)]
pub struct EnergyArgs {
    /// Directory holding spark_<tag>_<id>_<mbps>.log and power_<id>_<mbps>.txt pairs
    #[arg(long)]
    dir: Option<String>,

    /// A single Spark driver log (requires --power-file)
    #[arg(long)]
    spark_log: Option<String>,

    /// A single power meter file (requires --spark-log)
    #[arg(long)]
    power_file: Option<String>,

    /// UTC offset of the cluster's clock, eg +02:00 [default: local time zone]
    #[arg(long, value_parser = parse_offset)]
    utc_offset: Option<FixedOffset>,

    #[command(flatten)]
    print_args: PrintArgs,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
pub enum KindArg {
    Spark,
    Giraph,
}

#[derive(Args, Debug)]
pub struct RecordArgs {
    /// Select the root directory of experiment results [default: $BENCH_RESULTS_ROOT]
    #[arg(long)]
    data_path: Option<String>,

    /// The kind of job
    #[arg(long, value_enum, default_value_t = KindArg::Spark)]
    kind: KindArg,

    /// Nodes in the experiment, comma-separated
    #[arg(long, value_delimiter = ',', required = true)]
    nodes: Vec<String>,

    /// The driver node [default: the first node]
    #[arg(long)]
    driver: Option<String>,

    /// Power-metered nodes in meter column order, comma-separated [default: none]
    #[arg(long, value_delimiter = ',')]
    power_meters: Vec<String>,

    /// Input size in GB (Spark)
    #[arg(long)]
    input_size: Option<f64>,

    /// Input graph file (Giraph)
    #[arg(long)]
    graph_file: Option<String>,

    /// Link bandwidth in Mbps
    #[arg(long)]
    link_rate: f64,

    /// Experiment group
    #[arg(long)]
    group: String,

    /// Description of the experiment group
    #[arg(long)]
    description: Option<String>,

    /// Class name of the job
    #[arg(long)]
    class_name: Option<String>,

    /// Experiment start, YYYY-MM-DD HH:MM:SS [default: now]
    #[arg(long, value_parser = parse_record_time)]
    start: Option<Timestamp>,

    /// Job start, YYYY-MM-DD HH:MM:SS
    #[arg(long, value_parser = parse_record_time)]
    job_start: Option<Timestamp>,

    /// Job end, YYYY-MM-DD HH:MM:SS
    #[arg(long, value_parser = parse_record_time)]
    job_end: Option<Timestamp>,

    /// Free-form comments
    #[arg(long)]
    comments: Option<String>,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug, Default)]
pub struct SourceArgs {
    /// Select the root directory of experiment results [default: $BENCH_RESULTS_ROOT]
    #[arg(long)]
    data_path: Option<String>,

    /// File containing JSON data with node information [default: none]
    #[arg(long)]
    config_file: Option<String>,

    /// Network interface carrying the job's traffic, unless the config file says otherwise
    /// [default: enp59s0]
    #[arg(long)]
    interface: Option<String>,

    /// UTC offset of the cluster's clock, eg +02:00, for power meter times [default: local time
    /// zone]
    #[arg(long, value_parser = parse_offset)]
    utc_offset: Option<FixedOffset>,
}

#[derive(Args, Debug, Default)]
pub struct SelectArgs {
    /// Select experiments that started after this time.  Format can be YYYY-MM-DD, or Nd or
    /// Nw signifying N days or weeks ago [default: all]
    #[arg(long, short, value_parser = parse_time_start_of_day)]
    from: Option<Timestamp>,

    /// Select experiments that started before this time.  Format can be YYYY-MM-DD, or Nd
    /// or Nw signifying N days or weeks ago [default: now]
    #[arg(long, short, value_parser = parse_time_end_of_day)]
    to: Option<Timestamp>,

    /// Select this experiment id or experiment group (repeatable) [default: all]
    #[arg(long, short)]
    exp: Vec<String>,

    /// Select experiments with this input size in GB (repeatable) [default: all]
    #[arg(long)]
    input_size: Vec<f64>,

    /// Select experiments with this link bandwidth in Mbps (repeatable) [default: all]
    #[arg(long)]
    link_rate: Vec<f64>,
}

#[derive(Args, Debug, Default)]
pub struct PrintArgs {
    /// Select fields and options for the output [default: command dependent]
    #[arg(long)]
    fmt: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct MetaArgs {
    /// Print useful statistics about the input to stderr, and log debug messages
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

// The command arg parsers don't need to include the string being parsed because the error generated
// by clap includes that.

// YYYY-MM-DD, or Nd, Nw.
fn parse_time(s: &str, end_of_day: bool) -> Result<Timestamp> {
    if let Some(n) = s.strip_suffix('d') {
        if let Ok(k) = usize::from_str(n) {
            Ok(benchlog::now() - chrono::Duration::days(k as i64))
        } else {
            bail!("Invalid date")
        }
    } else if let Some(n) = s.strip_suffix('w') {
        if let Ok(k) = usize::from_str(n) {
            Ok(benchlog::now() - chrono::Duration::weeks(k as i64))
        } else {
            bail!("Invalid date")
        }
    } else {
        let parts = s
            .split('-')
            .map(usize::from_str)
            .collect::<Vec<Result<usize, ParseIntError>>>();
        if parts.len() != 3 || !parts.iter().all(|x| x.is_ok()) {
            bail!("Invalid date syntax");
        }
        let vals = parts
            .into_iter()
            .map(|x| x.unwrap_or_default())
            .collect::<Vec<usize>>();
        let Some(d) = NaiveDate::from_ymd_opt(vals[0] as i32, vals[1] as u32, vals[2] as u32) else {
            bail!("Invalid date");
        };
        let (h, m, s) = if end_of_day { (23, 59, 59) } else { (0, 0, 0) };
        match d.and_hms_opt(h, m, s) {
            Some(t) => Ok(t),
            None => bail!("Invalid date"),
        }
    }
}

fn parse_time_start_of_day(s: &str) -> Result<Timestamp> {
    parse_time(s, false)
}

fn parse_time_end_of_day(s: &str) -> Result<Timestamp> {
    parse_time(s, true)
}

fn parse_record_time(s: &str) -> Result<Timestamp> {
    benchlog::parse_record_time(s)
}

fn parse_offset(s: &str) -> Result<FixedOffset> {
    benchlog::parse_utc_offset(s)
}

fn tz_option(offset: Option<FixedOffset>) -> TimeZoneOpt {
    match offset {
        Some(o) => TimeZoneOpt::Fixed(o),
        None => TimeZoneOpt::Local,
    }
}

#[test]
fn test_parse_time() {
    let t = parse_time("2019-07-10", false).unwrap();
    assert!(t == benchlog::parse_record_time("2019-07-10 00:00:00").unwrap());
    let t = parse_time("2019-07-10", true).unwrap();
    assert!(t == benchlog::parse_record_time("2019-07-10 23:59:59").unwrap());
    assert!(parse_time("2019-02-30", false).is_err());
    assert!(parse_time("2019-07", false).is_err());
    assert!(parse_time("yesterday", false).is_err());
    assert!(parse_time("xd", false).is_err());
    let t = parse_time("2w", false).unwrap();
    let age = benchlog::now() - t;
    assert!(age.num_days() >= 13 && age.num_days() <= 14);
}

/// The results root and how to read the telemetry in it.

pub struct Source {
    pub root: PathBuf,
    pub opts: TimelineOptions,
    pub nodes: HashMap<String, configs::NodeConfig>,
}

fn results_root(data_path: &Option<String>) -> Result<PathBuf> {
    if let Some(p) = data_path {
        Ok(PathBuf::from(p))
    } else if let Ok(val) = env::var("BENCH_RESULTS_ROOT") {
        Ok(PathBuf::from(val))
    } else if let Ok(val) = env::var("HOME") {
        Ok(PathBuf::from(val + "/bench_results"))
    } else {
        bail!("No data path")
    }
}

impl Source {
    pub fn open(args: &SourceArgs, meta_args: &MetaArgs) -> Result<Source> {
        let root = results_root(&args.data_path)?;
        if meta_args.verbose {
            eprintln!("Data path: {}", root.display());
        }

        let nodes = if let Some(ref config_filename) = args.config_file {
            configs::read_from_json(config_filename)?
        } else {
            HashMap::new()
        };

        let mut opts = TimelineOptions {
            tz: tz_option(args.utc_offset),
            ..TimelineOptions::default()
        };
        if let Some(ref interface) = args.interface {
            opts.interface = interface.clone();
        }
        for (name, node) in &nodes {
            if let Some(ref interface) = node.interface {
                opts.node_interfaces.insert(name.clone(), interface.clone());
            }
        }

        Ok(Source { root, opts, nodes })
    }

    /// The experiment with the given id.

    pub fn experiment(&self, id: &str) -> Result<Experiment> {
        let dir = self.root.join(id);
        if !dir.is_dir() {
            bail!("No experiment {id} in {}", self.root.display());
        }
        let setup = benchlog::read_setup(&dir)?;
        Ok(Experiment { dir, setup })
    }

    /// The experiments selected by the time range and filters, newest first.

    pub fn select(&self, args: &SelectArgs, meta_args: &MetaArgs) -> Result<Vec<Experiment>> {
        let from = args
            .from
            .unwrap_or_else(|| NaiveDate::MIN.and_hms_opt(0, 0, 0).unwrap_or_default());
        let to = args.to.unwrap_or_else(benchlog::now);
        if from > to {
            bail!("The --from time is greater than the --to time");
        }
        let filter = ExperimentFilter {
            ids: args.exp.clone(),
            input_sizes: args.input_size.clone(),
            link_rates: args.link_rate.clone(),
        };
        let found = benchlog::find_experiments(&self.root, from, to)?;
        let n = found.len();
        let selected = filter.apply(found);
        if meta_args.verbose {
            eprintln!("Number of experiments in range: {}", n);
            eprintln!("Number of experiments after filtering: {}", selected.len());
        }
        Ok(selected)
    }

    /// Metrics for each experiment.  Experiments whose metrics cannot be computed are reported and
    /// skipped.

    pub fn summarize(&self, experiments: &[Experiment]) -> Vec<ExperimentMetrics> {
        let mut results = vec![];
        for e in experiments {
            match benchlog::summarize_experiment(&e.dir, &e.setup, &self.opts) {
                Ok(m) => results.push(m),
                Err(msg) => log::warn!("Skipping {}: {:#}", e.setup.experiment_id, msg),
            }
        }
        results
    }
}

fn main() {
    match benchalyze() {
        Ok(()) => {}
        Err(msg) => {
            eprintln!("ERROR: {:#}", msg);
            process::exit(1);
        }
    }
}

fn benchalyze() -> Result<()> {
    let cli = Cli::parse();

    let meta_args = match cli.command {
        Commands::List(ref args) => &args.meta_args,
        Commands::Readings(ref args) => &args.meta_args,
        Commands::Metrics(ref args) => &args.meta_args,
        Commands::Network(ref args) => &args.meta_args,
        Commands::Compare(ref args) => &args.meta_args,
        Commands::Cdf(ref args) => &args.meta_args,
        Commands::Tasks(ref args) => &args.meta_args,
        Commands::Correlate(ref args) => &args.meta_args,
        Commands::Energy(ref args) => &args.meta_args,
        Commands::Record(ref args) => &args.meta_args,
    };

    let default_level = if meta_args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();

    let output = &mut io::stdout();
    match cli.command {
        Commands::List(ref args) => {
            let source = Source::open(&args.source_args, meta_args)?;
            let experiments = source.select(&args.select_args, meta_args)?;
            list::print_experiments(output, &experiments, &args.print_args)
        }
        Commands::Readings(ref args) => {
            let source = Source::open(&args.source_args, meta_args)?;
            let experiment = source.experiment(&args.experiment)?;
            readings::print_readings(output, &source, &experiment, args)
        }
        Commands::Metrics(ref args) => {
            let source = Source::open(&args.source_args, meta_args)?;
            let experiments = source.select(&args.select_args, meta_args)?;
            let results = source.summarize(&experiments);
            metrics::print_metrics(output, &results, args.per_node, &args.print_args)
        }
        Commands::Network(ref args) => {
            let source = Source::open(&args.source_args, meta_args)?;
            let experiment = source.experiment(&args.experiment)?;
            let m =
                benchlog::summarize_experiment(&experiment.dir, &experiment.setup, &source.opts)?;
            network::print_network_usage(output, &m)
        }
        Commands::Compare(ref args) => {
            let source = Source::open(&args.source_args, meta_args)?;
            let experiments = source.select(&args.select_args, meta_args)?;
            let results = source.summarize(&experiments);
            compare::print_comparison(output, &results, args)
        }
        Commands::Cdf(ref args) => {
            let source = Source::open(&args.source_args, meta_args)?;
            let experiments = source.select(&args.select_args, meta_args)?;
            let results = source.summarize(&experiments);
            cdf::print_cdfs(output, &results, args)
        }
        Commands::Tasks(ref args) => {
            let source = Source::open(&args.source_args, meta_args)?;
            let experiment = source.experiment(&args.experiment)?;
            tasks::print_task_stats(output, &source, &experiment, args)
        }
        Commands::Correlate(ref args) => {
            let source = Source::open(&args.source_args, meta_args)?;
            let experiment = source.experiment(&args.experiment)?;
            correlate::print_correlation(output, &source, &experiment, args)
        }
        Commands::Energy(ref args) => energy::print_energy(output, args),
        Commands::Record(ref args) => {
            let root = results_root(&args.data_path)?;
            let dir = record::write_record(&root, args)?;
            println!("{}", dir.display());
            Ok(())
        }
    }
}

#[cfg(test)]
fn test_source() -> Source {
    let args = SourceArgs {
        data_path: Some("../bench_test_data/results".to_string()),
        config_file: Some("../bench_test_data/nodes.json".to_string()),
        interface: None,
        utc_offset: Some(benchlog::parse_utc_offset("+02:00").unwrap()),
    };
    Source::open(&args, &MetaArgs::default()).unwrap()
}

#[test]
fn test_source_and_selection() {
    let source = test_source();
    assert!(source.opts.interface_for("b09-42") == "eth0");
    assert!(source.opts.interface_for("b09-40") == "enp59s0");
    assert!(source.nodes.len() == 3);

    let all = source.select(&SelectArgs::default(), &MetaArgs::default()).unwrap();
    assert!(all.len() == 2);
    let spark = SelectArgs {
        input_size: vec![100.0],
        ..Default::default()
    };
    let xs = source.select(&spark, &MetaArgs::default()).unwrap();
    assert!(xs.len() == 1 && xs[0].setup.experiment_id == "Exp-2019-07-10-13-56-23");
    let bad_range = SelectArgs {
        from: Some(parse_time("2019-07-11", false).unwrap()),
        to: Some(parse_time("2019-07-10", true).unwrap()),
        ..Default::default()
    };
    assert!(source.select(&bad_range, &MetaArgs::default()).is_err());

    assert!(source.experiment("Exp-2019-07-11-09-00-00").is_ok());
    assert!(source.experiment("Exp-2000-01-01-00-00-00").is_err());

    // Both experiments summarize; with the config file b09-42 reads eth0.
    let ms = source.summarize(&all);
    assert!(ms.len() == 2);
    assert!(ms[0].node("b09-42").unwrap().net_in_kb == 30.0);
}
