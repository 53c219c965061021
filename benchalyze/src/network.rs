// Network usage of one experiment, in total and broken down by the Spark stage in progress.
//
// Traffic outside every stage is shown as "between stages"; for a Giraph job, which has no stages,
// that is all of it.

use crate::metrics::kb_to_gb;
use anyhow::Result;
use benchlog::{mean, std_dev, ExperimentMetrics, StageId};
use std::collections::BTreeSet;
use std::io;

#[derive(Debug, PartialEq)]
pub struct StageUsage {
    pub stage: Option<StageId>,
    pub sent_kb: f64,
    pub received_kb: f64,

    /// Per node, in node order.
    pub node_sent_kb: Vec<f64>,
    pub node_received_kb: Vec<f64>,
}

pub fn stage_usage(m: &ExperimentMetrics) -> Vec<StageUsage> {
    let mut stages = BTreeSet::new();
    for n in &m.nodes {
        stages.extend(n.stage_net_out_kb.keys().copied());
        stages.extend(n.stage_net_in_kb.keys().copied());
    }
    let mut result = vec![];
    for stage in stages {
        let node_sent_kb = m
            .nodes
            .iter()
            .map(|n| n.stage_net_out_kb.get(&stage).copied().unwrap_or(0.0))
            .collect::<Vec<f64>>();
        let node_received_kb = m
            .nodes
            .iter()
            .map(|n| n.stage_net_in_kb.get(&stage).copied().unwrap_or(0.0))
            .collect::<Vec<f64>>();
        result.push(StageUsage {
            stage,
            sent_kb: node_sent_kb.iter().sum(),
            received_kb: node_received_kb.iter().sum(),
            node_sent_kb,
            node_received_kb,
        });
    }
    // Traffic between stages last.
    result.sort_by_key(|s| (s.stage.is_none(), s.stage));
    result
}

pub fn print_network_usage(output: &mut dyn io::Write, m: &ExperimentMetrics) -> Result<()> {
    writeln!(output, "{}: network usage in GB", m.id())?;
    writeln!(
        output,
        "Total: sent {:.3} received {:.3}",
        kb_to_gb(m.total_net_out_kb()),
        kb_to_gb(m.total_net_in_kb())
    )?;
    for u in stage_usage(m) {
        let label = match u.stage {
            Some(s) => format!("Stage {s}"),
            None => "Between stages".to_string(),
        };
        let sent = u.node_sent_kb.iter().map(|x| kb_to_gb(*x)).collect::<Vec<f64>>();
        let received = u.node_received_kb.iter().map(|x| kb_to_gb(*x)).collect::<Vec<f64>>();
        writeln!(
            output,
            "{label}: sent {:.3} received {:.3}; \
             per node sent {:.3} ({:.3}) received {:.3} ({:.3})",
            kb_to_gb(u.sent_kb),
            kb_to_gb(u.received_kb),
            mean(&sent),
            std_dev(&sent),
            mean(&received),
            std_dev(&received)
        )?;
    }
    Ok(())
}

#[cfg(test)]
fn summarize(id: &str) -> ExperimentMetrics {
    let source = crate::test_source();
    let e = source.experiment(id).unwrap();
    benchlog::summarize_experiment(&e.dir, &e.setup, &source.opts).unwrap()
}

#[test]
fn test_stage_usage() {
    let m = summarize("Exp-2019-07-10-13-56-23");
    let us = stage_usage(&m);
    assert!(us.len() == 2);
    assert!(us[0].stage == Some(StageId::new(0, 0)));
    assert!(us[0].node_sent_kb == vec![800.0, 400.0]);
    assert!(us[0].node_received_kb == vec![400.0, 1200.0]);
    assert!(us[0].sent_kb == 1200.0);
    assert!(us[1].stage == Some(StageId::new(1, 0)));
    assert!(us[1].node_sent_kb == vec![1000.0, 500.0]);
    assert!(us[1].received_kb == 2000.0);

    let m = summarize("Exp-2019-07-11-09-00-00");
    let us = stage_usage(&m);
    assert!(us.len() == 1);
    assert!(us[0].stage.is_none());
    // eth0 on b09-42 per the node configuration.
    assert!(us[0].node_received_kb == vec![30.0, 30.0]);
}

#[test]
fn test_print_network_usage() {
    let m = summarize("Exp-2019-07-10-13-56-23");
    let mut out = Vec::new();
    print_network_usage(&mut out, &m).unwrap();
    let text = String::from_utf8(out).unwrap();
    let lines = text.lines().collect::<Vec<&str>>();
    assert!(lines.len() == 4);
    assert!(lines[0] == "Exp-2019-07-10-13-56-23: network usage in GB");
    assert!(lines[1] == "Total: sent 0.003 received 0.003");
    assert!(lines[2]
        .starts_with("Stage 0.0: sent 0.001 received 0.002; per node sent 0.001 (0.000)"));
    assert!(lines[3].starts_with("Stage 1.0: "));
}
