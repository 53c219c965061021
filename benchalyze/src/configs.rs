// Read cluster node configuration data from a json file into a hashmap with the host name as key.
//
// The file format is an array [...] of objects { ... }, each with the following named fields and
// value types:
//
//   hostname - string, the short host name of the node as it appears in experiment records
//   description - string, optional, arbitrary text describing the node
//   interface - string, optional, the network interface carrying the job's traffic on the node
//               (default: the --interface value)
//
// See ../bench_test_data/nodes.json for an example.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path;

// See above comment block for field documentation.

#[derive(Debug, Default)]
pub struct NodeConfig {
    pub hostname: String,
    pub description: String,
    pub interface: Option<String>,
}

// Returns a map from host name to config info, or an error message.

// Since the input is human-generated, may vary a bit over time, and have optional fields, the
// generic JSON parser is used, followed by explicit decoding of the fields.

pub fn read_from_json(filename: &str) -> Result<HashMap<String, NodeConfig>> {
    let file = File::open(path::Path::new(filename))
        .with_context(|| format!("Opening config file {filename}"))?;
    let reader = BufReader::new(file);
    let v = serde_json::from_reader(reader)?;
    let mut m = HashMap::new();
    if let Value::Array(objs) = v {
        for obj in objs {
            if let Value::Object(fields) = obj {
                let mut node: NodeConfig = Default::default();
                if let Some(Value::String(hn)) = fields.get("hostname") {
                    node.hostname = hn.clone();
                } else {
                    bail!("Field 'hostname' must be present and have a string value");
                }
                node.description = grab_opt_string(&fields, "description")?.unwrap_or_default();
                node.interface = grab_opt_string(&fields, "interface")?;
                let key = node.hostname.clone();
                m.insert(key, node);
            } else {
                bail!("Expected an object value")
            }
        }
    } else {
        bail!("Expected an array value")
    }
    Ok(m)
}

fn grab_opt_string(fields: &serde_json::Map<String, Value>, name: &str) -> Result<Option<String>> {
    match fields.get(name) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => bail!("Field '{name}' must have a string value"),
    }
}

#[test]
fn test_read_nodes() {
    let m = read_from_json("../bench_test_data/nodes.json").unwrap();
    assert!(m.len() == 3);
    let n = m.get("b09-42").unwrap();
    assert!(n.interface.as_deref() == Some("eth0"));
    assert!(n.description == "Giraph master, 10GbE");
    let n = m.get("b09-40").unwrap();
    assert!(n.interface.is_none());
    assert!(read_from_json("../bench_test_data/no-such-nodes.json").is_err());
}
