// Generic formatting code for a set of data extracted from a data structure to be presented
// columnar or as csv, with or without a header.
//
// A format spec is a comma-separated list of field names, aliases for lists of field names, and
// the options "header", "noheader" and "csv".

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::io::{self, Write};

/// Return a vector of the known fields in `spec` wrt the formatters, with aliases expanded, and a
/// HashSet of any other strings found in `spec`.

pub fn parse_fields<FmtT>(
    spec: &str,
    formatters: &HashMap<String, FmtT>,
    aliases: &HashMap<String, Vec<String>>,
) -> (Vec<String>, HashSet<String>) {
    let mut others = HashSet::new();
    let mut fields = vec![];
    for x in spec.split(',') {
        if formatters.contains_key(x) {
            fields.push(x.to_string());
        } else if let Some(expansion) = aliases.get(x) {
            for y in expansion {
                if formatters.contains_key(y) {
                    fields.push(y.clone());
                }
            }
        } else if !x.is_empty() {
            others.insert(x.to_string());
        }
    }
    (fields, others)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FormatOptions {
    pub header: bool,
    pub csv: bool,
}

/// Fixed-width output has a header by default, csv output does not.  Unknown words are reported
/// and otherwise ignored.

pub fn standard_options(others: &HashSet<String>) -> FormatOptions {
    let csv = others.contains("csv");
    let header = if others.contains("noheader") {
        false
    } else {
        others.contains("header") || !csv
    };
    for x in others {
        if x != "csv" && x != "header" && x != "noheader" {
            log::warn!("Unknown field name or option '{x}'");
        }
    }
    FormatOptions { header, csv }
}

/// The `fields` are the names of formatting functions to get from the `formatters`, these are
/// applied to the `data`.

pub fn format_data<DataT, FmtT, CtxT>(
    output: &mut dyn io::Write,
    fields: &[String],
    formatters: &HashMap<String, FmtT>,
    opts: &FormatOptions,
    data: &[DataT],
    ctx: CtxT,
) -> Result<()>
where
    FmtT: Fn(&DataT, CtxT) -> String,
    CtxT: Copy,
{
    let fns = fields
        .iter()
        .filter_map(|kwd| formatters.get(kwd))
        .collect::<Vec<&FmtT>>();
    let rows = data
        .iter()
        .map(|x| fns.iter().map(|f| f(x, ctx)).collect::<Vec<String>>())
        .collect::<Vec<Vec<String>>>();

    if opts.csv {
        let mut w = csv::WriterBuilder::new().flexible(true).from_writer(output);
        if opts.header {
            w.write_record(fields)?;
        }
        for row in &rows {
            w.write_record(row)?;
        }
        w.flush()?;
        return Ok(());
    }

    // The column width is the max across all the entries in the column (including header, if
    // present)
    let mut widths = vec![0; fields.len()];
    if opts.header {
        for (i, kwd) in fields.iter().enumerate() {
            widths[i] = usize::max(widths[i], kwd.len());
        }
    }
    for row in &rows {
        for (i, s) in row.iter().enumerate() {
            widths[i] = usize::max(widths[i], s.len());
        }
    }

    if opts.header {
        write_fixed(output, fields, &widths)?;
    }
    for row in &rows {
        write_fixed(output, row, &widths)?;
    }
    Ok(())
}

fn write_fixed(output: &mut dyn io::Write, row: &[String], widths: &[usize]) -> Result<()> {
    let mut line = String::new();
    for (s, w) in row.iter().zip(widths.iter()) {
        line += &format!("{:w$}  ", s, w = *w);
    }
    writeln!(output, "{}", line.trim_end())?;
    Ok(())
}

#[cfg(test)]
type TestDatum<'a> = &'a (String, f64);

#[cfg(test)]
fn format_name(x: TestDatum, _: bool) -> String {
    x.0.clone()
}

#[cfg(test)]
fn format_value(x: TestDatum, _: bool) -> String {
    format!("{:.1}", x.1)
}

#[cfg(test)]
fn test_formatters() -> HashMap<String, &'static dyn Fn(TestDatum, bool) -> String> {
    let mut formatters: HashMap<String, &'static dyn Fn(TestDatum, bool) -> String> =
        HashMap::new();
    formatters.insert("name".to_string(), &format_name);
    formatters.insert("value".to_string(), &format_value);
    formatters
}

#[test]
fn test_parse_fields() {
    let formatters = test_formatters();
    let mut aliases = HashMap::new();
    aliases.insert("all".to_string(), vec!["name".to_string(), "value".to_string()]);
    let (fields, others) = parse_fields("value,csv,,all", &formatters, &aliases);
    assert!(fields == vec!["value", "name", "value"]);
    assert!(others.len() == 1 && others.contains("csv"));
    let opts = standard_options(&others);
    assert!(opts.csv && !opts.header);
    let (_, others) = parse_fields("name,noheader", &formatters, &aliases);
    assert!(!standard_options(&others).header);
}

#[test]
fn test_format_data() {
    let formatters = test_formatters();
    let data = vec![("b09-40".to_string(), 12.5), ("b09-42, b".to_string(), 3.0)];
    let fields = vec!["name".to_string(), "value".to_string()];

    let mut out = Vec::new();
    let opts = FormatOptions { header: true, csv: false };
    format_data(&mut out, &fields, &formatters, &opts, &data, false).unwrap();
    assert!(
        String::from_utf8(out).unwrap()
            == "name       value\nb09-40     12.5\nb09-42, b  3.0\n"
    );

    let mut out = Vec::new();
    let opts = FormatOptions { header: true, csv: true };
    format_data(&mut out, &fields, &formatters, &opts, &data, false).unwrap();
    assert!(String::from_utf8(out).unwrap() == "name,value\nb09-40,12.5\n\"b09-42, b\",3.0\n");
}
