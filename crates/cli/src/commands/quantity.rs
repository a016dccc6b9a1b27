//! Quantity commands

use anyhow::{Context, Result};
use colored::Colorize;
use operator_lib::quantity::compare as compare_quantities;
use operator_lib::StorageQuantity;
use serde::Serialize;
use std::cmp::Ordering;
use tabled::Tabled;

use crate::output::{format_bytes, print_json, print_table, OutputFormat};

#[derive(Tabled, Serialize)]
struct QuantityRow {
    #[tabled(rename = "Quantity")]
    text: String,
    #[tabled(rename = "Bytes")]
    bytes: u64,
    #[tabled(rename = "Binary")]
    human: String,
}

impl From<&StorageQuantity> for QuantityRow {
    fn from(q: &StorageQuantity) -> Self {
        Self {
            text: q.as_str().to_string(),
            bytes: q.bytes(),
            human: format_bytes(q.bytes()),
        }
    }
}

#[derive(Serialize)]
struct Comparison {
    a: QuantityRow,
    b: QuantityRow,
    ordering: &'static str,
}

fn ordering_name(ordering: Ordering) -> &'static str {
    match ordering {
        Ordering::Less => "less",
        Ordering::Equal => "equal",
        Ordering::Greater => "greater",
    }
}

/// Parse and compare two quantities
pub fn compare(a: &str, b: &str, format: OutputFormat) -> Result<()> {
    let qa = StorageQuantity::parse(a).with_context(|| format!("Invalid quantity {:?}", a))?;
    let qb = StorageQuantity::parse(b).with_context(|| format!("Invalid quantity {:?}", b))?;
    let ordering = compare_quantities(&qa, &qb);

    match format {
        OutputFormat::Json => print_json(&Comparison {
            a: QuantityRow::from(&qa),
            b: QuantityRow::from(&qb),
            ordering: ordering_name(ordering),
        })?,
        OutputFormat::Table => {
            print_table(&[QuantityRow::from(&qa), QuantityRow::from(&qb)], format)?;
            let symbol = match ordering {
                Ordering::Less => "<",
                Ordering::Equal => "=",
                Ordering::Greater => ">",
            };
            println!("{} {} {}", qa.as_str().cyan(), symbol.bold(), qb.as_str().cyan());
        }
    }
    Ok(())
}
