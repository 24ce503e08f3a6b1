use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A value bound to a `$n` placeholder of a compiled statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BindValue {
    Int(i32),
    IntArray(Vec<i32>),
    TextArray(Vec<String>),
}

impl fmt::Display for BindValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindValue::Int(value) => write!(f, "{value}"),
            BindValue::IntArray(values) => {
                let items: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "{{{}}}", items.join(","))
            }
            BindValue::TextArray(values) => {
                let items: Vec<String> = values.iter().map(|v| format!("\"{v}\"")).collect();
                write!(f, "{{{}}}", items.join(","))
            }
        }
    }
}

/// A single calculated cell, typed by the warehouse column it was decoded from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Integer(i64),
    Decimal(Decimal),
    Float(f64),
    Text(String),
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Integer(v) => write!(f, "{v}"),
            CellValue::Decimal(v) => write!(f, "{v}"),
            CellValue::Float(v) => write!(f, "{v}"),
            CellValue::Text(v) => f.write_str(v),
        }
    }
}
