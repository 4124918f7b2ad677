//! Shared helpers for command handlers.

use serde_json::Value;

use homeconnect_core::Item;

use crate::error::CliError;

/// Parse a value given on the command line: JSON if it parses
/// (`true`, `42`, `"quoted"`), the raw string otherwise.
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

/// Parse repeated `KEY=VALUE` program options.
pub fn parse_options(raw: &[String]) -> Result<Vec<Item>, CliError> {
    raw.iter()
        .map(|pair| {
            let (key, value) = pair.split_once('=').ok_or_else(|| CliError::Validation {
                field: "option".into(),
                reason: format!("expected KEY=VALUE, got '{pair}'"),
            })?;
            if key.is_empty() {
                return Err(CliError::Validation {
                    field: "option".into(),
                    reason: format!("empty key in '{pair}'"),
                });
            }
            Ok(Item::new(key, parse_value(value)))
        })
        .collect()
}

/// Human-readable rendering of an item value.
pub fn display_value(item: &Item) -> String {
    let value = item.displayvalue.clone().unwrap_or_else(|| match &item.value {
        Value::String(s) => s.clone(),
        Value::Null => "-".into(),
        other => other.to_string(),
    });
    match &item.unit {
        Some(unit) => format!("{value} {unit}"),
        None => value,
    }
}
