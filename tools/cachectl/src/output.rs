use std::fmt::{self, Write as _};

use serde::Serialize;
use serde_json::Value;

/// Output format selection for all subcommands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Single JSON object on stdout.
    Json,
    /// Indented `key: value` listing on stdout.
    #[default]
    Human,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Human => write!(f, "human"),
        }
    }
}

/// Render a successful result in `format`.
pub fn render<T: Serialize>(format: OutputFormat, value: &T) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Json => serde_json::to_string(value),
        OutputFormat::Human => {
            let value = serde_json::to_value(value)?;
            let mut out = String::new();
            render_human(&value, 0, &mut out);
            Ok(out.trim_end().to_string())
        }
    }
}

/// Write a successful result to stdout.
pub fn emit<T: Serialize>(format: OutputFormat, value: &T) -> Result<(), serde_json::Error> {
    println!("{}", render(format, value)?);
    Ok(())
}

/// Write an error to stdout (JSON mode) or stderr (human mode).
pub fn emit_error(format: OutputFormat, exit_code: u8, message: &str) {
    match format {
        OutputFormat::Json => {
            let obj = serde_json::json!({
                "error": message,
                "exit_code": exit_code,
            });
            println!("{obj}");
        }
        OutputFormat::Human => eprintln!("error: {message}"),
    }
}

fn render_human(value: &Value, depth: usize, out: &mut String) {
    let pad = "  ".repeat(depth);
    match value {
        Value::Object(map) => {
            for (key, field) in map {
                match field {
                    Value::Object(_) => {
                        let _ = writeln!(out, "{pad}{key}:");
                        render_human(field, depth + 1, out);
                    }
                    Value::Array(items) if items.iter().any(|i| i.is_object()) => {
                        let _ = writeln!(out, "{pad}{key}: ({} items)", items.len());
                        render_human(field, depth + 1, out);
                    }
                    _ => {
                        let _ = writeln!(out, "{pad}{key}: {}", scalar(field));
                    }
                }
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                if item.is_object() {
                    let _ = writeln!(out, "{pad}[{i}]");
                    render_human(item, depth + 1, out);
                } else {
                    let _ = writeln!(out, "{pad}- {}", scalar(item));
                }
            }
        }
        other => {
            let _ = writeln!(out, "{pad}{}", scalar(other));
        }
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        Value::Array(items) => items.iter().map(scalar).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}
