//! Rendering of node changes and command outcomes.
//!
//! Text mode prints `path = value`, JSON mode one object per line. Node
//! changes go to stdout; command outcomes to stderr so a pipe sees only
//! the tree.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use serde_json::Value;

use mielelink_core::{CommandOutcome, NodeChange};

use crate::cli::{ColorMode, OutputFormat};

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// Formats changes for one output stream.
#[derive(Debug, Clone, Copy)]
pub struct Printer {
    format: OutputFormat,
    color: bool,
    quiet: bool,
}

impl Printer {
    pub fn new(format: OutputFormat, color: ColorMode, quiet: bool) -> Self {
        Self {
            format,
            color: should_color(color),
            quiet,
        }
    }

    pub fn change(&self, change: &NodeChange) {
        if self.quiet {
            return;
        }
        let line = self.render_change(change);
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{line}");
    }

    pub fn outcome(&self, path: &str, outcome: &CommandOutcome) {
        let line = match outcome {
            CommandOutcome::Applied { ack } => format!("{path}: {ack}"),
            CommandOutcome::Failed { message } => {
                if self.color {
                    format!("{path}: {}", message.red())
                } else {
                    format!("{path}: {message}")
                }
            }
            CommandOutcome::Ignored => format!("{path}: ignored"),
        };
        eprintln!("{line}");
    }

    fn render_change(&self, change: &NodeChange) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(change).unwrap_or_default(),
            OutputFormat::Text => {
                let value = render_value(&change.value);
                if self.color {
                    format!("{} = {value}", change.path.cyan())
                } else {
                    format!("{} = {value}", change.path)
                }
            }
        }
    }
}

/// Strings unquoted, everything else as compact JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse the value half of a `path=value` write intent. JSON literals
/// (`true`, `2`, `"x"`) keep their type; anything else is a string.
pub fn parse_value(raw: &str) -> Value {
    let raw = raw.trim();
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn values_keep_json_types() {
        assert_eq!(parse_value("true"), json!(true));
        assert_eq!(parse_value(" 3 "), json!(3));
        assert_eq!(parse_value("12:30"), json!("12:30"));
    }

    #[test]
    fn text_rendering_is_uncolored_when_disabled() {
        let printer = Printer::new(OutputFormat::Text, ColorMode::Never, false);
        let change = NodeChange {
            path: "D1.Power".into(),
            value: json!(true),
        };
        assert_eq!(printer.render_change(&change), "D1.Power = true");
    }

    #[test]
    fn json_rendering_is_one_object() {
        let printer = Printer::new(OutputFormat::Json, ColorMode::Never, false);
        let change = NodeChange {
            path: "D1.Nickname".into(),
            value: json!("Kitchen"),
        };
        assert_eq!(
            printer.render_change(&change),
            r#"{"path":"D1.Nickname","value":"Kitchen"}"#
        );
    }
}
