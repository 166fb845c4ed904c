//! Shared rendering helpers for the CLI handlers.

use anyhow::{Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::{style, StyledObject};
use serde_json::Value;
use tesflow_types::run::{RunStatus, TaskStatus};
use uuid::Uuid;

/// Parse a run id argument.
pub fn parse_run_id(raw: &str) -> Result<Uuid> {
    raw.parse::<Uuid>()
        .with_context(|| format!("Invalid run ID '{raw}' (expected a UUID)"))
}

pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Table with the house preset and cyan-tinted first header cell.
pub fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    let header: Vec<Cell> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            if i == 0 {
                Cell::new(h).fg(Color::Cyan)
            } else {
                Cell::new(h)
            }
        })
        .collect();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

pub fn run_status(status: RunStatus) -> StyledObject<&'static str> {
    let s = style(status.as_str());
    match status {
        RunStatus::Succeeded => s.green(),
        RunStatus::Failed => s.red(),
        RunStatus::PartiallyFailed => s.yellow(),
        RunStatus::Running => s.cyan(),
        RunStatus::Pending => s.dim(),
    }
}

pub fn task_status(status: TaskStatus) -> StyledObject<&'static str> {
    let s = style(status.as_str());
    match status {
        TaskStatus::Succeeded => s.green(),
        TaskStatus::Failed => s.red(),
        TaskStatus::Skipped => s.yellow(),
        TaskStatus::Running | TaskStatus::Ready => s.cyan(),
        TaskStatus::Pending => s.dim(),
    }
}

/// Single-line preview of a JSON value, shortened to `max` characters.
pub fn preview(value: &Value, max: usize) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() <= max {
        text
    } else {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_ids_must_be_uuids() {
        assert!(parse_run_id("not-a-uuid").is_err());
        let id = Uuid::now_v7();
        assert_eq!(parse_run_id(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn previews_are_truncated() {
        assert_eq!(preview(&json!("short"), 10), "short");
        assert_eq!(preview(&json!({"a": 1}), 40), r#"{"a":1}"#);
        assert_eq!(preview(&json!("abcdefghijkl"), 8), "abcde...");
    }
}
