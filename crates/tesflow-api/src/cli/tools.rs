//! `tesflow tools`: list the tools workflows can call.

use anyhow::Result;
use comfy_table::Cell;

use super::output::{self, print_json};
use crate::state::AppState;

pub fn handle_tools(state: &AppState, json: bool) -> Result<()> {
    let tools = state.engine.tools();

    if json {
        let out: Vec<_> = tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name(),
                    "description": t.description(),
                })
            })
            .collect();
        return print_json(&out);
    }

    let mut table = output::table(&["Tool", "Description"]);
    for tool in tools.iter() {
        table.add_row(vec![Cell::new(tool.name()), Cell::new(tool.description())]);
    }
    println!();
    println!("{table}");
    println!();
    Ok(())
}
