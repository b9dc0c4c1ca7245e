//! Provider listing for the `clqy providers` command.
//!
//! Shows the failover chain as built from the loaded configuration,
//! including which providers never made it into the chain (missing key,
//! disabled).

use anyhow::Result;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;

use crate::state::AppState;

/// Print the failover chain in priority order.
pub fn list_providers(state: &AppState, json: bool) -> Result<()> {
    let statuses = state.provider_router.statuses();

    if json {
        let rows: Vec<serde_json::Value> = statuses
            .iter()
            .map(|s| {
                serde_json::json!({
                    "name": s.name,
                    "model": s.model,
                    "priority": s.priority,
                    "enabled": s.enabled,
                    "summarization": s.summarization,
                    "reasoning": s.reasoning,
                    "max_context_tokens": s.max_context_tokens,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if statuses.is_empty() {
        println!();
        println!(
            "  {} No providers available. Add [[providers]] entries to {} and export their API keys.",
            style("i").blue().bold(),
            style("colloquy.toml").cyan()
        );
        println!();
        return Ok(());
    }

    println!();
    println!("  {}", style("Failover Chain Order").bold());
    println!();

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Priority").fg(Color::White),
        Cell::new("Name").fg(Color::White),
        Cell::new("Model").fg(Color::White),
        Cell::new("Enabled").fg(Color::White),
        Cell::new("Summarization").fg(Color::White),
        Cell::new("Context").fg(Color::White),
    ]);

    for status in &statuses {
        let enabled_cell = if status.enabled {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::Red)
        };
        let summarization_cell = if status.summarization {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::DarkGrey)
        };

        table.add_row(vec![
            Cell::new(status.priority).fg(Color::Cyan),
            Cell::new(&status.name).fg(Color::White),
            Cell::new(&status.model).fg(Color::DarkGrey),
            enabled_cell,
            summarization_cell,
            Cell::new(status.max_context_tokens).fg(Color::DarkGrey),
        ]);
    }

    println!("{table}");
    println!();

    Ok(())
}
