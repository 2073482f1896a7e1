//! Printers: markdown rendering (termimad) and execution-log display.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use termimad::MadSkin;

use askdata::agent::AgentResponse;

pub struct MarkdownPrinter {
    pub skin: MadSkin,
}

impl Default for MarkdownPrinter {
    fn default() -> Self {
        Self { skin: MadSkin::default() }
    }
}

impl MarkdownPrinter {
    pub fn print(&self, text: &str) {
        self.skin.print_text(text);
        println!();
    }
}

/// Render one agent response: answer text, then warnings/errors to stderr,
/// then the chart spec to a file when requested.
pub fn render(
    response: &AgentResponse,
    markdown: bool,
    as_json: bool,
    plot_out: Option<&Path>,
) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(response)?);
    } else {
        if markdown {
            MarkdownPrinter::default().print(&response.response);
        } else {
            println!("{}", response.response);
        }
        for warning in &response.execution_log.warnings {
            eprintln!("{} {}", "warning:".yellow(), warning);
        }
        for error in &response.execution_log.errors {
            eprintln!("{} {}", "error:".red(), error);
        }
    }

    if let Some(path) = plot_out {
        match &response.plot_config {
            Some(spec) => {
                fs::write(path, serde_json::to_string_pretty(spec)?)
                    .with_context(|| format!("writing chart spec: {}", path.display()))?;
                eprintln!("chart specification written to {}", path.display());
            }
            None => eprintln!("{} no chart specification in this answer", "warning:".yellow()),
        }
    }
    Ok(())
}
