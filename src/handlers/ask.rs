//! One-shot question handler.

use anyhow::Result;

use askdata::config::Config;

use super::build_stack;
use crate::cli::Cli;
use crate::printer;

pub async fn run(args: &Cli, cfg: &Config, model: &str, prompt: &str, markdown: bool) -> Result<()> {
    let stack = build_stack(cfg, model, args.temperature, args.top_p)?;
    stack.agent.bind_dataset(&args.data)?;
    let session = stack.sessions.create(None);

    let response = if args.summarize && prompt.trim().is_empty() {
        stack.agent.summarize(Some(&session.id)).await
    } else {
        stack.agent.chat(prompt, Some(&session.id)).await
    };

    printer::render(&response, markdown, args.json, args.plot_out.as_deref())
}
