mod cli;
mod handlers;
mod printer;

use std::io::{self, Read};

use anyhow::{bail, Result};
use is_terminal::IsTerminal;
use tracing_subscriber::EnvFilter;

use askdata::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("askdata=info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = cli::Cli::parse();
    let cfg = Config::load();

    // Resolve model: CLI overrides config; fall back to DEFAULT_MODEL
    let effective_model = args
        .model
        .clone()
        .or_else(|| cfg.get("DEFAULT_MODEL"))
        .unwrap_or_else(|| "gpt-4o".to_string());

    // stdin handling (pipe support)
    let mut prompt_from_stdin = String::new();
    let stdin_is_tty = io::stdin().is_terminal();
    if !stdin_is_tty && !args.repl {
        io::stdin().read_to_string(&mut prompt_from_stdin)?;
    }
    if args.repl && !stdin_is_tty {
        bail!("--repl requires an interactive terminal");
    }

    // Resolve prompt: stdin + optional positional
    let arg_prompt = args.prompt.clone().unwrap_or_default();
    let prompt = if !prompt_from_stdin.is_empty() && !arg_prompt.is_empty() {
        format!("{}\n\n{}", prompt_from_stdin.trim_end(), arg_prompt)
    } else if !prompt_from_stdin.is_empty() {
        prompt_from_stdin.trim_end().to_string()
    } else {
        arg_prompt
    };

    let markdown = if args.no_md {
        false
    } else if args.md {
        true
    } else {
        cfg.get_bool("PRETTIFY_MARKDOWN")
    };

    if args.repl {
        handlers::repl::run(&args, &cfg, &effective_model, markdown).await
    } else {
        if prompt.trim().is_empty() && !args.summarize {
            bail!("provide a question, --summarize, or --repl");
        }
        handlers::ask::run(&args, &cfg, &effective_model, &prompt, markdown).await
    }
}
