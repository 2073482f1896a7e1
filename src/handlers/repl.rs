//! Interactive analysis loop with store inspection commands.

use std::io::{self, BufRead, Write};

use anyhow::Result;
use owo_colors::OwoColorize;

use askdata::config::Config;
use askdata::llm::Role;

use super::build_stack;
use crate::cli::Cli;
use crate::printer;

pub async fn run(args: &Cli, cfg: &Config, model: &str, markdown: bool) -> Result<()> {
    let stack = build_stack(cfg, model, args.temperature, args.top_p)?;
    stack.agent.bind_dataset(&args.data)?;
    let session = stack.sessions.create(None);

    println!(
        "Analyzing {} — ask questions, or :memory, :search <query>, :history, :quit",
        args.data.display()
    );

    let stdin = io::stdin();
    loop {
        print!("{} ", "›".magenta());
        io::stdout().flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line {
            ":quit" | ":q" => break,
            ":memory" => {
                let summary = stack.memory.summary();
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            ":history" => {
                for message in stack.sessions.history(&session.id, None) {
                    println!("{}: {}", role_name(message.role).cyan(), message.content);
                }
            }
            _ if line.starts_with(":search") => {
                let query = line.trim_start_matches(":search").trim();
                if query.is_empty() {
                    eprintln!("usage: :search <query>");
                    continue;
                }
                for memory in stack.memory.search(query, 5) {
                    println!("[{}] {}", memory.category.yellow(), memory.content);
                }
            }
            question => {
                let response = stack.agent.chat(question, Some(&session.id)).await;
                printer::render(&response, markdown, args.json, args.plot_out.as_deref())?;
            }
        }
    }
    Ok(())
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}
