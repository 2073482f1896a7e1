//! Handlers wiring the CLI to the orchestrator stack.

pub mod ask;
pub mod repl;

use std::sync::Arc;

use anyhow::Result;

use askdata::agent::AnalystAgent;
use askdata::config::Config;
use askdata::exec::PythonExecutor;
use askdata::llm::{ChatOptions, LlmClient};
use askdata::store::{MemoryBank, SessionStore};

pub(crate) struct Stack {
    pub agent: AnalystAgent,
    pub sessions: Arc<SessionStore>,
    pub memory: Arc<MemoryBank>,
}

pub(crate) fn build_stack(cfg: &Config, model: &str, temperature: f32, top_p: f32) -> Result<Stack> {
    let client = Arc::new(LlmClient::from_config(cfg)?);
    let executor = Arc::new(PythonExecutor::from_config(cfg));
    let sessions = Arc::new(SessionStore::new());
    let memory = Arc::new(MemoryBank::new());

    let opts = ChatOptions {
        model: model.to_string(),
        temperature,
        top_p,
        max_tokens: cfg.get_u64("MAX_OUTPUT_TOKENS").map(|v| v as u32),
        tools: None,
        parallel_tool_calls: false,
        tool_choice: None,
    };
    let agent = AnalystAgent::new(
        client,
        executor,
        opts,
        Some(sessions.clone()),
        Some(memory.clone()),
    );
    Ok(Stack { agent, sessions, memory })
}
