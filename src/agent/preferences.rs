//! Preference extractor: a narrow, single-shot model call that mines one
//! conversation turn for explicit user preferences and writes them into the
//! memory bank. This path never fails the enclosing turn.

use std::sync::Arc;

use serde_json::{json, Map};
use tracing::{debug, warn};

use crate::llm::{ChatMessage, ChatOptions, ModelClient, Role};
use crate::store::MemoryBank;

use super::excerpt;

/// Sentinel the model returns when no preference was expressed.
const SENTINEL: &str = "NONE";
/// Lines shorter than this are discarded as noise.
const MIN_PREFERENCE_LEN: usize = 6;

pub struct PreferenceExtractor {
    client: Arc<dyn ModelClient>,
    memory: Arc<MemoryBank>,
    opts: ChatOptions,
}

impl PreferenceExtractor {
    pub fn new(client: Arc<dyn ModelClient>, memory: Arc<MemoryBank>, opts: ChatOptions) -> Self {
        // The extraction call never uses tools.
        let mut opts = opts;
        opts.tools = None;
        opts.tool_choice = None;
        Self { client, memory, opts }
    }

    /// Mine the (user message, agent response) pair. Each surviving line
    /// becomes an independent `user_preference` memory. Failures are logged
    /// and swallowed.
    pub async fn extract(&self, user_message: &str, agent_response: &str) {
        let prompt = extraction_prompt(user_message, agent_response);
        let messages = [ChatMessage::new(Role::User, prompt)];

        let turn = match self.client.complete(&messages, &self.opts).await {
            Ok(turn) => turn,
            Err(e) => {
                warn!(error = %e, "preference extraction call failed");
                return;
            }
        };

        for line in turn.content.lines() {
            let line = line.trim().trim_start_matches('-').trim();
            if line.len() < MIN_PREFERENCE_LEN || line == SENTINEL {
                continue;
            }
            let mut meta = Map::new();
            meta.insert("source".into(), json!("auto_extracted"));
            meta.insert("user_message".into(), json!(excerpt(user_message, 200)));
            let id = self.memory.add(line, "user_preference", Some(meta));
            debug!(%id, preference = line, "saved user preference");
        }
    }
}

fn extraction_prompt(user_message: &str, agent_response: &str) -> String {
    format!(
        "Analyze this conversation exchange and identify if the user expressed any personal \
         preferences, favorites, or likes.\n\n\
         User message: \"{user}\"\n\
         Agent response: \"{agent}...\"\n\n\
         Extract ONLY clear user preferences in this format:\n\
         - If the user says \"X is my favorite Y\", extract: \"Favorite Y: X\"\n\
         - If the user says \"I prefer X\", extract: \"Prefers: X\"\n\
         - If the user says \"I like X\", extract: \"Likes: X\"\n\n\
         Rules:\n\
         1. Only extract explicit preferences from the USER's message (not the agent's response)\n\
         2. Be specific (e.g. \"Favorite player: Virat Kohli\", not just \"Likes cricket\")\n\
         3. If no clear preference is expressed, respond with \"{sentinel}\"\n\
         4. Return one preference per line\n\
         5. Keep it concise and factual\n\n\
         Extracted preferences:",
        user = user_message,
        agent = excerpt(agent_response, 300),
        sentinel = SENTINEL,
    )
}
