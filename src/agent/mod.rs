//! Conversation orchestrator.
//!
//! Primes a model session with a dataset pointer and stored preferences,
//! relays user messages, intercepts tool calls, dispatches them to the
//! execution engine, and assembles the final structured answer. The public
//! contract never returns an error: every failure path yields a complete
//! [`AgentResponse`] with a populated execution log.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use crate::exec::{CodeExecutor, ExecutionResult};
use crate::llm::{
    ChatMessage, ChatOptions, FunctionSchema, ModelClient, ModelError, Role, ToolCall, ToolSchema,
};
use crate::store::{MemoryBank, MemorySortKey, SessionStore};

pub mod preferences;

pub use preferences::PreferenceExtractor;

/// Name of the single declared tool.
pub const EXECUTE_TOOL: &str = "execute_python_code";

/// Additional attempts after the first rejected send.
const MAX_RETRIES: usize = 2;
/// Neutral reframing prefix used on retry to reduce rejection likelihood.
const RETRY_PREFIX: &str = "Analyze this dataset and provide insights: ";
/// Upper bound on tool dispatches within one conversational turn.
const MAX_TOOL_ROUNDS: usize = 12;
/// Map key for the session-less conversation.
const DEFAULT_CHAT: &str = "__default__";

const INSIGHT_KEYWORDS: &[&str] = &["insight", "trend", "shows", "indicates", "analysis"];
const MIN_INSIGHT_LEN: usize = 50;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionLog {
    pub tool_calls: Vec<ToolCallSummary>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolCallSummary {
    pub tool: String,
    pub description: String,
    pub success: bool,
    pub has_result: bool,
    pub has_plot_spec: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Structured answer returned to the calling layer.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResponse {
    pub response: String,
    pub plot_config: Option<Value>,
    pub code: Option<String>,
    pub execution_log: ExecutionLog,
}

impl AgentResponse {
    fn text(message: impl Into<String>) -> Self {
        Self {
            response: message.into(),
            plot_config: None,
            code: None,
            execution_log: ExecutionLog::default(),
        }
    }

    fn diagnostic(message: impl Into<String>, log: ExecutionLog) -> Self {
        Self {
            response: message.into(),
            plot_config: None,
            code: None,
            execution_log: log,
        }
    }
}

/// Explicit dataset binding: the file the sandbox will read, threaded into
/// each conversation instead of living in hidden process-wide state.
#[derive(Debug, Clone)]
pub struct DatasetBinding {
    path: PathBuf,
}

impl DatasetBinding {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        ensure!(path.exists(), "file not found: {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn path_string(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// Dataset pointer for the model: filename, column names, and a single
    /// representative row. Never the full dataset. Read failures degrade to
    /// an inline note so priming can still proceed.
    fn schema_context(&self) -> String {
        match self.read_schema() {
            Ok(ctx) => ctx,
            Err(e) => format!("Error reading file context: {}", e),
        }
    }

    fn read_schema(&self) -> Result<String> {
        let mut rdr = csv::Reader::from_path(&self.path)?;
        let headers = rdr.headers()?.clone();
        let first = rdr.records().next().transpose()?;

        let mut sample = Map::new();
        if let Some(record) = &first {
            for (name, value) in headers.iter().zip(record.iter()) {
                sample.insert(name.to_string(), Value::String(value.to_string()));
            }
        }
        Ok(format!(
            "Filename: {}\nColumns: {}\n\nFirst row sample (schema):\n{}",
            self.path.display(),
            headers.iter().collect::<Vec<_>>().join(", "),
            serde_json::to_string_pretty(&Value::Object(sample))?,
        ))
    }
}

/// Per-session conversation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationPhase {
    /// No model session exists yet.
    Unprimed,
    /// The system instruction is being sent as the opening turn.
    Priming,
    /// Relaying user messages and tool results.
    TurnLoop,
    /// A turn finished and its response was assembled. Only binding a new
    /// dataset resets a conversation back to `Unprimed`.
    Terminal,
}

#[derive(Debug)]
struct ChatState {
    phase: ConversationPhase,
    transcript: Vec<ChatMessage>,
    dataset: DatasetBinding,
}

/// Tool-call arguments as declared in the tool schema.
#[derive(Debug, Deserialize)]
struct ToolArgs {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    filename: String,
}

pub struct AnalystAgent {
    client: Arc<dyn ModelClient>,
    executor: Arc<dyn CodeExecutor>,
    sessions: Option<Arc<SessionStore>>,
    memory: Option<Arc<MemoryBank>>,
    extractor: Option<PreferenceExtractor>,
    opts: ChatOptions,
    dataset: StdMutex<Option<DatasetBinding>>,
    chats: StdMutex<HashMap<String, Arc<AsyncMutex<ChatState>>>>,
}

impl AnalystAgent {
    pub fn new(
        client: Arc<dyn ModelClient>,
        executor: Arc<dyn CodeExecutor>,
        opts: ChatOptions,
        sessions: Option<Arc<SessionStore>>,
        memory: Option<Arc<MemoryBank>>,
    ) -> Self {
        let extractor = memory
            .clone()
            .map(|m| PreferenceExtractor::new(client.clone(), m, opts.clone()));
        Self {
            client,
            executor,
            sessions,
            memory,
            extractor,
            opts,
            dataset: StdMutex::new(None),
            chats: StdMutex::new(HashMap::new()),
        }
    }

    /// Bind a dataset. Resets every primed conversation back to `Unprimed`.
    pub fn bind_dataset(&self, path: impl AsRef<Path>) -> Result<()> {
        let binding = DatasetBinding::new(path)?;
        info!(path = %binding.path().display(), "dataset bound");
        *self.dataset.lock().expect("dataset lock poisoned") = Some(binding);
        self.chats.lock().expect("chat state lock poisoned").clear();
        Ok(())
    }

    pub fn dataset(&self) -> Option<DatasetBinding> {
        self.dataset.lock().expect("dataset lock poisoned").clone()
    }

    /// Phase of an existing, idle conversation. `None` while a turn is in
    /// flight or when the session has never chatted.
    pub fn phase(&self, session_id: Option<&str>) -> Option<ConversationPhase> {
        let chats = self.chats.lock().expect("chat state lock poisoned");
        chats
            .get(session_id.unwrap_or(DEFAULT_CHAT))
            .and_then(|s| s.try_lock().ok().map(|st| st.phase))
    }

    /// First-contact dataset summary routed through the normal chat path.
    pub async fn summarize(&self, session_id: Option<&str>) -> AgentResponse {
        self.chat(
            "Provide a brief summary of this dataset with key statistics and create an appropriate visualization.",
            session_id,
        )
        .await
    }

    /// Answer one user message. Synchronous from the caller's perspective;
    /// independent sessions may run turns concurrently, while tool calls
    /// within one turn are strictly sequential.
    pub async fn chat(&self, user_message: &str, session_id: Option<&str>) -> AgentResponse {
        let Some(binding) = self.dataset() else {
            return AgentResponse::text("Please provide a dataset first to start analyzing data.");
        };

        if let (Some(sid), Some(store)) = (session_id, self.sessions.as_deref()) {
            store.append_message(sid, Role::User, user_message, None);
        }

        let handle = self.chat_state(session_id, &binding);
        let mut state = handle.lock().await;

        let response = self.run_turn(&mut state, user_message).await;

        if let (Some(sid), Some(store)) = (session_id, self.sessions.as_deref()) {
            store.append_message(
                sid,
                Role::Assistant,
                &response.response,
                Some(json!({
                    "has_plot": response.plot_config.is_some(),
                    "has_code": response.code.is_some(),
                })),
            );
            if let Some(memory) = self.memory.as_deref() {
                self.maybe_save_insight(memory, sid, &state.dataset, user_message, &response.response);
            }
        }

        if let Some(extractor) = &self.extractor {
            extractor.extract(user_message, &response.response).await;
        }

        response
    }

    fn chat_state(
        &self,
        session_id: Option<&str>,
        binding: &DatasetBinding,
    ) -> Arc<AsyncMutex<ChatState>> {
        let key = session_id.unwrap_or(DEFAULT_CHAT).to_string();
        let mut chats = self.chats.lock().expect("chat state lock poisoned");
        chats
            .entry(key)
            .or_insert_with(|| {
                Arc::new(AsyncMutex::new(ChatState {
                    phase: ConversationPhase::Unprimed,
                    transcript: Vec::new(),
                    dataset: binding.clone(),
                }))
            })
            .clone()
    }

    async fn run_turn(&self, state: &mut ChatState, user_message: &str) -> AgentResponse {
        let mut log = ExecutionLog::default();

        if state.phase == ConversationPhase::Terminal {
            state.phase = ConversationPhase::TurnLoop;
        }

        // PRIMING: one system instruction per conversation, sent as the
        // opening turn. Rejection here aborts without creating further state.
        if state.phase == ConversationPhase::Unprimed {
            state.phase = ConversationPhase::Priming;
            let instruction = self.system_instruction(&state.dataset);
            state.transcript.push(ChatMessage::new(Role::System, instruction));
            debug!("sending system instruction");
            match self.client.complete(&state.transcript, &self.tool_opts()).await {
                Ok(turn) => {
                    if !turn.content.is_empty() {
                        state.transcript.push(ChatMessage::new(Role::Assistant, turn.content));
                    }
                    state.phase = ConversationPhase::TurnLoop;
                }
                Err(e) => {
                    error!(error = %e, "priming failed");
                    state.transcript.clear();
                    state.phase = ConversationPhase::Unprimed;
                    log.errors.push(format!("priming failed: {}", e));
                    return AgentResponse::diagnostic(
                        "I encountered an error initializing the analysis session. \
                         Please try binding your data again.",
                        log,
                    );
                }
            }
        }

        // Send the user message, retrying rejected turns with a neutral
        // reframing prefix up to the retry budget.
        let mut attempt = 0;
        let mut turn = loop {
            let text = if attempt == 0 {
                user_message.to_string()
            } else {
                format!("{}{}", RETRY_PREFIX, user_message)
            };
            state.transcript.push(ChatMessage::new(Role::User, text));
            match self.client.complete(&state.transcript, &self.tool_opts()).await {
                Ok(turn) => break turn,
                Err(ModelError::Rejected { reason }) => {
                    state.transcript.pop();
                    warn!(attempt, %reason, "model rejected the turn");
                    if attempt >= MAX_RETRIES {
                        log.errors.push(format!(
                            "model rejected the turn after {} attempts: {}",
                            MAX_RETRIES + 1,
                            reason
                        ));
                        log.warnings.push("Consider rephrasing the question".into());
                        return AgentResponse::diagnostic(
                            "I'm having trouble generating a response. This might be due to \
                             content restrictions. Please try rephrasing your question or \
                             asking about specific aspects of the data.",
                            log,
                        );
                    }
                    attempt += 1;
                }
                Err(e) => {
                    state.transcript.pop();
                    error!(error = %e, "model call failed");
                    log.errors.push(format!("unexpected error: {}", e));
                    return AgentResponse::diagnostic(
                        "I encountered an unexpected error. Please try again.",
                        log,
                    );
                }
            }
        };

        // TURN_LOOP: dispatch tool calls sequentially until the model settles
        // on final text.
        let mut final_text = String::new();
        let mut plot_config: Option<Value> = None;
        let mut executed_code: Option<String> = None;
        let mut rounds = 0;

        loop {
            if !turn.finish_reason.is_normal() {
                // Not an exception: a tool call may still be present.
                let note = turn.finish_reason.describe();
                warn!(%note, "model turn finished abnormally");
                log.warnings.push(note);
            }

            if let Some(call) = turn.tool_calls.first().cloned() {
                if rounds >= MAX_TOOL_ROUNDS {
                    warn!(rounds, "tool round budget exhausted");
                    log.warnings
                        .push(format!("stopped after {} tool rounds", MAX_TOOL_ROUNDS));
                    break;
                }
                rounds += 1;

                state.transcript.push(ChatMessage::tool_request(call.clone()));
                let exec_result = self
                    .dispatch(&call, &state.dataset, &mut log, &mut executed_code)
                    .await;

                if exec_result.success {
                    match &exec_result.plot_spec {
                        Some(spec) => plot_config = Some(spec.clone()),
                        None => log.warnings.push(
                            "Code executed successfully but no plot_spec was generated".into(),
                        ),
                    }
                }

                let payload = match serde_json::to_string(&exec_result) {
                    Ok(p) => p,
                    Err(e) => {
                        json!({"success": false, "error": format!("unserializable result: {}", e)})
                            .to_string()
                    }
                };
                state
                    .transcript
                    .push(ChatMessage::tool_response(call.function.name.clone(), payload));

                match self.client.complete(&state.transcript, &self.tool_opts()).await {
                    Ok(next) => turn = next,
                    Err(e) => {
                        error!(error = %e, "model call failed after tool response");
                        log.errors
                            .push(format!("model call failed after tool response: {}", e));
                        break;
                    }
                }
            } else if !turn.content.is_empty() {
                final_text = turn.content.clone();
                state
                    .transcript
                    .push(ChatMessage::new(Role::Assistant, final_text.clone()));
                break;
            } else {
                warn!("model returned an empty turn");
                log.warnings.push("model returned an empty turn".into());
                break;
            }
        }

        state.phase = ConversationPhase::Terminal;
        info!(
            tool_calls = log.tool_calls.len(),
            warnings = log.warnings.len(),
            errors = log.errors.len(),
            has_plot = plot_config.is_some(),
            "turn complete"
        );

        AgentResponse {
            response: if final_text.is_empty() {
                "Analysis complete.".into()
            } else {
                final_text
            },
            plot_config,
            code: executed_code,
            execution_log: log,
        }
    }

    async fn dispatch(
        &self,
        call: &ToolCall,
        dataset: &DatasetBinding,
        log: &mut ExecutionLog,
        executed_code: &mut Option<String>,
    ) -> ExecutionResult {
        let name = call.function.name.as_str();
        if name != EXECUTE_TOOL {
            // Answer with a failed result so the model can recover.
            warn!(tool = name, "model requested an unknown tool");
            let result = tool_error(format!("unknown tool: {}", name));
            log.tool_calls.push(summarize_call(name, String::new(), &result));
            return result;
        }

        let args: ToolArgs = match serde_json::from_str(&call.function.arguments) {
            Ok(args) => args,
            Err(e) => {
                warn!(error = %e, "tool call carried invalid arguments");
                let result = tool_error(format!("invalid tool arguments: {}", e));
                log.tool_calls.push(summarize_call(name, String::new(), &result));
                return result;
            }
        };

        // Missing filename falls back to the bound dataset.
        let filename = if args.filename.is_empty() {
            dataset.path_string()
        } else {
            args.filename.clone()
        };
        *executed_code = Some(args.code.clone());

        let result = self
            .executor
            .execute(&args.code, &args.description, &filename)
            .await;
        log.tool_calls
            .push(summarize_call(name, args.description, &result));
        result
    }

    fn tool_opts(&self) -> ChatOptions {
        let mut opts = self.opts.clone();
        opts.tools = Some(vec![execute_tool_schema()]);
        opts.tool_choice = Some("auto".into());
        opts
    }

    fn system_instruction(&self, dataset: &DatasetBinding) -> String {
        let context = dataset.schema_context();
        let preferences = self.preference_context();
        format!(
            "You are an expert data analytics agent.\n\n\
             Dataset pointer:\n{context}\n{preferences}\n\
             You only see the filename, the column names, and one sample row. To answer any \
             question about the data you MUST write Python code and run it with the \
             {tool} tool. Your code must start by reading the file: \
             df = pd.read_csv(filename). pd (pandas) and json are already imported.\n\n\
             Every execution must set a `result` variable holding the computed answer and a \
             `plot_spec` variable holding a Plotly figure specification (an object with \
             \"data\" traces and a \"layout\"). Use template \"plotly_dark\", give the chart \
             a title and descriptive axis titles, and prefer 2D charts unless three or more \
             dimensions are needed. After the tool returns, explain the findings clearly. \
             If the user asks about their favorites or preferences, consult the USER \
             PREFERENCES section above.",
            context = context,
            preferences = preferences,
            tool = EXECUTE_TOOL,
        )
    }

    fn preference_context(&self) -> String {
        let Some(memory) = self.memory.as_deref() else {
            return String::new();
        };
        let prefs = memory.list(Some("user_preference"), 20, MemorySortKey::CreatedAt);
        if prefs.is_empty() {
            return String::new();
        }
        let mut lines = vec!["\n=== USER PREFERENCES (from memory) ===".to_string()];
        for pref in prefs {
            lines.push(format!("- {}", pref.content));
        }
        lines.push("=== END USER PREFERENCES ===\n".to_string());
        lines.join("\n")
    }

    /// Keyword heuristic for auto-saving informative answers.
    fn maybe_save_insight(
        &self,
        memory: &MemoryBank,
        session_id: &str,
        dataset: &DatasetBinding,
        user_message: &str,
        final_text: &str,
    ) {
        if final_text.len() <= MIN_INSIGHT_LEN {
            return;
        }
        let lower = final_text.to_lowercase();
        if !INSIGHT_KEYWORDS.iter().any(|k| lower.contains(k)) {
            return;
        }
        let mut meta = Map::new();
        meta.insert("session_id".into(), json!(session_id));
        meta.insert("dataset".into(), json!(dataset.path_string()));
        meta.insert("user_question".into(), json!(excerpt(user_message, 200)));
        let id = memory.add(excerpt(final_text, 500), "insight", Some(meta));
        debug!(%id, "saved insight memory");
    }
}

/// Schema for the single declared tool, as sent to the model.
pub fn execute_tool_schema() -> ToolSchema {
    ToolSchema {
        r#type: "function".into(),
        function: FunctionSchema {
            name: EXECUTE_TOOL.into(),
            description: Some(
                "Execute Python code for data analysis and visualization. Read the dataset \
                 with pd.read_csv(filename), set `result` to the computed answer and \
                 `plot_spec` to a Plotly figure specification."
                    .into(),
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "Python code to execute. Must read the file, compute result, and create plot_spec."
                    },
                    "description": {
                        "type": "string",
                        "description": "Brief description of what this code does"
                    },
                    "filename": {
                        "type": "string",
                        "description": "Absolute path to the tabular file to analyze."
                    }
                },
                "required": ["code", "description", "filename"]
            }),
        },
    }
}

fn tool_error(message: String) -> ExecutionResult {
    ExecutionResult {
        success: false,
        result: None,
        plot_spec: None,
        stdout: String::new(),
        error: Some(message),
        error_kind: None,
    }
}

fn summarize_call(tool: &str, description: String, result: &ExecutionResult) -> ToolCallSummary {
    ToolCallSummary {
        tool: tool.to_string(),
        description,
        success: result.success,
        has_result: result.result.is_some(),
        has_plot_spec: result.plot_spec.is_some(),
        error: result.error.clone(),
    }
}

/// Char-safe prefix, used when embedding free text into prompts and metadata.
pub(crate) fn excerpt(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}
