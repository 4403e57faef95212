use crate::error::AppError;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

pub const DEFAULT_HOST: &str = "http://127.0.0.1:11434";

const TAGS_TIMEOUT: Duration = Duration::from_secs(15);
const CHAT_TIMEOUT: Duration = Duration::from_secs(300);

/// Identifies one in-flight chat request so late events can be matched or dropped.
pub type RequestId = u64;

// --- Ollama API Structures ---

/// The `think` request parameter. Most models take a flag; gpt-oss takes a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ThinkMode {
    Off,
    On,
    Low,
    Medium,
    High,
}

impl Serialize for ThinkMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ThinkMode::Off => serializer.serialize_bool(false),
            ThinkMode::On => serializer.serialize_bool(true),
            ThinkMode::Low => serializer.serialize_str("low"),
            ThinkMode::Medium => serializer.serialize_str("medium"),
            ThinkMode::High => serializer.serialize_str("high"),
        }
    }
}

fn uses_think_levels(model: &str) -> bool {
    model.starts_with("gpt-oss")
}

/// The thinking settings offered for `model`. `None` means the parameter is omitted.
pub fn think_choices(model: &str) -> &'static [Option<ThinkMode>] {
    if uses_think_levels(model) {
        &[None, Some(ThinkMode::Low), Some(ThinkMode::Medium), Some(ThinkMode::High)]
    } else {
        &[Some(ThinkMode::On), Some(ThinkMode::Off)]
    }
}

pub fn default_think(model: &str) -> Option<ThinkMode> {
    if uses_think_levels(model) {
        None
    } else {
        Some(ThinkMode::Off)
    }
}

pub fn think_label(think: Option<ThinkMode>) -> &'static str {
    match think {
        None => "None",
        Some(ThinkMode::Off) => "No thinking",
        Some(ThinkMode::On) => "Thinking",
        Some(ThinkMode::Low) => "Low",
        Some(ThinkMode::Medium) => "Medium",
        Some(ThinkMode::High) => "High",
    }
}

/// Whether thinking output should be shown for this setting.
pub fn shows_thinking(think: Option<ThinkMode>) -> bool {
    !matches!(think, None | Some(ThinkMode::Off))
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl GenerationOptions {
    pub fn is_empty(&self) -> bool {
        *self == GenerationOptions::default()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub think: Option<ThinkMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<GenerationOptions>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub logprobs: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_logprobs: Option<u32>,
}

impl ChatRequest {
    /// Builds a streaming request. A non-empty `system` prompt goes first as a
    /// system message; empty options are omitted.
    pub fn new(
        model: &str,
        system: Option<&str>,
        history: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Self {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(system) = system.map(str::trim).filter(|s| !s.is_empty()) {
            messages.push(ChatMessage::new(Role::System, system));
        }
        messages.extend_from_slice(history);
        Self {
            model: model.to_string(),
            messages,
            stream: true,
            think: None,
            options: (!options.is_empty()).then(|| options.clone()),
            logprobs: false,
            top_logprobs: None,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct ChunkMessage {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub thinking: String,
}

/// Timing and token counts reported with the final chunk. Durations are nanoseconds.
#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GenerationStats {
    #[serde(default)]
    pub total_duration: u64,
    #[serde(default)]
    pub load_duration: u64,
    #[serde(default)]
    pub prompt_eval_count: u64,
    #[serde(default)]
    pub prompt_eval_duration: u64,
    #[serde(default)]
    pub eval_count: u64,
    #[serde(default)]
    pub eval_duration: u64,
}

impl GenerationStats {
    pub fn summary(&self) -> String {
        let secs = |ns: u64| ns as f64 / 1e9;
        format!(
            "Total: {:.2}s | Load: {:.2}s | Prompt: {} tokens ({:.2}s) | Eval: {} tokens ({:.2}s)",
            secs(self.total_duration),
            secs(self.load_duration),
            self.prompt_eval_count,
            secs(self.prompt_eval_duration),
            self.eval_count,
            secs(self.eval_duration),
        )
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct ChatChunk {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub message: Option<ChunkMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub logprobs: Option<Vec<Value>>,
    #[serde(flatten)]
    pub stats: GenerationStats,
}

#[derive(Deserialize, Debug)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Deserialize, Debug, Clone)]
struct ModelInfo {
    name: String,
}

/// One row per logprob entry; entries that aren't `{token, logprob}` objects are shown as JSON.
pub fn format_logprobs(entries: &[Value]) -> String {
    let mut out = String::new();
    for entry in entries {
        let token = entry.get("token").and_then(Value::as_str);
        let logprob = entry.get("logprob").and_then(Value::as_f64);
        match (token, logprob) {
            (Some(token), Some(logprob)) => {
                let quoted = format!("{token:?}");
                out.push_str(&format!("Token: {quoted:<15} Logprob: {logprob:.4}\n"));
            }
            _ => {
                out.push_str(&entry.to_string());
                out.push('\n');
            }
        }
    }
    out
}

// --- Events for Async Communication ---
#[derive(Debug)]
pub enum AppEvent {
    ModelsFetched(Result<Vec<String>, AppError>),
    Thinking { request: RequestId, text: String },
    Chunk { request: RequestId, text: String },
    Logprobs { request: RequestId, text: String },
    Stats { request: RequestId, stats: GenerationStats },
    Error { request: RequestId, message: String },
    Done { request: RequestId },
}

/// Splits a byte stream into lines, holding back an unfinished trailing line.
///
/// Works on bytes so a multi-byte character split across network chunks is
/// reassembled before decoding.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn push(&mut self, chunk: &Bytes) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            let line = String::from_utf8_lossy(&line).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.buffer).trim().to_string();
        self.buffer.clear();
        (!rest.is_empty()).then_some(rest)
    }
}

async fn send(event_sender: &mpsc::Sender<AppEvent>, event: AppEvent) -> Result<(), AppError> {
    event_sender
        .send(event)
        .await
        .map_err(|e| AppError::ChannelSend(e.to_string()))
}

// --- Async Ollama API Functions ---
pub async fn fetch_models(client: Client, host: &str) -> Result<Vec<String>, AppError> {
    let url = format!("{}/api/tags", host.trim_end_matches('/'));
    let response = client.get(&url).timeout(TAGS_TIMEOUT).send().await?;

    if response.status().is_success() {
        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    } else {
        let status = response.status();
        let err_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error body".to_string());
        Err(AppError::ApiResponse(format!("Status {} - {}", status, err_text)))
    }
}

/// Forwards one decoded line. Returns true once the server reports completion.
async fn forward_line(
    line: &str,
    request: RequestId,
    event_sender: &mpsc::Sender<AppEvent>,
) -> Result<bool, AppError> {
    let chunk = match serde_json::from_str::<ChatChunk>(line) {
        Ok(chunk) => chunk,
        Err(e) => {
            // Undecodable lines are skipped; the stream carries on.
            tracing::warn!("JSON decode error '{}' on line: '{}'", e, line);
            return Ok(false);
        }
    };

    if let Some(message) = chunk.error {
        send(event_sender, AppEvent::Error { request, message }).await?;
        return Ok(true);
    }

    if let Some(message) = chunk.message {
        if !message.thinking.is_empty() {
            send(event_sender, AppEvent::Thinking { request, text: message.thinking }).await?;
        }
        if !message.content.is_empty() {
            send(event_sender, AppEvent::Chunk { request, text: message.content }).await?;
        }
    }

    if let Some(entries) = chunk.logprobs.filter(|entries| !entries.is_empty()) {
        let text = format_logprobs(&entries);
        send(event_sender, AppEvent::Logprobs { request, text }).await?;
    }

    if chunk.done {
        send(event_sender, AppEvent::Stats { request, stats: chunk.stats }).await?;
    }
    Ok(chunk.done)
}

/// Streams a chat completion, reporting everything through `event_sender`.
///
/// Server and transport failures become `AppEvent::Error`; a `Done` event is
/// always sent last. Only a closed channel is returned as an error.
pub async fn stream_chat(
    client: Client,
    host: String,
    request: RequestId,
    body: ChatRequest,
    event_sender: mpsc::Sender<AppEvent>,
) -> Result<(), AppError> {
    let result = stream_chat_inner(&client, &host, request, &body, &event_sender).await;
    if let Err(err) = &result {
        tracing::error!(request, "chat stream failed: {err}");
        if !matches!(err, AppError::ChannelSend(_)) {
            let _ = event_sender
                .send(AppEvent::Error { request, message: err.to_string() })
                .await;
        }
    }
    send(&event_sender, AppEvent::Done { request }).await?;
    match result {
        Err(err @ AppError::ChannelSend(_)) => Err(err),
        _ => Ok(()),
    }
}

async fn stream_chat_inner(
    client: &Client,
    host: &str,
    request: RequestId,
    body: &ChatRequest,
    event_sender: &mpsc::Sender<AppEvent>,
) -> Result<(), AppError> {
    let url = format!("{}/api/chat", host.trim_end_matches('/'));
    tracing::info!(request, model = %body.model, messages = body.messages.len(), "sending chat request");

    let response = client
        .post(&url)
        .json(body)
        .timeout(CHAT_TIMEOUT)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let err_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error body".to_string());
        return Err(AppError::ApiResponse(format!("Status {} - {}", status, err_text)));
    }

    let mut stream = response.bytes_stream();
    let mut decoder = LineDecoder::default();

    while let Some(item) = stream.next().await {
        let bytes = item?;
        for line in decoder.push(&bytes) {
            if forward_line(&line, request, event_sender).await? {
                return Ok(());
            }
        }
    }

    if let Some(line) = decoder.finish() {
        forward_line(&line, request, event_sender).await?;
    }
    Ok(())
}
