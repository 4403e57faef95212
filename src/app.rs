use crate::config::Cli;
use crate::markdown::markup::quick_markup;
use crate::markdown::session::DEFAULT_RENDER_INTERVAL;
use crate::markdown::styled::markup_to_lines;
use crate::markdown::{RenderThrottle, ResponseSession, SharedSession, Widget};
use crate::ollama::{
    self, AppEvent, ChatMessage, ChatRequest, GenerationOptions, GenerationStats, RequestId, Role,
    ThinkMode,
};
use crate::storage::{Chat, ChatStorage};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::style::Style;
use ratatui::text::Line;
use reqwest::Client;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Longest the event loop waits for input when no render is pending.
pub const IDLE_POLL: Duration = Duration::from_millis(50);

const PAGE: u16 = 10;
const CODE_SCROLL_STEP: isize = 3;

/// Startup settings, resolved from the command line.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub model: Option<String>,
    pub system: Option<String>,
    pub think: Option<ThinkMode>,
    pub options: GenerationOptions,
    pub logprobs: bool,
    pub top_logprobs: Option<u32>,
    pub show_stats: bool,
    pub render_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: ollama::DEFAULT_HOST.to_string(),
            model: None,
            system: None,
            think: None,
            options: GenerationOptions::default(),
            logprobs: false,
            top_logprobs: None,
            show_stats: false,
            render_interval: DEFAULT_RENDER_INTERVAL,
        }
    }
}

impl From<&Cli> for Settings {
    fn from(cli: &Cli) -> Self {
        Self {
            host: cli.host.clone(),
            model: cli.model.clone(),
            system: cli.system.clone(),
            think: cli.think,
            options: cli.generation_options(),
            logprobs: cli.wants_logprobs(),
            top_logprobs: cli.top_logprobs,
            show_stats: cli.stats,
            render_interval: cli.render_interval(),
        }
    }
}

// --- Application State ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

/// A sent prompt, rendered once with the lightweight markup pass.
#[derive(Debug)]
pub struct UserTurn {
    pub text: String,
    pub lines: Vec<Line<'static>>,
}

impl UserTurn {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            lines: markup_to_lines(&quick_markup(text), Style::default()),
        }
    }
}

#[derive(Debug)]
pub struct AssistantTurn {
    pub model: String,
    pub session: SharedSession,
    /// Set while the response is still streaming.
    pub request: Option<RequestId>,
    pub show_thinking: bool,
    pub thinking: String,
    pub thinking_expanded: bool,
    pub stats: Option<GenerationStats>,
    pub logprobs: String,
}

impl AssistantTurn {
    fn streaming(model: &str, request: RequestId, show_thinking: bool) -> Self {
        Self {
            model: model.to_string(),
            session: Rc::new(RefCell::new(ResponseSession::new())),
            request: Some(request),
            show_thinking,
            thinking: String::new(),
            thinking_expanded: true,
            stats: None,
            logprobs: String::new(),
        }
    }

    fn restored(model: &str, text: &str) -> Self {
        Self {
            model: model.to_string(),
            session: Rc::new(RefCell::new(ResponseSession::from_text(text))),
            request: None,
            show_thinking: false,
            thinking: String::new(),
            thinking_expanded: false,
            stats: None,
            logprobs: String::new(),
        }
    }
}

#[derive(Debug)]
pub enum Entry {
    User(UserTurn),
    Assistant(AssistantTurn),
    System(String),
}

fn find_turn(entries: &mut [Entry], request: RequestId) -> Option<&mut AssistantTurn> {
    entries.iter_mut().rev().find_map(|entry| match entry {
        Entry::Assistant(turn) if turn.request == Some(request) => Some(turn),
        _ => None,
    })
}

pub struct App {
    pub settings: Settings,
    pub input_mode: InputMode,
    pub input_buffer: String,
    pub entries: Vec<Entry>,
    pub models: Vec<String>,
    pub selected_model_index: Option<usize>,
    pub think: Option<ThinkMode>,
    pub is_loading: bool,
    pub status_message: String,
    /// Lines scrolled up from the bottom of the conversation.
    pub scroll_from_bottom: u16,
    /// Index of the focused code view, counted across the whole conversation.
    pub focused_code: Option<usize>,
    pub chat: Chat,
    pub storage: ChatStorage,
    throttle: RenderThrottle,
    next_request: RequestId,
    active_request: Option<RequestId>,
    http_client: Client,
    event_receiver: mpsc::Receiver<AppEvent>,
    event_sender: mpsc::Sender<AppEvent>,
}

impl App {
    pub fn new(
        settings: Settings,
        storage: ChatStorage,
        rx: mpsc::Receiver<AppEvent>,
        tx: mpsc::Sender<AppEvent>,
    ) -> Self {
        let mut chat = storage.create_chat();
        chat.options = settings.options.clone();
        chat.system = settings.system.clone().unwrap_or_default();
        App {
            throttle: RenderThrottle::new(settings.render_interval),
            settings,
            input_mode: InputMode::Normal,
            input_buffer: String::new(),
            entries: Vec::new(),
            models: Vec::new(),
            selected_model_index: None,
            think: None,
            is_loading: false,
            status_message: "Fetching models...".to_string(),
            scroll_from_bottom: 0,
            focused_code: None,
            chat,
            storage,
            next_request: 1,
            active_request: None,
            http_client: Client::new(),
            event_receiver: rx,
            event_sender: tx,
        }
    }

    pub fn get_selected_model_name(&self) -> Option<&str> {
        self.selected_model_index
            .and_then(|index| self.models.get(index))
            .map(String::as_str)
    }

    fn resolve_think(&self, model: &str) -> Option<ThinkMode> {
        match self.settings.think {
            Some(think) if ollama::think_choices(model).contains(&Some(think)) => Some(think),
            _ => ollama::default_think(model),
        }
    }

    pub fn select_model(&mut self, index: usize) {
        let Some(model) = self.models.get(index) else {
            return;
        };
        self.think = self.resolve_think(model);
        self.selected_model_index = Some(index);
    }

    fn select_model_named(&mut self, name: &str) -> bool {
        match self.models.iter().position(|m| m == name) {
            Some(index) => {
                self.select_model(index);
                true
            }
            None => false,
        }
    }

    pub fn set_models(&mut self, models: Vec<String>) {
        self.models = models;
        self.selected_model_index = None;
        if self.models.is_empty() {
            self.status_message = "No models found on Ollama server.".to_string();
            return;
        }
        let preferred = self.chat.model.clone().or_else(|| self.settings.model.clone());
        if !preferred.is_some_and(|name| self.select_model_named(&name)) {
            self.select_model(0);
        }
        self.status_message = format!(
            "{} models loaded. Select: j/k, Chat: Enter (then Ctrl+S to send)",
            self.models.len()
        );
    }

    pub fn next_model(&mut self) {
        if self.models.is_empty() {
            return;
        }
        let i = self.selected_model_index.unwrap_or(0);
        let next = if i >= self.models.len() - 1 { 0 } else { i + 1 };
        self.select_model(next);
    }

    pub fn previous_model(&mut self) {
        if self.models.is_empty() {
            return;
        }
        let i = self.selected_model_index.unwrap_or(0);
        let prev = if i == 0 { self.models.len() - 1 } else { i - 1 };
        self.select_model(prev);
    }

    pub fn cycle_think(&mut self) {
        let Some(model) = self.get_selected_model_name() else {
            return;
        };
        let choices = ollama::think_choices(model);
        let pos = choices.iter().position(|c| *c == self.think).unwrap_or(0);
        self.think = choices[(pos + 1) % choices.len()];
        self.status_message = format!("Thinking: {}", ollama::think_label(self.think));
    }

    /// Records the prompt and opens a streaming response for it.
    ///
    /// Returns the request to send, or `None` (with a status message) when
    /// nothing can be sent right now.
    pub fn start_turn(&mut self) -> Option<(RequestId, ChatRequest)> {
        if self.is_loading {
            self.status_message = "Wait for the current response to finish.".to_string();
            return None;
        }
        let Some(model) = self.get_selected_model_name().map(str::to_string) else {
            self.status_message = "Error: No model selected.".to_string();
            return None;
        };
        let prompt = self.input_buffer.trim().to_string();
        if prompt.is_empty() {
            self.status_message = "Cannot send an empty prompt.".to_string();
            return None;
        }
        self.input_buffer.clear();

        self.entries.push(Entry::User(UserTurn::new(&prompt)));
        self.chat.messages.push(ChatMessage::new(Role::User, prompt));
        self.chat.model = Some(model.clone());

        let request = self.next_request;
        self.next_request += 1;
        self.entries.push(Entry::Assistant(AssistantTurn::streaming(
            &model,
            request,
            ollama::shows_thinking(self.think),
        )));

        let mut body = ChatRequest::new(
            &model,
            Some(self.chat.system.as_str()),
            &self.chat.messages,
            &self.chat.options,
        );
        body.think = self.think;
        body.logprobs = self.settings.logprobs;
        body.top_logprobs = self.settings.top_logprobs;

        self.active_request = Some(request);
        self.is_loading = true;
        self.scroll_from_bottom = 0;
        self.status_message = format!("Asking {}...", model);
        Some((request, body))
    }

    pub fn submit_prompt(&mut self) {
        if let Some((request, body)) = self.start_turn() {
            let client = self.http_client.clone();
            let host = self.settings.host.clone();
            let event_sender = self.event_sender.clone();
            tokio::spawn(async move {
                // Failures are reported through events; only a closed channel lands here.
                if let Err(e) = ollama::stream_chat(client, host, request, body, event_sender).await {
                    tracing::warn!(request, "response dropped: {e}");
                }
            });
        }
        self.input_mode = InputMode::Normal;
    }

    pub fn spawn_fetch_models(&self) {
        let client = self.http_client.clone();
        let host = self.settings.host.clone();
        let event_sender = self.event_sender.clone();
        tokio::spawn(async move {
            let models_result = ollama::fetch_models(client, &host).await;
            if event_sender
                .send(AppEvent::ModelsFetched(models_result))
                .await
                .is_err()
            {
                tracing::error!("failed to send fetched models back to main loop");
            }
        });
    }

    /// Takes the next async event, if one is waiting.
    pub fn try_next_event(&mut self) -> Result<Option<AppEvent>, mpsc::error::TryRecvError> {
        match self.event_receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn handle_event(&mut self, app_event: AppEvent) {
        match app_event {
            AppEvent::ModelsFetched(Ok(models)) => self.set_models(models),
            AppEvent::ModelsFetched(Err(e)) => {
                self.status_message = format!("Error fetching models: {}", e);
                self.entries
                    .push(Entry::System(format!("Failed to fetch models: {}", e)));
            }
            AppEvent::Thinking { request, text } => match find_turn(&mut self.entries, request) {
                Some(turn) => turn.thinking.push_str(&text),
                None => tracing::debug!(request, "dropping thinking for a closed response"),
            },
            AppEvent::Chunk { request, text } => match find_turn(&mut self.entries, request) {
                Some(turn) => self.throttle.append(&turn.session, &text, Instant::now()),
                None => tracing::debug!(request, "dropping chunk for a closed response"),
            },
            AppEvent::Logprobs { request, text } => {
                if let Some(turn) = find_turn(&mut self.entries, request) {
                    turn.logprobs.push_str(&text);
                }
            }
            AppEvent::Stats { request, stats } => {
                if let Some(turn) = find_turn(&mut self.entries, request) {
                    tracing::info!(request, "{}", stats.summary());
                    turn.stats = Some(stats);
                }
            }
            AppEvent::Error { request, message } => {
                if find_turn(&mut self.entries, request).is_some() {
                    self.status_message = format!("Error occurred: {}", message);
                    self.entries.push(Entry::System(message));
                }
            }
            AppEvent::Done { request } => self.finish_turn(request),
        }
    }

    fn finish_turn(&mut self, request: RequestId) {
        if self.active_request == Some(request) {
            self.active_request = None;
            self.is_loading = false;
        }
        let Some(turn) = find_turn(&mut self.entries, request) else {
            tracing::debug!(request, "response finished after its chat was closed");
            return;
        };
        turn.request = None;
        turn.thinking_expanded = false;
        let text = {
            let mut session = turn.session.borrow_mut();
            session.finalize();
            session.text().to_string()
        };
        if text.trim().is_empty() {
            // No answer: drop the prompt so the next request doesn't carry two user turns.
            if self.chat.messages.last().is_some_and(|m| m.role == Role::User) {
                self.chat.messages.pop();
            }
            return;
        }
        self.chat
            .messages
            .push(ChatMessage::new(Role::Assistant, text));
        self.persist();
        if !self.status_message.starts_with("Error") {
            self.status_message =
                "Response received. Press 'Enter' to type (Ctrl+S to send).".to_string();
        }
    }

    fn persist(&mut self) {
        if let Err(e) = self.storage.save_chat(self.chat.clone()) {
            tracing::error!("failed to save chat: {e}");
            self.status_message = format!("Error saving history: {}", e);
            return;
        }
        if let Some(stored) = self.storage.get_chat(&self.chat.id) {
            self.chat = stored.clone();
        }
    }

    /// Runs the renders that have come due. Returns how many ran.
    pub fn tick(&mut self, now: Instant) -> usize {
        self.throttle.run_due(now)
    }

    /// How long the event loop may block before the next render is due.
    pub fn poll_timeout(&self, now: Instant) -> Duration {
        self.throttle
            .next_deadline()
            .map(|due| due.saturating_duration_since(now))
            .unwrap_or(IDLE_POLL)
            .min(IDLE_POLL)
    }

    fn reset_conversation(&mut self) {
        // Dropping the turns closes their sessions; queued renders for them become no-ops.
        self.entries.clear();
        self.active_request = None;
        self.is_loading = false;
        self.focused_code = None;
        self.scroll_from_bottom = 0;
    }

    pub fn new_chat(&mut self) {
        self.reset_conversation();
        let mut chat = self.storage.create_chat();
        chat.options = self.settings.options.clone();
        chat.system = self.settings.system.clone().unwrap_or_default();
        self.chat = chat;
        self.status_message = "New chat.".to_string();
    }

    pub fn load_chat(&mut self, chat: Chat) {
        self.reset_conversation();
        let model = chat.model.clone().unwrap_or_else(|| "Model".to_string());
        for message in &chat.messages {
            match message.role {
                Role::User => self.entries.push(Entry::User(UserTurn::new(&message.content))),
                Role::Assistant => self.entries.push(Entry::Assistant(AssistantTurn::restored(
                    &model,
                    &message.content,
                ))),
                Role::System => self.entries.push(Entry::System(message.content.clone())),
            }
        }
        if let Some(name) = &chat.model {
            self.select_model_named(name);
        }
        self.status_message = format!("Opened \"{}\".", chat.title);
        self.chat = chat;
    }

    /// Steps through saved chats, newest first. Stepping newer past the first opens a new chat.
    pub fn cycle_history(&mut self, older: bool) {
        let chats = self.storage.all_chats();
        let count = chats.len();
        if count == 0 {
            self.status_message = "No saved chats.".to_string();
            return;
        }
        let current = chats.iter().position(|c| c.id == self.chat.id);
        let next = match (current, older) {
            (None, true) => Some(0),
            (None, false) => return,
            (Some(i), true) => Some((i + 1).min(count - 1)),
            (Some(0), false) => None,
            (Some(i), false) => Some(i - 1),
        };
        match next {
            Some(index) => {
                let chat = self.storage.all_chats()[index].clone();
                self.load_chat(chat);
            }
            None => self.new_chat(),
        }
    }

    pub fn delete_current_chat(&mut self) {
        let id = self.chat.id.clone();
        match self.storage.delete_chat(&id) {
            Ok(true) => {
                self.new_chat();
                self.status_message = "Chat deleted.".to_string();
            }
            Ok(false) => self.status_message = "This chat has not been saved.".to_string(),
            Err(e) => {
                tracing::error!("failed to delete chat: {e}");
                self.status_message = format!("Error deleting chat: {}", e);
            }
        }
    }

    /// Uses the prompt editor's text as the current chat's title.
    pub fn rename_chat(&mut self) {
        let title = self.input_buffer.trim().to_string();
        if title.is_empty() {
            self.status_message = "Type a title first, then Ctrl+T.".to_string();
            return;
        }
        self.input_buffer.clear();
        self.input_mode = InputMode::Normal;
        self.chat.title = title.clone();
        if let Err(e) = self.storage.update_title(&self.chat.id, &title) {
            tracing::error!("failed to rename chat: {e}");
            self.status_message = format!("Error renaming chat: {}", e);
            return;
        }
        self.status_message = format!("Renamed to \"{}\".", title);
    }

    pub fn toggle_thinking(&mut self) {
        let last = self.entries.iter_mut().rev().find_map(|entry| match entry {
            Entry::Assistant(turn) if !turn.thinking.is_empty() => Some(turn),
            _ => None,
        });
        if let Some(turn) = last {
            turn.thinking_expanded = !turn.thinking_expanded;
        }
    }

    pub fn code_view_count(&self) -> usize {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                Entry::Assistant(turn) => Some(
                    turn.session
                        .borrow()
                        .view()
                        .widgets()
                        .iter()
                        .filter(|w| matches!(w, Widget::Code(_)))
                        .count(),
                ),
                _ => None,
            })
            .sum()
    }

    pub fn cycle_code_focus(&mut self) {
        let count = self.code_view_count();
        self.focused_code = match (count, self.focused_code) {
            (0, _) => None,
            (_, None) => Some(count - 1),
            (_, Some(i)) if i + 1 < count => Some(i + 1),
            (_, Some(_)) => Some(0),
        };
    }

    pub fn scroll_focused_code(&mut self, delta: isize) {
        let Some(target) = self.focused_code else {
            return;
        };
        let mut seen = 0;
        for entry in &self.entries {
            let Entry::Assistant(turn) = entry else {
                continue;
            };
            let mut session = turn.session.borrow_mut();
            for widget in session.view_mut().widgets_mut() {
                if let Widget::Code(view) = widget {
                    if seen == target {
                        view.scroll_by(delta);
                        return;
                    }
                    seen += 1;
                }
            }
        }
    }

    fn scroll_up(&mut self, amount: u16) {
        self.scroll_from_bottom = self.scroll_from_bottom.saturating_add(amount);
    }

    fn scroll_down(&mut self, amount: u16) {
        self.scroll_from_bottom = self.scroll_from_bottom.saturating_sub(amount);
    }

    /// Applies a key press. Returns true when the app should quit.
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        match self.input_mode {
            InputMode::Normal => match key.code {
                KeyCode::Char('q') => return true,
                KeyCode::Char('j') | KeyCode::Down => self.next_model(),
                KeyCode::Char('k') | KeyCode::Up => self.previous_model(),
                KeyCode::Enter => {
                    if self.selected_model_index.is_some() {
                        self.input_mode = InputMode::Editing;
                        self.status_message =
                            "Editing prompt... Enter: Newline, Ctrl+S: Send, Esc: Cancel."
                                .to_string();
                    } else {
                        self.status_message =
                            "Select a model first (Up/Down keys).".to_string();
                    }
                }
                KeyCode::Char('n') => self.new_chat(),
                KeyCode::Char('h') => self.cycle_history(true),
                KeyCode::Char('l') => self.cycle_history(false),
                KeyCode::Char('d') => self.delete_current_chat(),
                KeyCode::Char('t') => self.toggle_thinking(),
                KeyCode::Char('m') => self.cycle_think(),
                KeyCode::Char('r') => {
                    self.status_message = "Fetching models...".to_string();
                    self.spawn_fetch_models();
                }
                KeyCode::Tab => self.cycle_code_focus(),
                KeyCode::Char('J') => self.scroll_focused_code(CODE_SCROLL_STEP),
                KeyCode::Char('K') => self.scroll_focused_code(-CODE_SCROLL_STEP),
                KeyCode::PageDown => self.scroll_down(PAGE),
                KeyCode::PageUp => self.scroll_up(PAGE),
                KeyCode::End => self.scroll_from_bottom = 0,
                _ => {}
            },
            InputMode::Editing => match (key.code, key.modifiers) {
                (KeyCode::Char('s'), KeyModifiers::CONTROL) => self.submit_prompt(),
                (KeyCode::Char('t'), KeyModifiers::CONTROL) => self.rename_chat(),
                (KeyCode::Enter, _) => self.input_buffer.push('\n'),
                (KeyCode::Char(c), modifier)
                    if modifier == KeyModifiers::NONE || modifier == KeyModifiers::SHIFT =>
                {
                    self.input_buffer.push(c);
                }
                (KeyCode::Backspace, _) => {
                    self.input_buffer.pop();
                }
                (KeyCode::Esc, _) => {
                    self.input_mode = InputMode::Normal;
                    self.input_buffer.clear();
                    self.status_message =
                        "Input cancelled. Press 'Enter' to start typing again.".to_string();
                }
                _ => {}
            },
        }
        false
    }
}
