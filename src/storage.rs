//! Chat history persisted as a single JSON map of chat id to chat.

use crate::error::AppError;
use crate::ollama::{ChatMessage, GenerationOptions, Role};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_TITLE: &str = "New Chat";
const TITLE_MAX_CHARS: usize = 30;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Chat {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub options: GenerationOptions,
    #[serde(default)]
    pub system: String,
}

impl Chat {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: DEFAULT_TITLE.to_string(),
            created_at: now,
            updated_at: now,
            model: None,
            messages: Vec::new(),
            options: GenerationOptions::default(),
            system: String::new(),
        }
    }
}

/// Title derived from the first line of the first user message.
pub fn auto_title(messages: &[ChatMessage]) -> Option<String> {
    let first = messages.iter().find(|m| m.role == Role::User)?;
    let line = first.content.trim().lines().next()?.trim();
    if line.is_empty() {
        return None;
    }
    let mut title: String = line.chars().take(TITLE_MAX_CHARS).collect();
    if line.chars().count() > TITLE_MAX_CHARS {
        title.push_str("...");
    }
    Some(title)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), AppError> {
    let io_err = |source| AppError::History {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let tmp_path = path.with_extension("tmp");
    let file = std::fs::File::create(&tmp_path).map_err(io_err)?;
    let mut writer = std::io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush().map_err(io_err)?;
    std::fs::rename(&tmp_path, path).map_err(io_err)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, AppError> {
    let data = std::fs::read_to_string(path).map_err(|source| AppError::History {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&data)?)
}

#[derive(Debug)]
pub struct ChatStorage {
    path: PathBuf,
    chats: BTreeMap<String, Chat>,
}

impl ChatStorage {
    /// Loads history from `path`. A missing or unreadable file starts an empty history.
    pub fn open(path: PathBuf) -> Self {
        let chats: BTreeMap<String, Chat> = if path.exists() {
            read_json(&path).unwrap_or_else(|err| {
                tracing::warn!("ignoring unreadable chat history: {err}");
                BTreeMap::new()
            })
        } else {
            BTreeMap::new()
        };
        tracing::debug!(path = %path.display(), chats = chats.len(), "chat history loaded");
        Self { path, chats }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All stored chats, most recently updated first.
    pub fn all_chats(&self) -> Vec<&Chat> {
        let mut chats: Vec<&Chat> = self.chats.values().collect();
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        chats
    }

    pub fn get_chat(&self, id: &str) -> Option<&Chat> {
        self.chats.get(id)
    }

    /// A fresh chat. It is only stored once it is saved with messages.
    pub fn create_chat(&self) -> Chat {
        Chat::new()
    }

    /// Stores `chat`, stamping its update time and deriving a title if it has none.
    /// Chats without messages are not persisted.
    pub fn save_chat(&mut self, mut chat: Chat) -> Result<(), AppError> {
        if chat.messages.is_empty() {
            return Ok(());
        }
        chat.updated_at = Utc::now();
        if chat.title == DEFAULT_TITLE {
            if let Some(title) = auto_title(&chat.messages) {
                chat.title = title;
            }
        }
        self.chats.insert(chat.id.clone(), chat);
        write_json(&self.path, &self.chats)
    }

    pub fn update_title(&mut self, id: &str, title: &str) -> Result<bool, AppError> {
        let Some(chat) = self.chats.get_mut(id) else {
            return Ok(false);
        };
        chat.title = title.to_string();
        chat.updated_at = Utc::now();
        write_json(&self.path, &self.chats)?;
        Ok(true)
    }

    pub fn delete_chat(&mut self, id: &str) -> Result<bool, AppError> {
        if self.chats.remove(id).is_none() {
            return Ok(false);
        }
        write_json(&self.path, &self.chats)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn user(text: &str) -> ChatMessage {
        ChatMessage::new(Role::User, text)
    }

    #[test]
    fn titles_come_from_first_user_line() {
        assert_eq!(auto_title(&[user("Hello there\nsecond line")]), Some("Hello there".to_string()));
        assert_eq!(
            auto_title(&[user("Explain how the borrow checker works in detail")]),
            Some("Explain how the borrow checker...".to_string())
        );
        assert_eq!(auto_title(&[ChatMessage::new(Role::Assistant, "hi")]), None);
        assert_eq!(auto_title(&[user("   ")]), None);
    }

    #[test]
    fn empty_chats_are_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut storage = ChatStorage::open(path.clone());
        let chat = storage.create_chat();
        storage.save_chat(chat).unwrap();
        assert!(storage.all_chats().is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn saved_chats_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.json");
        let mut storage = ChatStorage::open(path.clone());

        let mut chat = storage.create_chat();
        chat.model = Some("llama3".to_string());
        chat.messages = vec![user("What is Rust?"), ChatMessage::new(Role::Assistant, "A language.")];
        chat.options.temperature = Some(0.2);
        let id = chat.id.clone();
        storage.save_chat(chat).unwrap();

        let reopened = ChatStorage::open(path);
        let chat = reopened.get_chat(&id).expect("chat stored");
        assert_eq!(chat.title, "What is Rust?");
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.options.temperature, Some(0.2));
        assert_eq!(chat.model.as_deref(), Some("llama3"));
    }

    #[test]
    fn chats_sort_newest_first_and_can_be_edited() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = ChatStorage::open(dir.path().join("history.json"));

        let mut first = storage.create_chat();
        first.messages = vec![user("first")];
        let first_id = first.id.clone();
        storage.save_chat(first).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));

        let mut second = storage.create_chat();
        second.messages = vec![user("second")];
        let second_id = second.id.clone();
        storage.save_chat(second).unwrap();

        let order: Vec<_> = storage.all_chats().iter().map(|c| c.id.clone()).collect();
        assert_eq!(order, vec![second_id.clone(), first_id.clone()]);

        assert!(storage.update_title(&first_id, "Renamed").unwrap());
        assert_eq!(storage.get_chat(&first_id).unwrap().title, "Renamed");
        assert!(!storage.update_title("missing", "x").unwrap());

        assert!(storage.delete_chat(&second_id).unwrap());
        assert!(!storage.delete_chat(&second_id).unwrap());
        assert_eq!(storage.all_chats().len(), 1);
    }

    #[test]
    fn renaming_moves_chat_to_the_top() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = ChatStorage::open(dir.path().join("history.json"));

        let mut older = storage.create_chat();
        older.messages = vec![user("older")];
        let older_id = older.id.clone();
        storage.save_chat(older).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));

        let mut newer = storage.create_chat();
        newer.messages = vec![user("newer")];
        storage.save_chat(newer).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));

        assert!(storage.update_title(&older_id, "Pinned").unwrap());
        assert_eq!(storage.all_chats()[0].id, older_id);

        let reopened = ChatStorage::open(storage.path().to_path_buf());
        assert_eq!(reopened.all_chats()[0].title, "Pinned");
    }

    #[test]
    fn corrupt_history_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "{ not json").unwrap();
        let storage = ChatStorage::open(path);
        assert!(storage.all_chats().is_empty());
    }
}
