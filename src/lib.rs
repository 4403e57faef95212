//! Terminal chat client for Ollama with an incremental streaming markdown renderer.

pub mod app;
pub mod config;
pub mod error;
pub mod logging;
pub mod markdown;
pub mod ollama;
pub mod storage;
pub mod ui;
