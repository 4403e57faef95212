use crate::ollama::{GenerationOptions, ThinkMode, DEFAULT_HOST};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub const APP_DIR_NAME: &str = "ollama-chat";
pub const HISTORY_FILE_NAME: &str = "history.json";

#[derive(Parser, Debug, Clone)]
#[command(name = "ollama-chat")]
#[command(version)]
#[command(about = "Terminal chat client for Ollama with streaming markdown rendering")]
pub struct Cli {
    /// Ollama server URL
    #[arg(long, env = "OLLAMA_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Model to select on startup, if the server has it
    #[arg(short, long)]
    pub model: Option<String>,

    /// System prompt sent ahead of the conversation
    #[arg(short, long)]
    pub system: Option<String>,

    /// Thinking mode; defaults depend on the model
    #[arg(long, value_enum)]
    pub think: Option<ThinkMode>,

    #[arg(long)]
    pub seed: Option<i64>,

    #[arg(long)]
    pub temperature: Option<f32>,

    #[arg(long)]
    pub top_k: Option<u32>,

    #[arg(long)]
    pub top_p: Option<f32>,

    #[arg(long)]
    pub min_p: Option<f32>,

    /// Context window size in tokens
    #[arg(long)]
    pub num_ctx: Option<u32>,

    /// Maximum tokens to generate
    #[arg(long)]
    pub num_predict: Option<i32>,

    /// Stop sequences, comma separated
    #[arg(long, value_delimiter = ',')]
    pub stop: Vec<String>,

    /// Request token log probabilities
    #[arg(long)]
    pub logprobs: bool,

    /// Alternatives to report per token (implies --logprobs)
    #[arg(long)]
    pub top_logprobs: Option<u32>,

    /// Show generation timing below each response
    #[arg(long)]
    pub stats: bool,

    /// Chat history file
    #[arg(long)]
    pub history_file: Option<PathBuf>,

    /// Directory for the log file
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Minimum delay between re-renders of a streaming response
    #[arg(long, default_value_t = 50)]
    pub render_interval_ms: u64,
}

fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

impl Cli {
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            seed: self.seed,
            temperature: self.temperature,
            top_k: self.top_k,
            top_p: self.top_p,
            min_p: self.min_p,
            num_ctx: self.num_ctx,
            num_predict: self.num_predict,
            stop: self
                .stop
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn wants_logprobs(&self) -> bool {
        self.logprobs || self.top_logprobs.is_some()
    }

    pub fn history_path(&self) -> PathBuf {
        self.history_file
            .clone()
            .unwrap_or_else(|| app_data_dir().join(HISTORY_FILE_NAME))
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| app_data_dir().join("logs"))
    }

    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(self.render_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_leave_options_unset() {
        let cli = Cli::try_parse_from(["ollama-chat", "--host", "http://example:1234"]).unwrap();
        assert_eq!(cli.host, "http://example:1234");
        assert!(cli.generation_options().is_empty());
        assert!(!cli.wants_logprobs());
        assert_eq!(cli.render_interval(), Duration::from_millis(50));
        assert!(cli.history_path().ends_with("ollama-chat/history.json"));
    }

    #[test]
    fn generation_flags_are_collected() {
        let cli = Cli::try_parse_from([
            "ollama-chat",
            "--temperature",
            "0.7",
            "--seed",
            "42",
            "--stop",
            "END, ,STOP",
            "--think",
            "high",
            "--top-logprobs",
            "5",
        ])
        .unwrap();
        let options = cli.generation_options();
        assert_eq!(options.temperature, Some(0.7));
        assert_eq!(options.seed, Some(42));
        assert_eq!(options.stop, vec!["END".to_string(), "STOP".to_string()]);
        assert_eq!(cli.think, Some(ThinkMode::High));
        assert!(cli.wants_logprobs());
    }

    #[test]
    fn bad_numbers_are_rejected() {
        assert!(Cli::try_parse_from(["ollama-chat", "--top-k", "lots"]).is_err());
    }
}
