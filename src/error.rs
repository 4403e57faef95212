use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),
    #[error("API Request Error: {0}")]
    ApiRequest(#[from] reqwest::Error),
    #[error("API Response Error: {0}")]
    ApiResponse(String),
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("History Error: {}: {source}", path.display())]
    History {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Logging Error: {0}")]
    Logging(String),
    #[error("Channel Send Error: {0}")]
    ChannelSend(String),
    #[error("Channel Receive Error")]
    ChannelReceive,
}
