// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV export error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Drone did not answer `{command}` within {timeout_ms} ms")]
    DroneTimeout { command: String, timeout_ms: u64 },

    #[error("Drone rejected `{command}`: {reply}")]
    DroneRejected { command: String, reply: String },

    #[error("Unexpected drone reply to `{command}`: {reply:?}")]
    DroneProtocol { command: String, reply: String },

    #[error("Capture error: {message}")]
    Capture { message: String },

    #[error("Invalid video source: {0}")]
    InvalidSource(String),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl MonitorError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn capture(message: impl Into<String>) -> Self {
        Self::Capture {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
