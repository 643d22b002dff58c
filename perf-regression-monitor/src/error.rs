//! 统一错误类型

use thiserror::Error;

/// 监控流水线错误
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Probe '{category}' failed: {message}")]
    Probe { category: String, message: String },

    #[error("Timeout exceeded after {0} ms")]
    Timeout(u64),

    #[error("Notification dispatch failed: {0}")]
    Notification(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Statistics error: {0}")]
    Statistics(String),
}

impl MonitorError {
    /// 构造探针错误
    pub fn probe(category: impl std::fmt::Display, message: impl Into<String>) -> Self {
        Self::Probe {
            category: category.to_string(),
            message: message.into(),
        }
    }
}

/// 监控流水线结果类型
pub type Result<T> = std::result::Result<T, MonitorError>;
