//! 编排层错误类型
//!
//! 本地只区分少数几类：文件缺失、远端调用失败、Run 失败 / 超时 / 取消、工具参数不合法，
//! 以及会话内索引相关的用户操作错误。

use std::path::PathBuf;

use thiserror::Error;

/// 注册、对话、审查过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("Instruction file not found: {}", .0.display())]
    InstructionFileNotFound(PathBuf),

    #[error("Config file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    /// 注册表中没有该名字对应的远端 ID
    #[error("Unknown assistant: {0}")]
    UnknownAssistant(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Run {run_id} failed: {reason}")]
    RunFailed { run_id: String, reason: String },

    #[error("Run {run_id} did not finish within {waited_secs}s")]
    RunTimeout { run_id: String, waited_secs: u64 },

    #[error("Cancelled")]
    Cancelled,

    /// 工具调用参数无法按约定结构解码
    #[error("Invalid tool arguments: {0}")]
    InvalidToolArguments(String),

    #[error("No thread at index {0}")]
    NoSuchThread(usize),

    #[error("No message at index {0}")]
    NoSuchMessage(usize),

    #[error("Message {0} is not an assistant message")]
    NotReviewable(usize),

    #[error("No review feedback for message {0}")]
    NoFeedback(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for AssistantError {
    fn from(e: reqwest::Error) -> Self {
        AssistantError::Http(e.to_string())
    }
}

impl From<config::ConfigError> for AssistantError {
    fn from(e: config::ConfigError) -> Self {
        AssistantError::Config(e.to_string())
    }
}

impl AssistantError {
    /// Run 层面的失败（失败 / 超时 / 取消），交互前端据此提示用户而不退出
    pub fn is_run_failure(&self) -> bool {
        matches!(
            self,
            AssistantError::RunFailed { .. }
                | AssistantError::RunTimeout { .. }
                | AssistantError::Cancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, AssistantError>;
