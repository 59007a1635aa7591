//! 远端 Assistants 服务的数据结构
//!
//! 只声明本项目实际读写的字段；其余字段由 serde 忽略。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// 消息角色（与远端一致，小写序列化）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// 本地缓存的一条对话消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
}

/// 远端线程中的消息；content 为分段列表，只关心第一段文本
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: Vec<MessageContent>,
}

impl ThreadMessage {
    /// 第一段文本内容；非文本（图片等）返回空串
    pub fn text(&self) -> &str {
        match self.content.first() {
            Some(MessageContent::Text { text }) => &text.value,
            _ => "",
        }
    }

    pub fn to_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.text().to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: TextContent },
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TextContent {
    pub value: String,
}

/// Run 状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Cancelling,
    RequiresAction,
    Completed,
    Failed,
    Cancelled,
    Expired,
    Incomplete,
    /// 服务端新增的未知状态按未结束处理
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// 是否仍需继续轮询
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            RunStatus::Queued | RunStatus::InProgress | RunStatus::Cancelling | RunStatus::Unknown
        )
    }

    /// Run 仍占用线程：此时服务端拒绝在该线程上追加消息或再启动 Run
    pub fn is_active(self) -> bool {
        self.is_pending() || self == RunStatus::RequiresAction
    }

    /// 失败类终态：failed / cancelled / expired / incomplete
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            RunStatus::Failed | RunStatus::Cancelled | RunStatus::Expired | RunStatus::Incomplete
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub thread_id: String,
    pub assistant_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub required_action: Option<RequiredAction>,
    #[serde(default)]
    pub last_error: Option<RunError>,
}

impl Run {
    /// requires_action 时需要执行的工具调用（按服务端顺序）
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.required_action
            .as_ref()
            .and_then(|a| a.submit_tool_outputs.as_ref())
            .map(|s| s.tool_calls.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunError {
    pub code: Option<String>,
    pub message: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequiredAction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub submit_tool_outputs: Option<SubmitToolOutputs>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmitToolOutputs {
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function: FunctionCall,
}

/// 函数调用；arguments 是 JSON 编码的字符串
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// 注册 Assistant 时声明的工具
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantTool {
    CodeInterpreter,
}

#[derive(Clone, Debug, Serialize)]
pub struct CreateAssistantRequest {
    pub name: String,
    pub instructions: String,
    pub model: String,
    pub tools: Vec<AssistantTool>,
    pub metadata: HashMap<String, String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ModifyAssistantRequest {
    pub instructions: String,
}

/// 远端 Assistant 定义
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Assistant {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub model: String,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub tools: Vec<serde_json::Value>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(default)]
    pub created_at: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ListResponse<T> {
    pub data: Vec<T>,
}
