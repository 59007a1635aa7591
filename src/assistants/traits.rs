//! 远端 Assistant 服务抽象
//!
//! HTTP 实现（OpenAiAssistants）与测试用 Mock（MockAssistantApi）都实现 AssistantApi；
//! 编排层只依赖该 trait。

use async_trait::async_trait;

use crate::assistants::types::{
    Assistant, CreateAssistantRequest, ModifyAssistantRequest, Role, Run, Thread, ThreadMessage,
    ToolOutput,
};
use crate::core::error::Result;

/// 编排层消费的远端操作集合
#[async_trait]
pub trait AssistantApi: Send + Sync {
    async fn create_thread(&self) -> Result<Thread>;

    /// 列出线程消息，顺序与远端一致（最新在前）
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>>;

    async fn create_message(&self, thread_id: &str, role: Role, content: &str)
        -> Result<ThreadMessage>;

    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run>;

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run>;

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<Run>;

    async fn create_assistant(&self, request: CreateAssistantRequest) -> Result<Assistant>;

    async fn update_assistant(
        &self,
        assistant_id: &str,
        request: ModifyAssistantRequest,
    ) -> Result<Assistant>;

    async fn retrieve_assistant(&self, assistant_id: &str) -> Result<Assistant>;
}
