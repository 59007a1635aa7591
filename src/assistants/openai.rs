//! OpenAI Assistants v2 HTTP 客户端
//!
//! 直接通过 reqwest 调用 REST 端点（可配置 base_url），请求头带 `OpenAI-Beta: assistants=v2`。
//! 非 2xx 响应统一转为 AssistantError::Api，message 取自响应体中的 error.message。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::assistants::types::{
    Assistant, CreateAssistantRequest, ListResponse, ModifyAssistantRequest, Role, Run, Thread,
    ThreadMessage, ToolOutput,
};
use crate::assistants::AssistantApi;
use crate::core::error::{AssistantError, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// 单页最多取回的消息数（服务端上限）
const MESSAGE_PAGE_LIMIT: u32 = 100;

/// Assistants 客户端：持有 reqwest Client、base_url 与 API Key
pub struct OpenAiAssistants {
    http: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiAssistants {
    pub fn new(base_url: Option<&str>, api_key: &str, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.http.get(self.url(path)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authorize(self.http.post(self.url(path)))
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    /// 发送请求并解析 JSON；失败状态码转为 Api 错误
    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(String::from))
                .unwrap_or(body);
            tracing::debug!(status = status.as_u16(), %message, "assistants api error");
            return Err(AssistantError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl AssistantApi for OpenAiAssistants {
    async fn create_thread(&self) -> Result<Thread> {
        self.send(self.post("/threads").json(&json!({}))).await
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>> {
        let req = self
            .get(&format!("/threads/{thread_id}/messages"))
            .query(&[("limit", MESSAGE_PAGE_LIMIT.to_string())]);
        let list: ListResponse<ThreadMessage> = self.send(req).await?;
        Ok(list.data)
    }

    async fn create_message(
        &self,
        thread_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ThreadMessage> {
        let req = self
            .post(&format!("/threads/{thread_id}/messages"))
            .json(&json!({ "role": role, "content": content }));
        self.send(req).await
    }

    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run> {
        let req = self
            .post(&format!("/threads/{thread_id}/runs"))
            .json(&json!({ "assistant_id": assistant_id }));
        self.send(req).await
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        self.send(self.get(&format!("/threads/{thread_id}/runs/{run_id}")))
            .await
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<Run> {
        let req = self
            .post(&format!(
                "/threads/{thread_id}/runs/{run_id}/submit_tool_outputs"
            ))
            .json(&json!({ "tool_outputs": outputs }));
        self.send(req).await
    }

    async fn create_assistant(&self, request: CreateAssistantRequest) -> Result<Assistant> {
        self.send(self.post("/assistants").json(&request)).await
    }

    async fn update_assistant(
        &self,
        assistant_id: &str,
        request: ModifyAssistantRequest,
    ) -> Result<Assistant> {
        self.send(self.post(&format!("/assistants/{assistant_id}")).json(&request))
            .await
    }

    async fn retrieve_assistant(&self, assistant_id: &str) -> Result<Assistant> {
        self.send(self.get(&format!("/assistants/{assistant_id}")))
            .await
    }
}
