//! Mock Assistant 服务（用于测试，无需 API）
//!
//! 线程与消息保存在内存中；每次 create_run 按 FIFO 取出一个预设的 ScriptedRun，
//! 轮询若干次 in_progress 后进入脚本指定的终态。所有调用记录在 calls() 中便于断言。
//!
//! 与真实服务一致：线程上有未结束的 Run（含 requires_action）时，
//! create_message / create_run 返回 400。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::assistants::types::{
    Assistant, CreateAssistantRequest, FunctionCall, MessageContent, ModifyAssistantRequest,
    RequiredAction, Role, Run, RunError, RunStatus, SubmitToolOutputs, TextContent, Thread,
    ThreadMessage, ToolCall, ToolOutput,
};
use crate::assistants::AssistantApi;
use crate::core::error::{AssistantError, Result};

/// 预设的 Run 结局
#[derive(Clone, Debug)]
pub enum ScriptedOutcome {
    /// 完成并向线程追加一条 assistant 消息
    Reply(String),
    /// 请求调用工具；after_submit 为提交工具输出后追加的回复
    ToolCall {
        name: String,
        arguments: String,
        after_submit: Option<String>,
    },
    Fail(String),
    /// 永远停留在 in_progress
    Hang,
}

#[derive(Clone, Debug)]
pub struct ScriptedRun {
    pub pending_polls: usize,
    pub outcome: ScriptedOutcome,
}

impl ScriptedRun {
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            pending_polls: 0,
            outcome: ScriptedOutcome::Reply(text.into()),
        }
    }

    pub fn tool_call(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            pending_polls: 0,
            outcome: ScriptedOutcome::ToolCall {
                name: name.into(),
                arguments: arguments.into(),
                after_submit: None,
            },
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            pending_polls: 0,
            outcome: ScriptedOutcome::Fail(message.into()),
        }
    }

    pub fn hang() -> Self {
        Self {
            pending_polls: 0,
            outcome: ScriptedOutcome::Hang,
        }
    }

    pub fn with_pending(mut self, polls: usize) -> Self {
        self.pending_polls = polls;
        self
    }

    /// 仅对 ToolCall 生效：提交工具输出后追加该回复并完成
    pub fn then_reply(mut self, text: impl Into<String>) -> Self {
        if let ScriptedOutcome::ToolCall { after_submit, .. } = &mut self.outcome {
            *after_submit = Some(text.into());
        }
        self
    }
}

struct RunState {
    thread_id: String,
    assistant_id: String,
    script: ScriptedRun,
    polls: usize,
    submitted: bool,
    replied: bool,
}

#[derive(Default)]
struct MockState {
    /// 每个线程的消息，最旧在前
    threads: HashMap<String, Vec<ThreadMessage>>,
    runs: HashMap<String, RunState>,
    scripts: VecDeque<ScriptedRun>,
    assistants: HashMap<String, Assistant>,
    calls: Vec<String>,
}

/// 内存版 Assistant 服务
#[derive(Default)]
pub struct MockAssistantApi {
    state: Mutex<MockState>,
}

impl MockAssistantApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个 Run 脚本；脚本耗尽后 create_run 使用默认回复
    pub fn push_run(&self, script: ScriptedRun) {
        self.state.lock().unwrap().scripts.push_back(script);
    }

    /// 预置一个远端 Assistant（用于更新 / 查询测试）
    pub fn insert_assistant(&self, id: &str, name: &str, model: &str) {
        let assistant = Assistant {
            id: id.to_string(),
            name: Some(name.to_string()),
            model: model.to_string(),
            instructions: None,
            tools: Vec::new(),
            metadata: None,
            created_at: 0,
        };
        self.state
            .lock()
            .unwrap()
            .assistants
            .insert(id.to_string(), assistant);
    }

    pub fn assistant(&self, id: &str) -> Option<Assistant> {
        self.state.lock().unwrap().assistants.get(id).cloned()
    }

    /// 某线程的消息（最旧在前）
    pub fn thread_messages(&self, thread_id: &str) -> Vec<ThreadMessage> {
        self.state
            .lock()
            .unwrap()
            .threads
            .get(thread_id)
            .cloned()
            .unwrap_or_default()
    }

    /// 调用记录，如 "create_run:thread_x:asst_1"
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

fn text_message(role: Role, content: &str) -> ThreadMessage {
    ThreadMessage {
        id: format!("msg_{}", Uuid::new_v4().simple()),
        role,
        content: vec![MessageContent::Text {
            text: TextContent {
                value: content.to_string(),
            },
        }],
    }
}

/// 按脚本与已轮询次数推出的当前状态（不推进）
fn current_status(run: &RunState) -> RunStatus {
    if run.polls < run.script.pending_polls {
        return RunStatus::InProgress;
    }
    match (&run.script.outcome, run.submitted) {
        (ScriptedOutcome::Reply(_), _) => RunStatus::Completed,
        (ScriptedOutcome::ToolCall { .. }, false) => RunStatus::RequiresAction,
        (ScriptedOutcome::ToolCall { .. }, true) => RunStatus::Completed,
        (ScriptedOutcome::Fail(_), _) => RunStatus::Failed,
        (ScriptedOutcome::Hang, _) => RunStatus::InProgress,
    }
}

impl MockState {
    /// 线程上仍占用线程的 Run ID
    fn active_run(&self, thread_id: &str) -> Option<&str> {
        self.runs
            .iter()
            .find(|(_, r)| r.thread_id == thread_id && current_status(r).is_active())
            .map(|(id, _)| id.as_str())
    }
}

fn snapshot(run_id: &str, state: &RunState, status: RunStatus) -> Run {
    let required_action = match (&state.script.outcome, status) {
        (ScriptedOutcome::ToolCall { name, arguments, .. }, RunStatus::RequiresAction) => {
            Some(RequiredAction {
                kind: "submit_tool_outputs".to_string(),
                submit_tool_outputs: Some(SubmitToolOutputs {
                    tool_calls: vec![ToolCall {
                        id: format!("call_{run_id}"),
                        function: FunctionCall {
                            name: name.clone(),
                            arguments: arguments.clone(),
                        },
                    }],
                }),
            })
        }
        _ => None,
    };
    let last_error = match (&state.script.outcome, status) {
        (ScriptedOutcome::Fail(message), RunStatus::Failed) => Some(RunError {
            code: Some("server_error".to_string()),
            message: message.clone(),
        }),
        _ => None,
    };
    Run {
        id: run_id.to_string(),
        thread_id: state.thread_id.clone(),
        assistant_id: state.assistant_id.clone(),
        status,
        required_action,
        last_error,
    }
}

#[async_trait]
impl AssistantApi for MockAssistantApi {
    async fn create_thread(&self) -> Result<Thread> {
        let id = format!("thread_{}", Uuid::new_v4().simple());
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_thread:{id}"));
        state.threads.insert(id.clone(), Vec::new());
        Ok(Thread { id })
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("list_messages:{thread_id}"));
        let messages = state
            .threads
            .get(thread_id)
            .ok_or_else(|| AssistantError::Api {
                status: 404,
                message: format!("No thread found with id '{thread_id}'."),
            })?;
        Ok(messages.iter().rev().cloned().collect())
    }

    async fn create_message(
        &self,
        thread_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ThreadMessage> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_message:{thread_id}"));
        if let Some(run_id) = state.active_run(thread_id) {
            return Err(AssistantError::Api {
                status: 400,
                message: format!(
                    "Can't add messages to {thread_id} while a run {run_id} is active."
                ),
            });
        }
        let message = text_message(role, content);
        state
            .threads
            .entry(thread_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("create_run:{thread_id}:{assistant_id}"));
        if let Some(run_id) = state.active_run(thread_id) {
            return Err(AssistantError::Api {
                status: 400,
                message: format!("Thread {thread_id} already has an active run {run_id}."),
            });
        }
        let script = state
            .scripts
            .pop_front()
            .unwrap_or_else(|| ScriptedRun::reply("(mock reply)"));
        let run_id = format!("run_{}", Uuid::new_v4().simple());
        let run_state = RunState {
            thread_id: thread_id.to_string(),
            assistant_id: assistant_id.to_string(),
            script,
            polls: 0,
            submitted: false,
            replied: false,
        };
        let run = snapshot(&run_id, &run_state, RunStatus::Queued);
        state.runs.insert(run_id, run_state);
        Ok(run)
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        state.calls.push(format!("retrieve_run:{thread_id}:{run_id}"));
        let run = state.runs.get_mut(run_id).ok_or_else(|| AssistantError::Api {
            status: 404,
            message: format!("No run found with id '{run_id}'."),
        })?;

        if run.polls < run.script.pending_polls {
            run.polls += 1;
            return Ok(snapshot(run_id, run, RunStatus::InProgress));
        }

        let reply = match (&run.script.outcome, run.submitted) {
            (ScriptedOutcome::Reply(text), _) => Some(text.clone()),
            (ScriptedOutcome::ToolCall { after_submit, .. }, true) => after_submit.clone(),
            _ => None,
        };
        let status = current_status(run);

        if let (Some(text), false) = (reply, run.replied) {
            run.replied = true;
            let thread = run.thread_id.clone();
            let snap = snapshot(run_id, run, status);
            state
                .threads
                .entry(thread)
                .or_default()
                .push(text_message(Role::Assistant, &text));
            return Ok(snap);
        }
        Ok(snapshot(run_id, run, status))
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<Run> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!(
            "submit_tool_outputs:{thread_id}:{run_id}:{}",
            outputs.len()
        ));
        let run = state.runs.get_mut(run_id).ok_or_else(|| AssistantError::Api {
            status: 404,
            message: format!("No run found with id '{run_id}'."),
        })?;
        run.submitted = true;
        Ok(snapshot(run_id, run, RunStatus::Queued))
    }

    async fn create_assistant(&self, request: CreateAssistantRequest) -> Result<Assistant> {
        let id = format!("asst_{}", Uuid::new_v4().simple());
        let assistant = Assistant {
            id: id.clone(),
            name: Some(request.name.clone()),
            model: request.model,
            instructions: Some(request.instructions),
            tools: request
                .tools
                .iter()
                .map(serde_json::to_value)
                .collect::<std::result::Result<_, _>>()?,
            metadata: Some(request.metadata),
            created_at: chrono::Utc::now().timestamp(),
        };
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("create_assistant:{}", request.name));
        state.assistants.insert(id, assistant.clone());
        Ok(assistant)
    }

    async fn update_assistant(
        &self,
        assistant_id: &str,
        request: ModifyAssistantRequest,
    ) -> Result<Assistant> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("update_assistant:{assistant_id}"));
        let assistant = state
            .assistants
            .get_mut(assistant_id)
            .ok_or_else(|| AssistantError::Api {
                status: 404,
                message: format!("No assistant found with id '{assistant_id}'."),
            })?;
        assistant.instructions = Some(request.instructions);
        Ok(assistant.clone())
    }

    async fn retrieve_assistant(&self, assistant_id: &str) -> Result<Assistant> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("retrieve_assistant:{assistant_id}"));
        state
            .assistants
            .get(assistant_id)
            .cloned()
            .ok_or_else(|| AssistantError::Api {
                status: 404,
                message: format!("No assistant found with id '{assistant_id}'."),
            })
    }
}
