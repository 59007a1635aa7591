//! Run 完成状态机
//!
//! 对一个已启动的远端 Run 轮询直至终态，然后按模式把结果写入会话：
//! - completed：审查模式取审查线程最新一条 assistant 消息写入反馈；主模式由调用方刷新历史；
//! - requires_action：首个工具调用若为查询生成工具，解析参数得到 SQL，包装成代码块后
//!   主模式追加到主线程历史、审查模式写入反馈；随后默认提交工具输出并等 Run 结束，
//!   关闭 resume_after_tool_call 时则停止轮询，Run 留在 requires_action；
//! - failed / cancelled / expired / incomplete：返回 RunFailed，不重试。
//!
//! 轮询带退避、可选总时限，并响应 CancellationToken。

use std::time::Duration;

use serde::Deserialize;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::assistants::{AssistantApi, Message, Role, Run, RunStatus, ToolOutput};
use crate::core::error::{AssistantError, Result};
use crate::core::feedback::fence_sql;
use crate::core::session::SessionContext;

/// 工具参数中缺少 sql 字段时使用的占位文本
pub const NO_SQL_PLACEHOLDER: &str = "[No SQL returned]";
pub const DEFAULT_QUERY_TOOL: &str = "generate_sql_query";

/// 轮询策略：首次间隔、退避倍数、间隔上限、总时限（None 表示不限）
#[derive(Clone, Debug)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub backoff_factor: f64,
    pub max_interval: Duration,
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_factor: 1.5,
            max_interval: Duration::from_secs(5),
            timeout: Some(Duration::from_secs(300)),
        }
    }
}

impl PollPolicy {
    /// 固定间隔、无时限（与最初的阻塞轮询等价）
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_interval: interval,
            backoff_factor: 1.0,
            max_interval: interval,
            timeout: None,
        }
    }

    pub fn next_interval(&self, current: Duration) -> Duration {
        let factor = self.backoff_factor.max(1.0);
        current.mul_f64(factor).min(self.max_interval)
    }
}

/// 状态机的可配置项
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub policy: PollPolicy,
    /// 生成查询的函数名
    pub query_tool: String,
    /// requires_action 后是否提交工具输出并继续等待 Run 结束
    pub resume_after_tool_call: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            policy: PollPolicy::default(),
            query_tool: DEFAULT_QUERY_TOOL.to_string(),
            resume_after_tool_call: true,
        }
    }
}

/// 结果投递目标
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// 主对话：结果进入主线程历史
    Primary,
    /// 审查：结果写入 target_thread 第 index 条消息的反馈
    Review { target_thread: String, index: usize },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// 正常完成；主模式下调用方需从远端刷新历史
    Completed,
    /// 工具调用生成了查询（已包装为代码块并投递）
    ToolQuery(String),
    /// 请求了其它工具，未投递任何结果
    UnhandledAction(String),
}

#[derive(Deserialize)]
struct QueryToolArgs {
    #[serde(default)]
    sql: Option<String>,
}

/// 解析查询工具参数；JSON 不合法或字段类型不符时报错，缺少 sql 时返回占位文本
pub fn parse_query_arguments(arguments: &str) -> Result<String> {
    let args: QueryToolArgs = serde_json::from_str(arguments)
        .map_err(|e| AssistantError::InvalidToolArguments(e.to_string()))?;
    Ok(args.sql.unwrap_or_else(|| NO_SQL_PLACEHOLDER.to_string()))
}

/// 轮询直到 Run 离开 queued / in_progress / cancelling
pub async fn poll_until_settled(
    api: &dyn AssistantApi,
    thread_id: &str,
    run_id: &str,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<Run> {
    let started = Instant::now();
    let mut interval = policy.initial_interval;
    loop {
        let run = tokio::select! {
            _ = cancel.cancelled() => return Err(AssistantError::Cancelled),
            run = api.retrieve_run(thread_id, run_id) => run?,
        };
        if !run.status.is_pending() {
            tracing::debug!(run_id, status = ?run.status, "run settled");
            return Ok(run);
        }

        if let Some(limit) = policy.timeout {
            if started.elapsed() >= limit {
                return Err(AssistantError::RunTimeout {
                    run_id: run_id.to_string(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(AssistantError::Cancelled),
            _ = sleep(interval) => {}
        }
        interval = policy.next_interval(interval);
    }
}

/// 驱动 Run 到终态并把结果路由进会话
pub async fn wait_for_run(
    api: &dyn AssistantApi,
    session: &mut SessionContext,
    run: &Run,
    mode: &RunMode,
    options: &RunOptions,
    cancel: &CancellationToken,
) -> Result<RunOutcome> {
    let thread_id = run.thread_id.as_str();
    let settled = poll_until_settled(api, thread_id, &run.id, &options.policy, cancel).await?;

    match settled.status {
        RunStatus::Completed => {
            if let RunMode::Review {
                target_thread,
                index,
            } = mode
            {
                let messages = api.list_messages(thread_id).await?;
                match messages.iter().find(|m| m.role == Role::Assistant) {
                    Some(latest) => {
                        session.set_feedback(target_thread, *index, latest.text().trim().to_string());
                    }
                    None => tracing::warn!(thread_id, "review run completed without a reply"),
                }
            }
            Ok(RunOutcome::Completed)
        }
        RunStatus::RequiresAction => {
            handle_required_action(api, session, &settled, mode, options, cancel).await
        }
        status if status.is_failure() => {
            let reason = settled
                .last_error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| format!("run ended with status {status:?}"));
            tracing::error!(run_id = %settled.id, %reason, "run failed");
            Err(AssistantError::RunFailed {
                run_id: settled.id.clone(),
                reason,
            })
        }
        // poll_until_settled 只返回非 pending 状态
        status => Err(AssistantError::RunFailed {
            run_id: settled.id.clone(),
            reason: format!("unexpected run status {status:?}"),
        }),
    }
}

async fn handle_required_action(
    api: &dyn AssistantApi,
    session: &mut SessionContext,
    run: &Run,
    mode: &RunMode,
    options: &RunOptions,
    cancel: &CancellationToken,
) -> Result<RunOutcome> {
    let Some(call) = run.tool_calls().first() else {
        tracing::warn!(run_id = %run.id, "requires_action without tool calls");
        return Ok(RunOutcome::UnhandledAction(String::new()));
    };
    if call.function.name != options.query_tool {
        tracing::warn!(run_id = %run.id, tool = %call.function.name, "unexpected tool call, ignoring");
        if options.resume_after_tool_call {
            resume_run(api, run, None, options, cancel).await;
        }
        return Ok(RunOutcome::UnhandledAction(call.function.name.clone()));
    }

    let sql = parse_query_arguments(&call.function.arguments)?;
    let block = fence_sql(&sql);
    match mode {
        RunMode::Primary => session.push_message(&run.thread_id, Message::assistant(block.clone())),
        RunMode::Review {
            target_thread,
            index,
        } => session.set_feedback(target_thread, *index, block.clone()),
    }

    if options.resume_after_tool_call {
        resume_run(api, run, Some((call.id.as_str(), sql.as_str())), options, cancel).await;
    } else {
        tracing::warn!(
            run_id = %run.id,
            thread_id = %run.thread_id,
            "run left in requires_action after first tool call; later progress is discarded \
             and the thread rejects new messages until the run expires"
        );
    }
    Ok(RunOutcome::ToolQuery(block))
}

/// 每个待处理工具调用的输出：answered 为 (调用 ID, 生成的 SQL)，其余调用回空串
fn tool_outputs(run: &Run, answered: Option<(&str, &str)>) -> Vec<ToolOutput> {
    run.tool_calls()
        .iter()
        .map(|c| ToolOutput {
            tool_call_id: c.id.clone(),
            output: match answered {
                Some((id, sql)) if id == c.id => sql.to_string(),
                _ => String::new(),
            },
        })
        .collect()
}

/// 提交工具输出并等待 Run 结束，让线程可以继续接收消息。
/// 结果已经投递（或无需投递），这里的失败只记日志。
async fn resume_run(
    api: &dyn AssistantApi,
    run: &Run,
    answered: Option<(&str, &str)>,
    options: &RunOptions,
    cancel: &CancellationToken,
) {
    let outputs = tool_outputs(run, answered);
    let result: Result<Run> = async {
        api.submit_tool_outputs(&run.thread_id, &run.id, outputs)
            .await?;
        poll_until_settled(api, &run.thread_id, &run.id, &options.policy, cancel).await
    }
    .await;
    match result {
        Ok(resumed) if resumed.status == RunStatus::Completed => {
            tracing::debug!(run_id = %run.id, "run resumed to completion");
        }
        Ok(resumed) => {
            tracing::warn!(run_id = %run.id, status = ?resumed.status, "resumed run did not complete")
        }
        Err(e) => tracing::warn!(run_id = %run.id, error = %e, "failed to resume run"),
    }
}
