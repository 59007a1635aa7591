//! 对话编排：发送消息、审查消息、按反馈修正、新建 / 切换线程
//!
//! 每个用户操作是一条完整的调用链：发消息 -> 启动 Run -> 等待状态机 -> 更新会话。
//! 会话上下文由前端持有，逐次以 &mut 传入。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::assistants::{AssistantApi, Message, Role, ThreadMessage};
use crate::config::AppConfig;
use crate::core::error::{AssistantError, Result};
use crate::core::feedback::review_text;
use crate::core::run::{wait_for_run, RunMode, RunOptions, RunOutcome};
use crate::core::session::{
    ConversationThread, SessionContext, NEW_CONVERSATION, REVIEW_THREAD_NAME, UNTITLED,
};
use crate::registry::AssistantRegistry;

/// 按审查反馈修正查询时发给主助手的提示
pub fn fix_prompt(sql: &str, feedback: &str) -> String {
    format!(
        "The following SQL query was reviewed, and feedback was provided.\n\n\
         ### Original SQL:\n```sql\n{sql}\n```\n\n\
         ### Feedback:\n{feedback}\n\n\
         Please revise the query to address the feedback above. Return only the corrected SQL."
    )
}

/// 主助手 + 审查助手的对话服务
pub struct ChatService {
    api: Arc<dyn AssistantApi>,
    sql_assistant_id: String,
    review_assistant_id: String,
    options: RunOptions,
}

impl ChatService {
    pub fn new(
        api: Arc<dyn AssistantApi>,
        sql_assistant_id: impl Into<String>,
        review_assistant_id: impl Into<String>,
        options: RunOptions,
    ) -> Self {
        Self {
            api,
            sql_assistant_id: sql_assistant_id.into(),
            review_assistant_id: review_assistant_id.into(),
            options,
        }
    }

    /// 通过注册表把配置中的助手名解析为远端 ID
    pub fn from_config(
        cfg: &AppConfig,
        api: Arc<dyn AssistantApi>,
        registry: &AssistantRegistry,
    ) -> Result<Self> {
        let sql_id = registry.resolve(&cfg.assistants.sql_name)?;
        let review_id = registry.resolve(&cfg.assistants.review_name)?;
        tracing::info!(sql = %sql_id, review = %review_id, "resolved assistants");
        Ok(Self::new(api, sql_id, review_id, cfg.run_options()))
    }

    /// 新会话：创建第一个主线程（Untitled）
    pub async fn start_session(&self) -> Result<SessionContext> {
        let thread = self.api.create_thread().await?;
        Ok(SessionContext::new(ConversationThread::new(thread.id, UNTITLED)))
    }

    /// 新会话，并附上已有的远端线程（如上次的对话）；这些线程在切换到时才拉取历史
    pub async fn resume_session(&self, thread_ids: &[String]) -> Result<SessionContext> {
        let mut session = self.start_session().await?;
        for id in thread_ids {
            session.attach_thread(ConversationThread::new(id.clone(), id.clone()));
        }
        Ok(session)
    }

    pub async fn new_thread(&self, session: &mut SessionContext) -> Result<usize> {
        let thread = self.api.create_thread().await?;
        tracing::debug!(thread_id = %thread.id, "new conversation");
        Ok(session.add_thread(ConversationThread::new(thread.id, NEW_CONVERSATION)))
    }

    /// 切换当前线程；本地无缓存时先从远端拉取历史，拉取失败则保持原线程
    pub async fn switch_thread(&self, session: &mut SessionContext, index: usize) -> Result<()> {
        let thread_id = session
            .threads()
            .get(index)
            .ok_or(AssistantError::NoSuchThread(index))?
            .id
            .clone();
        if !session.has_history(&thread_id) {
            let history = self.fetch_history(&thread_id).await?;
            tracing::debug!(thread_id = %thread_id, messages = history.len(), "loaded thread history");
            session.replace_history(&thread_id, history);
        }
        session.switch_to(index)?;
        Ok(())
    }

    /// 远端完整历史，按时间正序
    pub async fn fetch_history(&self, thread_id: &str) -> Result<Vec<Message>> {
        let mut remote = self.api.list_messages(thread_id).await?;
        remote.reverse();
        Ok(remote.iter().map(ThreadMessage::to_message).collect())
    }

    /// 把远端最近一条用户消息之后的 assistant 回复追加到本地缓存
    async fn append_new_replies(&self, session: &mut SessionContext, thread_id: &str) -> Result<()> {
        let remote = self.api.list_messages(thread_id).await?;
        let replies: Vec<Message> = remote
            .iter()
            .take_while(|m| m.role == Role::Assistant)
            .map(ThreadMessage::to_message)
            .collect();
        for reply in replies.into_iter().rev() {
            session.push_message(thread_id, reply);
        }
        Ok(())
    }

    /// 向主线程提交一条用户消息并运行主助手
    async fn run_primary(
        &self,
        session: &mut SessionContext,
        thread_id: &str,
        content: &str,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        // 远端接受后才写入本地，线程被占用（400）时本地历史不变
        self.api.create_message(thread_id, Role::User, content).await?;
        session.push_message(thread_id, Message::user(content));
        let run = self.api.create_run(thread_id, &self.sql_assistant_id).await?;
        tracing::info!(thread_id, run_id = %run.id, "primary run started");

        let outcome = wait_for_run(
            self.api.as_ref(),
            session,
            &run,
            &RunMode::Primary,
            &self.options,
            cancel,
        )
        .await?;
        if outcome == RunOutcome::Completed {
            self.append_new_replies(session, thread_id).await?;
        }
        Ok(outcome)
    }

    /// 用户在当前线程发送一条消息
    pub async fn send_message(
        &self,
        session: &mut SessionContext,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        session.rename_if_untitled(text);
        let thread_id = session.active_thread_id().to_string();
        self.run_primary(session, &thread_id, text, cancel).await
    }

    /// 当前线程第 index 条 assistant 消息
    fn assistant_message(&self, session: &SessionContext, index: usize) -> Result<Message> {
        let message = session
            .messages(session.active_thread_id())
            .get(index)
            .cloned()
            .ok_or(AssistantError::NoSuchMessage(index))?;
        if message.role != Role::Assistant {
            return Err(AssistantError::NotReviewable(index));
        }
        Ok(message)
    }

    async fn ensure_review_thread(&self, session: &mut SessionContext) -> Result<String> {
        if let Some(thread) = session.review_thread() {
            return Ok(thread.id.clone());
        }
        let thread = self.api.create_thread().await?;
        session.set_review_thread(ConversationThread::new(thread.id.clone(), REVIEW_THREAD_NAME));
        Ok(thread.id)
    }

    /// 把当前线程第 index 条助手消息交给审查助手，结果写入该消息的反馈
    pub async fn review_message(
        &self,
        session: &mut SessionContext,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let message = self.assistant_message(session, index)?;
        let target_thread = session.active_thread_id().to_string();
        let review_thread = self.ensure_review_thread(session).await?;

        self.api
            .create_message(&review_thread, Role::User, &review_text(&message.content))
            .await?;
        let run = self
            .api
            .create_run(&review_thread, &self.review_assistant_id)
            .await?;
        tracing::info!(index, run_id = %run.id, "review run started");

        let mode = RunMode::Review {
            target_thread,
            index,
        };
        wait_for_run(self.api.as_ref(), session, &run, &mode, &self.options, cancel).await
    }

    /// 把原查询与审查反馈组合成提示，发回原主线程让主助手修正
    pub async fn fix_with_feedback(
        &self,
        session: &mut SessionContext,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let message = self.assistant_message(session, index)?;
        let thread_id = session.active_thread_id().to_string();
        let feedback = session
            .feedback(&thread_id, index)
            .ok_or(AssistantError::NoFeedback(index))?
            .to_string();

        let prompt = fix_prompt(&review_text(&message.content), &feedback);
        self.run_primary(session, &thread_id, &prompt, cancel).await
    }
}
