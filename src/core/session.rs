//! 会话上下文
//!
//! 每个用户会话一份：主对话线程列表与当前线程、各线程消息缓存、专用审查线程、
//! 以及按「主线程 + 消息下标」索引的审查反馈。由前端持有并以 &mut 传给各处理函数。

use std::collections::{BTreeMap, HashMap};

use crate::assistants::Message;
use crate::core::error::{AssistantError, Result};

/// 新会话的第一个线程名；首条用户消息到来时会被改名
pub const UNTITLED: &str = "Untitled";
/// 通过「新建对话」创建的线程名
pub const NEW_CONVERSATION: &str = "New Conversation";
pub const REVIEW_THREAD_NAME: &str = "QReview";
/// 以首条消息命名线程时保留的最大字符数
const TITLE_MAX_CHARS: usize = 30;

/// 远端线程及其显示名
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationThread {
    pub id: String,
    pub display_name: String,
}

impl ConversationThread {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug)]
pub struct SessionContext {
    threads: Vec<ConversationThread>,
    active: usize,
    /// 线程 ID -> 本地消息缓存（最旧在前）
    messages: HashMap<String, Vec<Message>>,
    review_thread: Option<ConversationThread>,
    /// 主线程 ID -> (消息下标 -> 审查反馈)
    feedback: HashMap<String, BTreeMap<usize, String>>,
}

impl SessionContext {
    /// 以一个已创建的主线程开始会话
    pub fn new(first: ConversationThread) -> Self {
        let mut messages = HashMap::new();
        messages.insert(first.id.clone(), Vec::new());
        Self {
            threads: vec![first],
            active: 0,
            messages,
            review_thread: None,
            feedback: HashMap::new(),
        }
    }

    pub fn threads(&self) -> &[ConversationThread] {
        &self.threads
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active_thread(&self) -> &ConversationThread {
        &self.threads[self.active]
    }

    pub fn active_thread_id(&self) -> &str {
        &self.threads[self.active].id
    }

    /// 追加主线程并设为当前线程，返回其下标
    pub fn add_thread(&mut self, thread: ConversationThread) -> usize {
        self.messages.entry(thread.id.clone()).or_default();
        self.threads.push(thread);
        self.active = self.threads.len() - 1;
        self.active
    }

    /// 追加一个已存在的远端线程但不建立本地缓存（首次切换时再拉取历史），返回其下标
    pub fn attach_thread(&mut self, thread: ConversationThread) -> usize {
        self.threads.push(thread);
        self.threads.len() - 1
    }

    pub fn switch_to(&mut self, index: usize) -> Result<&ConversationThread> {
        if index >= self.threads.len() {
            return Err(AssistantError::NoSuchThread(index));
        }
        self.active = index;
        Ok(&self.threads[index])
    }

    /// 当前线程仍是 Untitled 时，用首条消息的前 30 个字符命名（超出追加 "..."）
    pub fn rename_if_untitled(&mut self, first_message: &str) {
        let thread = &mut self.threads[self.active];
        if thread.display_name != UNTITLED {
            return;
        }
        let mut title: String = first_message.chars().take(TITLE_MAX_CHARS).collect();
        if first_message.chars().count() > TITLE_MAX_CHARS {
            title.push_str("...");
        }
        thread.display_name = title;
    }

    /// 该线程是否已有本地缓存
    pub fn has_history(&self, thread_id: &str) -> bool {
        self.messages.contains_key(thread_id)
    }

    pub fn messages(&self, thread_id: &str) -> &[Message] {
        self.messages
            .get(thread_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn push_message(&mut self, thread_id: &str, message: Message) {
        self.messages
            .entry(thread_id.to_string())
            .or_default()
            .push(message);
    }

    /// 用远端拉取的完整历史覆盖本地缓存
    pub fn replace_history(&mut self, thread_id: &str, history: Vec<Message>) {
        self.messages.insert(thread_id.to_string(), history);
    }

    pub fn review_thread(&self) -> Option<&ConversationThread> {
        self.review_thread.as_ref()
    }

    pub fn set_review_thread(&mut self, thread: ConversationThread) {
        self.review_thread = Some(thread);
    }

    pub fn feedback(&self, thread_id: &str, index: usize) -> Option<&str> {
        self.feedback
            .get(thread_id)
            .and_then(|m| m.get(&index))
            .map(String::as_str)
    }

    pub fn set_feedback(&mut self, thread_id: &str, index: usize, feedback: String) {
        self.feedback
            .entry(thread_id.to_string())
            .or_default()
            .insert(index, feedback);
    }

    /// 某主线程的全部反馈（按下标排序）
    pub fn feedback_entries(&self, thread_id: &str) -> impl Iterator<Item = (usize, &str)> {
        self.feedback
            .get(thread_id)
            .into_iter()
            .flat_map(|m| m.iter().map(|(i, s)| (*i, s.as_str())))
    }
}
