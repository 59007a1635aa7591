//! 文本渲染
//!
//! 助手消息若是代码块则按查询缩进显示，否则原样输出；有审查反馈的消息在下方附上
//! 反馈（通过 / 修订后的查询 / 文字意见）。消息编号从 1 开始，与命令参数一致。

use crate::assistants::{Message, Role};
use crate::core::feedback::{classify_feedback, classify_message, Feedback, MessageView, APPROVED_NOTICE};
use crate::core::session::SessionContext;

const INDENT: &str = "    ";

fn indent(text: &str) -> String {
    text.lines()
        .map(|l| format!("{INDENT}{l}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_feedback(raw: &str) -> String {
    match classify_feedback(raw) {
        Feedback::Approved => format!("  QReview: ✅ {APPROVED_NOTICE}"),
        Feedback::RevisedQuery(sql) => format!("  QReview revised query:\n{}", indent(&sql)),
        Feedback::Commentary(text) => format!("  QReview: {text}"),
    }
}

/// 渲染单条消息（index 为 0 起下标）及其反馈
pub fn render_message(index: usize, message: &Message, feedback: Option<&str>) -> String {
    let mut out = match message.role {
        Role::User => format!("[{}] you: {}", index + 1, message.content.trim()),
        Role::Assistant => match classify_message(&message.content) {
            MessageView::Query(sql) => format!("[{}] assistant (sql):\n{}", index + 1, indent(&sql)),
            MessageView::Text(text) => format!("[{}] assistant: {}", index + 1, text),
        },
    };
    if let Some(raw) = feedback {
        out.push('\n');
        out.push_str(&render_feedback(raw));
    }
    out
}

/// 当前线程的完整历史
pub fn render_history(session: &SessionContext) -> String {
    let thread = session.active_thread();
    let messages = session.messages(&thread.id);
    if messages.is_empty() {
        return format!("== {} (empty) ==", thread.display_name);
    }
    let mut blocks = vec![format!("== {} ==", thread.display_name)];
    blocks.extend(
        messages
            .iter()
            .enumerate()
            .map(|(i, m)| render_message(i, m, session.feedback(&thread.id, i))),
    );
    blocks.join("\n")
}

pub fn render_threads(session: &SessionContext) -> String {
    session
        .threads()
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let marker = if i == session.active_index() { "*" } else { " " };
            format!("{marker} {}. {}", i + 1, t.display_name)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::{ConversationThread, UNTITLED};

    #[test]
    fn test_render_sql_message_with_approval() {
        let msg = Message::assistant("```sql\nSELECT 1\n```");
        let out = render_message(0, &msg, Some(" true "));
        assert!(out.starts_with("[1] assistant (sql):\n    SELECT 1"));
        assert!(out.contains(APPROVED_NOTICE));
    }

    #[test]
    fn test_render_revised_query_feedback() {
        let out = render_feedback("```sql\nSELECT id FROM users\n```");
        assert_eq!(out, "  QReview revised query:\n    SELECT id FROM users");
    }

    #[test]
    fn test_render_history_and_threads() {
        let mut session = SessionContext::new(ConversationThread::new("t1", UNTITLED));
        session.push_message("t1", Message::user("hi"));
        session.push_message("t1", Message::assistant("hello"));
        session.set_feedback("t1", 1, "Looks fine but add LIMIT".to_string());
        let out = render_history(&session);
        assert!(out.contains("[1] you: hi"));
        assert!(out.contains("[2] assistant: hello\n  QReview: Looks fine but add LIMIT"));
        assert_eq!(render_threads(&session), "* 1. Untitled");
    }
}
