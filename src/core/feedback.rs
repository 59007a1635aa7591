//! 审查反馈与消息的展示分类
//!
//! 远端模型的原始文本只在这里被解释一次：
//! - 反馈为 "true"（忽略大小写与首尾空白）表示查询无需修改；
//! - 以 ``` 开头且以 ``` 结尾的文本视为代码块，去掉围栏（及 sql 等语言标记）后作为修订后的查询；
//! - 其余按普通文本展示。

const FENCE: &str = "```";

/// 审查通过时展示的固定提示
pub const APPROVED_NOTICE: &str = "The query is good. No changes needed.";

/// 审查反馈的三种形态
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Feedback {
    Approved,
    RevisedQuery(String),
    Commentary(String),
}

/// 助手消息的两种展示形态
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageView {
    Query(String),
    Text(String),
}

pub fn classify_feedback(raw: &str) -> Feedback {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        return Feedback::Approved;
    }
    match strip_fence(trimmed) {
        Some(code) => Feedback::RevisedQuery(code),
        None => Feedback::Commentary(trimmed.to_string()),
    }
}

pub fn classify_message(content: &str) -> MessageView {
    let trimmed = content.trim();
    match strip_fence(trimmed) {
        Some(code) => MessageView::Query(code),
        None => MessageView::Text(trimmed.to_string()),
    }
}

/// 提交审查时发送的文本：代码块取其内容，否则取去空白后的原文
pub fn review_text(content: &str) -> String {
    match classify_message(content) {
        MessageView::Query(code) | MessageView::Text(code) => code,
    }
}

/// 生成的 SQL 包装为 ```sql 代码块
pub fn fence_sql(sql: &str) -> String {
    format!("{FENCE}sql\n{sql}\n{FENCE}")
}

/// 围栏首行可识别的语言标记（忽略大小写）
const LANGUAGE_TAGS: &[&str] = &[
    "sql", "postgresql", "postgres", "pgsql", "mysql", "sqlite", "tsql", "plsql", "text",
];

/// 去掉首尾围栏；首行为空或是已知语言标记时一并去掉。不是完整代码块时返回 None
fn strip_fence(text: &str) -> Option<String> {
    if text.len() < FENCE.len() * 2 || !text.starts_with(FENCE) || !text.ends_with(FENCE) {
        return None;
    }
    let inner = &text[FENCE.len()..text.len() - FENCE.len()];
    let body = match inner.split_once('\n') {
        Some((first, rest)) if is_language_tag(first.trim()) => rest,
        _ => inner,
    };
    Some(body.trim().to_string())
}

fn is_language_tag(line: &str) -> bool {
    line.is_empty() || LANGUAGE_TAGS.iter().any(|t| line.eq_ignore_ascii_case(t))
}
