//! 输入解析
//!
//! 普通文本作为消息发送；以 / 开头的是命令。消息编号对用户从 1 开始，解析后转为 0 起的下标。

/// 前端命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    /// 审查第 n 条消息（0 起）
    Review(usize),
    /// 按反馈修正第 n 条消息（0 起）
    Fix(usize),
    NewThread,
    /// 切换到第 n 个线程（0 起）
    Switch(usize),
    Threads,
    History,
    Help,
    Quit,
    Empty,
    Invalid(String),
}

pub const HELP: &str = "\
Commands:
  <text>          send a message to the SQL assistant
  /review <n>     review message n with the QReview assistant
  /fix <n>        ask the SQL assistant to fix message n using its review
  /new            start a new conversation
  /threads        list conversations
  /switch <n>     switch to conversation n
  /history        show the current conversation
  /help           show this help
  /quit           exit
Ctrl+C while waiting cancels the running request; Ctrl+C or Ctrl+D at the prompt exits.";

pub fn parse_input(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Send(line.to_string());
    };
    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or("");
    let arg = parts.next();
    match name {
        "review" | "r" => with_number(arg, Command::Review),
        "fix" | "f" => with_number(arg, Command::Fix),
        "switch" | "s" => with_number(arg, Command::Switch),
        "new" => Command::NewThread,
        "threads" => Command::Threads,
        "history" => Command::History,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => Command::Invalid(format!("unknown command: /{other}")),
    }
}

fn with_number(arg: Option<&str>, build: fn(usize) -> Command) -> Command {
    match arg.and_then(|a| a.parse::<usize>().ok()) {
        Some(n) if n >= 1 => build(n - 1),
        _ => Command::Invalid("expected a number starting at 1".to_string()),
    }
}
