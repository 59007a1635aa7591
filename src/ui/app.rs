//! 交互式对话主循环
//!
//! 逐行读取 stdin，解析为 Command 后调用 ChatService；需要等待远端 Run 的操作期间
//! 监听 Ctrl+C，触发后取消当前请求（主循环继续）；在提示符处按 Ctrl+C、stdin 关闭（Ctrl+D）
//! 或 /quit 退出。

use std::future::Future;
use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio_util::sync::CancellationToken;

use crate::core::{AssistantError, ChatService, Result, RunOutcome, SessionContext};
use crate::ui::event::{parse_input, Command, HELP};
use crate::ui::render::{render_history, render_message, render_threads};

/// 等待 fut 完成；期间收到 Ctrl+C 则取消 token，由 fut 自行以 Cancelled 返回
async fn run_cancellable<T>(
    fut: impl Future<Output = Result<T>>,
    token: &CancellationToken,
) -> Result<T> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            result = &mut fut => return result,
            _ = ctrl_c(), if !token.is_cancelled() => {
                tracing::info!("Received Ctrl+C, cancelling request");
                token.cancel();
            }
        }
    }
}

/// Ctrl+C；无法注册信号处理时永不完成
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

/// 读取下一行；输入结束或 shutdown 先完成时返回 None
async fn read_line<R: AsyncBufRead + Unpin>(
    lines: &mut Lines<R>,
    shutdown: impl Future<Output = ()>,
) -> std::io::Result<Option<String>> {
    tokio::select! {
        line = lines.next_line() => line,
        _ = shutdown => Ok(None),
    }
}

fn report_error(e: &AssistantError) {
    match e {
        AssistantError::Cancelled => println!("Request cancelled."),
        AssistantError::RunFailed { reason, .. } => {
            println!("Assistant failed to respond. ({reason})")
        }
        AssistantError::RunTimeout { waited_secs, .. } => {
            println!("Assistant failed to respond within {waited_secs}s.")
        }
        other => println!("Error: {other}"),
    }
}

/// 打印当前线程下标在 [from, to) 内的消息
fn print_new_messages(session: &SessionContext, from: usize, to: usize) {
    let thread_id = session.active_thread_id();
    let messages = session.messages(thread_id);
    for (i, m) in messages.iter().enumerate().take(to).skip(from) {
        println!("{}", render_message(i, m, session.feedback(thread_id, i)));
    }
}

fn prompt(session: &SessionContext) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    write!(stdout, "{}> ", session.active_thread().display_name)?;
    stdout.flush()
}

/// 运行交互式对话，直到 /quit 或 stdin 关闭
pub async fn run_app(service: &ChatService, mut session: SessionContext) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{HELP}");

    loop {
        prompt(&session)?;
        let Some(line) = read_line(&mut lines, ctrl_c()).await? else {
            println!();
            break;
        };

        match parse_input(&line) {
            Command::Quit => break,
            Command::Empty => {}
            Command::Help => println!("{HELP}"),
            Command::Invalid(msg) => println!("{msg}"),
            Command::Threads => println!("{}", render_threads(&session)),
            Command::History => println!("{}", render_history(&session)),
            Command::NewThread => match service.new_thread(&mut session).await {
                Ok(_) => println!("{}", render_threads(&session)),
                Err(e) => report_error(&e),
            },
            Command::Switch(index) => match service.switch_thread(&mut session, index).await {
                Ok(()) => println!("{}", render_history(&session)),
                Err(e) => report_error(&e),
            },
            Command::Send(text) => {
                let token = CancellationToken::new();
                let before = session.messages(session.active_thread_id()).len();
                println!("Thinking...");
                let result =
                    run_cancellable(service.send_message(&mut session, &text, &token), &token).await;
                match result {
                    // 用户消息已打印过，从其后开始
                    Ok(_) => print_new_messages(&session, before + 1, usize::MAX),
                    Err(e) => report_error(&e),
                }
            }
            Command::Review(index) => {
                let token = CancellationToken::new();
                println!("Reviewing...");
                let result =
                    run_cancellable(service.review_message(&mut session, index, &token), &token).await;
                match result {
                    Ok(RunOutcome::UnhandledAction(tool)) => {
                        println!("Reviewer requested an unsupported tool: {tool}")
                    }
                    Ok(_) => print_new_messages(&session, index, index + 1),
                    Err(e) => report_error(&e),
                }
            }
            Command::Fix(index) => {
                let token = CancellationToken::new();
                let before = session.messages(session.active_thread_id()).len();
                println!("Fixing...");
                let result =
                    run_cancellable(service.fix_with_feedback(&mut session, index, &token), &token)
                        .await;
                match result {
                    Ok(_) => print_new_messages(&session, before + 1, usize::MAX),
                    Err(e) => report_error(&e),
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_read_line_returns_input() {
        let (mut tx, rx) = tokio::io::duplex(64);
        tx.write_all(b"show me all users\n").await.unwrap();
        let mut lines = BufReader::new(rx).lines();
        let line = read_line(&mut lines, std::future::pending()).await.unwrap();
        assert_eq!(line.as_deref(), Some("show me all users"));
    }

    #[tokio::test]
    async fn test_read_line_stops_on_shutdown_while_idle() {
        // 写端保持打开：没有输入也没有 EOF
        let (_tx, rx) = tokio::io::duplex(64);
        let mut lines = BufReader::new(rx).lines();
        let line = read_line(&mut lines, async {}).await.unwrap();
        assert_eq!(line, None);
    }
}
