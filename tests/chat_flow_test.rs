//! 对话流程集成测试（Mock 服务）

use std::sync::Arc;
use std::time::Duration;

use sqlassist::assistants::{AssistantApi, Message, MockAssistantApi, Role, ScriptedRun};
use sqlassist::core::run::DEFAULT_QUERY_TOOL;
use sqlassist::core::{AssistantError, ChatService, PollPolicy, RunOptions, RunOutcome};
use tokio_util::sync::CancellationToken;

const SQL_ID: &str = "asst_sql";
const REVIEW_ID: &str = "asst_review";

fn service_with(api: &Arc<MockAssistantApi>, resume_after_tool_call: bool) -> ChatService {
    let options = RunOptions {
        policy: PollPolicy {
            initial_interval: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_interval: Duration::from_millis(1),
            timeout: Some(Duration::from_secs(5)),
        },
        resume_after_tool_call,
        ..RunOptions::default()
    };
    let api: Arc<dyn AssistantApi> = api.clone();
    ChatService::new(api, SQL_ID, REVIEW_ID, options)
}

fn service(api: &Arc<MockAssistantApi>) -> ChatService {
    service_with(api, RunOptions::default().resume_after_tool_call)
}

#[tokio::test]
async fn test_send_message_tool_call_stores_fenced_query() {
    let api = Arc::new(MockAssistantApi::new());
    let chat = service(&api);
    let mut session = chat.start_session().await.unwrap();
    api.push_run(
        ScriptedRun::tool_call(DEFAULT_QUERY_TOOL, r#"{"sql": "SELECT * FROM users"}"#).with_pending(2),
    );

    let outcome = chat
        .send_message(&mut session, "show me all users", &CancellationToken::new())
        .await
        .unwrap();

    let expected = "```sql\nSELECT * FROM users\n```";
    assert_eq!(outcome, RunOutcome::ToolQuery(expected.to_string()));
    let history = session.messages(session.active_thread_id());
    assert_eq!(
        history,
        &[Message::user("show me all users"), Message::assistant(expected)]
    );
    assert_eq!(session.active_thread().display_name, "show me all users");
    let runs: Vec<_> = api.calls().into_iter().filter(|c| c.starts_with("create_run")).collect();
    assert_eq!(runs.len(), 1);
    assert!(runs[0].ends_with(SQL_ID));
}

#[tokio::test]
async fn test_completed_reply_is_appended_and_keeps_local_queries() {
    let api = Arc::new(MockAssistantApi::new());
    let chat = service(&api);
    let mut session = chat.start_session().await.unwrap();
    let cancel = CancellationToken::new();

    api.push_run(ScriptedRun::tool_call(DEFAULT_QUERY_TOOL, r#"{"sql": "SELECT 1"}"#));
    chat.send_message(&mut session, "one", &cancel).await.unwrap();
    api.push_run(ScriptedRun::reply("There are 3 tables.").with_pending(1));
    let outcome = chat.send_message(&mut session, "how many tables?", &cancel).await.unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    let history = session.messages(session.active_thread_id());
    assert_eq!(history.len(), 4);
    assert_eq!(history[1], Message::assistant("```sql\nSELECT 1\n```"));
    assert_eq!(history[3], Message::assistant("There are 3 tables."));
}

#[tokio::test]
async fn test_review_then_fix_uses_primary_thread() {
    let api = Arc::new(MockAssistantApi::new());
    let chat = service(&api);
    let mut session = chat.start_session().await.unwrap();
    let primary = session.active_thread_id().to_string();
    let cancel = CancellationToken::new();

    api.push_run(ScriptedRun::tool_call(DEFAULT_QUERY_TOOL, r#"{"sql": "SELECT * FROM users"}"#));
    chat.send_message(&mut session, "show me all users", &cancel).await.unwrap();

    api.push_run(ScriptedRun::reply("  Select only the columns you need.  "));
    let outcome = chat.review_message(&mut session, 1, &cancel).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(session.feedback(&primary, 1), Some("Select only the columns you need."));

    let review_thread = session.review_thread().unwrap().id.clone();
    assert_ne!(review_thread, primary);
    let posted = api.thread_messages(&review_thread);
    assert_eq!(posted[0].role, Role::User);
    assert_eq!(posted[0].text(), "SELECT * FROM users");

    api.push_run(ScriptedRun::tool_call(DEFAULT_QUERY_TOOL, r#"{"sql": "SELECT id, name FROM users"}"#));
    let outcome = chat.fix_with_feedback(&mut session, 1, &cancel).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::ToolQuery("```sql\nSELECT id, name FROM users\n```".to_string())
    );

    let remote = api.thread_messages(&primary);
    let prompt = remote.last().unwrap().text();
    assert!(prompt.contains("SELECT * FROM users"));
    assert!(prompt.contains("Select only the columns you need."));
    let history = session.messages(&primary);
    assert_eq!(
        history.last(),
        Some(&Message::assistant("```sql\nSELECT id, name FROM users\n```"))
    );
    // 审查线程只创建一次，修正不创建新线程
    assert_eq!(api.count_calls("create_thread"), 2);
}

#[tokio::test]
async fn test_review_tool_call_stores_revised_query() {
    let api = Arc::new(MockAssistantApi::new());
    let chat = service(&api);
    let mut session = chat.start_session().await.unwrap();
    let primary = session.active_thread_id().to_string();
    let cancel = CancellationToken::new();

    api.push_run(ScriptedRun::reply("SELECT name FROM users"));
    chat.send_message(&mut session, "names please", &cancel).await.unwrap();
    api.push_run(ScriptedRun::tool_call(DEFAULT_QUERY_TOOL, r#"{"sql": "SELECT name FROM users LIMIT 100"}"#));
    chat.review_message(&mut session, 1, &cancel).await.unwrap();

    assert_eq!(
        session.feedback(&primary, 1),
        Some("```sql\nSELECT name FROM users LIMIT 100\n```")
    );
    assert_eq!(session.messages(&primary).len(), 2);
}

#[tokio::test]
async fn test_invalid_review_and_fix_requests() {
    let api = Arc::new(MockAssistantApi::new());
    let chat = service(&api);
    let mut session = chat.start_session().await.unwrap();
    let cancel = CancellationToken::new();

    api.push_run(ScriptedRun::reply("Hello!"));
    chat.send_message(&mut session, "hi", &cancel).await.unwrap();
    let runs_before = api.count_calls("create_run");

    assert!(matches!(
        chat.review_message(&mut session, 0, &cancel).await,
        Err(AssistantError::NotReviewable(0))
    ));
    assert!(matches!(
        chat.review_message(&mut session, 9, &cancel).await,
        Err(AssistantError::NoSuchMessage(9))
    ));
    assert!(matches!(
        chat.fix_with_feedback(&mut session, 1, &cancel).await,
        Err(AssistantError::NoFeedback(1))
    ));
    assert_eq!(api.count_calls("create_run"), runs_before);
}

#[tokio::test]
async fn test_failed_run_keeps_user_message() {
    let api = Arc::new(MockAssistantApi::new());
    let chat = service(&api);
    let mut session = chat.start_session().await.unwrap();
    api.push_run(ScriptedRun::failure("server overloaded"));

    let err = chat
        .send_message(&mut session, "count orders", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_run_failure());
    assert_eq!(
        session.messages(session.active_thread_id()),
        &[Message::user("count orders")]
    );
}

#[tokio::test]
async fn test_threads_are_independent() {
    let api = Arc::new(MockAssistantApi::new());
    let chat = service(&api);
    let mut session = chat.start_session().await.unwrap();
    let cancel = CancellationToken::new();

    api.push_run(ScriptedRun::reply("first answer"));
    chat.send_message(&mut session, "first", &cancel).await.unwrap();
    let first = session.active_thread_id().to_string();

    let idx = chat.new_thread(&mut session).await.unwrap();
    assert_eq!(idx, 1);
    assert!(session.messages(session.active_thread_id()).is_empty());
    api.push_run(ScriptedRun::reply("second answer"));
    chat.send_message(&mut session, "second", &cancel).await.unwrap();
    assert_eq!(session.active_thread().display_name, "New Conversation");

    chat.switch_thread(&mut session, 0).await.unwrap();
    assert_eq!(session.active_thread_id(), first);
    assert_eq!(session.messages(&first).len(), 2);

    let remote = chat.fetch_history(&first).await.unwrap();
    assert_eq!(remote, vec![Message::user("first"), Message::assistant("first answer")]);
}

#[tokio::test]
async fn test_default_options_resume_so_thread_stays_usable() {
    assert!(RunOptions::default().resume_after_tool_call);
    let api = Arc::new(MockAssistantApi::new());
    let chat = service(&api);
    let mut session = chat.start_session().await.unwrap();
    let cancel = CancellationToken::new();

    api.push_run(ScriptedRun::tool_call(DEFAULT_QUERY_TOOL, r#"{"sql": "SELECT * FROM users"}"#));
    chat.send_message(&mut session, "show me all users", &cancel).await.unwrap();
    assert_eq!(api.count_calls("submit_tool_outputs"), 1);

    api.push_run(ScriptedRun::reply("Added a LIMIT."));
    let outcome = chat.send_message(&mut session, "limit it to 10", &cancel).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(session.messages(session.active_thread_id()).len(), 4);
}

#[tokio::test]
async fn test_without_resume_follow_up_is_rejected() {
    let api = Arc::new(MockAssistantApi::new());
    let chat = service_with(&api, false);
    let mut session = chat.start_session().await.unwrap();
    let primary = session.active_thread_id().to_string();
    let cancel = CancellationToken::new();

    api.push_run(ScriptedRun::tool_call(DEFAULT_QUERY_TOOL, r#"{"sql": "SELECT * FROM users"}"#));
    chat.send_message(&mut session, "show me all users", &cancel).await.unwrap();
    assert_eq!(api.count_calls("submit_tool_outputs"), 0);

    let err = chat
        .send_message(&mut session, "only active ones", &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, AssistantError::Api { status: 400, .. }));
    assert!(err.to_string().contains("active"));

    // 审查走独立线程，仍可进行；按反馈修正要回到被占用的主线程，同样被拒绝
    api.push_run(ScriptedRun::reply("Filter on status."));
    chat.review_message(&mut session, 1, &cancel).await.unwrap();
    let err = chat.fix_with_feedback(&mut session, 1, &cancel).await.unwrap_err();
    assert!(matches!(err, AssistantError::Api { status: 400, .. }));

    // 被拒绝的消息不进入本地历史
    assert_eq!(session.messages(&primary).len(), 2);
    assert_eq!(api.count_calls(&format!("create_run:{primary}")), 1);
}

#[tokio::test]
async fn test_resumed_thread_loads_history_on_first_switch() {
    let api = Arc::new(MockAssistantApi::new());
    let chat = service(&api);
    let old = api.create_thread().await.unwrap().id;
    api.create_message(&old, Role::User, "count orders").await.unwrap();
    api.push_run(ScriptedRun::reply("42 orders."));
    let run = api.create_run(&old, SQL_ID).await.unwrap();
    api.retrieve_run(&old, &run.id).await.unwrap();

    let mut session = chat.resume_session(&[old.clone()]).await.unwrap();
    assert_eq!(session.threads().len(), 2);
    assert_eq!(session.active_index(), 0);
    assert!(!session.has_history(&old));

    chat.switch_thread(&mut session, 1).await.unwrap();
    assert_eq!(session.active_thread_id(), old);
    assert_eq!(
        session.messages(&old),
        &[Message::user("count orders"), Message::assistant("42 orders.")]
    );
    let fetches = api.count_calls(&format!("list_messages:{old}"));
    assert_eq!(fetches, 1);

    chat.switch_thread(&mut session, 0).await.unwrap();
    chat.switch_thread(&mut session, 1).await.unwrap();
    assert_eq!(api.count_calls(&format!("list_messages:{old}")), fetches);
}

#[tokio::test]
async fn test_switch_to_unknown_remote_thread_keeps_current() {
    let api = Arc::new(MockAssistantApi::new());
    let chat = service(&api);
    let mut session = chat.resume_session(&["thread_gone".to_string()]).await.unwrap();
    let current = session.active_thread_id().to_string();

    let err = chat.switch_thread(&mut session, 1).await.unwrap_err();
    assert!(matches!(err, AssistantError::Api { status: 404, .. }));
    assert_eq!(session.active_thread_id(), current);
    assert!(matches!(
        chat.switch_thread(&mut session, 7).await,
        Err(AssistantError::NoSuchThread(7))
    ));
}
