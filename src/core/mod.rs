//! 核心编排层：错误、会话上下文、Run 状态机、反馈分类、对话编排

pub mod error;
pub mod feedback;
pub mod orchestrator;
pub mod run;
pub mod session;

pub use error::{AssistantError, Result};
pub use feedback::{classify_feedback, classify_message, Feedback, MessageView};
pub use orchestrator::{fix_prompt, ChatService};
pub use run::{wait_for_run, PollPolicy, RunMode, RunOptions, RunOutcome};
pub use session::{ConversationThread, SessionContext};
