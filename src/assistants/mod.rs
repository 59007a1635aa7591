//! 远端 Assistant 层：服务抽象与实现（OpenAI Assistants v2 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;
pub mod types;

pub use mock::{MockAssistantApi, ScriptedOutcome, ScriptedRun};
pub use openai::OpenAiAssistants;
pub use traits::AssistantApi;
pub use types::{
    Assistant, AssistantTool, CreateAssistantRequest, Message, ModifyAssistantRequest, Role, Run,
    RunStatus, Thread, ThreadMessage, ToolCall, ToolOutput,
};
