//! SqlAssist - SQL 助手编排层
//!
//! 模块划分：
//! - **assistants**: 远端 Assistant 服务抽象与实现（OpenAI Assistants v2 / Mock）
//! - **config**: 应用配置（TOML + 环境变量）与助手清单（YAML）加载
//! - **core**: 会话上下文、Run 完成状态机、反馈分类、对话编排
//! - **observability**: 日志初始化
//! - **provision**: 按清单创建 / 更新远端 Assistant
//! - **registry**: 助手名 -> 远端 ID 注册表
//! - **ui**: 命令行交互对话

pub mod assistants;
pub mod config;
pub mod core;
pub mod observability;
pub mod provision;
pub mod registry;
pub mod ui;
