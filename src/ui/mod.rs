//! 命令行交互层：主循环（app）、输入解析（event）、文本渲染（render）

pub mod app;
pub mod event;
pub mod render;

pub use app::run_app;
pub use event::{parse_input, Command};
