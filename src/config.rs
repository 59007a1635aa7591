//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SQLASSIST__*` 覆盖（双下划线表示嵌套，如 `SQLASSIST__POLLING__TIMEOUT_SECS=600`）。
//! 凭据与助手 ID 不放在配置文件里，来自环境变量（支持 .env）。
//! 助手清单（注册用）是单独的 YAML 文件，见 load_provisioning_config。

use std::path::{Path, PathBuf};
use std::time::Duration;

use ::config::{Config, ConfigError, Environment, File, FileFormat};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::core::error::{AssistantError, Result};
use crate::core::run::{PollPolicy, RunOptions, DEFAULT_QUERY_TOOL};
use crate::registry::{DEFAULT_REGISTRY_FILE, QREVIEW_ASSISTANT, SQL_ASSISTANT};

pub const DEFAULT_PROVISIONING_FILE: &str = "assistant_utils/assistants_config.yaml";

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiSection,
    pub assistants: AssistantsSection,
    pub polling: PollingSection,
    pub tools: ToolsSection,
}

/// [api] 段：服务地址与单次请求超时
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSection {
    pub base_url: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [assistants] 段：主助手 / 审查助手的名字、注册表与清单路径
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantsSection {
    #[serde(default = "default_sql_name")]
    pub sql_name: String,
    #[serde(default = "default_review_name")]
    pub review_name: String,
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,
    #[serde(default = "default_provisioning_file")]
    pub provisioning_file: PathBuf,
    /// 注册时不挂载任何工具的模型
    #[serde(default = "default_toolless_models")]
    pub toolless_models: Vec<String>,
}

impl Default for AssistantsSection {
    fn default() -> Self {
        Self {
            sql_name: default_sql_name(),
            review_name: default_review_name(),
            registry_path: default_registry_path(),
            provisioning_file: default_provisioning_file(),
            toolless_models: default_toolless_models(),
        }
    }
}

fn default_sql_name() -> String {
    SQL_ASSISTANT.to_string()
}

fn default_review_name() -> String {
    QREVIEW_ASSISTANT.to_string()
}

fn default_registry_path() -> PathBuf {
    PathBuf::from(DEFAULT_REGISTRY_FILE)
}

fn default_provisioning_file() -> PathBuf {
    PathBuf::from(DEFAULT_PROVISIONING_FILE)
}

fn default_toolless_models() -> Vec<String> {
    vec!["o3-mini".into()]
}

/// [polling] 段：Run 轮询间隔、退避与总时限（timeout_secs = 0 表示不限）
#[derive(Debug, Clone, Deserialize)]
pub struct PollingSection {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    #[serde(default = "default_poll_timeout")]
    pub timeout_secs: u64,
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            backoff_factor: default_backoff_factor(),
            max_interval_ms: default_max_interval_ms(),
            timeout_secs: default_poll_timeout(),
        }
    }
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_backoff_factor() -> f64 {
    1.5
}

fn default_max_interval_ms() -> u64 {
    5000
}

fn default_poll_timeout() -> u64 {
    300
}

impl PollingSection {
    pub fn policy(&self) -> PollPolicy {
        let initial = Duration::from_millis(self.interval_ms.max(1));
        PollPolicy {
            initial_interval: initial,
            backoff_factor: self.backoff_factor,
            max_interval: Duration::from_millis(self.max_interval_ms).max(initial),
            timeout: (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs)),
        }
    }
}

/// [tools] 段：查询生成工具名、requires_action 后是否继续 Run
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    #[serde(default = "default_query_tool")]
    pub query_tool: String,
    #[serde(default = "default_resume")]
    pub resume_after_tool_call: bool,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            query_tool: default_query_tool(),
            resume_after_tool_call: default_resume(),
        }
    }
}

fn default_query_tool() -> String {
    DEFAULT_QUERY_TOOL.to_string()
}

fn default_resume() -> bool {
    true
}

impl AppConfig {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            policy: self.polling.policy(),
            query_tool: self.tools.query_tool.clone(),
            resume_after_tool_call: self.tools.resume_after_tool_call,
        }
    }
}

const DEFAULT_CONFIG_CANDIDATES: [&str; 3] =
    ["config/default.toml", "../config/default.toml", "default.toml"];
const ENV_PREFIX: &str = "SQLASSIST";

/// 依次叠加文件源（format 为 None 时按扩展名推断），可选再叠加环境变量源
fn layered<T: DeserializeOwned>(
    files: Vec<(PathBuf, Option<FileFormat>)>,
    env_prefix: Option<&str>,
) -> std::result::Result<T, ConfigError> {
    let mut builder = Config::builder();
    for (path, format) in files {
        let file = File::from(path);
        builder = builder.add_source(match format {
            Some(format) => file.format(format),
            None => file,
        });
    }
    if let Some(prefix) = env_prefix {
        builder = builder.add_source(
            Environment::with_prefix(prefix)
                .separator("__")
                .try_parsing(true),
        );
    }
    builder.build()?.try_deserialize()
}

/// 加载应用配置
///
/// 来源依次为：找到的第一个默认 TOML（config/default.toml 等）、config_path（存在时）、
/// 环境变量 SQLASSIST__*（双下划线表示嵌套键）。后者覆盖前者。
pub fn load_config(config_path: Option<PathBuf>) -> std::result::Result<AppConfig, ConfigError> {
    let mut files = Vec::new();
    if let Some(default) = DEFAULT_CONFIG_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
    {
        files.push((default, Some(FileFormat::Toml)));
    }
    match config_path {
        Some(path) if path.exists() => files.push((path, None)),
        Some(path) => tracing::warn!(path = %path.display(), "config file not found, using defaults"),
        None => {}
    }
    layered(files, Some(ENV_PREFIX))
}

/// 读取 API Key；prefer_org 时优先 ORG_OPENAI_API_KEY（注册流程使用组织级 Key）
pub fn api_key(prefer_org: bool) -> Result<String> {
    let vars: &[&str] = if prefer_org {
        &["ORG_OPENAI_API_KEY", "OPENAI_API_KEY"]
    } else {
        &["OPENAI_API_KEY"]
    };
    vars.iter()
        .filter_map(|v| std::env::var(v).ok())
        .find(|k| !k.trim().is_empty())
        .ok_or_else(|| AssistantError::MissingCredential(vars.join(" or ")))
}

/// 助手清单（YAML）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProvisioningConfig {
    #[serde(default)]
    pub assistants: Vec<AssistantSpec>,
}

/// 清单中的一项
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AssistantSpec {
    pub name: String,
    pub model: String,
    pub instruction_file: PathBuf,
    #[serde(default = "default_reasoning")]
    pub reasoning: String,
}

fn default_reasoning() -> String {
    "high".to_string()
}

/// 加载助手清单；文件不存在直接报错
pub fn load_provisioning_config(path: &Path) -> Result<ProvisioningConfig> {
    if !path.exists() {
        return Err(AssistantError::ConfigNotFound(path.to_path_buf()));
    }
    Ok(layered(vec![(path.to_path_buf(), Some(FileFormat::Yaml))], None)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.assistants.sql_name, SQL_ASSISTANT);
        assert_eq!(cfg.assistants.toolless_models, vec!["o3-mini".to_string()]);
        let options = cfg.run_options();
        assert_eq!(options.query_tool, DEFAULT_QUERY_TOOL);
        assert_eq!(options.policy.initial_interval, Duration::from_secs(1));
        assert_eq!(options.policy.timeout, Some(Duration::from_secs(300)));
        assert!(options.resume_after_tool_call);
    }

    #[test]
    fn test_missing_explicit_file_falls_back() {
        let dir = TempDir::new().unwrap();
        let cfg = load_config(Some(dir.path().join("absent.toml"))).unwrap();
        assert_eq!(cfg.polling.timeout_secs, 300);
        assert_eq!(cfg.tools.query_tool, DEFAULT_QUERY_TOOL);
    }

    #[test]
    fn test_zero_timeout_is_unbounded() {
        let polling = PollingSection {
            timeout_secs: 0,
            ..PollingSection::default()
        };
        assert_eq!(polling.policy().timeout, None);
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.toml");
        std::fs::write(
            &path,
            "[polling]\ninterval_ms = 250\n\n[tools]\nresume_after_tool_call = false\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.polling.interval_ms, 250);
        assert_eq!(cfg.polling.max_interval_ms, 5000);
        assert!(!cfg.tools.resume_after_tool_call);
    }

    #[test]
    fn test_provisioning_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("assistants.yaml");
        std::fs::write(
            &path,
            "assistants:\n  - name: SQL Assistant\n    model: gpt-4o\n    instruction_file: instructions/sql.txt\n  - name: QReview Assistant\n    model: o3-mini\n    instruction_file: instructions/review.txt\n    reasoning: medium\n",
        )
        .unwrap();
        let cfg = load_provisioning_config(&path).unwrap();
        assert_eq!(cfg.assistants.len(), 2);
        assert_eq!(cfg.assistants[0].reasoning, "high");
        assert_eq!(cfg.assistants[1].reasoning, "medium");
        assert_eq!(cfg.assistants[1].instruction_file, PathBuf::from("instructions/review.txt"));
    }

    #[test]
    fn test_missing_provisioning_file() {
        let err = load_provisioning_config(Path::new("/nonexistent/assistants.yaml")).unwrap_err();
        assert!(matches!(err, AssistantError::ConfigNotFound(_)));
    }
}
