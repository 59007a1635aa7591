//! Assistant 注册表
//!
//! 名字 -> 远端 ID 的映射，保存在单个 JSON 文件中（默认 assistant_ids.json）。
//! 写入时整体读-合并-写，不会丢失已有条目；读取时再叠加环境变量中配置的 ID。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::error::{AssistantError, Result};

pub const DEFAULT_REGISTRY_FILE: &str = "assistant_ids.json";

pub const SQL_ASSISTANT: &str = "SQL Assistant";
pub const QREVIEW_ASSISTANT: &str = "QReview Assistant";

/// 环境变量名 -> 助手名
const ENV_IDS: &[(&str, &str)] = &[
    ("SQL_ASSISTANT_ID", SQL_ASSISTANT),
    ("QREVIEW_ASSISTANT_ID", QREVIEW_ASSISTANT),
];

#[derive(Debug, Clone)]
pub struct AssistantRegistry {
    path: PathBuf,
    /// 不落盘的覆盖项（来自环境变量），优先于文件
    overrides: BTreeMap<String, String>,
}

impl AssistantRegistry {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            overrides: BTreeMap::new(),
        }
    }

    /// 叠加 SQL_ASSISTANT_ID / QREVIEW_ASSISTANT_ID（空值忽略）
    pub fn with_env_overrides(mut self) -> Self {
        for (var, name) in ENV_IDS {
            if let Ok(id) = std::env::var(var) {
                if !id.trim().is_empty() {
                    self.overrides.insert((*name).to_string(), id.trim().to_string());
                }
            }
        }
        self
    }

    pub fn with_override(mut self, name: impl Into<String>, id: impl Into<String>) -> Self {
        self.overrides.insert(name.into(), id.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 仅读取文件；文件不存在时返回空映射
    pub fn load_file(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        if data.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&data)?)
    }

    /// 文件内容叠加覆盖项后的完整映射
    pub fn load(&self) -> Result<BTreeMap<String, String>> {
        let mut ids = self.load_file()?;
        ids.extend(self.overrides.clone());
        Ok(ids)
    }

    pub fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.load()?.remove(name))
    }

    pub fn resolve(&self, name: &str) -> Result<String> {
        self.get(name)?
            .ok_or_else(|| AssistantError::UnknownAssistant(name.to_string()))
    }

    /// 记录 name -> id：读取现有文件、合并、整体写回
    pub fn save(&self, name: &str, assistant_id: &str) -> Result<()> {
        let mut ids = self.load_file()?;
        ids.insert(name.to_string(), assistant_id.to_string());
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&ids)?)?;
        tracing::info!(name, assistant_id, path = %self.path.display(), "saved assistant id");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let registry = AssistantRegistry::new(dir.path().join("assistant_ids.json"));
        registry.save(SQL_ASSISTANT, "asst_sql").unwrap();

        let reloaded = AssistantRegistry::new(registry.path()).load().unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get(SQL_ASSISTANT).map(String::as_str), Some("asst_sql"));
    }

    #[test]
    fn test_save_merges_entries() {
        let dir = TempDir::new().unwrap();
        let registry = AssistantRegistry::new(dir.path().join("ids.json"));
        registry.save(SQL_ASSISTANT, "asst_sql").unwrap();
        registry.save(QREVIEW_ASSISTANT, "asst_review").unwrap();

        let ids = registry.load().unwrap();
        assert_eq!(ids.get(SQL_ASSISTANT).map(String::as_str), Some("asst_sql"));
        assert_eq!(ids.get(QREVIEW_ASSISTANT).map(String::as_str), Some("asst_review"));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let registry = AssistantRegistry::new(dir.path().join("nope.json"));
        assert!(registry.load().unwrap().is_empty());
        assert!(matches!(
            registry.resolve(SQL_ASSISTANT),
            Err(AssistantError::UnknownAssistant(_))
        ));
    }

    #[test]
    fn test_overrides_win_but_are_not_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ids.json");
        AssistantRegistry::new(&path).save(SQL_ASSISTANT, "asst_file").unwrap();

        let registry = AssistantRegistry::new(&path).with_override(SQL_ASSISTANT, "asst_env");
        assert_eq!(registry.resolve(SQL_ASSISTANT).unwrap(), "asst_env");
        registry.save(QREVIEW_ASSISTANT, "asst_review").unwrap();

        let on_disk = AssistantRegistry::new(&path).load_file().unwrap();
        assert_eq!(on_disk.get(SQL_ASSISTANT).map(String::as_str), Some("asst_file"));
        assert_eq!(on_disk.len(), 2);
    }

    #[test]
    fn test_nested_path_created() {
        let dir = TempDir::new().unwrap();
        let registry = AssistantRegistry::new(dir.path().join("state/ids.json"));
        registry.save(SQL_ASSISTANT, "asst_sql").unwrap();
        assert!(registry.path().exists());
    }
}
