//! 助手注册：按 YAML 清单创建或更新远端 Assistant
//!
//! 已登记的名字只更新 instructions；未登记的名字创建新 Assistant 并把 ID 写回注册表。

use std::collections::HashMap;
use std::path::Path;

use crate::assistants::{
    Assistant, AssistantApi, AssistantTool, CreateAssistantRequest, ModifyAssistantRequest,
};
use crate::config::{AssistantSpec, ProvisioningConfig};
use crate::core::error::{AssistantError, Result};
use crate::registry::AssistantRegistry;

/// 写入 Assistant metadata 的推理深度键
pub const REASONING_METADATA_KEY: &str = "reasoning_depth";

/// 挂载的工具：默认一个 code_interpreter；toolless_models 中的模型不挂工具
pub fn tools_for_model(model: &str, toolless_models: &[String]) -> Vec<AssistantTool> {
    if toolless_models.iter().any(|m| m == model) {
        Vec::new()
    } else {
        vec![AssistantTool::CodeInterpreter]
    }
}

fn read_instructions(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(AssistantError::InstructionFileNotFound(path.to_path_buf()));
    }
    Ok(std::fs::read_to_string(path)?)
}

/// 从说明文件创建 Assistant，成功后登记 name -> id
pub async fn create_assistant_from_file(
    api: &dyn AssistantApi,
    registry: &AssistantRegistry,
    spec: &AssistantSpec,
    toolless_models: &[String],
) -> Result<String> {
    let instructions = read_instructions(&spec.instruction_file)?;
    let metadata = HashMap::from([(REASONING_METADATA_KEY.to_string(), spec.reasoning.clone())]);
    let request = CreateAssistantRequest {
        name: spec.name.clone(),
        instructions,
        model: spec.model.clone(),
        tools: tools_for_model(&spec.model, toolless_models),
        metadata,
    };
    let assistant = api.create_assistant(request).await?;
    registry.save(&spec.name, &assistant.id)?;
    tracing::info!(name = %spec.name, id = %assistant.id, model = %spec.model, "created assistant");
    Ok(assistant.id)
}

/// 用说明文件更新已登记 Assistant 的 instructions；未登记时跳过并返回 None
pub async fn update_assistant_instructions_from_file(
    api: &dyn AssistantApi,
    registry: &AssistantRegistry,
    name: &str,
    instruction_file: &Path,
) -> Result<Option<String>> {
    let Some(assistant_id) = registry.get(name)? else {
        tracing::warn!(
            name,
            registry = %registry.path().display(),
            "assistant not registered, skipping update"
        );
        return Ok(None);
    };
    let instructions = read_instructions(instruction_file)?;
    let updated = api
        .update_assistant(&assistant_id, ModifyAssistantRequest { instructions })
        .await?;
    tracing::info!(name, id = %updated.id, "updated assistant instructions");
    Ok(Some(updated.id))
}

/// 单项处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionAction {
    Created(String),
    Updated(String),
    Skipped,
}

/// 逐项处理清单：已登记则更新，否则创建。任一项出错即中止
pub async fn create_or_update_assistants(
    api: &dyn AssistantApi,
    registry: &AssistantRegistry,
    config: &ProvisioningConfig,
    toolless_models: &[String],
) -> Result<Vec<(String, ProvisionAction)>> {
    let registered = registry.load()?;
    let mut results = Vec::with_capacity(config.assistants.len());
    for spec in &config.assistants {
        let action = if registered.contains_key(&spec.name) {
            match update_assistant_instructions_from_file(
                api,
                registry,
                &spec.name,
                &spec.instruction_file,
            )
            .await?
            {
                Some(id) => ProvisionAction::Updated(id),
                None => ProvisionAction::Skipped,
            }
        } else {
            ProvisionAction::Created(
                create_assistant_from_file(api, registry, spec, toolless_models).await?,
            )
        };
        results.push((spec.name.clone(), action));
    }
    Ok(results)
}

/// 查询所有已登记 Assistant 的远端详情
pub async fn assistant_details(
    api: &dyn AssistantApi,
    registry: &AssistantRegistry,
) -> Result<Vec<(String, Assistant)>> {
    let mut details = Vec::new();
    for (name, id) in registry.load()? {
        let assistant = api.retrieve_assistant(&id).await?;
        details.push((name, assistant));
    }
    Ok(details)
}

/// 详情的文本形式，首尾带 START / END 分隔线
pub fn format_details(name: &str, assistant: &Assistant) -> String {
    let created = chrono::DateTime::from_timestamp(assistant.created_at, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| assistant.created_at.to_string());
    let metadata = assistant
        .metadata
        .as_ref()
        .map(|m| {
            let mut pairs: Vec<_> = m.iter().map(|(k, v)| format!("{k}={v}")).collect();
            pairs.sort();
            pairs.join(", ")
        })
        .unwrap_or_default();
    let tools: Vec<String> = assistant
        .tools
        .iter()
        .map(|t| t["type"].as_str().unwrap_or("?").to_string())
        .collect();
    format!(
        "{rule}START{rule}\n\
         name:         {name}\n\
         id:           {id}\n\
         model:        {model}\n\
         created_at:   {created}\n\
         tools:        [{tools}]\n\
         metadata:     {{{metadata}}}\n\
         instructions: {instructions}\n\
         {rule}END{rule}",
        rule = "-".repeat(29),
        id = assistant.id,
        model = assistant.model,
        tools = tools.join(", "),
        instructions = assistant.instructions.as_deref().unwrap_or(""),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistants::MockAssistantApi;
    use crate::registry::{QREVIEW_ASSISTANT, SQL_ASSISTANT};
    use tempfile::TempDir;

    fn toolless() -> Vec<String> {
        vec!["o3-mini".to_string()]
    }

    fn spec(dir: &TempDir, name: &str, model: &str, text: Option<&str>) -> AssistantSpec {
        let path = dir.path().join(format!("{}.txt", name.replace(' ', "_")));
        if let Some(text) = text {
            std::fs::write(&path, text).unwrap();
        }
        AssistantSpec {
            name: name.to_string(),
            model: model.to_string(),
            instruction_file: path,
            reasoning: "high".to_string(),
        }
    }

    #[test]
    fn test_tools_for_model() {
        assert_eq!(tools_for_model("gpt-4o", &toolless()), vec![AssistantTool::CodeInterpreter]);
        assert!(tools_for_model("o3-mini", &toolless()).is_empty());
        assert_eq!(tools_for_model("o3-mini", &[]), vec![AssistantTool::CodeInterpreter]);
    }

    #[tokio::test]
    async fn test_create_saves_id_and_metadata() {
        let dir = TempDir::new().unwrap();
        let api = MockAssistantApi::new();
        let registry = AssistantRegistry::new(dir.path().join("ids.json"));
        let s = spec(&dir, SQL_ASSISTANT, "gpt-4o", Some("You write SQL."));

        let id = create_assistant_from_file(&api, &registry, &s, &toolless()).await.unwrap();

        assert_eq!(registry.resolve(SQL_ASSISTANT).unwrap(), id);
        let remote = api.assistant(&id).unwrap();
        assert_eq!(remote.instructions.as_deref(), Some("You write SQL."));
        assert_eq!(
            remote.metadata.unwrap().get(REASONING_METADATA_KEY).map(String::as_str),
            Some("high")
        );
        assert_eq!(remote.tools.len(), 1);
    }

    #[tokio::test]
    async fn test_create_missing_instruction_file() {
        let dir = TempDir::new().unwrap();
        let api = MockAssistantApi::new();
        let registry = AssistantRegistry::new(dir.path().join("ids.json"));
        let s = spec(&dir, SQL_ASSISTANT, "gpt-4o", None);

        let err = create_assistant_from_file(&api, &registry, &s, &toolless()).await.unwrap_err();

        assert!(matches!(err, AssistantError::InstructionFileNotFound(_)));
        assert_eq!(api.count_calls("create_assistant"), 0);
        assert!(registry.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_unknown_name_is_skipped() {
        let dir = TempDir::new().unwrap();
        let api = MockAssistantApi::new();
        let registry = AssistantRegistry::new(dir.path().join("ids.json"));
        registry.save(SQL_ASSISTANT, "asst_sql").unwrap();
        let before = std::fs::read_to_string(registry.path()).unwrap();
        let s = spec(&dir, "Ghost Assistant", "gpt-4o", Some("boo"));

        let result = update_assistant_instructions_from_file(&api, &registry, &s.name, &s.instruction_file)
            .await
            .unwrap();

        assert_eq!(result, None);
        assert_eq!(api.count_calls("update_assistant"), 0);
        assert_eq!(std::fs::read_to_string(registry.path()).unwrap(), before);
    }

    #[tokio::test]
    async fn test_create_or_update_batch() {
        let dir = TempDir::new().unwrap();
        let api = MockAssistantApi::new();
        api.insert_assistant("asst_sql", SQL_ASSISTANT, "gpt-4o");
        let registry = AssistantRegistry::new(dir.path().join("ids.json"));
        registry.save(SQL_ASSISTANT, "asst_sql").unwrap();
        let config = ProvisioningConfig {
            assistants: vec![
                spec(&dir, SQL_ASSISTANT, "gpt-4o", Some("v2 instructions")),
                spec(&dir, QREVIEW_ASSISTANT, "o3-mini", Some("Review SQL.")),
            ],
        };

        let results = create_or_update_assistants(&api, &registry, &config, &toolless())
            .await
            .unwrap();

        assert_eq!(results[0], (SQL_ASSISTANT.to_string(), ProvisionAction::Updated("asst_sql".to_string())));
        let review_id = match &results[1].1 {
            ProvisionAction::Created(id) => id.clone(),
            other => panic!("expected Created, got {other:?}"),
        };
        assert_eq!(api.assistant("asst_sql").unwrap().instructions.as_deref(), Some("v2 instructions"));
        assert!(api.assistant(&review_id).unwrap().tools.is_empty());
        let ids = registry.load().unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids.get(SQL_ASSISTANT).map(String::as_str), Some("asst_sql"));
    }

    #[tokio::test]
    async fn test_details_formatting() {
        let dir = TempDir::new().unwrap();
        let api = MockAssistantApi::new();
        api.insert_assistant("asst_sql", SQL_ASSISTANT, "gpt-4o");
        let registry = AssistantRegistry::new(dir.path().join("ids.json"));
        registry.save(SQL_ASSISTANT, "asst_sql").unwrap();

        let details = assistant_details(&api, &registry).await.unwrap();
        assert_eq!(details.len(), 1);
        let text = format_details(&details[0].0, &details[0].1);
        assert!(text.contains("START"));
        assert!(text.contains("asst_sql"));
        assert!(text.trim_end().ends_with(&format!("END{}", "-".repeat(29))));
    }
}
