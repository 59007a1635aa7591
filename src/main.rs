//! SqlAssist - SQL 助手编排层
//!
//! 入口：加载 .env 与配置、初始化日志，然后按子命令运行交互对话、注册助手或查看助手详情。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use sqlassist::assistants::{AssistantApi, OpenAiAssistants};
use sqlassist::config::{api_key, load_config, load_provisioning_config, AppConfig};
use sqlassist::core::ChatService;
use sqlassist::provision::{
    assistant_details, create_or_update_assistants, format_details, ProvisionAction,
};
use sqlassist::registry::AssistantRegistry;
use sqlassist::{observability, ui};

#[derive(Parser)]
#[command(name = "sqlassist", version, about = "Chat with the SQL assistant and review its queries")]
struct Cli {
    /// 额外的 TOML 配置文件
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 注册表文件（默认取配置中的 registry_path）
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// 交互式对话（默认）
    Chat {
        /// 附上已有的远端线程 ID（可重复），切换到时加载其历史
        #[arg(long = "thread", value_name = "THREAD_ID")]
        threads: Vec<String>,
    },
    /// 按 YAML 清单创建或更新远端助手
    Provision {
        /// 助手清单文件（默认取配置中的 provisioning_file）
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// 打印已登记助手的远端详情
    Details,
}

fn connect(cfg: &AppConfig, prefer_org_key: bool) -> anyhow::Result<Arc<dyn AssistantApi>> {
    let key = api_key(prefer_org_key)?;
    let client = OpenAiAssistants::new(
        cfg.api.base_url.as_deref(),
        &key,
        cfg.api.request_timeout_secs,
    )
    .context("Failed to build HTTP client")?;
    Ok(Arc::new(client))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env 不存在不算错误
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // 日志：默认 info（--verbose 为 debug），可通过 RUST_LOG 覆盖
    observability::init(if cli.verbose { "debug" } else { "info" });

    let cfg = load_config(cli.config.clone()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let registry_path = cli
        .registry
        .clone()
        .unwrap_or_else(|| cfg.assistants.registry_path.clone());
    let registry = AssistantRegistry::new(registry_path).with_env_overrides();

    let command = cli.command.unwrap_or(Commands::Chat {
        threads: Vec::new(),
    });
    match command {
        Commands::Chat { threads } => {
            let api = connect(&cfg, false)?;
            let service = ChatService::from_config(&cfg, api, &registry)
                .context("Failed to resolve assistant IDs")?;
            let session = service
                .resume_session(&threads)
                .await
                .context("Failed to create conversation thread")?;
            ui::run_app(&service, session).await.context("Chat failed")?;
        }
        Commands::Provision { file } => {
            let path = file.unwrap_or_else(|| cfg.assistants.provisioning_file.clone());
            let provisioning = load_provisioning_config(&path)?;
            let api = connect(&cfg, true)?;
            let results = create_or_update_assistants(
                api.as_ref(),
                &registry,
                &provisioning,
                &cfg.assistants.toolless_models,
            )
            .await
            .context("Provisioning failed")?;
            for (name, action) in results {
                match action {
                    ProvisionAction::Created(id) => println!("✅ Created '{name}' ({id})"),
                    ProvisionAction::Updated(id) => println!("✅ Updated '{name}' ({id})"),
                    ProvisionAction::Skipped => println!("⚠️ Skipped '{name}' (not registered)"),
                }
            }
        }
        Commands::Details => {
            let api = connect(&cfg, false)?;
            let details = assistant_details(api.as_ref(), &registry)
                .await
                .context("Failed to fetch assistant details")?;
            if details.is_empty() {
                println!("No assistants registered in {}", registry.path().display());
            }
            for (name, assistant) in details {
                println!("{}", format_details(&name, &assistant));
            }
        }
    }

    Ok(())
}
