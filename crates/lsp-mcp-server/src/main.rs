use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use lsp_mcp_config::{ConfigManager, EnvSource, LayeredSource};
use lsp_mcp_gateway::{Gateway, GatewaySettings, ListenerStatus, TracingSink};
use lsp_mcp_observability::{LogManager, LoggingConfig};

mod tools;

use tools::builtin_tools;

#[derive(Parser, Debug, Clone)]
#[command(name = "lsp-mcp-server")]
#[command(about = "Local MCP server over streamable HTTP")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(long, env = "LSP_MCP_CONFIG", default_value = "~/.lsp-mcp/config.json")]
    config: String,

    /// Preferred port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Loopback host to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// How many higher ports to try when the preferred one is taken
    #[arg(long)]
    max_retries: Option<u32>,

    /// Log level or filter directive (overrides config)
    #[arg(long, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable debug logging
    #[arg(long, short, default_value = "false")]
    debug: bool,

    /// Start with the listener disabled
    #[arg(long, default_value = "false")]
    disable: bool,
}

impl Cli {
    /// CLI 参数优先级最高，以配置键的形式表达
    fn overrides(&self) -> HashMap<String, String> {
        let mut overrides = HashMap::new();
        if let Some(port) = self.port {
            overrides.insert("gateway.port".to_string(), port.to_string());
        }
        if let Some(ref host) = self.host {
            overrides.insert("gateway.host".to_string(), host.clone());
        }
        if let Some(max_retries) = self.max_retries {
            overrides.insert("gateway.max_retries".to_string(), max_retries.to_string());
        }
        if self.disable {
            overrides.insert("gateway.enabled".to_string(), "false".to_string());
        }
        overrides
    }

    fn log_level(&self) -> Option<String> {
        if self.debug {
            Some("debug".to_string())
        } else {
            self.log_level.clone()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 展开配置文件路径
    let config_path = lsp_mcp_config::expand_tilde(&cli.config)
        .unwrap_or_else(|| PathBuf::from(&cli.config));

    // 加载配置（不存在时写入默认配置）
    let config_manager = ConfigManager::load(&config_path)
        .await
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    let config = config_manager.snapshot().await;

    // 初始化日志
    let mut logging = LoggingConfig::from(&config.logging);
    if let Some(level) = cli.log_level() {
        logging = logging.with_level(level);
    }
    let log_manager = LogManager::new(&logging).context("Failed to initialize logging")?;
    tracing::info!("Config loaded from {:?}", config_path);

    // CLI > 环境变量 > 配置文件
    let source = LayeredSource::new()
        .with(cli.overrides())
        .with(EnvSource::new())
        .with(config);
    let settings = GatewaySettings::from_source(&source)?;
    tracing::debug!("Gateway settings: {:?}", settings);

    let tools = builtin_tools(&settings.server_name, &settings.server_version);
    let gateway = Gateway::new(settings, Arc::new(tools), Arc::new(TracingSink));

    let Some(handle) = gateway.start() else {
        log_manager.shutdown();
        return Ok(());
    };

    if let ListenerStatus::Failed(message) = handle.wait_ready().await {
        log_manager.shutdown();
        anyhow::bail!(message);
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    handle.shutdown();
    handle.join().await?;
    log_manager.shutdown();

    Ok(())
}
