pub mod config;
pub mod manager;
pub mod source;

pub use config::{
    split_list, Config, ConfigError, ConfigResult, CorsConfig, GatewayConfig, LogLevel,
    LoggingConfig, McpConfig,
};
pub use manager::ConfigManager;
pub use source::{ConfigSource, EnvSource, LayeredSource};

use std::path::PathBuf;

/// 获取配置目录路径 (~/.lsp-mcp)
pub fn lsp_mcp_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".lsp-mcp"))
}

/// 获取默认配置文件路径
pub fn default_config_path() -> Option<PathBuf> {
    lsp_mcp_dir().map(|dir| dir.join("config.json"))
}

/// 获取默认日志目录
pub fn default_log_dir() -> Option<PathBuf> {
    lsp_mcp_dir().map(|dir| dir.join("logs"))
}

/// 展开路径中的 ~ 为用户主目录
pub fn expand_tilde(path: &str) -> Option<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
        None => Some(PathBuf::from(path)),
    }
}
