use serde::{Deserialize, Serialize};

/// 主配置结构体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            gateway: GatewayConfig::default(),
            cors: CorsConfig::default(),
            mcp: McpConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// 获取配置值的快捷方法
    pub fn get_value(&self, key: &str) -> Option<String> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["version"] => Some(self.version.clone()),
            ["gateway", "enabled"] => Some(self.gateway.enabled.to_string()),
            ["gateway", "host"] => Some(self.gateway.host.clone()),
            ["gateway", "port"] => Some(self.gateway.port.to_string()),
            ["gateway", "max_retries"] => Some(self.gateway.max_retries.to_string()),
            ["gateway", "endpoint"] => Some(self.gateway.endpoint.clone()),
            ["gateway", "json_response"] => Some(self.gateway.json_response.to_string()),
            ["gateway", "dns_rebinding_protection"] => {
                Some(self.gateway.dns_rebinding_protection.to_string())
            }
            ["gateway", "allowed_hosts"] => Some(self.gateway.allowed_hosts.join(",")),
            ["gateway", "session_idle_timeout_secs"] => {
                Some(self.gateway.session_idle_timeout_secs.to_string())
            }
            ["cors", "enabled"] => Some(self.cors.enabled.to_string()),
            ["cors", "allow_origins"] => Some(self.cors.allow_origins.clone()),
            ["cors", "with_credentials"] => Some(self.cors.with_credentials.to_string()),
            ["cors", "expose_headers"] => Some(self.cors.expose_headers.clone()),
            ["cors", "allow_headers"] => Some(self.cors.allow_headers.clone()),
            ["mcp", "server_name"] => Some(self.mcp.server_name.clone()),
            ["mcp", "server_version"] => Some(self.mcp.server_version.clone()),
            ["mcp", "instructions"] => self.mcp.instructions.clone(),
            ["logging", "level"] => Some(self.logging.level.as_str().to_string()),
            ["logging", "file"] => self.logging.file.clone(),
            ["logging", "json_format"] => Some(self.logging.json_format.to_string()),
            _ => None,
        }
    }

    /// 设置配置值
    pub fn set_value(&mut self, key: &str, value: &str) -> ConfigResult<()> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["gateway", "enabled"] => self.gateway.enabled = parse_bool(value)?,
            ["gateway", "host"] => self.gateway.host = value.trim().to_string(),
            ["gateway", "port"] => {
                self.gateway.port = value.trim().parse().map_err(|_| {
                    ConfigError::Validation(format!("Invalid port number: {}", value))
                })?;
            }
            ["gateway", "max_retries"] => self.gateway.max_retries = parse_number(value)?,
            ["gateway", "endpoint"] => self.gateway.endpoint = value.trim().to_string(),
            ["gateway", "json_response"] => self.gateway.json_response = parse_bool(value)?,
            ["gateway", "dns_rebinding_protection"] => {
                self.gateway.dns_rebinding_protection = parse_bool(value)?;
            }
            ["gateway", "allowed_hosts"] => self.gateway.allowed_hosts = split_list(value),
            ["gateway", "session_idle_timeout_secs"] => {
                self.gateway.session_idle_timeout_secs = parse_number(value)?;
            }
            ["cors", "enabled"] => self.cors.enabled = parse_bool(value)?,
            ["cors", "allow_origins"] => self.cors.allow_origins = value.trim().to_string(),
            ["cors", "with_credentials"] => self.cors.with_credentials = parse_bool(value)?,
            ["cors", "expose_headers"] => self.cors.expose_headers = value.trim().to_string(),
            ["cors", "allow_headers"] => self.cors.allow_headers = value.trim().to_string(),
            ["mcp", "server_name"] => self.mcp.server_name = value.to_string(),
            ["mcp", "server_version"] => self.mcp.server_version = value.to_string(),
            ["mcp", "instructions"] => self.mcp.instructions = Some(value.to_string()),
            ["logging", "level"] => self.logging.level = value.parse()?,
            ["logging", "file"] => self.logging.file = Some(value.to_string()),
            ["logging", "json_format"] => self.logging.json_format = parse_bool(value)?,
            _ => return Err(ConfigError::KeyNotFound(key.to_string())),
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> ConfigResult<bool> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Validation(format!("Invalid boolean: {}", value)))
}

fn parse_number<T: std::str::FromStr>(value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Validation(format!("Invalid number: {}", value)))
}

/// 按逗号拆分列表，去掉空白项
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Gateway 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// 是否启用 Gateway
    pub enabled: bool,
    /// 监听地址，只允许 loopback
    pub host: String,
    /// 首选端口
    pub port: u16,
    /// 端口被占用时最多向后尝试的次数
    pub max_retries: u32,
    /// 协议端点路径
    pub endpoint: String,
    /// POST 响应是否总是使用纯 JSON（不使用 SSE）
    pub json_response: bool,
    /// 是否校验 Host 头
    pub dns_rebinding_protection: bool,
    /// 允许的 Host 列表
    pub allowed_hosts: Vec<String>,
    /// 会话空闲超时（秒），0 表示不清理
    pub session_idle_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 9527,
            max_retries: 10,
            endpoint: "/mcp".to_string(),
            json_response: false,
            dns_rebinding_protection: false,
            allowed_hosts: vec!["127.0.0.1".to_string(), "localhost".to_string()],
            session_idle_timeout_secs: 0,
        }
    }
}

/// CORS 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CorsConfig {
    pub enabled: bool,
    /// `*` 或者逗号分隔的 origin 列表
    pub allow_origins: String,
    /// 是否允许携带凭证（cookie）
    pub with_credentials: bool,
    pub expose_headers: String,
    pub allow_headers: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_origins: "*".to_string(),
            with_credentials: false,
            expose_headers: "mcp-session-id".to_string(),
            allow_headers: "Content-Type,Authorization,mcp-session-id".to_string(),
        }
    }
}

/// 协议服务器信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct McpConfig {
    pub server_name: String,
    pub server_version: String,
    pub instructions: Option<String>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            server_name: "lsp-server".to_string(),
            server_version: "0.0.2".to_string(),
            instructions: None,
        }
    }
}

/// 日志级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ConfigError::Validation(format!("Invalid log level: {}", s))),
        }
    }
}

/// Logging 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub file: Option<String>,
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file: None,
            json_format: false,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
