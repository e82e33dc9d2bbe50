//! Key/default lookup used by the gateway to read its settings.
//!
//! Keys are dotted (`gateway.port`, `cors.allow_origins`). A source only
//! hands back raw strings; parsing and defaults live on `dyn ConfigSource`.

use crate::config::{split_list, Config};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::warn;

/// 配置来源
pub trait ConfigSource: Send + Sync {
    /// 原始字符串值，未配置时返回 None
    fn get_raw(&self, key: &str) -> Option<String>;
}

impl dyn ConfigSource + '_ {
    /// 读取并解析一个值；缺失或无法解析时使用默认值
    pub fn get_or<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.get_raw(key) {
            Some(raw) => match raw.trim().parse() {
                Ok(value) => value,
                Err(_) => {
                    warn!("Ignoring unparsable value for {}: {:?}", key, raw);
                    default
                }
            },
            None => default,
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get_or(key, default)
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.get_raw(key).unwrap_or_else(|| default.to_string())
    }

    /// 逗号分隔列表
    pub fn get_list(&self, key: &str, default: &str) -> Vec<String> {
        split_list(&self.get_string(key, default))
    }
}

impl ConfigSource for Config {
    fn get_raw(&self, key: &str) -> Option<String> {
        self.get_value(key)
    }
}

impl ConfigSource for HashMap<String, String> {
    fn get_raw(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// 从环境变量读取，`cors.allow_origins` 对应 `LSP_MCP_CORS_ALLOW_ORIGINS`
#[derive(Debug, Clone)]
pub struct EnvSource {
    prefix: String,
}

impl EnvSource {
    pub const DEFAULT_PREFIX: &'static str = "LSP_MCP_";

    pub fn new() -> Self {
        Self::with_prefix(Self::DEFAULT_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn var_name(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.replace(['.', '-'], "_").to_uppercase())
    }
}

impl Default for EnvSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigSource for EnvSource {
    fn get_raw(&self, key: &str) -> Option<String> {
        std::env::var(self.var_name(key)).ok()
    }
}

/// 多个来源叠加，先加入的优先
#[derive(Default)]
pub struct LayeredSource {
    layers: Vec<Box<dyn ConfigSource>>,
}

impl LayeredSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl ConfigSource + 'static) -> Self {
        self.layers.push(Box::new(source));
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl ConfigSource for LayeredSource {
    fn get_raw(&self, key: &str) -> Option<String> {
        self.layers.iter().find_map(|layer| layer.get_raw(key))
    }
}
