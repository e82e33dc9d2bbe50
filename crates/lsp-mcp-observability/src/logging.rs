//! 结构化日志模块
//!
//! 安装全局 tracing subscriber，支持运行时调整过滤级别和按天滚动的日志文件。

use std::path::Path;

use parking_lot::Mutex;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::MakeWriter,
    layer::{Layered, SubscriberExt},
    reload::{self, Handle},
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::LoggingConfig;
use crate::error::{ObservabilityError, Result};

/// 过滤器重新加载句柄类型
type ReloadHandle = Handle<EnvFilter, Registry>;

type Base = Layered<reload::Layer<EnvFilter, Registry>, Registry>;
type BoxedLayer = Box<dyn Layer<Base> + Send + Sync + 'static>;

/// 日志管理器
#[derive(Debug)]
pub struct LogManager {
    config: LoggingConfig,
    reload_handle: ReloadHandle,
    /// 非阻塞文件写入的 guard，drop 时刷新缓冲
    file_guard: Mutex<Option<WorkerGuard>>,
}

impl LogManager {
    /// 安装全局 subscriber。已经安装过时返回 `ObservabilityError::Logging`。
    pub fn new(config: &LoggingConfig) -> Result<Self> {
        let filter = build_filter(config)?;
        let (filter, reload_handle) = reload::Layer::new(filter);

        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut file_guard = None;

        if config.stdout {
            layers.push(fmt_layer(config, std::io::stdout, config.ansi_colors));
        }

        if let Some(ref path) = config.file_path {
            let (writer, guard) = file_writer(path)?;
            layers.push(fmt_layer(config, writer, false));
            file_guard = Some(guard);
        }

        tracing_subscriber::registry()
            .with(filter)
            .with(layers)
            .try_init()
            .map_err(|e| ObservabilityError::logging(format!("Failed to install subscriber: {}", e)))?;

        tracing::info!(
            target: "lsp_mcp_observability",
            "Log manager initialized with level: {}",
            config.level
        );

        Ok(Self {
            config: config.clone(),
            reload_handle,
            file_guard: Mutex::new(file_guard),
        })
    }

    /// 动态更新日志级别，模块级别配置保持不变
    pub fn update_level(&mut self, level: &str) -> Result<()> {
        let candidate = LoggingConfig {
            level: level.to_string(),
            ..self.config.clone()
        };
        let new_filter = build_filter(&candidate)?;

        self.reload_handle
            .modify(|filter| *filter = new_filter)
            .map_err(|e| ObservabilityError::logging(format!("Failed to update log level: {}", e)))?;

        self.config = candidate;

        tracing::info!(
            target: "lsp_mcp_observability",
            "Log level updated to: {}",
            level
        );

        Ok(())
    }

    /// 获取当前配置
    pub fn config(&self) -> &LoggingConfig {
        &self.config
    }

    /// 刷新并关闭文件输出
    pub fn shutdown(&self) {
        tracing::info!(target: "lsp_mcp_observability", "Log manager shutting down");
        drop(self.file_guard.lock().take());
    }
}

/// 构建环境过滤器
pub(crate) fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(&config.level)
        .map_err(|e| ObservabilityError::config(format!("Invalid log level: {}", e)))?;

    for (module, level) in &config.module_levels {
        let directive = format!("{}={}", module, level)
            .parse()
            .map_err(|e| ObservabilityError::config(format!("Invalid directive: {}", e)))?;
        filter = filter.add_directive(directive);
    }

    Ok(filter)
}

fn fmt_layer<W>(config: &LoggingConfig, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(config.include_target)
        .with_line_number(config.include_line_number);

    if config.json_format {
        layer.json().with_ansi(false).boxed()
    } else {
        layer.with_ansi(ansi).boxed()
    }
}

fn file_writer(path: &Path) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| ObservabilityError::config(format!("Invalid log file path: {:?}", path)))?;

    std::fs::create_dir_all(dir)?;

    let appender = tracing_appender::rolling::daily(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}

/// 创建带有请求上下文的 span
pub fn create_request_span(request_id: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        request_id = %request_id,
    )
}

/// 创建带有会话上下文的 span
pub fn create_session_span(session_id: &str, request_id: Option<&str>) -> tracing::Span {
    if let Some(req_id) = request_id {
        tracing::info_span!(
            "session",
            session_id = %session_id,
            request_id = %req_id,
        )
    } else {
        tracing::info_span!(
            "session",
            session_id = %session_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter() {
        let config = LoggingConfig::default()
            .with_level("debug")
            .with_module_level("lsp_mcp_session", "trace");
        assert!(build_filter(&config).is_ok());

        let config = LoggingConfig::default().with_module_level("lsp_mcp_session", "loud");
        let err = build_filter(&config).unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_global_install_only_once() {
        let config = LoggingConfig::default().with_level("debug");

        let mut manager = LogManager::new(&config).unwrap();
        assert_eq!(manager.config().level, "debug");

        manager.update_level("warn").unwrap();
        assert_eq!(manager.config().level, "warn");

        let second = LogManager::new(&config);
        assert!(matches!(second, Err(ObservabilityError::Logging { .. })));

        manager.shutdown();
    }

    #[test]
    fn test_create_spans() {
        let request_span = create_request_span("req-123");
        let session_span = create_session_span("sess-456", Some("req-123"));
        let bare_session_span = create_session_span("sess-456", None);

        // spans 在没有订阅者时被禁用，只检查构造不会 panic
        drop((request_span, session_span, bare_session_span));
    }
}
