//! Gateway façade
//!
//! Reads the settings once, builds the HTTP app and starts the listener in the
//! background. `start` never waits for the bind to finish; callers that care
//! use [`GatewayHandle::wait_ready`].

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::Request;
use axum::middleware::from_fn_with_state;
use axum::Router;
use lsp_mcp_config::{ConfigSource, GatewayConfig, McpConfig};
use lsp_mcp_observability::create_request_span;
use lsp_mcp_protocol::{McpServerFactory, ToolSet};
use lsp_mcp_session::{SessionRegistry, TransportOptions};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::bootstrap::ListenerBootstrap;
use crate::cors::{cors_middleware, CorsPolicy};
use crate::error::GatewayError;
use crate::notify::NotificationSink;
use crate::router::{mcp_router, RouterState};

pub const DISABLED_MESSAGE: &str = "LSP MCP server is disabled by configuration.";

/// Largest accepted request body
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

const MAX_REAP_INTERVAL: Duration = Duration::from_secs(30);

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub max_retries: u32,
    pub endpoint: String,
    pub cors: CorsPolicy,
    pub transport: TransportOptions,
    /// Sessions idle for longer than this are closed; `None` keeps them
    pub session_idle_timeout: Option<Duration>,
    pub server_name: String,
    pub server_version: String,
    pub instructions: Option<String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        let gateway = GatewayConfig::default();
        let mcp = McpConfig::default();
        Self {
            enabled: gateway.enabled,
            host: gateway.host,
            port: gateway.port,
            max_retries: gateway.max_retries,
            endpoint: gateway.endpoint,
            cors: CorsPolicy::default(),
            transport: TransportOptions {
                json_response: gateway.json_response,
                dns_rebinding_protection: gateway.dns_rebinding_protection,
                allowed_hosts: gateway.allowed_hosts,
            },
            session_idle_timeout: None,
            server_name: mcp.server_name,
            server_version: mcp.server_version,
            instructions: mcp.instructions,
        }
    }
}

impl GatewaySettings {
    /// Read every gateway key once, falling back to the defaults
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, GatewayError> {
        let defaults = Self::default();

        let idle_secs: u64 = source.get_or("gateway.session_idle_timeout_secs", 0);
        let settings = Self {
            enabled: source.get_bool("gateway.enabled", defaults.enabled),
            host: source.get_string("gateway.host", &defaults.host),
            port: source.get_or("gateway.port", defaults.port),
            max_retries: source.get_or("gateway.max_retries", defaults.max_retries),
            endpoint: source.get_string("gateway.endpoint", &defaults.endpoint),
            cors: CorsPolicy::from_source(source),
            transport: TransportOptions {
                json_response: source
                    .get_bool("gateway.json_response", defaults.transport.json_response),
                dns_rebinding_protection: source.get_bool(
                    "gateway.dns_rebinding_protection",
                    defaults.transport.dns_rebinding_protection,
                ),
                allowed_hosts: source.get_list(
                    "gateway.allowed_hosts",
                    &defaults.transport.allowed_hosts.join(","),
                ),
            },
            session_idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
            server_name: source.get_string("mcp.server_name", &defaults.server_name),
            server_version: source.get_string("mcp.server_version", &defaults.server_version),
            instructions: source
                .get_raw("mcp.instructions")
                .filter(|text| !text.trim().is_empty()),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if !is_loopback_host(&self.host) {
            return Err(GatewayError::Config(format!(
                "host must be a loopback address, got {:?}",
                self.host
            )));
        }
        if self.port == 0 {
            return Err(GatewayError::Config("port must not be 0".to_string()));
        }
        if !self.endpoint.starts_with('/') {
            return Err(GatewayError::Config(format!(
                "endpoint must start with '/', got {:?}",
                self.endpoint
            )));
        }
        Ok(())
    }

    fn factory(&self) -> McpServerFactory {
        McpServerFactory::new(&self.server_name, &self.server_version)
            .with_instructions(self.instructions.clone())
    }
}

fn is_loopback_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host.eq_ignore_ascii_case("localhost")
        || host
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
}

/// Where the listener is in its startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerStatus {
    Pending,
    Listening {
        addr: SocketAddr,
        configured_port: u16,
    },
    Failed(String),
}

pub struct Gateway {
    settings: GatewaySettings,
    registry: SessionRegistry,
    tool_set: Arc<dyn ToolSet>,
    sink: Arc<dyn NotificationSink>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("settings", &self.settings)
            .field("registry", &self.registry)
            .field("tool_set", &"<tools>")
            .field("sink", &"<sink>")
            .finish()
    }
}

impl Gateway {
    pub fn new(
        settings: GatewaySettings,
        tool_set: Arc<dyn ToolSet>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            settings,
            registry: SessionRegistry::new(),
            tool_set,
            sink,
        }
    }

    pub fn from_source(
        source: &dyn ConfigSource,
        tool_set: Arc<dyn ToolSet>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, GatewayError> {
        Ok(Self::new(GatewaySettings::from_source(source)?, tool_set, sink))
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// The full HTTP app. CORS is the outermost layer so it sees every
    /// request first, preflight included.
    pub fn router(&self) -> Router {
        let state = RouterState::new(
            self.registry.clone(),
            self.settings.factory(),
            Arc::clone(&self.tool_set),
            self.settings.transport.clone(),
        );

        mcp_router(&self.settings.endpoint, state)
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .layer(TraceLayer::new_for_http().make_span_with(request_span))
            .layer(from_fn_with_state(
                Arc::new(self.settings.cors.clone()),
                cors_middleware,
            ))
    }

    /// Start listening in the background.
    ///
    /// Returns `None` when the gateway is disabled. Must be called from
    /// within a Tokio runtime.
    pub fn start(&self) -> Option<GatewayHandle> {
        if !self.settings.enabled {
            self.sink.info(DISABLED_MESSAGE);
            return None;
        }

        let app = self.router();
        let bootstrap = ListenerBootstrap::tcp(
            self.settings.host.clone(),
            self.settings.port,
            self.settings.max_retries,
        );
        let shutdown = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(ListenerStatus::Pending);

        let registry = self.registry.clone();
        let sink = Arc::clone(&self.sink);
        let idle_timeout = self.settings.session_idle_timeout;
        let token = shutdown.clone();

        let task = tokio::spawn(async move {
            let bound = match bootstrap.bind().await {
                Ok(bound) => bound,
                Err(e) => {
                    let message = format!("Cannot start LSP MCP server: {}", e);
                    error!("{}", message);
                    sink.error(&message);
                    status_tx.send_replace(ListenerStatus::Failed(message));
                    return;
                }
            };

            let addr = match bound.listener.local_addr() {
                Ok(addr) => addr,
                Err(e) => {
                    let message = format!("Cannot start LSP MCP server: {}", e);
                    error!("{}", message);
                    sink.error(&message);
                    status_tx.send_replace(ListenerStatus::Failed(message));
                    return;
                }
            };

            let message = bound.startup_message();
            info!("{} ({})", message, addr);
            sink.info(&message);
            status_tx.send_replace(ListenerStatus::Listening {
                addr,
                configured_port: bound.configured_port,
            });

            if let Some(max_idle) = idle_timeout {
                spawn_idle_reaper(registry.clone(), max_idle, token.clone());
            }

            let shutdown_registry = registry.clone();
            let shutdown_token = token.clone();
            let served = axum::serve(bound.listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_token.cancelled().await;
                    let closed = shutdown_registry.close_all();
                    info!("Gateway shutting down, closed {} sessions", closed);
                })
                .await;

            if let Err(e) = served {
                let message = format!("LSP MCP server stopped: {}", e);
                error!("{}", message);
                sink.error(&message);
            }
        });

        Some(GatewayHandle {
            shutdown,
            status: status_rx,
            registry: self.registry.clone(),
            task,
        })
    }
}

fn request_span(request: &Request<Body>) -> tracing::Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");
    let span = create_request_span(request_id);
    span.in_scope(|| debug!("{} {}", request.method(), request.uri()));
    span
}

fn spawn_idle_reaper(registry: SessionRegistry, max_idle: Duration, token: CancellationToken) {
    let max_idle_chrono = match chrono::Duration::from_std(max_idle) {
        Ok(duration) => duration,
        Err(_) => return,
    };
    let period = max_idle.clamp(Duration::from_secs(1), MAX_REAP_INTERVAL);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let closed = registry.close_idle(max_idle_chrono);
                    if closed > 0 {
                        debug!("Idle reaper closed {} sessions", closed);
                    }
                }
            }
        }
    });
}

/// Control handle for a started gateway
#[derive(Debug)]
pub struct GatewayHandle {
    shutdown: CancellationToken,
    status: watch::Receiver<ListenerStatus>,
    registry: SessionRegistry,
    task: JoinHandle<()>,
}

impl GatewayHandle {
    pub fn status(&self) -> ListenerStatus {
        self.status.borrow().clone()
    }

    /// Wait until the listener is bound or has failed to bind
    pub async fn wait_ready(&self) -> ListenerStatus {
        let mut rx = self.status.clone();
        let status = match rx
            .wait_for(|current| *current != ListenerStatus::Pending)
            .await
        {
            Ok(current) => (*current).clone(),
            Err(_) => ListenerStatus::Failed("gateway task ended before binding".to_string()),
        };
        status
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Stop accepting connections and close every live session
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub async fn join(self) -> Result<(), GatewayError> {
        self.task
            .await
            .map_err(|e| GatewayError::Task(e.to_string()))
    }
}
