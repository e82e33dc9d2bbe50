//! Listener bootstrap
//!
//! Binds the configured port and, while it is in use, walks upward one port
//! at a time until the retry budget is spent.

use std::io;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::TcpListener;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("port {last_port} still in use after {retries} retries starting from {configured_port}: {source}")]
    RetriesExhausted {
        configured_port: u16,
        last_port: u16,
        retries: u32,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("no port left above {port} to retry on")]
    PortOverflow { port: u16 },
}

/// Something that can open a listener on `host:port`
#[async_trait]
pub trait PortBinder: Send + Sync {
    type Listener: Send + 'static;

    async fn bind(&self, host: &str, port: u16) -> io::Result<Self::Listener>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpBinder;

#[async_trait]
impl PortBinder for TcpBinder {
    type Listener = TcpListener;

    async fn bind(&self, host: &str, port: u16) -> io::Result<TcpListener> {
        TcpListener::bind((host, port)).await
    }
}

#[derive(Debug)]
pub struct BoundListener<L> {
    pub listener: L,
    pub port: u16,
    pub configured_port: u16,
    pub retries: u32,
}

impl<L> BoundListener<L> {
    pub fn had_conflict(&self) -> bool {
        self.retries > 0
    }

    pub fn startup_message(&self) -> String {
        if self.had_conflict() {
            format!(
                "LSP MCP server listening on port {} (port {} was in use)",
                self.port, self.configured_port
            )
        } else {
            format!("LSP MCP server listening on port {}", self.port)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListenerBootstrap<B = TcpBinder> {
    host: String,
    port: u16,
    max_retries: u32,
    binder: B,
}

impl ListenerBootstrap<TcpBinder> {
    pub fn tcp(host: impl Into<String>, port: u16, max_retries: u32) -> Self {
        Self::new(host, port, max_retries, TcpBinder)
    }
}

impl<B: PortBinder> ListenerBootstrap<B> {
    pub fn new(host: impl Into<String>, port: u16, max_retries: u32, binder: B) -> Self {
        Self {
            host: host.into(),
            port,
            max_retries,
            binder,
        }
    }

    /// Bind `port`, `port + 1`, ... making at most `max_retries` retries
    pub async fn bind(&self) -> Result<BoundListener<B::Listener>, BootstrapError> {
        let mut current_port = self.port;
        let mut retries = 0u32;

        loop {
            match self.binder.bind(&self.host, current_port).await {
                Ok(listener) => {
                    return Ok(BoundListener {
                        listener,
                        port: current_port,
                        configured_port: self.port,
                        retries,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    if retries >= self.max_retries {
                        return Err(BootstrapError::RetriesExhausted {
                            configured_port: self.port,
                            last_port: current_port,
                            retries,
                            source: e,
                        });
                    }
                    let next_port = current_port
                        .checked_add(1)
                        .ok_or(BootstrapError::PortOverflow { port: current_port })?;
                    tracing::warn!(
                        "Port {} is in use, trying {} (retry {}/{})",
                        current_port,
                        next_port,
                        retries + 1,
                        self.max_retries
                    );
                    retries += 1;
                    current_port = next_port;
                }
                Err(e) => {
                    return Err(BootstrapError::Bind {
                        port: current_port,
                        source: e,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[derive(Default, Clone)]
    struct FakeBinder {
        busy: HashSet<u16>,
        broken: HashSet<u16>,
        attempts: Arc<Mutex<Vec<u16>>>,
    }

    impl FakeBinder {
        fn busy(ports: impl IntoIterator<Item = u16>) -> Self {
            Self {
                busy: ports.into_iter().collect(),
                ..Self::default()
            }
        }

        fn attempts(&self) -> Vec<u16> {
            self.attempts.lock().clone()
        }
    }

    #[async_trait]
    impl PortBinder for FakeBinder {
        type Listener = u16;

        async fn bind(&self, _host: &str, port: u16) -> io::Result<u16> {
            self.attempts.lock().push(port);
            if self.busy.contains(&port) {
                Err(io::Error::from(io::ErrorKind::AddrInUse))
            } else if self.broken.contains(&port) {
                Err(io::Error::from(io::ErrorKind::PermissionDenied))
            } else {
                Ok(port)
            }
        }
    }

    #[tokio::test]
    async fn test_free_port_binds_without_conflict() {
        let binder = FakeBinder::default();
        let bootstrap = ListenerBootstrap::new("127.0.0.1", 9527, 10, binder.clone());

        let bound = bootstrap.bind().await.unwrap();
        assert_eq!(bound.port, 9527);
        assert_eq!(bound.configured_port, 9527);
        assert!(!bound.had_conflict());
        assert_eq!(bound.startup_message(), "LSP MCP server listening on port 9527");
        assert_eq!(binder.attempts(), vec![9527]);
    }

    #[tokio::test]
    async fn test_busy_port_moves_to_next() {
        let binder = FakeBinder::busy([9527]);
        let bootstrap = ListenerBootstrap::new("127.0.0.1", 9527, 10, binder.clone());

        let bound = bootstrap.bind().await.unwrap();
        assert_eq!(bound.port, 9528);
        assert_eq!(bound.retries, 1);
        assert!(bound.had_conflict());
        assert_eq!(
            bound.startup_message(),
            "LSP MCP server listening on port 9528 (port 9527 was in use)"
        );
        assert_eq!(binder.attempts(), vec![9527, 9528]);
    }

    #[tokio::test]
    async fn test_exhausts_after_exactly_max_retries() {
        for max_retries in [0u32, 1, 3, 10] {
            let binder = FakeBinder::busy(9527..=9527 + max_retries as u16);
            let bootstrap = ListenerBootstrap::new("127.0.0.1", 9527, max_retries, binder.clone());

            let err = bootstrap.bind().await.unwrap_err();
            match err {
                BootstrapError::RetriesExhausted {
                    configured_port,
                    last_port,
                    retries,
                    ..
                } => {
                    assert_eq!(configured_port, 9527);
                    assert_eq!(retries, max_retries);
                    assert_eq!(last_port, 9527 + max_retries as u16);
                }
                other => panic!("unexpected error: {other}"),
            }

            let attempts = binder.attempts();
            assert_eq!(attempts.len(), max_retries as usize + 1);
            assert!(attempts.iter().all(|port| *port >= 9527));
            assert!(attempts.windows(2).all(|pair| pair[1] == pair[0] + 1));
        }
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let binder = FakeBinder {
            broken: [9527].into_iter().collect(),
            ..FakeBinder::default()
        };
        let bootstrap = ListenerBootstrap::new("127.0.0.1", 9527, 10, binder.clone());

        let err = bootstrap.bind().await.unwrap_err();
        assert!(matches!(err, BootstrapError::Bind { port: 9527, .. }));
        assert_eq!(binder.attempts(), vec![9527]);
    }

    #[tokio::test]
    async fn test_port_overflow() {
        let binder = FakeBinder::busy([u16::MAX]);
        let bootstrap = ListenerBootstrap::new("127.0.0.1", u16::MAX, 5, binder);

        let err = bootstrap.bind().await.unwrap_err();
        assert!(matches!(err, BootstrapError::PortOverflow { port: u16::MAX }));
    }

    #[tokio::test]
    async fn test_tcp_binder_reports_addr_in_use() {
        let occupied = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let err = TcpBinder.bind("127.0.0.1", port).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
    }
}
