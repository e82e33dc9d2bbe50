//! Session registry: the single source of truth for "is this session alive".

use chrono::Duration;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info};
use uuid::Uuid;

use crate::transport::StreamableHttpTransport;

/// Maps session ids to their transports.
///
/// Insert, lookup and removal are each a single atomic map operation, so a
/// request racing a close sees the session either fully present or gone.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Arc<StreamableHttpTransport>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh random id that is not currently registered
    pub fn mint_id(&self) -> String {
        loop {
            let id = Uuid::new_v4().to_string();
            if !self.sessions.contains_key(&id) {
                return id;
            }
        }
    }

    /// Register a transport, returning any transport previously stored under `id`
    pub fn put(
        &self,
        id: impl Into<String>,
        transport: Arc<StreamableHttpTransport>,
    ) -> Option<Arc<StreamableHttpTransport>> {
        let id = id.into();
        debug!("Session registered: {}", id);
        self.sessions.insert(id, transport)
    }

    pub fn get(&self, id: &str) -> Option<Arc<StreamableHttpTransport>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a session. Removing an absent id is a no-op.
    pub fn remove(&self, id: &str) -> Option<Arc<StreamableHttpTransport>> {
        let removed = self.sessions.remove(id).map(|(_, transport)| transport);
        if removed.is_some() {
            debug!("Session removed: {}", id);
        }
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Close callback that removes the session from this registry.
    ///
    /// Holds the map weakly: transports are owned by the map, so a strong
    /// handle here would keep the pair alive forever.
    pub fn remover(&self) -> impl Fn(&str) + Send + Sync + 'static {
        let sessions: Weak<DashMap<String, Arc<StreamableHttpTransport>>> =
            Arc::downgrade(&self.sessions);
        move |id: &str| {
            if let Some(sessions) = sessions.upgrade() {
                if sessions.remove(id).is_some() {
                    debug!("Session removed on close: {}", id);
                }
            }
        }
    }

    /// Close sessions idle for longer than `max_idle`.
    ///
    /// An open standalone stream counts as activity.
    pub fn close_idle(&self, max_idle: Duration) -> usize {
        // collect first: closing fires the remover, which needs the shard lock
        let idle: Vec<Arc<StreamableHttpTransport>> = self
            .sessions
            .iter()
            .filter(|entry| {
                let transport = entry.value();
                transport.idle_time() > max_idle && !transport.has_live_stream()
            })
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for transport in &idle {
            transport.close();
            self.remove(transport.session_id());
        }

        if !idle.is_empty() {
            info!("Closed {} idle sessions", idle.len());
        }
        idle.len()
    }

    /// Close every session, leaving the registry empty
    pub fn close_all(&self) -> usize {
        let all: Vec<Arc<StreamableHttpTransport>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for transport in &all {
            transport.close();
        }
        self.sessions.clear();

        all.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{SessionState, TransportOptions};

    fn transport(id: &str) -> Arc<StreamableHttpTransport> {
        Arc::new(StreamableHttpTransport::new(id, TransportOptions::default()))
    }

    #[test]
    fn test_put_get_remove() {
        let registry = SessionRegistry::new();
        let t = transport("a");

        assert!(registry.put("a", Arc::clone(&t)).is_none());
        assert!(Arc::ptr_eq(&registry.get("a").unwrap(), &t));
        assert!(registry.contains("a"));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove("a").is_some());
        assert!(registry.get("a").is_none());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = SessionRegistry::new();
        registry.put("a", transport("a"));

        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert!(registry.remove("never-existed").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_mint_id_is_fresh() {
        let registry = SessionRegistry::new();
        for _ in 0..32 {
            let id = registry.mint_id();
            assert!(!registry.contains(&id));
            registry.put(id.clone(), transport(&id));
        }
        assert_eq!(registry.len(), 32);
    }

    #[test]
    fn test_remover_fires_on_close() {
        let registry = SessionRegistry::new();
        let t = transport("a");
        t.on_close(registry.remover());
        registry.put("a", Arc::clone(&t));

        t.close();
        assert!(!registry.contains("a"));
        assert_eq!(t.state(), SessionState::Closed);
    }

    #[test]
    fn test_remover_outliving_registry() {
        let registry = SessionRegistry::new();
        let remover = registry.remover();
        drop(registry);
        remover("a");
    }

    #[tokio::test]
    async fn test_close_idle_spares_open_stream() {
        use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
        use lsp_mcp_protocol::McpServerFactory;
        use serde_json::json;

        let registry = SessionRegistry::new();
        let t = transport("streaming");
        t.on_close(registry.remover());
        let server = Arc::new(McpServerFactory::default().create());
        server.connect(t.as_ref()).unwrap();
        registry.put("streaming", Arc::clone(&t));

        let init = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": { "name": "test", "version": "1.0.0" }
            }
        });
        let response = t.handle_request(&Method::POST, &HeaderMap::new(), Some(init)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        let stream = t.handle_request(&Method::GET, &headers, None).await;
        assert_eq!(stream.status(), StatusCode::OK);

        assert_eq!(registry.close_idle(Duration::milliseconds(-1)), 0);
        assert!(registry.contains("streaming"));

        drop(stream);
        assert_eq!(registry.close_idle(Duration::milliseconds(-1)), 1);
        assert!(registry.is_empty());
        assert!(t.is_closed());
    }

    #[test]
    fn test_close_idle_and_all() {
        let registry = SessionRegistry::new();
        for id in ["a", "b", "c"] {
            let t = transport(id);
            t.on_close(registry.remover());
            registry.put(id, t);
        }

        assert_eq!(registry.close_idle(Duration::hours(1)), 0);
        assert_eq!(registry.close_idle(Duration::milliseconds(-1)), 3);
        assert!(registry.is_empty());

        let t = transport("d");
        registry.put("d", Arc::clone(&t));
        assert_eq!(registry.close_all(), 1);
        assert!(registry.is_empty());
        assert!(t.is_closed());
    }
}
