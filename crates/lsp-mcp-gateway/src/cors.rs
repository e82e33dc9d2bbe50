//! Cross-origin access control
//!
//! The decision is a pure function of the policy and the request; the
//! middleware only applies it. It runs before every other handler so that
//! preflight requests are answered even for otherwise invalid requests.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use lsp_mcp_config::{split_list, ConfigSource};
use lsp_mcp_session::SESSION_ID_HEADER;

pub const DEFAULT_ALLOW_METHODS: &str = "GET,POST,PUT,DELETE,OPTIONS";
pub const PREFLIGHT_MAX_AGE_SECS: u32 = 86400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowOrigins {
    Any,
    List(Vec<String>),
}

impl AllowOrigins {
    /// `*` means any origin, anything else is a comma separated list
    pub fn parse(raw: &str) -> Self {
        let origins = split_list(raw);
        if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
            Self::Any
        } else {
            Self::List(origins)
        }
    }

    fn contains(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::List(origins) => origins.iter().any(|allowed| allowed == origin),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsPolicy {
    pub enabled: bool,
    pub allow_origins: AllowOrigins,
    pub with_credentials: bool,
    pub expose_headers: Vec<String>,
    /// Sent on preflight when the request names no headers of its own
    pub allow_headers: Vec<String>,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_origins: AllowOrigins::Any,
            with_credentials: false,
            expose_headers: vec![SESSION_ID_HEADER.to_string()],
            allow_headers: vec![
                "Content-Type".to_string(),
                "Authorization".to_string(),
                SESSION_ID_HEADER.to_string(),
            ],
        }
    }
}

/// Headers to emit for one request, and whether it ends the pipeline
#[derive(Debug, Clone, Default)]
pub struct CorsDecision {
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub preflight: bool,
}

impl CorsDecision {
    pub fn get(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.headers
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, value)| value)
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        for (name, value) in &self.headers {
            if name == header::VARY {
                headers.append(name.clone(), value.clone());
            } else {
                headers.insert(name.clone(), value.clone());
            }
        }
    }

    fn push(&mut self, name: HeaderName, value: &str) {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.push((name, value));
        }
    }
}

impl CorsPolicy {
    pub fn from_source(source: &dyn ConfigSource) -> Self {
        let defaults = Self::default();
        Self {
            enabled: source.get_bool("cors.enabled", defaults.enabled),
            allow_origins: AllowOrigins::parse(&source.get_string("cors.allow_origins", "*")),
            with_credentials: source.get_bool("cors.with_credentials", defaults.with_credentials),
            expose_headers: source
                .get_list("cors.expose_headers", &defaults.expose_headers.join(",")),
            allow_headers: source.get_list("cors.allow_headers", &defaults.allow_headers.join(",")),
        }
    }

    pub fn decide(&self, method: &Method, headers: &HeaderMap) -> CorsDecision {
        let mut decision = CorsDecision::default();
        if !self.enabled {
            return decision;
        }

        let origin = headers
            .get(header::ORIGIN)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty());

        match (&self.allow_origins, origin) {
            // credentials forbid a literal `*`, so the request origin is echoed
            (AllowOrigins::Any, Some(origin)) if self.with_credentials => {
                decision.push(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
                decision.push(header::VARY, "Origin");
            }
            (AllowOrigins::Any, None) if self.with_credentials => {}
            (AllowOrigins::Any, _) => {
                decision.push(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*");
            }
            (allowed @ AllowOrigins::List(_), Some(origin)) if allowed.contains(origin) => {
                decision.push(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
                decision.push(header::VARY, "Origin");
            }
            (AllowOrigins::List(_), _) => {}
        }

        if self.with_credentials {
            decision.push(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, "true");
        }

        if !self.expose_headers.is_empty() {
            decision.push(
                header::ACCESS_CONTROL_EXPOSE_HEADERS,
                &self.expose_headers.join(","),
            );
        }

        if *method == Method::OPTIONS {
            decision.preflight = true;

            let requested_method = headers
                .get(header::ACCESS_CONTROL_REQUEST_METHOD)
                .and_then(|value| value.to_str().ok())
                .filter(|value| !value.is_empty());
            decision.push(
                header::ACCESS_CONTROL_ALLOW_METHODS,
                requested_method.unwrap_or(DEFAULT_ALLOW_METHODS),
            );

            let requested_headers = headers
                .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
                .and_then(|value| value.to_str().ok())
                .filter(|value| !value.is_empty());
            let default_headers = self.allow_headers.join(",");
            decision.push(
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                requested_headers.unwrap_or(&default_headers),
            );

            decision.push(
                header::ACCESS_CONTROL_MAX_AGE,
                &PREFLIGHT_MAX_AGE_SECS.to_string(),
            );
        }

        decision
    }
}

/// Apply the policy; preflight requests are answered here with `200`.
pub async fn cors_middleware(
    State(policy): State<Arc<CorsPolicy>>,
    request: Request,
    next: Next,
) -> Response {
    let decision = policy.decide(request.method(), request.headers());

    if decision.preflight {
        let mut response = StatusCode::OK.into_response();
        decision.apply(response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;
    decision.apply(response.headers_mut());
    response
}
