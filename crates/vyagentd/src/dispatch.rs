//! Command dispatch: maps request paths to handlers.
//!
//! Each request goes through
//! `Received -> Decoded -> Executing -> Responded`, or ends early in
//! `NotFound`, `DecodeFailed` or `Panicked`. Handlers run in their own
//! task so that a panic is contained to the request that caused it.
//!
//! The dispatcher does not serialize anything; feature modules wrap
//! configuration-mutating handlers with [`ConfigGuard::wrap`] when they
//! register them.
//!
//! [`ConfigGuard::wrap`]: crate::guard::ConfigGuard::wrap

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::context::AgentContext;
use crate::error::{CommandError, CommandResult};

/// What a handler produces: the JSON response body.
pub type HandlerResult = CommandResult<Value>;

/// A registered command handler.
pub type CommandHandler =
    Arc<dyn Fn(CommandContext) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Turns an async function into a [`CommandHandler`].
pub fn handler<F, Fut>(f: F) -> CommandHandler
where
    F: Fn(CommandContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Serializes a handler's return value.
pub fn reply<T: Serialize>(value: &T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| CommandError::internal(format!("unable to encode reply: {}", e)))
}

/// Per-request input handed to a handler.
#[derive(Clone)]
pub struct CommandContext {
    path: String,
    body: Value,
    agent: Arc<AgentContext>,
}

impl CommandContext {
    /// Creates a context; normally done by the dispatcher.
    pub fn new(path: impl Into<String>, body: Value, agent: Arc<AgentContext>) -> Self {
        Self {
            path: path.into(),
            body,
            agent,
        }
    }

    /// The request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw JSON body.
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Decodes the body into the handler's command type.
    ///
    /// An empty body decodes as `{}`, so commands whose fields all have
    /// defaults come out empty and commands with required fields fail.
    pub fn command<T: DeserializeOwned>(&self) -> CommandResult<T> {
        match &self.body {
            Value::Null => T::deserialize(&Value::Object(Map::new())),
            body => T::deserialize(body),
        }
        .map_err(CommandError::Decode)
    }

    /// Agent-wide state.
    pub fn agent(&self) -> &Arc<AgentContext> {
        &self.agent
    }
}

/// Whether a handler is expected to be quick or long-running.
///
/// Both kinds follow the same request/response contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Quick, read-only work.
    Sync,
    /// Long-running work such as a configuration commit.
    Async,
}

/// Request lifecycle phases, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Received,
    Decoded,
    Executing,
    Responded,
    DecodeFailed,
    NotFound,
    Panicked,
}

impl fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Error response structure
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ApiErrorResponse {
    /// HTTP status code
    pub code: u16,
    /// Error message
    pub message: String,
    /// Optional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Outcome of one dispatched request.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResponse {
    /// Response status.
    pub status: StatusCode,
    /// Response body.
    pub body: Value,
    /// Final phase of the request.
    pub phase: RequestPhase,
}

impl DispatchResponse {
    fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body,
            phase: RequestPhase::Responded,
        }
    }

    fn error(status: StatusCode, phase: RequestPhase, message: String, details: Option<String>) -> Self {
        let body = ApiErrorResponse {
            code: status.as_u16(),
            message,
            details,
        };
        Self {
            status,
            body: serde_json::to_value(&body).unwrap_or(Value::Null),
            phase,
        }
    }
}

impl IntoResponse for DispatchResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

struct Registration {
    kind: HandlerKind,
    handler: CommandHandler,
}

/// Path to handler table.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<String, Registration>,
}

impl CommandRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a quick handler.
    pub fn register_sync_command_handler(&mut self, path: impl Into<String>, handler: CommandHandler) {
        self.register(path.into(), HandlerKind::Sync, handler);
    }

    /// Registers a long-running handler.
    pub fn register_async_command_handler(&mut self, path: impl Into<String>, handler: CommandHandler) {
        self.register(path.into(), HandlerKind::Async, handler);
    }

    fn register(&mut self, path: String, kind: HandlerKind, handler: CommandHandler) {
        debug!(path = %path, ?kind, "Registering command handler");
        if self
            .handlers
            .insert(path.clone(), Registration { kind, handler })
            .is_some()
        {
            warn!(path = %path, "Command handler registered twice, keeping the latest");
        }
    }

    /// Kind of the handler bound to `path`.
    pub fn kind(&self, path: &str) -> Option<HandlerKind> {
        self.handlers.get(path).map(|r| r.kind)
    }

    /// Registered paths, sorted.
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    /// Runs one request to completion.
    ///
    /// Never fails: every outcome, including a panicking handler, becomes a
    /// response.
    pub async fn dispatch(&self, agent: Arc<AgentContext>, path: &str, body: &[u8]) -> DispatchResponse {
        debug!(path, phase = %RequestPhase::Received, "Command received");

        let Some(registration) = self.handlers.get(path) else {
            warn!(path, phase = %RequestPhase::NotFound, "No handler for path");
            return DispatchResponse::error(
                StatusCode::NOT_FOUND,
                RequestPhase::NotFound,
                format!("no handler registered for {}", path),
                None,
            );
        };

        let body = if body.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            match serde_json::from_slice::<Value>(body) {
                Ok(value) => value,
                Err(e) => {
                    warn!(path, phase = %RequestPhase::DecodeFailed, error = %e, "Malformed request body");
                    return DispatchResponse::error(
                        StatusCode::BAD_REQUEST,
                        RequestPhase::DecodeFailed,
                        "malformed JSON body".to_string(),
                        Some(e.to_string()),
                    );
                }
            }
        };
        debug!(path, phase = %RequestPhase::Decoded, "Command decoded");

        let ctx = CommandContext::new(path, body, agent);
        let task = tokio::spawn((registration.handler)(ctx));
        debug!(path, phase = %RequestPhase::Executing, kind = ?registration.kind, "Command executing");

        match task.await {
            Ok(Ok(value)) => {
                debug!(path, phase = %RequestPhase::Responded, "Command completed");
                DispatchResponse::ok(value)
            }
            Ok(Err(e)) => {
                let phase = match e {
                    CommandError::Decode(_) => RequestPhase::DecodeFailed,
                    _ => RequestPhase::Responded,
                };
                error!(path, %phase, error = %e, "Command failed");
                DispatchResponse::error(e.status(), phase, e.to_string(), None)
            }
            Err(join_error) => {
                let details = panic_message(join_error);
                error!(path, phase = %RequestPhase::Panicked, details = %details, "Command handler panicked");
                DispatchResponse::error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    RequestPhase::Panicked,
                    "command handler panicked".to_string(),
                    Some(details),
                )
            }
        }
    }
}

fn panic_message(join_error: tokio::task::JoinError) -> String {
    if !join_error.is_panic() {
        return join_error.to_string();
    }
    let payload = join_error.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[derive(Clone)]
struct DispatchState {
    registry: Arc<CommandRegistry>,
    agent: Arc<AgentContext>,
}

async fn dispatch_request(State(state): State<DispatchState>, uri: Uri, body: Bytes) -> DispatchResponse {
    state.registry.dispatch(state.agent, uri.path(), &body).await
}

/// Builds the HTTP front end: every path goes through the registry.
pub fn router(registry: Arc<CommandRegistry>, agent: Arc<AgentContext>) -> Router {
    Router::new()
        .fallback(dispatch_request)
        .with_state(DispatchState { registry, agent })
}

/// Serves `router` on `listener` until `shutdown` resolves.
pub async fn serve<S>(listener: TcpListener, router: Router, shutdown: S) -> std::io::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Command server listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn agent() -> Arc<AgentContext> {
        Arc::new(AgentContext::for_tests())
    }

    #[derive(Deserialize)]
    struct Echo {
        word: String,
    }

    async fn echo(ctx: CommandContext) -> HandlerResult {
        let cmd: Echo = ctx.command()?;
        Ok(json!({ "word": cmd.word }))
    }

    #[derive(Deserialize)]
    struct Tally {
        #[serde(default)]
        words: Vec<String>,
    }

    async fn tally(ctx: CommandContext) -> HandlerResult {
        let cmd: Tally = ctx.command()?;
        Ok(json!(cmd.words.len()))
    }

    async fn fail(_ctx: CommandContext) -> HandlerResult {
        Err(CommandError::internal("commit exploded"))
    }

    async fn explode(_ctx: CommandContext) -> HandlerResult {
        panic!("bad state")
    }

    async fn body(ctx: CommandContext) -> HandlerResult {
        Ok(ctx.body().clone())
    }

    fn registry() -> CommandRegistry {
        let mut registry = CommandRegistry::new();
        registry.register_sync_command_handler("/echo", handler(echo));
        registry.register_async_command_handler("/fail", handler(fail));
        registry.register_async_command_handler("/panic", handler(explode));
        registry.register_sync_command_handler("/null", handler(body));
        registry.register_sync_command_handler("/tally", handler(tally));
        registry
    }

    #[tokio::test]
    async fn test_dispatch_ok() {
        let resp = registry().dispatch(agent(), "/echo", br#"{"word":"hi"}"#).await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.body, json!({ "word": "hi" }));
        assert_eq!(resp.phase, RequestPhase::Responded);
    }

    #[tokio::test]
    async fn test_dispatch_not_found() {
        let resp = registry().dispatch(agent(), "/nope", b"{}").await;
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
        assert_eq!(resp.phase, RequestPhase::NotFound);
        assert_eq!(resp.body["code"], 404);
    }

    #[tokio::test]
    async fn test_dispatch_malformed_and_mismatched_bodies() {
        let resp = registry().dispatch(agent(), "/echo", b"{not json").await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        assert_eq!(resp.phase, RequestPhase::DecodeFailed);

        let resp = registry().dispatch(agent(), "/echo", br#"{"word": 3}"#).await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        assert_eq!(resp.phase, RequestPhase::DecodeFailed);
    }

    #[tokio::test]
    async fn test_empty_body_is_null() {
        let resp = registry().dispatch(agent(), "/null", b"  ").await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.body, Value::Null);
    }

    #[tokio::test]
    async fn test_empty_body_decodes_as_empty_command() {
        let resp = registry().dispatch(agent(), "/tally", b"").await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.body, json!(0));

        // a required field is still required
        let resp = registry().dispatch(agent(), "/echo", b"").await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        assert_eq!(resp.phase, RequestPhase::DecodeFailed);
    }

    #[tokio::test]
    async fn test_handler_error_is_500_with_message() {
        let resp = registry().dispatch(agent(), "/fail", b"{}").await;
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.body["message"], "commit exploded");
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let registry = registry();
        let resp = registry.dispatch(agent(), "/panic", b"{}").await;
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.phase, RequestPhase::Panicked);
        assert_eq!(resp.body["details"], "bad state");

        let resp = registry.dispatch(agent(), "/echo", br#"{"word":"still up"}"#).await;
        assert_eq!(resp.status, StatusCode::OK);
    }

    #[test]
    fn test_duplicate_registration_replaces() {
        let mut registry = registry();
        registry.register_async_command_handler("/echo", handler(body));
        assert_eq!(registry.kind("/echo"), Some(HandlerKind::Async));
        assert_eq!(registry.paths(), vec!["/echo", "/fail", "/null", "/panic", "/tally"]);
    }
}
