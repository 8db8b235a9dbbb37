use std::{collections::HashMap, future::Future, pin::Pin};

use {
    async_trait::async_trait,
    futures::{SinkExt, StreamExt, future::join_all},
    serde_json::Value,
    tokio_tungstenite::tungstenite::Message,
    tracing::{debug, warn},
};

use tollgate_protocol::{ErrorShape, RequestFrame, ResponseFrame};

use crate::dispatch::{RpcDispatcher, UpgradeRequest, WsConnection};

// ── Types ────────────────────────────────────────────────────────────────────

/// Context passed to every method handler.
#[derive(Debug, Clone)]
pub struct MethodContext {
    /// `None` for notifications.
    pub request_id: Option<Value>,
    pub method: String,
    pub params: Value,
}

/// The result a method handler produces.
pub type MethodResult = Result<Value, ErrorShape>;

type BoxedMethodFuture = Pin<Box<dyn Future<Output = MethodResult> + Send>>;

/// A boxed async method handler.
pub type HandlerFn = Box<dyn Fn(MethodContext) -> BoxedMethodFuture + Send + Sync>;

// ── Registry ─────────────────────────────────────────────────────────────────

/// Maps JSON-RPC method names to handlers and serves them over both
/// transports.
#[derive(Default)]
pub struct MethodRegistry {
    handlers: HashMap<String, HandlerFn>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, method: impl Into<String>, handler: HandlerFn) {
        let method = method.into();
        if self.handlers.insert(method.clone(), handler).is_some() {
            warn!(method, "replaced existing method handler");
        }
    }

    /// Register a plain async function as a handler.
    pub fn register_async<F, Fut>(&mut self, method: impl Into<String>, handler: F)
    where
        F: Fn(MethodContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        let boxed: HandlerFn =
            Box::new(move |ctx| -> BoxedMethodFuture { Box::pin(handler(ctx)) });
        self.register(method, boxed);
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run one decoded call. Notifications are executed but produce no
    /// response.
    pub async fn dispatch(&self, frame: RequestFrame) -> Option<ResponseFrame> {
        let RequestFrame { id, method, params } = frame;

        let Some(handler) = self.handlers.get(&method) else {
            warn!(method, "unknown method");
            return id.map(|id| ResponseFrame::err(id, ErrorShape::method_not_found(&method)));
        };

        debug!(method, id = ?id, "dispatching method");
        let result = handler(MethodContext {
            request_id: id.clone(),
            method: method.clone(),
            params,
        })
        .await;

        let id = id?;
        Some(match result {
            Ok(payload) => ResponseFrame::ok(id, payload),
            Err(err) => {
                warn!(method, code = err.code, msg = %err.message, "method error");
                ResponseFrame::err(id, err)
            },
        })
    }

    /// Answer a request body: a single call or a batch.
    pub async fn handle_body(&self, body: &Value) -> Option<Value> {
        match body {
            Value::Array(calls) if calls.is_empty() => Some(
                ResponseFrame::err(Value::Null, ErrorShape::invalid_request("empty batch"))
                    .to_value(),
            ),
            Value::Array(calls) => {
                let replies: Vec<Value> = join_all(calls.iter().map(|c| self.dispatch_value(c)))
                    .await
                    .into_iter()
                    .flatten()
                    .map(|reply| reply.to_value())
                    .collect();
                (!replies.is_empty()).then_some(Value::Array(replies))
            },
            single => self
                .dispatch_value(single)
                .await
                .map(|reply| reply.to_value()),
        }
    }

    async fn dispatch_value(&self, call: &Value) -> Option<ResponseFrame> {
        match RequestFrame::from_value(call) {
            Ok(frame) => self.dispatch(frame).await,
            Err(invalid) => {
                debug!(error = %invalid, "invalid request object");
                Some(invalid.into())
            },
        }
    }

    /// Answer one WebSocket message payload.
    async fn handle_message(&self, payload: &[u8]) -> Option<Value> {
        match serde_json::from_slice::<Value>(payload) {
            Ok(body) => self.handle_body(&body).await,
            Err(e) => {
                debug!(error = %e, "websocket message is not valid JSON");
                Some(ResponseFrame::err(Value::Null, ErrorShape::parse_error()).to_value())
            },
        }
    }
}

#[async_trait]
impl RpcDispatcher for MethodRegistry {
    async fn handle(&self, body: &Value) -> Option<Value> {
        self.handle_body(body).await
    }

    async fn on_connection(&self, mut socket: WsConnection, request: UpgradeRequest) {
        let peer = request.peer;
        while let Some(frame) = socket.next().await {
            let reply = match frame {
                Ok(Message::Text(text)) => self.handle_message(text.as_bytes()).await,
                Ok(Message::Binary(data)) => self.handle_message(&data).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!(%peer, error = %e, "websocket read failed");
                    break;
                },
            };
            let Some(reply) = reply else { continue };
            if let Err(e) = socket.send(Message::text(reply.to_string())).await {
                debug!(%peer, error = %e, "websocket write failed");
                break;
            }
        }
        debug!(%peer, "websocket connection closed");
    }
}
