use std::net::SocketAddr;

use {
    async_trait::async_trait,
    http::{HeaderMap, Method, Uri},
    serde_json::Value,
    tokio::net::TcpStream,
    tokio_tungstenite::{WebSocketStream, tungstenite::protocol::WebSocketConfig},
};

use crate::io::{PrefixedStream, RequestHead};

/// An accepted WebSocket connection, past the auth gate and the handshake.
pub type WsConnection = WebSocketStream<PrefixedStream<TcpStream>>;

/// The upgrade request a WebSocket connection was accepted from.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub peer: SocketAddr,
}

impl UpgradeRequest {
    pub(crate) fn from_head(head: RequestHead, peer: SocketAddr) -> Self {
        Self {
            method: head.method,
            uri: head.uri,
            headers: head.headers,
            peer,
        }
    }
}

/// The JSON-RPC engine the listeners hand authorized traffic to.
///
/// One dispatcher may back several listeners at once.
#[async_trait]
pub trait RpcDispatcher: Send + Sync + 'static {
    /// Answer a parsed HTTP request body. `None` means there is nothing to
    /// send back (a notification or a batch of them).
    async fn handle(&self, body: &Value) -> Option<Value>;

    /// Options for the WebSocket protocol layer. Defaults apply when `None`.
    fn websocket_config(&self) -> Option<WebSocketConfig> {
        None
    }

    /// Take ownership of a freshly accepted WebSocket connection. Called
    /// exactly once per connection.
    async fn on_connection(&self, socket: WsConnection, request: UpgradeRequest);
}
