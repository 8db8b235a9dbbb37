use std::{
    net::SocketAddr,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use {
    axum::{Router, http::StatusCode},
    tokio::{io::AsyncWriteExt, net::TcpStream},
    tokio_tungstenite::{accept_async_with_config, tungstenite},
    tower_http::trace::TraceLayer,
    tracing::{debug, error, info},
};

use {
    tollgate_auth::{AuthGate, GateError, RequestMeta},
    tollgate_config::constants::{WS_INTERNAL_ERROR_RESPONSE, WS_UNAUTHORIZED_RESPONSE},
};

use crate::{
    cors::cors_layer,
    dispatch::{RpcDispatcher, UpgradeRequest, WsConnection},
    error::GatewayError,
    io::{PrefixedStream, RequestHead},
    listener::ListenerConfig,
    server::RpcServer,
};

// ── Listener ─────────────────────────────────────────────────────────────────

/// Build the WebSocket JSON-RPC listener.
///
/// With `existing`, the upgrade handler is attached to that server so both
/// protocols share its port, and `None` is returned. Otherwise a fresh
/// server is returned whose plain-HTTP side only answers CORS preflights
/// and 404s.
pub fn create_ws_listener(
    config: ListenerConfig,
    existing: Option<&mut RpcServer>,
) -> Result<Option<RpcServer>, GatewayError> {
    let ListenerConfig {
        cors_origin,
        dispatcher,
        auth,
    } = config;
    let upgrade = WsUpgrade { dispatcher, auth };

    if let Some(server) = existing {
        server.attach_upgrade(upgrade);
        return Ok(None);
    }

    let mut router = Router::new().fallback(|| async { StatusCode::NOT_FOUND });
    if let Some(origin) = cors_origin.as_deref() {
        router = router.layer(cors_layer(origin)?);
    }
    let mut server = RpcServer::new(router.layer(TraceLayer::new_for_http()));
    server.attach_upgrade(upgrade);
    Ok(Some(server))
}

// ── Upgrade handling ─────────────────────────────────────────────────────────

/// Handles upgrade requests on a server's port.
///
/// Each connection moves through [`AwaitingUpgrade`] → [`AuthChecked`] →
/// [`HandshakeComplete`]. Every transition consumes the previous state, so
/// a handshake cannot start before the gate has passed and the dispatcher
/// only ever sees completed handshakes.
pub(crate) struct WsUpgrade {
    dispatcher: Arc<dyn RpcDispatcher>,
    auth: Option<AuthGate>,
}

impl WsUpgrade {
    pub(crate) async fn handle(
        &self,
        head: RequestHead,
        stream: PrefixedStream<TcpStream>,
        peer: SocketAddr,
    ) {
        let awaiting = AwaitingUpgrade { head, stream, peer };

        let checked = match awaiting.authorize(self.auth.as_ref()) {
            Ok(checked) => checked,
            Err(rejection) => return rejection.close().await,
        };

        let complete = match checked
            .complete_handshake(self.dispatcher.websocket_config())
            .await
        {
            Ok(complete) => complete,
            Err(e) => {
                debug!(%peer, error = %e, "websocket handshake failed");
                return;
            },
        };

        info!(%peer, path = %complete.request.uri.path(), "websocket connection accepted");
        self.dispatcher
            .on_connection(complete.socket, complete.request)
            .await;
    }
}

/// A parsed upgrade request that has not been checked yet. Nothing has been
/// written to the socket.
struct AwaitingUpgrade {
    head: RequestHead,
    stream: PrefixedStream<TcpStream>,
    peer: SocketAddr,
}

/// The gate passed (or none is configured); the handshake may proceed.
struct AuthChecked {
    request: UpgradeRequest,
    stream: PrefixedStream<TcpStream>,
}

/// The WebSocket handshake finished and the connection is ready to hand
/// over.
struct HandshakeComplete {
    request: UpgradeRequest,
    socket: WsConnection,
}

/// The gate refused the upgrade. The socket gets a bare status line and is
/// closed.
struct Rejected {
    stream: PrefixedStream<TcpStream>,
    peer: SocketAddr,
    response: &'static [u8],
}

impl AwaitingUpgrade {
    fn authorize(self, gate: Option<&AuthGate>) -> Result<AuthChecked, Rejected> {
        let verdict = gate.map(|gate| {
            let meta = RequestMeta::new(&self.head.method, &self.head.uri, &self.head.headers);
            panic::catch_unwind(AssertUnwindSafe(|| gate.check(&meta)))
        });

        let response = match verdict {
            None | Some(Ok(Ok(_))) => {
                return Ok(AuthChecked {
                    request: UpgradeRequest::from_head(self.head, self.peer),
                    stream: self.stream,
                });
            },
            Some(Ok(Err(GateError::Auth(e)))) => {
                debug!(peer = %self.peer, error = %e, "websocket upgrade unauthorized");
                WS_UNAUTHORIZED_RESPONSE
            },
            Some(Ok(Err(e @ GateError::Clock(_)))) => {
                error!(peer = %self.peer, error = %e, "auth gate failed");
                WS_INTERNAL_ERROR_RESPONSE
            },
            Some(Err(_)) => {
                error!(peer = %self.peer, "auth gate panicked");
                WS_INTERNAL_ERROR_RESPONSE
            },
        };
        Err(Rejected {
            stream: self.stream,
            peer: self.peer,
            response,
        })
    }
}

impl AuthChecked {
    async fn complete_handshake(
        self,
        config: Option<tungstenite::protocol::WebSocketConfig>,
    ) -> Result<HandshakeComplete, tungstenite::Error> {
        let socket = accept_async_with_config(self.stream, config).await?;
        Ok(HandshakeComplete {
            request: self.request,
            socket,
        })
    }
}

impl Rejected {
    async fn close(mut self) {
        if let Err(e) = self.stream.write_all(self.response).await {
            debug!(peer = %self.peer, error = %e, "failed to write upgrade rejection");
        }
        drop(self.stream);
    }
}
