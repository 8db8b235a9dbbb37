use std::{
    convert::Infallible,
    future::{self, Future},
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
};

use {
    axum::{Router, response::Response},
    hyper::{body::Incoming, server::conn::http1, service::service_fn},
    hyper_util::rt::TokioIo,
    tokio::{
        net::{TcpListener, TcpStream},
        sync::mpsc,
    },
    tower::Service,
    tracing::{debug, info, warn},
};

use crate::{
    error::GatewayError,
    io::{PrefixedStream, RequestHead, is_websocket_upgrade},
    ws_listener::WsUpgrade,
};

// ── Server ───────────────────────────────────────────────────────────────────

/// A built listener: an HTTP router plus, optionally, a WebSocket upgrade
/// handler sharing the same port.
///
/// WebSocket upgrade requests are routed to the upgrade handler when one is
/// attached and served as plain HTTP otherwise.
pub struct RpcServer {
    router: Router,
    upgrade: Option<Arc<WsUpgrade>>,
}

impl RpcServer {
    pub(crate) fn new(router: Router) -> Self {
        Self {
            router,
            upgrade: None,
        }
    }

    pub(crate) fn attach_upgrade(&mut self, handler: WsUpgrade) {
        if self.upgrade.replace(Arc::new(handler)).is_some() {
            warn!("replacing the websocket upgrade handler already attached to this server");
        }
    }

    /// Whether WebSocket upgrades are handled on this server's port.
    pub fn accepts_upgrades(&self) -> bool {
        self.upgrade.is_some()
    }

    /// The HTTP side of the server, for driving it without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Bind `addr` and serve until the process exits.
    pub async fn listen(self, addr: SocketAddr) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> Result<(), GatewayError> {
        self.serve_with_shutdown(listener, future::pending())
            .await
    }

    /// Accept connections until `shutdown` resolves. Connections already
    /// accepted keep running on their own tasks.
    pub async fn serve_with_shutdown(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<(), GatewayError> {
        let local = listener.local_addr()?;
        info!(addr = %local, websocket = self.accepts_upgrades(), "rpc listener started");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!(addr = %local, "rpc listener stopped");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(addr = %local, error = %e, "accept failed");
                            continue;
                        },
                    };
                    tokio::spawn(serve_connection(
                        stream,
                        peer,
                        self.router.clone(),
                        self.upgrade.clone(),
                    ));
                }
            }
        }
    }
}

// ── Connection ───────────────────────────────────────────────────────────────

type RouteFuture = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

/// Serve HTTP/1.1 on `stream` until the client goes away or sends a
/// WebSocket upgrade request (on any request of the connection, not just
/// the first) while an upgrade handler is attached. In that case hyper is
/// stopped before it answers, and the socket goes to the upgrade handler
/// with the request head replayed in front of any bytes hyper had already
/// buffered.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    upgrade: Option<Arc<WsUpgrade>>,
) {
    let (upgrade_tx, mut upgrade_rx) = mpsc::channel::<RequestHead>(1);
    let takes_upgrades = upgrade.is_some();

    let service = service_fn(move |req: hyper::Request<Incoming>| -> RouteFuture {
        if takes_upgrades && is_websocket_upgrade(req.headers()) {
            let (parts, _body) = req.into_parts();
            // The connection task stops polling hyper once this is received,
            // so the response future is never awaited.
            let _ = upgrade_tx.try_send(RequestHead::from_parts(parts));
            return Box::pin(future::pending::<Result<Response, Infallible>>());
        }
        let mut router = router.clone();
        Box::pin(async move { router.call(req).await })
    });

    let mut conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    let head = tokio::select! {
        served = future::poll_fn(|cx| conn.poll_without_shutdown(cx)) => {
            if let Err(e) = served {
                debug!(%peer, error = %e, "http connection closed with error");
            }
            return;
        }
        Some(head) = upgrade_rx.recv() => head,
    };
    let Some(upgrade) = upgrade else {
        return;
    };

    let parts = conn.into_parts();
    let mut replay = head.encode();
    replay.extend_from_slice(&parts.read_buf);
    let stream = PrefixedStream::new(replay.freeze(), parts.io.into_inner());
    upgrade.handle(head, stream, peer).await;
}
