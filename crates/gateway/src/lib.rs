//! Gateway: JSON-RPC listeners over HTTP and WebSocket.
//!
//! Lifecycle:
//! 1. Build a [`ListenerConfig`] around an [`RpcDispatcher`], optionally
//!    with a CORS origin and an [`tollgate_auth::AuthGate`]
//! 2. [`create_rpc_listener`] wraps the dispatcher in the HTTP pipeline
//! 3. [`create_ws_listener`] attaches an upgrade handler, either to an
//!    existing [`RpcServer`] or to a fresh one
//! 4. [`RpcServer::serve`] runs the accept loop
//!
//! Method handling lives behind the dispatcher; [`MethodRegistry`] is the
//! stock implementation.

pub mod dispatch;
pub mod error;
pub mod http_listener;
pub mod io;
pub mod listener;
pub mod methods;
pub mod server;
pub mod ws_listener;

mod cors;

pub use {
    dispatch::{RpcDispatcher, UpgradeRequest, WsConnection},
    error::GatewayError,
    http_listener::create_rpc_listener,
    io::PrefixedStream,
    listener::ListenerConfig,
    methods::{HandlerFn, MethodContext, MethodRegistry, MethodResult},
    server::RpcServer,
    ws_listener::create_ws_listener,
};
