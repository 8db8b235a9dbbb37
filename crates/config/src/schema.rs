//! Config file schema: the public JSON-RPC listener, its optional WebSocket
//! path, and the authenticated engine listener.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TollgateConfig {
    pub rpc: RpcConfig,
    pub ws: WsConfig,
    pub engine: EngineConfig,
}

/// Unauthenticated HTTP JSON-RPC listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
    /// Allowed CORS origin(s): `*`, one origin, or a comma-separated list.
    pub cors: Option<String>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1".into(),
            port: 8545,
            cors: None,
        }
    }
}

/// WebSocket path for the public JSON-RPC service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WsConfig {
    pub enabled: bool,
    /// When equal to `rpc.port` the upgrade path attaches to the RPC server
    /// instead of binding its own.
    pub port: u16,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8546,
        }
    }
}

/// Engine API listener, gated by the shared JWT secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
    /// Accept WebSocket upgrades on the engine port as well.
    pub ws: bool,
    /// Require a bearer token. Disabling this is only sensible on loopback.
    pub auth: bool,
    /// Hex-encoded secret file. Generated under the data dir when unset.
    pub jwt_secret: Option<PathBuf>,
    /// Method prefixes that require a token; calls naming none of them are
    /// exempt from the auth check.
    pub protected_prefixes: Vec<String>,
    pub cors: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1".into(),
            port: 8551,
            ws: true,
            auth: true,
            jwt_secret: None,
            protected_prefixes: vec!["engine_".into()],
            cors: None,
        }
    }
}

impl WsConfig {
    /// Whether the upgrade path should share the RPC listener's socket.
    pub fn shares_rpc_port(&self, rpc: &RpcConfig) -> bool {
        rpc.enabled && self.port == rpc.port
    }
}
