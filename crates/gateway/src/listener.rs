use std::{fmt, sync::Arc};

use tollgate_auth::AuthGate;

use crate::dispatch::RpcDispatcher;

/// Everything a listener builder needs.
///
/// Builders consume the config; clone it to back an HTTP and a WebSocket
/// listener with the same dispatcher and gate.
#[derive(Clone)]
pub struct ListenerConfig {
    /// `*` for any origin, or a comma-separated list of allowed origins.
    pub cors_origin: Option<String>,
    pub dispatcher: Arc<dyn RpcDispatcher>,
    /// When set, every request must pass the gate before reaching the
    /// dispatcher.
    pub auth: Option<AuthGate>,
}

impl ListenerConfig {
    pub fn new(dispatcher: Arc<dyn RpcDispatcher>) -> Self {
        Self {
            cors_origin: None,
            dispatcher,
            auth: None,
        }
    }

    pub fn with_cors(mut self, origin: impl Into<String>) -> Self {
        self.cors_origin = Some(origin.into());
        self
    }

    pub fn with_auth(mut self, gate: AuthGate) -> Self {
        self.auth = Some(gate);
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.is_some()
    }
}

impl fmt::Debug for ListenerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerConfig")
            .field("cors_origin", &self.cors_origin)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}
