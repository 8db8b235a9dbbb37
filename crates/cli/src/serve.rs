use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use {
    anyhow::{Context, Result},
    futures::future::try_join_all,
    serde_json::{Value, json},
    tokio::net::TcpListener,
    tracing::{error, info, warn},
};

use {
    tollgate_auth::{AuthGate, JwtSecret, protected_methods},
    tollgate_config::{EngineConfig, TollgateConfig, discover_and_load, load_config},
    tollgate_gateway::{
        ListenerConfig, MethodRegistry, RpcDispatcher, RpcServer, create_rpc_listener,
        create_ws_listener,
    },
    tollgate_protocol::ErrorShape,
};

use crate::jwt_commands::default_secret_path;

/// A listener ready to bind.
struct Planned {
    name: &'static str,
    addr: SocketAddr,
    authenticated: bool,
    server: RpcServer,
}

// ── Entry point ──────────────────────────────────────────────────────────────

pub async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let config = match config_path {
        Some(path) => load_config(&path)?,
        None => discover_and_load(),
    };

    let secret = if config.engine.enabled && config.engine.auth {
        Some(resolve_secret(&config.engine)?)
    } else {
        None
    };

    let registry = builtin_methods();
    let method_count = registry.method_names().len();
    let dispatcher: Arc<dyn RpcDispatcher> = Arc::new(registry);
    let planned = plan_listeners(&config, dispatcher, secret)?;
    if planned.is_empty() {
        warn!("no listeners enabled, nothing to serve");
        return Ok(());
    }

    let mut bound = Vec::with_capacity(planned.len());
    for plan in planned {
        let listener = TcpListener::bind(plan.addr)
            .await
            .with_context(|| format!("binding {} listener on {}", plan.name, plan.addr))?;
        bound.push((plan, listener));
    }

    // Startup banner.
    let mut lines = vec![format!("tollgate v{}", env!("CARGO_PKG_VERSION"))];
    for (plan, _) in &bound {
        lines.push(format!(
            "{:<6} {} (auth: {}, websocket: {})",
            plan.name,
            plan.addr,
            if plan.authenticated { "jwt" } else { "off" },
            if plan.server.accepts_upgrades() { "on" } else { "off" },
        ));
    }
    lines.push(format!("{method_count} methods registered"));
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    try_join_all(
        bound
            .into_iter()
            .map(|(plan, listener)| plan.server.serve_with_shutdown(listener, shutdown_signal())),
    )
    .await?;
    info!("tollgate stopped");
    Ok(())
}

/// Resolves on ctrl-c. If the handler cannot be installed the listeners run
/// until the process is killed.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c, graceful shutdown disabled");
        std::future::pending::<()>().await;
    }
}

fn resolve_secret(engine: &EngineConfig) -> Result<JwtSecret> {
    let path = engine
        .jwt_secret
        .clone()
        .unwrap_or_else(default_secret_path);
    let secret = JwtSecret::load_or_create(&path)
        .with_context(|| format!("loading JWT secret from {}", path.display()))?;
    info!(path = %path.display(), "using JWT secret");
    Ok(secret)
}

// ── Listener wiring ──────────────────────────────────────────────────────────

fn socket_addr(bind: &str, port: u16) -> Result<SocketAddr> {
    let ip: IpAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address {bind:?}"))?;
    Ok(SocketAddr::new(ip, port))
}

/// Build every enabled listener. The WebSocket path shares the RPC server
/// when both use the same port; the engine server takes upgrades on its own
/// port when `engine.ws` is set.
fn plan_listeners(
    config: &TollgateConfig,
    dispatcher: Arc<dyn RpcDispatcher>,
    secret: Option<JwtSecret>,
) -> Result<Vec<Planned>> {
    let mut planned = Vec::new();
    let ws_shares_rpc = config.ws.enabled && config.ws.shares_rpc_port(&config.rpc);

    let public = {
        let base = ListenerConfig::new(Arc::clone(&dispatcher));
        match &config.rpc.cors {
            Some(origin) => base.with_cors(origin.clone()),
            None => base,
        }
    };

    if config.rpc.enabled {
        let mut server = create_rpc_listener(public.clone())?;
        if ws_shares_rpc {
            create_ws_listener(public.clone(), Some(&mut server))?;
        }
        planned.push(Planned {
            name: "rpc",
            addr: socket_addr(&config.rpc.bind, config.rpc.port)?,
            authenticated: false,
            server,
        });
    }

    if config.ws.enabled
        && !ws_shares_rpc
        && let Some(server) = create_ws_listener(public, None)?
    {
        planned.push(Planned {
            name: "ws",
            addr: socket_addr(&config.rpc.bind, config.ws.port)?,
            authenticated: false,
            server,
        });
    }

    if config.engine.enabled {
        let engine = &config.engine;
        let mut listener = ListenerConfig::new(dispatcher);
        if let Some(origin) = &engine.cors {
            listener = listener.with_cors(origin.clone());
        }
        if engine.auth {
            let secret = secret.context("engine auth is enabled but no JWT secret was loaded")?;
            let mut gate = AuthGate::new(secret);
            if !engine.protected_prefixes.is_empty() {
                gate = gate.with_exemption_predicate(protected_methods(
                    engine.protected_prefixes.iter().cloned(),
                ));
            }
            listener = listener.with_auth(gate);
        } else {
            warn!("engine listener is running without authentication");
        }

        let authenticated = listener.is_authenticated();
        let mut server = create_rpc_listener(listener.clone())?;
        if engine.ws {
            create_ws_listener(listener, Some(&mut server))?;
        }
        planned.push(Planned {
            name: "engine",
            addr: socket_addr(&engine.bind, engine.port)?,
            authenticated,
            server,
        });
    }

    Ok(planned)
}

// ── Built-in methods ─────────────────────────────────────────────────────────

const ENGINE_CAPABILITIES: &[&str] = &["engine_exchangeCapabilities"];

fn builtin_methods() -> MethodRegistry {
    let mut reg = MethodRegistry::new();

    reg.register_async("web3_clientVersion", |_| async {
        Ok(json!(format!("tollgate/v{}", env!("CARGO_PKG_VERSION"))))
    });

    reg.register_async("rpc_modules", |_| async {
        Ok(json!({"engine": "1.0", "rpc": "1.0", "web3": "1.0"}))
    });

    reg.register_async("engine_exchangeCapabilities", |ctx| async move {
        match ctx.params.get(0) {
            Some(Value::Array(_)) => Ok(json!(ENGINE_CAPABILITIES)),
            _ => Err(ErrorShape::invalid_params(
                "expected the caller's capability list as the first parameter",
            )),
        }
    });

    reg
}
