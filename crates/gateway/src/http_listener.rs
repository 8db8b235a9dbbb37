use std::sync::Arc;

use {
    axum::{
        Extension, Json, Router,
        body::Body,
        extract::{Request, State},
        http::{Method, StatusCode},
        middleware::{self, Next},
        response::{IntoResponse, Response},
        routing::post,
    },
    http_body_util::LengthLimitError,
    serde_json::Value,
    tower_http::{catch_panic::CatchPanicLayer, limit::RequestBodyLimitLayer, trace::TraceLayer},
    tracing::{debug, error},
};

use {
    tollgate_auth::{AuthGate, GateError, RequestMeta},
    tollgate_config::constants::RPC_BODY_LIMIT,
    tollgate_protocol::{ErrorShape, ResponseFrame},
};

use crate::{
    cors::cors_layer, dispatch::RpcDispatcher, error::GatewayError, listener::ListenerConfig,
    server::RpcServer,
};

/// The parsed JSON body of a POST, stashed for the gate and the handler.
#[derive(Debug, Clone)]
struct RpcBody(Arc<Value>);

// ── Listener ─────────────────────────────────────────────────────────────────

/// Build the HTTP JSON-RPC listener.
///
/// Requests run through, in order: panic recovery, tracing, CORS (if
/// configured), the 11 MiB body limit, JSON parsing, the auth gate (if
/// configured) and finally the dispatcher on `POST /`.
pub fn create_rpc_listener(config: ListenerConfig) -> Result<RpcServer, GatewayError> {
    let ListenerConfig {
        cors_origin,
        dispatcher,
        auth,
    } = config;
    let cors = cors_origin.as_deref().map(cors_layer).transpose()?;

    let mut router = Router::new()
        .route("/", post(rpc_handler))
        .with_state(dispatcher);
    if let Some(gate) = auth {
        router = router.layer(middleware::from_fn_with_state(gate, require_auth));
    }
    router = router
        .layer(middleware::from_fn(parse_json_body))
        .layer(RequestBodyLimitLayer::new(RPC_BODY_LIMIT));
    if let Some(cors) = cors {
        router = router.layer(cors);
    }
    let router = router
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new());

    Ok(RpcServer::new(router))
}

// ── Middleware ───────────────────────────────────────────────────────────────

async fn parse_json_body(req: Request, next: Next) -> Response {
    if req.method() != Method::POST {
        return next.run(req).await;
    }

    let (mut parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, RPC_BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(err) => {
            let too_large = exceeds_limit(&err);
            debug!(error = %err, too_large, "failed to read request body");
            return if too_large {
                StatusCode::PAYLOAD_TOO_LARGE.into_response()
            } else {
                StatusCode::BAD_REQUEST.into_response()
            };
        },
    };

    let value = match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => value,
        Err(err) => {
            debug!(error = %err, "request body is not valid JSON");
            let reply = ResponseFrame::err(Value::Null, ErrorShape::parse_error());
            return (StatusCode::BAD_REQUEST, Json(reply.to_value())).into_response();
        },
    };

    parts.extensions.insert(RpcBody(Arc::new(value)));
    next.run(Request::from_parts(parts, Body::empty())).await
}

fn exceeds_limit(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if err.is::<LengthLimitError>() {
            return true;
        }
        current = err.source();
    }
    false
}

async fn require_auth(State(gate): State<AuthGate>, req: Request, next: Next) -> Response {
    let verdict = {
        let body = req.extensions().get::<RpcBody>().map(|b| b.0.as_ref());
        let meta = RequestMeta::new(req.method(), req.uri(), req.headers()).with_body(body);
        gate.check(&meta)
    };

    match verdict {
        Ok(_) => next.run(req).await,
        Err(GateError::Auth(err)) => {
            (StatusCode::UNAUTHORIZED, format!("Unauthorized: {err}")).into_response()
        },
        Err(err @ GateError::Clock(_)) => {
            error!(error = %err, "auth gate failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        },
    }
}

// ── Handler ──────────────────────────────────────────────────────────────────

async fn rpc_handler(
    State(dispatcher): State<Arc<dyn RpcDispatcher>>,
    Extension(RpcBody(body)): Extension<RpcBody>,
) -> Response {
    match dispatcher.handle(&body).await {
        Some(reply) => Json(reply).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{dispatch::UpgradeRequest, dispatch::WsConnection},
        async_trait::async_trait,
        axum::http::header,
        http_body_util::BodyExt,
        serde_json::json,
        std::sync::atomic::{AtomicUsize, Ordering},
        tollgate_auth::{Claims, JwtSecret, protected_methods},
        tower::ServiceExt,
    };

    /// Echoes the body back, counting calls.
    #[derive(Default)]
    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RpcDispatcher for Echo {
        async fn handle(&self, body: &Value) -> Option<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (!body.is_null()).then(|| json!({"echo": body}))
        }

        async fn on_connection(&self, _socket: WsConnection, _request: UpgradeRequest) {}
    }

    fn router(config: ListenerConfig) -> Router {
        create_rpc_listener(config).unwrap().router()
    }

    fn post_json() -> http::request::Builder {
        http::Request::post("/").header(header::CONTENT_TYPE, "application/json")
    }

    async fn body_text(res: Response) -> String {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn dispatches_open_listener() {
        let echo = Arc::new(Echo::default());
        let app = router(ListenerConfig::new(echo.clone()));

        let res = app
            .oneshot(post_json().body(Body::from(r#"{"id":1}"#)).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let reply: Value = serde_json::from_str(&body_text(res).await).unwrap();
        assert_eq!(reply, json!({"echo": {"id": 1}}));
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_reply_is_no_content() {
        let app = router(ListenerConfig::new(Arc::new(Echo::default())));
        let res = app
            .oneshot(post_json().body(Body::from("null")).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn malformed_json_is_parse_error() {
        let echo = Arc::new(Echo::default());
        let app = router(ListenerConfig::new(echo.clone()));
        let res = app
            .oneshot(post_json().body(Body::from("{not json")).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let reply: Value = serde_json::from_str(&body_text(res).await).unwrap();
        assert_eq!(reply["error"]["code"], json!(-32700));
        assert_eq!(echo.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected_before_dispatch() {
        let echo = Arc::new(Echo::default());
        let app = router(ListenerConfig::new(echo.clone()));
        let huge = format!("\"{}\"", "a".repeat(RPC_BODY_LIMIT));
        let res = app
            .oneshot(post_json().body(Body::from(huge)).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(echo.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn gate_rejects_with_reason() {
        let echo = Arc::new(Echo::default());
        let gate = AuthGate::new(JwtSecret::random());
        let app = router(ListenerConfig::new(echo.clone()).with_auth(gate));

        let res = app
            .oneshot(post_json().body(Body::from(r#"{"id":1}"#)).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_text(res).await, "Unauthorized: missing auth header");
        assert_eq!(echo.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn gate_admits_fresh_token() {
        let secret = JwtSecret::random();
        let token = secret.encode(&Claims::now()).unwrap();
        let app = router(
            ListenerConfig::new(Arc::new(Echo::default())).with_auth(AuthGate::new(secret)),
        );
        let res = app
            .oneshot(
                post_json()
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::from(r#"{"id":1}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn exemption_sees_parsed_body() {
        let gate = AuthGate::new(JwtSecret::random())
            .with_exemption_predicate(protected_methods(["engine_"]));
        let app = router(ListenerConfig::new(Arc::new(Echo::default())).with_auth(gate));

        let open = json!({"jsonrpc": "2.0", "id": 1, "method": "eth_chainId"}).to_string();
        let res = app
            .clone()
            .oneshot(post_json().body(Body::from(open)).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let guarded = json!({"jsonrpc": "2.0", "id": 2, "method": "engine_forkchoiceUpdatedV3"});
        let res = app
            .oneshot(post_json().body(Body::from(guarded.to_string())).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn panicking_predicate_is_internal_error() {
        let gate = AuthGate::new(JwtSecret::random()).with_exemption(|_| panic!("boom"));
        let app = router(ListenerConfig::new(Arc::new(Echo::default())).with_auth(gate));
        let res = app
            .oneshot(post_json().body(Body::from("{}")).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn cors_preflight_is_answered() {
        let app = router(
            ListenerConfig::new(Arc::new(Echo::default())).with_cors("http://dapp.example"),
        );
        let res = app
            .oneshot(
                http::Request::options("/")
                    .header(header::ORIGIN, "http://dapp.example")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let headers = res.headers();
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://dapp.example"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "content-type");
        assert!(
            headers[header::ACCESS_CONTROL_ALLOW_METHODS]
                .to_str()
                .unwrap()
                .contains("POST")
        );
    }

    #[tokio::test]
    async fn get_is_not_parsed() {
        let app = router(ListenerConfig::new(Arc::new(Echo::default())));
        let res = app
            .oneshot(http::Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn invalid_cors_origin_fails_build() {
        let config = ListenerConfig::new(Arc::new(Echo::default())).with_cors("bad\u{7f}origin");
        assert!(matches!(
            create_rpc_listener(config),
            Err(GatewayError::InvalidCorsOrigin { .. })
        ));
    }
}
