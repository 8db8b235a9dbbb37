use std::{
    fmt,
    sync::Arc,
    time::{SystemTime, SystemTimeError, UNIX_EPOCH},
};

use {
    http::{HeaderMap, Method, Request, Uri, header::AUTHORIZATION, request::Parts},
    serde_json::Value,
    tracing::{debug, warn},
};

use crate::{
    secret::JwtSecret,
    validator::{AuthError, validate_bearer},
};

// ── Request view ─────────────────────────────────────────────────────────────

/// What the gate and its exemption predicate may look at.
///
/// `body` is the parsed JSON-RPC payload on the HTTP path and `None` for
/// WebSocket upgrades, which carry no body at handshake time.
#[derive(Debug, Clone, Copy)]
pub struct RequestMeta<'a> {
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
    pub body: Option<&'a Value>,
}

impl<'a> RequestMeta<'a> {
    pub fn new(method: &'a Method, uri: &'a Uri, headers: &'a HeaderMap) -> Self {
        Self {
            method,
            uri,
            headers,
            body: None,
        }
    }

    pub fn with_body(mut self, body: Option<&'a Value>) -> Self {
        self.body = body;
        self
    }

    pub fn from_parts(parts: &'a Parts) -> Self {
        Self::new(&parts.method, &parts.uri, &parts.headers)
    }

    pub fn from_request<B>(req: &'a Request<B>) -> Self {
        Self::new(req.method(), req.uri(), req.headers())
    }
}

/// Returns `true` for requests that may skip token validation.
pub type ExemptionPredicate = Arc<dyn Fn(&RequestMeta<'_>) -> bool + Send + Sync>;

// ── Outcomes ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// The exemption predicate let the request through unchecked.
    Exempt,
    /// A fresh token signed with the shared secret was presented.
    Authorized,
}

/// A failed gate check: either a recognised auth failure, which the
/// transport turns into a rejection, or an unexpected error that must reach
/// the enclosing error handler unchanged.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("system clock is before the unix epoch: {0}")]
    Clock(#[from] SystemTimeError),
}

// ── Gate ─────────────────────────────────────────────────────────────────────

/// Per-request auth policy: an optional exemption, then bearer validation.
///
/// Stateless; one instance is shared by every connection of a listener.
#[derive(Clone)]
pub struct AuthGate {
    secret: JwtSecret,
    exemption: Option<ExemptionPredicate>,
}

impl AuthGate {
    pub fn new(secret: JwtSecret) -> Self {
        Self {
            secret,
            exemption: None,
        }
    }

    /// Install the exemption predicate, replacing any previous one.
    pub fn with_exemption(
        mut self,
        predicate: impl Fn(&RequestMeta<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.exemption = Some(Arc::new(predicate));
        self
    }

    pub fn with_exemption_predicate(mut self, predicate: ExemptionPredicate) -> Self {
        self.exemption = Some(predicate);
        self
    }

    pub fn secret(&self) -> &JwtSecret {
        &self.secret
    }

    pub fn has_exemption(&self) -> bool {
        self.exemption.is_some()
    }

    /// Check `req` against the current wall clock.
    pub fn check(&self, req: &RequestMeta<'_>) -> Result<GateDecision, GateError> {
        if self.is_exempt(req) {
            return Ok(GateDecision::Exempt);
        }
        let now_ms = unix_millis()?;
        Ok(self.verify(req, now_ms)?)
    }

    /// Check `req` as if the clock read `now_ms`.
    pub fn check_at(&self, req: &RequestMeta<'_>, now_ms: u64) -> Result<GateDecision, AuthError> {
        if self.is_exempt(req) {
            return Ok(GateDecision::Exempt);
        }
        self.verify(req, now_ms)
    }

    fn is_exempt(&self, req: &RequestMeta<'_>) -> bool {
        let exempt = self.exemption.as_ref().is_some_and(|pred| pred(req));
        if exempt {
            debug!(method = %req.method, uri = %req.uri, "auth exemption applied");
        }
        exempt
    }

    fn verify(&self, req: &RequestMeta<'_>, now_ms: u64) -> Result<GateDecision, AuthError> {
        let result = authorization_header(req.headers)
            .and_then(|header| validate_bearer(header, &self.secret, now_ms));
        match result {
            Ok(_) => Ok(GateDecision::Authorized),
            Err(err) => {
                warn!(method = %req.method, uri = %req.uri, error = %err, "auth rejected");
                Err(err)
            },
        }
    }
}

impl fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthGate")
            .field("secret", &self.secret)
            .field("exemption", &self.exemption.is_some())
            .finish()
    }
}

/// `HeaderMap` lookups are case-insensitive, so `Authorization` and
/// `authorization` resolve to the same entry.
fn authorization_header(headers: &HeaderMap) -> Result<Option<&str>, AuthError> {
    headers
        .get(AUTHORIZATION)
        .map(|value| {
            value.to_str().map_err(|_| {
                AuthError::InvalidToken("authorization header is not visible ASCII".into())
            })
        })
        .transpose()
}

fn unix_millis() -> Result<u64, SystemTimeError> {
    let elapsed = SystemTime::now().duration_since(UNIX_EPOCH)?;
    Ok(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::secret::Claims,
        http::HeaderValue,
        std::sync::atomic::{AtomicUsize, Ordering},
    };

    const NOW_MS: u64 = 1_700_000_000_000;

    fn request(auth: Option<&str>) -> Request<()> {
        let mut builder = Request::post("/");
        if let Some(auth) = auth {
            builder = builder.header("authorization", auth);
        }
        builder.body(()).unwrap()
    }

    fn fresh_header(secret: &JwtSecret) -> String {
        let token = secret.encode(&Claims::issued_at(NOW_MS / 1000)).unwrap();
        format!("Bearer {token}")
    }

    #[test]
    fn authorizes_fresh_token() {
        let secret = JwtSecret::random();
        let gate = AuthGate::new(secret.clone());
        let req = request(Some(&fresh_header(&secret)));
        assert_eq!(
            gate.check_at(&RequestMeta::from_request(&req), NOW_MS),
            Ok(GateDecision::Authorized)
        );
    }

    #[test]
    fn rejects_without_header() {
        let gate = AuthGate::new(JwtSecret::random());
        let req = request(None);
        assert_eq!(
            gate.check_at(&RequestMeta::from_request(&req), NOW_MS),
            Err(AuthError::MissingHeader)
        );
    }

    #[test]
    fn header_name_is_case_insensitive() {
        let secret = JwtSecret::random();
        let gate = AuthGate::new(secret.clone());
        let req = Request::post("/")
            .header("Authorization", fresh_header(&secret))
            .body(())
            .unwrap();
        assert!(gate.check_at(&RequestMeta::from_request(&req), NOW_MS).is_ok());
    }

    #[test]
    fn non_ascii_header_is_invalid_token() {
        let gate = AuthGate::new(JwtSecret::random());
        let mut req = request(None);
        req.headers_mut().insert(
            AUTHORIZATION,
            HeaderValue::from_bytes(b"Bearer \xff\xfe").unwrap(),
        );
        assert!(matches!(
            gate.check_at(&RequestMeta::from_request(&req), NOW_MS),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn exemption_skips_validation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let gate = AuthGate::new(JwtSecret::random()).with_exemption(move |req| {
            seen.fetch_add(1, Ordering::SeqCst);
            req.uri.path() == "/public"
        });

        let open = Request::get("/public").body(()).unwrap();
        assert_eq!(
            gate.check(&RequestMeta::from_request(&open)).unwrap(),
            GateDecision::Exempt
        );

        let guarded = Request::get("/private")
            .header("authorization", "Bearer garbage")
            .body(())
            .unwrap();
        assert!(matches!(
            gate.check(&RequestMeta::from_request(&guarded)),
            Err(GateError::Auth(AuthError::InvalidToken(_)))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn predicate_sees_parsed_body() {
        let gate = AuthGate::new(JwtSecret::random())
            .with_exemption(|req| req.body.is_some_and(|b| b["method"] == "eth_chainId"));
        let req = request(None);
        let body = serde_json::json!({"method": "eth_chainId"});
        let meta = RequestMeta::from_request(&req).with_body(Some(&body));
        assert_eq!(gate.check_at(&meta, NOW_MS), Ok(GateDecision::Exempt));
        assert_eq!(
            gate.check_at(&RequestMeta::from_request(&req), NOW_MS),
            Err(AuthError::MissingHeader)
        );
    }

    #[test]
    fn wall_clock_check_accepts_current_token() {
        let secret = JwtSecret::random();
        let gate = AuthGate::new(secret.clone());
        let header = format!("Bearer {}", secret.encode(&Claims::now()).unwrap());
        let req = request(Some(&header));
        assert_eq!(
            gate.check(&RequestMeta::from_request(&req)).unwrap(),
            GateDecision::Authorized
        );
    }

    #[test]
    fn debug_hides_secret() {
        let gate = AuthGate::new(JwtSecret::random()).with_exemption(|_| false);
        let printed = format!("{gate:?}");
        assert!(printed.contains("REDACTED"));
        assert!(printed.contains("exemption: true"));
    }
}
