//! Process-wide protocol constants shared by the auth gate and the listeners.

use std::time::Duration;

use jsonwebtoken::Algorithm;

/// The only signing algorithm accepted for bearer tokens (HMAC + SHA256).
pub const JWT_ALGORITHM: Algorithm = Algorithm::HS256;

/// Maximum distance between the token's `iat` claim and the local clock.
///
/// A token is stale when `|now_ms - iat * 1000|` is strictly greater than
/// this window; a delta of exactly 5000 ms is still accepted.
pub const JWT_FRESHNESS_WINDOW: Duration = Duration::from_millis(5000);

/// Upper bound for a buffered HTTP JSON-RPC request body.
///
/// Gossip payloads are capped at 10 MiB, so 11 MiB leaves room for the
/// JSON-RPC envelope around the largest expected single payload.
pub const RPC_BODY_LIMIT: usize = 11 * 1024 * 1024;

/// Bytes written to a socket whose WebSocket upgrade failed authentication.
pub const WS_UNAUTHORIZED_RESPONSE: &[u8] = b"HTTP/1.1 401 Unauthorized\r\n\r\n";

/// Length in hex digits of a 256-bit shared secret.
pub const JWT_SECRET_HEX_LEN: usize = 64;

/// Default file name for a generated shared secret inside the data dir.
pub const JWT_SECRET_FILENAME: &str = "jwt.hex";

/// Bytes written to an upgrade socket when the gate itself failed.
pub const WS_INTERNAL_ERROR_RESPONSE: &[u8] = b"HTTP/1.1 500 Internal Server Error\r\n\r\n";
