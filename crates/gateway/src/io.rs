//! Connection plumbing for the shared accept loop.
//!
//! HTTP is served by hyper. When a WebSocket upgrade request shows up on a
//! connection, the socket is taken back from hyper before any response is
//! written, and the request head is re-encoded and replayed through
//! [`PrefixedStream`] so the upgrade path sees the connection as if it had
//! read it first.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use {
    bytes::{Buf, Bytes, BytesMut},
    http::{
        HeaderMap, HeaderName, Method, Uri,
        header::{CONNECTION, UPGRADE},
    },
    tokio::io::{AsyncRead, AsyncWrite, ReadBuf},
};

// ── Prefixed stream ──────────────────────────────────────────────────────────

/// A stream that yields `prefix` before reading from `inner`.
///
/// Writes always go straight to `inner`.
#[derive(Debug)]
pub struct PrefixedStream<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> PrefixedStream<S> {
    pub fn new(prefix: Bytes, inner: S) -> Self {
        Self { prefix, inner }
    }

    /// Bytes still waiting to be replayed.
    pub fn pending(&self) -> &[u8] {
        &self.prefix
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PrefixedStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.prefix.is_empty() {
            let n = self.prefix.len().min(buf.remaining());
            buf.put_slice(&self.prefix[..n]);
            self.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PrefixedStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

// ── Request head ─────────────────────────────────────────────────────────────

/// The parts of an HTTP/1.x request head the upgrade path needs.
#[derive(Debug, Clone)]
pub(crate) struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl RequestHead {
    pub(crate) fn from_parts(parts: http::request::Parts) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
        }
    }

    /// Serialize back into wire form as an HTTP/1.1 request head.
    pub(crate) fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(256);
        buf.extend_from_slice(self.method.as_str().as_bytes());
        buf.extend_from_slice(b" ");
        buf.extend_from_slice(self.uri.to_string().as_bytes());
        buf.extend_from_slice(b" HTTP/1.1\r\n");
        for (name, value) in &self.headers {
            buf.extend_from_slice(name.as_str().as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        buf.extend_from_slice(b"\r\n");
        buf
    }
}

/// A request asks for a WebSocket when `Upgrade` names `websocket` and
/// `Connection` lists the `upgrade` token. Both are case-insensitive.
/// Other protocols (`h2c`, ...) stay plain HTTP.
pub(crate) fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    has_token(headers, UPGRADE, "websocket") && has_token(headers, CONNECTION, "upgrade")
}

fn has_token(headers: &HeaderMap, name: HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        tokio::io::{AsyncReadExt, AsyncWriteExt},
    };

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        pairs
            .iter()
            .map(|(k, v)| (HeaderName::from_static(k), v.parse().unwrap()))
            .collect()
    }

    #[test]
    fn detects_websocket_upgrades() {
        assert!(is_websocket_upgrade(&headers(&[
            ("connection", "keep-alive, Upgrade"),
            ("upgrade", "WebSocket"),
        ])));
        assert!(is_websocket_upgrade(&headers(&[
            ("connection", "upgrade"),
            ("upgrade", "foo/2, websocket"),
        ])));
    }

    #[test]
    fn other_upgrades_stay_http() {
        let h2c = headers(&[("connection", "Upgrade, HTTP2-Settings"), ("upgrade", "h2c")]);
        assert!(!is_websocket_upgrade(&h2c));

        let no_connection_token = headers(&[("connection", "close"), ("upgrade", "websocket")]);
        assert!(!is_websocket_upgrade(&no_connection_token));

        let empty_upgrade = headers(&[("connection", "upgrade"), ("upgrade", " ")]);
        assert!(!is_websocket_upgrade(&empty_upgrade));
        assert!(!is_websocket_upgrade(&HeaderMap::new()));
    }

    #[test]
    fn encodes_head_in_wire_form() {
        let head = RequestHead {
            method: Method::GET,
            uri: "/ws?x=1".parse().unwrap(),
            headers: headers(&[("host", "localhost"), ("upgrade", "websocket")]),
        };
        assert_eq!(
            &head.encode()[..],
            b"GET /ws?x=1 HTTP/1.1\r\nhost: localhost\r\nupgrade: websocket\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn replays_prefix_then_inner() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b" world").await.unwrap();
        drop(client);

        let mut stream = PrefixedStream::new(Bytes::from_static(b"hello"), server);
        assert_eq!(stream.pending(), b"hello");
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
        assert!(stream.pending().is_empty());
    }

    #[tokio::test]
    async fn writes_bypass_prefix() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut stream = PrefixedStream::new(Bytes::from_static(b"ignored"), client);
        stream.write_all(b"pong").await.unwrap();
        stream.shutdown().await.unwrap();

        let mut out = Vec::new();
        server.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"pong");
        assert_eq!(stream.pending(), b"ignored");
    }
}
