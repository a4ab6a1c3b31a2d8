//! Opening connections: DNS, TCP, and optionally TLS.
//!
//! Roughly equivalent to Chromium's `ConnectJob`, minus pooling: one
//! [`Connection`] lives for at most one forwarding operation.

use crate::base::context::IoResultExt;
use crate::base::neterror::{NetError, RequestError};
use crate::http::auth::session::AuthSession;
use crate::socket::stream::BoxedSocket;
use crate::socket::tls::TlsUpgrader;
use async_trait::async_trait;
use bytes::BytesMut;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, trace};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One physical connection plus the state bound to it.
pub struct Connection {
    id: u64,
    socket: BoxedSocket,
    read_buf: BytesMut,
    host: String,
    port: u16,
    secure: bool,
    reusable: bool,
    auth: Arc<AuthSession>,
}

impl Connection {
    pub fn new(socket: BoxedSocket, host: impl Into<String>, port: u16, secure: bool) -> Self {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id,
            socket,
            read_buf: BytesMut::with_capacity(8 * 1024),
            host: host.into(),
            port,
            secure,
            reusable: true,
            auth: Arc::new(AuthSession::new(id)),
        }
    }

    /// Unique for the life of the process. Auth handshakes that are bound
    /// to a connection compare ids to detect a reconnect.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Whether another request may be written to this connection.
    pub fn is_reusable(&self) -> bool {
        self.reusable
    }

    pub fn mark_closed(&mut self) {
        self.reusable = false;
    }

    pub fn auth_session(&self) -> Arc<AuthSession> {
        Arc::clone(&self.auth)
    }

    pub(crate) fn io(&mut self) -> (&mut BoxedSocket, &mut BytesMut) {
        (&mut self.socket, &mut self.read_buf)
    }

    /// Give up the socket, e.g. to wrap it in TLS. Fails if bytes past the
    /// last response were already read, since they would be lost.
    pub fn into_socket(self) -> Result<BoxedSocket, RequestError> {
        if !self.read_buf.is_empty() {
            return Err(RequestError::new(
                NetError::InvalidResponse,
                format!(
                    "{} unexpected bytes after response on connection {}",
                    self.read_buf.len(),
                    self.id
                ),
            ));
        }
        Ok(self.socket)
    }

    pub async fn shutdown(mut self) {
        trace!(conn = self.id, "shutting down connection");
        let _ = self.socket.shutdown().await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("reusable", &self.reusable)
            .finish()
    }
}

/// Opens connections to a host.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to `host:port`, wrapping in TLS (verifying `host`) when
    /// `tls` is set.
    async fn open(&self, host: &str, port: u16, tls: bool) -> Result<Connection, RequestError>;
}

/// Direct TCP via the tokio resolver.
pub struct TcpTransport {
    tls: Arc<dyn TlsUpgrader>,
    connect_timeout: Option<Duration>,
}

impl TcpTransport {
    pub fn new(tls: Arc<dyn TlsUpgrader>) -> Self {
        Self {
            tls,
            connect_timeout: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    async fn connect_tcp(&self, host: &str, port: u16) -> Result<TcpStream, RequestError> {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        let lookup = if bare.contains(':') {
            format!("[{}]:{}", bare, port)
        } else {
            format!("{}:{}", bare, port)
        };
        let addrs: Vec<_> = tokio::net::lookup_host(&lookup)
            .await
            .dns_context(host)?
            .collect();
        if addrs.is_empty() {
            return Err(RequestError::new(
                NetError::NameNotResolved,
                format!("resolve {}: no addresses", host),
            ));
        }

        let mut last_err = None;
        for addr in addrs {
            let attempt = TcpStream::connect(addr);
            let result = match self.connect_timeout {
                Some(t) => match tokio::time::timeout(t, attempt).await {
                    Ok(r) => r,
                    Err(_) => Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("no answer within {}ms", t.as_millis()),
                    )),
                },
                None => attempt.await,
            };
            match result.connection_context(host, port) {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    return Ok(stream);
                }
                Err(e) => {
                    trace!(%addr, error = %e, "connect attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| NetError::ConnectionFailed.into()))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&self, host: &str, port: u16, tls: bool) -> Result<Connection, RequestError> {
        let stream = self.connect_tcp(host, port).await?;
        let mut socket = BoxedSocket::new(stream);
        if tls {
            socket = self.tls.upgrade(socket, host).await?;
        }
        let conn = Connection::new(socket, host, port, tls);
        debug!(conn = conn.id(), host, port, tls, "connection opened");
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::neterror::ErrorCategory;
    use crate::socket::tls::{BoringTlsUpgrader, TlsConfig};

    fn transport() -> TcpTransport {
        TcpTransport::new(Arc::new(BoringTlsUpgrader::new(TlsConfig::default()).unwrap()))
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let (a, _) = tokio::io::duplex(8);
        let (b, _) = tokio::io::duplex(8);
        let first = Connection::new(BoxedSocket::new(a), "a", 80, false);
        let second = Connection::new(BoxedSocket::new(b), "a", 80, false);
        assert_ne!(first.id(), second.id());
        assert_eq!(first.auth_session().connection_id(), first.id());
    }

    #[tokio::test]
    async fn test_open_plain() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let conn = transport().open("127.0.0.1", port, false).await.unwrap();
        assert_eq!(conn.port(), port);
        assert!(!conn.is_secure());
        assert!(conn.is_reusable());
    }

    #[tokio::test]
    async fn test_refused_is_connect_failed() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = transport().open("127.0.0.1", port, false).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ConnectFailed);
    }

    #[test]
    fn test_into_socket_rejects_buffered_bytes() {
        let (a, _) = tokio::io::duplex(8);
        let mut conn = Connection::new(BoxedSocket::new(a), "proxy", 3128, false);
        conn.io().1.extend_from_slice(b"leftover");
        let err = conn.into_socket().unwrap_err();
        assert_eq!(err.code(), NetError::InvalidResponse);
    }
}
