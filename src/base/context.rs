//! Ergonomic error context helpers.
//!
//! Provides extension traits for adding context to `Result` types,
//! converting IO errors into context-rich [`RequestError`]s.

use crate::base::neterror::{NetError, RequestError};
use std::io;

/// Extension trait for adding context to IO Results.
pub trait IoResultExt<T> {
    /// Add connection context to an IO error.
    ///
    /// # Example
    /// ```ignore
    /// use relaynet::base::context::IoResultExt;
    ///
    /// let stream = TcpStream::connect(addr).await
    ///     .connection_context("example.com", 443)?;
    /// // Error: "Connection refused (-102): connect to example.com:443: refused"
    /// ```
    fn connection_context(self, host: &str, port: u16) -> Result<T, RequestError>;

    /// Add DNS resolution context to an IO error.
    fn dns_context(self, domain: &str) -> Result<T, RequestError>;

    /// Add context for a read or write on an established connection.
    fn io_context(self, what: &str) -> Result<T, RequestError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn connection_context(self, host: &str, port: u16) -> Result<T, RequestError> {
        self.map_err(|e| {
            let code = match e.kind() {
                io::ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
                io::ErrorKind::TimedOut => NetError::ConnectionTimedOut,
                io::ErrorKind::ConnectionAborted => NetError::ConnectionAborted,
                io::ErrorKind::ConnectionReset => NetError::ConnectionReset,
                _ => NetError::ConnectionFailed,
            };
            RequestError::new(code, format!("connect to {}:{}: {}", host, port, e)).with_source(e)
        })
    }

    fn dns_context(self, domain: &str) -> Result<T, RequestError> {
        self.map_err(|e| {
            RequestError::new(NetError::NameNotResolved, format!("resolve {}: {}", domain, e))
                .with_source(e)
        })
    }

    fn io_context(self, what: &str) -> Result<T, RequestError> {
        self.map_err(|e| {
            let code = match e.kind() {
                io::ErrorKind::ConnectionReset => NetError::ConnectionReset,
                io::ErrorKind::ConnectionAborted => NetError::ConnectionAborted,
                io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe => {
                    NetError::ConnectionClosed
                }
                io::ErrorKind::TimedOut => NetError::TimedOut,
                _ => NetError::ConnectionFailed,
            };
            RequestError::new(code, format!("{}: {}", what, e)).with_source(e)
        })
    }
}
