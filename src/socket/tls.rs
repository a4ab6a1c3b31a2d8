//! TLS upgrade of an established socket.
//!
//! The upgrader is handed whatever socket the caller has (direct TCP or a
//! CONNECT tunnel) plus the host name the certificate must match. For a
//! tunnel that host is always the target, never the proxy.

use crate::base::neterror::{NetError, RequestError};
use crate::socket::stream::BoxedSocket;
use async_trait::async_trait;
use boring::ssl::{SslConnector, SslConnectorBuilder, SslMethod, SslVerifyMode, SslVersion};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Wraps a socket in TLS, verifying the peer against `verify_hostname`.
///
/// Failures are reported with a TLS error code so callers can tell them
/// apart from tunnel and connect failures.
#[async_trait]
pub trait TlsUpgrader: Send + Sync {
    async fn upgrade(
        &self,
        socket: BoxedSocket,
        verify_hostname: &str,
    ) -> Result<BoxedSocket, RequestError>;
}

/// Client TLS settings.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub min_version: Option<SslVersion>,
    pub max_version: Option<SslVersion>,
    /// Only HTTP/1.1 is spoken over the upgraded socket.
    pub alpn_protos: Vec<String>,
    /// Extra trust anchors (PEM file).
    pub ca_file: Option<PathBuf>,
    /// Skip chain and host name verification. Test rigs only.
    pub danger_accept_invalid_certs: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            min_version: Some(SslVersion::TLS1_2),
            max_version: Some(SslVersion::TLS1_3),
            alpn_protos: vec!["http/1.1".to_string()],
            ca_file: None,
            danger_accept_invalid_certs: false,
        }
    }
}

impl TlsConfig {
    pub fn with_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.danger_accept_invalid_certs = accept;
        self
    }

    /// Apply this configuration to an SSL connector builder.
    pub fn apply_to_builder(&self, builder: &mut SslConnectorBuilder) -> Result<(), RequestError> {
        let ssl_err = |what: &'static str| {
            move |e: boring::error::ErrorStack| {
                RequestError::new(NetError::SslProtocolError, format!("{}: {}", what, e))
                    .with_source(e)
            }
        };

        if let Some(min) = self.min_version {
            builder
                .set_min_proto_version(Some(min))
                .map_err(ssl_err("min TLS version"))?;
        }
        if let Some(max) = self.max_version {
            builder
                .set_max_proto_version(Some(max))
                .map_err(ssl_err("max TLS version"))?;
        }

        if !self.alpn_protos.is_empty() {
            let mut alpn_wire = Vec::new();
            for proto in &self.alpn_protos {
                if proto.is_empty() || proto.len() > 255 {
                    return Err(RequestError::new(
                        NetError::SslProtocolError,
                        format!("invalid ALPN protocol {:?}", proto),
                    ));
                }
                alpn_wire.push(proto.len() as u8);
                alpn_wire.extend_from_slice(proto.as_bytes());
            }
            builder
                .set_alpn_protos(&alpn_wire)
                .map_err(ssl_err("ALPN"))?;
        }

        if let Some(ca) = &self.ca_file {
            builder.set_ca_file(ca).map_err(ssl_err("CA file"))?;
        }

        if self.danger_accept_invalid_certs {
            warn!("TLS peer verification disabled");
            builder.set_verify(SslVerifyMode::NONE);
        } else {
            builder.set_verify(SslVerifyMode::PEER);
        }

        Ok(())
    }

    /// Check if SNI (Server Name Indication) should be set for this host.
    /// Per RFC 6066, SNI MUST NOT be set for raw IP addresses.
    pub fn should_set_sni(host: &str) -> bool {
        host.trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<std::net::IpAddr>()
            .is_err()
    }
}

/// BoringSSL-backed upgrader.
pub struct BoringTlsUpgrader {
    connector: SslConnector,
    config: TlsConfig,
}

impl BoringTlsUpgrader {
    pub fn new(config: TlsConfig) -> Result<Self, RequestError> {
        let mut builder = SslConnector::builder(SslMethod::tls()).map_err(|e| {
            RequestError::new(NetError::SslProtocolError, format!("TLS context: {}", e))
                .with_source(e)
        })?;
        config.apply_to_builder(&mut builder)?;
        Ok(Self {
            connector: builder.build(),
            config,
        })
    }

    pub fn config(&self) -> &TlsConfig {
        &self.config
    }
}

#[async_trait]
impl TlsUpgrader for BoringTlsUpgrader {
    async fn upgrade(
        &self,
        socket: BoxedSocket,
        verify_hostname: &str,
    ) -> Result<BoxedSocket, RequestError> {
        let host = verify_hostname.trim_start_matches('[').trim_end_matches(']');
        let mut config = self.connector.configure().map_err(|e| {
            RequestError::new(NetError::SslProtocolError, format!("TLS session: {}", e))
                .with_source(e)
        })?;
        config.set_use_server_name_indication(TlsConfig::should_set_sni(host));
        config.set_verify_hostname(!self.config.danger_accept_invalid_certs);

        debug!(host, via = socket.kind(), "TLS handshake");
        let stream = tokio_boring::connect(config, host, socket)
            .await
            .map_err(|e| {
                RequestError::new(
                    NetError::SslProtocolError,
                    format!("TLS handshake with {} failed: {}", host, e),
                )
            })?;
        Ok(BoxedSocket::new(stream))
    }
}
