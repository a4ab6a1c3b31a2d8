//! Per-request send options.

use crate::base::neterror::RequestError;
use crate::http::auth::{AuthConfig, AuthScheme, Credentials};
use crate::http::framing::StreamingPolicy;
use crate::http::redirect::DEFAULT_MAX_REDIRECTS;
use crate::socket::proxy::ProxyConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// How one request is sent.
#[derive(Debug, Clone)]
pub struct Options {
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub streaming_policy: StreamingPolicy,
    /// Origin server authentication.
    pub auth: Option<AuthConfig>,
    /// Forward proxy. Takes precedence over the client's default proxy.
    pub proxy: Option<ProxyConfig>,
    /// Budget for the whole operation, every hop and retry included.
    pub timeout: Option<Duration>,
    /// Percent-encode query pairs, or emit them as recorded.
    pub encode_query: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            follow_redirects: true,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            streaming_policy: StreamingPolicy::Auto,
            auth: None,
            proxy: None,
            timeout: Some(DEFAULT_TIMEOUT),
            encode_query: true,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    pub fn with_max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = max;
        self
    }

    pub fn with_streaming_policy(mut self, policy: StreamingPolicy) -> Self {
        self.streaming_policy = policy;
        self
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// `None` disables the deadline.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_encode_query(mut self, encode: bool) -> Self {
        self.encode_query = encode;
        self
    }
}

/// Serializable form of [`Options`] for embedding frameworks that keep
/// their settings in JSON.
///
/// ```json
/// { "follow_redirects": true, "timeout_ms": 5000,
///   "auth": { "scheme": "digest", "username": "u", "password": "p" },
///   "proxy": "http://proxy.corp:3128" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionsConfig {
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub streaming_policy: StreamingPolicy,
    pub timeout_ms: Option<u64>,
    pub encode_query: bool,
    pub auth: Option<AuthSettings>,
    pub proxy: Option<String>,
    pub no_proxy: Option<String>,
}

/// Auth section of [`OptionsConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    pub scheme: AuthScheme,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub preemptive: bool,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Options::default().into()
    }
}

impl From<Options> for OptionsConfig {
    fn from(options: Options) -> Self {
        Self {
            follow_redirects: options.follow_redirects,
            max_redirects: options.max_redirects,
            streaming_policy: options.streaming_policy,
            timeout_ms: options.timeout.map(|t| t.as_millis() as u64),
            encode_query: options.encode_query,
            auth: options.auth.map(|auth| AuthSettings {
                scheme: auth.scheme,
                username: auth.credentials.as_ref().map(|c| c.username().to_string()),
                password: None,
                domain: auth
                    .credentials
                    .as_ref()
                    .and_then(|c| c.domain().map(str::to_string)),
                preemptive: auth.preemptive,
            }),
            proxy: options.proxy.map(|p| p.url().to_string()),
            no_proxy: None,
        }
    }
}

impl TryFrom<OptionsConfig> for Options {
    type Error = RequestError;

    fn try_from(config: OptionsConfig) -> Result<Self, Self::Error> {
        let auth = config.auth.map(|settings| {
            let mut auth = AuthConfig::new(settings.scheme).preemptive(settings.preemptive);
            if let Some(username) = settings.username {
                let mut creds = Credentials::new(username, settings.password.unwrap_or_default());
                if let Some(domain) = settings.domain {
                    creds = creds.with_domain(domain);
                }
                auth = auth.with_credentials(creds);
            }
            auth
        });
        let proxy = match config.proxy {
            Some(url) => {
                let proxy = ProxyConfig::new(&url)?;
                Some(match config.no_proxy {
                    Some(rules) => proxy.with_bypass(&rules),
                    None => proxy,
                })
            }
            None => None,
        };
        Ok(Self {
            follow_redirects: config.follow_redirects,
            max_redirects: config.max_redirects,
            streaming_policy: config.streaming_policy,
            auth,
            proxy,
            timeout: config.timeout_ms.map(Duration::from_millis),
            encode_query: config.encode_query,
        })
    }
}
