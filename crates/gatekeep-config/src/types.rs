//! Configuration types.
//!
//! Every struct uses `#[serde(default)]` so a document only has to name what it changes.
//! Required fields default to empty values and are caught by [`crate::Validate`].

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Default listener port.
pub const DEFAULT_PORT: u16 = 80;

/// Default port used in router keys for TLS listeners.
pub const DEFAULT_TLS_PORT: u16 = 443;

/// Default session cookie name.
pub const DEFAULT_COOKIE_NAME: &str = "session";

/// Default login path.
pub const DEFAULT_LOGIN_PATH: &str = "/oauth2/login";

/// Default callback path.
pub const DEFAULT_CALLBACK_PATH: &str = "/oauth2/callback";

/// Default logout path.
pub const DEFAULT_LOGOUT_PATH: &str = "/oauth2/logout";

/// Default OIDC scopes.
pub const DEFAULT_SCOPES: &[&str] = &["email", "openid", "offline_access", "profile"];

/// Default session key forwarded upstream.
pub const DEFAULT_TOKEN_KEY: &str = "id_token";

/// Default Authorization scheme.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Default session backend name.
pub const DEFAULT_SESSION_BACKEND: &str = "memory";

/// Default directory holding session plugin executables.
pub const DEFAULT_PLUGIN_DIR: &str = "./oidc-plugin";

// ─────────────────────────────────────────────────────────────────────────────
// Root
// ─────────────────────────────────────────────────────────────────────────────

/// Root gateway configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener port.
    pub port: u16,
    /// PEM certificate chain. TLS is enabled only when both files exist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_certificate: Option<PathBuf>,
    /// PEM private key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_certificate_key: Option<PathBuf>,
    /// Process-wide logging.
    pub logging: LoggingConfig,
    /// Virtual hosts.
    pub servers: Vec<ServerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            ssl_certificate: None,
            ssl_certificate_key: None,
            logging: LoggingConfig::default(),
            servers: Vec::new(),
        }
    }
}

impl Config {
    /// Address the listener binds to.
    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }

    /// Certificate and key paths, when both are configured.
    pub fn tls_paths(&self) -> Option<(&Path, &Path)> {
        match (&self.ssl_certificate, &self.ssl_certificate_key) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }

    /// Look up a virtual host by `server_name`.
    pub fn server(&self, server_name: &str) -> Option<&ServerConfig> {
        self.servers
            .iter()
            .find(|s| s.server_name.eq_ignore_ascii_case(server_name))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Standard,
    /// One JSON object per event.
    Json,
}

/// Process-wide logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level filter: trace, debug, info, warn or error.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Also write events to this file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Standard,
            filename: None,
        }
    }
}

/// Per-host logging settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostLogging {
    /// Level recorded on the host span and handed to plugin backends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Dump upstream requests and responses at debug level.
    pub dump: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Virtual host
// ─────────────────────────────────────────────────────────────────────────────

/// One virtual host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host name matched against the request's `Host` header.
    pub server_name: String,
    /// Port part of the router key. Defaults to the listener's scheme port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Session cookie name.
    pub cookie_name: String,
    /// Login path.
    pub login: String,
    /// OIDC callback path.
    pub callback: String,
    /// Logout path.
    pub logout: String,
    /// Redirect unauthenticated proxy requests to login instead of answering 401.
    pub redirect: bool,
    pub logging: HostLogging,
    pub oidc: OidcConfig,
    pub session: SessionConfig,
    pub locations: Vec<LocationConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: String::new(),
            port: None,
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            login: DEFAULT_LOGIN_PATH.to_string(),
            callback: DEFAULT_CALLBACK_PATH.to_string(),
            logout: DEFAULT_LOGOUT_PATH.to_string(),
            redirect: true,
            logging: HostLogging::default(),
            oidc: OidcConfig::default(),
            session: SessionConfig::default(),
            locations: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Router key for this host: lowercase `server_name:port`.
    pub fn host_key(&self, default_port: u16) -> String {
        format!(
            "{}:{}",
            self.server_name.to_ascii_lowercase(),
            self.port.unwrap_or(default_port)
        )
    }
}

/// OIDC client settings for one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcConfig {
    /// Issuer URL; discovery document lives under `/.well-known/openid-configuration`.
    #[serde(deserialize_with = "string_or_null")]
    pub provider: String,
    #[serde(deserialize_with = "string_or_null")]
    pub client_id: String,
    #[serde(deserialize_with = "string_or_null")]
    pub client_secret: String,
    /// Absolute callback URL registered with the provider.
    #[serde(deserialize_with = "string_or_null")]
    pub redirect_url: String,
    pub scopes: Vec<String>,
    /// Where logout sends the browser. Empty means `/`.
    #[serde(deserialize_with = "string_or_null")]
    pub logout: String,
    /// Extra `audience` parameters for authorize and token requests.
    pub audiences: Vec<String>,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            provider: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            redirect_url: String::new(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            logout: String::new(),
            audiences: Vec::new(),
        }
    }
}

/// A bare `key:` in YAML, e.g. an unset `${VAR}` placeholder, reads as empty.
fn string_or_null<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Session backend selection for one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Backend name; for plugins, the executable name inside `plugin_dir`.
    pub name: String,
    /// Run the backend out of process.
    pub plugin: bool,
    pub plugin_dir: PathBuf,
    /// Cookie signing keys. The first signs, any verifies.
    pub codecs: Vec<String>,
    /// Free-form settings handed to the backend's `init`.
    pub args: serde_json::Map<String, serde_json::Value>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_SESSION_BACKEND.to_string(),
            plugin: false,
            plugin_dir: PathBuf::from(DEFAULT_PLUGIN_DIR),
            codecs: Vec::new(),
            args: serde_json::Map::new(),
        }
    }
}

impl SessionConfig {
    /// Path of the plugin executable.
    pub fn plugin_path(&self) -> PathBuf {
        let name = if self.name.is_empty() {
            DEFAULT_SESSION_BACKEND
        } else {
            &self.name
        };
        self.plugin_dir.join(name)
    }

    /// Codec keys as bytes.
    pub fn codec_keys(&self) -> Vec<Vec<u8>> {
        self.codecs.iter().map(|c| c.as_bytes().to_vec()).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Locations
// ─────────────────────────────────────────────────────────────────────────────

/// One proxied location: a set of upstreams serving a set of paths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub proxy_pass: ProxyPass,
    pub proxy_ssl_verify: SslVerify,
    pub urls: Vec<UrlConfig>,
}

/// A path pattern and the session token it forwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UrlConfig {
    /// Exact path, or a prefix when it ends with `/`.
    pub path: String,
    /// Session key whose value goes into the Authorization header.
    pub token: String,
    /// Authorization scheme.
    #[serde(rename = "type")]
    pub token_type: String,
}

impl Default for UrlConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            token: DEFAULT_TOKEN_KEY.to_string(),
            token_type: DEFAULT_TOKEN_TYPE.to_string(),
        }
    }
}

/// Upstream base URLs.
///
/// Accepts a single URL, a comma-separated string, or a list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyPass(pub Vec<String>);

impl ProxyPass {
    pub fn urls(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for ProxyPass {
    fn from(value: &str) -> Self {
        Self(
            value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

impl fmt::Display for ProxyPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(", "))
    }
}

impl Serialize for ProxyPass {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ProxyPass {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::One(s) => ProxyPass::from(s.as_str()),
            Raw::Many(list) => ProxyPass(
                list.iter()
                    .flat_map(|s| ProxyPass::from(s.as_str()).0)
                    .collect(),
            ),
        })
    }
}

/// Whether upstream TLS certificates are verified.
///
/// Accepts a bool or the strings `"on"` / `"off"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SslVerify(pub bool);

impl Default for SslVerify {
    fn default() -> Self {
        Self(true)
    }
}

impl SslVerify {
    pub fn enabled(self) -> bool {
        self.0
    }
}

impl Serialize for SslVerify {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bool(self.0)
    }
}

impl<'de> Deserialize<'de> for SslVerify {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(b) => Ok(SslVerify(b)),
            Raw::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "on" | "true" | "yes" => Ok(SslVerify(true)),
                "off" | "false" | "no" => Ok(SslVerify(false)),
                other => Err(serde::de::Error::custom(format!(
                    "proxy_ssl_verify must be on/off, got '{}'",
                    other
                ))),
            },
        }
    }
}
