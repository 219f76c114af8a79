//! Configuration validation.
//!
//! Each configuration type implements [`Validate`], pushing one [`FieldError`] per
//! problem so a broken file reports everything wrong with it in one pass.

use std::collections::HashSet;

use url::Url;

use crate::types::{
    Config, DEFAULT_PORT, DEFAULT_TLS_PORT, LocationConfig, OidcConfig, ServerConfig,
    SessionConfig, UrlConfig,
};

/// Minimum length of a cookie codec key.
pub const MIN_CODEC_KEY_LEN: usize = 16;

/// A single validation failure, addressed by dotted field path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    /// A required field is missing or empty.
    #[error("missing required field '{field}': {hint}")]
    MissingField {
        /// Path of the field, e.g. `servers[0].oidc.client_id`.
        field: String,
        /// Hint for how to fix the issue.
        hint: &'static str,
    },

    /// A field has an invalid value.
    #[error("invalid value for '{field}': {message}")]
    InvalidField {
        /// Path of the field.
        field: String,
        /// Description of what's wrong.
        message: String,
    },
}

impl FieldError {
    /// Create a missing field error.
    pub fn missing_field(field: impl Into<String>, hint: &'static str) -> Self {
        Self::MissingField {
            field: field.into(),
            hint,
        }
    }

    /// Create an invalid field error.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Get the field path this error refers to.
    pub fn field_name(&self) -> &str {
        match self {
            Self::MissingField { field, .. } => field,
            Self::InvalidField { field, .. } => field,
        }
    }
}

/// Statically typed validation.
pub trait Validate {
    /// Push every problem found under `prefix` into `errors`.
    fn validate_into(&self, prefix: &str, errors: &mut Vec<FieldError>);

    /// Validate from the document root.
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        self.validate_into("", &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn join(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", prefix, field)
    }
}

fn check_absolute_url(field: String, value: &str, errors: &mut Vec<FieldError>) {
    match Url::parse(value) {
        Ok(url) if url.host_str().is_some() => {}
        Ok(_) => errors.push(FieldError::invalid_field(field, "URL has no host")),
        Err(e) => errors.push(FieldError::invalid_field(
            field,
            format!("'{}' is not an absolute URL: {}", value, e),
        )),
    }
}

fn check_path(field: String, value: &str, errors: &mut Vec<FieldError>) {
    if !value.starts_with('/') {
        errors.push(FieldError::invalid_field(
            field,
            format!("'{}' must start with '/'", value),
        ));
    }
}

impl Validate for Config {
    fn validate_into(&self, prefix: &str, errors: &mut Vec<FieldError>) {
        if self.port == 0 {
            errors.push(FieldError::invalid_field(
                join(prefix, "port"),
                "must be non-zero",
            ));
        }

        if self.ssl_certificate.is_some() != self.ssl_certificate_key.is_some() {
            errors.push(FieldError::invalid_field(
                join(prefix, "ssl_certificate_key"),
                "ssl_certificate and ssl_certificate_key must be set together",
            ));
        }

        if self.servers.is_empty() {
            errors.push(FieldError::missing_field(
                join(prefix, "servers"),
                "add at least one virtual host under 'servers'",
            ));
        }

        let default_port = if self.tls_paths().is_some() {
            DEFAULT_TLS_PORT
        } else {
            DEFAULT_PORT
        };
        let mut keys = HashSet::new();
        for (i, server) in self.servers.iter().enumerate() {
            let field = join(prefix, &format!("servers[{}]", i));
            server.validate_into(&field, errors);
            if !server.server_name.is_empty() && !keys.insert(server.host_key(default_port)) {
                errors.push(FieldError::invalid_field(
                    join(&field, "server_name"),
                    format!(
                        "duplicate virtual host '{}'",
                        server.host_key(default_port)
                    ),
                ));
            }
        }
    }
}

impl Validate for ServerConfig {
    fn validate_into(&self, prefix: &str, errors: &mut Vec<FieldError>) {
        if self.server_name.trim().is_empty() {
            errors.push(FieldError::missing_field(
                join(prefix, "server_name"),
                "set the host name clients use to reach this server",
            ));
        }
        if self.cookie_name.trim().is_empty() {
            errors.push(FieldError::missing_field(
                join(prefix, "cookie_name"),
                "set a cookie name or remove the key to use 'session'",
            ));
        }

        let reserved = [
            ("login", &self.login),
            ("callback", &self.callback),
            ("logout", &self.logout),
        ];
        for (name, path) in reserved {
            check_path(join(prefix, name), path, errors);
        }

        self.oidc.validate_into(&join(prefix, "oidc"), errors);
        self.session.validate_into(&join(prefix, "session"), errors);

        if self.locations.is_empty() {
            errors.push(FieldError::missing_field(
                join(prefix, "locations"),
                "add at least one location with proxy_pass and urls",
            ));
        }

        let mut seen = HashSet::new();
        for (i, location) in self.locations.iter().enumerate() {
            let field = join(prefix, &format!("locations[{}]", i));
            location.validate_into(&field, errors);
            for (j, url) in location.urls.iter().enumerate() {
                let url_field = join(&field, &format!("urls[{}].path", j));
                if reserved.iter().any(|(_, p)| **p == url.path) {
                    errors.push(FieldError::invalid_field(
                        url_field,
                        format!("'{}' is already used by login/callback/logout", url.path),
                    ));
                } else if !url.path.is_empty() && !seen.insert(url.path.clone()) {
                    errors.push(FieldError::invalid_field(
                        url_field,
                        format!("duplicate path '{}'", url.path),
                    ));
                }
            }
        }
    }
}

impl Validate for OidcConfig {
    fn validate_into(&self, prefix: &str, errors: &mut Vec<FieldError>) {
        if self.provider.is_empty() {
            errors.push(FieldError::missing_field(
                join(prefix, "provider"),
                "set the issuer URL of the identity provider",
            ));
        } else {
            check_absolute_url(join(prefix, "provider"), &self.provider, errors);
        }
        if self.client_id.is_empty() {
            errors.push(FieldError::missing_field(
                join(prefix, "client_id"),
                "set the client id registered with the provider",
            ));
        }
        if self.client_secret.is_empty() {
            errors.push(FieldError::missing_field(
                join(prefix, "client_secret"),
                "set the client secret (use ${ENV_VAR} to keep it out of the file)",
            ));
        }
        if self.redirect_url.is_empty() {
            errors.push(FieldError::missing_field(
                join(prefix, "redirect_url"),
                "set the absolute callback URL registered with the provider",
            ));
        } else {
            check_absolute_url(join(prefix, "redirect_url"), &self.redirect_url, errors);
        }
        if !self.scopes.iter().any(|s| s == "openid") {
            errors.push(FieldError::invalid_field(
                join(prefix, "scopes"),
                "must include 'openid'",
            ));
        }
        if !self.logout.is_empty() && !self.logout.starts_with('/') {
            check_absolute_url(join(prefix, "logout"), &self.logout, errors);
        }
    }
}

impl Validate for SessionConfig {
    fn validate_into(&self, prefix: &str, errors: &mut Vec<FieldError>) {
        if self.codecs.is_empty() {
            errors.push(FieldError::missing_field(
                join(prefix, "codecs"),
                "add at least one cookie signing key",
            ));
        }
        for (i, codec) in self.codecs.iter().enumerate() {
            if codec.len() < MIN_CODEC_KEY_LEN {
                errors.push(FieldError::invalid_field(
                    join(prefix, &format!("codecs[{}]", i)),
                    format!("must be at least {} bytes", MIN_CODEC_KEY_LEN),
                ));
            }
        }
        if self.plugin && self.name.trim().is_empty() {
            errors.push(FieldError::missing_field(
                join(prefix, "name"),
                "name the plugin executable inside plugin_dir",
            ));
        }
        if let Some(ttl) = self.args.get("ttl")
            && !ttl.as_u64().is_some_and(|t| t > 0)
        {
            errors.push(FieldError::invalid_field(
                join(prefix, "args.ttl"),
                "must be a positive number of minutes",
            ));
        }
    }
}

impl Validate for LocationConfig {
    fn validate_into(&self, prefix: &str, errors: &mut Vec<FieldError>) {
        if self.proxy_pass.is_empty() {
            errors.push(FieldError::missing_field(
                join(prefix, "proxy_pass"),
                "set one or more upstream URLs, comma separated",
            ));
        }
        for (i, upstream) in self.proxy_pass.urls().iter().enumerate() {
            let field = join(prefix, &format!("proxy_pass[{}]", i));
            match Url::parse(upstream) {
                Ok(url) if url.host_str().is_none() => {
                    errors.push(FieldError::invalid_field(field, "upstream URL has no host"))
                }
                Ok(url) if !matches!(url.scheme(), "http" | "https") => {
                    errors.push(FieldError::invalid_field(
                        field,
                        format!("unsupported scheme '{}'", url.scheme()),
                    ))
                }
                Ok(_) => {}
                Err(e) => errors.push(FieldError::invalid_field(
                    field,
                    format!("'{}' is not a URL: {}", upstream, e),
                )),
            }
        }
        if self.urls.is_empty() {
            errors.push(FieldError::missing_field(
                join(prefix, "urls"),
                "add at least one path served by this location",
            ));
        }
        for (i, url) in self.urls.iter().enumerate() {
            url.validate_into(&join(prefix, &format!("urls[{}]", i)), errors);
        }
    }
}

impl Validate for UrlConfig {
    fn validate_into(&self, prefix: &str, errors: &mut Vec<FieldError>) {
        if self.path.is_empty() {
            errors.push(FieldError::missing_field(
                join(prefix, "path"),
                "set the request path, ending in '/' for a prefix match",
            ));
        } else {
            check_path(join(prefix, "path"), &self.path, errors);
        }
        if self.token.is_empty() {
            errors.push(FieldError::missing_field(
                join(prefix, "token"),
                "name the session token to forward, e.g. id_token",
            ));
        }
        if self.token_type.is_empty() || self.token_type.contains(char::is_whitespace) {
            errors.push(FieldError::invalid_field(
                join(prefix, "type"),
                "must be a single word such as Bearer",
            ));
        }
    }
}
