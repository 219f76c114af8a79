//! The example document written by `gatekeep config`.

use crate::types::{
    Config, HostLogging, LocationConfig, OidcConfig, ProxyPass, ServerConfig, SessionConfig,
    SslVerify, UrlConfig,
};

impl Config {
    /// A complete, valid configuration showing every section.
    pub fn example() -> Self {
        let mut args = serde_json::Map::new();
        args.insert("ttl".to_string(), serde_json::Value::from(90));

        Config {
            port: 8080,
            servers: vec![ServerConfig {
                server_name: "localhost".to_string(),
                port: Some(8080),
                logging: HostLogging {
                    level: Some("info".to_string()),
                    dump: false,
                },
                oidc: OidcConfig {
                    provider: "https://idp.example.com/".to_string(),
                    client_id: "gatekeep".to_string(),
                    client_secret: "${GATEKEEP_CLIENT_SECRET}".to_string(),
                    redirect_url: "http://localhost:8080/oauth2/callback".to_string(),
                    logout: "https://idp.example.com/v2/logout".to_string(),
                    audiences: vec!["https://api.example.com".to_string()],
                    ..Default::default()
                },
                session: SessionConfig {
                    codecs: vec!["change-me-to-a-long-random-string".to_string()],
                    args,
                    ..Default::default()
                },
                locations: vec![LocationConfig {
                    proxy_pass: ProxyPass::from("http://127.0.0.1:3000, http://127.0.0.1:3001"),
                    proxy_ssl_verify: SslVerify(true),
                    urls: vec![
                        UrlConfig {
                            path: "/".to_string(),
                            ..Default::default()
                        },
                        UrlConfig {
                            path: "/api/".to_string(),
                            token: "access_token".to_string(),
                            ..Default::default()
                        },
                    ],
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::loader::{Format, parse_config};
    use crate::types::Config;
    use crate::validation::Validate;

    #[test]
    fn test_example_is_valid() {
        assert!(Config::example().validate().is_ok());
    }

    #[test]
    fn test_example_survives_every_format() {
        let example = Config::example();
        for format in [Format::Yaml, Format::Toml, Format::Json] {
            let text = example.to_string_as(format).unwrap();
            // The client secret placeholder expands to empty on re-read.
            let mut parsed = parse_config(&text, format).unwrap();
            parsed.servers[0].oidc.client_secret = example.servers[0].oidc.client_secret.clone();
            assert_eq!(parsed, example, "format {:?}", format);
        }
    }
}
