use serde::{Deserialize, Serialize};

/// Settings of one `http` service entry in `config.application.services`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HttpServiceConfig {
    pub host: String,
    /// `0` binds an ephemeral port.
    pub port: u16,
    /// Route tree directory under the app root; defaults to the service name.
    pub routes: Option<String>,
    /// Directory served for URLs no route matches, relative to the app root.
    pub static_dir: String,
    /// PEM key and certificate, relative to the app root. Both must be set for TLS.
    pub key: Option<String>,
    pub cert: Option<String>,
    pub body_limit_bytes: usize,
    pub request_timeout_sec: u64,
}

impl Default for HttpServiceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            routes: None,
            static_dir: "static".to_string(),
            key: None,
            cert: None,
            body_limit_bytes: 2 * 1024 * 1024,
            request_timeout_sec: 30,
        }
    }
}

impl HttpServiceConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn routes_dir<'a>(&'a self, service_name: &'a str) -> &'a str {
        self.routes.as_deref().unwrap_or(service_name)
    }

    pub fn tls_files(&self) -> Option<(&str, &str)> {
        Some((self.key.as_deref()?, self.cert.as_deref()?))
    }
}
