//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP server.
    /// Env: `PORT` (binds `0.0.0.0:<PORT>`) or `HTTP_ADDR` (full address,
    /// takes precedence).
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./data.db`
    pub database_path: PathBuf,

    /// Directory holding uploaded blobs.
    /// Env: `UPLOAD_DIR`
    /// Default: `./uploads`
    pub upload_dir: PathBuf,

    /// Base URL used when building share links, e.g. `https://files.example`.
    /// When unset the link is built from the request's `Host` header.
    /// Env: `PUBLIC_URL`
    pub public_url: Option<String>,

    /// Maximum accepted request body for uploads, in bytes.
    /// Env: `MAX_UPLOAD_BYTES`
    /// Default: unset (no limit).
    pub max_upload_bytes: Option<usize>,

    /// Title shown in every page header.
    /// Env: `INSTANCE_NAME`
    /// Default: `"ShareBox"`
    pub instance_name: String,
}

const DEFAULT_PORT: u16 = 3000;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_PORT).into(),
            database_path: PathBuf::from("./data.db"),
            upload_dir: PathBuf::from("./uploads"),
            public_url: None,
            max_upload_bytes: None,
            instance_name: "ShareBox".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(port) = lookup("PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => config.http_addr.set_port(port),
                Err(_) => tracing::warn!(value = %port, "Invalid PORT, using default"),
            }
        }

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(path);
        }

        if let Some(url) = lookup("PUBLIC_URL") {
            let url = url.trim().trim_end_matches('/');
            if !url.is_empty() {
                config.public_url = Some(url.to_string());
            }
        }

        if let Some(val) = lookup("MAX_UPLOAD_BYTES") {
            match val.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.max_upload_bytes = Some(n),
                _ => tracing::warn!(value = %val, "Invalid MAX_UPLOAD_BYTES, upload size stays unlimited"),
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            if !name.trim().is_empty() {
                config.instance_name = name;
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = config_with(&[]);
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 3000).into());
        assert_eq!(config.upload_dir, PathBuf::from("./uploads"));
        assert!(config.public_url.is_none());
        assert!(config.max_upload_bytes.is_none());
    }

    #[test]
    fn test_port_override() {
        let config = config_with(&[("PORT", "8081")]);
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8081).into());
    }

    #[test]
    fn test_invalid_port_keeps_default() {
        let config = config_with(&[("PORT", "eighty")]);
        assert_eq!(config.http_addr.port(), 3000);
    }

    #[test]
    fn test_http_addr_wins_over_port() {
        let config = config_with(&[("PORT", "8081"), ("HTTP_ADDR", "127.0.0.1:9000")]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
    }

    #[test]
    fn test_public_url_trailing_slash_trimmed() {
        let config = config_with(&[("PUBLIC_URL", "https://files.example/")]);
        assert_eq!(config.public_url.as_deref(), Some("https://files.example"));
    }

    #[test]
    fn test_zero_upload_limit_ignored() {
        let config = config_with(&[("MAX_UPLOAD_BYTES", "0")]);
        assert!(config.max_upload_bytes.is_none());

        let config = config_with(&[("MAX_UPLOAD_BYTES", "1048576")]);
        assert_eq!(config.max_upload_bytes, Some(1024 * 1024));
    }
}
