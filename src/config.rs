//! Server configuration resolution.
//!
//! Precedence, highest first: CLI flag, `JOB_WORKER_*` environment
//! variable, `config.toml` file, built-in default. Mirrors the
//! resolution chain the core job storage previously used for its jobs
//! root, applied here to listen address and TLS material instead.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8888";

/// On-disk configuration file shape. Every field is optional; absent
/// fields fall through to the environment, then the default.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    listen_addr: Option<String>,
    server_cert: Option<PathBuf>,
    server_key: Option<PathBuf>,
    client_cert: Option<PathBuf>,
    client_key: Option<PathBuf>,
    ca_cert: Option<PathBuf>,
}

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub ca_cert: PathBuf,
}

/// CLI overrides accepted by the server binary; `None` fields fall
/// through to the environment/file/default chain.
#[derive(Debug, Default)]
pub struct ServerOverrides {
    pub config_file: Option<PathBuf>,
    pub listen_addr: Option<String>,
    pub server_cert: Option<PathBuf>,
    pub server_key: Option<PathBuf>,
    pub ca_cert: Option<PathBuf>,
}

impl ServerConfig {
    /// Resolve configuration from CLI overrides, environment, an
    /// optional config file, and built-in defaults, in that order.
    pub fn resolve(overrides: ServerOverrides) -> anyhow::Result<Self> {
        let file = load_file_config(overrides.config_file.as_deref())?;

        let listen_addr = overrides
            .listen_addr
            .or_else(|| std::env::var("JOB_WORKER_LISTEN_ADDR").ok())
            .or(file.listen_addr)
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid listen address: {e}"))?;

        let server_cert = resolve_path(
            overrides.server_cert,
            "JOB_WORKER_SERVER_CERT",
            file.server_cert,
            "certs/server.pem",
        );
        let server_key = resolve_path(
            overrides.server_key,
            "JOB_WORKER_SERVER_KEY",
            file.server_key,
            "certs/server.key",
        );
        let ca_cert = resolve_path(
            overrides.ca_cert,
            "JOB_WORKER_CA_CERT",
            file.ca_cert,
            "certs/ca.pem",
        );

        Ok(ServerConfig {
            listen_addr,
            server_cert,
            server_key,
            ca_cert,
        })
    }
}

/// Resolved client configuration (used by the CLI binary).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
    pub ca_cert: PathBuf,
}

#[derive(Debug, Default)]
pub struct ClientOverrides {
    pub config_file: Option<PathBuf>,
    pub server_addr: Option<String>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub ca_cert: Option<PathBuf>,
}

impl ClientConfig {
    pub fn resolve(overrides: ClientOverrides) -> anyhow::Result<Self> {
        let file = load_file_config(overrides.config_file.as_deref())?;

        let server_addr = overrides
            .server_addr
            .or_else(|| std::env::var("JOB_WORKER_SERVER_ADDR").ok())
            .unwrap_or_else(|| "https://127.0.0.1:8888".to_string());

        let client_cert = resolve_path(
            overrides.client_cert,
            "JOB_WORKER_CLIENT_CERT",
            file.client_cert,
            "certs/client.pem",
        );
        let client_key = resolve_path(
            overrides.client_key,
            "JOB_WORKER_CLIENT_KEY",
            file.client_key,
            "certs/client.key",
        );
        let ca_cert = resolve_path(
            overrides.ca_cert,
            "JOB_WORKER_CA_CERT",
            file.ca_cert,
            "certs/ca.pem",
        );

        Ok(ClientConfig {
            server_addr,
            client_cert,
            client_key,
            ca_cert,
        })
    }
}

fn resolve_path(
    cli: Option<PathBuf>,
    env_var: &str,
    file_value: Option<PathBuf>,
    default: &str,
) -> PathBuf {
    cli.or_else(|| std::env::var(env_var).ok().map(PathBuf::from))
        .or(file_value)
        .unwrap_or_else(|| PathBuf::from(default))
}

fn load_file_config(explicit_path: Option<&std::path::Path>) -> anyhow::Result<FileConfig> {
    let path = match explicit_path {
        Some(p) => p.to_path_buf(),
        None => PathBuf::from("config.toml"),
    };

    if !path.exists() {
        return Ok(FileConfig::default());
    }

    let raw = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_defaults_when_nothing_set() {
        // SAFETY: test-only, serialized by cargo's single-threaded test
        // default for this module; avoids interference from other env
        // var tests by clearing first.
        unsafe {
            std::env::remove_var("JOB_WORKER_LISTEN_ADDR");
        }
        let cfg = ServerConfig::resolve(ServerOverrides {
            config_file: Some(PathBuf::from("/nonexistent/config.toml")),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(cfg.listen_addr, DEFAULT_LISTEN_ADDR.parse().unwrap());
        assert_eq!(cfg.server_cert, PathBuf::from("certs/server.pem"));
    }

    #[test]
    fn cli_override_wins_over_env() {
        // SAFETY: test-only.
        unsafe {
            std::env::set_var("JOB_WORKER_LISTEN_ADDR", "127.0.0.1:1");
        }
        let cfg = ServerConfig::resolve(ServerOverrides {
            config_file: Some(PathBuf::from("/nonexistent/config.toml")),
            listen_addr: Some("127.0.0.1:9999".to_string()),
            ..Default::default()
        })
        .unwrap();
        unsafe {
            std::env::remove_var("JOB_WORKER_LISTEN_ADDR");
        }
        assert_eq!(cfg.listen_addr, "127.0.0.1:9999".parse().unwrap());
    }
}
