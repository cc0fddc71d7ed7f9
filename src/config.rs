//! Client configuration.
//!
//! Plain data; there is no configuration file. Unset keys fall back to
//! the `KRPC_*` environment, then to the protocol defaults, in that
//! order. The environment is consulted only for keys left unset.

use std::env;
use std::time::Duration;

use log::*;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_RPC_PORT: u16 = 50000;
pub const DEFAULT_STREAM_PORT: u16 = 50001;
pub const DEFAULT_CLIENT_NAME: &str = "krpc-client";

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// kRPC server host. Empty = unset.
    pub host: String,
    /// RPC connection port. 0 = unset.
    pub rpc_port: u16,
    /// Streams connection port. 0 = unset.
    pub stream_port: u16,
    /// Name sent to the server in the handshake. Empty = unset.
    pub client_name: String,
    /// Skip the streams connection entirely.
    pub rpc_only: bool,
    pub timeout: TimeoutSetting,
}

#[derive(Clone, Copy, Debug)]
pub struct TimeoutSetting {
    /// Socket dial timeout.
    pub connect_timeout: Duration,
    /// Socket read timeout for RPC responses. Zero disables it; streams
    /// block indefinitely regardless, their cadence is the server tick.
    pub read_timeout: Duration,
    /// Socket write timeout. Zero disables it.
    pub write_timeout: Duration,
}

impl Default for TimeoutSetting {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(0),
            write_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            rpc_port: 0,
            stream_port: 0,
            client_name: String::new(),
            rpc_only: false,
            timeout: TimeoutSetting::default(),
        }
    }
}

impl ClientConfig {
    /// Fill every unset key from the environment, then from the defaults.
    pub fn set_defaults(&mut self) {
        if self.host.is_empty() {
            self.host = env_or("KRPC_HOST", DEFAULT_HOST);
        }
        if self.rpc_port == 0 {
            self.rpc_port = env_port_or("KRPC_PORT", DEFAULT_RPC_PORT);
        }
        if self.stream_port == 0 {
            self.stream_port = env_port_or("KRPC_STREAM_PORT", DEFAULT_STREAM_PORT);
        }
        if self.client_name.is_empty() {
            self.client_name = env_or("KRPC_CLIENTNAME", DEFAULT_CLIENT_NAME);
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn env_port_or(key: &str, default: u16) -> u16 {
    match env::var(key) {
        Ok(v) if !v.is_empty() => match v.parse::<u16>() {
            Ok(port) => port,
            Err(_) => {
                warn!("ignoring {}={:?}: not a port number", key, v);
                default
            }
        },
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_env_fallback() {
        // one test body: the env map is process-global
        env::remove_var("KRPC_HOST");
        env::remove_var("KRPC_PORT");
        env::remove_var("KRPC_STREAM_PORT");
        env::remove_var("KRPC_CLIENTNAME");

        let mut config = ClientConfig::default();
        config.set_defaults();
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.rpc_port, DEFAULT_RPC_PORT);
        assert_eq!(config.stream_port, DEFAULT_STREAM_PORT);
        assert_eq!(config.client_name, DEFAULT_CLIENT_NAME);

        env::set_var("KRPC_HOST", "kerbin.local");
        env::set_var("KRPC_PORT", "51000");
        env::set_var("KRPC_STREAM_PORT", "not-a-port");
        let mut config = ClientConfig::default();
        config.set_defaults();
        assert_eq!(config.host, "kerbin.local");
        assert_eq!(config.rpc_port, 51000);
        // unparsable env value falls back to the protocol default
        assert_eq!(config.stream_port, DEFAULT_STREAM_PORT);

        // explicitly set keys never consult the environment
        let mut config = ClientConfig { host: "10.0.0.9".to_string(), ..Default::default() };
        config.rpc_port = 60000;
        config.set_defaults();
        assert_eq!(config.host, "10.0.0.9");
        assert_eq!(config.rpc_port, 60000);

        env::remove_var("KRPC_HOST");
        env::remove_var("KRPC_PORT");
        env::remove_var("KRPC_STREAM_PORT");
    }
}
