//! Runtime configuration for clients and servers.
//!
//! Values come from the environment so that wire debugging can be switched
//! on for a subprocess without recompiling:
//!
//! - `JSONRPC_DEBUG` - echo every outgoing and incoming payload
//! - `JSONRPC_MAX_MESSAGE_SIZE` - largest accepted frame body, in bytes

/// Default maximum frame body (100MB) to prevent OOM from malicious/buggy peers.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Environment toggle for the wire echo.
pub const DEBUG_ENV: &str = "JSONRPC_DEBUG";

/// Environment override for [`Config::max_message_size`].
pub const MAX_MESSAGE_SIZE_ENV: &str = "JSONRPC_MAX_MESSAGE_SIZE";

/// Settings shared by the input and output streams of a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Frames declaring a larger `Content-Length` are rejected.
    pub max_message_size: usize,
    /// Echo payloads under the `jsonrpc_conduit::wire` tracing target.
    pub echo_wire: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            echo_wire: false,
        }
    }
}

impl Config {
    /// Build a configuration from the process environment.
    ///
    /// Unset or unparsable variables fall back to [`Config::default`].
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(value) = lookup(DEBUG_ENV) {
            let value = value.trim();
            config.echo_wire = !value.is_empty() && value != "0";
        }

        if let Some(value) = lookup(MAX_MESSAGE_SIZE_ENV) {
            match value.trim().parse::<usize>() {
                Ok(size) if size > 0 => config.max_message_size = size,
                _ => tracing::warn!(
                    "Ignoring invalid {}={:?}",
                    MAX_MESSAGE_SIZE_ENV,
                    value
                ),
            }
        }

        config
    }

    /// Set the maximum accepted frame body size.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Enable or disable the wire echo.
    pub fn with_echo_wire(mut self, echo: bool) -> Self {
        self.echo_wire = echo;
        self
    }
}
