//! Facilitator server configuration.
//!
//! Loaded from a TOML file with `$VAR` / `${VAR}` environment expansion
//! in string values, so secrets stay out of the file itself:
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 4021
//! nonce_db = "/var/lib/tollgate/nonces.db"
//!
//! [chains.base]
//! rpc_url = "https://mainnet.base.org"
//! signer_private_key = "$SIGNER_KEY_BASE"
//! ```
//!
//! `CONFIG` selects the file path (default `config.toml`); `HOST` and
//! `PORT` override the file values.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level facilitator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacilitatorConfig {
    /// Server bind address (default `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Server port (default `4021`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path of the SQLite nonce database (default `nonces.db`).
    #[serde(default = "default_nonce_db")]
    pub nonce_db: PathBuf,

    /// How long consumed nonce records are retained, in seconds. Must
    /// comfortably exceed the longest authorization deadline window
    /// (default 7 days).
    #[serde(default = "default_nonce_retention_secs")]
    pub nonce_retention_secs: u64,

    /// Upper bound on waiting for settlement finality, in seconds
    /// (default 30).
    #[serde(default = "default_finality_timeout_secs")]
    pub finality_timeout_secs: u64,

    /// Re-run balance/allowance queries under the nonce reservation
    /// during settlement (default false).
    #[serde(default)]
    pub recheck_funds_on_settle: bool,

    /// Chain configurations keyed by network name (e.g. `base`).
    #[serde(default)]
    pub chains: HashMap<String, ChainConfig>,
}

/// Per-network chain configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// HTTP RPC endpoint URL.
    pub rpc_url: String,

    /// Facilitator signer private key (hex, `0x` prefix optional).
    /// Usually given as `$VAR` and expanded from the environment.
    pub signer_private_key: String,

    /// Explicit chain ID for networks outside the built-in registry.
    #[serde(default)]
    pub chain_id: Option<u64>,
}

fn default_host() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0))
}

fn default_port() -> u16 {
    4021
}

fn default_nonce_db() -> PathBuf {
    PathBuf::from("nonces.db")
}

fn default_nonce_retention_secs() -> u64 {
    7 * 24 * 3600
}

fn default_finality_timeout_secs() -> u64 {
    30
}

impl FacilitatorConfig {
    /// Loads configuration from the path in `CONFIG`, defaulting to
    /// `config.toml`. A missing file yields the built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = std::env::var("CONFIG").unwrap_or_else(|_| "config.toml".to_owned());
        Self::load_from(&path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = if Path::new(path).exists() {
            std::fs::read_to_string(path)?
        } else {
            String::new()
        };

        let expanded = expand_env_vars(&content);
        let mut config: Self = toml::from_str(&expanded)?;

        if let Ok(host) = std::env::var("HOST") {
            if let Ok(addr) = host.parse() {
                config.host = addr;
            }
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }

        Ok(config)
    }
}

/// Expands `$VAR` and `${VAR}` references from the process environment.
/// Unresolved references are left as written, which downstream key
/// parsing then reports instead of silently signing with a literal
/// `$VAR` string.
fn expand_env_vars(input: &str) -> String {
    expand_vars(input, |name| std::env::var(name).ok())
}

fn expand_vars(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }
        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
        }

        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if braced {
                if c == '}' {
                    chars.next();
                    break;
                }
            } else if !c.is_ascii_alphanumeric() && c != '_' {
                break;
            }
            name.push(c);
            chars.next();
        }

        if !name.is_empty() {
            if let Some(value) = lookup(&name) {
                result.push_str(&value);
                continue;
            }
        }
        result.push('$');
        if braced {
            result.push('{');
        }
        result.push_str(&name);
        if braced {
            result.push('}');
        }
    }

    result
}
