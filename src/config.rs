//! Configuration management for lockstep.
//!
//! Configuration can be set via environment variables:
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `5000`.
//! - `GENERATED_DIR` - Optional. Root folder holding one subfolder per session. Defaults to `generated`.
//! - `REQUIRE_NONEMPTY_PLAN` - Optional. Refuse to remove the last task of a plan. Defaults to `false`.

use std::path::PathBuf;
use thiserror::Error;

use crate::session::SessionPolicy;
use crate::util::env_var_bool;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Folder where session documents and generated code are kept
    pub generated_dir: PathBuf,

    pub require_nonempty_plan: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if `PORT` is not a valid port number.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = parse_port(&std::env::var("PORT").unwrap_or_else(|_| "5000".to_string()))?;

        let generated_dir = std::env::var("GENERATED_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("generated"));
        if generated_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue(
                "GENERATED_DIR".to_string(),
                "must not be empty".to_string(),
            ));
        }

        Ok(Self {
            host,
            port,
            generated_dir,
            require_nonempty_plan: env_var_bool("REQUIRE_NONEMPTY_PLAN", false),
        })
    }

    /// Create a config rooted at `generated_dir` (useful for testing).
    pub fn new(generated_dir: PathBuf) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            generated_dir,
            require_nonempty_plan: false,
        }
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            require_nonempty_plan: self.require_nonempty_plan,
        }
    }
}

fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))
}
