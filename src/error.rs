use std::time::Duration;

use thiserror::Error;

/// Deployment phase a failure was observed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Validating,
    Provisioning,
    Starting,
    Bootstrapping,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Provisioning => "provisioning",
            Self::Starting => "starting",
            Self::Bootstrapping => "bootstrapping",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("token lookup collision")]
    TokenLookupCollision,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("invalid token format")]
    InvalidTokenFormat,

    #[error("token expired")]
    TokenExpired,

    #[error("invalid site specification: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("provisioning failed: {0}")]
    Provisioning(String),

    #[error("deployment of site {site_id} failed while {phase}: {message}")]
    Deployment {
        site_id: i64,
        phase: Phase,
        message: String,
    },

    #[error("{step} failed: {message}")]
    Lifecycle { step: String, message: String },

    #[error("`{command}` exceeded its {}s budget", .timeout.as_secs())]
    RuntimeTimeout { command: String, timeout: Duration },

    #[error("`{command}` exited with {exit_code}: {output}")]
    Runtime {
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("invalid permission: {0}")]
    InvalidPermission(String),
}

impl Error {
    /// True for errors caused by the caller's input rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Conflict(_) | Self::InvalidPermission(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
