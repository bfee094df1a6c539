//! Unified error handling for the nitro control daemons
//!
//! This crate provides a single error type used across all workspace
//! components. It uses thiserror for ergonomic error definitions with proper
//! Display and Error trait impls.

use std::io;
use std::path::PathBuf;

/// Result type alias using NitroError
pub type Result<T> = std::result::Result<T, NitroError>;

/// Unified error type for all daemon operations
#[derive(thiserror::Error, Debug)]
pub enum NitroError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Hardware Identity Errors
    // ============================================================================
    #[error("Unsupported hardware: detected '{detected}', supported: {supported}")]
    HardwareMismatch {
        detected: String,
        supported: &'static str,
    },

    #[error("Hardware identity has not been verified")]
    NotVerified,

    // ============================================================================
    // Hardware Access Errors
    // ============================================================================
    #[error("Failed to read EC register {register}: {source}")]
    EcRead {
        register: u64,
        source: io::Error,
    },

    #[error("Failed to write EC register {register}: {source}")]
    EcWrite {
        register: u64,
        source: io::Error,
    },

    #[error("Failed to read CPU attribute {path}: {reason}")]
    AttrRead {
        path: PathBuf,
        reason: String,
    },

    #[error("Failed to write CPU attribute {path}: {reason}")]
    AttrWrite {
        path: PathBuf,
        reason: String,
    },

    #[error("No cpufreq policy directories found")]
    NoCpuPolicies,

    // ============================================================================
    // Validation Errors
    // ============================================================================
    #[error("Unknown profile: {name}. Valid: {valid}")]
    InvalidProfile {
        name: String,
        valid: &'static str,
    },

    #[error("Invalid duty cycle: {value} (must be 0-100)")]
    InvalidDutyCycle {
        value: u8,
    },

    // ============================================================================
    // Daemon and IPC Errors
    // ============================================================================
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Message too large: exceeds {max_size} bytes")]
    MessageTooLarge {
        max_size: usize,
    },

    #[error("IPC protocol error: {0}")]
    IpcProtocol(String),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),
}

impl NitroError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create an invalid-profile error naming the rejected input
    pub fn invalid_profile(name: impl Into<String>, valid: &'static str) -> Self {
        Self::InvalidProfile {
            name: name.into(),
            valid,
        }
    }
}

// Allow converting from String to NitroError
impl From<String> for NitroError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to NitroError
impl From<&str> for NitroError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}
