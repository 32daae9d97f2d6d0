//! Custom error types for Monarch.
//!
//! Explicit enum error types per subsystem, wrapped by [`MonarchError`].
//! No `Box<dyn Error>`, no `anyhow::Result` - all errors are strongly typed.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for instance coordination.
///
/// Every variant is fatal at startup: the caller emits a diagnostic and exits
/// non-zero. Signals dropped by a follower are not errors and never show up here.
#[derive(Debug, Error)]
pub enum MonarchError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Identity Errors
    // =========================================================================
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    // =========================================================================
    // Shared Memory Errors - No Retry
    // =========================================================================
    #[error("Shared memory error: {0}")]
    SharedMemory(#[from] SharedMemoryError),

    // =========================================================================
    // Cross-Process Lock Errors
    // =========================================================================
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    // =========================================================================
    // Role Errors
    // =========================================================================
    #[error("Role error: {0}")]
    RoleTransition(#[from] RoleTransitionError),

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Hard validation errors cause immediate process termination.
/// Used when configuration is invalid and coordination cannot safely start.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Region size out of bounds: {size} bytes (min: {min}, max: {max})")]
    RegionSizeOutOfBounds { size: usize, min: usize, max: usize },

    #[error("Region and lock prefixes must differ, both are '{prefix}'")]
    PrefixCollision { prefix: String },
}

/// Failures deriving the per-user identity token.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Failed to look up account for uid {uid}: {reason}")]
    LookupFailed { uid: u32, reason: String },

    #[error("No account entry for uid {uid}")]
    NoAccount { uid: u32 },

    #[error("Account name is empty")]
    EmptyName,
}

/// Shared memory errors - environment-level failures with no retry.
#[derive(Debug, Error)]
pub enum SharedMemoryError {
    #[error("Failed to create shared memory region: {name} - {reason}")]
    CreateFailed { name: String, reason: String },

    #[error("Failed to open shared memory region: {name} - {reason}")]
    OpenFailed { name: String, reason: String },

    #[error("Failed to map shared memory region {name}: {reason}")]
    MapFailed { name: String, reason: String },

    #[error("Failed to unlink shared memory region {name}: {reason}")]
    UnlinkFailed { name: String, reason: String },

    #[error("Shared memory region {name} has size {actual}, need at least {min}")]
    SizeMismatch {
        name: String,
        actual: usize,
        min: usize,
    },
}

/// Cross-process lock errors.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Invalid lock name '{name}': must be non-empty and contain no '/'")]
    InvalidName { name: String },

    #[error("Failed to open lock {name}: {source}")]
    OpenFailed {
        name: String,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("Failed to acquire lock {name}: {reason}")]
    AcquireFailed { name: String, reason: String },
}

/// Role transition errors for the election state machine.
#[derive(Debug, Error)]
pub enum RoleTransitionError {
    #[error("Cannot transition role from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
}

/// Result type alias using MonarchError.
pub type MonarchResult<T> = Result<T, MonarchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_validation_error_display() {
        let err = HardValidationError::InvalidFieldValue {
            field: "region_prefix",
            value: "bad/name".to_string(),
            reason: "must be alphanumeric".to_string(),
        };
        assert!(err.to_string().contains("region_prefix"));
        assert!(err.to_string().contains("bad/name"));
    }

    #[test]
    fn test_error_chain() {
        let shm_err = SharedMemoryError::MapFailed {
            name: "MonarchSharedMem_alice".to_string(),
            reason: "ENOMEM".to_string(),
        };
        let err: MonarchError = shm_err.into();
        assert!(matches!(err, MonarchError::SharedMemory(_)));
        assert!(err.to_string().contains("MonarchSharedMem_alice"));
    }

    #[test]
    fn test_identity_error_display() {
        let err: MonarchError = IdentityError::NoAccount { uid: 4242 }.into();
        assert!(err.to_string().contains("4242"));
    }
}
