//! Sync error types.

use thiserror::Error;

use nbsync_connector::error::ConnectorError;

/// Errors that can occur during a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A repository call failed.
    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    /// The source inventory could not be listed at all.
    #[error("Source inventory unavailable: {message}")]
    SourceUnavailable { message: String },

    /// A source record references a parent that is not in the snapshot.
    #[error("Snapshot inconsistency for {entity}: {reason}")]
    SnapshotInconsistency { entity: String, reason: String },

    /// A placeholder was still unresolved after the final resolution pass.
    #[error("Unresolved reference '{field}' on {entity}")]
    UnresolvedReference { entity: String, field: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl SyncError {
    /// Create a source-unavailable error.
    pub fn source_unavailable(message: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            message: message.into(),
        }
    }

    /// Create a snapshot-inconsistency error.
    pub fn inconsistency(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SnapshotInconsistency {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    /// Create an unresolved-reference error.
    pub fn unresolved(entity: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnresolvedReference {
            entity: entity.into(),
            field: field.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Check if repeating the failed call could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connector(e) => e.is_transient(),
            Self::SourceUnavailable { .. } => true,
            _ => false,
        }
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_delegates_to_connector() {
        let err = SyncError::from(ConnectorError::connection_failed("reset"));
        assert!(err.is_transient());

        let err = SyncError::from(ConnectorError::AuthenticationFailed);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_display() {
        let err = SyncError::inconsistency("vm web-01", "folder b1g missing from folder listing");
        assert_eq!(
            err.to_string(),
            "Snapshot inconsistency for vm web-01: folder b1g missing from folder listing"
        );

        let err = SyncError::unresolved("vm web-01", "primary_ip4");
        assert_eq!(err.to_string(), "Unresolved reference 'primary_ip4' on vm web-01");
    }
}
