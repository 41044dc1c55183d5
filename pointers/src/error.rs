use crate::registry::Discrepancy;
use crate::store::StoreError;
use thiserror::Error;
use ulid::Ulid;

#[derive(Debug, Error)]
pub enum AppError {

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Store unavailable while {context}: {source}")]
    StoreUnavailable {
        context: String,
        #[source]
        source: StoreError,
    },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Registry drift: {} discrepancies", .0.len())]
    RegistryDrift(Vec<Discrepancy>),

    #[error("Pointer {pointer} cannot hold record {record}")]
    PointerMismatch { pointer: Ulid, record: String },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

impl AppError {
    /// Wraps a store failure with the operation it interrupted. A missing table is routine
    /// (the type has no backing rows), everything else is an operational incident.
    pub fn store(context: impl Into<String>, err: StoreError) -> Self {
        let context = context.into();
        match err {
            StoreError::MissingTable(table) => AppError::NotFound(format!("{} (table `{}` does not exist)", context, table)),
            source => AppError::StoreUnavailable { context, source },
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }

    /// True for failures that call for retry/alerting rather than a 404-like answer.
    pub fn is_operational(&self) -> bool {
        matches!(self, AppError::StoreUnavailable { .. } | AppError::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_table_maps_to_not_found() {
        let err = AppError::store("fetching posts", StoreError::MissingTable("posts".into()));
        assert!(err.is_not_found());
        assert!(!err.is_operational());
        assert!(err.to_string().contains("posts"));
    }

    #[test]
    fn other_store_errors_are_operational() {
        let err = AppError::store("fetching posts", StoreError::Unavailable("timeout".into()));
        assert!(err.is_operational());
        assert!(err.to_string().contains("fetching posts"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
