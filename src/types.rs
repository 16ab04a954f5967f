//! Error types for Gatehouse
//!
//! One error enum covers the whole crate. The variants mirror the failure
//! modes of the subscription core: caller mistakes (`Validation`,
//! `NotFound`), metering rejections (`AlreadyViewed`, `NoQuota`,
//! `UpdateConflict`), and infrastructure failures (`Transaction`,
//! `Database`). None of these are retried internally; transactional
//! operations leave no partial state, so callers may retry from scratch.

use hyper::StatusCode;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, GatehouseError>;

/// Gatehouse error taxonomy
#[derive(Debug, Error)]
pub enum GatehouseError {
    /// Missing or malformed required input
    #[error("{0}")]
    Validation(String),

    /// A referenced document does not exist
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Metering rejected a duplicate view of the same property
    #[error("property already viewed for this subscription")]
    AlreadyViewed,

    /// Metering rejected an inactive record or exhausted quota
    #[error("no remaining views or subscription not active")]
    NoQuota,

    /// The conditional update matched nothing for an unclassified reason
    #[error("could not register view")]
    UpdateConflict,

    /// A multi-document transaction aborted
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// Storage-layer failure
    #[error("database error: {0}")]
    Database(String),

    /// Server I/O failure (bind, accept)
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GatehouseError {
    /// HTTP status this error surfaces as.
    ///
    /// `NotFound` maps to 404 here; endpoints where the missing referent
    /// arrived in the request body (subscribe/create) downgrade it to 400
    /// at the route layer.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatehouseError::Validation(_) => StatusCode::BAD_REQUEST,
            GatehouseError::NotFound(_) => StatusCode::NOT_FOUND,
            GatehouseError::AlreadyViewed => StatusCode::CONFLICT,
            GatehouseError::NoQuota => StatusCode::FORBIDDEN,
            GatehouseError::UpdateConflict => StatusCode::BAD_REQUEST,
            GatehouseError::Transaction(_) => StatusCode::BAD_REQUEST,
            GatehouseError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatehouseError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<mongodb::error::Error> for GatehouseError {
    fn from(e: mongodb::error::Error) -> Self {
        GatehouseError::Database(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatehouseError::Validation("userId is required".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatehouseError::NotFound("user subscription").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatehouseError::AlreadyViewed.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(GatehouseError::NoQuota.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            GatehouseError::UpdateConflict.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatehouseError::Transaction("write conflict".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatehouseError::Database("ping failed".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_messages_match_wire_contract() {
        assert_eq!(
            GatehouseError::AlreadyViewed.to_string(),
            "property already viewed for this subscription"
        );
        assert_eq!(
            GatehouseError::NoQuota.to_string(),
            "no remaining views or subscription not active"
        );
        assert_eq!(
            GatehouseError::NotFound("plan").to_string(),
            "plan not found"
        );
    }
}
