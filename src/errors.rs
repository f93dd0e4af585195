//! Unified error types for the coding rule service.

use sea_orm::DbErr;
use thiserror::Error;

/// Every failure the rule store, code generator, and housekeeper can report.
#[derive(Debug, Error)]
pub enum Error {
    /// The referenced rule does not exist or has been deleted.
    #[error("Coding rule not found: {id}")]
    RuleNotFound {
        /// Identifier that was looked up
        id: i64,
    },

    /// An active rule with the same name already exists.
    #[error("Coding rule already exists: {name}")]
    RuleAlreadyExists {
        /// Name of the conflicting rule
        name: String,
    },

    /// Issuing `count` codes from `starting` would pass the rule's ceiling.
    #[error("Requesting {count} codes from {starting} exceeds digital code ending {ending}")]
    ExceedEnding {
        /// First number that would have been issued
        starting: i64,
        /// Number of codes requested
        count: u32,
        /// Configured ceiling of the rule
        ending: i64,
    },

    /// Rule fields or request arguments are malformed.
    #[error("Validation error: {message}")]
    Validation {
        /// Human-readable reason
        message: String,
    },

    /// The configuration file or environment could not be used.
    #[error("Configuration error: {message}")]
    Config {
        /// Human-readable reason
        message: String,
    },

    /// A persistence failure, labelled with the operation that hit it.
    #[error("Database error while {context}: {source}")]
    Store {
        /// Operation that was running
        context: &'static str,
        /// Underlying `SeaORM` error
        #[source]
        source: DbErr,
    },

    /// The caller gave up before the allocation committed.
    #[error("Operation cancelled before commit")]
    Cancelled,
}

impl Error {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Attaches an operation label to raw `SeaORM` results.
pub trait StoreContext<T> {
    /// Wraps a `DbErr` into [`Error::Store`] with the given context.
    fn store_context(self, context: &'static str) -> Result<T>;
}

impl<T> StoreContext<T> for std::result::Result<T, DbErr> {
    fn store_context(self, context: &'static str) -> Result<T> {
        self.map_err(|source| Error::Store { context, source })
    }
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_store_context_wraps_db_error() {
        let raw: std::result::Result<(), DbErr> = Err(DbErr::Custom("boom".to_string()));
        let err = raw.store_context("locking counter").unwrap_err();
        assert!(matches!(
            err,
            Error::Store {
                context: "locking counter",
                ..
            }
        ));
        assert!(err.to_string().contains("locking counter"));
    }

    #[test]
    fn test_exceed_ending_message() {
        let err = Error::ExceedEnding {
            starting: 998,
            count: 5,
            ending: 999,
        };
        assert_eq!(
            err.to_string(),
            "Requesting 5 codes from 998 exceeds digital code ending 999"
        );
    }
}
