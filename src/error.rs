//! Defines the app level error type and conversions from SQL errors.

use rusqlite::Error as SqlError;

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested row could not be found.
    ///
    /// Internally, this error may occur when a query returns no rows. Callers
    /// should check that the ID is correct and that the row has been created.
    #[error("the requested resource could not be found")]
    NotFound,

    /// A persisted row failed validation when mapped into its domain type,
    /// for example a recurring rule with an unrecognized frequency.
    ///
    /// Units that hit this error must be skipped without modifying the stored
    /// row, so that the bad data can be reviewed and fixed manually.
    #[error("a stored row failed validation: {0}")]
    MalformedRecord(String),

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(SqlError),
}

impl From<SqlError> for Error {
    fn from(value: SqlError) -> Self {
        match value {
            SqlError::QueryReturnedNoRows => Error::NotFound,
            SqlError::FromSqlConversionFailure(_, _, source) => {
                Error::MalformedRecord(source.to_string())
            }
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

impl Error {
    /// Whether the error indicates bad stored data rather than a failed read
    /// or write.
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Error::MalformedRecord(_))
    }
}
