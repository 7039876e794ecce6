use std::{array::TryFromSliceError, fmt::Display, string::FromUtf8Error, sync::PoisonError};

use bincode::ErrorKind;

/// Custom Result type for winqdb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for winqdb
///
/// Builder-level errors (`InvalidStatement`, `UnsupportedOperation`) are raised
/// before anything reaches the storage layer. Everything coming back from the
/// store is an `Engine` error carrying a code and a message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The store could not be opened, or the handle is not connected
    #[error("connection error: {0}")]
    Connection(String),
    /// The statement is malformed for its kind (missing table, HAVING without GROUP BY, ...)
    #[error("invalid statement: {0}")]
    InvalidStatement(String),
    /// A clause was used on a statement kind that does not support it
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    /// A value could not be converted to or stored as the requested type
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    /// Failure reported by the execution engine or the storage below it
    #[error("engine error {code}: {message}")]
    Engine { code: ErrorCode, message: String },
}

impl Error {
    pub fn engine(code: ErrorCode, message: impl Into<String>) -> Self {
        Error::Engine {
            code,
            message: message.into(),
        }
    }

    /// Returns the engine code, `None` for builder-level errors
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::Engine { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Engine result codes, numbered like the SQLite primary result codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Generic error: unknown table, column or function
    Error = 1,
    Internal = 2,
    /// Write conflict with a concurrent transaction
    Busy = 5,
    IoErr = 10,
    Corrupt = 11,
    Constraint = 19,
    Mismatch = 20,
    /// API used out of order (step without prepare, bind after step, ...)
    Misuse = 21,
    Range = 25,
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCode::Error => "error",
            ErrorCode::Internal => "internal",
            ErrorCode::Busy => "busy",
            ErrorCode::IoErr => "ioerr",
            ErrorCode::Corrupt => "corrupt",
            ErrorCode::Constraint => "constraint",
            ErrorCode::Mismatch => "mismatch",
            ErrorCode::Misuse => "misuse",
            ErrorCode::Range => "range",
        };
        write!(f, "{}({})", name, *self as i32)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::engine(ErrorCode::IoErr, value.to_string())
    }
}

impl<T> From<PoisonError<T>> for Error {
    fn from(value: PoisonError<T>) -> Self {
        Error::engine(ErrorCode::Internal, value.to_string())
    }
}

impl From<Box<ErrorKind>> for Error {
    fn from(value: Box<ErrorKind>) -> Self {
        match *value {
            ErrorKind::Io(err) => err.into(),
            err => Error::engine(ErrorCode::Corrupt, err.to_string()),
        }
    }
}

impl From<TryFromSliceError> for Error {
    fn from(value: TryFromSliceError) -> Self {
        Error::engine(ErrorCode::Corrupt, value.to_string())
    }
}

impl From<FromUtf8Error> for Error {
    fn from(value: FromUtf8Error) -> Self {
        Error::engine(ErrorCode::Corrupt, value.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(value: toml::de::Error) -> Self {
        Error::Connection(format!("invalid config: {}", value))
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorCode};

    #[test]
    fn test_display() {
        let err = Error::engine(ErrorCode::Constraint, "UNIQUE constraint failed: users.id");
        assert_eq!(
            err.to_string(),
            "engine error constraint(19): UNIQUE constraint failed: users.id"
        );
        assert_eq!(err.code(), Some(ErrorCode::Constraint));
        assert_eq!(Error::InvalidStatement("no table".into()).code(), None);
    }

    #[test]
    fn test_io_error_maps_to_ioerr() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::Other, "disk gone").into();
        assert_eq!(err.code(), Some(ErrorCode::IoErr));
    }
}
