use model_structure::DomainError;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{}", kind)]
pub struct ConnectorError {
    /// The error information for internal use.
    pub kind: ErrorKind,
}

impl ConnectorError {
    pub fn from_kind(kind: ErrorKind) -> Self {
        ConnectorError { kind }
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("Unique constraint failed: {}", constraint)]
    UniqueConstraintViolation { constraint: String },

    #[error("Null constraint failed: {}", constraint)]
    NullConstraintViolation { constraint: String },

    #[error("Record does not exist.")]
    RecordDoesNotExist,

    #[error("Malformed filter: {}", message)]
    MalformedFilter { message: String },

    #[error("Error querying the store: {}", _0)]
    QueryError(Box<dyn std::error::Error + Send + Sync>),

    #[error("The transaction is no longer open.")]
    TransactionAlreadyClosed,

    #[error("Domain error: {}", _0)]
    DomainError(DomainError),
}

impl From<DomainError> for ConnectorError {
    fn from(err: DomainError) -> Self {
        ConnectorError::from_kind(ErrorKind::DomainError(err))
    }
}
