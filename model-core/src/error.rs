use model_connector::ConnectorError;
use model_structure::DomainError;
use thiserror::Error;

use crate::loader::BatchError;
use crate::mutation::{ChangeAction, ValidationError};

#[derive(Debug, Error)]
pub enum CoreError {
    /// A schema-build-time mistake: bad relation name, wrong cardinality for
    /// a field kind, missing required declaration. Intended to fail startup.
    #[error("Configuration error: {}", _0)]
    ConfigurationError(String),

    /// A user-supplied value the engine cannot act on, e.g. an unresolvable
    /// global ID. Surfaced for the offending field only.
    #[error("Input error: {}", _0)]
    InputError(String),

    /// Aggregated entity-validation failures for one mutation. Nothing was
    /// persisted.
    #[error("Some of your changes could not be saved.")]
    ValidationError(#[from] ValidationError),

    #[error("Not authorized to {} {}", action, model)]
    AccessDenied { action: ChangeAction, model: String },

    #[error(transparent)]
    BatchError(#[from] BatchError),

    #[error(transparent)]
    ConnectorError(#[from] ConnectorError),

    #[error(transparent)]
    DomainError(#[from] DomainError),
}
