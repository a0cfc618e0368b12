use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DomainError {
    #[error("Model '{}' not found in the datamodel", name)]
    ModelNotFound { name: String },

    #[error("Field '{}' not found on model '{}'", name, model)]
    FieldNotFound { name: String, model: String },

    #[error("Relation '{}' not found on model '{}'", name, model)]
    RelationNotFound { name: String, model: String },

    #[error("Conversion from '{}' to '{}' failed", _0, _1)]
    ConversionFailure(&'static str, &'static str),

    #[error("Invalid datamodel: {}", _0)]
    InvalidDatamodel(String),
}
