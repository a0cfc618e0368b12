//! Batched resolution and mutation engine bridging a relational datamodel
//! and a GraphQL-style API surface.
//!
//! Field resolution walks declared relation paths with request-scoped
//! caching and micro-batched loading; mutations map nested input documents
//! onto change-sets that are validated, authorized and persisted atomically.

mod error;
mod executor;
mod hooks;
mod loader;
mod mutation;
mod resolver;
mod schema;
mod scope;

pub use error::CoreError;
pub use executor::{execute, execute_all};
pub use hooks::{AccessDenied, AuthorizationHook, EntityValidator, IdentityResolver, RequestContext, ValidationFailure};
pub use loader::{BatchError, Batcher, LoadRequest};
pub use mutation::{
    apply_changes, authorize_changes, persist_changes, validate_changes, AttributeBinding, ChangeAction, ChangeRecord,
    InputMap, InputValue, MutationFieldMap, Mutator, NestedFieldMap, NullBehavior, PathSegment, UnknownError,
    ValidationError,
};
pub use resolver::{resolve, ResolvedAssociation};
pub use schema::{
    ComputedResolver, FieldKind, FieldMetadata, ObjectType, ResolvedField, SchemaRegistry, SchemaRegistryBuilder,
};
pub use scope::RequestScope;

pub type Result<T> = std::result::Result<T, CoreError>;
