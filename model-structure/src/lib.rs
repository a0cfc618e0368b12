//! The internal datamodel: static descriptors for models and their relations,
//! plus the runtime representations (values, records, entities) shared by the
//! loading and mutation engines.

mod datamodel;
mod entity;
mod error;
mod field;
mod model;
mod order_by;
mod record;
mod relation;
mod value;

pub mod prelude;

pub use datamodel::{Datamodel, DatamodelBuilder};
pub use entity::{Entity, EntityId, LoadedRelation};
pub use error::DomainError;
pub use field::{ScalarField, TypeIdentifier};
pub use model::{Model, ModelRef};
pub use order_by::{OrderBy, SortOrder};
pub use record::Record;
pub use relation::{Cardinality, ForeignKey, Relation, RelationTarget, Through};
pub use value::{parse_datetime, stringify_datetime, Value, ValueList};

pub type Result<T> = std::result::Result<T, DomainError>;
