pub use crate::{
    Cardinality, Datamodel, DatamodelBuilder, DomainError, Entity, EntityId, ForeignKey, LoadedRelation, Model,
    ModelRef, OrderBy, Record, Relation, RelationTarget, ScalarField, SortOrder, Through, TypeIdentifier, Value,
};
