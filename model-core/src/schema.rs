use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use model_connector::{CollectionQuery, Filter};
use model_structure::{Cardinality, Datamodel, Entity, ForeignKey, ModelRef, RelationTarget, Value};

use crate::hooks::RequestContext;
use crate::loader::LoadRequest;
use crate::resolver::{resolve, ResolvedAssociation};
use crate::CoreError;

/// What one registered field does when resolved against a backing entity.
#[derive(Clone)]
pub enum FieldKind {
    /// A scalar attribute on the entity at the end of the path.
    Attribute { attribute: String },

    /// A single-valued relation on the entity at the end of the path.
    HasOne { relation: String },

    /// The global ID of a single-valued relation's target, derived alongside
    /// every has-one field.
    HasOneId { relation: String },

    /// A collection-valued relation, loaded eagerly as an array.
    HasManyArray { relation: String },

    /// The global IDs of a collection-valued relation's members, derived
    /// alongside every has-many-array field.
    HasManyIds { relation: String },

    /// A collection-valued relation exposed as a paginated connection; loaded
    /// through the collection-membership batch kind.
    HasManyConnection { relation: String },

    /// An arbitrary computed value over the backing entity.
    Computed { resolver: ComputedResolver },
}

pub type ComputedResolver = Arc<dyn Fn(&RequestContext, &Entity) -> crate::Result<Value> + Send + Sync>;

impl fmt::Debug for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Attribute { attribute } => f.debug_struct("Attribute").field("attribute", attribute).finish(),
            FieldKind::HasOne { relation } => f.debug_struct("HasOne").field("relation", relation).finish(),
            FieldKind::HasOneId { relation } => f.debug_struct("HasOneId").field("relation", relation).finish(),
            FieldKind::HasManyArray { relation } => {
                f.debug_struct("HasManyArray").field("relation", relation).finish()
            }
            FieldKind::HasManyIds { relation } => f.debug_struct("HasManyIds").field("relation", relation).finish(),
            FieldKind::HasManyConnection { relation } => {
                f.debug_struct("HasManyConnection").field("relation", relation).finish()
            }
            FieldKind::Computed { .. } => f.write_str("Computed"),
        }
    }
}

/// The value a resolved field hands to the protocol layer.
#[derive(Debug, Clone)]
pub enum ResolvedField {
    Scalar(Value),
    One(Option<Entity>),
    Many(Vec<Entity>),
}

/// Static resolution metadata for one declared field: the relation path from
/// the object type's backing model to the entity that owns the data, and
/// what to do once there.
#[derive(Debug, Clone)]
pub struct FieldMetadata {
    pub name: String,
    pub source_model: String,
    pub path: Vec<String>,
    pub kind: FieldKind,
    pub nullable: bool,
}

impl FieldMetadata {
    /// Resolves this field for one backing entity. Suspends on the batcher
    /// whenever a hop needs a load, so concurrent field resolutions coalesce.
    pub async fn resolve(&self, ctx: &RequestContext, entity: Entity) -> crate::Result<ResolvedField> {
        let owner = match resolve(ctx, entity, self.path.clone()).await? {
            ResolvedAssociation::One(Some(owner)) => owner,
            ResolvedAssociation::One(None) => return Ok(self.empty_result()),
            ResolvedAssociation::Many(_) => {
                return Err(CoreError::ConfigurationError(format!(
                    "backing path of field '{}' resolved to a collection",
                    self.name
                )));
            }
        };

        match &self.kind {
            FieldKind::Attribute { attribute } => {
                let value = owner.get(attribute).unwrap_or(Value::Null);
                Ok(ResolvedField::Scalar(value))
            }
            FieldKind::HasOne { relation } => {
                let resolved = resolve(ctx, owner, vec![relation.clone()]).await?;
                Ok(ResolvedField::One(resolved.into_one()))
            }
            FieldKind::HasOneId { relation } => self.resolve_one_id(ctx, owner, relation).await,
            FieldKind::HasManyArray { relation } => {
                let resolved = resolve(ctx, owner, vec![relation.clone()]).await?;
                Ok(ResolvedField::Many(resolved.entities()))
            }
            FieldKind::HasManyIds { relation } => {
                let resolved = resolve(ctx, owner, vec![relation.clone()]).await?;

                let ids = resolved
                    .entities()
                    .iter()
                    .map(|entity| ctx.identity().global_id_for(entity).map(Value::String))
                    .collect::<crate::Result<Vec<Value>>>()?;

                Ok(ResolvedField::Scalar(Value::List(ids)))
            }
            FieldKind::HasManyConnection { relation } => {
                let members = self.resolve_connection(ctx, owner, relation).await?;
                Ok(ResolvedField::Many(members))
            }
            FieldKind::Computed { resolver } => Ok(ResolvedField::Scalar(resolver(ctx, &owner)?)),
        }
    }

    /// The global ID of a has-one target. For a non-polymorphic belongs-to
    /// the ID is computed from the locally stored foreign key without loading
    /// the target entity at all.
    async fn resolve_one_id(&self, ctx: &RequestContext, owner: Entity, relation: &str) -> crate::Result<ResolvedField> {
        let model = owner.model();
        let descriptor = model
            .find_relation(relation)
            .map_err(|err| CoreError::ConfigurationError(err.to_string()))?;

        if let (ForeignKey::Source { field }, RelationTarget::Model(target)) =
            (&descriptor.foreign_key, &descriptor.target)
        {
            let foreign_key = owner.get(field).unwrap_or(Value::Null);

            if foreign_key.is_null() {
                return Ok(ResolvedField::Scalar(Value::Null));
            }

            let id = ctx.identity().global_id_for_key(target, &foreign_key)?;
            return Ok(ResolvedField::Scalar(Value::String(id)));
        }

        match resolve(ctx, owner, vec![relation.to_string()]).await?.into_one() {
            Some(target) => {
                let id = ctx.identity().global_id_for(&target)?;
                Ok(ResolvedField::Scalar(Value::String(id)))
            }
            None => Ok(ResolvedField::Scalar(Value::Null)),
        }
    }

    /// Loads a connection-backed collection through the membership batch
    /// kind, so several connections over the same model share one scan.
    async fn resolve_connection(
        &self,
        ctx: &RequestContext,
        owner: Entity,
        relation: &str,
    ) -> crate::Result<Vec<Entity>> {
        let model = owner.model();
        let descriptor = model
            .find_relation(relation)
            .map_err(|err| CoreError::ConfigurationError(err.to_string()))?;

        let (ForeignKey::Target { field, type_field }, RelationTarget::Model(target)) =
            (&descriptor.foreign_key, &descriptor.target)
        else {
            return Err(CoreError::ConfigurationError(format!(
                "connection field '{}' requires a has-many relation with a fixed target",
                self.name
            )));
        };

        let Some(id) = owner.id() else {
            return Ok(vec![]);
        };

        let mut conditions = vec![(field.clone(), id)];
        if let Some(tf) = type_field {
            conditions.push((tf.clone(), Value::String(owner.model_name())));
        }

        let query = CollectionQuery {
            filter: Filter::new(conditions),
            order_by: descriptor.order_by.clone(),
        };

        let target_model = ctx.datamodel().find_model(target)?;
        ctx.batcher().load(&target_model, LoadRequest::Collection(query)).await
    }

    fn empty_result(&self) -> ResolvedField {
        match &self.kind {
            FieldKind::Attribute { .. }
            | FieldKind::HasOneId { .. }
            | FieldKind::HasManyIds { .. }
            | FieldKind::Computed { .. } => ResolvedField::Scalar(Value::Null),
            FieldKind::HasOne { .. } => ResolvedField::One(None),
            FieldKind::HasManyArray { .. } | FieldKind::HasManyConnection { .. } => ResolvedField::Many(vec![]),
        }
    }
}

/// One GraphQL object type backed by a persistent model.
#[derive(Debug)]
pub struct ObjectType {
    pub model: String,
    pub fields: IndexMap<String, FieldMetadata>,
}

/// The process-wide schema surface: every backed object type with its field
/// metadata, built once at startup and frozen. Registration mistakes raise
/// configuration errors here instead of surfacing mid-request.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    types: IndexMap<String, ObjectType>,
}

impl SchemaRegistry {
    pub fn builder(datamodel: Arc<Datamodel>) -> SchemaRegistryBuilder {
        SchemaRegistryBuilder {
            datamodel,
            types: IndexMap::new(),
        }
    }

    pub fn object_type(&self, type_name: &str) -> crate::Result<&ObjectType> {
        self.types
            .get(type_name)
            .ok_or_else(|| CoreError::ConfigurationError(format!("object type '{type_name}' is not registered")))
    }

    pub fn field(&self, type_name: &str, field_name: &str) -> crate::Result<&FieldMetadata> {
        self.object_type(type_name)?.fields.get(field_name).ok_or_else(|| {
            CoreError::ConfigurationError(format!("field '{field_name}' is not registered on '{type_name}'"))
        })
    }
}

/// Accumulates object type and field registrations, validating each against
/// the datamodel, then freezes into a [`SchemaRegistry`].
#[derive(Debug)]
pub struct SchemaRegistryBuilder {
    datamodel: Arc<Datamodel>,
    types: IndexMap<String, ObjectType>,
}

impl SchemaRegistryBuilder {
    pub fn backed_by(&mut self, type_name: &str, model: &str) -> crate::Result<&mut Self> {
        self.datamodel.find_model(model)?;

        self.types.insert(
            type_name.to_string(),
            ObjectType {
                model: model.to_string(),
                fields: IndexMap::new(),
            },
        );

        Ok(self)
    }

    pub fn attribute(&mut self, type_name: &str, field: &str, path: &[&str], attribute: &str) -> crate::Result<&mut Self> {
        let (owner, nullable) = self.walk_path(type_name, field, path)?;

        let scalar = owner.find_field(attribute)?;
        let nullable = nullable || !scalar.required;

        self.insert_field(
            type_name,
            FieldMetadata {
                name: field.to_string(),
                source_model: self.backing_model(type_name)?,
                path: owned_path(path),
                kind: FieldKind::Attribute {
                    attribute: attribute.to_string(),
                },
                nullable,
            },
        )
    }

    /// Registers a has-one field along with its derived `{field}Id` companion.
    pub fn has_one(&mut self, type_name: &str, field: &str, path: &[&str], relation: &str) -> crate::Result<&mut Self> {
        let (owner, path_nullable) = self.walk_path(type_name, field, path)?;
        let descriptor = self.relation_with_cardinality(&owner, field, relation, Cardinality::One)?;
        let nullable = path_nullable || descriptor.nullable;

        let source_model = self.backing_model(type_name)?;

        self.insert_field(
            type_name,
            FieldMetadata {
                name: field.to_string(),
                source_model: source_model.clone(),
                path: owned_path(path),
                kind: FieldKind::HasOne {
                    relation: relation.to_string(),
                },
                nullable,
            },
        )?;

        self.insert_field(
            type_name,
            FieldMetadata {
                name: format!("{field}Id"),
                source_model,
                path: owned_path(path),
                kind: FieldKind::HasOneId {
                    relation: relation.to_string(),
                },
                nullable,
            },
        )
    }

    /// Registers a has-many array field along with its derived `{field}Ids`
    /// companion.
    pub fn has_many_array(
        &mut self,
        type_name: &str,
        field: &str,
        path: &[&str],
        relation: &str,
    ) -> crate::Result<&mut Self> {
        let (owner, path_nullable) = self.walk_path(type_name, field, path)?;
        self.relation_with_cardinality(&owner, field, relation, Cardinality::Many)?;

        let source_model = self.backing_model(type_name)?;

        self.insert_field(
            type_name,
            FieldMetadata {
                name: field.to_string(),
                source_model: source_model.clone(),
                path: owned_path(path),
                kind: FieldKind::HasManyArray {
                    relation: relation.to_string(),
                },
                nullable: path_nullable,
            },
        )?;

        self.insert_field(
            type_name,
            FieldMetadata {
                name: format!("{field}Ids"),
                source_model,
                path: owned_path(path),
                kind: FieldKind::HasManyIds {
                    relation: relation.to_string(),
                },
                nullable: path_nullable,
            },
        )
    }

    pub fn has_many_connection(
        &mut self,
        type_name: &str,
        field: &str,
        path: &[&str],
        relation: &str,
    ) -> crate::Result<&mut Self> {
        let (owner, path_nullable) = self.walk_path(type_name, field, path)?;
        let descriptor = self.relation_with_cardinality(&owner, field, relation, Cardinality::Many)?;

        if descriptor.through.is_some() {
            return Err(CoreError::ConfigurationError(format!(
                "connection field '{field}' cannot be backed by a through-relation"
            )));
        }

        self.insert_field(
            type_name,
            FieldMetadata {
                name: field.to_string(),
                source_model: self.backing_model(type_name)?,
                path: owned_path(path),
                kind: FieldKind::HasManyConnection {
                    relation: relation.to_string(),
                },
                nullable: path_nullable,
            },
        )
    }

    pub fn computed(
        &mut self,
        type_name: &str,
        field: &str,
        path: &[&str],
        resolver: ComputedResolver,
    ) -> crate::Result<&mut Self> {
        let (_, nullable) = self.walk_path(type_name, field, path)?;

        self.insert_field(
            type_name,
            FieldMetadata {
                name: field.to_string(),
                source_model: self.backing_model(type_name)?,
                path: owned_path(path),
                kind: FieldKind::Computed { resolver },
                nullable,
            },
        )
    }

    /// Freezes the registry. No registration is possible afterwards.
    pub fn build(self) -> SchemaRegistry {
        SchemaRegistry { types: self.types }
    }

    fn backing_model(&self, type_name: &str) -> crate::Result<String> {
        self.types
            .get(type_name)
            .map(|object| object.model.clone())
            .ok_or_else(|| CoreError::ConfigurationError(format!("object type '{type_name}' is not registered")))
    }

    /// Validates a backing path hop by hop: every hop must be a single-valued
    /// relation with a statically known target. Returns the model at the end
    /// of the path and whether any hop along it is nullable.
    fn walk_path(&self, type_name: &str, field: &str, path: &[&str]) -> crate::Result<(ModelRef, bool)> {
        let mut current = self.datamodel.find_model(&self.backing_model(type_name)?)?;
        let mut nullable = false;

        for segment in path {
            let relation = current
                .find_relation(segment)
                .map_err(|err| CoreError::ConfigurationError(format!("field '{field}': {err}")))?;

            if !relation.is_single() {
                return Err(CoreError::ConfigurationError(format!(
                    "field '{field}': backing path hop '{segment}' is collection-valued"
                )));
            }

            let RelationTarget::Model(target) = &relation.target else {
                return Err(CoreError::ConfigurationError(format!(
                    "field '{field}': backing path hop '{segment}' is polymorphic"
                )));
            };

            nullable = nullable || relation.nullable;
            current = self.datamodel.find_model(target)?;
        }

        Ok((current, nullable))
    }

    fn relation_with_cardinality(
        &self,
        owner: &ModelRef,
        field: &str,
        relation: &str,
        cardinality: Cardinality,
    ) -> crate::Result<model_structure::Relation> {
        let descriptor = owner
            .find_relation(relation)
            .map_err(|err| CoreError::ConfigurationError(format!("field '{field}': {err}")))?;

        if descriptor.cardinality != cardinality {
            return Err(CoreError::ConfigurationError(format!(
                "field '{field}': relation '{relation}' has the wrong cardinality"
            )));
        }

        Ok(descriptor.clone())
    }

    fn insert_field(&mut self, type_name: &str, metadata: FieldMetadata) -> crate::Result<&mut Self> {
        let object = self
            .types
            .get_mut(type_name)
            .ok_or_else(|| CoreError::ConfigurationError(format!("object type '{type_name}' is not registered")))?;

        if object.fields.contains_key(&metadata.name) {
            return Err(CoreError::ConfigurationError(format!(
                "field '{}' is already registered on '{type_name}'",
                metadata.name
            )));
        }

        object.fields.insert(metadata.name.clone(), metadata);
        Ok(self)
    }
}

fn owned_path(path: &[&str]) -> Vec<String> {
    path.iter().map(|s| s.to_string()).collect()
}
