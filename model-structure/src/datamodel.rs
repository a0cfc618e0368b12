use std::sync::Arc;

use crate::{Cardinality, DomainError, Model, ModelRef, Relation, RelationTarget};

/// The full set of model descriptors for one backing store. Built once at
/// startup and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Datamodel {
    models: Vec<ModelRef>,
}

impl Datamodel {
    pub fn models(&self) -> &[ModelRef] {
        &self.models
    }

    pub fn find_model(&self, name: &str) -> crate::Result<ModelRef> {
        self.models
            .iter()
            .find(|m| m.name == name)
            .cloned()
            .ok_or_else(|| DomainError::ModelNotFound { name: name.to_string() })
    }
}

/// Assembles and validates a [`Datamodel`]. All referential mistakes (unknown
/// relation targets, dangling through-hops, polymorphic relations without an
/// allow-list) fail here, at schema-build time.
#[derive(Debug, Default)]
pub struct DatamodelBuilder {
    models: Vec<Model>,
}

impl DatamodelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model: Model) -> Self {
        self.models.push(model);
        self
    }

    pub fn build(self) -> crate::Result<Datamodel> {
        let datamodel = Datamodel {
            models: self.models.into_iter().map(Arc::new).collect(),
        };

        for model in datamodel.models() {
            for relation in &model.relations {
                validate_relation(&datamodel, model, relation)?;
            }
        }

        Ok(datamodel)
    }
}

fn validate_relation(datamodel: &Datamodel, model: &Model, relation: &Relation) -> crate::Result<()> {
    match &relation.target {
        RelationTarget::Model(target) => {
            datamodel.find_model(target).map_err(|_| {
                DomainError::InvalidDatamodel(format!(
                    "relation '{}' on model '{}' points at unknown model '{}'",
                    relation.name, model.name, target
                ))
            })?;
        }
        RelationTarget::Polymorphic { type_field, allowed } => {
            if allowed.is_empty() {
                return Err(DomainError::InvalidDatamodel(format!(
                    "polymorphic relation '{}' on model '{}' must declare the allowed target types for '{}'",
                    relation.name, model.name, type_field
                )));
            }

            for target in allowed {
                datamodel.find_model(target).map_err(|_| {
                    DomainError::InvalidDatamodel(format!(
                        "polymorphic relation '{}' on model '{}' allows unknown model '{}'",
                        relation.name, model.name, target
                    ))
                })?;
            }

            model.find_field(type_field).map_err(|_| {
                DomainError::InvalidDatamodel(format!(
                    "polymorphic relation '{}' on model '{}' requires the discriminator field '{}'",
                    relation.name, model.name, type_field
                ))
            })?;
        }
    }

    if let Some(through) = &relation.through {
        let via = model.find_relation(&through.via).map_err(|_| {
            DomainError::InvalidDatamodel(format!(
                "through-relation '{}' on model '{}' references unknown relation '{}'",
                relation.name, model.name, through.via
            ))
        })?;

        let intermediate = match &via.target {
            RelationTarget::Model(name) => datamodel.find_model(name)?,
            RelationTarget::Polymorphic { .. } => {
                return Err(DomainError::InvalidDatamodel(format!(
                    "through-relation '{}' on model '{}' cannot pass through polymorphic relation '{}'",
                    relation.name, model.name, through.via
                )));
            }
        };

        intermediate.find_relation(&through.source).map_err(|_| {
            DomainError::InvalidDatamodel(format!(
                "through-relation '{}' on model '{}' references unknown relation '{}' on model '{}'",
                relation.name, model.name, through.source, intermediate.name
            ))
        })?;

        if relation.cardinality == Cardinality::One && via.cardinality == Cardinality::Many {
            return Err(DomainError::InvalidDatamodel(format!(
                "through-relation '{}' on model '{}' is single-valued but passes through a collection",
                relation.name, model.name
            )));
        }
    }

    Ok(())
}
