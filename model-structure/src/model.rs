use std::fmt;
use std::sync::Arc;

use crate::{DomainError, Relation, ScalarField};

pub type ModelRef = Arc<Model>;

/// Static description of one persistent model type.
#[derive(Clone, PartialEq)]
pub struct Model {
    pub name: String,
    pub primary_key: String,
    pub fields: Vec<ScalarField>,
    pub relations: Vec<Relation>,
}

impl Model {
    pub fn find_field(&self, name: &str) -> crate::Result<&ScalarField> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| DomainError::FieldNotFound {
                name: name.to_string(),
                model: self.name.clone(),
            })
    }

    pub fn find_relation(&self, name: &str) -> crate::Result<&Relation> {
        self.relations
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| DomainError::RelationNotFound {
                name: name.to_string(),
                model: self.name.clone(),
            })
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Model").field(&self.name).finish()
    }
}
