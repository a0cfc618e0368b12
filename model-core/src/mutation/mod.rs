mod apply;
mod authorize;
mod field_map;
mod input;
mod mutator;
mod persist;
mod validate;

use std::fmt;

use model_structure::Entity;

pub use apply::apply_changes;
pub use authorize::authorize_changes;
pub use field_map::{AttributeBinding, MutationFieldMap, NestedFieldMap, NullBehavior};
pub use input::{InputMap, InputValue};
pub use mutator::Mutator;
pub use persist::persist_changes;
pub use validate::{validate_changes, UnknownError, ValidationError};

/// One atomic effect a mutation has on one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeAction {
    Create,
    Update,
    Destroy,
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Destroy => "destroy",
        };

        f.write_str(label)
    }
}

/// One step of the location of an input token inside the nested input
/// document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

impl PathSegment {
    pub fn field(name: impl Into<String>) -> Self {
        PathSegment::Field(name.into())
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Field(name) => f.write_str(name),
            PathSegment::Index(idx) => write!(f, "{idx}"),
        }
    }
}

/// A change-set entry: the entity it touches, what happens to it, the
/// attribute involved for value changes, and where in the input document the
/// change originated (for error attribution).
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    pub entity: Entity,
    pub action: ChangeAction,
    pub attribute: Option<String>,
    pub input_path: Vec<PathSegment>,
}
