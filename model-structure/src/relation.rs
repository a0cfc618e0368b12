use crate::OrderBy;

/// Static metadata for a named relation between two model types.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub name: String,
    pub cardinality: Cardinality,
    pub target: RelationTarget,
    pub foreign_key: ForeignKey,

    /// Whether a single-valued relation may legitimately resolve to nothing.
    pub nullable: bool,

    /// Name of the inverse relation on the target model, when declared.
    /// Used to back-link loaded and freshly built entities.
    pub inverse: Option<String>,

    /// Two-hop decomposition for relations reached through an intermediate
    /// relation: `via` names the relation on the source model, `source` the
    /// relation on the intermediate model.
    pub through: Option<Through>,

    /// Default ordering applied whenever the relation is loaded as a set.
    pub order_by: Vec<OrderBy>,
}

impl Relation {
    pub fn is_single(&self) -> bool {
        self.cardinality == Cardinality::One
    }

    pub fn is_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }

    /// True when the foreign key lives on the source model (belongs-to style).
    pub fn owns_foreign_key(&self) -> bool {
        matches!(self.foreign_key, ForeignKey::Source { .. })
    }

    pub fn is_polymorphic(&self) -> bool {
        match (&self.target, &self.foreign_key) {
            (RelationTarget::Polymorphic { .. }, _) => true,
            (_, ForeignKey::Target { type_field: Some(_), .. }) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    One,
    Many,
}

/// Which side of the relation stores the foreign key.
#[derive(Debug, Clone, PartialEq)]
pub enum ForeignKey {
    /// The source model stores the target's primary key (belongs-to).
    Source { field: String },

    /// The target model stores the source's primary key (has-one/has-many).
    /// `type_field` is set when the target side is a polymorphic inverse and
    /// additionally stores the source's type tag.
    Target { field: String, type_field: Option<String> },
}

impl ForeignKey {
    pub fn field(&self) -> &str {
        match self {
            ForeignKey::Source { field } => field,
            ForeignKey::Target { field, .. } => field,
        }
    }
}

/// The type(s) a relation can point at.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationTarget {
    /// Fixed target model.
    Model(String),

    /// The target type varies per row: `type_field` on the source model names
    /// the concrete model, restricted to the closed `allowed` set.
    Polymorphic { type_field: String, allowed: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Through {
    pub via: String,
    pub source: String,
}
