use model_structure::{Cardinality, Datamodel, ModelRef, RelationTarget};

use crate::CoreError;

/// How absent input fields are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullBehavior {
    /// Absent and explicit-null fields are skipped, except those named in the
    /// input's `unsetFields` list, which are treated as explicit nulls.
    #[default]
    LeaveUnchanged,

    /// Any declared field absent from the input is treated as supplied null.
    SetNull,
}

/// One flat attribute accepted by a mutation: the input field name, the
/// entity attribute it writes, and whether the supplied value is a global ID
/// that must be resolved to a primary key first.
#[derive(Debug, Clone)]
pub struct AttributeBinding {
    pub name: String,
    pub attribute: String,
    /// Single-valued relation hops from the input's root entity to the
    /// entity owning the attribute. Empty for attributes of the root itself;
    /// missing intermediates are created when the field is applied.
    pub path: Vec<String>,
    pub resolves_identity: bool,
    pub required: bool,
}

/// One nested relation accepted by a mutation, carrying its own field map.
/// An empty `find_by` selects positional matching for collections; a
/// non-empty one selects keyed matching.
#[derive(Debug, Clone)]
pub struct NestedFieldMap {
    pub name: String,
    pub relation: String,
    /// Single-valued relation hops from the root to the entity owning the
    /// relation, as for [`AttributeBinding::path`].
    pub path: Vec<String>,
    pub find_by: Vec<String>,
    pub required: bool,
    pub map: MutationFieldMap,
}

/// The static declaration of what one mutation accepts for one model type:
/// flat attribute bindings plus nested maps for owned relations. Built at
/// schema-definition time, immutable during execution.
#[derive(Debug, Clone)]
pub struct MutationFieldMap {
    pub model: String,
    pub null_behavior: NullBehavior,
    pub attributes: Vec<AttributeBinding>,
    pub nested: Vec<NestedFieldMap>,
}

impl MutationFieldMap {
    pub fn new(model: impl Into<String>, null_behavior: NullBehavior) -> Self {
        MutationFieldMap {
            model: model.into(),
            null_behavior,
            attributes: Vec::new(),
            nested: Vec::new(),
        }
    }

    /// Declares an input field written straight to the same-named attribute.
    pub fn attribute(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.attributes.push(AttributeBinding {
            attribute: name.clone(),
            name,
            path: vec![],
            resolves_identity: false,
            required: false,
        });
        self
    }

    /// Declares an input field written to a differently-named attribute.
    pub fn attribute_as(mut self, name: impl Into<String>, attribute: impl Into<String>) -> Self {
        self.attributes.push(AttributeBinding {
            name: name.into(),
            attribute: attribute.into(),
            path: vec![],
            resolves_identity: false,
            required: false,
        });
        self
    }

    /// Declares an input field written to an attribute of a related entity,
    /// reached through a path of single-valued relations from the root.
    pub fn attribute_on(mut self, name: impl Into<String>, path: &[&str], attribute: impl Into<String>) -> Self {
        self.attributes.push(AttributeBinding {
            name: name.into(),
            attribute: attribute.into(),
            path: owned_strings(path),
            resolves_identity: false,
            required: false,
        });
        self
    }

    /// Declares a global-ID input field resolved to a primary key before
    /// being written.
    pub fn identity_attribute(mut self, name: impl Into<String>, attribute: impl Into<String>) -> Self {
        self.attributes.push(AttributeBinding {
            name: name.into(),
            attribute: attribute.into(),
            path: vec![],
            resolves_identity: true,
            required: false,
        });
        self
    }

    pub fn required(mut self) -> Self {
        if let Some(last) = self.attributes.last_mut() {
            last.required = true;
        }
        self
    }

    /// Marks the most recently declared nested relation as required: explicit
    /// null input for it is rejected.
    pub fn required_nested(mut self) -> Self {
        if let Some(last) = self.nested.last_mut() {
            last.required = true;
        }
        self
    }

    /// Declares a nested relation. `find_by` chooses the collection matching
    /// strategy: empty for positional, key attribute names for keyed.
    pub fn nested(
        self,
        name: impl Into<String>,
        relation: impl Into<String>,
        find_by: &[&str],
        map: MutationFieldMap,
    ) -> Self {
        self.nested_on(name, &[], relation, find_by, map)
    }

    /// Declares a nested relation owned by an entity reached through a path
    /// of single-valued relations from the root.
    pub fn nested_on(
        mut self,
        name: impl Into<String>,
        path: &[&str],
        relation: impl Into<String>,
        find_by: &[&str],
        mut map: MutationFieldMap,
    ) -> Self {
        // Key fields are part of the accepted input even when the nested map
        // does not declare them itself, so created children carry their key.
        for key in find_by {
            if map.binding_for_attribute(key).is_none() {
                map = map.attribute(*key);
            }
        }

        self.nested.push(NestedFieldMap {
            name: name.into(),
            relation: relation.into(),
            path: owned_strings(path),
            find_by: owned_strings(find_by),
            required: false,
            map,
        });
        self
    }

    pub fn nested_map(&self, name: &str) -> Option<&NestedFieldMap> {
        self.nested.iter().find(|nested| nested.name == name)
    }

    pub fn binding(&self, name: &str) -> Option<&AttributeBinding> {
        self.attributes.iter().find(|binding| binding.name == name)
    }

    pub fn binding_for_attribute(&self, attribute: &str) -> Option<&AttributeBinding> {
        self.attributes.iter().find(|binding| binding.attribute == attribute)
    }

    /// Checks the whole map tree against the datamodel: models, attributes,
    /// target paths, relations and find-by keys must all exist, and
    /// single-valued relations must not declare find-by keys. Intended to
    /// run at startup.
    pub fn validate(&self, datamodel: &Datamodel) -> crate::Result<()> {
        let model = datamodel
            .find_model(&self.model)
            .map_err(|err| CoreError::ConfigurationError(err.to_string()))?;

        for binding in &self.attributes {
            let owner = walk_target_path(datamodel, &model, &binding.path, &binding.name)?;

            owner
                .find_field(&binding.attribute)
                .map_err(|err| CoreError::ConfigurationError(err.to_string()))?;
        }

        for nested in &self.nested {
            let base = walk_target_path(datamodel, &model, &nested.path, &nested.name)?;

            let relation = base
                .find_relation(&nested.relation)
                .map_err(|err| CoreError::ConfigurationError(err.to_string()))?;

            if relation.cardinality == Cardinality::One && !nested.find_by.is_empty() {
                return Err(CoreError::ConfigurationError(format!(
                    "nested map '{}' declares find-by keys on a single-valued relation",
                    nested.name
                )));
            }

            let target = datamodel
                .find_model(&nested.map.model)
                .map_err(|err| CoreError::ConfigurationError(err.to_string()))?;

            for key in &nested.find_by {
                target
                    .find_field(key)
                    .map_err(|err| CoreError::ConfigurationError(err.to_string()))?;
            }

            nested.map.validate(datamodel)?;
        }

        Ok(())
    }
}

/// Follows a declared target path, checking every hop is a single-valued
/// relation with a statically known target model.
fn walk_target_path(
    datamodel: &Datamodel,
    start: &ModelRef,
    path: &[String],
    declaration: &str,
) -> crate::Result<ModelRef> {
    let mut current = start.clone();

    for segment in path {
        let relation = current
            .find_relation(segment)
            .map_err(|err| CoreError::ConfigurationError(format!("'{declaration}': {err}")))?;

        if relation.cardinality != Cardinality::One {
            return Err(CoreError::ConfigurationError(format!(
                "'{declaration}': target path hop '{segment}' is collection-valued"
            )));
        }

        let RelationTarget::Model(target) = &relation.target else {
            return Err(CoreError::ConfigurationError(format!(
                "'{declaration}': target path hop '{segment}' is polymorphic"
            )));
        };
        let target = target.clone();

        current = datamodel
            .find_model(&target)
            .map_err(|err| CoreError::ConfigurationError(err.to_string()))?;
    }

    Ok(current)
}

fn owned_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
