use std::collections::HashSet;

use model_structure::{Entity, EntityId, Value};
use serde::Serialize;
use thiserror::Error;

use super::field_map::MutationFieldMap;
use super::{ChangeRecord, PathSegment};
use crate::hooks::RequestContext;

/// Aggregated entity-validation failures for one mutation, with every
/// failure attributed to the input-document location that caused it when one
/// can be found.
#[derive(Debug, Clone, Default, Error, Serialize)]
#[error("Some of your changes could not be saved.")]
pub struct ValidationError {
    /// Nested map mirroring the input document shape; array indices appear
    /// as decimal keys. Leaves are lists of messages.
    #[serde(rename = "invalidArguments")]
    pub invalid_fields: serde_json::Map<String, serde_json::Value>,

    /// Failures whose input location could not be determined.
    #[serde(rename = "unknownErrors")]
    pub unknown_errors: Vec<UnknownError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnknownError {
    pub model: String,
    pub id: Option<Value>,
    pub attribute: String,
    pub message: String,
}

impl ValidationError {
    pub fn is_empty(&self) -> bool {
        self.invalid_fields.is_empty() && self.unknown_errors.is_empty()
    }

    fn add(&mut self, path: &[PathSegment], message: &str) {
        let Some((leaf, parents)) = path.split_last() else {
            return;
        };

        let mut node = &mut self.invalid_fields;

        for segment in parents {
            let entry = node
                .entry(segment.to_string())
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));

            // A parent segment that previously held a leaf is widened into a
            // node; the leaf messages are dropped in favor of the more
            // precise nested ones.
            if !entry.is_object() {
                *entry = serde_json::Value::Object(serde_json::Map::new());
            }

            match entry {
                serde_json::Value::Object(inner) => node = inner,
                _ => return,
            }
        }

        let leaf_entry = node
            .entry(leaf.to_string())
            .or_insert_with(|| serde_json::Value::Array(vec![]));

        match leaf_entry.as_array_mut() {
            Some(messages) => messages.push(serde_json::Value::String(message.to_string())),
            None => {
                *leaf_entry = serde_json::Value::Array(vec![serde_json::Value::String(message.to_string())]);
            }
        }
    }

    /// The messages recorded at an exact input path, for inspection.
    pub fn messages_at(&self, path: &[PathSegment]) -> Vec<String> {
        let Some((leaf, parents)) = path.split_last() else {
            return vec![];
        };

        let mut node = &self.invalid_fields;

        for segment in parents {
            match node.get(&segment.to_string()).and_then(|v| v.as_object()) {
                Some(inner) => node = inner,
                None => return vec![],
            }
        }

        node.get(&leaf.to_string())
            .and_then(|v| v.as_array())
            .map(|messages| {
                messages
                    .iter()
                    .filter_map(|m| m.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Validates every entity the change-set touches and attributes each failure
/// to its input-document path.
///
/// Attribution tries a direct lookup first: a change record on the same
/// entity for the failing attribute already carries the exact path. When the
/// failing attribute was not itself supplied (cross-field validations), the
/// field-map/entity tree is re-walked by object identity to find where the
/// entity entered the input document. Failures that cannot be located either
/// way land in the unknown-error bucket.
pub fn validate_changes(
    ctx: &RequestContext,
    map: &MutationFieldMap,
    root: &Entity,
    changes: &[ChangeRecord],
) -> crate::Result<()> {
    let mut error = ValidationError::default();
    let mut seen: HashSet<EntityId> = HashSet::new();

    for change in changes {
        if !seen.insert(change.entity.entity_id()) {
            continue;
        }

        // Entities on their way out are not validated.
        if change.entity.is_marked_for_destruction() {
            continue;
        }

        for failure in ctx.validator().validate(&change.entity) {
            let direct = changes
                .iter()
                .find(|c| c.entity.same_as(&change.entity) && c.attribute.as_deref() == Some(&failure.attribute))
                .map(|c| c.input_path.clone());

            let path = direct.or_else(|| detect_input_path(map, root, &change.entity, &failure.attribute));

            match path {
                Some(path) => error.add(&path, &failure.message),
                None => error.unknown_errors.push(UnknownError {
                    model: change.entity.model_name(),
                    id: change.entity.id(),
                    attribute: failure.attribute,
                    message: failure.message,
                }),
            }
        }
    }

    if error.is_empty() {
        Ok(())
    } else {
        Err(error.into())
    }
}

/// Re-walks the field-map tree alongside the in-memory entity graph, looking
/// for the place where `target` was reached, then maps the failing attribute
/// back to the input field that declares it.
fn detect_input_path(
    map: &MutationFieldMap,
    current: &Entity,
    target: &Entity,
    attribute: &str,
) -> Option<Vec<PathSegment>> {
    if current.same_as(target) {
        let binding = map.binding_for_attribute(attribute)?;
        return Some(vec![PathSegment::field(&binding.name)]);
    }

    for nested in &map.nested {
        let Some(loaded) = current.loaded_relation(&nested.relation) else {
            continue;
        };

        match loaded {
            model_structure::LoadedRelation::One(Some(child)) => {
                if let Some(sub) = detect_input_path(&nested.map, &child, target, attribute) {
                    let mut path = vec![PathSegment::field(&nested.name)];
                    path.extend(sub);
                    return Some(path);
                }
            }
            model_structure::LoadedRelation::One(None) => {}
            model_structure::LoadedRelation::Many(children) => {
                for (idx, child) in children.iter().enumerate() {
                    if let Some(sub) = detect_input_path(&nested.map, child, target, attribute) {
                        let mut path = vec![PathSegment::field(&nested.name), PathSegment::Index(idx)];
                        path.extend(sub);
                        return Some(path);
                    }
                }
            }
        }
    }

    None
}
