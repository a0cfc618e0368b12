use std::collections::BTreeMap;

use futures::future::{BoxFuture, FutureExt};
use model_structure::{Cardinality, Entity, ForeignKey, LoadedRelation, Relation, RelationTarget, Value};

use super::field_map::{AttributeBinding, MutationFieldMap, NestedFieldMap, NullBehavior};
use super::input::{InputMap, InputValue};
use super::{ChangeAction, ChangeRecord, PathSegment};
use crate::hooks::RequestContext;
use crate::resolver::resolve;
use crate::CoreError;

/// The input key naming fields to be explicitly unset in leave-unchanged
/// mode.
const UNSET_FIELDS: &str = "unsetFields";

/// How one declared field resolved against the input document, after the
/// map's null behavior has been applied.
enum Resolved<'i> {
    /// Skip the field entirely.
    Absent,
    /// Treat the field as explicitly null.
    Null,
    Value(&'i InputValue),
}

/// Maps a nested input document onto a flat list of change records, mutating
/// the touched entities in memory as it goes. Nothing is persisted here.
///
/// Flat attributes are diffed by value equality, so re-applying an unchanged
/// document yields no update records. Nested inputs are matched to existing
/// related entities positionally or by declared key fields, and every
/// recursive record carries the input-document path it originated from.
pub fn apply_changes<'a>(
    ctx: &'a RequestContext,
    map: &'a MutationFieldMap,
    entity: Entity,
    input: &'a InputMap,
    prefix: Vec<PathSegment>,
) -> BoxFuture<'a, crate::Result<Vec<ChangeRecord>>> {
    async move {
        let mut changes = Vec::new();

        if entity.is_new_record() {
            changes.push(ChangeRecord {
                entity: entity.clone(),
                action: ChangeAction::Create,
                attribute: None,
                input_path: prefix.clone(),
            });
        }

        let unset = match map.null_behavior {
            NullBehavior::LeaveUnchanged => input.string_list(UNSET_FIELDS)?,
            NullBehavior::SetNull => vec![],
        };

        for binding in &map.attributes {
            match resolve_presence(map.null_behavior, input, &unset, &binding.name) {
                Resolved::Absent => {}
                Resolved::Null => {
                    if binding.required {
                        return Err(CoreError::InputError(format!("'{}' is required", binding.name)));
                    }

                    let target = binding_target(ctx, &entity, binding, &prefix, &mut changes).await?;
                    apply_field_value(&target, binding, Value::Null, &prefix, &mut changes);
                }
                Resolved::Value(value) => {
                    let Some(scalar) = value.as_scalar() else {
                        return Err(CoreError::InputError(format!(
                            "'{}' expects a scalar value",
                            binding.name
                        )));
                    };

                    let resolved = if binding.resolves_identity {
                        resolve_identity_value(ctx, &binding.name, scalar).await?
                    } else {
                        scalar.clone()
                    };

                    let target = binding_target(ctx, &entity, binding, &prefix, &mut changes).await?;
                    apply_field_value(&target, binding, resolved, &prefix, &mut changes);
                }
            }
        }

        for nested in &map.nested {
            // Presence of the nested key is governed by the enclosing map;
            // the nested map's own null behavior applies inside its items.
            let resolved = resolve_presence(map.null_behavior, input, &unset, &nested.name);

            if matches!(resolved, Resolved::Absent) {
                continue;
            }

            if nested.required && matches!(resolved, Resolved::Null) {
                return Err(CoreError::InputError(format!("'{}' is required", nested.name)));
            }

            let mut path = prefix.clone();
            path.push(PathSegment::field(&nested.name));

            let base = if nested.path.is_empty() {
                entity.clone()
            } else {
                walk_target_path(ctx, &entity, &nested.path, path.clone(), &mut changes).await?
            };

            let model = base.model();
            let relation = model
                .find_relation(&nested.relation)
                .map_err(|err| CoreError::ConfigurationError(err.to_string()))?
                .clone();

            match relation.cardinality {
                Cardinality::One => {
                    apply_nested_one(ctx, nested, &relation, &base, resolved, path, &mut changes).await?;
                }
                Cardinality::Many => {
                    apply_nested_many(ctx, nested, &relation, &base, resolved, path, &mut changes).await?;
                }
            }
        }

        Ok(changes)
    }
    .boxed()
}

fn resolve_presence<'i>(
    behavior: NullBehavior,
    input: &'i InputMap,
    unset: &[String],
    name: &str,
) -> Resolved<'i> {
    if let Some(value) = input.get(name) {
        if !value.is_null() {
            return Resolved::Value(value);
        }
    }

    match behavior {
        NullBehavior::SetNull => Resolved::Null,
        NullBehavior::LeaveUnchanged => {
            // Absent and explicit-null fields are both skipped; only the
            // `unsetFields` list can unset a value in this mode.
            if unset.iter().any(|field| field == name) {
                Resolved::Null
            } else {
                Resolved::Absent
            }
        }
    }
}

/// The entity a binding writes to: the root itself for an empty target path,
/// otherwise the entity reached by walking the path from the root.
async fn binding_target(
    ctx: &RequestContext,
    root: &Entity,
    binding: &AttributeBinding,
    prefix: &[PathSegment],
    changes: &mut Vec<ChangeRecord>,
) -> crate::Result<Entity> {
    if binding.path.is_empty() {
        return Ok(root.clone());
    }

    let mut input_path = prefix.to_vec();
    input_path.push(PathSegment::field(&binding.name));

    walk_target_path(ctx, root, &binding.path, input_path, changes).await
}

/// Walks a declared target path from the root, creating missing intermediate
/// entities as it goes. Implied creates carry the input path of the field
/// that triggered them.
async fn walk_target_path(
    ctx: &RequestContext,
    root: &Entity,
    path: &[String],
    input_path: Vec<PathSegment>,
    changes: &mut Vec<ChangeRecord>,
) -> crate::Result<Entity> {
    let mut current = root.clone();

    for segment in path {
        let model = current.model();
        let relation = model
            .find_relation(segment)
            .map_err(|err| CoreError::ConfigurationError(err.to_string()))?
            .clone();

        if relation.cardinality != Cardinality::One {
            return Err(CoreError::ConfigurationError(format!(
                "target path hop '{segment}' is collection-valued"
            )));
        }

        current = match existing_one(ctx, &current, &relation).await? {
            Some(next) => next,
            None => {
                let RelationTarget::Model(target_model) = &relation.target else {
                    return Err(CoreError::ConfigurationError(format!(
                        "target path hop '{segment}' is polymorphic"
                    )));
                };
                let target_model = target_model.clone();

                let child = build_child(ctx, &current, &relation, &target_model)?;

                changes.push(ChangeRecord {
                    entity: child.clone(),
                    action: ChangeAction::Create,
                    attribute: None,
                    input_path: input_path.clone(),
                });

                link_owned_foreign_key(&current, &relation, &child, input_path.clone(), changes);
                child
            }
        };
    }

    Ok(current)
}

/// Writes one attribute value onto the entity when it differs from the
/// current value, recording the change.
fn apply_field_value(
    entity: &Entity,
    binding: &AttributeBinding,
    value: Value,
    prefix: &[PathSegment],
    changes: &mut Vec<ChangeRecord>,
) {
    let current = entity.get(&binding.attribute).unwrap_or(Value::Null);

    if current == value {
        return;
    }

    entity.set(&binding.attribute, value);

    let mut input_path = prefix.to_vec();
    input_path.push(PathSegment::field(&binding.name));

    changes.push(ChangeRecord {
        entity: entity.clone(),
        action: if entity.is_new_record() {
            ChangeAction::Create
        } else {
            ChangeAction::Update
        },
        attribute: Some(binding.attribute.clone()),
        input_path,
    });
}

/// Translates a global-ID scalar into the referenced entity's primary key.
/// An unresolvable ID is a hard input error for the field.
async fn resolve_identity_value(ctx: &RequestContext, name: &str, value: &Value) -> crate::Result<Value> {
    let Value::String(id) = value else {
        return Err(CoreError::InputError(format!("'{name}' expects a global ID")));
    };

    let entity = ctx
        .identity()
        .resolve_global_id(id)
        .await?
        .ok_or_else(|| CoreError::InputError(format!("'{name}': could not resolve '{id}'")))?;

    entity
        .id()
        .ok_or_else(|| CoreError::InputError(format!("'{name}': '{id}' refers to an unsaved entity")))
}

async fn apply_nested_one(
    ctx: &RequestContext,
    nested: &NestedFieldMap,
    relation: &Relation,
    entity: &Entity,
    resolved: Resolved<'_>,
    path: Vec<PathSegment>,
    changes: &mut Vec<ChangeRecord>,
) -> crate::Result<()> {
    match resolved {
        Resolved::Absent => Ok(()),
        Resolved::Null => {
            if let Some(child) = existing_one(ctx, entity, relation).await? {
                child.mark_for_destruction();
                entity.set_loaded_relation(&relation.name, LoadedRelation::One(None));

                changes.push(ChangeRecord {
                    entity: child,
                    action: ChangeAction::Destroy,
                    attribute: None,
                    input_path: path.clone(),
                });

                unlink_owned_foreign_key(entity, relation, path, changes);
            }

            Ok(())
        }
        Resolved::Value(value) => {
            let Some(child_input) = value.as_object() else {
                return Err(CoreError::InputError(format!(
                    "'{}' expects a nested object",
                    nested.name
                )));
            };

            let child = match existing_one(ctx, entity, relation).await? {
                Some(child) => child,
                None => build_child(ctx, entity, relation, &nested.map.model)?,
            };

            let child_changes = apply_changes(ctx, &nested.map, child.clone(), child_input, path.clone()).await?;
            changes.extend(child_changes);

            link_owned_foreign_key(entity, relation, &child, path, changes);
            Ok(())
        }
    }
}

/// When the enclosing entity owns the foreign key of a nested relation, the
/// linkage itself is part of the change-set: the parent must be visited by
/// the persister so the child's key (possibly only assigned at save time)
/// lands in the foreign-key attribute.
fn link_owned_foreign_key(
    entity: &Entity,
    relation: &Relation,
    child: &Entity,
    path: Vec<PathSegment>,
    changes: &mut Vec<ChangeRecord>,
) {
    let ForeignKey::Source { field } = &relation.foreign_key else {
        return;
    };

    let needs_link = match child.id() {
        None => true,
        Some(id) => entity.get(field).unwrap_or(Value::Null) != id,
    };

    if !needs_link {
        return;
    }

    if let Some(id) = child.id() {
        entity.set(field, id);
    }

    changes.push(ChangeRecord {
        entity: entity.clone(),
        action: if entity.is_new_record() {
            ChangeAction::Create
        } else {
            ChangeAction::Update
        },
        attribute: Some(field.clone()),
        input_path: path,
    });
}

fn unlink_owned_foreign_key(
    entity: &Entity,
    relation: &Relation,
    path: Vec<PathSegment>,
    changes: &mut Vec<ChangeRecord>,
) {
    let ForeignKey::Source { field } = &relation.foreign_key else {
        return;
    };

    if entity.get(field).unwrap_or(Value::Null).is_null() {
        return;
    }

    entity.set(field, Value::Null);

    changes.push(ChangeRecord {
        entity: entity.clone(),
        action: if entity.is_new_record() {
            ChangeAction::Create
        } else {
            ChangeAction::Update
        },
        attribute: Some(field.clone()),
        input_path: path,
    });
}

async fn apply_nested_many(
    ctx: &RequestContext,
    nested: &NestedFieldMap,
    relation: &Relation,
    entity: &Entity,
    resolved: Resolved<'_>,
    path: Vec<PathSegment>,
    changes: &mut Vec<ChangeRecord>,
) -> crate::Result<()> {
    let items: Vec<&InputValue> = match resolved {
        Resolved::Absent => return Ok(()),
        Resolved::Null => vec![],
        Resolved::Value(value) => {
            let Some(items) = value.as_list() else {
                return Err(CoreError::InputError(format!("'{}' expects a list", nested.name)));
            };

            items.iter().collect()
        }
    };

    let existing = existing_many(ctx, entity, relation).await?;

    if nested.find_by.is_empty() {
        apply_positional(ctx, nested, relation, entity, &existing, &items, path, changes).await
    } else {
        apply_keyed(ctx, nested, relation, entity, &existing, &items, path, changes).await
    }
}

/// Pairs input items with existing children by index. Excess existing
/// children are destroyed, excess input items build new children.
#[allow(clippy::too_many_arguments)]
async fn apply_positional(
    ctx: &RequestContext,
    nested: &NestedFieldMap,
    relation: &Relation,
    entity: &Entity,
    existing: &[Entity],
    items: &[&InputValue],
    path: Vec<PathSegment>,
    changes: &mut Vec<ChangeRecord>,
) -> crate::Result<()> {
    let len = existing.len().max(items.len());

    for idx in 0..len {
        let mut item_path = path.clone();
        item_path.push(PathSegment::Index(idx));

        match (existing.get(idx), items.get(idx)) {
            (Some(child), Some(item)) => {
                let child_input = object_item(&nested.name, item)?;
                let child_changes = apply_changes(ctx, &nested.map, child.clone(), child_input, item_path).await?;
                changes.extend(child_changes);
            }
            (Some(child), None) => {
                child.mark_for_destruction();
                changes.push(ChangeRecord {
                    entity: child.clone(),
                    action: ChangeAction::Destroy,
                    attribute: None,
                    input_path: item_path,
                });
            }
            (None, Some(item)) => {
                let child_input = object_item(&nested.name, item)?;
                let child = build_child(ctx, entity, relation, &nested.map.model)?;
                let child_changes = apply_changes(ctx, &nested.map, child, child_input, item_path).await?;
                changes.extend(child_changes);
            }
            (None, None) => unreachable!("index bounded by max of both lengths"),
        }
    }

    Ok(())
}

/// Matches input items to existing children by the declared key fields.
/// Children whose key has no input are destroyed; inputs whose key has no
/// child build new children; matched pairs recurse.
#[allow(clippy::too_many_arguments)]
async fn apply_keyed(
    ctx: &RequestContext,
    nested: &NestedFieldMap,
    relation: &Relation,
    entity: &Entity,
    existing: &[Entity],
    items: &[&InputValue],
    path: Vec<PathSegment>,
    changes: &mut Vec<ChangeRecord>,
) -> crate::Result<()> {
    let mut input_keys: Vec<(BTreeMap<String, Value>, usize, &InputMap)> = Vec::new();

    for (idx, item) in items.iter().enumerate() {
        let child_input = object_item(&nested.name, item)?;
        let key = input_key(ctx, nested, child_input).await?;
        input_keys.push((key, idx, child_input));
    }

    let mut matched_inputs = vec![false; input_keys.len()];

    for child in existing {
        let child_key = child.key_values(&nested.find_by);

        let matched = input_keys
            .iter()
            .enumerate()
            .find(|(pos, (key, _, _))| !matched_inputs[*pos] && *key == child_key)
            .map(|(pos, (_, idx, child_input))| (pos, *idx, *child_input));

        match matched {
            Some((pos, idx, child_input)) => {
                matched_inputs[pos] = true;

                let mut item_path = path.clone();
                item_path.push(PathSegment::Index(idx));

                let child_changes = apply_changes(ctx, &nested.map, child.clone(), child_input, item_path).await?;
                changes.extend(child_changes);
            }
            None => {
                child.mark_for_destruction();
                changes.push(ChangeRecord {
                    entity: child.clone(),
                    action: ChangeAction::Destroy,
                    attribute: None,
                    input_path: path.clone(),
                });
            }
        }
    }

    for (pos, (_, idx, child_input)) in input_keys.iter().enumerate() {
        if matched_inputs[pos] {
            continue;
        }

        let mut item_path = path.clone();
        item_path.push(PathSegment::Index(*idx));

        let child = build_child(ctx, entity, relation, &nested.map.model)?;
        let child_changes = apply_changes(ctx, &nested.map, child, child_input, item_path).await?;
        changes.extend(child_changes);
    }

    Ok(())
}

/// The match-key tuple of one input item: the declared key attributes read
/// from the input, with identity-typed key fields resolved to primary keys
/// first so they compare against stored foreign keys.
async fn input_key(
    ctx: &RequestContext,
    nested: &NestedFieldMap,
    item: &InputMap,
) -> crate::Result<BTreeMap<String, Value>> {
    let mut key = BTreeMap::new();

    for attribute in &nested.find_by {
        let binding = nested.map.binding_for_attribute(attribute);
        let input_name = binding.map(|b| b.name.as_str()).unwrap_or(attribute.as_str());

        let value = match item.get(input_name).and_then(InputValue::as_scalar) {
            None => Value::Null,
            Some(scalar) => {
                if binding.is_some_and(|b| b.resolves_identity) && !scalar.is_null() {
                    resolve_identity_value(ctx, input_name, scalar).await?
                } else {
                    scalar.clone()
                }
            }
        };

        key.insert(attribute.clone(), value);
    }

    Ok(key)
}

/// Constructs a new child entity for a nested create, wiring the foreign key
/// and inverse linkage that the relation implies, and recording it on the
/// parent's loaded relation state.
fn build_child(
    ctx: &RequestContext,
    parent: &Entity,
    relation: &Relation,
    target_model: &str,
) -> crate::Result<Entity> {
    let model = ctx.datamodel().find_model(target_model)?;
    let child = Entity::build(model);

    if let ForeignKey::Target { field, type_field } = &relation.foreign_key {
        if let Some(id) = parent.id() {
            child.set(field, id);
        }

        if let Some(tf) = type_field {
            child.set(tf, Value::String(parent.model_name()));
        }
    }

    // Back-link the parent so an unsaved parent's key can be flushed into the
    // child at persistence time.
    if let Some(inverse) = &relation.inverse {
        let child_model = child.model();

        match child_model.find_relation(inverse)?.cardinality {
            Cardinality::One => {
                child.set_loaded_relation(inverse, LoadedRelation::One(Some(parent.clone())));
            }
            Cardinality::Many => {
                child.push_to_loaded_relation(inverse, parent.clone());
            }
        }
    }

    match relation.cardinality {
        Cardinality::One => {
            parent.set_loaded_relation(&relation.name, LoadedRelation::One(Some(child.clone())));
        }
        Cardinality::Many => {
            parent.push_to_loaded_relation(&relation.name, child.clone());
        }
    }

    // A belongs-to style nested create stores the child's key on the parent;
    // the key itself is flushed by the persister once the child is saved, but
    // a polymorphic discriminator is known now.
    if matches!(relation.foreign_key, ForeignKey::Source { .. }) {
        if let RelationTarget::Polymorphic { type_field, .. } = &relation.target {
            parent.set(type_field, Value::String(child.model_name()));
        }
    }

    Ok(child)
}

async fn existing_one(ctx: &RequestContext, entity: &Entity, relation: &Relation) -> crate::Result<Option<Entity>> {
    if let Some(loaded) = entity.loaded_relation(&relation.name) {
        return Ok(loaded.entities().into_iter().next());
    }

    if entity.is_new_record() {
        return Ok(None);
    }

    Ok(resolve(ctx, entity.clone(), vec![relation.name.clone()]).await?.into_one())
}

async fn existing_many(ctx: &RequestContext, entity: &Entity, relation: &Relation) -> crate::Result<Vec<Entity>> {
    if let Some(loaded) = entity.loaded_relation(&relation.name) {
        return Ok(loaded.entities());
    }

    if entity.is_new_record() {
        return Ok(vec![]);
    }

    Ok(resolve(ctx, entity.clone(), vec![relation.name.clone()]).await?.entities())
}

fn object_item<'i>(field: &str, item: &'i InputValue) -> crate::Result<&'i InputMap> {
    item.as_object()
        .ok_or_else(|| CoreError::InputError(format!("'{field}' expects a list of nested objects")))
}
