use futures::future::{try_join_all, BoxFuture, FutureExt};
use model_connector::Filter;
use model_structure::{Entity, LoadedRelation, Relation, RelationTarget, Value};

use crate::hooks::RequestContext;
use crate::loader::LoadRequest;
use crate::CoreError;

/// The entity (or collection, or nothing) found at the end of a relation
/// path.
#[derive(Debug, Clone)]
pub enum ResolvedAssociation {
    One(Option<Entity>),
    Many(Vec<Entity>),
}

impl ResolvedAssociation {
    pub fn entities(&self) -> Vec<Entity> {
        match self {
            ResolvedAssociation::One(Some(e)) => vec![e.clone()],
            ResolvedAssociation::One(None) => vec![],
            ResolvedAssociation::Many(many) => many.clone(),
        }
    }

    pub fn into_one(self) -> Option<Entity> {
        match self {
            ResolvedAssociation::One(one) => one,
            ResolvedAssociation::Many(mut many) => {
                if many.is_empty() {
                    None
                } else {
                    Some(many.remove(0))
                }
            }
        }
    }
}

/// Walks a path of relation names from a starting entity, one hop at a time.
///
/// Each hop tries the cheap paths first: a relation that is already loaded in
/// memory is consumed directly, and single-valued relations are bound from
/// the request-scope cache when the implied match condition finds an entity
/// there. Only when neither applies is a [`LoadRequest`] submitted, which
/// suspends this resolution until the executor flushes the owning batch.
///
/// A null or empty intermediate short-circuits the rest of the path. Every
/// entity touched along the way is registered in the request scope.
pub fn resolve<'a>(
    ctx: &'a RequestContext,
    start: Entity,
    path: Vec<String>,
) -> BoxFuture<'a, crate::Result<ResolvedAssociation>> {
    async move {
        let mut current = ctx.scope().retain(start);
        let mut remaining = path.as_slice();

        loop {
            let Some(segment) = remaining.first() else {
                return Ok(ResolvedAssociation::One(Some(current)));
            };

            let model = current.model();
            let relation = model
                .find_relation(segment)
                .map_err(|err| CoreError::ConfigurationError(err.to_string()))?
                .clone();

            let loaded = match current.loaded_relation(&relation.name) {
                Some(loaded) => loaded,
                None => match attempt_cache_load(ctx, &current, &relation)? {
                    Some(loaded) => loaded,
                    None => load_hop(ctx, &current, &relation).await?,
                },
            };

            match loaded {
                LoadedRelation::One(None) => return Ok(ResolvedAssociation::One(None)),
                LoadedRelation::One(Some(next)) => {
                    current = ctx.scope().retain(next);
                    remaining = &remaining[1..];

                    if remaining.is_empty() {
                        return Ok(ResolvedAssociation::One(Some(current)));
                    }
                }
                LoadedRelation::Many(entities) => {
                    if remaining.len() > 1 {
                        return Err(CoreError::ConfigurationError(format!(
                            "cannot traverse relation '{}' mid-path: it is collection-valued",
                            relation.name
                        )));
                    }

                    let entities: Vec<Entity> = entities.into_iter().map(|e| ctx.scope().retain(e)).collect();

                    return Ok(ResolvedAssociation::Many(entities));
                }
            }
        }
    }
    .boxed()
}

/// Tries to bind a single-valued relation from entities already in the
/// request scope, without any I/O. Returns `None` when the cache cannot
/// answer and a load is required.
fn attempt_cache_load(
    ctx: &RequestContext,
    current: &Entity,
    relation: &Relation,
) -> crate::Result<Option<LoadedRelation>> {
    if !relation.is_single() || relation.through.is_some() {
        return Ok(None);
    }

    match &relation.foreign_key {
        model_structure::ForeignKey::Source { field } => {
            let foreign_key = current.get(field).unwrap_or(Value::Null);

            // No foreign key means no associated entity; that is an answer.
            if foreign_key.is_null() {
                let loaded = LoadedRelation::One(None);
                current.set_loaded_relation(&relation.name, loaded.clone());
                return Ok(Some(loaded));
            }

            let Some(target_model) = target_model_name(current, relation)? else {
                let loaded = LoadedRelation::One(None);
                current.set_loaded_relation(&relation.name, loaded.clone());
                return Ok(Some(loaded));
            };

            match ctx.scope().get(&target_model, &foreign_key) {
                Some(target) => {
                    let loaded = LoadedRelation::One(Some(target));
                    link_loaded(current, relation, &loaded);
                    Ok(Some(loaded))
                }
                None => Ok(None),
            }
        }
        model_structure::ForeignKey::Target { field, type_field } => {
            // No row can reference an entity that has never been saved.
            let Some(id) = current.id() else {
                let loaded = LoadedRelation::One(None);
                current.set_loaded_relation(&relation.name, loaded.clone());
                return Ok(Some(loaded));
            };

            let Some(target_model) = target_model_name(current, relation)? else {
                return Ok(None);
            };

            let model_name = current.model_name();
            let target = ctx.scope().find_match(&target_model, |candidate| {
                let fk_matches = candidate.get(field).as_ref() == Some(&id);
                let type_matches = type_field
                    .as_ref()
                    .is_none_or(|tf| candidate.get(tf) == Some(Value::String(model_name.clone())));

                fk_matches && type_matches
            });

            match target {
                Some(target) => {
                    let loaded = LoadedRelation::One(Some(target));
                    link_loaded(current, relation, &loaded);
                    Ok(Some(loaded))
                }
                None => Ok(None),
            }
        }
    }
}

/// Loads one hop through the batcher, suspending until the batch executes.
/// Through-relations are decomposed: the intermediate relation is resolved
/// fully first, then the terminal relation once per intermediate result, and
/// the results are flattened and de-duplicated.
async fn load_hop(ctx: &RequestContext, current: &Entity, relation: &Relation) -> crate::Result<LoadedRelation> {
    if let Some(through) = &relation.through {
        let intermediates = resolve(ctx, current.clone(), vec![through.via.clone()]).await?.entities();

        let terminal = try_join_all(
            intermediates
                .into_iter()
                .map(|intermediate| resolve(ctx, intermediate, vec![through.source.clone()])),
        )
        .await?;

        let mut seen = std::collections::HashSet::new();
        let flat: Vec<Entity> = terminal
            .into_iter()
            .flat_map(|resolved| resolved.entities())
            .filter(|entity| seen.insert(entity.entity_id()))
            .collect();

        let loaded = if relation.is_many() {
            LoadedRelation::Many(flat)
        } else {
            LoadedRelation::One(flat.into_iter().next())
        };

        current.set_loaded_relation(&relation.name, loaded.clone());
        return Ok(loaded);
    }

    let entities = match &relation.foreign_key {
        model_structure::ForeignKey::Source { field } => {
            let foreign_key = current.get(field).unwrap_or(Value::Null);

            if foreign_key.is_null() {
                vec![]
            } else {
                match target_model_name(current, relation)? {
                    Some(target_model) => {
                        let model = ctx.datamodel().find_model(&target_model)?;
                        ctx.batcher().load(&model, LoadRequest::ByKey(foreign_key)).await?
                    }
                    None => vec![],
                }
            }
        }
        model_structure::ForeignKey::Target { field, type_field } => match current.id() {
            None => vec![],
            Some(id) => {
                let Some(target_model) = target_model_name(current, relation)? else {
                    return Ok(LoadedRelation::One(None));
                };

                let mut conditions = vec![(field.clone(), id)];
                if let Some(tf) = type_field {
                    conditions.push((tf.clone(), Value::String(current.model_name())));
                }

                let model = ctx.datamodel().find_model(&target_model)?;
                let request = LoadRequest::ByFilter {
                    filter: Filter::new(conditions),
                    order_by: relation.order_by.clone(),
                };

                ctx.batcher().load(&model, request).await?
            }
        },
    };

    let loaded = if relation.is_many() {
        LoadedRelation::Many(entities)
    } else {
        LoadedRelation::One(entities.into_iter().next())
    };

    link_loaded(current, relation, &loaded);
    Ok(loaded)
}

/// Records the result on the owning relation and back-links single-valued
/// inverse relations on the loaded entities.
fn link_loaded(current: &Entity, relation: &Relation, loaded: &LoadedRelation) {
    current.set_loaded_relation(&relation.name, loaded.clone());

    let Some(inverse) = &relation.inverse else {
        return;
    };

    for entity in loaded.entities() {
        let model = entity.model();

        if let Ok(inverse_relation) = model.find_relation(inverse) {
            if inverse_relation.is_single() {
                entity.set_loaded_relation(inverse, LoadedRelation::One(Some(current.clone())));
            }
        }
    }
}

/// The concrete target model of a relation for this particular entity. For
/// polymorphic relations the discriminator attribute names the model,
/// restricted to the declared allow-list.
fn target_model_name(current: &Entity, relation: &Relation) -> crate::Result<Option<String>> {
    match &relation.target {
        RelationTarget::Model(name) => Ok(Some(name.clone())),
        RelationTarget::Polymorphic { type_field, allowed } => match current.get(type_field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(tag)) => {
                if allowed.contains(&tag) {
                    Ok(Some(tag))
                } else {
                    Err(CoreError::InputError(format!(
                        "'{}' is not an allowed type for relation '{}'",
                        tag, relation.name
                    )))
                }
            }
            Some(other) => Err(CoreError::InputError(format!(
                "discriminator '{}' holds a non-string value: {}",
                type_field, other
            ))),
        },
    }
}
