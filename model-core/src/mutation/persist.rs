use std::collections::HashSet;

use futures::future::{BoxFuture, FutureExt};
use model_connector::StorageTransaction;
use model_structure::{Entity, EntityId, ForeignKey, LoadedRelation, RelationTarget, Value};

use super::ChangeRecord;
use crate::hooks::RequestContext;

/// Persists a change-set inside one transaction. Each distinct touched
/// entity is visited once in change order: entities already destroyed by an
/// earlier cascade are skipped, marked entities are deleted, the rest are
/// saved. Any storage failure rolls the whole transaction back.
///
/// Returns the surviving entities, with store-assigned primary keys recorded
/// on freshly created ones.
#[tracing::instrument(skip_all, fields(changes = changes.len()))]
pub async fn persist_changes(ctx: &RequestContext, changes: &[ChangeRecord]) -> crate::Result<Vec<Entity>> {
    let mut tx = ctx.storage().start_transaction().await?;

    match persist_in(tx.as_mut(), ctx, changes).await {
        Ok(saved) => {
            tx.commit().await?;
            Ok(saved)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback after failed persistence also failed");
            }

            Err(err)
        }
    }
}

async fn persist_in(
    tx: &mut (dyn StorageTransaction + '_),
    ctx: &RequestContext,
    changes: &[ChangeRecord],
) -> crate::Result<Vec<Entity>> {
    let mut members: HashSet<EntityId> = HashSet::new();
    let mut order: Vec<Entity> = Vec::new();

    for change in changes {
        if members.insert(change.entity.entity_id()) {
            order.push(change.entity.clone());
        }
    }

    let mut done: HashSet<EntityId> = HashSet::new();
    let mut saved: Vec<Entity> = Vec::new();

    for entity in &order {
        persist_entity(tx, ctx, entity, &members, &mut done, &mut saved).await?;
    }

    Ok(saved)
}

/// Saves or deletes one entity, saving first any unsaved entity of the same
/// change-set whose primary key this entity's foreign keys depend on.
fn persist_entity<'a>(
    tx: &'a mut (dyn StorageTransaction + '_),
    ctx: &'a RequestContext,
    entity: &'a Entity,
    members: &'a HashSet<EntityId>,
    done: &'a mut HashSet<EntityId>,
    saved: &'a mut Vec<Entity>,
) -> BoxFuture<'a, crate::Result<()>> {
    async move {
        // Insert-before-recursing also breaks reference cycles.
        if !done.insert(entity.entity_id()) {
            return Ok(());
        }

        if entity.is_destroyed() {
            return Ok(());
        }

        if entity.is_marked_for_destruction() {
            tx.delete(entity).await?;
            entity.mark_destroyed();
            return Ok(());
        }

        let dependencies = key_dependencies(entity, members);

        for dependency in dependencies {
            persist_entity(tx, ctx, &dependency, members, done, saved).await?;
        }

        flush_foreign_keys(entity);

        let was_new = entity.is_new_record();
        let key = tx.save(entity).await?;

        if was_new {
            entity.assign_primary_key(key);
            // Newly keyed entities become citizens of the identity map.
            ctx.scope().retain(entity.clone());
        }

        saved.push(entity.clone());
        Ok(())
    }
    .boxed()
}

/// Entities of the same change-set whose key must exist before this entity's
/// owned foreign keys can be written.
fn key_dependencies(entity: &Entity, members: &HashSet<EntityId>) -> Vec<Entity> {
    let model = entity.model();
    let mut dependencies = Vec::new();

    for relation in &model.relations {
        if !matches!(relation.foreign_key, ForeignKey::Source { .. }) {
            continue;
        }

        let Some(LoadedRelation::One(Some(target))) = entity.loaded_relation(&relation.name) else {
            continue;
        };

        if target.is_new_record() && members.contains(&target.entity_id()) {
            dependencies.push(target);
        }
    }

    dependencies
}

/// Copies primary keys from loaded relation targets into the foreign-key
/// attributes this entity owns. Covers nested creates, where the linked
/// entity was built before it had a key.
fn flush_foreign_keys(entity: &Entity) {
    let model = entity.model();

    for relation in &model.relations {
        let ForeignKey::Source { field } = &relation.foreign_key else {
            continue;
        };

        let Some(LoadedRelation::One(Some(target))) = entity.loaded_relation(&relation.name) else {
            continue;
        };

        let Some(id) = target.id() else {
            continue;
        };

        if entity.get(field).unwrap_or(Value::Null) != id {
            entity.set(field, id);
        }

        if let RelationTarget::Polymorphic { type_field, .. } = &relation.target {
            entity.set(type_field, Value::String(target.model_name()));
        }
    }
}
