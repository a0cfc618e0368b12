use std::collections::HashMap;

use model_structure::{Entity, Value};
use parking_lot::Mutex;

/// Per-request identity map of already-materialized entities, keyed by
/// (model name, primary key).
///
/// Within one scope there is never more than one in-memory instance for the
/// same key: every load funnels through [`RequestScope::retain`], which hands
/// back the canonical instance when one exists. The scope is discarded with
/// the request.
#[derive(Debug, Default)]
pub struct RequestScope {
    cache: Mutex<HashMap<(String, Value), Entity>>,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, model: &str, key: &Value) -> Option<Entity> {
        self.cache.lock().get(&(model.to_string(), key.clone())).cloned()
    }

    /// Registers the entity and returns the canonical instance for its
    /// identity. Entities without a primary key are passed through untouched.
    pub fn retain(&self, entity: Entity) -> Entity {
        let Some(id) = entity.id() else {
            return entity;
        };

        let mut cache = self.cache.lock();

        match cache.entry((entity.model_name(), id)) {
            std::collections::hash_map::Entry::Occupied(existing) => existing.get().clone(),
            std::collections::hash_map::Entry::Vacant(slot) => {
                tracing::trace!(model = %entity.model_name(), "caching entity in request scope");
                slot.insert(entity.clone());
                entity
            }
        }
    }

    /// First cached entity of the given model satisfying the predicate. Used
    /// to bind single-valued relations from already-loaded data instead of
    /// issuing a query.
    pub fn find_match(&self, model: &str, predicate: impl Fn(&Entity) -> bool) -> Option<Entity> {
        self.cache
            .lock()
            .iter()
            .filter(|((model_name, _), _)| model_name == model)
            .map(|(_, entity)| entity)
            .find(|entity| predicate(entity))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}
