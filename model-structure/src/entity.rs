use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::{ModelRef, Record, Value};

/// A runtime instance of a persistent model type.
///
/// Entities are shared handles: cloning an `Entity` yields another handle to
/// the same underlying state, which is what lets the request-scoped cache
/// guarantee a single in-memory object per (model, primary key), and what the
/// change-set machinery uses to group changes by the instance they touch.
#[derive(Clone)]
pub struct Entity {
    inner: Arc<Mutex<EntityState>>,
}

#[derive(Debug)]
struct EntityState {
    model: ModelRef,
    attributes: IndexMap<String, Value>,
    relations: HashMap<String, LoadedRelation>,
    new_record: bool,
    marked_for_destruction: bool,
    destroyed: bool,
}

/// The in-memory "already loaded" state of one relation on one entity.
#[derive(Debug, Clone)]
pub enum LoadedRelation {
    One(Option<Entity>),
    Many(Vec<Entity>),
}

impl LoadedRelation {
    pub fn entities(&self) -> Vec<Entity> {
        match self {
            LoadedRelation::One(Some(e)) => vec![e.clone()],
            LoadedRelation::One(None) => vec![],
            LoadedRelation::Many(many) => many.clone(),
        }
    }
}

/// Stable identity of an entity handle within one request, independent of
/// whether the entity has a primary key yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(usize);

impl Entity {
    /// Materializes an entity from a storage row.
    pub fn from_record(model: ModelRef, record: Record) -> Entity {
        Entity {
            inner: Arc::new(Mutex::new(EntityState {
                model,
                attributes: record.values,
                relations: HashMap::new(),
                new_record: false,
                marked_for_destruction: false,
                destroyed: false,
            })),
        }
    }

    /// Constructs an empty, not-yet-persisted entity.
    pub fn build(model: ModelRef) -> Entity {
        Entity {
            inner: Arc::new(Mutex::new(EntityState {
                model,
                attributes: IndexMap::new(),
                relations: HashMap::new(),
                new_record: true,
                marked_for_destruction: false,
                destroyed: false,
            })),
        }
    }

    pub fn entity_id(&self) -> EntityId {
        EntityId(Arc::as_ptr(&self.inner) as usize)
    }

    /// Whether two handles refer to the same underlying instance.
    pub fn same_as(&self, other: &Entity) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn model(&self) -> ModelRef {
        self.inner.lock().model.clone()
    }

    pub fn model_name(&self) -> String {
        self.inner.lock().model.name.clone()
    }

    /// The primary key, when the entity has been persisted (or assigned one).
    pub fn id(&self) -> Option<Value> {
        let state = self.inner.lock();
        let pk = state.model.primary_key.clone();

        match state.attributes.get(&pk) {
            Some(Value::Null) | None => None,
            Some(v) => Some(v.clone()),
        }
    }

    pub fn get(&self, attribute: &str) -> Option<Value> {
        self.inner.lock().attributes.get(attribute).cloned()
    }

    pub fn set(&self, attribute: &str, value: Value) {
        self.inner.lock().attributes.insert(attribute.to_string(), value);
    }

    /// Current values for a set of attributes, with absent ones read as null.
    /// Used as the match key for keyed nested-collection matching.
    pub fn key_values(&self, attributes: &[String]) -> BTreeMap<String, Value> {
        let state = self.inner.lock();

        attributes
            .iter()
            .map(|attr| {
                let value = state.attributes.get(attr).cloned().unwrap_or(Value::Null);
                (attr.clone(), value)
            })
            .collect()
    }

    pub fn is_new_record(&self) -> bool {
        self.inner.lock().new_record
    }

    pub fn mark_for_destruction(&self) {
        self.inner.lock().marked_for_destruction = true;
    }

    pub fn is_marked_for_destruction(&self) -> bool {
        self.inner.lock().marked_for_destruction
    }

    pub fn mark_destroyed(&self) {
        self.inner.lock().destroyed = true;
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().destroyed
    }

    /// Records the primary key assigned by the store and flips the entity to
    /// persisted state.
    pub fn assign_primary_key(&self, key: Value) {
        let mut state = self.inner.lock();
        let pk = state.model.primary_key.clone();

        state.attributes.insert(pk, key);
        state.new_record = false;
    }

    pub fn loaded_relation(&self, name: &str) -> Option<LoadedRelation> {
        self.inner.lock().relations.get(name).cloned()
    }

    pub fn relation_is_loaded(&self, name: &str) -> bool {
        self.inner.lock().relations.contains_key(name)
    }

    pub fn set_loaded_relation(&self, name: &str, loaded: LoadedRelation) {
        self.inner.lock().relations.insert(name.to_string(), loaded);
    }

    /// Appends a freshly built child to an already-loaded collection, keeping
    /// the in-memory relation state consistent with the change-set.
    pub fn push_to_loaded_relation(&self, name: &str, child: Entity) {
        let mut state = self.inner.lock();

        match state.relations.get_mut(name) {
            Some(LoadedRelation::Many(entities)) => entities.push(child),
            _ => {
                state.relations.insert(name.to_string(), LoadedRelation::Many(vec![child]));
            }
        }
    }

    /// Snapshot of all current attribute values.
    pub fn attributes(&self) -> IndexMap<String, Value> {
        self.inner.lock().attributes.clone()
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();

        f.debug_struct("Entity")
            .field("model", &state.model.name)
            .field("id", &state.attributes.get(&state.model.primary_key))
            .field("new_record", &state.new_record)
            .finish()
    }
}
