#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use model_connector::{
    CollectionQuery, ConnectorError, ErrorKind, FilterGroup, MembershipRecord, RankExpression, RankedRecord, Storage,
    StorageTransaction,
};
use model_core::{
    AccessDenied, AuthorizationHook, ChangeAction, EntityValidator, IdentityResolver, RequestContext,
    ValidationFailure,
};
use model_structure::{
    Cardinality, Datamodel, DatamodelBuilder, Entity, ForeignKey, Model, ModelRef, OrderBy, Record, Relation,
    RelationTarget, ScalarField, SortOrder, Through, TypeIdentifier, Value,
};
use parking_lot::Mutex;

/// Companies employ employees; employees have skills, a manager, reports,
/// and reach their company's offices through the company.
pub fn datamodel() -> Arc<Datamodel> {
    let company = Model {
        name: "Company".to_string(),
        primary_key: "id".to_string(),
        fields: vec![
            ScalarField::new("id", TypeIdentifier::Int).required(),
            ScalarField::new("name", TypeIdentifier::String).required(),
        ],
        relations: vec![
            Relation {
                name: "employees".to_string(),
                cardinality: Cardinality::Many,
                target: RelationTarget::Model("Employee".to_string()),
                foreign_key: ForeignKey::Target {
                    field: "company_id".to_string(),
                    type_field: None,
                },
                nullable: false,
                inverse: Some("company".to_string()),
                through: None,
                order_by: vec![OrderBy::asc("name")],
            },
            Relation {
                name: "offices".to_string(),
                cardinality: Cardinality::Many,
                target: RelationTarget::Model("Office".to_string()),
                foreign_key: ForeignKey::Target {
                    field: "company_id".to_string(),
                    type_field: None,
                },
                nullable: false,
                inverse: None,
                through: None,
                order_by: vec![],
            },
        ],
    };

    let employee = Model {
        name: "Employee".to_string(),
        primary_key: "id".to_string(),
        fields: vec![
            ScalarField::new("id", TypeIdentifier::Int).required(),
            ScalarField::new("name", TypeIdentifier::String).required(),
            ScalarField::new("email", TypeIdentifier::String),
            ScalarField::new("title", TypeIdentifier::String),
            ScalarField::new("company_id", TypeIdentifier::Int),
            ScalarField::new("manager_id", TypeIdentifier::Int),
        ],
        relations: vec![
            Relation {
                name: "company".to_string(),
                cardinality: Cardinality::One,
                target: RelationTarget::Model("Company".to_string()),
                foreign_key: ForeignKey::Source {
                    field: "company_id".to_string(),
                },
                nullable: true,
                inverse: Some("employees".to_string()),
                through: None,
                order_by: vec![],
            },
            Relation {
                name: "manager".to_string(),
                cardinality: Cardinality::One,
                target: RelationTarget::Model("Employee".to_string()),
                foreign_key: ForeignKey::Source {
                    field: "manager_id".to_string(),
                },
                nullable: true,
                inverse: None,
                through: None,
                order_by: vec![],
            },
            Relation {
                name: "reports".to_string(),
                cardinality: Cardinality::Many,
                target: RelationTarget::Model("Employee".to_string()),
                foreign_key: ForeignKey::Target {
                    field: "manager_id".to_string(),
                    type_field: None,
                },
                nullable: false,
                inverse: Some("manager".to_string()),
                through: None,
                order_by: vec![],
            },
            Relation {
                name: "skills".to_string(),
                cardinality: Cardinality::Many,
                target: RelationTarget::Model("Skill".to_string()),
                foreign_key: ForeignKey::Target {
                    field: "employee_id".to_string(),
                    type_field: None,
                },
                nullable: false,
                inverse: Some("employee".to_string()),
                through: None,
                order_by: vec![],
            },
            Relation {
                name: "offices".to_string(),
                cardinality: Cardinality::Many,
                target: RelationTarget::Model("Office".to_string()),
                foreign_key: ForeignKey::Target {
                    field: "company_id".to_string(),
                    type_field: None,
                },
                nullable: false,
                inverse: None,
                through: Some(Through {
                    via: "company".to_string(),
                    source: "offices".to_string(),
                }),
                order_by: vec![],
            },
        ],
    };

    let skill = Model {
        name: "Skill".to_string(),
        primary_key: "id".to_string(),
        fields: vec![
            ScalarField::new("id", TypeIdentifier::Int).required(),
            ScalarField::new("name", TypeIdentifier::String).required(),
            ScalarField::new("level", TypeIdentifier::Int),
            ScalarField::new("employee_id", TypeIdentifier::Int),
        ],
        relations: vec![Relation {
            name: "employee".to_string(),
            cardinality: Cardinality::One,
            target: RelationTarget::Model("Employee".to_string()),
            foreign_key: ForeignKey::Source {
                field: "employee_id".to_string(),
            },
            nullable: true,
            inverse: Some("skills".to_string()),
            through: None,
            order_by: vec![],
        }],
    };

    let office = Model {
        name: "Office".to_string(),
        primary_key: "id".to_string(),
        fields: vec![
            ScalarField::new("id", TypeIdentifier::Int).required(),
            ScalarField::new("city", TypeIdentifier::String).required(),
            ScalarField::new("company_id", TypeIdentifier::Int),
        ],
        relations: vec![],
    };

    let datamodel = DatamodelBuilder::new()
        .model(company)
        .model(employee)
        .model(skill)
        .model(office)
        .build()
        .expect("test datamodel is valid");

    Arc::new(datamodel)
}

/// An in-memory storage collaborator counting the queries it serves.
#[derive(Default)]
pub struct InMemoryStorage {
    rows: Mutex<HashMap<String, Vec<Record>>>,
    next_id: AtomicI64,
    pub key_queries: AtomicUsize,
    pub filter_queries: AtomicUsize,
    pub membership_queries: AtomicUsize,
    fail_saves_for: Mutex<Option<String>>,
}

enum TxOp {
    Save {
        model: String,
        primary_key: String,
        key: Value,
        attributes: IndexMap<String, Value>,
    },
    Delete {
        model: String,
        primary_key: String,
        key: Value,
    },
}

impl InMemoryStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(InMemoryStorage {
            next_id: AtomicI64::new(1000),
            ..Default::default()
        })
    }

    pub fn seed(&self, model: &str, pairs: &[(&str, Value)]) {
        let record: Record = pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        self.rows.lock().entry(model.to_string()).or_default().push(record);
    }

    /// Makes every subsequent save of the given model fail, for rollback
    /// tests.
    pub fn fail_saves_for(&self, model: &str) {
        *self.fail_saves_for.lock() = Some(model.to_string());
    }

    pub fn total_queries(&self) -> usize {
        self.key_queries.load(Ordering::SeqCst)
            + self.filter_queries.load(Ordering::SeqCst)
            + self.membership_queries.load(Ordering::SeqCst)
    }

    pub fn row(&self, model: &str, key: &Value) -> Option<Record> {
        let rows = self.rows.lock();
        rows.get(model)?.iter().find(|r| r.get("id") == Some(key)).cloned()
    }

    pub fn row_count(&self, model: &str) -> usize {
        self.rows.lock().get(model).map(Vec::len).unwrap_or(0)
    }

    fn model_rows(&self, model: &ModelRef) -> Vec<Record> {
        self.rows.lock().get(&model.name).cloned().unwrap_or_default()
    }
}

fn compare_rows(a: &Record, b: &Record, order_by: &[OrderBy]) -> std::cmp::Ordering {
    for order in order_by {
        let left = a.get(&order.field).cloned().unwrap_or(Value::Null);
        let right = b.get(&order.field).cloned().unwrap_or(Value::Null);

        let ordering = match order.sort_order {
            SortOrder::Ascending => left.cmp(&right),
            SortOrder::Descending => right.cmp(&left),
        };

        if ordering != std::cmp::Ordering::Equal {
            return ordering;
        }
    }

    std::cmp::Ordering::Equal
}

/// Dense rank of each row among `rows` under the given ordering, 1-based.
fn dense_ranks(rows: &[Record], order_by: &[OrderBy]) -> Vec<i64> {
    let mut sort_keys: Vec<&Record> = rows.iter().collect();
    sort_keys.sort_by(|a, b| compare_rows(a, b, order_by));
    sort_keys.dedup_by(|a, b| compare_rows(*a, *b, order_by) == std::cmp::Ordering::Equal);

    rows.iter()
        .map(|row| {
            let position = sort_keys
                .iter()
                .position(|key| compare_rows(row, key, order_by) == std::cmp::Ordering::Equal)
                .unwrap_or(0);

            position as i64 + 1
        })
        .collect()
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn find_by_keys(&self, model: &ModelRef, keys: &[Value]) -> model_connector::Result<Vec<Record>> {
        self.key_queries.fetch_add(1, Ordering::SeqCst);

        let rows = self
            .model_rows(model)
            .into_iter()
            .filter(|row| {
                row.get(&model.primary_key)
                    .map(|key| keys.contains(key))
                    .unwrap_or(false)
            })
            .collect();

        Ok(rows)
    }

    async fn find_by_filter_union(
        &self,
        model: &ModelRef,
        groups: &[FilterGroup],
        ranks: &[RankExpression],
    ) -> model_connector::Result<Vec<RankedRecord>> {
        self.filter_queries.fetch_add(1, Ordering::SeqCst);

        let matched: Vec<Record> = self
            .model_rows(model)
            .into_iter()
            .filter(|row| groups.iter().any(|group| group.matches(row)))
            .collect();

        let rank_columns: Vec<Vec<i64>> = ranks
            .iter()
            .map(|rank| dense_ranks(&matched, &rank.order_by))
            .collect();

        Ok(matched
            .into_iter()
            .enumerate()
            .map(|(idx, record)| RankedRecord {
                record,
                ranks: rank_columns.iter().map(|column| column[idx]).collect(),
            })
            .collect())
    }

    async fn find_by_collection_membership(
        &self,
        model: &ModelRef,
        collections: &[CollectionQuery],
    ) -> model_connector::Result<Vec<MembershipRecord>> {
        self.membership_queries.fetch_add(1, Ordering::SeqCst);

        let rows = self.model_rows(model);

        let member_ranks: Vec<Option<Vec<i64>>> = collections
            .iter()
            .map(|collection| {
                if collection.order_by.is_empty() {
                    return None;
                }

                let members: Vec<Record> = rows
                    .iter()
                    .filter(|row| collection.filter.matches(row))
                    .cloned()
                    .collect();

                Some(dense_ranks(&members, &collection.order_by))
            })
            .collect();

        let mut result = Vec::new();

        for row in rows {
            let memberships: Vec<bool> = collections.iter().map(|c| c.filter.matches(&row)).collect();

            if !memberships.iter().any(|m| *m) {
                continue;
            }

            let ranks: Vec<Option<i64>> = collections
                .iter()
                .enumerate()
                .map(|(idx, collection)| {
                    if !memberships[idx] {
                        return None;
                    }

                    member_ranks[idx].as_ref().map(|ranks_for_members| {
                        let member_idx = self
                            .model_rows(model)
                            .into_iter()
                            .filter(|r| collection.filter.matches(r))
                            .position(|r| r == row)
                            .unwrap_or(0);

                        ranks_for_members[member_idx]
                    })
                })
                .collect();

            result.push(MembershipRecord {
                record: row,
                memberships,
                ranks,
            });
        }

        Ok(result)
    }

    async fn start_transaction(&self) -> model_connector::Result<Box<dyn StorageTransaction + '_>> {
        Ok(Box::new(InMemoryTransaction {
            store: self,
            ops: Vec::new(),
        }))
    }
}

pub struct InMemoryTransaction<'a> {
    store: &'a InMemoryStorage,
    ops: Vec<TxOp>,
}

#[async_trait]
impl StorageTransaction for InMemoryTransaction<'_> {
    async fn save(&mut self, entity: &Entity) -> model_connector::Result<Value> {
        let model = entity.model();

        if self.store.fail_saves_for.lock().as_deref() == Some(model.name.as_str()) {
            return Err(ConnectorError::from_kind(ErrorKind::QueryError(
                format!("simulated save failure for {}", model.name).into(),
            )));
        }

        let key = entity
            .id()
            .unwrap_or_else(|| Value::Int(self.store.next_id.fetch_add(1, Ordering::SeqCst)));

        let mut attributes = entity.attributes();
        attributes.insert(model.primary_key.clone(), key.clone());

        self.ops.push(TxOp::Save {
            model: model.name.clone(),
            primary_key: model.primary_key.clone(),
            key: key.clone(),
            attributes,
        });

        Ok(key)
    }

    async fn delete(&mut self, entity: &Entity) -> model_connector::Result<()> {
        let model = entity.model();
        let key = entity
            .id()
            .ok_or_else(|| ConnectorError::from_kind(ErrorKind::RecordDoesNotExist))?;

        self.ops.push(TxOp::Delete {
            model: model.name.clone(),
            primary_key: model.primary_key.clone(),
            key,
        });

        Ok(())
    }

    async fn commit(&mut self) -> model_connector::Result<()> {
        let mut rows = self.store.rows.lock();

        for op in self.ops.drain(..) {
            match op {
                TxOp::Save {
                    model,
                    primary_key,
                    key,
                    attributes,
                } => {
                    let table = rows.entry(model).or_default();
                    let record = Record::new(attributes);

                    match table.iter_mut().find(|r| r.get(&primary_key) == Some(&key)) {
                        Some(existing) => *existing = record,
                        None => table.push(record),
                    }
                }
                TxOp::Delete { model, primary_key, key } => {
                    if let Some(table) = rows.get_mut(&model) {
                        table.retain(|r| r.get(&primary_key) != Some(&key));
                    }
                }
            }
        }

        Ok(())
    }

    async fn rollback(&mut self) -> model_connector::Result<()> {
        self.ops.clear();
        Ok(())
    }
}

/// Global IDs of the form `Model/key`, resolved straight against storage.
pub struct StaticIds {
    pub datamodel: Arc<Datamodel>,
    pub storage: Arc<InMemoryStorage>,
}

#[async_trait]
impl IdentityResolver for StaticIds {
    async fn resolve_global_id(&self, id: &str) -> model_core::Result<Option<Entity>> {
        let Some((model_name, key)) = id.split_once('/') else {
            return Ok(None);
        };

        let Ok(parsed) = key.parse::<i64>() else {
            return Ok(None);
        };

        let Ok(model) = self.datamodel.find_model(model_name) else {
            return Ok(None);
        };

        Ok(self
            .storage
            .row(model_name, &Value::Int(parsed))
            .map(|record| Entity::from_record(model.clone(), record)))
    }

    fn global_id_for(&self, entity: &Entity) -> model_core::Result<String> {
        let id = entity
            .id()
            .ok_or_else(|| model_core::CoreError::InputError("entity has no primary key".to_string()))?;

        Ok(format!("{}/{}", entity.model_name(), id))
    }

    fn global_id_for_key(&self, model: &str, key: &Value) -> model_core::Result<String> {
        Ok(format!("{model}/{key}"))
    }
}

pub struct AllowAll;

impl AuthorizationHook for AllowAll {
    fn authorize(&self, _action: ChangeAction, _entity: &Entity) -> Result<(), AccessDenied> {
        Ok(())
    }
}

/// Denies one action on one model; everything else passes. Also counts
/// invocations so once-per-(entity, action) semantics are observable.
pub struct DenyAction {
    pub action: ChangeAction,
    pub model: String,
    pub invocations: AtomicUsize,
}

impl DenyAction {
    pub fn new(action: ChangeAction, model: &str) -> Self {
        DenyAction {
            action,
            model: model.to_string(),
            invocations: AtomicUsize::new(0),
        }
    }
}

impl AuthorizationHook for DenyAction {
    fn authorize(&self, action: ChangeAction, entity: &Entity) -> Result<(), AccessDenied> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        if action == self.action && entity.model_name() == self.model {
            return Err(AccessDenied {
                action,
                model: entity.model_name(),
            });
        }

        Ok(())
    }
}

pub struct NoValidation;

impl EntityValidator for NoValidation {
    fn validate(&self, _entity: &Entity) -> Vec<ValidationFailure> {
        vec![]
    }
}

/// Wraps a closure as the validation collaborator.
pub struct FnValidator<F>(pub F);

impl<F> EntityValidator for FnValidator<F>
where
    F: Fn(&Entity) -> Vec<ValidationFailure> + Send + Sync,
{
    fn validate(&self, entity: &Entity) -> Vec<ValidationFailure> {
        (self.0)(entity)
    }
}

/// A context over the shared test datamodel with allow-all authorization and
/// no validation.
pub fn context(datamodel: Arc<Datamodel>, storage: Arc<InMemoryStorage>) -> RequestContext {
    context_with(datamodel, storage, Arc::new(AllowAll), Arc::new(NoValidation))
}

pub fn context_with(
    datamodel: Arc<Datamodel>,
    storage: Arc<InMemoryStorage>,
    authorizer: Arc<dyn AuthorizationHook>,
    validator: Arc<dyn EntityValidator>,
) -> RequestContext {
    let identity = Arc::new(StaticIds {
        datamodel: datamodel.clone(),
        storage: storage.clone(),
    });

    RequestContext::new(datamodel, storage, identity, authorizer, validator)
}

/// Loads one entity by primary key, outside of any batching concerns.
pub async fn load_entity(ctx: &RequestContext, storage: &InMemoryStorage, model: &str, key: i64) -> Entity {
    let model_ref = ctx.datamodel().find_model(model).expect("model exists");
    let record = storage.row(model, &Value::Int(key)).expect("row exists");

    ctx.scope().retain(Entity::from_record(model_ref, record))
}
