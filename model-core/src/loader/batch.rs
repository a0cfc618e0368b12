use futures::channel::oneshot;
use itertools::Itertools;
use model_connector::{combine, CollectionQuery, Filter, RankExpression};
use model_structure::{Entity, ModelRef, OrderBy, Record, Value};

use super::{BatchError, LoadRequest, PendingLoad};
use crate::hooks::RequestContext;

type Responder = oneshot::Sender<Result<Vec<Entity>, BatchError>>;

/// Executes one model's batch: partitions the requests by kind, issues one
/// combined storage query per kind present, and demultiplexes the rows back
/// onto the individual requests.
pub(crate) async fn execute(ctx: &RequestContext, model: &ModelRef, loads: Vec<PendingLoad>) {
    let mut key_loads: Vec<(Value, Responder)> = Vec::new();
    let mut filter_loads: Vec<(Filter, Vec<OrderBy>, Responder)> = Vec::new();
    let mut collection_loads: Vec<(CollectionQuery, Responder)> = Vec::new();

    for load in loads {
        match load.request {
            LoadRequest::ByKey(key) => key_loads.push((key, load.sender)),
            LoadRequest::ByFilter { filter, order_by } => filter_loads.push((filter, order_by, load.sender)),
            LoadRequest::Collection(collection) => collection_loads.push((collection, load.sender)),
        }
    }

    if !key_loads.is_empty() {
        fulfill_key_loads(ctx, model, key_loads).await;
    }

    if !filter_loads.is_empty() {
        fulfill_filter_loads(ctx, model, filter_loads).await;
    }

    if !collection_loads.is_empty() {
        fulfill_collection_loads(ctx, model, collection_loads).await;
    }
}

async fn fulfill_key_loads(ctx: &RequestContext, model: &ModelRef, loads: Vec<(Value, Responder)>) {
    let keys: Vec<Value> = loads.iter().map(|(key, _)| key.clone()).unique().collect();

    let records = match ctx.storage().find_by_keys(model, &keys).await {
        Ok(records) => records,
        Err(err) => {
            return broadcast_kind_failure(loads.into_iter().map(|(_, s)| s), &err.to_string());
        }
    };

    let entities: Vec<Entity> = records
        .into_iter()
        .map(|record| materialize(ctx, model, record))
        .collect();

    for (key, sender) in loads {
        let matched: Vec<Entity> = entities
            .iter()
            .filter(|entity| entity.id().as_ref() == Some(&key))
            .cloned()
            .collect();

        let _ = sender.send(Ok(matched));
    }
}

async fn fulfill_filter_loads(ctx: &RequestContext, model: &ModelRef, loads: Vec<(Filter, Vec<OrderBy>, Responder)>) {
    // One rank expression per distinct sort key present among the requests.
    let sorters: Vec<Vec<OrderBy>> = loads
        .iter()
        .filter(|(_, order_by, _)| !order_by.is_empty())
        .map(|(_, order_by, _)| order_by.clone())
        .unique()
        .collect();

    let ranks: Vec<RankExpression> = sorters
        .iter()
        .map(|order_by| RankExpression {
            order_by: order_by.clone(),
        })
        .collect();

    let filters: Vec<Filter> = loads.iter().map(|(filter, _, _)| filter.clone()).collect();
    let groups = combine(&filters);

    let rows = match ctx.storage().find_by_filter_union(model, &groups, &ranks).await {
        Ok(rows) => rows,
        Err(err) => {
            return broadcast_kind_failure(loads.into_iter().map(|(_, _, s)| s), &err.to_string());
        }
    };

    // Materialize every row exactly once, then match per request.
    let entities: Vec<(Record, Vec<i64>, Entity)> = rows
        .into_iter()
        .map(|row| {
            let entity = materialize(ctx, model, row.record.clone());
            (row.record, row.ranks, entity)
        })
        .collect();

    for (filter, order_by, sender) in loads {
        let mut matched: Vec<(&Vec<i64>, &Entity)> = entities
            .iter()
            .filter(|(record, _, _)| filter.matches(record))
            .map(|(_, ranks, entity)| (ranks, entity))
            .collect();

        if !order_by.is_empty() {
            let rank_idx = sorters
                .iter()
                .position(|s| *s == order_by)
                .expect("sorter was registered above");

            matched.sort_by_key(|(ranks, _)| ranks.get(rank_idx).copied().unwrap_or(i64::MAX));
        }

        let result: Vec<Entity> = matched.into_iter().map(|(_, entity)| entity.clone()).collect();
        let _ = sender.send(Ok(result));
    }
}

async fn fulfill_collection_loads(ctx: &RequestContext, model: &ModelRef, loads: Vec<(CollectionQuery, Responder)>) {
    // Identical collections share one membership column.
    let mut collections: Vec<CollectionQuery> = Vec::new();

    for (collection, _) in &loads {
        if !collections.contains(collection) {
            collections.push(collection.clone());
        }
    }

    let rows = match ctx.storage().find_by_collection_membership(model, &collections).await {
        Ok(rows) => rows,
        Err(err) => {
            return broadcast_kind_failure(loads.into_iter().map(|(_, s)| s), &err.to_string());
        }
    };

    let entities: Vec<(Vec<bool>, Vec<Option<i64>>, Entity)> = rows
        .into_iter()
        .map(|row| {
            let entity = materialize(ctx, model, row.record);
            (row.memberships, row.ranks, entity)
        })
        .collect();

    for (collection, sender) in loads {
        let idx = collections
            .iter()
            .position(|c| *c == collection)
            .expect("collection was registered above");

        let mut matched: Vec<(Option<i64>, &Entity)> = entities
            .iter()
            .filter(|(memberships, _, _)| memberships.get(idx).copied().unwrap_or(false))
            .map(|(_, ranks, entity)| (ranks.get(idx).copied().flatten(), entity))
            .collect();

        if !collection.order_by.is_empty() {
            matched.sort_by_key(|(rank, _)| rank.unwrap_or(i64::MAX));
        }

        let result: Vec<Entity> = matched.into_iter().map(|(_, entity)| entity.clone()).collect();
        let _ = sender.send(Ok(result));
    }
}

/// Turns a row into an entity and unifies it with the request scope, so two
/// requests resolving the same (model, key) observe the same instance.
fn materialize(ctx: &RequestContext, model: &ModelRef, record: Record) -> Entity {
    ctx.scope().retain(Entity::from_record(model.clone(), record))
}

fn broadcast_kind_failure(senders: impl Iterator<Item = Responder>, message: &str) {
    tracing::warn!(%message, "batched load failed");

    let err = BatchError {
        message: message.to_string(),
    };

    for sender in senders {
        let _ = sender.send(Err(err.clone()));
    }
}
