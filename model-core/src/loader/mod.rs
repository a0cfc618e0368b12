mod batch;

use futures::channel::oneshot;
use indexmap::IndexMap;
use model_connector::{CollectionQuery, Filter};
use model_structure::{Entity, ModelRef, OrderBy, Value};
use parking_lot::Mutex;
use thiserror::Error;

use crate::hooks::RequestContext;
use crate::CoreError;

/// One pending fetch of entities of a single model type. Created per field
/// resolution, consumed exactly once by the batch execution.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadRequest {
    /// Fetch by primary key.
    ByKey(Value),

    /// Fetch every row matching an equality filter set, optionally ranked.
    ByFilter { filter: Filter, order_by: Vec<OrderBy> },

    /// Fetch the members of an already-defined filtered/sorted collection.
    Collection(CollectionQuery),
}

/// A batch failure, duplicated to every request in the failed batch. No
/// partial results are handed out.
#[derive(Debug, Clone, Error)]
#[error("Batched load failed: {}", message)]
pub struct BatchError {
    pub message: String,
}

pub(crate) struct PendingLoad {
    pub request: LoadRequest,
    pub sender: oneshot::Sender<Result<Vec<Entity>, BatchError>>,
}

/// Collects load requests per model type until the executor decides that no
/// resolver can make progress, then flushes each model's batch as one (or a
/// small fixed number of) storage queries.
#[derive(Default)]
pub struct Batcher {
    pending: Mutex<IndexMap<String, Vec<PendingLoad>>>,
}

impl Batcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a request and returns the deferred result. The future stays
    /// pending until the owning batch executes.
    pub fn load(
        &self,
        model: &ModelRef,
        request: LoadRequest,
    ) -> impl std::future::Future<Output = crate::Result<Vec<Entity>>> + use<> {
        let (sender, receiver) = oneshot::channel();

        self.pending
            .lock()
            .entry(model.name.clone())
            .or_default()
            .push(PendingLoad { request, sender });

        async move {
            match receiver.await {
                Ok(Ok(entities)) => Ok(entities),
                Ok(Err(err)) => Err(CoreError::from(err)),
                Err(_) => Err(CoreError::ConfigurationError(
                    "load request was dropped before its batch executed".to_string(),
                )),
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    /// Executes every pending batch. Returns whether anything was flushed.
    /// Failures are delivered to the waiting requests, not raised here, so
    /// one broken batch cannot poison unrelated fields.
    pub async fn dispatch(&self, ctx: &RequestContext) -> crate::Result<bool> {
        let batches: Vec<(String, Vec<PendingLoad>)> = self.pending.lock().drain(..).collect();

        if batches.is_empty() {
            return Ok(false);
        }

        for (model_name, loads) in batches {
            tracing::debug!(model = %model_name, requests = loads.len(), "dispatching load batch");

            match ctx.datamodel().find_model(&model_name) {
                Ok(model) => batch::execute(ctx, &model, loads).await,
                Err(err) => broadcast_failure(loads, &err.to_string()),
            }
        }

        Ok(true)
    }
}

pub(crate) fn broadcast_failure(loads: Vec<PendingLoad>, message: &str) {
    let err = BatchError {
        message: message.to_string(),
    };

    for load in loads {
        let _ = load.sender.send(Err(err.clone()));
    }
}
