use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};

use crate::hooks::RequestContext;
use crate::CoreError;

/// Drives a set of deferred field resolutions to completion with micro-batch
/// scheduling: all resolvers are polled until none can make progress, then
/// every batch collected so far is flushed, then the resolvers resume. This
/// collapses N per-field loads into one storage query per (model, kind) per
/// tree depth.
///
/// Per-field failures are returned in place; they never abort sibling fields.
pub async fn execute_all<'a, T>(
    ctx: &RequestContext,
    fields: Vec<BoxFuture<'a, crate::Result<T>>>,
) -> crate::Result<Vec<crate::Result<T>>>
where
    T: Send + 'a,
{
    let total = fields.len();
    let mut results: Vec<Option<crate::Result<T>>> = Vec::with_capacity(total);
    results.resize_with(total, || None);

    let mut tasks: FuturesUnordered<BoxFuture<'a, (usize, crate::Result<T>)>> = fields
        .into_iter()
        .enumerate()
        .map(|(idx, field)| async move { (idx, field.await) }.boxed())
        .collect();

    loop {
        // Poll until every remaining resolver is suspended on a pending load.
        loop {
            match tasks.next().now_or_never() {
                Some(Some((idx, result))) => results[idx] = Some(result),
                Some(None) => {
                    return Ok(results
                        .into_iter()
                        .map(|slot| slot.expect("every field resolution completed"))
                        .collect());
                }
                None => break,
            }
        }

        if !ctx.batcher().dispatch(ctx).await? {
            // Nothing to flush but resolvers are still suspended: a resolver
            // is waiting on something the scheduler will never produce.
            return Err(CoreError::ConfigurationError(
                "field resolution stalled with no pending batch to execute".to_string(),
            ));
        }
    }
}

/// Drives a single deferred resolution. Batching still applies to the loads
/// issued while it runs.
pub async fn execute<'a, T>(ctx: &RequestContext, field: BoxFuture<'a, crate::Result<T>>) -> crate::Result<T>
where
    T: Send + 'a,
{
    let mut results = execute_all(ctx, vec![field]).await?;
    results.pop().expect("exactly one field was driven")
}
