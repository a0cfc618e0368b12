use std::collections::HashSet;

use model_structure::EntityId;

use super::{ChangeAction, ChangeRecord};
use crate::hooks::RequestContext;

/// Invokes the authorization hook once per distinct (entity, action) pair of
/// the change-set, in change order. The first denial aborts the mutation
/// before anything is persisted.
pub fn authorize_changes(ctx: &RequestContext, changes: &[ChangeRecord]) -> crate::Result<()> {
    let mut seen: HashSet<(EntityId, ChangeAction)> = HashSet::new();

    for change in changes {
        if !seen.insert((change.entity.entity_id(), change.action)) {
            continue;
        }

        ctx.authorizer().authorize(change.action, &change.entity)?;
    }

    Ok(())
}
