use model_structure::Entity;

use super::field_map::MutationFieldMap;
use super::{apply_changes, authorize_changes, persist_changes, validate_changes};
use super::{ChangeRecord, InputMap};
use crate::hooks::RequestContext;
use crate::CoreError;

/// Facade driving one mutation through its fixed pipeline:
/// apply, then validate, then authorize, then save. Calling a stage out of
/// order, or applying twice, is a configuration error.
pub struct Mutator<'a> {
    ctx: &'a RequestContext,
    map: &'a MutationFieldMap,
    root: Entity,
    changes: Option<Vec<ChangeRecord>>,
    validated: bool,
    authorized: bool,
}

impl<'a> Mutator<'a> {
    /// Checks the field map against the datamodel and the root entity's type
    /// up front, so declaration mistakes fail before any input is touched.
    pub fn new(ctx: &'a RequestContext, map: &'a MutationFieldMap, root: Entity) -> crate::Result<Self> {
        map.validate(ctx.datamodel())?;

        if root.model_name() != map.model {
            return Err(CoreError::ConfigurationError(format!(
                "field map is declared for '{}' but the root entity is a '{}'",
                map.model,
                root.model_name()
            )));
        }

        Ok(Mutator {
            ctx,
            map,
            root,
            changes: None,
            validated: false,
            authorized: false,
        })
    }

    /// Builds the change-set from the input document. May suspend on the
    /// batcher while loading existing nested children.
    pub async fn apply(&mut self, input: &InputMap) -> crate::Result<()> {
        if self.changes.is_some() {
            return Err(CoreError::ConfigurationError(
                "changes have already been applied to this mutator".to_string(),
            ));
        }

        let changes = apply_changes(self.ctx, self.map, self.root.clone(), input, vec![]).await?;

        tracing::debug!(model = %self.map.model, changes = changes.len(), "built change-set");

        self.changes = Some(changes);
        Ok(())
    }

    pub fn validate(&mut self) -> crate::Result<()> {
        let changes = self.applied_changes("validate")?;
        validate_changes(self.ctx, self.map, &self.root, changes)?;

        self.validated = true;
        Ok(())
    }

    pub fn authorize(&mut self) -> crate::Result<()> {
        let changes = self.applied_changes("authorize")?;
        authorize_changes(self.ctx, changes)?;

        self.authorized = true;
        Ok(())
    }

    /// Persists the change-set transactionally and returns the surviving
    /// entities. Requires prior validation and authorization.
    pub async fn save(&mut self) -> crate::Result<Vec<Entity>> {
        let changes = self.applied_changes("save")?;

        if !self.validated {
            return Err(CoreError::ConfigurationError(
                "must validate changes before calling save".to_string(),
            ));
        }

        if !self.authorized {
            return Err(CoreError::ConfigurationError(
                "must authorize changes before calling save".to_string(),
            ));
        }

        persist_changes(self.ctx, changes).await
    }

    pub fn root(&self) -> &Entity {
        &self.root
    }

    pub fn changes(&self) -> &[ChangeRecord] {
        self.changes.as_deref().unwrap_or(&[])
    }

    fn applied_changes(&self, stage: &str) -> crate::Result<&[ChangeRecord]> {
        self.changes
            .as_deref()
            .ok_or_else(|| CoreError::ConfigurationError(format!("must apply changes before calling {stage}")))
    }
}
