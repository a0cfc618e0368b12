use std::sync::Arc;

use async_trait::async_trait;
use model_connector::Storage;
use model_structure::{Datamodel, Entity, Value};

use crate::loader::Batcher;
use crate::mutation::ChangeAction;
use crate::scope::RequestScope;
use crate::CoreError;

/// Translates opaque API-boundary global IDs to and from entities. The
/// encoding scheme is owned by the caller; the engine only round-trips
/// through this interface.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// The entity a global ID refers to, or `None` when it does not resolve.
    async fn resolve_global_id(&self, id: &str) -> crate::Result<Option<Entity>>;

    fn global_id_for(&self, entity: &Entity) -> crate::Result<String>;

    /// Builds a global ID from a (model, primary key) pair without loading
    /// the entity. Backs the belongs-to fast path for ID companion fields.
    fn global_id_for_key(&self, model: &str, key: &Value) -> crate::Result<String>;
}

/// The pluggable authorization predicate, invoked once per distinct
/// (entity, action) pair of a mutation.
pub trait AuthorizationHook: Send + Sync {
    fn authorize(&self, action: ChangeAction, entity: &Entity) -> Result<(), AccessDenied>;
}

#[derive(Debug, Clone)]
pub struct AccessDenied {
    pub action: ChangeAction,
    pub model: String,
}

impl From<AccessDenied> for CoreError {
    fn from(denied: AccessDenied) -> Self {
        CoreError::AccessDenied {
            action: denied.action,
            model: denied.model,
        }
    }
}

/// Intrinsic entity validation, run for every distinct entity a change-set
/// touches.
pub trait EntityValidator: Send + Sync {
    fn validate(&self, entity: &Entity) -> Vec<ValidationFailure>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFailure {
    pub attribute: String,
    pub message: String,
}

impl ValidationFailure {
    pub fn new(attribute: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationFailure {
            attribute: attribute.into(),
            message: message.into(),
        }
    }
}

/// Everything one external request carries through resolution and mutation:
/// the datamodel, the storage collaborator, the pluggable hooks, the identity
/// cache and the batcher. Lives exactly as long as the request.
pub struct RequestContext {
    datamodel: Arc<Datamodel>,
    storage: Arc<dyn Storage>,
    identity: Arc<dyn IdentityResolver>,
    authorizer: Arc<dyn AuthorizationHook>,
    validator: Arc<dyn EntityValidator>,
    scope: RequestScope,
    batcher: Batcher,
}

impl RequestContext {
    pub fn new(
        datamodel: Arc<Datamodel>,
        storage: Arc<dyn Storage>,
        identity: Arc<dyn IdentityResolver>,
        authorizer: Arc<dyn AuthorizationHook>,
        validator: Arc<dyn EntityValidator>,
    ) -> Self {
        RequestContext {
            datamodel,
            storage,
            identity,
            authorizer,
            validator,
            scope: RequestScope::new(),
            batcher: Batcher::new(),
        }
    }

    pub fn datamodel(&self) -> &Datamodel {
        &self.datamodel
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub fn identity(&self) -> &dyn IdentityResolver {
        self.identity.as_ref()
    }

    pub fn authorizer(&self) -> &dyn AuthorizationHook {
        self.authorizer.as_ref()
    }

    pub fn validator(&self) -> &dyn EntityValidator {
        self.validator.as_ref()
    }

    pub fn scope(&self) -> &RequestScope {
        &self.scope
    }

    pub fn batcher(&self) -> &Batcher {
        &self.batcher
    }
}
