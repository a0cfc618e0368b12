use async_trait::async_trait;
use model_structure::{Entity, ModelRef, OrderBy, Record, Value};

use crate::filter::{Filter, FilterGroup};

/// The storage collaborator every loader and the persister delegate to.
///
/// Implementations own SQL generation, pooling and transaction isolation; the
/// core only ever hands them fully combined queries.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Rows whose primary key is in `keys`. Order is not significant.
    async fn find_by_keys(&self, model: &ModelRef, keys: &[Value]) -> crate::Result<Vec<Record>>;

    /// Rows matching any of the disjunctive filter groups. For every rank
    /// expression the store computes a dense-rank value over the full result
    /// set, returned positionally alongside each row.
    async fn find_by_filter_union(
        &self,
        model: &ModelRef,
        groups: &[FilterGroup],
        ranks: &[RankExpression],
    ) -> crate::Result<Vec<RankedRecord>>;

    /// Rows that are members of any of the given collections, with one
    /// membership flag per collection and a rank per sorted collection.
    async fn find_by_collection_membership(
        &self,
        model: &ModelRef,
        collections: &[CollectionQuery],
    ) -> crate::Result<Vec<MembershipRecord>>;

    /// Opens the transaction bracketing one mutation's persistence pass.
    async fn start_transaction(&self) -> crate::Result<Box<dyn StorageTransaction + '_>>;
}

#[async_trait]
pub trait StorageTransaction: Send + Sync {
    /// Persists the entity's current attribute values, returning its primary
    /// key (assigning a fresh one for new records).
    async fn save(&mut self, entity: &Entity) -> crate::Result<Value>;

    async fn delete(&mut self, entity: &Entity) -> crate::Result<()>;

    async fn commit(&mut self) -> crate::Result<()>;

    async fn rollback(&mut self) -> crate::Result<()>;
}

/// An injectable ORDER-BY-derived rank column, `RANK() OVER (ORDER BY ...)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RankExpression {
    pub order_by: Vec<OrderBy>,
}

/// A reference to an already-defined filtered/sorted collection of rows.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionQuery {
    pub filter: Filter,
    pub order_by: Vec<OrderBy>,
}

#[derive(Debug, Clone)]
pub struct RankedRecord {
    pub record: Record,
    /// One dense-rank value per requested rank expression.
    pub ranks: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct MembershipRecord {
    pub record: Record,
    /// One membership flag per requested collection.
    pub memberships: Vec<bool>,
    /// One rank per collection; `None` for unsorted collections.
    pub ranks: Vec<Option<i64>>,
}
