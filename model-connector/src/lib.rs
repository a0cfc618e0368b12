//! The boundary between the engine and the backing store: equality filters,
//! the condition combiner that packs many filter sets into minimal disjunctive
//! groups, and the async traits a storage collaborator implements.

pub mod filter;

mod error;
mod interface;

pub use error::{ConnectorError, ErrorKind};
pub use filter::{combine, Filter, FilterGroup};
pub use interface::{CollectionQuery, MembershipRecord, RankExpression, RankedRecord, Storage, StorageTransaction};

pub type Result<T> = std::result::Result<T, ConnectorError>;
