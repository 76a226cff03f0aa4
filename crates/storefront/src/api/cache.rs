//! Cache types for catalog responses.

use super::types::{ListPage, Miner, Pool};

/// Cache key for catalog lists.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum CacheKey {
    Miners { page: u32, limit: u32 },
    Pools,
}

/// Cached value types.
#[derive(Debug, Clone)]
pub enum CacheValue {
    Miners(ListPage<Miner>),
    Pools(ListPage<Pool>),
}
