//! lnstore Storage - Paged LN Store, Authority Cache and Store Backends
//!
//! Records are addressed by an ordered tuple of N keys plus one value. The
//! [`PagedStore`] keeps an in-process [`AuthorityCache`] in front of a
//! [`Store`], tracking not only what is cached but which cached subtrees
//! are known to be complete, so repeated reads stop touching the store.
//!
//! Backends: [`MemoryStore`] (tests, embedding) and [`LmdbStore`] (heed).

pub mod cache;
pub mod options;
pub mod paged;
pub mod store;
pub mod trie;

pub use cache::{Authority, AuthorityCache, CacheStats, Scope};
pub use options::{AddInput, Fetched, GetOptions, Output, Query, ResultMode, StoreOptions};
pub use paged::PagedStore;
pub use store::{
    Columns, Filter, LmdbStore, MemoryStore, Mutation, MutationSummary, Selection, Shape, Store,
};
pub use trie::{
    clip, flatten, flatten_at, flatten_leaves, flatten_named, flatten_request, unflatten,
    FlattenMode, Record, Request, Trie,
};

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
