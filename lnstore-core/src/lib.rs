//! lnstore core - key, descriptor and error types
//!
//! Pure data structures shared by the storage engine and its backends.
//! This crate contains no caching or storage logic.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod key;

pub use config::{map_size_bytes, LevelConfig, LmdbConfig, StoreConfig, ValueConfig};
pub use descriptor::{
    IndexDescriptor, LevelDescriptor, LevelFlags, StructureDescriptor, ValueDescriptor,
};
pub use error::{ConfigError, LnError, LnResult, StoreError, ValidationError};
pub use key::{format_walk, Key, KeyType, Value, Walk};
