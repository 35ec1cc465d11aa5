//! Store configuration loading.
//!
//! A store is described by a TOML document naming its table, its key levels
//! (most significant first) and optionally its value column and LMDB
//! location. Unknown fields are rejected.

use crate::{
    ConfigError, KeyType, LevelDescriptor, LevelFlags, StructureDescriptor, ValueDescriptor,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    pub table: String,
    /// Default for per-call key and trie validation.
    #[serde(default = "default_validate")]
    pub validate: bool,
    pub levels: Vec<LevelConfig>,
    pub value: Option<ValueConfig>,
    pub lmdb: Option<LmdbConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LevelConfig {
    pub name: String,
    pub key_type: KeyType,
    pub storage: Option<String>,
    #[serde(default)]
    pub flags: Vec<String>,
    pub pattern: Option<String>,
    pub max_len: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValueConfig {
    pub name: String,
    pub storage: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LmdbConfig {
    pub path: PathBuf,
    pub map_size_mb: usize,
}

impl LmdbConfig {
    pub fn map_size_bytes(&self) -> Result<usize, ConfigError> {
        map_size_bytes(self.map_size_mb)
    }
}

/// Convert an LMDB map size in MiB to bytes.
pub fn map_size_bytes(map_size_mb: usize) -> Result<usize, ConfigError> {
    if map_size_mb == 0 {
        return Err(ConfigError::InvalidValue {
            field: "lmdb.map_size_mb".to_string(),
            value: "0".to_string(),
            reason: "must be > 0".to_string(),
        });
    }
    map_size_mb
        .checked_mul(1024 * 1024)
        .ok_or_else(|| ConfigError::InvalidValue {
            field: "lmdb.map_size_mb".to_string(),
            value: map_size_mb.to_string(),
            reason: "overflows the address space".to_string(),
        })
}

fn default_validate() -> bool {
    true
}

impl StoreConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: StoreConfig = toml::from_str(source).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.table.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "table".to_string(),
            });
        }
        if self.levels.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "levels".to_string(),
            });
        }
        for level in &self.levels {
            parse_flags(&level.name, &level.flags)?;
        }
        if let Some(lmdb) = &self.lmdb {
            if lmdb.path.as_os_str().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "lmdb.path".to_string(),
                    value: String::new(),
                    reason: "must not be empty".to_string(),
                });
            }
            lmdb.map_size_bytes()?;
        }
        // Descriptor construction performs the remaining structural checks.
        self.descriptor().map(|_| ())
    }

    /// Build the immutable structure descriptor for this store.
    pub fn descriptor(&self) -> Result<StructureDescriptor, ConfigError> {
        let mut levels = Vec::with_capacity(self.levels.len());
        for level in &self.levels {
            let mut desc = match level.key_type {
                KeyType::Int => LevelDescriptor::int(&level.name),
                KeyType::Str => LevelDescriptor::str(&level.name),
            };
            if let Some(storage) = &level.storage {
                desc = desc.with_storage(storage);
            }
            desc = desc.with_flags(parse_flags(&level.name, &level.flags)?);
            if let Some(max_len) = level.max_len {
                desc = desc.with_max_len(max_len);
            }
            if let Some(pattern) = &level.pattern {
                desc = desc.with_pattern(pattern)?;
            }
            levels.push(desc);
        }
        let value = self
            .value
            .as_ref()
            .map(|v| ValueDescriptor {
                name: v.name.clone(),
                storage: v.storage.clone(),
            })
            .unwrap_or_default();
        StructureDescriptor::new(&self.table, levels, value)
    }
}

fn parse_flags(level: &str, names: &[String]) -> Result<LevelFlags, ConfigError> {
    let mut flags = LevelFlags::empty();
    for name in names {
        let flag = LevelFlags::from_name(&name.to_ascii_uppercase()).ok_or_else(|| {
            ConfigError::InvalidValue {
                field: format!("levels.{}.flags", level),
                value: name.clone(),
                reason: "expected one of: unsigned, non_empty".to_string(),
            }
        })?;
        flags |= flag;
    }
    Ok(flags)
}
