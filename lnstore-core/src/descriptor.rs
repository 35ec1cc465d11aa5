//! Structure descriptors.
//!
//! A `StructureDescriptor` is the immutable per-store metadata: one
//! `LevelDescriptor` per key level (most significant first), the value
//! column, and the composite unique index across all key columns. It is
//! built once when a store is constructed and never mutated.

use crate::{ConfigError, Key, KeyType, LnError, LnResult, ValidationError, Value};
use bitflags::bitflags;
use regex::Regex;
use serde_json::Map;

bitflags! {
    /// Per-level key constraints.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LevelFlags: u8 {
        /// Integer keys must be >= 0
        const UNSIGNED = 0b0000_0001;
        /// String keys must not be empty
        const NON_EMPTY = 0b0000_0010;
    }
}

/// Descriptor for one key level.
#[derive(Debug, Clone)]
pub struct LevelDescriptor {
    pub name: String,
    pub key_type: KeyType,
    /// Storage column type, e.g. `BIGINT` or `VARCHAR(32)`.
    pub storage: String,
    pub flags: LevelFlags,
    pub max_len: Option<usize>,
    pattern: Option<Regex>,
}

impl LevelDescriptor {
    /// Integer key level stored as `BIGINT`.
    pub fn int(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_type: KeyType::Int,
            storage: "BIGINT".to_string(),
            flags: LevelFlags::empty(),
            max_len: None,
            pattern: None,
        }
    }

    /// String key level stored as `VARCHAR(255)`.
    pub fn str(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_type: KeyType::Str,
            storage: "VARCHAR(255)".to_string(),
            flags: LevelFlags::empty(),
            max_len: None,
            pattern: None,
        }
    }

    pub fn with_storage(mut self, storage: impl Into<String>) -> Self {
        self.storage = storage.into();
        self
    }

    pub fn with_flags(mut self, flags: LevelFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }

    /// Attach a format check for string keys.
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self, ConfigError> {
        let re = Regex::new(pattern).map_err(|e| ConfigError::InvalidValue {
            field: format!("levels.{}.pattern", self.name),
            value: pattern.to_string(),
            reason: e.to_string(),
        })?;
        self.pattern = Some(re);
        Ok(self)
    }

    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_ref().map(|re| re.as_str())
    }
}

/// Descriptor for the value column (`Level0`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueDescriptor {
    pub name: String,
    pub storage: String,
}

impl Default for ValueDescriptor {
    fn default() -> Self {
        Self {
            name: "value".to_string(),
            storage: "LONGTEXT".to_string(),
        }
    }
}

/// Composite index across every key column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Immutable per-store metadata.
#[derive(Debug, Clone)]
pub struct StructureDescriptor {
    table: String,
    levels: Vec<LevelDescriptor>,
    value: ValueDescriptor,
    index: IndexDescriptor,
}

impl StructureDescriptor {
    /// Build a descriptor. `levels` are listed most significant first.
    pub fn new(
        table: impl Into<String>,
        levels: Vec<LevelDescriptor>,
        value: ValueDescriptor,
    ) -> Result<Self, ConfigError> {
        let table = table.into();
        let table_re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").map_err(|e| {
            ConfigError::InvalidValue {
                field: "table".to_string(),
                value: table.clone(),
                reason: e.to_string(),
            }
        })?;
        if !table_re.is_match(&table) {
            return Err(ConfigError::InvalidValue {
                field: "table".to_string(),
                value: table,
                reason: "must be a plain identifier".to_string(),
            });
        }
        if levels.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "levels".to_string(),
            });
        }
        for (i, level) in levels.iter().enumerate() {
            if level.name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("levels[{}].name", i),
                    value: level.name.clone(),
                    reason: "must not be empty".to_string(),
                });
            }
            if levels[..i].iter().any(|l| l.name == level.name) || level.name == value.name {
                return Err(ConfigError::InvalidValue {
                    field: format!("levels[{}].name", i),
                    value: level.name.clone(),
                    reason: "column names must be unique".to_string(),
                });
            }
            if level.key_type == KeyType::Int && (level.max_len.is_some() || level.pattern.is_some())
            {
                return Err(ConfigError::InvalidValue {
                    field: format!("levels[{}]", i),
                    value: level.name.clone(),
                    reason: "pattern and max_len apply to str levels only".to_string(),
                });
            }
        }

        let index = IndexDescriptor {
            name: format!("{}_walk", table),
            columns: levels.iter().map(|l| l.name.clone()).collect(),
            unique: true,
        };

        Ok(Self {
            table,
            levels,
            value,
            index,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Number of key levels (N).
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn levels(&self) -> &[LevelDescriptor] {
        &self.levels
    }

    pub fn value(&self) -> &ValueDescriptor {
        &self.value
    }

    pub fn index(&self) -> &IndexDescriptor {
        &self.index
    }

    /// Descriptor for the key at walk position `position` (0 = LevelN).
    pub fn level_at(&self, position: usize) -> Option<&LevelDescriptor> {
        self.levels.get(position)
    }

    /// Walk position of a level number (`LevelN` is position 0, `Level1` is N-1).
    pub fn position_of(&self, level: usize) -> LnResult<usize> {
        if level == 0 || level > self.depth() {
            return Err(ValidationError::InvalidKeyAtLevel {
                level: format!("Level{}", level),
                reason: format!("store has levels 1..={}", self.depth()),
            }
            .into());
        }
        Ok(self.depth() - level)
    }

    /// Human label for a walk position, e.g. `Level3 (section)`.
    pub fn level_label(&self, position: usize) -> String {
        match self.levels.get(position) {
            Some(level) => format!("Level{} ({})", self.depth() - position, level.name),
            None => format!("Level{}", self.depth() as isize - position as isize),
        }
    }

    /// Check one key component against the level declared at `position`.
    pub fn validate_key(&self, position: usize, key: &Key) -> LnResult<()> {
        let level = self.levels.get(position).ok_or_else(|| {
            LnError::from(ValidationError::InvalidKeyAtLevel {
                level: self.level_label(position),
                reason: format!("walk is deeper than the {} declared levels", self.depth()),
            })
        })?;

        if key.key_type() != level.key_type {
            return Err(ValidationError::TypeMismatch {
                level: self.level_label(position),
                expected: level.key_type,
                got: key.key_type(),
            }
            .into());
        }

        let invalid = |reason: String| -> LnError {
            ValidationError::InvalidKeyAtLevel {
                level: self.level_label(position),
                reason,
            }
            .into()
        };

        match key {
            Key::Int(v) => {
                if level.flags.contains(LevelFlags::UNSIGNED) && *v < 0 {
                    return Err(invalid(format!("{} is negative on an unsigned level", v)));
                }
            }
            Key::Str(s) => {
                if level.flags.contains(LevelFlags::NON_EMPTY) && s.is_empty() {
                    return Err(invalid("empty string".to_string()));
                }
                if let Some(max) = level.max_len {
                    if s.chars().count() > max {
                        return Err(invalid(format!("{:?} is longer than {} chars", s, max)));
                    }
                }
                if let Some(re) = &level.pattern {
                    if !re.is_match(s) {
                        return Err(invalid(format!("{:?} does not match {}", s, re.as_str())));
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate every component of a (possibly partial) walk.
    pub fn validate_walk(&self, walk: &[Key]) -> LnResult<()> {
        for (position, key) in walk.iter().enumerate() {
            self.validate_key(position, key)?;
        }
        Ok(())
    }

    /// Key column names, top level first.
    pub fn columns(&self) -> Vec<&str> {
        self.levels.iter().map(|l| l.name.as_str()).collect()
    }

    /// Name the columns of a flat record: `{"level_n": k, ..., "value": v}`.
    ///
    /// Key-only records (no value) omit the value column.
    pub fn row_to_json(&self, keys: &[Key], value: Option<&Value>) -> Map<String, Value> {
        let mut row = Map::new();
        for (level, key) in self.levels.iter().zip(keys) {
            row.insert(level.name.clone(), key.to_json());
        }
        if let Some(v) = value {
            row.insert(self.value.name.clone(), v.clone());
        }
        row
    }
}
