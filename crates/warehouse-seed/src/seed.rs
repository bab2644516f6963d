//! Seed batches and seed-file parsing.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, EntityDescriptor};
use crate::error::LoadError;
use crate::value::{Row, Value, canonical_key, describe_key, key_of};

/// Example data shipped with the loader.
const BUILTIN_SEED: &str = include_str!("../seed/warehouse.json");

/// What to do when a row's primary key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Leave the existing row untouched.
    #[default]
    Skip,
    /// Overwrite non-key columns and touch the modification timestamp.
    Upsert,
    /// Abort the batch.
    Fail,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::Skip => "skip",
            ConflictPolicy::Upsert => "upsert",
            ConflictPolicy::Fail => "fail",
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(ConflictPolicy::Skip),
            "upsert" => Ok(ConflictPolicy::Upsert),
            "fail" => Ok(ConflictPolicy::Fail),
            other => Err(format!("unknown conflict policy: {other}")),
        }
    }
}

/// Ordered rows for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedBatch {
    pub entity: String,
    pub policy: ConflictPolicy,
    pub rows: Vec<Row>,
}

impl SeedBatch {
    pub fn new(entity: impl Into<String>, policy: ConflictPolicy) -> Self {
        Self {
            entity: entity.into(),
            policy,
            rows: Vec::new(),
        }
    }

    pub fn with_row<K, I>(mut self, row: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        self.rows
            .push(row.into_iter().map(|(k, v)| (k.into(), v)).collect());
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Checks that every row carries a complete primary key and that no key
    /// repeats within the batch.
    pub fn check_keys(&self, entity: &EntityDescriptor) -> Result<(), LoadError> {
        let mut seen = HashSet::new();
        for (index, row) in self.rows.iter().enumerate() {
            let key = key_of(row, &entity.primary_key);
            if key.iter().any(Value::is_null) {
                return Err(LoadError::invalid_seed(
                    &entity.name,
                    format!(
                        "row {index} is missing primary key ({})",
                        entity.primary_key.join(", ")
                    ),
                ));
            }
            if !seen.insert(canonical_key(&key)) {
                return Err(LoadError::DuplicateKeyInBatch {
                    entity: entity.name.clone(),
                    key: describe_key(&entity.primary_key, &key),
                });
            }
        }
        Ok(())
    }
}

/// A batch as written in a seed file: either a bare row array or an object
/// carrying its own policy.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBatch {
    Rows(Vec<serde_json::Map<String, serde_json::Value>>),
    WithPolicy {
        policy: Option<ConflictPolicy>,
        rows: Vec<serde_json::Map<String, serde_json::Value>>,
    },
}

/// All batches for a run, keyed by qualified entity name.
#[derive(Debug, Clone, Default)]
pub struct SeedSet {
    batches: BTreeMap<String, SeedBatch>,
}

impl SeedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a batch. Rows for an entity already present are appended.
    pub fn insert(&mut self, batch: SeedBatch) {
        match self.batches.get_mut(&batch.entity) {
            Some(existing) => existing.rows.extend(batch.rows),
            None => {
                self.batches.insert(batch.entity.clone(), batch);
            }
        }
    }

    pub fn with(mut self, batch: SeedBatch) -> Self {
        self.insert(batch);
        self
    }

    pub fn get(&self, entity: &str) -> Option<&SeedBatch> {
        self.batches.get(entity)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SeedBatch> {
        self.batches.values()
    }

    pub fn total_rows(&self) -> usize {
        self.batches.values().map(SeedBatch::len).sum()
    }

    /// Parses a seed document against the catalog.
    ///
    /// Keys may be qualified entity names, bare public table names or
    /// aliases, but each entity may appear under one key only. Row values
    /// are coerced to the declared column types.
    pub fn from_json_str(
        json: &str,
        catalog: &Catalog,
        default_policy: ConflictPolicy,
    ) -> Result<Self, LoadError> {
        let raw: BTreeMap<String, RawBatch> = serde_json::from_str(json)?;
        let mut set = SeedSet::new();

        for (key, raw_batch) in raw {
            let entity = catalog
                .lookup(&key)
                .ok_or_else(|| LoadError::UnknownEntity(key.clone()))?;
            if set.get(&entity.name).is_some() {
                return Err(LoadError::invalid_seed(
                    &entity.name,
                    format!("listed more than once (again as {key:?})"),
                ));
            }
            let (policy, raw_rows) = match raw_batch {
                RawBatch::Rows(rows) => (default_policy, rows),
                RawBatch::WithPolicy { policy, rows } => {
                    (policy.unwrap_or(default_policy), rows)
                }
            };

            let mut batch = SeedBatch::new(entity.name.clone(), policy);
            for raw_row in raw_rows {
                batch.rows.push(convert_row(entity, raw_row)?);
            }
            set.insert(batch);
        }

        Ok(set)
    }

    pub fn from_path(
        path: impl AsRef<Path>,
        catalog: &Catalog,
        default_policy: ConflictPolicy,
    ) -> Result<Self, LoadError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json, catalog, default_policy)
    }

    /// The example set: three affiliate users, six platform users and five
    /// affiliate links.
    pub fn builtin(catalog: &Catalog, default_policy: ConflictPolicy) -> Result<Self, LoadError> {
        Self::from_json_str(BUILTIN_SEED, catalog, default_policy)
    }
}

fn convert_row(
    entity: &EntityDescriptor,
    raw: serde_json::Map<String, serde_json::Value>,
) -> Result<Row, LoadError> {
    let mut row = Row::new();
    for (column, json) in raw {
        let def = entity.column(&column).ok_or_else(|| {
            LoadError::invalid_seed(&entity.name, format!("unknown column {column}"))
        })?;
        let value = Value::from_json(&json, def.column_type)
            .map_err(|e| LoadError::invalid_seed(&entity.name, format!("{column}: {e}")))?;
        row.insert(column, value);
    }
    Ok(row)
}
