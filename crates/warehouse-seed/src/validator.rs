//! Post-load integrity checks.
//!
//! The validator reads every entity back from the store and reports dangling
//! references and duplicate keys. It never repairs anything.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::{Catalog, EntityDescriptor};
use crate::error::LoadError;
use crate::store::Store;
use crate::value::{Row, Value, canonical_key, describe_key, key_of};

/// One violated constraint on one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationFinding {
    pub entity: String,
    pub row: String,
    pub constraint: String,
    pub detail: String,
}

/// Findings from a validation pass. Empty means the data is consistent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub findings: Vec<ValidationFinding>,
}

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationFinding> {
        self.findings.iter()
    }
}

pub struct Validator<'a> {
    catalog: &'a Catalog,
}

impl<'a> Validator<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Scans every catalog entity from the store and checks it.
    pub async fn validate<S: Store>(&self, store: &mut S) -> Result<ValidationReport, LoadError> {
        let mut snapshot = BTreeMap::new();
        for entity in self.catalog.iter() {
            snapshot.insert(entity.name.clone(), store.scan(entity).await?);
        }
        Ok(self.check(&snapshot))
    }

    /// Checks a snapshot of entity rows against the catalog's constraints.
    pub fn check(&self, snapshot: &BTreeMap<String, Vec<Row>>) -> ValidationReport {
        let mut findings = Vec::new();
        // (entity, referenced columns) -> set of present keys
        let mut targets: HashMap<(String, Vec<String>), HashSet<String>> = HashMap::new();

        for entity in self.catalog.iter() {
            let rows = snapshot.get(&entity.name).map(Vec::as_slice).unwrap_or(&[]);
            check_primary_key(entity, rows, &mut findings);
            check_unique(entity, rows, &mut findings);

            for fk in &entity.foreign_keys {
                let present = targets
                    .entry((fk.referenced_entity.clone(), fk.referenced_columns.clone()))
                    .or_insert_with(|| {
                        snapshot
                            .get(&fk.referenced_entity)
                            .into_iter()
                            .flatten()
                            .map(|r| canonical_key(&key_of(r, &fk.referenced_columns)))
                            .collect()
                    });

                for (index, row) in rows.iter().enumerate() {
                    let values = key_of(row, &fk.columns);
                    if values.iter().any(Value::is_null) {
                        continue;
                    }
                    if !present.contains(&canonical_key(&values)) {
                        findings.push(ValidationFinding {
                            entity: entity.name.clone(),
                            row: row_id(entity, row, index),
                            constraint: format!("foreign key {}", fk.describe()),
                            detail: format!(
                                "{} has no match in {}",
                                describe_key(&fk.columns, &values),
                                fk.referenced_entity
                            ),
                        });
                    }
                }
            }
        }

        if findings.is_empty() {
            info!("Validation passed for {} entities", self.catalog.len());
        } else {
            for finding in &findings {
                warn!(
                    "{} [{}] {}: {}",
                    finding.entity, finding.row, finding.constraint, finding.detail
                );
            }
        }

        ValidationReport { findings }
    }
}

fn row_id(entity: &EntityDescriptor, row: &Row, index: usize) -> String {
    if entity.primary_key.is_empty() {
        return format!("row #{index}");
    }
    describe_key(&entity.primary_key, &key_of(row, &entity.primary_key))
}

fn check_primary_key(entity: &EntityDescriptor, rows: &[Row], findings: &mut Vec<ValidationFinding>) {
    if entity.primary_key.is_empty() {
        return;
    }
    let constraint = format!("primary key {}", entity.primary_key_constraint());
    let mut seen = HashSet::new();

    for (index, row) in rows.iter().enumerate() {
        let key = key_of(row, &entity.primary_key);
        if key.iter().any(Value::is_null) {
            findings.push(ValidationFinding {
                entity: entity.name.clone(),
                row: format!("row #{index}"),
                constraint: constraint.clone(),
                detail: "null in primary key".to_string(),
            });
        } else if !seen.insert(canonical_key(&key)) {
            findings.push(ValidationFinding {
                entity: entity.name.clone(),
                row: describe_key(&entity.primary_key, &key),
                constraint: constraint.clone(),
                detail: "duplicate primary key".to_string(),
            });
        }
    }
}

fn check_unique(entity: &EntityDescriptor, rows: &[Row], findings: &mut Vec<ValidationFinding>) {
    for unique in &entity.unique {
        let mut seen = HashSet::new();
        for (index, row) in rows.iter().enumerate() {
            let values = key_of(row, &unique.columns);
            if values.iter().any(Value::is_null) {
                continue;
            }
            if !seen.insert(canonical_key(&values)) {
                findings.push(ValidationFinding {
                    entity: entity.name.clone(),
                    row: row_id(entity, row, index),
                    constraint: format!("unique {}", unique.name),
                    detail: format!("duplicate value {}", describe_key(&unique.columns, &values)),
                });
            }
        }
    }
}
