//! Applies seed batches to a store under their conflict policy.

use std::collections::BTreeSet;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::catalog::{Catalog, EntityDescriptor};
use crate::error::LoadError;
use crate::resolver::LoadOrder;
use crate::seed::{ConflictPolicy, SeedBatch};
use crate::store::{PatchMode, RowOutcome, Store, StoreError};
use crate::value::{Row, Value, describe_key, key_of};

/// Row counts for one applied batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub entity: String,
    pub policy: ConflictPolicy,
    pub inserted: usize,
    pub skipped: usize,
    pub updated: usize,
    /// Rows with nullable references withheld until every batch is in.
    pub deferred: usize,
}

impl BatchReport {
    fn new(entity: &str, policy: ConflictPolicy) -> Self {
        Self {
            entity: entity.to_string(),
            policy,
            inserted: 0,
            skipped: 0,
            updated: 0,
            deferred: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.inserted + self.skipped + self.updated
    }
}

/// Nullable reference values to set once their targets are loaded.
///
/// Rows written in this run are overwritten. Rows that already existed and
/// were skipped only have their NULL columns filled, so a run that stopped
/// before its deferred pass converges on re-run without clobbering data.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredPatch {
    pub entity: String,
    pub key: Vec<Value>,
    pub values: Row,
    pub mode: PatchMode,
}

/// Applies batches in resolver order.
///
/// All rows of a run share one clock value, used to fill absent creation and
/// modification timestamps and to touch the modification timestamp on upsert.
pub struct BatchApplier<'a> {
    catalog: &'a Catalog,
    order: &'a LoadOrder,
    now: OffsetDateTime,
}

impl<'a> BatchApplier<'a> {
    pub fn new(catalog: &'a Catalog, order: &'a LoadOrder, now: OffsetDateTime) -> Self {
        Self {
            catalog,
            order,
            now,
        }
    }

    /// Nullable foreign-key columns whose target is not loaded strictly
    /// before `entity`. Their values cannot be written on insert.
    pub fn deferred_columns(&self, entity: &EntityDescriptor) -> BTreeSet<String> {
        entity
            .foreign_keys
            .iter()
            .filter(|fk| !entity.is_required(fk))
            .filter(|fk| !self.order.loads_before(&fk.referenced_entity, &entity.name))
            .flat_map(|fk| fk.columns.iter())
            .filter(|c| entity.column(c).is_some_and(|def| def.nullable))
            .cloned()
            .collect()
    }

    /// Prepares a row for insert: fills timestamps and, under upsert,
    /// touches the modification timestamp.
    fn prepare(&self, entity: &EntityDescriptor, row: &Row, policy: ConflictPolicy) -> Row {
        let mut prepared = row.clone();
        if let Some(created_at) = &entity.created_at {
            prepared
                .entry(created_at.clone())
                .or_insert(Value::Timestamp(self.now));
        }
        if let Some(updated_at) = &entity.updated_at {
            if policy == ConflictPolicy::Upsert {
                prepared.insert(updated_at.clone(), Value::Timestamp(self.now));
            } else {
                prepared
                    .entry(updated_at.clone())
                    .or_insert(Value::Timestamp(self.now));
            }
        }
        prepared
    }

    /// Applies one batch. Deferred reference values are appended to
    /// `deferred`.
    pub async fn apply<S: Store>(
        &self,
        store: &mut S,
        batch: &SeedBatch,
        deferred: &mut Vec<DeferredPatch>,
    ) -> Result<BatchReport, LoadError> {
        let entity = self
            .catalog
            .get(&batch.entity)
            .ok_or_else(|| LoadError::UnknownEntity(batch.entity.clone()))?;
        let withheld = self.deferred_columns(entity);
        let mut report = BatchReport::new(&entity.name, batch.policy);

        info!(
            "Seeding {} rows into {} ({})...",
            batch.len(),
            entity.name,
            batch.policy.as_str()
        );

        for row in &batch.rows {
            let mut prepared = self.prepare(entity, row, batch.policy);
            // Explicit NULLs are written with the row.
            let mut patch = Row::new();
            for column in &withheld {
                if let Some(value) = prepared.get(column).filter(|v| !v.is_null()).cloned() {
                    prepared.remove(column);
                    patch.insert(column.clone(), value);
                }
            }

            let key = key_of(&prepared, &entity.primary_key);
            let outcome = store
                .insert_row(entity, &prepared, batch.policy)
                .await
                .map_err(|e| escalate(e, entity, &key))?;
            debug!(
                "{} [{}]: {:?}",
                entity.name,
                describe_key(&entity.primary_key, &key),
                outcome
            );

            match outcome {
                RowOutcome::Inserted => report.inserted += 1,
                RowOutcome::Skipped => report.skipped += 1,
                RowOutcome::Updated => report.updated += 1,
            }
            if !patch.is_empty() {
                report.deferred += 1;
                deferred.push(DeferredPatch {
                    entity: entity.name.clone(),
                    key,
                    values: patch,
                    mode: match outcome {
                        RowOutcome::Skipped => PatchMode::FillNull,
                        RowOutcome::Inserted | RowOutcome::Updated => PatchMode::Overwrite,
                    },
                });
            }
        }

        info!(
            "Seeded {}: {} inserted, {} skipped, {} updated",
            entity.name, report.inserted, report.skipped, report.updated
        );
        Ok(report)
    }

    /// Writes withheld reference values now that every batch is loaded.
    pub async fn apply_deferred<S: Store>(
        &self,
        store: &mut S,
        patches: &[DeferredPatch],
    ) -> Result<usize, LoadError> {
        if patches.is_empty() {
            return Ok(0);
        }
        info!("Applying {} deferred references...", patches.len());

        for patch in patches {
            let entity = self
                .catalog
                .get(&patch.entity)
                .ok_or_else(|| LoadError::UnknownEntity(patch.entity.clone()))?;
            store
                .patch_row(entity, &patch.key, &patch.values, patch.mode)
                .await
                .map_err(|e| escalate(e, entity, &patch.key))?;
        }

        Ok(patches.len())
    }
}

/// Lifts constraint violations into the load error taxonomy. Foreign-key
/// violations are never absorbed.
fn escalate(err: StoreError, entity: &EntityDescriptor, key: &[Value]) -> LoadError {
    let row = describe_key(&entity.primary_key, key);
    match err {
        StoreError::ForeignKeyViolation { constraint, detail } => LoadError::ReferentialIntegrity {
            entity: entity.name.clone(),
            row,
            constraint,
            detail,
        },
        StoreError::UniqueViolation { constraint, key } => LoadError::Conflict {
            entity: entity.name.clone(),
            key,
            constraint,
        },
        other => LoadError::Store(other),
    }
}
