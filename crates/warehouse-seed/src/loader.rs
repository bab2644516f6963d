//! Orchestrates a seed run: resolve, apply, patch, validate.

use std::time::Instant;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::applier::{BatchApplier, BatchReport, DeferredPatch};
use crate::catalog::Catalog;
use crate::config::TransactionScope;
use crate::error::LoadError;
use crate::resolver::{LoadOrder, resolve};
use crate::seed::SeedSet;
use crate::store::Store;
use crate::validator::{ValidationReport, Validator};

/// Outcome of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    /// Entity load order used for the run.
    pub order: Vec<String>,
    pub batches: Vec<BatchReport>,
    pub deferred_patches: usize,
    pub validation: ValidationReport,
    pub elapsed_ms: u64,
}

impl LoadReport {
    pub fn inserted(&self) -> usize {
        self.batches.iter().map(|b| b.inserted).sum()
    }

    pub fn skipped(&self) -> usize {
        self.batches.iter().map(|b| b.skipped).sum()
    }

    pub fn updated(&self) -> usize {
        self.batches.iter().map(|b| b.updated).sum()
    }

    /// True when validation found nothing.
    pub fn is_clean(&self) -> bool {
        self.validation.is_empty()
    }
}

/// Seeds a [`Store`] from a [`SeedSet`] in dependency order.
pub struct SeedLoader<S: Store> {
    store: S,
    catalog: Catalog,
    scope: TransactionScope,
}

impl<S: Store> SeedLoader<S> {
    pub fn new(store: S, catalog: Catalog) -> Self {
        Self {
            store,
            catalog,
            scope: TransactionScope::default(),
        }
    }

    pub fn with_transaction_scope(mut self, scope: TransactionScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Runs the seed set using the current time as the run clock.
    pub async fn run(&mut self, seeds: &SeedSet) -> Result<LoadReport, LoadError> {
        self.run_at(seeds, OffsetDateTime::now_utc()).await
    }

    /// Runs the seed set with an explicit run clock.
    ///
    /// Structural problems (dependency cycles, unknown entities, duplicate
    /// keys within a batch) are reported before anything is written.
    pub async fn run_at(
        &mut self,
        seeds: &SeedSet,
        now: OffsetDateTime,
    ) -> Result<LoadReport, LoadError> {
        let started = Instant::now();
        let order = resolve(&self.catalog)?;
        for batch in seeds.iter() {
            let entity = self
                .catalog
                .get(&batch.entity)
                .ok_or_else(|| LoadError::UnknownEntity(batch.entity.clone()))?;
            batch.check_keys(entity)?;
        }

        info!(
            "Seeding {} rows across {} batches ({:?} transaction scope)",
            seeds.total_rows(),
            seeds.iter().count(),
            self.scope
        );

        let applier = BatchApplier::new(&self.catalog, &order, now);
        let (batches, deferred_patches) = match self.scope {
            TransactionScope::Run => {
                self.store.begin().await?;
                match apply_all(&applier, &mut self.store, &order, seeds, self.scope).await {
                    Ok(applied) => {
                        self.store.commit().await?;
                        applied
                    }
                    Err(e) => {
                        warn!("Seeding failed, rolling back: {e}");
                        rollback(&mut self.store).await;
                        return Err(e);
                    }
                }
            }
            TransactionScope::Batch => {
                apply_all(&applier, &mut self.store, &order, seeds, self.scope).await?
            }
        };

        let validation = Validator::new(&self.catalog).validate(&mut self.store).await?;
        let report = LoadReport {
            order: order.entities().to_vec(),
            batches,
            deferred_patches,
            validation,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            "Seed completed: {} inserted, {} skipped, {} updated, {} findings",
            report.inserted(),
            report.skipped(),
            report.updated(),
            report.validation.len()
        );
        Ok(report)
    }
}

/// Rolls back after a failed write. A rollback failure is logged; the
/// caller still reports the error that caused it.
async fn rollback<S: Store>(store: &mut S) {
    if let Err(e) = store.rollback().await {
        error!("Rollback failed: {e}");
    }
}

/// Applies every batch in load order, then the deferred references.
///
/// Under [`TransactionScope::Batch`] each batch and the deferred pass get
/// their own transaction; a failing one is rolled back and earlier ones stay
/// committed. Under [`TransactionScope::Run`] the caller owns the transaction.
async fn apply_all<S: Store>(
    applier: &BatchApplier<'_>,
    store: &mut S,
    order: &LoadOrder,
    seeds: &SeedSet,
    scope: TransactionScope,
) -> Result<(Vec<BatchReport>, usize), LoadError> {
    let per_batch = scope == TransactionScope::Batch;
    let mut reports = Vec::new();
    let mut deferred: Vec<DeferredPatch> = Vec::new();

    for name in order.entities() {
        let Some(batch) = seeds.get(name) else {
            continue;
        };
        if per_batch {
            store.begin().await?;
        }
        match applier.apply(store, batch, &mut deferred).await {
            Ok(report) => {
                if per_batch {
                    store.commit().await?;
                }
                reports.push(report);
            }
            Err(e) => {
                if per_batch {
                    warn!("Batch {name} failed, rolling back: {e}");
                    rollback(store).await;
                }
                return Err(e);
            }
        }
    }

    if per_batch && !deferred.is_empty() {
        store.begin().await?;
        return match applier.apply_deferred(store, &deferred).await {
            Ok(applied) => {
                store.commit().await?;
                Ok((reports, applied))
            }
            Err(e) => {
                warn!("Deferred references failed, rolling back: {e}");
                rollback(store).await;
                Err(e)
            }
        };
    }

    let applied = applier.apply_deferred(store, &deferred).await?;
    Ok((reports, applied))
}
