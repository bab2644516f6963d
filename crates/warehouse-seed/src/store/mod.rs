//! The storage boundary.
//!
//! The loader talks to a relational store only through [`Store`]. The store
//! owns constraint enforcement: primary-key conflicts are resolved atomically
//! by the store's native conflict handling, and its foreign-key and
//! uniqueness errors are authoritative.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use thiserror::Error;

use crate::catalog::EntityDescriptor;
use crate::seed::ConflictPolicy;
use crate::value::{Row, Value};

/// How a deferred patch treats values already present on the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchMode {
    /// Write every value.
    Overwrite,
    /// Write only into columns that are currently NULL.
    FillNull,
}

/// What happened to a single row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Inserted,
    Skipped,
    Updated,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Duplicate key {key} violates {constraint}")]
    UniqueViolation { constraint: String, key: String },

    #[error("Foreign key {constraint} violated: {detail}")]
    ForeignKeyViolation { constraint: String, detail: String },

    #[error("Column {column} of {entity} may not be null")]
    NotNullViolation { entity: String, column: String },

    #[error("No row {key} in {entity}")]
    MissingRow { entity: String, key: String },

    #[error("No transaction in progress")]
    NoTransaction,

    #[error("Transaction already in progress")]
    TransactionInProgress,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A relational store the loader can seed.
///
/// Without an open transaction every call commits on its own.
#[allow(async_fn_in_trait)]
pub trait Store {
    async fn begin(&mut self) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;

    /// Inserts one row, resolving a primary-key conflict per `policy` in a
    /// single atomic statement.
    ///
    /// Under [`ConflictPolicy::Upsert`] every non-immutable column present in
    /// `row` is overwritten on conflict.
    async fn insert_row(
        &mut self,
        entity: &EntityDescriptor,
        row: &Row,
        policy: ConflictPolicy,
    ) -> Result<RowOutcome, StoreError>;

    /// Sets `values` on the row identified by its primary key. Under
    /// [`PatchMode::FillNull`] columns holding a value are left alone.
    async fn patch_row(
        &mut self,
        entity: &EntityDescriptor,
        key: &[Value],
        values: &Row,
        mode: PatchMode,
    ) -> Result<(), StoreError>;

    /// Reads every row of an entity.
    async fn scan(&mut self, entity: &EntityDescriptor) -> Result<Vec<Row>, StoreError>;
}
