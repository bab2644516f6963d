//! Seed loader for the marketplace/billing warehouse.
//!
//! This crate (re-)populates a graph of foreign-key-linked tables in
//! dependency order. Every batch is applied with a conflict policy, so runs
//! are safe to repeat, and the loaded data is validated afterwards.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use warehouse_seed::prelude::*;
//!
//! let catalog = warehouse();
//! let seeds = SeedSet::builtin(&catalog, ConflictPolicy::Skip)?;
//!
//! let mut loader = SeedLoader::new(PgStore::new(pool), catalog);
//! let report = loader.run(&seeds).await?;
//! assert!(report.is_clean());
//! ```

pub mod applier;
pub mod catalog;
pub mod config;
pub mod error;
pub mod loader;
pub mod resolver;
pub mod seed;
pub mod store;
pub mod validator;
pub mod value;

pub mod prelude {
    //! Convenient re-exports for common usage.

    pub use crate::applier::{BatchApplier, BatchReport};
    pub use crate::catalog::{Catalog, ColumnType, EntityDescriptor, OnDelete, warehouse};
    pub use crate::config::{LoaderConfig, TransactionScope};
    pub use crate::error::LoadError;
    pub use crate::loader::{LoadReport, SeedLoader};
    pub use crate::resolver::{LoadOrder, resolve};
    pub use crate::seed::{ConflictPolicy, SeedBatch, SeedSet};
    pub use crate::store::{MemoryStore, PatchMode, PgStore, RowOutcome, Store, StoreError};
    pub use crate::validator::{ValidationFinding, ValidationReport, Validator};
    pub use crate::value::{Row, Value};
}
