//! In-process store enforcing the catalog's constraints.

use std::collections::{BTreeMap, HashMap};

use crate::catalog::{Catalog, EntityDescriptor};
use crate::seed::ConflictPolicy;
use crate::value::{Row, Value, canonical_key, describe_key, key_of};

use super::{PatchMode, RowOutcome, Store, StoreError};

#[derive(Debug, Clone, Default)]
struct Table {
    rows: Vec<Row>,
    /// Canonical primary key -> position in `rows`.
    index: HashMap<String, usize>,
}

/// A [`Store`] that keeps rows in memory and enforces NOT NULL, primary-key,
/// unique and foreign-key constraints the way a relational engine would.
///
/// Transactions are snapshot based: `begin` copies the tables and `rollback`
/// restores the copy.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    catalog: Catalog,
    tables: BTreeMap<String, Table>,
    snapshot: Option<BTreeMap<String, Table>>,
    writes: usize,
}

impl MemoryStore {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            tables: BTreeMap::new(),
            snapshot: None,
            writes: 0,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn rows(&self, entity: &str) -> &[Row] {
        self.tables
            .get(entity)
            .map(|t| t.rows.as_slice())
            .unwrap_or(&[])
    }

    pub fn row_count(&self, entity: &str) -> usize {
        self.rows(entity).len()
    }

    pub fn total_rows(&self) -> usize {
        self.tables.values().map(|t| t.rows.len()).sum()
    }

    /// Number of mutating operations applied, including rolled-back ones.
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Stores a row without any constraint checks, as a raw restore would.
    pub fn insert_unchecked(&mut self, entity: &EntityDescriptor, row: Row) {
        let key = canonical_key(&key_of(&row, &entity.primary_key));
        let table = self.tables.entry(entity.name.clone()).or_default();
        table.index.entry(key).or_insert(table.rows.len());
        table.rows.push(row);
        self.writes += 1;
    }

    fn position(&self, entity: &EntityDescriptor, key: &[Value]) -> Option<usize> {
        self.tables
            .get(&entity.name)
            .and_then(|t| t.index.get(&canonical_key(key)).copied())
    }

    fn check_not_null<'r>(
        &self,
        entity: &EntityDescriptor,
        columns: impl Iterator<Item = &'r String>,
        row: &Row,
    ) -> Result<(), StoreError> {
        for column in columns {
            let nullable = entity.column(column).is_none_or(|def| def.nullable);
            if !nullable && row.get(column).is_none_or(Value::is_null) {
                return Err(StoreError::NotNullViolation {
                    entity: entity.name.clone(),
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_foreign_keys(&self, entity: &EntityDescriptor, row: &Row) -> Result<(), StoreError> {
        for fk in &entity.foreign_keys {
            let values = key_of(row, &fk.columns);
            if values.iter().any(Value::is_null) {
                continue;
            }
            let wanted = canonical_key(&values);

            let references_itself = fk.referenced_entity == entity.name
                && canonical_key(&key_of(row, &fk.referenced_columns)) == wanted;
            let found = references_itself
                || self.rows(&fk.referenced_entity).iter().any(|parent| {
                    canonical_key(&key_of(parent, &fk.referenced_columns)) == wanted
                });

            if !found {
                return Err(StoreError::ForeignKeyViolation {
                    constraint: fk.describe(),
                    detail: format!(
                        "{} is not present in {}",
                        describe_key(&fk.columns, &values),
                        fk.referenced_entity
                    ),
                });
            }
        }
        Ok(())
    }

    fn check_unique(
        &self,
        entity: &EntityDescriptor,
        row: &Row,
        exclude: Option<usize>,
    ) -> Result<(), StoreError> {
        for unique in &entity.unique {
            let values = key_of(row, &unique.columns);
            if values.iter().any(Value::is_null) {
                continue;
            }
            let wanted = canonical_key(&values);
            let clash = self
                .rows(&entity.name)
                .iter()
                .enumerate()
                .filter(|(i, _)| Some(*i) != exclude)
                .any(|(_, other)| canonical_key(&key_of(other, &unique.columns)) == wanted);
            if clash {
                return Err(StoreError::UniqueViolation {
                    constraint: unique.name.clone(),
                    key: describe_key(&unique.columns, &values),
                });
            }
        }
        Ok(())
    }
}

impl Store for MemoryStore {
    async fn begin(&mut self) -> Result<(), StoreError> {
        if self.snapshot.is_some() {
            return Err(StoreError::TransactionInProgress);
        }
        self.snapshot = Some(self.tables.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.snapshot
            .take()
            .map(|_| ())
            .ok_or(StoreError::NoTransaction)
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        let snapshot = self.snapshot.take().ok_or(StoreError::NoTransaction)?;
        self.tables = snapshot;
        Ok(())
    }

    async fn insert_row(
        &mut self,
        entity: &EntityDescriptor,
        row: &Row,
        policy: ConflictPolicy,
    ) -> Result<RowOutcome, StoreError> {
        let all_columns: Vec<String> = entity.columns.iter().map(|c| c.name.clone()).collect();
        self.check_not_null(entity, all_columns.iter(), row)?;

        let key = key_of(row, &entity.primary_key);
        if let Some(pos) = self.position(entity, &key) {
            return match policy {
                ConflictPolicy::Skip => Ok(RowOutcome::Skipped),
                ConflictPolicy::Fail => Err(StoreError::UniqueViolation {
                    constraint: entity.primary_key_constraint(),
                    key: describe_key(&entity.primary_key, &key),
                }),
                ConflictPolicy::Upsert => {
                    let mut updated = self.rows(&entity.name)[pos].clone();
                    for (column, value) in row {
                        if !entity.is_immutable(column) {
                            updated.insert(column.clone(), value.clone());
                        }
                    }
                    self.check_foreign_keys(entity, &updated)?;
                    self.check_unique(entity, &updated, Some(pos))?;

                    if let Some(table) = self.tables.get_mut(&entity.name) {
                        table.rows[pos] = updated;
                    }
                    self.writes += 1;
                    Ok(RowOutcome::Updated)
                }
            };
        }

        self.check_foreign_keys(entity, row)?;
        self.check_unique(entity, row, None)?;

        let table = self.tables.entry(entity.name.clone()).or_default();
        table.index.insert(canonical_key(&key), table.rows.len());
        table.rows.push(row.clone());
        self.writes += 1;
        Ok(RowOutcome::Inserted)
    }

    async fn patch_row(
        &mut self,
        entity: &EntityDescriptor,
        key: &[Value],
        values: &Row,
        mode: PatchMode,
    ) -> Result<(), StoreError> {
        let pos = self
            .position(entity, key)
            .ok_or_else(|| StoreError::MissingRow {
                entity: entity.name.clone(),
                key: describe_key(&entity.primary_key, key),
            })?;

        self.check_not_null(entity, values.keys(), values)?;
        let mut updated = self.rows(&entity.name)[pos].clone();
        for (column, value) in values {
            let current = updated.get(column).is_some_and(|v| !v.is_null());
            if mode == PatchMode::Overwrite || !current {
                updated.insert(column.clone(), value.clone());
            }
        }
        self.check_foreign_keys(entity, &updated)?;
        self.check_unique(entity, &updated, Some(pos))?;

        if let Some(table) = self.tables.get_mut(&entity.name) {
            table.rows[pos] = updated;
        }
        self.writes += 1;
        Ok(())
    }

    async fn scan(&mut self, entity: &EntityDescriptor) -> Result<Vec<Row>, StoreError> {
        Ok(self.rows(&entity.name).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnType, OnDelete};

    fn catalog() -> Catalog {
        [
            EntityDescriptor::new("public.users")
                .with_column("id", ColumnType::Text)
                .with_column("email", ColumnType::Text)
                .with_primary_key(&["id"])
                .with_unique("users_email_key", &["email"]),
            EntityDescriptor::new("public.notes")
                .with_column("id", ColumnType::Text)
                .with_column("user_id", ColumnType::Text)
                .with_nullable("body", ColumnType::Text)
                .with_primary_key(&["id"])
                .with_foreign_key(&["user_id"], "public.users", &["id"], OnDelete::Cascade),
        ]
        .into_iter()
        .collect()
    }

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(c, v)| (c.to_string(), Value::Text(v.to_string())))
            .collect()
    }

    #[tokio::test]
    async fn test_conflict_policies() {
        let catalog = catalog();
        let users = catalog.get("public.users").unwrap().clone();
        let mut store = MemoryStore::new(catalog);

        let first = row(&[("id", "u1"), ("email", "a@example.com")]);
        let second = row(&[("id", "u1"), ("email", "b@example.com")]);

        assert_eq!(
            store.insert_row(&users, &first, ConflictPolicy::Skip).await.unwrap(),
            RowOutcome::Inserted
        );
        assert_eq!(
            store.insert_row(&users, &second, ConflictPolicy::Skip).await.unwrap(),
            RowOutcome::Skipped
        );
        assert_eq!(
            store.rows("public.users")[0].get("email"),
            Some(&Value::Text("a@example.com".into()))
        );

        let err = store
            .insert_row(&users, &second, ConflictPolicy::Fail)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { constraint, .. } if constraint == "users_pkey"));

        assert_eq!(
            store.insert_row(&users, &second, ConflictPolicy::Upsert).await.unwrap(),
            RowOutcome::Updated
        );
        assert_eq!(
            store.rows("public.users")[0].get("email"),
            Some(&Value::Text("b@example.com".into()))
        );
        assert_eq!(store.row_count("public.users"), 1);
    }

    #[tokio::test]
    async fn test_constraint_enforcement() {
        let catalog = catalog();
        let users = catalog.get("public.users").unwrap().clone();
        let notes = catalog.get("public.notes").unwrap().clone();
        let mut store = MemoryStore::new(catalog);

        let orphan = row(&[("id", "n1"), ("user_id", "ghost")]);
        let err = store
            .insert_row(&notes, &orphan, ConflictPolicy::Skip)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ForeignKeyViolation { .. }));

        let missing_email = row(&[("id", "u1")]);
        let err = store
            .insert_row(&users, &missing_email, ConflictPolicy::Skip)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotNullViolation { column, .. } if column == "email"));

        store
            .insert_row(&users, &row(&[("id", "u1"), ("email", "a@example.com")]), ConflictPolicy::Skip)
            .await
            .unwrap();
        let err = store
            .insert_row(&users, &row(&[("id", "u2"), ("email", "a@example.com")]), ConflictPolicy::Skip)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { constraint, .. } if constraint == "users_email_key"));
    }

    #[tokio::test]
    async fn test_rollback_restores_snapshot() {
        let catalog = catalog();
        let users = catalog.get("public.users").unwrap().clone();
        let mut store = MemoryStore::new(catalog);

        store.begin().await.unwrap();
        store
            .insert_row(&users, &row(&[("id", "u1"), ("email", "a@example.com")]), ConflictPolicy::Skip)
            .await
            .unwrap();
        assert_eq!(store.total_rows(), 1);
        store.rollback().await.unwrap();

        assert_eq!(store.total_rows(), 0);
        assert!(!store.in_transaction());
        assert!(matches!(store.commit().await, Err(StoreError::NoTransaction)));
    }

    #[tokio::test]
    async fn test_patch_row_checks_references() {
        let catalog = catalog();
        let users = catalog.get("public.users").unwrap().clone();
        let notes = catalog.get("public.notes").unwrap().clone();
        let mut store = MemoryStore::new(catalog);

        store
            .insert_row(&users, &row(&[("id", "u1"), ("email", "a@example.com")]), ConflictPolicy::Skip)
            .await
            .unwrap();
        store
            .insert_row(&notes, &row(&[("id", "n1"), ("user_id", "u1")]), ConflictPolicy::Skip)
            .await
            .unwrap();

        let key = vec![Value::Text("n1".into())];
        store
            .patch_row(&notes, &key, &row(&[("body", "hello")]), PatchMode::Overwrite)
            .await
            .unwrap();
        assert_eq!(
            store.rows("public.notes")[0].get("body"),
            Some(&Value::Text("hello".into()))
        );

        let err = store
            .patch_row(&notes, &key, &row(&[("user_id", "ghost")]), PatchMode::Overwrite)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ForeignKeyViolation { .. }));
    }

    #[tokio::test]
    async fn test_fill_null_patch_keeps_present_values() {
        let catalog = catalog();
        let users = catalog.get("public.users").unwrap().clone();
        let notes = catalog.get("public.notes").unwrap().clone();
        let mut store = MemoryStore::new(catalog);

        store
            .insert_row(&users, &row(&[("id", "u1"), ("email", "a@example.com")]), ConflictPolicy::Skip)
            .await
            .unwrap();
        store
            .insert_row(&notes, &row(&[("id", "n1"), ("user_id", "u1"), ("body", "kept")]), ConflictPolicy::Skip)
            .await
            .unwrap();
        store
            .insert_row(&notes, &row(&[("id", "n2"), ("user_id", "u1")]), ConflictPolicy::Skip)
            .await
            .unwrap();

        let body = row(&[("body", "seeded")]);
        store
            .patch_row(&notes, &[Value::Text("n1".into())], &body, PatchMode::FillNull)
            .await
            .unwrap();
        store
            .patch_row(&notes, &[Value::Text("n2".into())], &body, PatchMode::FillNull)
            .await
            .unwrap();

        let bodies: Vec<_> = store
            .rows("public.notes")
            .iter()
            .map(|r| r.get("body").cloned())
            .collect();
        assert_eq!(
            bodies,
            vec![
                Some(Value::Text("kept".into())),
                Some(Value::Text("seeded".into()))
            ]
        );
    }
}
