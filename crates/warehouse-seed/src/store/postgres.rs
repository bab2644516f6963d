//! PostgreSQL store backed by an sqlx pool.

use std::collections::BTreeMap;

use sqlx::error::ErrorKind;
use sqlx::postgres::{PgArguments, PgDatabaseError, PgRow};
use sqlx::types::Json;
use sqlx::{Arguments, PgPool, Postgres, Row as _, Transaction};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::catalog::{
    Catalog, ColumnDef, ColumnType, EntityDescriptor, ForeignKey, OnDelete, UniqueConstraint,
};
use crate::seed::ConflictPolicy;
use crate::value::{Row, Value, describe_key, key_of};

use super::{PatchMode, RowOutcome, Store, StoreError};

/// A [`Store`] issuing statements against PostgreSQL.
///
/// Primary-key conflicts are resolved with `ON CONFLICT` so the check and
/// the write happen in one statement.
pub struct PgStore {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, tx: None }
    }

    /// Returns a reference to the pool for advanced usage.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn execute(&mut self, sql: &str, args: PgArguments) -> Result<u64, sqlx::Error> {
        let query = sqlx::query_with(sql, args);
        let result = match self.tx.as_mut() {
            Some(tx) => query.execute(&mut **tx).await?,
            None => query.execute(&self.pool).await?,
        };
        Ok(result.rows_affected())
    }

    async fn fetch_optional(
        &mut self,
        sql: &str,
        args: PgArguments,
    ) -> Result<Option<PgRow>, sqlx::Error> {
        let query = sqlx::query_with(sql, args);
        match self.tx.as_mut() {
            Some(tx) => query.fetch_optional(&mut **tx).await,
            None => query.fetch_optional(&self.pool).await,
        }
    }

    async fn fetch_all(&mut self, sql: &str) -> Result<Vec<PgRow>, sqlx::Error> {
        let query = sqlx::query(sql);
        match self.tx.as_mut() {
            Some(tx) => query.fetch_all(&mut **tx).await,
            None => query.fetch_all(&self.pool).await,
        }
    }

    /// Builds a catalog from `information_schema` and `pg_constraint` for
    /// the given schemas.
    ///
    /// Base tables only. References to tables outside `schemas` are kept and
    /// will be rejected by the resolver as unknown entities.
    pub async fn introspect(&self, schemas: &[&str]) -> Result<Catalog, StoreError> {
        let schemas: Vec<String> = schemas.iter().map(|s| s.to_string()).collect();
        let mut entities: BTreeMap<String, EntityDescriptor> = BTreeMap::new();

        let columns: Vec<(String, String, String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT c.table_schema::text, c.table_name::text, c.column_name::text,
                   c.data_type::text, c.udt_name::text, c.is_nullable::text
            FROM information_schema.columns c
            JOIN information_schema.tables t
              ON t.table_schema = c.table_schema AND t.table_name = c.table_name
            WHERE t.table_type = 'BASE TABLE' AND c.table_schema = ANY($1)
            ORDER BY c.table_schema, c.table_name, c.ordinal_position
            "#,
        )
        .bind(&schemas)
        .fetch_all(&self.pool)
        .await?;

        for (schema, table, column, data_type, udt_name, is_nullable) in columns {
            let name = format!("{schema}.{table}");
            let entity = entities
                .entry(name.clone())
                .or_insert_with(|| EntityDescriptor::new(name));
            match column.as_str() {
                "created_at" => entity.created_at = Some(column.clone()),
                "updated_at" => entity.updated_at = Some(column.clone()),
                _ => {}
            }
            entity.columns.push(ColumnDef {
                name: column,
                column_type: ColumnType::from_pg(&data_type, &udt_name),
                nullable: is_nullable == "YES",
            });
        }

        let keys: Vec<(String, String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT tc.table_schema::text, tc.table_name::text, tc.constraint_name::text,
                   tc.constraint_type::text, kcu.column_name::text
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON kcu.constraint_schema = tc.constraint_schema
             AND kcu.constraint_name = tc.constraint_name
             AND kcu.table_name = tc.table_name
            WHERE tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE')
              AND tc.table_schema = ANY($1)
            ORDER BY tc.table_schema, tc.table_name, tc.constraint_name, kcu.ordinal_position
            "#,
        )
        .bind(&schemas)
        .fetch_all(&self.pool)
        .await?;

        for (schema, table, constraint, kind, column) in keys {
            let Some(entity) = entities.get_mut(&format!("{schema}.{table}")) else {
                continue;
            };
            if kind == "PRIMARY KEY" {
                entity.primary_key.push(column);
            } else if let Some(unique) = entity.unique.iter_mut().find(|u| u.name == constraint) {
                unique.columns.push(column);
            } else {
                entity.unique.push(UniqueConstraint {
                    name: constraint,
                    columns: vec![column],
                });
            }
        }

        let foreign_keys: Vec<(String, String, String, String, Vec<String>, Vec<String>, String)> =
            sqlx::query_as(
                r#"
                SELECT ns.nspname::text, cl.relname::text,
                       rns.nspname::text, rcl.relname::text,
                       ARRAY(SELECT a.attname::text
                             FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
                             JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
                             ORDER BY k.ord) AS columns,
                       ARRAY(SELECT a.attname::text
                             FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
                             JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum
                             ORDER BY k.ord) AS referenced_columns,
                       con.confdeltype::text
                FROM pg_constraint con
                JOIN pg_class cl ON cl.oid = con.conrelid
                JOIN pg_namespace ns ON ns.oid = cl.relnamespace
                JOIN pg_class rcl ON rcl.oid = con.confrelid
                JOIN pg_namespace rns ON rns.oid = rcl.relnamespace
                WHERE con.contype = 'f' AND ns.nspname = ANY($1)
                ORDER BY ns.nspname, cl.relname, con.conname
                "#,
            )
            .bind(&schemas)
            .fetch_all(&self.pool)
            .await?;

        for (schema, table, ref_schema, ref_table, columns, referenced_columns, on_delete) in
            foreign_keys
        {
            if let Some(entity) = entities.get_mut(&format!("{schema}.{table}")) {
                entity.foreign_keys.push(ForeignKey {
                    columns,
                    referenced_entity: format!("{ref_schema}.{ref_table}"),
                    referenced_columns,
                    on_delete: OnDelete::from_pg(&on_delete),
                });
            }
        }

        debug!("Introspected {} tables", entities.len());
        Ok(entities.into_values().collect())
    }
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `schema.table` to a quoted identifier; bare names land in `public`.
fn qualified(name: &str) -> String {
    let (schema, table) = name.split_once('.').unwrap_or(("public", name));
    format!("{}.{}", quote(schema), quote(table))
}

fn column_type(entity: &EntityDescriptor, column: &str) -> ColumnType {
    entity
        .column(column)
        .map(|c| c.column_type)
        .unwrap_or(ColumnType::Text)
}

/// Binds a value with the Postgres type of its column so NULLs stay typed.
fn bind(args: &mut PgArguments, column_type: ColumnType, value: &Value) -> Result<(), StoreError> {
    let result = match (column_type, value) {
        (ColumnType::Uuid, Value::Uuid(u)) => args.add(*u),
        (ColumnType::Uuid, Value::Null) => args.add(None::<Uuid>),
        (ColumnType::Integer, Value::Int(i)) => args.add(*i),
        (ColumnType::Integer, Value::Null) => args.add(None::<i64>),
        (ColumnType::Float, Value::Float(f)) => args.add(*f),
        (ColumnType::Float, Value::Int(i)) => args.add(*i as f64),
        (ColumnType::Float, Value::Null) => args.add(None::<f64>),
        (ColumnType::Boolean, Value::Bool(b)) => args.add(*b),
        (ColumnType::Boolean, Value::Null) => args.add(None::<bool>),
        (ColumnType::Json, Value::Json(j)) => args.add(Json(j.clone())),
        (ColumnType::Json, Value::Null) => args.add(None::<Json<serde_json::Value>>),
        (ColumnType::Timestamp, Value::Timestamp(ts)) => args.add(*ts),
        (ColumnType::Timestamp, Value::Null) => args.add(None::<OffsetDateTime>),
        (_, Value::Null) => args.add(None::<String>),
        (_, other) => args.add(other.to_string()),
    };
    result.map_err(sqlx::Error::Encode)?;
    Ok(())
}

/// Maps constraint violations onto [`StoreError`]; anything else stays a
/// database error.
fn classify(err: sqlx::Error, entity: &EntityDescriptor, key: &str) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        let constraint = db.constraint().unwrap_or("unnamed").to_string();
        match db.kind() {
            ErrorKind::UniqueViolation => {
                return StoreError::UniqueViolation {
                    constraint,
                    key: key.to_string(),
                };
            }
            ErrorKind::ForeignKeyViolation => {
                return StoreError::ForeignKeyViolation {
                    constraint,
                    detail: db
                        .try_downcast_ref::<PgDatabaseError>()
                        .and_then(PgDatabaseError::detail)
                        .unwrap_or(db.message())
                        .to_string(),
                };
            }
            ErrorKind::NotNullViolation => {
                return StoreError::NotNullViolation {
                    entity: entity.name.clone(),
                    column: db
                        .try_downcast_ref::<PgDatabaseError>()
                        .and_then(PgDatabaseError::column)
                        .unwrap_or("unknown")
                        .to_string(),
                };
            }
            _ => {}
        }
    }
    StoreError::Database(err)
}

/// Builds the INSERT statement for `columns` under `policy`. Returns the SQL
/// and whether it ends in `RETURNING (xmax = 0)`.
fn insert_sql(
    entity: &EntityDescriptor,
    columns: &[&String],
    policy: ConflictPolicy,
) -> (String, bool) {
    let table = qualified(&entity.name);
    let mut sql = if columns.is_empty() {
        format!("INSERT INTO {table} DEFAULT VALUES")
    } else {
        let names: Vec<String> = columns.iter().map(|c| quote(c)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
        format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            names.join(", "),
            placeholders.join(", ")
        )
    };

    let target = if entity.primary_key.is_empty() {
        String::new()
    } else {
        let pk: Vec<String> = entity.primary_key.iter().map(|c| quote(c)).collect();
        format!(" ({})", pk.join(", "))
    };
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !entity.is_immutable(c))
        .map(|c| format!("{0} = EXCLUDED.{0}", quote(c)))
        .collect();

    match policy {
        ConflictPolicy::Fail => (sql, false),
        ConflictPolicy::Upsert if !target.is_empty() && !updates.is_empty() => {
            sql.push_str(&format!(
                " ON CONFLICT{target} DO UPDATE SET {} RETURNING (xmax = 0) AS inserted",
                updates.join(", ")
            ));
            (sql, true)
        }
        ConflictPolicy::Skip | ConflictPolicy::Upsert => {
            sql.push_str(&format!(" ON CONFLICT{target} DO NOTHING"));
            (sql, false)
        }
    }
}

/// `SET` clause for one patched column bound at `$placeholder`.
fn assignment(column: &str, placeholder: usize, mode: PatchMode) -> String {
    let column = quote(column);
    match mode {
        PatchMode::Overwrite => format!("{column} = ${placeholder}"),
        PatchMode::FillNull => format!("{column} = COALESCE({column}, ${placeholder})"),
    }
}

/// Decodes a `to_jsonb(row)` object using the declared column types.
fn decode_row(entity: &EntityDescriptor, json: serde_json::Value) -> Row {
    let serde_json::Value::Object(object) = json else {
        return Row::new();
    };
    object
        .into_iter()
        .map(|(column, raw)| {
            let value = Value::from_json(&raw, column_type(entity, &column))
                .unwrap_or_else(|_| Value::Json(raw));
            (column, value)
        })
        .collect()
}

impl Store for PgStore {
    async fn begin(&mut self) -> Result<(), StoreError> {
        if self.tx.is_some() {
            return Err(StoreError::TransactionInProgress);
        }
        self.tx = Some(self.pool.begin().await?);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::NoTransaction)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::NoTransaction)?;
        tx.rollback().await?;
        Ok(())
    }

    async fn insert_row(
        &mut self,
        entity: &EntityDescriptor,
        row: &Row,
        policy: ConflictPolicy,
    ) -> Result<RowOutcome, StoreError> {
        let columns: Vec<&String> = row.keys().collect();
        let mut args = PgArguments::default();
        for (column, value) in row {
            bind(&mut args, column_type(entity, column), value)?;
        }

        let key = describe_key(&entity.primary_key, &key_of(row, &entity.primary_key));
        let (sql, returning) = insert_sql(entity, &columns, policy);

        if returning {
            let inserted = self
                .fetch_optional(&sql, args)
                .await
                .map_err(|e| classify(e, entity, &key))?;
            let outcome = match inserted {
                Some(r) => {
                    if r.try_get::<bool, _>("inserted")? {
                        RowOutcome::Inserted
                    } else {
                        RowOutcome::Updated
                    }
                }
                None => RowOutcome::Skipped,
            };
            return Ok(outcome);
        }

        let affected = self
            .execute(&sql, args)
            .await
            .map_err(|e| classify(e, entity, &key))?;
        Ok(if affected == 0 {
            RowOutcome::Skipped
        } else {
            RowOutcome::Inserted
        })
    }

    async fn patch_row(
        &mut self,
        entity: &EntityDescriptor,
        key: &[Value],
        values: &Row,
        mode: PatchMode,
    ) -> Result<(), StoreError> {
        let mut args = PgArguments::default();
        let mut assignments = Vec::with_capacity(values.len());
        for (i, (column, value)) in values.iter().enumerate() {
            assignments.push(assignment(column, i + 1, mode));
            bind(&mut args, column_type(entity, column), value)?;
        }
        let mut conditions = Vec::with_capacity(key.len());
        for (i, (column, value)) in entity.primary_key.iter().zip(key).enumerate() {
            conditions.push(format!("{} = ${}", quote(column), values.len() + i + 1));
            bind(&mut args, column_type(entity, column), value)?;
        }

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            qualified(&entity.name),
            assignments.join(", "),
            conditions.join(" AND ")
        );
        let described = describe_key(&entity.primary_key, key);
        let affected = self
            .execute(&sql, args)
            .await
            .map_err(|e| classify(e, entity, &described))?;

        if affected == 0 {
            return Err(StoreError::MissingRow {
                entity: entity.name.clone(),
                key: described,
            });
        }
        Ok(())
    }

    async fn scan(&mut self, entity: &EntityDescriptor) -> Result<Vec<Row>, StoreError> {
        let sql = format!(
            "SELECT to_jsonb(t) AS row FROM {} AS t",
            qualified(&entity.name)
        );
        let rows = self.fetch_all(&sql).await?;
        rows.into_iter()
            .map(|r| {
                let json: serde_json::Value = r.try_get("row")?;
                Ok(decode_row(entity, json))
            })
            .collect()
    }
}
