//! Entity descriptors mirroring the warehouse schema.
//!
//! A [`Catalog`] maps qualified entity names (`schema.table`) to their
//! [`EntityDescriptor`]. Descriptors are built once at startup, either from
//! the static declaration in [`warehouse`] or by introspecting a live
//! database (see [`crate::store::PgStore::introspect`]).

mod warehouse;

pub use warehouse::warehouse;

use std::collections::BTreeMap;

/// Storage type of a column, as far as the loader needs to know it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Uuid,
    Integer,
    Float,
    Boolean,
    Json,
    Timestamp,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Uuid => "uuid",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Json => "json",
            ColumnType::Timestamp => "timestamp",
        }
    }

    /// Maps an `information_schema.columns` (data_type, udt_name) pair.
    pub fn from_pg(data_type: &str, udt_name: &str) -> Self {
        match data_type {
            "uuid" => ColumnType::Uuid,
            "smallint" | "integer" | "bigint" => ColumnType::Integer,
            "real" | "double precision" | "numeric" => ColumnType::Float,
            "boolean" => ColumnType::Boolean,
            "json" | "jsonb" => ColumnType::Json,
            "timestamp with time zone" | "timestamp without time zone" | "date" => {
                ColumnType::Timestamp
            }
            "ARRAY" => ColumnType::Json,
            "USER-DEFINED" if udt_name == "json" || udt_name == "jsonb" => ColumnType::Json,
            _ => ColumnType::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

/// Referential action taken by the store when a parent row is deleted.
///
/// The loader never deletes rows; the policy is carried so descriptors stay a
/// faithful mirror of the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnDelete {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl OnDelete {
    /// Maps a `pg_constraint.confdeltype` code.
    pub fn from_pg(code: &str) -> Self {
        match code {
            "r" => OnDelete::Restrict,
            "c" => OnDelete::Cascade,
            "n" => OnDelete::SetNull,
            "d" => OnDelete::SetDefault,
            _ => OnDelete::NoAction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub columns: Vec<String>,
    pub referenced_entity: String,
    pub referenced_columns: Vec<String>,
    pub on_delete: OnDelete,
}

impl ForeignKey {
    /// Human-readable constraint label, e.g. `(user_id) -> public.users(id)`.
    pub fn describe(&self) -> String {
        format!(
            "({}) -> {}({})",
            self.columns.join(", "),
            self.referenced_entity,
            self.referenced_columns.join(", ")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueConstraint {
    pub name: String,
    pub columns: Vec<String>,
}

/// One table of the target schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    /// Qualified name, `schema.table`.
    pub name: String,
    /// Alternate key accepted in seed files (e.g. `affiliate_users`).
    pub alias: Option<String>,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    pub unique: Vec<UniqueConstraint>,
    pub foreign_keys: Vec<ForeignKey>,
    /// Creation timestamp column. Immutable on upsert.
    pub created_at: Option<String>,
    /// Modification timestamp column. Touched on upsert.
    pub updated_at: Option<String>,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            columns: Vec::new(),
            primary_key: Vec::new(),
            unique: Vec::new(),
            foreign_keys: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Adds a NOT NULL column.
    pub fn with_column(mut self, name: &str, column_type: ColumnType) -> Self {
        self.columns.push(ColumnDef {
            name: name.to_string(),
            column_type,
            nullable: false,
        });
        self
    }

    /// Adds a nullable column.
    pub fn with_nullable(mut self, name: &str, column_type: ColumnType) -> Self {
        self.columns.push(ColumnDef {
            name: name.to_string(),
            column_type,
            nullable: true,
        });
        self
    }

    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_unique(mut self, name: &str, columns: &[&str]) -> Self {
        self.unique.push(UniqueConstraint {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    pub fn with_foreign_key(
        mut self,
        columns: &[&str],
        referenced_entity: &str,
        referenced_columns: &[&str],
        on_delete: OnDelete,
    ) -> Self {
        self.foreign_keys.push(ForeignKey {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            referenced_entity: referenced_entity.to_string(),
            referenced_columns: referenced_columns.iter().map(|c| c.to_string()).collect(),
            on_delete,
        });
        self
    }

    /// Adds a NOT NULL `created_at` timestamp column and marks it immutable.
    pub fn with_created_at(self) -> Self {
        let mut this = self.with_column("created_at", ColumnType::Timestamp);
        this.created_at = Some("created_at".to_string());
        this
    }

    /// Adds a nullable `updated_at` timestamp column touched on upsert.
    pub fn with_updated_at(self) -> Self {
        let mut this = self.with_nullable("updated_at", ColumnType::Timestamp);
        this.updated_at = Some("updated_at".to_string());
        this
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// A foreign key is required when none of its columns accept NULL.
    pub fn is_required(&self, fk: &ForeignKey) -> bool {
        fk.columns
            .iter()
            .all(|c| self.column(c).is_some_and(|def| !def.nullable))
    }

    pub fn required_foreign_keys(&self) -> impl Iterator<Item = &ForeignKey> {
        self.foreign_keys.iter().filter(|fk| self.is_required(fk))
    }

    /// Columns never overwritten by an upsert: the primary key and the
    /// creation timestamp.
    pub fn is_immutable(&self, column: &str) -> bool {
        self.primary_key.iter().any(|c| c == column) || self.created_at.as_deref() == Some(column)
    }

    /// Label used for the primary key in conflict reports.
    pub fn primary_key_constraint(&self) -> String {
        let table = self.name.rsplit('.').next().unwrap_or(&self.name);
        format!("{table}_pkey")
    }
}

/// All entity descriptors known to a run, keyed by qualified name.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entities: BTreeMap<String, EntityDescriptor>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity: EntityDescriptor) {
        self.entities.insert(entity.name.clone(), entity);
    }

    pub fn with(mut self, entity: EntityDescriptor) -> Self {
        self.insert(entity);
        self
    }

    pub fn get(&self, name: &str) -> Option<&EntityDescriptor> {
        self.entities.get(name)
    }

    /// Looks an entity up by qualified name, bare public table name, or alias.
    pub fn lookup(&self, key: &str) -> Option<&EntityDescriptor> {
        self.entities
            .get(key)
            .or_else(|| self.entities.get(&format!("public.{key}")))
            .or_else(|| {
                self.entities
                    .values()
                    .find(|e| e.alias.as_deref() == Some(key))
            })
    }

    /// Entities in ascending name order.
    pub fn iter(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.entities.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Copies seed aliases from `other` onto entities with the same name.
    ///
    /// Introspected catalogs carry no aliases; this lets seed files written
    /// against the static declaration keep working.
    pub fn adopt_aliases(&mut self, other: &Catalog) {
        for (name, entity) in self.entities.iter_mut() {
            if entity.alias.is_none() {
                entity.alias = other.get(name).and_then(|e| e.alias.clone());
            }
        }
    }
}

impl FromIterator<EntityDescriptor> for Catalog {
    fn from_iter<I: IntoIterator<Item = EntityDescriptor>>(iter: I) -> Self {
        let mut catalog = Catalog::new();
        for entity in iter {
            catalog.insert(entity);
        }
        catalog
    }
}
