//! Table Document: the unit of persistence for one table.
//!
//! A document holds the ordered schema, the table metadata, the row sequence
//! and (optionally) persisted index snapshots:
//!
//! ```text
//! {
//!   "schema":   { "id": "int", "name": "text" },
//!   "metadata": { "name": "users", "primary_key": ["id"], ... },
//!   "rows":     [ { "id": 1, "name": "Alice" } ],
//!   "indexes":  { "idx_name": { ... } }
//! }
//! ```

use crate::index::{IndexKey, PersistedIndex, RowKey};
use crate::value::{ColumnType, Value};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// One row: column name → value.
pub type Row = BTreeMap<String, Value>;

/// Primary key used when a table declares none.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// Metadata timestamp with sub-second precision.
pub fn metadata_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Ordered column name → type mapping.
///
/// Serialized as a JSON object whose key order is the column order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    columns: Vec<(String, ColumnType)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_columns(columns: Vec<(String, ColumnType)>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[(String, ColumnType)] {
        &self.columns
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ColumnType> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Append a column. Returns `false` if the name is already declared.
    pub fn push(&mut self, name: impl Into<String>, ty: ColumnType) -> bool {
        let name = name.into();
        if self.contains(&name) {
            return false;
        }
        self.columns.push((name, ty));
        true
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, ty) in &self.columns {
            map.serialize_entry(name, ty)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SchemaVisitor;

        impl<'de> Visitor<'de> for SchemaVisitor {
            type Value = Schema;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of column name to type")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Schema, A::Error> {
                let mut schema = Schema::new();
                while let Some((name, ty)) = access.next_entry::<String, ColumnType>()? {
                    if !schema.push(name.clone(), ty) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate column '{}'",
                            name
                        )));
                    }
                }
                Ok(schema)
            }
        }

        deserializer.deserialize_map(SchemaVisitor)
    }
}

/// Foreign-key reference, validated at CREATE time only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

/// Table metadata section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub autoincrement: Vec<String>,
    /// Indexed column list.
    #[serde(default)]
    pub indexes: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    /// Recorded, not enforced.
    #[serde(default)]
    pub not_null: Vec<String>,
    /// Recorded, not enforced.
    #[serde(default)]
    pub defaults: BTreeMap<String, Value>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub last_modified: String,
}

impl TableMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        let now = metadata_timestamp();
        Self {
            name: name.into(),
            primary_key: Vec::new(),
            autoincrement: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            not_null: Vec::new(),
            defaults: BTreeMap::new(),
            created_at: now.clone(),
            last_modified: now,
        }
    }
}

/// Full on-disk representation of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDocument {
    pub schema: Schema,
    pub metadata: TableMetadata,
    pub rows: Vec<Row>,
    /// Named persisted index snapshots.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub indexes: BTreeMap<String, PersistedIndex>,
}

impl TableDocument {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            schema,
            metadata: TableMetadata::new(name),
            rows: Vec::new(),
            indexes: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Declared primary key, or `id` when none is declared.
    pub fn primary_key_columns(&self) -> Vec<String> {
        if self.metadata.primary_key.is_empty() {
            vec![DEFAULT_PRIMARY_KEY.to_string()]
        } else {
            self.metadata.primary_key.clone()
        }
    }

    /// Whether rows of this table carry an identity usable for uniqueness checks.
    ///
    /// Tables without a declared key and without an `id` column have none.
    pub fn has_identity(&self) -> bool {
        !self.metadata.primary_key.is_empty() || self.schema.contains(DEFAULT_PRIMARY_KEY)
    }

    pub fn row_key(&self, row: &Row) -> RowKey {
        row_key_for(row, &self.primary_key_columns())
    }

    /// Fill every schema column missing from a row with NULL.
    pub fn normalize(&mut self) {
        for row in &mut self.rows {
            for name in self.schema.names() {
                if !row.contains_key(name) {
                    row.insert(name.to_string(), Value::Null);
                }
            }
        }
    }

    /// Refresh `last_modified`.
    pub fn touch(&mut self) {
        self.metadata.last_modified = metadata_timestamp();
    }

    pub fn is_indexed(&self, column: &str) -> bool {
        self.metadata.indexes.iter().any(|c| c == column)
    }
}

/// Identity of a row under the given key columns.
///
/// A row lacking every key column is identified by its full serialization so
/// that such rows still diff deterministically.
pub fn row_key_for(row: &Row, key_columns: &[String]) -> RowKey {
    if key_columns.iter().all(|c| row.get(c).is_none_or(Value::is_null)) {
        let raw = serde_json::to_string(row).unwrap_or_default();
        return RowKey::new(vec![IndexKey::Text(raw)]);
    }
    RowKey::new(
        key_columns
            .iter()
            .map(|c| IndexKey::from(row.get(c).unwrap_or(&Value::Null)))
            .collect(),
    )
}
