//! Entity capabilities and column mapping
//!
//! Entities are plain serde types. `Entity` gives the logical name and the
//! column layout, `KeyedEntity` adds a primary key, `ViewEntity` marks
//! read-only projections. Conversion between an instance and its column
//! values goes through `serde_json`, guided by the declared column types.

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::backends::{DatabaseRow, DatabaseValue};
use crate::error::{ModelError, OrmResult};
use crate::model::EntityType;

/// Declared storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Integer,
    BigInt,
    Real,
    Boolean,
    Text,
    Uuid,
    Timestamp,
    Date,
    Json,
    Blob,
}

impl ColumnType {
    pub fn is_integer(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::BigInt)
    }
}

/// Column definition of a mapped entity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnDef {
    pub name: &'static str,
    pub column_type: ColumnType,
    pub nullable: bool,
}

impl ColumnDef {
    pub const fn new(name: &'static str, column_type: ColumnType) -> Self {
        Self {
            name,
            column_type,
            nullable: false,
        }
    }

    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Base capability shared by every mapped type
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Logical entity name, also the base of the table name
    fn entity_name() -> &'static str;

    /// Mapped columns, in table order
    fn columns() -> Vec<ColumnDef>;
}

/// Keyed model: an entity with a single-column primary key
pub trait KeyedEntity: Entity {
    type Key: Into<DatabaseValue> + Clone + Send + Sync + Debug;

    /// Primary key column name
    fn key_column() -> &'static str {
        "id"
    }

    /// Primary key value of this instance
    fn key(&self) -> Self::Key;
}

/// View model: a read-only projection without a key
pub trait ViewEntity: Entity {}

/// Ordered column values of one instance
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColumnValues(Vec<(&'static str, DatabaseValue)>);

impl ColumnValues {
    pub fn get(&self, column: &str) -> Option<&DatabaseValue> {
        self.0
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(&'static str, DatabaseValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn to_json(&self) -> JsonValue {
        JsonValue::Object(
            self.0
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_json()))
                .collect(),
        )
    }
}

/// Serialize an instance into the column values declared by its entity type
pub(crate) fn entity_values<T: Entity>(
    entity: &T,
    entity_type: &EntityType,
) -> OrmResult<ColumnValues> {
    let json = serde_json::to_value(entity)?;
    let JsonValue::Object(mut fields) = json else {
        return Err(ModelError::Serialization(format!(
            "Entity '{}' must serialize to a JSON object",
            entity_type.name()
        )));
    };

    let mut values = Vec::with_capacity(entity_type.columns().len());
    for column in entity_type.columns() {
        let raw = fields.remove(column.name).unwrap_or(JsonValue::Null);
        let value = DatabaseValue::from_json_typed(raw, column.column_type).map_err(|e| {
            ModelError::Serialization(format!("{}.{}: {}", entity_type.name(), column.name, e))
        })?;
        if value.is_null() && !column.nullable && Some(column.name) != entity_type.key_column() {
            return Err(ModelError::Validation(format!(
                "Column '{}.{}' is not nullable",
                entity_type.name(),
                column.name
            )));
        }
        values.push((column.name, value));
    }
    Ok(ColumnValues(values))
}

/// Rebuild an instance from tracked column values
pub(crate) fn entity_from_values<T: Entity>(values: &ColumnValues) -> OrmResult<T> {
    Ok(serde_json::from_value(values.to_json())?)
}

/// Read the mapped columns of a row, normalized to their declared types
pub(crate) fn row_values(
    row: &dyn DatabaseRow,
    entity_type: &EntityType,
) -> OrmResult<ColumnValues> {
    let mut values = Vec::with_capacity(entity_type.columns().len());
    for column in entity_type.columns() {
        let value = match row.get_by_name(column.name) {
            Ok(value) => value.coerce(column.column_type),
            Err(ModelError::ColumnNotFound(_)) => DatabaseValue::Null,
            Err(e) => return Err(e),
        };
        values.push((column.name, value));
    }
    Ok(ColumnValues(values))
}

/// Project a row into any deserializable shape, coercing columns the entity type knows about
pub(crate) fn project_row<V: DeserializeOwned>(
    row: &dyn DatabaseRow,
    entity_type: Option<&EntityType>,
) -> OrmResult<V> {
    let mut map = serde_json::Map::new();
    for (index, name) in row.column_names().into_iter().enumerate() {
        let mut value = row.get_by_index(index)?;
        if let Some(column) = entity_type.and_then(|ty| ty.column(&name)) {
            value = value.coerce(column.column_type);
        }
        map.insert(name, value.to_json());
    }
    Ok(serde_json::from_value(JsonValue::Object(map))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityDescriptor;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: Option<i64>,
        title: String,
        pinned: bool,
    }

    impl Entity for Note {
        fn entity_name() -> &'static str {
            "Note"
        }

        fn columns() -> Vec<ColumnDef> {
            vec![
                ColumnDef::new("id", ColumnType::BigInt),
                ColumnDef::new("title", ColumnType::Text),
                ColumnDef::new("pinned", ColumnType::Boolean),
            ]
        }
    }

    impl KeyedEntity for Note {
        type Key = Option<i64>;

        fn key(&self) -> Self::Key {
            self.id
        }
    }

    fn note_type() -> EntityType {
        EntityType::from_descriptor(&EntityDescriptor::keyed::<Note>(), "Note".to_string())
    }

    #[test]
    fn test_entity_values_follow_column_order() {
        let note = Note {
            id: Some(3),
            title: "groceries".into(),
            pinned: true,
        };
        let values = entity_values(&note, &note_type()).unwrap();
        let names: Vec<_> = values.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["id", "title", "pinned"]);
        assert_eq!(values.get("pinned"), Some(&DatabaseValue::Bool(true)));
    }

    #[test]
    fn test_missing_key_is_null_not_an_error() {
        let note = Note {
            id: None,
            title: "draft".into(),
            pinned: false,
        };
        let values = entity_values(&note, &note_type()).unwrap();
        assert_eq!(values.get("id"), Some(&DatabaseValue::Null));
    }

    #[test]
    fn test_values_round_trip_into_entity() {
        let note = Note {
            id: Some(9),
            title: "x".into(),
            pinned: false,
        };
        let values = entity_values(&note, &note_type()).unwrap();
        let back: Note = entity_from_values(&values).unwrap();
        assert_eq!(back, note);
    }
}
