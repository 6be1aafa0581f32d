//! Schema snapshot model
//!
//! Introspected metadata for one data source: tables, ordered columns, primary and
//! foreign keys, and row counts. A snapshot is supplied by the schema collaborator and
//! is read-only for the duration of a resolution pass; refreshing means building a new
//! snapshot and swapping it in.

use crate::error::{NlSqlError, Result};
use crate::inflection::{bare_identifier, singular_key, split_identifier};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(default)]
    pub data_type: String,
}

impl ColumnInfo {
    pub fn is_numeric(&self) -> bool {
        let ty = self.data_type.to_lowercase();
        [
            "int", "bigint", "smallint", "tinyint", "decimal", "numeric", "float", "real", "money",
            "double", "number",
        ]
        .iter()
        .any(|numeric| ty == *numeric || ty.starts_with(&format!("{}(", numeric)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Referencing column on the owning table
    pub column: String,
    pub target_table: String,
    pub target_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub primary_keys: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    #[serde(default)]
    pub row_count: u64,
    #[serde(default)]
    pub is_empty: bool,
}

impl TableInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_keys: Vec::new(),
            foreign_keys: Vec::new(),
            row_count: 0,
            is_empty: true,
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, data_type: impl Into<String>) -> Self {
        self.columns.push(ColumnInfo {
            name: name.into(),
            data_type: data_type.into(),
        });
        self
    }

    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_keys.push(column.into());
        self
    }

    pub fn with_foreign_key(
        mut self,
        column: impl Into<String>,
        target_table: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        self.foreign_keys.push(ForeignKey {
            column: column.into(),
            target_table: target_table.into(),
            target_column: target_column.into(),
        });
        self
    }

    pub fn with_row_count(mut self, rows: u64) -> Self {
        self.row_count = rows;
        self.is_empty = rows == 0;
        self
    }

    pub fn has_data(&self) -> bool {
        !self.is_empty
    }

    /// Case-insensitive column lookup
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        let name = bare_identifier(name);
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn is_key_column(&self, name: &str) -> bool {
        self.primary_keys.iter().any(|pk| pk.eq_ignore_ascii_case(name))
            || self.foreign_keys.iter().any(|fk| fk.column.eq_ignore_ascii_case(name))
    }

    /// Columns that are neither primary nor foreign keys
    pub fn non_key_columns(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns.iter().filter(|c| !self.is_key_column(&c.name))
    }

    /// Pure shape predicate: exactly two foreign keys and at most one other column.
    pub fn is_junction(&self) -> bool {
        let fk_columns: HashSet<String> = self
            .foreign_keys
            .iter()
            .filter(|fk| !fk.target_table.eq_ignore_ascii_case(&self.name))
            .map(|fk| fk.column.to_lowercase())
            .collect();
        fk_columns.len() == 2 && self.non_key_columns().count() <= 1
    }

    pub fn first_primary_key(&self) -> Option<&str> {
        self.primary_keys.first().map(String::as_str)
    }
}

/// All tables of one data source, keyed by table name.
///
/// Serializes to the same `{"tables": [...]}` document that `from_json` reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaSnapshot {
    tables: BTreeMap<String, TableInfo>,
}

#[derive(Deserialize)]
struct SnapshotDocument {
    tables: Vec<TableInfo>,
}

#[derive(Serialize)]
struct SnapshotDocumentRef<'a> {
    tables: Vec<&'a TableInfo>,
}

impl Serialize for SchemaSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        SnapshotDocumentRef {
            tables: self.tables.values().collect(),
        }
        .serialize(serializer)
    }
}

impl SchemaSnapshot {
    /// Build a snapshot, rejecting duplicate table names (case-insensitive).
    pub fn new(tables: Vec<TableInfo>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut map = BTreeMap::new();
        for mut table in tables {
            if !seen.insert(table.name.to_lowercase()) {
                return Err(NlSqlError::InvalidSchema(format!(
                    "Duplicate table name '{}'",
                    table.name
                )));
            }
            table.is_empty = table.row_count == 0;
            map.insert(table.name.clone(), table);
        }
        Ok(Self { tables: map })
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let doc: SnapshotDocument = serde_json::from_str(content)
            .map_err(|e| NlSqlError::InvalidSchema(format!("Failed to parse schema snapshot: {}", e)))?;
        Self::new(doc.tables)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| NlSqlError::InvalidSchema(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    /// Case-insensitive table lookup
    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        if let Some(table) = self.tables.get(name) {
            return Some(table);
        }
        let bare = bare_identifier(name);
        self.tables
            .values()
            .find(|t| t.name.eq_ignore_ascii_case(name) || bare_identifier(&t.name).eq_ignore_ascii_case(bare))
    }

    pub fn contains_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableInfo> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Secondary junction signal: the name combines two other tables' names,
    /// e.g. `StudentCars` next to `Students` and `Cars`.
    pub fn has_junction_name(&self, table: &str) -> bool {
        let words = split_identifier(table);
        if words.len() < 2 {
            return false;
        }
        let entity_keys: HashSet<String> = self
            .tables
            .values()
            .filter(|t| !t.name.eq_ignore_ascii_case(table))
            .map(|t| singular_key(&t.name))
            .collect();
        (1..words.len()).any(|split| {
            let left = singular_key(&words[..split].join("_"));
            let right = singular_key(&words[split..].join("_"));
            entity_keys.contains(&left) && entity_keys.contains(&right)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student_cars() -> TableInfo {
        TableInfo::new("StudentCars")
            .with_column("StudentId", "int")
            .with_column("CarId", "int")
            .with_foreign_key("StudentId", "Students", "Id")
            .with_foreign_key("CarId", "Cars", "Id")
            .with_row_count(12)
    }

    #[test]
    fn test_duplicate_table_names_rejected() {
        let result = SchemaSnapshot::new(vec![TableInfo::new("Students"), TableInfo::new("students")]);
        assert!(matches!(result, Err(NlSqlError::InvalidSchema(_))));
    }

    #[test]
    fn test_zero_rows_marks_table_empty() {
        let mut table = TableInfo::new("city");
        table.is_empty = false;
        let schema = SchemaSnapshot::new(vec![table]).unwrap();
        assert!(!schema.table("CITY").unwrap().has_data());
    }

    #[test]
    fn test_row_count_decides_emptiness() {
        let schema = SchemaSnapshot::from_json(
            r#"{"tables": [
                {"name": "Students", "row_count": 5, "is_empty": true},
                {"name": "Cars", "row_count": 0, "is_empty": false}
            ]}"#,
        )
        .unwrap();
        assert!(schema.table("Students").unwrap().has_data());
        assert!(!schema.table("Cars").unwrap().has_data());
    }

    #[test]
    fn test_json_round_trip() {
        let schema = SchemaSnapshot::new(vec![
            TableInfo::new("Students")
                .with_column("Id", "int")
                .with_primary_key("Id")
                .with_row_count(40),
            student_cars(),
        ])
        .unwrap();
        let json = serde_json::to_string(&schema).unwrap();
        assert!(json.starts_with(r#"{"tables":["#), "{}", json);
        assert_eq!(SchemaSnapshot::from_json(&json).unwrap(), schema);
    }

    #[test]
    fn test_junction_shape() {
        assert!(student_cars().is_junction());

        let with_business_columns = student_cars()
            .with_column("PurchasedOn", "date")
            .with_column("Price", "money");
        assert!(!with_business_columns.is_junction());

        let single_fk = TableInfo::new("Applications")
            .with_column("Id", "int")
            .with_column("StudentId", "int")
            .with_primary_key("Id")
            .with_foreign_key("StudentId", "Students", "Id");
        assert!(!single_fk.is_junction());
    }

    #[test]
    fn test_junction_name_signal() {
        let schema = SchemaSnapshot::new(vec![
            TableInfo::new("Students").with_row_count(3),
            TableInfo::new("Cars").with_row_count(2),
            student_cars(),
        ])
        .unwrap();
        assert!(schema.has_junction_name("StudentCars"));
        assert!(!schema.has_junction_name("Students"));
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "tables": [
                {"name": "Students", "columns": [{"name": "Id", "data_type": "int"}],
                 "primary_keys": ["Id"], "row_count": 10},
                {"name": "Applications", "columns": [{"name": "StudentId", "data_type": "int"}],
                 "foreign_keys": [{"column": "StudentId", "target_table": "Students", "target_column": "Id"}],
                 "row_count": 4}
            ]
        }"#;
        let schema = SchemaSnapshot::from_json(json).unwrap();
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.table("applications").unwrap().foreign_keys.len(), 1);
        assert!(schema.table("Students").unwrap().column("id").unwrap().is_numeric());
    }
}
