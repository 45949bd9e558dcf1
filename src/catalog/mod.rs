//! Catalog model
//!
//! A [`Catalog`] is the normalized, validated description of a database
//! schema: tables, columns, indexes and single-column foreign keys. It is
//! built once through [`Catalog::new`] (or deserialized, which goes through
//! the same path) and is immutable afterwards.
//!
//! Two JSON renderings exist:
//! - [`Catalog::to_json`] keeps column declaration order.
//! - [`Catalog::canonical_json`] orders columns by name and is the hash input,
//!   so column order never changes equality or the schema hash.

pub mod default;
pub mod ident;
pub mod types;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{LockplaneError, Result};

pub use default::{DefaultExpr, ValueFunction};
pub use types::{SqlType, TypeChange};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "CatalogDocument")]
pub struct Catalog {
    tables: Vec<Table>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub indexes: Vec<Index>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: SqlType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultExpr>,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<ForeignKeyRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    pub table: String,
    pub columns: Vec<String>,
}

fn default_nullable() -> bool {
    true
}

#[derive(Deserialize)]
struct CatalogDocument {
    tables: Vec<Table>,
}

impl TryFrom<CatalogDocument> for Catalog {
    type Error = LockplaneError;

    fn try_from(doc: CatalogDocument) -> Result<Self> {
        Catalog::new(doc.tables)
    }
}

impl Table {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    #[must_use]
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    #[must_use]
    pub fn index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn find_index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn primary_key(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.is_primary_key)
    }

    /// Tables this one references through foreign keys, excluding itself.
    pub fn referenced_tables(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.columns
            .iter()
            .filter_map(|c| c.references.as_ref())
            .map(|r| r.table.clone())
            .filter(|t| *t != self.name && seen.insert(t.clone()))
            .collect()
    }
}

impl Column {
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: SqlType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            default: None,
            is_primary_key: false,
            references: None,
        }
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.nullable = false;
        self
    }

    /// Sets the default from SQL text; see [`DefaultExpr::parse`].
    #[must_use]
    pub fn default_sql(mut self, expr: &str) -> Self {
        self.default = Some(DefaultExpr::parse(expr));
        self
    }

    #[must_use]
    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references = Some(ForeignKeyRef {
            table: table.into(),
            columns: vec![column.into()],
        });
        self
    }

    /// True when adding this column as NOT NULL needs no backfill.
    pub fn has_implicit_value(&self) -> bool {
        self.default.is_some() || self.data_type.is_serial()
    }
}

impl Index {
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn same_definition(&self, other: &Index) -> bool {
        self.unique == other.unique && self.columns == other.columns
    }
}

impl ForeignKeyRef {
    pub fn same_target(&self, other: &ForeignKeyRef) -> bool {
        self.table == other.table && self.columns == other.columns
    }
}

pub(crate) fn same_reference(a: &Option<ForeignKeyRef>, b: &Option<ForeignKeyRef>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.same_target(b),
        _ => false,
    }
}

impl Catalog {
    /// Normalizes and validates a set of tables.
    ///
    /// Tables and indexes are sorted by name; column declaration order is
    /// kept. Fails with [`LockplaneError::CatalogInvalid`] when names collide,
    /// a table has more than one primary key column, or an index or foreign
    /// key points at something that does not exist.
    pub fn new(tables: Vec<Table>) -> Result<Self> {
        let mut normalized = tables
            .into_iter()
            .map(normalize_table)
            .collect::<std::result::Result<Vec<_>, String>>()
            .map_err(LockplaneError::CatalogInvalid)?;
        normalized.sort_by(|a, b| a.name.cmp(&b.name));

        validate(&normalized).map_err(LockplaneError::CatalogInvalid)?;
        Ok(Self { tables: normalized })
    }

    #[must_use]
    pub fn empty() -> Self {
        Self { tables: Vec::new() }
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Consumes the catalog, returning its tables for editing. Rebuild with
    /// [`Catalog::new`].
    pub fn into_tables(self) -> Vec<Table> {
        self.tables
    }

    /// Parses a catalog document.
    pub fn from_json(input: &str) -> Result<Self> {
        serde_json::from_str::<CatalogDocument>(input)
            .map_err(|e| {
                LockplaneError::parse(format!("line {} column {}", e.line(), e.column()), e.to_string())
            })
            .and_then(Catalog::try_from)
    }

    /// JSON with columns in declaration order.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Hash input: compact JSON with tables, indexes and columns ordered by
    /// name and keys in fixed order (`name`, `type`, `nullable`, `default`,
    /// `is_primary_key`, `references`).
    pub fn canonical_json(&self) -> String {
        let tables: Vec<Table> = self
            .tables
            .iter()
            .map(|t| {
                let mut t = t.clone();
                t.columns.sort_by(|a, b| a.name.cmp(&b.name));
                t
            })
            .collect();
        serde_json::to_string(&Catalog { tables }).unwrap_or_default()
    }
}

impl PartialEq for Catalog {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_json() == other.canonical_json()
    }
}

impl Eq for Catalog {}

impl Default for Catalog {
    fn default() -> Self {
        Catalog::empty()
    }
}

fn normalize_table(mut table: Table) -> std::result::Result<Table, String> {
    table.name = ident::normalize(&table.name, "table")?;
    for column in &mut table.columns {
        column.name = ident::normalize(&column.name, "column")
            .map_err(|e| format!("{} (table {})", e, table.name))?;
        if column.is_primary_key {
            column.nullable = false;
        }
        column.data_type = column.data_type.clone().normalized();
        column.default = column.default.take().map(|d| d.coerce_to(&column.data_type));
        if let Some(reference) = &mut column.references {
            reference.table = ident::normalize(&reference.table, "referenced table")?;
            for c in &mut reference.columns {
                *c = ident::normalize(c, "referenced column")?;
            }
        }
    }
    for index in &mut table.indexes {
        index.name = ident::normalize(&index.name, "index")?;
        for c in &mut index.columns {
            *c = ident::normalize(c, "indexed column")?;
        }
    }
    table.indexes.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(table)
}

fn validate(tables: &[Table]) -> std::result::Result<(), String> {
    let mut table_names = HashSet::new();
    for table in tables {
        if !table_names.insert(table.name.as_str()) {
            return Err(format!("duplicate table name {:?}", table.name));
        }
    }

    // Index names share one namespace per schema.
    let mut index_owner: HashMap<&str, &str> = HashMap::new();
    let by_name: HashMap<&str, &Table> = tables.iter().map(|t| (t.name.as_str(), t)).collect();

    for table in tables {
        if table.columns.is_empty() {
            return Err(format!("table {:?} has no columns", table.name));
        }

        let mut column_names = HashSet::new();
        for column in &table.columns {
            if !column_names.insert(column.name.as_str()) {
                return Err(format!("duplicate column {:?} in table {:?}", column.name, table.name));
            }
            if let SqlType::Numeric(Some((precision, scale))) = column.data_type {
                if precision == 0 || scale > precision {
                    return Err(format!(
                        "column {}.{} has invalid numeric({},{})",
                        table.name, column.name, precision, scale
                    ));
                }
            }
        }

        let primary_keys = table.columns.iter().filter(|c| c.is_primary_key).count();
        if primary_keys > 1 {
            return Err(format!(
                "table {:?} has {} primary key columns; at most one is supported",
                table.name, primary_keys
            ));
        }

        for index in &table.indexes {
            if let Some(owner) = index_owner.insert(index.name.as_str(), &table.name) {
                return Err(format!(
                    "duplicate index name {:?} (tables {:?} and {:?})",
                    index.name, owner, table.name
                ));
            }
            if index.columns.is_empty() {
                return Err(format!("index {:?} has no columns", index.name));
            }
            for c in &index.columns {
                if table.find_column(c).is_none() {
                    return Err(format!(
                        "index {:?} references missing column {:?} on table {:?}",
                        index.name, c, table.name
                    ));
                }
            }
        }

        for column in &table.columns {
            let Some(reference) = &column.references else { continue };
            let Some(target) = by_name.get(reference.table.as_str()) else {
                return Err(format!(
                    "foreign key {}.{} references missing table {:?}",
                    table.name, column.name, reference.table
                ));
            };
            if reference.columns.is_empty() {
                return Err(format!(
                    "foreign key {}.{} must reference at least one column",
                    table.name, column.name
                ));
            }
            for c in &reference.columns {
                if target.find_column(c).is_none() {
                    return Err(format!(
                        "foreign key {}.{} references missing column {}.{}",
                        table.name, column.name, reference.table, c
                    ));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Table {
        Table::new("users")
            .column(Column::new("id", SqlType::Integer).primary_key())
            .column(Column::new("email", SqlType::Text).not_null())
    }

    #[test]
    fn tables_and_indexes_are_sorted() {
        let catalog = Catalog::new(vec![
            Table::new("zeta").column(Column::new("id", SqlType::Integer)),
            users()
                .index(Index::new("users_email_idx", ["email"]))
                .index(Index::new("a_idx", ["id"])),
        ])
        .unwrap();
        let names: Vec<_> = catalog.tables().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["users", "zeta"]);
        let indexes: Vec<_> = catalog.tables()[0].indexes.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(indexes, ["a_idx", "users_email_idx"]);
    }

    #[test]
    fn column_order_is_preserved_but_not_significant() {
        let a = Catalog::new(vec![users()]).unwrap();
        let mut reordered = users();
        reordered.columns.reverse();
        let b = Catalog::new(vec![reordered]).unwrap();

        assert_eq!(a.tables()[0].columns[0].name, "id");
        assert_eq!(b.tables()[0].columns[0].name, "email");
        assert_eq!(a, b);
        assert_eq!(a.canonical_json(), b.canonical_json());
        assert_ne!(a.to_json(), b.to_json());
    }

    #[test]
    fn canonical_json_has_fixed_key_order() {
        let catalog = Catalog::new(vec![Table::new("t").column(
            Column::new("c", SqlType::Integer).default_sql("0"),
        )])
        .unwrap();
        assert_eq!(
            catalog.canonical_json(),
            r#"{"tables":[{"name":"t","columns":[{"name":"c","type":"integer","nullable":true,"default":"0","is_primary_key":false}],"indexes":[]}]}"#
        );
        assert_eq!(Catalog::empty().canonical_json(), r#"{"tables":[]}"#);
    }

    #[test]
    fn primary_key_implies_not_null() {
        let mut column = Column::new("id", SqlType::Integer);
        column.is_primary_key = true;
        let catalog = Catalog::new(vec![Table::new("t").column(column)]).unwrap();
        assert!(!catalog.tables()[0].columns[0].nullable);
    }

    #[test]
    fn names_are_case_sensitive() {
        let catalog = Catalog::new(vec![users(), Table::new("Users").column(Column::new("id", SqlType::Integer))])
            .unwrap();
        assert_eq!(catalog.tables().len(), 2);
        assert!(catalog.table("USERS").is_none());
        assert_ne!(
            Catalog::new(vec![users()]).unwrap().canonical_json(),
            Catalog::new(vec![Table::new("Users").column(Column::new("id", SqlType::Integer))])
                .unwrap()
                .canonical_json()
        );

        let err = Catalog::new(vec![users(), users()]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CatalogInvalid);

        let err = Catalog::new(vec![Table::new("t")
            .column(Column::new("a", SqlType::Integer))
            .column(Column::new("a", SqlType::Text))])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate column"));
    }

    #[test]
    fn rejects_numeric_scale_above_precision() {
        let err = Catalog::new(vec![Table::new("t").column(Column::new("n", SqlType::Numeric(Some((2, 5)))))])
            .unwrap_err();
        assert!(err.to_string().contains("numeric(2,5)"));
    }

    #[test]
    fn rejects_dangling_references() {
        let err = Catalog::new(vec![Table::new("posts")
            .column(Column::new("user_id", SqlType::Integer).references("users", "id"))])
        .unwrap_err();
        assert!(err.to_string().contains("missing table"));

        let err = Catalog::new(vec![users().index(Index::new("idx", ["nope"]))]).unwrap_err();
        assert!(err.to_string().contains("missing column"));
    }

    #[test]
    fn rejects_composite_primary_keys() {
        let err = Catalog::new(vec![Table::new("t")
            .column(Column::new("a", SqlType::Integer).primary_key())
            .column(Column::new("b", SqlType::Integer).primary_key())])
        .unwrap_err();
        assert!(err.to_string().contains("primary key"));
    }

    #[test]
    fn json_round_trip_normalizes_aliases() {
        let input = r#"{"tables":[{"name":"users ","columns":[
            {"name":"id","type":"INT4","nullable":false,"is_primary_key":true},
            {"name":"created","type":"timestamptz","default":"CURRENT_TIMESTAMP"}
        ]}]}"#;
        let catalog = Catalog::from_json(input).unwrap();
        let table = &catalog.tables()[0];
        assert_eq!(table.name, "users");
        assert_eq!(table.columns[0].data_type, SqlType::Integer);
        assert!(table.columns[1].nullable);
        assert_eq!(table.columns[1].default, Some(DefaultExpr::Function(ValueFunction::Now)));

        let again = Catalog::from_json(&catalog.to_json()).unwrap();
        assert_eq!(again, catalog);
        assert_eq!(again.to_json(), catalog.to_json());
    }

    #[test]
    fn defaults_are_stored_as_the_column_type_reads_them() {
        let catalog = Catalog::new(vec![Table::new("t")
            .column(Column::new("code", SqlType::Text).default_sql("5"))
            .column(Column::new("n", SqlType::Integer).default_sql("'5'"))])
        .unwrap();
        let table = &catalog.tables()[0];
        assert_eq!(table.columns[0].default, Some(DefaultExpr::String("5".into())));
        assert_eq!(table.columns[1].default, Some(DefaultExpr::Number("5".into())));
    }

    #[test]
    fn bare_char_is_stored_as_char_one() {
        let declared = Catalog::new(vec![Table::new("t").column(Column::new("flag", SqlType::Char(None)))]).unwrap();
        let parsed = Catalog::new(vec![Table::new("t").column(Column::new("flag", SqlType::parse("character(1)").unwrap()))])
            .unwrap();
        assert_eq!(declared, parsed);
        assert_eq!(declared.tables()[0].columns[0].data_type, SqlType::Char(Some(1)));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = Catalog::from_json("{\"tables\": [").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ParseError);
    }

    #[test]
    fn invalid_json_catalog_is_catalog_invalid() {
        let err = Catalog::from_json(r#"{"tables":[{"name":"t","columns":[]}]}"#).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CatalogInvalid);
    }
}
