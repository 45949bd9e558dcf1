//! Rebuilding a [`Catalog`] from Postgres system catalog rows.
//!
//! The queries read `pg_catalog` directly for the connection's
//! `current_schema()`. Row assembly is kept separate from the queries so it
//! can be tested without a database.

use std::collections::BTreeMap;

use crate::catalog::{Catalog, Column, DefaultExpr, ForeignKeyRef, Index, SqlType, Table};

use super::DriverError;

pub(crate) const COLUMNS_QUERY: &str = r#"
SELECT c.relname::text, a.attname::text, format_type(a.atttypid, a.atttypmod)::text,
       a.attnotnull, pg_get_expr(d.adbin, d.adrelid)::text
FROM pg_attribute a
JOIN pg_class c ON c.oid = a.attrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
WHERE n.nspname = current_schema()
  AND c.relkind IN ('r', 'p')
  AND a.attnum > 0
  AND NOT a.attisdropped
ORDER BY c.relname, a.attnum
"#;

pub(crate) const PRIMARY_KEYS_QUERY: &str = r#"
SELECT c.relname::text, a.attname::text
FROM pg_index i
JOIN pg_class c ON c.oid = i.indrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
WHERE n.nspname = current_schema()
  AND i.indisprimary
ORDER BY c.relname, a.attnum
"#;

pub(crate) const FOREIGN_KEYS_QUERY: &str = r#"
SELECT con.conname::text, c.relname::text, a.attname::text, rc.relname::text, ra.attname::text
FROM pg_constraint con
JOIN pg_class c ON c.oid = con.conrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
JOIN pg_class rc ON rc.oid = con.confrelid
CROSS JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS k(attnum, refnum, ord)
JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
JOIN pg_attribute ra ON ra.attrelid = con.confrelid AND ra.attnum = k.refnum
WHERE con.contype = 'f'
  AND n.nspname = current_schema()
ORDER BY c.relname, con.conname, k.ord
"#;

pub(crate) const INDEXES_QUERY: &str = r#"
SELECT c.relname::text, ic.relname::text, i.indisunique, a.attname::text
FROM pg_index i
JOIN pg_class c ON c.oid = i.indrelid
JOIN pg_class ic ON ic.oid = i.indexrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
CROSS JOIN LATERAL unnest(i.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
LEFT JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = k.attnum
WHERE n.nspname = current_schema()
  AND NOT i.indisprimary
  AND i.indpred IS NULL
  AND NOT EXISTS (SELECT 1 FROM pg_constraint con WHERE con.conindid = i.indexrelid)
ORDER BY ic.relname, k.ord
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ColumnRow {
    pub table: String,
    pub column: String,
    pub data_type: String,
    pub not_null: bool,
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PrimaryKeyRow {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ForeignKeyRow {
    pub constraint: String,
    pub table: String,
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// One row per index column; `column` is `None` for expression columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IndexRow {
    pub table: String,
    pub index: String,
    pub unique: bool,
    pub column: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct CatalogRows {
    pub columns: Vec<ColumnRow>,
    pub primary_keys: Vec<PrimaryKeyRow>,
    pub foreign_keys: Vec<ForeignKeyRow>,
    pub indexes: Vec<IndexRow>,
}

fn column_from_row(row: &ColumnRow) -> Column {
    let parsed = SqlType::parse(&row.data_type).unwrap_or_else(|e| {
        log::warn!("column {}.{}: {}; keeping the type as written", row.table, row.column, e);
        SqlType::Other(row.data_type.trim().to_ascii_lowercase())
    });
    let mut column = Column::new(row.column.clone(), parsed.clone());
    column.nullable = !row.not_null;
    match row.default.as_deref() {
        Some(expr) if DefaultExpr::is_sequence(expr) => match SqlType::serial_for(&parsed) {
            Some(serial) => column.data_type = serial,
            None => column.default = Some(DefaultExpr::from_catalog(expr, &parsed)),
        },
        Some(expr) => column.default = Some(DefaultExpr::from_catalog(expr, &parsed)),
        None => {}
    }
    column
}

/// Assembles system catalog rows into a validated catalog.
///
/// Composite primary keys, composite foreign keys and expression indexes
/// have no representation in the model; they are skipped with a warning.
pub(crate) fn build_catalog(rows: CatalogRows) -> Result<Catalog, DriverError> {
    let mut tables: BTreeMap<String, Table> = BTreeMap::new();
    for row in &rows.columns {
        let column = column_from_row(row);
        tables
            .entry(row.table.clone())
            .or_insert_with(|| Table::new(row.table.clone()))
            .columns
            .push(column);
    }

    let mut primary_keys: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for row in &rows.primary_keys {
        primary_keys.entry(row.table.as_str()).or_default().push(row.column.as_str());
    }
    for (table, columns) in primary_keys {
        if columns.len() > 1 {
            log::warn!("skipping composite primary key on {} ({})", table, columns.join(", "));
            continue;
        }
        if let Some(column) = tables.get_mut(table).and_then(|t| find_column_mut(t, columns[0])) {
            column.is_primary_key = true;
            column.nullable = false;
        }
    }

    let mut foreign_keys: BTreeMap<(&str, &str), Vec<&ForeignKeyRow>> = BTreeMap::new();
    for row in &rows.foreign_keys {
        foreign_keys.entry((row.table.as_str(), row.constraint.as_str())).or_default().push(row);
    }
    for ((table, constraint), parts) in foreign_keys {
        if parts.len() > 1 {
            log::warn!("skipping composite foreign key {} on {}", constraint, table);
            continue;
        }
        let part = parts[0];
        let Some(column) = tables.get_mut(table).and_then(|t| find_column_mut(t, &part.column)) else {
            continue;
        };
        if column.references.is_some() {
            log::warn!("column {}.{} has several foreign keys; keeping the first", table, part.column);
            continue;
        }
        column.references = Some(ForeignKeyRef {
            table: part.referenced_table.clone(),
            columns: vec![part.referenced_column.clone()],
        });
    }

    let mut indexes: BTreeMap<(&str, &str), (bool, Vec<Option<&str>>)> = BTreeMap::new();
    for row in &rows.indexes {
        indexes
            .entry((row.table.as_str(), row.index.as_str()))
            .or_insert_with(|| (row.unique, Vec::new()))
            .1
            .push(row.column.as_deref());
    }
    for ((table, name), (unique, columns)) in indexes {
        let Some(columns) = columns.into_iter().collect::<Option<Vec<&str>>>() else {
            log::warn!("skipping expression index {} on {}", name, table);
            continue;
        };
        if let Some(t) = tables.get_mut(table) {
            let mut index = Index::new(name, columns);
            index.unique = unique;
            t.indexes.push(index);
        }
    }

    Catalog::new(tables.into_values().collect())
        .map_err(|e| DriverError::Other(format!("introspected schema is not representable: {e}")))
}

fn find_column_mut<'a>(table: &'a mut Table, name: &str) -> Option<&'a mut Column> {
    table.columns.iter_mut().find(|c| c.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ValueFunction;

    fn column(table: &str, name: &str, ty: &str, not_null: bool, default: Option<&str>) -> ColumnRow {
        ColumnRow {
            table: table.into(),
            column: name.into(),
            data_type: ty.into(),
            not_null,
            default: default.map(Into::into),
        }
    }

    fn rows() -> CatalogRows {
        CatalogRows {
            columns: vec![
                column("users", "id", "integer", true, Some("nextval('users_id_seq'::regclass)")),
                column("users", "email", "character varying(255)", true, None),
                column("users", "created_at", "timestamp without time zone", false, Some("now()")),
                column("users", "score", "integer", false, Some("'-1'::integer")),
                column("posts", "id", "bigint", true, None),
                column("posts", "user_id", "integer", false, None),
            ],
            primary_keys: vec![
                PrimaryKeyRow { table: "users".into(), column: "id".into() },
                PrimaryKeyRow { table: "posts".into(), column: "id".into() },
            ],
            foreign_keys: vec![ForeignKeyRow {
                constraint: "posts_user_id_fkey".into(),
                table: "posts".into(),
                column: "user_id".into(),
                referenced_table: "users".into(),
                referenced_column: "id".into(),
            }],
            indexes: vec![IndexRow {
                table: "users".into(),
                index: "idx_users_email".into(),
                unique: true,
                column: Some("email".into()),
            }],
        }
    }

    #[test]
    fn assembles_tables_from_rows() {
        let catalog = build_catalog(rows()).unwrap();
        let users = catalog.table("users").unwrap();

        let id = users.find_column("id").unwrap();
        assert_eq!(id.data_type, SqlType::Serial);
        assert!(id.default.is_none());
        assert!(id.is_primary_key);

        assert_eq!(users.find_column("email").unwrap().data_type, SqlType::Varchar(Some(255)));
        assert_eq!(
            users.find_column("created_at").unwrap().default,
            Some(DefaultExpr::Function(ValueFunction::Now))
        );
        assert_eq!(
            users.find_column("score").unwrap().default,
            Some(DefaultExpr::Number("-1".into()))
        );
        assert!(users.find_index("idx_users_email").unwrap().unique);

        let posts = catalog.table("posts").unwrap();
        let fk = posts.find_column("user_id").unwrap().references.as_ref().unwrap();
        assert_eq!(fk.table, "users");
        assert_eq!(fk.columns, ["id"]);
    }

    #[test]
    fn skips_what_the_model_cannot_express() {
        let mut rows = rows();
        rows.primary_keys.push(PrimaryKeyRow { table: "posts".into(), column: "user_id".into() });
        rows.indexes.push(IndexRow {
            table: "users".into(),
            index: "users_lower_email".into(),
            unique: false,
            column: None,
        });
        let catalog = build_catalog(rows).unwrap();
        let posts = catalog.table("posts").unwrap();
        assert!(posts.primary_key().is_none());
        assert!(catalog.table("users").unwrap().find_index("users_lower_email").is_none());
    }

    #[test]
    fn unknown_types_are_kept_opaque() {
        let rows = CatalogRows {
            columns: vec![column("t", "geom", "geometry(Point,4326)", false, None)],
            ..CatalogRows::default()
        };
        let catalog = build_catalog(rows).unwrap();
        assert!(matches!(
            catalog.table("t").unwrap().columns[0].data_type,
            SqlType::Other(_)
        ));
    }
}
