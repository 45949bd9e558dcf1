//! Catalog fixtures shared by the end-to-end tests.

#![allow(dead_code)]

use lockplane::{Catalog, Column, Index, SqlType, Table};

pub fn catalog(tables: Vec<Table>) -> Catalog {
    Catalog::new(tables).expect("fixture catalog is valid")
}

pub fn users() -> Table {
    Table::new("users")
        .column(Column::new("id", SqlType::Integer).primary_key())
        .column(Column::new("email", SqlType::Text))
}

pub fn posts() -> Table {
    Table::new("posts")
        .column(Column::new("id", SqlType::Integer).primary_key())
        .column(Column::new("user_id", SqlType::Integer).references("users", "id"))
}

/// Pairs of (before, after) catalogs covering every change kind the planner
/// handles, plus the boundary cases (empty sides, single-column tables,
/// indexes on new columns, foreign-key cycles, serial conversions, names
/// that differ only in case).
pub fn transitions() -> Vec<(&'static str, Catalog, Catalog)> {
    let empty = Catalog::empty();
    let single = catalog(vec![Table::new("flags").column(Column::new("id", SqlType::BigSerial).primary_key())]);

    let blog_before = catalog(vec![
        users().column(Column::new("legacy", SqlType::Varchar(Some(40)))),
        Table::new("audit").column(Column::new("id", SqlType::Integer).primary_key()),
    ]);
    let blog_after = catalog(vec![
        Table::new("users")
            .column(Column::new("id", SqlType::BigInt).primary_key())
            .column(Column::new("email", SqlType::Text).not_null().default_sql("''"))
            .column(Column::new("created_at", SqlType::TimestampTz(None)).default_sql("now()"))
            .index(Index::new("users_email_idx", ["email"]).unique()),
        posts()
            .column(Column::new("title", SqlType::Varchar(Some(200))).not_null().default_sql("'untitled'"))
            .index(Index::new("posts_user_id_idx", ["user_id"])),
    ]);

    let cycle = catalog(vec![
        Table::new("a")
            .column(Column::new("id", SqlType::Integer).primary_key())
            .column(Column::new("b_id", SqlType::Integer).references("b", "id")),
        Table::new("b")
            .column(Column::new("id", SqlType::Integer).primary_key())
            .column(Column::new("a_id", SqlType::Integer).references("a", "id")),
    ]);

    let indexed_before = catalog(vec![users()]);
    let indexed_after = catalog(vec![users()
        .column(Column::new("handle", SqlType::Text))
        .index(Index::new("users_handle_idx", ["handle"]).unique())]);

    let keyed_before = catalog(vec![Table::new("tags")
        .column(Column::new("id", SqlType::Integer).primary_key())
        .column(Column::new("label", SqlType::Text))]);
    let keyed_after = catalog(vec![Table::new("tags")
        .column(Column::new("id", SqlType::Integer))
        .column(Column::new("label", SqlType::Text).primary_key())]);

    let counters_plain = catalog(vec![Table::new("counters")
        .column(Column::new("id", SqlType::BigInt).primary_key())
        .column(Column::new("hits", SqlType::Integer).not_null().default_sql("0"))]);
    let counters_serial = catalog(vec![Table::new("counters")
        .column(Column::new("id", SqlType::Serial).primary_key())
        .column(Column::new("hits", SqlType::BigSerial).not_null())]);

    let lower = catalog(vec![users(), posts()]);
    let mixed = catalog(vec![
        Table::new("Users")
            .column(Column::new("id", SqlType::Integer).primary_key())
            .column(Column::new("email", SqlType::Text)),
        Table::new("posts")
            .column(Column::new("id", SqlType::Integer).primary_key())
            .column(Column::new("user_id", SqlType::Integer).references("Users", "id")),
    ]);

    let prices = |precision| {
        catalog(vec![Table::new("prices")
            .column(Column::new("id", SqlType::Integer).primary_key())
            .column(Column::new("amount", SqlType::Numeric(Some((precision, 2)))).not_null().default_sql("0"))])
    };

    vec![
        ("empty to empty", empty.clone(), empty.clone()),
        ("create from empty", empty.clone(), blog_after.clone()),
        ("drop to empty", blog_after.clone(), empty.clone()),
        ("single primary key column", empty.clone(), single),
        ("mixed changes", blog_before, blog_after),
        ("foreign key cycle", empty, cycle),
        ("index on new column", indexed_before, indexed_after),
        ("primary key moves", keyed_before, keyed_after),
        ("integer to serial", counters_plain.clone(), counters_serial.clone()),
        ("serial to integer", counters_serial, counters_plain),
        ("case-only rename", lower, mixed),
        ("numeric narrowing", prices(12), prices(10)),
    ]
}
