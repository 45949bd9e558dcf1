//! The DDL dialect plans are written in.
//!
//! [`DdlStatement`] renders to Postgres SQL, and [`parse_statement`] reads
//! back exactly what the renderer produces (plus the usual case and spacing
//! variations). The in-memory driver and the safety analyzer both work from
//! parsed statements.

use std::fmt::{self, Write as _};

use crate::catalog::{ident, Column, DefaultExpr, ForeignKeyRef, Index, SqlType, Table};
use crate::error::{LockplaneError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdlStatement {
    /// Table with its columns; indexes are created separately.
    CreateTable { table: Table },
    DropTable { name: String, cascade: bool },
    AddColumn { table: String, column: Column },
    DropColumn { table: String, column: String },
    AlterColumnType { table: String, column: String, data_type: SqlType },
    SetNotNull { table: String, column: String },
    DropNotNull { table: String, column: String },
    SetDefault { table: String, column: String, default: DefaultExpr },
    DropDefault { table: String, column: String },
    AddPrimaryKey { table: String, constraint: String, column: String },
    AddForeignKey { table: String, constraint: String, column: String, references: ForeignKeyRef },
    DropConstraint { table: String, constraint: String },
    CreateIndex { table: String, index: Index },
    DropIndex { name: String },
    /// Sequence backing an integer column; dropped with the column it is
    /// owned by.
    CreateSequence { name: String, data_type: SqlType, table: String, column: String },
    DropSequence { name: String },
}

impl DdlStatement {
    /// Table the statement touches; `None` for `DROP INDEX` and
    /// `DROP SEQUENCE`.
    pub fn table(&self) -> Option<&str> {
        match self {
            DdlStatement::CreateTable { table } => Some(table.name.as_str()),
            DdlStatement::DropTable { name, .. } => Some(name.as_str()),
            DdlStatement::AddColumn { table, .. }
            | DdlStatement::DropColumn { table, .. }
            | DdlStatement::AlterColumnType { table, .. }
            | DdlStatement::SetNotNull { table, .. }
            | DdlStatement::DropNotNull { table, .. }
            | DdlStatement::SetDefault { table, .. }
            | DdlStatement::DropDefault { table, .. }
            | DdlStatement::AddPrimaryKey { table, .. }
            | DdlStatement::AddForeignKey { table, .. }
            | DdlStatement::DropConstraint { table, .. }
            | DdlStatement::CreateIndex { table, .. }
            | DdlStatement::CreateSequence { table, .. } => Some(table.as_str()),
            DdlStatement::DropIndex { .. } | DdlStatement::DropSequence { .. } => None,
        }
    }
}

fn column_list(columns: &[String]) -> String {
    columns.iter().map(|c| ident::quote(c)).collect::<Vec<_>>().join(", ")
}

/// `name type [NOT NULL] [DEFAULT expr] [PRIMARY KEY] [CONSTRAINT fk REFERENCES t (cols)]`
pub fn column_definition(table: &str, column: &Column) -> String {
    let mut def = format!("{} {}", ident::quote(&column.name), column.data_type);
    if !column.nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        let _ = write!(def, " DEFAULT {}", default);
    }
    if column.is_primary_key {
        def.push_str(" PRIMARY KEY");
    }
    if let Some(reference) = &column.references {
        let _ = write!(
            def,
            " CONSTRAINT {} REFERENCES {} ({})",
            ident::quote(&ident::foreign_key_constraint(table, &column.name)),
            ident::quote(&reference.table),
            column_list(&reference.columns)
        );
    }
    def
}

impl fmt::Display for DdlStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DdlStatement::CreateTable { table } => {
                let columns: Vec<String> = table
                    .columns
                    .iter()
                    .map(|c| column_definition(&table.name, c))
                    .collect();
                write!(f, "CREATE TABLE {} ({})", ident::quote(&table.name), columns.join(", "))
            }
            DdlStatement::DropTable { name, cascade } => {
                write!(f, "DROP TABLE {}", ident::quote(name))?;
                if *cascade {
                    f.write_str(" CASCADE")?;
                }
                Ok(())
            }
            DdlStatement::AddColumn { table, column } => write!(
                f,
                "ALTER TABLE {} ADD COLUMN {}",
                ident::quote(table),
                column_definition(table, column)
            ),
            DdlStatement::DropColumn { table, column } => write!(
                f,
                "ALTER TABLE {} DROP COLUMN {}",
                ident::quote(table),
                ident::quote(column)
            ),
            DdlStatement::AlterColumnType { table, column, data_type } => write!(
                f,
                "ALTER TABLE {} ALTER COLUMN {} TYPE {}",
                ident::quote(table),
                ident::quote(column),
                data_type.storage_type()
            ),
            DdlStatement::SetNotNull { table, column } => write!(
                f,
                "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL",
                ident::quote(table),
                ident::quote(column)
            ),
            DdlStatement::DropNotNull { table, column } => write!(
                f,
                "ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL",
                ident::quote(table),
                ident::quote(column)
            ),
            DdlStatement::SetDefault { table, column, default } => write!(
                f,
                "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                ident::quote(table),
                ident::quote(column),
                default
            ),
            DdlStatement::DropDefault { table, column } => write!(
                f,
                "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT",
                ident::quote(table),
                ident::quote(column)
            ),
            DdlStatement::AddPrimaryKey { table, constraint, column } => write!(
                f,
                "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({})",
                ident::quote(table),
                ident::quote(constraint),
                ident::quote(column)
            ),
            DdlStatement::AddForeignKey { table, constraint, column, references } => write!(
                f,
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                ident::quote(table),
                ident::quote(constraint),
                ident::quote(column),
                ident::quote(&references.table),
                column_list(&references.columns)
            ),
            DdlStatement::DropConstraint { table, constraint } => write!(
                f,
                "ALTER TABLE {} DROP CONSTRAINT {}",
                ident::quote(table),
                ident::quote(constraint)
            ),
            DdlStatement::CreateIndex { table, index } => write!(
                f,
                "CREATE {}INDEX {} ON {} ({})",
                if index.unique { "UNIQUE " } else { "" },
                ident::quote(&index.name),
                ident::quote(table),
                column_list(&index.columns)
            ),
            DdlStatement::DropIndex { name } => write!(f, "DROP INDEX {}", ident::quote(name)),
            DdlStatement::CreateSequence { name, data_type, table, column } => write!(
                f,
                "CREATE SEQUENCE {} AS {} OWNED BY {}.{}",
                ident::quote(name),
                data_type.storage_type(),
                ident::quote(table),
                ident::quote(column)
            ),
            DdlStatement::DropSequence { name } => write!(f, "DROP SEQUENCE {}", ident::quote(name)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Token<'a> {
    text: &'a str,
    start: usize,
}

impl Token<'_> {
    fn is(&self, keyword: &str) -> bool {
        self.text.eq_ignore_ascii_case(keyword)
    }
}

/// Splits on whitespace outside quotes and parentheses.
fn tokenize(sql: &str) -> std::result::Result<Vec<Token<'_>>, String> {
    let mut tokens = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start: Option<usize> = None;

    for (i, c) in sql.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err("unbalanced ')'".to_string());
                    }
                }
                c if c.is_whitespace() && depth == 0 => {
                    if let Some(s) = start.take() {
                        tokens.push(Token { text: &sql[s..i], start: s });
                    }
                    continue;
                }
                _ => {}
            },
        }
        if start.is_none() {
            start = Some(i);
        }
    }
    if quote.is_some() {
        return Err("unterminated quoted string or identifier".to_string());
    }
    if depth != 0 {
        return Err("unbalanced '('".to_string());
    }
    if let Some(s) = start {
        tokens.push(Token { text: &sql[s..], start: s });
    }
    Ok(tokens)
}

/// Splits on commas outside quotes and parentheses.
fn split_top_level(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut last = 0;
    for (i, c) in body.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' => depth += 1,
                ')' => depth -= 1,
                ',' if depth == 0 => {
                    parts.push(body[last..i].trim());
                    last = i + 1;
                }
                _ => {}
            },
        }
    }
    let tail = body[last..].trim();
    if !tail.is_empty() || !parts.is_empty() {
        parts.push(tail);
    }
    parts
}

/// Unquotes a quoted identifier; folds an unquoted one to lower case.
fn identifier(raw: &str) -> std::result::Result<String, String> {
    if let Some(inner) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        if inner.is_empty() {
            return Err("empty quoted identifier".to_string());
        }
        return Ok(inner.replace("\"\"", "\""));
    }
    if raw.is_empty() || raw.contains(['(', ')', '\'', ',', '"']) {
        return Err(format!("expected identifier, found {:?}", raw));
    }
    Ok(raw.to_ascii_lowercase())
}

/// Splits `table.column` on the dot outside quotes.
fn qualified_column(raw: &str) -> std::result::Result<(String, String), String> {
    let mut quoted = false;
    for (i, c) in raw.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '.' if !quoted => return Ok((identifier(&raw[..i])?, identifier(&raw[i + 1..])?)),
            _ => {}
        }
    }
    Err(format!("expected table.column, found {:?}", raw))
}

/// Parses `(a, b)` into identifiers.
fn identifier_list(raw: &str) -> std::result::Result<Vec<String>, String> {
    let inner = raw
        .trim()
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .ok_or_else(|| format!("expected parenthesized column list, found {:?}", raw))?;
    let columns = split_top_level(inner)
        .into_iter()
        .map(identifier)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if columns.is_empty() {
        return Err("empty column list".to_string());
    }
    Ok(columns)
}

/// Splits `name(list)` written without a space into its two halves.
fn split_attached<'a>(tokens: &[Token<'a>], at: usize) -> std::result::Result<(String, &'a str, usize), String> {
    let token = tokens.get(at).ok_or("unexpected end of statement")?;
    if !token.text.starts_with('"') {
        if let Some(paren) = token.text.find('(') {
            return Ok((identifier(&token.text[..paren])?, &token.text[paren..], at + 1));
        }
    }
    let list = tokens.get(at + 1).ok_or("expected column list")?;
    Ok((identifier(token.text)?, list.text, at + 2))
}

struct Cursor<'s, 't> {
    sql: &'s str,
    tokens: &'t [Token<'s>],
    pos: usize,
}

impl<'s, 't> Cursor<'s, 't> {
    fn peek(&self) -> Option<&Token<'s>> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> std::result::Result<Token<'s>, String> {
        let token = *self.tokens.get(self.pos).ok_or("unexpected end of statement")?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, keyword: &str) -> std::result::Result<(), String> {
        let token = self.next().map_err(|_| format!("expected {} at end of statement", keyword))?;
        if token.is(keyword) {
            Ok(())
        } else {
            Err(format!("expected {}, found {:?}", keyword, token.text))
        }
    }

    fn accept(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|t| t.is(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn identifier(&mut self) -> std::result::Result<String, String> {
        identifier(self.next()?.text)
    }

    /// Source text from the current token to the end of the statement.
    fn rest(&mut self) -> std::result::Result<&'s str, String> {
        let token = self.peek().ok_or("unexpected end of statement")?;
        let rest = self.sql[token.start..].trim();
        self.pos = self.tokens.len();
        Ok(rest)
    }

    fn finish(&self) -> std::result::Result<(), String> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(format!("unexpected trailing input {:?}", token.text)),
        }
    }
}

/// Parses one statement of the dialect [`DdlStatement`] renders.
pub fn parse_statement(sql: &str) -> Result<DdlStatement> {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();
    parse_inner(trimmed).map_err(|message| LockplaneError::parse(excerpt(trimmed), message))
}

fn excerpt(sql: &str) -> String {
    const MAX: usize = 60;
    match sql.char_indices().nth(MAX) {
        Some((cut, _)) => format!("statement {:?}...", &sql[..cut]),
        None => format!("statement {:?}", sql),
    }
}

fn parse_inner(sql: &str) -> std::result::Result<DdlStatement, String> {
    let tokens = tokenize(sql)?;
    let mut cur = Cursor { sql, tokens: &tokens, pos: 0 };

    let first = cur.next().map_err(|_| "empty statement".to_string())?;
    let statement = if first.is("CREATE") {
        if cur.accept("TABLE") {
            parse_create_table(&mut cur)?
        } else if cur.accept("SEQUENCE") {
            let name = cur.identifier()?;
            cur.expect("AS")?;
            let data_type = SqlType::parse(cur.next()?.text)?;
            cur.expect("OWNED")?;
            cur.expect("BY")?;
            let (table, column) = qualified_column(cur.next()?.text)?;
            DdlStatement::CreateSequence { name, data_type, table, column }
        } else {
            let unique = cur.accept("UNIQUE");
            cur.expect("INDEX")?;
            let name = cur.identifier()?;
            cur.expect("ON")?;
            let (table, list, pos) = split_attached(cur.tokens, cur.pos)?;
            cur.pos = pos;
            let index = Index {
                name,
                columns: identifier_list(list)?,
                unique,
            };
            DdlStatement::CreateIndex { table, index }
        }
    } else if first.is("DROP") {
        if cur.accept("TABLE") {
            let name = cur.identifier()?;
            let cascade = cur.accept("CASCADE");
            DdlStatement::DropTable { name, cascade }
        } else if cur.accept("SEQUENCE") {
            DdlStatement::DropSequence { name: cur.identifier()? }
        } else {
            cur.expect("INDEX")?;
            DdlStatement::DropIndex { name: cur.identifier()? }
        }
    } else if first.is("ALTER") {
        cur.expect("TABLE")?;
        let table = cur.identifier()?;
        parse_alter_table(&mut cur, table)?
    } else {
        return Err(format!("unsupported statement starting with {:?}", first.text));
    };
    cur.finish()?;
    Ok(statement)
}

fn parse_create_table(cur: &mut Cursor<'_, '_>) -> std::result::Result<DdlStatement, String> {
    let (name, body, pos) = split_attached(cur.tokens, cur.pos)?;
    cur.pos = pos;
    let inner = body
        .strip_prefix('(')
        .and_then(|b| b.strip_suffix(')'))
        .ok_or("expected column definitions in parentheses")?;
    let mut table = Table::new(name);
    for part in split_top_level(inner) {
        table.columns.push(parse_column_definition(part)?);
    }
    if table.columns.is_empty() {
        return Err("table has no columns".to_string());
    }
    Ok(DdlStatement::CreateTable { table })
}

fn parse_alter_table(cur: &mut Cursor<'_, '_>, table: String) -> std::result::Result<DdlStatement, String> {
    let action = cur.next()?;
    if action.is("ADD") {
        if cur.accept("CONSTRAINT") {
            let constraint = cur.identifier()?;
            if cur.accept("PRIMARY") {
                cur.expect("KEY")?;
                let columns = identifier_list(cur.next()?.text)?;
                let [column] = <[String; 1]>::try_from(columns)
                    .map_err(|_| "only single-column primary keys are supported".to_string())?;
                return Ok(DdlStatement::AddPrimaryKey { table, constraint, column });
            }
            cur.expect("FOREIGN")?;
            cur.expect("KEY")?;
            let columns = identifier_list(cur.next()?.text)?;
            let [column] = <[String; 1]>::try_from(columns)
                .map_err(|_| "only single-column foreign keys are supported".to_string())?;
            cur.expect("REFERENCES")?;
            let (target, list, pos) = split_attached(cur.tokens, cur.pos)?;
            cur.pos = pos;
            let references = ForeignKeyRef {
                table: target,
                columns: identifier_list(list)?,
            };
            return Ok(DdlStatement::AddForeignKey { table, constraint, column, references });
        }
        cur.accept("COLUMN");
        let column = parse_column_definition(cur.rest()?)?;
        return Ok(DdlStatement::AddColumn { table, column });
    }
    if action.is("DROP") {
        if cur.accept("CONSTRAINT") {
            let constraint = cur.identifier()?;
            return Ok(DdlStatement::DropConstraint { table, constraint });
        }
        cur.accept("COLUMN");
        let column = cur.identifier()?;
        return Ok(DdlStatement::DropColumn { table, column });
    }
    if action.is("ALTER") {
        cur.accept("COLUMN");
        let column = cur.identifier()?;
        let verb = cur.next()?;
        if verb.is("TYPE") {
            let data_type = SqlType::parse(cur.rest()?)?;
            return Ok(DdlStatement::AlterColumnType { table, column, data_type });
        }
        if verb.is("SET") {
            if cur.accept("NOT") {
                cur.expect("NULL")?;
                return Ok(DdlStatement::SetNotNull { table, column });
            }
            cur.expect("DEFAULT")?;
            let default = DefaultExpr::parse(cur.rest()?);
            return Ok(DdlStatement::SetDefault { table, column, default });
        }
        if verb.is("DROP") {
            if cur.accept("NOT") {
                cur.expect("NULL")?;
                return Ok(DdlStatement::DropNotNull { table, column });
            }
            cur.expect("DEFAULT")?;
            return Ok(DdlStatement::DropDefault { table, column });
        }
        return Err(format!("unsupported ALTER COLUMN action {:?}", verb.text));
    }
    Err(format!("unsupported ALTER TABLE action {:?}", action.text))
}

const CONSTRAINT_WORDS: &[&str] = &["NOT", "NULL", "DEFAULT", "PRIMARY", "CONSTRAINT", "REFERENCES"];

fn is_constraint_word(token: &Token<'_>) -> bool {
    CONSTRAINT_WORDS.iter().any(|w| token.is(w))
}

/// Parses `name type [NOT NULL | NULL] [DEFAULT expr] [PRIMARY KEY]
/// [CONSTRAINT name] [REFERENCES table (cols)]`.
fn parse_column_definition(def: &str) -> std::result::Result<Column, String> {
    let tokens = tokenize(def)?;
    let name = identifier(tokens.first().ok_or("empty column definition")?.text)?;

    let type_start = tokens.get(1).ok_or_else(|| format!("column {} has no type", name))?;
    let mut pos = 1;
    while pos < tokens.len() && !is_constraint_word(&tokens[pos]) {
        pos += 1;
    }
    let type_end = tokens.get(pos).map_or(def.len(), |t| t.start);
    let data_type = SqlType::parse(&def[type_start.start..type_end])?;

    let mut column = Column::new(name, data_type);
    while pos < tokens.len() {
        let token = tokens[pos];
        pos += 1;
        if token.is("NOT") {
            match tokens.get(pos) {
                Some(t) if t.is("NULL") => pos += 1,
                _ => return Err("expected NULL after NOT".to_string()),
            }
            column.nullable = false;
        } else if token.is("NULL") {
            column.nullable = true;
        } else if token.is("DEFAULT") {
            let start = tokens.get(pos).ok_or("expected expression after DEFAULT")?.start;
            while pos < tokens.len()
                && !["PRIMARY", "CONSTRAINT", "REFERENCES", "NOT"].iter().any(|w| tokens[pos].is(w))
            {
                pos += 1;
            }
            let end = tokens.get(pos).map_or(def.len(), |t| t.start);
            column.default = Some(DefaultExpr::parse(&def[start..end]));
        } else if token.is("PRIMARY") {
            match tokens.get(pos) {
                Some(t) if t.is("KEY") => pos += 1,
                _ => return Err("expected KEY after PRIMARY".to_string()),
            }
            column.is_primary_key = true;
            column.nullable = false;
        } else if token.is("CONSTRAINT") {
            // Constraint names follow the `<table>_<column>_fkey` convention.
            identifier(tokens.get(pos).ok_or("expected constraint name")?.text)?;
            pos += 1;
        } else if token.is("REFERENCES") {
            let (table, list, next) = split_attached(&tokens, pos)?;
            pos = next;
            column.references = Some(ForeignKeyRef {
                table,
                columns: identifier_list(list)?,
            });
        } else {
            return Err(format!("unexpected {:?} in definition of column {}", token.text, column.name));
        }
    }
    Ok(column)
}
