//! Lightweight statement sniffing.
//!
//! This is not a SQL parser. The tokenizer from [sqlparser] is used only so
//! that semicolons and keywords inside string literals, quoted identifiers
//! and comments are not mistaken for statement boundaries. If the tokenizer
//! rejects the text (the driver will reject it too) a naive split is used.

use crate::models::{DatabaseType, TxCommand};
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::tokenizer::{Location, Token, Tokenizer};

/// Verbs whose statements are tabular even when they return zero rows.
const TABULAR_VERBS: &[&str] = &[
    "SELECT", "WITH", "SHOW", "PRAGMA", "EXPLAIN", "DESCRIBE", "DESC", "VALUES", "TABLE",
];

fn get_dialect(db_type: DatabaseType) -> Box<dyn Dialect> {
    match db_type {
        DatabaseType::Postgres => Box::new(PostgreSqlDialect {}),
        DatabaseType::MySql => Box::new(MySqlDialect {}),
        DatabaseType::Sqlite => Box::new(SQLiteDialect {}),
    }
}

/// SELECT-like classification: a case-insensitive prefix check on the
/// trimmed text.
pub fn is_select_like(sql: &str) -> bool {
    sql.trim_start()
        .get(..6)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("select"))
}

/// Whether a statement starting with `verb` is expected to produce a row set.
pub fn is_tabular_verb(verb: &str) -> bool {
    TABULAR_VERBS.iter().any(|v| v.eq_ignore_ascii_case(verb))
}

/// One statement reduced to its unquoted words, uppercased.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Sniffed {
    words: Vec<String>,
}

impl Sniffed {
    fn verb(&self) -> Option<&str> {
        self.words.first().map(String::as_str)
    }
}

/// Split into statements, keeping only unquoted words of each.
///
/// Statements with no words at all (empty, comment-only) are dropped.
fn sniff(sql: &str, db_type: DatabaseType) -> Vec<Sniffed> {
    let dialect = get_dialect(db_type);
    let tokens = match Tokenizer::new(dialect.as_ref(), sql).tokenize() {
        Ok(tokens) => tokens,
        Err(_) => return sniff_naive(sql),
    };

    let mut statements = Vec::new();
    let mut current = Sniffed { words: Vec::new() };
    let mut has_content = false;
    for token in tokens {
        match token {
            Token::SemiColon => {
                if has_content {
                    statements.push(std::mem::replace(
                        &mut current,
                        Sniffed { words: Vec::new() },
                    ));
                }
                has_content = false;
            }
            Token::Whitespace(_) | Token::EOF => {}
            Token::Word(word) => {
                has_content = true;
                if word.quote_style.is_none() {
                    current.words.push(word.value.to_ascii_uppercase());
                }
            }
            _ => has_content = true,
        }
    }
    if has_content {
        statements.push(current);
    }
    statements
}

fn sniff_naive(sql: &str) -> Vec<Sniffed> {
    sql.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Sniffed {
            words: s
                .split(|c: char| !(c.is_alphanumeric() || c == '_'))
                .filter(|w| !w.is_empty())
                .map(str::to_ascii_uppercase)
                .collect(),
        })
        .collect()
}

/// Number of non-empty statements in `sql`.
pub fn statement_count(sql: &str, db_type: DatabaseType) -> usize {
    sniff(sql, db_type).len()
}

/// Leading keyword of the last statement, uppercased.
pub fn last_verb(sql: &str, db_type: DatabaseType) -> Option<String> {
    sniff(sql, db_type)
        .last()
        .and_then(|s| s.verb().map(String::from))
}

/// Recognize a lone transaction-control statement.
///
/// Only the plain forms are recognized; anything with extra clauses
/// (`ROLLBACK TO SAVEPOINT`, `BEGIN IMMEDIATE`, isolation levels) returns
/// `None` and runs as an ordinary statement. `END` is not accepted on MySQL
/// where it is not a transaction statement.
pub fn transaction_control(sql: &str, db_type: DatabaseType) -> Option<TxCommand> {
    let statements = sniff(sql, db_type);
    let [statement] = statements.as_slice() else {
        return None;
    };
    let words: Vec<&str> = statement.words.iter().map(String::as_str).collect();
    let noise = |rest: &[&str]| matches!(rest, [] | ["WORK"] | ["TRANSACTION"]);
    match words.as_slice() {
        ["BEGIN", rest @ ..] if noise(rest) => Some(TxCommand::Begin),
        ["START", "TRANSACTION"] => Some(TxCommand::Begin),
        ["COMMIT", rest @ ..] if noise(rest) => Some(TxCommand::Commit),
        ["END", rest @ ..] if noise(rest) && db_type != DatabaseType::MySql => {
            Some(TxCommand::Commit)
        }
        ["ROLLBACK", rest @ ..] if noise(rest) => Some(TxCommand::Rollback),
        _ => None,
    }
}

/// Whether the text contains `LIMIT` as an unquoted keyword.
fn has_limit(sql: &str, db_type: DatabaseType) -> bool {
    sniff(sql, db_type)
        .iter()
        .any(|s| s.words.iter().any(|w| w == "LIMIT"))
}

/// Inject a default row limit into a SELECT-like statement.
///
/// Applies only when the statement is SELECT-like, has no LIMIT clause and
/// `limit > 0`. The clause goes before a trailing semicolon, or at the end.
pub fn apply_default_limit(sql: &str, limit: u64, db_type: DatabaseType) -> String {
    if limit == 0 || !is_select_like(sql) || has_limit(sql, db_type) {
        return sql.to_string();
    }
    match significant_end(sql, db_type) {
        Some(end) => {
            let (head, tail) = sql.split_at(end);
            format!("{} LIMIT {}{}", head, limit, tail.trim_end())
        }
        None => {
            let body = sql.trim_end();
            match body.strip_suffix(';') {
                Some(stmt) => format!("{} LIMIT {};", stmt.trim_end(), limit),
                None => format!("{} LIMIT {}", body, limit),
            }
        }
    }
}

/// Byte offset just past the last token that is not whitespace, a comment
/// or a semicolon. `None` when the tokenizer rejects the text.
fn significant_end(sql: &str, db_type: DatabaseType) -> Option<usize> {
    let dialect = get_dialect(db_type);
    let tokens = Tokenizer::new(dialect.as_ref(), sql)
        .tokenize_with_location()
        .ok()?;
    let last = tokens.iter().rev().find(|t| {
        !matches!(
            t.token,
            Token::Whitespace(_) | Token::SemiColon | Token::EOF
        )
    })?;
    byte_offset(sql, last.span.end)
}

/// Tokenizer locations are 1-based lines and character columns.
fn byte_offset(sql: &str, location: Location) -> Option<usize> {
    let (mut line, mut column) = (1, 1);
    for (idx, ch) in sql.char_indices() {
        if line == location.line && column == location.column {
            return Some(idx);
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line == location.line && column == location.column).then_some(sql.len())
}
