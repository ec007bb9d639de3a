//! SQL validation helpers.
//!
//! Generated statements and caller-supplied expressions are parsed with
//! sqlparser-rs (SQLite dialect) so malformed input fails at construction
//! time instead of inside the database.

use std::sync::LazyLock;

use regex::Regex;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").unwrap()
});

/// Whether `name` is a plain or table-qualified identifier (`col`, `t.col`).
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Validates that a SQL string parses as one or more SQLite statements.
pub fn validate_sql(sql: &str) -> Result<(), String> {
    Parser::parse_sql(&SQLiteDialect {}, sql)
        .map(|_| ())
        .map_err(|e| format!("Invalid SQL: {}\nSQL: {}", e, sql))
}

/// Validates that `expr` is a single complete SQL expression.
pub fn validate_expression(expr: &str) -> Result<(), String> {
    let dialect = SQLiteDialect {};
    let mut parser = Parser::new(&dialect)
        .try_with_sql(expr)
        .map_err(|e| format!("Invalid expression: {}\nExpression: {}", e, expr))?;
    parser
        .parse_expr()
        .map_err(|e| format!("Invalid expression: {}\nExpression: {}", e, expr))?;

    match parser.peek_token().token {
        Token::EOF => Ok(()),
        other => Err(format!(
            "Invalid expression: unexpected trailing token {}\nExpression: {}",
            other, expr
        )),
    }
}
