//! Connection pool and embedded schema migration

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

const INITIAL_SCHEMA: &str = include_str!("migrations/001_initial.sql");

/// Create a new database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await
}

/// Split a migration script on `;`, leaving `$$ ... $$` bodies intact
fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_dollar_block = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        match c {
            '$' if chars.peek() == Some(&'$') => {
                current.push('$');
                chars.next();
                in_dollar_block = !in_dollar_block;
            }
            ';' if !in_dollar_block => {
                if has_sql_content(&current) {
                    statements.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => {}
        }
    }

    if has_sql_content(&current) {
        statements.push(current.trim().to_string());
    }

    statements
}

/// False for fragments made only of whitespace and `--` comments
fn has_sql_content(s: &str) -> bool {
    s.lines().any(|line| {
        let trimmed = line.trim();
        !trimmed.is_empty() && !trimmed.starts_with("--")
    })
}

/// Apply the embedded schema. Statements are idempotent, so a failing one is
/// logged and skipped.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    let statements = split_sql_statements(INITIAL_SCHEMA);
    let total = statements.len();
    let mut failed = 0usize;

    for statement in statements {
        if let Err(e) = sqlx::query(&statement).execute(pool).await {
            failed += 1;
            tracing::warn!("Migration statement skipped: {}", e);
        }
    }

    tracing::info!(
        "Database migrations completed ({} statements, {} skipped)",
        total,
        failed
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_keeps_dollar_blocks_whole() {
        let sql = "-- header\nCREATE TABLE a (id INT);\nDO $$ BEGIN\n  CREATE TYPE t AS ENUM ('x');\nEXCEPTION WHEN duplicate_object THEN NULL;\nEND $$;\n\n-- trailing comment\n";
        let statements = split_sql_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("CREATE TABLE a"));
        assert!(statements[1].starts_with("DO $$"));
        assert!(statements[1].ends_with("END $$;"));
    }

    #[test]
    fn test_comment_only_fragments_are_dropped() {
        assert!(!has_sql_content("-- nothing here\n   \n"));
        assert!(has_sql_content("-- note\nSELECT 1"));
        assert!(split_sql_statements("-- a\n-- b\n").is_empty());
    }

    #[test]
    fn test_embedded_schema_splits() {
        let statements = split_sql_statements(INITIAL_SCHEMA);
        assert!(statements.iter().any(|s| s.contains("claim_status")));
        assert!(statements
            .iter()
            .any(|s| s.contains("CREATE TABLE IF NOT EXISTS user_claim_balances")));
        assert!(statements.iter().all(|s| has_sql_content(s)));
    }
}
