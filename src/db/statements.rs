//! Mapped statement registry.
//!
//! Mapper resources are plain `.sql` files gathered recursively from the
//! configured mapper directory. Each file holds one or more named statements
//! introduced by a header line:
//!
//! ```sql
//! -- name: find_post_by_id
//! SELECT id, title, body FROM posts WHERE id = ?
//!
//! -- name: insert_post
//! INSERT INTO posts (title, body) VALUES (?, ?)
//! ```
//!
//! Every statement is parsed at load time with the dialect of the target
//! backend and classified read vs. write; sessions use the classification to
//! refuse writes on the secondary pool. Loading fails when the directory
//! yields zero resources, when a statement does not parse, or when two
//! statements share a name.

use crate::db::macros::DatabaseType;
use crate::error::{DbError, DbResult};
use sqlparser::ast::Statement as SqlAst;
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

const NAME_HEADER: &str = "-- name:";

/// Whether a mapped statement reads or modifies data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Read,
    Write,
}

/// A named SQL statement loaded from a mapper resource.
#[derive(Debug, Clone)]
pub struct MappedStatement {
    /// Fully qualified name (namespace included when configured).
    pub name: String,
    pub sql: String,
    pub kind: StatementKind,
    /// Mapper file the statement came from.
    pub source: PathBuf,
}

/// Read-only registry of mapped statements, built once at startup.
#[derive(Debug)]
pub struct StatementRegistry {
    statements: HashMap<String, MappedStatement>,
    namespace: Option<String>,
}

impl StatementRegistry {
    /// Scan `dir` recursively for `.sql` mapper files and load every named
    /// statement, qualifying names with `namespace` when set.
    pub fn load(
        dir: &Path,
        namespace: Option<&str>,
        db_type: DatabaseType,
    ) -> DbResult<Self> {
        let mut files: Vec<PathBuf> = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                DbError::config(format!(
                    "Cannot scan mapper directory {}: {e}",
                    dir.display()
                ))
            })?;
            if entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "sql")
            {
                files.push(entry.into_path());
            }
        }

        if files.is_empty() {
            return Err(DbError::config(format!(
                "Mapper directory {} matches zero .sql resources",
                dir.display()
            )));
        }

        let mut statements = HashMap::new();
        for file in &files {
            let raw = std::fs::read_to_string(file).map_err(|e| {
                DbError::config(format!("Cannot read mapper file {}: {e}", file.display()))
            })?;
            for (name, sql) in split_sections(&raw, file)? {
                let qualified = qualify(namespace, &name);
                let kind = classify(&sql, db_type, &qualified, file)?;
                debug!(statement = %qualified, kind = ?kind, file = %file.display(), "Loaded statement");
                let previous = statements.insert(
                    qualified.clone(),
                    MappedStatement {
                        name: qualified.clone(),
                        sql,
                        kind,
                        source: file.clone(),
                    },
                );
                if let Some(prev) = previous {
                    return Err(DbError::statement(
                        format!(
                            "Duplicate statement name (also defined in {})",
                            prev.source.display()
                        ),
                        qualified,
                    ));
                }
            }
        }

        if statements.is_empty() {
            return Err(DbError::config(format!(
                "Mapper directory {} contains no named statements",
                dir.display()
            )));
        }

        info!(
            count = statements.len(),
            files = files.len(),
            dir = %dir.display(),
            "Statement registry loaded"
        );

        Ok(Self {
            statements,
            namespace: namespace.map(String::from),
        })
    }

    /// Look up a statement by name. Unqualified names are resolved against
    /// the configured namespace.
    pub fn get(&self, name: &str) -> DbResult<&MappedStatement> {
        if let Some(stmt) = self.statements.get(name) {
            return Ok(stmt);
        }
        if !name.contains('.') {
            if let Some(ns) = &self.namespace {
                if let Some(stmt) = self.statements.get(&format!("{ns}.{name}")) {
                    return Ok(stmt);
                }
            }
        }
        Err(DbError::statement("Unknown statement", name))
    }

    /// Number of loaded statements.
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Sorted statement names, mainly for diagnostics.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.statements.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn qualify(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{ns}.{name}"),
        None => name.to_string(),
    }
}

/// Split a mapper file into `(name, sql)` sections on `-- name:` headers.
fn split_sections(raw: &str, file: &Path) -> DbResult<Vec<(String, String)>> {
    let mut sections: Vec<(String, Vec<&str>)> = Vec::new();

    for line in raw.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix(NAME_HEADER) {
            let name = rest.trim();
            if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Err(DbError::config(format!(
                    "Invalid statement name '{name}' in {}",
                    file.display()
                )));
            }
            sections.push((name.to_string(), Vec::new()));
        } else if let Some((_, body)) = sections.last_mut() {
            body.push(line);
        } else if !trimmed.is_empty() && !trimmed.starts_with("--") {
            return Err(DbError::config(format!(
                "SQL before the first '{NAME_HEADER}' header in {}",
                file.display()
            )));
        }
    }

    let mut out = Vec::with_capacity(sections.len());
    for (name, body) in sections {
        let sql = body.join("\n").trim().to_string();
        if sql.is_empty() {
            return Err(DbError::statement(
                format!("Statement has no SQL body in {}", file.display()),
                name,
            ));
        }
        out.push((name, sql));
    }
    Ok(out)
}

fn dialect_for(db_type: DatabaseType) -> Box<dyn Dialect> {
    match db_type {
        DatabaseType::MySql => Box::new(MySqlDialect {}),
        DatabaseType::Postgres => Box::new(PostgreSqlDialect {}),
        DatabaseType::SQLite => Box::new(SQLiteDialect {}),
    }
}

/// Parse a statement and decide whether it reads or writes.
fn classify(
    sql: &str,
    db_type: DatabaseType,
    name: &str,
    file: &Path,
) -> DbResult<StatementKind> {
    let dialect = dialect_for(db_type);
    let parsed = Parser::parse_sql(dialect.as_ref(), sql).map_err(|e| {
        DbError::statement(
            format!("Cannot parse SQL in {}: {e}", file.display()),
            name,
        )
    })?;

    match parsed.as_slice() {
        [] => Err(DbError::statement(
            format!("Empty SQL in {}", file.display()),
            name,
        )),
        [single] => Ok(match single {
            SqlAst::Query(_) => StatementKind::Read,
            _ => StatementKind::Write,
        }),
        _ => Err(DbError::statement(
            format!(
                "Mapper statements must contain a single SQL statement ({})",
                file.display()
            ),
            name,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_mapper(dir: &TempDir, rel: &str, content: &str) {
        let path = dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_load_and_classify() {
        let dir = TempDir::new().unwrap();
        write_mapper(
            &dir,
            "posts.sql",
            "-- name: find_post\nSELECT * FROM posts WHERE id = ?\n\n\
             -- name: insert_post\nINSERT INTO posts (title) VALUES (?)\n",
        );

        let registry =
            StatementRegistry::load(dir.path(), None, DatabaseType::SQLite).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.get("find_post").unwrap().kind,
            StatementKind::Read
        );
        assert_eq!(
            registry.get("insert_post").unwrap().kind,
            StatementKind::Write
        );
    }

    #[test]
    fn test_load_recursive_and_sorted_names() {
        let dir = TempDir::new().unwrap();
        write_mapper(&dir, "a/users.sql", "-- name: find_user\nSELECT 1\n");
        write_mapper(&dir, "b/posts.sql", "-- name: find_post\nSELECT 2\n");

        let registry =
            StatementRegistry::load(dir.path(), None, DatabaseType::SQLite).unwrap();
        assert_eq!(registry.names(), vec!["find_post", "find_user"]);
    }

    #[test]
    fn test_zero_resources_is_error() {
        let dir = TempDir::new().unwrap();
        let result = StatementRegistry::load(dir.path(), None, DatabaseType::SQLite);
        assert!(matches!(result, Err(DbError::Config { .. })));
    }

    #[test]
    fn test_missing_directory_is_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let result = StatementRegistry::load(&missing, None, DatabaseType::SQLite);
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_name_is_error() {
        let dir = TempDir::new().unwrap();
        write_mapper(&dir, "a.sql", "-- name: find\nSELECT 1\n");
        write_mapper(&dir, "b.sql", "-- name: find\nSELECT 2\n");

        let result = StatementRegistry::load(dir.path(), None, DatabaseType::SQLite);
        assert!(matches!(result, Err(DbError::Statement { .. })));
    }

    #[test]
    fn test_unparseable_sql_names_statement() {
        let dir = TempDir::new().unwrap();
        write_mapper(&dir, "bad.sql", "-- name: broken\nSELEKT oops\n");

        let err = StatementRegistry::load(dir.path(), None, DatabaseType::SQLite).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_multi_statement_section_is_error() {
        let dir = TempDir::new().unwrap();
        write_mapper(&dir, "multi.sql", "-- name: two\nSELECT 1; SELECT 2;\n");

        let result = StatementRegistry::load(dir.path(), None, DatabaseType::SQLite);
        assert!(matches!(result, Err(DbError::Statement { .. })));
    }

    #[test]
    fn test_sql_before_header_is_error() {
        let dir = TempDir::new().unwrap();
        write_mapper(&dir, "loose.sql", "SELECT 1\n-- name: find\nSELECT 2\n");

        let result = StatementRegistry::load(dir.path(), None, DatabaseType::SQLite);
        assert!(matches!(result, Err(DbError::Config { .. })));
    }

    #[test]
    fn test_empty_body_is_error() {
        let dir = TempDir::new().unwrap();
        write_mapper(&dir, "empty.sql", "-- name: nothing\n\n");

        let result = StatementRegistry::load(dir.path(), None, DatabaseType::SQLite);
        assert!(matches!(result, Err(DbError::Statement { .. })));
    }

    #[test]
    fn test_namespace_qualification() {
        let dir = TempDir::new().unwrap();
        write_mapper(&dir, "posts.sql", "-- name: find_post\nSELECT 1\n");

        let registry =
            StatementRegistry::load(dir.path(), Some("blog"), DatabaseType::SQLite).unwrap();
        // Both the short and the qualified form resolve.
        assert_eq!(registry.get("find_post").unwrap().name, "blog.find_post");
        assert_eq!(
            registry.get("blog.find_post").unwrap().name,
            "blog.find_post"
        );
        assert!(registry.get("other.find_post").is_err());
    }

    #[test]
    fn test_unknown_statement_is_error() {
        let dir = TempDir::new().unwrap();
        write_mapper(&dir, "posts.sql", "-- name: find_post\nSELECT 1\n");

        let registry =
            StatementRegistry::load(dir.path(), None, DatabaseType::SQLite).unwrap();
        assert!(matches!(
            registry.get("missing"),
            Err(DbError::Statement { .. })
        ));
    }

    #[test]
    fn test_invalid_statement_name_is_error() {
        let dir = TempDir::new().unwrap();
        write_mapper(&dir, "bad.sql", "-- name: not a name\nSELECT 1\n");

        let result = StatementRegistry::load(dir.path(), None, DatabaseType::SQLite);
        assert!(matches!(result, Err(DbError::Config { .. })));
    }

    #[test]
    fn test_comments_inside_body_are_kept() {
        let dir = TempDir::new().unwrap();
        write_mapper(
            &dir,
            "posts.sql",
            "-- file header comment\n-- name: find_post\n-- selects one post\nSELECT id FROM posts WHERE id = ?\n",
        );

        let registry =
            StatementRegistry::load(dir.path(), None, DatabaseType::SQLite).unwrap();
        let stmt = registry.get("find_post").unwrap();
        assert!(stmt.sql.contains("selects one post"));
        assert_eq!(stmt.kind, StatementKind::Read);
    }
}
