use rusqlite::{Connection, Result};
use tracing::{debug, info};

/// SQLite schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Entity tables, in the order rows must be written for references to resolve
pub const ENTITY_TABLES: [&str; 13] = [
    "modules",
    "resources",
    "classes",
    "tags",
    "attributes",
    "definitions",
    "relationships",
    "examples",
    "tag_examples",
    "tag_usage",
    "attribute_examples",
    "attribute_usage",
    "issues",
];

/// Initialize the archive schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    debug!("Initializing archive schema v{}", SCHEMA_VERSION);

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    debug!("Current schema version: {}", current_version);

    if current_version < SCHEMA_VERSION {
        info!("Upgrading archive schema from v{} to v{}", current_version, SCHEMA_VERSION);
        apply_migrations(conn, current_version)?;
    }

    Ok(())
}

/// Apply migrations from current version to latest
fn apply_migrations(conn: &Connection, from_version: i32) -> Result<()> {
    for version in (from_version + 1)..=SCHEMA_VERSION {
        debug!("Applying migration v{}", version);
        if version == 1 {
            create_v1_schema(conn)?;
        }

        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [version],
        )?;
    }

    Ok(())
}

/// Create v1 schema: one table per entity kind, `id` is the 0-based
/// creation position and every `*_id` column holds such a position
fn create_v1_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS modules (
            id INTEGER PRIMARY KEY,
            identifier TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            version TEXT,
            official INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS resources (
            id INTEGER PRIMARY KEY,
            path TEXT NOT NULL,
            module_id INTEGER NOT NULL REFERENCES modules(id),
            content_hash TEXT
        );

        CREATE TABLE IF NOT EXISTS classes (
            id INTEGER PRIMARY KEY,
            identifier TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            module_id INTEGER REFERENCES modules(id)
        );

        CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY,
            identifier TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            module_id INTEGER REFERENCES modules(id)
        );

        CREATE TABLE IF NOT EXISTS attributes (
            id INTEGER PRIMARY KEY,
            identifier TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            module_id INTEGER REFERENCES modules(id)
        );

        CREATE TABLE IF NOT EXISTS definitions (
            id INTEGER PRIMARY KEY,
            identifier TEXT NOT NULL UNIQUE,
            is_abstract INTEGER NOT NULL,
            parent_name TEXT,
            parent_id INTEGER REFERENCES definitions(id),
            module_id INTEGER REFERENCES modules(id),
            class_id INTEGER REFERENCES classes(id),
            resource_id INTEGER REFERENCES resources(id)
        );

        CREATE TABLE IF NOT EXISTS relationships (
            id INTEGER PRIMARY KEY,
            parent_id INTEGER NOT NULL REFERENCES tags(id),
            child_id INTEGER NOT NULL REFERENCES tags(id),
            context_id INTEGER REFERENCES tags(id)
        );

        CREATE INDEX IF NOT EXISTS idx_relationships_child
         ON relationships(child_id);

        CREATE TABLE IF NOT EXISTS examples (
            id INTEGER PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tag_examples (
            id INTEGER PRIMARY KEY,
            example_id INTEGER NOT NULL REFERENCES examples(id),
            relationship_id INTEGER NOT NULL REFERENCES relationships(id)
        );

        CREATE TABLE IF NOT EXISTS tag_usage (
            id INTEGER PRIMARY KEY,
            tag_example_id INTEGER NOT NULL REFERENCES tag_examples(id),
            definition_id INTEGER NOT NULL REFERENCES definitions(id)
        );

        CREATE INDEX IF NOT EXISTS idx_tag_usage_example
         ON tag_usage(tag_example_id);

        CREATE TABLE IF NOT EXISTS attribute_examples (
            id INTEGER PRIMARY KEY,
            example_id INTEGER NOT NULL REFERENCES examples(id),
            tag_id INTEGER NOT NULL REFERENCES tags(id),
            attribute_id INTEGER NOT NULL REFERENCES attributes(id)
        );

        CREATE TABLE IF NOT EXISTS attribute_usage (
            id INTEGER PRIMARY KEY,
            attribute_example_id INTEGER NOT NULL REFERENCES attribute_examples(id),
            definition_id INTEGER NOT NULL REFERENCES definitions(id)
        );

        CREATE TABLE IF NOT EXISTS issues (
            id INTEGER PRIMARY KEY,
            severity INTEGER NOT NULL,
            message TEXT NOT NULL,
            module_id INTEGER REFERENCES modules(id),
            resource_id INTEGER REFERENCES resources(id),
            definition_id INTEGER REFERENCES definitions(id),
            class_id INTEGER REFERENCES classes(id),
            tag_id INTEGER REFERENCES tags(id),
            attribute_id INTEGER REFERENCES attributes(id)
        );

        CREATE INDEX IF NOT EXISTS idx_issues_severity
         ON issues(severity);",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_init_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();

        for table in ENTITY_TABLES {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }
        assert!(tables.contains(&"meta".to_string()));
        assert!(tables.contains(&"schema_version".to_string()));
    }

    #[test]
    fn test_idempotent_init() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let count: i32 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }
}
