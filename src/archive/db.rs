use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::schema::{init_schema, ENTITY_TABLES};
use crate::graph::*;

/// Type alias for connection pool
pub type ConnectionPool = Pool<SqliteConnectionManager>;

const ANALYZED_AT: &str = "analyzed_at";

/// Durable copy of a finished graph
#[derive(Clone)]
pub struct Archive {
    pool: ConnectionPool,
    path: PathBuf,
}

impl Archive {
    /// Create or open an archive
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        info!("Opening archive at: {}", path.display());

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let manager = SqliteConnectionManager::file(&path);
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .context("Failed to create connection pool")?;

        {
            let conn = pool.get().context("Failed to get connection")?;
            init_schema(&conn).context("Failed to initialize schema")?;
        }

        Ok(Self { pool, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().context("Failed to get connection from pool")
    }

    /// Replace the archive contents with `graph`, in one transaction
    pub fn save(&self, graph: &Graph) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        for table in ENTITY_TABLES.iter().rev() {
            tx.execute(&format!("DELETE FROM {}", table), [])?;
        }
        write_parts(&tx, graph.parts()).context("Failed to write graph")?;
        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![ANALYZED_AT, Utc::now().to_rfc3339()],
        )?;

        tx.commit()?;
        debug!("Archived {} definitions", graph.definitions().len());
        Ok(())
    }

    /// Read the archived graph back, validating every reference
    pub fn load(&self) -> Result<Graph> {
        let conn = self.get_conn()?;
        let parts = read_parts(&conn)?;
        Graph::from_parts(parts).context("Archive holds an inconsistent graph")
    }

    /// When the archived graph was written, if ever
    pub fn analyzed_at(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.get_conn()?;
        let value: Option<String> = conn
            .query_row("SELECT value FROM meta WHERE key = ?1", [ANALYZED_AT], |row| row.get(0))
            .optional()?;

        value
            .map(|value| {
                DateTime::parse_from_rfc3339(&value)
                    .map(|time| time.with_timezone(&Utc))
                    .with_context(|| format!("Invalid timestamp in archive: {}", value))
            })
            .transpose()
    }

    /// Row counts per entity kind
    pub fn counts(&self) -> Result<GraphCounts> {
        let conn = self.get_conn()?;
        let count = |table: &str| -> Result<usize> {
            let rows: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            Ok(rows as usize)
        };

        Ok(GraphCounts {
            modules: count("modules")?,
            classes: count("classes")?,
            tags: count("tags")?,
            definitions: count("definitions")?,
            relationships: count("relationships")?,
            examples: count("examples")?,
            tag_examples: count("tag_examples")?,
            tag_usage: count("tag_usage")?,
            attributes: count("attributes")?,
            attribute_examples: count("attribute_examples")?,
            attribute_usage: count("attribute_usage")?,
            resources: count("resources")?,
            issues: count("issues")?,
        })
    }

    /// Issue counts, most severe first
    pub fn issues_by_severity(&self) -> Result<Vec<(Severity, usize)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT severity, COUNT(*) as count FROM issues GROUP BY severity ORDER BY severity DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            let severity: u8 = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((severity, count as usize))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (severity, count) = row?;
            let severity = Severity::from_byte(severity)
                .with_context(|| format!("Unknown issue severity in archive: {}", severity))?;
            results.push((severity, count));
        }

        Ok(results)
    }

    /// Tags with the most definition links on their values
    pub fn top_tags(&self, limit: usize) -> Result<Vec<(String, usize)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT t.identifier, COUNT(*) as uses
             FROM tag_usage u
             JOIN tag_examples e ON e.id = u.tag_example_id
             JOIN relationships r ON r.id = e.relationship_id
             JOIN tags t ON t.id = r.child_id
             GROUP BY t.id
             ORDER BY uses DESC, t.identifier
             LIMIT ?1",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let identifier: String = row.get(0)?;
            let uses: i64 = row.get(1)?;
            Ok((identifier, uses as usize))
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }

        Ok(results)
    }
}

fn key<I: EntityId>(id: I) -> i64 {
    id.index() as i64
}

fn optional_key<I: EntityId>(id: Option<I>) -> Option<i64> {
    id.map(key)
}

fn handle<I: EntityId>(row: &Row, column: usize) -> rusqlite::Result<I> {
    Ok(I::from_index(row.get::<_, i64>(column)? as usize))
}

fn optional_handle<I: EntityId>(row: &Row, column: usize) -> rusqlite::Result<Option<I>> {
    Ok(row.get::<_, Option<i64>>(column)?.map(|id| I::from_index(id as usize)))
}

fn write_parts(conn: &Connection, parts: &GraphParts) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare("INSERT INTO modules (id, identifier, name, version, official) VALUES (?1, ?2, ?3, ?4, ?5)")?;
    for (id, m) in parts.modules.iter().enumerate() {
        stmt.execute(params![id as i64, m.identifier, m.name, m.version, m.official])?;
    }

    let mut stmt = conn.prepare("INSERT INTO resources (id, path, module_id, content_hash) VALUES (?1, ?2, ?3, ?4)")?;
    for (id, r) in parts.resources.iter().enumerate() {
        stmt.execute(params![id as i64, r.path, key(r.module), r.content_hash])?;
    }

    insert_named(conn, "classes", parts.classes.iter().map(|c| (c.identifier.as_str(), c.name.as_str(), c.module)))?;
    insert_named(conn, "tags", parts.tags.iter().map(|t| (t.identifier.as_str(), t.name.as_str(), t.module)))?;
    insert_named(conn, "attributes", parts.attributes.iter().map(|a| (a.identifier.as_str(), a.name.as_str(), a.module)))?;

    let mut stmt = conn.prepare(
        "INSERT INTO definitions (id, identifier, is_abstract, parent_name, parent_id, module_id, class_id, resource_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for (id, d) in parts.definitions.iter().enumerate() {
        stmt.execute(params![
            id as i64,
            d.identifier,
            d.is_abstract,
            d.parent_name,
            optional_key(d.parent),
            optional_key(d.module),
            optional_key(d.class),
            optional_key(d.resource),
        ])?;
    }

    let mut stmt = conn.prepare("INSERT INTO relationships (id, parent_id, child_id, context_id) VALUES (?1, ?2, ?3, ?4)")?;
    for (id, r) in parts.relationships.iter().enumerate() {
        stmt.execute(params![id as i64, key(r.parent), key(r.child), optional_key(r.context)])?;
    }

    let mut stmt = conn.prepare("INSERT INTO examples (id, value) VALUES (?1, ?2)")?;
    for (id, e) in parts.examples.iter().enumerate() {
        stmt.execute(params![id as i64, e.value])?;
    }

    let mut stmt = conn.prepare("INSERT INTO tag_examples (id, example_id, relationship_id) VALUES (?1, ?2, ?3)")?;
    for (id, e) in parts.tag_examples.iter().enumerate() {
        stmt.execute(params![id as i64, key(e.example), key(e.relationship)])?;
    }

    let mut stmt = conn.prepare("INSERT INTO tag_usage (id, tag_example_id, definition_id) VALUES (?1, ?2, ?3)")?;
    for (id, u) in parts.tag_usage.iter().enumerate() {
        stmt.execute(params![id as i64, key(u.example), key(u.definition)])?;
    }

    let mut stmt = conn.prepare(
        "INSERT INTO attribute_examples (id, example_id, tag_id, attribute_id) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (id, e) in parts.attribute_examples.iter().enumerate() {
        stmt.execute(params![id as i64, key(e.example), key(e.tag), key(e.attribute)])?;
    }

    let mut stmt = conn.prepare("INSERT INTO attribute_usage (id, attribute_example_id, definition_id) VALUES (?1, ?2, ?3)")?;
    for (id, u) in parts.attribute_usage.iter().enumerate() {
        stmt.execute(params![id as i64, key(u.example), key(u.definition)])?;
    }

    let mut stmt = conn.prepare(
        "INSERT INTO issues (id, severity, message, module_id, resource_id, definition_id, class_id, tag_id, attribute_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    for (id, i) in parts.issues.iter().enumerate() {
        stmt.execute(params![
            id as i64,
            i.severity.as_byte(),
            i.message,
            optional_key(i.module),
            optional_key(i.resource),
            optional_key(i.definition),
            optional_key(i.class),
            optional_key(i.tag),
            optional_key(i.attribute),
        ])?;
    }

    Ok(())
}

/// Classes, tags and attributes share one row shape
fn insert_named<'a>(
    conn: &Connection,
    table: &str,
    rows: impl Iterator<Item = (&'a str, &'a str, Option<ModuleId>)>,
) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(&format!(
        "INSERT INTO {} (id, identifier, name, module_id) VALUES (?1, ?2, ?3, ?4)",
        table
    ))?;
    for (id, (identifier, name, module)) in rows.enumerate() {
        stmt.execute(params![id as i64, identifier, name, optional_key(module)])?;
    }
    Ok(())
}

/// Read one table in position order; ids must be exactly 0..n
fn read_rows<T>(
    conn: &Connection,
    table: &str,
    columns: &str,
    map: impl Fn(&Row) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(&format!("SELECT id, {} FROM {} ORDER BY id", columns, table))?;
    let mut rows = stmt.query([])?;

    let mut results = Vec::new();
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        if id != results.len() as i64 {
            anyhow::bail!("Archive table {} is missing row {}", table, results.len());
        }
        results.push(map(row)?);
    }

    Ok(results)
}

fn read_parts(conn: &Connection) -> Result<GraphParts> {
    let named_columns = "identifier, name, module_id";

    let issues = read_rows(
        conn,
        "issues",
        "severity, message, module_id, resource_id, definition_id, class_id, tag_id, attribute_id",
        |row| {
            let severity: u8 = row.get(1)?;
            let issue = Issue {
                severity: Severity::Trace,
                message: row.get(2)?,
                module: optional_handle(row, 3)?,
                resource: optional_handle(row, 4)?,
                definition: optional_handle(row, 5)?,
                class: optional_handle(row, 6)?,
                tag: optional_handle(row, 7)?,
                attribute: optional_handle(row, 8)?,
            };
            Ok((severity, issue))
        },
    )?
    .into_iter()
    .map(|(severity, issue)| {
        let severity = Severity::from_byte(severity)
            .with_context(|| format!("Unknown issue severity in archive: {}", severity))?;
        Ok(Issue { severity, ..issue })
    })
    .collect::<Result<Vec<_>>>()?;

    Ok(GraphParts {
        modules: read_rows(conn, "modules", "identifier, name, version, official", |row| {
            Ok(Module {
                identifier: row.get(1)?,
                name: row.get(2)?,
                version: row.get(3)?,
                official: row.get(4)?,
            })
        })?,
        resources: read_rows(conn, "resources", "path, module_id, content_hash", |row| {
            Ok(Resource {
                path: row.get(1)?,
                module: handle(row, 2)?,
                content_hash: row.get(3)?,
            })
        })?,
        classes: read_rows(conn, "classes", named_columns, |row| {
            Ok(Class {
                identifier: row.get(1)?,
                name: row.get(2)?,
                module: optional_handle(row, 3)?,
            })
        })?,
        tags: read_rows(conn, "tags", named_columns, |row| {
            Ok(Tag {
                identifier: row.get(1)?,
                name: row.get(2)?,
                module: optional_handle(row, 3)?,
            })
        })?,
        attributes: read_rows(conn, "attributes", named_columns, |row| {
            Ok(Attribute {
                identifier: row.get(1)?,
                name: row.get(2)?,
                module: optional_handle(row, 3)?,
            })
        })?,
        definitions: read_rows(
            conn,
            "definitions",
            "identifier, is_abstract, parent_name, parent_id, module_id, class_id, resource_id",
            |row| {
                Ok(Definition {
                    identifier: row.get(1)?,
                    is_abstract: row.get(2)?,
                    parent_name: row.get(3)?,
                    parent: optional_handle(row, 4)?,
                    module: optional_handle(row, 5)?,
                    class: optional_handle(row, 6)?,
                    resource: optional_handle(row, 7)?,
                })
            },
        )?,
        relationships: read_rows(conn, "relationships", "parent_id, child_id, context_id", |row| {
            Ok(Relationship {
                parent: handle(row, 1)?,
                child: handle(row, 2)?,
                context: optional_handle(row, 3)?,
            })
        })?,
        examples: read_rows(conn, "examples", "value", |row| Ok(Example { value: row.get(1)? }))?,
        tag_examples: read_rows(conn, "tag_examples", "example_id, relationship_id", |row| {
            Ok(TagExample {
                example: handle(row, 1)?,
                relationship: handle(row, 2)?,
            })
        })?,
        tag_usage: read_rows(conn, "tag_usage", "tag_example_id, definition_id", |row| {
            Ok(TagUsage {
                example: handle(row, 1)?,
                definition: handle(row, 2)?,
            })
        })?,
        attribute_examples: read_rows(conn, "attribute_examples", "example_id, tag_id, attribute_id", |row| {
            Ok(AttributeExample {
                example: handle(row, 1)?,
                tag: handle(row, 2)?,
                attribute: handle(row, 3)?,
            })
        })?,
        attribute_usage: read_rows(conn, "attribute_usage", "attribute_example_id, definition_id", |row| {
            Ok(AttributeUsage {
                example: handle(row, 1)?,
                definition: handle(row, 2)?,
            })
        })?,
        issues,
    })
}
