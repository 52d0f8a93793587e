//! Entity store backed by SQLite.
//!
//! One table per entity type, created with explicit `CREATE TABLE`
//! statements. Embeddings are `float32` blobs in a nullable `embedding`
//! column. Search loads the scoped rows in `rowid` (insertion) order and
//! ranks them with [`crate::search::rank`], the same f64 cosine the
//! in-memory backend uses, so equal scores keep insertion order.
//!
//! The connection is opened once and never reopened. A failing connection
//! surfaces as [`StoreError::Database`].

mod chat_ops;
mod fact_ops;
mod memory_ops;
mod project_ops;
pub(crate) mod vector;

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, params};
use tracing::{debug, info};

use crate::backend::EntityStore;
use crate::error::{Result, StoreError};
use crate::types::{
    ChatMessage, ChatSession, Fact, KnowledgeBase, Memory, MemoryScope, Metadata, Project, Scored,
    StoreStats,
};

/// Current schema version.
const SCHEMA_VERSION: i32 = 1;

/// Entity store backed by a single SQLite file.
pub struct SqliteStore {
    pub(crate) conn: Mutex<Connection>,
    dimensions: usize,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Initialization
// ─────────────────────────────────────────────────────────────────────────────

impl SqliteStore {
    /// Open or create a store at `path` for embeddings of `dimensions`.
    ///
    /// Fails with [`StoreError::DimensionMismatch`] if the file was created
    /// for a different dimension.
    pub fn open(path: impl AsRef<Path>, dimensions: usize) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|_| {
                StoreError::Database(rusqlite::Error::InvalidPath(path.to_path_buf()))
            })?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;

        let store = Self::with_connection(conn, dimensions)?;
        info!("Entity store opened at {:?}", path);
        Ok(store)
    }

    /// Create a store in a private in-memory database.
    pub fn open_in_memory(dimensions: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self::with_connection(conn, dimensions)?;
        info!("In-memory SQLite store created");
        Ok(store)
    }

    fn with_connection(conn: Connection, dimensions: usize) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        create_schema(&conn)?;
        check_dimensions(&conn, dimensions)?;

        Ok(Self {
            conn: Mutex::new(conn),
            dimensions,
        })
    }

    /// Execute a function within a transaction.
    ///
    /// If the closure returns an error, all changes are rolled back.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Read a value from the `meta` table.
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        get_meta(&conn, key)
    }
}

fn create_schema(conn: &Connection) -> Result<()> {
    let current_version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap_or(0);

    if current_version >= SCHEMA_VERSION {
        debug!("Schema up to date (version {})", current_version);
        return Ok(());
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            metadata TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_projects_user ON projects(user_id);

        CREATE TABLE IF NOT EXISTS memories (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            project_id TEXT,
            content TEXT NOT NULL,
            metadata TEXT,
            importance REAL NOT NULL,
            embedding BLOB,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_memories_user ON memories(user_id, project_id);

        CREATE TABLE IF NOT EXISTS knowledge_bases (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            metadata TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_knowledge_bases_project ON knowledge_bases(project_id);

        CREATE TABLE IF NOT EXISTS facts (
            id TEXT PRIMARY KEY,
            kb_id TEXT NOT NULL,
            content TEXT NOT NULL,
            metadata TEXT,
            confidence REAL NOT NULL,
            embedding BLOB,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_facts_kb ON facts(kb_id);

        CREATE TABLE IF NOT EXISTS chat_sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            project_id TEXT NOT NULL,
            metadata TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chat_sessions_user ON chat_sessions(user_id, project_id);

        CREATE TABLE IF NOT EXISTS chat_messages (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            metadata TEXT,
            embedding BLOB,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chat_messages_session ON chat_messages(session_id);

        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )?;

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    info!("Schema created (version {})", SCHEMA_VERSION);
    Ok(())
}

/// Record the embedding dimension on first open and refuse a different one later.
fn check_dimensions(conn: &Connection, dimensions: usize) -> Result<()> {
    match get_meta(conn, "embedding.dimensions")? {
        Some(stored) => {
            let stored: usize = stored
                .parse()
                .map_err(|_| StoreError::InvalidData(format!("Bad stored dimension: {stored}")))?;
            if stored != dimensions {
                return Err(StoreError::DimensionMismatch {
                    expected: stored,
                    actual: dimensions,
                });
            }
        }
        None => {
            conn.execute(
                "INSERT INTO meta (key, value) VALUES ('embedding.dimensions', ?1)",
                params![dimensions.to_string()],
            )?;
        }
    }
    Ok(())
}

fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT value FROM meta WHERE key = ?1")?;
    let mut rows = stmt.query(params![key])?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row helpers
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .map_err(|e| StoreError::InvalidData(e.to_string()))?
        .with_timezone(&Utc))
}

pub(crate) fn metadata_to_sql(metadata: &Option<Metadata>) -> Result<Option<String>> {
    Ok(metadata.as_ref().map(serde_json::to_string).transpose()?)
}

pub(crate) fn metadata_from_sql(value: Option<String>) -> Result<Option<Metadata>> {
    Ok(value.as_deref().map(serde_json::from_str).transpose()?)
}

/// SQLite treats a negative LIMIT as "no limit".
pub(crate) fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX))
}

pub(crate) fn sql_offset(offset: usize) -> i64 {
    i64::try_from(offset).unwrap_or(i64::MAX)
}

/// Run `sql` and map each row with `map`.
pub(crate) fn query_rows<T, P, F>(conn: &Connection, sql: &str, params: P, map: F) -> Result<Vec<T>>
where
    P: rusqlite::Params,
    F: Fn(&rusqlite::Row<'_>) -> Result<T>,
{
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(map(row)?);
    }
    Ok(out)
}

fn count(conn: &Connection, sql: &str) -> Result<usize> {
    let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(n as usize)
}

// ─────────────────────────────────────────────────────────────────────────────
// EntityStore
// ─────────────────────────────────────────────────────────────────────────────

impl EntityStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn insert_project(&self, project: &Project) -> Result<()> {
        self.insert_project_row(project)
    }

    fn get_project(&self, id: &str) -> Result<Option<Project>> {
        self.get_project_row(id)
    }

    fn list_projects(&self, user_id: &str) -> Result<Vec<Project>> {
        self.list_project_rows(user_id)
    }

    fn delete_project(&self, id: &str) -> Result<bool> {
        self.delete_project_row(id)
    }

    fn insert_memory(&self, memory: &Memory) -> Result<()> {
        self.insert_memory_row(memory)
    }

    fn get_memory(&self, id: &str) -> Result<Option<Memory>> {
        self.get_memory_row(id)
    }

    fn list_memories(
        &self,
        scope: &MemoryScope,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Memory>> {
        self.list_memory_rows(scope, limit, offset)
    }

    fn search_memories(
        &self,
        scope: &MemoryScope,
        query: Option<&[f32]>,
        limit: usize,
    ) -> Result<Vec<Scored<Memory>>> {
        self.search_memory_rows(scope, query, limit)
    }

    fn delete_memory(&self, id: &str) -> Result<bool> {
        self.delete_memory_row(id)
    }

    fn delete_user_memories(&self, user_id: &str) -> Result<usize> {
        self.delete_memory_rows_for_user(user_id)
    }

    fn insert_knowledge_base(&self, kb: &KnowledgeBase) -> Result<()> {
        self.insert_knowledge_base_row(kb)
    }

    fn get_knowledge_base(&self, id: &str) -> Result<Option<KnowledgeBase>> {
        self.get_knowledge_base_row(id)
    }

    fn list_knowledge_bases(&self, project_id: &str) -> Result<Vec<KnowledgeBase>> {
        self.list_knowledge_base_rows(project_id)
    }

    fn delete_knowledge_base(&self, id: &str) -> Result<bool> {
        self.delete_knowledge_base_row(id)
    }

    fn insert_fact(&self, fact: &Fact) -> Result<()> {
        self.insert_fact_rows(std::slice::from_ref(fact))
    }

    fn insert_facts(&self, facts: &[Fact]) -> Result<()> {
        self.insert_fact_rows(facts)
    }

    fn get_fact(&self, id: &str) -> Result<Option<Fact>> {
        self.get_fact_row(id)
    }

    fn list_facts(&self, kb_id: &str, limit: Option<usize>, offset: usize) -> Result<Vec<Fact>> {
        self.list_fact_rows(kb_id, limit, offset)
    }

    fn search_facts(
        &self,
        kb_id: &str,
        query: Option<&[f32]>,
        limit: usize,
    ) -> Result<Vec<Scored<Fact>>> {
        self.search_fact_rows(kb_id, query, limit)
    }

    fn delete_fact(&self, id: &str) -> Result<bool> {
        self.delete_fact_row(id)
    }

    fn delete_knowledge_base_facts(&self, kb_id: &str) -> Result<usize> {
        self.delete_fact_rows_for_kb(kb_id)
    }

    fn insert_chat_session(&self, session: &ChatSession) -> Result<()> {
        self.insert_chat_session_row(session)
    }

    fn get_chat_session(&self, id: &str) -> Result<Option<ChatSession>> {
        self.get_chat_session_row(id)
    }

    fn list_chat_sessions(
        &self,
        user_id: &str,
        project_id: Option<&str>,
    ) -> Result<Vec<ChatSession>> {
        self.list_chat_session_rows(user_id, project_id)
    }

    fn delete_chat_session(&self, id: &str) -> Result<bool> {
        self.delete_chat_session_row(id)
    }

    fn insert_chat_message(&self, message: &ChatMessage) -> Result<()> {
        self.insert_chat_message_row(message)
    }

    fn list_chat_messages(
        &self,
        session_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<ChatMessage>> {
        self.list_chat_message_rows(session_id, limit, offset)
    }

    fn search_chat_messages(
        &self,
        session_id: &str,
        query: Option<&[f32]>,
        limit: usize,
    ) -> Result<Vec<Scored<ChatMessage>>> {
        self.search_chat_message_rows(session_id, query, limit)
    }

    fn delete_chat_session_messages(&self, session_id: &str) -> Result<usize> {
        self.delete_chat_message_rows_for_session(session_id)
    }

    fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();
        let embeddings = count(
            &conn,
            "SELECT (SELECT COUNT(*) FROM memories WHERE embedding IS NOT NULL)
                  + (SELECT COUNT(*) FROM facts WHERE embedding IS NOT NULL)
                  + (SELECT COUNT(*) FROM chat_messages WHERE embedding IS NOT NULL)",
        )?;

        Ok(StoreStats {
            backend: self.backend_name().to_string(),
            dimensions: self.dimensions,
            projects: count(&conn, "SELECT COUNT(*) FROM projects")?,
            memories: count(&conn, "SELECT COUNT(*) FROM memories")?,
            knowledge_bases: count(&conn, "SELECT COUNT(*) FROM knowledge_bases")?,
            facts: count(&conn, "SELECT COUNT(*) FROM facts")?,
            chat_sessions: count(&conn, "SELECT COUNT(*) FROM chat_sessions")?,
            chat_messages: count(&conn, "SELECT COUNT(*) FROM chat_messages")?,
            embeddings,
        })
    }
}
