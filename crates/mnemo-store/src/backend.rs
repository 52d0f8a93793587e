//! Storage backend trait.
//!
//! [`EntityStore`] is the contract shared by [`InMemoryStore`](crate::InMemoryStore)
//! and [`SqliteStore`](crate::SqliteStore). The store never computes
//! embeddings; callers pass them in with the entity.
//!
//! # Search
//!
//! `search_*` methods filter to the scope and to entities that carry an
//! embedding, score each by cosine similarity to the query, and return the
//! best `limit` highest first. Ties keep insertion order. With no query,
//! `limit` is ignored and every scoped entity is returned with a score of 1.
//!
//! # Ownership
//!
//! Lookups by id are not scoped. Owner checks belong to the caller.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::error::Result;
use crate::inmem::InMemoryStore;
use crate::sqlite::SqliteStore;
use crate::types::{
    ChatMessage, ChatSession, Fact, KnowledgeBase, Memory, MemoryScope, Project, Scored,
    StoreStats,
};

/// Default number of search results.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Trait for entity storage backends.
///
/// All implementations must be `Send + Sync`. Every method is synchronous;
/// no implementation performs I/O that benefits from suspension.
pub trait EntityStore: Send + Sync {
    /// Short backend name for logs and stats.
    fn backend_name(&self) -> &'static str;

    /// Dimension every stored embedding must have.
    fn dimensions(&self) -> usize;

    // ── Projects ────────────────────────────────────────────────────────────

    fn insert_project(&self, project: &Project) -> Result<()>;

    fn get_project(&self, id: &str) -> Result<Option<Project>>;

    /// All projects of a user, in insertion order.
    fn list_projects(&self, user_id: &str) -> Result<Vec<Project>>;

    /// Returns `true` if the project existed. Nothing cascades.
    fn delete_project(&self, id: &str) -> Result<bool>;

    // ── Memories ────────────────────────────────────────────────────────────

    /// Fails with `DimensionMismatch` if the embedding has the wrong length.
    fn insert_memory(&self, memory: &Memory) -> Result<()>;

    fn get_memory(&self, id: &str) -> Result<Option<Memory>>;

    /// Memories in scope, in insertion order. `None` limit returns everything after `offset`.
    fn list_memories(
        &self,
        scope: &MemoryScope,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Memory>>;

    fn search_memories(
        &self,
        scope: &MemoryScope,
        query: Option<&[f32]>,
        limit: usize,
    ) -> Result<Vec<Scored<Memory>>>;

    fn delete_memory(&self, id: &str) -> Result<bool>;

    /// Remove every memory of `user_id`, returning exactly how many were removed.
    fn delete_user_memories(&self, user_id: &str) -> Result<usize>;

    // ── Knowledge bases ─────────────────────────────────────────────────────

    fn insert_knowledge_base(&self, kb: &KnowledgeBase) -> Result<()>;

    fn get_knowledge_base(&self, id: &str) -> Result<Option<KnowledgeBase>>;

    fn list_knowledge_bases(&self, project_id: &str) -> Result<Vec<KnowledgeBase>>;

    /// Returns `true` if the knowledge base existed. Facts are left in place.
    fn delete_knowledge_base(&self, id: &str) -> Result<bool>;

    // ── Facts ───────────────────────────────────────────────────────────────

    fn insert_fact(&self, fact: &Fact) -> Result<()>;

    /// Insert several facts. Validation of every fact happens before any insert.
    fn insert_facts(&self, facts: &[Fact]) -> Result<()>;

    fn get_fact(&self, id: &str) -> Result<Option<Fact>>;

    fn list_facts(&self, kb_id: &str, limit: Option<usize>, offset: usize) -> Result<Vec<Fact>>;

    fn search_facts(
        &self,
        kb_id: &str,
        query: Option<&[f32]>,
        limit: usize,
    ) -> Result<Vec<Scored<Fact>>>;

    fn delete_fact(&self, id: &str) -> Result<bool>;

    fn delete_knowledge_base_facts(&self, kb_id: &str) -> Result<usize>;

    // ── Chat ────────────────────────────────────────────────────────────────

    fn insert_chat_session(&self, session: &ChatSession) -> Result<()>;

    fn get_chat_session(&self, id: &str) -> Result<Option<ChatSession>>;

    /// Sessions of a user, optionally narrowed to one project.
    fn list_chat_sessions(&self, user_id: &str, project_id: Option<&str>)
    -> Result<Vec<ChatSession>>;

    fn delete_chat_session(&self, id: &str) -> Result<bool>;

    fn insert_chat_message(&self, message: &ChatMessage) -> Result<()>;

    fn list_chat_messages(
        &self,
        session_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<ChatMessage>>;

    fn search_chat_messages(
        &self,
        session_id: &str,
        query: Option<&[f32]>,
        limit: usize,
    ) -> Result<Vec<Scored<ChatMessage>>>;

    fn delete_chat_session_messages(&self, session_id: &str) -> Result<usize>;

    // ── Stats ───────────────────────────────────────────────────────────────

    fn stats(&self) -> Result<StoreStats>;
}

/// A store shared across tasks.
pub type SharedStore = Arc<dyn EntityStore>;

/// Which backend to open.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Process-local tables; contents are lost on exit.
    #[default]
    Memory,
    /// A SQLite file.
    Sqlite { path: PathBuf },
}

/// Open the configured backend for embeddings of `dimensions`.
pub fn open_store(kind: &BackendKind, dimensions: usize) -> Result<SharedStore> {
    match kind {
        BackendKind::Memory => {
            info!("Using in-memory store ({} dimensions)", dimensions);
            Ok(Arc::new(InMemoryStore::new(dimensions)))
        }
        BackendKind::Sqlite { path } => Ok(Arc::new(SqliteStore::open(path, dimensions)?)),
    }
}
