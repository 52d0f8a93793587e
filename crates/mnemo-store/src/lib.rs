//! Entity storage and similarity search for mnemo.
//!
//! Projects, memories, knowledge bases, facts, and chat sessions live behind
//! the [`EntityStore`] trait, with two backends:
//!
//! - [`InMemoryStore`]: insertion-ordered tables under a `RwLock`
//! - [`SqliteStore`]: one SQLite file, embeddings stored as `float32` blobs
//!
//! # Usage
//!
//! ```no_run
//! use mnemo_store::{EntityStore, Memory, MemoryScope, SqliteStore};
//!
//! let store = SqliteStore::open("/tmp/mnemo.db", 3)?;
//! let memory = Memory::new("user-1", "Prefers dark mode").with_embedding(vec![0.1, 0.9, 0.0]);
//! store.insert_memory(&memory)?;
//!
//! let hits = store.search_memories(&MemoryScope::user("user-1"), Some(&[0.0, 1.0, 0.0]), 5)?;
//! assert_eq!(hits[0].item.id, memory.id);
//! # Ok::<(), mnemo_store::StoreError>(())
//! ```

pub mod backend;
pub mod error;
pub mod inmem;
pub mod search;
pub mod sqlite;
pub mod types;
pub mod validation;

pub use backend::{BackendKind, DEFAULT_SEARCH_LIMIT, EntityStore, SharedStore, open_store};
pub use error::{Result, StoreError};
pub use inmem::InMemoryStore;
pub use sqlite::SqliteStore;
pub use types::{
    ChatMessage, ChatRole, ChatSession, Embedded, Fact, KnowledgeBase, Memory, MemoryScope,
    Metadata, Project, Scored, StoreStats, new_id,
};
pub use validation::ValidationError;
