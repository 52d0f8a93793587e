//! In-process backend.
//!
//! Each entity table is an insertion-ordered map behind one
//! `parking_lot::RwLock`. Bulk deletes take the write lock once, so the count
//! they return is exactly what was removed.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use tracing::debug;

use crate::backend::EntityStore;
use crate::error::Result;
use crate::search::{paginate, rank};
use crate::types::{
    ChatMessage, ChatSession, Fact, KnowledgeBase, Memory, MemoryScope, Project, Scored,
    StoreStats,
};
use crate::validation::{validate_optional_embedding, validate_query};

/// Insertion-ordered table keyed by id.
#[derive(Debug)]
struct Table<T> {
    next_seq: u64,
    rows: BTreeMap<u64, T>,
    index: HashMap<String, u64>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            next_seq: 0,
            rows: BTreeMap::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Clone> Table<T> {
    /// Insert or replace. A replaced row keeps its original position.
    fn upsert(&mut self, id: &str, row: T) {
        let seq = match self.index.get(id) {
            Some(seq) => *seq,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.index.insert(id.to_string(), seq);
                seq
            }
        };
        self.rows.insert(seq, row);
    }

    fn get(&self, id: &str) -> Option<T> {
        self.index.get(id).and_then(|seq| self.rows.get(seq)).cloned()
    }

    fn remove(&mut self, id: &str) -> bool {
        match self.index.remove(id) {
            Some(seq) => self.rows.remove(&seq).is_some(),
            None => false,
        }
    }

    fn filtered(&self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        self.rows.values().filter(|r| pred(r)).cloned().collect()
    }

    /// Remove every row matching `pred` and return how many went.
    fn remove_where(&mut self, id_of: impl Fn(&T) -> &str, pred: impl Fn(&T) -> bool) -> usize {
        let doomed: Vec<(u64, String)> = self
            .rows
            .iter()
            .filter(|(_, r)| pred(r))
            .map(|(seq, r)| (*seq, id_of(r).to_string()))
            .collect();
        for (seq, id) in &doomed {
            self.rows.remove(seq);
            self.index.remove(id);
        }
        doomed.len()
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Debug, Default)]
struct Tables {
    projects: Table<Project>,
    memories: Table<Memory>,
    knowledge_bases: Table<KnowledgeBase>,
    facts: Table<Fact>,
    chat_sessions: Table<ChatSession>,
    chat_messages: Table<ChatMessage>,
}

/// Entity store held entirely in memory.
#[derive(Debug)]
pub struct InMemoryStore {
    dimensions: usize,
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            tables: RwLock::new(Tables::default()),
        }
    }
}

impl EntityStore for InMemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn insert_project(&self, project: &Project) -> Result<()> {
        self.tables
            .write()
            .projects
            .upsert(&project.id, project.clone());
        debug!("Inserted project {}", project.id);
        Ok(())
    }

    fn get_project(&self, id: &str) -> Result<Option<Project>> {
        Ok(self.tables.read().projects.get(id))
    }

    fn list_projects(&self, user_id: &str) -> Result<Vec<Project>> {
        Ok(self.tables.read().projects.filtered(|p| p.user_id == user_id))
    }

    fn delete_project(&self, id: &str) -> Result<bool> {
        Ok(self.tables.write().projects.remove(id))
    }

    fn insert_memory(&self, memory: &Memory) -> Result<()> {
        validate_optional_embedding(memory.embedding.as_deref(), self.dimensions)?;
        self.tables
            .write()
            .memories
            .upsert(&memory.id, memory.clone());
        debug!("Inserted memory {}", memory.id);
        Ok(())
    }

    fn get_memory(&self, id: &str) -> Result<Option<Memory>> {
        Ok(self.tables.read().memories.get(id))
    }

    fn list_memories(
        &self,
        scope: &MemoryScope,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Memory>> {
        let rows = self.tables.read().memories.filtered(|m| scope.matches(m));
        Ok(paginate(rows, limit, offset))
    }

    fn search_memories(
        &self,
        scope: &MemoryScope,
        query: Option<&[f32]>,
        limit: usize,
    ) -> Result<Vec<Scored<Memory>>> {
        validate_query(query, self.dimensions)?;
        let rows = self.tables.read().memories.filtered(|m| scope.matches(m));
        rank(rows, query, limit)
    }

    fn delete_memory(&self, id: &str) -> Result<bool> {
        Ok(self.tables.write().memories.remove(id))
    }

    fn delete_user_memories(&self, user_id: &str) -> Result<usize> {
        let removed = self
            .tables
            .write()
            .memories
            .remove_where(|m| m.id.as_str(), |m| m.user_id == user_id);
        debug!("Deleted {} memories for user {}", removed, user_id);
        Ok(removed)
    }

    fn insert_knowledge_base(&self, kb: &KnowledgeBase) -> Result<()> {
        self.tables
            .write()
            .knowledge_bases
            .upsert(&kb.id, kb.clone());
        Ok(())
    }

    fn get_knowledge_base(&self, id: &str) -> Result<Option<KnowledgeBase>> {
        Ok(self.tables.read().knowledge_bases.get(id))
    }

    fn list_knowledge_bases(&self, project_id: &str) -> Result<Vec<KnowledgeBase>> {
        Ok(self
            .tables
            .read()
            .knowledge_bases
            .filtered(|kb| kb.project_id == project_id))
    }

    fn delete_knowledge_base(&self, id: &str) -> Result<bool> {
        Ok(self.tables.write().knowledge_bases.remove(id))
    }

    fn insert_fact(&self, fact: &Fact) -> Result<()> {
        self.insert_facts(std::slice::from_ref(fact))
    }

    fn insert_facts(&self, facts: &[Fact]) -> Result<()> {
        for fact in facts {
            validate_optional_embedding(fact.embedding.as_deref(), self.dimensions)?;
        }
        let mut tables = self.tables.write();
        for fact in facts {
            tables.facts.upsert(&fact.id, fact.clone());
        }
        debug!("Inserted {} facts", facts.len());
        Ok(())
    }

    fn get_fact(&self, id: &str) -> Result<Option<Fact>> {
        Ok(self.tables.read().facts.get(id))
    }

    fn list_facts(&self, kb_id: &str, limit: Option<usize>, offset: usize) -> Result<Vec<Fact>> {
        let rows = self.tables.read().facts.filtered(|f| f.kb_id == kb_id);
        Ok(paginate(rows, limit, offset))
    }

    fn search_facts(
        &self,
        kb_id: &str,
        query: Option<&[f32]>,
        limit: usize,
    ) -> Result<Vec<Scored<Fact>>> {
        validate_query(query, self.dimensions)?;
        let rows = self.tables.read().facts.filtered(|f| f.kb_id == kb_id);
        rank(rows, query, limit)
    }

    fn delete_fact(&self, id: &str) -> Result<bool> {
        Ok(self.tables.write().facts.remove(id))
    }

    fn delete_knowledge_base_facts(&self, kb_id: &str) -> Result<usize> {
        let removed = self
            .tables
            .write()
            .facts
            .remove_where(|f| f.id.as_str(), |f| f.kb_id == kb_id);
        debug!("Deleted {} facts from knowledge base {}", removed, kb_id);
        Ok(removed)
    }

    fn insert_chat_session(&self, session: &ChatSession) -> Result<()> {
        self.tables
            .write()
            .chat_sessions
            .upsert(&session.id, session.clone());
        Ok(())
    }

    fn get_chat_session(&self, id: &str) -> Result<Option<ChatSession>> {
        Ok(self.tables.read().chat_sessions.get(id))
    }

    fn list_chat_sessions(
        &self,
        user_id: &str,
        project_id: Option<&str>,
    ) -> Result<Vec<ChatSession>> {
        Ok(self.tables.read().chat_sessions.filtered(|s| {
            s.user_id == user_id && project_id.is_none_or(|p| s.project_id == p)
        }))
    }

    fn delete_chat_session(&self, id: &str) -> Result<bool> {
        Ok(self.tables.write().chat_sessions.remove(id))
    }

    fn insert_chat_message(&self, message: &ChatMessage) -> Result<()> {
        validate_optional_embedding(message.embedding.as_deref(), self.dimensions)?;
        self.tables
            .write()
            .chat_messages
            .upsert(&message.id, message.clone());
        Ok(())
    }

    fn list_chat_messages(
        &self,
        session_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<ChatMessage>> {
        let rows = self
            .tables
            .read()
            .chat_messages
            .filtered(|m| m.session_id == session_id);
        Ok(paginate(rows, limit, offset))
    }

    fn search_chat_messages(
        &self,
        session_id: &str,
        query: Option<&[f32]>,
        limit: usize,
    ) -> Result<Vec<Scored<ChatMessage>>> {
        validate_query(query, self.dimensions)?;
        let rows = self
            .tables
            .read()
            .chat_messages
            .filtered(|m| m.session_id == session_id);
        rank(rows, query, limit)
    }

    fn delete_chat_session_messages(&self, session_id: &str) -> Result<usize> {
        let removed = self
            .tables
            .write()
            .chat_messages
            .remove_where(|m| m.id.as_str(), |m| m.session_id == session_id);
        Ok(removed)
    }

    fn stats(&self) -> Result<StoreStats> {
        let tables = self.tables.read();
        let embeddings = tables
            .memories
            .rows
            .values()
            .filter(|m| m.embedding.is_some())
            .count()
            + tables
                .facts
                .rows
                .values()
                .filter(|f| f.embedding.is_some())
                .count()
            + tables
                .chat_messages
                .rows
                .values()
                .filter(|m| m.embedding.is_some())
                .count();

        Ok(StoreStats {
            backend: self.backend_name().to_string(),
            dimensions: self.dimensions,
            projects: tables.projects.len(),
            memories: tables.memories.len(),
            knowledge_bases: tables.knowledge_bases.len(),
            facts: tables.facts.len(),
            chat_sessions: tables.chat_sessions.len(),
            chat_messages: tables.chat_messages.len(),
            embeddings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn test_table_keeps_insertion_order_on_replace() {
        let mut table: Table<&str> = Table::default();
        table.upsert("a", "first");
        table.upsert("b", "second");
        table.upsert("a", "replaced");
        assert_eq!(table.filtered(|_| true), vec!["replaced", "second"]);
    }

    #[test]
    fn test_rejects_wrong_dimension() {
        let store = InMemoryStore::new(3);
        let memory = Memory::new("u1", "x").with_embedding(vec![1.0, 0.0]);
        assert!(matches!(
            store.insert_memory(&memory),
            Err(StoreError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert!(store.get_memory(&memory.id).unwrap().is_none());
    }

    #[test]
    fn test_insert_facts_is_all_or_nothing() {
        let store = InMemoryStore::new(2);
        let good = Fact::new("kb", "ok").with_embedding(vec![1.0, 0.0]);
        let bad = Fact::new("kb", "bad").with_embedding(vec![1.0]);
        assert!(store.insert_facts(&[good, bad]).is_err());
        assert!(store.list_facts("kb", None, 0).unwrap().is_empty());
    }
}
