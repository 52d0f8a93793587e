//! Memory CRUD and similarity search.

use rusqlite::{Row, params};
use tracing::debug;

use crate::error::Result;
use crate::search::rank;
use crate::types::{Memory, MemoryScope, Scored};
use crate::validation::{validate_optional_embedding, validate_query};

use super::vector::{optional_from_blob, to_blob};
use super::{
    SqliteStore, metadata_from_sql, metadata_to_sql, parse_time, query_rows, sql_limit,
    sql_offset,
};

const MEMORY_COLUMNS: &str =
    "id, user_id, project_id, content, metadata, importance, embedding, created_at, updated_at";

impl SqliteStore {
    pub(super) fn insert_memory_row(&self, memory: &Memory) -> Result<()> {
        validate_optional_embedding(memory.embedding.as_deref(), self.dimensions)?;
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO memories (id, user_id, project_id, content, metadata, importance,
                                  embedding, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id, project_id = excluded.project_id,
                content = excluded.content, metadata = excluded.metadata,
                importance = excluded.importance, embedding = excluded.embedding,
                updated_at = excluded.updated_at
            "#,
            params![
                memory.id,
                memory.user_id,
                memory.project_id,
                memory.content,
                metadata_to_sql(&memory.metadata)?,
                memory.importance as f64,
                memory.embedding.as_deref().map(to_blob),
                memory.created_at.to_rfc3339(),
                memory.updated_at.to_rfc3339(),
            ],
        )?;
        debug!("Inserted memory {}", memory.id);
        Ok(())
    }

    pub(super) fn get_memory_row(&self, id: &str) -> Result<Option<Memory>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1");
        Ok(query_rows(&conn, &sql, params![id], row_to_memory)?
            .into_iter()
            .next())
    }

    pub(super) fn list_memory_rows(
        &self,
        scope: &MemoryScope,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Memory>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories
             WHERE user_id = ?1 AND (?2 IS NULL OR project_id = ?2)
             ORDER BY rowid LIMIT ?3 OFFSET ?4"
        );
        query_rows(
            &conn,
            &sql,
            params![
                scope.user_id,
                scope.project_id,
                sql_limit(limit),
                sql_offset(offset)
            ],
            row_to_memory,
        )
    }

    pub(super) fn search_memory_rows(
        &self,
        scope: &MemoryScope,
        query: Option<&[f32]>,
        limit: usize,
    ) -> Result<Vec<Scored<Memory>>> {
        validate_query(query, self.dimensions)?;
        // Same f64 scoring and tie order as the in-memory backend
        rank(self.list_memory_rows(scope, None, 0)?, query, limit)
    }

    pub(super) fn delete_memory_row(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        Ok(conn.execute("DELETE FROM memories WHERE id = ?1", params![id])? > 0)
    }

    pub(super) fn delete_memory_rows_for_user(&self, user_id: &str) -> Result<usize> {
        let removed = self.with_transaction(|tx| {
            Ok(tx.execute("DELETE FROM memories WHERE user_id = ?1", params![user_id])?)
        })?;
        debug!("Deleted {} memories for user {}", removed, user_id);
        Ok(removed)
    }
}

fn row_to_memory(row: &Row<'_>) -> Result<Memory> {
    let importance: f64 = row.get(5)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;
    Ok(Memory {
        id: row.get(0)?,
        user_id: row.get(1)?,
        project_id: row.get(2)?,
        content: row.get(3)?,
        metadata: metadata_from_sql(row.get(4)?)?,
        importance: importance as f32,
        embedding: optional_from_blob(row.get(6)?)?,
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::backend::EntityStore;
    use crate::sqlite::SqliteStore;
    use crate::types::{Memory, MemoryScope};

    #[test]
    fn test_search_orders_by_similarity() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        let far = Memory::new("u1", "far").with_embedding(vec![0.0, 1.0]);
        let near = Memory::new("u1", "near").with_embedding(vec![1.0, 0.1]);
        let other_user = Memory::new("u2", "hidden").with_embedding(vec![1.0, 0.0]);
        for m in [&far, &near, &other_user] {
            store.insert_memory(m).unwrap();
        }

        let hits = store
            .search_memories(&MemoryScope::user("u1"), Some(&[1.0, 0.0]), 10)
            .unwrap();
        let contents: Vec<&str> = hits.iter().map(|h| h.item.content.as_str()).collect();
        assert_eq!(contents, vec!["near", "far"]);
        assert!(hits[0].similarity_score > 0.99);
        assert!(hits[1].similarity_score.abs() < 1e-5);
        assert_eq!(hits[0].item.embedding.as_deref(), Some(&[1.0, 0.1][..]));
    }

    #[test]
    fn test_parallel_vectors_tie_in_insertion_order() {
        let store = SqliteStore::open_in_memory(3).unwrap();
        let base = [0.3f32, 0.7, 0.1];
        for (i, scale) in [1.0f32, 2.5, 0.1, 7.0, 3.3, 0.9].iter().enumerate() {
            let embedding = base.iter().map(|x| x * scale).collect();
            store
                .insert_memory(&Memory::new("u1", format!("m{i}")).with_embedding(embedding))
                .unwrap();
        }

        let hits = store
            .search_memories(&MemoryScope::user("u1"), Some(&base), 10)
            .unwrap();
        let contents: Vec<&str> = hits.iter().map(|h| h.item.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4", "m5"]);
        assert!(hits.iter().all(|h| h.similarity_score == 1.0));
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        store
            .insert_memory(&Memory::new("u1", "zero").with_embedding(vec![0.0, 0.0]))
            .unwrap();
        let hits = store
            .search_memories(&MemoryScope::user("u1"), Some(&[1.0, 0.0]), 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].similarity_score, 0.0);
    }

    #[test]
    fn test_project_scope_and_pagination() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        for i in 0..5 {
            let mut m = Memory::new("u1", format!("m{i}"));
            if i % 2 == 0 {
                m = m.with_project("p1");
            }
            store.insert_memory(&m).unwrap();
        }

        let scope = MemoryScope::user("u1").with_project(Some("p1".into()));
        let page: Vec<String> = store
            .list_memories(&scope, Some(2), 1)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(page, vec!["m2", "m4"]);
        assert_eq!(store.list_memories(&MemoryScope::user("u1"), None, 0).unwrap().len(), 5);
        assert_eq!(store.delete_user_memories("u1").unwrap(), 5);
        assert_eq!(store.delete_user_memories("u1").unwrap(), 0);
    }
}
