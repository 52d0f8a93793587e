//! Knowledge base and fact operations.

use rusqlite::{Row, params};
use tracing::debug;

use crate::error::Result;
use crate::search::rank;
use crate::types::{Fact, KnowledgeBase, Scored};
use crate::validation::{validate_optional_embedding, validate_query};

use super::vector::{optional_from_blob, to_blob};
use super::{
    SqliteStore, metadata_from_sql, metadata_to_sql, parse_time, query_rows, sql_limit,
    sql_offset,
};

const KB_COLUMNS: &str = "id, project_id, name, description, metadata, created_at, updated_at";

const FACT_COLUMNS: &str =
    "id, kb_id, content, metadata, confidence, embedding, created_at, updated_at";

impl SqliteStore {
    // ─────────────────────────────────────────────────────────────────────
    // Knowledge bases
    // ─────────────────────────────────────────────────────────────────────

    pub(super) fn insert_knowledge_base_row(&self, kb: &KnowledgeBase) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO knowledge_bases (id, project_id, name, description, metadata,
                                         created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                project_id = excluded.project_id, name = excluded.name,
                description = excluded.description, metadata = excluded.metadata,
                updated_at = excluded.updated_at
            "#,
            params![
                kb.id,
                kb.project_id,
                kb.name,
                kb.description,
                metadata_to_sql(&kb.metadata)?,
                kb.created_at.to_rfc3339(),
                kb.updated_at.to_rfc3339(),
            ],
        )?;
        debug!("Inserted knowledge base {}", kb.id);
        Ok(())
    }

    pub(super) fn get_knowledge_base_row(&self, id: &str) -> Result<Option<KnowledgeBase>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {KB_COLUMNS} FROM knowledge_bases WHERE id = ?1");
        Ok(query_rows(&conn, &sql, params![id], row_to_knowledge_base)?
            .into_iter()
            .next())
    }

    pub(super) fn list_knowledge_base_rows(&self, project_id: &str) -> Result<Vec<KnowledgeBase>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {KB_COLUMNS} FROM knowledge_bases WHERE project_id = ?1 ORDER BY rowid"
        );
        query_rows(&conn, &sql, params![project_id], row_to_knowledge_base)
    }

    pub(super) fn delete_knowledge_base_row(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        Ok(conn.execute("DELETE FROM knowledge_bases WHERE id = ?1", params![id])? > 0)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Facts
    // ─────────────────────────────────────────────────────────────────────

    /// Insert facts in one transaction; nothing is written if any is invalid.
    pub(super) fn insert_fact_rows(&self, facts: &[Fact]) -> Result<()> {
        for fact in facts {
            validate_optional_embedding(fact.embedding.as_deref(), self.dimensions)?;
        }

        self.with_transaction(|tx| {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO facts (id, kb_id, content, metadata, confidence, embedding,
                                   created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(id) DO UPDATE SET
                    kb_id = excluded.kb_id, content = excluded.content,
                    metadata = excluded.metadata, confidence = excluded.confidence,
                    embedding = excluded.embedding, updated_at = excluded.updated_at
                "#,
            )?;
            for fact in facts {
                stmt.execute(params![
                    fact.id,
                    fact.kb_id,
                    fact.content,
                    metadata_to_sql(&fact.metadata)?,
                    fact.confidence as f64,
                    fact.embedding.as_deref().map(to_blob),
                    fact.created_at.to_rfc3339(),
                    fact.updated_at.to_rfc3339(),
                ])?;
            }
            Ok(())
        })?;

        debug!("Inserted {} facts", facts.len());
        Ok(())
    }

    pub(super) fn get_fact_row(&self, id: &str) -> Result<Option<Fact>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {FACT_COLUMNS} FROM facts WHERE id = ?1");
        Ok(query_rows(&conn, &sql, params![id], row_to_fact)?
            .into_iter()
            .next())
    }

    pub(super) fn list_fact_rows(
        &self,
        kb_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Fact>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {FACT_COLUMNS} FROM facts WHERE kb_id = ?1
             ORDER BY rowid LIMIT ?2 OFFSET ?3"
        );
        query_rows(
            &conn,
            &sql,
            params![kb_id, sql_limit(limit), sql_offset(offset)],
            row_to_fact,
        )
    }

    pub(super) fn search_fact_rows(
        &self,
        kb_id: &str,
        query: Option<&[f32]>,
        limit: usize,
    ) -> Result<Vec<Scored<Fact>>> {
        validate_query(query, self.dimensions)?;
        // Same f64 scoring and tie order as the in-memory backend
        rank(self.list_fact_rows(kb_id, None, 0)?, query, limit)
    }

    pub(super) fn delete_fact_row(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        Ok(conn.execute("DELETE FROM facts WHERE id = ?1", params![id])? > 0)
    }

    pub(super) fn delete_fact_rows_for_kb(&self, kb_id: &str) -> Result<usize> {
        let removed = self.with_transaction(|tx| {
            Ok(tx.execute("DELETE FROM facts WHERE kb_id = ?1", params![kb_id])?)
        })?;
        debug!("Deleted {} facts from knowledge base {}", removed, kb_id);
        Ok(removed)
    }
}

fn row_to_knowledge_base(row: &Row<'_>) -> Result<KnowledgeBase> {
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;
    Ok(KnowledgeBase {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        metadata: metadata_from_sql(row.get(4)?)?,
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
    })
}

fn row_to_fact(row: &Row<'_>) -> Result<Fact> {
    let confidence: f64 = row.get(4)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    Ok(Fact {
        id: row.get(0)?,
        kb_id: row.get(1)?,
        content: row.get(2)?,
        metadata: metadata_from_sql(row.get(3)?)?,
        confidence: confidence as f32,
        embedding: optional_from_blob(row.get(5)?)?,
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::backend::EntityStore;
    use crate::sqlite::SqliteStore;
    use crate::types::{Fact, KnowledgeBase};

    #[test]
    fn test_insert_facts_is_all_or_nothing() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        let good = Fact::new("kb", "ok").with_embedding(vec![1.0, 0.0]);
        let bad = Fact::new("kb", "bad").with_embedding(vec![f32::NAN, 0.0]);
        assert!(store.insert_facts(&[good.clone(), bad]).is_err());
        assert!(store.list_facts("kb", None, 0).unwrap().is_empty());

        store.insert_facts(&[good]).unwrap();
        assert_eq!(store.list_facts("kb", None, 0).unwrap().len(), 1);
    }

    #[test]
    fn test_fact_search_and_bulk_delete() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        let kb = KnowledgeBase::new("p1", "docs");
        store.insert_knowledge_base(&kb).unwrap();
        assert_eq!(store.list_knowledge_bases("p1").unwrap().len(), 1);

        let facts = vec![
            Fact::new(&kb.id, "sky is blue").with_embedding(vec![0.0, 1.0]),
            Fact::new(&kb.id, "grass is green")
                .with_confidence(0.5)
                .with_embedding(vec![1.0, 0.0]),
            Fact::new(&kb.id, "unembedded"),
        ];
        store.insert_facts(&facts).unwrap();

        let hits = store.search_facts(&kb.id, Some(&[1.0, 0.0]), 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item.content, "grass is green");
        assert_eq!(hits[0].item.confidence, 0.5);

        let all = store.search_facts(&kb.id, None, 10).unwrap();
        assert_eq!(all.len(), 3);

        assert_eq!(store.delete_knowledge_base_facts(&kb.id).unwrap(), 3);
        assert_eq!(store.stats().unwrap().facts, 0);
    }
}
