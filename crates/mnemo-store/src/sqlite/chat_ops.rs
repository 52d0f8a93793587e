//! Chat session and message operations.

use rusqlite::{Row, params};

use crate::error::Result;
use crate::search::rank;
use crate::types::{ChatMessage, ChatRole, ChatSession, Scored};
use crate::validation::{validate_optional_embedding, validate_query};

use super::vector::{optional_from_blob, to_blob};
use super::{
    SqliteStore, metadata_from_sql, metadata_to_sql, parse_time, query_rows, sql_limit,
    sql_offset,
};

const SESSION_COLUMNS: &str = "id, user_id, project_id, metadata, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, session_id, role, content, metadata, embedding, created_at";

impl SqliteStore {
    pub(super) fn insert_chat_session_row(&self, session: &ChatSession) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO chat_sessions (id, user_id, project_id, metadata, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id, project_id = excluded.project_id,
                metadata = excluded.metadata, updated_at = excluded.updated_at
            "#,
            params![
                session.id,
                session.user_id,
                session.project_id,
                metadata_to_sql(&session.metadata)?,
                session.created_at.to_rfc3339(),
                session.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub(super) fn get_chat_session_row(&self, id: &str) -> Result<Option<ChatSession>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE id = ?1");
        Ok(query_rows(&conn, &sql, params![id], row_to_session)?
            .into_iter()
            .next())
    }

    pub(super) fn list_chat_session_rows(
        &self,
        user_id: &str,
        project_id: Option<&str>,
    ) -> Result<Vec<ChatSession>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions
             WHERE user_id = ?1 AND (?2 IS NULL OR project_id = ?2)
             ORDER BY rowid"
        );
        query_rows(&conn, &sql, params![user_id, project_id], row_to_session)
    }

    pub(super) fn delete_chat_session_row(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        Ok(conn.execute("DELETE FROM chat_sessions WHERE id = ?1", params![id])? > 0)
    }

    pub(super) fn insert_chat_message_row(&self, message: &ChatMessage) -> Result<()> {
        validate_optional_embedding(message.embedding.as_deref(), self.dimensions)?;
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO chat_messages (id, session_id, role, content, metadata, embedding, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                session_id = excluded.session_id, role = excluded.role,
                content = excluded.content, metadata = excluded.metadata,
                embedding = excluded.embedding
            "#,
            params![
                message.id,
                message.session_id,
                message.role.as_str(),
                message.content,
                metadata_to_sql(&message.metadata)?,
                message.embedding.as_deref().map(to_blob),
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub(super) fn list_chat_message_rows(
        &self,
        session_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<ChatMessage>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE session_id = ?1
             ORDER BY rowid LIMIT ?2 OFFSET ?3"
        );
        query_rows(
            &conn,
            &sql,
            params![session_id, sql_limit(limit), sql_offset(offset)],
            row_to_message,
        )
    }

    pub(super) fn search_chat_message_rows(
        &self,
        session_id: &str,
        query: Option<&[f32]>,
        limit: usize,
    ) -> Result<Vec<Scored<ChatMessage>>> {
        validate_query(query, self.dimensions)?;
        // Same f64 scoring and tie order as the in-memory backend
        rank(self.list_chat_message_rows(session_id, None, 0)?, query, limit)
    }

    pub(super) fn delete_chat_message_rows_for_session(&self, session_id: &str) -> Result<usize> {
        self.with_transaction(|tx| {
            Ok(tx.execute(
                "DELETE FROM chat_messages WHERE session_id = ?1",
                params![session_id],
            )?)
        })
    }
}

fn row_to_session(row: &Row<'_>) -> Result<ChatSession> {
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    Ok(ChatSession {
        id: row.get(0)?,
        user_id: row.get(1)?,
        project_id: row.get(2)?,
        metadata: metadata_from_sql(row.get(3)?)?,
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
    })
}

fn row_to_message(row: &Row<'_>) -> Result<ChatMessage> {
    let role: String = row.get(2)?;
    let created_at: String = row.get(6)?;
    Ok(ChatMessage {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: role.parse::<ChatRole>()?,
        content: row.get(3)?,
        metadata: metadata_from_sql(row.get(4)?)?,
        embedding: optional_from_blob(row.get(5)?)?,
        created_at: parse_time(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::backend::EntityStore;
    use crate::sqlite::SqliteStore;
    use crate::types::{ChatMessage, ChatRole, ChatSession};

    #[test]
    fn test_chat_messages_append_in_order() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        let session = ChatSession::new("u1", "p1");
        store.insert_chat_session(&session).unwrap();
        assert_eq!(store.list_chat_sessions("u1", Some("p1")).unwrap().len(), 1);
        assert!(store.list_chat_sessions("u1", Some("p2")).unwrap().is_empty());

        let first = ChatMessage::new(&session.id, ChatRole::User, "hello")
            .with_embedding(vec![1.0, 0.0]);
        let second = ChatMessage::new(&session.id, ChatRole::Assistant, "hi there")
            .with_embedding(vec![0.6, 0.8]);
        store.insert_chat_message(&first).unwrap();
        store.insert_chat_message(&second).unwrap();

        let listed = store.list_chat_messages(&session.id, None, 0).unwrap();
        assert_eq!(listed[0].role, ChatRole::User);
        assert_eq!(listed[1].role, ChatRole::Assistant);

        let hits = store
            .search_chat_messages(&session.id, Some(&[0.0, 1.0]), 5)
            .unwrap();
        assert_eq!(hits[0].item.content, "hi there");

        assert_eq!(store.delete_chat_session_messages(&session.id).unwrap(), 2);
        assert!(store.delete_chat_session(&session.id).unwrap());
    }
}
