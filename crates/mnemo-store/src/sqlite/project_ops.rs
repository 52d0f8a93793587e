//! Project CRUD operations.

use rusqlite::{Row, params};
use tracing::debug;

use crate::error::Result;
use crate::types::Project;

use super::{SqliteStore, metadata_from_sql, metadata_to_sql, parse_time, query_rows};

const PROJECT_COLUMNS: &str = "id, user_id, name, description, metadata, created_at, updated_at";

impl SqliteStore {
    pub(super) fn insert_project_row(&self, project: &Project) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO projects (id, user_id, name, description, metadata, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id, name = excluded.name,
                description = excluded.description, metadata = excluded.metadata,
                updated_at = excluded.updated_at
            "#,
            params![
                project.id,
                project.user_id,
                project.name,
                project.description,
                metadata_to_sql(&project.metadata)?,
                project.created_at.to_rfc3339(),
                project.updated_at.to_rfc3339(),
            ],
        )?;
        debug!("Inserted project {}", project.id);
        Ok(())
    }

    pub(super) fn get_project_row(&self, id: &str) -> Result<Option<Project>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1");
        Ok(query_rows(&conn, &sql, params![id], row_to_project)?
            .into_iter()
            .next())
    }

    pub(super) fn list_project_rows(&self, user_id: &str) -> Result<Vec<Project>> {
        let conn = self.conn.lock();
        let sql =
            format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE user_id = ?1 ORDER BY rowid");
        query_rows(&conn, &sql, params![user_id], row_to_project)
    }

    pub(super) fn delete_project_row(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }
}

fn row_to_project(row: &Row<'_>) -> Result<Project> {
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;
    Ok(Project {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        metadata: metadata_from_sql(row.get(4)?)?,
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::backend::EntityStore;
    use crate::sqlite::SqliteStore;
    use crate::types::Project;

    #[test]
    fn test_project_round_trip() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        let mut meta = serde_json::Map::new();
        meta.insert("team".into(), "core".into());
        let project = Project::new("u1", "alpha")
            .with_description("first")
            .with_metadata(meta);
        store.insert_project(&project).unwrap();

        let loaded = store.get_project(&project.id).unwrap().unwrap();
        assert_eq!(loaded.name, "alpha");
        assert_eq!(loaded.description.as_deref(), Some("first"));
        assert_eq!(loaded.metadata.unwrap()["team"], "core");
        assert_eq!(loaded.created_at, project.created_at);

        assert!(store.list_projects("u2").unwrap().is_empty());
        assert!(store.delete_project(&project.id).unwrap());
        assert!(!store.delete_project(&project.id).unwrap());
    }
}
