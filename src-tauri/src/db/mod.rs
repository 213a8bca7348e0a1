use crate::errors::{AppError, AppResult};
use crate::models::{Document, Revision};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Documents and their append-only revision history.
///
/// Every save writes the document row and exactly one `document_history` row
/// inside the same transaction. Revisions are removed only through the
/// `ON DELETE CASCADE` foreign key when their document is deleted.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let foreign_keys: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        if foreign_keys != 1 {
            return Err(AppError::Storage(
                "sqlite build does not enforce foreign keys".to_string(),
            ));
        }

        tracing::info!(path = %path.display(), "document database ready");
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Creates when `id` is `None`, otherwise updates in place. Returns the
    /// effective document id.
    pub fn save_document(&self, title: &str, content: &str, id: Option<i64>) -> AppResult<i64> {
        let document = match id {
            Some(id) => self.update_document(id, title, content)?,
            None => self.create_document(title, content)?,
        };
        Ok(document.id)
    }

    pub fn create_document(&self, title: &str, content: &str) -> AppResult<Document> {
        let now = timestamp(Utc::now());

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO documents (title, content, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![title, content, now],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO document_history (document_id, content, created_at) VALUES (?1, ?2, ?3)",
            params![id, content, now],
        )?;
        let document = tx.query_row(
            "SELECT id, title, content, created_at, updated_at FROM documents WHERE id = ?1",
            [id],
            document_from_row,
        )?;
        tx.commit()?;

        tracing::info!(document_id = id, "document created");
        Ok(document)
    }

    /// Fails with `NotFound` (writing nothing) when no document has `id`.
    pub fn update_document(&self, id: i64, title: &str, content: &str) -> AppResult<Document> {
        let now = timestamp(Utc::now());

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE documents
             SET title = ?1, content = ?2, updated_at = MAX(?3, created_at, updated_at)
             WHERE id = ?4",
            params![title, content, now, id],
        )?;
        if changed == 0 {
            tracing::warn!(document_id = id, "update requested for missing document");
            return Err(AppError::NotFound(format!("document {} does not exist", id)));
        }
        tx.execute(
            "INSERT INTO document_history (document_id, content, created_at) VALUES (?1, ?2, ?3)",
            params![id, content, now],
        )?;
        let document = tx.query_row(
            "SELECT id, title, content, created_at, updated_at FROM documents WHERE id = ?1",
            [id],
            document_from_row,
        )?;
        tx.commit()?;

        tracing::info!(document_id = id, "document updated");
        Ok(document)
    }

    pub fn get_document(&self, id: i64) -> AppResult<Option<Document>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, title, content, created_at, updated_at FROM documents WHERE id = ?1",
            [id],
            document_from_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn list_documents(&self) -> AppResult<Vec<Document>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(
            "SELECT id, title, content, created_at, updated_at
             FROM documents ORDER BY updated_at DESC, id DESC",
        )?;

        let documents = statement
            .query_map([], document_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(documents)
    }

    /// Returns whether a row was removed. Revisions go with it via cascade.
    pub fn delete_document(&self, id: i64) -> AppResult<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM documents WHERE id = ?1", [id])? > 0;
        if deleted {
            tracing::info!(document_id = id, "document deleted");
        } else {
            tracing::warn!(document_id = id, "delete requested for missing document");
        }
        Ok(deleted)
    }

    pub fn document_history(&self, id: i64) -> AppResult<Vec<Revision>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(
            "SELECT id, document_id, content, created_at
             FROM document_history
             WHERE document_id = ?1
             ORDER BY id DESC",
        )?;

        let history = statement
            .query_map([id], |row| {
                Ok(Revision {
                    id: row.get(0)?,
                    document_id: row.get(1)?,
                    content: row.get(2)?,
                    created_at: parse_time(&row.get::<_, String>(3)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(history)
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        created_at: parse_time(&row.get::<_, String>(3)?)?,
        updated_at: parse_time(&row.get::<_, String>(4)?)?,
    })
}

// Fixed-width UTC so that text ordering in SQL matches chronological order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::Database;
    use crate::errors::AppError;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("md_editor.db")).expect("db");
        (dir, db)
    }

    #[test]
    fn save_update_delete_scenario() {
        let (_dir, db) = open();

        let id = db.save_document("Test", "Hello", None).expect("create");
        assert_eq!(id, 1);

        let document = db.get_document(id).expect("get").expect("exists");
        assert_eq!(document.title, "Test");
        assert_eq!(document.content, "Hello");

        let history = db.document_history(id).expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "Hello");
        assert_eq!(history[0].document_id, id);

        assert_eq!(db.save_document("Test", "World", Some(id)).expect("update"), id);
        let history = db.document_history(id).expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "World");
        assert_eq!(history[1].content, "Hello");

        assert!(db.delete_document(id).expect("delete"));
        assert!(db.get_document(id).expect("get").is_none());
        assert!(db.document_history(id).expect("history").is_empty());
    }

    #[test]
    fn creates_issue_fresh_ids_that_are_never_reused() {
        let (_dir, db) = open();

        let first = db.save_document("a", "", None).expect("first");
        let second = db.save_document("b", "", None).expect("second");
        assert_ne!(first, second);

        assert!(db.delete_document(second).expect("delete"));
        let third = db.save_document("c", "", None).expect("third");
        assert!(third > second);
    }

    #[test]
    fn every_save_appends_one_revision_even_when_unchanged() {
        let (_dir, db) = open();

        let id = db.save_document("doc", "", None).expect("create");
        db.save_document("doc", "", Some(id)).expect("same content");
        db.save_document("doc", "", Some(id)).expect("same content again");

        let history = db.document_history(id).expect("history");
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|revision| revision.content.is_empty()));
        assert!(history.windows(2).all(|pair| pair[0].id > pair[1].id));
    }

    #[test]
    fn history_follows_insertion_order_when_clock_steps_back() {
        let (_dir, db) = open();

        let id = db.save_document("doc", "first", None).expect("create");
        db.save_document("doc", "second", Some(id)).expect("update");
        db.lock()
            .expect("lock")
            .execute(
                "UPDATE document_history SET created_at = '2000-01-01T00:00:00.000000Z' WHERE content = 'second'",
                [],
            )
            .expect("rewind clock");

        let history = db.document_history(id).expect("history");
        let contents: Vec<&str> = history.iter().map(|revision| revision.content.as_str()).collect();
        assert_eq!(contents, vec!["second", "first"]);
    }

    #[test]
    fn update_refreshes_updated_at_and_keeps_created_at() {
        let (_dir, db) = open();

        let created = db.create_document("doc", "v1").expect("create");
        let updated = db.update_document(created.id, "renamed", "v2").expect("update");

        assert_eq!(updated.title, "renamed");
        assert_eq!(updated.content, "v2");
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);
        assert!(updated.updated_at >= updated.created_at);
    }

    #[test]
    fn update_of_missing_document_writes_nothing() {
        let (_dir, db) = open();

        let result = db.update_document(42, "ghost", "boo");
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert!(db.get_document(42).expect("get").is_none());
        assert!(db.document_history(42).expect("history").is_empty());
        assert!(db.list_documents().expect("list").is_empty());
    }

    #[test]
    fn delete_of_missing_document_reports_false() {
        let (_dir, db) = open();
        assert!(!db.delete_document(7).expect("delete"));
    }

    #[test]
    fn list_orders_most_recently_updated_first() {
        let (_dir, db) = open();

        let older = db.save_document("older", "1", None).expect("older");
        let newer = db.save_document("newer", "2", None).expect("newer");
        let listed: Vec<i64> = db.list_documents().expect("list").iter().map(|doc| doc.id).collect();
        assert_eq!(listed, vec![newer, older]);

        db.save_document("older", "touched", Some(older)).expect("touch");
        let listed: Vec<i64> = db.list_documents().expect("list").iter().map(|doc| doc.id).collect();
        assert_eq!(listed, vec![older, newer]);
    }

    #[test]
    fn reopening_keeps_documents_and_history() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("md_editor.db");
        let id = {
            let db = Database::new(&path).expect("db");
            db.save_document("persisted", "body", None).expect("create")
        };

        let db = Database::new(&path).expect("reopen");
        assert_eq!(db.path(), path.as_path());
        assert_eq!(db.get_document(id).expect("get").expect("exists").content, "body");
        assert_eq!(db.document_history(id).expect("history").len(), 1);
    }
}
