//! Student document store: lookup, active roster, dot-path updates and the
//! capped `scraping_errors` push.

use std::collections::BTreeMap;

use async_trait::async_trait;
use cptrack_core::fields::{apply_dot_paths, push_capped, FieldPathError};
use cptrack_core::{FieldUpdates, StudentRecord};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("student {roll_number} not found")]
    StudentNotFound { roll_number: String },
    #[error("student {roll_number} has a malformed document: {message}")]
    Document { roll_number: String, message: String },
    #[error(transparent)]
    FieldPath(#[from] FieldPathError),
}

#[async_trait]
pub trait StudentStore: Send + Sync {
    async fn find_student(&self, roll_number: &str) -> Result<Option<StudentRecord>, StoreError>;

    /// Students whose `is_active` is not `false`.
    async fn list_active_students(&self) -> Result<Vec<StudentRecord>, StoreError>;

    async fn set_fields(&self, roll_number: &str, updates: &FieldUpdates) -> Result<(), StoreError>;

    /// Appends to the array at `path`, trimming it to the newest `cap` items
    /// in the same write.
    async fn push_capped(&self, roll_number: &str, path: &str, entry: JsonValue, cap: usize) -> Result<(), StoreError>;
}

fn parse_student(roll_number: &str, doc: JsonValue) -> Result<StudentRecord, StoreError> {
    serde_json::from_value(doc).map_err(|err| StoreError::Document {
        roll_number: roll_number.to_string(),
        message: err.to_string(),
    })
}

/// Parses a roster row; a malformed document is logged and skipped so one
/// bad row does not hide the rest of the roster.
fn parse_roster_row(roll_number: &str, doc: JsonValue) -> Option<StudentRecord> {
    match parse_student(roll_number, doc) {
        Ok(student) => Some(student),
        Err(err) => {
            warn!(roll_number, error = %err, "skipping malformed student document");
            None
        }
    }
}

fn is_active(doc: &JsonValue) -> bool {
    doc.get("is_active").and_then(JsonValue::as_bool) != Some(false)
}

/// In-process document map with the same dot-path semantics as Postgres.
#[derive(Debug, Default)]
pub struct MemoryStudentStore {
    docs: RwLock<BTreeMap<String, JsonValue>>,
}

impl MemoryStudentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_document(&self, doc: JsonValue) -> Result<(), StoreError> {
        let roll_number = doc
            .get("roll_number")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| StoreError::Document {
                roll_number: String::new(),
                message: "missing roll_number".to_string(),
            })?
            .to_string();
        self.docs.write().await.insert(roll_number, doc);
        Ok(())
    }

    pub async fn insert(&self, student: &StudentRecord) -> Result<(), StoreError> {
        let doc = serde_json::to_value(student).map_err(|err| StoreError::Document {
            roll_number: student.roll_number.clone(),
            message: err.to_string(),
        })?;
        self.insert_document(doc).await
    }

    pub async fn document(&self, roll_number: &str) -> Option<JsonValue> {
        self.docs.read().await.get(roll_number).cloned()
    }
}

#[async_trait]
impl StudentStore for MemoryStudentStore {
    async fn find_student(&self, roll_number: &str) -> Result<Option<StudentRecord>, StoreError> {
        let doc = self.docs.read().await.get(roll_number).cloned();
        doc.map(|doc| parse_student(roll_number, doc)).transpose()
    }

    async fn list_active_students(&self) -> Result<Vec<StudentRecord>, StoreError> {
        let docs = self.docs.read().await;
        Ok(docs
            .iter()
            .filter(|(_, doc)| is_active(doc))
            .filter_map(|(roll, doc)| parse_roster_row(roll, doc.clone()))
            .collect())
    }

    async fn set_fields(&self, roll_number: &str, updates: &FieldUpdates) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;
        let doc = docs.get_mut(roll_number).ok_or_else(|| StoreError::StudentNotFound {
            roll_number: roll_number.to_string(),
        })?;
        let mut staged = doc.clone();
        apply_dot_paths(&mut staged, updates)?;
        *doc = staged;
        Ok(())
    }

    async fn push_capped(&self, roll_number: &str, path: &str, entry: JsonValue, cap: usize) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;
        let doc = docs.get_mut(roll_number).ok_or_else(|| StoreError::StudentNotFound {
            roll_number: roll_number.to_string(),
        })?;
        push_capped(doc, path, entry, cap)?;
        Ok(())
    }
}

/// One JSONB document per student in `students(roll_number, doc, updated_at)`.
#[derive(Debug, Clone)]
pub struct PgStudentStore {
    pool: PgPool,
}

impl PgStudentStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn upsert_document(&self, roll_number: &str, doc: &JsonValue) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO students (roll_number, doc, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (roll_number) DO UPDATE
            SET doc = EXCLUDED.doc, updated_at = NOW()
            "#,
        )
        .bind(roll_number)
        .bind(doc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Row-locks the document, applies `mutate` in Rust and writes it back in
    /// one transaction.
    async fn update_locked<F>(&self, roll_number: &str, mutate: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut JsonValue) -> Result<(), FieldPathError> + Send,
    {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT doc FROM students WHERE roll_number = $1 FOR UPDATE")
            .bind(roll_number)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::StudentNotFound {
                roll_number: roll_number.to_string(),
            })?;
        let mut doc: JsonValue = row.try_get("doc")?;
        mutate(&mut doc)?;
        sqlx::query("UPDATE students SET doc = $2, updated_at = NOW() WHERE roll_number = $1")
            .bind(roll_number)
            .bind(&doc)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl StudentStore for PgStudentStore {
    async fn find_student(&self, roll_number: &str) -> Result<Option<StudentRecord>, StoreError> {
        let row = sqlx::query("SELECT doc FROM students WHERE roll_number = $1")
            .bind(roll_number)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let doc: JsonValue = row.try_get("doc")?;
                parse_student(roll_number, doc).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn list_active_students(&self) -> Result<Vec<StudentRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT roll_number, doc
              FROM students
             WHERE doc->'is_active' IS DISTINCT FROM 'false'::jsonb
             ORDER BY roll_number
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        let mut students = Vec::with_capacity(rows.len());
        for row in rows {
            let roll: String = row.try_get("roll_number")?;
            let doc: JsonValue = row.try_get("doc")?;
            students.extend(parse_roster_row(&roll, doc));
        }
        Ok(students)
    }

    async fn set_fields(&self, roll_number: &str, updates: &FieldUpdates) -> Result<(), StoreError> {
        self.update_locked(roll_number, |doc| apply_dot_paths(doc, updates)).await
    }

    async fn push_capped(&self, roll_number: &str, path: &str, entry: JsonValue, cap: usize) -> Result<(), StoreError> {
        self.update_locked(roll_number, |doc| push_capped(doc, path, entry, cap))
            .await
    }
}
