//! SQLite document store.
//!
//! Bodies are stored as JSON text. Claims run inside an IMMEDIATE
//! transaction: the write lock is taken before the candidate scan, so two
//! connections (or two processes) sharing the database file can never select
//! the same row. Field paths are pre-filtered in SQL (presence, and wake-up
//! times that are plainly in the future) and the full predicate is evaluated
//! with [`Query::matches`].

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use tokio_rusqlite::Connection;
use tracing::{debug, warn};

use crate::document::{timestamp_text, Document, DocumentId};
use crate::error::StoreError;
use crate::query::{Condition, Query, Update};
use crate::schema::init_schema;
use crate::store::DocumentStore;

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;

/// How long a connection waits for another writer before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed document collection.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(path).await?;
        Self::init(conn).await
    }

    /// Create a private in-memory database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            init_schema(conn)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Insert a body under a generated id.
    pub async fn insert_one(&self, body: Value) -> Result<DocumentId, StoreError> {
        let document = Document::new(body)?;
        let id = document.id.clone();
        self.insert(document).await?;
        Ok(id)
    }

    /// Insert a document, rejecting duplicate ids.
    pub async fn insert(&self, document: Document) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(&document.body)?;
        let id = document.id.to_string();

        let id_clone = id.clone();
        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let exists = tx
                    .query_row("SELECT 1 FROM documents WHERE id = ?1", [&id_clone], |_| Ok(()))
                    .optional()?
                    .is_some();
                if exists {
                    return Ok(false);
                }
                tx.execute(
                    "INSERT INTO documents (id, body) VALUES (?1, ?2)",
                    params![id_clone, encoded],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if !inserted {
            return Err(StoreError::DuplicateId(id));
        }
        debug!(document_id = %id, "document inserted");
        Ok(())
    }

    /// Fetch a document by id.
    pub async fn find_by_id(&self, id: &DocumentId) -> Result<Option<Document>, StoreError> {
        let id = id.to_string();
        let raw = self
            .conn
            .call(move |conn| {
                let body = conn
                    .query_row(
                        "SELECT id, body FROM documents WHERE id = ?1",
                        [&id],
                        |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                    )
                    .optional()?;
                Ok(body)
            })
            .await?;

        raw.map(|(id, body)| decode(id, &body)).transpose()
    }

    /// Every document in insertion order.
    pub async fn all(&self) -> Result<Vec<Document>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id, body FROM documents ORDER BY seq")?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(id, body)| decode(id, &body))
            .collect()
    }
}

fn decode(id: String, body: &str) -> Result<Document, StoreError> {
    Ok(Document {
        id: DocumentId::from(id),
        body: serde_json::from_str(body)?,
    })
}

fn other<E>(err: E) -> tokio_rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    tokio_rusqlite::Error::Other(Box::new(err))
}

/// Text shape written by [`timestamp_value`](crate::timestamp_value). Values
/// of exactly this shape order chronologically as strings.
const CANONICAL_TIMESTAMP_GLOB: &str =
    "[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]T[0-9][0-9]:[0-9][0-9]:[0-9][0-9].[0-9][0-9][0-9]Z";

/// Build the candidate scan for `query`.
///
/// Every condition requires its path to be present. `NotAfter` also skips
/// rows whose value is provably later than the instant: canonical timestamp
/// text compared as a string, or epoch milliseconds compared as an integer.
/// Anything else is left for [`Query::matches`].
fn candidate_sql(query: &Query) -> (String, Vec<SqlValue>) {
    let mut clauses = Vec::new();
    let mut args: Vec<SqlValue> = Vec::new();

    for condition in query.conditions() {
        args.push(SqlValue::Text(condition.required_path().json_path()));
        let path = args.len();
        clauses.push(format!("json_type(body, ?{path}) IS NOT NULL"));

        if let Condition::NotAfter(_, at) = condition {
            args.push(SqlValue::Text(timestamp_text(*at)));
            let text = args.len();
            args.push(SqlValue::Integer(at.timestamp_millis()));
            let millis = args.len();
            clauses.push(format!(
                "NOT ((json_type(body, ?{path}) = 'text' \
                 AND json_extract(body, ?{path}) GLOB '{CANONICAL_TIMESTAMP_GLOB}' \
                 AND json_extract(body, ?{path}) > ?{text}) \
                 OR (json_type(body, ?{path}) = 'integer' \
                 AND json_extract(body, ?{path}) > ?{millis}))"
            ));
        }
    }

    let mut sql = String::from("SELECT id, body FROM documents");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY seq");
    (sql, args)
}

/// Scan candidates in insertion order and return the first full match.
fn select_first_match(
    conn: &rusqlite::Connection,
    query: &Query,
) -> Result<Option<(String, Value)>, tokio_rusqlite::Error> {
    let (sql, args) = candidate_sql(query);

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(args.iter()))?;
    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        let raw: String = row.get(1)?;
        let body: Value = match serde_json::from_str(&raw) {
            Ok(body) => body,
            Err(e) => {
                warn!(document_id = %id, "skipping undecodable document: {}", e);
                continue;
            }
        };
        if query.matches(&body) {
            return Ok(Some((id, body)));
        }
    }
    Ok(None)
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn find_one_and_update(
        &self,
        query: &Query,
        update: &Update,
    ) -> Result<Option<Document>, StoreError> {
        let query = query.clone();
        let update = update.clone();

        let claimed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let Some((id, original)) = select_first_match(&tx, &query)? else {
                    return Ok(None);
                };

                let mut body = original.clone();
                update.apply(&mut body).map_err(other)?;
                let encoded = serde_json::to_string(&body).map_err(other)?;
                tx.execute(
                    "UPDATE documents SET body = ?1 WHERE id = ?2",
                    params![encoded, id],
                )?;
                tx.commit()?;

                Ok(Some(Document {
                    id: DocumentId::from(id),
                    body: original,
                }))
            })
            .await?;

        if let Some(ref document) = claimed {
            debug!(document_id = %document.id, "document claimed");
        }
        Ok(claimed)
    }

    async fn update_one(&self, id: &DocumentId, update: &Update) -> Result<bool, StoreError> {
        let id = id.to_string();
        let update = update.clone();

        let updated = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let raw: Option<String> = tx
                    .query_row("SELECT body FROM documents WHERE id = ?1", [&id], |row| {
                        row.get(0)
                    })
                    .optional()?;
                let Some(raw) = raw else {
                    return Ok(false);
                };

                let mut body: Value = serde_json::from_str(&raw).map_err(other)?;
                update.apply(&mut body).map_err(other)?;
                let encoded = serde_json::to_string(&body).map_err(other)?;
                tx.execute(
                    "UPDATE documents SET body = ?1 WHERE id = ?2",
                    params![encoded, id],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;

        Ok(updated)
    }

    async fn delete_one(&self, id: &DocumentId) -> Result<bool, StoreError> {
        let id = id.to_string();
        let deleted = self
            .conn
            .call(move |conn| {
                let n = conn.execute("DELETE FROM documents WHERE id = ?1", [&id])?;
                Ok(n > 0)
            })
            .await?;
        Ok(deleted)
    }
}
