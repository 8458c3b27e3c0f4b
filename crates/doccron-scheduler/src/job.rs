//! A claimed job.

use chrono::{DateTime, Utc};
use doccron_store::{Document, DocumentId};
use serde_json::Value;

use crate::config::FieldPaths;

/// A document the scheduler has claimed, as it looked before the claim.
///
/// The scheduling fields are captured at claim time; the handler cannot
/// change how the job is rescheduled by mutating the document it receives.
#[derive(Debug, Clone)]
pub struct Job {
    document: Document,
    claimed_at: DateTime<Utc>,
    locked_until: DateTime<Utc>,
    interval: Option<Value>,
    repeat_until: Option<Value>,
    auto_remove: bool,
}

impl Job {
    pub(crate) fn from_claim(
        document: Document,
        paths: &FieldPaths,
        claimed_at: DateTime<Utc>,
        locked_until: DateTime<Utc>,
    ) -> Self {
        let present = |value: Option<&Value>| value.filter(|v| !v.is_null()).cloned();
        let interval = present(document.get(&paths.interval));
        let repeat_until = present(document.get(&paths.repeat_until));
        let auto_remove = matches!(document.get(&paths.auto_remove), Some(Value::Bool(true)));

        Self {
            document,
            claimed_at,
            locked_until,
            interval,
            repeat_until,
            auto_remove,
        }
    }

    pub fn id(&self) -> &DocumentId {
        &self.document.id
    }

    /// The document as it was before the claim.
    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn body(&self) -> &Value {
        &self.document.body
    }

    /// When the claim happened; recurring jobs schedule from this instant.
    pub fn claimed_at(&self) -> DateTime<Utc> {
        self.claimed_at
    }

    /// When the claim lapses if the job is never finished.
    pub fn locked_until(&self) -> DateTime<Utc> {
        self.locked_until
    }

    /// Raw interval value; `None` for one-shot jobs.
    pub fn interval(&self) -> Option<&Value> {
        self.interval.as_ref()
    }

    pub fn is_recurring(&self) -> bool {
        self.interval.is_some()
    }

    /// Raw repeat-until value, if set.
    pub fn repeat_until(&self) -> Option<&Value> {
        self.repeat_until.as_ref()
    }

    pub fn auto_remove(&self) -> bool {
        self.auto_remove
    }
}
