//! Query predicates and update operations over document bodies.
//!
//! Both backends evaluate predicates with the same code so that selection
//! semantics do not drift between them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::read_timestamp;
use crate::error::StoreError;
use crate::path::FieldPath;

/// A single predicate on a document body.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// The field is present (a `null` value counts as present).
    Exists(FieldPath),
    /// The field is present and either `null` or a timestamp not later than the instant.
    NotAfter(FieldPath, DateTime<Utc>),
    /// The field is present and equal to the value.
    Equals(FieldPath, Value),
}

impl Condition {
    /// Evaluate against a body.
    pub fn matches(&self, body: &Value) -> bool {
        match self {
            Condition::Exists(path) => path.exists(body),
            Condition::NotAfter(path, at) => match path.get(body) {
                Some(Value::Null) => true,
                Some(value) => read_timestamp(value).is_some_and(|ts| ts <= *at),
                None => false,
            },
            Condition::Equals(path, expected) => path.get(body) == Some(expected),
        }
    }

    /// Path that must be present for this condition to match.
    pub fn required_path(&self) -> &FieldPath {
        match self {
            Condition::Exists(path) | Condition::NotAfter(path, _) | Condition::Equals(path, _) => {
                path
            }
        }
    }
}

/// Conjunction of conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    conditions: Vec<Condition>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require the field to exist.
    pub fn exists(mut self, path: FieldPath) -> Self {
        self.conditions.push(Condition::Exists(path));
        self
    }

    /// Require the field to be `null` or not later than `at`.
    pub fn not_after(mut self, path: FieldPath, at: DateTime<Utc>) -> Self {
        self.conditions.push(Condition::NotAfter(path, at));
        self
    }

    /// Require the field to equal `value`.
    pub fn equals(mut self, path: FieldPath, value: Value) -> Self {
        self.conditions.push(Condition::Equals(path, value));
        self
    }

    /// AND every entry of `filter` into this query.
    pub fn and_filter(mut self, filter: &Filter) -> Result<Self, StoreError> {
        for (path, value) in filter.iter() {
            self.conditions
                .push(Condition::Equals(FieldPath::parse(path)?, value.clone()));
        }
        Ok(self)
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Evaluate against a body. An empty query matches everything.
    pub fn matches(&self, body: &Value) -> bool {
        self.conditions.iter().all(|c| c.matches(body))
    }
}

/// User-supplied equality filter (`path -> value`), ANDed into claims.
///
/// Lets several independent queues share one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(BTreeMap<String, Value>);

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality condition.
    pub fn with(mut self, path: impl Into<String>, value: Value) -> Self {
        self.0.insert(path.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Check every key parses as a field path.
    pub fn validate(&self) -> Result<(), StoreError> {
        for path in self.0.keys() {
            FieldPath::parse(path)?;
        }
        Ok(())
    }
}

/// A single mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    Set(FieldPath, Value),
    Unset(FieldPath),
}

/// Ordered list of mutations applied to one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    ops: Vec<UpdateOp>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: FieldPath, value: Value) -> Self {
        self.ops.push(UpdateOp::Set(path, value));
        self
    }

    pub fn unset(mut self, path: FieldPath) -> Self {
        self.ops.push(UpdateOp::Unset(path));
        self
    }

    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply all operations in order.
    ///
    /// On error the body may be partially updated; callers apply to a copy.
    pub fn apply(&self, body: &mut Value) -> Result<(), StoreError> {
        for op in &self.ops {
            match op {
                UpdateOp::Set(path, value) => path.set(body, value.clone())?,
                UpdateOp::Unset(path) => {
                    path.unset(body);
                }
            }
        }
        Ok(())
    }
}
