//! Task rows as stored by the primary process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: i64,
    /// Stable identifier shared with other processes. `None` only for rows
    /// written before identifiers existed, until the migration gate runs.
    pub uid: Option<String>,
    pub name: String,
    pub due_at: Option<DateTime<Utc>>,
    pub focus_minutes: Option<u32>,
    pub repeating: bool,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub category_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub name: String,
    pub due_at: Option<DateTime<Utc>>,
    pub focus_minutes: Option<u32>,
    pub repeating: bool,
    pub category_ids: Vec<i64>,
}

impl NewTask {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Partial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub due_at: Option<Option<DateTime<Utc>>>,
    pub focus_minutes: Option<Option<u32>>,
    pub repeating: Option<bool>,
}
