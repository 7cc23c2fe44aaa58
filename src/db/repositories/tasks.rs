use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Utc};
use rusqlite::{params, Connection, Row, TransactionBehavior};
use uuid::Uuid;

use crate::db::{
    helpers::{parse_bool, parse_datetime, parse_optional_datetime, to_u32},
    models::{NewTask, Task, TaskUpdate},
    Database,
};
use crate::events::ChangeEvent;

const TASK_COLUMNS: &str =
    "id, uid, name, due_at, focus_minutes, repeating, completed, completed_at, created_at, updated_at";

fn row_to_task(row: &Row) -> Result<Task> {
    let due_at: Option<String> = row.get("due_at")?;
    let focus_minutes: Option<i64> = row.get("focus_minutes")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Task {
        id: row.get("id")?,
        uid: row.get("uid")?,
        name: row.get("name")?,
        due_at: parse_optional_datetime(due_at, "due_at")?,
        focus_minutes: focus_minutes
            .map(|minutes| to_u32(minutes, "focus_minutes"))
            .transpose()?,
        repeating: parse_bool(row.get("repeating")?, "repeating")?,
        completed: parse_bool(row.get("completed")?, "completed")?,
        completed_at: parse_optional_datetime(completed_at, "completed_at")?,
        category_ids: Vec::new(),
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

/// Reads every task and its memberships inside one read transaction, so each
/// returned task is consistent with a single committed state of the store.
fn load_tasks(conn: &mut Connection) -> Result<Vec<Task>> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Deferred)
        .context("failed to open read transaction")?;
    let tasks = read_tasks(&tx)?;
    tx.commit().context("failed to close read transaction")?;
    Ok(tasks)
}

/// Task rows plus memberships. Callers own the enclosing transaction.
pub(super) fn read_tasks(conn: &Connection) -> Result<Vec<Task>> {
    let mut memberships: HashMap<i64, Vec<i64>> = HashMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT task_id, category_id FROM task_categories ORDER BY task_id, category_id",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            memberships
                .entry(row.get(0)?)
                .or_default()
                .push(row.get(1)?);
        }
    }

    let mut stmt = conn.prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY id ASC"))?;
    let mut rows = stmt.query([])?;
    let mut tasks = Vec::new();
    while let Some(row) = rows.next()? {
        let mut task = row_to_task(row)?;
        task.category_ids = memberships.remove(&task.id).unwrap_or_default();
        tasks.push(task);
    }
    Ok(tasks)
}

fn load_task(conn: &Connection, task_id: i64) -> Result<Task> {
    let mut stmt = conn.prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"))?;
    let mut rows = stmt.query(params![task_id])?;
    let mut task = match rows.next()? {
        Some(row) => row_to_task(row)?,
        None => return Err(anyhow!("task {task_id} not found")),
    };

    let mut stmt = conn.prepare(
        "SELECT category_id FROM task_categories WHERE task_id = ?1 ORDER BY category_id",
    )?;
    let ids = stmt
        .query_map(params![task_id], |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    task.category_ids = ids;
    Ok(task)
}

fn replace_memberships(conn: &Connection, task_id: i64, category_ids: &[i64]) -> Result<()> {
    conn.execute(
        "DELETE FROM task_categories WHERE task_id = ?1",
        params![task_id],
    )?;
    for category_id in category_ids {
        conn.execute(
            "INSERT OR IGNORE INTO task_categories (task_id, category_id) VALUES (?1, ?2)",
            params![task_id, category_id],
        )
        .with_context(|| format!("failed to link task {task_id} to category {category_id}"))?;
    }
    Ok(())
}

fn insert_task(conn: &mut Connection, uid: Option<String>, input: NewTask) -> Result<Task> {
    let now = Utc::now().to_rfc3339();
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO tasks (uid, name, due_at, focus_minutes, repeating, completed, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)",
        params![
            uid,
            input.name,
            input.due_at.map(|dt| dt.to_rfc3339()),
            input.focus_minutes,
            input.repeating,
            now,
            now,
        ],
    )
    .context("failed to insert task")?;
    let task_id = tx.last_insert_rowid();
    replace_memberships(&tx, task_id, &input.category_ids)?;
    let task = load_task(&tx, task_id)?;
    tx.commit().context("failed to commit task insert")?;
    Ok(task)
}

impl Database {
    pub async fn fetch_tasks(&self) -> Result<Vec<Task>> {
        self.execute(load_tasks).await
    }

    /// Create a task with a freshly generated uid.
    pub async fn create_task(&self, input: NewTask) -> Result<Task> {
        self.ensure_writable()?;
        let uid = Uuid::new_v4().to_string();
        let task = self
            .execute(move |conn| insert_task(conn, Some(uid), input))
            .await?;
        self.publish(ChangeEvent::TasksChanged);
        Ok(task)
    }

    /// Writes a task the way builds before stable identifiers did: no uid.
    pub(crate) async fn insert_legacy_task(&self, input: NewTask) -> Result<Task> {
        self.ensure_writable()?;
        self.execute(move |conn| insert_task(conn, None, input)).await
    }

    pub async fn update_task(&self, task_id: i64, update: TaskUpdate) -> Result<Task> {
        self.ensure_writable()?;
        let task = self
            .execute(move |conn| {
                let tx = conn.transaction()?;
                let mut task = load_task(&tx, task_id)?;
                if let Some(name) = update.name {
                    task.name = name;
                }
                if let Some(due_at) = update.due_at {
                    task.due_at = due_at;
                }
                if let Some(focus_minutes) = update.focus_minutes {
                    task.focus_minutes = focus_minutes;
                }
                if let Some(repeating) = update.repeating {
                    task.repeating = repeating;
                }
                task.updated_at = Utc::now();

                tx.execute(
                    "UPDATE tasks
                     SET name = ?1, due_at = ?2, focus_minutes = ?3, repeating = ?4, updated_at = ?5
                     WHERE id = ?6",
                    params![
                        task.name,
                        task.due_at.map(|dt| dt.to_rfc3339()),
                        task.focus_minutes,
                        task.repeating,
                        task.updated_at.to_rfc3339(),
                        task_id,
                    ],
                )
                .context("failed to update task")?;
                tx.commit().context("failed to commit task update")?;
                Ok(task)
            })
            .await?;
        self.publish(ChangeEvent::TasksChanged);
        Ok(task)
    }

    /// Marks a task done. A repeating task stays open and moves its due date
    /// one week forward instead.
    pub async fn set_task_completed(&self, task_id: i64, completed: bool) -> Result<Task> {
        self.ensure_writable()?;
        let task = self
            .execute(move |conn| {
                let tx = conn.transaction()?;
                let mut task = load_task(&tx, task_id)?;
                let now = Utc::now();

                if completed {
                    task.completed_at = Some(now);
                    if task.repeating {
                        task.due_at = task.due_at.map(|due| due + Duration::weeks(1));
                        task.completed = false;
                    } else {
                        task.completed = true;
                    }
                } else {
                    task.completed = false;
                    task.completed_at = None;
                }
                task.updated_at = now;

                tx.execute(
                    "UPDATE tasks
                     SET completed = ?1, completed_at = ?2, due_at = ?3, updated_at = ?4
                     WHERE id = ?5",
                    params![
                        task.completed,
                        task.completed_at.map(|dt| dt.to_rfc3339()),
                        task.due_at.map(|dt| dt.to_rfc3339()),
                        task.updated_at.to_rfc3339(),
                        task_id,
                    ],
                )
                .context("failed to update task completion")?;
                tx.commit().context("failed to commit task completion")?;
                Ok(task)
            })
            .await?;
        self.publish(ChangeEvent::TasksChanged);
        Ok(task)
    }

    pub async fn set_task_categories(&self, task_id: i64, category_ids: Vec<i64>) -> Result<Task> {
        self.ensure_writable()?;
        let task = self
            .execute(move |conn| {
                let tx = conn.transaction()?;
                replace_memberships(&tx, task_id, &category_ids)?;
                tx.execute(
                    "UPDATE tasks SET updated_at = ?1 WHERE id = ?2",
                    params![Utc::now().to_rfc3339(), task_id],
                )?;
                let task = load_task(&tx, task_id)?;
                tx.commit().context("failed to commit task categories")?;
                Ok(task)
            })
            .await?;
        self.publish(ChangeEvent::TasksChanged);
        Ok(task)
    }

    pub async fn delete_task(&self, task_id: i64) -> Result<()> {
        self.ensure_writable()?;
        self.execute(move |conn| {
            let rows_affected = conn.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
            if rows_affected == 0 {
                return Err(anyhow!("task {task_id} not found"));
            }
            Ok(())
        })
        .await?;
        self.publish(ChangeEvent::TasksChanged);
        Ok(())
    }

    /// Gives every task lacking a uid a fresh one, in a single transaction.
    /// Returns how many rows were patched; rows that already have a uid are
    /// never touched.
    pub(crate) async fn backfill_task_uids(&self) -> Result<usize> {
        self.ensure_writable()?;
        let patched = self
            .execute(|conn| {
                let tx = conn
                    .transaction_with_behavior(TransactionBehavior::Immediate)
                    .context("failed to open repair transaction")?;

                let missing = {
                    let mut stmt = tx.prepare("SELECT id FROM tasks WHERE uid IS NULL")?;
                    let ids = stmt
                        .query_map([], |row| row.get::<_, i64>(0))?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    ids
                };

                for task_id in &missing {
                    tx.execute(
                        "UPDATE tasks SET uid = ?1 WHERE id = ?2 AND uid IS NULL",
                        params![Uuid::new_v4().to_string(), task_id],
                    )
                    .with_context(|| format!("failed to assign uid to task {task_id}"))?;
                }

                tx.commit().context("failed to flush uid repair")?;
                Ok(missing.len())
            })
            .await?;
        if patched > 0 {
            self.publish(ChangeEvent::TasksChanged);
        }
        Ok(patched)
    }
}
