//! Read-only, point-in-time views of the store for every non-owning context.
//!
//! Reads never upgrade to a write and never surface an error: on any fetch or
//! decode failure the projection logs and hands back an empty collection.

mod filter;
mod glance;
mod intents;

use std::future::Future;

use chrono::{DateTime, Datelike, Local, TimeZone, Utc};
use log::{error, warn};
use serde::{Deserialize, Serialize};
use tokio::time::{self, Duration};

pub use filter::{filter_tasks, TaskFilter};
pub use glance::GlanceSummary;
pub use intents::{CategoryQuery, TaskQuery};

use crate::db::{Category, CategoryColor, Database, Task};
use crate::error::CoreError;

const READ_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub id: i64,
    pub uid: Option<String>,
    pub name: String,
    pub due_at: Option<DateTime<Utc>>,
    pub focus_minutes: Option<u32>,
    pub repeating: bool,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub category_ids: Vec<i64>,
}

impl From<Task> for TaskSnapshot {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            uid: task.uid,
            name: task.name,
            due_at: task.due_at,
            focus_minutes: task.focus_minutes,
            repeating: task.repeating,
            completed: task.completed,
            completed_at: task.completed_at,
            category_ids: task.category_ids,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CategorySnapshot {
    pub id: i64,
    pub resolvable_id: String,
    pub name: String,
    pub color: CategoryColor,
    pub weekly_target: u32,
    pub open_tasks: usize,
    pub completed_this_week: usize,
}

impl CategorySnapshot {
    fn from_category<Tz: TimeZone>(
        category: Category,
        tasks: &[TaskSnapshot],
        now: &DateTime<Tz>,
    ) -> Self {
        let members = tasks
            .iter()
            .filter(|task| task.category_ids.contains(&category.id));
        let (mut open_tasks, mut completed_this_week) = (0, 0);
        for task in members {
            if !task.completed {
                open_tasks += 1;
            }
            if let Some(done_at) = task.completed_at {
                if done_at.with_timezone(&now.timezone()).iso_week() == now.iso_week() {
                    completed_this_week += 1;
                }
            }
        }

        Self {
            resolvable_id: category.resolvable_id(),
            id: category.id,
            name: category.name,
            color: category.color,
            weekly_target: category.weekly_target,
            open_tasks,
            completed_this_week,
        }
    }

    /// `None` when the category has no weekly target.
    pub fn target_met(&self) -> Option<bool> {
        (self.weekly_target > 0).then(|| self.completed_this_week >= self.weekly_target as usize)
    }
}

#[derive(Clone)]
pub struct SnapshotProjection {
    db: Database,
}

impl SnapshotProjection {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn snapshot_tasks(&self) -> Vec<TaskSnapshot> {
        soft_read("tasks", self.db.fetch_tasks())
            .await
            .into_iter()
            .map(TaskSnapshot::from)
            .collect()
    }

    pub async fn snapshot_categories(&self) -> Vec<CategorySnapshot> {
        self.snapshot_categories_at(&Local::now()).await
    }

    pub async fn snapshot_categories_at<Tz: TimeZone>(
        &self,
        now: &DateTime<Tz>,
    ) -> Vec<CategorySnapshot> {
        // One transaction for both, so counts match the category rows and a
        // bad task row fails the whole read.
        let (categories, tasks) =
            soft_read("categories", self.db.fetch_categories_with_tasks()).await;
        let tasks: Vec<TaskSnapshot> = tasks.into_iter().map(TaskSnapshot::from).collect();
        categories
            .into_iter()
            .map(|category| CategorySnapshot::from_category(category, &tasks, now))
            .collect()
    }

    /// Tasks passing `filter`, ordered by due date.
    pub async fn tasks_matching<Tz: TimeZone>(
        &self,
        filter: TaskFilter,
        now: &DateTime<Tz>,
    ) -> Vec<TaskSnapshot> {
        filter_tasks(&self.snapshot_tasks().await, filter, now)
    }

    pub fn task_query(&self) -> TaskQuery {
        TaskQuery::new(self.clone())
    }

    pub fn category_query(&self) -> CategoryQuery {
        CategoryQuery::new(self.clone())
    }

    pub async fn glance<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> GlanceSummary {
        GlanceSummary::from_tasks(&self.snapshot_tasks().await, now)
    }
}

async fn soft_read<T, F>(what: &str, fetch: F) -> T
where
    T: Default,
    F: Future<Output = anyhow::Result<T>>,
{
    match time::timeout(READ_TIMEOUT, fetch).await {
        Ok(Ok(items)) => items,
        Ok(Err(err)) => {
            error!("{}", CoreError::ReadFailure(err.context(format!("reading {what}"))));
            T::default()
        }
        Err(_) => {
            warn!(
                "Snapshot read of {what} exceeded {}s; returning empty",
                READ_TIMEOUT.as_secs()
            );
            T::default()
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration as StdDuration;

    use chrono::{Duration, FixedOffset};
    use rusqlite::params;
    use tempfile::tempdir;

    use super::*;
    use crate::db::{open_store, AccessMode, NewTask, StoreScope};

    pub(crate) fn noon(day: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 6, day, 12, 0, 0)
            .unwrap()
    }

    pub(crate) async fn task_due(db: &Database, name: &str, due: DateTime<FixedOffset>) -> Task {
        let mut input = NewTask::named(name);
        input.due_at = Some(due.with_timezone(&Utc));
        db.create_task(input).await.unwrap()
    }

    #[tokio::test]
    async fn undecodable_row_degrades_to_empty() {
        let db = open_store(StoreScope::InMemory).unwrap();
        db.create_task(NewTask::named("fine")).await.unwrap();
        db.execute(|conn| {
            conn.execute("UPDATE tasks SET due_at = ?1", params!["not a date"])?;
            Ok(())
        })
        .await
        .unwrap();

        let projection = SnapshotProjection::new(db);
        assert!(projection.snapshot_tasks().await.is_empty());
        assert!(projection
            .tasks_matching(TaskFilter::All, &noon(3))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn unknown_color_degrades_to_empty() {
        let db = open_store(StoreScope::InMemory).unwrap();
        db.create_category("Odd".into(), CategoryColor::Red, 0)
            .await
            .unwrap();
        db.execute(|conn| {
            conn.execute("UPDATE categories SET color = 'ultraviolet'", [])?;
            Ok(())
        })
        .await
        .unwrap();

        let projection = SnapshotProjection::new(db);
        assert!(projection.snapshot_categories().await.is_empty());
    }

    #[tokio::test]
    async fn undecodable_member_task_empties_categories() {
        let db = open_store(StoreScope::InMemory).unwrap();
        let work = db
            .create_category("Work".into(), CategoryColor::Blue, 0)
            .await
            .unwrap();
        for name in ["draft", "review", "ship"] {
            let mut input = NewTask::named(name);
            input.category_ids = vec![work.id];
            db.create_task(input).await.unwrap();
        }
        db.execute(|conn| {
            conn.execute(
                "UPDATE tasks SET due_at = ?1 WHERE name = 'review'",
                params!["not a date"],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        let projection = SnapshotProjection::new(db);
        assert!(projection.snapshot_categories().await.is_empty());
    }

    #[tokio::test]
    async fn category_progress_counts_this_week() {
        let db = open_store(StoreScope::InMemory).unwrap();
        let reading = db
            .create_category("Reading".into(), CategoryColor::Purple, 2)
            .await
            .unwrap();
        for name in ["chapter 1", "chapter 2", "chapter 3"] {
            let mut input = NewTask::named(name);
            input.category_ids = vec![reading.id];
            db.create_task(input).await.unwrap();
        }
        let tasks = db.fetch_tasks().await.unwrap();
        db.set_task_completed(tasks[0].id, true).await.unwrap();
        db.set_task_completed(tasks[1].id, true).await.unwrap();

        let projection = SnapshotProjection::new(db);
        let snapshots = projection.snapshot_categories_at(&Utc::now()).await;
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].open_tasks, 1);
        assert_eq!(snapshots[0].completed_this_week, 2);
        assert_eq!(snapshots[0].target_met(), Some(true));
        assert_eq!(snapshots[0].resolvable_id, reading.resolvable_id());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_writes_never_tear_an_entity() {
        let dir = tempdir().unwrap();
        let scope = StoreScope::durable(dir.path());
        let writer = open_store(scope.clone()).unwrap();
        let reader = Database::open(scope, AccessMode::ReadOnly).unwrap();

        let base = Utc::now();
        let mut input = NewTask::named("v0");
        input.due_at = Some(base);
        input.focus_minutes = Some(0);
        let task = writer.create_task(input).await.unwrap();

        // Every committed version keeps name, focus minutes and due offset in step.
        let writes = tokio::spawn(async move {
            for version in 1..=200u32 {
                writer
                    .update_task(
                        task.id,
                        crate::db::TaskUpdate {
                            name: Some(format!("v{version}")),
                            due_at: Some(Some(base + Duration::minutes(version as i64))),
                            focus_minutes: Some(Some(version)),
                            ..Default::default()
                        },
                    )
                    .await
                    .unwrap();
            }
        });

        let projection = SnapshotProjection::new(reader);
        while !writes.is_finished() {
            for snapshot in projection.snapshot_tasks().await {
                let version = snapshot.focus_minutes.unwrap();
                assert_eq!(snapshot.name, format!("v{version}"));
                assert_eq!(
                    snapshot.due_at,
                    Some(base + Duration::minutes(version as i64))
                );
            }
            tokio::time::sleep(StdDuration::from_millis(1)).await;
        }
        writes.await.unwrap();
    }
}
