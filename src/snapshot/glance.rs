use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::{filter_tasks, TaskFilter, TaskSnapshot};

const UPCOMING_LIMIT: usize = 3;

/// What a home-screen surface shows: counts plus the next few open tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GlanceSummary {
    pub generated_at: DateTime<Utc>,
    pub due_today: usize,
    pub overdue: usize,
    pub upcoming: Vec<TaskSnapshot>,
}

impl GlanceSummary {
    pub fn from_tasks<Tz: TimeZone>(tasks: &[TaskSnapshot], now: &DateTime<Tz>) -> Self {
        let open: Vec<TaskSnapshot> = tasks.iter().filter(|t| !t.completed).cloned().collect();
        let count = |filter: TaskFilter| {
            open.iter()
                .filter(|task| filter.matches(task.due_at, now))
                .count()
        };

        let upcoming = filter_tasks(&open, TaskFilter::All, now)
            .into_iter()
            .filter(|task| task.due_at.is_some() && !TaskFilter::Overdue.matches(task.due_at, now))
            .take(UPCOMING_LIMIT)
            .collect();

        Self {
            generated_at: now.with_timezone(&Utc),
            due_today: count(TaskFilter::Today),
            overdue: count(TaskFilter::Overdue),
            upcoming,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use crate::db::{open_store, StoreScope};
    use crate::snapshot::tests::{noon, task_due};
    use crate::snapshot::SnapshotProjection;

    #[tokio::test]
    async fn counts_open_tasks_only() {
        let db = open_store(StoreScope::InMemory).unwrap();
        let now = noon(10);
        task_due(&db, "late", now - Duration::days(2)).await;
        let done = task_due(&db, "done today", now).await;
        task_due(&db, "today", now + Duration::hours(1)).await;
        for day in 1..=4 {
            task_due(&db, &format!("+{day}"), now + Duration::days(day)).await;
        }
        db.set_task_completed(done.id, true).await.unwrap();

        let glance = SnapshotProjection::new(db).glance(&now).await;
        assert_eq!(glance.due_today, 1);
        assert_eq!(glance.overdue, 1);
        let upcoming: Vec<_> = glance.upcoming.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(upcoming, ["today", "+1", "+2"]);
    }
}
