use std::{fmt, str::FromStr};

use anyhow::{anyhow, Error};
use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::TaskSnapshot;

/// Due-date windows shared by widgets and the assistant front end, evaluated
/// against "now" in the caller's time zone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TaskFilter {
    Today,
    Tomorrow,
    ThisWeek,
    Overdue,
    All,
}

impl TaskFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskFilter::Today => "today",
            TaskFilter::Tomorrow => "tomorrow",
            TaskFilter::ThisWeek => "this-week",
            TaskFilter::Overdue => "overdue",
            TaskFilter::All => "all",
        }
    }

    pub fn matches<Tz: TimeZone>(&self, due_at: Option<DateTime<Utc>>, now: &DateTime<Tz>) -> bool {
        if *self == TaskFilter::All {
            return true;
        }
        let Some(due_at) = due_at else {
            return false;
        };

        let due = due_at.with_timezone(&now.timezone());
        let today = now.date_naive();
        match self {
            TaskFilter::Today => due.date_naive() == today,
            TaskFilter::Tomorrow => today.succ_opt() == Some(due.date_naive()),
            TaskFilter::ThisWeek => due.iso_week() == now.iso_week(),
            // Strictly before local midnight today.
            TaskFilter::Overdue => due.date_naive() < today,
            TaskFilter::All => true,
        }
    }
}

impl fmt::Display for TaskFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskFilter {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "today" => Ok(TaskFilter::Today),
            "tomorrow" => Ok(TaskFilter::Tomorrow),
            "this-week" | "thisWeek" => Ok(TaskFilter::ThisWeek),
            "overdue" => Ok(TaskFilter::Overdue),
            "all" => Ok(TaskFilter::All),
            other => Err(anyhow!("unknown task filter {other}")),
        }
    }
}

/// Applies `filter` and orders by due date ascending. The sort is stable, so
/// equal due dates keep snapshot order; undated tasks go last.
pub fn filter_tasks<Tz: TimeZone>(
    tasks: &[TaskSnapshot],
    filter: TaskFilter,
    now: &DateTime<Tz>,
) -> Vec<TaskSnapshot> {
    let mut matching: Vec<TaskSnapshot> = tasks
        .iter()
        .filter(|task| filter.matches(task.due_at, now))
        .cloned()
        .collect();
    matching.sort_by_key(|task| (task.due_at.is_none(), task.due_at));
    matching
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, FixedOffset};

    use super::*;
    use crate::db::{open_store, StoreScope};
    use crate::snapshot::tests::{noon, task_due};
    use crate::snapshot::SnapshotProjection;

    fn names(tasks: &[TaskSnapshot]) -> Vec<&str> {
        tasks.iter().map(|task| task.name.as_str()).collect()
    }

    #[tokio::test]
    async fn today_tomorrow_and_later() {
        let db = open_store(StoreScope::InMemory).unwrap();
        let now = noon(10);
        // Inserted out of order to exercise the sort.
        task_due(&db, "later", now + Duration::days(2)).await;
        task_due(&db, "tomorrow", now + Duration::days(1)).await;
        task_due(&db, "today", now).await;

        let projection = SnapshotProjection::new(db);
        let today = projection.tasks_matching(TaskFilter::Today, &now).await;
        assert_eq!(names(&today), ["today"]);

        let overdue = projection.tasks_matching(TaskFilter::Overdue, &now).await;
        assert!(overdue.is_empty());

        let all = projection.tasks_matching(TaskFilter::All, &now).await;
        assert_eq!(names(&all), ["today", "tomorrow", "later"]);
    }

    #[test]
    fn overdue_is_strictly_before_start_of_today() {
        let now = noon(10);
        let start_of_today = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 6, 10, 0, 0, 0)
            .unwrap()
            .with_timezone(&Utc);

        assert!(!TaskFilter::Overdue.matches(Some(start_of_today), &now));
        assert!(TaskFilter::Overdue.matches(Some(start_of_today - Duration::seconds(1)), &now));
        // Earlier today but past "now" is not overdue.
        assert!(!TaskFilter::Overdue.matches(Some(now.with_timezone(&Utc) - Duration::hours(3)), &now));
    }

    #[test]
    fn days_follow_the_callers_time_zone() {
        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        // 23:30 on June 10 in Tokyo.
        let now = tokyo.with_ymd_and_hms(2026, 6, 10, 23, 30, 0).unwrap();
        // 00:30 June 11 Tokyo time, still June 10 in UTC.
        let due = tokyo
            .with_ymd_and_hms(2026, 6, 11, 0, 30, 0)
            .unwrap()
            .with_timezone(&Utc);

        assert!(TaskFilter::Tomorrow.matches(Some(due), &now));
        assert!(!TaskFilter::Today.matches(Some(due), &now));
    }

    #[test]
    fn this_week_uses_iso_weeks() {
        // 2026-06-10 is a Wednesday; the ISO week runs Monday 8th to Sunday 14th.
        let now = noon(10);
        let monday = noon(8).with_timezone(&Utc);
        let sunday = noon(14).with_timezone(&Utc);
        let next_monday = noon(15).with_timezone(&Utc);

        assert!(TaskFilter::ThisWeek.matches(Some(monday), &now));
        assert!(TaskFilter::ThisWeek.matches(Some(sunday), &now));
        assert!(!TaskFilter::ThisWeek.matches(Some(next_monday), &now));
    }

    #[test]
    fn ties_keep_snapshot_order_and_undated_sort_last() {
        let due = Some(noon(10).with_timezone(&Utc));
        let make = |id: i64, name: &str, due_at| TaskSnapshot {
            id,
            uid: Some(format!("uid-{id}")),
            name: name.into(),
            due_at,
            focus_minutes: None,
            repeating: false,
            completed: false,
            completed_at: None,
            category_ids: Vec::new(),
        };
        let tasks = vec![
            make(1, "undated", None),
            make(2, "first", due),
            make(3, "second", due),
        ];

        let sorted = filter_tasks(&tasks, TaskFilter::All, &noon(10));
        assert_eq!(names(&sorted), ["first", "second", "undated"]);

        let today = filter_tasks(&tasks, TaskFilter::Today, &noon(10));
        assert_eq!(names(&today), ["first", "second"]);
    }

    #[test]
    fn parses_cli_spellings() {
        assert_eq!("this-week".parse::<TaskFilter>().unwrap(), TaskFilter::ThisWeek);
        assert_eq!("thisWeek".parse::<TaskFilter>().unwrap(), TaskFilter::ThisWeek);
        assert!("someday".parse::<TaskFilter>().is_err());
    }
}
