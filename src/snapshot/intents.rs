//! Entity lookups for the assistant front end.
//!
//! Identifiers are plain strings. Anything returned by `suggested_entities`
//! resolves again through `entities_for`; unknown or malformed identifiers
//! simply resolve to nothing.

use std::collections::HashMap;

use super::{filter_tasks, CategorySnapshot, SnapshotProjection, TaskFilter, TaskSnapshot};
use crate::db::models::parse_resolvable_category_id;

#[derive(Clone)]
pub struct TaskQuery {
    projection: SnapshotProjection,
}

impl TaskQuery {
    pub(super) fn new(projection: SnapshotProjection) -> Self {
        Self { projection }
    }

    /// Resolves `identifiers` in the order given. Tasks without a uid never
    /// match.
    pub async fn entities_for(&self, identifiers: &[String]) -> Vec<TaskSnapshot> {
        let by_uid: HashMap<String, TaskSnapshot> = self
            .projection
            .snapshot_tasks()
            .await
            .into_iter()
            .filter_map(|task| task.uid.clone().map(|uid| (uid, task)))
            .collect();

        identifiers
            .iter()
            .filter_map(|identifier| by_uid.get(identifier).cloned())
            .collect()
    }

    /// Open tasks that carry a uid, soonest due first.
    pub async fn suggested_entities(&self) -> Vec<TaskSnapshot> {
        let open: Vec<TaskSnapshot> = self
            .projection
            .snapshot_tasks()
            .await
            .into_iter()
            .filter(|task| !task.completed && task.uid.is_some())
            .collect();
        filter_tasks(&open, TaskFilter::All, &chrono::Utc::now())
    }
}

#[derive(Clone)]
pub struct CategoryQuery {
    projection: SnapshotProjection,
}

impl CategoryQuery {
    pub(super) fn new(projection: SnapshotProjection) -> Self {
        Self { projection }
    }

    pub async fn entities_for(&self, identifiers: &[String]) -> Vec<CategorySnapshot> {
        let wanted: Vec<i64> = identifiers
            .iter()
            .filter_map(|identifier| parse_resolvable_category_id(identifier))
            .collect();
        if wanted.is_empty() {
            return Vec::new();
        }

        let by_id: HashMap<i64, CategorySnapshot> = self
            .projection
            .snapshot_categories()
            .await
            .into_iter()
            .map(|category| (category.id, category))
            .collect();

        wanted
            .iter()
            .filter_map(|id| by_id.get(id).cloned())
            .collect()
    }

    /// All categories by name; equal names keep creation order.
    pub async fn suggested_entities(&self) -> Vec<CategorySnapshot> {
        let mut categories = self.projection.snapshot_categories().await;
        categories.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        categories
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_store, CategoryColor, NewTask, StoreScope};
    use crate::snapshot::tests::{noon, task_due};

    #[tokio::test]
    async fn suggestions_round_trip_through_lookup() {
        let db = open_store(StoreScope::InMemory).unwrap();
        task_due(&db, "b", noon(12)).await;
        task_due(&db, "a", noon(11)).await;
        db.insert_legacy_task(NewTask::named("no uid yet")).await.unwrap();
        db.create_category("Work".into(), CategoryColor::Blue, 0)
            .await
            .unwrap();
        db.create_category("home".into(), CategoryColor::Green, 0)
            .await
            .unwrap();

        let projection = SnapshotProjection::new(db);
        let tasks = projection.task_query();
        let suggested = tasks.suggested_entities().await;
        assert_eq!(
            suggested.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            ["a", "b"]
        );
        let ids: Vec<String> = suggested.iter().filter_map(|t| t.uid.clone()).collect();
        assert_eq!(tasks.entities_for(&ids).await, suggested);

        let categories = projection.category_query();
        let suggested = categories.suggested_entities().await;
        assert_eq!(suggested[0].name, "home");
        let ids: Vec<String> = suggested.iter().map(|c| c.resolvable_id.clone()).collect();
        assert_eq!(categories.entities_for(&ids).await, suggested);
    }

    #[tokio::test]
    async fn unknown_or_missing_identifiers_match_nothing() {
        let db = open_store(StoreScope::InMemory).unwrap();
        db.insert_legacy_task(NewTask::named("legacy")).await.unwrap();
        let projection = SnapshotProjection::new(db);

        let lookups = vec![String::new(), "nope".to_string(), "category-999".to_string()];
        assert!(projection.task_query().entities_for(&lookups).await.is_empty());
        assert!(projection
            .category_query()
            .entities_for(&lookups)
            .await
            .is_empty());
    }
}
