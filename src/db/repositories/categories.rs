use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, Row, TransactionBehavior};

use crate::db::{
    helpers::{parse_color, parse_datetime, to_u32},
    models::{Category, CategoryColor, Task},
    Database,
};
use crate::events::ChangeEvent;

use super::tasks::read_tasks;

fn row_to_category(row: &Row) -> Result<Category> {
    let color: String = row.get("color")?;
    let created_at: String = row.get("created_at")?;

    Ok(Category {
        id: row.get("id")?,
        name: row.get("name")?,
        color: parse_color(&color)?,
        weekly_target: to_u32(row.get("weekly_target")?, "weekly_target")?,
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

fn load_categories(conn: &mut Connection) -> Result<Vec<Category>> {
    read_categories(conn)
}

fn read_categories(conn: &Connection) -> Result<Vec<Category>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, color, weekly_target, created_at
         FROM categories
         ORDER BY id ASC",
    )?;

    let mut rows = stmt.query([])?;
    let mut categories = Vec::new();
    while let Some(row) = rows.next()? {
        categories.push(row_to_category(row)?);
    }

    Ok(categories)
}

/// Categories and tasks as of one committed state, for progress counts.
fn load_categories_with_tasks(conn: &mut Connection) -> Result<(Vec<Category>, Vec<Task>)> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Deferred)
        .context("failed to open read transaction")?;
    let categories = read_categories(&tx)?;
    let tasks = read_tasks(&tx)?;
    tx.commit().context("failed to close read transaction")?;
    Ok((categories, tasks))
}

fn load_category(conn: &Connection, category_id: i64) -> Result<Category> {
    let mut stmt = conn.prepare(
        "SELECT id, name, color, weekly_target, created_at
         FROM categories
         WHERE id = ?1",
    )?;
    let mut rows = stmt.query(params![category_id])?;
    let category = match rows.next()? {
        Some(row) => row_to_category(row)?,
        None => return Err(anyhow!("category {category_id} not found")),
    };
    Ok(category)
}

impl Database {
    pub async fn fetch_categories(&self) -> Result<Vec<Category>> {
        self.execute(load_categories).await
    }

    pub async fn fetch_categories_with_tasks(&self) -> Result<(Vec<Category>, Vec<Task>)> {
        self.execute(load_categories_with_tasks).await
    }

    pub async fn create_category(
        &self,
        name: String,
        color: CategoryColor,
        weekly_target: u32,
    ) -> Result<Category> {
        self.ensure_writable()?;
        let category = self
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO categories (name, color, weekly_target, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![name, color.as_str(), weekly_target, Utc::now().to_rfc3339()],
                )
                .context("failed to insert category")?;
                let category_id = conn.last_insert_rowid();
                load_category(conn, category_id)
            })
            .await?;
        self.publish(ChangeEvent::CategoriesChanged);
        Ok(category)
    }

    /// Update a category's name, color and/or weekly target
    pub async fn update_category(
        &self,
        category_id: i64,
        name: Option<String>,
        color: Option<CategoryColor>,
        weekly_target: Option<u32>,
    ) -> Result<Category> {
        self.ensure_writable()?;
        let category = self
            .execute(move |conn| {
                let mut updates = Vec::new();
                let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

                if let Some(n) = name {
                    updates.push("name = ?");
                    params_vec.push(Box::new(n));
                }
                if let Some(c) = color {
                    updates.push("color = ?");
                    params_vec.push(Box::new(c.as_str()));
                }
                if let Some(t) = weekly_target {
                    updates.push("weekly_target = ?");
                    params_vec.push(Box::new(t));
                }

                if updates.is_empty() {
                    return Err(anyhow!("No fields to update"));
                }

                let query = format!("UPDATE categories SET {} WHERE id = ?", updates.join(", "));
                params_vec.push(Box::new(category_id));

                let params_refs: Vec<&dyn rusqlite::ToSql> =
                    params_vec.iter().map(|b| b.as_ref()).collect();

                let rows_affected = conn.execute(&query, params_refs.as_slice())?;
                if rows_affected == 0 {
                    return Err(anyhow!("category {category_id} not found"));
                }

                load_category(conn, category_id)
            })
            .await?;
        self.publish(ChangeEvent::CategoriesChanged);
        Ok(category)
    }

    /// Deletes a category; tasks lose their membership but are kept.
    pub async fn delete_category(&self, category_id: i64) -> Result<()> {
        self.ensure_writable()?;
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM task_categories WHERE category_id = ?1",
                params![category_id],
            )?;
            let rows_affected =
                tx.execute("DELETE FROM categories WHERE id = ?1", params![category_id])?;
            if rows_affected == 0 {
                return Err(anyhow!("category {category_id} not found"));
            }
            tx.commit().context("failed to commit category delete")?;
            Ok(())
        })
        .await?;
        self.publish(ChangeEvent::CategoriesChanged);
        self.publish(ChangeEvent::TasksChanged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{open_store, NewTask, StoreScope};

    use super::*;

    #[tokio::test]
    async fn category_lifecycle() {
        let db = open_store(StoreScope::InMemory).unwrap();
        let health = db
            .create_category("Health".into(), CategoryColor::Green, 0)
            .await
            .unwrap();
        assert_eq!(health.weekly_target, 0);

        let updated = db
            .update_category(health.id, None, Some(CategoryColor::Mint), Some(4))
            .await
            .unwrap();
        assert_eq!(updated.name, "Health");
        assert_eq!(updated.color, CategoryColor::Mint);
        assert_eq!(updated.weekly_target, 4);

        assert!(db.update_category(health.id, None, None, None).await.is_err());
    }

    #[tokio::test]
    async fn deleting_category_keeps_tasks() {
        let db = open_store(StoreScope::InMemory).unwrap();
        let errands = db
            .create_category("Errands".into(), CategoryColor::Orange, 2)
            .await
            .unwrap();
        let mut input = NewTask::named("Buy stamps");
        input.category_ids = vec![errands.id];
        db.create_task(input).await.unwrap();

        db.delete_category(errands.id).await.unwrap();

        assert!(db.fetch_categories().await.unwrap().is_empty());
        let tasks = db.fetch_tasks().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].category_ids.is_empty());
    }

    #[tokio::test]
    async fn categories_come_with_their_tasks() {
        let db = open_store(StoreScope::InMemory).unwrap();
        let reading = db
            .create_category("Reading".into(), CategoryColor::Indigo, 3)
            .await
            .unwrap();
        let mut input = NewTask::named("Finish chapter 4");
        input.category_ids = vec![reading.id];
        db.create_task(input).await.unwrap();
        db.create_task(NewTask::named("Loose end")).await.unwrap();

        let (categories, tasks) = db.fetch_categories_with_tasks().await.unwrap();
        assert_eq!(categories.len(), 1);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].category_ids, vec![reading.id]);
        assert!(tasks[1].category_ids.is_empty());
    }

    #[tokio::test]
    async fn duplicate_names_are_allowed() {
        let db = open_store(StoreScope::InMemory).unwrap();
        let a = db
            .create_category("Focus".into(), CategoryColor::Red, 0)
            .await
            .unwrap();
        let b = db
            .create_category("Focus".into(), CategoryColor::Blue, 0)
            .await
            .unwrap();
        assert_ne!(a.resolvable_id(), b.resolvable_id());
    }
}
