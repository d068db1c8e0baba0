use crate::db::DbPool;
use crate::error::CoreError;
use crate::models::{
    AttributeValue, NewTaskData, Occurrence, RecurrenceEnd, RecurrenceRule, Task, UpdateTaskData,
};
use crate::query::{ListEntry, TaskFilter, Window};
use crate::recurrence;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite, Transaction};
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

/// Domain trait for task mutations and lookups. Every mutating operation is
/// atomic: it either fully applies or leaves the store untouched.
#[async_trait]
pub trait TaskRepository {
    /// Validates the draft, assigns a fresh id, and persists the task with
    /// its tags and attributes.
    async fn add_task(&self, data: NewTaskData) -> Result<Task, CoreError>;
    /// Fails with `NotFound` for unknown ids.
    async fn get_task(&self, id: Uuid) -> Result<Task, CoreError>;
    /// Merges the patch, re-validates the result, and persists it. The id and
    /// creation time are immutable. Replacing or clearing the repeat rule
    /// drops the task's per-occurrence completion records.
    async fn update_task(&self, id: Uuid, data: UpdateTaskData) -> Result<Task, CoreError>;
    /// Deletes the task and cascades tags, attributes, and occurrence
    /// completion records.
    async fn delete_task(&self, id: Uuid) -> Result<(), CoreError>;
    /// For a recurring task, marks the given occurrence complete without
    /// touching the rest of the series; for a one-off task, marks the task
    /// itself complete.
    async fn complete_occurrence(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), CoreError>;
}

/// Domain trait for read-only windowed list queries.
#[async_trait]
pub trait QueryRepository {
    /// Lists matching tasks, expanding recurring ones into per-occurrence
    /// entries within `window`. Results are ordered by effective date
    /// ascending, ties by task id; undated entries sort last.
    async fn list_entries(
        &self,
        filter: &TaskFilter,
        window: Window,
    ) -> Result<Vec<ListEntry>, CoreError>;
}

/// Main repository trait that composes all domain traits.
#[async_trait]
pub trait Repository: TaskRepository + QueryRepository {}

/// SQLite implementation of the repository pattern.
pub struct SqliteRepository {
    pool: DbPool,
}

impl SqliteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &DbPool {
        &self.pool
    }
}

impl Repository for SqliteRepository {}

/// Flattened task row. Tags and attributes are assembled from child tables.
#[derive(Debug, FromRow)]
struct TaskRow {
    id: Uuid,
    name: String,
    start_at: Option<DateTime<Utc>>,
    end_at: Option<DateTime<Utc>>,
    repeat_frequency: Option<String>,
    repeat_interval: Option<i64>,
    repeat_until: Option<DateTime<Utc>>,
    repeat_count: Option<i64>,
    completed: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TaskRow {
    fn rule(&self) -> Result<Option<RecurrenceRule>, CoreError> {
        let Some(frequency) = &self.repeat_frequency else {
            return Ok(None);
        };
        let frequency = frequency
            .parse()
            .map_err(|e: crate::models::ParseFrequencyError| CoreError::InvalidRule(e.to_string()))?;
        let end = match (self.repeat_until, self.repeat_count) {
            (Some(until), _) => Some(RecurrenceEnd::Until(until)),
            (None, Some(count)) => Some(RecurrenceEnd::Count(count as u32)),
            (None, None) => None,
        };
        Ok(Some(RecurrenceRule {
            frequency,
            interval: self.repeat_interval.unwrap_or(1) as u32,
            end,
        }))
    }
}

#[async_trait]
impl TaskRepository for SqliteRepository {
    async fn add_task(&self, data: NewTaskData) -> Result<Task, CoreError> {
        let now = Utc::now();
        let task = Task {
            id: Uuid::now_v7(),
            name: data.name,
            start: data.start,
            end: data.end,
            repeat: data.repeat,
            tags: data.tags.into_iter().collect(),
            attributes: data.attributes,
            completed: false,
            created_at: now,
            updated_at: now,
        };
        task.validate()?;

        let mut tx = self.pool().begin().await?;
        Self::insert_task_row(&mut tx, &task).await?;
        Self::replace_task_children(&mut tx, &task).await?;
        tx.commit().await?;

        info!(task_id = %task.id, name = %task.name, "task added");
        Ok(task)
    }

    async fn get_task(&self, id: Uuid) -> Result<Task, CoreError> {
        let mut tx = self.pool().begin().await?;
        let task = Self::load_task(&mut tx, id)
            .await?
            .ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        Ok(task)
    }

    async fn update_task(&self, id: Uuid, data: UpdateTaskData) -> Result<Task, CoreError> {
        let mut tx = self.pool().begin().await?;

        let current = Self::load_task(&mut tx, id)
            .await?
            .ok_or_else(|| CoreError::NotFound(id.to_string()))?;

        let rule_changed = data
            .repeat
            .as_ref()
            .is_some_and(|repeat| *repeat != current.repeat);

        let merged = data.apply_to(current);
        merged.validate()?;

        Self::update_task_row(&mut tx, &merged).await?;
        Self::replace_task_children(&mut tx, &merged).await?;

        if rule_changed {
            // Completions recorded against the old rule belong to a series
            // that no longer exists.
            sqlx::query("DELETE FROM occurrence_completions WHERE task_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        debug!(task_id = %id, rule_changed, "task updated");
        Ok(merged)
    }

    async fn delete_task(&self, id: Uuid) -> Result<(), CoreError> {
        let mut tx = self.pool().begin().await?;

        for table in ["occurrence_completions", "task_tags", "task_attributes"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE task_id = $1"))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(id.to_string()));
        }

        tx.commit().await?;

        info!(task_id = %id, "task deleted");
        Ok(())
    }

    async fn complete_occurrence(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), CoreError> {
        let mut tx = self.pool().begin().await?;

        let task = Self::load_task(&mut tx, id)
            .await?
            .ok_or_else(|| CoreError::NotFound(id.to_string()))?;

        match &task.repeat {
            Some(rule) => {
                let anchor = task.start.ok_or_else(|| {
                    CoreError::InvalidTask("recurring task has no start date".to_string())
                })?;
                if !recurrence::contains(rule, anchor, at)? {
                    return Err(CoreError::InvalidOccurrence { task: id, at });
                }
                sqlx::query(
                    r#"INSERT OR REPLACE INTO occurrence_completions (task_id, scheduled_at, completed_at)
                    VALUES ($1, $2, $3)
                    "#,
                )
                .bind(id)
                .bind(at)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query("UPDATE tasks SET completed = 1, updated_at = $1 WHERE id = $2")
                    .bind(Utc::now())
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;

        debug!(task_id = %id, at = %at, "occurrence completed");
        Ok(())
    }
}

#[async_trait]
impl QueryRepository for SqliteRepository {
    async fn list_entries(
        &self,
        filter: &TaskFilter,
        window: Window,
    ) -> Result<Vec<ListEntry>, CoreError> {
        let mut tx = self.pool().begin().await?;

        let rows: Vec<TaskRow> = sqlx::query_as("SELECT * FROM tasks")
            .fetch_all(&mut *tx)
            .await?;

        let mut entries = Vec::new();
        for row in rows {
            let task = Self::assemble_task(&mut tx, row).await?;
            match &task.repeat {
                Some(rule) => {
                    let anchor = task.start.ok_or_else(|| {
                        CoreError::InvalidTask("recurring task has no start date".to_string())
                    })?;
                    let completed: HashSet<DateTime<Utc>> = sqlx::query_scalar(
                        "SELECT scheduled_at FROM occurrence_completions WHERE task_id = $1",
                    )
                    .bind(task.id)
                    .fetch_all(&mut *tx)
                    .await?
                    .into_iter()
                    .collect();

                    for scheduled_at in
                        recurrence::expand(rule, anchor, window.from(), window.to())?
                    {
                        let occurrence = Occurrence {
                            task_id: task.id,
                            scheduled_at,
                            completed: completed.contains(&scheduled_at),
                        };
                        if filter.matches(&task, Some(&occurrence)) {
                            entries.push(ListEntry {
                                task: task.clone(),
                                occurrence: Some(occurrence),
                            });
                        }
                    }
                }
                None => {
                    let occurrence = task.start.map(|start| Occurrence {
                        task_id: task.id,
                        scheduled_at: start,
                        completed: task.completed,
                    });
                    // Dated one-off tasks are bounded by the window; undated
                    // ones have nothing to bound them and always appear.
                    if let Some(occurrence) = &occurrence {
                        if !window.spans(occurrence.scheduled_at) {
                            continue;
                        }
                    }
                    if filter.matches(&task, occurrence.as_ref()) {
                        entries.push(ListEntry { task, occurrence });
                    }
                }
            }
        }

        entries.sort_by(|a, b| match (a.effective_at(), b.effective_at()) {
            (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.task.id.cmp(&b.task.id)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.task.id.cmp(&b.task.id),
        });

        Ok(entries)
    }
}

impl SqliteRepository {
    async fn load_task(
        tx: &mut Transaction<'_, Sqlite>,
        id: Uuid,
    ) -> Result<Option<Task>, CoreError> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        match row {
            Some(row) => Ok(Some(Self::assemble_task(tx, row).await?)),
            None => Ok(None),
        }
    }

    async fn assemble_task(
        tx: &mut Transaction<'_, Sqlite>,
        row: TaskRow,
    ) -> Result<Task, CoreError> {
        let tags: Vec<String> =
            sqlx::query_scalar("SELECT tag_name FROM task_tags WHERE task_id = $1")
                .bind(row.id)
                .fetch_all(&mut **tx)
                .await?;

        let attribute_rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM task_attributes WHERE task_id = $1")
                .bind(row.id)
                .fetch_all(&mut **tx)
                .await?;
        let mut attributes = std::collections::BTreeMap::new();
        for (key, value) in attribute_rows {
            let value: AttributeValue = serde_json::from_str(&value)?;
            attributes.insert(key, value);
        }

        let repeat = row.rule()?;
        Ok(Task {
            id: row.id,
            name: row.name,
            start: row.start_at,
            end: row.end_at,
            repeat,
            tags: tags.into_iter().collect(),
            attributes,
            completed: row.completed,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    fn rule_columns(
        task: &Task,
    ) -> (
        Option<String>,
        Option<i64>,
        Option<DateTime<Utc>>,
        Option<i64>,
    ) {
        match &task.repeat {
            Some(rule) => {
                let until = match rule.end {
                    Some(RecurrenceEnd::Until(until)) => Some(until),
                    _ => None,
                };
                let count = match rule.end {
                    Some(RecurrenceEnd::Count(count)) => Some(count as i64),
                    _ => None,
                };
                (
                    Some(rule.frequency.to_string()),
                    Some(rule.interval as i64),
                    until,
                    count,
                )
            }
            None => (None, None, None, None),
        }
    }

    async fn insert_task_row(
        tx: &mut Transaction<'_, Sqlite>,
        task: &Task,
    ) -> Result<(), CoreError> {
        let (frequency, interval, until, count) = Self::rule_columns(task);
        sqlx::query(
            r#"INSERT INTO tasks
            (id, name, start_at, end_at, repeat_frequency, repeat_interval, repeat_until, repeat_count, completed, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(task.id)
        .bind(&task.name)
        .bind(task.start)
        .bind(task.end)
        .bind(frequency)
        .bind(interval)
        .bind(until)
        .bind(count)
        .bind(task.completed)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn update_task_row(
        tx: &mut Transaction<'_, Sqlite>,
        task: &Task,
    ) -> Result<(), CoreError> {
        let (frequency, interval, until, count) = Self::rule_columns(task);
        sqlx::query(
            r#"UPDATE tasks SET
            name = $1, start_at = $2, end_at = $3, repeat_frequency = $4, repeat_interval = $5,
            repeat_until = $6, repeat_count = $7, completed = $8, updated_at = $9
            WHERE id = $10
            "#,
        )
        .bind(&task.name)
        .bind(task.start)
        .bind(task.end)
        .bind(frequency)
        .bind(interval)
        .bind(until)
        .bind(count)
        .bind(task.completed)
        .bind(task.updated_at)
        .bind(task.id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Replaces the full tag and attribute sets for a task in one shot.
    async fn replace_task_children(
        tx: &mut Transaction<'_, Sqlite>,
        task: &Task,
    ) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM task_tags WHERE task_id = $1")
            .bind(task.id)
            .execute(&mut **tx)
            .await?;
        if !task.tags.is_empty() {
            let mut query_builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT INTO task_tags (task_id, tag_name) ");
            query_builder.push_values(task.tags.iter(), |mut b, tag| {
                b.push_bind(task.id).push_bind(tag);
            });
            query_builder.build().execute(&mut **tx).await?;
        }

        sqlx::query("DELETE FROM task_attributes WHERE task_id = $1")
            .bind(task.id)
            .execute(&mut **tx)
            .await?;
        if !task.attributes.is_empty() {
            let encoded: Vec<(&String, String)> = task
                .attributes
                .iter()
                .map(|(key, value)| serde_json::to_string(value).map(|json| (key, json)))
                .collect::<Result<_, _>>()?;
            let mut query_builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT INTO task_attributes (task_id, key, value) ");
            query_builder.push_values(encoded.iter(), |mut b, (key, json)| {
                b.push_bind(task.id).push_bind(*key).push_bind(json);
            });
            query_builder.build().execute(&mut **tx).await?;
        }

        Ok(())
    }
}
