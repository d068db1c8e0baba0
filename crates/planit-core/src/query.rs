use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::models::{Occurrence, Task};

/// Bounded date range used to limit recurrence expansion to a finite set of
/// occurrences. Construction enforces `from <= to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

impl Window {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self, CoreError> {
        if from > to {
            return Err(CoreError::InvalidWindow { from, to });
        }
        Ok(Self { from, to })
    }

    pub fn from(&self) -> DateTime<Utc> {
        self.from
    }

    pub fn to(&self) -> DateTime<Utc> {
        self.to
    }

    pub fn spans(&self, at: DateTime<Utc>) -> bool {
        self.from <= at && at <= self.to
    }
}

/// Conjunctive predicate for `list` queries: every listed tag must be present,
/// and completion / name constraints must hold when given.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub tags: Vec<String>,
    pub completed: Option<bool>,
    pub name_contains: Option<String>,
}

impl TaskFilter {
    /// Matches one list entry. Completion is judged per occurrence for
    /// recurring tasks and on the task itself for one-off tasks.
    pub fn matches(&self, task: &Task, occurrence: Option<&Occurrence>) -> bool {
        if !self.tags.iter().all(|tag| task.tags.contains(tag)) {
            return false;
        }
        if let Some(needle) = &self.name_contains {
            if !task
                .name
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        if let Some(completed) = self.completed {
            let effective = occurrence.map_or(task.completed, |o| o.completed);
            if effective != completed {
                return false;
            }
        }
        true
    }
}

/// One row of a `list` result: the task, paired with the concrete occurrence
/// it was matched on. Undated one-off tasks carry no occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct ListEntry {
    pub task: Task,
    pub occurrence: Option<Occurrence>,
}

impl ListEntry {
    /// The date this entry sorts by.
    pub fn effective_at(&self) -> Option<DateTime<Utc>> {
        self.occurrence.as_ref().map(|o| o.scheduled_at)
    }
}
