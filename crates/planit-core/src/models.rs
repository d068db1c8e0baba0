use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::error::CoreError;

/// Calendar unit a recurrence rule steps by.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid frequency: {0}")]
pub struct ParseFrequencyError(String);

impl FromStr for Frequency {
    type Err = ParseFrequencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "yearly" => Ok(Frequency::Yearly),
            _ => Err(ParseFrequencyError(s.to_string())),
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frequency::Daily => write!(f, "daily"),
            Frequency::Weekly => write!(f, "weekly"),
            Frequency::Monthly => write!(f, "monthly"),
            Frequency::Yearly => write!(f, "yearly"),
        }
    }
}

/// End condition for a recurrence rule. A rule without one repeats forever,
/// so expansion is always bounded by a caller-supplied window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum RecurrenceEnd {
    /// Last occurrence at or before this instant.
    Until(DateTime<Utc>),
    /// Total number of occurrences, counting the anchor.
    Count(u32),
}

/// Describes how a task repeats: every `interval` units of `frequency`,
/// optionally bounded by an end condition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub interval: u32,
    pub end: Option<RecurrenceEnd>,
}

impl RecurrenceRule {
    pub fn new(frequency: Frequency, interval: u32) -> Self {
        Self {
            frequency,
            interval,
            end: None,
        }
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.end = Some(RecurrenceEnd::Until(until));
        self
    }

    pub fn count(mut self, count: u32) -> Self {
        self.end = Some(RecurrenceEnd::Count(count));
        self
    }
}

/// Closed scalar variant for the open `attributes` mapping. Externally tagged
/// on serialization so every value round-trips through storage exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum AttributeValue {
    Text(String),
    Number(f64),
    Flag(bool),
    Date(DateTime<Utc>),
}

/// The basic unit of work. Everything else is made of tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Unique identifier, assigned by the store at creation and never reused.
    pub id: Uuid,
    pub name: String,
    /// When work is expected to start. Doubles as the recurrence anchor.
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Absent means a one-off task.
    pub repeat: Option<RecurrenceRule>,
    pub tags: BTreeSet<String>,
    /// Open extension mapping; unknown keys are preserved across round-trips.
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Series-level completion. Instances of a recurring task track their own
    /// completion separately, keyed by (task id, scheduled time).
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Task {
    fn default() -> Self {
        Self {
            id: Uuid::now_v7(),
            name: "".to_string(),
            start: None,
            end: None,
            repeat: None,
            tags: BTreeSet::new(),
            attributes: BTreeMap::new(),
            completed: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

impl Task {
    /// Checks entity invariants before any mutation is committed.
    ///
    /// Fails with `InvalidTask` when the name is empty, when `start > end`,
    /// or when a repeat rule is present without a start date to anchor it,
    /// and with `InvalidRule` when the rule's interval is zero.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidTask(
                "task name must not be empty".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(CoreError::InvalidTask(format!(
                    "start {start} is after end {end}"
                )));
            }
        }
        if let Some(rule) = &self.repeat {
            if rule.interval == 0 {
                return Err(CoreError::InvalidRule(
                    "interval must be at least 1".to_string(),
                ));
            }
            if self.start.is_none() {
                return Err(CoreError::InvalidTask(
                    "a recurring task needs a start date to anchor its rule".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// One concrete dated instance of a task within a query window. Derived at
/// read time; only its completion state is ever persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub task_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub completed: bool,
}

/// Draft for creating a task. The store assigns the id.
#[derive(Debug, Clone, Default)]
pub struct NewTaskData {
    pub name: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub repeat: Option<RecurrenceRule>,
    pub tags: Vec<String>,
    pub attributes: BTreeMap<String, AttributeValue>,
}

/// Patch for updating a task. `None` leaves a field untouched; the nested
/// `Option` clears an optional field when set to `Some(None)`. The id and
/// creation time have no patch fields and are therefore immutable.
#[derive(Debug, Clone, Default)]
pub struct UpdateTaskData {
    pub name: Option<String>,
    pub start: Option<Option<DateTime<Utc>>>,
    pub end: Option<Option<DateTime<Utc>>>,
    pub repeat: Option<Option<RecurrenceRule>>,
    pub completed: Option<bool>,
    pub add_tags: Option<Vec<String>>,
    pub remove_tags: Option<Vec<String>>,
    pub set_attributes: Option<BTreeMap<String, AttributeValue>>,
    pub remove_attributes: Option<Vec<String>>,
}

impl UpdateTaskData {
    /// Applies this patch to a task, returning the merged result. The caller
    /// re-validates the merged task before committing it.
    pub fn apply_to(&self, mut task: Task) -> Task {
        if let Some(name) = &self.name {
            task.name = name.clone();
        }
        if let Some(start) = self.start {
            task.start = start;
        }
        if let Some(end) = self.end {
            task.end = end;
        }
        if let Some(repeat) = &self.repeat {
            task.repeat = repeat.clone();
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
        if let Some(tags) = &self.add_tags {
            task.tags.extend(tags.iter().cloned());
        }
        if let Some(tags) = &self.remove_tags {
            for tag in tags {
                task.tags.remove(tag);
            }
        }
        if let Some(attributes) = &self.set_attributes {
            for (key, value) in attributes {
                task.attributes.insert(key.clone(), value.clone());
            }
        }
        if let Some(keys) = &self.remove_attributes {
            for key in keys {
                task.attributes.remove(key);
            }
        }
        task.updated_at = Utc::now();
        task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn dated_task() -> Task {
        Task {
            name: "Water plants".to_string(),
            start: Some(Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn validate_accepts_minimal_task() {
        assert!(dated_task().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_name() {
        let mut task = dated_task();
        task.name = "  ".to_string();
        assert!(matches!(task.validate(), Err(CoreError::InvalidTask(_))));
    }

    #[test]
    fn validate_rejects_inverted_range() {
        let mut task = dated_task();
        task.end = Some(task.start.unwrap() - Duration::hours(1));
        assert!(matches!(task.validate(), Err(CoreError::InvalidTask(_))));
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let mut task = dated_task();
        task.repeat = Some(RecurrenceRule::new(Frequency::Daily, 0));
        assert!(matches!(task.validate(), Err(CoreError::InvalidRule(_))));
    }

    #[test]
    fn validate_rejects_rule_without_anchor() {
        let mut task = dated_task();
        task.start = None;
        task.repeat = Some(RecurrenceRule::new(Frequency::Weekly, 1));
        assert!(matches!(task.validate(), Err(CoreError::InvalidTask(_))));
    }

    #[test]
    fn patch_merges_and_clears_fields() {
        let task = dated_task();
        let id = task.id;
        let patch = UpdateTaskData {
            name: Some("Water the plants".to_string()),
            start: Some(None),
            add_tags: Some(vec!["garden".to_string()]),
            ..Default::default()
        };

        let merged = patch.apply_to(task);
        assert_eq!(merged.id, id);
        assert_eq!(merged.name, "Water the plants");
        assert_eq!(merged.start, None);
        assert!(merged.tags.contains("garden"));
    }

    #[test]
    fn attribute_values_round_trip_through_json() {
        let values = vec![
            AttributeValue::Text("garden".to_string()),
            AttributeValue::Number(2.5),
            AttributeValue::Flag(true),
            AttributeValue::Date(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()),
        ];
        for value in values {
            let encoded = serde_json::to_string(&value).unwrap();
            let decoded: AttributeValue = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn frequency_parses_case_insensitively() {
        assert_eq!("Weekly".parse::<Frequency>().unwrap(), Frequency::Weekly);
        assert!("fortnightly".parse::<Frequency>().is_err());
    }
}
