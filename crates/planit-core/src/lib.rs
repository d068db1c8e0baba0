//! # PlanIt Core Library
//!
//! The task store and recurrence engine behind the PlanIt project manager.
//! The CLI shell lives elsewhere; this crate owns the authoritative task
//! collection, expands recurrence rules into concrete occurrences, and
//! answers windowed list queries.
//!
//! ## Core Modules
//!
//! - [`db`]: Database connection and schema setup
//! - [`models`]: Task entity, recurrence rules, and transfer objects
//! - [`repository`]: Data access layer with the Repository pattern
//! - [`recurrence`]: Pure recurrence expansion
//! - [`query`]: Filters and windows for list queries
//! - [`error`]: Error taxonomy
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use planit_core::{
//!     db,
//!     models::{Frequency, NewTaskData, RecurrenceRule},
//!     repository::{SqliteRepository, TaskRepository},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), planit_core::error::CoreError> {
//!     let pool = db::establish_connection("tasks.db").await?;
//!     let repo = SqliteRepository::new(pool);
//!
//!     let task = repo
//!         .add_task(NewTaskData {
//!             name: "Water plants".to_string(),
//!             start: Some(chrono::Utc::now()),
//!             repeat: Some(RecurrenceRule::new(Frequency::Weekly, 1)),
//!             ..Default::default()
//!         })
//!         .await?;
//!     println!("Created task: {}", task.name);
//!
//!     Ok(())
//! }
//! ```

pub mod db;
pub mod error;
pub mod models;
pub mod query;
pub mod recurrence;
pub mod repository;
