//! Scheduling, single-flight tracking and a small dashboard for recurring
//! content generation "automation paths".
//!
//! ```
//! use std::sync::Arc;
//! use chrono::{Local, TimeZone};
//! use pathframe::{AutomationPath, GenerationError, MemoryStore, PathFrame, ScheduleSpec, Settings};
//!
//! let generator = Arc::new(|_: &AutomationPath| Ok::<(), GenerationError>(()));
//! let frame = PathFrame::init(Settings::from_config(None), Arc::new(MemoryStore::new()), generator).unwrap();
//! let id = frame.add_path(AutomationPath::new("Weekly digest", ScheduleSpec::weekly("12:00", 1))).unwrap();
//!
//! frame.tick(Local.with_ymd_and_hms(2024, 6, 10, 11, 0, 0).unwrap());
//! assert_eq!(frame.next_runs()[&id], Local.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap());
//! ```

#[doc(hidden)]
#[macro_use]
extern crate rocket;

// lib modules
mod config;
mod error;
mod frame;
mod generator;
pub mod logger;
mod path;
mod repository;
mod schedule;
mod store;
mod tracker;
pub mod utils;
mod web_server;

// re-export of types
pub use config::{
    parse_config, read_config, ConfigData, GeneratorConfig, LoggerConfig, SchedulerConfig,
    ServerConfig, Settings, StoreConfig, TrackerConfig, CONFIG_FILE,
};
pub use error::{GenerationError, RepositoryError, ScheduleError, StoreError, TrackerError};
pub use frame::{PathFrame, SchedulerMessage};
pub use generator::{CommandGenerator, ContentGenerator};
pub use path::AutomationPath;
pub use repository::PathRepository;
pub use schedule::{
    compute_next_run, days_in_month, next_after, next_occurrence, upcoming, Recurrence,
    ScheduleSpec, TimeOfDay, Upcoming,
};
pub use store::{
    load_json, save_json, FileStore, KeyValueStore, MemoryStore, HISTORY_KEY, IN_PROGRESS_KEY,
    PATHS_KEY,
};
pub use tracker::{
    ExecutionRecord, ExecutionTracker, HistoryEntry, RunHandle, RunOutcome, RunStatus,
    TrackerEvent, HISTORY_LIMIT_DEFAULT,
};
pub use web_server::{path_views, PathView};
