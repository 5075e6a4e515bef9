use chrono::{DateTime, Utc};
use rocket::serde::{Deserialize, Serialize};

use crate::{
    error::ScheduleError,
    schedule::{Recurrence, ScheduleSpec},
};

/// A user-configured recurring content-generation job.
///
/// Serialized with the camelCase keys the dashboard has always written
/// (`lastRun`), so existing `automation-paths` values load unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct AutomationPath {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl AutomationPath {
    /// A new active path without an id, the repository assigns one on insert.
    pub fn new(name: &str, schedule: ScheduleSpec) -> Self {
        AutomationPath {
            id: String::new(),
            name: name.to_string(),
            active: true,
            schedule: Some(schedule),
            last_run: None,
            category: None,
        }
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    // the validated recurrence, None if the path has no schedule
    pub fn recurrence(&self) -> Result<Option<Recurrence>, ScheduleError> {
        self.schedule.as_ref().map(Recurrence::try_from).transpose()
    }

    // used as the log prefix for every path related message
    pub fn label(&self) -> String {
        format!("{} ID#{}", self.name, self.id)
    }
}
