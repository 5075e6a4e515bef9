//! Single-flight execution tracker.
//!
//! Every path is either idle or running. A running path owns exactly one
//! [`ExecutionRecord`], written through to the store on every transition so a
//! restart can redraw in-progress indicators without re-running the jobs.
//!
//! ```
//! use std::sync::Arc;
//! use pathframe::{ExecutionTracker, MemoryStore, RunOutcome};
//!
//! let tracker = ExecutionTracker::new(Arc::new(MemoryStore::new()), 100);
//! tracker.start_run("p1").unwrap();
//! tracker.end_run("p1", RunOutcome::Success).unwrap();
//! assert!(tracker.list_in_progress().is_empty());
//! ```

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, warn};
use rocket::serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::TrackerError,
    path::AutomationPath,
    store::{load_json, save_json, KeyValueStore, HISTORY_KEY, IN_PROGRESS_KEY},
};

pub const HISTORY_LIMIT_DEFAULT: usize = 100;

/// Marker that a path's generation job is currently running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub path_id: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// What `start_run` hands back, the (possibly pre-existing) record of the run.
pub type RunHandle = ExecutionRecord;

// older dashboards persisted a bare list of path ids
#[derive(Deserialize)]
#[serde(crate = "rocket::serde", untagged)]
enum StoredRecord {
    Full(ExecutionRecord),
    Legacy(String),
}

impl StoredRecord {
    fn into_record(self, loaded_at: DateTime<Utc>) -> ExecutionRecord {
        match self {
            StoredRecord::Full(record) => record,
            StoredRecord::Legacy(path_id) => ExecutionRecord {
                path_id,
                run_id: Uuid::new_v4(),
                started_at: loaded_at,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(crate = "rocket::serde")]
pub enum RunStatus {
    Success,
    Failed,
}

/// A finished run, kept newest first in the execution history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct HistoryEntry {
    pub run_id: Uuid,
    pub path_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Published to every subscriber on each state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    RunStarted(RunHandle),
    RunEnded {
        path_id: String,
        run_id: Uuid,
        outcome: RunOutcome,
    },
    Reconciled(BTreeSet<String>),
}

pub struct ExecutionTracker {
    store: Arc<dyn KeyValueStore>,
    records: Mutex<BTreeMap<String, ExecutionRecord>>,
    history: Mutex<VecDeque<HistoryEntry>>,
    history_limit: usize,
    subscribers: Mutex<Vec<Sender<TrackerEvent>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ExecutionTracker {
    /// Creates a tracker over `store`; the run history is loaded right away,
    /// in-progress records only by [`ExecutionTracker::reconcile`].
    pub fn new(store: Arc<dyn KeyValueStore>, history_limit: usize) -> Self {
        let history = match load_json::<Vec<HistoryEntry>>(store.as_ref(), HISTORY_KEY) {
            Ok(entries) => entries.unwrap_or_default(),
            Err(error) => {
                warn!("execution history unreadable, starting empty - {error}");
                Vec::new()
            }
        };

        ExecutionTracker {
            store,
            records: Mutex::new(BTreeMap::new()),
            history: Mutex::new(history.into_iter().take(history_limit).collect()),
            history_limit,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Marks `path_id` as running. Starting a path that is already running
    /// returns its existing handle and writes nothing.
    pub fn start_run(&self, path_id: &str) -> Result<RunHandle, TrackerError> {
        let mut records = lock(&self.records);

        if let Some(existing) = records.get(path_id) {
            debug!(
                "path ID#{} RUN_ID#{} - Already Running",
                path_id, existing.run_id
            );
            return Ok(existing.clone());
        }

        let handle = ExecutionRecord {
            path_id: path_id.to_string(),
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
        };
        records.insert(path_id.to_string(), handle.clone());
        let persisted = self.persist_records(&records);
        drop(records);

        info!("path ID#{} RUN_ID#{} - Run Started", path_id, handle.run_id);
        self.publish(TrackerEvent::RunStarted(handle.clone()));

        persisted.map(|_| handle)
    }

    /// Clears the record of `path_id` whatever the outcome. Ending a path that
    /// is not running only logs a warning.
    pub fn end_run(
        &self,
        path_id: &str,
        outcome: RunOutcome,
    ) -> Result<Option<ExecutionRecord>, TrackerError> {
        let mut records = lock(&self.records);

        let Some(record) = records.remove(path_id) else {
            warn!("path ID#{path_id} - Run End Without Start");
            return Ok(None);
        };
        let persisted = self.persist_records(&records);
        drop(records);

        let (status, error_message) = match &outcome {
            RunOutcome::Success => {
                info!("path ID#{} RUN_ID#{} - Run Completed", path_id, record.run_id);
                (RunStatus::Success, None)
            }
            RunOutcome::Failure(message) => {
                error!(
                    "path ID#{} RUN_ID#{} - Run Failed - {}",
                    path_id, record.run_id, message
                );
                (RunStatus::Failed, Some(message.clone()))
            }
        };

        let history_persisted = self.push_history(HistoryEntry {
            run_id: record.run_id,
            path_id: path_id.to_string(),
            status,
            started_at: record.started_at,
            finished_at: Utc::now(),
            error: error_message,
        });

        self.publish(TrackerEvent::RunEnded {
            path_id: path_id.to_string(),
            run_id: record.run_id,
            outcome,
        });

        persisted.and(history_persisted).map(|_| Some(record))
    }

    pub fn list_in_progress(&self) -> BTreeSet<String> {
        lock(&self.records).keys().cloned().collect()
    }

    pub fn is_running(&self, path_id: &str) -> bool {
        lock(&self.records).contains_key(path_id)
    }

    pub fn handle(&self, path_id: &str) -> Option<RunHandle> {
        lock(&self.records).get(path_id).cloned()
    }

    /// Loads the persisted records, drops the ones whose path is gone and
    /// returns the ids that are still running.
    pub fn reconcile(
        &self,
        known_paths: &[AutomationPath],
    ) -> Result<BTreeSet<String>, TrackerError> {
        let known: BTreeSet<&str> = known_paths.iter().map(|p| p.id.as_str()).collect();
        let now = Utc::now();

        let mut records = lock(&self.records);
        for record in self.load_stored().into_iter().map(|s| s.into_record(now)) {
            records.entry(record.path_id.clone()).or_insert(record);
        }

        let stale: Vec<String> = records
            .keys()
            .filter(|id| !known.contains(id.as_str()))
            .cloned()
            .collect();
        for path_id in &stale {
            records.remove(path_id);
            info!("{}", TrackerError::UnknownPathOnReconcile(path_id.clone()));
        }

        let persisted = if stale.is_empty() {
            Ok(())
        } else {
            self.persist_records(&records)
        };
        let surviving: BTreeSet<String> = records.keys().cloned().collect();
        drop(records);

        info!(
            "Reconciled In-Progress Records - {} running, {} dropped",
            surviving.len(),
            stale.len()
        );
        self.publish(TrackerEvent::Reconciled(surviving.clone()));

        persisted.map(|_| surviving)
    }

    /// Ids of the persisted in-progress records whose path is known, as a
    /// running instance last wrote them. Nothing is written or published.
    pub fn persisted_in_progress(&self, known_paths: &[AutomationPath]) -> BTreeSet<String> {
        let now = Utc::now();
        self.load_stored()
            .into_iter()
            .map(|s| s.into_record(now).path_id)
            .filter(|id| known_paths.iter().any(|p| p.id == *id))
            .collect()
    }

    fn load_stored(&self) -> Vec<StoredRecord> {
        match load_json::<Vec<StoredRecord>>(self.store.as_ref(), IN_PROGRESS_KEY) {
            Ok(stored) => stored.unwrap_or_default(),
            Err(error) => {
                error!("in-progress records unreadable, ignoring them - {error}");
                Vec::new()
            }
        }
    }

    /// Most recent finished runs, newest first.
    pub fn history(&self, limit: usize) -> Vec<HistoryEntry> {
        lock(&self.history).iter().take(limit).cloned().collect()
    }

    pub fn clear_history(&self) -> Result<(), TrackerError> {
        let mut history = lock(&self.history);
        history.clear();
        self.persist_history(&history)
    }

    /// Every state change from now on is sent to the returned receiver.
    pub fn subscribe(&self) -> Receiver<TrackerEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        lock(&self.subscribers).push(tx);
        rx
    }

    fn publish(&self, event: TrackerEvent) {
        // receivers that went away are dropped here
        lock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn push_history(&self, entry: HistoryEntry) -> Result<(), TrackerError> {
        let mut history = lock(&self.history);
        history.push_front(entry);
        history.truncate(self.history_limit);
        self.persist_history(&history)
    }

    fn persist_history(&self, history: &VecDeque<HistoryEntry>) -> Result<(), TrackerError> {
        save_json(self.store.as_ref(), HISTORY_KEY, history).map_err(|source| {
            error!("{HISTORY_KEY} - persist error - {source}");
            TrackerError::PersistFailed {
                key: HISTORY_KEY.to_string(),
                source,
            }
        })
    }

    fn persist_records(
        &self,
        records: &BTreeMap<String, ExecutionRecord>,
    ) -> Result<(), TrackerError> {
        let snapshot: Vec<&ExecutionRecord> = records.values().collect();
        save_json(self.store.as_ref(), IN_PROGRESS_KEY, &snapshot).map_err(|source| {
            error!("{IN_PROGRESS_KEY} - persist error - {source}");
            TrackerError::PersistFailed {
                key: IN_PROGRESS_KEY.to_string(),
                source,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::StoreError,
        schedule::ScheduleSpec,
        store::{KeyValueStore, MemoryStore},
    };

    struct QuotaExceeded;

    impl KeyValueStore for QuotaExceeded {
        fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }

        fn set(&self, key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Io {
                key: key.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "quota exceeded"),
            })
        }
    }

    fn path(id: &str) -> AutomationPath {
        let mut path = AutomationPath::new(id, ScheduleSpec::daily("09:00"));
        path.id = id.to_string();
        path
    }

    fn tracker(store: &Arc<MemoryStore>) -> ExecutionTracker {
        ExecutionTracker::new(store.clone(), HISTORY_LIMIT_DEFAULT)
    }

    #[test]
    fn start_then_end_leaves_nothing_running() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(&store);

        tracker.start_run("p1").unwrap();
        assert!(tracker.is_running("p1"));
        let ended = tracker.end_run("p1", RunOutcome::Success).unwrap();

        assert_eq!(ended.map(|r| r.path_id), Some("p1".to_string()));
        assert!(tracker.list_in_progress().is_empty());
        assert_eq!(store.get(IN_PROGRESS_KEY).unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn start_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(&store);

        let first = tracker.start_run("p1").unwrap();
        let second = tracker.start_run("p1").unwrap();

        assert_eq!(first, second);
        assert_eq!(tracker.list_in_progress().len(), 1);
        let stored: Vec<ExecutionRecord> = load_json(store.as_ref(), IN_PROGRESS_KEY)
            .unwrap()
            .unwrap();
        assert_eq!(stored, vec![first]);
    }

    #[test]
    fn end_without_start_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(&store);

        assert_eq!(tracker.end_run("ghost", RunOutcome::Success).unwrap(), None);
        assert!(tracker.history(10).is_empty());
    }

    #[test]
    fn reconcile_keeps_known_paths() {
        let store = Arc::new(MemoryStore::new());
        tracker(&store).start_run("p1").unwrap();

        // fresh tracker, as after a restart
        let restarted = tracker(&store);
        let surviving = restarted.reconcile(&[path("p1"), path("p2")]).unwrap();

        assert_eq!(surviving, BTreeSet::from(["p1".to_string()]));
        assert!(restarted.is_running("p1"));
    }

    #[test]
    fn reconcile_drops_unknown_paths_and_persists_the_pruning() {
        let store = Arc::new(MemoryStore::new());
        let before = tracker(&store);
        before.start_run("p1").unwrap();
        before.start_run("deleted").unwrap();

        let restarted = tracker(&store);
        let surviving = restarted.reconcile(&[path("p1")]).unwrap();
        assert_eq!(surviving, BTreeSet::from(["p1".to_string()]));

        let again = tracker(&store);
        assert_eq!(
            again.reconcile(&[path("p1"), path("deleted")]).unwrap(),
            BTreeSet::from(["p1".to_string()])
        );
    }

    #[test]
    fn reconcile_reads_legacy_id_lists() {
        let store = Arc::new(MemoryStore::new());
        store.set(IN_PROGRESS_KEY, r#"["p1", "p9"]"#).unwrap();

        let tracker = tracker(&store);
        let surviving = tracker.reconcile(&[path("p1")]).unwrap();

        assert_eq!(surviving, BTreeSet::from(["p1".to_string()]));
        assert!(tracker.handle("p1").is_some());
    }

    #[test]
    fn reconcile_ignores_corrupt_records() {
        let store = Arc::new(MemoryStore::new());
        store.set(IN_PROGRESS_KEY, "{{{").unwrap();
        assert!(tracker(&store).reconcile(&[path("p1")]).unwrap().is_empty());
    }

    #[test]
    fn persisted_in_progress_leaves_the_store_alone() {
        let store = Arc::new(MemoryStore::new());
        let running = tracker(&store);
        running.start_run("p1").unwrap();
        running.start_run("deleted").unwrap();
        let before = store.get(IN_PROGRESS_KEY).unwrap();

        let reader = tracker(&store);
        let events = reader.subscribe();
        assert_eq!(
            reader.persisted_in_progress(&[path("p1"), path("p2")]),
            BTreeSet::from(["p1".to_string()])
        );

        assert_eq!(store.get(IN_PROGRESS_KEY).unwrap(), before);
        assert!(reader.list_in_progress().is_empty());
        assert!(events.try_recv().is_err());
        assert!(running.is_running("deleted"));
    }

    #[test]
    fn persist_failure_still_updates_memory() {
        let tracker = ExecutionTracker::new(Arc::new(QuotaExceeded), HISTORY_LIMIT_DEFAULT);

        let started = tracker.start_run("p1");
        assert!(matches!(started, Err(TrackerError::PersistFailed { .. })));
        assert_eq!(tracker.list_in_progress(), BTreeSet::from(["p1".to_string()]));

        let ended = tracker.end_run("p1", RunOutcome::Success);
        assert!(matches!(ended, Err(TrackerError::PersistFailed { .. })));
        assert!(tracker.list_in_progress().is_empty());
    }

    #[test]
    fn failed_runs_are_recorded_newest_first_and_capped() {
        let store = Arc::new(MemoryStore::new());
        let tracker = ExecutionTracker::new(store.clone(), 3);

        for i in 0..5 {
            let id = format!("p{i}");
            tracker.start_run(&id).unwrap();
            let outcome = if i % 2 == 0 {
                RunOutcome::Success
            } else {
                RunOutcome::Failure("model timeout".into())
            };
            tracker.end_run(&id, outcome).unwrap();
        }

        let history = tracker.history(10);
        let ids: Vec<&str> = history.iter().map(|h| h.path_id.as_str()).collect();
        assert_eq!(ids, vec!["p4", "p3", "p2"]);
        assert_eq!(history[1].status, RunStatus::Failed);
        assert_eq!(history[1].error.as_deref(), Some("model timeout"));

        // history survives a restart
        let restarted = ExecutionTracker::new(store.clone(), 3);
        assert_eq!(restarted.history(10), history);

        restarted.clear_history().unwrap();
        assert!(ExecutionTracker::new(store, 3).history(10).is_empty());
    }

    #[test]
    fn subscribers_see_every_transition() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(&store);
        let events = tracker.subscribe();

        let handle = tracker.start_run("p1").unwrap();
        tracker.start_run("p1").unwrap();
        tracker
            .end_run("p1", RunOutcome::Failure("boom".into()))
            .unwrap();

        assert_eq!(events.try_recv().unwrap(), TrackerEvent::RunStarted(handle.clone()));
        assert_eq!(
            events.try_recv().unwrap(),
            TrackerEvent::RunEnded {
                path_id: "p1".into(),
                run_id: handle.run_id,
                outcome: RunOutcome::Failure("boom".into()),
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn dropped_subscribers_are_forgotten() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(&store);
        drop(tracker.subscribe());

        tracker.start_run("p1").unwrap();
        assert!(lock(&tracker.subscribers).is_empty());
    }
}
