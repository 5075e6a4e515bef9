use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
    thread::JoinHandle,
};

use chrono::{DateTime, Local, Utc};
use crossbeam_channel::{Receiver, Sender};
use log::{error, info, warn};
use rocket::Shutdown;
use uuid::Uuid;

use crate::{
    config::Settings,
    error::RepositoryError,
    generator::ContentGenerator,
    path::AutomationPath,
    repository::PathRepository,
    schedule::compute_next_run,
    store::KeyValueStore,
    tracker::{ExecutionTracker, RunHandle, RunOutcome},
    web_server,
};

/// Sent by a job's control thread once the job returned or panicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerMessage {
    JobComplete { path_id: String, run_id: Uuid },
    JobFailed { path_id: String, run_id: Uuid, error: String },
    JobAbort { path_id: String, run_id: Uuid },
}

/// This is the type that schedules automation paths and runs their generation jobs.
///
/// It owns the path repository and the execution tracker, the calculator is
/// consulted on every tick for paths that have no pending next run.
/// ```no_run
/// use std::sync::Arc;
/// use pathframe::{CommandGenerator, FileStore, PathFrame, Settings};
///
/// fn main() -> anyhow::Result<()> {
///     let settings = Settings::load();
///     let store = Arc::new(FileStore::open(&settings.store_dir)?);
///     let generator = Arc::new(CommandGenerator::new("generate-post", vec![]));
///     let frame = PathFrame::init(settings, store, generator)?;
///     frame.run();
///     Ok(())
/// }
/// ```
pub struct PathFrame {
    repository: Mutex<PathRepository>,
    tracker: Arc<ExecutionTracker>,
    generator: Arc<dyn ContentGenerator>,
    next_runs: Mutex<HashMap<String, DateTime<Local>>>,
    invalid_reported: Mutex<HashSet<String>>,
    job_handles: Mutex<HashMap<String, JoinHandle<()>>>,
    status_channels: (Sender<SchedulerMessage>, Receiver<SchedulerMessage>),
    pub web_server_channels: (Sender<Shutdown>, Receiver<Shutdown>),
    server_handle: Mutex<Option<Shutdown>>,
    pub settings: Settings,
    quit: Mutex<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PathFrame {
    /// Loads the paths from `store` and reconciles the in-progress records left
    /// by a previous process. No job is started here. A restored record keeps
    /// showing as running until its path is next due or triggered, and is
    /// ended on the first tick when its path is paused or cannot be scheduled.
    pub fn init(
        settings: Settings,
        store: Arc<dyn KeyValueStore>,
        generator: Arc<dyn ContentGenerator>,
    ) -> anyhow::Result<Arc<PathFrame>> {
        info!("PathFrame Init Start");

        let repository = PathRepository::load(store.clone())?;
        let tracker = Arc::new(ExecutionTracker::new(store, settings.history_limit));

        match tracker.reconcile(repository.list()) {
            Ok(running) if !running.is_empty() => {
                info!("Restored In-Progress Paths {:?}", running)
            }
            Ok(_) => (),
            Err(error) => warn!("Reconcile - {error}"),
        }

        let frame = PathFrame {
            repository: Mutex::new(repository),
            tracker,
            generator,
            next_runs: Mutex::new(HashMap::new()),
            invalid_reported: Mutex::new(HashSet::new()),
            job_handles: Mutex::new(HashMap::new()),
            status_channels: crossbeam_channel::unbounded(),
            web_server_channels: crossbeam_channel::bounded(1),
            server_handle: Mutex::new(None),
            settings,
            quit: Mutex::new(false),
        };

        info!("Tick Period {} ms", frame.settings.tick_ms);
        info!("PathFrame Init Complete");
        Ok(Arc::new(frame))
    }

    pub fn tracker(&self) -> &Arc<ExecutionTracker> {
        &self.tracker
    }

    pub fn paths(&self) -> Vec<AutomationPath> {
        lock(&self.repository).list().to_vec()
    }

    pub fn path(&self, id: &str) -> Option<AutomationPath> {
        lock(&self.repository).get(id).cloned()
    }

    pub fn in_progress(&self) -> BTreeSet<String> {
        self.tracker.list_in_progress()
    }

    /// Next runs the scheduler is currently waiting for.
    pub fn next_runs(&self) -> HashMap<String, DateTime<Local>> {
        lock(&self.next_runs).clone()
    }

    pub fn add_path(&self, path: AutomationPath) -> Result<String, RepositoryError> {
        let id = lock(&self.repository).add(path)?;
        self.reschedule(&id);
        Ok(id)
    }

    pub fn update_path(&self, path: AutomationPath) -> Result<(), RepositoryError> {
        let id = path.id.clone();
        lock(&self.repository).update(path)?;
        self.reschedule(&id);
        Ok(())
    }

    pub fn remove_path(&self, id: &str) -> Result<AutomationPath, RepositoryError> {
        let removed = lock(&self.repository).remove(id)?;
        self.reschedule(id);
        Ok(removed)
    }

    pub fn set_active(&self, id: &str, active: bool) -> Result<(), RepositoryError> {
        lock(&self.repository).set_active(id, active)?;
        self.reschedule(id);
        Ok(())
    }

    // forget the pending next run so the following tick recomputes it
    fn reschedule(&self, id: &str) {
        lock(&self.next_runs).remove(id);
        lock(&self.invalid_reported).remove(id);
    }

    /// Starts a run of `id` right away, outside of its schedule.
    ///
    /// Returns `Ok(false)` when a job of this process is already running the
    /// path. A record restored from a previous process is ended first.
    pub fn trigger(&self, id: &str) -> Result<bool, RepositoryError> {
        let path = self
            .path(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;

        let mut handles = lock(&self.job_handles);
        if handles.contains_key(id) {
            info!("path @{} - Manual Trigger Ignored, Already Running", path.label());
            return Ok(false);
        }
        self.end_interrupted(&path);

        info!("path @{} - Manual Trigger", path.label());
        Ok(self.launch(&path, &mut handles))
    }

    /// One scheduling pass: finished jobs are collected, edits made to the
    /// store by other processes are picked up, then every active path that is
    /// due and not running gets started.
    ///
    /// Returns the ids of the paths started by this pass.
    pub fn tick(&self, now: DateTime<Local>) -> Vec<String> {
        if self.is_quitting() {
            return Vec::new();
        }
        self.collect_finished();

        let refreshed = lock(&self.repository).refresh();
        match refreshed {
            Ok(changed) => changed.iter().for_each(|id| self.reschedule(id)),
            Err(error) => warn!("Paths Not Reloaded - {error}"),
        }

        let paths = self.paths();
        let mut started = Vec::new();
        let mut next_runs = lock(&self.next_runs);
        next_runs.retain(|id, _| paths.iter().any(|p| p.active && p.id == *id));

        for path in &paths {
            let mut handles = lock(&self.job_handles);
            if handles.contains_key(&path.id) {
                continue;
            }
            if !path.active {
                self.end_interrupted(path);
                continue;
            }

            let next = match next_runs.get(&path.id) {
                Some(next) => *next,
                None => match compute_next_run(path, &now) {
                    Ok(Some(next)) => {
                        info!("path @{} - Next Run {}", path.label(), next);
                        next_runs.insert(path.id.clone(), next);
                        next
                    }
                    Ok(None) => {
                        self.end_interrupted(path);
                        continue;
                    }
                    Err(error) => {
                        if lock(&self.invalid_reported).insert(path.id.clone()) {
                            error!("path @{} - Not Scheduled - {error}", path.label());
                        }
                        self.end_interrupted(path);
                        continue;
                    }
                },
            };

            if next > now {
                continue;
            }
            next_runs.remove(&path.id);
            self.end_interrupted(path);

            if self.launch(path, &mut handles) {
                started.push(path.id.clone());
            }
        }

        started
    }

    // a record without a job in this process was restored from the store,
    // callers hold the job handles lock so no launch can race with it
    fn end_interrupted(&self, path: &AutomationPath) {
        if !self.tracker.is_running(&path.id) {
            return;
        }
        let interrupted = RunOutcome::Failure("run interrupted by restart".into());
        match self.tracker.end_run(&path.id, interrupted) {
            Ok(_) => info!("path @{} - Restored Run Ended", path.label()),
            Err(error) => warn!("path @{} - {error}", path.label()),
        }
    }

    // marks the run as started and spawns the control thread that owns the job thread
    fn launch(&self, path: &AutomationPath, handles: &mut HashMap<String, JoinHandle<()>>) -> bool {
        let handle: RunHandle = match self.tracker.start_run(&path.id) {
            Ok(handle) => handle,
            Err(error) => {
                warn!("path @{} - {error}", path.label());
                match self.tracker.handle(&path.id) {
                    Some(handle) => handle,
                    None => return false,
                }
            }
        };

        let tx = self.status_channels.0.clone();
        let generator = self.generator.clone();
        let job_path = path.clone();
        let path_id = path.id.clone();
        let run_id = handle.run_id;

        info!(
            "path @{} RUN_ID#{} - Execution",
            path.label(),
            handle.run_id
        );

        let control_thread = move || {
            let job_thread = std::thread::spawn(move || generator.generate(&job_path));

            let message = match job_thread.join() {
                Ok(Ok(())) => SchedulerMessage::JobComplete { path_id, run_id },
                Ok(Err(error)) => SchedulerMessage::JobFailed {
                    path_id,
                    run_id,
                    error: error.to_string(),
                },
                Err(_) => SchedulerMessage::JobAbort { path_id, run_id },
            };
            let _ = tx.send(message);
        };

        match std::thread::Builder::new()
            .name(format!("path-{}", path.id))
            .spawn(control_thread)
        {
            Ok(join_handle) => {
                handles.insert(path.id.clone(), join_handle);
                true
            }
            Err(error) => {
                error!("path @{} - Job Thread Spawn Error - {error}", path.label());
                self.abandon(path, error.to_string());
                false
            }
        }
    }

    // ends a run that never got a job
    fn abandon(&self, path: &AutomationPath, reason: String) {
        if let Err(error) = self.tracker.end_run(&path.id, RunOutcome::Failure(reason)) {
            warn!("path @{} - {error}", path.label());
        }
    }

    /// Ends the runs whose jobs reported back. Returns how many were collected.
    pub fn collect_finished(&self) -> usize {
        let mut collected = 0;

        while let Ok(message) = self.status_channels.1.try_recv() {
            let (path_id, run_id, outcome) = match message {
                SchedulerMessage::JobComplete { path_id, run_id } => {
                    (path_id, run_id, RunOutcome::Success)
                }
                SchedulerMessage::JobFailed {
                    path_id,
                    run_id,
                    error,
                } => (path_id, run_id, RunOutcome::Failure(error)),
                SchedulerMessage::JobAbort { path_id, run_id } => {
                    (path_id, run_id, RunOutcome::Failure("job panicked".into()))
                }
            };

            lock(&self.job_handles).remove(&path_id);

            // a stale message must not end a newer run of the same path
            if self.tracker.handle(&path_id).map(|h| h.run_id) == Some(run_id) {
                if let Err(error) = self.tracker.end_run(&path_id, outcome) {
                    warn!("path ID#{path_id} - {error}");
                }
            }

            match lock(&self.repository).record_run(&path_id, Utc::now()) {
                Ok(()) => (),
                Err(RepositoryError::NotFound(_)) => {
                    info!("path ID#{path_id} - Finished After Removal")
                }
                Err(error) => error!("path ID#{path_id} - Last Run Not Saved - {error}"),
            }

            lock(&self.next_runs).remove(&path_id);
            collected += 1;
        }

        collected
    }

    /// Blocks until every job started so far has finished, then collects them.
    pub fn wait_for_jobs(&self) -> usize {
        let handles: Vec<JoinHandle<()>> = lock(&self.job_handles)
            .drain()
            .map(|(_, handle)| handle)
            .collect();

        for handle in handles {
            let _ = handle.join();
        }

        self.collect_finished()
    }

    /// It spawns a thread which ticks the scheduling of the paths every `tick_ms`.
    /// ```no_run
    /// # use std::sync::Arc;
    /// # use pathframe::{MemoryStore, PathFrame, Settings, AutomationPath, GenerationError};
    /// # let generator = Arc::new(|_: &AutomationPath| Ok::<(), GenerationError>(()));
    /// let frame = PathFrame::init(Settings::from_config(None), Arc::new(MemoryStore::new()), generator).unwrap();
    /// frame.scheduler();
    /// // do other things...
    /// frame.quit();
    /// ```
    pub fn scheduler(self: &Arc<Self>) -> Arc<Self> {
        let frame = self.clone();
        let period = std::time::Duration::from_millis(self.settings.tick_ms);

        let scheduler = move || loop {
            std::thread::sleep(period);

            if *lock(&frame.quit) {
                break;
            }

            let started = frame.tick(Local::now());
            if !started.is_empty() {
                info!("Tick Started {:?}", started);
            }
        };

        std::thread::spawn(scheduler);
        info!("PathFrame Scheduler Running");
        self.clone()
    }

    /// Runs the scheduler and the web server until [`PathFrame::quit`] is called.
    pub fn run(self: &Arc<Self>) {
        self.start_web_server();
        let _frame = self.scheduler();
        while !*lock(&self.quit) {
            std::thread::sleep(std::time::Duration::from_millis(500));
        }
    }

    /// Spawns the dashboard and keeps its shutdown handle for [`PathFrame::quit`].
    pub fn start_web_server(self: &Arc<Self>) {
        info!("PathFrame Server Init");
        let server_frame = self.clone();

        std::thread::spawn(move || {
            if let Err(error) = web_server::web_server(server_frame) {
                error!("web server error - {error}");
            }
        });

        match self
            .web_server_channels
            .1
            .recv_timeout(std::time::Duration::from_secs(10))
        {
            Ok(handle) => {
                *lock(&self.server_handle) = Some(handle);
                info!("PathFrame Server Running");
            }
            Err(error) => error!("web server shutdown handle error: {error}"),
        }
    }

    /// Function to call for a graceful shutdown of the library
    ///
    /// Running jobs are waited for and recorded before it returns.
    pub fn quit(self: &Arc<Self>) {
        info!("PathFrame Scheduler Shutdown");
        *lock(&self.quit) = true;

        self.wait_for_jobs();

        if let Some(server) = lock(&self.server_handle).take() {
            server.notify();
        }
    }

    pub fn is_quitting(&self) -> bool {
        *lock(&self.quit)
    }
}
