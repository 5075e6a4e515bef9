//! Owned list of automation paths, persisted under [`PATHS_KEY`].

use std::{collections::HashSet, sync::Arc};

use chrono::{DateTime, Utc};
use log::{info, warn};
use uuid::Uuid;

use crate::{
    error::{RepositoryError, ScheduleError},
    path::AutomationPath,
    schedule::{Recurrence, ScheduleSpec},
    store::{load_json, save_json, KeyValueStore, PATHS_KEY},
};

pub struct PathRepository {
    store: Arc<dyn KeyValueStore>,
    paths: Vec<AutomationPath>,
}

// normalizes the time and checks the whole rule can be evaluated
fn validated(spec: &ScheduleSpec) -> Result<ScheduleSpec, ScheduleError> {
    let spec = spec.normalized()?;
    Recurrence::try_from(&spec)?;
    Ok(spec)
}

impl PathRepository {
    /// Loads the stored paths, assigning missing or duplicate ids and
    /// normalizing schedule times. Repairs are written back right away.
    ///
    /// Paths whose schedule cannot be repaired are kept as they are, the
    /// scheduler reports them when it tries to compute their next run.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Result<Self, RepositoryError> {
        let mut paths: Vec<AutomationPath> =
            load_json(store.as_ref(), PATHS_KEY)?.unwrap_or_default();
        let mut seen = HashSet::new();
        let mut repaired = false;

        for path in paths.iter_mut() {
            if path.id.is_empty() || seen.contains(&path.id) {
                path.id = Uuid::new_v4().to_string();
                info!("path @{} - Id Assigned", path.label());
                repaired = true;
            }
            seen.insert(path.id.clone());

            if let Some(spec) = &path.schedule {
                match validated(spec) {
                    Ok(normalized) if normalized != *spec => {
                        info!(
                            "path @{} - Schedule Time Normalized {} -> {}",
                            path.label(),
                            spec.time,
                            normalized.time
                        );
                        path.schedule = Some(normalized);
                        repaired = true;
                    }
                    Ok(_) => (),
                    Err(error) => warn!("path @{} - Invalid Schedule - {error}", path.label()),
                }
            }
        }

        let repository = PathRepository { store, paths };
        if repaired {
            repository.persist()?;
        }
        info!("Loaded {} Automation Paths", repository.paths.len());
        Ok(repository)
    }

    pub fn list(&self) -> &[AutomationPath] {
        &self.paths
    }

    pub fn get(&self, id: &str) -> Option<&AutomationPath> {
        self.paths.iter().find(|p| p.id == id)
    }

    /// Replaces the loaded paths with what the store holds now, so edits made
    /// by another process become visible.
    ///
    /// Returns the ids that are new or whose schedule or active flag changed.
    pub fn refresh(&mut self) -> Result<Vec<String>, RepositoryError> {
        let stored: Vec<AutomationPath> =
            load_json(self.store.as_ref(), PATHS_KEY)?.unwrap_or_default();

        let changed = stored
            .iter()
            .filter(|path| {
                self.get(&path.id)
                    .map_or(true, |old| old.schedule != path.schedule || old.active != path.active)
            })
            .map(|path| path.id.clone())
            .collect();

        self.paths = stored;
        Ok(changed)
    }

    /// Inserts a new path and returns its id. An id is generated when the
    /// path has none or when it is already taken.
    pub fn add(&mut self, mut path: AutomationPath) -> Result<String, RepositoryError> {
        if let Some(spec) = &path.schedule {
            path.schedule = Some(validated(spec)?);
        }
        self.refresh()?;
        if path.id.is_empty() || self.get(&path.id).is_some() {
            path.id = Uuid::new_v4().to_string();
        }

        let id = path.id.clone();
        info!("path @{} - Added", path.label());
        self.paths.push(path);
        self.persist()?;
        Ok(id)
    }

    /// Replaces the stored path with the same id.
    pub fn update(&mut self, mut path: AutomationPath) -> Result<(), RepositoryError> {
        if let Some(spec) = &path.schedule {
            path.schedule = Some(validated(spec)?);
        }
        let id = path.id.clone();
        self.modify(&id, |slot| {
            info!("path @{} - Updated", path.label());
            *slot = path;
        })
    }

    pub fn remove(&mut self, id: &str) -> Result<AutomationPath, RepositoryError> {
        self.refresh()?;
        let index = self
            .paths
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        let removed = self.paths.remove(index);
        info!("path @{} - Removed", removed.label());
        self.persist()?;
        Ok(removed)
    }

    pub fn set_active(&mut self, id: &str, active: bool) -> Result<(), RepositoryError> {
        self.modify(id, |slot| {
            slot.active = active;
            info!(
                "path @{} - {}",
                slot.label(),
                if active { "Enabled" } else { "Disabled" }
            );
        })
    }

    /// Stamps `last_run`, called after every finished or attempted run.
    pub fn record_run(&mut self, id: &str, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        self.modify(id, |slot| slot.last_run = Some(at))
    }

    // every change applies to the stored list as it is now, one path at a time
    fn modify<F>(&mut self, id: &str, change: F) -> Result<(), RepositoryError>
    where
        F: FnOnce(&mut AutomationPath),
    {
        self.refresh()?;
        let slot = self
            .paths
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        change(slot);
        self.persist()
    }

    fn persist(&self) -> Result<(), RepositoryError> {
        save_json(self.store.as_ref(), PATHS_KEY, &self.paths)?;
        Ok(())
    }
}
