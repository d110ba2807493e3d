//! Single-flight registry of active pipeline runs
//!
//! The map lock is held only for one check-and-insert or removal, never
//! across an await. Every reservation carries a generation number so a
//! run that was cancelled (and whose slot may since have been reused) can
//! never remove its successor's entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::services::tool_invoker::KillHandle;

/// Proof of a reservation, held by the task driving the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTicket {
    pub project_id: String,
    pub generation: u64,
}

#[derive(Debug)]
struct RunEntry {
    generation: u64,
    started_at: DateTime<Utc>,
    kill: Option<KillHandle>,
}

/// What `cancel` removed from the registry
#[derive(Debug)]
pub struct CancelledRun {
    pub generation: u64,
    pub started_at: DateTime<Utc>,
    /// `None` when cancelled before the process was spawned
    pub kill: Option<KillHandle>,
}

#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<String, RunEntry>>,
    next_generation: AtomicU64,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RunEntry>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Atomically reserve the slot for `project_id`; `None` if taken
    pub fn try_reserve(&self, project_id: &str) -> Option<RunTicket> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let mut runs = self.lock();
        if runs.contains_key(project_id) {
            return None;
        }
        runs.insert(
            project_id.to_string(),
            RunEntry {
                generation,
                started_at: Utc::now(),
                kill: None,
            },
        );
        Some(RunTicket {
            project_id: project_id.to_string(),
            generation,
        })
    }

    /// Attach the spawned process to its reservation
    ///
    /// Returns false if the reservation was cancelled in the meantime; the
    /// caller must then terminate the process itself.
    pub fn attach(&self, ticket: &RunTicket, kill: KillHandle) -> bool {
        match self.lock().get_mut(&ticket.project_id) {
            Some(entry) if entry.generation == ticket.generation => {
                entry.kill = Some(kill);
                true
            }
            _ => false,
        }
    }

    /// Release the reservation if it still belongs to `ticket`
    ///
    /// Returns false when `cancel` already took it.
    pub fn release(&self, ticket: &RunTicket) -> bool {
        let mut runs = self.lock();
        match runs.get(&ticket.project_id) {
            Some(entry) if entry.generation == ticket.generation => {
                runs.remove(&ticket.project_id);
                true
            }
            _ => false,
        }
    }

    /// Remove whatever run is registered for `project_id`
    pub fn cancel(&self, project_id: &str) -> Option<CancelledRun> {
        self.lock().remove(project_id).map(|entry| CancelledRun {
            generation: entry.generation,
            started_at: entry.started_at,
            kill: entry.kill,
        })
    }

    /// True while `ticket` still holds its slot
    pub fn owns(&self, ticket: &RunTicket) -> bool {
        self.lock()
            .get(&ticket.project_id)
            .map(|entry| entry.generation == ticket.generation)
            .unwrap_or(false)
    }

    pub fn is_running(&self, project_id: &str) -> bool {
        self.lock().contains_key(project_id)
    }

    pub fn started_at(&self, project_id: &str) -> Option<DateTime<Utc>> {
        self.lock().get(project_id).map(|e| e.started_at)
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }
}
