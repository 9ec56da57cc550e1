//! Fleet registry: the managed instance set and the launch counter.
//!
//! `FleetState` is owned by the control loop and mutated only between
//! ticks via [`FleetState::apply_results`] and
//! [`FleetState::retain_running`]. Decision code receives `&FleetState`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{ActionResult, InstanceId};

/// Managed instances plus the number of instances ever launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetState {
    /// Managed ids in the order they joined the fleet. No duplicates.
    managed_ids: Vec<InstanceId>,
    /// Never decremented.
    total_ever_launched: u32,
}

impl FleetState {
    /// Build a fleet from an initial id list.
    ///
    /// Duplicate ids are dropped. `total_ever_launched` is raised to the
    /// fleet size when lower, so the managed set never outgrows the counter.
    pub fn new<I, S>(ids: I, total_ever_launched: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<InstanceId>,
    {
        let mut managed_ids: Vec<InstanceId> = Vec::new();
        for id in ids {
            let id = id.into();
            if !managed_ids.contains(&id) {
                managed_ids.push(id);
            }
        }
        let total_ever_launched = total_ever_launched.max(managed_ids.len() as u32);
        Self {
            managed_ids,
            total_ever_launched,
        }
    }

    pub fn managed_ids(&self) -> &[InstanceId] {
        &self.managed_ids
    }

    pub fn len(&self) -> usize {
        self.managed_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managed_ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.managed_ids.iter().any(|m| m == id)
    }

    pub fn total_ever_launched(&self) -> u32 {
        self.total_ever_launched
    }

    /// Launches still allowed under `max_fleet_size`.
    pub fn remaining_launches(&self, max_fleet_size: u32) -> u32 {
        max_fleet_size.saturating_sub(self.total_ever_launched)
    }

    /// Whether the managed set respects `max_fleet_size`.
    pub fn within_cap(&self, max_fleet_size: u32) -> bool {
        self.managed_ids.len() <= max_fleet_size as usize
    }

    /// The first `limit` managed ids, or all of them when `limit` is `None`.
    pub fn monitored(&self, limit: Option<usize>) -> &[InstanceId] {
        match limit {
            Some(n) => &self.managed_ids[..n.min(self.managed_ids.len())],
            None => &self.managed_ids,
        }
    }

    /// Fold a tick's action results into the fleet.
    ///
    /// Terminated ids leave the managed set and new ids join it in launch
    /// order. The launch counter grows by every launch the action was
    /// charged for, including instances that never became ready and
    /// attempts whose outcome is unknown; those never join the set.
    pub fn apply_results(&mut self, results: &[ActionResult]) {
        for result in results {
            if let Some(ref gone) = result.terminated {
                self.managed_ids.retain(|id| id != gone);
            }
            for id in &result.new_instance_ids {
                if self.managed_ids.contains(id) {
                    warn!(instance = %id, "launched id already managed, ignoring duplicate");
                    continue;
                }
                self.managed_ids.push(id.clone());
            }
            self.total_ever_launched = self
                .total_ever_launched
                .saturating_add(result.launches_charged());
        }
        debug!(
            managed = self.managed_ids.len(),
            total_ever_launched = self.total_ever_launched,
            "fleet state updated"
        );
    }

    /// Drop managed ids the backend no longer reports as running.
    ///
    /// Returns the dropped ids. The launch counter is left untouched.
    pub fn retain_running(&mut self, running: &HashSet<InstanceId>) -> Vec<InstanceId> {
        let (kept, dropped): (Vec<_>, Vec<_>) = self
            .managed_ids
            .drain(..)
            .partition(|id| running.contains(id));
        self.managed_ids = kept;
        dropped
    }
}
