//! Shared types used across fleet crates.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Identifier assigned to an instance by the provisioning backend.
pub type InstanceId = String;

/// One utilization measurement for one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSample {
    pub instance_id: InstanceId,
    /// Busy percentage, 0.0–100.0.
    pub percent_busy: f64,
    /// Unix timestamp (seconds) at which the value was observed.
    pub observed_at: u64,
}

impl UtilizationSample {
    /// Build a sample, clamping the value into `[0, 100]`.
    pub fn new(instance_id: impl Into<InstanceId>, percent_busy: f64, observed_at: u64) -> Self {
        Self {
            instance_id: instance_id.into(),
            percent_busy: percent_busy.clamp(0.0, 100.0),
            observed_at,
        }
    }
}

/// A fleet change decided for one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Stop `target` and launch exactly one replacement.
    Replace { target: InstanceId },
    /// Launch `count` new instances without stopping anything.
    ScaleOut { count: u32 },
}

impl Action {
    /// Number of instances this action launches.
    pub fn launch_count(&self) -> u32 {
        match self {
            Action::Replace { .. } => 1,
            Action::ScaleOut { count } => *count,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Replace { target } => write!(f, "replace {target}"),
            Action::ScaleOut { count } => write!(f, "scale out by {count}"),
        }
    }
}

/// Outcome of executing one [`Action`].
///
/// For `Replace`, the terminate and launch halves are reported
/// independently: `terminated` is `None` when the stop failed, and
/// `new_instance_ids` may still be populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub action: Action,
    /// Instance stopped by this action, if the stop succeeded.
    pub terminated: Option<InstanceId>,
    /// Ready instances created by this action, in launch order.
    pub new_instance_ids: Vec<InstanceId>,
    /// Instances the backend created that never became ready.
    #[serde(default)]
    pub unready_ids: Vec<InstanceId>,
    /// Launch attempts whose outcome is unknown (the call was abandoned).
    #[serde(default)]
    pub unaccounted_launches: u32,
    /// Per-step failures (terminate, launch, networking).
    pub errors: Vec<String>,
}

impl ActionResult {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            terminated: None,
            new_instance_ids: Vec::new(),
            unready_ids: Vec::new(),
            unaccounted_launches: 0,
            errors: Vec::new(),
        }
    }

    /// Launches this action spends from the lifetime budget: ready,
    /// unready and unaccounted alike.
    pub fn launches_charged(&self) -> u32 {
        let created = self.new_instance_ids.len() + self.unready_ids.len();
        (created as u32).saturating_add(self.unaccounted_launches)
    }

    /// Combined error text, `None` when every step succeeded.
    pub fn error(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.join("; "))
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
