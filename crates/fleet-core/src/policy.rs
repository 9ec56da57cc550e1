//! Resolved control-loop policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a breach is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingStrategy {
    /// Stop the breaching instance and launch one replacement.
    #[default]
    Replace,
    /// Leave the breaching instance running and launch new capacity.
    ScaleOut,
}

/// What the loop does once the launch cap is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapBehavior {
    /// Stop the loop.
    #[default]
    Exit,
    /// Keep sampling and logging, never act again.
    KeepSampling,
}

/// Policy the control loop runs with. Fixed for the loop's lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    /// Utilization percentage at or above which an instance breaches.
    pub threshold: f64,
    /// Maximum number of instances the controller may ever create.
    pub max_fleet_size: u32,
    /// Breaching instances acted on per tick.
    pub instances_per_breach_batch: u32,
    pub poll_interval: Duration,
    pub strategy: ScalingStrategy,
    pub on_cap: CapBehavior,
    /// Managed instances required before a tick decides anything.
    pub min_population: usize,
    /// Sample only the first N managed instances.
    pub max_monitored: Option<usize>,
}

impl Policy {
    /// A replace-on-breach policy with the remaining knobs at defaults.
    pub fn new(threshold: f64, max_fleet_size: u32, instances_per_breach_batch: u32) -> Self {
        Self {
            threshold,
            max_fleet_size,
            instances_per_breach_batch,
            poll_interval: Duration::from_secs(40),
            strategy: ScalingStrategy::Replace,
            on_cap: CapBehavior::Exit,
            min_population: 2,
            max_monitored: None,
        }
    }

    pub fn with_strategy(mut self, strategy: ScalingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_on_cap(mut self, on_cap: CapBehavior) -> Self {
        self.on_cap = on_cap;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_min_population(mut self, min: usize) -> Self {
        self.min_population = min;
        self
    }
}
