//! Decision engine: turns a tick's samples into fleet actions.

use tracing::debug;

use fleet_core::{Action, FleetState, InstanceId, Policy, ScalingStrategy, UtilizationSample};
use fleet_probe::ProbeOutcome;

/// Actions for one tick plus what was left undone.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Decision {
    /// Actions to execute, in order.
    pub actions: Vec<Action>,
    /// Breaching instances beyond the per-tick batch, left for a later tick.
    pub deferred: Vec<InstanceId>,
    /// A breach went unanswered because the launch cap is exhausted.
    pub cap_reached: bool,
}

impl Decision {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Decide the tick's actions under `policy.strategy`.
pub fn decide(samples: &[ProbeOutcome], fleet: &FleetState, policy: &Policy) -> Decision {
    match policy.strategy {
        ScalingStrategy::Replace => decide_replace(samples, fleet, policy),
        ScalingStrategy::ScaleOut => decide_scale_out(samples, fleet, policy),
    }
}

/// Stop-and-replace path: one `Replace` per acted-on breach while the
/// launch budget lasts.
pub fn decide_replace(samples: &[ProbeOutcome], fleet: &FleetState, policy: &Policy) -> Decision {
    let (acted, deferred) = split_breaches(samples, fleet, policy);
    let mut budget = fleet.remaining_launches(policy.max_fleet_size);
    let mut decision = Decision {
        deferred,
        ..Decision::default()
    };

    for sample in acted {
        if budget == 0 {
            debug!(
                instance = %sample.instance_id,
                busy = sample.percent_busy,
                cap = policy.max_fleet_size,
                "breach ignored: launch cap reached"
            );
            decision.cap_reached = true;
            continue;
        }
        budget -= 1;
        debug!(
            instance = %sample.instance_id,
            busy = sample.percent_busy,
            threshold = policy.threshold,
            "breach: replacing"
        );
        decision.actions.push(Action::Replace {
            target: sample.instance_id.clone(),
        });
    }
    decision
}

/// Grow-only path: acted-on breaches become one `ScaleOut`, clamped to the
/// launch budget.
pub fn decide_scale_out(
    samples: &[ProbeOutcome],
    fleet: &FleetState,
    policy: &Policy,
) -> Decision {
    let (acted, deferred) = split_breaches(samples, fleet, policy);
    let wanted = acted.len() as u32;
    let count = wanted.min(fleet.remaining_launches(policy.max_fleet_size));

    let mut decision = Decision {
        deferred,
        ..Decision::default()
    };
    if count > 0 {
        debug!(
            breaches = wanted,
            count,
            threshold = policy.threshold,
            "breach: scaling out"
        );
        decision.actions.push(Action::ScaleOut { count });
    }
    if count < wanted {
        debug!(
            wanted,
            count,
            cap = policy.max_fleet_size,
            "scale-out clamped: launch cap reached"
        );
        decision.cap_reached = true;
    }
    decision
}

/// Breaching samples in input order, split at the batch size.
///
/// Failed probes, unmanaged ids, and repeat samples for an id are skipped.
fn split_breaches<'a>(
    samples: &'a [ProbeOutcome],
    fleet: &FleetState,
    policy: &Policy,
) -> (Vec<&'a UtilizationSample>, Vec<InstanceId>) {
    let mut seen: Vec<&str> = Vec::new();
    let mut breaches: Vec<&UtilizationSample> = Vec::new();

    for outcome in samples {
        let Ok(sample) = &outcome.result else {
            continue;
        };
        if !fleet.contains(&sample.instance_id) {
            debug!(instance = %sample.instance_id, "sample for unmanaged instance ignored");
            continue;
        }
        if seen.contains(&sample.instance_id.as_str()) {
            continue;
        }
        seen.push(&sample.instance_id);
        if sample.percent_busy >= policy.threshold {
            breaches.push(sample);
        }
    }

    let batch = (policy.instances_per_breach_batch as usize).min(breaches.len());
    let deferred = breaches[batch..]
        .iter()
        .map(|s| s.instance_id.clone())
        .collect();
    breaches.truncate(batch);
    (breaches, deferred)
}
