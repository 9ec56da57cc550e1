//! Control loop: drives the sample/decide/act/notify cycle.
//!
//! The loop owns [`FleetState`] exclusively. Within a tick, probing runs in
//! parallel; actions run one at a time in decision order.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use fleet_autoscale::{decide, Decision};
use fleet_core::{epoch_secs, Action, ActionResult, CapBehavior, FleetState, InstanceId, Policy};
use fleet_notify::Notifier;
use fleet_probe::{sample_all, ProbeOutcome, UtilizationProbe};
use fleet_provision::{
    LaunchReport, LaunchedInstance, Ledger, LedgerEntry, NamingContext, ProvisionError, Provisioner,
};

use crate::error::ControllerError;
use crate::summary::Summary;

/// Where the loop is within a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Idle,
    Sampling,
    Deciding,
    Acting,
    Notifying,
    /// A breach found no launch budget. Terminal: the loop never acts again.
    Capped,
}

/// What a completed tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Fewer than `min_population` managed instances; nothing sampled.
    InsufficientPopulation,
    /// Sampled, nothing to do.
    NoBreach,
    /// At least one action was executed.
    Acted,
    /// A breach could not be answered because the launch cap is spent.
    Capped,
}

/// Why [`ControlLoop::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Cancelled,
    Capped,
}

#[derive(Debug, Clone)]
pub struct TickReport {
    pub outcome: TickOutcome,
    pub samples: Vec<ProbeOutcome>,
    pub decision: Decision,
    pub results: Vec<ActionResult>,
    /// Managed ids dropped because the backend no longer lists them.
    pub reconciled: Vec<InstanceId>,
    /// Delivery id of the tick's notification, if one was sent.
    pub notification: Option<String>,
}

impl TickReport {
    fn new(outcome: TickOutcome) -> Self {
        Self {
            outcome,
            samples: Vec::new(),
            decision: Decision::default(),
            results: Vec::new(),
            reconciled: Vec::new(),
            notification: None,
        }
    }
}

/// Timeouts, fan-out and naming for a loop.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub probe_timeout: Duration,
    pub probe_concurrency: usize,
    /// Bound on list, terminate and networking calls.
    pub call_timeout: Duration,
    /// Bound on launching one instance, readiness wait included. A launch
    /// call is abandoned after `launch_timeout + call_timeout` per instance.
    pub launch_timeout: Duration,
    pub name_prefix: String,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(10),
            probe_concurrency: 4,
            call_timeout: Duration::from_secs(60),
            launch_timeout: Duration::from_secs(300),
            name_prefix: "fleet-auto".to_string(),
        }
    }
}

/// Writes a ledger row for every instance the loop creates.
#[derive(Debug, Clone)]
pub struct LedgerRecorder {
    pub ledger: Ledger,
    pub transport: String,
    pub username: String,
    pub password: Option<String>,
}

impl LedgerRecorder {
    /// Best effort: a failed write is logged and the instance is kept.
    fn record(&self, instance: &LaunchedInstance, address: Option<&str>) {
        let entry = LedgerEntry {
            instance_id: instance.id.clone(),
            name: instance.name.clone(),
            transport: self.transport.clone(),
            address: address
                .or(instance.address.as_deref())
                .unwrap_or_default()
                .to_string(),
            username: self.username.clone(),
            password: self.password.clone(),
        };
        if let Err(e) = self.ledger.append(&entry) {
            warn!(instance = %instance.id, error = %e, "ledger write failed");
        }
    }
}

pub struct ControlLoop {
    policy: Policy,
    settings: LoopSettings,
    fleet: FleetState,
    phase: LoopPhase,
    probe: Arc<dyn UtilizationProbe>,
    provisioner: Arc<dyn Provisioner>,
    notifier: Arc<dyn Notifier>,
    ledger: Option<LedgerRecorder>,
}

impl ControlLoop {
    pub fn new(
        policy: Policy,
        fleet: FleetState,
        probe: Arc<dyn UtilizationProbe>,
        provisioner: Arc<dyn Provisioner>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            policy,
            settings: LoopSettings::default(),
            fleet,
            phase: LoopPhase::Idle,
            probe,
            provisioner,
            notifier,
            ledger: None,
        }
    }

    pub fn with_settings(mut self, settings: LoopSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_ledger(mut self, ledger: LedgerRecorder) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn fleet(&self) -> &FleetState {
        &self.fleet
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Tick every `poll_interval` until `shutdown` flips, or until the cap
    /// is hit under `on_cap = exit`. An in-flight tick always completes.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> LoopExit {
        info!(
            interval_secs = self.policy.poll_interval.as_secs(),
            threshold = self.policy.threshold,
            max_fleet_size = self.policy.max_fleet_size,
            managed = self.fleet.len(),
            "control loop started"
        );

        loop {
            if *shutdown.borrow() {
                info!("control loop shutting down");
                return LoopExit::Cancelled;
            }

            match self.tick().await {
                Ok(report) => {
                    if self.phase == LoopPhase::Capped
                        && self.policy.on_cap == CapBehavior::Exit
                    {
                        info!(
                            outcome = ?report.outcome,
                            total_ever_launched = self.fleet.total_ever_launched(),
                            "launch cap reached, control loop exiting"
                        );
                        return LoopExit::Capped;
                    }
                }
                Err(e) => error!(error = %e, "tick failed, retrying next interval"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.policy.poll_interval) => {}
                _ = shutdown.changed() => {
                    info!("control loop shutting down");
                    return LoopExit::Cancelled;
                }
            }
        }
    }

    /// Run one full cycle against the current fleet.
    pub async fn tick(&mut self) -> Result<TickReport, ControllerError> {
        let capped = self.phase == LoopPhase::Capped;
        if !capped {
            self.phase = LoopPhase::Sampling;
        }

        let reconciled = match self.reconcile().await {
            Ok(dropped) => dropped,
            Err(e) => {
                if !capped {
                    self.phase = LoopPhase::Idle;
                }
                return Err(e);
            }
        };

        if self.fleet.len() < self.policy.min_population {
            info!(
                managed = self.fleet.len(),
                min = self.policy.min_population,
                "not enough instances to evaluate, skipping tick"
            );
            if !capped {
                self.phase = LoopPhase::Idle;
            }
            let mut report = TickReport::new(TickOutcome::InsufficientPopulation);
            report.reconciled = reconciled;
            return Ok(report);
        }

        let ids = self.fleet.monitored(self.policy.max_monitored).to_vec();
        let samples = sample_all(
            self.probe.clone(),
            &ids,
            self.settings.probe_timeout,
            self.settings.probe_concurrency,
        )
        .await;
        log_samples(&samples);

        if capped {
            debug!("launch cap reached earlier, sampling only");
            let mut report = TickReport::new(TickOutcome::Capped);
            report.samples = samples;
            report.reconciled = reconciled;
            return Ok(report);
        }

        self.phase = LoopPhase::Deciding;
        let decision = decide(&samples, &self.fleet, &self.policy);
        if !decision.deferred.is_empty() {
            info!(deferred = ?decision.deferred, "breaches deferred to a later tick");
        }

        let mut report = TickReport::new(TickOutcome::NoBreach);
        report.reconciled = reconciled;

        if decision.is_empty() {
            if decision.cap_reached {
                warn!(
                    total_ever_launched = self.fleet.total_ever_launched(),
                    max_fleet_size = self.policy.max_fleet_size,
                    "breach detected but launch cap reached"
                );
                self.phase = LoopPhase::Capped;
                report.outcome = TickOutcome::Capped;
            } else {
                self.phase = LoopPhase::Idle;
            }
            report.samples = samples;
            report.decision = decision;
            return Ok(report);
        }

        self.phase = LoopPhase::Acting;
        let results = self.execute(&decision.actions).await;
        self.fleet.apply_results(&results);
        info!(
            managed = ?self.fleet.managed_ids(),
            total_ever_launched = self.fleet.total_ever_launched(),
            "fleet updated"
        );

        self.phase = LoopPhase::Notifying;
        report.notification = self.notify(&results).await;

        report.outcome = TickOutcome::Acted;
        if decision.cap_reached {
            warn!(
                max_fleet_size = self.policy.max_fleet_size,
                "launch cap reached during this tick"
            );
            self.phase = LoopPhase::Capped;
        } else {
            self.phase = LoopPhase::Idle;
        }
        report.samples = samples;
        report.decision = decision;
        report.results = results;
        Ok(report)
    }

    /// Drop managed ids the backend no longer runs.
    async fn reconcile(&mut self) -> Result<Vec<InstanceId>, ControllerError> {
        let running = tokio::time::timeout(self.settings.call_timeout, self.provisioner.list_running())
            .await
            .map_err(|_| {
                ControllerError::Snapshot(format!(
                    "list timed out after {}s",
                    self.settings.call_timeout.as_secs()
                ))
            })?
            .map_err(|e| ControllerError::Snapshot(e.to_string()))?;

        let running: HashSet<InstanceId> = running.into_iter().collect();
        let dropped = self.fleet.retain_running(&running);
        for id in &dropped {
            warn!(instance = %id, "managed instance no longer running, dropped from fleet");
        }
        Ok(dropped)
    }

    async fn execute(&self, actions: &[Action]) -> Vec<ActionResult> {
        let mut results = Vec::with_capacity(actions.len());
        // Launch ordinals continue from the counter across the whole tick.
        let mut next_ordinal = self.fleet.total_ever_launched() + 1;

        for action in actions {
            info!(%action, "executing action");
            let mut result = ActionResult::new(action.clone());

            if let Action::Replace { target } = action {
                match self.terminate(target).await {
                    Ok(()) => {
                        info!(instance = %target, "instance stopped");
                        result.terminated = Some(target.clone());
                    }
                    Err(e) => {
                        warn!(instance = %target, error = %e, "stop failed, launching replacement anyway");
                        result.errors.push(format!("terminate {target}: {e}"));
                    }
                }
            }

            let count = action.launch_count();
            let naming = NamingContext::new(&self.settings.name_prefix, next_ordinal);
            let (report, unaccounted) = self.launch(count, &naming).await;

            for error in &report.failures {
                warn!(%action, error = %error, "launch failed");
                result.errors.push(format!("launch: {error}"));
            }
            for id in &report.created_unready {
                match self.terminate(id).await {
                    Ok(()) => info!(instance = %id, "stopped instance that never became ready"),
                    Err(e) => {
                        warn!(
                            instance = %id,
                            error = %e,
                            "instance never became ready and could not be stopped, left running"
                        );
                        result.errors.push(format!("orphan {id} left running: {e}"));
                    }
                }
            }
            result.unready_ids = report.created_unready.clone();
            result.unaccounted_launches = unaccounted;
            if unaccounted > 0 {
                warn!(
                    %action,
                    unaccounted,
                    "launch abandoned, charging the attempts against the launch cap"
                );
            }
            for instance in report.launched {
                let address = self.attach(&instance.id).await;
                info!(
                    instance = %instance.id,
                    name = %instance.name,
                    address = address.as_deref().or(instance.address.as_deref()).unwrap_or("-"),
                    "instance ready"
                );
                if let Some(ledger) = &self.ledger {
                    ledger.record(&instance, address.as_deref());
                }
                result.new_instance_ids.push(instance.id);
            }
            next_ordinal += result.launches_charged();

            if let Some(error) = result.error() {
                warn!(%action, %error, "action finished with errors");
            }
            results.push(result);
        }
        results
    }

    async fn terminate(&self, id: &str) -> Result<(), ProvisionError> {
        tokio::time::timeout(self.settings.call_timeout, self.provisioner.terminate(id))
            .await
            .map_err(|_| ProvisionError::Backend(format!("stop {id} timed out")))?
    }

    /// Launch `count` instances. Never returns more than `count` ready
    /// instances.
    ///
    /// The second value is the number of attempts with an unknown outcome:
    /// all of `count` when the call is abandoned, since the backend may
    /// have created instances before it was dropped.
    async fn launch(&self, count: u32, naming: &NamingContext) -> (LaunchReport, u32) {
        let per_instance = self.settings.launch_timeout.saturating_add(self.settings.call_timeout);
        let limit = per_instance.saturating_mul(count.max(1));
        let mut report = match tokio::time::timeout(limit, self.provisioner.launch(count, naming)).await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => LaunchReport::from(e),
            Err(_) => {
                let report = LaunchReport::from(ProvisionError::Backend(format!(
                    "launch of {count} timed out after {}s",
                    limit.as_secs()
                )));
                return (report, count);
            }
        };
        if report.launched.len() > count as usize {
            warn!(
                requested = count,
                returned = report.launched.len(),
                "provisioner returned extra instances, ignoring the surplus"
            );
            report.launched.truncate(count as usize);
        }
        (report, 0)
    }

    /// Best-effort networking step.
    async fn attach(&self, id: &str) -> Option<String> {
        match tokio::time::timeout(self.settings.call_timeout, self.provisioner.attach_networking(id)).await {
            Ok(Ok(address)) => address,
            Ok(Err(e)) => {
                warn!(instance = %id, error = %e, "networking step failed");
                None
            }
            Err(_) => {
                warn!(instance = %id, "networking step timed out");
                None
            }
        }
    }

    /// Send the tick's notification. Failures are logged and dropped.
    async fn notify(&self, results: &[ActionResult]) -> Option<String> {
        let summary = Summary::build(results, &self.fleet, &self.policy, epoch_secs());
        match self.notifier.publish(&summary.subject, &summary.body).await {
            Ok(id) => {
                info!(delivery = %id, "notification sent");
                Some(id)
            }
            Err(e) => {
                warn!(error = %e, "notification failed");
                None
            }
        }
    }
}

fn log_samples(samples: &[ProbeOutcome]) {
    let readings: Vec<String> = samples
        .iter()
        .filter_map(|o| {
            o.result
                .as_ref()
                .ok()
                .map(|s| format!("{}={:.1}%", o.instance_id, s.percent_busy))
        })
        .collect();
    let failed = samples.len() - readings.len();
    info!(sampled = readings.len(), failed, readings = %readings.join(" "), "tick sampled");
}
