//! In-memory probe, provisioner and notifier for loop scenarios.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use fleet_core::{epoch_secs, InstanceId, UtilizationSample};
use fleet_notify::{NotifyError, NotifyFuture, Notifier};
use fleet_probe::{ProbeError, ProbeFuture, UtilizationProbe};
use fleet_provision::{
    LaunchReport, LaunchedInstance, NamingContext, ProvisionError, ProvisionFuture, Provisioner,
};

#[derive(Default)]
pub struct FakeProbe {
    readings: Mutex<HashMap<String, Result<f64, ProbeError>>>,
    calls: AtomicU32,
}

impl FakeProbe {
    pub fn new(readings: &[(&str, f64)]) -> Self {
        let probe = Self::default();
        for (id, busy) in readings {
            probe.set(id, *busy);
        }
        probe
    }

    pub fn set(&self, id: &str, busy: f64) {
        self.readings.lock().unwrap().insert(id.to_string(), Ok(busy));
    }

    pub fn fail(&self, id: &str, error: ProbeError) {
        self.readings.lock().unwrap().insert(id.to_string(), Err(error));
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl UtilizationProbe for FakeProbe {
    fn name(&self) -> &str {
        "fake"
    }

    fn sample<'a>(&'a self, instance_id: &'a str) -> ProbeFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reading = self
                .readings
                .lock()
                .unwrap()
                .get(instance_id)
                .cloned()
                .unwrap_or(Err(ProbeError::NoData));
            reading.map(|busy| UtilizationSample::new(instance_id, busy, epoch_secs()))
        })
    }
}

#[derive(Default)]
struct Backend {
    running: Vec<InstanceId>,
    stopped: HashSet<InstanceId>,
    next_ids: VecDeque<InstanceId>,
    minted: u32,
    stop_calls: Vec<InstanceId>,
    launched_names: Vec<String>,
    fail_stop: HashSet<InstanceId>,
    fail_launch: bool,
    never_ready: bool,
    hang_launch: bool,
    fail_list: bool,
    list_calls: u32,
}

/// Provisioner whose running set is a plain list.
#[derive(Default)]
pub struct FakeProvisioner {
    backend: Mutex<Backend>,
}

impl FakeProvisioner {
    pub fn new(running: &[&str]) -> Self {
        let p = Self::default();
        p.backend.lock().unwrap().running = running.iter().map(|s| s.to_string()).collect();
        p
    }

    /// Ids handed out to the next launches, in order.
    pub fn with_next_ids(self, ids: &[&str]) -> Self {
        self.backend.lock().unwrap().next_ids = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn fail_stop(&self, id: &str) {
        self.backend.lock().unwrap().fail_stop.insert(id.to_string());
    }

    pub fn fail_launch(&self) {
        self.backend.lock().unwrap().fail_launch = true;
    }

    /// Launched instances are created but never reach the ready state.
    pub fn never_ready(&self) {
        self.backend.lock().unwrap().never_ready = true;
    }

    /// Launch creates its instances, then never returns.
    pub fn hang_launch(&self) {
        self.backend.lock().unwrap().hang_launch = true;
    }

    /// Instances created on the backend so far, ready or not.
    pub fn minted(&self) -> u32 {
        self.backend.lock().unwrap().minted
    }

    pub fn fail_list(&self, fail: bool) {
        self.backend.lock().unwrap().fail_list = fail;
    }

    pub fn vanish(&self, id: &str) {
        self.backend.lock().unwrap().running.retain(|r| r != id);
    }

    pub fn running(&self) -> Vec<InstanceId> {
        self.backend.lock().unwrap().running.clone()
    }

    pub fn stop_calls(&self) -> Vec<InstanceId> {
        self.backend.lock().unwrap().stop_calls.clone()
    }

    pub fn launched_names(&self) -> Vec<String> {
        self.backend.lock().unwrap().launched_names.clone()
    }

    pub fn list_calls(&self) -> u32 {
        self.backend.lock().unwrap().list_calls
    }
}

impl Provisioner for FakeProvisioner {
    fn list_running(&self) -> ProvisionFuture<'_, Vec<InstanceId>> {
        Box::pin(async move {
            let mut b = self.backend.lock().unwrap();
            b.list_calls += 1;
            if b.fail_list {
                return Err(ProvisionError::Backend("api unavailable".to_string()));
            }
            Ok(b.running.clone())
        })
    }

    fn terminate<'a>(&'a self, id: &'a str) -> ProvisionFuture<'a, ()> {
        Box::pin(async move {
            let mut b = self.backend.lock().unwrap();
            if b.fail_stop.contains(id) {
                return Err(ProvisionError::Backend(format!("cannot stop {id}")));
            }
            if !b.stopped.insert(id.to_string()) {
                return Ok(());
            }
            b.stop_calls.push(id.to_string());
            b.running.retain(|r| r != id);
            Ok(())
        })
    }

    fn launch<'a>(&'a self, count: u32, naming: &'a NamingContext) -> ProvisionFuture<'a, LaunchReport> {
        Box::pin(async move {
            let (report, hang) = {
                let mut b = self.backend.lock().unwrap();
                if b.fail_launch {
                    return Err(ProvisionError::CreateFailed("quota exceeded".to_string()));
                }
                let mut report = LaunchReport::default();
                for index in 0..count {
                    b.minted += 1;
                    let minted = b.minted;
                    let id = b.next_ids.pop_front().unwrap_or_else(|| format!("new-{minted}"));
                    let name = naming.name_for(index);
                    b.running.push(id.clone());
                    b.launched_names.push(name.clone());
                    if b.never_ready {
                        report.failures.push(ProvisionError::StateTimeout {
                            id: id.clone(),
                            state: "ACTIVE".to_string(),
                        });
                        report.created_unready.push(id);
                    } else {
                        report.launched.push(LaunchedInstance {
                            id,
                            name,
                            address: None,
                        });
                    }
                }
                (report, b.hang_launch)
            };
            if hang {
                std::future::pending::<()>().await;
            }
            Ok(report)
        })
    }

    fn attach_networking<'a>(&'a self, id: &'a str) -> ProvisionFuture<'a, Option<String>> {
        Box::pin(async move { Ok(Some(format!("10.0.0.{}", id.len()))) })
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl FakeNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for FakeNotifier {
    fn publish<'a>(&'a self, subject: &'a str, body: &'a str) -> NotifyFuture<'a> {
        Box::pin(async move {
            if self.fail {
                return Err(NotifyError::Transport("topic missing".to_string()));
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push((subject.to_string(), body.to_string()));
            Ok(format!("msg-{}", sent.len()))
        })
    }
}
