//! Probe contract and parallel per-tick sampling.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use fleet_core::{InstanceId, UtilizationSample};

/// Why a probe produced no sample.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// The metrics window holds no data point.
    #[error("no data in metrics window")]
    NoData,

    #[error("connect failure: {0}")]
    ConnectFailure(String),

    #[error("parse failure: {0}")]
    ParseFailure(String),

    #[error("probe timed out")]
    Timeout,

    /// The probe task panicked or was cancelled.
    #[error("probe aborted: {0}")]
    Aborted(String),
}

/// Boxed future returned by [`UtilizationProbe::sample`].
pub type ProbeFuture<'a> =
    Pin<Box<dyn Future<Output = Result<UtilizationSample, ProbeError>> + Send + 'a>>;

/// Measures utilization of one instance.
///
/// Implementations must not touch fleet state; they only read.
pub trait UtilizationProbe: Send + Sync {
    /// Short strategy name for logs.
    fn name(&self) -> &str;

    fn sample<'a>(&'a self, instance_id: &'a str) -> ProbeFuture<'a>;
}

/// Result of probing one instance during a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub instance_id: InstanceId,
    pub result: Result<UtilizationSample, ProbeError>,
}

impl ProbeOutcome {
    pub fn ok(sample: UtilizationSample) -> Self {
        Self {
            instance_id: sample.instance_id.clone(),
            result: Ok(sample),
        }
    }

    pub fn err(instance_id: impl Into<InstanceId>, error: ProbeError) -> Self {
        Self {
            instance_id: instance_id.into(),
            result: Err(error),
        }
    }
}

/// Run one probe, mapping an elapsed deadline to [`ProbeError::Timeout`].
pub async fn sample_with_timeout(
    probe: &dyn UtilizationProbe,
    instance_id: &str,
    timeout: Duration,
) -> Result<UtilizationSample, ProbeError> {
    match tokio::time::timeout(timeout, probe.sample(instance_id)).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout),
    }
}

/// Probe every id in parallel and return outcomes in input order.
///
/// At most `concurrency` probes run at once. Every id gets exactly one
/// outcome; a failure on one id never affects the others.
pub async fn sample_all(
    probe: Arc<dyn UtilizationProbe>,
    ids: &[InstanceId],
    timeout: Duration,
    concurrency: usize,
) -> Vec<ProbeOutcome> {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (index, id) in ids.iter().cloned().enumerate() {
        let probe = Arc::clone(&probe);
        let permits = Arc::clone(&permits);
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            let result = sample_with_timeout(probe.as_ref(), &id, timeout).await;
            (index, id, result)
        });
    }

    let mut slots: Vec<Option<ProbeOutcome>> = (0..ids.len()).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, instance_id, result)) => {
                match &result {
                    Ok(sample) => debug!(
                        instance = %instance_id,
                        probe = probe.name(),
                        busy = sample.percent_busy,
                        "probe sampled"
                    ),
                    Err(e) => warn!(
                        instance = %instance_id,
                        probe = probe.name(),
                        error = %e,
                        "probe failed"
                    ),
                }
                slots[index] = Some(ProbeOutcome {
                    instance_id,
                    result,
                });
            }
            Err(e) => error!(error = %e, "probe task did not complete"),
        }
    }

    slots
        .into_iter()
        .zip(ids)
        .map(|(slot, id)| {
            slot.unwrap_or_else(|| {
                ProbeOutcome::err(id.clone(), ProbeError::Aborted("task failed".to_string()))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Probe that answers from a fixed table, optionally sleeping first.
    struct TableProbe {
        values: HashMap<String, Result<f64, ProbeError>>,
        delay: HashMap<String, Duration>,
    }

    impl TableProbe {
        fn new(entries: &[(&str, Result<f64, ProbeError>)]) -> Self {
            Self {
                values: entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
                delay: HashMap::new(),
            }
        }
    }

    impl UtilizationProbe for TableProbe {
        fn name(&self) -> &str {
            "table"
        }

        fn sample<'a>(&'a self, instance_id: &'a str) -> ProbeFuture<'a> {
            Box::pin(async move {
                if let Some(d) = self.delay.get(instance_id) {
                    tokio::time::sleep(*d).await;
                }
                match self.values.get(instance_id) {
                    Some(Ok(v)) => Ok(UtilizationSample::new(instance_id, *v, 1000)),
                    Some(Err(e)) => Err(e.clone()),
                    None => Err(ProbeError::NoData),
                }
            })
        }
    }

    fn ids(v: &[&str]) -> Vec<InstanceId> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn outcomes_keep_input_order() {
        let mut probe = TableProbe::new(&[("a", Ok(10.0)), ("b", Ok(20.0)), ("c", Ok(30.0))]);
        // Make the first finish last.
        probe.delay.insert("a".to_string(), Duration::from_millis(30));
        let probe: Arc<dyn UtilizationProbe> = Arc::new(probe);

        let outcomes = sample_all(probe, &ids(&["a", "b", "c"]), Duration::from_secs(1), 3).await;
        let order: Vec<_> = outcomes.iter().map(|o| o.instance_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(outcomes[0].result.as_ref().unwrap().percent_busy, 10.0);
    }

    #[tokio::test]
    async fn one_failure_does_not_hide_others() {
        let probe: Arc<dyn UtilizationProbe> = Arc::new(TableProbe::new(&[
            ("a", Ok(45.0)),
            ("b", Err(ProbeError::ConnectFailure("refused".to_string()))),
        ]));

        let outcomes = sample_all(probe, &ids(&["a", "b"]), Duration::from_secs(1), 2).await;
        assert!(outcomes[0].result.is_ok());
        assert_eq!(
            outcomes[1].result,
            Err(ProbeError::ConnectFailure("refused".to_string()))
        );
    }

    #[tokio::test]
    async fn slow_probe_times_out() {
        let mut probe = TableProbe::new(&[("a", Ok(10.0)), ("slow", Ok(99.0))]);
        probe
            .delay
            .insert("slow".to_string(), Duration::from_secs(5));
        let probe: Arc<dyn UtilizationProbe> = Arc::new(probe);

        let outcomes =
            sample_all(probe, &ids(&["a", "slow"]), Duration::from_millis(50), 1).await;
        assert!(outcomes[0].result.is_ok());
        assert_eq!(outcomes[1].result, Err(ProbeError::Timeout));
    }

    #[tokio::test]
    async fn empty_id_list_yields_nothing() {
        let probe: Arc<dyn UtilizationProbe> = Arc::new(TableProbe::new(&[]));
        assert!(sample_all(probe, &[], Duration::from_secs(1), 4).await.is_empty());
    }

    #[test]
    fn outcome_constructors() {
        let ok = ProbeOutcome::ok(UtilizationSample::new("a", 50.0, 1));
        assert_eq!(ok.instance_id, "a");
        let err = ProbeOutcome::err("b", ProbeError::NoData);
        assert_eq!(err.result, Err(ProbeError::NoData));
    }
}
