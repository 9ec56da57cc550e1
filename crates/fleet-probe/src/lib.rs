//! fleet-probe: utilization sampling for managed instances.
//!
//! Two strategies sit behind the one [`UtilizationProbe`] contract:
//!
//! ```text
//! UtilizationProbe::sample(instance_id)
//!   ├── MetricsProbe     → MetricsSource::query(window) → latest point
//!   └── RemoteExecProbe  → HostResolver → RemoteExec::exec(command)
//!                          → parse_utilization(output)
//! ```
//!
//! [`sample_all`] fans a tick's probes out in parallel, applies the
//! per-probe timeout, and hands results back in input order. A failed
//! probe is reported as a [`ProbeError`], never as 0% utilization.

pub mod metrics;
pub mod parser;
pub mod probe;
pub mod remote;
pub mod ssh;

pub use metrics::{DataPoint, HttpMetricsSource, MetricsProbe, MetricsQuery, MetricsSource};
pub use parser::{parse_idle_percent, parse_utilization, ParseError};
pub use probe::{sample_all, sample_with_timeout, ProbeError, ProbeFuture, ProbeOutcome, UtilizationProbe};
pub use remote::{ConnectionDescriptor, ExecError, HostResolver, RemoteExec, RemoteExecProbe, StaticHosts};
pub use ssh::SshTransport;
