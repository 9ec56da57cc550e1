//! Metrics-API probe strategy.
//!
//! Queries a metrics store for the trailing window and keeps only the most
//! recent data point. An empty window is [`ProbeError::NoData`]; the caller
//! decides what that means.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use serde::{Deserialize, Serialize};
use tracing::debug;

use fleet_core::{epoch_secs, InstanceId, UtilizationSample};

use crate::probe::{ProbeError, ProbeFuture, UtilizationProbe};

/// One point of a metric series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    pub value: f64,
}

/// A series query for one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsQuery {
    pub instance_id: InstanceId,
    pub start: u64,
    pub end: u64,
    pub period_secs: u64,
    /// Statistic name, e.g. `Average` or `Maximum`.
    pub aggregation: String,
}

pub type QueryFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<DataPoint>, ProbeError>> + Send + 'a>>;

/// A read-only metrics store.
pub trait MetricsSource: Send + Sync {
    fn query<'a>(&'a self, query: &'a MetricsQuery) -> QueryFuture<'a>;
}

/// Samples utilization from a [`MetricsSource`].
pub struct MetricsProbe<S> {
    source: S,
    window: Duration,
    period_secs: u64,
    aggregation: String,
}

impl<S: MetricsSource> MetricsProbe<S> {
    pub fn new(source: S, window: Duration, period_secs: u64, aggregation: &str) -> Self {
        Self {
            source,
            window,
            period_secs,
            aggregation: aggregation.to_string(),
        }
    }

    fn build_query(&self, instance_id: &str, now: u64) -> MetricsQuery {
        MetricsQuery {
            instance_id: instance_id.to_string(),
            start: now.saturating_sub(self.window.as_secs()),
            end: now,
            period_secs: self.period_secs,
            aggregation: self.aggregation.clone(),
        }
    }
}

/// The newest point inside `[start, end]`.
fn latest_in_window(points: &[DataPoint], start: u64, end: u64) -> Option<DataPoint> {
    points
        .iter()
        .filter(|p| p.timestamp >= start && p.timestamp <= end && p.value.is_finite())
        .max_by_key(|p| p.timestamp)
        .copied()
}

impl<S: MetricsSource> UtilizationProbe for MetricsProbe<S> {
    fn name(&self) -> &str {
        "metrics"
    }

    fn sample<'a>(&'a self, instance_id: &'a str) -> ProbeFuture<'a> {
        Box::pin(async move {
            let query = self.build_query(instance_id, epoch_secs());
            let points = self.source.query(&query).await?;
            let latest =
                latest_in_window(&points, query.start, query.end).ok_or(ProbeError::NoData)?;
            debug!(
                instance = %instance_id,
                points = points.len(),
                value = latest.value,
                "metrics sample"
            );
            Ok(UtilizationSample::new(
                instance_id,
                latest.value,
                latest.timestamp,
            ))
        })
    }
}

/// Reads series from an HTTP endpoint answering
/// `GET {path}?instance=..&start=..&end=..&period=..&stat=..` with a JSON
/// array of [`DataPoint`]s.
pub struct HttpMetricsSource {
    address: String,
    path: String,
}

impl HttpMetricsSource {
    /// `address` is `host:port`.
    pub fn new(address: &str, path: &str) -> Self {
        Self {
            address: address.to_string(),
            path: path.to_string(),
        }
    }

    /// Origin-form request target for `q`.
    fn request_target(&self, q: &MetricsQuery) -> String {
        format!(
            "{}?instance={}&start={}&end={}&period={}&stat={}",
            self.path,
            encode_component(&q.instance_id),
            q.start,
            q.end,
            q.period_secs,
            encode_component(&q.aggregation),
        )
    }

    async fn fetch(&self, uri: &str) -> Result<Bytes, ProbeError> {
        let stream = tokio::net::TcpStream::connect(&self.address)
            .await
            .map_err(|e| ProbeError::ConnectFailure(format!("{}: {e}", self.address)))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| ProbeError::ConnectFailure(format!("handshake: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(uri)
            .header("host", self.address.as_str())
            .header("accept", "application/json")
            .header("user-agent", "fleet-probe/0.1")
            .body(Empty::<Bytes>::new())
            .map_err(|e| ProbeError::ConnectFailure(format!("request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| ProbeError::ConnectFailure(format!("request: {e}")))?;

        if !resp.status().is_success() {
            return Err(ProbeError::ConnectFailure(format!(
                "metrics endpoint returned {}",
                resp.status()
            )));
        }

        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ProbeError::ConnectFailure(format!("body: {e}")))?;
        Ok(body.to_bytes())
    }
}

impl MetricsSource for HttpMetricsSource {
    fn query<'a>(&'a self, query: &'a MetricsQuery) -> QueryFuture<'a> {
        Box::pin(async move {
            let uri = self.request_target(query);
            let body = self.fetch(&uri).await?;
            serde_json::from_slice::<Vec<DataPoint>>(&body)
                .map_err(|e| ProbeError::ParseFailure(format!("metrics body: {e}")))
        })
    }
}

/// Percent-encode everything outside the URL unreserved set.
fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Source that returns canned points and records the last query.
    struct CannedSource {
        points: Vec<DataPoint>,
        last: Mutex<Option<MetricsQuery>>,
    }

    impl CannedSource {
        fn new(points: Vec<DataPoint>) -> Self {
            Self {
                points,
                last: Mutex::new(None),
            }
        }
    }

    impl MetricsSource for CannedSource {
        fn query<'a>(&'a self, query: &'a MetricsQuery) -> QueryFuture<'a> {
            Box::pin(async move {
                *self.last.lock().unwrap() = Some(query.clone());
                Ok(self.points.clone())
            })
        }
    }

    #[test]
    fn latest_point_wins() {
        let points = [
            DataPoint { timestamp: 100, value: 10.0 },
            DataPoint { timestamp: 300, value: 30.0 },
            DataPoint { timestamp: 200, value: 20.0 },
        ];
        assert_eq!(latest_in_window(&points, 0, 400).unwrap().value, 30.0);
    }

    #[test]
    fn points_outside_window_ignored() {
        let points = [
            DataPoint { timestamp: 50, value: 10.0 },
            DataPoint { timestamp: 500, value: 90.0 },
        ];
        assert_eq!(latest_in_window(&points, 100, 400), None);
    }

    #[tokio::test]
    async fn empty_window_is_no_data() {
        let probe = MetricsProbe::new(
            CannedSource::new(Vec::new()),
            Duration::from_secs(300),
            300,
            "Average",
        );
        assert_eq!(probe.sample("i-1").await, Err(ProbeError::NoData));
    }

    #[tokio::test]
    async fn sample_uses_latest_recent_point() {
        let now = epoch_secs();
        let probe = MetricsProbe::new(
            CannedSource::new(vec![
                DataPoint { timestamp: now - 200, value: 12.5 },
                DataPoint { timestamp: now - 10, value: 47.0 },
            ]),
            Duration::from_secs(300),
            300,
            "Average",
        );

        let sample = probe.sample("i-1").await.unwrap();
        assert_eq!(sample.instance_id, "i-1");
        assert_eq!(sample.percent_busy, 47.0);
        assert_eq!(sample.observed_at, now - 10);

        let q = probe.source.last.lock().unwrap().clone().unwrap();
        assert_eq!(q.end - q.start, 300);
        assert_eq!(q.aggregation, "Average");
    }

    #[test]
    fn request_target_encodes_id() {
        let source = HttpMetricsSource::new("127.0.0.1:9090", "/metrics/cpu");
        let uri = source.request_target(&MetricsQuery {
            instance_id: "web 1/a".to_string(),
            start: 1,
            end: 2,
            period_secs: 300,
            aggregation: "Average".to_string(),
        });
        assert_eq!(
            uri,
            "/metrics/cpu?instance=web%201%2Fa&start=1&end=2&period=300&stat=Average"
        );
    }

    #[tokio::test]
    async fn http_source_reads_json_points() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = sock.read(&mut buf).await.unwrap();
            let body = r#"[{"timestamp":100,"value":42.0}]"#;
            let resp = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            sock.write_all(resp.as_bytes()).await.unwrap();
        });

        let source = HttpMetricsSource::new(&addr.to_string(), "/m");
        let points = source
            .query(&MetricsQuery {
                instance_id: "i-1".to_string(),
                start: 0,
                end: 200,
                period_secs: 300,
                aggregation: "Average".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(points, vec![DataPoint { timestamp: 100, value: 42.0 }]);
    }

    #[tokio::test]
    async fn http_source_closed_port_is_connect_failure() {
        let source = HttpMetricsSource::new("127.0.0.1:1", "/m");
        let query = MetricsQuery {
            instance_id: "i-1".to_string(),
            start: 0,
            end: 1,
            period_secs: 300,
            aggregation: "Average".to_string(),
        };
        assert!(matches!(
            source.query(&query).await,
            Err(ProbeError::ConnectFailure(_))
        ));
    }
}
