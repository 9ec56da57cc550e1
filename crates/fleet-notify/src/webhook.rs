//! Webhook notifier: POSTs `{"subject", "body"}` as JSON over HTTP/1.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::notifier::{NotifyError, NotifyFuture, Notifier};

#[derive(Debug, Serialize)]
struct Payload<'a> {
    subject: &'a str,
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct Receipt {
    #[serde(alias = "message_id", alias = "MessageId")]
    id: String,
}

pub struct WebhookNotifier {
    /// Origin-form request target, e.g. `/hooks/fleet`.
    target: String,
    /// `host:port` to dial.
    authority: String,
    timeout: Duration,
}

impl WebhookNotifier {
    /// `url` must be `http://host[:port]/path`.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let uri: http::Uri = url
            .parse()
            .map_err(|e| NotifyError::Transport(format!("bad webhook url {url:?}: {e}")))?;
        if uri.scheme_str() != Some("http") {
            return Err(NotifyError::Transport(format!(
                "unsupported webhook scheme in {url:?}"
            )));
        }
        let authority = uri
            .authority()
            .ok_or_else(|| NotifyError::Transport(format!("webhook url {url:?} has no host")))?;
        let authority = match authority.port_u16() {
            Some(_) => authority.to_string(),
            None => format!("{}:80", authority.host()),
        };
        let target = uri
            .path_and_query()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        Ok(Self {
            target,
            authority,
            timeout,
        })
    }

    async fn post(&self, payload: Vec<u8>) -> Result<String, NotifyError> {
        let stream = tokio::net::TcpStream::connect(&self.authority)
            .await
            .map_err(|e| NotifyError::Transport(format!("{}: {e}", self.authority)))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| NotifyError::Transport(format!("handshake: {e}")))?;

        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("POST")
            .uri(self.target.as_str())
            .header("host", self.authority.as_str())
            .header("content-type", "application/json")
            .header("user-agent", "fleet-notify/0.1")
            .body(Full::new(Bytes::from(payload)))
            .map_err(|e| NotifyError::Transport(format!("request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| NotifyError::Transport(format!("request: {e}")))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| NotifyError::Transport(format!("body: {e}")))?
            .to_bytes();

        if !status.is_success() {
            return Err(NotifyError::Rejected(format!(
                "{status}: {}",
                String::from_utf8_lossy(&body).trim()
            )));
        }

        let id = serde_json::from_slice::<Receipt>(&body)
            .map(|r| r.id)
            .unwrap_or_else(|_| format!("http-{}", status.as_u16()));
        debug!(delivery = %id, "webhook delivered");
        Ok(id)
    }
}

impl Notifier for WebhookNotifier {
    fn publish<'a>(&'a self, subject: &'a str, body: &'a str) -> NotifyFuture<'a> {
        Box::pin(async move {
            let payload = serde_json::to_vec(&Payload { subject, body })
                .map_err(|e| NotifyError::Transport(format!("encode: {e}")))?;
            tokio::time::timeout(self.timeout, self.post(payload))
                .await
                .map_err(|_| NotifyError::Timeout)?
        })
    }
}
