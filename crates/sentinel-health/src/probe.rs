//! HTTP probe used by the endpoint, route, performance and dependency checks.
//!
//! One plain HTTP/1.1 GET over a fresh TCP connection per probe; the
//! elapsed time is measured up to the response head.

use std::io::ErrorKind;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use sentinel_state::FailureKind;

/// Why a probe produced no HTTP response.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection refused: {0}")]
    Refused(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl ProbeError {
    /// Failure pattern recorded for a target whose probe failed this way.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ProbeError::Timeout(_) => FailureKind::Timeout,
            ProbeError::Refused(_) => FailureKind::ConnectionRefused,
            ProbeError::InvalidUrl { .. } | ProbeError::Connect(_) | ProbeError::Request(_) => {
                FailureKind::ProbeError
            }
        }
    }
}

/// A response head and how long it took to arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpOutcome {
    pub status: http::StatusCode,
    pub elapsed: Duration,
}

impl HttpOutcome {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }
}

/// GET `url`, giving up after `timeout`.
///
/// Any HTTP status is an `Ok`; only transport problems are errors.
pub async fn http_get(url: &str, timeout: Duration) -> Result<HttpOutcome, ProbeError> {
    let uri: http::Uri = url.parse().map_err(|e: http::uri::InvalidUri| ProbeError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if uri.scheme_str().is_some_and(|s| s != "http") {
        return Err(ProbeError::InvalidUrl {
            url: url.to_string(),
            reason: "only http:// is supported".into(),
        });
    }
    let authority = uri
        .authority()
        .ok_or_else(|| ProbeError::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".into(),
        })?
        .clone();
    let address = format!("{}:{}", authority.host(), authority.port_u16().unwrap_or(80));

    let started = Instant::now();
    let result = tokio::time::timeout(timeout, async {
        let stream = tokio::net::TcpStream::connect(&address)
            .await
            .map_err(|e| {
                debug!(error = %e, %url, "probe connection failed");
                if e.kind() == ErrorKind::ConnectionRefused {
                    ProbeError::Refused(address.clone())
                } else {
                    ProbeError::Connect(e.to_string())
                }
            })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| ProbeError::Connect(e.to_string()))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(uri.clone())
            .header("host", authority.as_str())
            .header("user-agent", "sentinel-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .map_err(|e| ProbeError::Request(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| ProbeError::Request(e.to_string()))?;
        Ok::<_, ProbeError>(HttpOutcome {
            status: resp.status(),
            elapsed: started.elapsed(),
        })
    })
    .await;

    match result {
        Ok(outcome) => {
            if let Ok(o) = &outcome {
                debug!(%url, status = %o.status, elapsed_ms = o.elapsed_ms(), "probe complete");
            }
            outcome
        }
        Err(_) => {
            debug!(%url, "probe timed out");
            Err(ProbeError::Timeout(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::spawn_http_stub;

    #[tokio::test]
    async fn probe_reads_status() {
        let addr = spawn_http_stub(503, Duration::ZERO).await;
        let outcome = http_get(&format!("http://{addr}/health"), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(outcome.status.as_u16(), 503);
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn probe_to_closed_port_is_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = http_get(&format!("http://{addr}/health"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::ConnectionRefused);
    }

    #[tokio::test]
    async fn probe_times_out() {
        let addr = spawn_http_stub(200, Duration::from_secs(5)).await;
        let err = http_get(&format!("http://{addr}/"), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Timeout(_)));
        assert_eq!(err.failure_kind(), FailureKind::Timeout);
    }

    #[tokio::test]
    async fn probe_rejects_https() {
        let err = http_get("https://example.com/health", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::InvalidUrl { .. }));
    }
}
