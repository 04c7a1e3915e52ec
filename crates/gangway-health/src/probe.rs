//! Single HTTP probe against a unit endpoint.

use std::time::Duration;

use tracing::debug;

/// Result of one HTTP probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResponse {
    /// The endpoint answered with this status code.
    Status(u16),
    /// Connection refused, handshake failed, or the deadline passed.
    Unreachable,
}

impl ProbeResponse {
    /// Whether the response matches the expected status.
    pub fn matches(self, expected: u16) -> bool {
        matches!(self, ProbeResponse::Status(s) if s == expected)
    }

    /// Whether the response is any 2xx.
    pub fn is_success(self) -> bool {
        matches!(self, ProbeResponse::Status(s) if (200..300).contains(&s))
    }
}

/// Perform an HTTP GET probe against `address` (ip:port) at `path`.
///
/// The probe goes straight at the unit's own port — the reverse proxy is
/// deliberately not in the path.
pub async fn http_probe(address: &str, path: &str, timeout: Duration) -> ProbeResponse {
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "probe connection failed");
                return ProbeResponse::Unreachable;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "probe handshake failed");
                return ProbeResponse::Unreachable;
            }
        };

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "gangway/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %uri, "probe request build failed");
                return ProbeResponse::Unreachable;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) => ProbeResponse::Status(resp.status().as_u16()),
            Err(e) => {
                debug!(error = %e, %uri, "probe request failed");
                ProbeResponse::Unreachable
            }
        }
    })
    .await;

    match result {
        Ok(response) => response,
        Err(_) => {
            debug!(%uri, "probe timed out");
            ProbeResponse::Unreachable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::serve_status;

    #[tokio::test]
    async fn probe_reports_status() {
        let address = serve_status(200).await;
        let response = http_probe(&address, "/healthz", Duration::from_secs(2)).await;
        assert_eq!(response, ProbeResponse::Status(200));
        assert!(response.matches(200));
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn probe_reports_error_status() {
        let address = serve_status(503).await;
        let response = http_probe(&address, "/healthz", Duration::from_secs(2)).await;
        assert_eq!(response, ProbeResponse::Status(503));
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn probe_to_closed_port_is_unreachable() {
        let response = http_probe("127.0.0.1:1", "/healthz", Duration::from_millis(200)).await;
        assert_eq!(response, ProbeResponse::Unreachable);
    }
}
