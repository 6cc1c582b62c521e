//! Health probe: fetch `url[:port]/microserviceHealth` and read the
//! reported status.
//!
//! Plain `http://` URLs go over a hyper HTTP/1 connection; `https://` URLs
//! are wrapped in tokio-rustls first. Transport failures, timeouts, and
//! non-2xx answers all read as "Down".

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HOST, USER_AGENT};
use http::{Request, Uri};
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use appreg_store::{DOWN, DiscoveryUrl};

/// Path every registered service answers health probes on.
pub const HEALTH_PATH: &str = "microserviceHealth";

const STATUS_MARKER: &str = "\"Status\"";

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("status body has no closing quote: {0}")]
    MalformedStatus(String),

    #[error("tls setup: {0}")]
    Tls(String),
}

/// Shared probe client. Cheap to clone.
#[derive(Clone)]
pub struct HealthProber {
    tls: TlsConnector,
    timeout: Duration,
}

impl HealthProber {
    /// Prober trusting the Mozilla root store.
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()
        .map_err(|e| ProbeError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(Self::with_client_config(Arc::new(config), timeout))
    }

    pub fn with_client_config(config: Arc<rustls::ClientConfig>, timeout: Duration) -> Self {
        Self { tls: TlsConnector::from(config), timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe one URL and return the status it reports.
    ///
    /// Only a malformed status body is an error; anything that keeps the
    /// body from arriving yields "Down".
    pub async fn probe(&self, url: &DiscoveryUrl) -> Result<String, ProbeError> {
        let target = health_url(url);
        match tokio::time::timeout(self.timeout, self.fetch(&target)).await {
            Ok(Ok(body)) => extract_status(&body),
            Ok(Err(reason)) => {
                debug!(url = %target, %reason, "health probe failed");
                Ok(DOWN.to_string())
            }
            Err(_) => {
                debug!(url = %target, timeout = ?self.timeout, "health probe timed out");
                Ok(DOWN.to_string())
            }
        }
    }

    async fn fetch(&self, target: &str) -> Result<String, String> {
        let uri: Uri = target.parse().map_err(|e| format!("invalid url: {e}"))?;
        let https = match uri.scheme_str() {
            Some(s) if s.eq_ignore_ascii_case("https") => true,
            Some(s) if s.eq_ignore_ascii_case("http") => false,
            other => return Err(format!("unsupported scheme {other:?}")),
        };
        let host = uri.host().ok_or("missing host")?;
        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });
        let authority = uri.authority().map(|a| a.as_str()).unwrap_or(host);
        let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");

        let stream = TcpStream::connect((host.trim_matches(['[', ']']), port))
            .await
            .map_err(|e| format!("connect: {e}"))?;

        if https {
            let server_name = rustls::pki_types::ServerName::try_from(host.trim_matches(['[', ']']))
                .map_err(|e| format!("invalid tls server name '{host}': {e}"))?
                .to_owned();
            let tls = self
                .tls
                .connect(server_name, stream)
                .await
                .map_err(|e| format!("tls handshake: {e}"))?;
            get_body(tls, authority, path).await
        } else {
            get_body(stream, authority, path).await
        }
    }
}

async fn get_body<S>(stream: S, authority: &str, path: &str) -> Result<String, String>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| format!("handshake: {e}"))?;
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = Request::builder()
        .method("GET")
        .uri(path)
        .header(HOST, authority)
        .header(USER_AGENT, concat!("appreg-health/", env!("CARGO_PKG_VERSION")))
        .body(Empty::<Bytes>::new())
        .map_err(|e| format!("request: {e}"))?;

    let resp = sender.send_request(req).await.map_err(|e| format!("request: {e}"))?;
    if !resp.status().is_success() {
        return Err(format!("status {}", resp.status()));
    }
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| format!("body: {e}"))?
        .to_bytes();
    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// `url[:port]/microserviceHealth`.
pub fn health_url(url: &DiscoveryUrl) -> String {
    format!("{}/{HEALTH_PATH}", url.base())
}

/// Pull the reported status out of a probe body.
///
/// Finds `"Status"`, skips the colon and whitespace after it, and returns
/// the next quoted token. Without the marker the whole (trimmed) body is
/// the status.
pub fn extract_status(body: &str) -> Result<String, ProbeError> {
    let Some(at) = body.find(STATUS_MARKER) else {
        return Ok(body.trim().to_string());
    };
    let rest = body[at + STATUS_MARKER.len()..].trim_start_matches(|c: char| c == ':' || c.is_whitespace());
    let value = rest
        .strip_prefix('"')
        .and_then(|v| v.find('"').map(|end| &v[..end]))
        .ok_or_else(|| ProbeError::MalformedStatus(body.to_string()))?;
    Ok(value.to_string())
}

/// Whether a probe result must be written back: the status changed
/// (ignoring case), the URL was never checked, or its last check is older
/// than `staleness`.
pub fn status_changed(url: &DiscoveryUrl, status: &str, now: u64, staleness: Duration) -> bool {
    if !url.health_status.eq_ignore_ascii_case(status) {
        return true;
    }
    match url.last_health_check {
        None => true,
        Some(checked) => now.saturating_sub(checked) > staleness.as_secs(),
    }
}

/// Stamp `status` onto `url` if it must be written. Empty statuses never are.
pub fn apply_status(url: &mut DiscoveryUrl, status: &str, now: u64, staleness: Duration) -> bool {
    if status.is_empty() || !status_changed(url, status, now, staleness) {
        return false;
    }
    url.health_status = status.to_string();
    url.last_health_check = Some(now);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use appreg_store::HEALTHY;

    const WINDOW: Duration = Duration::from_secs(30);

    #[test]
    fn extract_quoted_status() {
        assert_eq!(extract_status(r#"{"Status":"Healthy"}"#).unwrap(), "Healthy");
        assert_eq!(extract_status(r#"{ "Status" :  "Degraded", "x": 1 }"#).unwrap(), "Degraded");
        assert_eq!(extract_status(r#"{"Other":"a","Status": "Down"}"#).unwrap(), "Down");
    }

    #[test]
    fn extract_without_marker_returns_body() {
        assert_eq!(extract_status("Healthy\n").unwrap(), "Healthy");
        assert_eq!(extract_status("").unwrap(), "");
    }

    #[test]
    fn extract_without_closing_quote_fails() {
        let err = extract_status(r#"{"Status":"Healthy"#).unwrap_err();
        assert!(matches!(err, ProbeError::MalformedStatus(_)));
        assert!(extract_status(r#"{"Status": 1}"#).is_err());
    }

    #[test]
    fn health_url_includes_port() {
        assert_eq!(
            health_url(&DiscoveryUrl::new("https://a.example/", Some(8443))),
            "https://a.example:8443/microserviceHealth"
        );
        assert_eq!(health_url(&DiscoveryUrl::new("http://b", None)), "http://b/microserviceHealth");
    }

    #[test]
    fn change_detection() {
        let mut url = DiscoveryUrl::new("http://a", None);
        assert!(status_changed(&url, HEALTHY, 1_000, WINDOW), "never checked");

        url.health_status = HEALTHY.to_string();
        url.last_health_check = Some(1_000);
        assert!(!status_changed(&url, "healthy", 1_010, WINDOW));
        assert!(status_changed(&url, DOWN, 1_010, WINDOW));
        assert!(!status_changed(&url, HEALTHY, 1_030, WINDOW));
        assert!(status_changed(&url, HEALTHY, 1_031, WINDOW));
    }

    #[test]
    fn apply_skips_empty_and_unchanged() {
        let mut url = DiscoveryUrl::new("http://a", None);
        assert!(!apply_status(&mut url, "", 1_000, WINDOW));
        assert_eq!(url.last_health_check, None);

        assert!(apply_status(&mut url, HEALTHY, 1_000, WINDOW));
        assert_eq!(url.health_status, HEALTHY);
        assert_eq!(url.last_health_check, Some(1_000));

        assert!(!apply_status(&mut url, HEALTHY, 1_005, WINDOW));
        assert_eq!(url.last_health_check, Some(1_000));
    }

    #[tokio::test]
    async fn probe_closed_port_reads_down() {
        let prober = HealthProber::new(Duration::from_millis(500)).unwrap();
        let status = prober.probe(&DiscoveryUrl::new("http://127.0.0.1", Some(1))).await.unwrap();
        assert_eq!(status, DOWN);
    }

    #[tokio::test]
    async fn probe_unsupported_scheme_reads_down() {
        let prober = HealthProber::new(Duration::from_millis(500)).unwrap();
        let status = prober.probe(&DiscoveryUrl::new("ftp://127.0.0.1", Some(21))).await.unwrap();
        assert_eq!(status, DOWN);
    }

    #[tokio::test]
    async fn probe_reads_status_from_live_server() {
        use axum::Router;
        use axum::routing::get;

        let app = Router::new()
            .route("/microserviceHealth", get(|| async { r#"{"Status":"Healthy"}"# }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let prober = HealthProber::new(Duration::from_secs(2)).unwrap();
        let status = prober.probe(&DiscoveryUrl::new("http://127.0.0.1", Some(port))).await.unwrap();
        assert_eq!(status, HEALTHY);
    }

    #[tokio::test]
    async fn probe_non_success_reads_down() {
        use axum::Router;
        use axum::http::StatusCode;
        use axum::routing::get;

        let app = Router::new().route(
            "/microserviceHealth",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, r#"{"Status":"Healthy"}"#) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let prober = HealthProber::new(Duration::from_secs(2)).unwrap();
        let status = prober.probe(&DiscoveryUrl::new("http://127.0.0.1", Some(port))).await.unwrap();
        assert_eq!(status, DOWN);
    }
}
