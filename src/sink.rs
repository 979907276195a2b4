//! Sink publishers.
//!
//! The poller hands every [`DataPoint`] to a [`SinkPublisher`] one at a time. A failed
//! publish costs that one point and nothing else, so implementations report failures as
//! [`PublishError`] and never retry internally.
//!
//! - [`InfluxDbSink`]: InfluxDB v2 HTTP write API, one line-protocol line per request
//! - [`LogSink`]: logs each point at info level (`--dry-run`)

use crate::config::{SinkConfig, SinkKind};
use crate::error::{AppResult, PublishError};
use crate::measurement::DataPoint;
use async_trait::async_trait;
use tracing::info;

#[cfg(not(feature = "sink_influxdb"))]
use crate::error::DaqError;

/// Accepts data points for durable storage.
#[async_trait]
pub trait SinkPublisher: Send + Sync {
    /// Store one point.
    ///
    /// # Errors
    ///
    /// [`PublishError`] if the sink rejected the point or could not be reached.
    async fn publish(&self, point: &DataPoint) -> Result<(), PublishError>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Build the sink selected by `[sink] kind`.
///
/// # Errors
///
/// `FeatureNotEnabled` when the InfluxDB sink is requested from a build without the
/// `sink_influxdb` feature, or a configuration error if the HTTP client cannot be built.
pub fn build_sink(config: &SinkConfig) -> AppResult<Box<dyn SinkPublisher>> {
    match config.kind {
        SinkKind::Log => Ok(Box::new(LogSink)),
        #[cfg(feature = "sink_influxdb")]
        SinkKind::InfluxDb => Ok(Box::new(InfluxDbSink::new(config)?)),
        #[cfg(not(feature = "sink_influxdb"))]
        SinkKind::InfluxDb => Err(DaqError::FeatureNotEnabled("sink_influxdb".to_string())),
    }
}

/// Logs points instead of storing them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl SinkPublisher for LogSink {
    async fn publish(&self, point: &DataPoint) -> Result<(), PublishError> {
        info!(
            measurement = point.measurement(),
            field = point.field(),
            value = %point.value(),
            tags = ?point.tags(),
            "Sent {} data",
            point.field()
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[cfg(feature = "sink_influxdb")]
pub use influxdb::InfluxDbSink;

#[cfg(feature = "sink_influxdb")]
mod influxdb {
    use super::SinkPublisher;
    use crate::config::SinkConfig;
    use crate::error::{AppResult, DaqError, PublishError};
    use crate::measurement::DataPoint;
    use async_trait::async_trait;
    use tracing::{debug, warn};

    /// InfluxDB v2 write API client.
    #[derive(Debug, Clone)]
    pub struct InfluxDbSink {
        client: reqwest::Client,
        write_url: String,
        org: String,
        bucket: String,
        token: Option<String>,
    }

    impl InfluxDbSink {
        /// Client for the server, organization and bucket in `config`.
        pub fn new(config: &SinkConfig) -> AppResult<Self> {
            let client = reqwest::Client::builder()
                .timeout(config.timeout)
                .build()
                .map_err(|e| DaqError::Configuration(format!("http client build failed: {e}")))?;

            if config.token.is_none() {
                warn!("No InfluxDB token configured (set INFLUXDB_TOKEN); writes will be unauthenticated");
            }

            Ok(Self {
                client,
                write_url: format!("{}/api/v2/write", config.url.trim_end_matches('/')),
                org: config.org.clone(),
                bucket: config.bucket.clone(),
                token: config.token.clone(),
            })
        }

        /// Write endpoint, without query parameters.
        pub fn write_url(&self) -> &str {
            &self.write_url
        }
    }

    #[async_trait]
    impl SinkPublisher for InfluxDbSink {
        async fn publish(&self, point: &DataPoint) -> Result<(), PublishError> {
            let line = point.to_line_protocol();
            let mut request = self
                .client
                .post(&self.write_url)
                .query(&[
                    ("org", self.org.as_str()),
                    ("bucket", self.bucket.as_str()),
                    ("precision", "ns"),
                ])
                .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
                .body(line.clone());
            if let Some(token) = &self.token {
                request = request.header(reqwest::header::AUTHORIZATION, format!("Token {token}"));
            }

            let resp = request.send().await.map_err(|e| PublishError {
                field: point.field().to_string(),
                message: format!("http request failed: {e}"),
                status: e.status().map(|s| s.as_u16()),
            })?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(PublishError {
                    field: point.field().to_string(),
                    message: format!("http {status}: {}", body.trim()),
                    status: Some(status.as_u16()),
                });
            }

            debug!(line = %line, "Wrote point");
            Ok(())
        }

        fn name(&self) -> &str {
            "influxdb"
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::measurement::FieldValue;
        use chrono::{TimeZone, Utc};
        use std::time::Duration;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        /// Accept one request, answer with `status_line`, return the raw request text.
        async fn one_shot_server(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("http://{}", listener.local_addr().unwrap());

            let handle = tokio::spawn(async move {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                loop {
                    let n = socket.read(&mut buf).await.unwrap();
                    request.extend_from_slice(&buf[..n]);
                    let text = String::from_utf8_lossy(&request).to_string();
                    if let Some(header_end) = text.find("\r\n\r\n") {
                        let content_length = text[..header_end]
                            .lines()
                            .find_map(|l| {
                                l.to_ascii_lowercase()
                                    .strip_prefix("content-length:")
                                    .map(|v| v.trim().parse::<usize>().unwrap())
                            })
                            .unwrap_or(0);
                        if request.len() >= header_end + 4 + content_length {
                            break;
                        }
                    }
                    if n == 0 {
                        break;
                    }
                }
                let response = format!(
                    "HTTP/1.1 {status_line}\r\ncontent-length: 4\r\nconnection: close\r\n\r\nnope"
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
                String::from_utf8_lossy(&request).to_string()
            });

            (url, handle)
        }

        fn sink_for(url: &str, token: Option<&str>) -> InfluxDbSink {
            let config = SinkConfig {
                url: url.to_string(),
                org: "lab".to_string(),
                token: token.map(str::to_string),
                timeout: Duration::from_secs(2),
                ..Default::default()
            };
            InfluxDbSink::new(&config).unwrap()
        }

        fn point() -> DataPoint {
            DataPoint::new(
                "emf390_data",
                "emf_value",
                FieldValue::Float(1.23),
                Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            )
            .with_tag("device", "gq_emf390")
        }

        #[test]
        fn test_write_url_trims_trailing_slash() {
            let sink = sink_for("http://influx:8086/", None);
            assert_eq!(sink.write_url(), "http://influx:8086/api/v2/write");
        }

        #[tokio::test]
        async fn test_publish_sends_line_protocol() {
            let (url, server) = one_shot_server("204 No Content").await;
            let sink = sink_for(&url, Some("s3cret"));

            sink.publish(&point()).await.unwrap();

            let request = server.await.unwrap();
            assert!(request.starts_with(
                "POST /api/v2/write?org=lab&bucket=health_data&precision=ns HTTP/1.1"
            ));
            assert!(request.to_ascii_lowercase().contains("authorization: token s3cret"));
            assert!(request.ends_with(
                "emf390_data,device=gq_emf390 emf_value=1.23 1700000000000000000"
            ));
        }

        #[tokio::test]
        async fn test_rejected_write_carries_status() {
            let (url, server) = one_shot_server("401 Unauthorized").await;
            let sink = sink_for(&url, None);

            let err = sink.publish(&point()).await.unwrap_err();
            assert_eq!(err.status, Some(401));
            assert_eq!(err.field, "emf_value");
            assert!(err.message.contains("nope"));
            drop(server.await.unwrap());
        }
    }
}
