// SPDX-License-Identifier: Apache-2.0

//! OTLP/HTTP exporter (§4.4): encodes a batch, gzip-compresses the body, and
//! POSTs it to a configured endpoint with exponential-backoff retry on
//! transient failures. Supports metrics, logs, and traces with the same
//! queue/retry machinery.
//!
//! The wire body is JSON rather than protobuf: the OTLP protobuf schema
//! itself is explicitly out of scope for this collector (only the in-memory
//! model and export contract are specified), and the OTLP/HTTP spec itself
//! names a JSON content-type variant as an acceptable alternative encoding.

mod backoff;
mod codec;
mod error;

pub use error::Error;

use async_trait::async_trait;
use backoff::Backoff;
use dbscope_engine::{ConsumeOutcome, Exporter, Registry};
use dbscope_pdata::AnyBatch;
use dbscope_telemetry::{warn, MetricsRegistryHandle};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Deserialize;
use std::io::Write;
use std::time::Duration;

fn default_initial_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_max_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_max_elapsed_time() -> Duration {
    Duration::from_secs(300)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Configuration for the `otlphttp` exporter.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OtlpExporterConfig {
    /// Base URL of the OTLP/HTTP endpoint, e.g. `https://otlp.example.com`.
    /// The signal-specific path (`/v1/metrics`, `/v1/logs`, `/v1/traces`) is
    /// appended based on the batch being exported.
    pub endpoint: String,
    /// Sent as the `api-key` header, if set (§4.4/§6).
    #[serde(default)]
    pub api_key: Option<String>,
    /// Sent as the `tenant` header, if set.
    #[serde(default)]
    pub tenant: Option<String>,
    /// Initial retry delay.
    #[serde(default = "default_initial_interval", with = "humantime_serde")]
    pub initial_interval: Duration,
    /// Cap on the retry delay.
    #[serde(default = "default_max_interval", with = "humantime_serde")]
    pub max_interval: Duration,
    /// Give up retrying a batch after this much total elapsed time.
    #[serde(default = "default_max_elapsed_time", with = "humantime_serde")]
    pub max_elapsed_time: Duration,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

fn signal_path(batch: &AnyBatch) -> &'static str {
    match batch {
        AnyBatch::Metrics(_) => "/v1/metrics",
        AnyBatch::Logs(_) => "/v1/logs",
        AnyBatch::Traces(_) => "/v1/traces",
    }
}

fn gzip(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body)?;
    encoder.finish()
}

/// Transient per RFC guidance for retriable HTTP failures (§4.4): request
/// timeouts, rate limiting, and server errors.
fn is_transient_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// A partial-success response body, shared by all three OTLP signals: a
/// non-zero `rejected_*_count` means some items were permanently rejected
/// even though the HTTP call itself succeeded (§4.4).
#[derive(Debug, Deserialize, Default)]
struct PartialSuccess {
    #[serde(default, alias = "rejectedDataPoints", alias = "rejected_data_points")]
    rejected_data_points: i64,
    #[serde(default, alias = "rejectedLogRecords", alias = "rejected_log_records")]
    rejected_log_records: i64,
    #[serde(default, alias = "rejectedSpans", alias = "rejected_spans")]
    rejected_spans: i64,
    #[serde(default, alias = "errorMessage", alias = "error_message")]
    error_message: String,
}

impl PartialSuccess {
    fn rejected_count(&self) -> i64 {
        self.rejected_data_points + self.rejected_log_records + self.rejected_spans
    }
}

/// The `otlphttp` exporter. Retries live entirely within one `export` call:
/// the engine calls exporters serially, one batch at a time, so there is no
/// separate worker pool to hand a batch off to — the bounded channel
/// upstream of this node (§9) is the de facto send queue.
pub struct OtlpExporter {
    config: OtlpExporterConfig,
    client: reqwest::Client,
    requests_total: prometheus::CounterVec,
    retries_total: prometheus::CounterVec,
    send_failed_total: prometheus::CounterVec,
    export_duration_seconds: prometheus::HistogramVec,
}

impl OtlpExporter {
    /// Builds an exporter from its raw settings value.
    pub fn from_settings(settings: &serde_yaml::Value, metrics: MetricsRegistryHandle) -> Result<Self, Error> {
        let config: OtlpExporterConfig = serde_yaml::from_value(settings.clone())?;
        let client = reqwest::Client::builder().timeout(config.request_timeout).build()?;
        let requests_total = metrics.counter_vec(
            "dbscope_exporter_otlp_requests_total",
            "OTLP export requests by signal and outcome",
            &["signal", "outcome"],
        )?;
        let retries_total = metrics.counter_vec(
            "dbscope_exporter_otlp_retries_total",
            "Retries performed while exporting a batch",
            &["signal"],
        )?;
        let send_failed_total = metrics.counter_vec(
            "dbscope_exporter_otlp_send_failed_total",
            "Batches abandoned after max_elapsed_time or permanently rejected",
            &["signal", "reason"],
        )?;
        let export_duration_seconds = metrics.histogram_vec(
            "dbscope_exporter_otlp_export_duration_seconds",
            "Time spent exporting a batch, including retries",
            &["signal"],
        )?;
        Ok(Self {
            config,
            client,
            requests_total,
            retries_total,
            send_failed_total,
            export_duration_seconds,
        })
    }

    fn headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::CONTENT_TYPE, reqwest::header::HeaderValue::from_static("application/json"));
        headers.insert(reqwest::header::CONTENT_ENCODING, reqwest::header::HeaderValue::from_static("gzip"));
        if let Some(api_key) = &self.config.api_key {
            if let Ok(value) = reqwest::header::HeaderValue::from_str(api_key) {
                headers.insert("api-key", value);
            }
        }
        if let Some(tenant) = &self.config.tenant {
            if let Ok(value) = reqwest::header::HeaderValue::from_str(tenant) {
                headers.insert("tenant", value);
            }
        }
        headers
    }

    async fn send_with_retry(&self, signal: &'static str, url: String, body: Vec<u8>) -> ConsumeOutcome {
        let timer = self.export_duration_seconds.with_label_values(&[signal]).start_timer();
        let mut backoff = Backoff::new(self.config.initial_interval, self.config.max_interval, self.config.max_elapsed_time);

        loop {
            let attempt = self
                .client
                .post(&url)
                .headers(self.headers())
                .body(body.clone())
                .send()
                .await;

            let outcome = match attempt {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.json::<PartialSuccess>().await {
                            Ok(partial) if partial.rejected_count() > 0 => {
                                Err(ConsumeOutcome::PermanentError(format!(
                                    "OTLP sink rejected {} items: {}",
                                    partial.rejected_count(),
                                    partial.error_message
                                )))
                            }
                            _ => Ok(ConsumeOutcome::Accepted),
                        }
                    } else if is_transient_status(status) {
                        Err(ConsumeOutcome::RetryableError(format!("OTLP sink returned {status}")))
                    } else {
                        Ok(ConsumeOutcome::PermanentError(format!("OTLP sink returned {status}")))
                    }
                }
                Err(err) if err.is_timeout() || err.is_connect() => {
                    Err(ConsumeOutcome::RetryableError(format!("OTLP request failed: {err}")))
                }
                Err(err) => Ok(ConsumeOutcome::PermanentError(format!("OTLP request failed: {err}"))),
            };

            match outcome {
                Ok(outcome) => {
                    timer.observe_duration();
                    self.requests_total.with_label_values(&[signal, "accepted"]).inc();
                    return outcome;
                }
                Err(retryable) => match backoff.next_delay() {
                    Some(delay) => {
                        self.retries_total.with_label_values(&[signal]).inc();
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        timer.observe_duration();
                        self.send_failed_total.with_label_values(&[signal, "max_elapsed_time"]).inc();
                        self.requests_total.with_label_values(&[signal, "failed"]).inc();
                        warn!(signal, attempts = backoff.attempts(), "giving up on batch after max_elapsed_time");
                        return retryable;
                    }
                },
            }
        }
    }
}

#[async_trait]
impl Exporter for OtlpExporter {
    async fn export(&mut self, data: AnyBatch) -> Result<ConsumeOutcome, dbscope_engine::Error> {
        if data.is_empty() {
            return Ok(ConsumeOutcome::Accepted);
        }
        let path = signal_path(&data);
        let signal = match &data {
            AnyBatch::Metrics(_) => "metrics",
            AnyBatch::Logs(_) => "logs",
            AnyBatch::Traces(_) => "traces",
        };
        let json = codec::encode(&data);
        let body = match gzip(&serde_json::to_vec(&json).unwrap_or_default()) {
            Ok(body) => body,
            Err(err) => {
                self.send_failed_total.with_label_values(&[signal, "encode"]).inc();
                return Ok(ConsumeOutcome::PermanentError(format!("failed to gzip export body: {err}")));
            }
        };
        let url = format!("{}{}", self.config.endpoint.trim_end_matches('/'), path);
        Ok(self.send_with_retry(signal, url, body).await)
    }
}

/// Registers the `otlphttp` exporter factory.
pub fn register(registry: &mut Registry, metrics: MetricsRegistryHandle) {
    registry.register_exporter(
        "otlphttp",
        Box::new(move |settings| {
            OtlpExporter::from_settings(settings, metrics.clone())
                .map(|e| Box::new(e) as Box<dyn dbscope_engine::Exporter>)
                .map_err(Into::into)
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbscope_telemetry::MetricsRegistry;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(endpoint: String) -> OtlpExporterConfig {
        OtlpExporterConfig {
            endpoint,
            api_key: Some("secret".to_string()),
            tenant: None,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            max_elapsed_time: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
        }
    }

    fn exporter(endpoint: String, suffix: &str) -> OtlpExporter {
        let metrics = MetricsRegistry::new();
        OtlpExporter {
            config: config(endpoint),
            client: reqwest::Client::new(),
            requests_total: metrics.counter_vec(&format!("t1_{suffix}"), "t", &["signal", "outcome"]).unwrap(),
            retries_total: metrics.counter_vec(&format!("t2_{suffix}"), "t", &["signal"]).unwrap(),
            send_failed_total: metrics.counter_vec(&format!("t3_{suffix}"), "t", &["signal", "reason"]).unwrap(),
            export_duration_seconds: metrics.histogram_vec(&format!("t4_{suffix}"), "t", &["signal"]).unwrap(),
        }
    }

    #[tokio::test]
    async fn retries_on_503_then_succeeds_exactly_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/logs"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/logs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let exp = exporter(server.uri(), "retry");
        let outcome = exp
            .send_with_retry("logs", format!("{}/v1/logs", server.uri()), b"{}".to_vec())
            .await;
        assert!(matches!(outcome, ConsumeOutcome::Accepted));
        server.verify().await;
    }

    #[tokio::test]
    async fn permanent_4xx_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let exp = exporter(server.uri(), "permanent");
        let outcome = exp
            .send_with_retry("logs", format!("{}/v1/logs", server.uri()), b"{}".to_vec())
            .await;
        assert!(matches!(outcome, ConsumeOutcome::PermanentError(_)));
        server.verify().await;
    }

    #[tokio::test]
    async fn empty_batch_short_circuits_without_a_request() {
        let server = MockServer::start().await;
        let mut exp = exporter(server.uri(), "empty");
        let outcome = exp.export(AnyBatch::Metrics(dbscope_pdata::MetricsBatch::empty())).await.unwrap();
        assert!(matches!(outcome, ConsumeOutcome::Accepted));
    }
}
