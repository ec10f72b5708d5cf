//! Per-tool request metrics and the Prometheus text endpoint.
//!
//! Tracks, labelled by tool name:
//! - request counts by outcome
//! - request latency histogram
//! - in-flight requests
//! - response size summary
//! - error counts by error class

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use axum::{extract::State, http::header, response::IntoResponse, routing::get, Router};

use crate::error::McpGithubError;

pub const APP_NAME: &str = "mcp-github-pr-issue-analyser";

/// Latency histogram upper bounds, in seconds.
pub const LATENCY_BUCKETS: [f64; 14] = [
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Default, Clone)]
struct Histogram {
    /// Per-bucket (non-cumulative) observation counts; exported cumulatively.
    buckets: [u64; LATENCY_BUCKETS.len()],
    sum: f64,
    count: u64,
}

impl Histogram {
    fn observe(&mut self, value: f64) {
        if let Some(idx) = LATENCY_BUCKETS.iter().position(|le| value <= *le) {
            self.buckets[idx] += 1;
        }
        self.sum += value;
        self.count += 1;
    }
}

#[derive(Debug, Default, Clone)]
struct Summary {
    sum: f64,
    count: u64,
}

#[derive(Debug, Default)]
struct Registry {
    requests: BTreeMap<(String, &'static str), u64>,
    errors: BTreeMap<(String, &'static str), u64>,
    active: BTreeMap<String, i64>,
    latency: BTreeMap<String, Histogram>,
    response_size: BTreeMap<String, Summary>,
}

/// Tool metrics collector
#[derive(Debug)]
pub struct Metrics {
    start_time: Instant,
    version: &'static str,
    inner: Mutex<Registry>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
            inner: Mutex::new(Registry::default()),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Counters stay usable even if a holder panicked mid-update.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark a tool call as in flight. Finish it with [`RequestTimer::success`]
    /// or [`RequestTimer::failure`].
    pub fn start(self: &Arc<Self>, tool: &str) -> RequestTimer {
        *self.registry().active.entry(tool.to_string()).or_insert(0) += 1;
        RequestTimer {
            metrics: Arc::clone(self),
            tool: tool.to_string(),
            started: Instant::now(),
            finished: false,
        }
    }

    fn record(&self, tool: &str, elapsed: Duration, outcome: Result<usize, &'static str>) {
        let mut reg = self.registry();

        let status = match outcome {
            Ok(bytes) => {
                let size = reg.response_size.entry(tool.to_string()).or_default();
                size.sum += bytes as f64;
                size.count += 1;
                "success"
            }
            Err(kind) => {
                *reg.errors.entry((tool.to_string(), kind)).or_insert(0) += 1;
                "error"
            }
        };

        *reg.requests.entry((tool.to_string(), status)).or_insert(0) += 1;
        reg.latency
            .entry(tool.to_string())
            .or_default()
            .observe(elapsed.as_secs_f64());
    }

    fn leave(&self, tool: &str) {
        if let Some(active) = self.registry().active.get_mut(tool) {
            *active -= 1;
        }
    }

    pub fn requests_total(&self, tool: &str, status: &str) -> u64 {
        self.registry()
            .requests
            .iter()
            .filter(|((t, s), _)| t == tool && *s == status)
            .map(|(_, v)| *v)
            .sum()
    }

    pub fn errors_total(&self, tool: &str, error_type: &str) -> u64 {
        self.registry()
            .errors
            .iter()
            .filter(|((t, k), _)| t == tool && *k == error_type)
            .map(|(_, v)| *v)
            .sum()
    }

    pub fn active_requests(&self, tool: &str) -> i64 {
        self.registry().active.get(tool).copied().unwrap_or(0)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Export metrics in Prometheus text format
    pub fn prometheus_export(&self) -> String {
        let reg = self.registry();
        let mut out = String::new();

        write_header(&mut out, "mcp_github_app_info", "Application information", "gauge");
        let _ = writeln!(
            out,
            "mcp_github_app_info{{version=\"{}\",name=\"{}\"}} 1",
            self.version, APP_NAME
        );

        write_header(&mut out, "mcp_github_uptime_seconds", "Server uptime in seconds", "gauge");
        let _ = writeln!(out, "mcp_github_uptime_seconds {}", self.uptime_secs());

        write_header(
            &mut out,
            "mcp_github_requests_total",
            "Total number of MCP tool requests",
            "counter",
        );
        for ((tool, status), count) in &reg.requests {
            let _ = writeln!(
                out,
                "mcp_github_requests_total{{tool=\"{}\",status=\"{}\"}} {}",
                escape(tool),
                status,
                count
            );
        }

        write_header(
            &mut out,
            "mcp_github_request_duration_seconds",
            "Request duration in seconds",
            "histogram",
        );
        for (tool, hist) in &reg.latency {
            let tool = escape(tool);
            let mut cumulative: u64 = 0;
            for (le, n) in LATENCY_BUCKETS.iter().zip(hist.buckets.iter()) {
                cumulative += n;
                let _ = writeln!(
                    out,
                    "mcp_github_request_duration_seconds_bucket{{tool=\"{}\",le=\"{}\"}} {}",
                    tool, le, cumulative
                );
            }
            let _ = writeln!(
                out,
                "mcp_github_request_duration_seconds_bucket{{tool=\"{}\",le=\"+Inf\"}} {}",
                tool, hist.count
            );
            let _ = writeln!(
                out,
                "mcp_github_request_duration_seconds_sum{{tool=\"{}\"}} {}",
                tool, hist.sum
            );
            let _ = writeln!(
                out,
                "mcp_github_request_duration_seconds_count{{tool=\"{}\"}} {}",
                tool, hist.count
            );
        }

        write_header(
            &mut out,
            "mcp_github_active_requests",
            "Number of currently active requests",
            "gauge",
        );
        for (tool, active) in &reg.active {
            let _ = writeln!(
                out,
                "mcp_github_active_requests{{tool=\"{}\"}} {}",
                escape(tool),
                active
            );
        }

        write_header(
            &mut out,
            "mcp_github_response_size_bytes",
            "Size of response in bytes",
            "summary",
        );
        for (tool, size) in &reg.response_size {
            let tool = escape(tool);
            let _ = writeln!(
                out,
                "mcp_github_response_size_bytes_sum{{tool=\"{}\"}} {}",
                tool, size.sum
            );
            let _ = writeln!(
                out,
                "mcp_github_response_size_bytes_count{{tool=\"{}\"}} {}",
                tool, size.count
            );
        }

        write_header(&mut out, "mcp_github_errors_total", "Total number of errors", "counter");
        for ((tool, kind), count) in &reg.errors {
            let _ = writeln!(
                out,
                "mcp_github_errors_total{{tool=\"{}\",error_type=\"{}\"}} {}",
                escape(tool),
                kind,
                count
            );
        }

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// In-flight marker for one tool call. Dropping it unfinished (the call was
/// cancelled) only releases the active-request gauge.
pub struct RequestTimer {
    metrics: Arc<Metrics>,
    tool: String,
    started: Instant,
    finished: bool,
}

impl RequestTimer {
    pub fn success(mut self, response_bytes: usize) {
        self.finish(Ok(response_bytes));
    }

    pub fn failure(mut self, err: &McpGithubError) {
        self.finish(Err(err.kind()));
    }

    fn finish(&mut self, outcome: Result<usize, &'static str>) {
        self.metrics
            .record(&self.tool, self.started.elapsed(), outcome);
        self.finished = true;
        self.metrics.leave(&self.tool);
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        if !self.finished {
            self.metrics.leave(&self.tool);
        }
    }
}

fn write_header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} {}", name, kind);
}

fn escape(label: &str) -> String {
    label
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], metrics.prometheus_export())
}

async fn health_handler() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain")], "OK")
}

/// Serve `/metrics` and `/health` on an already-bound listener.
pub async fn serve(metrics: Arc<Metrics>, listener: tokio::net::TcpListener) -> std::io::Result<()> {
    axum::serve(listener, router(metrics)).await
}

/// Start the metrics endpoint in the background on `0.0.0.0:port`. A bind
/// failure is logged and the MCP server carries on without it.
pub async fn spawn_metrics_server(metrics: Arc<Metrics>, port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            tracing::info!(%addr, "Prometheus metrics server started");
            tokio::spawn(async move {
                if let Err(e) = serve(metrics, listener).await {
                    tracing::error!(error = %e, "Metrics server stopped");
                }
            });
        }
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to start metrics server");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_and_failure_counted() {
        let metrics = Arc::new(Metrics::new());

        metrics.start("get_github_pr_content").success(120);
        metrics
            .start("get_github_pr_content")
            .failure(&McpGithubError::Unauthenticated("Bad credentials".into()));

        assert_eq!(metrics.requests_total("get_github_pr_content", "success"), 1);
        assert_eq!(metrics.requests_total("get_github_pr_content", "error"), 1);
        assert_eq!(
            metrics.errors_total("get_github_pr_content", "authentication_error"),
            1
        );
        assert_eq!(metrics.active_requests("get_github_pr_content"), 0);
    }

    #[test]
    fn test_active_gauge_tracks_in_flight() {
        let metrics = Arc::new(Metrics::new());

        let first = metrics.start("create_github_tag");
        let second = metrics.start("create_github_tag");
        assert_eq!(metrics.active_requests("create_github_tag"), 2);

        first.success(10);
        assert_eq!(metrics.active_requests("create_github_tag"), 1);

        // Cancelled call: gauge released, no request recorded.
        drop(second);
        assert_eq!(metrics.active_requests("create_github_tag"), 0);
        assert_eq!(metrics.requests_total("create_github_tag", "success"), 1);
        assert_eq!(metrics.requests_total("create_github_tag", "error"), 0);
    }

    #[test]
    fn test_histogram_buckets_are_cumulative() {
        let mut hist = Histogram::default();
        hist.observe(0.001);
        hist.observe(0.3);
        hist.observe(42.0);
        assert_eq!(hist.count, 3);
        assert_eq!(hist.buckets[0], 1);
        assert_eq!(hist.buckets.iter().sum::<u64>(), 2);

        let metrics = Metrics::new();
        metrics
            .registry()
            .latency
            .insert("get_ipv4_ipv6_info".to_string(), hist);
        let text = metrics.prometheus_export();

        assert!(text.contains(
            "mcp_github_request_duration_seconds_bucket{tool=\"get_ipv4_ipv6_info\",le=\"0.005\"} 1"
        ));
        assert!(text.contains(
            "mcp_github_request_duration_seconds_bucket{tool=\"get_ipv4_ipv6_info\",le=\"0.5\"} 2"
        ));
        assert!(text.contains(
            "mcp_github_request_duration_seconds_bucket{tool=\"get_ipv4_ipv6_info\",le=\"10\"} 2"
        ));
        assert!(text.contains(
            "mcp_github_request_duration_seconds_bucket{tool=\"get_ipv4_ipv6_info\",le=\"+Inf\"} 3"
        ));
        assert!(text.contains(
            "mcp_github_request_duration_seconds_count{tool=\"get_ipv4_ipv6_info\"} 3"
        ));
    }

    #[test]
    fn test_prometheus_export_format() {
        let metrics = Arc::new(Metrics::new());
        metrics.start("create_github_issue").success(64);
        metrics
            .start("create_github_issue")
            .failure(&McpGithubError::MissingParam("title".into()));

        let text = metrics.prometheus_export();
        assert!(text.contains("# TYPE mcp_github_requests_total counter"));
        assert!(text.contains("# TYPE mcp_github_request_duration_seconds histogram"));
        assert!(text.contains(&format!(
            "mcp_github_app_info{{version=\"{}\",name=\"{}\"}} 1",
            env!("CARGO_PKG_VERSION"),
            APP_NAME
        )));
        assert!(text
            .contains("mcp_github_requests_total{tool=\"create_github_issue\",status=\"success\"} 1"));
        assert!(text
            .contains("mcp_github_requests_total{tool=\"create_github_issue\",status=\"error\"} 1"));
        assert!(text.contains(
            "mcp_github_errors_total{tool=\"create_github_issue\",error_type=\"validation_error\"} 1"
        ));
        assert!(text.contains("mcp_github_response_size_bytes_sum{tool=\"create_github_issue\"} 64"));
        assert!(text.contains("mcp_github_active_requests{tool=\"create_github_issue\"} 0"));
    }

    #[test]
    fn test_escape_label() {
        assert_eq!(escape("a\"b\\c\nd"), "a\\\"b\\\\c\\nd");
    }

    #[tokio::test]
    async fn test_http_endpoints() {
        let metrics = Arc::new(Metrics::new());
        metrics.start("get_github_pr_diff").success(2048);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(Arc::clone(&metrics), listener));

        let client = reqwest::Client::new();

        let resp = client
            .get(format!("http://{}/metrics", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        assert!(resp
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/plain; version=0.0.4"));
        let body = resp.text().await.unwrap();
        assert!(body.contains("mcp_github_requests_total{tool=\"get_github_pr_diff\",status=\"success\"} 1"));

        let health = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(health.status().as_u16(), 200);
        assert_eq!(health.text().await.unwrap(), "OK");

        let missing = client
            .get(format!("http://{}/nope", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status().as_u16(), 404);
    }
}
