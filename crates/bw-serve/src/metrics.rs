//! Request and prediction metrics, rendered in the Prometheus text format.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use bw_types::BwError;

/// Upper bounds (seconds) of the request latency histogram buckets.
pub const LATENCY_BUCKETS: [f64; 10] = [0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0];

/// Prometheus text exposition content type.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Route label for paths no handler serves; keeps label cardinality bounded.
pub const UNMATCHED: &str = "unmatched";

#[derive(Debug, Clone, Default)]
struct Histogram {
    buckets: [u64; LATENCY_BUCKETS.len()],
    count: u64,
    sum: f64,
}

impl Histogram {
    fn observe(&mut self, seconds: f64) {
        if let Some(i) = LATENCY_BUCKETS.iter().position(|le| seconds <= *le) {
            self.buckets[i] += 1;
        }
        self.count += 1;
        self.sum += seconds;
    }
}

/// Thread-safe counters shared by every connection task.
#[derive(Debug, Default)]
pub struct ServeMetrics {
    requests: DashMap<(&'static str, &'static str, u16), u64>,
    latency: DashMap<(&'static str, &'static str), Histogram>,
    predictions: DashMap<usize, u64>,
    prediction_errors: DashMap<&'static str, u64>,
    started: OnceLock<Instant>,
}

impl ServeMetrics {
    pub fn new() -> Self {
        let metrics = Self::default();
        let _ = metrics.started.set(Instant::now());
        metrics
    }

    /// Count one handled request and observe how long its handler took.
    pub fn record_request(&self, method: &str, handler: &str, status: u16, elapsed: Duration) {
        let method = method_label(method);
        let handler = handler_label(handler);
        *self.requests.entry((method, handler, status)).or_default() += 1;
        self.latency
            .entry((method, handler))
            .or_default()
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_prediction(&self, label: usize) {
        *self.predictions.entry(label).or_default() += 1;
    }

    pub fn record_prediction_error(&self, error: &BwError) {
        let kind = match error {
            BwError::Data(_) => "invalid_input",
            BwError::Model(_) => "model",
            BwError::Io(_) | BwError::Serialization(_) => "audit",
            _ => "internal",
        };
        *self.prediction_errors.entry(kind).or_default() += 1;
    }

    pub fn requests_total(&self) -> u64 {
        self.requests.iter().map(|entry| *entry.value()).sum()
    }

    pub fn prediction_errors_total(&self) -> u64 {
        self.prediction_errors.iter().map(|entry| *entry.value()).sum()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Render every series. Label sets are sorted so scrapes are stable.
    pub fn render(&self, model_version: &str) -> String {
        let mut out = String::new();

        out.push_str("# HELP bloomwise_http_requests_total Total number of HTTP requests\n");
        out.push_str("# TYPE bloomwise_http_requests_total counter\n");
        let mut requests: Vec<_> = self.requests.iter().map(|e| (*e.key(), *e.value())).collect();
        requests.sort();
        for ((method, handler, status), count) in requests {
            out.push_str(&format!(
                "bloomwise_http_requests_total{{method=\"{method}\",handler=\"{handler}\",status=\"{status}\"}} {count}\n"
            ));
        }

        out.push_str("# HELP bloomwise_http_request_duration_seconds Request handling latency\n");
        out.push_str("# TYPE bloomwise_http_request_duration_seconds histogram\n");
        let mut latency: Vec<_> = self.latency.iter().map(|e| (*e.key(), e.value().clone())).collect();
        latency.sort_by(|a, b| a.0.cmp(&b.0));
        for ((method, handler), histogram) in latency {
            let labels = format!("method=\"{method}\",handler=\"{handler}\"");
            let mut cumulative = 0;
            for (le, count) in LATENCY_BUCKETS.iter().zip(histogram.buckets) {
                cumulative += count;
                out.push_str(&format!(
                    "bloomwise_http_request_duration_seconds_bucket{{{labels},le=\"{le}\"}} {cumulative}\n"
                ));
            }
            out.push_str(&format!(
                "bloomwise_http_request_duration_seconds_bucket{{{labels},le=\"+Inf\"}} {}\n",
                histogram.count
            ));
            out.push_str(&format!(
                "bloomwise_http_request_duration_seconds_sum{{{labels}}} {}\n",
                histogram.sum
            ));
            out.push_str(&format!(
                "bloomwise_http_request_duration_seconds_count{{{labels}}} {}\n",
                histogram.count
            ));
        }

        out.push_str("# HELP bloomwise_predictions_total Successful predictions by class\n");
        out.push_str("# TYPE bloomwise_predictions_total counter\n");
        let mut predictions: Vec<_> = self.predictions.iter().map(|e| (*e.key(), *e.value())).collect();
        predictions.sort();
        for (label, count) in predictions {
            out.push_str(&format!("bloomwise_predictions_total{{class=\"{label}\"}} {count}\n"));
        }

        out.push_str("# HELP bloomwise_prediction_errors_total Rejected or failed predictions\n");
        out.push_str("# TYPE bloomwise_prediction_errors_total counter\n");
        let mut errors: Vec<_> = self
            .prediction_errors
            .iter()
            .map(|e| (*e.key(), *e.value()))
            .collect();
        errors.sort();
        for (kind, count) in errors {
            out.push_str(&format!("bloomwise_prediction_errors_total{{kind=\"{kind}\"}} {count}\n"));
        }

        out.push_str("# HELP bloomwise_model_info Model version being served\n");
        out.push_str("# TYPE bloomwise_model_info gauge\n");
        out.push_str(&format!("bloomwise_model_info{{version=\"{model_version}\"}} 1\n"));

        out.push_str("# HELP bloomwise_uptime_seconds Server uptime in seconds\n");
        out.push_str("# TYPE bloomwise_uptime_seconds gauge\n");
        out.push_str(&format!("bloomwise_uptime_seconds {}\n", self.uptime_seconds()));
        out
    }
}

fn method_label(method: &str) -> &'static str {
    match method {
        "GET" => "GET",
        "POST" => "POST",
        "PUT" => "PUT",
        "DELETE" => "DELETE",
        "PATCH" => "PATCH",
        "HEAD" => "HEAD",
        "OPTIONS" => "OPTIONS",
        _ => "OTHER",
    }
}

fn handler_label(path: &str) -> &'static str {
    match path.split('?').next().unwrap_or(path) {
        "/" => "/",
        "/health" => "/health",
        "/predict" => "/predict",
        "/metrics" => "/metrics",
        _ => UNMATCHED,
    }
}
