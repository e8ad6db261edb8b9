//! # bw-serve
//!
//! Serving side of Bloomwise: loads the Production model once at startup and
//! answers single predictions over a small HTTP/1.1 front end. Every request
//! leaves one record in the audit sink, and request counts and latencies are
//! exposed for Prometheus at `GET /metrics`.

pub mod http;
pub mod metrics;
pub mod service;

pub use http::{handle_connection, route, serve, Body, HttpResponse};
pub use metrics::ServeMetrics;
pub use service::{Prediction, PredictionService};
