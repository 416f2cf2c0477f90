// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics collection for the proxy.
//!
//! Tracks cache effectiveness and upstream health.

use prometheus::core::Collector;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};
use std::sync::Arc;

use crate::error::AppError;

/// Metrics collector for the proxy
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,

    // Cache metrics
    pub cache_hits: IntCounter,
    pub cache_misses: IntCounter,
    pub cache_stores: IntCounter,
    pub cache_size: IntGauge,

    // Upstream metrics
    pub upstream_requests: IntCounter,
    pub upstream_failures: IntCounter,
    pub upstream_latency: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, AppError> {
        let registry = Registry::new();

        let cache_hits = IntCounter::with_opts(Opts::new(
            "opendata_proxy_cache_hits_total",
            "Total number of cache hits",
        ))
        .map_err(metric_error)?;

        let cache_misses = IntCounter::with_opts(Opts::new(
            "opendata_proxy_cache_misses_total",
            "Total number of cache misses",
        ))
        .map_err(metric_error)?;

        let cache_stores = IntCounter::with_opts(Opts::new(
            "opendata_proxy_cache_stores_total",
            "Total number of upstream responses stored in the cache",
        ))
        .map_err(metric_error)?;

        let cache_size = IntGauge::with_opts(Opts::new(
            "opendata_proxy_cache_size",
            "Current number of cached upstream responses",
        ))
        .map_err(metric_error)?;

        let upstream_requests = IntCounter::with_opts(Opts::new(
            "opendata_proxy_upstream_requests_total",
            "Total number of requests sent to upstream APIs",
        ))
        .map_err(metric_error)?;

        let upstream_failures = IntCounter::with_opts(Opts::new(
            "opendata_proxy_upstream_failures_total",
            "Total number of upstream requests that failed or returned an error status",
        ))
        .map_err(metric_error)?;

        let upstream_latency = Histogram::with_opts(
            HistogramOpts::new(
                "opendata_proxy_upstream_latency_seconds",
                "Duration of upstream requests in seconds",
            )
            .buckets(vec![
                0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.0, 5.0, 10.0,
            ]),
        )
        .map_err(metric_error)?;

        register(&registry, &cache_hits)?;
        register(&registry, &cache_misses)?;
        register(&registry, &cache_stores)?;
        register(&registry, &cache_size)?;
        register(&registry, &upstream_requests)?;
        register(&registry, &upstream_failures)?;
        register(&registry, &upstream_latency)?;

        Ok(Self {
            registry: Arc::new(registry),
            cache_hits,
            cache_misses,
            cache_stores,
            cache_size,
            upstream_requests,
            upstream_failures,
            upstream_latency,
        })
    }

    /// Record a cache hit
    pub fn record_cache_hit(&self) {
        self.cache_hits.inc();
    }

    /// Record a cache miss
    pub fn record_cache_miss(&self) {
        self.cache_misses.inc();
    }

    /// Record a cache store along with the resulting cache size
    pub fn record_cache_store(&self, size: usize) {
        self.cache_stores.inc();
        self.cache_size.set(size as i64);
    }

    pub fn record_upstream_request(&self) {
        self.upstream_requests.inc();
    }

    pub fn record_upstream_failure(&self) {
        self.upstream_failures.inc();
    }

    /// Observe latency for an upstream request in seconds
    pub fn record_upstream_latency(&self, seconds: f64) {
        self.upstream_latency.observe(seconds);
    }

    /// Export metrics in Prometheus format
    pub fn export(&self) -> Result<String, AppError> {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode metrics: {}", e)))?;

        String::from_utf8(buffer).map_err(|e| {
            AppError::Internal(anyhow::anyhow!(
                "Failed to convert metrics to string: {}",
                e
            ))
        })
    }
}

fn register<C>(registry: &Registry, collector: &C) -> Result<(), AppError>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to register metric: {}", e)))
}

fn metric_error(e: prometheus::Error) -> AppError {
    AppError::Internal(anyhow::anyhow!("Failed to create metric: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_contains_recorded_series() {
        let metrics = Metrics::new().unwrap();
        metrics.record_cache_hit();
        metrics.record_cache_store(3);
        metrics.record_upstream_latency(0.2);

        let text = metrics.export().unwrap();
        assert!(text.contains("opendata_proxy_cache_hits_total 1"));
        assert!(text.contains("opendata_proxy_cache_size 3"));
        assert!(text.contains("opendata_proxy_upstream_latency_seconds_count 1"));
    }
}
