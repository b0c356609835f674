//! Prometheus metrics for the pipeline

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Pipeline counters registered against one registry
pub struct MetricsCollector {
    registry: Registry,
    articles_collected: IntCounter,
    collection_failures: IntCounter,
    jobs_total: IntCounterVec,
}

impl MetricsCollector {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let articles_collected = IntCounter::with_opts(
            Opts::new(
                "articles_collected_total",
                "Articles persisted by collection runs",
            )
            .namespace("newswire"),
        )?;
        let collection_failures = IntCounter::with_opts(
            Opts::new(
                "collection_failures_total",
                "Source polls that ended in failure",
            )
            .namespace("newswire"),
        )?;
        let jobs_total = IntCounterVec::new(
            Opts::new("jobs_total", "Scheduler jobs by kind and final status")
                .namespace("newswire"),
            &["kind", "status"],
        )?;

        registry.register(Box::new(articles_collected.clone()))?;
        registry.register(Box::new(collection_failures.clone()))?;
        registry.register(Box::new(jobs_total.clone()))?;

        Ok(Self {
            registry,
            articles_collected,
            collection_failures,
            jobs_total,
        })
    }

    pub fn record_articles_collected(&self, count: usize) {
        self.articles_collected.inc_by(count as u64);
    }

    pub fn record_collection_failures(&self, count: usize) {
        self.collection_failures.inc_by(count as u64);
    }

    pub fn record_job(&self, kind: &str, status: &str) {
        self.jobs_total.with_label_values(&[kind, status]).inc();
    }

    /// Render the registry in the Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %err, "metrics encoding failed");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.record_articles_collected(7);
        metrics.record_collection_failures(1);
        metrics.record_job("collect_all", "completed");

        let rendered = metrics.render();
        assert!(rendered.contains("newswire_articles_collected_total 7"));
        assert!(rendered.contains("newswire_collection_failures_total 1"));
        assert!(rendered.contains("collect_all"));
    }
}
