//! Prometheus exposition of the collector counters
//!
//! Every tally is exported as `trace_monitor_total_<name>` and the
//! active-worker gauge as `trace_monitor_count_<name>`, each carrying the
//! node, app and env labels.

use parking_lot::Mutex;
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use std::sync::Arc;

use super::{Counter, IngestCounters, StoreCounters};

const NAMESPACE: &str = "trace_monitor";

/// Labels attached to every exported series
#[derive(Debug, Clone)]
pub struct MetricLabels {
    pub node: String,
    pub app: String,
    pub env: String,
}

impl MetricLabels {
    fn into_map(self) -> HashMap<String, String> {
        HashMap::from([
            ("node".to_string(), self.node),
            ("app".to_string(), self.app),
            ("env".to_string(), self.env),
        ])
    }
}

pub struct MetricsExporter {
    store: Arc<StoreCounters>,
    ingest: Arc<IngestCounters>,
    registry: Registry,
    /// Same order as [`tallies`]
    totals: Vec<IntCounter>,
    active: IntGauge,
    // Serializes scrapes so two renders never interleave their updates
    render_lock: Mutex<()>,
}

impl MetricsExporter {
    pub fn new(
        store: Arc<StoreCounters>,
        ingest: Arc<IngestCounters>,
        labels: MetricLabels,
    ) -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some(NAMESPACE.to_string()), Some(labels.into_map()))?;

        let mut totals = Vec::new();
        for tally in tallies(&store, &ingest) {
            let counter = IntCounter::with_opts(Opts::new(
                format!("total_{}", tally.name()),
                help(tally.name()),
            ))?;
            registry.register(Box::new(counter.clone()))?;
            totals.push(counter);
        }

        let active = IntGauge::with_opts(Opts::new(
            format!("count_{}", store.active_workers.name()),
            "Number of worker ids holding an active trace",
        ))?;
        registry.register(Box::new(active.clone()))?;

        Ok(Self {
            store,
            ingest,
            registry,
            totals,
            active,
            render_lock: Mutex::new(()),
        })
    }

    /// Copy the current counter values and encode them in text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let _guard = self.render_lock.lock();

        for (exported, tally) in self.totals.iter().zip(tallies(&self.store, &self.ingest)) {
            let value = tally.count();
            let current = exported.get();
            if value < current {
                // The source was reset
                exported.reset();
                exported.inc_by(value);
            } else {
                exported.inc_by(value - current);
            }
        }
        self.active
            .set(i64::try_from(self.store.active_workers.count()).unwrap_or(i64::MAX));

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn tallies<'a>(store: &'a StoreCounters, ingest: &'a IngestCounters) -> [&'a Counter; 8] {
    [
        &store.trace_set,
        &store.span_set,
        &store.span_close,
        &store.trace_delete,
        &ingest.packets_captured,
        &ingest.packets_parsed,
        &ingest.packets_rejected,
        &ingest.queue_resets,
    ]
}

fn help(name: &str) -> &'static str {
    match name {
        "trace_set" => "Total traces opened",
        "span_set" => "Total spans set",
        "all_span_close" => "Total spans closed",
        "trace_delete" => "Total traces released",
        "packages_caught" => "Total packets received",
        "packages_parse" => "Total packets processed",
        "packages_rejected" => "Total packets rejected as undecodable",
        "channel_reset" => "Total resets of a full packet queue",
        _ => "Collector tally",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exporter() -> (MetricsExporter, Arc<StoreCounters>, Arc<IngestCounters>) {
        let store = Arc::new(StoreCounters::new());
        let ingest = Arc::new(IngestCounters::new());
        let labels = MetricLabels {
            node: "web-1".to_string(),
            app: "shop".to_string(),
            env: "prod".to_string(),
        };
        let exporter = MetricsExporter::new(Arc::clone(&store), Arc::clone(&ingest), labels).unwrap();
        (exporter, store, ingest)
    }

    fn sample<'a>(text: &'a str, name: &str) -> &'a str {
        text.lines()
            .find(|line| line.starts_with(&format!("{}{{", name)))
            .unwrap_or_else(|| panic!("{} missing from:\n{}", name, text))
    }

    #[test]
    fn test_render_exports_every_counter() {
        let (exporter, store, ingest) = exporter();
        store.trace_set.increment();
        store.active_workers.increment();
        ingest.packets_captured.increment();
        ingest.packets_captured.increment();

        let text = exporter.render().unwrap();

        let line = sample(&text, "trace_monitor_total_trace_set");
        assert!(line.contains(r#"node="web-1""#));
        assert!(line.contains(r#"app="shop""#));
        assert!(line.contains(r#"env="prod""#));
        assert!(line.ends_with(" 1"));

        assert!(sample(&text, "trace_monitor_total_packages_caught").ends_with(" 2"));
        assert!(sample(&text, "trace_monitor_total_all_span_close").ends_with(" 0"));
        assert!(sample(&text, "trace_monitor_total_channel_reset").ends_with(" 0"));
        assert!(sample(&text, "trace_monitor_count_active_pid").ends_with(" 1"));
        assert!(text.contains("# TYPE trace_monitor_count_active_pid gauge"));
        assert!(text.contains("# TYPE trace_monitor_total_span_set counter"));
    }

    #[test]
    fn test_render_follows_counter_reset() {
        let (exporter, store, _) = exporter();
        for _ in 0..3 {
            store.span_set.increment();
        }
        assert!(sample(&exporter.render().unwrap(), "trace_monitor_total_span_set").ends_with(" 3"));

        store.reset();
        store.span_set.increment();
        assert!(sample(&exporter.render().unwrap(), "trace_monitor_total_span_set").ends_with(" 1"));
    }
}
