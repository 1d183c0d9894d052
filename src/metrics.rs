//! Prometheus metrics for LetheCache.
//!
//! The registry doubles as the metrics sink the command handler reports
//! into: a per-verb command counter, hit/miss outcomes for the
//! read-oriented verbs, and a snapshot consumed by the `stats` protocol
//! command.

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

/// Verbs tracked by the per-command counter
const VERBS: &[&str] = &[
    "set",
    "add",
    "replace",
    "append",
    "prepend",
    "cas",
    "get",
    "gets",
    "delete",
    "touch",
    "incr",
    "decr",
    "flush_all",
    "stats",
    "lru_crawler",
    "version",
    "quit",
];

/// Read-oriented verbs that report hit/miss outcomes
pub const READ_VERBS: &[&str] = &["get", "gets", "delete", "touch", "incr", "decr", "cas"];

/// Global metrics instance
pub struct Metrics {
    pub registry: Registry,

    // Per-verb command counters
    commands: IntCounterVec,

    // Hit/miss outcomes for read-oriented verbs
    hits: IntCounterVec,
    misses: IntCounterVec,

    // CAS writes rejected on token mismatch
    pub cas_badval: IntCounter,

    // Connection metrics
    pub active_connections: IntGauge,
    pub total_connections: IntCounter,
    pub rejected_connections: IntCounter,

    // Bytes counters
    pub bytes_read: IntCounter,
    pub bytes_written: IntCounter,

    // Latency histogram
    pub cmd_latency: Histogram,

    // Error counters
    pub protocol_errors: IntCounter,
}

impl Metrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        let registry = Registry::new();

        let commands = IntCounterVec::new(
            Opts::new("lethecache_commands_total", "Commands executed, by verb"),
            &["verb"],
        )
        .unwrap();
        let hits = IntCounterVec::new(
            Opts::new("lethecache_hits_total", "Read-verb hits, by verb"),
            &["verb"],
        )
        .unwrap();
        let misses = IntCounterVec::new(
            Opts::new("lethecache_misses_total", "Read-verb misses, by verb"),
            &["verb"],
        )
        .unwrap();

        let cas_badval = IntCounter::new(
            "lethecache_cas_badval_total",
            "CAS writes rejected on token mismatch",
        )
        .unwrap();

        let active_connections = IntGauge::new(
            "lethecache_active_connections",
            "Current active connections",
        )
        .unwrap();
        let total_connections =
            IntCounter::new("lethecache_connections_total", "Total connections accepted").unwrap();
        let rejected_connections = IntCounter::new(
            "lethecache_rejected_connections_total",
            "Total connections rejected",
        )
        .unwrap();

        let bytes_read =
            IntCounter::new("lethecache_bytes_read_total", "Total bytes read").unwrap();
        let bytes_written =
            IntCounter::new("lethecache_bytes_written_total", "Total bytes written").unwrap();

        let cmd_latency = Histogram::with_opts(
            HistogramOpts::new(
                "lethecache_cmd_latency_seconds",
                "Command latency in seconds",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.002, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
        )
        .unwrap();

        let protocol_errors =
            IntCounter::new("lethecache_protocol_errors_total", "Total protocol errors").unwrap();

        registry.register(Box::new(commands.clone())).unwrap();
        registry.register(Box::new(hits.clone())).unwrap();
        registry.register(Box::new(misses.clone())).unwrap();
        registry.register(Box::new(cas_badval.clone())).unwrap();
        registry
            .register(Box::new(active_connections.clone()))
            .unwrap();
        registry
            .register(Box::new(total_connections.clone()))
            .unwrap();
        registry
            .register(Box::new(rejected_connections.clone()))
            .unwrap();
        registry.register(Box::new(bytes_read.clone())).unwrap();
        registry.register(Box::new(bytes_written.clone())).unwrap();
        registry.register(Box::new(cmd_latency.clone())).unwrap();
        registry
            .register(Box::new(protocol_errors.clone()))
            .unwrap();

        Self {
            registry,
            commands,
            hits,
            misses,
            cas_badval,
            active_connections,
            total_connections,
            rejected_connections,
            bytes_read,
            bytes_written,
            cmd_latency,
            protocol_errors,
        }
    }

    /// Count one executed command
    pub fn record_command(&self, verb: &str) {
        self.commands.with_label_values(&[verb]).inc();
    }

    /// Count a hit outcome for a read-oriented verb
    pub fn record_hit(&self, verb: &str) {
        self.hits.with_label_values(&[verb]).inc();
    }

    /// Count a miss outcome for a read-oriented verb
    pub fn record_miss(&self, verb: &str) {
        self.misses.with_label_values(&[verb]).inc();
    }

    /// Count a CAS token mismatch
    pub fn record_cas_badval(&self) {
        self.cas_badval.inc();
    }

    /// Command count for a verb
    pub fn command_count(&self, verb: &str) -> u64 {
        self.commands.with_label_values(&[verb]).get()
    }

    pub fn hit_count(&self, verb: &str) -> u64 {
        self.hits.with_label_values(&[verb]).get()
    }

    pub fn miss_count(&self, verb: &str) -> u64 {
        self.misses.with_label_values(&[verb]).get()
    }

    /// Name/value pairs for the `stats` protocol command
    pub fn snapshot(&self) -> Vec<(String, String)> {
        let mut stats = Vec::new();
        for verb in VERBS {
            stats.push((format!("cmd_{verb}"), self.command_count(verb).to_string()));
        }
        for verb in READ_VERBS {
            stats.push((format!("{verb}_hits"), self.hit_count(verb).to_string()));
            stats.push((format!("{verb}_misses"), self.miss_count(verb).to_string()));
        }
        stats.push(("cas_badval".to_string(), self.cas_badval.get().to_string()));
        stats.push((
            "curr_connections".to_string(),
            self.active_connections.get().to_string(),
        ));
        stats.push((
            "total_connections".to_string(),
            self.total_connections.get().to_string(),
        ));
        stats.push((
            "rejected_connections".to_string(),
            self.rejected_connections.get().to_string(),
        ));
        stats.push(("bytes_read".to_string(), self.bytes_read.get().to_string()));
        stats.push((
            "bytes_written".to_string(),
            self.bytes_written.get().to_string(),
        ));
        stats.push((
            "protocol_errors".to_string(),
            self.protocol_errors.get().to_string(),
        ));
        stats
    }

    /// Get Prometheus formatted metrics
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let metrics = Metrics::new();
        metrics.record_command("get");
        metrics.record_command("get");
        metrics.record_command("set");
        metrics.record_hit("get");
        metrics.record_miss("get");
        metrics.record_cas_badval();
        metrics.active_connections.set(5);

        assert_eq!(metrics.command_count("get"), 2);
        assert_eq!(metrics.command_count("set"), 1);
        assert_eq!(metrics.hit_count("get"), 1);
        assert_eq!(metrics.miss_count("get"), 1);

        let snapshot = metrics.snapshot();
        let lookup = |name: &str| {
            snapshot
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(lookup("cmd_get"), "2");
        assert_eq!(lookup("get_hits"), "1");
        assert_eq!(lookup("get_misses"), "1");
        assert_eq!(lookup("cas_badval"), "1");
        assert_eq!(lookup("curr_connections"), "5");
    }

    #[test]
    fn test_gather_contains_families() {
        let metrics = Metrics::new();
        metrics.record_command("version");
        let output = metrics.gather();
        assert!(output.contains("lethecache_commands_total"));
        assert!(output.contains("lethecache_active_connections"));
    }
}
