use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Command execution (outcome, latency)
// - Ledger appends and concurrency conflicts
// - Rebuilds by reason
// - Snapshot writes by result
// - Live coordinators
//
// `render()` produces the Prometheus text format; exposing it is up to the
// embedding application.
// ============================================================================

pub struct EngineMetrics {
    registry: Registry,

    // Command Metrics
    pub commands_total: IntCounterVec,
    pub command_duration: HistogramVec,

    // Ledger Metrics
    pub events_appended_total: IntCounter,
    pub concurrency_conflicts_total: IntCounter,

    // Materialization Metrics
    pub rebuilds_total: IntCounterVec,
    pub snapshot_writes_total: IntCounterVec,

    // Coordinator Metrics
    pub active_coordinators: IntGauge,
}

impl EngineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let commands_total = IntCounterVec::new(
            Opts::new("es_commands_total", "Commands executed, by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let command_duration = HistogramVec::new(
            HistogramOpts::new("es_command_duration_seconds", "Command execution duration")
                .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["group"],
        )?;
        registry.register(Box::new(command_duration.clone()))?;

        let events_appended_total = IntCounter::new(
            "es_events_appended_total",
            "Events appended to the ledger",
        )?;
        registry.register(Box::new(events_appended_total.clone()))?;

        let concurrency_conflicts_total = IntCounter::new(
            "es_concurrency_conflicts_total",
            "Appends rejected by the optimistic concurrency check",
        )?;
        registry.register(Box::new(concurrency_conflicts_total.clone()))?;

        let rebuilds_total = IntCounterVec::new(
            Opts::new("es_rebuilds_total", "Full aggregate rebuilds, by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(rebuilds_total.clone()))?;

        let snapshot_writes_total = IntCounterVec::new(
            Opts::new("es_snapshot_writes_total", "Snapshot writes, by result"),
            &["result"],
        )?;
        registry.register(Box::new(snapshot_writes_total.clone()))?;

        let active_coordinators = IntGauge::new(
            "es_active_coordinators",
            "Partition coordinators currently running",
        )?;
        registry.register(Box::new(active_coordinators.clone()))?;

        Ok(Self {
            registry,
            commands_total,
            command_duration,
            events_appended_total,
            concurrency_conflicts_total,
            rebuilds_total,
            snapshot_writes_total,
            active_coordinators,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Helper to record a finished command
    pub fn record_command(&self, group: &str, outcome: &str, duration_secs: f64) {
        self.commands_total.with_label_values(&[outcome]).inc();
        self.command_duration.with_label_values(&[group]).observe(duration_secs);
    }

    pub fn record_appended(&self, count: usize) {
        self.events_appended_total.inc_by(count as u64);
    }

    pub fn record_conflict(&self) {
        self.concurrency_conflicts_total.inc();
    }

    pub fn record_rebuild(&self, reason: &str) {
        self.rebuilds_total.with_label_values(&[reason]).inc();
    }

    pub fn record_snapshot_write(&self, result: &str) {
        self.snapshot_writes_total.with_label_values(&[result]).inc();
    }

    /// Text exposition format of every registered metric.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
