//! # Parking Telemetry - Metrics & Observability
//!
//! Prometheus metrics for the parking occupancy system:
//! - Registered and monitored lots
//! - Per-lot occupancy from the latest cycle
//! - Cycle outcomes and durations
//! - Registry store health
//! - API requests

use parking_core::{LotEvent, LotEventPayload, OccupancyCounts};
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Opts, Registry, TextEncoder,
};
use tracing::{debug, info};

/// Metrics collector for the parking occupancy system
pub struct MetricsCollector {
    registry: Registry,

    // Lot metrics
    lots_registered: IntGauge,
    lots_monitored: IntGauge,
    lot_occupied: IntGaugeVec,
    lot_total: IntGaugeVec,
    lot_freed: IntGaugeVec,

    // Cycle metrics
    cycles_total: IntCounterVec,
    detections_total: IntCounter,
    last_cycle_seconds: Gauge,
    cycle_duration: Histogram,

    // Store metrics
    store_up: IntGauge,

    // API metrics
    api_requests_total: IntCounterVec,
    api_request_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let lots_registered = IntGauge::new("parking_lots_registered", "Lots present in the registry")?;
        registry.register(Box::new(lots_registered.clone()))?;

        let lots_monitored = IntGauge::new("parking_lots_monitored", "Lots with a running monitoring task")?;
        registry.register(Box::new(lots_monitored.clone()))?;

        let lot_occupied = IntGaugeVec::new(
            Opts::new("parking_lot_occupied", "Occupied count from the latest cycle"),
            &["lot_id"],
        )?;
        registry.register(Box::new(lot_occupied.clone()))?;

        let lot_total = IntGaugeVec::new(
            Opts::new("parking_lot_spots", "Spot count at the latest cycle"),
            &["lot_id"],
        )?;
        registry.register(Box::new(lot_total.clone()))?;

        let lot_freed = IntGaugeVec::new(
            Opts::new("parking_lot_freed", "Free spots from the latest cycle"),
            &["lot_id"],
        )?;
        registry.register(Box::new(lot_freed.clone()))?;

        let cycles_total = IntCounterVec::new(
            Opts::new("parking_cycles_total", "Monitoring cycles by outcome"),
            &["lot_id", "outcome"],
        )?;
        registry.register(Box::new(cycles_total.clone()))?;

        let detections_total = IntCounter::new("parking_detections_total", "Vehicles detected across all cycles")?;
        registry.register(Box::new(detections_total.clone()))?;

        let last_cycle_seconds = Gauge::new("parking_last_cycle_seconds", "Duration of the most recent cycle")?;
        registry.register(Box::new(last_cycle_seconds.clone()))?;

        let cycle_duration = Histogram::with_opts(
            HistogramOpts::new("parking_cycle_duration_seconds", "Monitoring cycle duration")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;
        registry.register(Box::new(cycle_duration.clone()))?;

        let store_up = IntGauge::new("parking_store_up", "Registry store health")?;
        registry.register(Box::new(store_up.clone()))?;

        let api_requests_total = IntCounterVec::new(
            Opts::new("parking_api_requests_total", "API requests"),
            &["method", "path", "status"],
        )?;
        registry.register(Box::new(api_requests_total.clone()))?;

        let api_request_duration = HistogramVec::new(
            HistogramOpts::new("parking_api_request_duration_seconds", "API request duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["method", "path"],
        )?;
        registry.register(Box::new(api_request_duration.clone()))?;

        info!("Metrics collector initialized");

        Ok(Self {
            registry,
            lots_registered,
            lots_monitored,
            lot_occupied,
            lot_total,
            lot_freed,
            cycles_total,
            detections_total,
            last_cycle_seconds,
            cycle_duration,
            store_up,
            api_requests_total,
            api_request_duration,
        })
    }

    /// Get Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    // ========================================================================
    // LOT METRICS
    // ========================================================================

    pub fn set_lots_registered(&self, count: i64) {
        self.lots_registered.set(count);
    }

    pub fn set_lots_monitored(&self, count: i64) {
        self.lots_monitored.set(count);
    }

    /// Record the counts of a finished cycle
    pub fn set_occupancy(&self, lot_id: &str, counts: &OccupancyCounts) {
        self.lot_occupied.with_label_values(&[lot_id]).set(counts.occupied as i64);
        self.lot_total.with_label_values(&[lot_id]).set(counts.total as i64);
        self.lot_freed.with_label_values(&[lot_id]).set(counts.freed);
    }

    /// Drop every per-lot series of a removed lot
    pub fn forget_lot(&self, lot_id: &str) {
        let _ = self.lot_occupied.remove_label_values(&[lot_id]);
        let _ = self.lot_total.remove_label_values(&[lot_id]);
        let _ = self.lot_freed.remove_label_values(&[lot_id]);
        for outcome in ["completed", "failed"] {
            let _ = self.cycles_total.remove_label_values(&[lot_id, outcome]);
        }
    }

    // ========================================================================
    // CYCLE METRICS
    // ========================================================================

    pub fn record_cycle(&self, lot_id: &str, completed: bool) {
        let outcome = if completed { "completed" } else { "failed" };
        self.cycles_total.with_label_values(&[lot_id, outcome]).inc();
    }

    pub fn record_detections(&self, count: u64) {
        self.detections_total.inc_by(count);
    }

    pub fn record_cycle_duration(&self, seconds: f64) {
        self.last_cycle_seconds.set(seconds);
        self.cycle_duration.observe(seconds);
    }

    /// Update metrics from a lot event
    pub fn observe_event(&self, event: &LotEvent) {
        let lot_id = event.lot_id.as_str();

        match &event.payload {
            LotEventPayload::Registered { .. } => self.lots_registered.inc(),
            LotEventPayload::Removed => {
                self.lots_registered.dec();
                self.forget_lot(lot_id);
            }
            LotEventPayload::SpotsUpdated { .. } => {}
            LotEventPayload::CycleCompleted { counts, detections } => {
                self.record_cycle(lot_id, true);
                self.record_detections(*detections as u64);
                self.set_occupancy(lot_id, counts);
            }
            LotEventPayload::CycleFailed { .. } => self.record_cycle(lot_id, false),
        }

        debug!(lot_id, event = ?event.event_type(), "Observed event");
    }

    // ========================================================================
    // STORE METRICS
    // ========================================================================

    pub fn set_store_up(&self, up: bool) {
        self.store_up.set(if up { 1 } else { 0 });
    }

    // ========================================================================
    // API METRICS
    // ========================================================================

    /// Record API request
    pub fn record_api_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        self.api_requests_total
            .with_label_values(&[method, path, &status.to_string()])
            .inc();
        self.api_request_duration
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }
}

// ============================================================================
// TESTS
// ============================================================================
