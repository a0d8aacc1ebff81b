//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `booking_store_command_duration_seconds` - Writer command latency
//! - `booking_reservations_total` - Reservations created
//! - `booking_conflicts_total` - Bookings rejected because the slot was taken
//! - `booking_settlements_total{outcome}` - Settle outcomes
//! - `booking_subscriptions_total` - Subscriptions recorded
//! - `booking_outbox_deliveries_total{effect,result}` - Outbox delivery attempts
//! - `booking_outbox_dead_letters_total` - Entries moved to dead letters
//! - `booking_reminders_total{kind}` - Reminder claims

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics collector
///
/// Each instance owns its registry, so independent stores never collide.
#[derive(Clone)]
pub struct Metrics {
    /// Store command latency
    pub command_duration: Histogram,

    /// Reservations created
    pub reservations_total: IntCounter,

    /// Double-booking rejections
    pub conflicts_total: IntCounter,

    /// Settlements by outcome (settled, already_paid, skipped)
    pub settlements_total: IntCounterVec,

    /// Subscriptions recorded
    pub subscriptions_total: IntCounter,

    /// Outbox deliveries by effect and result
    pub outbox_deliveries: IntCounterVec,

    /// Outbox dead letters
    pub outbox_dead_letters: IntCounter,

    /// Reminder claims by kind
    pub reminders_total: IntCounterVec,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let command_duration = Histogram::with_opts(
            HistogramOpts::new(
                "booking_store_command_duration_seconds",
                "Histogram of store writer command latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250]),
        )?;
        registry.register(Box::new(command_duration.clone()))?;

        let reservations_total = IntCounter::with_opts(Opts::new(
            "booking_reservations_total",
            "Total reservations created",
        ))?;
        registry.register(Box::new(reservations_total.clone()))?;

        let conflicts_total = IntCounter::with_opts(Opts::new(
            "booking_conflicts_total",
            "Bookings rejected because the slot was already booked",
        ))?;
        registry.register(Box::new(conflicts_total.clone()))?;

        let settlements_total = IntCounterVec::new(
            Opts::new("booking_settlements_total", "Settle outcomes"),
            &["outcome"],
        )?;
        registry.register(Box::new(settlements_total.clone()))?;

        let subscriptions_total = IntCounter::with_opts(Opts::new(
            "booking_subscriptions_total",
            "Total subscriptions recorded",
        ))?;
        registry.register(Box::new(subscriptions_total.clone()))?;

        let outbox_deliveries = IntCounterVec::new(
            Opts::new(
                "booking_outbox_deliveries_total",
                "Outbox delivery attempts",
            ),
            &["effect", "result"],
        )?;
        registry.register(Box::new(outbox_deliveries.clone()))?;

        let outbox_dead_letters = IntCounter::with_opts(Opts::new(
            "booking_outbox_dead_letters_total",
            "Outbox entries moved to dead letters",
        ))?;
        registry.register(Box::new(outbox_dead_letters.clone()))?;

        let reminders_total = IntCounterVec::new(
            Opts::new("booking_reminders_total", "Reminder claims"),
            &["kind"],
        )?;
        registry.register(Box::new(reminders_total.clone()))?;

        Ok(Self {
            command_duration,
            reservations_total,
            conflicts_total,
            settlements_total,
            subscriptions_total,
            outbox_deliveries,
            outbox_dead_letters,
            reminders_total,
            registry,
        })
    }

    /// Record store command latency
    pub fn record_command(&self, duration_seconds: f64) {
        self.command_duration.observe(duration_seconds);
    }

    /// Record a settle outcome
    pub fn record_settlement(&self, outcome: &str) {
        self.settlements_total.with_label_values(&[outcome]).inc();
    }

    /// Record an outbox delivery attempt
    pub fn record_delivery(&self, effect: &str, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        self.outbox_deliveries
            .with_label_values(&[effect, result])
            .inc();
    }

    /// Record a reminder claim
    pub fn record_reminder(&self, kind: &str) {
        self.reminders_total.with_label_values(&[kind]).inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render in Prometheus text format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_independent_instances() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.reservations_total.inc();
        assert_eq!(first.reservations_total.get(), 1);
        assert_eq!(second.reservations_total.get(), 0);
    }

    #[test]
    fn test_record_settlement() {
        let metrics = Metrics::new().unwrap();
        metrics.record_settlement("settled");
        metrics.record_settlement("already_paid");
        metrics.record_settlement("settled");
        assert_eq!(
            metrics
                .settlements_total
                .with_label_values(&["settled"])
                .get(),
            2
        );
    }

    #[test]
    fn test_render_contains_names() {
        let metrics = Metrics::new().unwrap();
        metrics.record_delivery("notify", true);
        let text = metrics.render();
        assert!(text.contains("booking_outbox_deliveries_total"));
    }
}
