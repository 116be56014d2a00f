use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use prometheus::{IntCounterVec, Opts, Registry};
use std::sync::OnceLock;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static PROMETHEUS_REGISTRY: OnceLock<Registry> = OnceLock::new();
static FEE_PAYMENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static FEE_AMOUNT_PAISE_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Install the Prometheus recorder and register the payment counters.
/// Call once from the binary entrypoint; the accessors below are no-ops
/// until then.
pub fn init_metrics() {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    if METRICS_HANDLE.set(handle).is_err() {
        panic!("failed to set metrics handle: already initialized");
    }

    let registry = Registry::new();

    let payments_counter = IntCounterVec::new(
        Opts::new(
            "fee_payments_total",
            "Fee payment operations by resulting status",
        ),
        &["status"],
    )
    .expect("failed to create fee_payments_total metric");

    let amount_counter = IntCounterVec::new(
        Opts::new(
            "fee_amount_paise_total",
            "Settled fee amounts by currency (in paise)",
        ),
        &["currency"],
    )
    .expect("failed to create fee_amount_paise_total metric");

    registry
        .register(Box::new(payments_counter.clone()))
        .expect("failed to register fee_payments_total");
    registry
        .register(Box::new(amount_counter.clone()))
        .expect("failed to register fee_amount_paise_total");

    PROMETHEUS_REGISTRY
        .set(registry)
        .expect("failed to set prometheus registry");
    FEE_PAYMENTS_TOTAL
        .set(payments_counter)
        .expect("failed to set fee_payments_total");
    FEE_AMOUNT_PAISE_TOTAL
        .set(amount_counter)
        .expect("failed to set fee_amount_paise_total");
}

pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string());

    if let Some(registry) = PROMETHEUS_REGISTRY.get() {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).ok();
        if let Ok(custom_metrics) = String::from_utf8(buffer) {
            output.push_str(&custom_metrics);
        }
    }

    output
}

/// Count a payment reaching `status`.
pub fn record_payment(status: &str) {
    if let Some(counter) = FEE_PAYMENTS_TOTAL.get() {
        counter.with_label_values(&[status]).inc();
    }
}

/// Count settled amount (in paise) for metering.
pub fn record_settled_amount(currency: &str, amount_paise: u64) {
    if let Some(counter) = FEE_AMOUNT_PAISE_TOTAL.get() {
        counter.with_label_values(&[currency]).inc_by(amount_paise);
    }
}
