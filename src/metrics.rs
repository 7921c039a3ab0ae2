use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, TextEncoder,
};

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "delivery_service_http_requests_total",
            "Total HTTP requests handled by delivery-service",
        ),
        &["method", "path", "status"],
    )
    .expect("failed to create delivery_service_http_requests_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register delivery_service_http_requests_total");
    counter
});

static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "delivery_service_http_request_duration_seconds",
            "HTTP request latencies for delivery-service",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
        ]),
        &["method", "path", "status"],
    )
    .expect("failed to create delivery_service_http_request_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register delivery_service_http_request_duration_seconds");
    histogram
});

static MESSAGES_ACCEPTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "delivery_service_messages_accepted_total",
            "Messages persisted, labelled by delivery outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create delivery_service_messages_accepted_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register delivery_service_messages_accepted_total");
    counter
});

static SENDS_REJECTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "delivery_service_sends_rejected_total",
            "Send commands that failed, labelled by error code",
        ),
        &["code"],
    )
    .expect("failed to create delivery_service_sends_rejected_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register delivery_service_sends_rejected_total");
    counter
});

static MESSAGES_RELEASED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "delivery_service_messages_released_total",
            "Queued messages released, labelled by trigger",
        ),
        &["trigger"],
    )
    .expect("failed to create delivery_service_messages_released_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register delivery_service_messages_released_total");
    counter
});

static ONLINE_IDENTITIES: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "delivery_service_online_identities",
        "Identities with at least one live realtime connection",
    )
    .expect("failed to create delivery_service_online_identities");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register delivery_service_online_identities");
    gauge
});

static OPEN_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "delivery_service_open_connections",
        "Live realtime connections",
    )
    .expect("failed to create delivery_service_open_connections");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register delivery_service_open_connections");
    gauge
});

pub fn record_http_request(method: &str, path: &str, status: u16, elapsed_secs: f64) {
    let status = status.to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path, &status])
        .observe(elapsed_secs);
}

pub fn record_message_accepted(outcome: &str) {
    MESSAGES_ACCEPTED_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_send_rejected(code: &str) {
    SENDS_REJECTED_TOTAL.with_label_values(&[code]).inc();
}

pub fn record_messages_released(trigger: &str, count: usize) {
    MESSAGES_RELEASED_TOTAL
        .with_label_values(&[trigger])
        .inc_by(count as u64);
}

pub fn set_presence_gauges(online_identities: usize, open_connections: usize) {
    ONLINE_IDENTITIES.set(online_identities as i64);
    OPEN_CONNECTIONS.set(open_connections as i64);
}

pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
