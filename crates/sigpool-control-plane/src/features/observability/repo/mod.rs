use prometheus::{
    opts, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Registry,
    TextEncoder,
};

pub struct ObservabilityRepository {
    registry: Registry,
    messages_received_total: Counter,
    dispatch_disposition_total: CounterVec,
    dispatch_failure_total: CounterVec,
    provision_outcome_total: CounterVec,
    live_instance_count: Gauge,
    matchmaker_latency_seconds: Histogram,
    api_request_total: CounterVec,
    api_request_latency_seconds: HistogramVec,
}

impl ObservabilityRepository {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();

        let messages_received_total = Counter::with_opts(opts!(
            "sigpool_messages_received_total",
            "Session requests received from the queue"
        ))
        .map_err(|e| e.to_string())?;
        let dispatch_disposition_total = CounterVec::new(
            opts!(
                "sigpool_dispatch_disposition_total",
                "Session requests handled by the dispatch loop, by disposition"
            ),
            &["disposition"],
        )
        .map_err(|e| e.to_string())?;
        let dispatch_failure_total = CounterVec::new(
            opts!(
                "sigpool_dispatch_failure_total",
                "Dispatch loop invocations aborted by an error"
            ),
            &["error_code"],
        )
        .map_err(|e| e.to_string())?;
        let provision_outcome_total = CounterVec::new(
            opts!(
                "sigpool_provision_outcome_total",
                "Provisioner invocations by mode and outcome"
            ),
            &["mode", "outcome"],
        )
        .map_err(|e| e.to_string())?;
        let live_instance_count = Gauge::with_opts(opts!(
            "sigpool_live_instance_count",
            "Live signalling instances last observed by the provisioner"
        ))
        .map_err(|e| e.to_string())?;
        let matchmaker_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "sigpool_matchmaker_latency_seconds",
            "Matchmaker query latency (seconds)",
        ))
        .map_err(|e| e.to_string())?;
        let api_request_total = CounterVec::new(
            opts!("sigpool_api_request_total", "HTTP invocation request total"),
            &["endpoint", "status"],
        )
        .map_err(|e| e.to_string())?;
        let api_request_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "sigpool_api_request_latency_seconds",
                "HTTP invocation latency (seconds)",
            ),
            &["endpoint"],
        )
        .map_err(|e| e.to_string())?;

        registry
            .register(Box::new(messages_received_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(dispatch_disposition_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(dispatch_failure_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(provision_outcome_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(live_instance_count.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(matchmaker_latency_seconds.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(api_request_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(api_request_latency_seconds.clone()))
            .map_err(|e| e.to_string())?;

        Ok(Self {
            registry,
            messages_received_total,
            dispatch_disposition_total,
            dispatch_failure_total,
            provision_outcome_total,
            live_instance_count,
            matchmaker_latency_seconds,
            api_request_total,
            api_request_latency_seconds,
        })
    }

    pub fn inc_messages_received(&self, count: usize) {
        self.messages_received_total.inc_by(count as f64);
    }

    pub fn inc_dispatch_disposition(&self, disposition: &str) {
        self.dispatch_disposition_total
            .with_label_values(&[disposition])
            .inc();
    }

    pub fn inc_dispatch_failure(&self, error_code: &str) {
        self.dispatch_failure_total
            .with_label_values(&[error_code])
            .inc();
    }

    pub fn inc_provision_outcome(&self, mode: &str, outcome: &str) {
        self.provision_outcome_total
            .with_label_values(&[mode, outcome])
            .inc();
    }

    pub fn set_live_instance_count(&self, count: f64) {
        self.live_instance_count.set(count);
    }

    pub fn observe_matchmaker_latency(&self, seconds: f64) {
        self.matchmaker_latency_seconds.observe(seconds);
    }

    pub fn observe_api_request(&self, endpoint: &str, status: &str, seconds: f64) {
        self.api_request_total
            .with_label_values(&[endpoint, status])
            .inc();
        self.api_request_latency_seconds
            .with_label_values(&[endpoint])
            .observe(seconds);
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| e.to_string())?;
        String::from_utf8(buffer).map_err(|e| e.to_string())
    }
}
