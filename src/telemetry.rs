use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

pub struct Metrics {
    request_counter: IntCounterVec,
    prediction_errors: IntCounterVec,
    prediction_duration: HistogramVec,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let request_counter = IntCounterVec::new(
            Opts::new("requests_total", "Total number of requests"),
            &["route"],
        )?;

        let prediction_errors = IntCounterVec::new(
            Opts::new("prediction_errors_total", "Failed predictions by error kind"),
            &["kind"],
        )?;

        let prediction_duration = HistogramVec::new(
            HistogramOpts::new(
                "prediction_duration_ms",
                "Duration of prediction operations in milliseconds",
            )
            .buckets(duration_buckets()),
            &["route"],
        )?;

        registry.register(Box::new(request_counter.clone()))?;
        registry.register(Box::new(prediction_errors.clone()))?;
        registry.register(Box::new(prediction_duration.clone()))?;

        Ok(Metrics {
            request_counter,
            prediction_errors,
            prediction_duration,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        self.request_counter.with_label_values(&[route]).inc();
    }

    pub fn record_prediction_error(&self, kind: &str) {
        self.prediction_errors.with_label_values(&[kind]).inc();
    }

    pub fn record_prediction_duration(&self, duration_ms: f64, route: &str) {
        self.prediction_duration
            .with_label_values(&[route])
            .observe(duration_ms);
    }
}

// CPU inference on a 224x224 input sits in the tens of milliseconds.
fn duration_buckets() -> Vec<f64> {
    let mut buckets: Vec<f64> = (1..=10).map(|i| (i * 10) as f64).collect();
    buckets.extend([150.0, 200.0, 300.0, 500.0, 1000.0, 2500.0]);
    buckets
}
