pub mod collectors;

use collectors::{DirectionLabel, ErrorTypeLabel, HttpDurationLabel, HttpRequestLabel, OutcomeLabel};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::{Family, MetricConstructor};
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

/// Session duration buckets, from a failed login to a working day.
#[derive(Clone)]
pub struct SessionDurationHistogramBuilder;

impl MetricConstructor<Histogram> for SessionDurationHistogramBuilder {
    fn new_metric(&self) -> Histogram {
        Histogram::new([1.0, 10.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 14400.0, 28800.0].into_iter())
    }
}

#[derive(Clone)]
pub struct HttpDurationHistogramBuilder;

impl MetricConstructor<Histogram> for HttpDurationHistogramBuilder {
    fn new_metric(&self) -> Histogram {
        // Buckets: 1ms .. 5s
        Histogram::new([0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0].into_iter())
    }
}

/// Gateway metrics exposed at `/metrics`.
pub struct MetricsRegistry {
    pub registry: Registry,
    pub ws_clients_active: Gauge,
    pub sessions_active: Gauge,
    pub sessions_started_total: Counter,
    pub sessions_ended_total: Family<OutcomeLabel, Counter>,
    pub session_errors_total: Family<ErrorTypeLabel, Counter>,
    pub session_duration_seconds: Histogram,
    pub bytes_total: Family<DirectionLabel, Counter>,
    pub voice_injections_total: Family<OutcomeLabel, Counter>,
    pub logins_total: Family<OutcomeLabel, Counter>,
    pub http_requests_total: Family<HttpRequestLabel, Counter>,
    pub http_request_duration_seconds:
        Family<HttpDurationLabel, Histogram, HttpDurationHistogramBuilder>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let ws_clients_active = Gauge::default();
        registry.register(
            "sshweb_ws_clients_active",
            "Currently connected browser clients",
            ws_clients_active.clone(),
        );

        let sessions_active = Gauge::default();
        registry.register(
            "sshweb_sessions_active",
            "Sessions with an open shell",
            sessions_active.clone(),
        );

        let sessions_started_total = Counter::default();
        registry.register(
            "sshweb_sessions_started",
            "Session start requests accepted",
            sessions_started_total.clone(),
        );

        let sessions_ended_total = Family::<OutcomeLabel, Counter>::default();
        registry.register(
            "sshweb_sessions_ended",
            "Sessions ended, by outcome",
            sessions_ended_total.clone(),
        );

        let session_errors_total = Family::<ErrorTypeLabel, Counter>::default();
        registry.register(
            "sshweb_session_errors",
            "Session errors by type",
            session_errors_total.clone(),
        );

        let session_duration_seconds = SessionDurationHistogramBuilder.new_metric();
        registry.register(
            "sshweb_session_duration_seconds",
            "Time from shell open to close",
            session_duration_seconds.clone(),
        );

        let bytes_total = Family::<DirectionLabel, Counter>::default();
        registry.register(
            "sshweb_bytes",
            "Bytes relayed between clients and shells",
            bytes_total.clone(),
        );

        let voice_injections_total = Family::<OutcomeLabel, Counter>::default();
        registry.register(
            "sshweb_voice_injections",
            "Voice command submissions, by outcome",
            voice_injections_total.clone(),
        );

        let logins_total = Family::<OutcomeLabel, Counter>::default();
        registry.register(
            "sshweb_logins",
            "Login attempts, by outcome",
            logins_total.clone(),
        );

        let http_requests_total = Family::<HttpRequestLabel, Counter>::default();
        registry.register(
            "sshweb_http_requests",
            "HTTP requests by method, path and status",
            http_requests_total.clone(),
        );

        let http_request_duration_seconds =
            Family::<HttpDurationLabel, Histogram, HttpDurationHistogramBuilder>::new_with_constructor(
                HttpDurationHistogramBuilder,
            );
        registry.register(
            "sshweb_http_request_duration_seconds",
            "HTTP request duration in seconds",
            http_request_duration_seconds.clone(),
        );

        Self {
            registry,
            ws_clients_active,
            sessions_active,
            sessions_started_total,
            sessions_ended_total,
            session_errors_total,
            session_duration_seconds,
            bytes_total,
            voice_injections_total,
            logins_total,
            http_requests_total,
            http_request_duration_seconds,
        }
    }

    pub fn record_session_started(&self) {
        self.sessions_started_total.inc();
    }

    pub fn record_shell_open(&self) {
        self.sessions_active.inc();
    }

    /// `was_open` must match a previous `record_shell_open`.
    pub fn record_session_ended(&self, outcome: &str, was_open: bool, duration_secs: f64) {
        if was_open {
            self.sessions_active.dec();
            self.session_duration_seconds.observe(duration_secs);
        }
        self.sessions_ended_total
            .get_or_create(&OutcomeLabel {
                outcome: outcome.to_string(),
            })
            .inc();
    }

    pub fn record_error(&self, error_type: &str) {
        self.session_errors_total
            .get_or_create(&ErrorTypeLabel {
                error_type: error_type.to_string(),
            })
            .inc();
    }

    pub fn record_bytes_in(&self, bytes: u64) {
        self.record_bytes("in", bytes);
    }

    pub fn record_bytes_out(&self, bytes: u64) {
        self.record_bytes("out", bytes);
    }

    fn record_bytes(&self, direction: &str, bytes: u64) {
        self.bytes_total
            .get_or_create(&DirectionLabel {
                direction: direction.to_string(),
            })
            .inc_by(bytes);
    }

    pub fn record_injection(&self, outcome: &str) {
        self.voice_injections_total
            .get_or_create(&OutcomeLabel {
                outcome: outcome.to_string(),
            })
            .inc();
    }

    pub fn record_login(&self, outcome: &str) {
        self.logins_total
            .get_or_create(&OutcomeLabel {
                outcome: outcome.to_string(),
            })
            .inc();
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16) {
        self.http_requests_total
            .get_or_create(&HttpRequestLabel {
                method: method.to_string(),
                path: path.to_string(),
                status: status.to_string(),
            })
            .inc();
    }

    pub fn record_http_request_duration(&self, method: &str, path: &str, duration_secs: f64) {
        self.http_request_duration_seconds
            .get_or_create(&HttpDurationLabel {
                method: method.to_string(),
                path: path.to_string(),
            })
            .observe(duration_secs);
    }

    /// Render the registry in the Prometheus text format.
    pub fn render(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
