use crate::collectors::status::ServiceStatus;
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at: Instant,
    pub pxe_service_up: GaugeVec,
    pub pxe_probe_errors_total: CounterVec,
    pub pxe_api_errors_total: CounterVec,
    pub pxe_scrape_count_total: Counter,
    pub pxe_uptime_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let pxe_service_up = GaugeVec::new(
            opts!(
                "pxe_service_up",
                "Last observed state of an appliance service (1 = up, 0 = down)"
            ),
            &["service"],
        )?;
        let pxe_probe_errors_total = CounterVec::new(
            opts!(
                "pxe_probe_errors_total",
                "Status probes that failed or timed out and were reported as down"
            ),
            &["probe"],
        )?;
        let pxe_api_errors_total = CounterVec::new(
            opts!(
                "pxe_api_errors_total",
                "Requests answered with an error, by error kind"
            ),
            &["kind"],
        )?;
        let pxe_scrape_count_total = Counter::with_opts(opts!(
            "pxe_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let pxe_uptime_seconds = Gauge::with_opts(opts!(
            "pxe_uptime_seconds",
            "Seconds since the API server started"
        ))?;

        register(&registry, &pxe_service_up)?;
        register(&registry, &pxe_probe_errors_total)?;
        register(&registry, &pxe_api_errors_total)?;
        register(&registry, &pxe_scrape_count_total)?;
        register(&registry, &pxe_uptime_seconds)?;

        Ok(Arc::new(Self {
            registry,
            started_at: Instant::now(),
            pxe_service_up,
            pxe_probe_errors_total,
            pxe_api_errors_total,
            pxe_scrape_count_total,
            pxe_uptime_seconds,
        }))
    }

    pub fn update_from_status(&self, status: &ServiceStatus) {
        for (service, up) in [
            ("dhcp", status.dhcp),
            ("tftp", status.tftp),
            ("nginx", status.nginx),
            ("pxe_files", status.pxe_files),
            ("ubuntu_files", status.ubuntu_files),
        ] {
            self.pxe_service_up
                .with_label_values(&[service])
                .set(if up { 1.0 } else { 0.0 });
        }
    }

    pub fn inc_probe_error(&self, probe: &str) {
        self.pxe_probe_errors_total
            .with_label_values(&[probe])
            .inc();
    }

    pub fn inc_api_error(&self, kind: &str) {
        self.pxe_api_errors_total.with_label_values(&[kind]).inc();
    }

    pub fn inc_scrape_count(&self) {
        self.pxe_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        self.pxe_uptime_seconds
            .set(self.started_at.elapsed().as_secs_f64());
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
