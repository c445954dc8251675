use crate::collectors::network::{self, NetworkInterfaceRecord};
use crate::collectors::status::{collect_status, ServiceStatus};
use crate::collectors::system::{collect_resource_snapshot, ResourceSnapshot};
use crate::config::Config;
use crate::error::ApiError;
use crate::leases::{self, LeaseRecord};
use crate::logs;
use crate::metrics::Metrics;
use crate::preseed::{self, PreseedUpdate};
use crate::probe::Probe;
use axum::body::Body;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Clone)]
pub struct HttpAppState {
    pub config: Arc<Config>,
    pub probe: Arc<dyn Probe>,
    pub metrics: Arc<Metrics>,
}

#[derive(Debug, serde::Serialize)]
pub struct UpdateResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, serde::Serialize)]
pub struct TftpActive {
    pub active_connections: usize,
}

#[derive(Debug, serde::Deserialize)]
pub struct TailQuery {
    pub lines: Option<usize>,
}

pub fn build_router(state: HttpAppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/status", get(status_handler))
        .route("/dhcp-leases", get(leases_handler))
        .route("/update-preseed", post(update_preseed_handler))
        .route("/network-config", get(network_config_handler))
        .route("/logs/:service", get(logs_handler))
        .route("/system-stats", get(system_stats_handler))
        .route("/tftp-active", get(tftp_active_handler))
        .with_state(state)
}

impl HttpAppState {
    fn report(&self, endpoint: &'static str, err: ApiError) -> ApiError {
        self.metrics.inc_api_error(err.kind());
        match std::error::Error::source(&err) {
            Some(cause) => error!(endpoint, kind = err.kind(), error = %err, cause = %cause, "request failed"),
            None => info!(endpoint, kind = err.kind(), error = %err, "request rejected"),
        }
        err
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

async fn status_handler(State(state): State<HttpAppState>) -> Json<ServiceStatus> {
    let (status, failed) = collect_status(state.probe.clone(), &state.config).await;
    for probe in failed {
        state.metrics.inc_probe_error(probe);
    }
    state.metrics.update_from_status(&status);
    Json(status)
}

async fn leases_handler(
    State(state): State<HttpAppState>,
) -> Result<Json<Vec<LeaseRecord>>, ApiError> {
    leases::read_leases(&state.config.paths.lease_file)
        .await
        .map(Json)
        .map_err(|err| state.report("dhcp-leases", err))
}

async fn update_preseed_handler(
    State(state): State<HttpAppState>,
    payload: Result<Json<PreseedUpdate>, JsonRejection>,
) -> Result<Json<UpdateResponse>, ApiError> {
    let Json(update) = payload.map_err(|rejection| {
        state.report(
            "update-preseed",
            ApiError::Validation(format!("Invalid request body: {}", rejection.body_text())),
        )
    })?;
    let hostname = update.hostname.clone().unwrap_or_default();
    let username = update.username.clone().unwrap_or_default();
    let packages = update.packages.as_deref().is_some_and(|p| !p.is_empty());

    preseed::update_preseed_file(state.config.paths.preseed_file.clone(), update)
        .await
        .map_err(|err| state.report("update-preseed", err))?;

    info!(%hostname, %username, packages, "preseed configuration updated");
    Ok(Json(UpdateResponse {
        success: true,
        message: "Preseed configuration updated successfully".to_string(),
    }))
}

async fn network_config_handler(
    State(state): State<HttpAppState>,
) -> Result<Json<Vec<NetworkInterfaceRecord>>, ApiError> {
    network::interface_addresses(&state.config.commands.ip, state.config.probe_timeout())
        .await
        .map(Json)
        .map_err(|err| state.report("network-config", err))
}

async fn logs_handler(
    State(state): State<HttpAppState>,
    Path(service): Path<String>,
    query: Result<Query<TailQuery>, QueryRejection>,
) -> Result<String, ApiError> {
    let Query(query) = query.map_err(|_| {
        state.report(
            "logs",
            ApiError::Validation("Invalid lines parameter".to_string()),
        )
    })?;
    let lines = logs::resolve_lines(query.lines, &state.config.logs);
    logs::tail_log(
        &service,
        lines,
        &state.config.logs.files,
        state.config.probe_timeout(),
    )
    .await
        .map_err(|err| state.report("logs", err))
}

async fn system_stats_handler(State(state): State<HttpAppState>) -> Json<ResourceSnapshot> {
    let cfg = &state.config;
    Json(collect_resource_snapshot(&cfg.commands.df, cfg.probe_timeout()).await)
}

async fn tftp_active_handler(
    State(state): State<HttpAppState>,
) -> Result<Json<TftpActive>, ApiError> {
    let cfg = &state.config;
    network::active_connection_count(&cfg.commands.ss, cfg.tftp_port, cfg.probe_timeout())
        .await
        .map(|active_connections| Json(TftpActive { active_connections }))
        .map_err(|err| state.report("tftp-active", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::status::tests::FakeProbe;
    use axum::body::to_bytes;
    use axum::http::Request;
    use std::path::Path as FsPath;
    use tower::ServiceExt;

    fn config_in(dir: &FsPath) -> Config {
        let mut cfg = Config::default();
        cfg.paths.lease_file = dir.join("dnsmasq.leases");
        cfg.paths.preseed_file = dir.join("preseed.cfg");
        cfg.paths.pxe_loader = dir.join("pxelinux.0");
        cfg.paths.kernel_image = dir.join("vmlinuz");
        cfg.paths.dnsmasq_conf = dir.join("dnsmasq.conf");
        cfg.logs.files.dnsmasq = dir.join("dnsmasq.log");
        cfg.logs.files.nginx = dir.join("nginx.log");
        cfg.logs.files.setup = dir.join("setup.log");
        cfg.logs.files.web_ui = dir.join("web-ui.log");
        cfg
    }

    fn app(cfg: Config, probe: FakeProbe) -> Router {
        build_router(HttpAppState {
            config: Arc::new(cfg),
            probe: Arc::new(probe),
            metrics: Metrics::new().expect("metrics init"),
        })
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn json(bytes: &[u8]) -> serde_json::Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = send(app(config_in(dir.path()), FakeProbe::default()), get_req("/healthz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn status_reports_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_in(dir.path());
        let mut probe = FakeProbe::with_running(&["dnsmasq"]);
        probe.marker = Some(true);
        probe.files.insert(cfg.paths.pxe_loader.clone());

        let (status, body) = send(app(cfg, probe), get_req("/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json(&body),
            serde_json::json!({
                "dhcp": true,
                "tftp": true,
                "nginx": false,
                "pxe_files": true,
                "ubuntu_files": false
            })
        );
    }

    #[tokio::test]
    async fn status_never_fails_on_probe_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut probe = FakeProbe::with_running(&["dnsmasq", "nginx"]);
        probe.broken_processes = true;

        let (status, body) = send(app(config_in(dir.path()), probe), get_req("/status")).await;
        assert_eq!(status, StatusCode::OK);
        let value = json(&body);
        assert_eq!(value["dhcp"], false);
        assert_eq!(value["tftp"], false);
        assert_eq!(value["nginx"], false);
    }

    #[tokio::test]
    async fn leases_are_listed() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_in(dir.path());
        std::fs::write(
            &cfg.paths.lease_file,
            "2024-01-01 10:00:00 aa:bb:cc:dd:ee:ff 192.168.1.50 client1 01:aa:bb:cc:dd:ee:ff\n",
        )
        .unwrap();

        let (status, body) = send(app(cfg, FakeProbe::default()), get_req("/dhcp-leases")).await;
        assert_eq!(status, StatusCode::OK);
        let value = json(&body);
        assert_eq!(value.as_array().unwrap().len(), 1);
        assert_eq!(value[0]["ip"], "192.168.1.50");
        assert_eq!(value[0]["hostname"], "client1");
    }

    #[tokio::test]
    async fn unreadable_leases_are_500() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) =
            send(app(config_in(dir.path()), FakeProbe::default()), get_req("/dhcp-leases")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json(&body)["error"], "Could not read DHCP leases");
    }

    #[tokio::test]
    async fn preseed_update_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_in(dir.path());
        std::fs::write(
            &cfg.paths.preseed_file,
            "d-i netcfg/get_hostname string old\nd-i passwd/username string old\n",
        )
        .unwrap();
        let path = cfg.paths.preseed_file.clone();

        let (status, body) = send(
            app(cfg, FakeProbe::default()),
            post_json(
                "/update-preseed",
                r#"{"hostname":"pxe-01","username":"admin","password":"pw"}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let value = json(&body);
        assert_eq!(value["success"], true);
        assert_eq!(value["message"], "Preseed configuration updated successfully");
        assert_eq!(
            std::fs::read_to_string(path).unwrap(),
            "d-i netcfg/get_hostname string pxe-01\nd-i passwd/username string admin\n"
        );
    }

    #[tokio::test]
    async fn preseed_missing_fields_are_400() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = send(
            app(config_in(dir.path()), FakeProbe::default()),
            post_json("/update-preseed", r#"{"hostname":"pxe-01","username":""}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["error"], "Missing required fields");
    }

    #[tokio::test]
    async fn preseed_malformed_body_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = send(
            app(config_in(dir.path()), FakeProbe::default()),
            post_json("/update-preseed", "{not json"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json(&body)["error"].as_str().unwrap().starts_with("Invalid request body"));
    }

    #[tokio::test]
    async fn preseed_missing_file_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = send(
            app(config_in(dir.path()), FakeProbe::default()),
            post_json(
                "/update-preseed",
                r#"{"hostname":"h","username":"u","password":"p"}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json(&body)["error"], "Could not read preseed file");
    }

    #[tokio::test]
    async fn logs_return_raw_text() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_in(dir.path());
        std::fs::write(&cfg.logs.files.web_ui, "one\ntwo\nthree\n").unwrap();

        let response = app(cfg, FakeProbe::default())
            .oneshot(get_req("/logs/web-ui?lines=2"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.as_ref(), b"two\nthree\n");
    }

    #[tokio::test]
    async fn unknown_log_service_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) =
            send(app(config_in(dir.path()), FakeProbe::default()), get_req("/logs/bogus")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["error"], "Invalid service");
    }

    #[tokio::test]
    async fn missing_log_file_is_500_json() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) =
            send(app(config_in(dir.path()), FakeProbe::default()), get_req("/logs/setup")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json(&body)["error"], "Could not read log file");
    }

    #[tokio::test]
    async fn system_stats_always_answers() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) =
            send(app(config_in(dir.path()), FakeProbe::default()), get_req("/system-stats")).await;
        assert_eq!(status, StatusCode::OK);
        let value = json(&body);
        assert!(!value["cpu_mem"].as_array().unwrap().is_empty());
        assert!(value["disk"].is_array() || value["disk"].is_string());
    }

    #[tokio::test]
    async fn failing_ip_command_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config_in(dir.path());
        cfg.commands.ip = "false".to_string();
        let (status, body) = send(app(cfg, FakeProbe::default()), get_req("/network-config")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json(&body),
            serde_json::json!({ "error": "Could not retrieve network configuration" })
        );
    }

    #[tokio::test]
    async fn no_ipv4_addresses_is_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config_in(dir.path());
        cfg.commands.ip = "true".to_string();
        let (status, body) = send(app(cfg, FakeProbe::default()), get_req("/network-config")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body), serde_json::json!([]));
    }

    #[tokio::test]
    async fn failing_ss_command_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config_in(dir.path());
        cfg.commands.ss = "false".to_string();
        let (status, body) = send(app(cfg, FakeProbe::default()), get_req("/tftp-active")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json(&body),
            serde_json::json!({ "error": "Could not count active TFTP connections" })
        );
    }

    #[tokio::test]
    async fn tftp_active_reports_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config_in(dir.path());
        cfg.commands.ss = "true".to_string();
        let (status, body) = send(app(cfg, FakeProbe::default()), get_req("/tftp-active")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body), serde_json::json!({ "active_connections": 0 }));
    }

    #[tokio::test]
    async fn failing_df_degrades_disk_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config_in(dir.path());
        cfg.commands.df = "false".to_string();
        let (status, body) = send(app(cfg, FakeProbe::default()), get_req("/system-stats")).await;
        assert_eq!(status, StatusCode::OK);
        let value = json(&body);
        assert_eq!(value["disk"], "Could not retrieve disk usage");
        assert_eq!(value["cpu_mem"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn metrics_reflect_status_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(config_in(dir.path()), FakeProbe::with_running(&["nginx"]));

        let (status, _) = send(app.clone(), get_req("/status")).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(app.clone(), get_req("/dhcp-leases")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let (status, body) = send(app, get_req("/metrics")).await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("pxe_service_up{service=\"nginx\"} 1"));
        assert!(text.contains("pxe_probe_errors_total{probe=\"tftp\"} 1"));
        assert!(text.contains("pxe_api_errors_total{kind=\"source_unavailable\"} 1"));
    }
}
