use crate::config::{Config, TftpStrategy};
use crate::error::ProbeError;
use crate::probe::Probe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::warn;

type BoxedCheck = Box<dyn FnOnce(&dyn Probe) -> Result<bool, ProbeError> + Send>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ServiceStatus {
    pub dhcp: bool,
    pub tftp: bool,
    pub nginx: bool,
    pub pxe_files: bool,
    pub ubuntu_files: bool,
}

// A failing or hung check reads as `false`; its name is returned for
// accounting.
pub async fn collect_status(
    probe: Arc<dyn Probe>,
    cfg: &Config,
) -> (ServiceStatus, Vec<&'static str>) {
    let timeout = cfg.probe_timeout();

    let dhcp = {
        let name = cfg.processes.dhcp.clone();
        run_probe("dhcp", timeout, probe.clone(), move |p| p.process_running(&name))
    };
    let tftp_check: BoxedCheck = match cfg.tftp_strategy {
        TftpStrategy::StandaloneDaemon => {
            let name = cfg.processes.tftp.clone();
            Box::new(move |p: &dyn Probe| p.process_running(&name))
        }
        TftpStrategy::CombinedWithDhcp => {
            let path = cfg.paths.dnsmasq_conf.clone();
            let marker = cfg.tftp_marker.clone();
            Box::new(move |p: &dyn Probe| p.file_has_marker(&path, &marker))
        }
    };
    let tftp = run_probe("tftp", timeout, probe.clone(), tftp_check);
    let nginx = {
        let name = cfg.processes.web.clone();
        run_probe("nginx", timeout, probe.clone(), move |p| p.process_running(&name))
    };
    let pxe_files = {
        let path = cfg.paths.pxe_loader.clone();
        run_probe("pxe_files", timeout, probe.clone(), move |p| p.file_exists(&path))
    };
    let ubuntu_files = {
        let path = cfg.paths.kernel_image.clone();
        run_probe("ubuntu_files", timeout, probe, move |p| p.file_exists(&path))
    };

    let (dhcp, tftp, nginx, pxe_files, ubuntu_files) =
        tokio::join!(dhcp, tftp, nginx, pxe_files, ubuntu_files);

    let mut failed = Vec::new();
    let dhcp = settle("dhcp", dhcp, &mut failed);
    let tftp_signal = settle("tftp", tftp, &mut failed);
    let status = ServiceStatus {
        dhcp,
        tftp: match cfg.tftp_strategy {
            TftpStrategy::StandaloneDaemon => tftp_signal,
            TftpStrategy::CombinedWithDhcp => dhcp && tftp_signal,
        },
        nginx: settle("nginx", nginx, &mut failed),
        pxe_files: settle("pxe_files", pxe_files, &mut failed),
        ubuntu_files: settle("ubuntu_files", ubuntu_files, &mut failed),
    };
    (status, failed)
}

async fn run_probe<F>(
    name: &'static str,
    timeout: Duration,
    probe: Arc<dyn Probe>,
    check: F,
) -> Result<bool, ProbeError>
where
    F: FnOnce(&dyn Probe) -> Result<bool, ProbeError> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(move || check(probe.as_ref()));
    match time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(ProbeError::Join(join)),
        Err(_elapsed) => Err(ProbeError::Timeout {
            probe: name.to_string(),
            timeout,
        }),
    }
}

fn settle(
    name: &'static str,
    result: Result<bool, ProbeError>,
    failed: &mut Vec<&'static str>,
) -> bool {
    match result {
        Ok(value) => value,
        Err(err) => {
            warn!(probe = name, error = %err, "status probe failed");
            failed.push(name);
            false
        }
    }
}
