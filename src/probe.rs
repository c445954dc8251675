use crate::error::ProbeError;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use sysinfo::{ProcessRefreshKind, RefreshKind, System, SystemExt};

/// Host checks consumed by the status aggregator. Calls may block; callers
/// run them on the blocking pool.
pub trait Probe: Send + Sync {
    fn process_running(&self, name: &str) -> Result<bool, ProbeError>;

    fn file_exists(&self, path: &Path) -> Result<bool, ProbeError>;

    fn file_has_marker(&self, path: &Path, marker: &str) -> Result<bool, ProbeError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl Probe for SystemProbe {
    fn process_running(&self, name: &str) -> Result<bool, ProbeError> {
        let system = System::new_with_specifics(
            RefreshKind::new().with_processes(ProcessRefreshKind::new()),
        );
        let running = system.processes_by_name(name).next().is_some();
        Ok(running)
    }

    fn file_exists(&self, path: &Path) -> Result<bool, ProbeError> {
        match fs::metadata(path) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ProbeError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn file_has_marker(&self, path: &Path, marker: &str) -> Result<bool, ProbeError> {
        let raw = fs::read(path).map_err(|source| ProbeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(has_marker(&String::from_utf8_lossy(&raw), marker))
    }
}

// `marker` or `marker=...` on a non-comment line.
pub fn has_marker(text: &str, marker: &str) -> bool {
    text.lines().map(str::trim).any(|line| {
        if line.starts_with('#') {
            return false;
        }
        match line.strip_prefix(marker) {
            Some(rest) => rest.is_empty() || rest.starts_with('='),
            None => false,
        }
    })
}
