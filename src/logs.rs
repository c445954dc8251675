use crate::config::{LogFiles, LogsConfig};
use crate::error::{ApiError, ProbeError};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::time;

pub const READ_ERROR: &str = "Could not read log file";

const CHUNK_SIZE: u64 = 8 * 1024;

// Requests name one of these; paths never come from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogService {
    Dnsmasq,
    Nginx,
    Setup,
    WebUi,
}

impl FromStr for LogService {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dnsmasq" => Ok(Self::Dnsmasq),
            "nginx" => Ok(Self::Nginx),
            "setup" => Ok(Self::Setup),
            "web-ui" => Ok(Self::WebUi),
            _ => Err(ApiError::Validation("Invalid service".to_string())),
        }
    }
}

impl LogService {
    pub fn path(self, files: &LogFiles) -> &Path {
        match self {
            Self::Dnsmasq => &files.dnsmasq,
            Self::Nginx => &files.nginx,
            Self::Setup => &files.setup,
            Self::WebUi => &files.web_ui,
        }
    }
}

// Falls back to the configured default, capped at the configured maximum.
pub fn resolve_lines(requested: Option<usize>, cfg: &LogsConfig) -> usize {
    requested.unwrap_or(cfg.default_lines).min(cfg.max_lines)
}

pub async fn tail_log(
    service: &str,
    max_lines: usize,
    files: &LogFiles,
    timeout: Duration,
) -> Result<String, ApiError> {
    let service = LogService::from_str(service)?;
    let path: PathBuf = service.path(files).to_path_buf();
    let task = tokio::task::spawn_blocking(move || tail_file(&path, max_lines));
    match time::timeout(timeout, task).await {
        Ok(Ok(result)) => result.map_err(|err| ApiError::source_unavailable(READ_ERROR, err)),
        Ok(Err(join)) => Err(ApiError::source_unavailable(READ_ERROR, join)),
        Err(_elapsed) => Err(ApiError::source_unavailable(
            READ_ERROR,
            ProbeError::Timeout {
                probe: "log tail".to_string(),
                timeout,
            },
        )),
    }
}

pub fn tail_file(path: &Path, max_lines: usize) -> io::Result<String> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if max_lines == 0 || len == 0 {
        return Ok(String::new());
    }

    // chunks are collected last-to-first
    let mut chunks: Vec<Vec<u8>> = Vec::new();
    let mut separators = 0_usize;
    let mut pos = len;
    while pos > 0 && separators < max_lines {
        let start = pos.saturating_sub(CHUNK_SIZE);
        let mut chunk = vec![0_u8; (pos - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut chunk)?;

        let counted = if pos == len {
            chunk.strip_suffix(b"\n").unwrap_or(&chunk[..])
        } else {
            &chunk[..]
        };
        separators += counted.iter().filter(|b| **b == b'\n').count();
        chunks.push(chunk);
        pos = start;
    }

    let mut tail = Vec::with_capacity((len - pos) as usize);
    for chunk in chunks.iter().rev() {
        tail.extend_from_slice(chunk);
    }
    let body = tail.strip_suffix(b"\n").unwrap_or(&tail[..]);
    let from = body
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, b)| **b == b'\n')
        .nth(max_lines - 1)
        .map(|(i, _)| i + 1)
        .unwrap_or(0);

    let mut out = String::from_utf8_lossy(&body[from..]).into_owned();
    out.push('\n');
    Ok(out)
}
