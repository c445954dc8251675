use crate::error::ApiError;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LeaseRecord {
    pub expires: String,
    pub mac: String,
    pub ip: String,
    pub hostname: String,
    pub client_id: String,
}

pub async fn read_leases(path: &Path) -> Result<Vec<LeaseRecord>, ApiError> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(|err| ApiError::source_unavailable("Could not read DHCP leases", err))?;
    Ok(parse_leases(&String::from_utf8_lossy(&raw)))
}

// Positional fields split on single spaces; missing ones become empty.
pub fn parse_leases(raw: &str) -> Vec<LeaseRecord> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> LeaseRecord {
    let parts: Vec<&str> = line.split(' ').collect();
    let (expires, rest) = if parts.len() >= 2 && is_date(parts[0]) && is_clock(parts[1]) {
        (format!("{} {}", parts[0], parts[1]), &parts[2..])
    } else {
        (parts[0].to_string(), &parts[1..])
    };
    let field = |i: usize| rest.get(i).map(|s| s.to_string()).unwrap_or_default();

    LeaseRecord {
        expires,
        mac: field(0),
        ip: field(1),
        hostname: field(2),
        client_id: field(3),
    }
}

// YYYY-MM-DD
fn is_date(token: &str) -> bool {
    shape_matches(token, "dddd-dd-dd")
}

// HH:MM:SS
fn is_clock(token: &str) -> bool {
    shape_matches(token, "dd:dd:dd")
}

fn shape_matches(token: &str, shape: &str) -> bool {
    token.len() == shape.len()
        && token.bytes().zip(shape.bytes()).all(|(t, s)| match s {
            b'd' => t.is_ascii_digit(),
            other => t == other,
        })
}
