use crate::collectors::run_command;
use crate::error::ApiError;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct NetworkInterfaceRecord {
    pub interface: String,
    #[serde(rename = "ipCidr")]
    pub ip_cidr: String,
}

pub async fn interface_addresses(
    program: &str,
    timeout: Duration,
) -> Result<Vec<NetworkInterfaceRecord>, ApiError> {
    let stdout = run_command(program, &["addr", "show"], timeout)
        .await
        .map_err(|err| ApiError::source_unavailable("Could not retrieve network configuration", err))?;
    Ok(parse_inet_lines(&stdout))
}

// inet 192.168.1.10/24 brd 192.168.1.255 scope global eth0
pub fn parse_inet_lines(output: &str) -> Vec<NetworkInterfaceRecord> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts.as_slice() {
                ["inet", ip_cidr, .., interface] => Some(NetworkInterfaceRecord {
                    interface: interface.to_string(),
                    ip_cidr: ip_cidr.to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}

pub async fn active_connection_count(
    program: &str,
    port: u16,
    timeout: Duration,
) -> Result<usize, ApiError> {
    let stdout = run_command(program, &["-H", "-u", "-a", "-n"], timeout)
        .await
        .map_err(|err| ApiError::source_unavailable("Could not count active TFTP connections", err))?;
    Ok(count_port_peers(&stdout, port))
}

// Unconnected listeners (`*` peer) are not sessions.
pub fn count_port_peers(output: &str, port: u16) -> usize {
    output
        .lines()
        .filter(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let (Some(local), Some(peer)) = (parts.get(3), parts.get(4)) else {
                return false;
            };
            let peer_port = port_of(peer);
            if peer_port.is_none() {
                return false;
            }
            port_of(local) == Some(port) || peer_port == Some(port)
        })
        .count()
}

fn port_of(endpoint: &str) -> Option<u16> {
    let (_, port) = endpoint.rsplit_once(':')?;
    port.parse().ok()
}
