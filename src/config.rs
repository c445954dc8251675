use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default)]
    pub tftp_strategy: TftpStrategy,
    #[serde(default = "default_tftp_marker")]
    pub tftp_marker: String,
    #[serde(default = "default_tftp_port")]
    pub tftp_port: u16,
    #[serde(default)]
    pub processes: ProcessNames,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub logs: LogsConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TftpStrategy {
    StandaloneDaemon,
    // dnsmasq serves TFTP itself when its config carries the marker.
    #[default]
    CombinedWithDhcp,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessNames {
    #[serde(default = "default_dhcp_process")]
    pub dhcp: String,
    #[serde(default = "default_tftp_process")]
    pub tftp: String,
    #[serde(default = "default_web_process")]
    pub web: String,
}

// Host tools behind /network-config, /tftp-active and /system-stats.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandsConfig {
    #[serde(default = "default_ip_command")]
    pub ip: String,
    #[serde(default = "default_ss_command")]
    pub ss: String,
    #[serde(default = "default_df_command")]
    pub df: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    #[serde(default = "default_lease_file")]
    pub lease_file: PathBuf,
    #[serde(default = "default_preseed_file")]
    pub preseed_file: PathBuf,
    #[serde(default = "default_pxe_loader")]
    pub pxe_loader: PathBuf,
    #[serde(default = "default_kernel_image")]
    pub kernel_image: PathBuf,
    #[serde(default = "default_dnsmasq_conf")]
    pub dnsmasq_conf: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogsConfig {
    #[serde(default = "default_tail_lines")]
    pub default_lines: usize,
    #[serde(default = "default_max_tail_lines")]
    pub max_lines: usize,
    #[serde(default)]
    pub files: LogFiles,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogFiles {
    #[serde(default = "default_dnsmasq_log")]
    pub dnsmasq: PathBuf,
    #[serde(default = "default_nginx_log")]
    pub nginx: PathBuf,
    #[serde(default = "default_setup_log")]
    pub setup: PathBuf,
    #[serde(default = "default_web_ui_log", rename = "web-ui")]
    pub web_ui: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            probe_timeout_ms: default_probe_timeout_ms(),
            tftp_strategy: TftpStrategy::default(),
            tftp_marker: default_tftp_marker(),
            tftp_port: default_tftp_port(),
            processes: ProcessNames::default(),
            paths: PathsConfig::default(),
            logs: LogsConfig::default(),
            commands: CommandsConfig::default(),
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            ip: default_ip_command(),
            ss: default_ss_command(),
            df: default_df_command(),
        }
    }
}

impl Default for ProcessNames {
    fn default() -> Self {
        Self {
            dhcp: default_dhcp_process(),
            tftp: default_tftp_process(),
            web: default_web_process(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            lease_file: default_lease_file(),
            preseed_file: default_preseed_file(),
            pxe_loader: default_pxe_loader(),
            kernel_image: default_kernel_image(),
            dnsmasq_conf: default_dnsmasq_conf(),
        }
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            default_lines: default_tail_lines(),
            max_lines: default_max_tail_lines(),
            files: LogFiles::default(),
        }
    }
}

impl Default for LogFiles {
    fn default() -> Self {
        Self {
            dnsmasq: default_dnsmasq_log(),
            nginx: default_nginx_log(),
            setup: default_setup_log(),
            web_ui: default_web_ui_log(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("could not parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port address".to_string(),
            ));
        }
        if self.probe_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "probe_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.tftp_marker.trim().is_empty() {
            return Err(ConfigError::Validation(
                "tftp_marker must not be empty".to_string(),
            ));
        }
        if self.tftp_port == 0 {
            return Err(ConfigError::Validation(
                "tftp_port must be in range 1..65535".to_string(),
            ));
        }

        validate_processes(&self.processes)?;
        validate_commands(&self.commands)?;
        validate_logs(&self.logs)?;

        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_processes(names: &ProcessNames) -> Result<(), ConfigError> {
    for (field, value) in [
        ("dhcp", &names.dhcp),
        ("tftp", &names.tftp),
        ("web", &names.web),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "processes.{field} must not be empty"
            )));
        }
    }
    Ok(())
}

fn validate_commands(commands: &CommandsConfig) -> Result<(), ConfigError> {
    for (field, value) in [
        ("ip", &commands.ip),
        ("ss", &commands.ss),
        ("df", &commands.df),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "commands.{field} must not be empty"
            )));
        }
    }
    Ok(())
}

fn validate_logs(cfg: &LogsConfig) -> Result<(), ConfigError> {
    if cfg.default_lines < 1 {
        return Err(ConfigError::Validation(
            "logs.default_lines must be >= 1".to_string(),
        ));
    }
    if cfg.max_lines < cfg.default_lines {
        return Err(ConfigError::Validation(
            "logs.max_lines must be >= logs.default_lines".to_string(),
        ));
    }
    Ok(())
}

fn default_listen() -> String {
    "0.0.0.0:3000".to_string()
}

const fn default_probe_timeout_ms() -> u64 {
    3000
}

fn default_tftp_marker() -> String {
    "enable-tftp".to_string()
}

const fn default_tftp_port() -> u16 {
    69
}

fn default_dhcp_process() -> String {
    "dnsmasq".to_string()
}

fn default_tftp_process() -> String {
    "in.tftpd".to_string()
}

fn default_web_process() -> String {
    "nginx".to_string()
}

fn default_lease_file() -> PathBuf {
    PathBuf::from("/var/lib/misc/dnsmasq.leases")
}

fn default_preseed_file() -> PathBuf {
    PathBuf::from("/var/www/html/ubuntu/preseed.cfg")
}

fn default_pxe_loader() -> PathBuf {
    PathBuf::from("/tftpboot/pxelinux.0")
}

fn default_kernel_image() -> PathBuf {
    PathBuf::from("/tftpboot/ubuntu/vmlinuz")
}

fn default_dnsmasq_conf() -> PathBuf {
    PathBuf::from("/etc/dnsmasq.conf")
}

fn default_ip_command() -> String {
    "ip".to_string()
}

fn default_ss_command() -> String {
    "ss".to_string()
}

fn default_df_command() -> String {
    "df".to_string()
}

const fn default_tail_lines() -> usize {
    100
}

const fn default_max_tail_lines() -> usize {
    5000
}

fn default_dnsmasq_log() -> PathBuf {
    PathBuf::from("/var/log/dnsmasq.log")
}

fn default_nginx_log() -> PathBuf {
    PathBuf::from("/var/log/nginx/error.log")
}

fn default_setup_log() -> PathBuf {
    PathBuf::from("/var/log/pxe-setup.log")
}

fn default_web_ui_log() -> PathBuf {
    PathBuf::from("/var/log/pxe-web-ui.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().expect("default config must validate");
    }

    #[test]
    fn example_yaml_parses_and_validates() {
        let cfg: Config = serde_yaml::from_str(Config::example_yaml()).expect("example yaml");
        cfg.validate().expect("example config must validate");
        assert_eq!(cfg.tftp_strategy, TftpStrategy::CombinedWithDhcp);
        assert_eq!(cfg.logs.files.web_ui, PathBuf::from("/var/log/pxe-web-ui.log"));
    }

    #[test]
    fn partial_yaml_falls_back_to_well_known_paths() {
        let cfg: Config = serde_yaml::from_str(
            "listen: \"127.0.0.1:8080\"\ntftp_strategy: standalone_daemon\npaths:\n  lease_file: /tmp/leases\n",
        )
        .expect("partial yaml");
        assert_eq!(cfg.tftp_strategy, TftpStrategy::StandaloneDaemon);
        assert_eq!(cfg.paths.lease_file, PathBuf::from("/tmp/leases"));
        assert_eq!(cfg.paths.preseed_file, default_preseed_file());
        assert_eq!(cfg.logs.default_lines, 100);
    }

    #[test]
    fn rejects_bad_listen_address() {
        let cfg = Config {
            listen: "not-an-address".to_string(),
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn rejects_max_lines_below_default() {
        let mut cfg = Config::default();
        cfg.logs.max_lines = 10;
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn rejects_empty_command() {
        let mut cfg = Config::default();
        cfg.commands.ss = String::new();
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn rejects_empty_process_name() {
        let mut cfg = Config::default();
        cfg.processes.web = " ".to_string();
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }
}
