//! Configuration loaded from `PUREBOOT_*` environment variables.
//!
//! Grounded on `settings.py`'s nested settings groups (`TFTPSettings`,
//! `DHCPProxySettings`, `BootMenuSettings`, `RegistrationSettings`) and the
//! teacher's own `std::env::var`-based loading idiom (no settings crate is
//! in the teacher's dependency table, so none is introduced here).

use std::net::Ipv4Addr;
use std::path::PathBuf;
use thiserror::Error;

/// Raised when required configuration is missing or malformed.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable was present but could not be parsed.
    #[error("invalid value for {var}: {value}")]
    InvalidValue {
        /// Environment variable name.
        var: &'static str,
        /// The value that failed to parse.
        value: String,
    },
}

/// TFTP engine settings (spec.md §4.1).
#[derive(Debug, Clone)]
pub struct TftpSettings {
    /// Root directory served over TFTP (stage-1 binaries, iPXE scripts).
    pub root: PathBuf,
    /// Bind address, e.g. `0.0.0.0:69`.
    pub bind_addr: String,
}

/// Proxy-DHCP responder settings (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct DhcpProxySettings {
    /// Bind address for the proxy-DHCP listener, typically `0.0.0.0:4011`.
    pub bind_addr: String,
    /// This server's IPv4 address, used as the DHCP server identifier and
    /// TFTP server-name option.
    pub server_ip: Ipv4Addr,
}

/// Boot menu / HTTP boot surface settings (spec.md §6).
#[derive(Debug, Clone)]
pub struct BootMenuSettings {
    /// Bind address for the HTTP boot surface, e.g. `0.0.0.0:8080`.
    pub server_address: String,
    /// Base `host:port` advertised to clients in chained iPXE scripts and
    /// DHCP replies. Equal to `server_address` unless its host is the
    /// unspecified address `0.0.0.0`, in which case the detected primary
    /// outbound interface address is substituted (spec.md §4.6).
    pub advertised_address: String,
    /// Retry timeout, in seconds, embedded in the boot script's retry loop.
    pub retry_timeout_secs: u32,
}

/// Auto-registration settings (spec.md §4.6, §7 "not-found may be upgraded
/// to an auto-registration write").
#[derive(Debug, Clone)]
pub struct RegistrationSettings {
    /// Whether an unknown MAC/serial is auto-registered as `discovered`.
    pub auto_register: bool,
}

/// Pi layout manager settings (spec.md §4.4).
#[derive(Debug, Clone)]
pub struct PiSettings {
    /// Directory holding per-model firmware and DTB files.
    pub firmware_dir: PathBuf,
    /// Directory holding the shared kernel/initramfs artifacts.
    pub deploy_dir: PathBuf,
    /// Directory under which per-node trees are created.
    pub nodes_dir: PathBuf,
    /// Directory serving unknown Pi clients (spec.md §4.4 "Discovery tree").
    pub discovery_dir: PathBuf,
}

/// Bandwidth throttler settings (spec.md §4.7).
#[derive(Debug, Clone, Copy)]
pub struct ThrottlerSettings {
    /// Total egress bandwidth budget, in bytes per second, shared across
    /// every concurrent transfer.
    pub total_bandwidth_bytes_per_sec: f64,
}

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// TFTP engine settings.
    pub tftp: TftpSettings,
    /// Proxy-DHCP responder settings.
    pub dhcp: DhcpProxySettings,
    /// Boot menu settings.
    pub boot_menu: BootMenuSettings,
    /// Auto-registration settings.
    pub registration: RegistrationSettings,
    /// Pi layout manager settings.
    pub pi: PiSettings,
    /// Bandwidth throttler settings.
    pub throttler: ThrottlerSettings,
    /// Directory of workflow definitions (spec.md §3 "Workflow").
    pub workflows_dir: PathBuf,
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn env_path_or(var: &str, default: &str) -> PathBuf {
    PathBuf::from(env_or(var, default))
}

/// Detect this host's primary outbound-interface IPv4 address by asking the
/// kernel's routing table which local address it would use to reach a
/// public host, without sending any traffic (`UdpSocket::connect` on a UDP
/// socket never transmits a packet by itself).
fn detect_primary_ipv4() -> Ipv4Addr {
    let detected: std::io::Result<Ipv4Addr> = (|| {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        match socket.local_addr()?.ip() {
            std::net::IpAddr::V4(addr) => Ok(addr),
            std::net::IpAddr::V6(_) => Ok(Ipv4Addr::LOCALHOST),
        }
    })();

    detected.unwrap_or_else(|error| {
        tracing::warn!(%error, "failed to detect primary outbound IPv4 address, falling back to loopback");
        Ipv4Addr::LOCALHOST
    })
}

/// Substitute the detected primary interface address for `parsed` when it is
/// the unspecified address `0.0.0.0` (spec.md §4.6).
fn resolve_server_ip(parsed: Ipv4Addr) -> Ipv4Addr {
    if parsed == Ipv4Addr::UNSPECIFIED {
        detect_primary_ipv4()
    } else {
        parsed
    }
}

/// Substitute the detected primary interface address for the host half of
/// `host:port` when that host is `0.0.0.0` (spec.md §4.6).
fn resolve_advertised_address(host_port: &str) -> String {
    match host_port.split_once(':') {
        Some((host, port)) if host == "0.0.0.0" => format!("{}:{port}", detect_primary_ipv4()),
        _ => host_port.to_string(),
    }
}

impl Settings {
    /// Load configuration from `PUREBOOT_*` environment variables, falling
    /// back to development-friendly defaults for anything unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a numeric or address
    /// variable is set but fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_ip: Ipv4Addr = env_or("PUREBOOT_SERVER_IP", "0.0.0.0")
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var: "PUREBOOT_SERVER_IP", value: env_or("PUREBOOT_SERVER_IP", "0.0.0.0") })?;
        let server_ip = resolve_server_ip(server_ip);

        let boot_server_address = env_or("PUREBOOT_BOOT_SERVER_ADDRESS", "127.0.0.1:8080");
        let advertised_address = resolve_advertised_address(&boot_server_address);

        let retry_timeout_secs: u32 = env_or("PUREBOOT_BOOT_RETRY_TIMEOUT_SECS", "5")
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                var: "PUREBOOT_BOOT_RETRY_TIMEOUT_SECS",
                value: env_or("PUREBOOT_BOOT_RETRY_TIMEOUT_SECS", "5"),
            })?;

        let auto_register = env_or("PUREBOOT_AUTO_REGISTER", "true") == "true";

        let total_bandwidth_mbps: f64 = env_or("PUREBOOT_THROTTLER_TOTAL_MBPS", "100")
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                var: "PUREBOOT_THROTTLER_TOTAL_MBPS",
                value: env_or("PUREBOOT_THROTTLER_TOTAL_MBPS", "100"),
            })?;

        Ok(Self {
            tftp: TftpSettings {
                root: env_path_or("PUREBOOT_TFTP_ROOT", "/var/lib/pureboot/tftp"),
                bind_addr: env_or("PUREBOOT_TFTP_BIND_ADDR", "0.0.0.0:69"),
            },
            dhcp: DhcpProxySettings {
                bind_addr: env_or("PUREBOOT_DHCP_BIND_ADDR", "0.0.0.0:4011"),
                server_ip,
            },
            boot_menu: BootMenuSettings {
                server_address: boot_server_address,
                advertised_address,
                retry_timeout_secs,
            },
            registration: RegistrationSettings { auto_register },
            pi: PiSettings {
                firmware_dir: env_path_or("PUREBOOT_PI_FIRMWARE_DIR", "/var/lib/pureboot/pi/firmware"),
                deploy_dir: env_path_or("PUREBOOT_PI_DEPLOY_DIR", "/var/lib/pureboot/pi/deploy"),
                nodes_dir: env_path_or("PUREBOOT_PI_NODES_DIR", "/var/lib/pureboot/pi/nodes"),
                discovery_dir: env_path_or("PUREBOOT_PI_DISCOVERY_DIR", "/var/lib/pureboot/pi/discovery"),
            },
            throttler: ThrottlerSettings {
                total_bandwidth_bytes_per_sec: total_bandwidth_mbps * 1024.0 * 1024.0 / 8.0,
            },
            workflows_dir: env_path_or("PUREBOOT_WORKFLOWS_DIR", "/var/lib/pureboot/workflows"),
        })
    }
}
