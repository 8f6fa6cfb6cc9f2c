//! PXE dispatch plane errors.

use thiserror::Error;

/// Errors raised by the proxy-DHCP responder and TFTP engine.
#[derive(Debug, Error)]
pub enum PxeError {
    /// Malformed DHCP packet, or one missing a field the responder needs.
    #[error("DHCP error: {0}")]
    Dhcp(String),

    /// TFTP protocol violation: bad opcode, unnegotiable option, or a
    /// request for a path outside the served root.
    #[error("TFTP error: {0}")]
    Tftp(String),

    /// Failed to bind or use a UDP socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A domain-level error surfaced while resolving a request (e.g. Pi
    /// serial validation).
    #[error(transparent)]
    Core(#[from] pureboot_core::PureBootError),

    /// Startup-time misconfiguration (bad bind address, missing TFTP root).
    #[error("configuration error: {0}")]
    Configuration(String),
}
