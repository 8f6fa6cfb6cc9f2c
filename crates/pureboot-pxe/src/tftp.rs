//! TFTP engine (spec.md §4.1): RFC 1350 base, RFC 2347/2348 option
//! negotiation via `async-tftp`'s built-in handling, with PureBoot's path
//! policy and Pi per-node tree routing layered on top through the
//! [`Handler`] trait.

use async_tftp::server::Handler;
use async_tftp::packet::Error as TftpPacketError;
use pureboot_core::pi::layout_manager::is_pi_serial_request;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::fs::File;

/// Read-only root-confined TFTP handler.
///
/// `root` serves x86 stage-1 binaries and the rewritten `autoexec.ipxe` /
/// `boot.ipxe` scripts; `pi_nodes_root` is the parent of every per-node Pi
/// directory plus the shared `discovery/` tree.
#[derive(Debug, Clone)]
pub struct PureBootTftpHandler {
    root: PathBuf,
    pi_nodes_root: PathBuf,
}

impl PureBootTftpHandler {
    /// Build a handler serving `root` for ordinary TFTP paths and
    /// `pi_nodes_root` for Pi serial-prefixed requests.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, pi_nodes_root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pi_nodes_root: pi_nodes_root.into(),
        }
    }

    /// Resolve a TFTP request path to a filesystem path, honouring the Pi
    /// serial-prefix routing rule (spec.md §4.1) and rejecting anything
    /// that escapes its root after symlink resolution.
    fn resolve(&self, requested: &Path) -> Result<PathBuf, TftpPacketError> {
        let requested_str = requested.to_string_lossy();

        let (base_root, relative) = if let Some((serial, filename)) = is_pi_serial_request(&requested_str) {
            (self.pi_nodes_root.clone(), PathBuf::from(serial).join(filename))
        } else {
            (self.root.clone(), PathBuf::from(requested_str.trim_start_matches('/')))
        };

        let candidate = base_root.join(&relative);
        let canonical_root = base_root.canonicalize().map_err(|_| TftpPacketError::FileNotFound)?;
        let canonical_candidate = candidate.canonicalize().map_err(|_| TftpPacketError::FileNotFound)?;

        if !canonical_candidate.starts_with(&canonical_root) {
            return Err(TftpPacketError::PermissionDenied);
        }

        Ok(canonical_candidate)
    }
}

#[async_trait::async_trait]
impl Handler for PureBootTftpHandler {
    type Reader = File;
    type Writer = File;

    async fn read_req_open(&mut self, _client: &SocketAddr, path: &Path) -> Result<(Self::Reader, Option<u64>), TftpPacketError> {
        let resolved = self.resolve(path)?;

        let file = File::open(&resolved).await.map_err(|_| TftpPacketError::FileNotFound)?;
        let size = file.metadata().await.ok().map(|m| m.len());

        tracing::debug!(path = %resolved.display(), "serving TFTP read request");
        Ok((file, size))
    }

    async fn write_req_open(&mut self, _client: &SocketAddr, path: &Path, _size: Option<u64>) -> Result<Self::Writer, TftpPacketError> {
        tracing::warn!(path = %path.display(), "rejected TFTP write request");
        Err(TftpPacketError::PermissionDenied)
    }
}
