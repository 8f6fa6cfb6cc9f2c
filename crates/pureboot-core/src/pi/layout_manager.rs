//! Materialise the per-node TFTP tree a Pi boot ROM expects, and the
//! discovery tree for unknown Pi clients (spec.md §4.4).
//!
//! Grounded 1:1 on `examples/original_source/src/pxe/pi_manager.py`,
//! including the discovery-tree supplement recorded in SPEC_FULL.md.

use crate::node::PiModel;
use crate::pi::models::{model_config, validate_serial};
use crate::PureBootError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Known Pi boot filenames, used to recognise Pi TFTP requests of the form
/// `/<8-hex>/<filename>` (spec.md §4.1).
static PI_BOOT_FILES: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "bootcode.bin",
        "start.elf",
        "start4.elf",
        "start_x.elf",
        "start4x.elf",
        "start_db.elf",
        "start4db.elf",
        "start_cd.elf",
        "start4cd.elf",
        "fixup.dat",
        "fixup4.dat",
        "fixup_x.dat",
        "fixup4x.dat",
        "fixup_db.dat",
        "fixup4db.dat",
        "fixup_cd.dat",
        "fixup4cd.dat",
        "config.txt",
        "cmdline.txt",
        "kernel.img",
        "kernel7.img",
        "kernel7l.img",
        "kernel8.img",
        "initramfs.img",
        "initrd.img",
        "bcm2710-rpi-3-b.dtb",
        "bcm2710-rpi-3-b-plus.dtb",
        "bcm2710-rpi-cm3.dtb",
        "bcm2711-rpi-4-b.dtb",
        "bcm2712-rpi-5-b.dtb",
    ]
    .into_iter()
    .collect()
});

/// True if `filename` is a recognised Pi boot artifact: an exact match in
/// the known-files table, or any `bcm27xx-....dtb` device tree.
#[must_use]
pub fn is_pi_boot_file(filename: &str) -> bool {
    let lower = filename.to_ascii_lowercase();
    if PI_BOOT_FILES.contains(lower.as_str()) {
        return true;
    }
    is_dtb_name(&lower)
}

fn is_dtb_name(lower: &str) -> bool {
    let Some(rest) = lower.strip_prefix("bcm27") else {
        return false;
    };
    let Some(rest) = rest.strip_suffix(".dtb") else {
        return false;
    };
    rest.len() >= 2 && rest.as_bytes()[..2].iter().all(u8::is_ascii_digit)
}

/// Check whether a TFTP request path looks like `/<serial>/<boot-file>`.
/// Requires both a valid 8-hex-character serial directory component and a
/// recognised Pi boot filename (spec.md §4.1's "combined detection").
#[must_use]
pub fn is_pi_serial_request(path: &str) -> Option<(String, String)> {
    let trimmed = path.trim_start_matches('/');
    let mut parts = trimmed.split('/');
    let serial = parts.next()?;
    let filename = trimmed.rsplit('/').next()?;
    if parts.next().is_none() && serial == filename {
        // Only `/filename` with no directory component.
        return None;
    }

    let serial_lower = serial.to_ascii_lowercase();
    if validate_serial(&serial_lower) && is_pi_boot_file(filename) {
        Some((serial_lower, filename.to_string()))
    } else {
        None
    }
}

/// Parameters the state-aware `cmdline.txt` generator needs, gathered from
/// the node's assigned workflow and dispatch context (spec.md §4.4).
#[derive(Debug, Clone, Default)]
pub struct CmdlineContext {
    /// Controller base URL, included as `pureboot.url=`.
    pub controller_url: Option<String>,
    /// Node id, included for install-mode callbacks.
    pub node_id: Option<String>,
    /// Node MAC, included for install-mode callbacks.
    pub mac: Option<String>,
    /// Image URL for an image-method install.
    pub image_url: Option<String>,
    /// Target block device for an image-method install.
    pub target_device: Option<String>,
    /// Install-progress callback URL.
    pub callback_url: Option<String>,
    /// NFS server for an NFS-root boot.
    pub nfs_server: Option<String>,
    /// NFS export path for an NFS-root boot.
    pub nfs_path: Option<String>,
}

/// Manages the per-node TFTP directory tree for Pi network boot.
#[derive(Debug, Clone)]
pub struct PiManager {
    firmware_dir: PathBuf,
    deploy_dir: PathBuf,
    nodes_dir: PathBuf,
}

impl PiManager {
    /// Build a manager rooted at `firmware_dir` (shared firmware and DTBs),
    /// `deploy_dir` (shared kernel/initramfs), and `nodes_dir` (where
    /// per-node trees are created).
    #[must_use]
    pub fn new(firmware_dir: impl Into<PathBuf>, deploy_dir: impl Into<PathBuf>, nodes_dir: impl Into<PathBuf>) -> Self {
        Self {
            firmware_dir: firmware_dir.into(),
            deploy_dir: deploy_dir.into(),
            nodes_dir: nodes_dir.into(),
        }
    }

    fn validated(serial: &str) -> Result<String, PureBootError> {
        let lowered = serial.to_ascii_lowercase();
        if validate_serial(&lowered) {
            Ok(lowered)
        } else {
            Err(PureBootError::Validation(format!(
                "invalid Pi serial number: '{serial}'; must be 8 lowercase hex characters"
            )))
        }
    }

    /// Path to a node's TFTP directory.
    ///
    /// # Errors
    ///
    /// Returns [`PureBootError::Validation`] if `serial` is malformed.
    pub fn node_directory(&self, serial: &str) -> Result<PathBuf, PureBootError> {
        Ok(self.nodes_dir.join(Self::validated(serial)?))
    }

    /// Whether a node's directory already exists.
    ///
    /// # Errors
    ///
    /// Returns [`PureBootError::Validation`] if `serial` is malformed.
    pub fn node_exists(&self, serial: &str) -> Result<bool, PureBootError> {
        Ok(self.node_directory(serial)?.exists())
    }

    /// Symlink firmware/DTB/kernel files and write `config.txt` /
    /// `cmdline.txt` for a new Pi node.
    ///
    /// # Errors
    ///
    /// Returns [`PureBootError::Validation`] for a malformed serial, or
    /// [`PureBootError::Io`] if directory creation, symlinking, or file
    /// writes fail.
    pub fn create_node_directory(
        &self,
        serial: &str,
        model: PiModel,
        controller_url: Option<&str>,
    ) -> Result<PathBuf, PureBootError> {
        let serial = Self::validated(serial)?;
        let node_dir = self.nodes_dir.join(&serial);
        std::fs::create_dir_all(&node_dir)?;
        tracing::info!(serial = %serial, path = %node_dir.display(), "creating Pi node directory");

        let config = model_config(model);
        for firmware_file in config.firmware_files {
            self.symlink_if_source_exists(&self.firmware_dir.join(firmware_file), &node_dir.join(firmware_file));
        }
        self.symlink_if_source_exists(&self.firmware_dir.join(config.dtb), &node_dir.join(config.dtb));
        for deploy_file in ["kernel8.img", "initramfs.img"] {
            self.symlink_if_source_exists(&self.deploy_dir.join(deploy_file), &node_dir.join(deploy_file));
        }

        crate::fs_util::atomic_write(&node_dir.join("config.txt"), Self::generate_config_txt(model))?;
        let cmdline_ctx = CmdlineContext {
            controller_url: controller_url.map(str::to_string),
            ..Default::default()
        };
        crate::fs_util::atomic_write(
            &node_dir.join("cmdline.txt"),
            Self::generate_cmdline_txt(&serial, "discovered", &cmdline_ctx),
        )?;

        tracing::info!(serial = %serial, "Pi node directory created successfully");
        Ok(node_dir)
    }

    /// Symlink creation that logs and continues on a missing source, so
    /// registration is never blocked by a partial firmware set (spec.md
    /// §7). Idempotent: an existing destination is left untouched.
    fn symlink_if_source_exists(&self, src: &Path, dst: &Path) {
        if dst.exists() {
            return;
        }
        if !src.exists() {
            tracing::warn!(src = %src.display(), "symlink source missing, node still registered");
            return;
        }
        #[cfg(unix)]
        {
            if let Err(error) = std::os::unix::fs::symlink(src, dst) {
                tracing::warn!(src = %src.display(), dst = %dst.display(), %error, "failed to create symlink");
            } else {
                tracing::debug!(src = %src.display(), dst = %dst.display(), "created symlink");
            }
        }
        #[cfg(not(unix))]
        {
            tracing::warn!("symlink creation is only supported on unix targets");
        }
    }

    /// Delete a node's TFTP directory, if it exists. A malformed serial is
    /// logged and ignored: there is nothing to delete.
    pub fn delete_node_directory(&self, serial: &str) {
        let Ok(serial) = Self::validated(serial) else {
            tracing::warn!(serial, "invalid serial number for deletion");
            return;
        };
        let node_dir = self.nodes_dir.join(&serial);
        if node_dir.exists() {
            if let Err(error) = std::fs::remove_dir_all(&node_dir) {
                tracing::warn!(%error, serial = %serial, "failed to delete Pi node directory");
            } else {
                tracing::info!(serial = %serial, "deleted Pi node directory");
            }
        }
    }

    /// Static per-model `config.txt` content.
    #[must_use]
    pub fn generate_config_txt(model: PiModel) -> String {
        let config = model_config(model);
        let mut lines = vec![
            "# PureBoot auto-generated config.txt".to_string(),
            format!("# Pi Model: {model:?}"),
            String::new(),
            "# Boot configuration".to_string(),
        ];
        if config.arm_64bit {
            lines.push("arm_64bit=1".to_string());
        }
        lines.extend([
            String::new(),
            "# Kernel".to_string(),
            "kernel=kernel8.img".to_string(),
            "initramfs initramfs.img followkernel".to_string(),
            String::new(),
            "# Device tree".to_string(),
            format!("device_tree={}", config.dtb),
            String::new(),
            "# UART console (for debugging)".to_string(),
            "enable_uart=1".to_string(),
            "uart_2ndstage=1".to_string(),
            String::new(),
            "# GPU memory (minimal for headless)".to_string(),
            "gpu_mem=16".to_string(),
            String::new(),
            "# Fast boot".to_string(),
            "disable_splash=1".to_string(),
            "boot_delay=0".to_string(),
        ]);
        lines.join("\n") + "\n"
    }

    /// State-aware `cmdline.txt` content (spec.md §4.4).
    #[must_use]
    pub fn generate_cmdline_txt(serial: &str, state: &str, ctx: &CmdlineContext) -> String {
        let mut params = vec![
            "console=serial0,115200".to_string(),
            "console=tty1".to_string(),
            "ip=dhcp".to_string(),
            format!("pureboot.serial={serial}"),
            format!("pureboot.state={state}"),
        ];

        if let Some(url) = &ctx.controller_url {
            params.push(format!("pureboot.url={url}"));
        }

        if state == "installing" && ctx.image_url.is_some() {
            let image_url = ctx.image_url.as_deref().unwrap_or_default();
            params.push("pureboot.mode=install".to_string());
            params.push(format!("pureboot.image_url={image_url}"));
            if let Some(target) = &ctx.target_device {
                params.push(format!("pureboot.target={target}"));
            }
            if let Some(node_id) = &ctx.node_id {
                params.push(format!("pureboot.node_id={node_id}"));
            }
            if let Some(mac) = &ctx.mac {
                params.push(format!("pureboot.mac={mac}"));
            }
            if let Some(callback) = &ctx.callback_url {
                params.push(format!("pureboot.callback={callback}"));
            }
            params.push("root=/dev/ram0".to_string());
            params.push("rootfstype=ramfs".to_string());
        } else if let (Some(server), Some(path)) = (&ctx.nfs_server, &ctx.nfs_path) {
            params.push("root=/dev/nfs".to_string());
            params.push(format!("nfsroot={server}:{path},vers=4,tcp"));
            params.push("rw".to_string());
        } else {
            params.push("root=/dev/ram0".to_string());
            params.push("rootfstype=ramfs".to_string());
        }

        params.push("quiet".to_string());
        params.push("loglevel=4".to_string());

        params.join(" ") + "\n"
    }

    /// Rewrite `cmdline.txt` for an existing node, reflecting its current
    /// lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns [`PureBootError::Validation`] for a malformed serial,
    /// [`PureBootError::NotFound`] if the node directory does not exist, or
    /// [`PureBootError::Io`] if the write fails.
    pub fn update_cmdline_for_state(&self, serial: &str, state: &str, ctx: &CmdlineContext) -> Result<(), PureBootError> {
        let serial = Self::validated(serial)?;
        let node_dir = self.nodes_dir.join(&serial);
        if !node_dir.exists() {
            return Err(PureBootError::NotFound(format!("Pi node directory not found: {serial}")));
        }
        crate::fs_util::atomic_write(&node_dir.join("cmdline.txt"), Self::generate_cmdline_txt(&serial, state, ctx))?;
        tracing::info!(serial = %serial, state, "updated cmdline.txt");
        Ok(())
    }
}

/// Serves unknown Pi clients from a shared discovery tree carrying
/// firmware for every supported model, so they can register themselves
/// with the controller (spec.md §4.4, supplemented per SPEC_FULL.md).
#[derive(Debug, Clone)]
pub struct PiDiscoveryManager {
    discovery_dir: PathBuf,
    firmware_dir: PathBuf,
    deploy_dir: PathBuf,
    controller_url: Option<String>,
}

impl PiDiscoveryManager {
    /// Build a discovery manager.
    #[must_use]
    pub fn new(
        discovery_dir: impl Into<PathBuf>,
        firmware_dir: impl Into<PathBuf>,
        deploy_dir: impl Into<PathBuf>,
        controller_url: Option<String>,
    ) -> Self {
        Self {
            discovery_dir: discovery_dir.into(),
            firmware_dir: firmware_dir.into(),
            deploy_dir: deploy_dir.into(),
            controller_url,
        }
    }

    /// Path to the discovery directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.discovery_dir
    }

    /// Create and populate the discovery directory if it doesn't already
    /// exist: firmware for Pi 3 and Pi 4/5, every available DTB, the
    /// shared deploy kernel/initramfs, and a discovery `config.txt`/
    /// `cmdline.txt`.
    ///
    /// # Errors
    ///
    /// Returns [`PureBootError::Io`] if directory creation or file writes
    /// fail.
    pub fn ensure_discovery_directory(&self) -> Result<&Path, PureBootError> {
        if self.discovery_dir.exists() {
            return Ok(&self.discovery_dir);
        }

        std::fs::create_dir_all(&self.discovery_dir)?;
        tracing::info!(path = %self.discovery_dir.display(), "creating Pi discovery directory");

        for firmware_file in ["bootcode.bin", "start.elf", "fixup.dat", "start4.elf", "fixup4.dat"] {
            self.symlink_if_source_exists(&self.firmware_dir.join(firmware_file), &self.discovery_dir.join(firmware_file));
        }

        if let Ok(entries) = std::fs::read_dir(&self.firmware_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "dtb") {
                    if let Some(name) = path.file_name() {
                        self.symlink_if_source_exists(&path, &self.discovery_dir.join(name));
                    }
                }
            }
        }

        for deploy_file in ["kernel8.img", "initramfs.img"] {
            self.symlink_if_source_exists(&self.deploy_dir.join(deploy_file), &self.discovery_dir.join(deploy_file));
        }

        crate::fs_util::atomic_write(&self.discovery_dir.join("config.txt"), self.discovery_config_txt())?;
        crate::fs_util::atomic_write(&self.discovery_dir.join("cmdline.txt"), self.discovery_cmdline_txt())?;

        tracing::info!("Pi discovery directory created successfully");
        Ok(&self.discovery_dir)
    }

    fn symlink_if_source_exists(&self, src: &Path, dst: &Path) {
        if dst.exists() || !src.exists() {
            return;
        }
        #[cfg(unix)]
        {
            let _ = std::os::unix::fs::symlink(src, dst);
        }
    }

    fn discovery_config_txt(&self) -> String {
        [
            "# PureBoot Discovery Mode config.txt",
            "# This configuration supports Pi 3, 4, and 5 models",
            "",
            "# Boot configuration",
            "arm_64bit=1",
            "",
            "# Kernel",
            "kernel=kernel8.img",
            "initramfs initramfs.img followkernel",
            "",
            "# UART console (for debugging)",
            "enable_uart=1",
            "uart_2ndstage=1",
            "",
            "# GPU memory (minimal for headless)",
            "gpu_mem=16",
            "",
            "# Fast boot",
            "disable_splash=1",
            "boot_delay=0",
        ]
        .join("\n")
            + "\n"
    }

    fn discovery_cmdline_txt(&self) -> String {
        let mut params = vec![
            "console=serial0,115200".to_string(),
            "console=tty1".to_string(),
            "ip=dhcp".to_string(),
            "pureboot.mode=discovery".to_string(),
            "pureboot.state=discovered".to_string(),
        ];
        if let Some(url) = &self.controller_url {
            params.push(format!("pureboot.url={url}"));
        }
        params.push("root=/dev/ram0".to_string());
        params.push("rootfstype=ramfs".to_string());
        params.push("quiet".to_string());
        params.push("loglevel=4".to_string());
        params.join(" ") + "\n"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn scratch_dir(label: &str) -> PathBuf {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
        let dir = std::env::temp_dir().join(format!("pureboot-pi-test-{label}-{nanos}"));
        std::fs::create_dir_all(&dir).expect("create scratch dir");
        dir
    }

    #[test]
    fn is_pi_boot_file_matches_known_files_and_dtb_pattern() {
        assert!(is_pi_boot_file("start4.elf"));
        assert!(is_pi_boot_file("bcm2711-rpi-4-b.dtb"));
        assert!(!is_pi_boot_file("random.bin"));
    }

    #[test]
    fn is_pi_serial_request_requires_both_valid_serial_and_known_file() {
        assert_eq!(
            is_pi_serial_request("/d83add36/start4.elf"),
            Some(("d83add36".to_string(), "start4.elf".to_string()))
        );
        assert_eq!(is_pi_serial_request("/d83add36/unknown.bin"), None);
        assert_eq!(is_pi_serial_request("/not-hex/start4.elf"), None);
    }

    #[test]
    fn cmdline_for_installing_with_image_includes_install_params() {
        let ctx = CmdlineContext {
            controller_url: Some("http://srv".to_string()),
            image_url: Some("http://srv/img.xz".to_string()),
            target_device: Some("/dev/mmcblk0".to_string()),
            ..Default::default()
        };
        let cmdline = PiManager::generate_cmdline_txt("d83add36", "installing", &ctx);
        assert!(cmdline.contains("pureboot.serial=d83add36"));
        assert!(cmdline.contains("pureboot.mode=install"));
        assert!(cmdline.contains("pureboot.image_url=http://srv/img.xz"));
        assert!(cmdline.contains("pureboot.target=/dev/mmcblk0"));
        assert!(cmdline.contains("root=/dev/ram0 rootfstype=ramfs"));
        assert!(cmdline.ends_with("loglevel=4\n"));
    }

    #[test]
    fn cmdline_for_nfs_boot() {
        let ctx = CmdlineContext {
            nfs_server: Some("10.0.0.1".to_string()),
            nfs_path: Some("/export/root".to_string()),
            ..Default::default()
        };
        let cmdline = PiManager::generate_cmdline_txt("d83add36", "installing", &ctx);
        assert!(cmdline.contains("root=/dev/nfs nfsroot=10.0.0.1:/export/root,vers=4,tcp rw"));
    }

    #[test]
    fn create_node_directory_materialises_config_and_cmdline() {
        let root = scratch_dir("create");
        let firmware_dir = root.join("firmware");
        let deploy_dir = root.join("deploy");
        let nodes_dir = root.join("nodes");
        std::fs::create_dir_all(&firmware_dir).unwrap();
        std::fs::create_dir_all(&deploy_dir).unwrap();
        std::fs::write(firmware_dir.join("start4.elf"), b"fw").unwrap();
        std::fs::write(firmware_dir.join("fixup4.dat"), b"fw").unwrap();
        std::fs::write(firmware_dir.join("bcm2711-rpi-4-b.dtb"), b"dtb").unwrap();
        std::fs::write(deploy_dir.join("kernel8.img"), b"kernel").unwrap();
        std::fs::write(deploy_dir.join("initramfs.img"), b"initrd").unwrap();

        let manager = PiManager::new(&firmware_dir, &deploy_dir, &nodes_dir);
        let node_dir = manager
            .create_node_directory("d83add36", PiModel::Pi4, Some("http://srv"))
            .expect("create node directory");

        assert!(node_dir.join("config.txt").is_file());
        assert!(node_dir.join("cmdline.txt").is_file());
        assert!(node_dir.join("start4.elf").exists());
        let config = std::fs::read_to_string(node_dir.join("config.txt")).unwrap();
        assert!(config.contains("device_tree=bcm2711-rpi-4-b.dtb"));

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn rejects_invalid_serial_without_touching_filesystem() {
        let root = scratch_dir("invalid");
        let manager = PiManager::new(root.join("fw"), root.join("deploy"), root.join("nodes"));
        let err = manager.create_node_directory("nothex!!", PiModel::Pi4, None).unwrap_err();
        assert!(matches!(err, PureBootError::Validation(_)));
        std::fs::remove_dir_all(&root).ok();
    }
}
