//! Render the three classes of iPXE script spec.md §4.3 names: embedded /
//! autoexec, boot, and install. Grounded 1:1 on the original
//! `IPXEScriptGenerator` and `update_tftp_boot_scripts`.

use std::path::Path;

const ASCII_LOGO: &str = r"
    ____                  ____              __
   / __ \__  __________  / __ )____  ____  / /_
  / /_/ / / / / ___/ _ \/ __  / __ \/ __ \/ __/
 / ____/ /_/ / /  /  __/ /_/ / /_/ / /_/ / /_
/_/    \__,_/_/   \___/_____/\____/\____/\__/
";

/// Generates the iPXE scripts served over HTTP and TFTP.
#[derive(Debug, Clone)]
pub struct IpxeScriptGenerator {
    server_address: String,
    timeout_secs: u32,
    logo_url: Option<String>,
}

impl IpxeScriptGenerator {
    /// Build a generator targeting `server_address` (host:port, no
    /// scheme), with a `timeout_secs`-second retry loop and an optional
    /// logo image URL.
    #[must_use]
    pub fn new(server_address: impl Into<String>, timeout_secs: u32, logo_url: Option<String>) -> Self {
        Self {
            server_address: server_address.into(),
            timeout_secs,
            logo_url,
        }
    }

    /// The main menu/banner script served at `/boot?mac=...`.
    #[must_use]
    pub fn generate_boot_script(&self) -> String {
        let mut lines = vec!["#!ipxe".to_string(), String::new()];

        lines.push(
            "console --x 1024 --y 768 2>/dev/null || console --x 800 --y 600 2>/dev/null ||"
                .to_string(),
        );
        lines.push("cpair --foreground 7 --background 0 0".to_string());
        lines.push(String::new());

        if let Some(logo_url) = &self.logo_url {
            lines.push(format!(
                "console --picture http://{}{logo_url} --keep 2>/dev/null ||",
                self.server_address
            ));
            lines.push(String::new());
        }

        lines.push("cpair --foreground 6 --background 0 1".to_string());
        lines.push("colour 1".to_string());
        for line in ASCII_LOGO.trim_matches('\n').split('\n') {
            lines.push(format!("echo {}", line.replace('\\', "\\\\")));
        }

        lines.push("cpair --foreground 7 --background 0 0".to_string());
        lines.push("colour 0".to_string());
        lines.push("echo".to_string());
        lines.push("echo Network Boot Infrastructure".to_string());
        lines.push("echo ============================".to_string());
        lines.push("echo".to_string());
        lines.push("echo MAC Address: ${mac}".to_string());
        lines.push("echo IP Address:  ${ip}".to_string());
        lines.push("echo".to_string());
        lines.push("echo Contacting PureBoot server...".to_string());
        lines.push("echo".to_string());

        let timeout_ms = self.timeout_secs * 1000;
        lines.push(":retry".to_string());
        lines.push(format!(
            "chain --timeout {timeout_ms} http://{}/api/v1/boot?mac=${{mac:hexhyp}} && goto end ||",
            self.server_address
        ));
        lines.push("echo Server unreachable. Retrying in 5 seconds...".to_string());
        lines.push("sleep 5".to_string());
        lines.push("goto retry".to_string());
        lines.push(String::new());
        lines.push(":end".to_string());

        lines.join("\n")
    }

    /// Script for a node that should boot from local disk.
    #[must_use]
    pub fn generate_local_boot(&self) -> String {
        "#!ipxe\n# PureBoot - Boot from local disk\necho Booting from local disk...\nexit\n".to_string()
    }

    /// Script to compile into a custom iPXE binary.
    #[must_use]
    pub fn generate_embedded_script(&self) -> String {
        format!(
            "#!ipxe\n:start\ndhcp\nchain http://{}/api/v1/ipxe/boot.ipxe || goto retry\ngoto end\n:retry\necho Server unreachable, retrying in 5s...\nsleep 5\ngoto start\n:end\n",
            self.server_address
        )
    }

    /// The `autoexec.ipxe` script served from the TFTP root, loaded
    /// automatically by stock iPXE binaries.
    #[must_use]
    pub fn generate_autoexec_script(&self) -> String {
        format!(
            "#!ipxe\n\
             # PureBoot autoexec.ipxe - Auto-generated, do not edit manually\n\
             # Server: {server}\n\n\
             echo PureBoot iPXE starting...\n\
             echo Network interface: ${{net0/mac}}\n\
             echo IP address: ${{net0/ip}}\n\
             echo Gateway: ${{net0/gateway}}\n\
             echo\n\n\
             ifopen net0\n\
             echo\n\
             echo Fetching boot script from PureBoot server...\n\
             chain http://{server}/api/v1/boot?mac=${{net0/mac}} || goto retry\n\n\
             :retry\n\
             echo\n\
             echo Chain failed, retrying in 5 seconds...\n\
             sleep 5\n\
             chain http://{server}/api/v1/boot?mac=${{net0/mac}} || shell\n",
            server = self.server_address,
        )
    }

    /// Script chaining straight into a kernel/initrd pair for an install.
    #[must_use]
    pub fn generate_install_script(&self, kernel_url: &str, initrd_url: &str, cmdline: &str) -> String {
        format!(
            "#!ipxe\n\
             # PureBoot - OS Installation\n\
             echo Starting installation...\n\
             echo\n\
             kernel {kernel_url} {cmdline}\n\
             initrd {initrd_url}\n\
             boot\n",
        )
    }
}

fn chain_shell_script(server_address: &str) -> String {
    format!("#!ipxe\ndhcp\nchain http://{server_address}/api/v1/ipxe/boot.ipxe || shell\n")
}

/// Regenerate `autoexec.ipxe` (and, where the directories already exist,
/// `uefi/boot.ipxe`/`bios/boot.ipxe`) under `tftp_root`, writing only when
/// content actually changed — called on startup and whenever the server's
/// primary IP changes (spec.md §4.3).
///
/// # Errors
///
/// Propagates any filesystem error from reading or writing the scripts.
pub fn update_tftp_boot_scripts(tftp_root: &Path, server_address: &str) -> std::io::Result<()> {
    let generator = IpxeScriptGenerator::new(server_address, 5, None);

    let autoexec_path = tftp_root.join("autoexec.ipxe");
    let autoexec_content = generator.generate_autoexec_script();

    let needs_update = match std::fs::read_to_string(&autoexec_path) {
        Ok(existing) => existing != autoexec_content,
        Err(_) => true,
    };

    if !needs_update {
        tracing::debug!("TFTP boot scripts already up to date");
        return Ok(());
    }

    crate::fs_util::atomic_write(&autoexec_path, &autoexec_content)?;
    tracing::info!(path = %autoexec_path.display(), server = server_address, "updated autoexec.ipxe");

    let uefi_boot_path = tftp_root.join("uefi").join("boot.ipxe");
    if let Some(parent) = uefi_boot_path.parent() {
        if parent.exists() {
            crate::fs_util::atomic_write(&uefi_boot_path, chain_shell_script(server_address))?;
            tracing::info!(path = %uefi_boot_path.display(), "updated uefi boot.ipxe");
        }
    }

    let bios_boot_path = tftp_root.join("bios").join("boot.ipxe");
    if let Some(parent) = bios_boot_path.parent() {
        if parent.exists() {
            crate::fs_util::atomic_write(&bios_boot_path, chain_shell_script(server_address))?;
            tracing::info!(path = %bios_boot_path.display(), "updated bios boot.ipxe");
        }
    }

    Ok(())
}
