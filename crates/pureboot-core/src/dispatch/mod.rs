//! Boot dispatch resolver: given a node and its current state, produce the
//! boot artifact a client should receive next (spec.md §4.6, §9 "Sum types
//! over duck-typed responses").

mod resolver;

pub use resolver::{resolve_pi, resolve_x86, DispatchContext};

use crate::workflow::Workflow;

/// Tagged union of every shape a boot-dispatch decision can take. Rendered
/// to iPXE script text or JSON only at the HTTP edge (`pureboot-controller`),
/// never inside the core.
#[derive(Debug, Clone, PartialEq)]
pub enum BootResponse {
    /// Boot from local disk; nothing more to do.
    LocalBoot,
    /// Chain to a kernel/initrd pair with a resolved command line.
    InstallIpxe {
        /// Kernel URL.
        kernel: String,
        /// Initramfs URL.
        initrd: String,
        /// Fully resolved kernel command line.
        cmdline: String,
    },
    /// Stream a disk image onto a target device (Pi `image` workflows).
    DeployImage {
        /// Disk image URL.
        image_url: String,
        /// Target block device.
        target: String,
        /// Install-progress callback URL.
        callback: String,
    },
    /// Mount an NFS root (Pi `nfs` workflows).
    NfsBoot {
        /// NFS server address.
        server: String,
        /// NFS export path.
        path: String,
        /// Install-progress callback URL.
        callback: String,
    },
    /// No workflow assigned yet; client should retry shortly.
    PendingRetry,
    /// Installation already in progress; avoid re-entry.
    Wait,
    /// Node was just auto-registered.
    Discovered {
        /// Human-readable status message.
        message: String,
    },
}

/// True when `workflow.install_method` has no dispatch case and should fall
/// through to local-boot (spec.md §9 Open Questions, resolved against
/// `boot_pi.py`'s `_get_workflow_response`).
fn has_no_dispatch_case(workflow: &Workflow) -> bool {
    !matches!(workflow.install_method, crate::workflow::InstallMethod::Image | crate::workflow::InstallMethod::Nfs)
}
