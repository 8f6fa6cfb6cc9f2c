//! Per-family, per-state dispatch tables (spec.md §4.6 "Output contract").

use super::{has_no_dispatch_case, BootResponse};
use crate::node::Node;
use crate::state_machine::NodeState;
use crate::workflow::{InstallMethod, ResolveContext, Workflow};

/// Everything the resolver needs beyond the node itself: the resolved
/// server URL and, if one is assigned, the node's workflow.
#[derive(Debug, Clone)]
pub struct DispatchContext<'a> {
    /// Server base URL, with `0.0.0.0` already substituted for the detected
    /// primary IP (spec.md §4.6 "Input").
    pub server: &'a str,
    /// The node's assigned workflow, already loaded, if any.
    pub workflow: Option<&'a Workflow>,
}

impl<'a> DispatchContext<'a> {
    fn callback_url(&self, node: &Node) -> String {
        format!("{}/api/v1/nodes/{}/installed", self.server, node.id)
    }

    fn resolve(&self, workflow: &Workflow, node: &Node) -> Workflow {
        let ctx = ResolveContext {
            server: self.server,
            node_id: &node.id.to_string(),
            mac: node.mac_address.as_deref().unwrap_or_default(),
            ip: node.ip_address.as_deref(),
        };
        workflow.resolve_variables(&ctx)
    }
}

/// Resolve a boot-dispatch decision for an x86/iPXE client (spec.md §4.6
/// table, x86/iPXE rows).
#[must_use]
pub fn resolve_x86(node: &Node, ctx: &DispatchContext<'_>) -> BootResponse {
    match node.state {
        NodeState::Discovered | NodeState::Installed | NodeState::Active | NodeState::InstallFailed => {
            BootResponse::LocalBoot
        }
        NodeState::Installing => BootResponse::LocalBoot,
        NodeState::Pending => match ctx.workflow {
            None => BootResponse::PendingRetry,
            Some(workflow) => {
                let resolved = ctx.resolve(workflow, node);
                BootResponse::InstallIpxe {
                    kernel: resolved.kernel_path,
                    initrd: resolved.initrd_path,
                    cmdline: resolved.cmdline,
                }
            }
        },
        _ => BootResponse::LocalBoot,
    }
}

/// Resolve a boot-dispatch decision for a Pi client (spec.md §4.6 table, Pi
/// rows). `just_registered` is set by the caller when this call triggered
/// auto-registration.
#[must_use]
pub fn resolve_pi(node: &Node, ctx: &DispatchContext<'_>, just_registered: bool) -> BootResponse {
    if just_registered {
        return BootResponse::Discovered {
            message: "node auto-registered, awaiting workflow assignment".to_string(),
        };
    }

    match node.state {
        NodeState::Discovered => BootResponse::Discovered {
            message: "node discovered, awaiting workflow assignment".to_string(),
        },
        NodeState::Pending => match ctx.workflow {
            Some(workflow) if !has_no_dispatch_case(workflow) => {
                let resolved = ctx.resolve(workflow, node);
                let callback = ctx.callback_url(node);
                match workflow.install_method {
                    InstallMethod::Image => BootResponse::DeployImage {
                        image_url: resolved.image_url,
                        target: resolved.target_device,
                        callback,
                    },
                    InstallMethod::Nfs => BootResponse::NfsBoot {
                        server: resolved.nfs_server,
                        path: resolved.nfs_path,
                        callback,
                    },
                    _ => unreachable!("has_no_dispatch_case excludes every other InstallMethod"),
                }
            }
            _ => BootResponse::LocalBoot,
        },
        NodeState::Installing => BootResponse::Wait,
        NodeState::Installed | NodeState::Active => BootResponse::LocalBoot,
        _ => BootResponse::LocalBoot,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Architecture, BootMode};
    use std::collections::HashMap;

    fn x86_node(state: NodeState) -> Node {
        let mut node = Node::new_discovered(Architecture::X86_64, BootMode::Uefi, Some("aa:bb:cc:dd:ee:ff".to_string()), None);
        node.state = state;
        node
    }

    fn pi_node(state: NodeState) -> Node {
        let mut node = Node::new_discovered(Architecture::Aarch64, BootMode::Pi, None, Some("d83add36".to_string()));
        node.state = state;
        node
    }

    fn image_workflow() -> Workflow {
        Workflow {
            id: "img".to_string(),
            name: String::new(),
            description: String::new(),
            kernel_path: String::new(),
            initrd_path: String::new(),
            cmdline: String::new(),
            architecture: "aarch64".to_string(),
            boot_mode: "pi".to_string(),
            install_method: InstallMethod::Image,
            boot_url: String::new(),
            image_url: "http://srv/img.xz".to_string(),
            target_device: "/dev/mmcblk0".to_string(),
            source_device: "/dev/sda".to_string(),
            nfs_server: String::new(),
            nfs_path: String::new(),
            post_script_url: String::new(),
            boot_params: HashMap::new(),
        }
    }

    #[test]
    fn x86_unknown_state_falls_back_to_local_boot() {
        let node = x86_node(NodeState::Discovered);
        let ctx = DispatchContext { server: "http://srv", workflow: None };
        assert_eq!(resolve_x86(&node, &ctx), BootResponse::LocalBoot);
    }

    #[test]
    fn x86_pending_without_workflow_is_retry() {
        let node = x86_node(NodeState::Pending);
        let ctx = DispatchContext { server: "http://srv", workflow: None };
        assert_eq!(resolve_x86(&node, &ctx), BootResponse::PendingRetry);
    }

    #[test]
    fn x86_installing_avoids_reentry() {
        let node = x86_node(NodeState::Installing);
        let ctx = DispatchContext { server: "http://srv", workflow: None };
        assert_eq!(resolve_x86(&node, &ctx), BootResponse::LocalBoot);
    }

    #[test]
    fn pi_image_install_dispatch_matches_scenario_5() {
        let node = pi_node(NodeState::Pending);
        let workflow = image_workflow();
        let ctx = DispatchContext { server: "http://srv", workflow: Some(&workflow) };

        let response = resolve_pi(&node, &ctx, false);
        assert_eq!(
            response,
            BootResponse::DeployImage {
                image_url: "http://srv/img.xz".to_string(),
                target: "/dev/mmcblk0".to_string(),
                callback: format!("http://srv/api/v1/nodes/{}/installed", node.id),
            }
        );
    }

    #[test]
    fn pi_deploy_method_falls_through_to_local_boot() {
        let node = pi_node(NodeState::Pending);
        let mut workflow = image_workflow();
        workflow.install_method = InstallMethod::Deploy;
        let ctx = DispatchContext { server: "http://srv", workflow: Some(&workflow) };

        assert_eq!(resolve_pi(&node, &ctx, false), BootResponse::LocalBoot);
    }

    #[test]
    fn pi_just_registered_returns_discovered() {
        let node = pi_node(NodeState::Discovered);
        let ctx = DispatchContext { server: "http://srv", workflow: None };
        assert!(matches!(resolve_pi(&node, &ctx, true), BootResponse::Discovered { .. }));
    }

    #[test]
    fn pi_installing_waits() {
        let node = pi_node(NodeState::Installing);
        let ctx = DispatchContext { server: "http://srv", workflow: None };
        assert_eq!(resolve_pi(&node, &ctx, false), BootResponse::Wait);
    }
}
