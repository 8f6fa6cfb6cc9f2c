//! Shared application state handed to every axum handler.

use crate::config::Settings;
use pureboot_core::ipxe::IpxeScriptGenerator;
use pureboot_core::pi::{PiDiscoveryManager, PiManager};
use pureboot_core::registry::{InMemoryNodeRegistry, NodeRegistry};
use pureboot_core::state_service::StateTransitionService;
use pureboot_core::throttler::BandwidthThrottler;
use pureboot_core::workflow::WorkflowService;
use std::sync::Arc;

/// Everything the HTTP boot surface needs to resolve a request.
#[derive(Clone)]
pub struct AppState {
    /// Node persistence.
    pub registry: Arc<dyn NodeRegistry>,
    /// Workflow definitions on disk.
    pub workflows: Arc<WorkflowService>,
    /// Pi per-node TFTP tree manager.
    pub pi_manager: Arc<PiManager>,
    /// Pi discovery tree manager.
    pub pi_discovery: Arc<PiDiscoveryManager>,
    /// iPXE script renderer.
    pub ipxe: Arc<IpxeScriptGenerator>,
    /// Egress bandwidth throttler.
    pub throttler: BandwidthThrottler,
    /// State transition service.
    pub transitions: Arc<StateTransitionService>,
    /// Resolved configuration.
    pub settings: Arc<Settings>,
}

impl AppState {
    /// Build application state from `settings`, wiring an in-memory node
    /// registry as the default backend (spec.md §1 treats persistence as an
    /// external collaborator; this crate supplies a working default).
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        let ipxe = IpxeScriptGenerator::new(settings.boot_menu.advertised_address.clone(), settings.boot_menu.retry_timeout_secs, None);
        let controller_url = format!("http://{}", settings.boot_menu.advertised_address);

        Self {
            registry: Arc::new(InMemoryNodeRegistry::new()),
            workflows: Arc::new(WorkflowService::new(settings.workflows_dir.clone())),
            pi_manager: Arc::new(PiManager::new(
                settings.pi.firmware_dir.clone(),
                settings.pi.deploy_dir.clone(),
                settings.pi.nodes_dir.clone(),
            )),
            pi_discovery: Arc::new(PiDiscoveryManager::new(
                settings.pi.discovery_dir.clone(),
                settings.pi.firmware_dir.clone(),
                settings.pi.deploy_dir.clone(),
                Some(controller_url),
            )),
            ipxe: Arc::new(ipxe),
            throttler: BandwidthThrottler::new(settings.throttler.total_bandwidth_bytes_per_sec),
            transitions: Arc::new(StateTransitionService),
            settings: Arc::new(settings),
        }
    }
}
