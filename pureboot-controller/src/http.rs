//! HTTP boot dispatch surface (spec.md §6). Mounted under `/api/v1`, matching
//! the paths already embedded in `pureboot_core::ipxe`'s generated scripts.

use crate::error::ControllerError;
use crate::state::AppState;
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use bytes::Bytes;
use chrono::Utc;
use futures_util::stream;
use pureboot_core::dispatch::{resolve_pi, resolve_x86, BootResponse, DispatchContext};
use pureboot_core::mac::normalize_mac;
use pureboot_core::node::{Architecture, BootMode, Node, PiModel, TriggeredBy};
use pureboot_core::pi::validate_serial;
use pureboot_core::state_machine::NodeState;
use pureboot_core::state_service::{StateTransitionService, TransitionError, TransitionRequest};
use pureboot_core::throttler::{TransferGuard, PACING_INTERVAL};
use pureboot_core::workflow::Workflow;
use pureboot_core::PureBootError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use uuid::Uuid;

/// Build the application's axum router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/ipxe/boot.ipxe", get(get_boot_ipxe))
        .route("/api/v1/boot", get(get_boot_x86))
        .route("/api/v1/boot/pi", get(get_boot_pi))
        .route("/api/v1/files/{*path}", get(get_file))
        .route("/api/v1/report", post(report_status))
        .route("/api/v1/nodes/{node_id}/installed", post(report_installed))
        .route("/api/v1/nodes/{node_id}/state", patch(patch_node_state))
        .with_state(state)
}

fn text_plain(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/plain")], body).into_response()
}

async fn load_node_workflow(app: &AppState, node: &Node) -> Result<Option<Workflow>, ControllerError> {
    match &node.workflow_id {
        Some(id) => Ok(Some(app.workflows.get_workflow(id)?)),
        None => Ok(None),
    }
}

fn controller_url(app: &AppState) -> String {
    format!("http://{}", app.settings.boot_menu.advertised_address)
}

/// The menu/banner script embedded iPXE binaries and `autoexec.ipxe` chain
/// to.
async fn get_boot_ipxe(State(app): State<AppState>) -> Response {
    text_plain(app.ipxe.generate_boot_script())
}

#[derive(Debug, Deserialize)]
struct BootQuery {
    mac: String,
}

/// `GET /api/v1/boot?mac=<mac>` (spec.md §6, x86/iPXE dispatch row).
async fn get_boot_x86(State(app): State<AppState>, Query(query): Query<BootQuery>) -> Result<Response, ControllerError> {
    let mac = normalize_mac(&query.mac)
        .ok_or_else(|| PureBootError::Validation(format!("invalid MAC address: {}", query.mac)))?;

    let node = match app.registry.find_by_mac(&mac).await? {
        Some(mut node) => {
            node.last_seen_at = Some(Utc::now());
            Some(app.registry.update(node).await?)
        }
        None if app.settings.registration.auto_register => {
            let node = Node::new_discovered(Architecture::X86_64, BootMode::Uefi, Some(mac), None);
            Some(app.registry.create(node).await?)
        }
        None => None,
    };

    let Some(node) = node else {
        return Ok(text_plain(app.ipxe.generate_local_boot()));
    };

    let workflow = load_node_workflow(&app, &node).await?;
    let server = controller_url(&app);
    let ctx = DispatchContext {
        server: &server,
        workflow: workflow.as_ref(),
    };
    let response = resolve_x86(&node, &ctx);
    Ok(text_plain(render_x86_script(&app, response, app.settings.boot_menu.retry_timeout_secs, &server)))
}

fn render_x86_script(app: &AppState, response: BootResponse, retry_timeout_secs: u32, server: &str) -> String {
    match response {
        BootResponse::InstallIpxe { kernel, initrd, cmdline } => app.ipxe.generate_install_script(&kernel, &initrd, &cmdline),
        BootResponse::PendingRetry => format!(
            "#!ipxe\n# PureBoot - awaiting workflow assignment\necho Pending workflow assignment, retrying in {retry_timeout_secs}s...\nsleep {retry_timeout_secs}\nchain http://{server}/api/v1/boot?mac=${{mac:hexhyp}}\n"
        ),
        BootResponse::LocalBoot
        | BootResponse::Wait
        | BootResponse::DeployImage { .. }
        | BootResponse::NfsBoot { .. }
        | BootResponse::Discovered { .. } => app.ipxe.generate_local_boot(),
    }
}

#[derive(Debug, Deserialize)]
struct BootPiQuery {
    serial: String,
    mac: Option<String>,
}

#[derive(Debug, Default, Serialize)]
struct PiBootResponse {
    state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nfs_server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nfs_path: Option<String>,
}

fn state_label(state: NodeState) -> &'static str {
    match state {
        NodeState::Discovered => "discovered",
        NodeState::Pending => "pending",
        NodeState::Installing => "installing",
        NodeState::Installed => "installed",
        NodeState::InstallFailed => "install_failed",
        NodeState::Active => "active",
        NodeState::Reprovision => "reprovision",
        NodeState::Deprovisioning => "deprovisioning",
        NodeState::Migrating => "migrating",
        NodeState::ServingSource => "serving_source",
        NodeState::CloningTarget => "cloning_target",
        NodeState::Retired => "retired",
    }
}

fn pi_boot_response(node_state: NodeState, response: BootResponse) -> PiBootResponse {
    match response {
        BootResponse::Discovered { message } => PiBootResponse {
            state: "discovered".to_string(),
            message: Some(message),
            ..Default::default()
        },
        BootResponse::DeployImage { image_url, target, callback } => PiBootResponse {
            state: "installing".to_string(),
            message: Some(format!("deploying image to {target}")),
            action: Some("deploy_image".to_string()),
            image_url: Some(image_url),
            target_device: Some(target),
            callback_url: Some(callback),
            ..Default::default()
        },
        BootResponse::NfsBoot { server, path, callback } => PiBootResponse {
            state: "installing".to_string(),
            message: Some("nfs root boot".to_string()),
            action: Some("nfs_boot".to_string()),
            nfs_server: Some(server),
            nfs_path: Some(path),
            callback_url: Some(callback),
            ..Default::default()
        },
        BootResponse::Wait => PiBootResponse {
            state: "installing".to_string(),
            message: Some("installation in progress".to_string()),
            action: Some("wait".to_string()),
            ..Default::default()
        },
        BootResponse::PendingRetry => PiBootResponse {
            state: state_label(node_state).to_string(),
            message: Some("pending but no workflow assigned".to_string()),
            action: Some("local_boot".to_string()),
            ..Default::default()
        },
        BootResponse::LocalBoot | BootResponse::InstallIpxe { .. } => PiBootResponse {
            state: state_label(node_state).to_string(),
            message: Some("boot from local storage".to_string()),
            action: Some("local_boot".to_string()),
            ..Default::default()
        },
    }
}

/// `GET /api/v1/boot/pi?serial=<8-hex>&mac=<mac>?` (spec.md §6, Pi dispatch
/// row; scenarios 4 and 5).
async fn get_boot_pi(State(app): State<AppState>, Query(query): Query<BootPiQuery>) -> Result<Json<PiBootResponse>, ControllerError> {
    let serial = query.serial.to_ascii_lowercase();
    if !validate_serial(&serial) {
        return Err(PureBootError::Validation(format!("invalid Pi serial number: {serial}; must be 8 lowercase hex characters")).into());
    }

    let mac = query
        .mac
        .as_deref()
        .map(|raw| normalize_mac(raw).ok_or_else(|| PureBootError::Validation(format!("invalid MAC address: {raw}"))))
        .transpose()?;

    let existing = app.registry.find_by_serial(&serial).await?;
    let (node, just_registered) = match existing {
        Some(mut node) => {
            node.last_seen_at = Some(Utc::now());
            if node.mac_address.is_none() {
                node.mac_address = mac.clone();
            }
            (app.registry.update(node).await?, false)
        }
        None if app.settings.registration.auto_register => {
            let mut node = Node::new_discovered(Architecture::Aarch64, BootMode::Pi, mac.clone(), Some(serial.clone()));
            node.pi_model = Some(PiModel::Pi4);
            let node = app.registry.create(node).await?;

            let server = controller_url(&app);
            if let Err(error) = app.pi_manager.create_node_directory(&serial, PiModel::Pi4, Some(&server)) {
                tracing::error!(serial = %serial, %error, "failed to create Pi TFTP directory; node still registered");
            }
            (node, true)
        }
        None => {
            return Ok(Json(PiBootResponse {
                state: "unknown".to_string(),
                message: Some("node not registered; auto-registration disabled".to_string()),
                action: Some("local_boot".to_string()),
                ..Default::default()
            }));
        }
    };

    let workflow = load_node_workflow(&app, &node).await?;
    let server = controller_url(&app);
    let ctx = DispatchContext {
        server: &server,
        workflow: workflow.as_ref(),
    };
    let response = resolve_pi(&node, &ctx, just_registered);
    Ok(Json(pi_boot_response(node.state, response)))
}

fn resolve_under_root(root: &Path, requested: &str) -> Result<PathBuf, PureBootError> {
    let root = root
        .canonicalize()
        .map_err(|_| PureBootError::NotFound(format!("files root does not exist: {}", root.display())))?;
    let candidate = root.join(requested.trim_start_matches('/'));
    let resolved = candidate
        .canonicalize()
        .map_err(|_| PureBootError::NotFound(format!("file not found: {requested}")))?;
    if !resolved.starts_with(&root) {
        return Err(PureBootError::Validation(format!("path escapes files root: {requested}")));
    }
    if !resolved.is_file() {
        return Err(PureBootError::NotFound(format!("file not found: {requested}")));
    }
    Ok(resolved)
}

const FILE_CHUNK_SIZE: usize = 64 * 1024;

/// `GET /api/v1/files/<path>` (spec.md §6): streams files under the TFTP
/// root through the bandwidth throttler.
async fn get_file(State(app): State<AppState>, AxumPath(path): AxumPath<String>) -> Result<Response, ControllerError> {
    let resolved = resolve_under_root(&app.settings.tftp.root, &path)?;
    let metadata = tokio::fs::metadata(&resolved).await.map_err(PureBootError::from)?;
    let total_bytes = metadata.len();
    let file = tokio::fs::File::open(&resolved).await.map_err(PureBootError::from)?;

    let guard = TransferGuard::register(&app.throttler, path.clone(), total_bytes).await;
    let body_stream = stream::unfold((file, guard, 0u64, total_bytes), move |(mut file, guard, delivered, total)| async move {
        if delivered >= total {
            return None;
        }
        loop {
            let allowed = guard.allowed_bytes(PACING_INTERVAL).await;
            if allowed == 0 {
                tokio::time::sleep(PACING_INTERVAL).await;
                continue;
            }
            #[allow(clippy::cast_possible_truncation, reason = "allowed is capped by remaining file bytes")]
            let take = (allowed as usize).min(FILE_CHUNK_SIZE);
            let mut buf = vec![0u8; take];
            return match file.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    #[allow(clippy::cast_sign_loss, reason = "n is a small positive read count")]
                    let new_delivered = delivered + n as u64;
                    guard.record_progress(new_delivered).await;
                    tokio::time::sleep(PACING_INTERVAL).await;
                    Some((Ok::<Bytes, std::io::Error>(Bytes::from(buf)), (file, guard, new_delivered, total)))
                }
                Err(error) => Some((Err(error), (file, guard, delivered, total))),
            };
        }
    });

    let body = axum::body::Body::from_stream(body_stream);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, total_bytes.to_string()),
        ],
        body,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct ReportRequest {
    mac_address: String,
    ip_address: Option<String>,
    hostname: Option<String>,
    installation_status: Option<String>,
    installation_error: Option<String>,
}

/// `POST /api/v1/report`: node self-report, including install-lifecycle
/// status (spec.md §8 scenario 3).
async fn report_status(State(app): State<AppState>, Json(report): Json<ReportRequest>) -> Result<Json<Node>, ControllerError> {
    let mac = normalize_mac(&report.mac_address)
        .ok_or_else(|| PureBootError::Validation(format!("invalid MAC address: {}", report.mac_address)))?;

    let mut node = app
        .registry
        .find_by_mac(&mac)
        .await?
        .ok_or_else(|| PureBootError::NotFound(format!("node with MAC {mac} not found")))?;

    node.last_seen_at = Some(Utc::now());
    if let Some(ip) = report.ip_address {
        node.ip_address = Some(ip);
    }
    if let Some(hostname) = report.hostname {
        node.hostname = Some(hostname);
    }

    match report.installation_status.as_deref() {
        Some("started") if node.state == NodeState::Pending => {
            let log = StateTransitionService::transition(&mut node, NodeState::Installing, TransitionRequest {
                triggered_by: Some(TriggeredBy::NodeReport),
                ..Default::default()
            })?;
            node.install_attempts = 0;
            app.registry.append_log(log).await?;
        }
        Some("complete") if node.state == NodeState::Installing => {
            let log = StateTransitionService::transition(&mut node, NodeState::Installed, TransitionRequest {
                triggered_by: Some(TriggeredBy::NodeReport),
                ..Default::default()
            })?;
            app.registry.append_log(log).await?;
        }
        Some("failed") if node.state == NodeState::Installing => {
            if let Some(log) = StateTransitionService::handle_install_failure(&mut node, report.installation_error) {
                app.registry.append_log(log).await?;
            }
        }
        _ => {}
    }

    Ok(Json(app.registry.update(node).await?))
}

/// `POST /api/v1/nodes/{node_id}/installed`: the callback URL every workflow
/// and Pi dispatch response embeds (spec.md §4.6).
async fn report_installed(State(app): State<AppState>, AxumPath(node_id): AxumPath<Uuid>) -> Result<Json<Node>, ControllerError> {
    let mut node = app.registry.get(node_id).await?;
    let log = StateTransitionService::transition(&mut node, NodeState::Installed, TransitionRequest {
        triggered_by: Some(TriggeredBy::NodeReport),
        ..Default::default()
    })?;
    app.registry.append_log(log).await?;
    Ok(Json(app.registry.update(node).await?))
}

#[derive(Debug, Deserialize)]
struct StateTransitionBody {
    state: NodeState,
    comment: Option<String>,
    #[serde(default)]
    force: bool,
}

/// `PATCH /api/v1/nodes/{node_id}/state`: admin override transition,
/// including the retry-cap force-reset path (spec.md §8 scenario 3).
async fn patch_node_state(
    State(app): State<AppState>,
    AxumPath(node_id): AxumPath<Uuid>,
    Json(body): Json<StateTransitionBody>,
) -> Result<Json<Node>, ControllerError> {
    let mut node = app.registry.get(node_id).await?;
    let log = StateTransitionService::transition(&mut node, body.state, TransitionRequest {
        triggered_by: Some(TriggeredBy::Admin),
        comment: body.comment,
        force: body.force,
        ..Default::default()
    })?;
    app.registry.append_log(log).await?;
    Ok(Json(app.registry.update(node).await?))
}

impl From<TransitionError> for ControllerError {
    fn from(error: TransitionError) -> Self {
        match error {
            TransitionError::InvalidTransition(inner) => PureBootError::InvalidTransition {
                from: format!("{:?}", inner.from),
                to: format!("{:?}", inner.to),
            }
            .into(),
            TransitionError::RetryLimitExceeded => PureBootError::RetryLimitExceeded(error.to_string()).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BootMenuSettings, DhcpProxySettings, PiSettings, RegistrationSettings, Settings, TftpSettings, ThrottlerSettings};
    use std::net::Ipv4Addr;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn scratch_dir(label: &str) -> PathBuf {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
        let dir = std::env::temp_dir().join(format!("pureboot-http-test-{label}-{nanos}"));
        std::fs::create_dir_all(&dir).expect("create scratch dir");
        dir
    }

    fn test_state(root: &Path, auto_register: bool) -> AppState {
        let settings = Settings {
            tftp: TftpSettings {
                root: root.join("tftp"),
                bind_addr: "0.0.0.0:69".to_string(),
            },
            dhcp: DhcpProxySettings {
                bind_addr: "0.0.0.0:4011".to_string(),
                server_ip: Ipv4Addr::new(0, 0, 0, 0),
            },
            boot_menu: BootMenuSettings {
                server_address: "127.0.0.1:8080".to_string(),
                advertised_address: "127.0.0.1:8080".to_string(),
                retry_timeout_secs: 5,
            },
            registration: RegistrationSettings { auto_register },
            pi: PiSettings {
                firmware_dir: root.join("pi/firmware"),
                deploy_dir: root.join("pi/deploy"),
                nodes_dir: root.join("pi/nodes"),
                discovery_dir: root.join("pi/discovery"),
            },
            throttler: ThrottlerSettings {
                total_bandwidth_bytes_per_sec: 100.0 * 1024.0 * 1024.0 / 8.0,
            },
            workflows_dir: root.join("workflows"),
        };
        AppState::new(settings)
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("read body");
        String::from_utf8(bytes.to_vec()).expect("utf8 body")
    }

    #[tokio::test]
    async fn get_boot_x86_unknown_mac_without_auto_register_local_boots() {
        let dir = scratch_dir("x86-unknown");
        let app = test_state(&dir, false);

        let response = get_boot_x86(State(app), Query(BootQuery { mac: "aa:bb:cc:dd:ee:ff".to_string() }))
            .await
            .expect("handler succeeds");
        let text = body_text(response).await;
        assert!(text.contains("Boot from local disk"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn get_boot_x86_rejects_malformed_mac() {
        let dir = scratch_dir("x86-bad-mac");
        let app = test_state(&dir, false);

        let err = get_boot_x86(State(app), Query(BootQuery { mac: "not-a-mac".to_string() }))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Core(PureBootError::Validation(_))));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn get_boot_x86_auto_registers_and_stays_local_boot_until_pending() {
        let dir = scratch_dir("x86-autoreg");
        let app = test_state(&dir, true);

        let response = get_boot_x86(State(app.clone()), Query(BootQuery { mac: "aa:bb:cc:dd:ee:ff".to_string() }))
            .await
            .expect("handler succeeds");
        let text = body_text(response).await;
        assert!(text.contains("Boot from local disk"), "freshly discovered node stays local-boot");

        let node = app.registry.find_by_mac("aa:bb:cc:dd:ee:ff").await.expect("lookup").expect("registered");
        assert_eq!(node.state, NodeState::Discovered);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn get_boot_x86_pending_with_workflow_returns_install_script() {
        let dir = scratch_dir("x86-install");
        let app = test_state(&dir, true);

        let node = Node::new_discovered(Architecture::X86_64, BootMode::Uefi, Some("aa:bb:cc:dd:ee:ff".to_string()), None);
        let mut node = app.registry.create(node).await.expect("create");
        node.state = NodeState::Pending;
        node.workflow_id = Some("centos-install".to_string());
        app.registry.update(node).await.expect("update");

        std::fs::create_dir_all(&dir.join("workflows")).expect("workflows dir");
        std::fs::write(
            dir.join("workflows/centos-install.json"),
            r#"{"id":"centos-install","kernel_path":"http://srv/vmlinuz","initrd_path":"http://srv/initrd.img","cmdline":"pureboot.state=installing"}"#,
        )
        .expect("write workflow");

        let response = get_boot_x86(State(app), Query(BootQuery { mac: "aa:bb:cc:dd:ee:ff".to_string() }))
            .await
            .expect("handler succeeds");
        let text = body_text(response).await;
        assert!(text.contains("kernel http://srv/vmlinuz pureboot.state=installing"));
        assert!(text.contains("initrd http://srv/initrd.img"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn get_boot_pi_rejects_malformed_serial() {
        let dir = scratch_dir("pi-bad-serial");
        let app = test_state(&dir, false);

        let err = get_boot_pi(State(app), Query(BootPiQuery { serial: "nope".to_string(), mac: None })).await.unwrap_err();
        assert!(matches!(err, ControllerError::Core(PureBootError::Validation(_))));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn get_boot_pi_unknown_serial_without_auto_register_reports_unknown() {
        let dir = scratch_dir("pi-unknown");
        let app = test_state(&dir, false);

        let Json(response) = get_boot_pi(State(app), Query(BootPiQuery { serial: "d83add36".to_string(), mac: None }))
            .await
            .expect("handler succeeds");
        assert_eq!(response.state, "unknown");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn get_boot_pi_auto_registers_as_discovered() {
        let dir = scratch_dir("pi-autoreg");
        let app = test_state(&dir, true);

        let Json(response) = get_boot_pi(State(app.clone()), Query(BootPiQuery { serial: "d83add36".to_string(), mac: None }))
            .await
            .expect("handler succeeds");
        assert_eq!(response.state, "discovered");

        let node = app.registry.find_by_serial("d83add36").await.expect("lookup").expect("registered");
        assert_eq!(node.pi_model, Some(PiModel::Pi4));
        assert!(dir.join("pi/nodes/d83add36/config.txt").is_file(), "node TFTP tree materialised");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn get_boot_pi_image_workflow_dispatches_deploy_image() {
        let dir = scratch_dir("pi-deploy");
        let app = test_state(&dir, true);

        let mut node = Node::new_discovered(Architecture::Aarch64, BootMode::Pi, None, Some("d83add36".to_string()));
        node.pi_model = Some(PiModel::Pi4);
        let mut node = app.registry.create(node).await.expect("create");
        node.state = NodeState::Pending;
        node.workflow_id = Some("pi-image".to_string());
        app.registry.update(node).await.expect("update");

        std::fs::create_dir_all(&dir.join("workflows")).expect("workflows dir");
        std::fs::write(
            dir.join("workflows/pi-image.json"),
            r#"{"id":"pi-image","install_method":"image","image_url":"http://srv/img.xz","target_device":"/dev/mmcblk0"}"#,
        )
        .expect("write workflow");

        let Json(response) = get_boot_pi(State(app), Query(BootPiQuery { serial: "d83add36".to_string(), mac: None }))
            .await
            .expect("handler succeeds");
        assert_eq!(response.state, "installing");
        assert_eq!(response.action.as_deref(), Some("deploy_image"));
        assert_eq!(response.image_url.as_deref(), Some("http://srv/img.xz"));
        assert_eq!(response.target_device.as_deref(), Some("/dev/mmcblk0"));
        assert!(response.callback_url.is_some());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn report_status_started_transitions_pending_to_installing() {
        let dir = scratch_dir("report-started");
        let app = test_state(&dir, true);

        let mut node = Node::new_discovered(Architecture::X86_64, BootMode::Uefi, Some("aa:bb:cc:dd:ee:ff".to_string()), None);
        node.state = NodeState::Pending;
        let node = app.registry.create(node).await.expect("create");
        app.registry.update(node.clone()).await.expect("update");

        let Json(updated) = report_status(State(app), Json(ReportRequest {
            mac_address: "aa:bb:cc:dd:ee:ff".to_string(),
            ip_address: Some("10.0.0.5".to_string()),
            hostname: Some("node-1".to_string()),
            installation_status: Some("started".to_string()),
            installation_error: None,
        }))
        .await
        .expect("handler succeeds");

        assert_eq!(updated.state, NodeState::Installing);
        assert_eq!(updated.ip_address.as_deref(), Some("10.0.0.5"));
        assert_eq!(updated.install_attempts, 0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn report_status_failed_three_times_parks_node_in_install_failed() {
        let dir = scratch_dir("report-retry-cap");
        let app = test_state(&dir, true);

        let mut node = Node::new_discovered(Architecture::X86_64, BootMode::Uefi, Some("aa:bb:cc:dd:ee:ff".to_string()), None);
        node.state = NodeState::Installing;
        let node = app.registry.create(node).await.expect("create");
        app.registry.update(node).await.expect("update");

        for _ in 0..3 {
            let Json(updated) = report_status(State(app.clone()), Json(ReportRequest {
                mac_address: "aa:bb:cc:dd:ee:ff".to_string(),
                ip_address: None,
                hostname: None,
                installation_status: Some("failed".to_string()),
                installation_error: Some("disk write error".to_string()),
            }))
            .await
            .expect("handler succeeds");
            // After the third failed report the node parks in install_failed.
            if updated.install_attempts >= 3 {
                assert_eq!(updated.state, NodeState::InstallFailed);
            }
        }

        let node = app.registry.find_by_mac("aa:bb:cc:dd:ee:ff").await.expect("lookup").expect("present");
        assert_eq!(node.state, NodeState::InstallFailed);
        assert_eq!(node.install_attempts, 3);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn patch_node_state_forces_reset_past_retry_cap() {
        let dir = scratch_dir("patch-force");
        let app = test_state(&dir, true);

        let mut node = Node::new_discovered(Architecture::X86_64, BootMode::Uefi, Some("aa:bb:cc:dd:ee:ff".to_string()), None);
        node.state = NodeState::InstallFailed;
        node.install_attempts = 3;
        let node = app.registry.create(node).await.expect("create");
        let node_id = node.id;
        app.registry.update(node).await.expect("update");

        let err = patch_node_state(
            State(app.clone()),
            AxumPath(node_id),
            Json(StateTransitionBody { state: NodeState::Pending, comment: None, force: false }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ControllerError::Core(PureBootError::RetryLimitExceeded(_))));

        let Json(updated) = patch_node_state(
            State(app),
            AxumPath(node_id),
            Json(StateTransitionBody { state: NodeState::Pending, comment: Some("operator reset".to_string()), force: true }),
        )
        .await
        .expect("forced transition succeeds");
        assert_eq!(updated.state, NodeState::Pending);
        assert_eq!(updated.install_attempts, 0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn get_file_streams_content_through_the_throttler() {
        let dir = scratch_dir("files");
        let app = test_state(&dir, false);
        std::fs::create_dir_all(&dir.join("tftp")).expect("tftp root");
        std::fs::write(dir.join("tftp/undionly.kpxe"), b"fake-ipxe-binary-contents").expect("write file");

        let response = get_file(State(app), AxumPath("undionly.kpxe".to_string())).await.expect("handler succeeds");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("read body");
        assert_eq!(&bytes[..], b"fake-ipxe-binary-contents");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn get_file_rejects_path_traversal() {
        let dir = scratch_dir("files-traversal");
        let app = test_state(&dir, false);
        std::fs::create_dir_all(&dir.join("tftp")).expect("tftp root");
        std::fs::write(dir.join("secret.txt"), b"outside root").expect("write sibling file");

        let err = get_file(State(app), AxumPath("../secret.txt".to_string())).await.unwrap_err();
        assert!(matches!(err, ControllerError::Core(PureBootError::Validation(_) | PureBootError::NotFound(_))));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn get_file_missing_file_is_not_found() {
        let dir = scratch_dir("files-missing");
        let app = test_state(&dir, false);
        std::fs::create_dir_all(&dir.join("tftp")).expect("tftp root");

        let err = get_file(State(app), AxumPath("nope.bin".to_string())).await.unwrap_err();
        assert!(matches!(err, ControllerError::Core(PureBootError::NotFound(_))));

        std::fs::remove_dir_all(&dir).ok();
    }
}
