//! Workflow definitions consumed from an external collaborator: loaded from
//! JSON/YAML files on disk and resolved against a node's boot context
//! (spec.md §3, "Workflow"). Grounded 1:1 on `workflow_service.py`.

use crate::PureBootError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// How a workflow installs a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallMethod {
    /// Chain directly to a kernel/initrd pair.
    Kernel,
    /// Boot an ISO via iPXE's `sanboot`.
    Sanboot,
    /// Chainload an arbitrary URL.
    Chain,
    /// Stream a disk image onto a target device.
    Image,
    /// Mount an NFS root.
    Nfs,
    /// No dispatch case in any boot handler (spec.md §9 Open Questions):
    /// falls through to local-boot on both x86 and Pi.
    Deploy,
}

/// A workflow definition, read-only from the core's perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow identifier; also its filename stem.
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Kernel path or URL, for `install_method = kernel`.
    #[serde(default)]
    pub kernel_path: String,
    /// Initramfs path or URL, for `install_method = kernel`.
    #[serde(default)]
    pub initrd_path: String,
    /// Kernel command line, may contain `${...}` placeholders.
    #[serde(default)]
    pub cmdline: String,
    /// Target architecture.
    #[serde(default = "default_architecture")]
    pub architecture: String,
    /// Target boot mode.
    #[serde(default = "default_boot_mode")]
    pub boot_mode: String,
    /// Install method.
    #[serde(default = "default_install_method")]
    pub install_method: InstallMethod,
    /// Boot URL, for `sanboot`/`chain`.
    #[serde(default)]
    pub boot_url: String,
    /// Disk image URL, for `install_method = image`.
    #[serde(default)]
    pub image_url: String,
    /// Target block device, for `install_method = image`.
    #[serde(default = "default_target_device")]
    pub target_device: String,
    /// Source device, for clone workflows.
    #[serde(default = "default_source_device")]
    pub source_device: String,
    /// NFS server, for `install_method = nfs`.
    #[serde(default)]
    pub nfs_server: String,
    /// NFS export path, for `install_method = nfs`.
    #[serde(default)]
    pub nfs_path: String,
    /// Post-install script URL.
    #[serde(default)]
    pub post_script_url: String,
    /// Free-form key/value parameters handed to the deploy environment.
    #[serde(default)]
    pub boot_params: HashMap<String, String>,
}

fn default_architecture() -> String {
    "x86_64".to_string()
}

fn default_boot_mode() -> String {
    "bios".to_string()
}

fn default_install_method() -> InstallMethod {
    InstallMethod::Kernel
}

fn default_target_device() -> String {
    "/dev/sda".to_string()
}

fn default_source_device() -> String {
    "/dev/sda".to_string()
}

/// Variables a boot dispatch resolves into a workflow's templated fields.
#[derive(Debug, Clone, Default)]
pub struct ResolveContext<'a> {
    /// PureBoot server base URL.
    pub server: &'a str,
    /// Node id.
    pub node_id: &'a str,
    /// Node MAC address.
    pub mac: &'a str,
    /// Node IP address, if known.
    pub ip: Option<&'a str>,
}

impl Workflow {
    /// Substitute `${server}`, `${node_id}`, `${mac}`, and (if known)
    /// `${ip}` across `cmdline`, `boot_url`, `image_url`, and
    /// `post_script_url`, returning a new resolved workflow.
    #[must_use]
    pub fn resolve_variables(&self, ctx: &ResolveContext<'_>) -> Self {
        let mut resolved = self.clone();
        resolved.cmdline = substitute(&self.cmdline, ctx);
        resolved.boot_url = substitute(&self.boot_url, ctx);
        resolved.image_url = substitute(&self.image_url, ctx);
        resolved.post_script_url = substitute(&self.post_script_url, ctx);
        resolved
    }
}

fn substitute(template: &str, ctx: &ResolveContext<'_>) -> String {
    let mut value = template
        .replace("${server}", ctx.server)
        .replace("${node_id}", ctx.node_id)
        .replace("${mac}", ctx.mac);
    if let Some(ip) = ctx.ip {
        value = value.replace("${ip}", ip);
    }
    value
}

/// Loads `Workflow` definitions from a directory of JSON/YAML files.
#[derive(Debug, Clone)]
pub struct WorkflowService {
    workflows_dir: PathBuf,
}

impl WorkflowService {
    /// Build a service rooted at `workflows_dir`.
    #[must_use]
    pub fn new(workflows_dir: impl Into<PathBuf>) -> Self {
        Self {
            workflows_dir: workflows_dir.into(),
        }
    }

    /// Resolve `workflow_id` to a file under `workflows_dir`, trying
    /// `.json`, `.yaml`, `.yml` in that order. Rejects any candidate path
    /// that would escape the workflows directory (defence against path
    /// traversal via `workflow_id`).
    ///
    /// # Errors
    ///
    /// Returns [`PureBootError::Validation`] if `workflow_id` resolves
    /// outside `workflows_dir`.
    fn validated_path(&self, workflow_id: &str) -> Result<Option<PathBuf>, PureBootError> {
        let root = self.workflows_dir.canonicalize().unwrap_or_else(|_| self.workflows_dir.clone());

        for ext in ["json", "yaml", "yml"] {
            let candidate = self.workflows_dir.join(format!("{workflow_id}.{ext}"));
            let resolved = candidate.canonicalize().unwrap_or_else(|_| candidate.clone());

            if !resolved.starts_with(&root) {
                return Err(PureBootError::Validation(format!("invalid workflow_id: {workflow_id}")));
            }
            if resolved.is_file() {
                return Ok(Some(resolved));
            }
        }
        Ok(None)
    }

    fn load_file(path: &Path) -> Result<Workflow, PureBootError> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => {
                serde_yaml::from_str(&content).map_err(|error| PureBootError::WorkflowFormat(error.to_string()))
            }
            _ => serde_json::from_str(&content).map_err(|error| PureBootError::WorkflowFormat(error.to_string())),
        }
    }

    /// Load a workflow by id.
    ///
    /// # Errors
    ///
    /// Returns [`PureBootError::Validation`] for a path-traversing id,
    /// [`PureBootError::NotFound`] if no matching file exists, or
    /// [`PureBootError::WorkflowFormat`] if the file fails to parse.
    pub fn get_workflow(&self, workflow_id: &str) -> Result<Workflow, PureBootError> {
        let path = self
            .validated_path(workflow_id)?
            .ok_or_else(|| PureBootError::NotFound(format!("workflow not found: {workflow_id}")))?;

        Self::load_file(&path).map_err(|error| {
            tracing::error!(workflow_id, %error, "failed to load workflow");
            error
        })
    }

    /// List every loadable workflow under `workflows_dir`. Files that fail
    /// to parse are logged and skipped rather than failing the whole scan.
    /// Duplicate ids across formats (e.g. `a.json` and `a.yaml`) keep the
    /// first one encountered.
    #[must_use]
    pub fn list_workflows(&self) -> Vec<Workflow> {
        if !self.workflows_dir.is_dir() {
            return Vec::new();
        }

        let mut workflows = Vec::new();
        let mut seen_ids = std::collections::HashSet::new();

        let Ok(entries) = std::fs::read_dir(&self.workflows_dir) else {
            return workflows;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_definition = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| matches!(ext, "json" | "yaml" | "yml"));
            if !is_definition {
                continue;
            }

            match Self::load_file(&path) {
                Ok(workflow) => {
                    if seen_ids.insert(workflow.id.clone()) {
                        workflows.push(workflow);
                    }
                }
                Err(error) => tracing::warn!(path = %path.display(), %error, "skipping invalid workflow"),
            }
        }
        workflows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn scratch_dir(label: &str) -> PathBuf {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
        let dir = std::env::temp_dir().join(format!("pureboot-workflow-test-{label}-{nanos}"));
        std::fs::create_dir_all(&dir).expect("create scratch dir");
        dir
    }

    #[test]
    fn resolve_variables_substitutes_across_all_templated_fields() {
        let workflow = Workflow {
            id: "w1".to_string(),
            name: String::new(),
            description: String::new(),
            kernel_path: String::new(),
            initrd_path: String::new(),
            cmdline: "pureboot.callback=${server}/api/v1/nodes/${node_id}/installed mac=${mac}".to_string(),
            architecture: "x86_64".to_string(),
            boot_mode: "bios".to_string(),
            install_method: InstallMethod::Image,
            boot_url: String::new(),
            image_url: "${server}/images/${node_id}.img".to_string(),
            target_device: "/dev/sda".to_string(),
            source_device: "/dev/sda".to_string(),
            nfs_server: String::new(),
            nfs_path: String::new(),
            post_script_url: "${server}/post/${mac}".to_string(),
            boot_params: HashMap::new(),
        };
        let ctx = ResolveContext {
            server: "http://srv",
            node_id: "node-1",
            mac: "aa:bb:cc:dd:ee:ff",
            ip: None,
        };
        let resolved = workflow.resolve_variables(&ctx);

        assert_eq!(resolved.cmdline, "pureboot.callback=http://srv/api/v1/nodes/node-1/installed mac=aa:bb:cc:dd:ee:ff");
        assert_eq!(resolved.image_url, "http://srv/images/node-1.img");
        assert_eq!(resolved.post_script_url, "http://srv/post/aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn get_workflow_loads_json_and_yaml() {
        let dir = scratch_dir("load");
        std::fs::write(dir.join("a.json"), r#"{"id":"a","install_method":"image"}"#).unwrap();
        std::fs::write(dir.join("b.yaml"), "id: b\ninstall_method: nfs\n").unwrap();

        let service = WorkflowService::new(&dir);
        assert_eq!(service.get_workflow("a").unwrap().install_method, InstallMethod::Image);
        assert_eq!(service.get_workflow("b").unwrap().install_method, InstallMethod::Nfs);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn get_workflow_rejects_path_traversal() {
        let dir = scratch_dir("traversal");
        let service = WorkflowService::new(&dir);
        let err = service.get_workflow("../../etc/passwd").unwrap_err();
        assert!(matches!(err, PureBootError::Validation(_)));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn get_workflow_missing_is_not_found() {
        let dir = scratch_dir("missing");
        let service = WorkflowService::new(&dir);
        let err = service.get_workflow("does-not-exist").unwrap_err();
        assert!(matches!(err, PureBootError::NotFound(_)));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn list_workflows_skips_invalid_and_dedupes_by_id() {
        let dir = scratch_dir("list");
        std::fs::write(dir.join("a.json"), r#"{"id":"shared","install_method":"kernel"}"#).unwrap();
        std::fs::write(dir.join("a.yaml"), "id: shared\ninstall_method: image\n").unwrap();
        std::fs::write(dir.join("broken.json"), "{not valid json").unwrap();

        let service = WorkflowService::new(&dir);
        let workflows = service.list_workflows();
        assert_eq!(workflows.len(), 1);
        assert_eq!(workflows[0].id, "shared");

        std::fs::remove_dir_all(&dir).ok();
    }
}
