//! [`NetworkApi`] backed by the `virsh` command line tool.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{
    ApiError, NetworkApi, NetworkHandle, NetworkUpdate, Result, VIR_ERR_NO_NETWORK,
    VIR_ERR_OPERATION_INVALID,
};

pub const DEFAULT_URI: &str = "qemu:///system";

/// Runs `virsh -c <uri> ...` for every call.
pub struct VirshClient {
    binary: String,
    uri: String,
}

impl VirshClient {
    pub fn new(binary: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            uri: uri.into(),
        }
    }

    async fn run(&self, args: &[String]) -> Result<String> {
        debug!(uri = %self.uri, ?args, "Running virsh");
        let output = Command::new(&self.binary)
            .arg("-q")
            .arg("-c")
            .arg(&self.uri)
            .args(args)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_stderr(stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// virsh only prints libvirt's message, so recover the error number from it.
fn classify_stderr(stderr: &str) -> ApiError {
    let message = stderr.trim_start_matches("error:").trim().to_string();
    if stderr.contains("Network not found") || stderr.contains("no network with matching") {
        ApiError::from_code(VIR_ERR_NO_NETWORK, message)
    } else if stderr.contains("Requested operation is not valid") {
        ApiError::from_code(VIR_ERR_OPERATION_INVALID, message)
    } else {
        ApiError::Other { code: 0, message }
    }
}

/// Arguments for `virsh net-update`.
fn update_args(network: &NetworkHandle, update: &NetworkUpdate) -> Vec<String> {
    // virsh reads the argument as a file name unless it starts with '<'
    let mut args = vec![
        "net-update".to_string(),
        network.name.clone(),
        update.command.as_str().to_string(),
        update.section.as_str().to_string(),
        update.xml.trim().to_string(),
    ];
    if update.parent_index >= 0 {
        args.push("--parent-index".to_string());
        args.push(update.parent_index.to_string());
    }
    if update.scope.affects_live() {
        args.push("--live".to_string());
    }
    if update.scope.affects_config() {
        args.push("--config".to_string());
    }
    args
}

#[async_trait]
impl NetworkApi for VirshClient {
    async fn lookup_network_by_name(&self, name: &str) -> Result<NetworkHandle> {
        let uuid = self
            .run(&["net-uuid".to_string(), name.to_string()])
            .await?;
        Ok(NetworkHandle {
            name: name.to_string(),
            uuid: uuid.trim().to_string(),
        })
    }

    async fn network_xml_desc(&self, network: &NetworkHandle) -> Result<String> {
        self.run(&["net-dumpxml".to_string(), network.name.clone()])
            .await
    }

    async fn network_update(&self, network: &NetworkHandle, update: &NetworkUpdate) -> Result<()> {
        self.run(&update_args(network, update)).await?;
        Ok(())
    }
}
