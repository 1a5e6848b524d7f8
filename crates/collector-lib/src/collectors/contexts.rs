//! Where each probe runs: the PTP daemon pod, its gpsd sidecar and the
//! privileged netlink debug pod.

use crate::clients::{
    Clientset, ContainerExecContext, DebugPodContext, DebugPodSpec, HostPathMount, PodSelector,
};
use crate::error::Result;
use std::sync::Arc;
use tracing::debug;

pub const PTP_NAMESPACE: &str = "openshift-ptp";
pub const PTP_POD_NAME_PREFIX: &str = "linuxptp-daemon-";
pub const PTP_CONTAINER: &str = "linuxptp-daemon-container";
pub const GPS_CONTAINER: &str = "gpsd";
pub const NETLINK_DEBUG_POD: &str = "ptp-dpll-netlink-debug-pod";
pub const NETLINK_DEBUG_CONTAINER: &str = "ptp-dpll-netlink-debug-container";
pub const NETLINK_DEBUG_CONTAINER_IMAGE: &str = "quay.io/redhat-partner-solutions/dpll-debug:0.1";

fn daemon_selector(node_name: Option<&str>) -> PodSelector {
    PodSelector {
        namespace: PTP_NAMESPACE.to_string(),
        prefix: PTP_POD_NAME_PREFIX.to_string(),
        node_name: node_name.map(str::to_string),
    }
}

/// Exec context for the PTP daemon container
pub async fn ptp_daemon_context(
    clientset: Arc<Clientset>,
    node_name: Option<&str>,
) -> Result<ContainerExecContext> {
    ContainerExecContext::new(clientset, daemon_selector(node_name), PTP_CONTAINER).await
}

/// Exec context for the GNSS tooling.
///
/// Uses the `gpsd` sidecar when the daemon pod has one, otherwise the
/// daemon container itself.
pub async fn gnss_context(
    clientset: Arc<Clientset>,
    node_name: Option<&str>,
) -> Result<ContainerExecContext> {
    let daemon = ptp_daemon_context(clientset, node_name).await?;
    if daemon.has_container(GPS_CONTAINER).await {
        return Ok(daemon.with_container(GPS_CONTAINER).await);
    }
    debug!(pod = %daemon.pod_name().await, "No gpsd container, using the daemon container");
    Ok(daemon)
}

/// The privileged, host-network pod netlink queries run in
pub fn netlink_debug_pod_spec(node_name: Option<String>) -> DebugPodSpec {
    DebugPodSpec {
        namespace: PTP_NAMESPACE.to_string(),
        pod_name: NETLINK_DEBUG_POD.to_string(),
        container_name: NETLINK_DEBUG_CONTAINER.to_string(),
        image: NETLINK_DEBUG_CONTAINER_IMAGE.to_string(),
        labels: Default::default(),
        command: vec!["sleep".to_string(), "inf".to_string()],
        // NET_ADMIN to reach netlink, SYS_ADMIN for lspci to show the serial number
        add_capabilities: vec!["SYS_ADMIN".to_string(), "NET_ADMIN".to_string()],
        host_network: true,
        volumes: vec![HostPathMount {
            name: "modules".to_string(),
            host_path: "/lib/modules".to_string(),
            mount_path: "/lib/modules".to_string(),
        }],
        node_name,
    }
}

/// Debug pod context pinned to `node_name`, or to the daemon pod's node
pub async fn netlink_context(
    clientset: Arc<Clientset>,
    node_name: Option<&str>,
) -> Result<DebugPodContext> {
    let node = match node_name {
        Some(node) => Some(node.to_string()),
        None => ptp_daemon_context(clientset.clone(), None).await?.node_name().await,
    };
    Ok(DebugPodContext::new(clientset, netlink_debug_pod_spec(node)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_netlink_spec_is_pinned() {
        let spec = netlink_debug_pod_spec(Some("worker-1".into()));
        assert_eq!(spec.node_name.as_deref(), Some("worker-1"));
        assert!(spec.host_network);
        assert_eq!(spec.command, vec!["sleep", "inf"]);
        assert_eq!(spec.add_capabilities, vec!["SYS_ADMIN", "NET_ADMIN"]);
        assert_eq!(spec.volumes[0].mount_path, "/lib/modules");
    }
}
