//! Short-lived privileged pod used for probes the daemon container cannot run

use super::exec_context::{exec_in_pod, ExecFailure};
use super::{Clientset, ExecContext, ExecOutput};
use crate::error::{CollectorError, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Capabilities, Container, HostPathVolumeSource, Pod, PodSpec, SecurityContext, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, ListParams, PostParams};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How long to wait for the pod to reach `Running`
pub const START_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// How long to wait for the pod to disappear after deletion
pub const DELETION_TIMEOUT: Duration = Duration::from_secs(10 * 60);

const PHASE_POLL_INTERVAL: Duration = Duration::from_secs(1);
const RUNNING_PHASE: &str = "Running";

/// Host directory bind-mounted into the debug container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPathMount {
    pub name: String,
    pub host_path: String,
    pub mount_path: String,
}

/// Everything needed to create the debug pod
#[derive(Debug, Clone, Default)]
pub struct DebugPodSpec {
    pub namespace: String,
    pub pod_name: String,
    pub container_name: String,
    pub image: String,
    pub labels: BTreeMap<String, String>,
    pub command: Vec<String>,
    pub add_capabilities: Vec<String>,
    pub host_network: bool,
    pub volumes: Vec<HostPathMount>,
    pub node_name: Option<String>,
}

impl DebugPodSpec {
    /// Render the pod object posted to the API server
    pub fn to_pod(&self) -> Pod {
        let security_context = (!self.add_capabilities.is_empty()).then(|| SecurityContext {
            capabilities: Some(Capabilities {
                add: Some(self.add_capabilities.clone()),
                ..Default::default()
            }),
            ..Default::default()
        });

        let volume_mounts: Vec<VolumeMount> = self
            .volumes
            .iter()
            .map(|v| VolumeMount {
                name: v.name.clone(),
                mount_path: v.mount_path.clone(),
                ..Default::default()
            })
            .collect();

        let volumes: Vec<Volume> = self
            .volumes
            .iter()
            .map(|v| Volume {
                name: v.name.clone(),
                host_path: Some(HostPathVolumeSource {
                    path: v.host_path.clone(),
                    type_: Some("Directory".to_string()),
                }),
                ..Default::default()
            })
            .collect();

        let container = Container {
            name: self.container_name.clone(),
            image: Some(self.image.clone()),
            image_pull_policy: Some("IfNotPresent".to_string()),
            command: (!self.command.is_empty()).then(|| self.command.clone()),
            security_context,
            volume_mounts: (!volume_mounts.is_empty()).then_some(volume_mounts),
            ..Default::default()
        };

        Pod {
            metadata: ObjectMeta {
                name: Some(self.pod_name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: (!self.labels.is_empty()).then(|| self.labels.clone()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![container],
                host_network: Some(self.host_network),
                node_name: self.node_name.clone(),
                volumes: (!volumes.is_empty()).then_some(volumes),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Exec context that owns the lifecycle of its target pod
#[derive(Debug)]
pub struct DebugPodContext {
    clientset: Arc<Clientset>,
    spec: DebugPodSpec,
}

impl DebugPodContext {
    pub fn new(clientset: Arc<Clientset>, spec: DebugPodSpec) -> Self {
        Self { clientset, spec }
    }

    pub fn spec(&self) -> &DebugPodSpec {
        &self.spec
    }

    async fn find_pod(&self) -> Result<Option<Pod>> {
        let params = ListParams::default().fields(&format!("metadata.name={}", self.spec.pod_name));
        let pods = self
            .clientset
            .pods(&self.spec.namespace)
            .list(&params)
            .await?;
        Ok(pods.items.into_iter().next())
    }

    async fn is_running(&self) -> Result<bool> {
        let pod = self.find_pod().await?;
        Ok(pod
            .and_then(|p| p.status)
            .and_then(|s| s.phase)
            .map(|phase| phase == RUNNING_PHASE)
            .unwrap_or(false))
    }

    /// Create the pod unless it already runs, then wait for `Running`
    pub async fn create_and_wait(&self) -> Result<()> {
        if self.is_running().await? {
            debug!(pod = %self.spec.pod_name, "Debug pod already running");
            return Ok(());
        }

        if self.find_pod().await?.is_none() {
            info!(
                namespace = %self.spec.namespace,
                pod = %self.spec.pod_name,
                node = ?self.spec.node_name,
                "Creating debug pod"
            );
            self.clientset
                .pods(&self.spec.namespace)
                .create(&PostParams::default(), &self.spec.to_pod())
                .await?;
        }

        let deadline = Instant::now() + START_TIMEOUT;
        while Instant::now() <= deadline {
            if self.is_running().await? {
                info!(pod = %self.spec.pod_name, "Debug pod running");
                return Ok(());
            }
            tokio::time::sleep(PHASE_POLL_INTERVAL).await;
        }
        Err(CollectorError::Timeout(format!(
            "pod {} to start",
            self.spec.pod_name
        )))
    }

    /// Delete the pod with foreground propagation and wait until it is gone
    pub async fn delete_and_wait(&self) -> Result<()> {
        info!(pod = %self.spec.pod_name, "Deleting debug pod");
        let deleted = self
            .clientset
            .pods(&self.spec.namespace)
            .delete(&self.spec.pod_name, &DeleteParams::foreground())
            .await;
        if let Err(e) = deleted {
            if super::exec_context::is_not_found(&e) {
                debug!(pod = %self.spec.pod_name, "Debug pod already gone");
                return Ok(());
            }
            return Err(e.into());
        }

        let deadline = Instant::now() + DELETION_TIMEOUT;
        while Instant::now() <= deadline {
            if self.find_pod().await?.is_none() {
                info!(pod = %self.spec.pod_name, "Debug pod deleted");
                return Ok(());
            }
            tokio::time::sleep(PHASE_POLL_INTERVAL).await;
        }
        Err(CollectorError::Timeout(format!(
            "pod {} to terminate",
            self.spec.pod_name
        )))
    }
}

#[async_trait]
impl ExecContext for DebugPodContext {
    async fn exec(&self, argv: &[&str], stdin: Option<&str>) -> Result<ExecOutput> {
        match exec_in_pod(
            &self.clientset,
            &self.spec.namespace,
            &self.spec.pod_name,
            &self.spec.container_name,
            argv,
            stdin,
        )
        .await
        {
            Ok(output) => Ok(output),
            Err(ExecFailure::NotFound) => {
                warn!(pod = %self.spec.pod_name, "Debug pod not found");
                Err(CollectorError::PodNotFound {
                    namespace: self.spec.namespace.clone(),
                    pod: self.spec.pod_name.clone(),
                })
            }
            Err(ExecFailure::Remote(message)) => Err(CollectorError::Remote(message)),
        }
    }

    /// The debug pod has a fixed name, so refreshing only checks it still exists
    async fn refresh(&self) -> Result<()> {
        match self.find_pod().await? {
            Some(_) => Ok(()),
            None => Err(CollectorError::PodNotFound {
                namespace: self.spec.namespace.clone(),
                pod: self.spec.pod_name.clone(),
            }),
        }
    }

    async fn describe(&self) -> String {
        format!(
            "{}/{}/{}",
            self.spec.namespace, self.spec.pod_name, self.spec.container_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn netlink_spec() -> DebugPodSpec {
        DebugPodSpec {
            namespace: "openshift-ptp".into(),
            pod_name: "ptp-dpll-netlink-debug-pod".into(),
            container_name: "ptp-dpll-netlink-debug-container".into(),
            image: "quay.io/redhat-partner-solutions/dpll-debug:0.1".into(),
            command: vec!["sleep".into(), "inf".into()],
            add_capabilities: vec!["SYS_ADMIN".into(), "NET_ADMIN".into()],
            host_network: true,
            volumes: vec![HostPathMount {
                name: "modules".into(),
                host_path: "/lib/modules".into(),
                mount_path: "/lib/modules".into(),
            }],
            node_name: Some("worker-0".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_pod_rendering() {
        let pod = netlink_spec().to_pod();
        let spec = pod.spec.unwrap();
        assert_eq!(spec.host_network, Some(true));
        assert_eq!(spec.node_name.as_deref(), Some("worker-0"));

        let container = &spec.containers[0];
        assert_eq!(container.name, "ptp-dpll-netlink-debug-container");
        assert_eq!(
            container.command.as_deref(),
            Some(&["sleep".to_string(), "inf".to_string()][..])
        );
        let caps = container
            .security_context
            .as_ref()
            .and_then(|s| s.capabilities.as_ref())
            .and_then(|c| c.add.clone())
            .unwrap();
        assert_eq!(caps, vec!["SYS_ADMIN", "NET_ADMIN"]);

        let volumes = spec.volumes.unwrap();
        assert_eq!(volumes[0].name, "modules");
        assert_eq!(
            volumes[0].host_path.as_ref().map(|h| h.path.as_str()),
            Some("/lib/modules")
        );
        assert_eq!(
            container.volume_mounts.as_ref().unwrap()[0].mount_path,
            "/lib/modules"
        );
    }

    #[test]
    fn test_pod_rendering_omits_empty_sections() {
        let spec = DebugPodSpec {
            namespace: "ns".into(),
            pod_name: "p".into(),
            container_name: "c".into(),
            image: "img".into(),
            ..Default::default()
        };
        let pod = spec.to_pod();
        assert!(pod.metadata.labels.is_none());
        let pod_spec = pod.spec.unwrap();
        assert!(pod_spec.volumes.is_none());
        assert!(pod_spec.containers[0].security_context.is_none());
        assert!(pod_spec.containers[0].command.is_none());
    }
}
