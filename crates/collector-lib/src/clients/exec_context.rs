//! Exec context bound to a long-lived container found by pod-name prefix

use super::{Clientset, ExecContext, ExecOutput};
use crate::error::{CollectorError, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::AttachParams;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const DEBUG_POD_SUFFIX: &str = "-debug";

/// How to find the target pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSelector {
    pub namespace: String,
    pub prefix: String,
    pub node_name: Option<String>,
}

/// Pick the unique pod whose name starts with `prefix` and is not a debug pod
pub fn select_pod_name<'a, I>(names: I, namespace: &str, prefix: &str) -> Result<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let candidates: Vec<String> = names
        .into_iter()
        .filter(|name| name.starts_with(prefix) && !name.ends_with(DEBUG_POD_SUFFIX))
        .map(str::to_string)
        .collect();

    match candidates.len() {
        0 => Err(CollectorError::NoSuchPod {
            namespace: namespace.to_string(),
            prefix: prefix.to_string(),
        }),
        1 => Ok(candidates.into_iter().next().unwrap_or_default()),
        _ => Err(CollectorError::AmbiguousPod {
            namespace: namespace.to_string(),
            prefix: prefix.to_string(),
            candidates,
        }),
    }
}

#[derive(Debug, Clone, Default)]
struct ResolvedPod {
    name: String,
    node_name: Option<String>,
    containers: Vec<String>,
}

/// Runs commands in a named container of the pod matching a prefix
#[derive(Debug)]
pub struct ContainerExecContext {
    clientset: Arc<Clientset>,
    selector: PodSelector,
    container: String,
    resolved: RwLock<ResolvedPod>,
}

impl ContainerExecContext {
    /// Resolve the pod and build a context for `container`
    pub async fn new(
        clientset: Arc<Clientset>,
        selector: PodSelector,
        container: impl Into<String>,
    ) -> Result<Self> {
        let ctx = Self {
            clientset,
            selector,
            container: container.into(),
            resolved: RwLock::new(ResolvedPod::default()),
        };
        ctx.refresh().await?;
        Ok(ctx)
    }

    /// Same pod, different container
    pub async fn with_container(&self, container: impl Into<String>) -> Self {
        Self {
            clientset: self.clientset.clone(),
            selector: self.selector.clone(),
            container: container.into(),
            resolved: RwLock::new(self.resolved.read().await.clone()),
        }
    }

    pub async fn pod_name(&self) -> String {
        self.resolved.read().await.name.clone()
    }

    /// Node the resolved pod is scheduled on
    pub async fn node_name(&self) -> Option<String> {
        self.resolved.read().await.node_name.clone()
    }

    pub async fn has_container(&self, name: &str) -> bool {
        self.resolved
            .read()
            .await
            .containers
            .iter()
            .any(|c| c == name)
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn namespace(&self) -> &str {
        &self.selector.namespace
    }

    pub fn clientset(&self) -> &Arc<Clientset> {
        &self.clientset
    }

    async fn resolve(&self) -> Result<ResolvedPod> {
        let pods = self
            .clientset
            .list_pods(&self.selector.namespace, self.selector.node_name.as_deref())
            .await?;
        let name = select_pod_name(
            pods.iter().filter_map(|p| p.metadata.name.as_deref()),
            &self.selector.namespace,
            &self.selector.prefix,
        )?;
        let pod = pods
            .iter()
            .find(|p| p.metadata.name.as_deref() == Some(name.as_str()));
        Ok(ResolvedPod {
            node_name: pod.and_then(pod_node_name),
            containers: pod.map(container_names).unwrap_or_default(),
            name,
        })
    }
}

fn pod_node_name(pod: &Pod) -> Option<String> {
    pod.spec.as_ref().and_then(|s| s.node_name.clone())
}

fn container_names(pod: &Pod) -> Vec<String> {
    pod.spec
        .as_ref()
        .map(|s| s.containers.iter().map(|c| c.name.clone()).collect())
        .unwrap_or_default()
}

/// Whether the API server reported the target as missing
pub(crate) fn is_not_found(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(resp) => resp.code == 404,
        other => {
            let message = other.to_string().to_lowercase();
            message.contains("404") || message.contains("not found")
        }
    }
}

async fn read_to_string<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<String> {
    let mut out = String::new();
    if let Some(mut reader) = reader {
        reader.read_to_string(&mut out).await?;
    }
    Ok(out)
}

/// Exec `argv` in `pod`/`container`, feeding `stdin` when present
pub(crate) async fn exec_in_pod(
    clientset: &Clientset,
    namespace: &str,
    pod: &str,
    container: &str,
    argv: &[&str],
    stdin: Option<&str>,
) -> std::result::Result<ExecOutput, ExecFailure> {
    let params = AttachParams::default()
        .container(container)
        .stdin(stdin.is_some())
        .stdout(true)
        .stderr(true);

    let mut attached = clientset
        .pods(namespace)
        .exec(pod, argv.to_vec(), &params)
        .await
        .map_err(|e| {
            if is_not_found(&e) {
                ExecFailure::NotFound
            } else {
                ExecFailure::Remote(e.to_string())
            }
        })?;

    if let Some(script) = stdin {
        if let Some(mut writer) = attached.stdin() {
            writer
                .write_all(script.as_bytes())
                .await
                .map_err(|e| ExecFailure::Remote(format!("failed to write stdin: {}", e)))?;
            writer
                .shutdown()
                .await
                .map_err(|e| ExecFailure::Remote(format!("failed to close stdin: {}", e)))?;
        }
    }

    let status = attached.take_status();
    let (stdout, stderr) = tokio::join!(
        read_to_string(attached.stdout()),
        read_to_string(attached.stderr())
    );
    let stdout = stdout.map_err(|e| ExecFailure::Remote(format!("failed to read stdout: {}", e)))?;
    let stderr = stderr.map_err(|e| ExecFailure::Remote(format!("failed to read stderr: {}", e)))?;

    let status = match status {
        Some(fut) => fut.await,
        None => None,
    };
    attached
        .join()
        .await
        .map_err(|e| ExecFailure::Remote(e.to_string()))?;

    if let Some(status) = status {
        if status.status.as_deref() == Some("Failure") {
            return Err(ExecFailure::Remote(format!(
                "{} (stderr: {})",
                status.message.unwrap_or_else(|| "command failed".to_string()),
                stderr.trim()
            )));
        }
    }

    Ok(ExecOutput { stdout, stderr })
}

/// Reasons an exec call can fail
#[derive(Debug)]
pub(crate) enum ExecFailure {
    NotFound,
    Remote(String),
}

#[async_trait]
impl ExecContext for ContainerExecContext {
    async fn exec(&self, argv: &[&str], stdin: Option<&str>) -> Result<ExecOutput> {
        let pod = self.pod_name().await;
        debug!(pod = %pod, container = %self.container, ?argv, "Executing command");
        match exec_in_pod(
            &self.clientset,
            &self.selector.namespace,
            &pod,
            &self.container,
            argv,
            stdin,
        )
        .await
        {
            Ok(output) => Ok(output),
            Err(ExecFailure::NotFound) => {
                warn!(pod = %pod, "Pod not found, refreshing exec context");
                if let Err(e) = self.refresh().await {
                    warn!(error = %e, "Failed to refresh exec context");
                }
                Err(CollectorError::PodNotFound {
                    namespace: self.selector.namespace.clone(),
                    pod,
                })
            }
            Err(ExecFailure::Remote(message)) => Err(CollectorError::Remote(message)),
        }
    }

    async fn refresh(&self) -> Result<()> {
        let resolved = self.resolve().await?;
        let mut current = self.resolved.write().await;
        if current.name != resolved.name {
            info!(
                namespace = %self.selector.namespace,
                pod = %resolved.name,
                "Resolved target pod"
            );
        }
        *current = resolved;
        Ok(())
    }

    async fn describe(&self) -> String {
        format!(
            "{}/{}/{}",
            self.selector.namespace,
            self.pod_name().await,
            self.container
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "linuxptp-daemon-";

    #[test]
    fn test_select_single_pod() {
        let names = ["linuxptp-daemon-abcde", "ptp-operator-12345"];
        let name = select_pod_name(names, "openshift-ptp", PREFIX).unwrap();
        assert_eq!(name, "linuxptp-daemon-abcde");
    }

    #[test]
    fn test_select_ignores_debug_pods() {
        let names = ["linuxptp-daemon-abcde", "linuxptp-daemon-abcde-debug"];
        let name = select_pod_name(names, "openshift-ptp", PREFIX).unwrap();
        assert_eq!(name, "linuxptp-daemon-abcde");
    }

    #[test]
    fn test_select_no_match() {
        let names = ["ptp-operator-12345", "linuxptp-daemon-abcde-debug"];
        let err = select_pod_name(names, "openshift-ptp", PREFIX).unwrap_err();
        assert!(matches!(err, CollectorError::NoSuchPod { .. }));
    }

    #[test]
    fn test_select_ambiguous() {
        let names = ["linuxptp-daemon-abcde", "linuxptp-daemon-fghij"];
        let err = select_pod_name(names, "openshift-ptp", PREFIX).unwrap_err();
        match err {
            CollectorError::AmbiguousPod { candidates, .. } => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguity error, got {:?}", other),
        }
    }
}
