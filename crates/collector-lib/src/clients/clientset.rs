//! Process-wide handle to the cluster API

use crate::error::{CollectorError, Result};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for REST calls to the API server
pub const REST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared cluster access, built once per run and never reconfigured
#[derive(Clone)]
pub struct Clientset {
    client: Client,
    kubeconfig: PathBuf,
}

impl std::fmt::Debug for Clientset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clientset")
            .field("kubeconfig", &self.kubeconfig)
            .finish()
    }
}

impl Clientset {
    /// Build a clientset from the first kubeconfig path that loads
    pub async fn from_kubeconfigs<P: AsRef<Path>>(paths: &[P]) -> Result<Arc<Self>> {
        if paths.is_empty() {
            return Err(CollectorError::MissingInput(
                "requires a path to a kubeconfig".to_string(),
            ));
        }

        let mut failures = Vec::new();
        for path in paths {
            let path = path.as_ref();
            match Self::load(path).await {
                Ok(client) => {
                    info!(kubeconfig = %path.display(), "Loaded cluster credentials");
                    return Ok(Arc::new(Self {
                        client,
                        kubeconfig: path.to_path_buf(),
                    }));
                }
                Err(e) => {
                    warn!(kubeconfig = %path.display(), error = %e, "Failed to load kubeconfig");
                    failures.push(format!("{}: {}", path.display(), e));
                }
            }
        }

        Err(CollectorError::MissingInput(crate::error::composite_message(
            "failed to load any kubeconfig",
            &failures,
        )))
    }

    async fn load(path: &Path) -> Result<Client> {
        let kubeconfig = Kubeconfig::read_from(path)
            .map_err(|e| CollectorError::MissingInput(format!("failed to read kubeconfig: {}", e)))?;
        let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| CollectorError::MissingInput(format!("invalid kubeconfig: {}", e)))?;
        config.connect_timeout = Some(REST_TIMEOUT);
        config.read_timeout = Some(REST_TIMEOUT);
        Ok(Client::try_from(config)?)
    }

    /// Wrap an existing client (used by tooling that already holds one)
    pub fn from_client(client: Client) -> Arc<Self> {
        Arc::new(Self {
            client,
            kubeconfig: PathBuf::new(),
        })
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn kubeconfig(&self) -> &Path {
        &self.kubeconfig
    }

    pub fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client(), namespace)
    }

    /// List pods in a namespace, optionally restricted to one node
    pub async fn list_pods(&self, namespace: &str, node_name: Option<&str>) -> Result<Vec<Pod>> {
        let mut params = ListParams::default();
        if let Some(node) = node_name {
            params = params.fields(&format!("spec.nodeName={}", node));
        }
        let pods = self.pods(namespace).list(&params).await?;
        debug!(namespace, count = pods.items.len(), "Listed pods");
        Ok(pods.items)
    }

    /// List an arbitrary custom resource, cluster wide or in `namespace`
    pub async fn list_dynamic(
        &self,
        group: &str,
        version: &str,
        kind: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let gvk = GroupVersionKind::gvk(group, version, kind);
        let resource = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> = match namespace {
            Some(ns) => Api::namespaced_with(self.client(), ns, &resource),
            None => Api::all_with(self.client(), &resource),
        };
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items)
    }
}
