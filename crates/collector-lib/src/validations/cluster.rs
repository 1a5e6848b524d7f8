//! Checks on the cluster and the PTP operator's configuration

use super::{env_version_id, ordering, sync_env_id, Validation, VersionCheck};
use crate::clients::Clientset;
use crate::error::{CollectorError, Result};
use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

/// Trailing `-0` lets pre-release builds pass
const MIN_CLUSTER_VERSION: &str = "4.14.0-0";
const MIN_OPERATOR_VERSION: &str = "4.14.0-0";

const PTP_NAMESPACE: &str = "openshift-ptp";
const PTP_OPERATOR_DISPLAY_NAME: &str = "PTP Operator";
const GRAND_MASTER_FLAG: &str = "ts2phc.master 1";

/// `status.desired.version` of the first ClusterVersion object
pub fn cluster_version_from(objects: &[DynamicObject]) -> Result<String> {
    objects
        .iter()
        .find_map(|item| {
            item.data
                .pointer("/status/desired/version")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .ok_or_else(|| CollectorError::parse("failed to find the cluster version"))
}

/// `spec.version` of the PTP operator's ClusterServiceVersion
pub fn operator_version_from(objects: &[DynamicObject]) -> Result<String> {
    objects
        .iter()
        .filter(|item| {
            item.data.pointer("/spec/displayName").and_then(|v| v.as_str())
                == Some(PTP_OPERATOR_DISPLAY_NAME)
        })
        .find_map(|item| {
            item.data
                .pointer("/spec/version")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .ok_or_else(|| CollectorError::parse("failed to find PTP Operator CSV"))
}

pub fn cluster_version_id() -> String {
    env_version_id("/RHOCP/")
}

pub fn operator_version_id() -> String {
    env_version_id("/openshift/ptp-operator/")
}

/// Cluster must run OpenShift 4.14 or newer
pub async fn cluster_version_check(clientset: &Clientset) -> VersionCheck {
    let fetched = clientset
        .list_dynamic("config.openshift.io", "v1", "ClusterVersion", None)
        .await
        .and_then(|objects| cluster_version_from(&objects));
    version_check_from(
        fetched,
        cluster_version_id(),
        "Cluster version is valid",
        ordering::CLUSTER_VERSION,
        MIN_CLUSTER_VERSION,
    )
}

/// PTP operator must be 4.14 or newer
pub async fn operator_version_check(clientset: &Clientset) -> VersionCheck {
    let fetched = clientset
        .list_dynamic(
            "operators.coreos.com",
            "v1alpha1",
            "ClusterServiceVersion",
            Some(PTP_NAMESPACE),
        )
        .await
        .and_then(|objects| operator_version_from(&objects));
    version_check_from(
        fetched,
        operator_version_id(),
        "PTP Operator Version is valid",
        ordering::PTP_OPERATOR_VERSION,
        MIN_OPERATOR_VERSION,
    )
}

fn version_check_from(
    fetched: Result<String>,
    id: String,
    description: &'static str,
    order: u32,
    minimum: &'static str,
) -> VersionCheck {
    match fetched {
        Ok(version) => VersionCheck::new(id, description, order, version, minimum),
        Err(e) => {
            debug!(error = %e, description, "Failed to fetch version");
            VersionCheck::new(id, description, order, "", minimum).with_fetch_error(e)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PtpConfigProfile {
    #[serde(rename = "ts2phcConf", default)]
    pub ts2phc_conf: Option<String>,
}

/// Every `spec.profile[]` across the PtpConfig objects
pub fn grand_master_from(objects: &[DynamicObject]) -> Vec<PtpConfigProfile> {
    objects
        .iter()
        .filter_map(|item| item.data.pointer("/spec/profile"))
        .filter_map(|profiles| serde_json::from_value::<Vec<PtpConfigProfile>>(profiles.clone()).ok())
        .flatten()
        .collect()
}

/// Some PtpConfig profile must configure ts2phc as grand master
#[derive(Debug, Clone)]
pub struct GrandMasterProfiles {
    pub profiles: Vec<PtpConfigProfile>,
    pub fetch_error: Option<String>,
}

impl GrandMasterProfiles {
    pub fn new(fetched: Result<Vec<PtpConfigProfile>>) -> Self {
        match fetched {
            Ok(profiles) => Self {
                profiles,
                fetch_error: None,
            },
            Err(e) => Self {
                profiles: Vec::new(),
                fetch_error: Some(format!("failed to fetch ptpconfigs {}", e)),
            },
        }
    }

    pub async fn fetch(clientset: &Clientset) -> Self {
        let fetched = clientset
            .list_dynamic("ptp.openshift.io", "v1", "PtpConfig", Some(PTP_NAMESPACE))
            .await
            .map(|objects| grand_master_from(&objects));
        Self::new(fetched)
    }

    pub fn static_id() -> String {
        sync_env_id("/ptp-operator/")
    }
}

impl Validation for GrandMasterProfiles {
    fn id(&self) -> String {
        Self::static_id()
    }

    fn description(&self) -> &str {
        "Configured for grand master"
    }

    fn order(&self) -> u32 {
        ordering::CONFIGURED_FOR_GRAND_MASTER
    }

    fn data(&self) -> serde_json::Value {
        json!({ "fetchError": self.fetch_error, "profiles": self.profiles })
    }

    fn verify(&self) -> Result<()> {
        if let Some(error) = &self.fetch_error {
            return Err(CollectorError::parse(error));
        }
        let configured = self
            .profiles
            .iter()
            .filter_map(|p| p.ts2phc_conf.as_deref())
            .any(|conf| conf.contains(GRAND_MASTER_FLAG));
        if !configured {
            return Err(CollectorError::InvalidEnv(
                "no configuration for Grand Master clock".to_string(),
            ));
        }
        Ok(())
    }
}
