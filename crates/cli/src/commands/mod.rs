//! Subcommand implementations

pub mod collect;
pub mod debug_pod;
pub mod detect;
pub mod logs;
pub mod verify;

use anyhow::{Context, Result};
use collector_lib::Clientset;
use std::sync::Arc;

use crate::config::CollectorSettings;

/// Connect with the configured kubeconfig
pub async fn connect(settings: &CollectorSettings) -> Result<Arc<Clientset>> {
    let kubeconfig = settings.require_kubeconfig()?;
    Clientset::from_kubeconfigs(&[&kubeconfig])
        .await
        .with_context(|| format!("Failed to connect with kubeconfig {}", kubeconfig.display()))
}
