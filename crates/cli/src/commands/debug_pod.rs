//! `start-debug` / `stop-debug`: manage the netlink debug pod by hand

use anyhow::{Context, Result};
use collector_lib::collectors::contexts::netlink_context;
use collector_lib::error::ExitCode;

use super::connect;
use crate::config::CollectorSettings;
use crate::output::{print_info, print_success};

pub async fn start(settings: &CollectorSettings) -> Result<ExitCode> {
    let clientset = connect(settings).await?;
    let pod = netlink_context(clientset, settings.node_name()).await?;
    print_info(&format!("Creating debug pod {}", pod.spec().pod_name));
    pod.create_and_wait()
        .await
        .context("Failed to start the debug pod")?;
    print_success(&format!("Debug pod {} is running", pod.spec().pod_name));
    Ok(ExitCode::Success)
}

pub async fn stop(settings: &CollectorSettings) -> Result<ExitCode> {
    let clientset = connect(settings).await?;
    let pod = netlink_context(clientset, settings.node_name()).await?;
    print_info(&format!("Deleting debug pod {}", pod.spec().pod_name));
    pod.delete_and_wait()
        .await
        .context("Failed to delete the debug pod")?;
    print_success(&format!("Debug pod {} is gone", pod.spec().pod_name));
    Ok(ExitCode::Success)
}
