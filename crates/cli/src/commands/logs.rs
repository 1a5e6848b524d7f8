//! `logs`: save the PTP daemon container's log

use anyhow::{Context, Result};
use collector_lib::error::{CollectorError, ExitCode};
use collector_lib::snapshot::snapshot_logs;
use collector_lib::utils::parse_duration;
use std::path::Path;

use super::connect;
use crate::config::CollectorSettings;
use crate::output::print_success;

pub async fn run(settings: &CollectorSettings, output_dir: &Path, since: Option<&str>) -> Result<ExitCode> {
    let since = since
        .filter(|s| !s.is_empty())
        .map(parse_duration)
        .transpose()
        .map_err(|e| CollectorError::MissingInput(format!("invalid --since: {}", e)))?;
    let clientset = connect(settings).await?;

    let path = snapshot_logs(clientset, settings.node_name(), output_dir, since)
        .await
        .context("Failed to save container logs")?;
    print_success(&format!("Saved logs to {}", path.display()));
    Ok(ExitCode::Success)
}
