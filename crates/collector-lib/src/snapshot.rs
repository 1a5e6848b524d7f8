//! One-shot dump of the PTP daemon container's log

use crate::clients::{Clientset, ContainerExecContext};
use crate::collectors::contexts::ptp_daemon_context;
use crate::error::{CollectorError, Result};
use chrono::{DateTime, Local};
use futures::{pin_mut, AsyncBufReadExt, TryStreamExt};
use kube::api::LogParams;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::info;

const SNAPSHOT_TIME_FORMAT: &str = "%y%m%dT%H%M%S";

/// `<dir>/<container>-<yyMMddTHHmmss>`
pub fn snapshot_path(dir: &Path, container: &str, at: &DateTime<Local>) -> PathBuf {
    dir.join(format!("{}-{}", container, at.format(SNAPSHOT_TIME_FORMAT)))
}

fn log_params(container: &str, since: Option<Duration>) -> LogParams {
    LogParams {
        container: Some(container.to_string()),
        since_seconds: since.map(|s| s.as_secs().max(1) as i64),
        ..LogParams::default()
    }
}

/// Stream the container log into `path`, returning the number of lines written
pub async fn write_container_log(
    ctx: &ContainerExecContext,
    since: Option<Duration>,
    path: &Path,
) -> Result<usize> {
    let pod = ctx.pod_name().await;
    let reader = ctx
        .clientset()
        .pods(ctx.namespace())
        .log_stream(&pod, &log_params(ctx.container(), since))
        .await?;
    let lines = reader.lines().map_err(CollectorError::from);
    pin_mut!(lines);

    let mut out = BufWriter::new(tokio::fs::File::create(path).await?);
    let mut written = 0;
    while let Some(line) = lines.try_next().await? {
        out.write_all(line.as_bytes()).await?;
        out.write_all(b"\n").await?;
        written += 1;
    }
    out.flush().await?;
    Ok(written)
}

/// Save the daemon container's log under `output_dir`
pub async fn snapshot_logs(
    clientset: Arc<Clientset>,
    node_name: Option<&str>,
    output_dir: &Path,
    since: Option<Duration>,
) -> Result<PathBuf> {
    if !output_dir.is_dir() {
        return Err(CollectorError::MissingInput(format!(
            "output directory {} does not exist",
            output_dir.display()
        )));
    }
    let ctx = ptp_daemon_context(clientset, node_name).await?;
    let path = snapshot_path(output_dir, ctx.container(), &Local::now());
    info!(pod = %ctx.pod_name().await, file = %path.display(), "Saving container logs");
    let written = write_container_log(&ctx, since, &path).await?;
    info!(lines = written, file = %path.display(), "Saved container logs");
    Ok(path)
}
