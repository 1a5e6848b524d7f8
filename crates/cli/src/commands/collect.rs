//! `collect`: run the selected collectors for the configured duration

use anyhow::{Context, Result};
use collector_lib::collectors::{collectors_to_run, CollectionConstructor, CollectorKind};
use collector_lib::error::{CollectorError, ExitCode};
use collector_lib::runner::{cancel_on_signal, CollectorRunner, RunnerConfig};
use collector_lib::utils::parse_duration;
use collector_lib::{Callback, FileCallback, OutputFormat};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::connect;
use crate::config::CollectorSettings;

/// Everything `collect` needs, validated before touching the cluster
#[derive(Debug)]
pub struct CollectPlan {
    pub interface: String,
    pub duration: Duration,
    pub poll_interval: Duration,
    pub announce_interval: Duration,
    pub kinds: Vec<CollectorKind>,
    pub logs_output: Option<PathBuf>,
}

impl CollectPlan {
    pub fn from_settings(settings: &CollectorSettings) -> Result<Self> {
        let interface = settings.require_interface()?.to_string();
        let duration = parse_duration(&settings.duration)
            .map_err(|e| CollectorError::MissingInput(format!("invalid duration: {}", e)))?;
        if duration.is_zero() {
            return Err(CollectorError::MissingInput(
                "duration must be a positive time value".to_string(),
            )
            .into());
        }
        if settings.rate == 0 || settings.announce == 0 {
            return Err(CollectorError::MissingInput(
                "rate and announce must be at least one second".to_string(),
            )
            .into());
        }

        let kinds = collectors_to_run(&settings.collectors);
        let logs_output = settings
            .logs_output
            .as_deref()
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);
        if kinds.contains(&CollectorKind::Logs) && logs_output.is_none() {
            return Err(CollectorError::MissingInput(
                "the Logs collector requires --logs-output".to_string(),
            )
            .into());
        }

        Ok(Self {
            interface,
            duration,
            poll_interval: Duration::from_secs(settings.rate),
            announce_interval: Duration::from_secs(settings.announce),
            kinds,
            logs_output,
        })
    }
}

pub async fn run(settings: &CollectorSettings) -> Result<ExitCode> {
    let plan = CollectPlan::from_settings(settings)?;
    let clientset = connect(settings).await?;

    let format = if settings.use_analyser_format {
        OutputFormat::AnalyserJson
    } else {
        OutputFormat::Raw
    };
    let callback: Arc<dyn Callback> = Arc::new(FileCallback::setup(&settings.output, format)?);

    let mut constructor = CollectionConstructor {
        callback: callback.clone(),
        clientset,
        errored_polls: None,
        ptp_interface: plan.interface.clone(),
        node_name: settings.node_name().map(str::to_string),
        poll_interval: plan.poll_interval,
        dev_info_announce_interval: plan.announce_interval,
        logs_output_file: plan.logs_output.clone(),
        include_log_timestamps: settings.log_timestamps,
        temp_dir: PathBuf::from(&settings.tempdir),
        keep_debug_files: settings.keep,
    };

    let mut runner = CollectorRunner::new(RunnerConfig::new(plan.duration)?, callback);
    runner
        .initialise(&plan.kinds, &mut constructor)
        .await
        .context("Failed to build collectors")?;
    if runner.collector_names().is_empty() {
        warn!("No collectors could be built");
    }
    info!(
        collectors = ?runner.collector_names(),
        duration_secs = plan.duration.as_secs(),
        "Collecting"
    );

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());
    runner.run(shutdown).await?;
    Ok(ExitCode::Success)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> CollectorSettings {
        CollectorSettings {
            interface: Some("ens7f0".into()),
            ..CollectorSettings::default()
        }
    }

    fn missing_input(err: anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<CollectorError>(),
            Some(CollectorError::MissingInput(_))
        )
    }

    #[test]
    fn test_default_plan() {
        let plan = CollectPlan::from_settings(&settings()).unwrap();
        assert_eq!(plan.duration, Duration::from_secs(1000));
        assert_eq!(plan.poll_interval, Duration::from_secs(1));
        assert_eq!(plan.announce_interval, Duration::from_secs(60));
        assert!(!plan.kinds.contains(&CollectorKind::Logs));
    }

    #[test]
    fn test_zero_duration_rejected() {
        let settings = CollectorSettings {
            duration: "0s".into(),
            ..settings()
        };
        assert!(missing_input(CollectPlan::from_settings(&settings).unwrap_err()));
    }

    #[test]
    fn test_logs_requires_output() {
        let mut settings = CollectorSettings {
            collectors: vec!["logs".into()],
            ..settings()
        };
        assert!(missing_input(CollectPlan::from_settings(&settings).unwrap_err()));

        settings.logs_output = Some("ptp.log".into());
        let plan = CollectPlan::from_settings(&settings).unwrap();
        assert_eq!(
            plan.kinds,
            vec![CollectorKind::DevInfo, CollectorKind::Logs]
        );
    }

    #[test]
    fn test_interface_required() {
        let settings = CollectorSettings::default();
        assert!(missing_input(CollectPlan::from_settings(&settings).unwrap_err()));
    }
}
