use super::*;
use crate::callbacks::testing::RecordingCallback;
use crate::clients::mock::MockExec;
use crate::devices::testdata::{
    tagged, DEVICE_INFO_OUTPUT, DPLL_FS_OUTPUT, NETLINK_DEVICES, NETLINK_OFFSET_PIN, NETLINK_PINS,
    PMC_OUTPUT, UBX_OUTPUT,
};
use crate::error::{CollectorError, Result};
use crate::loglines::Line;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream;
use std::time::Duration;
use tempfile::TempDir;

const INTERVAL: Duration = Duration::from_secs(1);

fn recording() -> (RecordingCallback, Arc<dyn Callback>) {
    let callback = RecordingCallback::default();
    (callback.clone(), Arc::new(callback))
}

fn ethtool_calls(ctx: &MockExec) -> usize {
    ctx.calls().iter().filter(|c| c.contains("ethtool -i")).count()
}

#[tokio::test]
async fn test_devinfo_reuses_record_until_a_poll_fails() {
    let (recorded, callback) = recording();
    let ctx = Arc::new(MockExec::new().respond("ethtool -i ens7f0", DEVICE_INFO_OUTPUT));
    let (tx, rx) = mpsc::channel(10);
    let collector =
        DevInfoCollector::with_context(ctx.clone(), callback, "ens7f0", INTERVAL, Some(rx))
            .await
            .unwrap();
    assert!(collector.is_announcer());
    collector.start().await.unwrap();

    assert!(collector.poll().await.is_ok());
    assert!(collector.poll().await.is_ok());
    assert_eq!(ethtool_calls(&ctx), 1);

    let failed = PollResult::new(GNSS_COLLECTOR_NAME).with_error(CollectorError::Remote("boom".into()));
    tx.send(failed).await.unwrap();
    // a second failure before the refetch must not queue another one
    tx.send(PollResult::new(PMC_COLLECTOR_NAME)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(collector.poll().await.is_ok());
    assert!(collector.poll().await.is_ok());
    assert_eq!(ethtool_calls(&ctx), 2);

    collector.cleanup().await.unwrap();
    assert!(!collector.base().is_running());
    assert_eq!(recorded.ids(), vec!["devInfo"; 4]);
    assert_eq!(recorded.datatypes()[0], DEVICE_INFO_DATATYPE);
}

#[tokio::test]
async fn test_devinfo_rejects_other_nics_after_one_emission() {
    let (recorded, callback) = recording();
    let output = DEVICE_INFO_OUTPUT.replace("0x1593", "0x159b");
    let ctx = Arc::new(MockExec::new().respond("ethtool", &output));
    let err = DevInfoCollector::with_context(ctx, callback, "ens7f0", INTERVAL, None)
        .await
        .err()
        .unwrap();
    assert!(err.is_invalid_env());
    assert!(err.to_string().contains("NIC device is not based on E810"));
    assert_eq!(recorded.ids(), vec!["devInfo"]);
}

#[tokio::test]
async fn test_dpll_fs_poll() {
    let (recorded, callback) = recording();
    let ctx = Arc::new(MockExec::new().respond("dpll_0_state", DPLL_FS_OUTPUT));
    let collector = DpllFsCollector::with_context(ctx, callback, "ens7f0", INTERVAL).unwrap();
    assert!(!collector.is_announcer());
    assert!(collector.poll().await.is_ok());
    assert_eq!(recorded.ids(), vec!["dpll/time-error"]);
    assert_eq!(recorded.data()[0]["terror"], -0.25);
}

#[tokio::test]
async fn test_dpll_fs_poll_error_is_reported() {
    let (recorded, callback) = recording();
    let ctx = Arc::new(MockExec::new().fail("dpll_0_state", "pod is gone"));
    let collector = DpllFsCollector::with_context(ctx, callback, "ens7f0", INTERVAL).unwrap();
    let result = collector.poll().await;
    assert_eq!(result.collector_name, DPLL_FS_COLLECTOR_NAME);
    assert_eq!(result.errors.len(), 1);
    assert!(recorded.ids().is_empty());
}

#[tokio::test]
async fn test_dpll_netlink_requires_start() {
    let parameters = format!(
        "{}{}{}",
        tagged("date", "1686916187.0584"),
        tagged("dpll-netlink-clock-serial-number", "507c6fffff0fb1b8"),
        tagged("dpll-netlink-pins", NETLINK_PINS)
    );
    let sample = format!(
        "{}{}{}",
        tagged("date", "1686916187.0584"),
        tagged("dpll-netlink-device", NETLINK_DEVICES),
        tagged("dpll-netlink-offset", NETLINK_OFFSET_PIN)
    );
    let ctx = Arc::new(
        MockExec::new()
            .respond("lspci -v", &parameters)
            .respond("device-get", &sample),
    );
    let (recorded, callback) = recording();
    let collector = DpllNetlinkCollector::with_context(ctx, callback, "ens7f0", INTERVAL);

    let early = collector.poll().await;
    assert!(early.errors[0].is_requirements_not_met());

    collector.start().await.unwrap();
    assert!(collector.poll().await.is_ok());
    assert_eq!(recorded.ids(), vec!["dpll/states", "dpll/time-error"]);
    assert_eq!(recorded.datatypes()[0], DPLL_NETLINK_DATATYPE);
    collector.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_gnss_partial_sections_still_emitted() {
    let output = UBX_OUTPUT.replace("UBX-NAV-CLOCK", "UBX-NAV-CLK");
    let ctx = Arc::new(MockExec::new().respond("ubxtool", &output));
    let (recorded, callback) = recording();
    let collector = GnssCollector::with_context(ctx, callback, INTERVAL);

    let result = collector.poll().await;
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].to_string().contains("Nav Clock"));
    assert_eq!(recorded.ids(), vec!["gnss/time-error", "gnss/rf-mon", "gnss/rf-mon"]);
    assert_eq!(recorded.datatypes()[0], GNSS_DATATYPE);
}

#[tokio::test]
async fn test_pmc_poll() {
    let ctx = Arc::new(MockExec::new().respond("GRANDMASTER_SETTINGS_NP", PMC_OUTPUT));
    let (recorded, callback) = recording();
    let collector = PmcCollector::with_context(ctx, callback, INTERVAL).unwrap();
    assert!(collector.poll().await.is_ok());
    assert_eq!(recorded.ids(), vec!["phc/gm-settings"]);
    assert_eq!(recorded.data()[0]["clock_class"], 248);
}

#[test]
fn test_poll_interval_scaling_through_collector() {
    let (_, callback) = recording();
    let collector = GnssCollector::with_context(Arc::new(MockExec::new()), callback, INTERVAL);
    collector.scale_poll_interval(3.0);
    assert_eq!(collector.poll_interval(), Duration::from_secs(3));
    collector.reset_poll_interval();
    assert_eq!(collector.poll_interval(), INTERVAL);
}

/// Replays the same lines in every window, as an overlapping log would
struct RepeatingSource {
    lines: Vec<String>,
}

#[async_trait]
impl LogSource for RepeatingSource {
    async fn window(&self, _since: i64, until: DateTime<Utc>, generation: u32) -> Result<Vec<Line>> {
        let lines = stream::iter(self.lines.clone().into_iter().map(Ok));
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        collect_window(lines, until, deadline, generation).await
    }

    async fn describe(&self) -> String {
        "repeating".to_string()
    }
}

#[tokio::test]
async fn test_logs_written_once_across_overlapping_windows() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("ptp.log");
    let lines: Vec<String> = (0..5)
        .map(|i| format!("2023-06-16T11:49:4{}.000000000Z ptp4l[{}]: offset {}", i, i, i * 10))
        .collect();
    let (_, callback) = recording();
    let collector = LogsCollector::with_source(
        Arc::new(RepeatingSource { lines }),
        callback,
        output.clone(),
        false,
        dir.path().to_path_buf(),
        false,
    )
    .with_window(Duration::from_millis(20));

    collector.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(collector.poll().await.is_ok());
    collector.cleanup().await.unwrap();

    let written = std::fs::read_to_string(&output).unwrap();
    let mut written: Vec<&str> = written.lines().collect();
    written.sort_unstable();
    let expected: Vec<String> = (0..5).map(|i| format!("ptp4l[{}]: offset {}", i, i * 10)).collect();
    assert_eq!(written, expected);

    let leftovers = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("generation-"))
        .count();
    assert_eq!(leftovers, 0);
}
