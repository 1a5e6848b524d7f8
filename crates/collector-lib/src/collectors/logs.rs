//! Follows the PTP daemon container's log into a file
//!
//! The API server stops a followed stream at log rotation, so the log is
//! read as a series of overlapping windows instead. Three tasks form the
//! pipeline:
//!
//! 1. the poller opens a window every [`LOG_POLL_INTERVAL`] starting a
//!    little before the previous one ended and tags its lines with the
//!    current generation,
//! 2. the slice processor stitches windows across generations with
//!    [`Generations`] and releases lines once they are stable,
//! 3. the writer drops any `(timestamp, content)` pair it already wrote and
//!    appends the rest to the output file.
//!
//! Shutdown cascades: cancelling the poller closes the slice channel, the
//! processor flushes everything it holds and closes the line channel, and
//! the writer drains it before returning.

use super::contexts::ptp_daemon_context;
use super::{CollectionConstructor, Collector, CollectorBase, PollResult};
use crate::callbacks::Callback;
use crate::clients::{ContainerExecContext, ExecContext};
use crate::error::{CollectorError, Result};
use crate::loglines::{
    process_line, GenerationDumper, GenerationalLockedTime, Generations, Line, LineSlice,
    SeenLines,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{pin_mut, AsyncBufReadExt, Stream, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, LogParams};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const LOGS_COLLECTOR_NAME: &str = "Logs";
pub const LOGS_DATATYPE: &str = "log-line";

/// How often a new window is opened; also how far past "now" each window reads
pub const LOG_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// A window's stream request gives up after this many follow durations
pub const FOLLOW_TIMEOUT_FACTOR: u32 = 30;

pub const SLICE_CHANNEL_SIZE: usize = 100;
pub const LINE_CHANNEL_SIZE: usize = 100;

/// Where log windows come from
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Lines from the last `since_seconds`, read until one is later than
    /// `until` or the stream ends
    async fn window(&self, since_seconds: i64, until: DateTime<Utc>, generation: u32) -> Result<Vec<Line>>;

    async fn describe(&self) -> String;
}

/// Read `lines` until one is timestamped after `until`, the stream ends or
/// `deadline` passes. Unparseable lines are dropped.
pub async fn collect_window<S>(
    lines: S,
    until: DateTime<Utc>,
    deadline: Instant,
    generation: u32,
) -> Result<Vec<Line>>
where
    S: Stream<Item = Result<String>>,
{
    pin_mut!(lines);
    let mut collected = Vec::new();
    loop {
        let next = match tokio::time::timeout_at(deadline, lines.try_next()).await {
            Ok(next) => next?,
            Err(_) => {
                debug!(generation, read = collected.len(), "Log window timed out");
                break;
            }
        };
        let Some(raw) = next else {
            break;
        };
        match process_line(&raw, generation) {
            Ok(line) => {
                let past_end = line.timestamp > until;
                collected.push(Arc::new(line));
                if past_end {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "Dropping log line"),
        }
    }
    Ok(collected)
}

/// Streams the log of a container through the API server
pub struct KubeLogSource {
    ctx: ContainerExecContext,
    follow: Duration,
}

impl KubeLogSource {
    pub fn new(ctx: ContainerExecContext, follow: Duration) -> Self {
        Self { ctx, follow }
    }

    fn pods(&self) -> Api<Pod> {
        self.ctx.clientset().pods(self.ctx.namespace())
    }
}

#[async_trait]
impl LogSource for KubeLogSource {
    async fn window(&self, since_seconds: i64, until: DateTime<Utc>, generation: u32) -> Result<Vec<Line>> {
        let params = LogParams {
            container: Some(self.ctx.container().to_string()),
            follow: true,
            timestamps: true,
            since_seconds: Some(since_seconds),
            ..Default::default()
        };
        let deadline = Instant::now() + self.follow * FOLLOW_TIMEOUT_FACTOR;
        let pod = self.ctx.pod_name().await;

        let reader = match self.pods().log_stream(&pod, &params).await {
            Ok(reader) => reader,
            Err(e) => {
                debug!(pod = %pod, error = %e, "Log stream request failed, refreshing pod");
                if let Err(refresh) = self.ctx.refresh().await {
                    warn!(error = %refresh, "Failed to refresh the log source pod");
                }
                return Err(e.into());
            }
        };
        let lines = reader.lines().map_err(CollectorError::from);
        collect_window(lines, until, deadline, generation).await
    }

    async fn describe(&self) -> String {
        self.ctx.describe().await
    }
}

/// Whole seconds since `last`, rounded up and at least one
fn since_seconds(now: DateTime<Utc>, last: DateTime<Utc>) -> i64 {
    let millis = (now - last).num_milliseconds().max(0);
    ((millis + 999) / 1000).max(1)
}

async fn poll_windows(
    source: Arc<dyn LogSource>,
    last_poll: Arc<GenerationalLockedTime>,
    window: Duration,
    slices: mpsc::Sender<LineSlice>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(window);
    let follow = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::seconds(2));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let start = Utc::now();
        let generation = last_poll.generation();
        let since = since_seconds(start, last_poll.time());
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = source.window(since, start + follow, generation) => read,
        };

        match read {
            Ok(lines) if !lines.is_empty() => {
                debug!(generation, lines = lines.len(), since, "Read log window");
                if slices.send(LineSlice::new(lines, generation)).await.is_err() {
                    error!("Log slice processor has stopped");
                    break;
                }
                last_poll.update(start);
                debug!(generation = last_poll.generation(), "Log generation advanced");
            }
            Ok(_) => debug!(generation, since, "Empty log window"),
            Err(e) => warn!(error = %e, "Failed to read log window"),
        }
    }
    debug!("Log poller stopped");
}

async fn forward(lines: mpsc::Sender<Line>, slice: LineSlice) -> bool {
    for line in slice.lines {
        if lines.send(line).await.is_err() {
            error!("Log writer has stopped");
            return false;
        }
    }
    true
}

async fn process_slices(
    mut slices: mpsc::Receiver<LineSlice>,
    lines: mpsc::Sender<Line>,
    mut generations: Generations,
) {
    generations.dumper_mut().start();
    while let Some(slice) = slices.recv().await {
        generations.add(slice).await;
        if generations.should_flush() {
            let flushed = generations.flush();
            debug!(lines = flushed.len(), oldest = generations.oldest(), "Flushed log generations");
            if !forward(lines.clone(), flushed).await {
                break;
            }
        }
    }

    let remaining = generations.flush_all();
    debug!(lines = remaining.len(), "Flushed remaining log generations");
    forward(lines, remaining).await;
    generations.dumper_mut().stop().await;
}

async fn write_lines<W>(
    mut lines: mpsc::Receiver<Line>,
    writer: W,
    include_timestamps: bool,
) -> Result<usize>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(writer);
    let mut seen = SeenLines::new();
    let mut written = 0;
    while let Some(line) = lines.recv().await {
        if !seen.observe(&line) {
            continue;
        }
        let text = if include_timestamps { &line.full } else { &line.content };
        writer.write_all(text.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        written += 1;
    }
    writer.flush().await?;
    Ok(written)
}

struct Pipeline {
    poller: JoinHandle<()>,
    processor: JoinHandle<()>,
    writer: JoinHandle<Result<usize>>,
}

pub struct LogsCollector {
    base: CollectorBase,
    source: Arc<dyn LogSource>,
    output: PathBuf,
    include_timestamps: bool,
    temp_dir: PathBuf,
    keep_files: bool,
    window: Duration,
    cancel: CancellationToken,
    pipeline: Mutex<Option<Pipeline>>,
}

impl LogsCollector {
    pub async fn new(constructor: &CollectionConstructor) -> Result<Self> {
        let output = constructor.logs_output_file.clone().ok_or_else(|| {
            CollectorError::MissingInput("an output file is required for the Logs collector".to_string())
        })?;
        let ctx = ptp_daemon_context(constructor.clientset.clone(), constructor.node_name.as_deref()).await?;
        Ok(Self::with_source(
            Arc::new(KubeLogSource::new(ctx, LOG_POLL_INTERVAL)),
            constructor.callback.clone(),
            output,
            constructor.include_log_timestamps,
            constructor.temp_dir.clone(),
            constructor.keep_debug_files,
        ))
    }

    pub fn with_source(
        source: Arc<dyn LogSource>,
        callback: Arc<dyn Callback>,
        output: PathBuf,
        include_timestamps: bool,
        temp_dir: PathBuf,
        keep_files: bool,
    ) -> Self {
        Self {
            base: CollectorBase::new(callback, LOG_POLL_INTERVAL, false),
            source,
            output,
            include_timestamps,
            temp_dir,
            keep_files,
            window: LOG_POLL_INTERVAL,
            cancel: CancellationToken::new(),
            pipeline: Mutex::new(None),
        }
    }

    /// Shorten the window, for tests
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn output(&self) -> &Path {
        &self.output
    }
}

#[async_trait]
impl Collector for LogsCollector {
    fn name(&self) -> &'static str {
        LOGS_COLLECTOR_NAME
    }

    fn base(&self) -> &CollectorBase {
        &self.base
    }

    async fn start(&self) -> Result<()> {
        let mut pipeline = self.pipeline.lock().await;
        if pipeline.is_some() {
            return Ok(());
        }
        let file = tokio::fs::File::create(&self.output).await?;

        let (slice_tx, slice_rx) = mpsc::channel(SLICE_CHANNEL_SIZE);
        let (line_tx, line_rx) = mpsc::channel(LINE_CHANNEL_SIZE);
        // start one second back so the first window is never empty by construction
        let last_poll = Arc::new(GenerationalLockedTime::new(Utc::now() - chrono::Duration::seconds(1)));
        let generations = Generations::new(GenerationDumper::new(self.temp_dir.clone(), self.keep_files));

        *pipeline = Some(Pipeline {
            poller: tokio::spawn(poll_windows(
                self.source.clone(),
                last_poll,
                self.window,
                slice_tx,
                self.cancel.clone(),
            )),
            processor: tokio::spawn(process_slices(slice_rx, line_tx, generations)),
            writer: tokio::spawn(write_lines(line_rx, file, self.include_timestamps)),
        });
        self.base.set_running(true);
        let source = self.source.describe().await;
        info!(
            source = %source,
            output = %self.output.display(),
            "Started following logs"
        );
        Ok(())
    }

    /// Lines are written by the pipeline; a poll only reports liveness
    async fn poll(&self) -> PollResult {
        let result = PollResult::new(LOGS_COLLECTOR_NAME);
        match self.pipeline.lock().await.as_ref() {
            Some(pipeline) if pipeline.writer.is_finished() => result.with_error(CollectorError::Remote(
                "log writer stopped unexpectedly".to_string(),
            )),
            _ => result,
        }
    }

    async fn cleanup(&self) -> Result<()> {
        self.cancel.cancel();
        let Some(pipeline) = self.pipeline.lock().await.take() else {
            return Ok(());
        };
        for (task, handle) in [("poller", pipeline.poller), ("processor", pipeline.processor)] {
            if let Err(e) = handle.await {
                error!(task, error = %e, "Log pipeline task panicked");
            }
        }
        let written = match pipeline.writer.await {
            Ok(written) => written?,
            Err(e) => return Err(CollectorError::Remote(format!("log writer panicked: {}", e))),
        };
        info!(lines = written, output = %self.output.display(), "Stopped following logs");

        // only succeeds when the dumps were removed and nothing else lives there
        if !self.keep_files && std::fs::remove_dir(&self.temp_dir).is_ok() {
            debug!(dir = %self.temp_dir.display(), "Removed empty temp dir");
        }
        self.base.set_running(false);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use futures::stream;

    fn raw(lines: &[&str]) -> impl Stream<Item = Result<String>> {
        stream::iter(lines.iter().map(|l| Ok(l.to_string())).collect::<Vec<_>>())
    }

    #[test]
    fn test_since_seconds_rounds_up() {
        let last = Utc.with_ymd_and_hms(2023, 6, 16, 11, 49, 0).unwrap();
        assert_eq!(since_seconds(last + chrono::Duration::milliseconds(2100), last), 3);
        assert_eq!(since_seconds(last + chrono::Duration::seconds(2), last), 2);
        assert_eq!(since_seconds(last, last), 1);
    }

    #[tokio::test]
    async fn test_window_stops_past_end() {
        let until = Utc.with_ymd_and_hms(2023, 6, 16, 11, 49, 48).unwrap();
        let lines = raw(&[
            "2023-06-16T11:49:47.000000000Z ptp4l[1]: first",
            "not a timestamped line",
            "2023-06-16T11:49:48.500000000Z ptp4l[1]: past the end",
            "2023-06-16T11:49:49.000000000Z ptp4l[1]: never read",
        ]);
        let deadline = Instant::now() + Duration::from_secs(5);
        let window = collect_window(lines, until, deadline, 4).await.unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].content, "ptp4l[1]: first");
        assert!(window.iter().all(|l| l.generation == 4));
    }

    #[tokio::test]
    async fn test_window_times_out_on_quiet_stream() {
        let deadline = Instant::now() + Duration::from_millis(20);
        let window = collect_window(stream::pending::<Result<String>>(), Utc::now(), deadline, 0)
            .await
            .unwrap();
        assert!(window.is_empty());
    }

    #[tokio::test]
    async fn test_writer_drops_repeated_lines() {
        let (tx, rx) = mpsc::channel(LINE_CHANNEL_SIZE);
        let mut out = Vec::new();
        let first = Arc::new(process_line("2023-06-16T11:49:47.0Z ptp4l[1]: a", 0).unwrap());
        let second = Arc::new(process_line("2023-06-16T11:49:47.0Z ptp4l[1]: b", 1).unwrap());
        for line in [first.clone(), second, first] {
            tx.send(line).await.unwrap();
        }
        drop(tx);
        let written = write_lines(rx, &mut out, false).await.unwrap();
        assert_eq!(written, 2);
        assert_eq!(String::from_utf8(out).unwrap(), "ptp4l[1]: a\nptp4l[1]: b\n");
    }
}
