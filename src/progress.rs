use anyhow::Result;
use crossterm::cursor::MoveToColumn;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use crossterm::{execute, queue};
use std::collections::HashSet;
use std::future::Future;
use std::io::{self, IsTerminal, Write};
use std::sync::mpsc;
use std::thread::JoinHandle;
use tokio::time::{Duration, Instant, sleep};
use tracing::debug;

use crate::error::BurrowError;
use crate::model::{Pipeline, Stage, StageStatus};
use crate::monitor::ErrorThrottle;

pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(2);

const PREFIX_DONE: &str = "✔";
const PREFIX_WAIT: &str = "…";
const PREFIX_ERR: &str = "✘";
const PREFIX_UNKNOWN: &str = "?";

const SPINNER_FRAMES: [&str; 4] = ["|", "/", "-", "\\"];

#[derive(Debug, Clone, Copy)]
pub struct ProgressOptions {
    pub interval: Duration,
    pub idle_notify: Duration,
}

impl Default for ProgressOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_UPDATE_INTERVAL,
            idle_notify: crate::monitor::DEFAULT_IDLE_NOTIFY,
        }
    }
}

pub trait StageRenderer {
    fn status(&mut self, line: &str);
    fn finished(&mut self, line: &str);
    fn error(&mut self, error: &BurrowError);
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Tracking {
    InProgress,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PipelineOutcome {
    Succeeded,
    Failed,
    Gone,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum StageUpdate {
    Success,
    Failed,
    Synced,
}

pub struct PipelineProgress<R> {
    options: ProgressOptions,
    renderer: R,
    finished: HashSet<String>,
}

impl<R: StageRenderer> PipelineProgress<R> {
    pub fn new(options: ProgressOptions, renderer: R) -> Self {
        Self {
            options,
            renderer,
            finished: HashSet::new(),
        }
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub async fn update<F, Fut>(&mut self, mut sync: F) -> Result<PipelineOutcome>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<Pipeline>>>,
    {
        self.renderer.status("Fetching pipeline status...");
        let mut throttle = ErrorThrottle::new(self.options.idle_notify);

        loop {
            let now = Instant::now();
            let pipeline = match sync().await {
                Ok(pipeline) => pipeline,
                Err(error) => {
                    let error = BurrowError::TransientFetch(format!("{error:#}"));
                    if throttle.should_report(now) {
                        self.renderer.error(&error);
                    } else {
                        debug!(%error, "suppressed pipeline fetch error");
                    }
                    sleep(throttle.backoff()).await;
                    continue;
                }
            };
            throttle.reset(now);

            let Some(pipeline) = pipeline else {
                return Ok(PipelineOutcome::Gone);
            };

            match self.update_pipeline(&pipeline) {
                Tracking::InProgress => sleep(self.options.interval).await,
                Tracking::Succeeded => return Ok(PipelineOutcome::Succeeded),
                Tracking::Failed => return Ok(PipelineOutcome::Failed),
            }
        }
    }

    /// Renders one fetched pipeline. Stages are sequential: evaluation stops
    /// at the first stage that has not finished.
    pub fn update_pipeline(&mut self, pipeline: &Pipeline) -> Tracking {
        if pipeline.stages.is_empty() {
            return Tracking::Succeeded;
        }

        for stage in &pipeline.stages {
            match self.set_stage(stage) {
                StageUpdate::Success => continue,
                StageUpdate::Failed => return Tracking::Failed,
                StageUpdate::Synced => return Tracking::InProgress,
            }
        }

        Tracking::Succeeded
    }

    fn set_stage(&mut self, stage: &Stage) -> StageUpdate {
        if !stage.status.is_finished() {
            self.renderer.status(&format!(
                "{} {}... {}/{} jobs completed",
                prefix(stage.status),
                stage.name,
                stage.completed_jobs_count,
                stage.jobs_count
            ));
            return StageUpdate::Synced;
        }

        self.finish_stage(stage);
        if stage.status == StageStatus::Failed {
            StageUpdate::Failed
        } else {
            StageUpdate::Success
        }
    }

    fn finish_stage(&mut self, stage: &Stage) {
        if !self.finished.insert(stage.id.clone()) {
            return;
        }

        self.renderer.finished(&format!(
            "{} {} finished {} jobs in {}",
            prefix(stage.status),
            stage.name,
            stage.jobs_count,
            format_duration(stage.duration_seconds)
        ));
    }
}

fn prefix(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Success => PREFIX_DONE,
        StageStatus::InProgress | StageStatus::Pending => PREFIX_WAIT,
        StageStatus::Failed => PREFIX_ERR,
        StageStatus::Unknown => PREFIX_UNKNOWN,
    }
}

pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        return format!("{hours}h{minutes}m{secs}s");
    }
    if minutes > 0 {
        return format!("{minutes}m{secs}s");
    }
    format!("{secs}s")
}

pub struct TerminalRenderer<W: Write> {
    out: W,
    in_place: bool,
}

impl TerminalRenderer<io::Stderr> {
    pub fn stderr() -> Self {
        let out = io::stderr();
        let in_place = out.is_terminal();
        Self { out, in_place }
    }
}

impl<W: Write> TerminalRenderer<W> {
    fn write_line(&mut self, line: &str, keep: bool) -> io::Result<()> {
        if self.in_place {
            queue!(self.out, MoveToColumn(0), Clear(ClearType::CurrentLine), Print(line))?;
            if keep {
                queue!(self.out, Print("\n"))?;
            }
        } else if keep {
            writeln!(self.out, "{line}")?;
        }
        self.out.flush()
    }

    pub fn clear(&mut self) {
        if self.in_place {
            let _ = execute!(self.out, MoveToColumn(0), Clear(ClearType::CurrentLine));
        }
    }
}

impl<W: Write> StageRenderer for TerminalRenderer<W> {
    fn status(&mut self, line: &str) {
        let _ = self.write_line(line, false);
    }

    fn finished(&mut self, line: &str) {
        let _ = self.write_line(line, true);
    }

    fn error(&mut self, error: &BurrowError) {
        let _ = self.write_line(&format!("{PREFIX_ERR} {error}"), true);
    }
}

pub struct Spinner {
    stop: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Spinner {
    pub fn start(message: &str) -> Self {
        if !io::stderr().is_terminal() {
            return Self {
                stop: None,
                handle: None,
            };
        }

        let (stop, stopped) = mpsc::channel::<()>();
        let message = message.to_string();
        let handle = std::thread::spawn(move || {
            let mut stderr = io::stderr();
            for frame in SPINNER_FRAMES.iter().cycle() {
                let _ = execute!(
                    stderr,
                    MoveToColumn(0),
                    Clear(ClearType::CurrentLine),
                    Print(format!("{frame} {message}"))
                );
                match stopped.recv_timeout(std::time::Duration::from_millis(120)) {
                    Err(mpsc::RecvTimeoutError::Timeout) => continue,
                    _ => break,
                }
            }
            let _ = execute!(stderr, MoveToColumn(0), Clear(ClearType::CurrentLine));
        });

        Self {
            stop: Some(stop),
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.halt();
    }
}

#[cfg(test)]
mod tests {
    use super::{
        PipelineOutcome, PipelineProgress, ProgressOptions, StageRenderer, TerminalRenderer,
        Tracking, format_duration,
    };
    use crate::error::BurrowError;
    use crate::model::{Pipeline, Stage, StageStatus};
    use anyhow::{Result, anyhow};
    use std::collections::VecDeque;
    use tokio::time::Duration;

    #[derive(Default)]
    struct Recorded {
        status: Vec<String>,
        finished: Vec<String>,
        errors: Vec<String>,
    }

    impl StageRenderer for Recorded {
        fn status(&mut self, line: &str) {
            self.status.push(line.to_string());
        }

        fn finished(&mut self, line: &str) {
            self.finished.push(line.to_string());
        }

        fn error(&mut self, error: &BurrowError) {
            self.errors.push(error.to_string());
        }
    }

    fn stage(id: &str, status: StageStatus, jobs: u32, done: u32, secs: u64) -> Stage {
        Stage {
            id: id.to_string(),
            name: format!("stage {id}"),
            status,
            jobs_count: jobs,
            completed_jobs_count: done,
            duration_seconds: secs,
        }
    }

    fn pipeline(stages: Vec<Stage>) -> Pipeline {
        Pipeline {
            id: "pl-1".to_string(),
            status: None,
            stages,
        }
    }

    fn options() -> ProgressOptions {
        ProgressOptions {
            interval: Duration::from_secs(1),
            idle_notify: Duration::from_secs(10),
        }
    }

    async fn drive(
        script: Vec<Result<Option<Pipeline>>>,
    ) -> (Result<PipelineOutcome>, PipelineProgress<Recorded>) {
        let mut script = VecDeque::from(script);
        let mut progress = PipelineProgress::new(options(), Recorded::default());
        let outcome = progress
            .update(|| {
                let next = script.pop_front().unwrap_or(Ok(None));
                async move { next }
            })
            .await;
        (outcome, progress)
    }

    #[tokio::test(start_paused = true)]
    async fn success_then_failure_reports_each_stage_once() {
        let (outcome, progress) = drive(vec![Ok(Some(pipeline(vec![
            stage("1", StageStatus::Success, 5, 5, 3),
            stage("2", StageStatus::Failed, 2, 1, 7),
        ])))])
        .await;

        assert_eq!(outcome.unwrap(), PipelineOutcome::Failed);
        assert_eq!(
            progress.renderer.finished,
            vec![
                "✔ stage 1 finished 5 jobs in 3s".to_string(),
                "✘ stage 2 finished 2 jobs in 7s".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn finished_stages_are_not_repeated_across_polls() {
        let (outcome, progress) = drive(vec![
            Ok(Some(pipeline(vec![
                stage("1", StageStatus::InProgress, 4, 1, 0),
                stage("2", StageStatus::Pending, 3, 0, 0),
            ]))),
            Ok(Some(pipeline(vec![
                stage("1", StageStatus::Success, 4, 4, 12),
                stage("2", StageStatus::InProgress, 3, 1, 0),
            ]))),
            Ok(Some(pipeline(vec![
                stage("1", StageStatus::Success, 4, 4, 12),
                stage("2", StageStatus::InProgress, 3, 2, 0),
            ]))),
            Ok(Some(pipeline(vec![
                stage("1", StageStatus::Success, 4, 4, 12),
                stage("2", StageStatus::Success, 3, 3, 75),
            ]))),
        ])
        .await;

        assert_eq!(outcome.unwrap(), PipelineOutcome::Succeeded);
        let recorded = &progress.renderer;
        assert_eq!(
            recorded.finished,
            vec![
                "✔ stage 1 finished 4 jobs in 12s".to_string(),
                "✔ stage 2 finished 3 jobs in 1m15s".to_string(),
            ]
        );
        assert_eq!(
            recorded.status[1..],
            [
                "… stage 1... 1/4 jobs completed".to_string(),
                "… stage 2... 1/3 jobs completed".to_string(),
                "… stage 2... 2/3 jobs completed".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_pipeline_ends_tracking() {
        let (outcome, progress) = drive(vec![Ok(None)]).await;
        assert_eq!(outcome.unwrap(), PipelineOutcome::Gone);
        assert!(progress.renderer.finished.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_errors_are_retried_and_throttled() {
        let mut script = (0..3)
            .map(|_| Err(anyhow!("timeout")))
            .collect::<Vec<Result<Option<Pipeline>>>>();
        script.push(Ok(Some(pipeline(vec![stage("1", StageStatus::Success, 1, 1, 1)]))));

        let (outcome, progress) = drive(script).await;

        assert_eq!(outcome.unwrap(), PipelineOutcome::Succeeded);
        assert_eq!(progress.renderer.errors.len(), 1);
        assert!(progress.renderer.errors[0].contains("timeout"));
    }

    #[test]
    fn stage_after_unfinished_stage_is_not_evaluated() {
        let mut progress = PipelineProgress::new(options(), Recorded::default());
        let tracking = progress.update_pipeline(&pipeline(vec![
            stage("1", StageStatus::InProgress, 2, 0, 0),
            stage("2", StageStatus::Failed, 1, 0, 0),
        ]));

        assert_eq!(tracking, Tracking::InProgress);
        assert!(progress.renderer.finished.is_empty());
    }

    #[test]
    fn durations_follow_compact_units() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(59), "59s");
        assert_eq!(format_duration(61), "1m1s");
        assert_eq!(format_duration(3_605), "1h0m5s");
    }

    #[test]
    fn plain_renderer_only_keeps_finished_lines() {
        let mut renderer = TerminalRenderer {
            out: Vec::new(),
            in_place: false,
        };
        renderer.status("working");
        renderer.finished("done");
        let written = String::from_utf8(renderer.out).unwrap();
        assert_eq!(written, "done\n");
    }
}
