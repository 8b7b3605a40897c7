use anyhow::Result;
use std::future::Future;
use std::io::{self, Write};
use tokio::time::{Duration, Instant, sleep};
use tracing::debug;

use crate::cli::OutputFormat;
use crate::error::BurrowError;
use crate::model::Event;

pub const DEFAULT_IDLE_NOTIFY: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const MIN_ERROR_WAIT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy)]
pub struct MonitorOptions {
    pub idle_notify: Duration,
    pub poll_interval: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            idle_notify: DEFAULT_IDLE_NOTIFY,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

pub trait EventObserver {
    fn on_event(&mut self, event: &Event);
    fn on_error(&mut self, error: &BurrowError);
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ErrorThrottle {
    idle: Duration,
    deadline: Instant,
}

impl ErrorThrottle {
    pub(crate) fn new(idle: Duration) -> Self {
        Self {
            idle,
            deadline: Instant::now() + idle,
        }
    }

    pub(crate) fn reset(&mut self, now: Instant) {
        self.deadline = now + self.idle;
    }

    pub(crate) fn backoff(&self) -> Duration {
        (self.idle / 2).max(MIN_ERROR_WAIT)
    }

    pub(crate) fn should_report(&mut self, now: Instant) -> bool {
        if now < self.deadline {
            return false;
        }
        self.reset(now);
        true
    }
}

pub async fn monitor_event<F, Fut, O>(
    options: MonitorOptions,
    follow: bool,
    mut fetch: F,
    observer: &mut O,
) -> Result<Event>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Event>>,
    O: EventObserver + ?Sized,
{
    let mut last = fetch().await?;
    observer.on_event(&last);
    if !follow || last.is_final() {
        return Ok(last);
    }

    let mut throttle = ErrorThrottle::new(options.idle_notify);
    loop {
        let now = Instant::now();
        let event = match fetch().await {
            Ok(event) => event,
            Err(error) => {
                let error = BurrowError::TransientFetch(format!("{error:#}"));
                if throttle.should_report(now) {
                    observer.on_error(&error);
                } else {
                    debug!(%error, "suppressed fetch error inside idle window");
                }
                sleep(throttle.backoff()).await;
                continue;
            }
        };

        if event.updated_at == last.updated_at {
            sleep(options.poll_interval).await;
            continue;
        }

        observer.on_event(&event);
        throttle.reset(now);
        if event.is_final() {
            return Ok(event);
        }

        last = event;
        sleep(options.poll_interval).await;
    }
}

pub struct ConsoleObserver {
    format: OutputFormat,
}

impl ConsoleObserver {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

impl EventObserver for ConsoleObserver {
    fn on_event(&mut self, event: &Event) {
        let mut stdout = io::stdout().lock();
        let rendered = match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(event)
                .unwrap_or_else(|error| format!("failed to format event: {error}")),
            OutputFormat::Text => render_event_text(event),
        };
        let _ = writeln!(stdout, "{rendered}");
        let _ = stdout.flush();
    }

    fn on_error(&mut self, error: &BurrowError) {
        eprintln!("error: {error}");
    }
}

pub fn render_event_text(event: &Event) -> String {
    let mut line = format!(
        "event {}  status={}  updated={}",
        event.id,
        event.status,
        event.updated_at.to_rfc3339()
    );
    if let Some(kind) = &event.kind {
        line.push_str(&format!("  type={kind}"));
    }
    if let Some(environment) = &event.environment {
        line.push_str(&format!("  environment={environment}"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::{ErrorThrottle, EventObserver, MonitorOptions, monitor_event, render_event_text};
    use crate::error::BurrowError;
    use crate::model::Event;
    use anyhow::{Result, anyhow};
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::VecDeque;
    use tokio::time::{Duration, Instant};

    fn event(status: &str, second: u32) -> Event {
        Event {
            id: "ev-1".to_string(),
            status: status.to_string(),
            updated_at: at(second),
            kind: None,
            environment: None,
        }
    }

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, second).unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
        errors: Vec<(Instant, String)>,
    }

    impl EventObserver for Recorder {
        fn on_event(&mut self, event: &Event) {
            self.events.push(event.status.clone());
        }

        fn on_error(&mut self, error: &BurrowError) {
            self.errors.push((Instant::now(), error.to_string()));
        }
    }

    async fn run(
        follow: bool,
        script: Vec<Result<Event>>,
        options: MonitorOptions,
    ) -> (Result<Event>, Recorder) {
        let mut script = VecDeque::from(script);
        let mut recorder = Recorder::default();
        let result = monitor_event(
            options,
            follow,
            || {
                let next = script
                    .pop_front()
                    .unwrap_or_else(|| Err(anyhow!("script exhausted")));
                async move { next }
            },
            &mut recorder,
        )
        .await;
        (result, recorder)
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_timestamp_is_not_reported() {
        let (result, recorder) = run(
            true,
            vec![
                Ok(event("pending", 1)),
                Ok(event("pending", 1)),
                Ok(event("success", 2)),
            ],
            MonitorOptions::default(),
        )
        .await;

        assert_eq!(result.unwrap().status, "success");
        assert_eq!(recorder.events, vec!["pending", "success"]);
    }

    #[tokio::test(start_paused = true)]
    async fn every_new_timestamp_is_reported() {
        let (_, recorder) = run(
            true,
            vec![
                Ok(event("pending", 1)),
                Ok(event("pending", 2)),
                Ok(event("success", 3)),
            ],
            MonitorOptions::default(),
        )
        .await;

        assert_eq!(recorder.events, vec!["pending", "pending", "success"]);
    }

    #[tokio::test(start_paused = true)]
    async fn final_initial_state_skips_the_loop() {
        let (result, recorder) = run(
            true,
            vec![Ok(event("error", 1)), Ok(event("pending", 2))],
            MonitorOptions::default(),
        )
        .await;

        assert_eq!(result.unwrap().status, "error");
        assert_eq!(recorder.events, vec!["error"]);
    }

    #[tokio::test(start_paused = true)]
    async fn without_follow_only_the_first_fetch_runs() {
        let (result, recorder) = run(
            false,
            vec![Ok(event("pending", 1))],
            MonitorOptions::default(),
        )
        .await;

        assert_eq!(result.unwrap().status, "pending");
        assert_eq!(recorder.events.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_fetch_error_is_returned() {
        let (result, recorder) = run(
            true,
            vec![Err(anyhow!("boom"))],
            MonitorOptions::default(),
        )
        .await;

        assert!(result.is_err());
        assert!(recorder.events.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn errors_are_reported_at_most_once_per_idle_window() {
        let options = MonitorOptions {
            idle_notify: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
        };
        let mut script = vec![Ok(event("pending", 1))];
        // 8 failures, each followed by a 5s wait: t = 0, 5, 10, ..., 35
        script.extend((0..8).map(|_| Err(anyhow!("network down"))));
        script.push(Ok(event("success", 2)));

        let start = Instant::now();
        let (result, recorder) = run(true, script, options).await;

        assert_eq!(result.unwrap().status, "success");
        let offsets = recorder
            .errors
            .iter()
            .map(|(when, _)| when.duration_since(start).as_secs())
            .collect::<Vec<_>>();
        assert_eq!(offsets, vec![10, 20, 30]);
        assert!(recorder.errors[0].1.contains("network down"));
    }

    #[tokio::test(start_paused = true)]
    async fn successful_report_restarts_the_idle_window() {
        let options = MonitorOptions {
            idle_notify: Duration::from_secs(10),
            poll_interval: Duration::from_secs(0),
        };
        let mut script = vec![Ok(event("pending", 1))];
        script.extend((0..2).map(|_| Err(anyhow!("flaky"))));
        script.push(Ok(event("running", 2)));
        script.extend((0..2).map(|_| Err(anyhow!("flaky"))));
        script.push(Ok(event("success", 3)));

        let (_, recorder) = run(true, script, options).await;

        assert_eq!(recorder.events, vec!["pending", "running", "success"]);
        assert!(recorder.errors.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_opens_after_idle_and_resets() {
        let start = Instant::now();
        let mut throttle = ErrorThrottle::new(Duration::from_secs(10));
        assert!(!throttle.should_report(start + Duration::from_secs(9)));
        assert!(throttle.should_report(start + Duration::from_secs(10)));
        assert!(!throttle.should_report(start + Duration::from_secs(15)));
        assert!(throttle.should_report(start + Duration::from_secs(20)));
    }

    #[test]
    fn text_rendering_includes_optional_fields() {
        let mut ev = event("pending", 1);
        ev.kind = Some("env_deploy".to_string());
        let line = render_event_text(&ev);
        assert!(line.starts_with("event ev-1  status=pending"));
        assert!(line.ends_with("type=env_deploy"));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_idle_window_still_backs_off_between_errors() {
        let options = MonitorOptions {
            idle_notify: Duration::ZERO,
            poll_interval: Duration::from_secs(1),
        };
        let mut script = vec![Ok(event("pending", 1))];
        script.extend((0..4).map(|_| Err(anyhow!("network down"))));
        script.push(Ok(event("success", 2)));

        let start = Instant::now();
        let (result, recorder) = run(true, script, options).await;

        assert_eq!(result.unwrap().status, "success");
        assert_eq!(recorder.errors.len(), 4);
        assert!(Instant::now().duration_since(start) >= Duration::from_secs(2));
    }
}
