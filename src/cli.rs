use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "burrow",
    version,
    about = "Attach your workstation to a container running in a remote environment."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// tracing filter (for example: info,debug,trace)
    #[arg(long, global = true, default_value = "warn")]
    pub log_filter: String,

    /// Output format for rendered records
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Select a component, open a tunnel to it and attach a terminal
    Up(UpArgs),

    /// Inspect asynchronous events
    #[command(subcommand)]
    Event(EventCommand),

    /// Follow deployment pipelines
    #[command(subcommand)]
    Pipeline(PipelineCommand),
}

#[derive(Debug, Clone, Args)]
pub struct UpArgs {
    /// Organization id
    #[arg(long)]
    pub organization: Option<String>,

    /// Project id
    #[arg(long)]
    pub project: Option<String>,

    /// Environment id
    #[arg(long)]
    pub environment: Option<String>,

    /// Component id
    #[arg(long)]
    pub component: Option<String>,

    /// Container name inside the component
    #[arg(long)]
    pub container: Option<String>,

    /// Local folder kept in sync with the container
    #[arg(long)]
    pub sync_folder: Option<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum EventCommand {
    /// Show an event, optionally following it until it finishes
    Show(EventShowArgs),
}

#[derive(Debug, Clone, Args)]
pub struct EventShowArgs {
    /// Event id
    #[arg(long)]
    pub id: String,

    /// Keep polling until the event succeeds or fails
    #[arg(long)]
    pub monitor: bool,

    /// Minimum time between two reported fetch errors
    #[arg(long, default_value = "10s", value_parser = parse_idle_window)]
    pub idle_notify: Duration,

    /// Delay between polls
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub interval: Duration,
}

#[derive(Debug, Clone, Subcommand)]
pub enum PipelineCommand {
    /// Render stage progress until the pipeline finishes
    Monitor(PipelineMonitorArgs),
}

#[derive(Debug, Clone, Args)]
pub struct PipelineMonitorArgs {
    /// Pipeline id
    #[arg(long)]
    pub id: String,

    /// Delay between polls
    #[arg(long, default_value = "2s", value_parser = parse_duration)]
    pub interval: Duration,
}

pub fn parse_duration(raw: &str) -> Result<Duration> {
    let value = raw.trim().to_ascii_lowercase();
    if value.is_empty() {
        bail!("duration is empty");
    }

    if let Some(millis) = value.strip_suffix("ms") {
        let millis: u64 = millis.trim().parse().context("invalid milliseconds")?;
        return Ok(Duration::from_millis(millis));
    }

    if let Some(hours) = value.strip_suffix('h') {
        let hours: u64 = hours.trim().parse().context("invalid hours")?;
        return Ok(Duration::from_secs(hours.saturating_mul(3600)));
    }

    if let Some(minutes) = value.strip_suffix('m') {
        let minutes: u64 = minutes.trim().parse().context("invalid minutes")?;
        return Ok(Duration::from_secs(minutes.saturating_mul(60)));
    }

    let seconds = value.strip_suffix('s').unwrap_or(&value);
    let seconds: u64 = seconds.trim().parse().context("invalid duration format")?;
    Ok(Duration::from_secs(seconds))
}

fn parse_idle_window(raw: &str) -> Result<Duration> {
    let window = parse_duration(raw)?;
    if window.is_zero() {
        bail!("idle window must be greater than zero");
    }
    Ok(window)
}
