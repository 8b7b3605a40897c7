mod api;
mod cli;
mod config;
mod credentials;
mod error;
mod k8s;
mod model;
mod monitor;
mod progress;
mod prompt;
mod remote;
mod selector;
mod ssh_config;
mod tunnel;

use anyhow::{Context, Result, bail};
use api::{HttpApi, ResourceApi};
use clap::Parser;
use cli::{
    CliArgs, Command, EventCommand, EventShowArgs, OutputFormat, PipelineCommand,
    PipelineMonitorArgs, UpArgs,
};
use config::RuntimeConfig;
use k8s::KubeGateway;
use monitor::{ConsoleObserver, DEFAULT_IDLE_NOTIFY, MonitorOptions, monitor_event};
use progress::{PipelineOutcome, PipelineProgress, ProgressOptions, TerminalRenderer};
use prompt::TerminalPrompter;
use remote::KubeWorkload;
use selector::Preselected;
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    if let Err(error) = init_tracing(&args.log_filter) {
        eprintln!("warning: {error:#}");
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")?;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .try_init();

    Ok(())
}

async fn run(args: CliArgs) -> Result<()> {
    let config = RuntimeConfig::discover()?;
    debug!(source = config.source.as_deref().unwrap_or("defaults"), "runtime config loaded");

    match args.command {
        Command::Up(up) => run_up(&config, up).await,
        Command::Event(EventCommand::Show(show)) => show_event(&config, show, args.output).await,
        Command::Pipeline(PipelineCommand::Monitor(monitor)) => {
            monitor_pipeline(&config, monitor, args.output).await
        }
    }
}

async fn run_up(config: &RuntimeConfig, up: UpArgs) -> Result<()> {
    let api = HttpApi::new(config)?;
    let gateway = KubeGateway::new(config.kubernetes.namespace.as_deref()).await?;
    info!(context = gateway.context(), namespace = gateway.namespace(), "kubernetes target");
    let workload = KubeWorkload::new(gateway, config);

    let preselected = Preselected {
        organization: up.organization,
        project: up.project,
        environment: up.environment,
        component: up.component,
        container: up.container,
        sync_folder: up.sync_folder,
    }
    .or_context(&config.context);

    let mut prompter = TerminalPrompter;
    let session = remote::prepare(config, &api, &mut prompter, &workload, &preselected).await?;
    remote::connect(config, &workload, &session).await
}

async fn show_event(
    config: &RuntimeConfig,
    show: EventShowArgs,
    output: OutputFormat,
) -> Result<()> {
    let api = HttpApi::new(config)?;
    let options = MonitorOptions {
        idle_notify: show.idle_notify,
        poll_interval: show.interval,
    };
    let mut observer = ConsoleObserver::new(output);
    let event = monitor_event(options, show.monitor, || api.event(&show.id), &mut observer)
        .await
        .with_context(|| format!("failed to load event {}", show.id))?;
    debug!(event = %event.id, status = %event.status, "event monitoring done");
    Ok(())
}

async fn monitor_pipeline(
    config: &RuntimeConfig,
    monitor: PipelineMonitorArgs,
    output: OutputFormat,
) -> Result<()> {
    let api = HttpApi::new(config)?;
    let options = ProgressOptions {
        interval: monitor.interval,
        idle_notify: DEFAULT_IDLE_NOTIFY,
    };
    let mut progress = PipelineProgress::new(options, TerminalRenderer::stderr());
    let outcome = progress.update(|| api.pipeline(&monitor.id)).await?;
    progress.renderer_mut().clear();

    if output == OutputFormat::Json {
        let summary = serde_json::json!({
            "id": monitor.id,
            "outcome": format!("{outcome:?}").to_ascii_lowercase(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    match outcome {
        PipelineOutcome::Succeeded => Ok(()),
        PipelineOutcome::Gone => {
            if output == OutputFormat::Text {
                println!("pipeline {} no longer exists", monitor.id);
            }
            Ok(())
        }
        PipelineOutcome::Failed => bail!("pipeline {} failed", monitor.id),
    }
}
