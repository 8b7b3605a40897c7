use anyhow::{Context, Result, anyhow, bail};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::BurrowError;
use crate::k8s::PortForward;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TunnelState {
    Idle,
    Starting,
    Ready,
    Failed,
    Closed,
}

impl TunnelState {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

pub struct ReadySignal(Option<oneshot::Sender<()>>);

impl ReadySignal {
    pub fn notify(&mut self) {
        if let Some(sender) = self.0.take() {
            let _ = sender.send(());
        }
    }
}

#[derive(Clone)]
pub struct Shutdown(watch::Receiver<TunnelState>);

impl Shutdown {
    pub async fn requested(&mut self) {
        let _ = self.0.wait_for(|state| state.is_terminal()).await;
    }
}

pub trait Transport: Send + 'static {
    /// Returning before `ready` is notified counts as an establishment failure.
    fn run(
        self,
        ready: ReadySignal,
        shutdown: Shutdown,
    ) -> impl Future<Output = Result<()>> + Send;
}

pub struct TunnelSession {
    state: Arc<watch::Sender<TunnelState>>,
    finished: Option<oneshot::Receiver<Result<()>>>,
    task: Option<JoinHandle<()>>,
}

impl Default for TunnelSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TunnelSession {
    pub fn new() -> Self {
        let (state, _) = watch::channel(TunnelState::Idle);
        Self {
            state: Arc::new(state),
            finished: None,
            task: None,
        }
    }

    pub fn state(&self) -> TunnelState {
        *self.state.borrow()
    }

    pub async fn start<T: Transport>(&mut self, transport: T) -> Result<()> {
        let started = self.state.send_if_modified(|state| {
            if *state != TunnelState::Idle {
                return false;
            }
            *state = TunnelState::Starting;
            true
        });
        if !started {
            bail!("tunnel session already used ({:?})", self.state());
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let shutdown = Shutdown(self.state.subscribe());
        let state = Arc::clone(&self.state);

        self.task = Some(tokio::spawn(async move {
            let closing = CloseOnExit(state);
            let result = transport.run(ReadySignal(Some(ready_tx)), shutdown).await;
            if let Err(error) = &result {
                debug!("tunnel transport ended with error: {error:#}");
            }
            drop(closing);
            let _ = done_tx.send(result);
        }));

        if ready_rx.await.is_ok() {
            self.state.send_if_modified(|state| {
                if *state != TunnelState::Starting {
                    return false;
                }
                *state = TunnelState::Ready;
                true
            });
            self.finished = Some(done_rx);
            info!("tunnel ready");
            return Ok(());
        }

        let reason = match done_rx.await {
            Ok(Err(error)) => format!("{error:#}"),
            Ok(Ok(())) => "transport stopped before becoming ready".to_string(),
            Err(_) => "transport task stopped unexpectedly".to_string(),
        };
        self.state.send_replace(TunnelState::Failed);
        Err(BurrowError::TransportEstablishment(reason).into())
    }

    pub async fn wait(&mut self) -> Result<()> {
        let Some(finished) = self.finished.take() else {
            return Ok(());
        };
        finished
            .await
            .unwrap_or_else(|_| Err(anyhow!("tunnel transport task stopped unexpectedly")))
    }

    pub fn close(&self) {
        if close_state(&self.state) {
            debug!("tunnel close requested");
        }
    }
}

impl Drop for TunnelSession {
    fn drop(&mut self) {
        self.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// Marks the session closed however the transport task ends, panics included.
struct CloseOnExit(Arc<watch::Sender<TunnelState>>);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        close_state(&self.0);
    }
}

fn close_state(state: &watch::Sender<TunnelState>) -> bool {
    state.send_if_modified(|state| {
        if state.is_terminal() {
            return false;
        }
        *state = TunnelState::Closed;
        true
    })
}

pub struct SshTerminal {
    forward: PortForward,
    host: String,
    ssh_config_path: PathBuf,
    program: String,
}

impl SshTerminal {
    pub fn new(forward: PortForward, host: impl Into<String>, ssh_config_path: PathBuf) -> Self {
        Self {
            forward,
            host: host.into(),
            ssh_config_path,
            program: "ssh".to_string(),
        }
    }
}

impl Transport for SshTerminal {
    async fn run(self, mut ready: ReadySignal, mut shutdown: Shutdown) -> Result<()> {
        let Self {
            forward,
            host,
            ssh_config_path,
            program,
        } = self;

        forward.probe().await?;
        let local_addr = forward.local_addr();
        let serving = tokio::spawn(forward.serve(shutdown.clone()));
        ready.notify();
        info!(%local_addr, %host, "opening remote terminal");

        let command = terminal_command(&program, &ssh_config_path, &host);
        let result = run_terminal(command, &program, &mut shutdown).await;
        serving.abort();
        if let Err(error) = &result {
            warn!("remote terminal failed: {error:#}");
        }
        result
    }
}

fn terminal_command(program: &str, ssh_config_path: &Path, host: &str) -> Command {
    let mut command = Command::new(program);
    command
        .arg("-F")
        .arg(ssh_config_path)
        .arg(host)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    command
}

async fn run_terminal(
    mut command: Command,
    program: &str,
    shutdown: &mut Shutdown,
) -> Result<()> {
    let mut child = command
        .spawn()
        .with_context(|| format!("failed to launch {program}"))?;

    tokio::select! {
        status = child.wait() => {
            let status = status.with_context(|| format!("failed while waiting for {program}"))?;
            if status.success() {
                Ok(())
            } else {
                Err(anyhow!("{program} exited with {status}"))
            }
        }
        _ = shutdown.requested() => {
            let _ = child.kill().await;
            Ok(())
        }
    }
}
