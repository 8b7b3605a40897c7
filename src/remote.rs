use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::api::ResourceApi;
use crate::config::{DefaultContext, KubernetesSettings, RuntimeConfig};
use crate::credentials::ensure_keys;
use crate::error::BurrowError;
use crate::k8s::KubeGateway;
use crate::model::SessionContext;
use crate::prompt::Prompter;
use crate::selector::{ContainerSource, Preselected, ResourceSelector};
use crate::ssh_config::{self, HostEntry};
use crate::tunnel::{SshTerminal, Transport, TunnelSession};

#[derive(Debug, Clone, Copy)]
pub struct TunnelTarget<'a> {
    pub component: &'a str,
    pub container: &'a str,
    pub host: &'a str,
    pub public_key: &'a str,
}

#[async_trait]
pub trait Workload: ContainerSource {
    type Transport: Transport;

    async fn open_tunnel(
        &self,
        target: &TunnelTarget<'_>,
    ) -> Result<(SocketAddr, Self::Transport)>;
}

pub struct KubeWorkload {
    gateway: KubeGateway,
    settings: KubernetesSettings,
    ssh_config_path: PathBuf,
}

impl KubeWorkload {
    pub fn new(gateway: KubeGateway, config: &RuntimeConfig) -> Self {
        Self {
            gateway,
            settings: config.kubernetes.clone(),
            ssh_config_path: config.ssh_config_path.clone(),
        }
    }
}

#[async_trait]
impl ContainerSource for KubeWorkload {
    async fn containers(&self, component_name: &str) -> Result<Vec<String>> {
        self.gateway.containers(component_name).await
    }
}

#[async_trait]
impl Workload for KubeWorkload {
    type Transport = SshTerminal;

    async fn open_tunnel(&self, target: &TunnelTarget<'_>) -> Result<(SocketAddr, SshTerminal)> {
        let pod = self.gateway.component_pod(target.component).await?;
        self.gateway
            .authorize_key(&pod, target.container, target.public_key)
            .await?;
        let forward = self.gateway.bind_port_forward(&pod, &self.settings).await?;
        let local_addr = forward.local_addr();
        let terminal = SshTerminal::new(forward, target.host, self.ssh_config_path.clone());
        Ok((local_addr, terminal))
    }
}

impl Preselected {
    pub fn or_context(mut self, context: &DefaultContext) -> Self {
        fn fill(slot: &mut Option<String>, default: &Option<String>) {
            if slot.as_deref().is_none_or(|value| value.trim().is_empty()) {
                slot.clone_from(default);
            }
        }
        fill(&mut self.organization, &context.organization);
        fill(&mut self.project, &context.project);
        fill(&mut self.environment, &context.environment);
        self
    }
}

pub async fn prepare<A, P, W>(
    config: &RuntimeConfig,
    api: &A,
    prompter: &mut P,
    workload: &W,
    preselected: &Preselected,
) -> Result<SessionContext>
where
    A: ResourceApi + ?Sized,
    P: Prompter + Send + ?Sized,
    W: ContainerSource + ?Sized,
{
    let mut session = SessionContext::default();
    {
        let mut selector = ResourceSelector::new(api, prompter);
        selector.resolve_component(preselected, &mut session).await?;
        selector
            .select_container(workload, preselected.container.as_deref(), &mut session)
            .await?;
        selector.select_sync_folder(preselected.sync_folder.clone(), &mut session)?;
    }

    let workspace = config.workspace_dir.clone();
    let keys = tokio::task::spawn_blocking(move || ensure_keys(&workspace))
        .await
        .context("key generation task failed")??;
    session.set_ssh_private_key_path(keys.private_key);
    session.set_ssh_public_key_path(keys.public_key);

    info!(
        component = session.component_id().unwrap_or_default(),
        name = session.component_name().unwrap_or_default(),
        container = session.container_name().unwrap_or_default(),
        sync_folder = ?session.local_sync_path(),
        public_key = ?session.ssh_public_key_path(),
        "remote target resolved"
    );
    Ok(session)
}

pub async fn connect<W>(
    config: &RuntimeConfig,
    workload: &W,
    session: &SessionContext,
) -> Result<()>
where
    W: Workload + ?Sized,
{
    let component = session
        .component_name()
        .context("no component resolved for the session")?;
    let container = session
        .container_name()
        .context("no container resolved for the session")?;
    let identity_file = session
        .ssh_private_key_path()
        .context("no ssh key resolved for the session")?;
    let public_key_path = session
        .ssh_public_key_path()
        .context("no ssh key resolved for the session")?;
    let public_key = fs::read_to_string(public_key_path).map_err(|source| {
        BurrowError::CredentialIo {
            path: public_key_path.to_path_buf(),
            source,
        }
    })?;
    let host = config.host_name(component);

    let target = TunnelTarget {
        component,
        container,
        host: &host,
        public_key: public_key.trim(),
    };
    let (local_addr, transport) = workload.open_tunnel(&target).await?;
    ssh_config::upsert_host(
        &config.ssh_config_path,
        &HostEntry {
            hostname: host.clone(),
            local_interface: local_addr.ip().to_string(),
            local_port: local_addr.port(),
            identity_file: identity_file.to_path_buf(),
        },
    )?;

    let mut tunnel = TunnelSession::new();
    tunnel.start(transport).await?;
    info!(%host, %local_addr, "remote session open");
    let ended = tunnel.wait().await;
    tunnel.close();
    debug!(state = ?tunnel.state(), "remote session finished");
    ended
}
