use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{AttachParams, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config, ResourceExt};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::KubernetesSettings;
use crate::selector::ContainerSource;
use crate::tunnel::Shutdown;

const KEY_AUTHORIZED_MARKER: &str = "burrow-key-authorized";

// $1 is the public key line, passed as an argument so it is never parsed by the shell.
const AUTHORIZE_KEY_SCRIPT: &str = r#"set -e
umask 077
mkdir -p "$HOME/.ssh"
touch "$HOME/.ssh/authorized_keys"
grep -qxF "$1" "$HOME/.ssh/authorized_keys" || printf '%s\n' "$1" >> "$HOME/.ssh/authorized_keys"
echo burrow-key-authorized
"#;

#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    context: String,
    namespace: String,
}

impl KubeGateway {
    pub async fn new(namespace: Option<&str>) -> Result<Self> {
        let kubeconfig = Kubeconfig::read().ok();

        let config = if let Some(kubeconfig_value) = kubeconfig.clone() {
            Config::from_custom_kubeconfig(kubeconfig_value, &KubeConfigOptions::default())
                .await
                .context("failed to infer Kubernetes configuration")?
        } else {
            Config::infer()
                .await
                .context("failed to infer Kubernetes configuration")?
        };

        let default_namespace = config.default_namespace.clone();
        let client = Client::try_from(config).context("failed to initialize Kubernetes client")?;
        let context = kubeconfig
            .as_ref()
            .and_then(|cfg| cfg.current_context.clone())
            .unwrap_or_else(|| "in-cluster".to_string());
        let namespace = namespace
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or(default_namespace);

        debug!(%context, %namespace, "kubernetes gateway ready");
        Ok(Self {
            client,
            context,
            namespace,
        })
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn deployment_containers(&self, name: &str) -> Result<Vec<String>> {
        let deployment = self.deployment(name).await?;
        Ok(deployment
            .spec
            .and_then(|spec| spec.template.spec)
            .map(|spec| {
                spec.containers
                    .into_iter()
                    .map(|container| container.name)
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn component_pod(&self, component_name: &str) -> Result<String> {
        let deployment = self.deployment(component_name).await?;
        let selector = deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.selector.match_labels.as_ref())
            .map(selector_query)
            .unwrap_or_default();

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let params = if selector.is_empty() {
            ListParams::default()
        } else {
            ListParams::default().labels(&selector)
        };
        let pod_list = pods.list(&params).await.with_context(|| {
            format!(
                "failed to list pods for {}/{component_name}",
                self.namespace
            )
        })?;

        select_component_pod(&pod_list.items, component_name)
            .map(|pod| pod.name_any())
            .with_context(|| {
                format!(
                    "no running pod found for {}/{component_name}",
                    self.namespace
                )
            })
    }

    pub async fn authorize_key(
        &self,
        pod_name: &str,
        container: &str,
        public_key: &str,
    ) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let params = AttachParams::default()
            .container(container)
            .stdout(true)
            .stderr(false);
        let mut attached = pods
            .exec(
                pod_name,
                ["sh", "-c", AUTHORIZE_KEY_SCRIPT, "burrow", public_key],
                &params,
            )
            .await
            .with_context(|| format!("failed to exec in {pod_name}/{container}"))?;

        let mut output = String::new();
        if let Some(mut stdout) = attached.stdout() {
            stdout
                .read_to_string(&mut output)
                .await
                .context("failed to read key authorization output")?;
        }
        attached
            .join()
            .await
            .context("key authorization exec did not finish cleanly")?;

        if !output.contains(KEY_AUTHORIZED_MARKER) {
            bail!("could not authorize ssh key in {pod_name}/{container}");
        }
        info!(pod = %pod_name, %container, "ssh key authorized");
        Ok(())
    }

    pub async fn bind_port_forward(
        &self,
        pod_name: &str,
        settings: &KubernetesSettings,
    ) -> Result<PortForward> {
        let pod_name = pod_name.to_string();
        let bind_addr = format!("{}:{}", settings.local_interface, settings.local_port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("failed to bind local port-forward on {bind_addr}"))?;
        let local_addr = listener
            .local_addr()
            .context("failed to read bound port-forward address")?;

        info!(%local_addr, pod = %pod_name, remote_port = settings.ssh_port, "port-forward bound");
        Ok(PortForward {
            listener,
            pods: Api::namespaced(self.client.clone(), &self.namespace),
            pod_name,
            remote_port: settings.ssh_port,
            local_addr,
        })
    }

    async fn deployment(&self, name: &str) -> Result<Deployment> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
        deployments
            .get(name)
            .await
            .with_context(|| format!("failed to fetch deployment {}/{name}", self.namespace))
    }
}

#[async_trait]
impl ContainerSource for KubeGateway {
    async fn containers(&self, component_name: &str) -> Result<Vec<String>> {
        self.deployment_containers(component_name).await
    }
}

pub struct PortForward {
    listener: TcpListener,
    pods: Api<Pod>,
    pod_name: String,
    remote_port: u16,
    local_addr: SocketAddr,
}

impl PortForward {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn probe(&self) -> Result<()> {
        let mut forwarder = self
            .pods
            .portforward(&self.pod_name, &[self.remote_port])
            .await
            .with_context(|| format!("failed to open port-forward to pod {}", self.pod_name))?;
        let upstream = forwarder
            .take_stream(self.remote_port)
            .context("port not found in forwarder")?;
        drop(upstream);
        forwarder
            .join()
            .await
            .context("port-forward probe did not shut down cleanly")?;
        Ok(())
    }

    pub async fn serve(self, mut shutdown: Shutdown) -> Result<()> {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.requested() => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = self.listener.accept() => {
                    let (connection, peer) = accepted.context("failed to accept local connection")?;
                    debug!(%peer, "accepted tunnel connection");
                    let pods = self.pods.clone();
                    let pod_name = self.pod_name.clone();
                    let port = self.remote_port;
                    connections.spawn(async move {
                        if let Err(error) = forward_connection(&pods, &pod_name, port, connection).await {
                            warn!(%peer, "port-forward connection failed: {error:#}");
                        }
                    });
                }
            }
        }

        connections.abort_all();
        debug!(local_addr = %self.local_addr, "port-forward released");
        Ok(())
    }
}

async fn forward_connection(
    pods: &Api<Pod>,
    pod_name: &str,
    port: u16,
    mut connection: TcpStream,
) -> Result<()> {
    let mut forwarder = pods
        .portforward(pod_name, &[port])
        .await
        .with_context(|| format!("failed to open port-forward to pod {pod_name}"))?;
    let mut upstream = forwarder
        .take_stream(port)
        .context("port not found in forwarder")?;
    tokio::io::copy_bidirectional(&mut connection, &mut upstream)
        .await
        .context("tunnel stream failed")?;
    drop(upstream);
    forwarder.join().await.context("port-forward ended with error")?;
    Ok(())
}

fn select_component_pod<'a>(pods: &'a [Pod], component_name: &str) -> Option<&'a Pod> {
    pods.iter()
        .filter(|pod| pod.metadata.deletion_timestamp.is_none())
        .max_by_key(|pod| pod_relation_score(pod, component_name))
        .filter(|pod| pod_running_score(pod) > 0)
}

fn pod_relation_score(pod: &Pod, component_name: &str) -> u64 {
    let component = component_name.to_ascii_lowercase();
    let pod_name = pod.name_any().to_ascii_lowercase();
    let mut score = 0u64;

    if pod_name.starts_with(&format!("{component}-")) {
        score = score.saturating_add(420);
    }

    if let Some(owner_refs) = pod.metadata.owner_references.as_ref() {
        for owner in owner_refs {
            let owner_name = owner.name.to_ascii_lowercase();
            if owner.kind.eq_ignore_ascii_case("ReplicaSet")
                && owner_name.starts_with(&format!("{component}-"))
            {
                score = score.saturating_add(500);
            }
        }
    }

    score.saturating_add(pod_running_score(pod))
}

fn pod_running_score(pod: &Pod) -> u64 {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .map(|phase| {
            if phase.eq_ignore_ascii_case("Running") {
                48
            } else {
                0
            }
        })
        .unwrap_or(0)
}

fn selector_query(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}
