// ABOUTME: Bollard-based container runtime implementation.
// ABOUTME: Talks to Docker or Podman through the Docker-compatible API socket.

use crate::runtime::traits::{
    BuildRequest, ContainerConfig, ContainerError, ContainerFilters, ContainerOps,
    ContainerSummary, ImageError, ImageOps, LogError, LogLine, LogOps, LogOptions, LogStream,
    RestartPolicyConfig, RuntimeInfo, RuntimeInfoError,
};
use crate::runtime::types::{RuntimeEndpoint, RuntimeType};
use crate::types::{ContainerId, ImageRef};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::errors::Error as BollardError;
use bollard::models::{
    ContainerCreateBody, ContainerSummary as BollardSummary, HostConfig, Mount, MountTypeEnum,
    PortBinding, RestartPolicy, RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    BuildImageOptionsBuilder, CreateContainerOptions, ListContainersOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions, TagImageOptionsBuilder,
    WaitContainerOptions,
};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

/// Seconds bollard waits for any single API response.
const API_TIMEOUT_SECS: u64 = 120;

/// Attempts at listing containers while Podman reports transient states.
const LIST_ATTEMPTS: u32 = 3;

/// How a container call's HTTP status maps onto `ContainerError`.
#[derive(Clone, Copy)]
enum Call {
    Create,
    Start,
    Stop,
    Other,
}

fn container_error(call: Call, e: BollardError) -> ContainerError {
    let BollardError::DockerResponseServerError {
        status_code,
        message,
    } = &e
    else {
        return ContainerError::Runtime(e.to_string());
    };
    match (call, *status_code) {
        (Call::Create, 404) => ContainerError::ImageNotFound(message.clone()),
        (Call::Create, 409) => ContainerError::AlreadyExists(message.clone()),
        (Call::Start, 304) => ContainerError::AlreadyRunning(message.clone()),
        (Call::Stop, 304) => ContainerError::NotRunning(message.clone()),
        (_, 404) => ContainerError::NotFound(message.clone()),
        _ => ContainerError::Runtime(e.to_string()),
    }
}

/// Container runtime backed by a bollard client.
pub struct BollardRuntime {
    client: Docker,
    runtime_type: RuntimeType,
}

impl BollardRuntime {
    pub fn new(client: Docker, runtime_type: RuntimeType) -> Self {
        Self {
            client,
            runtime_type,
        }
    }

    /// Connect to a runtime socket on this host.
    pub fn connect(endpoint: &RuntimeEndpoint) -> Result<Self, RuntimeInfoError> {
        let client = Docker::connect_with_unix(
            &endpoint.socket_path,
            API_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        )
        .map_err(|e| RuntimeInfoError::ConnectionFailed(e.to_string()))?;
        Ok(Self::new(client, endpoint.runtime_type))
    }

    pub fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }
}

#[async_trait]
impl RuntimeInfo for BollardRuntime {
    async fn ping(&self) -> Result<(), RuntimeInfoError> {
        self.client
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeInfoError::ConnectionFailed(e.to_string()))
    }
}

#[async_trait]
impl ImageOps for BollardRuntime {
    async fn build_image(&self, request: &BuildRequest) -> Result<(), ImageError> {
        let image_name = request.image.to_string();
        let failed = |message: String| ImageError::BuildFailed(format!("{}: {}", image_name, message));
        let options = BuildImageOptionsBuilder::default()
            .dockerfile(&request.dockerfile)
            .t(&image_name)
            .rm(true)
            .build();

        // Failures arrive either as stream errors or as an error detail in a
        // progress message.
        let mut stream = self.client.build_image(
            options,
            None,
            Some(bollard::body_full(request.context.clone())),
        );
        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| failed(e.to_string()))?;
            if let Some(detail) = info.error_detail {
                return Err(failed(detail.message.unwrap_or_default()));
            }
            if let Some(line) = info.stream.as_deref().map(str::trim_end)
                && !line.is_empty()
            {
                tracing::debug!(target: "switchyard::build", "{}", line);
            }
        }

        Ok(())
    }

    async fn tag_image(&self, source: &ImageRef, target: &ImageRef) -> Result<(), ImageError> {
        let source_name = source.to_string();
        let options = TagImageOptionsBuilder::default()
            .repo(&target.repository())
            .tag(target.tag())
            .build();

        self.client
            .tag_image(&source_name, Some(options))
            .await
            .map_err(|e| match e {
                BollardError::DockerResponseServerError {
                    status_code: 404, ..
                } => ImageError::NotFound(source_name.clone()),
                e => ImageError::Runtime(format!("failed to tag {} as {}: {}", source_name, target, e)),
            })
    }
}

fn create_body(config: &ContainerConfig) -> ContainerCreateBody {
    let restart = match config.restart_policy {
        RestartPolicyConfig::No => RestartPolicyNameEnum::NO,
        RestartPolicyConfig::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
    };

    let mounts: Vec<Mount> = config
        .volumes
        .iter()
        .map(|m| Mount {
            source: Some(m.source.clone()),
            target: Some(m.target.clone()),
            typ: Some(MountTypeEnum::BIND),
            read_only: Some(m.read_only),
            ..Default::default()
        })
        .collect();

    let mut exposed_ports = Vec::new();
    let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    for port in &config.ports {
        let key = format!("{}/tcp", port.container_port);
        exposed_ports.push(key.clone());
        port_bindings.insert(
            key,
            Some(vec![PortBinding {
                host_ip: port.host_ip.clone(),
                host_port: Some(port.host_port.to_string()),
            }]),
        );
    }

    let host_config = HostConfig {
        restart_policy: Some(RestartPolicy {
            name: Some(restart),
            maximum_retry_count: None,
        }),
        mounts: (!mounts.is_empty()).then_some(mounts),
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        network_mode: config.network.clone(),
        ..Default::default()
    };

    let env: Vec<String> = config
        .env
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    ContainerCreateBody {
        image: Some(config.image.to_string()),
        env: (!env.is_empty()).then_some(env),
        labels: (!config.labels.is_empty()).then(|| config.labels.clone()),
        cmd: config.command.clone(),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        stop_timeout: config.stop_timeout.map(|d| d.as_secs() as i64),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn summarize(c: BollardSummary) -> ContainerSummary {
    let name = c
        .names
        .as_ref()
        .and_then(|names| names.first())
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default();
    ContainerSummary {
        id: ContainerId::new(c.id.unwrap_or_default()),
        name,
        image: c.image.unwrap_or_default(),
        state: c
            .state
            .map(|s| format!("{:?}", s).to_lowercase())
            .unwrap_or_default(),
        status: c.status.unwrap_or_default(),
        labels: c.labels.unwrap_or_default(),
    }
}

#[async_trait]
impl ContainerOps for BollardRuntime {
    async fn create_container(
        &self,
        config: &ContainerConfig,
    ) -> Result<ContainerId, ContainerError> {
        let opts = CreateContainerOptions {
            name: Some(config.name.clone()),
            ..Default::default()
        };
        let response = self
            .client
            .create_container(Some(opts), create_body(config))
            .await
            .map_err(|e| container_error(Call::Create, e))?;
        Ok(ContainerId::new(response.id))
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), ContainerError> {
        self.client
            .start_container(id.as_str(), None::<StartContainerOptions>)
            .await
            .map_err(|e| container_error(Call::Start, e))
    }

    async fn stop_container(
        &self,
        id: &ContainerId,
        timeout: Duration,
    ) -> Result<(), ContainerError> {
        let opts = StopContainerOptions {
            t: Some(timeout.as_secs() as i32),
            signal: None,
        };
        self.client
            .stop_container(id.as_str(), Some(opts))
            .await
            .map_err(|e| container_error(Call::Stop, e))
    }

    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<(), ContainerError> {
        let opts = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.client
            .remove_container(id.as_str(), Some(opts))
            .await
            .map_err(|e| container_error(Call::Other, e))
    }

    async fn list_containers(
        &self,
        filters: &ContainerFilters,
    ) -> Result<Vec<ContainerSummary>, ContainerError> {
        let mut filter_map: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(ref name) = filters.name {
            filter_map.insert("name".to_string(), vec![name.clone()]);
        }
        let labels: Vec<String> = filters
            .labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        if !labels.is_empty() {
            filter_map.insert("label".to_string(), labels);
        }

        let opts = ListContainersOptions {
            all: filters.all,
            filters: Some(filter_map),
            ..Default::default()
        };

        // Podman can report a container as "stopping", which bollard fails to
        // deserialize. The state is transient, so retry.
        let mut attempt = 1;
        loop {
            match self.client.list_containers(Some(opts.clone())).await {
                Ok(containers) => return Ok(containers.into_iter().map(summarize).collect()),
                Err(e) => {
                    let message = e.to_string();
                    let transient = message.contains("unknown variant `stopping`")
                        || message.contains("unknown variant `stopped`");
                    if !transient || attempt >= LIST_ATTEMPTS {
                        return Err(ContainerError::Runtime(message));
                    }
                    tracing::debug!(attempt, "transient container state, retrying list");
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
    }

    async fn wait_container(&self, id: &ContainerId) -> Result<i64, ContainerError> {
        let mut stream = self
            .client
            .wait_container(id.as_str(), None::<WaitContainerOptions>);

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Non-zero exits surface as an error carrying the exit code.
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(container_error(Call::Other, e)),
            None => Err(ContainerError::Runtime(format!(
                "wait stream for {} ended without a result",
                id
            ))),
        }
    }
}

#[async_trait]
impl LogOps for BollardRuntime {
    async fn container_logs(
        &self,
        id: &ContainerId,
        opts: &LogOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<LogLine, LogError>> + Send>>, LogError> {
        let log_opts = LogsOptions {
            stdout: opts.stdout,
            stderr: opts.stderr,
            tail: opts
                .tail
                .map(|n| n.to_string())
                .unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };

        let lines = self.client.logs(id.as_str(), Some(log_opts)).map(|item| {
            let (stream, message) = match item.map_err(|e| LogError::StreamError(e.to_string()))? {
                LogOutput::StdErr { message } => (LogStream::Stderr, message),
                LogOutput::StdOut { message }
                | LogOutput::StdIn { message }
                | LogOutput::Console { message } => (LogStream::Stdout, message),
            };
            Ok(LogLine {
                content: String::from_utf8_lossy(&message).into_owned(),
                stream,
            })
        });

        Ok(Box::pin(lines))
    }
}
