// ABOUTME: In-memory fakes of the container runtime, proxy, probe and notifier.
// ABOUTME: They share one World so a test can observe what a deployment did.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use futures::Stream;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use switchyard::config::Config;
use switchyard::deploy::{
    CancelSignal, DeployError, DeployReport, DeployRequest, DeploymentController, ProbeResult,
    Probe, ProbeTarget, container_name, slot_target,
};
use switchyard::notify::{Notification, Notifier, NotifyError};
use switchyard::proxy::{ProxyError, ProxyOps};
use switchyard::runtime::{
    BuildRequest, ContainerConfig, ContainerError, ContainerFilters, ContainerOps, ContainerSummary,
    ImageError, ImageOps, LogError, LogLine, LogOps, LogOptions, LogStream,
};
use switchyard::types::{ContainerId, EnvironmentName, ImageRef, Slot};

pub const PUBLIC_URL: &str = "http://public.test/health";
pub const SLOT_HEADER: &str = "X-Switchyard-Slot";

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: ContainerId,
    pub name: String,
    pub image: String,
    pub labels: HashMap<String, String>,
    pub running: bool,
    pub healthy: bool,
}

impl FakeContainer {
    fn summary(&self) -> ContainerSummary {
        ContainerSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            image: self.image.clone(),
            state: if self.running { "running" } else { "exited" }.to_string(),
            status: String::new(),
            labels: self.labels.clone(),
        }
    }
}

/// Everything the fakes know, behind one lock.
#[derive(Debug, Default)]
pub struct World {
    pub containers: Vec<FakeContainer>,
    pub images: HashSet<String>,
    pub calls: Vec<String>,
    next_id: usize,
    /// Health of containers created from now on.
    pub new_containers_healthy: bool,
    /// Slot the proxy sends traffic to, as of its last reload.
    pub proxy_slot: Option<Slot>,
    pub reload_count: usize,
    pub fail_reload: bool,
    /// Public requests routed to this slot come back as 502.
    pub public_broken_for: Option<Slot>,
    pub slot_urls: HashMap<String, Slot>,
    pub build_fails: bool,
    /// Exit code of one-off (smoke test) containers.
    pub test_exit_code: i64,
    /// One-off containers never exit.
    pub test_hangs: bool,
    pub fail_validate: bool,
    /// Written to a file whenever a slot container starts, like a migration.
    pub write_on_start: Option<(PathBuf, String)>,
    /// Replaced by a non-empty directory on the next public request, so
    /// slot state can no longer be written there.
    pub block_on_public: Option<PathBuf>,
}

impl World {
    fn slot_container(&self, slot: Slot) -> Option<&FakeContainer> {
        self.containers
            .iter()
            .find(|c| c.labels.get("switchyard.slot").map(String::as_str) == Some(slot.as_str()))
    }

    pub fn container(&self, name: &str) -> Option<&FakeContainer> {
        self.containers.iter().find(|c| c.name == name)
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls.iter().filter(|c| c.starts_with(prefix)).count()
    }
}

pub type SharedWorld = Arc<Mutex<World>>;

#[derive(Clone)]
pub struct FakeRuntime {
    world: SharedWorld,
}

#[async_trait]
impl ImageOps for FakeRuntime {
    async fn build_image(&self, request: &BuildRequest) -> Result<(), ImageError> {
        let mut world = self.world.lock();
        world.calls.push(format!("build {}", request.image));
        if world.build_fails {
            return Err(ImageError::BuildFailed("step 3/7 failed".to_string()));
        }
        world.images.insert(request.image.to_string());
        Ok(())
    }

    async fn tag_image(&self, source: &ImageRef, target: &ImageRef) -> Result<(), ImageError> {
        let mut world = self.world.lock();
        if !world.images.contains(&source.to_string()) {
            return Err(ImageError::NotFound(source.to_string()));
        }
        world.images.insert(target.to_string());
        Ok(())
    }
}

#[async_trait]
impl ContainerOps for FakeRuntime {
    async fn create_container(
        &self,
        config: &ContainerConfig,
    ) -> Result<ContainerId, ContainerError> {
        let mut world = self.world.lock();
        world.calls.push(format!("create {}", config.name));
        if world.container(&config.name).is_some() {
            return Err(ContainerError::AlreadyExists(config.name.clone()));
        }
        world.next_id += 1;
        let id = ContainerId::new(format!("c{}", world.next_id));
        let healthy = world.new_containers_healthy;
        world.containers.push(FakeContainer {
            id: id.clone(),
            name: config.name.clone(),
            image: config.image.to_string(),
            labels: config.labels.clone(),
            running: false,
            healthy,
        });
        Ok(id)
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), ContainerError> {
        let mut world = self.world.lock();
        world.calls.push(format!("start {}", id));
        let container = world
            .containers
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        container.running = true;
        let in_slot = container.labels.contains_key("switchyard.slot");
        if in_slot && let Some((path, content)) = &world.write_on_start {
            std::fs::write(path, content).unwrap();
        }
        Ok(())
    }

    async fn stop_container(
        &self,
        id: &ContainerId,
        _timeout: Duration,
    ) -> Result<(), ContainerError> {
        let mut world = self.world.lock();
        let container = world
            .containers
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        if !container.running {
            return Err(ContainerError::NotRunning(id.to_string()));
        }
        container.running = false;
        let name = container.name.clone();
        world.calls.push(format!("stop {}", name));
        Ok(())
    }

    async fn remove_container(&self, id: &ContainerId, _force: bool) -> Result<(), ContainerError> {
        let mut world = self.world.lock();
        let index = world
            .containers
            .iter()
            .position(|c| &c.id == id || c.name == id.as_str())
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        let removed = world.containers.remove(index);
        world.calls.push(format!("remove {}", removed.name));
        Ok(())
    }

    async fn list_containers(
        &self,
        filters: &ContainerFilters,
    ) -> Result<Vec<ContainerSummary>, ContainerError> {
        let world = self.world.lock();
        Ok(world
            .containers
            .iter()
            .filter(|c| filters.all || c.running)
            .filter(|c| {
                filters
                    .labels
                    .iter()
                    .all(|(k, v)| c.labels.get(k) == Some(v))
            })
            .map(FakeContainer::summary)
            .collect())
    }

    async fn wait_container(&self, id: &ContainerId) -> Result<i64, ContainerError> {
        let (code, hangs) = {
            let mut world = self.world.lock();
            world.calls.push(format!("wait {}", id));
            (world.test_exit_code, world.test_hangs)
        };
        if hangs {
            std::future::pending::<()>().await;
        }
        Ok(code)
    }
}

#[async_trait]
impl LogOps for FakeRuntime {
    async fn container_logs(
        &self,
        id: &ContainerId,
        _opts: &LogOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<LogLine, LogError>> + Send>>, LogError> {
        let line = LogLine {
            content: format!("{}: listening on :8080", id),
            stream: LogStream::Stdout,
        };
        Ok(Box::pin(futures::stream::iter(vec![Ok(line)])))
    }
}

/// Reads the slot out of the live config on every reload, like a real proxy.
pub struct FakeProxy {
    world: SharedWorld,
    config_path: PathBuf,
}

#[async_trait]
impl ProxyOps for FakeProxy {
    async fn validate(&self, config_path: &Path) -> Result<(), ProxyError> {
        if self.world.lock().fail_validate {
            return Err(ProxyError::Invalid("unknown directive \"upstreem\"".to_string()));
        }
        let content = std::fs::read_to_string(config_path)
            .map_err(|e| ProxyError::Invalid(e.to_string()))?;
        if parse_slot(&content).is_none() {
            return Err(ProxyError::Invalid("no upstream slot".to_string()));
        }
        Ok(())
    }

    async fn reload(&self) -> Result<(), ProxyError> {
        let mut world = self.world.lock();
        world.reload_count += 1;
        if world.fail_reload {
            return Err(ProxyError::ReloadFailed("signal process failed".to_string()));
        }
        let content = std::fs::read_to_string(&self.config_path)
            .map_err(|e| ProxyError::ReloadFailed(e.to_string()))?;
        world.proxy_slot = parse_slot(&content);
        Ok(())
    }
}

fn parse_slot(content: &str) -> Option<Slot> {
    content.lines().find_map(|line| {
        match line.trim().strip_prefix("# slot=")? {
            "blue" => Some(Slot::Blue),
            "green" => Some(Slot::Green),
            _ => None,
        }
    })
}

/// Answers slot URLs from the container in that slot, and the public URL
/// from whatever slot the proxy currently routes to.
pub struct FakeProbe {
    world: SharedWorld,
}

impl FakeProbe {
    fn answer(world: &World, slot: Option<Slot>) -> u16 {
        let Some(slot) = slot else {
            return 502;
        };
        match world.slot_container(slot) {
            Some(c) if c.running && c.healthy => 200,
            Some(c) if c.running => 503,
            _ => 502,
        }
    }
}

#[async_trait]
impl Probe for FakeProbe {
    async fn probe(&self, target: &ProbeTarget) -> ProbeResult {
        let mut world = self.world.lock();
        if target.url == PUBLIC_URL
            && let Some(path) = world.block_on_public.take()
        {
            std::fs::remove_file(&path).unwrap();
            std::fs::create_dir_all(path.join("occupied")).unwrap();
        }
        let (status, routed) = if target.url == PUBLIC_URL {
            match world.proxy_slot {
                Some(slot) if world.public_broken_for == Some(slot) => (502, None),
                routed => (Self::answer(&world, routed), routed),
            }
        } else {
            let slot = world.slot_urls.get(&target.url).copied();
            (Self::answer(&world, slot), slot)
        };
        // The proxy template adds the slot header; containers do not.
        let served_by = match (target.slot_header.as_ref(), routed) {
            (Some(_), Some(slot)) if target.url == PUBLIC_URL && status != 502 => {
                Some(slot.as_str().to_string())
            }
            _ => None,
        };
        ProbeResult {
            timestamp: Utc::now(),
            success: target.accepts(status, served_by.as_deref()),
            latency: Duration::from_millis(3),
            raw_status: status.to_string(),
            served_by,
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
    pub fail: bool,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().push(notification.clone());
        if self.fail {
            return Err(NotifyError::Config("webhook unreachable".to_string()));
        }
        Ok(())
    }
}

/// A project directory with a config, a proxy template and fakes wired together.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub config: Config,
    pub environment: EnvironmentName,
    pub world: SharedWorld,
    pub runtime: FakeRuntime,
    pub proxy: FakeProxy,
    pub probe: FakeProbe,
    pub notifier: RecordingNotifier,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_extra_yaml("")
    }

    /// `extra` is appended to the generated config.
    pub fn with_extra_yaml(extra: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("app")).unwrap();
        std::fs::write(root.join("app/Dockerfile"), "FROM scratch\n").unwrap();
        std::fs::create_dir_all(root.join("proxy")).unwrap();
        std::fs::write(
            root.join("proxy/lnapi.conf.tmpl"),
            "# slot={{slot}}\nupstream lnapi { server {{upstream}}; } # {{version}}\n",
        )
        .unwrap();
        std::fs::create_dir_all(root.join("data")).unwrap();
        std::fs::write(root.join("data/app.db"), "rows v1").unwrap();

        let yaml = format!(
            r#"
service: lnapi
image: registry.example.com/lnapi
build:
  context: {root}/app
health:
  path: /health
  interval: 5s
  timeout: 60s
  success_threshold: 1
proxy:
  config_path: {root}/proxy/lnapi.conf
  template: {root}/proxy/lnapi.conf.tmpl
  public_url: {public}
  slot_header: {header}
  verify_attempts: 3
  verify_interval: 1s
backup:
  paths:
    - {root}/data/app.db
  dir: {root}/backups
  retain_count: 2
cleanup:
  grace_period: 0s
state_dir: {root}/state
{extra}"#,
            root = root.display(),
            public = PUBLIC_URL,
            header = SLOT_HEADER,
            extra = extra,
        );
        let config = Config::from_yaml(&yaml).unwrap();
        let environment = EnvironmentName::new("production").unwrap();
        let config = config.for_environment(&environment).unwrap();

        let world = Arc::new(Mutex::new(World {
            new_containers_healthy: true,
            ..World::default()
        }));
        {
            let mut w = world.lock();
            for slot in [Slot::Blue, Slot::Green] {
                w.slot_urls.insert(slot_target(&config, slot).url, slot);
            }
        }

        Self {
            runtime: FakeRuntime {
                world: world.clone(),
            },
            proxy: FakeProxy {
                world: world.clone(),
                config_path: config.proxy.config_path.clone(),
            },
            probe: FakeProbe {
                world: world.clone(),
            },
            notifier: RecordingNotifier::default(),
            dir,
            config,
            environment,
            world,
        }
    }

    pub async fn deploy(&self, request: &DeployRequest) -> Result<DeployReport, DeployError> {
        self.deploy_with(request, CancelSignal::never()).await
    }

    pub async fn deploy_with(
        &self,
        request: &DeployRequest,
        cancel: CancelSignal,
    ) -> Result<DeployReport, DeployError> {
        let controller = DeploymentController::new(
            &self.config,
            &self.environment,
            &self.runtime,
            &self.probe,
            &self.proxy,
            &self.notifier,
        )
        .unwrap();
        controller.run(request, cancel).await
    }

    pub fn slot_container_name(&self, slot: Slot) -> String {
        container_name(&self.config.service, &self.environment, slot)
    }

    pub fn live_config(&self) -> String {
        std::fs::read_to_string(&self.config.proxy.config_path).unwrap_or_default()
    }

    pub fn state_dir(&self) -> PathBuf {
        self.config.state_dir_for(&self.environment)
    }
}
