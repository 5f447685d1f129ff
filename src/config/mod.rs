// ABOUTME: Configuration types and parsing for switchyard.yml.
// ABOUTME: Handles YAML parsing, per-environment overrides and env var overrides.

mod deserialize;
mod env_value;
mod healthcheck;
mod init;
mod stop;

pub use env_value::{EnvValue, resolve_env_map};
pub use healthcheck::HealthcheckConfig;
pub use init::init_config;
pub use stop::StopConfig;

use crate::error::{Error, Result};
use crate::runtime::RuntimeConfig;
use crate::types::{EnvironmentName, ImageRef, ServiceName, Slot};
use deserialize::{deserialize_command, deserialize_image_ref};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "switchyard.yml";
pub const CONFIG_FILENAME_ALT: &str = "switchyard.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".switchyard/config.yml";

pub const ENV_HEALTH_CHECK_INTERVAL: &str = "SWITCHYARD_HEALTH_CHECK_INTERVAL";
pub const ENV_HEALTH_CHECK_TIMEOUT: &str = "SWITCHYARD_HEALTH_CHECK_TIMEOUT";
pub const ENV_SUCCESS_THRESHOLD: &str = "SWITCHYARD_SUCCESS_THRESHOLD";
pub const ENV_BACKUP_RETAIN_COUNT: &str = "SWITCHYARD_BACKUP_RETAIN_COUNT";
pub const ENV_DEPLOY_LOCK_PATH: &str = "SWITCHYARD_DEPLOY_LOCK_PATH";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceName,

    /// Repository the candidate images are tagged into. The tag part is ignored.
    #[serde(deserialize_with = "deserialize_image_ref")]
    pub image: ImageRef,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub test: TestConfig,

    #[serde(default)]
    pub slots: SlotsConfig,

    #[serde(default, alias = "healthcheck")]
    pub health: HealthcheckConfig,

    pub proxy: ProxyConfig,

    #[serde(default)]
    pub backup: BackupConfig,

    #[serde(default)]
    pub notify: Option<NotifyConfig>,

    #[serde(default)]
    pub env: HashMap<String, EnvValue>,

    #[serde(default)]
    pub volumes: Vec<String>,

    #[serde(default, deserialize_with = "deserialize_command")]
    pub command: Option<Vec<String>>,

    #[serde(default)]
    pub network: Option<String>,

    #[serde(default)]
    pub stop: StopConfig,

    #[serde(default)]
    pub cleanup: CleanupConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub deploy_lock_path: Option<PathBuf>,

    #[serde(default)]
    pub on_failure: OnFailure,

    #[serde(default)]
    pub environments: HashMap<String, EnvironmentConfig>,
}

/// Where the candidate image is built from.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    #[serde(default = "default_context")]
    pub context: PathBuf,

    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,

    /// Build a git revision of `context` instead of its working tree.
    #[serde(default)]
    pub rev: Option<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            context: default_context(),
            dockerfile: default_dockerfile(),
            rev: None,
        }
    }
}

fn default_context() -> PathBuf {
    PathBuf::from(".")
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

/// Smoke test run against the built image before it is started in a slot.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestConfig {
    #[serde(default, deserialize_with = "deserialize_command")]
    pub command: Option<Vec<String>>,

    #[serde(default = "default_test_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for TestConfig {
    fn default() -> Self {
        TestConfig {
            command: None,
            timeout: default_test_timeout(),
        }
    }
}

fn default_test_timeout() -> Duration {
    Duration::from_secs(300)
}

/// Host ports the two slots publish the service on.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlotsConfig {
    #[serde(default = "default_host_ip")]
    pub host_ip: String,

    #[serde(default = "default_blue_port")]
    pub blue_port: u16,

    #[serde(default = "default_green_port")]
    pub green_port: u16,

    #[serde(default = "default_container_port")]
    pub container_port: u16,
}

impl SlotsConfig {
    pub fn port(&self, slot: Slot) -> u16 {
        match slot {
            Slot::Blue => self.blue_port,
            Slot::Green => self.green_port,
        }
    }

    /// `host:port` the slot is reachable on from this host.
    pub fn address(&self, slot: Slot) -> String {
        format!("{}:{}", self.host_ip, self.port(slot))
    }
}

impl Default for SlotsConfig {
    fn default() -> Self {
        SlotsConfig {
            host_ip: default_host_ip(),
            blue_port: default_blue_port(),
            green_port: default_green_port(),
            container_port: default_container_port(),
        }
    }
}

fn default_host_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_blue_port() -> u16 {
    8081
}

fn default_green_port() -> u16 {
    8082
}

fn default_container_port() -> u16 {
    8080
}

/// Reverse proxy in front of the slots.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    /// Live proxy configuration file, rewritten on cutover.
    pub config_path: PathBuf,

    /// Template rendered into `config_path`.
    pub template: PathBuf,

    #[serde(default = "default_validate_command")]
    pub validate_command: String,

    #[serde(default = "default_reload_command")]
    pub reload_command: String,

    /// Public URL used to verify which slot serves traffic.
    pub public_url: String,

    #[serde(default)]
    pub public_host: Option<String>,

    /// Response header naming the slot that served a request.
    #[serde(default)]
    pub slot_header: Option<String>,

    #[serde(default = "default_verify_attempts")]
    pub verify_attempts: u32,

    #[serde(default = "default_verify_interval", with = "humantime_serde")]
    pub verify_interval: Duration,
}

fn default_validate_command() -> String {
    "nginx -t -c {config}".to_string()
}

fn default_reload_command() -> String {
    "nginx -s reload".to_string()
}

fn default_verify_attempts() -> u32 {
    3
}

fn default_verify_interval() -> Duration {
    Duration::from_secs(2)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    /// Files and directories snapshotted before each deployment.
    #[serde(default)]
    pub paths: Vec<PathBuf>,

    #[serde(default = "default_backup_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_retain_count")]
    pub retain_count: usize,

    /// Refuse to start a candidate without a fresh snapshot.
    #[serde(default = "default_true")]
    pub required: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        BackupConfig {
            paths: Vec::new(),
            dir: default_backup_dir(),
            retain_count: default_retain_count(),
            required: true,
        }
    }
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from(".switchyard/backups")
}

fn default_retain_count() -> usize {
    5
}

fn default_true() -> bool {
    true
}

/// Webhook receiving one message per finished deployment.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotifyConfig {
    pub url: EnvValue,

    /// Extra JSON fields sent with the message (e.g. `chat_id`).
    #[serde(default)]
    pub extra: HashMap<String, EnvValue>,

    #[serde(default = "default_notify_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_notify_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_grace_period", with = "humantime_serde")]
    pub grace_period: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        CleanupConfig {
            grace_period: default_grace_period(),
        }
    }
}

fn default_grace_period() -> Duration {
    Duration::from_secs(30)
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".switchyard/state")
}

/// What happens to a candidate that failed its health check or cutover.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnFailure {
    /// Stop the candidate and keep the previous release live.
    #[default]
    Rollback,
    /// Keep the previous release live but leave the candidate running for inspection.
    KeepCandidate,
}

/// Per-environment overrides. Maps are merged, everything else replaces.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub env: HashMap<String, EnvValue>,

    #[serde(default)]
    pub slots: Option<SlotsConfig>,

    #[serde(default, alias = "healthcheck")]
    pub health: Option<HealthcheckConfig>,

    #[serde(default)]
    pub proxy: Option<ProxyConfig>,

    #[serde(default)]
    pub backup: Option<BackupConfig>,

    #[serde(default)]
    pub notify: Option<NotifyConfig>,

    #[serde(default)]
    pub test: Option<TestConfig>,

    #[serde(default)]
    pub on_failure: Option<OnFailure>,
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file. Relative paths inside it resolve against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                // .switchyard/config.yml lives one level below the project root,
                // so every candidate resolves against `dir`.
                let mut config = Self::from_yaml(&std::fs::read_to_string(path)?)?;
                config.resolve_paths(dir);
                return Ok(config);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Merge the overrides of `environment` into the base config.
    ///
    /// A config without an `environments` section accepts any environment
    /// name; otherwise the name must be listed.
    pub fn for_environment(&self, environment: &EnvironmentName) -> Result<Config> {
        let mut merged = self.clone();
        if self.environments.is_empty() {
            return Ok(merged);
        }

        let overrides = self
            .environments
            .get(environment.as_str())
            .ok_or_else(|| Error::UnknownEnvironment(environment.to_string()))?;

        for (k, v) in &overrides.env {
            merged.env.insert(k.clone(), v.clone());
        }
        if let Some(ref slots) = overrides.slots {
            merged.slots = slots.clone();
        }
        if let Some(ref health) = overrides.health {
            merged.health = health.clone();
        }
        if let Some(ref proxy) = overrides.proxy {
            merged.proxy = proxy.clone();
        }
        if let Some(ref backup) = overrides.backup {
            merged.backup = backup.clone();
        }
        if overrides.notify.is_some() {
            merged.notify = overrides.notify.clone();
        }
        if let Some(ref test) = overrides.test {
            merged.test = test.clone();
        }
        if let Some(on_failure) = overrides.on_failure {
            merged.on_failure = on_failure;
        }

        merged.validate()?;
        Ok(merged)
    }

    /// Apply `SWITCHYARD_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(secs) = read_env_number::<u64>(ENV_HEALTH_CHECK_INTERVAL)? {
            self.health.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = read_env_number::<u64>(ENV_HEALTH_CHECK_TIMEOUT)? {
            self.health.timeout = Duration::from_secs(secs);
        }
        if let Some(threshold) = read_env_number::<u32>(ENV_SUCCESS_THRESHOLD)? {
            self.health.success_threshold = threshold;
        }
        if let Some(retain) = read_env_number::<usize>(ENV_BACKUP_RETAIN_COUNT)? {
            self.backup.retain_count = retain;
        }
        if let Ok(path) = std::env::var(ENV_DEPLOY_LOCK_PATH)
            && !path.is_empty()
        {
            self.deploy_lock_path = Some(PathBuf::from(path));
        }
        self.validate()
    }

    /// Directory holding slot state and history for one environment.
    pub fn state_dir_for(&self, environment: &EnvironmentName) -> PathBuf {
        self.state_dir
            .join(format!("{}-{}", self.service, environment))
    }

    pub fn lock_path_for(&self, environment: &EnvironmentName) -> PathBuf {
        self.deploy_lock_path
            .clone()
            .unwrap_or_else(|| self.state_dir_for(environment).join("deploy.lock"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.slots.blue_port == self.slots.green_port {
            return Err(Error::InvalidConfig(
                "slots.blue_port and slots.green_port must differ".to_string(),
            ));
        }
        if self.health.success_threshold == 0 {
            return Err(Error::InvalidConfig(
                "health.success_threshold must be at least 1".to_string(),
            ));
        }
        if self.health.interval.is_zero() {
            return Err(Error::InvalidConfig(
                "health.interval must be greater than zero".to_string(),
            ));
        }
        if self.proxy.verify_attempts == 0 {
            return Err(Error::InvalidConfig(
                "proxy.verify_attempts must be at least 1".to_string(),
            ));
        }
        if !self.proxy.public_url.starts_with("http://") {
            return Err(Error::InvalidConfig(format!(
                "proxy.public_url must be an http:// URL: {}",
                self.proxy.public_url
            )));
        }
        for volume in &self.volumes {
            if crate::runtime::VolumeMount::parse(volume).is_none() {
                return Err(Error::InvalidConfig(format!("invalid volume: {}", volume)));
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        join(&mut self.build.context);
        join(&mut self.state_dir);
        join(&mut self.backup.dir);
        join(&mut self.proxy.config_path);
        join(&mut self.proxy.template);
        self.backup.paths.iter_mut().for_each(join);
        if let Some(ref mut path) = self.deploy_lock_path {
            join(path);
        }
        for overrides in self.environments.values_mut() {
            if let Some(ref mut backup) = overrides.backup {
                join(&mut backup.dir);
                backup.paths.iter_mut().for_each(join);
            }
            if let Some(ref mut proxy) = overrides.proxy {
                join(&mut proxy.config_path);
                join(&mut proxy.template);
            }
        }
    }
}

fn read_env_number<T>(var: &'static str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::InvalidEnvOverride {
                var,
                message: e.to_string(),
            }),
        _ => Ok(None),
    }
}
