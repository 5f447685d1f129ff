// ABOUTME: Builds and tags candidate images from a working tree or git commit.
// ABOUTME: Also runs the optional smoke test in a throwaway container.

use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

use crate::config::BuildConfig;
use crate::runtime::{
    BuildRequest, ContainerConfig, ContainerError, ContainerOps, ImageError, ImageOps, LogOps,
    RestartPolicyConfig, tail_logs,
};
use crate::types::{ContainerId, ImageRef, VersionTag};

/// Directories never sent as build context.
const EXCLUDED_DIRS: &[&str] = &[".git", ".switchyard"];

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("git {args} failed: {message}")]
    Git { args: String, message: String },

    #[error("failed to archive build context {path}: {source}")]
    Context {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Image(#[from] ImageError),
}

/// What to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    /// The directory as it is on disk, uncommitted changes included.
    WorkingTree(PathBuf),
    /// A committed revision of a git repository.
    Commit { repo: PathBuf, rev: String },
}

impl SourceRef {
    pub fn from_config(build: &BuildConfig) -> Self {
        match &build.rev {
            Some(rev) => SourceRef::Commit {
                repo: build.context.clone(),
                rev: rev.clone(),
            },
            None => SourceRef::WorkingTree(build.context.clone()),
        }
    }
}

/// The image a build produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltImage {
    pub version_tag: VersionTag,
    pub image: ImageRef,
}

pub struct ImageBuilder<'a, R> {
    runtime: &'a R,
    repository: &'a ImageRef,
    dockerfile: &'a str,
}

impl<'a, R: ImageOps> ImageBuilder<'a, R> {
    pub fn new(runtime: &'a R, repository: &'a ImageRef, dockerfile: &'a str) -> Self {
        Self {
            runtime,
            repository,
            dockerfile,
        }
    }

    /// Build `source`, tag it `<repository>:<version>` and `<repository>:latest`.
    pub async fn build(&self, source: &SourceRef) -> Result<BuiltImage, BuildError> {
        let (context, commit) = match source {
            SourceRef::WorkingTree(dir) => {
                // A working tree outside git still builds, just without a commit suffix.
                let commit = match git(dir, &["rev-parse", "--short", "HEAD"]).await {
                    Ok(out) => Some(String::from_utf8_lossy(&out).trim().to_string()),
                    Err(e) => {
                        tracing::debug!("no commit for build context: {}", e);
                        None
                    }
                };
                (archive_working_tree(dir).await?, commit)
            }
            SourceRef::Commit { repo, rev } => {
                let short = git(repo, &["rev-parse", "--short", rev]).await?;
                let archive = git(repo, &["archive", "--format=tar", rev]).await?;
                (
                    Bytes::from(archive),
                    Some(String::from_utf8_lossy(&short).trim().to_string()),
                )
            }
        };

        let version_tag = VersionTag::generate(Utc::now(), commit.as_deref());
        let image = self.repository.for_version(&version_tag);
        tracing::info!(image = %image, context_bytes = context.len(), "building image");

        self.runtime
            .build_image(&BuildRequest {
                context,
                dockerfile: self.dockerfile.to_string(),
                image: image.clone(),
            })
            .await?;
        self.runtime
            .tag_image(&image, &self.repository.with_tag("latest"))
            .await?;

        Ok(BuiltImage { version_tag, image })
    }
}

async fn git(dir: &Path, args: &[&str]) -> Result<Vec<u8>, BuildError> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .await
        .map_err(|e| BuildError::Git {
            args: args.join(" "),
            message: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(BuildError::Git {
            args: args.join(" "),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}

async fn archive_working_tree(dir: &Path) -> Result<Bytes, BuildError> {
    let root = dir.to_path_buf();
    let result = tokio::task::spawn_blocking(move || {
        let mut builder = tar::Builder::new(Vec::new());
        builder.follow_symlinks(false);
        append_tree(&mut builder, &root, Path::new(""))?;
        builder.into_inner()
    })
    .await
    .map_err(|e| BuildError::Context {
        path: dir.to_path_buf(),
        source: std::io::Error::other(e),
    })?;

    result.map(Bytes::from).map_err(|source| BuildError::Context {
        path: dir.to_path_buf(),
        source,
    })
}

fn append_tree(
    builder: &mut tar::Builder<Vec<u8>>,
    root: &Path,
    relative: &Path,
) -> std::io::Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(root.join(relative))?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name();
        if relative.as_os_str().is_empty()
            && EXCLUDED_DIRS.iter().any(|d| name == std::ffi::OsStr::new(d))
        {
            continue;
        }
        let rel = relative.join(&name);
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            builder.append_dir(&rel, entry.path())?;
            append_tree(builder, root, &rel)?;
        } else {
            builder.append_path_with_name(entry.path(), &rel)?;
        }
    }
    Ok(())
}

/// Smoke test settings.
#[derive(Debug, Clone)]
pub struct SmokeTest<'a> {
    pub container_name: String,
    pub image: &'a ImageRef,
    pub command: &'a [String],
    pub env: HashMap<String, String>,
    pub timeout: Duration,
}

/// Run the smoke test command in an unpublished container and remove it afterwards.
/// Returns a description of the failure when the command exits non-zero or times out.
pub async fn run_smoke_test<R>(runtime: &R, test: &SmokeTest<'_>) -> Result<(), String>
where
    R: ContainerOps + LogOps,
{
    // A container left behind by an interrupted run would block the name.
    let stale = ContainerId::new(test.container_name.clone());
    match runtime.remove_container(&stale, true).await {
        Ok(()) | Err(ContainerError::NotFound(_)) => {}
        Err(e) => tracing::debug!("could not remove stale test container: {}", e),
    }

    let config = ContainerConfig {
        name: test.container_name.clone(),
        image: test.image.clone(),
        env: test.env.clone(),
        labels: HashMap::new(),
        ports: Vec::new(),
        volumes: Vec::new(),
        command: Some(test.command.to_vec()),
        restart_policy: RestartPolicyConfig::No,
        stop_timeout: None,
        network: None,
    };

    let id = runtime
        .create_container(&config)
        .await
        .map_err(|e| format!("failed to create test container: {}", e))?;

    let outcome = run_to_completion(runtime, &id, test.timeout).await;

    if outcome.is_err() {
        match tail_logs(runtime, &id, 20).await {
            Ok(lines) => {
                for line in lines {
                    tracing::warn!(target: "switchyard::smoke_test", "{}", line.content.trim_end());
                }
            }
            Err(e) => tracing::debug!("failed to read test container logs: {}", e),
        }
    }

    if let Err(e) = runtime.remove_container(&id, true).await {
        tracing::warn!(container = %id, "failed to remove test container: {}", e);
    }

    outcome
}

async fn run_to_completion<R: ContainerOps>(
    runtime: &R,
    id: &ContainerId,
    timeout: Duration,
) -> Result<(), String> {
    runtime
        .start_container(id)
        .await
        .map_err(|e| format!("failed to start test container: {}", e))?;

    match tokio::time::timeout(timeout, runtime.wait_container(id)).await {
        Ok(Ok(0)) => Ok(()),
        Ok(Ok(code)) => Err(format!("test command exited with code {}", code)),
        Ok(Err(e)) => Err(format!("failed waiting for test container: {}", e)),
        Err(_) => {
            let _ = runtime.stop_container(id, Duration::from_secs(1)).await;
            Err(format!("test command timed out after {}s", timeout.as_secs()))
        }
    }
}
