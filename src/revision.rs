//! Revision object model
//!
//! A revision is the packaged description of what to deploy: an
//! `appspec.yml`, hook scripts, and files to place on the instance. Two
//! variants exist: a trivial hello-world revision for smoke-testing a
//! deployment group, and a docker-compose revision that ships a compose
//! file plus the hooks to stop, pull, and start the composition.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use tempfile::{NamedTempFile, TempDir};
use tracing::debug;

/// Base directory on the instance for compose deployments.
const COMPOSE_ROOT: &str = "/etc/docker-compose";

/// Default hook timeout in seconds
pub const DEFAULT_HOOK_TIMEOUT: u32 = 300;

/// Lifecycle events a hook can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    ApplicationStop,
    BeforeInstall,
    AfterInstall,
    ApplicationStart,
}

impl HookEvent {
    /// All events, in appspec order.
    pub const ALL: [HookEvent; 4] = [
        HookEvent::ApplicationStop,
        HookEvent::BeforeInstall,
        HookEvent::AfterInstall,
        HookEvent::ApplicationStart,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApplicationStop => "ApplicationStop",
            Self::BeforeInstall => "BeforeInstall",
            Self::AfterInstall => "AfterInstall",
            Self::ApplicationStart => "ApplicationStart",
        }
    }
}

/// A script hook: an event, a script name, and the script content.
#[derive(Debug, Clone)]
pub struct Hook {
    pub event: HookEvent,
    pub name: String,
    pub content: String,
    pub timeout_secs: u32,
    pub runas: String,
}

impl Hook {
    fn new(event: HookEvent, name: &str, content: String, timeout_secs: u32) -> Self {
        Self {
            event,
            name: name.to_string(),
            content,
            timeout_secs,
            runas: "root".to_string(),
        }
    }
}

/// appspec.yml document
#[derive(Debug, Serialize)]
pub struct AppSpec {
    version: f64,
    os: &'static str,
    hooks: BTreeMap<&'static str, Vec<AppSpecHook>>,
    files: Vec<AppSpecFile>,
}

#[derive(Debug, Serialize)]
struct AppSpecHook {
    location: String,
    timeout: u32,
    runas: String,
}

#[derive(Debug, Serialize)]
struct AppSpecFile {
    source: String,
    destination: String,
}

/// A deployable revision. Closed set of variants; adding a new revision kind
/// means adding a variant here, not subclassing anything.
#[derive(Debug)]
pub enum Revision {
    /// Smoke-test revision; echoes "hello world" after install.
    HelloWorld,
    /// Ships a docker-compose file and the hooks to run it.
    DockerCompose(DockerComposeRevision),
}

/// Revision built from a docker-compose file.
///
/// Only compose files with a single service are supported; the start hook
/// runs exactly one service in the foreground.
#[derive(Debug)]
pub struct DockerComposeRevision {
    deployment_group: String,
    services: BTreeMap<String, serde_yaml::Value>,
    hook_timeout_secs: u32,
}

impl DockerComposeRevision {
    /// Parse and validate a compose document.
    pub fn parse(deployment_group: &str, compose_yaml: &str, hook_timeout_secs: u32) -> Result<Self> {
        let services: BTreeMap<String, serde_yaml::Value> =
            serde_yaml::from_str(compose_yaml).context("Failed to parse compose file")?;

        if services.len() != 1 {
            bail!(
                "compose file must define exactly one service, found {}",
                services.len()
            );
        }

        Ok(Self {
            deployment_group: deployment_group.to_string(),
            services,
            hook_timeout_secs,
        })
    }

    /// Docker images referenced by the compose services.
    pub fn images(&self) -> BTreeSet<String> {
        self.services
            .values()
            .filter_map(|service| service.get("image"))
            .filter_map(|image| image.as_str())
            .map(str::to_string)
            .collect()
    }

    /// Service names.
    pub fn services(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }

    fn compose_dir(&self) -> String {
        format!("{COMPOSE_ROOT}/{}", self.deployment_group)
    }

    fn hooks(&self) -> Vec<Hook> {
        let dir = self.compose_dir();

        let stop = Hook::new(
            HookEvent::ApplicationStop,
            "stop_and_remove",
            format!(
                "#!/bin/bash\n\n\
                 mkdir -p {dir}\n\
                 cd {dir}\n\
                 test -r docker-compose.yml && docker-compose stop || /bin/true\n\
                 test -r docker-compose.yml && docker-compose rm -f || /bin/true\n"
            ),
            self.hook_timeout_secs,
        );

        let pulls: String = self
            .images()
            .iter()
            .map(|image| format!("docker pull {image}\n"))
            .collect();
        let pull = Hook::new(
            HookEvent::BeforeInstall,
            "pull_images",
            format!("#!/bin/bash\n\nmkdir -p {dir}\n\n{pulls}"),
            self.hook_timeout_secs,
        );

        let service = self.services()[0].to_string();
        let start = Hook::new(
            HookEvent::ApplicationStart,
            "docker-compose",
            format!("#!/bin/bash\n\ncd {dir}\ndocker-compose run --rm {service}\n"),
            self.hook_timeout_secs,
        );

        vec![stop, pull, start]
    }

    fn files(&self) -> Result<BTreeMap<String, String>> {
        let content =
            serde_yaml::to_string(&self.services).context("Failed to render compose file")?;
        let destination = format!("{}/docker-compose.yml", self.compose_dir());
        Ok(BTreeMap::from([(destination, content)]))
    }
}

impl Revision {
    /// Script hooks for this revision.
    pub fn hooks(&self) -> Vec<Hook> {
        match self {
            Revision::HelloWorld => vec![Hook::new(
                HookEvent::AfterInstall,
                "echo_hello_world",
                "#!/bin/bash\n\necho hello world\n".to_string(),
                DEFAULT_HOOK_TIMEOUT,
            )],
            Revision::DockerCompose(compose) => compose.hooks(),
        }
    }

    /// Files to place on the instance: destination path -> content.
    pub fn files(&self) -> Result<BTreeMap<String, String>> {
        match self {
            Revision::HelloWorld => Ok(BTreeMap::new()),
            Revision::DockerCompose(compose) => compose.files(),
        }
    }

    /// Build the appspec document for this revision.
    pub fn appspec(&self) -> Result<AppSpec> {
        let hooks = self.hooks();
        let files = self.files()?;

        Ok(AppSpec {
            version: 0.0,
            os: "linux",
            hooks: HookEvent::ALL
                .iter()
                .map(|event| {
                    let entries = hooks
                        .iter()
                        .filter(|hook| hook.event == *event)
                        .map(|hook| AppSpecHook {
                            location: format!("scripts/{}", hook.name),
                            timeout: hook.timeout_secs,
                            runas: hook.runas.clone(),
                        })
                        .collect();
                    (event.as_str(), entries)
                })
                .collect(),
            files: files
                .keys()
                .map(|destination| AppSpecFile {
                    source: format!("files/{}", basename(destination)),
                    destination: dirname(destination),
                })
                .collect(),
        })
    }

    /// Write the revision bundle layout into `dir`.
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        let scripts_dir = dir.join("scripts");
        let files_dir = dir.join("files");
        fs::create_dir_all(&scripts_dir).context("Failed to create scripts dir")?;
        fs::create_dir_all(&files_dir).context("Failed to create files dir")?;

        let appspec =
            serde_yaml::to_string(&self.appspec()?).context("Failed to render appspec")?;
        fs::write(dir.join("appspec.yml"), appspec).context("Failed to write appspec.yml")?;

        for hook in self.hooks() {
            let path = scripts_dir.join(&hook.name);
            fs::write(&path, &hook.content)
                .with_context(|| format!("Failed to write hook script {}", hook.name))?;
            make_executable(&path)?;
        }

        for (destination, content) in self.files()? {
            fs::write(files_dir.join(basename(&destination)), content)
                .with_context(|| format!("Failed to write revision file for {destination}"))?;
        }

        Ok(())
    }

    /// Build the revision in a temporary directory and pack it into a
    /// gzipped tar bundle. The returned handle deletes the bundle on drop.
    pub fn bundle(&self) -> Result<NamedTempFile> {
        let staging = TempDir::new().context("Failed to create staging dir")?;
        self.write_to(staging.path())?;

        let bundle = tempfile::Builder::new()
            .prefix("revision-")
            .suffix(".tar.gz")
            .tempfile()
            .context("Failed to create bundle file")?;

        let encoder = GzEncoder::new(
            bundle.reopen().context("Failed to reopen bundle file")?,
            Compression::default(),
        );
        let mut builder = tar::Builder::new(encoder);
        builder
            .append_path_with_name(staging.path().join("appspec.yml"), "appspec.yml")
            .context("Failed to add appspec.yml to bundle")?;
        builder
            .append_dir_all("scripts", staging.path().join("scripts"))
            .context("Failed to add scripts to bundle")?;
        builder
            .append_dir_all("files", staging.path().join("files"))
            .context("Failed to add files to bundle")?;

        let encoder = builder.into_inner().context("Failed to finish bundle")?;
        encoder
            .finish()
            .and_then(|mut file| file.flush())
            .context("Failed to flush bundle")?;

        debug!(path = %bundle.path().display(), "Packed revision bundle");

        Ok(bundle)
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn dirname(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("Failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
