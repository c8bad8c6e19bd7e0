//! Integration tests for revision bundle layout
//!
//! These write real bundles into temporary directories and inspect what
//! lands on disk and inside the packed archive.

use std::collections::BTreeSet;
use std::io::Read;

use anyhow::Result;
use flate2::read::GzDecoder;
use tempfile::TempDir;

use compose_deploy::revision::{DockerComposeRevision, Revision};

const COMPOSE_YAML: &str = "\
web:
  image: nginx:1.25
  ports:
    - \"80:80\"
";

fn compose_revision() -> Result<Revision> {
    Ok(Revision::DockerCompose(DockerComposeRevision::parse(
        "app",
        COMPOSE_YAML,
        120,
    )?))
}

#[test]
fn hello_world_layout_on_disk() -> Result<()> {
    let dir = TempDir::new()?;
    Revision::HelloWorld.write_to(dir.path())?;

    let appspec = std::fs::read_to_string(dir.path().join("appspec.yml"))?;
    assert!(appspec.contains("os: linux"));
    assert!(appspec.contains("scripts/echo_hello_world"));

    let script = std::fs::read_to_string(dir.path().join("scripts/echo_hello_world"))?;
    assert!(script.starts_with("#!/bin/bash"));
    assert!(script.contains("echo hello world"));

    // No revision files for the smoke test
    assert_eq!(std::fs::read_dir(dir.path().join("files"))?.count(), 0);

    Ok(())
}

#[cfg(unix)]
#[test]
fn hook_scripts_are_executable() -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new()?;
    compose_revision()?.write_to(dir.path())?;

    for entry in std::fs::read_dir(dir.path().join("scripts"))? {
        let entry = entry?;
        let mode = entry.metadata()?.permissions().mode();
        assert_eq!(mode & 0o111, 0o111, "{:?} not executable", entry.path());
    }

    Ok(())
}

#[test]
fn compose_layout_on_disk() -> Result<()> {
    let dir = TempDir::new()?;
    compose_revision()?.write_to(dir.path())?;

    for script in ["stop_and_remove", "pull_images", "docker-compose"] {
        assert!(
            dir.path().join("scripts").join(script).is_file(),
            "missing hook script {script}"
        );
    }

    let shipped = std::fs::read_to_string(dir.path().join("files/docker-compose.yml"))?;
    assert!(shipped.contains("nginx:1.25"));

    // appspec must round-trip as valid YAML with the hooks wired up
    let appspec: serde_yaml::Value =
        serde_yaml::from_str(&std::fs::read_to_string(dir.path().join("appspec.yml"))?)?;
    let start_hooks = appspec["hooks"]["ApplicationStart"]
        .as_sequence()
        .expect("ApplicationStart hooks");
    assert_eq!(start_hooks.len(), 1);
    assert_eq!(
        start_hooks[0]["location"].as_str(),
        Some("scripts/docker-compose")
    );
    assert_eq!(start_hooks[0]["timeout"].as_u64(), Some(120));
    assert_eq!(start_hooks[0]["runas"].as_str(), Some("root"));

    let files = appspec["files"].as_sequence().expect("files");
    assert_eq!(files.len(), 1);
    assert_eq!(
        files[0]["destination"].as_str(),
        Some("/etc/docker-compose/app")
    );

    Ok(())
}

#[test]
fn bundle_contains_full_revision() -> Result<()> {
    let bundle = compose_revision()?.bundle()?;

    let mut archive = tar::Archive::new(GzDecoder::new(std::fs::File::open(bundle.path())?));
    let mut names = BTreeSet::new();
    let mut appspec = String::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();
        if path == "appspec.yml" {
            entry.read_to_string(&mut appspec)?;
        }
        names.insert(path);
    }

    for expected in [
        "appspec.yml",
        "scripts/stop_and_remove",
        "scripts/pull_images",
        "scripts/docker-compose",
        "files/docker-compose.yml",
    ] {
        assert!(names.contains(expected), "bundle missing {expected}: {names:?}");
    }

    assert!(appspec.contains("scripts/pull_images"));

    Ok(())
}
