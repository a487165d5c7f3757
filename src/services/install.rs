//! Download and build a CmdStan release.

use crate::domain::constants::{
    DOWNLOAD_ATTEMPTS, DOWNLOAD_TIMEOUT_SECS, GITHUB_LATEST_RELEASE, GITHUB_RELEASE_DOWNLOAD,
};
use crate::domain::errors::ToolchainError;
use crate::services::storage::remember_cmdstan_path;
use crate::services::toolchain::Toolchain;
use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

#[derive(Deserialize)]
struct Release {
    tag_name: String,
}

#[derive(Debug, PartialEq)]
pub enum InstallStatus {
    Installed,
    AlreadyInstalled,
}

impl InstallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallStatus::Installed => "installed",
            InstallStatus::AlreadyInstalled => "already_installed",
        }
    }
}

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .user_agent(concat!("stanctl/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

pub fn latest_version() -> anyhow::Result<String> {
    let release: Release = client(30)?
        .get(GITHUB_LATEST_RELEASE)
        .send()?
        .error_for_status()?
        .json()?;
    Ok(normalize_version(&release.tag_name))
}

pub fn normalize_version(tag: &str) -> String {
    tag.trim().trim_start_matches('v').to_string()
}

pub fn release_url(version: &str) -> String {
    format!(
        "{}/v{v}/cmdstan-{v}.tar.gz",
        GITHUB_RELEASE_DOWNLOAD,
        v = version
    )
}

pub fn download(url: &str, dest: &Path) -> anyhow::Result<()> {
    download_with_backoff(url, dest, Duration::from_secs(2))
}

/// Retries with a linear backoff of `step` times the attempt number.
fn download_with_backoff(url: &str, dest: &Path, step: Duration) -> anyhow::Result<()> {
    let http = client(DOWNLOAD_TIMEOUT_SECS)?;
    let mut last_err = None;
    for attempt in 1..=DOWNLOAD_ATTEMPTS {
        tracing::info!(url, attempt, "downloading CmdStan release");
        match fetch_to(&http, url, dest) {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "download failed");
                last_err = Some(e);
                if attempt < DOWNLOAD_ATTEMPTS {
                    std::thread::sleep(step * attempt);
                }
            }
        }
    }
    let err = last_err.unwrap_or_else(|| anyhow::anyhow!("no download attempts made"));
    Err(err.context(format!(
        "download {} failed after {} attempts",
        url, DOWNLOAD_ATTEMPTS
    )))
}

fn fetch_to(http: &reqwest::blocking::Client, url: &str, dest: &Path) -> anyhow::Result<()> {
    let mut resp = http.get(url).send()?.error_for_status()?;
    let mut file = std::fs::File::create(dest)?;
    resp.copy_to(&mut file)?;
    Ok(())
}

fn discard_archive(archive: &Path) {
    match std::fs::remove_file(archive) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(archive = %archive.display(), error = %e, "could not remove archive"),
    }
}

fn run_tool(mut cmd: Command, tool: &str) -> anyhow::Result<()> {
    tracing::debug!(?cmd, "running {}", tool);
    let out = cmd
        .output()
        .with_context(|| format!("failed to launch {}", tool))?;
    if !out.status.success() {
        return Err(ToolchainError::ToolFailed {
            tool: tool.to_string(),
            code: out.status.code().unwrap_or(-1),
            detail: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        }
        .into());
    }
    Ok(())
}

pub fn extract(archive: &Path, dir: &Path) -> anyhow::Result<()> {
    let mut cmd = Command::new("tar");
    cmd.arg("-xzf").arg(archive).arg("-C").arg(dir);
    run_tool(cmd, "tar")
}

pub fn build(root: &Path, cores: usize) -> anyhow::Result<()> {
    tracing::info!(root = %root.display(), cores, "building CmdStan");
    let mut cmd = Command::new("make");
    cmd.arg("build")
        .arg(format!("-j{}", cores.max(1)))
        .current_dir(root);
    run_tool(cmd, "make build")
}

fn is_built(root: &Path) -> bool {
    Toolchain::at(root).map(|t| t.bin("stanc").is_file()).unwrap_or(false)
}

pub fn install(
    dir: &Path,
    version: Option<&str>,
    cores: usize,
) -> anyhow::Result<(Toolchain, InstallStatus)> {
    let version = match version {
        Some(v) => normalize_version(v),
        None => latest_version().context("cannot determine latest CmdStan release")?,
    };
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let root: PathBuf = dir.join(format!("cmdstan-{}", version));

    if is_built(&root) {
        tracing::info!(root = %root.display(), "CmdStan already installed");
        remember_cmdstan_path(root.clone())?;
        return Ok((Toolchain::at(root)?, InstallStatus::AlreadyInstalled));
    }

    let archive = dir.join(format!("cmdstan-{}.tar.gz", version));
    let unpacked = download(&release_url(&version), &archive).and_then(|()| extract(&archive, dir));
    discard_archive(&archive);
    unpacked?;
    build(&root, cores)?;

    let toolchain = Toolchain::at(&root)?;
    remember_cmdstan_path(root)?;
    Ok((toolchain, InstallStatus::Installed))
}
