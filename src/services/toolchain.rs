//! Locating and validating a CmdStan installation.

use crate::domain::constants::{CMDSTAN_DIR_PREFIX, CMDSTAN_ENV, DEFAULT_INSTALL_DIR};
use crate::domain::errors::ToolchainError;
use crate::domain::models::{InstalledToolchain, ToolchainReport};
use crate::services::storage::{home_dir, load_config};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct Toolchain {
    pub root: PathBuf,
    pub version: Option<String>,
}

/// Where a resolved toolchain path came from; reported by `toolchain show`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Origin {
    Flag,
    Env,
    Config,
    DefaultDir,
}

impl Origin {
    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Flag => "flag",
            Origin::Env => "env",
            Origin::Config => "config",
            Origin::DefaultDir => "default_dir",
        }
    }
}

impl Toolchain {
    pub fn at(root: impl Into<PathBuf>) -> Result<Self, ToolchainError> {
        let root = root.into();
        validate_root(&root)?;
        let version = root
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(version_from_dir_name)
            .or_else(|| read_makefile_version(&root));
        Ok(Self { root, version })
    }

    pub fn bin(&self, name: &str) -> PathBuf {
        self.root
            .join("bin")
            .join(format!("{}{}", name, exe_suffix()))
    }

    pub fn report(&self, origin: Origin) -> ToolchainReport {
        ToolchainReport {
            root: self.root.clone(),
            version: self.version.clone(),
            source: origin.as_str().to_string(),
        }
    }
}

pub fn exe_suffix() -> &'static str {
    if cfg!(windows) {
        ".exe"
    } else {
        ""
    }
}

pub fn validate_root(path: &Path) -> Result<(), ToolchainError> {
    if !path.is_dir() {
        return Err(ToolchainError::MissingDir(path.to_path_buf()));
    }
    if !path.join("makefile").is_file() {
        return Err(ToolchainError::NoMakefile(path.to_path_buf()));
    }
    Ok(())
}

pub fn default_install_base() -> anyhow::Result<PathBuf> {
    Ok(home_dir()?.join(DEFAULT_INSTALL_DIR))
}

/// Resolves the toolchain: flag, then `$CMDSTAN`, then config, then
/// the newest `cmdstan-*` under `~/.cmdstan`.
pub fn resolve(flag: Option<&Path>) -> anyhow::Result<(Toolchain, Origin)> {
    if let Some(p) = flag {
        return Ok((Toolchain::at(p)?, Origin::Flag));
    }
    if let Some(p) = std::env::var_os(CMDSTAN_ENV).filter(|v| !v.is_empty()) {
        return Ok((Toolchain::at(PathBuf::from(p))?, Origin::Env));
    }
    if let Some(p) = load_config()?.cmdstan_path {
        return Ok((Toolchain::at(p)?, Origin::Config));
    }
    let base = default_install_base()?;
    match list_installed(&base).pop() {
        Some(t) => {
            tracing::debug!(root = %t.root.display(), "using newest installed CmdStan");
            Ok((Toolchain::at(t.root)?, Origin::DefaultDir))
        }
        None => Err(ToolchainError::NotFound { env: CMDSTAN_ENV }.into()),
    }
}

pub fn version_from_dir_name(name: &str) -> Option<String> {
    let v = name.strip_prefix(CMDSTAN_DIR_PREFIX)?;
    if v.is_empty() || !v.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    Some(v.to_string())
}

fn version_key(v: &str) -> Vec<u64> {
    v.split(['.', '-'])
        .map(|part| part.parse::<u64>().unwrap_or(0))
        .collect()
}

/// `cmdstan-X.Y.Z` directories under `base` holding a makefile, oldest first.
pub fn list_installed(base: &Path) -> Vec<InstalledToolchain> {
    let entries = match std::fs::read_dir(base) {
        Ok(e) => e,
        Err(_) => return vec![],
    };
    let mut out: Vec<InstalledToolchain> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            let version = version_from_dir_name(&name)?;
            let root = e.path();
            validate_root(&root).ok()?;
            Some(InstalledToolchain { version, root })
        })
        .collect();
    out.sort_by_key(|t| version_key(&t.version));
    out
}

fn read_makefile_version(root: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(root.join("makefile")).ok()?;
    let mut parts = [None, None, None];
    for line in raw.lines() {
        let line = line.trim();
        for (i, key) in ["CMDSTAN_VERSION_MAJOR", "CMDSTAN_VERSION_MINOR", "CMDSTAN_VERSION_PATCH"]
            .iter()
            .enumerate()
        {
            if let Some(rest) = line.strip_prefix(key) {
                let value = rest.trim_start_matches([' ', ':', '=']).trim();
                if !value.is_empty() {
                    parts[i] = Some(value.to_string());
                }
            }
        }
    }
    match parts {
        [Some(a), Some(b), Some(c)] => Some(format!("{}.{}.{}", a, b, c)),
        _ => None,
    }
}
