use crate::domain::errors::ToolchainError;
use crate::services::toolchain::{exe_suffix, Toolchain};
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub include_paths: Vec<PathBuf>,
    pub stanc_options: Vec<String>,
    pub force: bool,
}

impl CompileOptions {
    /// Value for the `STANCFLAGS` make variable, `None` when empty.
    pub fn stancflags(&self) -> Option<String> {
        let mut flags = Vec::new();
        if !self.include_paths.is_empty() {
            let joined = self
                .include_paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(",");
            flags.push(format!("--include_paths={}", joined));
        }
        flags.extend(self.stanc_options.iter().cloned());
        if flags.is_empty() {
            None
        } else {
            Some(flags.join(" "))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StanModel {
    pub name: String,
    pub stan_file: Option<PathBuf>,
    pub exe_file: Option<PathBuf>,
}

#[derive(Debug, PartialEq)]
pub enum CompileStatus {
    Compiled,
    UpToDate,
}

impl CompileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompileStatus::Compiled => "compiled",
            CompileStatus::UpToDate => "up_to_date",
        }
    }
}

fn file_stem(path: &Path) -> anyhow::Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("cannot derive model name from {}", path.display()))
}

fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    path.canonicalize()
        .with_context(|| format!("no such file {}", path.display()))
}

impl StanModel {
    /// A `.stan` path is a program to compile, anything else an executable.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if path.extension().and_then(|e| e.to_str()) == Some("stan") {
            Self::from_stan_file(path)
        } else {
            Self::from_exe(path)
        }
    }

    pub fn from_stan_file(path: &Path) -> anyhow::Result<Self> {
        if path.extension().and_then(|e| e.to_str()) != Some("stan") {
            anyhow::bail!("invalid stan filename {}, must end in .stan", path.display());
        }
        let stan_file = absolute(path)?;
        let exe = exe_for(&stan_file);
        Ok(Self {
            name: file_stem(&stan_file)?,
            exe_file: exe.is_file().then_some(exe),
            stan_file: Some(stan_file),
        })
    }

    pub fn from_exe(path: &Path) -> anyhow::Result<Self> {
        let exe = absolute(path)?;
        if !exe.is_file() {
            anyhow::bail!("model executable {} is not a file", exe.display());
        }
        Ok(Self {
            name: file_stem(&exe)?,
            stan_file: None,
            exe_file: Some(exe),
        })
    }

    pub fn code(&self) -> anyhow::Result<String> {
        let path = self
            .stan_file
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("model {} has no stan program", self.name))?;
        Ok(std::fs::read_to_string(path)?)
    }

    fn is_up_to_date(&self) -> bool {
        let (Some(src), Some(exe)) = (&self.stan_file, &self.exe_file) else {
            return false;
        };
        let modified = |p: &Path| std::fs::metadata(p).and_then(|m| m.modified()).ok();
        match (modified(src), modified(exe)) {
            (Some(s), Some(e)) => e >= s,
            _ => false,
        }
    }

    /// Builds the executable with the toolchain's makefile. Skipped when an
    /// executable newer than the program exists unless `opts.force`.
    pub fn compile(
        &mut self,
        toolchain: &Toolchain,
        opts: &CompileOptions,
    ) -> anyhow::Result<CompileStatus> {
        let stan_file = self
            .stan_file
            .clone()
            .ok_or_else(|| anyhow::anyhow!("model {} has no stan program to compile", self.name))?;
        if !opts.force && self.is_up_to_date() {
            tracing::info!(model = %self.name, "executable up to date, skipping compile");
            return Ok(CompileStatus::UpToDate);
        }

        let target = exe_for(&stan_file);
        let mut cmd = Command::new("make");
        cmd.arg(&target).current_dir(&toolchain.root);
        if let Some(flags) = opts.stancflags() {
            cmd.arg(format!("STANCFLAGS={}", flags));
        }
        tracing::info!(model = %self.name, target = %target.display(), "compiling");
        let out = cmd.output().context("failed to launch make")?;
        if !out.status.success() {
            let mut detail = String::from_utf8_lossy(&out.stderr).trim().to_string();
            if detail.is_empty() {
                detail = String::from_utf8_lossy(&out.stdout).trim().to_string();
            }
            return Err(ToolchainError::ToolFailed {
                tool: format!("make {}", target.display()),
                code: out.status.code().unwrap_or(-1),
                detail,
            }
            .into());
        }
        if !target.is_file() {
            anyhow::bail!("make succeeded but {} was not created", target.display());
        }
        self.exe_file = Some(target);
        Ok(CompileStatus::Compiled)
    }
}

/// Executable path next to the program: `dir/name` plus the platform suffix.
pub fn exe_for(stan_file: &Path) -> PathBuf {
    let stem = stan_file.with_extension("");
    PathBuf::from(format!("{}{}", stem.display(), exe_suffix()))
}
