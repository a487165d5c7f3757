//! Launches model executables, one process per chain.

use crate::domain::errors::{ChainFailure, RunError};
use crate::domain::models::ChainReport;
use crate::services::args::CmdStanArgs;
use crate::services::storage::unix_secs;
use anyhow::Context;
use rayon::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

#[derive(Debug)]
pub struct RunSet {
    pub args: CmdStanArgs,
    pub chain_ids: Vec<u32>,
    pub csv_files: Vec<PathBuf>,
    pub stdout_files: Vec<PathBuf>,
    retcodes: Vec<Option<i32>>,
}

impl RunSet {
    /// Output paths come from `args.output_basename` when set, else from
    /// `{model}-{method}-{unix_secs}` inside `output_dir`. Methods without
    /// chains produce a single run labelled 1.
    pub fn new(args: CmdStanArgs, output_dir: &Path) -> Self {
        let chain_ids = args.chain_ids.clone().unwrap_or_else(|| vec![1]);
        let base = args.output_basename.clone().unwrap_or_else(|| {
            output_dir.join(format!(
                "{}-{}-{}",
                args.model_name,
                args.method().as_str(),
                unix_secs()
            ))
        });
        let with_suffix = |suffix: &str| -> Vec<PathBuf> {
            chain_ids
                .iter()
                .map(|id| PathBuf::from(format!("{}-{}{}", base.display(), id, suffix)))
                .collect()
        };
        let csv_files = with_suffix(".csv");
        let stdout_files = with_suffix("-stdout.txt");
        let retcodes = vec![None; chain_ids.len()];
        Self {
            args,
            chain_ids,
            csv_files,
            stdout_files,
            retcodes,
        }
    }

    pub fn num_runs(&self) -> usize {
        self.chain_ids.len()
    }

    pub fn retcodes(&self) -> &[Option<i32>] {
        &self.retcodes
    }

    fn run_one(&self, idx: usize) -> anyhow::Result<Option<i32>> {
        let chain_idx = self.args.chain_ids.as_ref().map(|_| idx);
        let argv = self.args.compose_command(chain_idx, &self.csv_files[idx])?;
        let (exe, rest) = argv
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("empty command line"))?;
        if let Some(dir) = self.stdout_files[idx].parent() {
            std::fs::create_dir_all(dir)?;
        }
        let out = File::create(&self.stdout_files[idx])
            .with_context(|| format!("create {}", self.stdout_files[idx].display()))?;
        let err = out.try_clone()?;
        tracing::debug!(chain = self.chain_ids[idx], cmd = %argv.join(" "), "launching");
        let status = Command::new(exe)
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::from(err))
            .status()
            .with_context(|| format!("failed to launch {}", exe))?;
        tracing::info!(chain = self.chain_ids[idx], code = ?status.code(), "chain finished");
        Ok(status.code())
    }

    /// Runs every chain on a pool of `min(cores, chains)` threads. Exit codes
    /// are recorded in chain order; failures are reported after all chains end.
    pub fn run(&mut self, cores: usize) -> anyhow::Result<()> {
        let threads = cores.clamp(1, self.num_runs().max(1));
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .context("failed to build chain thread pool")?;
        tracing::info!(
            model = %self.args.model_name,
            method = self.args.method().as_str(),
            chains = self.num_runs(),
            threads,
            "running"
        );
        let this = &*self;
        let results: Vec<anyhow::Result<Option<i32>>> =
            pool.install(|| (0..this.num_runs()).into_par_iter().map(|i| this.run_one(i)).collect());
        let mut codes = Vec::with_capacity(results.len());
        for r in results {
            codes.push(r?);
        }
        self.retcodes = codes;
        self.check_retcodes()?;
        Ok(())
    }

    pub fn check_retcodes(&self) -> Result<(), RunError> {
        let failed: Vec<ChainFailure> = self
            .retcodes
            .iter()
            .enumerate()
            .filter(|(_, code)| **code != Some(0))
            .map(|(i, code)| ChainFailure {
                chain_id: self.chain_ids[i],
                code: *code,
                stdout_file: self.stdout_files[i].clone(),
            })
            .collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(RunError::ChainsFailed {
                total: self.num_runs(),
                failed,
            })
        }
    }

    /// Moves the CSV files into `dir`. Nothing is moved when any target
    /// already exists.
    pub fn save_csvfiles(&mut self, dir: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        let mut targets = Vec::with_capacity(self.csv_files.len());
        for src in &self.csv_files {
            let name = src
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("bad csv path {}", src.display()))?;
            let target = dir.join(name);
            if target.exists() {
                anyhow::bail!("file exists, not overwriting: {}", target.display());
            }
            targets.push(target);
        }
        for (src, target) in self.csv_files.iter_mut().zip(targets) {
            if std::fs::rename(&*src, &target).is_err() {
                std::fs::copy(&*src, &target)
                    .with_context(|| format!("copy {} to {}", src.display(), target.display()))?;
                std::fs::remove_file(&*src)?;
            }
            tracing::debug!(from = %src.display(), to = %target.display(), "saved csv");
            *src = target;
        }
        Ok(())
    }

    pub fn chain_reports(&self) -> Vec<ChainReport> {
        self.retcodes()
            .iter()
            .enumerate()
            .map(|(i, &retcode)| ChainReport {
                chain_id: self.chain_ids[i],
                csv_file: self.csv_files[i].clone(),
                stdout_file: self.stdout_files[i].clone(),
                retcode,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::args::{MethodArgs, OptimizeArgs, SamplerArgs};
    use tempfile::TempDir;

    fn sample_args(exe: PathBuf, chains: u32) -> CmdStanArgs {
        CmdStanArgs::new(
            "bernoulli",
            Some(exe),
            Some((1..=chains).collect()),
            MethodArgs::Sample(SamplerArgs::default()),
        )
    }

    #[test]
    fn output_files_follow_basename() {
        let mut args = sample_args(PathBuf::from("/m/bernoulli"), 2);
        args.output_basename = Some(PathBuf::from("/out/run"));
        let rs = RunSet::new(args, Path::new("/unused"));
        assert_eq!(
            rs.csv_files,
            vec![PathBuf::from("/out/run-1.csv"), PathBuf::from("/out/run-2.csv")]
        );
        assert_eq!(rs.stdout_files[1], PathBuf::from("/out/run-2-stdout.txt"));
    }

    #[test]
    fn default_basename_names_model_and_method() {
        let args = CmdStanArgs::new(
            "bernoulli",
            Some(PathBuf::from("/m/bernoulli")),
            None,
            MethodArgs::Optimize(OptimizeArgs::default()),
        );
        let rs = RunSet::new(args, Path::new("/tmp/out"));
        assert_eq!(rs.num_runs(), 1);
        let name = rs.csv_files[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("bernoulli-optimize-"), "{}", name);
        assert!(name.ends_with("-1.csv"));
    }

    #[test]
    fn unrun_chains_count_as_failed() {
        let rs = RunSet::new(sample_args(PathBuf::from("/m/x"), 3), Path::new("/o"));
        match rs.check_retcodes() {
            Err(RunError::ChainsFailed { total, failed }) => {
                assert_eq!(total, 3);
                assert_eq!(failed.len(), 3);
                assert_eq!(failed[0].code, None);
            }
            Ok(()) => panic!("expected failure"),
        }
    }

    #[test]
    fn save_refuses_to_overwrite() {
        let tmp = TempDir::new().unwrap();
        let mut args = sample_args(PathBuf::from("/m/x"), 2);
        args.output_basename = Some(tmp.path().join("run"));
        let mut rs = RunSet::new(args, tmp.path());
        for f in &rs.csv_files {
            std::fs::write(f, "lp__\n").unwrap();
        }
        let dest = tmp.path().join("keep");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("run-2.csv"), "old").unwrap();
        assert!(rs.save_csvfiles(&dest).is_err());
        assert!(tmp.path().join("run-1.csv").exists());

        std::fs::remove_file(dest.join("run-2.csv")).unwrap();
        rs.save_csvfiles(&dest).unwrap();
        assert_eq!(rs.csv_files[0], dest.join("run-1.csv"));
        assert!(dest.join("run-2.csv").exists());
        assert!(!tmp.path().join("run-1.csv").exists());
    }

    #[cfg(unix)]
    #[test]
    fn chains_run_in_parallel_and_failures_are_collected() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let exe = tmp.path().join("model");
        std::fs::write(
            &exe,
            "#!/bin/sh\nfor a in \"$@\"; do case \"$a\" in id=*) id=${a#id=};; esac; done\necho \"chain $id\"\n[ \"$id\" = 2 ] && exit 3\nexit 0\n",
        )
        .unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut args = sample_args(exe, 3);
        args.output_basename = Some(tmp.path().join("out"));
        let mut rs = RunSet::new(args, tmp.path());
        let err = rs.run(2).unwrap_err();
        let run_err = err.downcast_ref::<RunError>().unwrap();
        let RunError::ChainsFailed { failed, .. } = run_err;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].chain_id, 2);
        assert_eq!(failed[0].code, Some(3));
        assert_eq!(rs.retcodes(), &[Some(0), Some(3), Some(0)]);
        let log = std::fs::read_to_string(&rs.stdout_files[0]).unwrap();
        assert_eq!(log.trim(), "chain 1");
    }
}
