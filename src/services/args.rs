//! Validated CmdStan command-line arguments.
//!
//! Each method has its own argument struct with a `validate` pass (which may
//! normalise values, e.g. resolving a metric file to `diag_e`/`dense_e`) and a
//! `compose` pass that appends `key=value` tokens to an argv vector.
//! [`CmdStanArgs`] holds the arguments shared by every method and builds the
//! full per-chain argv.

use crate::domain::constants::MAX_RANDOM_SEED;
use crate::domain::errors::ArgError;
use rand::Rng;
use std::collections::HashSet;
use std::fmt::Display;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Sample,
    Optimize,
    GenerateQuantities,
    Variational,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Sample => "sample",
            Method::Optimize => "optimize",
            Method::GenerateQuantities => "generate_quantities",
            Method::Variational => "variational",
        }
    }
}

/// A value given once for all chains, or once per chain.
#[derive(Debug, Clone, PartialEq)]
pub enum PerChain<T> {
    One(T),
    Each(Vec<T>),
}

impl<T> PerChain<T> {
    pub fn from_vec(mut values: Vec<T>) -> Option<Self> {
        match values.len() {
            0 => None,
            1 => values.pop().map(PerChain::One),
            _ => Some(PerChain::Each(values)),
        }
    }

    /// Value for chain `idx`; short lists repeat their last entry.
    pub fn get(&self, idx: usize) -> Option<&T> {
        match self {
            PerChain::One(v) => Some(v),
            PerChain::Each(vs) => vs.get(idx).or_else(|| vs.last()),
        }
    }

    fn values(&self) -> Vec<&T> {
        match self {
            PerChain::One(v) => vec![v],
            PerChain::Each(vs) => vs.iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Diag,
    Dense,
}

impl MetricType {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricType::Diag => "diag_e",
            MetricType::Dense => "dense_e",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    Type(MetricType),
    File(PerChain<PathBuf>),
}

impl Metric {
    /// `diag`/`diag_e` and `dense`/`dense_e` name a metric type; anything
    /// else is taken as a metric file path.
    pub fn parse(values: &[String]) -> Option<Self> {
        if let [one] = values {
            match one.as_str() {
                "diag" | "diag_e" => return Some(Metric::Type(MetricType::Diag)),
                "dense" | "dense_e" => return Some(Metric::Type(MetricType::Dense)),
                _ => {}
            }
        }
        PerChain::from_vec(values.iter().map(PathBuf::from).collect()).map(Metric::File)
    }
}

fn out_of_range(name: &'static str, rule: &'static str, found: impl Display) -> ArgError {
    ArgError::OutOfRange {
        name,
        rule,
        found: found.to_string(),
    }
}

fn push_kv(cmd: &mut Vec<String>, key: &str, value: impl Display) {
    cmd.push(format!("{}={}", key, value));
}

fn check_per_chain_files(
    files: &[PathBuf],
    chains: usize,
    what: &'static str,
) -> Result<(), ArgError> {
    if files.len() != chains {
        return Err(ArgError::PerChainMismatch {
            what,
            found: files.len(),
            chains,
        });
    }
    let unique: HashSet<&PathBuf> = files.iter().collect();
    if unique.len() != files.len() {
        return Err(ArgError::DuplicateFiles { what });
    }
    for f in files {
        if !f.exists() {
            return Err(ArgError::NoSuchFile(f.clone()));
        }
    }
    Ok(())
}

/// Dimensions of the `inv_metric` entry of a JSON metric file:
/// `[n]` for a diagonal metric, `[n, m]` for a dense one.
pub fn read_metric_dims(path: &Path) -> Result<Vec<usize>, ArgError> {
    let raw = std::fs::read_to_string(path).map_err(|_| ArgError::NoSuchFile(path.to_path_buf()))?;
    let value: serde_json::Value = serde_json::from_str(&raw).map_err(|_| ArgError::BadMetric)?;
    let rows = value
        .get("inv_metric")
        .and_then(|m| m.as_array())
        .ok_or(ArgError::BadMetric)?;
    match rows.first() {
        Some(serde_json::Value::Array(first)) => {
            if rows.iter().any(|r| r.as_array().map(|a| a.len()) != Some(first.len())) {
                return Err(ArgError::BadMetric);
            }
            Ok(vec![rows.len(), first.len()])
        }
        Some(serde_json::Value::Number(_)) if rows.iter().all(|r| r.is_number()) => {
            Ok(vec![rows.len()])
        }
        _ => Err(ArgError::BadMetric),
    }
}

fn metric_type_from_files(files: &PerChain<PathBuf>, chains: usize) -> Result<MetricType, ArgError> {
    let list: Vec<PathBuf> = files.values().into_iter().cloned().collect();
    match files {
        PerChain::One(f) => {
            if !f.exists() {
                return Err(ArgError::NoSuchFile(f.clone()));
            }
        }
        PerChain::Each(v) => check_per_chain_files(v, chains, "metric files")?,
    }
    let dims = read_metric_dims(&list[0])?;
    for other in &list[1..] {
        if read_metric_dims(other)? != dims {
            return Err(ArgError::InconsistentMetrics(list[0].clone(), other.clone()));
        }
    }
    match dims.as_slice() {
        [_] => Ok(MetricType::Diag),
        [rows, cols] if rows == cols => Ok(MetricType::Dense),
        _ => Err(ArgError::BadMetric),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamplerArgs {
    pub warmup_iters: Option<u32>,
    pub sampling_iters: Option<u32>,
    pub save_warmup: bool,
    pub thin: Option<u32>,
    pub max_treedepth: Option<u32>,
    pub metric: Option<Metric>,
    pub step_size: Option<PerChain<f64>>,
    pub adapt_engaged: Option<bool>,
    pub adapt_delta: Option<f64>,
    resolved_metric: Option<MetricType>,
}

impl SamplerArgs {
    pub fn validate(&mut self, chains: Option<usize>) -> Result<(), ArgError> {
        let chains = match chains {
            Some(c) if c >= 1 => c,
            _ => return Err(ArgError::NoChains),
        };
        if self.warmup_iters == Some(0) && self.adapt_engaged == Some(true) {
            return Err(ArgError::AdaptWithoutWarmup);
        }
        if let Some(thin) = self.thin.filter(|t| *t < 1) {
            return Err(out_of_range("thin", "at least 1", thin));
        }
        if let Some(depth) = self.max_treedepth.filter(|d| *d < 1) {
            return Err(out_of_range("max_treedepth", "at least 1", depth));
        }
        if let Some(step) = &self.step_size {
            if let PerChain::Each(v) = step {
                if v.len() != chains {
                    return Err(ArgError::PerChainMismatch {
                        what: "step_sizes",
                        found: v.len(),
                        chains,
                    });
                }
            }
            if let Some(bad) = step.values().into_iter().find(|s| !(**s >= 0.0)) {
                return Err(out_of_range("step_size", "> 0", bad));
            }
        }
        self.resolved_metric = match &self.metric {
            None => None,
            Some(Metric::Type(t)) => Some(*t),
            Some(Metric::File(files)) => Some(metric_type_from_files(files, chains)?),
        };
        if let Some(delta) = self.adapt_delta {
            if !(delta > 0.0 && delta < 1.0) {
                return Err(out_of_range("adapt_delta", "between 0 and 1", delta));
            }
        }
        Ok(())
    }

    /// Metric type after validation, resolved from metric files if needed.
    pub fn metric_type(&self) -> Option<MetricType> {
        self.resolved_metric
    }

    pub fn compose(&self, idx: usize, cmd: &mut Vec<String>) {
        cmd.push("method=sample".to_string());
        if let Some(n) = self.sampling_iters {
            push_kv(cmd, "num_samples", n);
        }
        if let Some(n) = self.warmup_iters {
            push_kv(cmd, "num_warmup", n);
        }
        if self.save_warmup {
            cmd.push("save_warmup=1".to_string());
        }
        if let Some(n) = self.thin {
            push_kv(cmd, "thin", n);
        }
        cmd.push("algorithm=hmc".to_string());
        if let Some(depth) = self.max_treedepth {
            cmd.push("engine=nuts".to_string());
            push_kv(cmd, "max_depth", depth);
        }
        if let Some(step) = self.step_size.as_ref().and_then(|s| s.get(idx)) {
            push_kv(cmd, "stepsize", step);
        }
        if let Some(t) = self.resolved_metric {
            push_kv(cmd, "metric", t.as_str());
        }
        if let Some(Metric::File(files)) = &self.metric {
            if let Some(file) = files.get(idx) {
                push_kv(cmd, "metric_file", file.display());
            }
        }
        if self.adapt_engaged.is_some() || self.adapt_delta.is_some() {
            cmd.push("adapt".to_string());
        }
        if let Some(engaged) = self.adapt_engaged {
            push_kv(cmd, "engaged", u8::from(engaged));
        }
        if let Some(delta) = self.adapt_delta {
            push_kv(cmd, "delta", delta);
        }
    }
}

pub const OPTIMIZE_ALGOS: [&str; 3] = ["BFGS", "LBFGS", "Newton"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizeArgs {
    pub algorithm: Option<String>,
    pub init_alpha: Option<f64>,
    pub iter: Option<u32>,
}

impl OptimizeArgs {
    pub fn validate(&self) -> Result<(), ArgError> {
        if let Some(algo) = &self.algorithm {
            if !OPTIMIZE_ALGOS.contains(&algo.as_str()) {
                return Err(ArgError::UnknownAlgorithm {
                    method: "optimizer",
                    allowed: "BFGS, LBFGS, Newton",
                    found: algo.clone(),
                });
            }
        }
        if let Some(alpha) = self.init_alpha {
            if self.algorithm.as_deref() == Some("Newton") {
                return Err(ArgError::InitAlphaWithNewton);
            }
            if !(alpha >= 0.0) {
                return Err(out_of_range("init_alpha", "greater than 0", alpha));
            }
        }
        Ok(())
    }

    pub fn compose(&self, cmd: &mut Vec<String>) {
        cmd.push("method=optimize".to_string());
        if let Some(algo) = &self.algorithm {
            push_kv(cmd, "algorithm", algo.to_lowercase());
        }
        if let Some(alpha) = self.init_alpha {
            push_kv(cmd, "init_alpha", alpha);
        }
        if let Some(iter) = self.iter {
            push_kv(cmd, "iter", iter);
        }
    }
}

pub const VARIATIONAL_ALGOS: [&str; 2] = ["meanfield", "fullrank"];

#[derive(Debug, Clone, PartialEq)]
pub struct VariationalArgs {
    pub algorithm: Option<String>,
    pub iter: Option<u32>,
    pub grad_samples: Option<u32>,
    pub elbo_samples: Option<u32>,
    pub eta: Option<f64>,
    pub adapt_engaged: bool,
    pub adapt_iter: Option<u32>,
    pub tol_rel_obj: Option<f64>,
    pub eval_elbo: Option<u32>,
    pub output_samples: Option<u32>,
}

impl Default for VariationalArgs {
    fn default() -> Self {
        Self {
            algorithm: None,
            iter: None,
            grad_samples: None,
            elbo_samples: None,
            eta: None,
            adapt_engaged: true,
            adapt_iter: None,
            tol_rel_obj: None,
            eval_elbo: None,
            output_samples: None,
        }
    }
}

impl VariationalArgs {
    pub fn validate(&self) -> Result<(), ArgError> {
        if let Some(algo) = &self.algorithm {
            if !VARIATIONAL_ALGOS.contains(&algo.as_str()) {
                return Err(ArgError::UnknownAlgorithm {
                    method: "variational",
                    allowed: "meanfield, fullrank",
                    found: algo.clone(),
                });
            }
        }
        let positive = [
            ("iter", self.iter),
            ("grad_samples", self.grad_samples),
            ("elbo_samples", self.elbo_samples),
            ("eval_elbo", self.eval_elbo),
            ("output_samples", self.output_samples),
        ];
        for (name, value) in positive {
            if let Some(v) = value.filter(|v| *v < 1) {
                return Err(out_of_range(name, "a positive integer", v));
            }
        }
        if let Some(eta) = self.eta.filter(|e| !(*e >= 0.0)) {
            return Err(out_of_range("eta", "a non-negative number", eta));
        }
        if let Some(n) = self.adapt_iter {
            if !self.adapt_engaged && n > 0 {
                return Err(ArgError::AdaptIterWithoutAdapt(n));
            }
            if self.adapt_engaged && n < 1 {
                return Err(out_of_range("adapt_iter", "a positive integer", n));
            }
        }
        if let Some(tol) = self.tol_rel_obj.filter(|t| !(*t > 0.0)) {
            return Err(out_of_range("tol_rel_obj", "a positive number", tol));
        }
        Ok(())
    }

    pub fn compose(&self, cmd: &mut Vec<String>) {
        cmd.push("method=variational".to_string());
        if let Some(algo) = &self.algorithm {
            push_kv(cmd, "algorithm", algo);
        }
        if let Some(n) = self.iter {
            push_kv(cmd, "iter", n);
        }
        if let Some(n) = self.grad_samples {
            push_kv(cmd, "grad_samples", n);
        }
        if let Some(n) = self.elbo_samples {
            push_kv(cmd, "elbo_samples", n);
        }
        if let Some(eta) = self.eta {
            push_kv(cmd, "eta", eta);
        }
        match (self.adapt_engaged, self.adapt_iter) {
            (true, Some(n)) => {
                cmd.push("adapt".to_string());
                push_kv(cmd, "iter", n);
            }
            (false, _) => {
                cmd.push("adapt".to_string());
                cmd.push("engaged=0".to_string());
            }
            (true, None) => {}
        }
        if let Some(tol) = self.tol_rel_obj {
            push_kv(cmd, "tol_rel_obj", tol);
        }
        if let Some(n) = self.eval_elbo {
            push_kv(cmd, "eval_elbo", n);
        }
        if let Some(n) = self.output_samples {
            push_kv(cmd, "output_samples", n);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateQuantitiesArgs {
    pub sample_csv_files: Vec<PathBuf>,
}

impl GenerateQuantitiesArgs {
    pub fn validate(&self, chains: Option<usize>) -> Result<(), ArgError> {
        for csv in &self.sample_csv_files {
            if !csv.exists() {
                return Err(ArgError::BadFittedParams(csv.clone()));
            }
        }
        if let Some(chains) = chains {
            if chains != self.sample_csv_files.len() {
                return Err(ArgError::PerChainMismatch {
                    what: "fitted params files",
                    found: self.sample_csv_files.len(),
                    chains,
                });
            }
        }
        Ok(())
    }

    pub fn compose(&self, idx: usize, cmd: &mut Vec<String>) {
        cmd.push("method=generate_quantities".to_string());
        if let Some(csv) = self.sample_csv_files.get(idx) {
            push_kv(cmd, "fitted_params", csv.display());
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MethodArgs {
    Sample(SamplerArgs),
    Optimize(OptimizeArgs),
    GenerateQuantities(GenerateQuantitiesArgs),
    Variational(VariationalArgs),
}

impl MethodArgs {
    pub fn method(&self) -> Method {
        match self {
            MethodArgs::Sample(_) => Method::Sample,
            MethodArgs::Optimize(_) => Method::Optimize,
            MethodArgs::GenerateQuantities(_) => Method::GenerateQuantities,
            MethodArgs::Variational(_) => Method::Variational,
        }
    }

    fn validate(&mut self, chains: Option<usize>) -> Result<(), ArgError> {
        match self {
            MethodArgs::Sample(a) => a.validate(chains),
            MethodArgs::Optimize(a) => a.validate(),
            MethodArgs::GenerateQuantities(a) => a.validate(chains),
            MethodArgs::Variational(a) => a.validate(),
        }
    }

    fn compose(&self, idx: usize, cmd: &mut Vec<String>) {
        match self {
            MethodArgs::Sample(a) => a.compose(idx, cmd),
            MethodArgs::Optimize(a) => a.compose(cmd),
            MethodArgs::GenerateQuantities(a) => a.compose(idx, cmd),
            MethodArgs::Variational(a) => a.compose(cmd),
        }
    }
}

/// Initial values: a uniform radius, one file for all chains, or one file per chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Inits {
    Radius(f64),
    File(PerChain<PathBuf>),
}

impl Inits {
    /// A single numeric value is a radius, everything else names init files.
    pub fn parse(values: &[String]) -> Option<Self> {
        if let [one] = values {
            if let Ok(r) = one.parse::<f64>() {
                return Some(Inits::Radius(r));
            }
        }
        PerChain::from_vec(values.iter().map(PathBuf::from).collect()).map(Inits::File)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CmdStanArgs {
    pub model_name: String,
    pub model_exe: Option<PathBuf>,
    pub chain_ids: Option<Vec<u32>>,
    pub method_args: MethodArgs,
    pub data: Option<PathBuf>,
    pub seed: Option<PerChain<u32>>,
    pub inits: Option<Inits>,
    pub output_basename: Option<PathBuf>,
    pub refresh: Option<u32>,
}

impl CmdStanArgs {
    pub fn new(
        model_name: impl Into<String>,
        model_exe: Option<PathBuf>,
        chain_ids: Option<Vec<u32>>,
        method_args: MethodArgs,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            model_exe,
            chain_ids,
            method_args,
            data: None,
            seed: None,
            inits: None,
            output_basename: None,
            refresh: None,
        }
    }

    pub fn method(&self) -> Method {
        self.method_args.method()
    }

    pub fn num_chains(&self) -> Option<usize> {
        self.chain_ids.as_ref().map(|c| c.len())
    }

    /// Validates the method arguments, then the shared arguments. A missing
    /// seed is replaced by a random one in `1..=99999`.
    pub fn validate(&mut self) -> Result<(), ArgError> {
        let chains = self.num_chains();
        self.method_args.validate(chains)?;

        if self.model_name.is_empty() {
            return Err(ArgError::NoModel);
        }
        if self.model_exe.is_none() {
            return Err(ArgError::NotCompiled);
        }
        if let Some(ids) = &self.chain_ids {
            if let Some(bad) = ids.iter().find(|id| **id < 1) {
                return Err(ArgError::InvalidChainId(*bad));
            }
        }
        if let Some(base) = &self.output_basename {
            self.output_basename = Some(check_output_basename(base)?);
        }

        match &self.seed {
            None => {
                let seed = rand::thread_rng().gen_range(1..=MAX_RANDOM_SEED);
                self.seed = Some(PerChain::One(seed));
            }
            Some(PerChain::Each(seeds)) => match chains {
                None => return Err(ArgError::PerChainWithoutChains { what: "seed" }),
                Some(c) if c != seeds.len() => {
                    return Err(ArgError::PerChainMismatch {
                        what: "seeds",
                        found: seeds.len(),
                        chains: c,
                    })
                }
                Some(_) => {}
            },
            Some(PerChain::One(_)) => {}
        }

        match &self.data {
            Some(file) if !file.exists() => return Err(ArgError::NoSuchFile(file.clone())),
            None if self.method() == Method::Optimize => return Err(ArgError::MissingData),
            _ => {}
        }

        match &self.inits {
            None => {}
            Some(Inits::Radius(r)) => {
                if !(*r >= 0.0) {
                    return Err(out_of_range("inits", "> 0", r));
                }
            }
            Some(Inits::File(PerChain::One(f))) => {
                if !f.exists() {
                    return Err(ArgError::NoSuchFile(f.clone()));
                }
            }
            Some(Inits::File(PerChain::Each(files))) => match chains {
                None => return Err(ArgError::PerChainWithoutChains { what: "inits" }),
                Some(c) => check_per_chain_files(files, c, "init files")?,
            },
        }
        Ok(())
    }

    /// Argv for one chain (`idx` is the 0-based chain index), writing its
    /// output to `csv_file`.
    pub fn compose_command(&self, idx: Option<usize>, csv_file: &Path) -> Result<Vec<String>, ArgError> {
        let exe = self.model_exe.as_ref().ok_or(ArgError::NotCompiled)?;
        let mut cmd = vec![exe.display().to_string()];
        let idx = match (idx, &self.chain_ids) {
            (Some(i), Some(ids)) => {
                let id = ids.get(i).ok_or(ArgError::ChainIndex {
                    idx: i,
                    chains: ids.len(),
                })?;
                push_kv(&mut cmd, "id", id);
                i
            }
            (i, _) => i.unwrap_or(0),
        };
        if let Some(seed) = self.seed.as_ref().and_then(|s| s.get(idx)) {
            cmd.push("random".to_string());
            push_kv(&mut cmd, "seed", seed);
        }
        if let Some(data) = &self.data {
            cmd.push("data".to_string());
            push_kv(&mut cmd, "file", data.display());
        }
        match &self.inits {
            Some(Inits::Radius(r)) => push_kv(&mut cmd, "init", r),
            Some(Inits::File(files)) => {
                if let Some(file) = files.get(idx) {
                    push_kv(&mut cmd, "init", file.display());
                }
            }
            None => {}
        }
        cmd.push("output".to_string());
        push_kv(&mut cmd, "file", csv_file.display());
        if let Some(refresh) = self.refresh {
            push_kv(&mut cmd, "refresh", refresh);
        }
        self.method_args.compose(idx, &mut cmd);
        Ok(cmd)
    }
}

fn check_output_basename(base: &Path) -> Result<PathBuf, ArgError> {
    let bad = || ArgError::BadOutputPath(base.to_path_buf());
    let parent = match base.parent() {
        Some(p) if p.as_os_str().is_empty() => Path::new("."),
        Some(p) => p,
        None => return Err(bad()),
    };
    if !parent.is_dir() {
        return Err(bad());
    }
    let existed = base.exists();
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(base)
        .map_err(|_| bad())?;
    if !existed {
        std::fs::remove_file(base).map_err(|_| bad())?;
    }
    Ok(base.with_extension(""))
}
