use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Serialize)]
pub struct JsonOut<T: Serialize> {
    pub ok: bool,
    pub data: T,
}

/// User settings persisted at `~/.config/stanctl/config.toml`.
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmdstan_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_cores: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

#[derive(Serialize, Clone, Debug)]
pub struct ToolchainReport {
    pub root: PathBuf,
    pub version: Option<String>,
    pub source: String,
}

#[derive(Serialize, Clone, Debug)]
pub struct InstalledToolchain {
    pub version: String,
    pub root: PathBuf,
}

#[derive(Serialize, Debug)]
pub struct InstallReport {
    pub version: String,
    pub root: PathBuf,
    pub status: String,
}

#[derive(Serialize, Debug)]
pub struct CompileReport {
    pub model: String,
    pub stan_file: Option<PathBuf>,
    pub exe_file: PathBuf,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Serialize, Debug, Clone)]
pub struct ChainReport {
    pub chain_id: u32,
    pub csv_file: PathBuf,
    pub stdout_file: PathBuf,
    pub retcode: Option<i32>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub name: String,
    pub mean: f64,
    pub mcse: f64,
    pub sd: f64,
    pub q5: f64,
    pub q50: f64,
    pub q95: f64,
    pub n_eff: f64,
    pub r_hat: f64,
}

/// Adapted inverse mass matrix: diagonal elements or the full matrix.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum InvMetric {
    Diag(Vec<f64>),
    Dense(Vec<Vec<f64>>),
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ChainDiagnostics {
    pub chain_id: u32,
    pub step_size: Option<f64>,
    pub inv_metric: Option<InvMetric>,
    pub divergences: usize,
    pub max_treedepth_hits: usize,
    pub elapsed_secs: Option<f64>,
}

#[derive(Serialize, Debug)]
pub struct SampleReport {
    pub model: String,
    pub chains: Vec<ChainReport>,
    pub num_draws: usize,
    pub metric: Option<String>,
    pub summary: Vec<SummaryRow>,
    pub diagnostics: Vec<ChainDiagnostics>,
}

#[derive(Serialize, Debug)]
pub struct OptimizeReport {
    pub model: String,
    pub csv_file: PathBuf,
    pub values: BTreeMap<String, f64>,
}

#[derive(Serialize, Debug)]
pub struct VariationalReport {
    pub model: String,
    pub csv_file: PathBuf,
    pub eta: Option<f64>,
    pub mean: BTreeMap<String, f64>,
    pub num_draws: usize,
}

#[derive(Serialize, Debug)]
pub struct GenerateQuantitiesReport {
    pub model: String,
    pub chains: Vec<ChainReport>,
    pub generated_columns: Vec<String>,
    pub num_draws: usize,
    pub summary: Vec<SummaryRow>,
}

#[derive(Serialize, Debug)]
pub struct DiagnoseReport {
    pub csv_files: Vec<PathBuf>,
    pub output: String,
}
