//! In-memory results built from parsed Stan CSV files.

use crate::domain::errors::CsvError;
use crate::domain::models::{ChainDiagnostics, InvMetric, SummaryRow};
use crate::services::diagnostics::column_stats;
use crate::services::runner::RunSet;
use crate::services::stan_csv::{check_consistent, StanCsv};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Dense draws array with shape `(draws, chains, columns)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Draws {
    pub column_names: Vec<String>,
    num_draws: usize,
    num_chains: usize,
    data: Vec<f64>,
}

impl Draws {
    /// Builds the array from per-chain row slices; every chain must hold the
    /// same number of rows, each as wide as `column_names`.
    pub fn from_chains(column_names: Vec<String>, chains: &[&[Vec<f64>]]) -> Self {
        let num_chains = chains.len();
        let num_draws = chains.first().map(|c| c.len()).unwrap_or(0);
        let width = column_names.len();
        let mut data = vec![f64::NAN; num_draws * num_chains * width];
        for (c, rows) in chains.iter().enumerate() {
            for (d, row) in rows.iter().enumerate().take(num_draws) {
                let start = (d * num_chains + c) * width;
                let n = row.len().min(width);
                data[start..start + n].copy_from_slice(&row[..n]);
            }
        }
        Self {
            column_names,
            num_draws,
            num_chains,
            data,
        }
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.num_draws, self.num_chains, self.column_names.len())
    }

    pub fn num_draws(&self) -> usize {
        self.num_draws
    }

    pub fn num_chains(&self) -> usize {
        self.num_chains
    }

    pub fn get(&self, draw: usize, chain: usize, column: usize) -> f64 {
        self.data[(draw * self.num_chains + chain) * self.column_names.len() + column]
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_names.iter().position(|c| c == name)
    }

    /// Values of one column for one chain, in draw order.
    pub fn chain_column(&self, chain: usize, column: usize) -> Vec<f64> {
        (0..self.num_draws)
            .map(|d| self.get(d, chain, column))
            .collect()
    }

    pub fn column_by_chain(&self, column: usize) -> Vec<Vec<f64>> {
        (0..self.num_chains)
            .map(|c| self.chain_column(c, column))
            .collect()
    }

    /// Rows of one chain, each as wide as `column_names`.
    pub fn chain_rows(&self, chain: usize) -> Vec<Vec<f64>> {
        let width = self.column_names.len();
        (0..self.num_draws)
            .map(|d| {
                let start = (d * self.num_chains + chain) * width;
                self.data[start..start + width].to_vec()
            })
            .collect()
    }

    /// Columns for the given variable names; `theta` selects `theta` and all
    /// of its elements `theta.1`, `theta.2.1`, ...
    pub fn select(&self, names: &[String]) -> anyhow::Result<Draws> {
        let mut picked = Vec::new();
        for name in names {
            let prefix = format!("{}.", name);
            let matches: Vec<usize> = self
                .column_names
                .iter()
                .enumerate()
                .filter(|(_, c)| *c == name || c.starts_with(&prefix))
                .map(|(i, _)| i)
                .collect();
            if matches.is_empty() {
                anyhow::bail!("unknown parameter name: {}", name);
            }
            picked.extend(matches);
        }
        let column_names = picked.iter().map(|&k| self.column_names[k].clone()).collect();
        let chains: Vec<Vec<Vec<f64>>> = (0..self.num_chains)
            .map(|c| {
                (0..self.num_draws)
                    .map(|d| picked.iter().map(|&k| self.get(d, c, k)).collect())
                    .collect()
            })
            .collect();
        let refs: Vec<&[Vec<f64>]> = chains.iter().map(|c| c.as_slice()).collect();
        Ok(Draws::from_chains(column_names, &refs))
    }

    /// Summary rows for `lp__` and every non-diagnostic column.
    pub fn summary(&self) -> Vec<SummaryRow> {
        self.column_names
            .iter()
            .enumerate()
            .filter(|(_, name)| *name == "lp__" || !name.ends_with("__"))
            .map(|(k, name)| {
                let s = column_stats(&self.column_by_chain(k));
                SummaryRow {
                    name: name.clone(),
                    mean: s.mean,
                    mcse: s.mcse,
                    sd: s.sd,
                    q5: s.q5,
                    q50: s.q50,
                    q95: s.q95,
                    n_eff: s.n_eff,
                    r_hat: s.r_hat,
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct SampleFit {
    pub csv_files: Vec<PathBuf>,
    pub chain_ids: Vec<u32>,
    pub draws: Draws,
    pub warmup: Option<Draws>,
    pub metric_type: Option<String>,
    pub step_size: Vec<Option<f64>>,
    pub inv_metric: Vec<Option<InvMetric>>,
    pub elapsed_secs: Vec<Option<f64>>,
    max_depth: usize,
}

impl SampleFit {
    pub fn from_runset(runset: &RunSet) -> anyhow::Result<Self> {
        let mut fit = Self::from_csv_files(&runset.csv_files)?;
        fit.chain_ids = runset.chain_ids.clone();
        Ok(fit)
    }

    pub fn from_csv_files(files: &[PathBuf]) -> anyhow::Result<Self> {
        let csvs = files
            .iter()
            .map(|f| StanCsv::read(f))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self::from_csvs(&csvs)?)
    }

    pub fn from_csvs(csvs: &[StanCsv]) -> Result<Self, CsvError> {
        for csv in csvs {
            csv.check_sampler()?;
        }
        check_consistent(csvs)?;
        let first = &csvs[0];
        let warmup_rows = first.warmup_rows();
        let column_names = first.column_names.clone();

        let sampling: Vec<&[Vec<f64>]> = csvs.iter().map(|c| &c.rows[warmup_rows..]).collect();
        let draws = Draws::from_chains(column_names.clone(), &sampling);
        let warmup = (warmup_rows > 0).then(|| {
            let rows: Vec<&[Vec<f64>]> = csvs.iter().map(|c| &c.rows[..warmup_rows]).collect();
            Draws::from_chains(column_names, &rows)
        });

        Ok(Self {
            csv_files: csvs.iter().map(|c| c.path.clone()).collect(),
            chain_ids: csvs
                .iter()
                .enumerate()
                .map(|(i, c)| c.chain_id().unwrap_or(i as u32 + 1))
                .collect(),
            draws,
            warmup,
            metric_type: first.config.get("metric").cloned(),
            step_size: csvs.iter().map(|c| c.adaptation.step_size).collect(),
            inv_metric: csvs.iter().map(|c| c.adaptation.inv_metric.clone()).collect(),
            elapsed_secs: csvs.iter().map(|c| c.timing.total).collect(),
            max_depth: first
                .config
                .get("max_depth")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        })
    }

    pub fn summary(&self) -> Vec<SummaryRow> {
        self.draws.summary()
    }

    pub fn select(&self, names: &[String]) -> anyhow::Result<Draws> {
        self.draws.select(names)
    }

    /// Adapted step size and inverse metric, divergent transitions and
    /// treedepth saturation per chain.
    pub fn sampler_diagnostics(&self) -> Vec<ChainDiagnostics> {
        let divergent = self.draws.column_index("divergent__");
        let treedepth = self.draws.column_index("treedepth__");
        let count = |chain: usize, col: Option<usize>, hit: &dyn Fn(f64) -> bool| {
            col.map(|k| {
                self.draws
                    .chain_column(chain, k)
                    .into_iter()
                    .filter(|v| hit(*v))
                    .count()
            })
            .unwrap_or(0)
        };
        let max_depth = self.max_depth as f64;
        (0..self.draws.num_chains())
            .map(|c| ChainDiagnostics {
                chain_id: self.chain_ids[c],
                step_size: self.step_size[c],
                inv_metric: self.inv_metric[c].clone(),
                divergences: count(c, divergent, &|v: f64| v > 0.0),
                max_treedepth_hits: count(c, treedepth, &|v: f64| v >= max_depth),
                elapsed_secs: self.elapsed_secs[c],
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct OptimizeFit {
    pub csv_file: PathBuf,
    pub column_names: Vec<String>,
    pub values: Vec<f64>,
}

impl OptimizeFit {
    pub fn from_csv_file(file: &Path) -> anyhow::Result<Self> {
        let csv = StanCsv::read(file)?;
        let values = csv.check_optimize()?.to_vec();
        Ok(Self {
            csv_file: csv.path,
            column_names: csv.column_names,
            values,
        })
    }

    pub fn as_map(&self) -> BTreeMap<String, f64> {
        self.column_names
            .iter()
            .cloned()
            .zip(self.values.iter().copied())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct VariationalFit {
    pub csv_file: PathBuf,
    pub column_names: Vec<String>,
    pub mean: Vec<f64>,
    pub draws: Vec<Vec<f64>>,
    pub eta: Option<f64>,
}

impl VariationalFit {
    pub fn from_csv_file(file: &Path) -> anyhow::Result<Self> {
        let csv = StanCsv::read(file)?;
        let (mean, draws) = csv.check_variational()?;
        let (mean, draws) = (mean.to_vec(), draws.to_vec());
        Ok(Self {
            csv_file: csv.path,
            column_names: csv.column_names,
            mean,
            draws,
            eta: csv.adaptation.eta,
        })
    }

    pub fn mean_map(&self) -> BTreeMap<String, f64> {
        self.column_names
            .iter()
            .cloned()
            .zip(self.mean.iter().copied())
            .collect()
    }
}

/// Standalone generated quantities paired with the draws they were computed from.
#[derive(Debug, Clone)]
pub struct GqFit {
    pub csv_files: Vec<PathBuf>,
    pub fitted: SampleFit,
    pub generated: Draws,
}

impl GqFit {
    pub fn from_runset(runset: &RunSet, fitted: SampleFit) -> anyhow::Result<Self> {
        Self::from_csv_files(&runset.csv_files, fitted)
    }

    pub fn from_csv_files(files: &[PathBuf], fitted: SampleFit) -> anyhow::Result<Self> {
        let csvs = files
            .iter()
            .map(|f| StanCsv::read(f))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self::from_csvs(&csvs, fitted)?)
    }

    /// Keeps only columns the fitted draws do not already have, so output
    /// files that echo the parameters are handled like bare ones.
    pub fn from_csvs(csvs: &[StanCsv], fitted: SampleFit) -> Result<Self, CsvError> {
        check_consistent(csvs)?;
        let first = &csvs[0];
        let fitted_rows = fitted.draws.num_draws() + fitted.warmup.as_ref().map_or(0, |w| w.num_draws());
        if first.rows.len() != fitted_rows {
            return Err(CsvError::DrawCount {
                file: first.path.clone(),
                expected: fitted_rows,
                found: first.rows.len(),
            });
        }
        let skip = first.rows.len() - fitted.draws.num_draws();
        let keep: Vec<usize> = first
            .column_names
            .iter()
            .enumerate()
            .filter(|(_, n)| fitted.draws.column_index(n).is_none())
            .map(|(i, _)| i)
            .collect();
        let names = keep.iter().map(|&i| first.column_names[i].clone()).collect();
        let chains: Vec<Vec<Vec<f64>>> = csvs
            .iter()
            .map(|c| {
                c.rows[skip..]
                    .iter()
                    .map(|r| keep.iter().map(|&i| r[i]).collect())
                    .collect()
            })
            .collect();
        let refs: Vec<&[Vec<f64>]> = chains.iter().map(|c| c.as_slice()).collect();
        Ok(Self {
            csv_files: csvs.iter().map(|c| c.path.clone()).collect(),
            generated: Draws::from_chains(names, &refs),
            fitted,
        })
    }

    pub fn generated_columns(&self) -> &[String] {
        &self.generated.column_names
    }

    /// Fitted draws with the generated columns appended.
    pub fn combined(&self) -> Draws {
        let mut names = self.fitted.draws.column_names.clone();
        names.extend(self.generated.column_names.iter().cloned());
        let chains: Vec<Vec<Vec<f64>>> = (0..self.fitted.draws.num_chains())
            .map(|c| {
                self.fitted
                    .draws
                    .chain_rows(c)
                    .into_iter()
                    .zip(self.generated.chain_rows(c))
                    .map(|(mut a, b)| {
                        a.extend(b);
                        a
                    })
                    .collect()
            })
            .collect();
        let refs: Vec<&[Vec<f64>]> = chains.iter().map(|c| c.as_slice()).collect();
        Draws::from_chains(names, &refs)
    }
}
