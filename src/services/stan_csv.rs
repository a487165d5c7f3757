//! Reader for the Stan CSV output format.
//!
//! Layout of a sampler file:
//!
//! ```text
//! # model = bernoulli_model
//! # method = sample (Default)
//! #   sample
//! #     num_samples = 1000 (Default)
//! ...
//! lp__,accept_stat__,stepsize__,treedepth__,n_leapfrog__,divergent__,energy__,theta
//! # Adaptation terminated
//! # Step size = 0.893542
//! # Diagonal elements of inverse mass matrix:
//! # 0.483503
//! -7.07296,0.937368,0.893542,1,3,0,7.3166,0.155556
//! ...
//! #  Elapsed Time: 0.005 seconds (Warm-up)
//! #                0.014 seconds (Sampling)
//! #                0.019 seconds (Total)
//! ```

use crate::domain::errors::CsvError;
use crate::domain::models::InvMetric;
use anyhow::Context;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Adaptation {
    pub step_size: Option<f64>,
    pub inv_metric: Option<InvMetric>,
    /// ADVI stepsize scale.
    pub eta: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timing {
    pub warmup: Option<f64>,
    pub sampling: Option<f64>,
    pub total: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StanCsv {
    pub path: PathBuf,
    pub config: BTreeMap<String, String>,
    pub column_names: Vec<String>,
    pub adaptation: Adaptation,
    pub rows: Vec<Vec<f64>>,
    pub timing: Timing,
}

enum Pending {
    None,
    DiagRow,
    DenseRows,
}

fn parse_row(line: &str) -> Option<Vec<f64>> {
    line.split(',')
        .map(|v| v.trim().parse::<f64>().ok())
        .collect()
}

fn parse_config_line(body: &str) -> Option<(String, String)> {
    let (k, v) = body.split_once(" = ")?;
    let key = k.trim();
    if key.is_empty() || key.contains(' ') {
        return None;
    }
    let value = v.trim().trim_end_matches("(Default)").trim();
    Some((key.to_string(), value.to_string()))
}

fn parse_seconds(body: &str, label: &str) -> Option<f64> {
    let rest = body.trim().strip_prefix("Elapsed Time:").unwrap_or(body).trim();
    let (num, tail) = rest.split_once(' ')?;
    if !tail.contains(label) {
        return None;
    }
    num.parse().ok()
}

impl StanCsv {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read csv file {}", path.display()))?;
        Ok(Self::parse(path, &raw)?)
    }

    pub fn parse(path: &Path, raw: &str) -> Result<Self, CsvError> {
        let file = path.to_path_buf();
        let mut config = BTreeMap::new();
        let mut column_names: Option<Vec<String>> = None;
        let mut adaptation = Adaptation::default();
        let mut timing = Timing::default();
        let mut rows = Vec::new();
        let mut pending = Pending::None;
        let mut dense: Vec<Vec<f64>> = Vec::new();

        for (lineno, line) in raw.lines().enumerate() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            if let Some(body) = line.strip_prefix('#') {
                let body = body.trim();
                if column_names.is_none() {
                    if let Some((k, v)) = parse_config_line(body) {
                        config.insert(k, v);
                    }
                    continue;
                }
                match pending {
                    Pending::DiagRow => {
                        let values = parse_row(body).ok_or_else(|| CsvError::BadAdaptation {
                            file: file.clone(),
                            detail: format!("line {}: bad metric row", lineno + 1),
                        })?;
                        adaptation.inv_metric = Some(InvMetric::Diag(values));
                        pending = Pending::None;
                        continue;
                    }
                    Pending::DenseRows => {
                        if let Some(values) = parse_row(body) {
                            dense.push(values);
                            continue;
                        }
                        adaptation.inv_metric = Some(InvMetric::Dense(std::mem::take(&mut dense)));
                        pending = Pending::None;
                    }
                    Pending::None => {}
                }
                if let Some(v) = body.strip_prefix("Step size =") {
                    adaptation.step_size = v.trim().parse().ok();
                } else if body.starts_with("Diagonal elements of inverse mass matrix") {
                    pending = Pending::DiagRow;
                } else if body.starts_with("Elements of inverse mass matrix") {
                    pending = Pending::DenseRows;
                } else if let Some(v) = body.strip_prefix("eta =") {
                    adaptation.eta = v.trim().parse().ok();
                } else if let Some(s) = parse_seconds(body, "(Warm-up)") {
                    timing.warmup = Some(s);
                } else if let Some(s) = parse_seconds(body, "(Sampling)") {
                    timing.sampling = Some(s);
                } else if let Some(s) = parse_seconds(body, "(Total)") {
                    timing.total = Some(s);
                }
                continue;
            }
            if let Pending::DenseRows = pending {
                adaptation.inv_metric = Some(InvMetric::Dense(std::mem::take(&mut dense)));
                pending = Pending::None;
            }
            let width = match column_names.as_ref().map(|names| names.len()) {
                Some(w) => w,
                None => {
                    column_names = Some(line.split(',').map(|s| s.trim().to_string()).collect());
                    continue;
                }
            };
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() != width {
                return Err(CsvError::RowWidth {
                    file,
                    line: lineno + 1,
                    expected: width,
                    found: fields.len(),
                });
            }
            let mut row = Vec::with_capacity(fields.len());
            for (col, f) in fields.iter().enumerate() {
                let v = f.trim().parse::<f64>().map_err(|_| CsvError::BadValue {
                    file: file.clone(),
                    line: lineno + 1,
                    column: col + 1,
                    value: f.to_string(),
                })?;
                row.push(v);
            }
            rows.push(row);
        }
        if let Pending::DenseRows = pending {
            adaptation.inv_metric = Some(InvMetric::Dense(dense));
        }

        let column_names = column_names.ok_or(CsvError::NoHeader { file: file.clone() })?;
        Ok(Self {
            path: file,
            config,
            column_names,
            adaptation,
            rows,
            timing,
        })
    }

    pub fn method(&self) -> Option<&str> {
        self.config.get("method").map(|s| s.as_str())
    }

    pub fn chain_id(&self) -> Option<u32> {
        self.config.get("id").and_then(|v| v.parse().ok())
    }

    fn config_num(&self, key: &'static str, default: usize) -> Result<usize, CsvError> {
        match self.config.get(key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| CsvError::BadConfig {
                file: self.path.clone(),
                key,
                value: v.clone(),
            }),
        }
    }

    fn config_flag(&self, key: &'static str) -> Result<bool, CsvError> {
        match self.config.get(key).map(|s| s.as_str()) {
            None | Some("0") | Some("false") => Ok(false),
            Some("1") | Some("true") => Ok(true),
            Some(other) => Err(CsvError::BadConfig {
                file: self.path.clone(),
                key,
                value: other.to_string(),
            }),
        }
    }

    fn expect_method(&self, expected: &'static str) -> Result<(), CsvError> {
        match self.method() {
            Some(m) if m == expected => Ok(()),
            other => Err(CsvError::WrongMethod {
                file: self.path.clone(),
                expected,
                found: other.unwrap_or("none").to_string(),
            }),
        }
    }

    /// Whether warmup draws are stored ahead of the sampling draws.
    pub fn save_warmup(&self) -> bool {
        self.config_flag("save_warmup").unwrap_or(false)
    }

    /// Number of warmup rows at the top of `rows` (0 unless `save_warmup`).
    pub fn warmup_rows(&self) -> usize {
        if !self.save_warmup() {
            return 0;
        }
        let thin = self.config_num("thin", 1).unwrap_or(1).max(1);
        self.config_num("num_warmup", 1000)
            .map(|w| w.div_ceil(thin))
            .unwrap_or(0)
    }

    /// Validates a sampler output file and returns its expected draw count,
    /// warmup rows included.
    pub fn check_sampler(&self) -> Result<usize, CsvError> {
        self.expect_method("sample")?;
        match self.column_names.first().map(|s| s.as_str()) {
            Some("lp__") => {}
            other => {
                return Err(CsvError::BadHeader {
                    file: self.path.clone(),
                    found: other.unwrap_or("").to_string(),
                })
            }
        }
        let num_samples = self.config_num("num_samples", 1000)?;
        let num_warmup = self.config_num("num_warmup", 1000)?;
        let thin = self.config_num("thin", 1)?.max(1);
        let mut expected = num_samples.div_ceil(thin);
        if self.config_flag("save_warmup")? {
            expected += num_warmup.div_ceil(thin);
        }
        if self.rows.len() != expected {
            return Err(CsvError::DrawCount {
                file: self.path.clone(),
                expected,
                found: self.rows.len(),
            });
        }
        Ok(expected)
    }

    pub fn check_optimize(&self) -> Result<&[f64], CsvError> {
        self.expect_method("optimize")?;
        match self.rows.as_slice() {
            [row] => Ok(row.as_slice()),
            rows => Err(CsvError::RowCount {
                file: self.path.clone(),
                expected: "exactly 1",
                found: rows.len(),
            }),
        }
    }

    /// First row is the approximation mean, the rest are approximate draws.
    pub fn check_variational(&self) -> Result<(&[f64], &[Vec<f64>]), CsvError> {
        self.expect_method("variational")?;
        match self.rows.split_first() {
            Some((mean, draws)) => Ok((mean.as_slice(), draws)),
            None => Err(CsvError::RowCount {
                file: self.path.clone(),
                expected: "at least 1",
                found: 0,
            }),
        }
    }
}

/// Chains must share column names and draw counts.
pub fn check_consistent(chains: &[StanCsv]) -> Result<(), CsvError> {
    let Some((first, rest)) = chains.split_first() else {
        return Err(CsvError::NoFiles);
    };
    for other in rest {
        if other.column_names != first.column_names {
            return Err(CsvError::Inconsistent(
                first.path.clone(),
                other.path.clone(),
                "have different column names",
            ));
        }
        if other.rows.len() != first.rows.len() {
            return Err(CsvError::Inconsistent(
                first.path.clone(),
                other.path.clone(),
                "have different numbers of draws",
            ));
        }
    }
    Ok(())
}
