//! Convergence statistics over per-chain draws of a single column, and the
//! toolchain's own `diagnose` utility.
//!
//! R-hat and effective sample size follow the split-chain definitions of
//! Gelman et al., BDA3 ch. 11, with Geyer's initial positive sequence for the
//! autocorrelation sum. Every statistic is NaN when a chain has fewer than
//! [`MIN_DRAWS`] draws or the within-chain variance vanishes.

use crate::domain::errors::ToolchainError;
use crate::services::toolchain::Toolchain;
use anyhow::Context;
use std::cmp::Ordering;
use std::path::PathBuf;
use std::process::Command;

pub const MIN_DRAWS: usize = 4;

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn variance(xs: &[f64]) -> f64 {
    let m = mean(xs);
    xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() as f64 - 1.0)
}

fn usable(chains: &[Vec<f64>]) -> bool {
    !chains.is_empty()
        && chains.iter().all(|c| c.len() >= MIN_DRAWS)
        && chains.iter().all(|c| c.len() == chains[0].len())
}

fn split(chains: &[Vec<f64>]) -> Vec<&[f64]> {
    chains
        .iter()
        .flat_map(|c| {
            let half = c.len() / 2;
            // odd lengths drop the middle draw so both halves match
            [&c[..half], &c[c.len() - half..]]
        })
        .collect()
}

/// Mean within-chain variance W and the pooled variance estimate var+.
fn variance_components(parts: &[&[f64]]) -> (f64, f64) {
    let m = parts.len() as f64;
    let n = parts[0].len() as f64;
    let means: Vec<f64> = parts.iter().map(|p| mean(p)).collect();
    let grand = mean(&means);
    let b = n / (m - 1.0) * means.iter().map(|x| (x - grand).powi(2)).sum::<f64>();
    let w = parts.iter().map(|p| variance(p)).sum::<f64>() / m;
    let var_plus = (n - 1.0) / n * w + b / n;
    (w, var_plus)
}

pub fn split_rhat(chains: &[Vec<f64>]) -> f64 {
    if !usable(chains) {
        return f64::NAN;
    }
    let parts = split(chains);
    let (w, var_plus) = variance_components(&parts);
    if !(w > 0.0) {
        return f64::NAN;
    }
    (var_plus / w).sqrt()
}

pub fn ess(chains: &[Vec<f64>]) -> f64 {
    if !usable(chains) {
        return f64::NAN;
    }
    let parts = split(chains);
    let (w, var_plus) = variance_components(&parts);
    if !(w > 0.0) {
        return f64::NAN;
    }
    let m = parts.len();
    let n = parts[0].len();

    let autocov = |lag: usize| -> f64 {
        parts
            .iter()
            .map(|p| {
                let pm = mean(p);
                (0..n - lag).map(|t| (p[t] - pm) * (p[t + lag] - pm)).sum::<f64>() / n as f64
            })
            .sum::<f64>()
            / m as f64
    };
    let rho = |lag: usize| 1.0 - (w - autocov(lag)) / var_plus;

    // pairs start at lag 0; the first pair is always kept
    let mut sum = rho(0) + rho(1);
    let mut lag = 2;
    while lag + 1 < n {
        let pair = rho(lag) + rho(lag + 1);
        if pair < 0.0 {
            break;
        }
        sum += pair;
        lag += 2;
    }
    let total = (m * n) as f64;
    let tau = (-1.0 + 2.0 * sum).max(1.0 / total.log10());
    total / tau
}

/// ESS of rank-normalised draws, robust to heavy tails.
pub fn ess_bulk(chains: &[Vec<f64>]) -> f64 {
    if !usable(chains) {
        return f64::NAN;
    }
    ess(&rank_normalize(chains))
}

fn rank_normalize(chains: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut flat: Vec<(f64, usize, usize)> = chains
        .iter()
        .enumerate()
        .flat_map(|(c, xs)| xs.iter().enumerate().map(move |(d, &x)| (x, c, d)))
        .collect();
    flat.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    let total = flat.len() as f64;
    let mut out: Vec<Vec<f64>> = chains.iter().map(|c| vec![0.0; c.len()]).collect();
    let mut i = 0;
    while i < flat.len() {
        let mut j = i + 1;
        while j < flat.len() && flat[j].0 == flat[i].0 {
            j += 1;
        }
        // tied values share their average 1-based rank
        let rank = (i + j + 1) as f64 / 2.0;
        let z = normal_quantile((rank - 0.375) / (total + 0.25));
        for &(_, c, d) in &flat[i..j] {
            out[c][d] = z;
        }
        i = j;
    }
    out
}

/// Acklam's rational approximation of the standard normal quantile.
fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e1,
        2.209460984245205e2,
        -2.759285104469687e2,
        1.383577518672690e2,
        -3.066479806614716e1,
        2.506628277459239,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e1,
        1.615858368580409e2,
        -1.556989798598866e2,
        6.680131188771972e1,
        -1.328068155288572e1,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-3,
        -3.223964580411365e-1,
        -2.400758277161838,
        -2.549732539343734,
        4.374664141464968,
        2.938163982698783,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-3,
        3.224671290700398e-1,
        2.445134137142996,
        3.754408661907416,
    ];
    const LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };
    if p < LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p > 1.0 - LOW {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    } else {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    }
}

/// Linear-interpolated quantile of already sorted values.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStats {
    pub mean: f64,
    pub sd: f64,
    pub mcse: f64,
    pub q5: f64,
    pub q50: f64,
    pub q95: f64,
    pub n_eff: f64,
    pub r_hat: f64,
}

pub fn column_stats(chains: &[Vec<f64>]) -> ColumnStats {
    let mut all: Vec<f64> = chains.iter().flatten().copied().collect();
    let mean_all = if all.is_empty() { f64::NAN } else { mean(&all) };
    let sd = if all.len() > 1 { variance(&all).sqrt() } else { f64::NAN };
    all.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n_eff = ess_bulk(chains);
    ColumnStats {
        mean: mean_all,
        sd,
        mcse: sd / n_eff.sqrt(),
        q5: quantile_sorted(&all, 0.05),
        q50: quantile_sorted(&all, 0.5),
        q95: quantile_sorted(&all, 0.95),
        n_eff,
        r_hat: split_rhat(chains),
    }
}

/// Runs `bin/diagnose` over sampler output files and returns its report.
pub fn diagnose(toolchain: &Toolchain, csv_files: &[PathBuf]) -> anyhow::Result<String> {
    let exe = toolchain.bin("diagnose");
    if !exe.is_file() {
        anyhow::bail!(
            "{} not found, CmdStan build looks incomplete",
            exe.display()
        );
    }
    let out = Command::new(&exe)
        .args(csv_files)
        .output()
        .with_context(|| format!("failed to launch {}", exe.display()))?;
    if !out.status.success() {
        return Err(ToolchainError::ToolFailed {
            tool: "diagnose".to_string(),
            code: out.status.code().unwrap_or(-1),
            detail: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        }
        .into());
    }
    Ok(String::from_utf8_lossy(&out.stdout).to_string())
}
