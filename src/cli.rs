use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "stanctl", version, about = "Drive a CmdStan toolchain from the command line")]
pub struct Cli {
    #[arg(long, global = true, help = "Output machine-readable JSON")]
    pub json: bool,
    #[arg(long, global = true, value_name = "DIR", help = "CmdStan installation to use")]
    pub cmdstan: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        default_value = "warn",
        help = "Log verbosity (error, warn, info, debug, trace); RUST_LOG overrides"
    )]
    pub log_level: tracing::Level,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download and build a CmdStan release.
    Install {
        #[arg(long, help = "Parent directory for installations (default ~/.cmdstan)")]
        dir: Option<PathBuf>,
        #[arg(long, help = "Release to install (default: latest)")]
        version: Option<String>,
        #[arg(long, help = "Parallel make jobs")]
        cores: Option<usize>,
    },
    Toolchain {
        #[command(subcommand)]
        command: ToolchainCommands,
    },
    /// Compile a Stan program into a model executable.
    Compile {
        stan_file: PathBuf,
        #[arg(long, default_value_t = false)]
        force: bool,
        #[arg(long = "include-path")]
        include_paths: Vec<PathBuf>,
        #[arg(long = "stanc-opt", allow_hyphen_values = true)]
        stanc_opts: Vec<String>,
        #[arg(long, default_value_t = false, help = "Include the Stan program text in the report")]
        show_code: bool,
    },
    /// Run the NUTS sampler.
    Sample {
        #[command(flatten)]
        run: RunArgs,
        #[command(flatten)]
        sampler: SamplerFlags,
    },
    /// Find a posterior mode.
    Optimize {
        #[command(flatten)]
        run: RunArgs,
        #[arg(long)]
        algorithm: Option<String>,
        #[arg(long)]
        init_alpha: Option<f64>,
        #[arg(long)]
        iter: Option<u32>,
    },
    /// Fit a variational approximation (ADVI).
    Variational {
        #[command(flatten)]
        run: RunArgs,
        #[command(flatten)]
        variational: VariationalFlags,
    },
    /// Compute generated quantities from existing sampler output.
    GenerateQuantities {
        #[command(flatten)]
        run: RunArgs,
        #[arg(long, required = true, num_args = 1..)]
        fitted_params: Vec<PathBuf>,
        #[arg(long, default_value_t = false, help = "Summarize fitted draws together with generated columns")]
        combined: bool,
    },
    /// Summarize existing sampler CSV files.
    Summary {
        #[arg(required = true)]
        csv_files: Vec<PathBuf>,
        #[arg(long = "param", help = "Restrict to these variables")]
        params: Vec<String>,
    },
    /// Run the toolchain diagnose utility.
    Diagnose {
        #[arg(required = true)]
        csv_files: Vec<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ToolchainCommands {
    /// Print the resolved installation and where it came from.
    Show,
    /// Persist an installation directory in the config file.
    Set { dir: PathBuf },
    /// List installations under the install base.
    List {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

/// Flags shared by every method that launches the model.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// A `.stan` program (compiled on demand) or a model executable.
    pub model: PathBuf,
    #[arg(long, conflicts_with = "data_json")]
    pub data: Option<PathBuf>,
    #[arg(long)]
    pub data_json: Option<String>,
    #[arg(long = "seed")]
    pub seeds: Vec<u32>,
    #[arg(long, allow_hyphen_values = true)]
    pub inits: Vec<String>,
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
    #[arg(long)]
    pub output_basename: Option<PathBuf>,
    #[arg(long)]
    pub refresh: Option<u32>,
    #[arg(long)]
    pub chains: Option<u32>,
    #[arg(long)]
    pub cores: Option<usize>,
    #[arg(long, help = "Move CSV output here after a successful run")]
    pub save_to: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct SamplerFlags {
    #[arg(long)]
    pub warmup_iters: Option<u32>,
    #[arg(long)]
    pub sampling_iters: Option<u32>,
    #[arg(long, default_value_t = false)]
    pub save_warmup: bool,
    #[arg(long)]
    pub thin: Option<u32>,
    #[arg(long)]
    pub max_treedepth: Option<u32>,
    #[arg(long, help = "diag, dense, or metric JSON file(s), one per chain")]
    pub metric: Vec<String>,
    #[arg(long = "step-size")]
    pub step_size: Vec<f64>,
    #[arg(long)]
    pub adapt_engaged: Option<bool>,
    #[arg(long)]
    pub adapt_delta: Option<f64>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct VariationalFlags {
    #[arg(long)]
    pub algorithm: Option<String>,
    #[arg(long)]
    pub iter: Option<u32>,
    #[arg(long)]
    pub grad_samples: Option<u32>,
    #[arg(long)]
    pub elbo_samples: Option<u32>,
    #[arg(long)]
    pub eta: Option<f64>,
    #[arg(long, default_value_t = false)]
    pub no_adapt: bool,
    #[arg(long)]
    pub adapt_iter: Option<u32>,
    #[arg(long)]
    pub tol_rel_obj: Option<f64>,
    #[arg(long)]
    pub eval_elbo: Option<u32>,
    #[arg(long)]
    pub output_samples: Option<u32>,
}
