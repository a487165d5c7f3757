use crate::cli::{Cli, Commands, RunArgs, SamplerFlags, VariationalFlags};
use crate::domain::models::{
    CompileReport, Config, DiagnoseReport, GenerateQuantitiesReport, OptimizeReport,
    SampleReport, VariationalReport,
};
use crate::services::args::{
    CmdStanArgs, GenerateQuantitiesArgs, Inits, MethodArgs, Metric, OptimizeArgs,
    PerChain, SamplerArgs, VariationalArgs,
};
use crate::services::data::DataSource;
use crate::services::diagnostics::diagnose;
use crate::services::fit::{GqFit, OptimizeFit, SampleFit, VariationalFit};
use crate::services::model::{CompileOptions, StanModel};
use crate::services::output::{emit, summary_table};
use crate::services::runner::RunSet;
use crate::services::storage::{load_config, scratch_dir};
use crate::services::toolchain::resolve;
use anyhow::Context;
use std::path::PathBuf;

const DEFAULT_CHAINS: u32 = 4;

pub fn handle_runtime_commands(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Compile {
            stan_file,
            force,
            include_paths,
            stanc_opts,
            show_code,
        } => {
            let (toolchain, _) = resolve(cli.cmdstan.as_deref())?;
            let mut model = StanModel::from_stan_file(stan_file)?;
            let opts = CompileOptions {
                include_paths: include_paths.clone(),
                stanc_options: stanc_opts.clone(),
                force: *force,
            };
            let status = model.compile(&toolchain, &opts)?;
            let report = CompileReport {
                model: model.name.clone(),
                stan_file: model.stan_file.clone(),
                exe_file: model
                    .exe_file
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("model {} not compiled", model.name))?,
                status: status.as_str().to_string(),
                code: if *show_code { Some(model.code()?) } else { None },
            };
            emit(cli.json, &report, |r| {
                let line = format!("{}\t{}\t{}", r.status, r.model, r.exe_file.display());
                match &r.code {
                    Some(code) => format!("{}\n{}", line, code.trim_end()),
                    None => line,
                }
            })?;
        }
        Commands::Sample { run, sampler } => {
            let ctx = RunContext::prepare(cli, run)?;
            let chains = run.chains.unwrap_or(DEFAULT_CHAINS);
            let method = MethodArgs::Sample(sampler_args(sampler));
            let runset = ctx.launch(run, Some((1..=chains).collect()), method)?;
            let fit = SampleFit::from_runset(&runset)?;
            let requested = match &runset.args.method_args {
                MethodArgs::Sample(s) => s.metric_type(),
                _ => None,
            };
            let diagnostics = fit.sampler_diagnostics();
            for d in &diagnostics {
                if d.divergences > 0 {
                    tracing::warn!(chain = d.chain_id, count = d.divergences, "divergent transitions");
                }
                if d.max_treedepth_hits > 0 {
                    tracing::warn!(chain = d.chain_id, count = d.max_treedepth_hits, "max treedepth reached");
                }
            }
            let report = SampleReport {
                model: ctx.model.name.clone(),
                chains: runset.chain_reports(),
                num_draws: fit.draws.num_draws(),
                metric: requested
                    .map(|t| t.as_str().to_string())
                    .or_else(|| fit.metric_type.clone()),
                summary: fit.summary(),
                diagnostics,
            };
            emit(cli.json, &report, |r| {
                let mut out = String::new();
                for c in &r.chains {
                    out.push_str(&format!("chain {}\t{}\n", c.chain_id, c.csv_file.display()));
                }
                out.push_str(&summary_table(&r.summary));
                out
            })?;
        }
        Commands::Optimize {
            run,
            algorithm,
            init_alpha,
            iter,
        } => {
            let ctx = RunContext::prepare(cli, run)?;
            let method = MethodArgs::Optimize(OptimizeArgs {
                algorithm: algorithm.clone(),
                init_alpha: *init_alpha,
                iter: *iter,
            });
            let runset = ctx.launch(run, None, method)?;
            let fit = OptimizeFit::from_csv_file(&runset.csv_files[0])?;
            let report = OptimizeReport {
                model: ctx.model.name.clone(),
                csv_file: fit.csv_file.clone(),
                values: fit.as_map(),
            };
            emit(cli.json, &report, |r| {
                fit.column_names
                    .iter()
                    .filter_map(|name| r.values.get(name).map(|v| format!("{}\t{}", name, v)))
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
        }
        Commands::Variational { run, variational } => {
            let ctx = RunContext::prepare(cli, run)?;
            let method = MethodArgs::Variational(variational_args(variational));
            let runset = ctx.launch(run, None, method)?;
            let fit = VariationalFit::from_csv_file(&runset.csv_files[0])?;
            let report = VariationalReport {
                model: ctx.model.name.clone(),
                csv_file: fit.csv_file.clone(),
                eta: fit.eta,
                mean: fit.mean_map(),
                num_draws: fit.draws.len(),
            };
            emit(cli.json, &report, |r| {
                let mut lines = vec![format!(
                    "eta\t{}",
                    r.eta.map(|e| e.to_string()).unwrap_or_else(|| "n/a".to_string())
                )];
                lines.extend(
                    fit.column_names
                        .iter()
                        .filter_map(|n| r.mean.get(n).map(|v| format!("{}\t{}", n, v))),
                );
                lines.join("\n")
            })?;
        }
        Commands::GenerateQuantities {
            run,
            fitted_params,
            combined,
        } => {
            let fitted = SampleFit::from_csv_files(fitted_params)
                .context("fitted params must be sampler output")?;
            let ctx = RunContext::prepare(cli, run)?;
            let chain_ids: Vec<u32> = (1..=fitted_params.len() as u32).collect();
            let method = MethodArgs::GenerateQuantities(GenerateQuantitiesArgs {
                sample_csv_files: fitted_params.clone(),
            });
            let runset = ctx.launch(run, Some(chain_ids), method)?;
            let fit = GqFit::from_runset(&runset, fitted)?;
            let draws = if *combined {
                fit.combined()
            } else {
                fit.generated.clone()
            };
            let (num_draws, _, _) = draws.shape();
            let report = GenerateQuantitiesReport {
                model: ctx.model.name.clone(),
                chains: runset.chain_reports(),
                generated_columns: fit.generated_columns().to_vec(),
                num_draws,
                summary: draws.summary(),
            };
            emit(cli.json, &report, |r| summary_table(&r.summary))?;
        }
        Commands::Summary { csv_files, params } => {
            let fit = SampleFit::from_csv_files(csv_files)?;
            let rows = if params.is_empty() {
                fit.summary()
            } else {
                fit.select(params)?.summary()
            };
            emit(cli.json, &rows, |r| summary_table(r))?;
        }
        Commands::Diagnose { csv_files } => {
            let (toolchain, _) = resolve(cli.cmdstan.as_deref())?;
            let report = DiagnoseReport {
                csv_files: csv_files.clone(),
                output: diagnose(&toolchain, csv_files)?,
            };
            emit(cli.json, &report, |r| r.output.trim_end().to_string())?;
        }
        other => anyhow::bail!("unhandled command {:?}", other),
    }
    Ok(())
}

/// Model, output directory and data file shared by every launch.
struct RunContext {
    config: Config,
    model: StanModel,
    output_dir: PathBuf,
    data: Option<PathBuf>,
}

impl RunContext {
    fn prepare(cli: &Cli, run: &RunArgs) -> anyhow::Result<Self> {
        let config = load_config()?;
        let mut model = StanModel::open(&run.model)?;
        if model.stan_file.is_some() {
            let (toolchain, _) = resolve(cli.cmdstan.as_deref())?;
            model.compile(&toolchain, &CompileOptions::default())?;
        }

        let output_dir = match run.output_dir.clone().or_else(|| config.output_dir.clone()) {
            Some(dir) => {
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("create output dir {}", dir.display()))?;
                dir
            }
            None => scratch_dir(&model.name)?,
        };

        let source = match (&run.data, &run.data_json) {
            (Some(path), _) => Some(DataSource::File(path.clone())),
            (None, Some(raw)) => Some(DataSource::parse_inline(raw)?),
            (None, None) => None,
        };
        let data = source.map(|s| s.materialize(&output_dir)).transpose()?;

        Ok(Self {
            config,
            model,
            output_dir,
            data,
        })
    }

    fn launch(
        &self,
        run: &RunArgs,
        chain_ids: Option<Vec<u32>>,
        method: MethodArgs,
    ) -> anyhow::Result<RunSet> {
        let mut args = CmdStanArgs::new(
            self.model.name.clone(),
            self.model.exe_file.clone(),
            chain_ids,
            method,
        );
        args.data = self.data.clone();
        args.seed = PerChain::from_vec(run.seeds.clone());
        args.inits = Inits::parse(&run.inits);
        args.output_basename = run.output_basename.clone();
        args.refresh = run.refresh;
        args.validate()?;
        let label = args.method();

        let cores = run
            .cores
            .or(self.config.default_cores)
            .unwrap_or_else(super::available_cores);
        let mut runset = RunSet::new(args, &self.output_dir);
        runset.run(cores)?;
        if let Some(dir) = &run.save_to {
            runset.save_csvfiles(dir)?;
        }
        tracing::debug!(method = label.as_str(), runs = runset.num_runs(), "run complete");
        Ok(runset)
    }
}

fn sampler_args(flags: &SamplerFlags) -> SamplerArgs {
    let mut args = SamplerArgs::default();
    args.warmup_iters = flags.warmup_iters;
    args.sampling_iters = flags.sampling_iters;
    args.save_warmup = flags.save_warmup;
    args.thin = flags.thin;
    args.max_treedepth = flags.max_treedepth;
    args.metric = Metric::parse(&flags.metric);
    args.step_size = PerChain::from_vec(flags.step_size.clone());
    args.adapt_engaged = flags.adapt_engaged;
    args.adapt_delta = flags.adapt_delta;
    args
}

fn variational_args(flags: &VariationalFlags) -> VariationalArgs {
    VariationalArgs {
        algorithm: flags.algorithm.clone(),
        iter: flags.iter,
        grad_samples: flags.grad_samples,
        elbo_samples: flags.elbo_samples,
        eta: flags.eta,
        adapt_engaged: !flags.no_adapt,
        adapt_iter: flags.adapt_iter,
        tol_rel_obj: flags.tol_rel_obj,
        eval_elbo: flags.eval_elbo,
        output_samples: flags.output_samples,
    }
}
