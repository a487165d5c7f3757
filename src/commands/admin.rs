use crate::cli::{Cli, Commands, ToolchainCommands};
use crate::domain::models::InstallReport;
use crate::services::install::install;
use crate::services::output::{emit, emit_rows};
use crate::services::storage::{load_config, remember_cmdstan_path};
use crate::services::toolchain::{default_install_base, list_installed, resolve, Origin, Toolchain};

/// Handles `install` and `toolchain`; returns false for any other command.
pub fn handle_admin_commands(cli: &Cli) -> anyhow::Result<bool> {
    match &cli.command {
        Commands::Install {
            dir,
            version,
            cores,
        } => {
            let base = match dir {
                Some(d) => d.clone(),
                None => default_install_base()?,
            };
            let cores = match cores {
                Some(c) => *c,
                None => load_config()?.default_cores.unwrap_or_else(super::available_cores),
            };
            let (toolchain, status) = install(&base, version.as_deref(), cores.max(1))?;
            let report = InstallReport {
                version: toolchain.version.clone().unwrap_or_default(),
                root: toolchain.root.clone(),
                status: status.as_str().to_string(),
            };
            emit(cli.json, &report, |r| {
                format!("{}\tcmdstan {}\t{}", r.status, r.version, r.root.display())
            })?;
        }
        Commands::Toolchain { command } => match command {
            ToolchainCommands::Show => {
                let (toolchain, origin) = resolve(cli.cmdstan.as_deref())?;
                let report = toolchain.report(origin);
                emit(cli.json, &report, |r| {
                    format!(
                        "{}\t{}\t(from {})",
                        r.root.display(),
                        r.version.as_deref().unwrap_or("unknown"),
                        r.source
                    )
                })?;
            }
            ToolchainCommands::Set { dir } => {
                let toolchain = Toolchain::at(dir)?;
                let root = toolchain.root.canonicalize().unwrap_or(toolchain.root.clone());
                remember_cmdstan_path(root.clone())?;
                tracing::info!(root = %root.display(), "toolchain saved to config");
                let report = Toolchain {
                    root,
                    version: toolchain.version,
                }
                .report(Origin::Config);
                emit(cli.json, &report, |r| format!("cmdstan set to {}", r.root.display()))?;
            }
            ToolchainCommands::List { dir } => {
                let base = match dir {
                    Some(d) => d.clone(),
                    None => default_install_base()?,
                };
                let installed = list_installed(&base);
                emit_rows(cli.json, &installed, |t| {
                    format!("{}\t{}", t.version, t.root.display())
                })?;
            }
        },
        _ => return Ok(false),
    }
    Ok(true)
}
