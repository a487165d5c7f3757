//! Service layer containing business logic and side-effect helpers.
//!
//! ## Service map
//! - `toolchain.rs` — locating and validating a CmdStan installation.
//! - `install.rs` — release download, extraction and build.
//! - `model.rs` — Stan programs, executables and compilation.
//! - `args.rs` — per-method argument validation and argv composition.
//! - `data.rs` — data files and inline JSON data.
//! - `runner.rs` — parallel chain processes and their output files.
//! - `stan_csv.rs` — Stan CSV parsing and consistency checks.
//! - `fit.rs` — draws arrays and per-method results.
//! - `diagnostics.rs` — R-hat, ESS, quantiles and the `diagnose` utility.
//! - `storage.rs` — config persistence under HOME and scratch dirs.
//! - `output.rs` — JSON/text output helpers.
//!
//! ## Conventions
//! - Prefer pure helpers where possible.
//! - Side effects should be explicit and localized.
//! - Keep command handlers thin; delegate to services.

pub mod args;
pub mod data;
pub mod diagnostics;
pub mod fit;
pub mod install;
pub mod model;
pub mod output;
pub mod runner;
pub mod stan_csv;
pub mod storage;
pub mod toolchain;
