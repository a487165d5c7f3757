//! Shared data model layer (structs/constants only).
//!
//! ## Files
//! - `models.rs` — config, report and JSON output structs.
//! - `errors.rs` — typed errors raised at service seams.
//! - `constants.rs` — toolchain names, URLs and defaults.
//!
//! ## Rule of thumb
//! Domain types should be data-only: no filesystem/network/process side effects.
//!
//! ## Compatibility note
//! Changes in these structs can affect `--json` outputs.
//! Keep schema-impacting changes synchronized with `docs/contracts/*`.

pub mod constants;
pub mod errors;
pub mod models;
