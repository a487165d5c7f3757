pub const CMDSTAN_ENV: &str = "CMDSTAN";
pub const CMDSTAN_DIR_PREFIX: &str = "cmdstan-";
pub const DEFAULT_INSTALL_DIR: &str = ".cmdstan";

pub const GITHUB_LATEST_RELEASE: &str =
    "https://api.github.com/repos/stan-dev/cmdstan/releases/latest";
pub const GITHUB_RELEASE_DOWNLOAD: &str =
    "https://github.com/stan-dev/cmdstan/releases/download";

pub const DOWNLOAD_ATTEMPTS: u32 = 3;
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 600;

/// Upper bound (inclusive) of the seed drawn when none is given.
pub const MAX_RANDOM_SEED: u32 = 99_999;
