use crate::domain::models::Config;
use anyhow::Context;
use std::path::PathBuf;

pub fn home_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home))
}

fn config_path() -> anyhow::Result<PathBuf> {
    Ok(home_dir()?.join(".config/stanctl/config.toml"))
}

pub fn load_config() -> anyhow::Result<Config> {
    let p = config_path()?;
    if !p.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(&p)?;
    toml::from_str(&raw).with_context(|| format!("parse {}", p.display()))
}

pub fn save_config(c: &Config) -> anyhow::Result<()> {
    let p = config_path()?;
    if let Some(parent) = p.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&p, toml::to_string_pretty(c)?)?;
    tracing::debug!(path = %p.display(), "config saved");
    Ok(())
}

/// Records `root` as the toolchain to use when nothing else is specified.
pub fn remember_cmdstan_path(root: PathBuf) -> anyhow::Result<()> {
    let mut c = load_config()?;
    c.cmdstan_path = Some(root);
    save_config(&c)
}

/// Fresh unique directory under the system temp dir for run outputs.
pub fn scratch_dir(prefix: &str) -> anyhow::Result<PathBuf> {
    let tag: u32 = rand::random();
    let dir = std::env::temp_dir().join(format!("stanctl-{}-{}-{:08x}", prefix, unix_secs(), tag));
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create output dir {}", dir.display()))?;
    Ok(dir)
}

pub fn unix_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
