use anyhow::Context;
use std::path::{Path, PathBuf};

/// Model data given either as a JSON file on disk or as an inline JSON object.
#[derive(Debug, Clone, PartialEq)]
pub enum DataSource {
    File(PathBuf),
    Inline(serde_json::Value),
}

impl DataSource {
    pub fn parse_inline(raw: &str) -> anyhow::Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(raw).context("--data-json is not valid JSON")?;
        Ok(DataSource::Inline(value))
    }

    /// Path CmdStan can read. Inline objects are written to `dir/data-<n>.json`.
    pub fn materialize(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        match self {
            DataSource::File(p) => Ok(p.clone()),
            DataSource::Inline(v) => {
                if !v.is_object() {
                    anyhow::bail!("inline data must be a JSON object, found {}", kind(v));
                }
                std::fs::create_dir_all(dir)?;
                let path = next_free(dir);
                std::fs::write(&path, serde_json::to_string_pretty(v)?)
                    .with_context(|| format!("write data file {}", path.display()))?;
                tracing::debug!(path = %path.display(), "wrote inline data");
                Ok(path)
            }
        }
    }
}

fn next_free(dir: &Path) -> PathBuf {
    let mut n = 0usize;
    loop {
        let candidate = dir.join(format!("data-{}.json", n));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

fn kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
