use std::path::PathBuf;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ArgError {
    #[error("sampler expects number of chains to be greater than 0")]
    NoChains,
    #[error("{name} must be {rule}, found {found}")]
    OutOfRange {
        name: &'static str,
        rule: &'static str,
        found: String,
    },
    #[error("adaptation requested but 0 warmup iterations specified, must run warmup iterations")]
    AdaptWithoutWarmup,
    #[error("number of {what} must match number of chains, found {found} {what} for {chains} chains")]
    PerChainMismatch {
        what: &'static str,
        found: usize,
        chains: usize,
    },
    #[error("{what} must not be a list when no chains are used")]
    PerChainWithoutChains { what: &'static str },
    #[error("each chain must have its own {what}, found duplicates in {what} list")]
    DuplicateFiles { what: &'static str },
    #[error("no such file {0}")]
    NoSuchFile(PathBuf),
    #[error("metric files {0}, {1}, inconsistent metrics")]
    InconsistentMetrics(PathBuf, PathBuf),
    #[error("bad metric specification")]
    BadMetric,
    #[error("please specify {method} algorithm as one of [{allowed}], found {found}")]
    UnknownAlgorithm {
        method: &'static str,
        allowed: &'static str,
        found: String,
    },
    #[error("init_alpha must not be set when algorithm is Newton")]
    InitAlphaWithNewton,
    #[error("adaptation not engaged, adapt_iter must be 0, found {0}")]
    AdaptIterWithoutAdapt(u32),
    #[error("no stan model specified")]
    NoModel,
    #[error("model not compiled")]
    NotCompiled,
    #[error("invalid chain_id {0}")]
    InvalidChainId(u32),
    #[error("invalid path for output files: {0}")]
    BadOutputPath(PathBuf),
    #[error("data must be set when optimizing")]
    MissingData,
    #[error("index ({idx}) exceeds number of chains ({chains})")]
    ChainIndex { idx: usize, chains: usize },
    #[error("invalid path for sample csv file: {0}")]
    BadFittedParams(PathBuf),
}

#[derive(thiserror::Error, Debug)]
pub enum ToolchainError {
    #[error("CmdStan not found: set {env}, pass --cmdstan, or run `stanctl install`")]
    NotFound { env: &'static str },
    #[error("no CmdStan installation at {0}")]
    MissingDir(PathBuf),
    #[error("no makefile found in {0}, not a CmdStan installation")]
    NoMakefile(PathBuf),
    #[error("{tool} failed with exit code {code}: {detail}")]
    ToolFailed {
        tool: String,
        code: i32,
        detail: String,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum CsvError {
    #[error("{file}: no header row found")]
    NoHeader { file: PathBuf },
    #[error("{file}: expected method {expected}, found {found}")]
    WrongMethod {
        file: PathBuf,
        expected: &'static str,
        found: String,
    },
    #[error("{file}: bad header, expected first column lp__, found {found}")]
    BadHeader { file: PathBuf, found: String },
    #[error("{file}:{line}: expected {expected} columns, found {found}")]
    RowWidth {
        file: PathBuf,
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("{file}:{line}: column {column}: bad value {value:?}")]
    BadValue {
        file: PathBuf,
        line: usize,
        column: usize,
        value: String,
    },
    #[error("{file}: bad config value for {key}: {value:?}")]
    BadConfig {
        file: PathBuf,
        key: &'static str,
        value: String,
    },
    #[error("{file}: expected {expected} draws, found {found}")]
    DrawCount {
        file: PathBuf,
        expected: usize,
        found: usize,
    },
    #[error("{file}: expected {expected} rows of output, found {found}")]
    RowCount {
        file: PathBuf,
        expected: &'static str,
        found: usize,
    },
    #[error("{file}: bad adaptation info: {detail}")]
    BadAdaptation { file: PathBuf, detail: String },
    #[error("chains inconsistent: {0} and {1} {2}")]
    Inconsistent(PathBuf, PathBuf, &'static str),
    #[error("no csv files given")]
    NoFiles,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainFailure {
    pub chain_id: u32,
    pub code: Option<i32>,
    pub stdout_file: PathBuf,
}

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error("{} of {total} chains failed: {}", .failed.len(), describe_failures(.failed))]
    ChainsFailed {
        total: usize,
        failed: Vec<ChainFailure>,
    },
}

fn describe_failures(failed: &[ChainFailure]) -> String {
    failed
        .iter()
        .map(|f| {
            let code = f
                .code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            format!(
                "chain {} (exit {}, output in {})",
                f.chain_id,
                code,
                f.stdout_file.display()
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_failures_are_listed_in_message() {
        let err = RunError::ChainsFailed {
            total: 4,
            failed: vec![
                ChainFailure {
                    chain_id: 2,
                    code: Some(70),
                    stdout_file: PathBuf::from("/tmp/m-2-stdout.txt"),
                },
                ChainFailure {
                    chain_id: 4,
                    code: None,
                    stdout_file: PathBuf::from("/tmp/m-4-stdout.txt"),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("2 of 4 chains failed"));
        assert!(msg.contains("chain 2 (exit 70"));
        assert!(msg.contains("chain 4 (exit signal"));
    }
}
